//! Graph vertices: input nodes and processing nodes.

use crate::error::{Error, Result};
use crate::item::DataItem;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A processing function: ordered dependency results in, one result out.
///
/// Functions are shared (`Arc`) so the registry can hand the same bound
/// closure to every item's graph; they must therefore be re-entrant
/// across items.
pub type ProcessFn = Arc<dyn Fn(&[DataItem]) -> Result<DataItem> + Send + Sync>;

/// Execution state of a node within its item's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Not yet started.
    Pending,
    /// Currently executing under the node lock.
    Running,
    /// Finished; `Done` is terminal for the item.
    Done,
}

enum NodeKind {
    /// Preloaded value; executed at construction.
    Input(DataItem),
    /// User function over the dependencies' results.
    Process(ProcessFn),
}

struct NodeState {
    status: NodeStatus,
    result: DataItem,
    elapsed: Option<Duration>,
}

/// A vertex in a per-item task graph.
///
/// A node owns its (immutable) dependency list, a write-once result
/// slot and a timing record. [`execute_once`] is idempotent: however
/// many downstream nodes race into a shared dependency, its function
/// runs at most once per item.
///
/// [`execute_once`]: TaskNode::execute_once
pub struct TaskNode {
    id: String,
    kind: NodeKind,
    dependencies: Vec<Arc<TaskNode>>,
    /// Fast-path flag; published with release ordering after the
    /// result is stored, read with acquire ordering.
    executed: AtomicBool,
    state: Mutex<NodeState>,
}

impl TaskNode {
    /// Create an input node holding a preloaded value.
    ///
    /// Input nodes are born executed: their result is available
    /// immediately and their execution time is zero.
    pub fn input(id: impl Into<String>, item: DataItem) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind: NodeKind::Input(item.clone()),
            dependencies: Vec::new(),
            executed: AtomicBool::new(true),
            state: Mutex::new(NodeState {
                status: NodeStatus::Done,
                result: item,
                elapsed: Some(Duration::ZERO),
            }),
        })
    }

    /// Create a processing node over the given dependencies.
    ///
    /// The dependency order is preserved: the function receives its
    /// inputs in exactly this order. Dependencies can only be supplied
    /// here, so the list is immutable and the topology is acyclic by
    /// construction.
    pub fn process(
        id: impl Into<String>,
        func: ProcessFn,
        dependencies: &[Arc<TaskNode>],
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind: NodeKind::Process(func),
            dependencies: dependencies.to_vec(),
            executed: AtomicBool::new(false),
            state: Mutex::new(NodeState {
                status: NodeStatus::Pending,
                result: DataItem::null(),
                elapsed: None,
            }),
        })
    }

    /// The node's id within its graph.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The node's dependencies, in declaration order.
    pub fn dependencies(&self) -> &[Arc<TaskNode>] {
        &self.dependencies
    }

    /// Whether the node has executed (result published).
    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    /// Whether every dependency has executed. A processing node with no
    /// dependencies is never ready.
    pub fn is_ready(&self) -> bool {
        let deps_done = self.dependencies.iter().all(|dep| dep.is_executed());
        match self.kind {
            NodeKind::Input(_) => deps_done,
            NodeKind::Process(_) => deps_done && !self.dependencies.is_empty(),
        }
    }

    /// The node's result (null until executed).
    pub fn result(&self) -> DataItem {
        self.state.lock().unwrap().result.clone()
    }

    /// Elapsed execution time, once the node has executed.
    pub fn execution_time(&self) -> Option<Duration> {
        self.state.lock().unwrap().elapsed
    }

    /// Current position in the `Pending → Running → Done` lifecycle.
    pub fn status(&self) -> NodeStatus {
        self.state.lock().unwrap().status
    }

    /// Execute the node at most once and return its result.
    ///
    /// Under the node lock the executed flag is re-checked, so two
    /// threads racing through a shared dependency cannot run the
    /// function twice — the loser observes the stored result.
    ///
    /// A failing function leaves the node executed with a null result
    /// and returns [`Error::TaskFailed`] for the dispatching path.
    pub fn execute_once(&self) -> Result<DataItem> {
        let mut state = self.state.lock().unwrap();
        if self.executed.load(Ordering::Acquire) {
            return Ok(state.result.clone());
        }

        state.status = NodeStatus::Running;
        let started = Instant::now();
        let outcome = self.run();
        let elapsed = started.elapsed();

        state.elapsed = Some(elapsed);
        state.status = NodeStatus::Done;
        let outcome = match outcome {
            Ok(item) => {
                state.result = item.clone();
                Ok(item)
            }
            Err(err) => {
                tracing::error!("task '{}' failed: {}", self.id, err);
                state.result = DataItem::null();
                Err(Error::TaskFailed {
                    id: self.id.clone(),
                    message: err.to_string(),
                })
            }
        };
        self.executed.store(true, Ordering::Release);

        tracing::debug!(
            "task '{}' executed in {:.3} ms",
            self.id,
            elapsed.as_secs_f64() * 1e3
        );
        outcome
    }

    fn run(&self) -> Result<DataItem> {
        match &self.kind {
            NodeKind::Input(item) => Ok(item.clone()),
            NodeKind::Process(func) => {
                if !self.is_ready() {
                    tracing::warn!(
                        "task '{}' executed before its dependencies were ready",
                        self.id
                    );
                    return Ok(DataItem::null());
                }

                let inputs: SmallVec<[DataItem; 4]> =
                    self.dependencies.iter().map(|dep| dep.result()).collect();
                if inputs.iter().any(DataItem::is_null) {
                    tracing::debug!("task '{}' skipped: null dependency result", self.id);
                    return Ok(DataItem::null());
                }

                (func.as_ref())(&inputs)
            }
        }
    }
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies.len())
            .field("executed", &self.is_executed())
            .finish()
    }
}
