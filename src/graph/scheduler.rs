//! Per-item scheduler: indexes nodes and drives a terminal node's
//! dependency closure onto the worker pool.

use crate::error::{Error, Result};
use crate::graph::node::TaskNode;
use crate::item::DataItem;
use crate::pool::WorkerPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scheduler for a single item's task graph.
///
/// The scheduler indexes nodes by id and executes the dependency
/// closure of a terminal node on a shared [`WorkerPool`]. The pool is
/// injected at construction and survives [`clear`]; per-item state is
/// only the node index.
///
/// [`clear`]: TaskScheduler::clear
pub struct TaskScheduler {
    tasks: HashMap<String, Arc<TaskNode>>,
    pool: Arc<WorkerPool>,
}

impl TaskScheduler {
    /// Create a scheduler bound to a shared worker pool.
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            tasks: HashMap::new(),
            pool,
        }
    }

    /// Index a node by its id.
    ///
    /// A duplicate id within one graph is a build-time error.
    pub fn add_task(&mut self, node: Arc<TaskNode>) -> Result<()> {
        if self.tasks.contains_key(node.id()) {
            return Err(Error::DuplicateTask(node.id().to_string()));
        }
        self.tasks.insert(node.id().to_string(), node);
        Ok(())
    }

    /// Look up a node by id.
    pub fn task(&self, id: &str) -> Option<&Arc<TaskNode>> {
        self.tasks.get(id)
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the scheduler holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The shared worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Execute the terminal node's dependency closure and return its
    /// result (which may be null).
    ///
    /// Interior nodes are fanned out onto the worker pool so that
    /// independent branches run in parallel; the terminal node itself
    /// runs on the calling thread. Dependency order is enforced by
    /// waiting on each dependency's handle before a node executes.
    ///
    /// Any node failure during the dispatch (function error, worker
    /// panic, pool rejection) is recorded; the first one is returned
    /// after the terminal completes, so the caller can account the
    /// whole item as errored while downstream nodes still observed the
    /// null-result propagation.
    pub fn execute(&self, terminal_id: &str) -> Result<DataItem> {
        let terminal = self
            .tasks
            .get(terminal_id)
            .ok_or_else(|| Error::UnknownTask(terminal_id.to_string()))?;

        let dispatch = Arc::new(Dispatch {
            pool: Arc::clone(&self.pool),
            failure: Mutex::new(None),
        });
        drive(&dispatch, terminal);

        if let Some(err) = dispatch.take_failure() {
            return Err(err);
        }
        Ok(terminal.result())
    }

    /// Snapshot of per-node execution times, executed nodes only.
    pub fn execution_times(&self) -> HashMap<String, Duration> {
        self.tasks
            .iter()
            .filter_map(|(id, node)| node.execution_time().map(|t| (id.clone(), t)))
            .collect()
    }

    /// Drop the node index for reuse; the pool binding is retained.
    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

/// Shared state of one `execute` call: the pool plus a first-error slot.
struct Dispatch {
    pool: Arc<WorkerPool>,
    failure: Mutex<Option<Error>>,
}

impl Dispatch {
    fn record(&self, err: Error) {
        let mut slot = self.failure.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_failure(&self) -> Option<Error> {
        self.failure.lock().unwrap().take()
    }
}

/// Ensure `node` and its dependency closure have executed.
///
/// Not-yet-executed dependencies are submitted to the pool (each one
/// recursing into `drive`), the handles are awaited, then the node
/// itself runs on the current thread. The per-node lock makes a race
/// between two branches into a shared dependency harmless.
fn drive(dispatch: &Arc<Dispatch>, node: &Arc<TaskNode>) {
    if node.is_executed() {
        return;
    }

    let mut pending = Vec::new();
    for dep in node.dependencies() {
        if dep.is_executed() {
            continue;
        }
        let dispatch2 = Arc::clone(dispatch);
        let dep2 = Arc::clone(dep);
        match dispatch.pool.spawn(move || drive(&dispatch2, &dep2)) {
            Ok(handle) => pending.push((dep.id().to_string(), handle)),
            Err(err) => {
                tracing::warn!(
                    "failed to dispatch dependency '{}' of '{}': {}",
                    dep.id(),
                    node.id(),
                    err
                );
                dispatch.record(err);
            }
        }
    }

    for (dep_id, handle) in pending {
        if let Err(err) = handle.wait() {
            tracing::warn!("dependency '{}' of '{}' failed: {}", dep_id, node.id(), err);
            dispatch.record(err);
        }
    }

    if let Err(err) = node.execute_once() {
        dispatch.record(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::ProcessFn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(threads: usize) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(threads).unwrap())
    }

    fn add_fn(delta: i64) -> ProcessFn {
        Arc::new(move |inputs: &[DataItem]| {
            let value = inputs[0].expect_ref::<i64>()?;
            Ok(DataItem::new(value + delta))
        })
    }

    #[test]
    fn test_execute_linear_chain() {
        let mut scheduler = TaskScheduler::new(pool(4));

        let input = TaskNode::input("in", DataItem::new(1i64));
        let a = TaskNode::process("a", add_fn(10), &[input.clone()]);
        let b = TaskNode::process("b", add_fn(100), &[a.clone()]);

        scheduler.add_task(input).unwrap();
        scheduler.add_task(a).unwrap();
        scheduler.add_task(b).unwrap();

        let result = scheduler.execute("b").unwrap();
        assert_eq!(result.downcast_ref::<i64>(), Some(&111));
    }

    #[test]
    fn test_execute_terminal_can_be_input() {
        let mut scheduler = TaskScheduler::new(pool(1));
        scheduler
            .add_task(TaskNode::input("in", DataItem::new(7i64)))
            .unwrap();

        let result = scheduler.execute("in").unwrap();
        assert_eq!(result.downcast_ref::<i64>(), Some(&7));
    }

    #[test]
    fn test_unknown_terminal_id() {
        let scheduler = TaskScheduler::new(pool(1));
        assert!(matches!(
            scheduler.execute("nowhere"),
            Err(Error::UnknownTask(id)) if id == "nowhere"
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut scheduler = TaskScheduler::new(pool(1));
        scheduler
            .add_task(TaskNode::input("x", DataItem::new(1i64)))
            .unwrap();
        let err = scheduler.add_task(TaskNode::input("x", DataItem::new(2i64)));
        assert!(matches!(err, Err(Error::DuplicateTask(id)) if id == "x"));
    }

    #[test]
    fn test_shared_dependency_executes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let shared_fn: ProcessFn = Arc::new(move |inputs: &[DataItem]| {
            counted.fetch_add(1, Ordering::Relaxed);
            Ok(inputs[0].clone())
        });

        let mut scheduler = TaskScheduler::new(pool(8));
        let input = TaskNode::input("in", DataItem::new(1i64));
        let shared = TaskNode::process("shared", shared_fn, &[input.clone()]);
        let left = TaskNode::process("left", add_fn(1), &[shared.clone()]);
        let right = TaskNode::process("right", add_fn(2), &[shared.clone()]);
        let join_fn: ProcessFn = Arc::new(|inputs: &[DataItem]| {
            let a = inputs[0].expect_ref::<i64>()?;
            let b = inputs[1].expect_ref::<i64>()?;
            Ok(DataItem::new(a + b))
        });
        let join = TaskNode::process("join", join_fn, &[left.clone(), right.clone()]);

        scheduler.add_task(input).unwrap();
        scheduler.add_task(shared).unwrap();
        scheduler.add_task(left).unwrap();
        scheduler.add_task(right).unwrap();
        scheduler.add_task(join).unwrap();

        let result = scheduler.execute("join").unwrap();
        assert_eq!(result.downcast_ref::<i64>(), Some(&5));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failed_node_reported_after_terminal() {
        let failing: ProcessFn = Arc::new(|_inputs: &[DataItem]| Err(Error::task("boom")));

        let mut scheduler = TaskScheduler::new(pool(2));
        let input = TaskNode::input("in", DataItem::new(1i64));
        let bad = TaskNode::process("bad", failing, &[input.clone()]);
        let out = TaskNode::process("out", add_fn(1), &[bad.clone()]);

        scheduler.add_task(input).unwrap();
        scheduler.add_task(bad).unwrap();
        scheduler.add_task(out.clone()).unwrap();

        // The failure surfaces as the item's error...
        assert!(matches!(
            scheduler.execute("out"),
            Err(Error::TaskFailed { id, .. }) if id == "bad"
        ));
        // ...while the downstream node still executed with a null result.
        assert!(out.is_executed());
        assert!(out.result().is_null());
    }

    #[test]
    fn test_execution_times_cover_executed_nodes_only() {
        let mut scheduler = TaskScheduler::new(pool(2));
        let input = TaskNode::input("in", DataItem::new(1i64));
        let a = TaskNode::process("a", add_fn(1), &[input.clone()]);
        let unrelated = TaskNode::process("unrelated", add_fn(1), &[input.clone()]);

        scheduler.add_task(input).unwrap();
        scheduler.add_task(a).unwrap();
        scheduler.add_task(unrelated).unwrap();

        scheduler.execute("a").unwrap();

        let times = scheduler.execution_times();
        assert!(times.contains_key("in"));
        assert!(times.contains_key("a"));
        assert!(!times.contains_key("unrelated"));
    }

    #[test]
    fn test_clear_retains_pool() {
        let shared_pool = pool(2);
        let mut scheduler = TaskScheduler::new(shared_pool.clone());
        scheduler
            .add_task(TaskNode::input("in", DataItem::new(1i64)))
            .unwrap();

        scheduler.clear();
        assert!(scheduler.is_empty());
        assert!(Arc::ptr_eq(scheduler.pool(), &shared_pool));
        assert!(!shared_pool.is_stopped());
    }
}
