//! Per-item façade for constructing and executing a task graph.

use crate::error::Result;
use crate::graph::node::{ProcessFn, TaskNode};
use crate::graph::scheduler::TaskScheduler;
use crate::item::DataItem;
use crate::pool::WorkerPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Builds one item's task graph and triggers its execution.
///
/// The builder wraps a [`TaskScheduler`] and is designed for reuse
/// across items: [`reset`] replaces the scheduler with a fresh one
/// while keeping the worker pool binding, so the pool's threads live
/// for the whole pipeline rather than one item.
///
/// [`reset`]: PipelineBuilder::reset
///
/// # Example
///
/// ```rust
/// use millrace::graph::PipelineBuilder;
/// use millrace::item::DataItem;
///
/// let mut builder = PipelineBuilder::with_workers(2)?;
/// let input = builder.add_input("in", DataItem::new(20i64))?;
/// builder.add_task(
///     "out",
///     |inputs: &[DataItem]| {
///         let value = inputs[0].expect_ref::<i64>()?;
///         Ok(DataItem::new(value + 1))
///     },
///     &[input],
/// )?;
///
/// let result = builder.execute("out")?;
/// assert_eq!(result.downcast_ref::<i64>(), Some(&21));
/// # Ok::<(), millrace::Error>(())
/// ```
pub struct PipelineBuilder {
    scheduler: TaskScheduler,
    pool: Arc<WorkerPool>,
    profiling: bool,
}

impl PipelineBuilder {
    /// Create a builder over a shared worker pool.
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            scheduler: TaskScheduler::new(Arc::clone(&pool)),
            pool,
            profiling: false,
        }
    }

    /// Create a builder with its own pool of `threads` workers
    /// (zero selects the machine's available parallelism).
    pub fn with_workers(threads: usize) -> Result<Self> {
        Ok(Self::new(Arc::new(WorkerPool::new(threads)?)))
    }

    /// Add an input node carrying a preloaded value.
    pub fn add_input(&mut self, id: &str, item: DataItem) -> Result<Arc<TaskNode>> {
        let node = TaskNode::input(id, item);
        self.scheduler.add_task(Arc::clone(&node))?;
        Ok(node)
    }

    /// Add a processing node over the given dependency nodes.
    pub fn add_task<F>(
        &mut self,
        id: &str,
        func: F,
        inputs: &[Arc<TaskNode>],
    ) -> Result<Arc<TaskNode>>
    where
        F: Fn(&[DataItem]) -> Result<DataItem> + Send + Sync + 'static,
    {
        self.add_process(id, Arc::new(func), inputs)
    }

    /// Add a processing node from an already shared function, e.g. one
    /// obtained from a [`TaskRegistry`](crate::registry::TaskRegistry).
    pub fn add_process(
        &mut self,
        id: &str,
        func: ProcessFn,
        inputs: &[Arc<TaskNode>],
    ) -> Result<Arc<TaskNode>> {
        let node = TaskNode::process(id, func, inputs);
        self.scheduler.add_task(Arc::clone(&node))?;
        Ok(node)
    }

    /// Execute the graph for the given terminal node and return its
    /// result (which may be null).
    pub fn execute(&self, terminal_id: &str) -> Result<DataItem> {
        if !self.profiling {
            return self.scheduler.execute(terminal_id);
        }

        let started = Instant::now();
        let result = self.scheduler.execute(terminal_id);
        tracing::debug!(
            "graph executed in {:.3} ms",
            started.elapsed().as_secs_f64() * 1e3
        );
        for (id, elapsed) in self.scheduler.execution_times() {
            tracing::debug!("  task '{}': {:.3} ms", id, elapsed.as_secs_f64() * 1e3);
        }
        result
    }

    /// Per-node execution times of the current graph.
    pub fn execution_times(&self) -> HashMap<String, Duration> {
        self.scheduler.execution_times()
    }

    /// Discard the current graph so the next item starts fresh.
    ///
    /// The worker pool binding is retained.
    pub fn reset(&mut self) {
        self.scheduler = TaskScheduler::new(Arc::clone(&self.pool));
    }

    /// Toggle per-execution debug timing output.
    pub fn enable_profiling(&mut self, enable: bool) {
        self.profiling = enable;
    }

    /// Whether profiling output is enabled.
    pub fn profiling_enabled(&self) -> bool {
        self.profiling
    }

    /// The scheduler for the current item.
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// The shared worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("tasks", &self.scheduler.len())
            .field("profiling", &self.profiling)
            .finish()
    }
}
