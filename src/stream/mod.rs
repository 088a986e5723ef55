//! The long-running streaming pipeline: queues, driver thread, stats.
//!
//! A [`StreamingPipeline`] binds an input queue, a per-item
//! graph-construction callback and an output queue. One driver thread
//! pops items in arrival order, has the callback build a fresh task
//! graph per item, executes the graph on the shared worker pool and
//! pushes the terminal node's result downstream. Because each item is
//! fully processed before the next pop, output order equals input
//! order.

mod consumer;
mod producer;

pub use consumer::DataConsumer;
pub use producer::DataProducer;

use crate::error::{Error, Result};
use crate::graph::PipelineBuilder;
use crate::item::DataItem;
use crate::pool::WorkerPool;
use crate::queue::BlockingQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Back-off step used while the input queue is at capacity.
const BACKPRESSURE_STEP: Duration = Duration::from_millis(10);

/// Idle sleep of the driver thread when the input queue is empty.
const IDLE_STEP: Duration = Duration::from_millis(1);

/// Construction parameters for a [`StreamingPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker pool size; zero selects the machine's available
    /// parallelism.
    pub workers: usize,
    /// Input queue capacity enforced by [`StreamingPipeline::add_input`].
    pub queue_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_cap: 100,
        }
    }
}

impl PipelineConfig {
    /// Create a config with explicit worker count and input queue cap.
    pub fn new(workers: usize, queue_cap: usize) -> Self {
        Self { workers, queue_cap }
    }
}

/// The per-item graph-construction callback.
///
/// Invoked on the driver thread with the reusable builder, the popped
/// input item and the configured terminal node id. The callback adds
/// the input node plus the processing nodes defining this item's graph.
pub type ProcessorFn = Arc<dyn Fn(&mut PipelineBuilder, DataItem, &str) -> Result<()> + Send + Sync>;

/// Cross-item aggregate for one task id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStat {
    /// Total execution time over all items.
    pub total: Duration,
    /// Number of items for which the task executed.
    pub count: usize,
}

impl TaskStat {
    /// Mean execution time per item.
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Statistics written by the driver thread, read after `stop`.
#[derive(Default)]
struct StreamStats {
    total_processing: Duration,
    task_stats: HashMap<String, TaskStat>,
    started_at: Option<Instant>,
}

/// Long-running driver for per-item dataflow graphs.
///
/// Lifecycle: constructed → configured ([`set_processor`],
/// [`set_output_node`], [`enable_profiling`]) → [`start`] → [`stop`].
/// `stop` drains whatever is left in the input queue, joins the driver
/// thread and shuts the worker pool down; the pipeline is not
/// restartable afterwards.
///
/// The pipeline is handed out as an `Arc` so producer threads
/// ([`add_input`]), consumer threads ([`try_get_output`] /
/// [`get_output`]) and the driver share it.
///
/// [`set_processor`]: StreamingPipeline::set_processor
/// [`set_output_node`]: StreamingPipeline::set_output_node
/// [`enable_profiling`]: StreamingPipeline::enable_profiling
/// [`start`]: StreamingPipeline::start
/// [`stop`]: StreamingPipeline::stop
/// [`add_input`]: StreamingPipeline::add_input
/// [`try_get_output`]: StreamingPipeline::try_get_output
/// [`get_output`]: StreamingPipeline::get_output
///
/// # Example
///
/// ```rust
/// use millrace::graph::PipelineBuilder;
/// use millrace::item::DataItem;
/// use millrace::stream::{PipelineConfig, StreamingPipeline};
///
/// let pipeline = StreamingPipeline::new(PipelineConfig::new(2, 16))?;
/// pipeline.set_processor(
///     |builder: &mut PipelineBuilder, item: DataItem, output_id: &str| {
///         let input = builder.add_input("frame", item)?;
///         builder.add_task(
///             output_id,
///             |inputs: &[DataItem]| {
///                 let value = inputs[0].expect_ref::<i64>()?;
///                 Ok(DataItem::new(value * 2))
///             },
///             &[input],
///         )?;
///         Ok(())
///     },
/// )?;
///
/// pipeline.start()?;
/// assert!(pipeline.add_input(DataItem::new(21i64)));
/// let doubled = pipeline.get_output().unwrap();
/// assert_eq!(doubled.downcast_ref::<i64>(), Some(&42));
/// pipeline.stop();
/// # Ok::<(), millrace::Error>(())
/// ```
pub struct StreamingPipeline {
    pool: Arc<WorkerPool>,
    input: BlockingQueue<DataItem>,
    output: BlockingQueue<DataItem>,
    queue_cap: usize,

    processor: Mutex<Option<ProcessorFn>>,
    output_node_id: Mutex<String>,
    profiling: AtomicBool,

    running: AtomicBool,
    input_active: AtomicBool,
    output_active: AtomicBool,

    processed: AtomicUsize,
    errors: AtomicUsize,
    stats: Mutex<StreamStats>,

    driver: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingPipeline {
    /// Create a pipeline with the given configuration.
    ///
    /// The worker pool is created here, owned at pipeline level, and
    /// injected into every per-item scheduler.
    pub fn new(config: PipelineConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            pool: Arc::new(WorkerPool::new(config.workers)?),
            input: BlockingQueue::new(),
            output: BlockingQueue::new(),
            queue_cap: config.queue_cap,
            processor: Mutex::new(None),
            output_node_id: Mutex::new("output".to_string()),
            profiling: AtomicBool::new(false),
            running: AtomicBool::new(false),
            input_active: AtomicBool::new(false),
            output_active: AtomicBool::new(false),
            processed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            stats: Mutex::new(StreamStats::default()),
            driver: Mutex::new(None),
        }))
    }

    /// Create a pipeline with the default configuration.
    pub fn with_defaults() -> Result<Arc<Self>> {
        Self::new(PipelineConfig::default())
    }

    /// Set the per-item graph-construction callback.
    ///
    /// Rejected with [`Error::Busy`] while the pipeline runs.
    pub fn set_processor<F>(&self, processor: F) -> Result<()>
    where
        F: Fn(&mut PipelineBuilder, DataItem, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.ensure_stopped("set processor")?;
        *self.processor.lock().unwrap() = Some(Arc::new(processor));
        Ok(())
    }

    /// Set the terminal node id whose result feeds the output queue
    /// (default `"output"`).
    pub fn set_output_node(&self, id: impl Into<String>) -> Result<()> {
        self.ensure_stopped("set output node")?;
        *self.output_node_id.lock().unwrap() = id.into();
        Ok(())
    }

    /// Toggle per-task timing and cross-item statistics.
    pub fn enable_profiling(&self, enable: bool) -> Result<()> {
        self.ensure_stopped("toggle profiling")?;
        self.profiling.store(enable, Ordering::Relaxed);
        Ok(())
    }

    /// Whether profiling is enabled.
    pub fn profiling_enabled(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    fn ensure_stopped(&self, what: &'static str) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            Err(Error::Busy(what))
        } else {
            Ok(())
        }
    }

    /// Start the pipeline: reset statistics, raise the activity flags
    /// and spawn the driver thread.
    ///
    /// Requires a processor ([`Error::ProcessorNotSet`]). Starting an
    /// already running pipeline is a no-op; starting after [`stop`]
    /// fails with [`Error::PoolStopped`].
    ///
    /// [`stop`]: StreamingPipeline::stop
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.pool.is_stopped() {
            return Err(Error::PoolStopped);
        }
        let processor = self
            .processor
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::ProcessorNotSet)?;
        let output_id = self.output_node_id.lock().unwrap().clone();

        self.processed.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        {
            let mut stats = self.stats.lock().unwrap();
            *stats = StreamStats {
                started_at: Some(Instant::now()),
                ..StreamStats::default()
            };
        }

        self.running.store(true, Ordering::Release);
        self.input_active.store(true, Ordering::Release);
        self.output_active.store(true, Ordering::Release);

        let pipeline = Arc::clone(self);
        match std::thread::Builder::new()
            .name("millrace-driver".to_string())
            .spawn(move || pipeline.run_loop(processor, output_id))
        {
            Ok(handle) => {
                *self.driver.lock().unwrap() = Some(handle);
                tracing::debug!("streaming pipeline started");
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                self.input_active.store(false, Ordering::Release);
                self.output_active.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Stop the pipeline.
    ///
    /// Drops the running flag and closes the input side, then joins the
    /// driver — which first drains every item still queued — closes the
    /// output side and shuts the worker pool down. When profiling is
    /// enabled the aggregate statistics are logged.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.input_active.store(false, Ordering::Release);

        let driver = self.driver.lock().unwrap().take();
        if let Some(handle) = driver {
            let _ = handle.join();
        }

        self.output_active.store(false, Ordering::Release);
        self.pool.shutdown();

        if self.profiling.load(Ordering::Relaxed) {
            self.report_statistics();
        } else {
            tracing::debug!("streaming pipeline stopped");
        }
    }

    /// Offer an item to the pipeline.
    ///
    /// Returns `false` for null items and after the input side has been
    /// closed. While the input queue holds `queue_cap` items and input
    /// is active, the call blocks in fixed back-off steps — items are
    /// never dropped and the cap is never exceeded.
    pub fn add_input(&self, item: DataItem) -> bool {
        if item.is_null() {
            tracing::warn!("rejected null input item");
            return false;
        }

        while self.input.len() >= self.queue_cap && self.input_active.load(Ordering::Acquire) {
            std::thread::sleep(BACKPRESSURE_STEP);
        }

        if self.input_active.load(Ordering::Acquire) {
            self.input.push(item);
            true
        } else {
            false
        }
    }

    /// Close the input side: subsequent [`add_input`] calls return
    /// `false`. Already queued items are still processed.
    ///
    /// [`add_input`]: StreamingPipeline::add_input
    pub fn close_input(&self) {
        self.input_active.store(false, Ordering::Release);
    }

    /// Pop an output item without blocking.
    pub fn try_get_output(&self) -> Option<DataItem> {
        self.output.try_pop()
    }

    /// Pop an output item, blocking until one is available.
    pub fn get_output(&self) -> Option<DataItem> {
        self.output.wait_and_pop()
    }

    /// Whether the input queue is empty.
    pub fn input_empty(&self) -> bool {
        self.input.is_empty()
    }

    /// Whether the output queue is empty.
    pub fn output_empty(&self) -> bool {
        self.output.is_empty()
    }

    /// Number of queued input items.
    pub fn input_size(&self) -> usize {
        self.input.len()
    }

    /// Number of queued output items.
    pub fn output_size(&self) -> usize {
        self.output.len()
    }

    /// Whether the driver is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the input side accepts items.
    pub fn is_input_active(&self) -> bool {
        self.input_active.load(Ordering::Acquire)
    }

    /// Whether further outputs may still appear.
    pub fn is_output_active(&self) -> bool {
        self.output_active.load(Ordering::Acquire)
    }

    /// The consumer continuation predicate: more output may be
    /// observed while the pipeline runs, the output queue is non-empty
    /// or the output side is still active.
    pub fn output_pending(&self) -> bool {
        self.running.load(Ordering::Acquire)
            || !self.output.is_empty()
            || self.output_active.load(Ordering::Acquire)
    }

    /// Items that produced an output so far.
    pub fn processed_items(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Items that failed so far.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    /// Cross-item per-task statistics (populated when profiling).
    pub fn task_stats(&self) -> HashMap<String, TaskStat> {
        self.stats.lock().unwrap().task_stats.clone()
    }

    /// Total time spent processing items (populated when profiling).
    pub fn total_processing_time(&self) -> Duration {
        self.stats.lock().unwrap().total_processing
    }

    fn run_loop(self: Arc<Self>, processor: ProcessorFn, output_id: String) {
        let mut builder = PipelineBuilder::new(Arc::clone(&self.pool));
        builder.enable_profiling(self.profiling.load(Ordering::Relaxed));

        // Keep draining after `running` drops so queued items are not
        // lost on shutdown.
        while self.running.load(Ordering::Acquire) || !self.input.is_empty() {
            let Some(item) = self.input.try_pop() else {
                std::thread::sleep(IDLE_STEP);
                continue;
            };

            let profiling = self.profiling.load(Ordering::Relaxed);
            let started = profiling.then(Instant::now);

            match Self::process_item(&mut builder, &processor, item, &output_id) {
                Ok(result) if !result.is_null() => {
                    self.output.push(result);
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(_) => {
                    tracing::debug!("item produced no output");
                }
                Err(err) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("error processing input item: {}", err);
                }
            }

            if let Some(started) = started {
                let elapsed = started.elapsed();
                let times = builder.execution_times();
                let mut stats = self.stats.lock().unwrap();
                stats.total_processing += elapsed;
                for (id, time) in times {
                    let entry = stats.task_stats.entry(id).or_default();
                    entry.total += time;
                    entry.count += 1;
                }
                tracing::debug!(
                    "processed item {} in {:.3} ms",
                    self.processed.load(Ordering::Relaxed),
                    elapsed.as_secs_f64() * 1e3
                );
            }

            // Discard this item's graph before the next pop.
            builder.reset();
        }

        self.output_active.store(false, Ordering::Release);
        tracing::debug!("processing loop completed");
    }

    fn process_item(
        builder: &mut PipelineBuilder,
        processor: &ProcessorFn,
        item: DataItem,
        output_id: &str,
    ) -> Result<DataItem> {
        processor(builder, item, output_id)?;
        builder.execute(output_id)
    }

    fn report_statistics(&self) {
        let processed = self.processed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let stats = self.stats.lock().unwrap();
        let runtime = stats
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();

        tracing::info!("pipeline statistics:");
        tracing::info!("  items processed: {}", processed);
        tracing::info!("  errors: {}", errors);
        tracing::info!("  total running time: {:.3} ms", runtime.as_secs_f64() * 1e3);
        if processed > 0 {
            tracing::info!(
                "  average processing time per item: {:.3} ms",
                stats.total_processing.as_secs_f64() * 1e3 / processed as f64
            );
            tracing::info!(
                "  processing rate: {:.2} items/s",
                processed as f64 / runtime.as_secs_f64().max(f64::EPSILON)
            );
        }
        for (id, stat) in &stats.task_stats {
            tracing::info!(
                "  task '{}': {:.3} ms average over {} executions",
                id,
                stat.average().as_secs_f64() * 1e3,
                stat.count
            );
        }
    }
}

impl Drop for StreamingPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StreamingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingPipeline")
            .field("running", &self.is_running())
            .field("input", &self.input_size())
            .field("output", &self.output_size())
            .field("processed", &self.processed_items())
            .field("errors", &self.error_count())
            .finish()
    }
}
