//! # Millrace
//!
//! A streaming dataflow runtime for per-item computation graphs.
//!
//! For every input item the pipeline constructs a directed acyclic
//! graph of processing tasks, executes that graph on a shared worker
//! pool honoring data dependencies, and emits the result of a
//! designated terminal node into an output queue for downstream
//! consumption. Items flow through the same topology in sequence; the
//! runtime is the substrate on which application pipelines (detection,
//! fusion, enhancement) are built.
//!
//! ## Guarantees
//!
//! - **At-most-once execution**: a node's function runs exactly once
//!   per item, no matter how many downstream nodes share it.
//! - **Dependency order**: a node sees its dependencies' results fully
//!   published before it executes; independent branches run in
//!   parallel on the pool.
//! - **Item order**: outputs leave the pipeline in input order.
//! - **Backpressure**: producers block while the input queue is at
//!   capacity; items are never dropped.
//! - **Error isolation**: a failing task costs one output and one
//!   error count — the pipeline keeps running.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use millrace::prelude::*;
//!
//! let pipeline = StreamingPipeline::new(PipelineConfig::new(4, 100))?;
//! pipeline.set_processor(|builder, item, output_id| {
//!     let frame = builder.add_input("frame", item)?;
//!     let detect = builder.add_process("detect", registry.process_fn("detect")?, &[frame])?;
//!     builder.add_process(output_id, registry.process_fn("compose")?, &[detect])?;
//!     Ok(())
//! })?;
//! pipeline.start()?;
//!
//! // Any thread may feed inputs and drain outputs.
//! pipeline.add_input(DataItem::new(frame));
//! while let Some(result) = pipeline.try_get_output() {
//!     /* ... */
//! }
//! pipeline.stop();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod graph;
pub mod item;
pub mod memory;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod stream;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::graph::{PipelineBuilder, TaskNode};
    pub use crate::item::DataItem;
    pub use crate::pool::WorkerPool;
    pub use crate::queue::BlockingQueue;
    pub use crate::registry::{ProcessingTask, TaskRegistry};
    pub use crate::stream::{
        DataConsumer, DataProducer, PipelineConfig, StreamingPipeline, TaskStat,
    };
}

pub use error::{Error, Result};
