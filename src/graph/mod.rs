//! Per-item task graphs: nodes, the scheduler and the builder façade.
//!
//! For every input item the streaming pipeline constructs a fresh
//! directed acyclic graph here. Nodes reference their dependencies
//! directly (shared handles, no back-pointers), the scheduler indexes
//! them by id, and the builder is the small per-item API applications
//! use from their graph-construction callback.

mod builder;
mod node;
mod scheduler;

pub use builder::PipelineBuilder;
pub use node::{NodeStatus, ProcessFn, TaskNode};
pub use scheduler::TaskScheduler;
