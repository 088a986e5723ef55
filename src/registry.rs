//! Registry binding string ids to shared processing task instances.

use crate::error::{Error, Result};
use crate::graph::ProcessFn;
use crate::item::DataItem;
use std::collections::HashMap;
use std::sync::Arc;

/// A stateful processing task.
///
/// Implementors hold whatever state the task needs (a model handle, a
/// codec context); the instance is shared across items, so `process`
/// must be re-entrant — it may be invoked concurrently from different
/// items' graphs.
pub trait ProcessingTask: Send + Sync {
    /// Process the ordered dependency results into one output item.
    fn process(&self, inputs: &[DataItem]) -> Result<DataItem>;
}

impl<F> ProcessingTask for F
where
    F: Fn(&[DataItem]) -> Result<DataItem> + Send + Sync,
{
    fn process(&self, inputs: &[DataItem]) -> Result<DataItem> {
        self(inputs)
    }
}

/// Maps task ids to shared [`ProcessingTask`] instances.
///
/// Applications register their tasks once at startup and hand the
/// bound process functions to the graph builder per item.
///
/// # Example
///
/// ```rust
/// use millrace::item::DataItem;
/// use millrace::registry::TaskRegistry;
///
/// let mut registry = TaskRegistry::new();
/// registry.register("negate", |inputs: &[DataItem]| {
///     let value = inputs[0].expect_ref::<i64>()?;
///     Ok(DataItem::new(-value))
/// });
///
/// let negate = registry.process_fn("negate")?;
/// let out = negate(&[DataItem::new(3i64)])?;
/// assert_eq!(out.downcast_ref::<i64>(), Some(&-3));
/// # Ok::<(), millrace::Error>(())
/// ```
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn ProcessingTask>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under `id`, replacing any previous binding.
    pub fn register<T>(&mut self, id: impl Into<String>, task: T)
    where
        T: ProcessingTask + 'static,
    {
        self.tasks.insert(id.into(), Arc::new(task));
    }

    /// Register an already shared task instance under `id`.
    pub fn register_shared(&mut self, id: impl Into<String>, task: Arc<dyn ProcessingTask>) {
        self.tasks.insert(id.into(), task);
    }

    /// Get a process function bound to the task registered under `id`.
    ///
    /// Lookup failure is [`Error::UnknownTask`] and surfaces as an
    /// item-level pipeline error.
    pub fn process_fn(&self, id: &str) -> Result<ProcessFn> {
        let task = self
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownTask(id.to_string()))?;
        Ok(Arc::new(move |inputs: &[DataItem]| task.process(inputs)))
    }

    /// Whether a task is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Iterate over the registered ids.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scaler {
        factor: i64,
        invocations: AtomicUsize,
    }

    impl ProcessingTask for Scaler {
        fn process(&self, inputs: &[DataItem]) -> Result<DataItem> {
            self.invocations.fetch_add(1, Ordering::Relaxed);
            let value = inputs[0].expect_ref::<i64>()?;
            Ok(DataItem::new(value * self.factor))
        }
    }

    #[test]
    fn test_register_and_invoke() {
        let mut registry = TaskRegistry::new();
        registry.register(
            "triple",
            Scaler {
                factor: 3,
                invocations: AtomicUsize::new(0),
            },
        );
        assert!(registry.contains("triple"));

        let triple = registry.process_fn("triple").unwrap();
        let out = triple(&[DataItem::new(5i64)]).unwrap();
        assert_eq!(out.downcast_ref::<i64>(), Some(&15));
    }

    #[test]
    fn test_closures_register_directly() {
        let mut registry = TaskRegistry::new();
        registry.register("identity", |inputs: &[DataItem]| Ok(inputs[0].clone()));

        let identity = registry.process_fn("identity").unwrap();
        let out = identity(&[DataItem::new(9u8)]).unwrap();
        assert_eq!(out.downcast_ref::<u8>(), Some(&9));
    }

    #[test]
    fn test_unknown_id() {
        let registry = TaskRegistry::new();
        assert!(matches!(
            registry.process_fn("missing"),
            Err(Error::UnknownTask(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_bound_functions_share_one_instance() {
        let mut registry = TaskRegistry::new();
        let task = Arc::new(Scaler {
            factor: 2,
            invocations: AtomicUsize::new(0),
        });
        registry.register_shared("double", task.clone());

        let first = registry.process_fn("double").unwrap();
        let second = registry.process_fn("double").unwrap();
        first(&[DataItem::new(1i64)]).unwrap();
        second(&[DataItem::new(2i64)]).unwrap();

        assert_eq!(task.invocations.load(Ordering::Relaxed), 2);
    }
}
