//! The polymorphic data item carried between graph nodes.

use crate::error::{Error, Result};
use std::any::Any;
use std::sync::Arc;

/// An opaque, reference-counted value flowing through a task graph.
///
/// A `DataItem` either carries a shared payload of an arbitrary
/// `Any + Send + Sync` type, or it is *null* — the sentinel a task
/// produces when it has no output for the current input. Cloning is an
/// `Arc` bump, so the same upstream result can be read by any number of
/// downstream nodes without copying the payload.
///
/// # Example
///
/// ```rust
/// use millrace::item::DataItem;
///
/// let item = DataItem::new(vec![1u8, 2, 3]);
/// assert!(item.is::<Vec<u8>>());
/// assert_eq!(item.downcast_ref::<Vec<u8>>().map(Vec::len), Some(3));
///
/// let nothing = DataItem::null();
/// assert!(nothing.is_null());
/// ```
#[derive(Clone)]
pub struct DataItem {
    payload: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &'static str,
}

impl DataItem {
    /// Wrap a value into a shared data item.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            payload: Some(Arc::new(value)),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wrap an already shared value without another allocation.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            payload: Some(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// The null sentinel: "no output for this input".
    pub fn null() -> Self {
        Self {
            payload: None,
            type_name: "null",
        }
    }

    /// Whether this item is the null sentinel.
    pub fn is_null(&self) -> bool {
        self.payload.is_none()
    }

    /// Whether the payload is of type `T`. Null items match no type.
    pub fn is<T: Any>(&self) -> bool {
        self.payload
            .as_deref()
            .map(|p| p.is::<T>())
            .unwrap_or(false)
    }

    /// Borrow the payload as `T`, if it has that type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    /// Get a shared handle to the payload as `Arc<T>`, if it has that type.
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payload.clone().and_then(|p| p.downcast::<T>().ok())
    }

    /// Borrow the payload as `T`, failing with [`Error::TypeMismatch`].
    ///
    /// This is the typed access processing functions should use: the
    /// mismatch surfaces as a node failure instead of a panic.
    pub fn expect_ref<T: Any>(&self) -> Result<&T> {
        self.downcast_ref::<T>()
            .ok_or(Error::TypeMismatch(std::any::type_name::<T>()))
    }

    /// The payload's type name as captured at construction ("null" for
    /// the null sentinel). Intended for diagnostics only.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for DataItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            f.write_str("DataItem(null)")
        } else {
            write!(f, "DataItem({})", self.type_name)
        }
    }
}
