use std::{
    any::{type_name, Any},
    fmt,
    sync::Arc,
};

/// A type-erased value provided by a variant for one pick.
///
/// Values are shared (`Arc`) between all readers and never mutated. The concrete type is checked
/// when the value is read back through a [`Pick`](crate::Pick) or [`Registry::pick`](crate::Registry::pick).
#[derive(Clone)]
pub struct PickValue {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl PickValue {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> PickValue {
        PickValue::from_arc(Arc::new(value))
    }

    /// Wrap an already shared value without copying it.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> PickValue {
        PickValue {
            value,
            type_name: type_name::<T>(),
        }
    }

    /// Name of the concrete type, as reported by [`std::any::type_name`].
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if the value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Get a shared reference to the value if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Borrow the value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns `true` if both values share the same allocation.
    pub fn ptr_eq(&self, other: &PickValue) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for PickValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickValue")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl From<&str> for PickValue {
    fn from(value: &str) -> Self {
        PickValue::new(value.to_owned())
    }
}

macro_rules! pick_value_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for PickValue {
                fn from(value: $ty) -> Self {
                    PickValue::new(value)
                }
            }
        )*
    };
}

pick_value_from!(String, bool, i64, f64);
