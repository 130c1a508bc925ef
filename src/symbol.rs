use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque token naming one injectable value slot.
///
/// Symbols are compared by identity: two symbols created with the same description are still
/// different symbols. Clones share the identity of the original.
///
/// ```
/// # use prosper::Symbol;
/// let greeting = Symbol::new("greeting");
/// assert_eq!(greeting, greeting.clone());
/// assert_ne!(greeting, Symbol::new("greeting"));
/// ```
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Arc<str>,
}

impl Symbol {
    /// Create a new unique symbol. `description` is only used in diagnostics.
    pub fn new(description: impl Into<Arc<str>>) -> Symbol {
        Symbol {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    /// Human-readable description given on creation.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({}#{})", self.description, self.id)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.description)
    }
}

impl log::kv::ToValue for Symbol {
    fn to_value(&self) -> log::kv::Value {
        log::kv::Value::from_display(self)
    }
}
