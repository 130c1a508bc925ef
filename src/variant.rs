use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use crate::{PickValue, Symbol};

/// A named bundle of picks: one value for each symbol an experiment controls.
///
/// Variants are immutable once built and cheap to clone.
///
/// ```
/// # use prosper::{Symbol, Variant};
/// let greeting = Symbol::new("greeting");
/// let control = Variant::new("control").with_pick(&greeting, "Hello");
/// let casual = Variant::new("casual").with_pick(&greeting, "Hey there");
/// assert!(control.has_pick(&greeting));
/// assert_eq!(casual.name(), "casual");
/// ```
#[derive(Clone)]
pub struct Variant {
    name: Arc<str>,
    picks: Arc<HashMap<Symbol, PickValue>>,
}

impl Variant {
    /// Create a variant without picks.
    pub fn new(name: impl Into<Arc<str>>) -> Variant {
        Variant {
            name: name.into(),
            picks: Arc::new(HashMap::new()),
        }
    }

    /// Create a variant from a prepared pick map.
    pub fn from_picks(
        name: impl Into<Arc<str>>,
        picks: impl IntoIterator<Item = (Symbol, PickValue)>,
    ) -> Variant {
        Variant {
            name: name.into(),
            picks: Arc::new(picks.into_iter().collect()),
        }
    }

    /// Add a pick, replacing any previous value for the same symbol.
    pub fn with_pick(mut self, symbol: &Symbol, value: impl Into<PickValue>) -> Variant {
        Arc::make_mut(&mut self.picks).insert(symbol.clone(), value.into());
        self
    }

    /// Name of the variant, unique within its experiment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the pick for `symbol`, if the variant declares it.
    pub fn pick(&self, symbol: &Symbol) -> Option<&PickValue> {
        self.picks.get(symbol)
    }

    pub fn has_pick(&self, symbol: &Symbol) -> bool {
        self.picks.contains_key(symbol)
    }

    /// Set of symbols this variant declares.
    pub fn symbols(&self) -> HashSet<&Symbol> {
        self.picks.keys().collect()
    }

    pub fn picks(&self) -> impl Iterator<Item = (&Symbol, &PickValue)> {
        self.picks.iter()
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variant")
            .field("name", &self.name)
            .field("picks", &self.picks.keys().collect::<Vec<_>>())
            .finish()
    }
}
