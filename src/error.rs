use std::sync::Arc;

use crate::Symbol;

/// Represents a result type for operations in this crate.
///
/// Collaborators ([`ExperimentStore`](crate::ExperimentStore) and
/// [`SelectionAlgorithm`](crate::SelectionAlgorithm)) return the same `Result`, so their failures
/// travel through the experiment state machine untouched.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Experiments, variants or picks are wired together incorrectly.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A pick resolved to a value of a different type than the accessor expects.
    #[error("pick {symbol} has unexpected type (expected: {expected}, found: {found})")]
    TypeMismatch {
        /// Symbol that was resolved.
        symbol: Symbol,
        /// Type the accessor was declared with.
        expected: &'static str,
        /// Type of the value the active variant provides.
        found: &'static str,
    },

    /// Scope binding misuse.
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// Failure reported by the persistence store or the selection algorithm.
    #[error(transparent)]
    // Collaborator errors are usually not clonable, so we're wrapping them in an Arc.
    Collaborator(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap a store or algorithm failure.
    ///
    /// ```
    /// # use prosper::Error;
    /// let err = Error::collaborator(std::io::Error::other("connection reset"));
    /// assert_eq!(err.to_string(), "connection reset");
    /// ```
    pub fn collaborator(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Error {
        Error::Collaborator(Arc::from(err.into()))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::collaborator(value)
    }
}

/// Configuration errors. They are never transient and indicate a wiring bug in the calling code.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// Registry already holds an experiment with the same name.
    #[error("experiment name {name:?} already used")]
    DuplicateExperiment {
        /// Name of the rejected experiment.
        name: String,
    },

    /// A variant declares a different set of picks than the first variant of the experiment.
    #[error("variant {variant:?} of experiment {experiment:?} declares different picks than {reference:?}")]
    InconsistentPicks {
        /// Experiment being registered.
        experiment: String,
        /// The offending variant.
        variant: String,
        /// The first variant, which all others are compared against.
        reference: String,
    },

    /// The pick symbol is already claimed by another registered experiment.
    #[error("pick {symbol} already used by experiment {owner:?}")]
    SymbolClaimed {
        /// The symbol declared twice.
        symbol: Symbol,
        /// Experiment that claimed the symbol first.
        owner: String,
    },

    /// No registered experiment has the requested name.
    #[error("experiment {name:?} not found")]
    ExperimentNotFound {
        /// Requested experiment name.
        name: String,
    },

    /// The experiment has no variant with the requested name.
    #[error("variant {variant:?} does not exist in experiment {experiment:?}")]
    VariantNotFound {
        /// Experiment searched.
        experiment: String,
        /// Requested variant name.
        variant: String,
    },

    /// No registered experiment declares the pick.
    #[error("unable to find pick {symbol}")]
    PickNotFound {
        /// The unresolved symbol.
        symbol: Symbol,
    },

    /// Experiments need at least one variant.
    #[error("experiment {experiment:?} has no variants")]
    NoVariants {
        /// Experiment being built.
        experiment: String,
    },

    /// Variant index does not point into the variant list.
    #[error("variant index {index} is out of range for experiment {experiment:?} with {len} variants")]
    VariantIndexOutOfRange {
        /// Experiment the index belongs to.
        experiment: String,
        /// The offending index.
        index: usize,
        /// Number of variants in the experiment.
        len: usize,
    },

    /// Per-user assignments need the experiment to be persisted first.
    #[error("experiment {experiment:?} has no id, refresh or save it before assigning users")]
    MissingExperimentId {
        /// Experiment without an id.
        experiment: String,
    },
}

/// Errors from binding registries to scopes.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScopeError {
    /// `current()` was called outside of any scope.
    #[error("no registry bound to the current scope")]
    NoActiveScope,

    /// A scope was entered on an async runtime thread without a task-local binding slot. Wrap the
    /// operation in [`scope::isolated`](crate::scope::isolated) or use
    /// [`scope::run`](crate::scope::run).
    #[error("scope entered inside an async runtime without an isolated task binding")]
    NotIsolated,
}
