//! Scoped A/B experiments with pluggable variant selection.
//!
//! # Overview
//!
//! An [`Experiment`] offers a list of [`Variant`]s. Each variant maps the same set of pick
//! [`Symbol`]s to values; the first variant is the control. Which variant a user is served is
//! decided by a [`SelectionAlgorithm`] (e.g., a multi-armed bandit) and remembered per user by an
//! [`ExperimentStore`]. Experiments are created with [`ExperimentConfig`].
//!
//! Experiments are grouped into a [`Registry`], which guarantees that every symbol belongs to
//! exactly one experiment. A registry is usually built per request or per user and bound to the
//! running operation with the [`scope`] module; code anywhere below then reads pick values through
//! a typed [`Pick`] accessor without knowing which experiment provides them.
//!
//! An [`AssignmentLogger`] can be provided to save assignment events to your storage, tracking
//! which user received which variant.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. [`ValidationError`]s and
//! [`Error::TypeMismatch`] indicate that experiments or accessors are wired incorrectly.
//! [`ScopeError`]s indicate a pick was read outside of any scope. Store and algorithm failures are
//! passed through unchanged as [`Error::Collaborator`]; nothing is retried.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `prosper` target. Consider integrating a `log`-compatible logger implementation for better
//! visibility into experiment operations.
//!
//! # Examples
//!
//! A runnable example can be found in the `demos/simple` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

mod algorithm;
mod assignment_logger;
mod config;
mod definition;
mod error;
mod experiment;
mod ids;
mod pick;
mod registry;
pub mod scope;
mod store;
mod symbol;
mod user_variant;
mod value;
mod variant;

#[cfg(test)]
mod testing;

pub use algorithm::{AlgorithmHandle, FixedAlgorithm, SelectionAlgorithm};
pub use assignment_logger::{AssignmentEvent, AssignmentLogger};
pub use config::ExperimentConfig;
pub use definition::ExperimentDefinition;
pub use error::{Error, Result, ScopeError, ValidationError};
pub use experiment::Experiment;
pub use ids::{ExperimentId, UserId, UserVariantId};
pub use pick::{pick, Pick};
pub use registry::Registry;
pub use store::{ExperimentStore, InMemoryStore, NoopStore};
pub use symbol::Symbol;
pub use user_variant::UserVariant;
pub use value::PickValue;
pub use variant::Variant;
