//! Contract for the pluggable variant selection algorithm (e.g., a multi-armed bandit).
//!
//! The crate never looks inside an algorithm. It asks for a [handle](AlgorithmHandle) to the
//! current model, asks that handle for a variant index, and feeds rewards back.
use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;

use crate::Result;

/// Opaque handle to an algorithm's model state.
///
/// Algorithms put whatever they need in here (model parameters, a database row, ...) and get it
/// back with [`AlgorithmHandle::downcast_ref`].
#[derive(Clone)]
pub struct AlgorithmHandle(Arc<dyn Any + Send + Sync>);

impl AlgorithmHandle {
    pub fn new<T: Any + Send + Sync>(state: T) -> AlgorithmHandle {
        AlgorithmHandle(Arc::new(state))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for AlgorithmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AlgorithmHandle(..)")
    }
}

/// Selection algorithm operations needed by the experiment state machine.
///
/// Failures are reported with [`Error::collaborator`](crate::Error::collaborator) and propagated
/// unchanged; retries are up to the implementation.
#[async_trait]
pub trait SelectionAlgorithm: Send + Sync {
    /// Load the current model.
    async fn get_handle(&self) -> Result<AlgorithmHandle>;

    /// Choose a variant index for a new assignment.
    async fn select_index(&self, handle: &AlgorithmHandle) -> Result<usize>;

    /// Feed back the `score` a user achieved with variant `index`. Returns the updated model.
    async fn report(
        &self,
        handle: AlgorithmHandle,
        index: usize,
        score: f64,
    ) -> Result<AlgorithmHandle>;

    /// Persist a model.
    async fn upsert(&self, handle: &AlgorithmHandle) -> Result<()>;

    /// Drop the persisted model.
    async fn delete(&self) -> Result<()>;
}

/// An algorithm that always selects the same variant and ignores rewards.
///
/// [`FixedAlgorithm::control`] is the default algorithm of
/// [`ExperimentConfig`](crate::ExperimentConfig): everybody gets the control variant until a
/// real algorithm is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAlgorithm {
    index: usize,
}

impl FixedAlgorithm {
    pub fn new(index: usize) -> FixedAlgorithm {
        FixedAlgorithm { index }
    }

    /// Always selects the first (control) variant.
    pub fn control() -> FixedAlgorithm {
        FixedAlgorithm::new(0)
    }
}

impl Default for FixedAlgorithm {
    fn default() -> FixedAlgorithm {
        FixedAlgorithm::control()
    }
}

#[async_trait]
impl SelectionAlgorithm for FixedAlgorithm {
    async fn get_handle(&self) -> Result<AlgorithmHandle> {
        Ok(AlgorithmHandle::new(*self))
    }

    async fn select_index(&self, _handle: &AlgorithmHandle) -> Result<usize> {
        Ok(self.index)
    }

    async fn report(
        &self,
        handle: AlgorithmHandle,
        _index: usize,
        _score: f64,
    ) -> Result<AlgorithmHandle> {
        Ok(handle)
    }

    async fn upsert(&self, _handle: &AlgorithmHandle) -> Result<()> {
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        Ok(())
    }
}
