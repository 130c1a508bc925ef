//! Test doubles for the store and algorithm contracts.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;

use crate::{
    AlgorithmHandle, Error, ExperimentDefinition, ExperimentId, ExperimentStore, InMemoryStore,
    Result, SelectionAlgorithm, UserId, UserVariant,
};

/// Records every call by operation name and fails the ones it is told to.
#[derive(Default)]
struct CallLog {
    calls: Mutex<Vec<&'static str>>,
    fail_on: Mutex<Option<&'static str>>,
}

impl CallLog {
    fn record(&self, op: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(op);
        if *self.fail_on.lock().unwrap() == Some(op) {
            return Err(Error::collaborator(format!("{op} failed")));
        }
        Ok(())
    }

    fn count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|it| **it == op).count()
    }

    fn total(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// [`InMemoryStore`] that counts calls and remembers upserted assignments.
pub(crate) struct RecordingStore {
    inner: InMemoryStore,
    log: CallLog,
    upserted: Mutex<Vec<UserVariant>>,
}

impl RecordingStore {
    pub(crate) fn new(definition: Option<ExperimentDefinition>) -> RecordingStore {
        RecordingStore {
            inner: definition
                .map(InMemoryStore::with_definition)
                .unwrap_or_default(),
            log: CallLog::default(),
            upserted: Mutex::new(Vec::new()),
        }
    }

    /// Store `user_variant` without recording a call.
    pub(crate) async fn seed_user_variant(&self, user_variant: UserVariant) {
        self.inner.upsert_user_variant(user_variant).await.unwrap();
    }

    /// Replace the stored definition without recording a call.
    pub(crate) async fn seed_definition(&self, definition: ExperimentDefinition) {
        self.inner.upsert_definition(definition).await.unwrap();
    }

    /// Stored definition, without recording a call.
    pub(crate) async fn definition(&self) -> Option<ExperimentDefinition> {
        self.inner.get_definition().await.unwrap()
    }

    pub(crate) fn fail_on(&self, op: &'static str) {
        *self.log.fail_on.lock().unwrap() = Some(op);
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        self.log.count(op)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.log.total()
    }

    /// Assignments passed to `upsert_user_variant`, as received.
    pub(crate) fn upserted_user_variants(&self) -> Vec<UserVariant> {
        self.upserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExperimentStore for RecordingStore {
    async fn get_definition(&self) -> Result<Option<ExperimentDefinition>> {
        self.log.record("get_definition")?;
        self.inner.get_definition().await
    }

    async fn upsert_definition(
        &self,
        definition: ExperimentDefinition,
    ) -> Result<ExperimentDefinition> {
        self.log.record("upsert_definition")?;
        self.inner.upsert_definition(definition).await
    }

    async fn delete_definition(&self, definition: &ExperimentDefinition) -> Result<()> {
        self.log.record("delete_definition")?;
        self.inner.delete_definition(definition).await
    }

    async fn get_user_variant(
        &self,
        user_id: &UserId,
        experiment_id: &ExperimentId,
    ) -> Result<Option<UserVariant>> {
        self.log.record("get_user_variant")?;
        self.inner.get_user_variant(user_id, experiment_id).await
    }

    async fn upsert_user_variant(&self, user_variant: UserVariant) -> Result<()> {
        self.log.record("upsert_user_variant")?;
        self.upserted.lock().unwrap().push(user_variant.clone());
        self.inner.upsert_user_variant(user_variant).await
    }

    async fn delete_user_variant(&self, user_variant: &UserVariant) -> Result<()> {
        self.log.record("delete_user_variant")?;
        self.inner.delete_user_variant(user_variant).await
    }

    async fn delete_user_variants(&self) -> Result<()> {
        self.log.record("delete_user_variants")?;
        self.inner.delete_user_variants().await
    }
}

/// Algorithm whose selection is set by the test.
///
/// Handles carry a `u64` generation that every `report` increments.
pub(crate) struct ScriptedAlgorithm {
    index: AtomicUsize,
    generation: Mutex<u64>,
    reports: Mutex<Vec<(usize, f64)>>,
    log: CallLog,
}

impl ScriptedAlgorithm {
    pub(crate) fn new(index: usize) -> ScriptedAlgorithm {
        ScriptedAlgorithm {
            index: AtomicUsize::new(index),
            generation: Mutex::new(0),
            reports: Mutex::new(Vec::new()),
            log: CallLog::default(),
        }
    }

    pub(crate) fn select(&self, index: usize) {
        self.index.store(index, Ordering::SeqCst);
    }

    pub(crate) fn fail_on(&self, op: &'static str) {
        *self.log.fail_on.lock().unwrap() = Some(op);
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        self.log.count(op)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.log.total()
    }

    pub(crate) fn reports(&self) -> Vec<(usize, f64)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl SelectionAlgorithm for ScriptedAlgorithm {
    async fn get_handle(&self) -> Result<AlgorithmHandle> {
        self.log.record("get_handle")?;
        Ok(AlgorithmHandle::new(*self.generation.lock().unwrap()))
    }

    async fn select_index(&self, _handle: &AlgorithmHandle) -> Result<usize> {
        self.log.record("select_index")?;
        Ok(self.index.load(Ordering::SeqCst))
    }

    async fn report(
        &self,
        handle: AlgorithmHandle,
        index: usize,
        score: f64,
    ) -> Result<AlgorithmHandle> {
        self.log.record("report")?;
        self.reports.lock().unwrap().push((index, score));
        let generation = handle.downcast_ref::<u64>().copied().unwrap_or_default() + 1;
        Ok(AlgorithmHandle::new(generation))
    }

    async fn upsert(&self, handle: &AlgorithmHandle) -> Result<()> {
        self.log.record("upsert")?;
        if let Some(generation) = handle.downcast_ref::<u64>() {
            *self.generation.lock().unwrap() = *generation;
        }
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.log.record("delete")?;
        *self.generation.lock().unwrap() = 0;
        Ok(())
    }
}
