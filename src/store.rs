//! Persistence of experiment definitions and per-user assignments.
//!
//! [`ExperimentStore`] is implemented by the application on top of its database. Every
//! [`Experiment`](crate::Experiment) owns one store; the store decides which definition and
//! which assignment table belong to it. Any locking needed to keep a user's assignment
//! consistent (e.g., two concurrent requests racing to create it) is the store's job.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
};

use async_trait::async_trait;

use crate::{ExperimentDefinition, ExperimentId, Result, UserId, UserVariant, UserVariantId};

/// Persistence operations needed by the experiment state machine.
///
/// Implementations report failures with [`Error::collaborator`](crate::Error::collaborator);
/// they are propagated to the caller unchanged. The core never retries.
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    /// Fetch the canonical definition, or `None` if the experiment is not stored.
    async fn get_definition(&self) -> Result<Option<ExperimentDefinition>>;

    /// Insert or replace the definition. Returns the stored copy (with its id filled in).
    async fn upsert_definition(&self, definition: ExperimentDefinition)
        -> Result<ExperimentDefinition>;

    async fn delete_definition(&self, definition: &ExperimentDefinition) -> Result<()>;

    /// Fetch the assignment of `user_id` in `experiment_id`.
    async fn get_user_variant(
        &self,
        user_id: &UserId,
        experiment_id: &ExperimentId,
    ) -> Result<Option<UserVariant>>;

    async fn upsert_user_variant(&self, user_variant: UserVariant) -> Result<()>;

    async fn delete_user_variant(&self, user_variant: &UserVariant) -> Result<()>;

    /// Delete all assignments of the experiment.
    async fn delete_user_variants(&self) -> Result<()>;
}

/// A store that holds nothing. Definitions are never found and writes are discarded.
///
/// This is the default store of [`ExperimentConfig`](crate::ExperimentConfig), for experiments
/// that are configured purely in code.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl ExperimentStore for NoopStore {
    async fn get_definition(&self) -> Result<Option<ExperimentDefinition>> {
        Ok(None)
    }

    async fn upsert_definition(
        &self,
        definition: ExperimentDefinition,
    ) -> Result<ExperimentDefinition> {
        Ok(definition)
    }

    async fn delete_definition(&self, _definition: &ExperimentDefinition) -> Result<()> {
        Ok(())
    }

    async fn get_user_variant(
        &self,
        _user_id: &UserId,
        _experiment_id: &ExperimentId,
    ) -> Result<Option<UserVariant>> {
        Ok(None)
    }

    async fn upsert_user_variant(&self, _user_variant: UserVariant) -> Result<()> {
        Ok(())
    }

    async fn delete_user_variant(&self, _user_variant: &UserVariant) -> Result<()> {
        Ok(())
    }

    async fn delete_user_variants(&self) -> Result<()> {
        Ok(())
    }
}

/// Process-local store, mostly useful for tests and demos.
///
/// Ids are assigned sequentially on first upsert (`exp-1`, `uv-1`, ...).
#[derive(Debug, Default)]
pub struct InMemoryStore {
    definition: RwLock<Option<ExperimentDefinition>>,
    user_variants: RwLock<HashMap<(ExperimentId, UserId), UserVariant>>,
    next_id: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }

    /// Create a store that already holds `definition` (as-is, without assigning an id).
    pub fn with_definition(definition: ExperimentDefinition) -> InMemoryStore {
        InMemoryStore {
            definition: RwLock::new(Some(definition)),
            ..InMemoryStore::default()
        }
    }

    /// Number of stored assignments.
    pub fn user_variant_count(&self) -> usize {
        self.user_variants
            .read()
            .expect("thread holding user variants lock should not panic")
            .len()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl ExperimentStore for InMemoryStore {
    async fn get_definition(&self) -> Result<Option<ExperimentDefinition>> {
        let definition = self
            .definition
            .read()
            .expect("thread holding definition lock should not panic");
        Ok(definition.clone())
    }

    async fn upsert_definition(
        &self,
        mut definition: ExperimentDefinition,
    ) -> Result<ExperimentDefinition> {
        if definition.id.is_none() {
            definition.id = Some(ExperimentId::new(self.next_id("exp")));
        }

        let mut slot = self
            .definition
            .write()
            .expect("thread holding definition lock should not panic");
        *slot = Some(definition.clone());
        Ok(definition)
    }

    async fn delete_definition(&self, definition: &ExperimentDefinition) -> Result<()> {
        let mut slot = self
            .definition
            .write()
            .expect("thread holding definition lock should not panic");
        if slot.as_ref().map(|it| &it.id) == Some(&definition.id) {
            *slot = None;
        }
        Ok(())
    }

    async fn get_user_variant(
        &self,
        user_id: &UserId,
        experiment_id: &ExperimentId,
    ) -> Result<Option<UserVariant>> {
        let user_variants = self
            .user_variants
            .read()
            .expect("thread holding user variants lock should not panic");
        Ok(user_variants
            .get(&(experiment_id.clone(), user_id.clone()))
            .cloned())
    }

    async fn upsert_user_variant(&self, mut user_variant: UserVariant) -> Result<()> {
        if user_variant.id.is_none() {
            user_variant.id = Some(UserVariantId::new(self.next_id("uv")));
        }

        let key = (user_variant.experiment_id.clone(), user_variant.user_id.clone());
        self.user_variants
            .write()
            .expect("thread holding user variants lock should not panic")
            .insert(key, user_variant);
        Ok(())
    }

    async fn delete_user_variant(&self, user_variant: &UserVariant) -> Result<()> {
        let key = (user_variant.experiment_id.clone(), user_variant.user_id.clone());
        self.user_variants
            .write()
            .expect("thread holding user variants lock should not panic")
            .remove(&key);
        Ok(())
    }

    async fn delete_user_variants(&self) -> Result<()> {
        self.user_variants
            .write()
            .expect("thread holding user variants lock should not panic")
            .clear();
        Ok(())
    }
}
