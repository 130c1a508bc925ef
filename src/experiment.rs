//! The per-experiment state machine.
//!
//! An [`Experiment`] is either disabled or enabled. While enabled it serves the variant selected
//! for the current user; while disabled it serves nothing (and registries fall back to the control
//! variant). Which variant a user gets is decided, in order, by:
//!
//! 1. the in-flight assignment cache of this experiment instance,
//! 2. the user's persisted [`UserVariant`],
//! 3. the [`SelectionAlgorithm`], whose choice is then persisted for the user.
//!
//! Store and algorithm failures are returned unchanged. Nothing is retried.
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::Utc;

use crate::{
    error::ValidationError, AlgorithmHandle, AssignmentEvent, AssignmentLogger, ExperimentConfig,
    ExperimentDefinition, ExperimentId, ExperimentStore, PickValue, Result, SelectionAlgorithm,
    Symbol, UserId, UserVariant, Variant,
};

/// A single experiment: a set of variants, an enabled flag and the currently selected variant.
///
/// Create experiments with [`ExperimentConfig`]. All operations take `&self`, so an experiment can
/// be shared once it is registered in a [`Registry`](crate::Registry).
pub struct Experiment {
    name: String,
    state: RwLock<ExperimentState>,
    /// In-flight assignments made by this instance: user → variant index.
    assignments: Mutex<HashMap<UserId, usize>>,
    store: Arc<dyn ExperimentStore>,
    algorithm: Arc<dyn SelectionAlgorithm>,
    assignment_logger: Box<dyn AssignmentLogger + Send + Sync>,
}

struct ExperimentState {
    id: Option<ExperimentId>,
    is_enabled: bool,
    variants: Arc<[Variant]>,
    variant_index: usize,
    algorithm_handle: Option<AlgorithmHandle>,
}

impl Experiment {
    pub(crate) fn new(config: ExperimentConfig) -> Experiment {
        Experiment {
            name: config.name,
            state: RwLock::new(ExperimentState {
                id: config.id,
                is_enabled: config.is_enabled,
                variants: config.variants.into(),
                variant_index: config.variant_index,
                algorithm_handle: None,
            }),
            assignments: Mutex::new(HashMap::new()),
            store: config.store,
            algorithm: config.algorithm,
            assignment_logger: config.assignment_logger,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the stored definition. `None` until the experiment is refreshed from (or saved to) a
    /// store that knows it.
    pub fn id(&self) -> Option<ExperimentId> {
        self.read().id.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.read().is_enabled
    }

    /// Index of the currently selected variant. Meaningless while the experiment is disabled.
    pub fn variant_index(&self) -> usize {
        self.read().variant_index
    }

    pub fn variants(&self) -> Arc<[Variant]> {
        self.read().variants.clone()
    }

    /// Most recent algorithm model handle obtained by this experiment.
    pub fn algorithm_handle(&self) -> Option<AlgorithmHandle> {
        self.read().algorithm_handle.clone()
    }

    /// Returns `true` if the experiment's variants declare `symbol`.
    pub fn has_pick(&self, symbol: &Symbol) -> bool {
        self.read().variants.iter().any(|variant| variant.has_pick(symbol))
    }

    /// Symbols declared by the first variant (which every other variant must match).
    pub fn pick_symbols(&self) -> HashSet<Symbol> {
        self.read()
            .variants
            .first()
            .map(|variant| variant.symbols().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Turn the experiment on for this instance only. Nothing is persisted.
    pub fn enable(&self) {
        self.write().is_enabled = true;
    }

    /// Turn the experiment off for this instance only. Nothing is persisted.
    pub fn disable(&self) {
        self.write().is_enabled = false;
    }

    /// Select the variant called `name`, overriding whatever was resolved before.
    ///
    /// # Errors
    ///
    /// [`ValidationError::VariantNotFound`] if no variant has that name. The selected variant is
    /// left unchanged in that case.
    pub fn force_variant(&self, name: &str) -> Result<()> {
        let mut state = self.write();
        let Some(index) = state.variants.iter().position(|it| it.name() == name) else {
            return Err(ValidationError::VariantNotFound {
                experiment: self.name.clone(),
                variant: name.to_owned(),
            }
            .into());
        };
        log::debug!(target: "prosper", experiment = self.name.as_str(), variant = name, index; "forcing variant");
        state.variant_index = index;
        Ok(())
    }

    /// The variant currently served, or `None` while the experiment is disabled.
    ///
    /// The variant is the one picked by the last [`Experiment::resolve_variant_for_user`] (or
    /// [`Experiment::force_variant`]) call.
    pub fn active_variant(&self) -> Option<Variant> {
        let state = self.read();
        if !state.is_enabled {
            return None;
        }
        state.variants.get(state.variant_index).cloned()
    }

    /// Value of `symbol` in the active variant. Disabled experiments serve their control (first)
    /// variant.
    pub fn pick(&self, symbol: &Symbol) -> Option<PickValue> {
        let state = self.read();
        let index = if state.is_enabled {
            state.variant_index
        } else {
            0
        };
        state.variants.get(index)?.pick(symbol).cloned()
    }

    /// Snapshot of the local state as a definition, e.g., for saving it.
    pub fn definition(&self) -> ExperimentDefinition {
        let state = self.read();
        ExperimentDefinition {
            id: state.id.clone(),
            name: self.name.clone(),
            variants: state.variants.to_vec(),
            is_enabled: state.is_enabled,
            variant_index: state.variant_index,
        }
    }

    /// Reload id, enabled flag and variants from the store.
    ///
    /// If the store has no definition, the experiment is disabled and its id cleared. Cached user
    /// assignments that no longer fit the new variant list are dropped, all of them if the id
    /// changed.
    ///
    /// # Errors
    ///
    /// - Store failures, unchanged.
    /// - [`ValidationError::NoVariants`] if the stored definition has no variants. The local
    ///   state is not modified in that case.
    pub async fn refresh(&self) -> Result<()> {
        let definition = self.store.get_definition().await?;

        let Some(definition) = definition else {
            log::debug!(target: "prosper", experiment = self.name.as_str(); "no stored definition, disabling experiment");
            let mut state = self.write();
            state.is_enabled = false;
            state.id = None;
            return Ok(());
        };

        self.adopt_definition(definition)
    }

    /// Decide which variant to serve, optionally for a specific user, and select it.
    ///
    /// - Disabled experiment: the algorithm picks an index directly. Nothing is read from or
    ///   written to the store, which allows previewing assignments.
    /// - Enabled, no user: the algorithm picks an index directly (anonymous assignment).
    /// - Enabled, with user: a cached or persisted assignment wins. Otherwise the algorithm picks
    ///   an index, which is persisted for the user and reported to the assignment logger. A
    ///   persisted assignment that no longer fits the variant list is replaced the same way.
    ///
    /// Returns the selected index.
    ///
    /// # Errors
    ///
    /// - Store and algorithm failures, unchanged.
    /// - [`ValidationError::VariantIndexOutOfRange`] if the algorithm produces an index that does
    ///   not exist.
    /// - [`ValidationError::MissingExperimentId`] if a user assignment is needed but the
    ///   experiment has no id.
    pub async fn resolve_variant_for_user(&self, user_id: Option<&UserId>) -> Result<usize> {
        let (is_enabled, experiment_id) = {
            let state = self.read();
            (state.is_enabled, state.id.clone())
        };

        let user_id = match user_id {
            Some(user_id) if is_enabled => user_id,
            _ => {
                let index = self.select_index().await?;
                log::trace!(target: "prosper", experiment = self.name.as_str(), index, is_enabled; "selected variant without user");
                self.adopt_index(index)?;
                return Ok(index);
            }
        };

        if let Some(index) = self.cached_index(user_id) {
            log::trace!(target: "prosper", experiment = self.name.as_str(), user_id, index; "using cached assignment");
            self.adopt_index(index)?;
            return Ok(index);
        }

        let experiment_id = experiment_id.ok_or_else(|| ValidationError::MissingExperimentId {
            experiment: self.name.clone(),
        })?;

        let persisted = self.store.get_user_variant(user_id, &experiment_id).await?;
        let stale = match persisted {
            Some(user_variant) if self.check_index(user_variant.index).is_ok() => {
                let index = user_variant.index;
                log::trace!(target: "prosper", experiment = self.name.as_str(), user_id, index; "using persisted assignment");
                self.adopt_index(index)?;
                self.cache_index(user_id, index);
                return Ok(index);
            }
            Some(user_variant) => {
                log::warn!(target: "prosper",
                           experiment = self.name.as_str(),
                           user_id,
                           index = user_variant.index;
                           "persisted assignment is out of range, reassigning");
                Some(user_variant)
            }
            None => None,
        };

        let index = self.select_index().await?;
        self.check_index(index)?;
        let user_variant = match stale {
            Some(user_variant) => user_variant.with_index(index),
            None => UserVariant::new(experiment_id.clone(), user_id.clone(), index),
        };
        self.store.upsert_user_variant(user_variant).await?;
        self.adopt_index(index)?;
        self.cache_index(user_id, index);

        log::debug!(target: "prosper", experiment = self.name.as_str(), user_id, index; "persisted new assignment");
        self.log_assignment(experiment_id, user_id, index);

        Ok(index)
    }

    /// Refresh the experiment and, if it is enabled afterwards, resolve its variant for
    /// `user_id`.
    pub async fn load_for_user(&self, user_id: Option<&UserId>) -> Result<()> {
        self.refresh().await?;
        if self.is_enabled() {
            self.resolve_variant_for_user(user_id).await?;
        }
        Ok(())
    }

    /// Report the outcome `score` of `user_id` to the selection algorithm.
    ///
    /// Does nothing (and touches no collaborator) while the experiment is disabled. Also does
    /// nothing if the experiment is no longer stored or the user holds no assignment.
    ///
    /// The user's in-flight cached assignment is consumed by this call before the algorithm is
    /// involved. The updated algorithm model is persisted with [`SelectionAlgorithm::upsert`].
    ///
    /// # Errors
    ///
    /// Store and algorithm failures, unchanged. The cached assignment is gone by then, so a retry
    /// reports against the persisted assignment.
    pub async fn report_outcome(&self, user_id: &UserId, score: f64) -> Result<()> {
        if !self.is_enabled() {
            log::trace!(target: "prosper", experiment = self.name.as_str(), user_id; "experiment disabled, ignoring outcome");
            return Ok(());
        }

        let Some(definition) = self.store.get_definition().await? else {
            log::debug!(target: "prosper", experiment = self.name.as_str(), user_id; "no stored definition, ignoring outcome");
            return Ok(());
        };

        let Some(index) = self.take_user_index(user_id, definition.id.as_ref()).await? else {
            log::debug!(target: "prosper", experiment = self.name.as_str(), user_id; "user has no assignment, ignoring outcome");
            return Ok(());
        };

        let handle = self.algorithm.get_handle().await?;
        let handle = self.algorithm.report(handle, index, score).await?;
        self.algorithm.upsert(&handle).await?;
        self.write().algorithm_handle = Some(handle);

        log::debug!(target: "prosper", experiment = self.name.as_str(), user_id, index, score; "reported outcome");
        Ok(())
    }

    /// Persist the local state as the canonical definition and adopt the stored copy (which
    /// carries the store-assigned id).
    pub async fn save(&self) -> Result<()> {
        let stored = self.store.upsert_definition(self.definition()).await?;
        self.adopt_definition(stored)
    }

    /// Delete the stored definition, every user assignment and the algorithm model.
    ///
    /// The local instance is disabled and forgets its id and cached assignments.
    pub async fn delete(&self) -> Result<()> {
        let definition = self.definition();
        self.store.delete_definition(&definition).await?;
        self.store.delete_user_variants().await?;
        self.algorithm.delete().await?;

        self.lock_assignments().clear();
        let mut state = self.write();
        state.id = None;
        state.is_enabled = false;
        state.algorithm_handle = None;
        log::debug!(target: "prosper", experiment = self.name.as_str(); "deleted experiment");
        Ok(())
    }

    /// Forget `user_id`'s assignment, both cached and persisted. The next resolution for the user
    /// asks the algorithm again.
    pub async fn reset_user(&self, user_id: &UserId) -> Result<()> {
        self.lock_assignments().remove(user_id);

        let Some(experiment_id) = self.id() else {
            return Ok(());
        };
        if let Some(user_variant) = self.store.get_user_variant(user_id, &experiment_id).await? {
            self.store.delete_user_variant(&user_variant).await?;
        }
        Ok(())
    }

    fn adopt_definition(&self, definition: ExperimentDefinition) -> Result<()> {
        if definition.variants.is_empty() {
            return Err(ValidationError::NoVariants {
                experiment: self.name.clone(),
            }
            .into());
        }

        log::debug!(target: "prosper",
                    experiment = self.name.as_str(),
                    id:? = definition.id,
                    is_enabled = definition.is_enabled;
                    "adopting stored definition");

        let (id_changed, len) = {
            let mut state = self.write();
            let id_changed = state.id != definition.id;
            state.id = definition.id;
            state.is_enabled = definition.is_enabled;
            state.variants = definition.variants.into();
            if state.variant_index >= state.variants.len() {
                state.variant_index = 0;
            }
            (id_changed, state.variants.len())
        };

        // Cached indices belong to the previous variant list.
        let mut assignments = self.lock_assignments();
        if id_changed {
            assignments.clear();
        } else {
            assignments.retain(|_, index| *index < len);
        }
        Ok(())
    }

    async fn select_index(&self) -> Result<usize> {
        let handle = self.algorithm.get_handle().await?;
        let index = self.algorithm.select_index(&handle).await?;
        self.write().algorithm_handle = Some(handle);
        Ok(index)
    }

    /// Index held by `user_id`: the cached one (which is removed) or the persisted one.
    async fn take_user_index(
        &self,
        user_id: &UserId,
        experiment_id: Option<&ExperimentId>,
    ) -> Result<Option<usize>> {
        let cached = self.lock_assignments().remove(user_id);
        if cached.is_some() {
            return Ok(cached);
        }

        let Some(experiment_id) = experiment_id else {
            return Ok(None);
        };
        let user_variant = self.store.get_user_variant(user_id, experiment_id).await?;
        Ok(user_variant.map(|it| it.index))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let len = self.read().variants.len();
        if index >= len {
            return Err(ValidationError::VariantIndexOutOfRange {
                experiment: self.name.clone(),
                index,
                len,
            }
            .into());
        }
        Ok(())
    }

    fn adopt_index(&self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.write().variant_index = index;
        Ok(())
    }

    fn cached_index(&self, user_id: &UserId) -> Option<usize> {
        self.lock_assignments().get(user_id).copied()
    }

    fn cache_index(&self, user_id: &UserId, index: usize) {
        self.lock_assignments().insert(user_id.clone(), index);
    }

    fn log_assignment(&self, experiment_id: ExperimentId, user_id: &UserId, index: usize) {
        let variant = self
            .read()
            .variants
            .get(index)
            .map(|it| it.name().to_owned())
            .unwrap_or_default();
        self.assignment_logger.log_assignment(AssignmentEvent {
            experiment: self.name.clone(),
            experiment_id,
            variant,
            variant_index: index,
            user_id: user_id.clone(),
            timestamp: Utc::now(),
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, ExperimentState> {
        // Err() is possible only if a writer panicked while holding the lock, which never happens
        // as no user code runs under it.
        self.state
            .read()
            .expect("thread holding experiment lock should not panic")
    }

    fn write(&self) -> RwLockWriteGuard<'_, ExperimentState> {
        self.state
            .write()
            .expect("thread holding experiment lock should not panic")
    }

    fn lock_assignments(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, usize>> {
        self.assignments
            .lock()
            .expect("thread holding assignments lock should not panic")
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("id", &state.id)
            .field("is_enabled", &state.is_enabled)
            .field("variant_index", &state.variant_index)
            .field("variants", &state.variants)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::{
        error::ValidationError,
        testing::{RecordingStore, ScriptedAlgorithm},
        AssignmentEvent, Error, Experiment, ExperimentConfig, ExperimentDefinition, Symbol,
        UserId, UserVariant, Variant,
    };

    struct Fixture {
        experiment: Experiment,
        store: Arc<RecordingStore>,
        algorithm: Arc<ScriptedAlgorithm>,
        events: Arc<Mutex<Vec<AssignmentEvent>>>,
    }

    fn variants() -> Vec<Variant> {
        let foo = Symbol::new("foo");
        vec![
            Variant::new("control set").with_pick(&foo, "control"),
            Variant::new("b").with_pick(&foo, "b"),
        ]
    }

    fn stored_definition(is_enabled: bool) -> ExperimentDefinition {
        ExperimentDefinition {
            id: Some("456".into()),
            name: "name".to_owned(),
            variants: variants(),
            is_enabled,
            variant_index: 0,
        }
    }

    fn fixture(is_enabled: bool, definition: Option<ExperimentDefinition>) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();

        let store = Arc::new(RecordingStore::new(definition));
        let algorithm = Arc::new(ScriptedAlgorithm::new(1));
        let events = Arc::new(Mutex::new(Vec::new()));
        let experiment = ExperimentConfig::new("name")
            .id("456")
            .variants(variants())
            .enabled(is_enabled)
            .shared_store(store.clone())
            .shared_algorithm(algorithm.clone())
            .assignment_logger({
                let events = events.clone();
                move |event| events.lock().unwrap().push(event)
            })
            .to_experiment()
            .unwrap();
        Fixture {
            experiment,
            store,
            algorithm,
            events,
        }
    }

    fn user() -> UserId {
        UserId::from("123")
    }

    #[tokio::test]
    async fn report_outcome_when_disabled_touches_no_collaborator() {
        let f = fixture(false, Some(stored_definition(true)));
        f.experiment.report_outcome(&user(), 1.0).await.unwrap();
        assert_eq!(f.store.calls("get_definition"), 0);
        assert_eq!(f.store.total_calls(), 0);
        assert_eq!(f.algorithm.total_calls(), 0);
    }

    #[tokio::test]
    async fn report_outcome_when_enabled_and_no_definition() {
        let f = fixture(true, None);
        f.experiment.report_outcome(&user(), 1.0).await.unwrap();
        assert_eq!(f.store.calls("get_definition"), 1);
        assert_eq!(f.algorithm.total_calls(), 0);
    }

    #[tokio::test]
    async fn report_outcome_rewards_cached_assignment() {
        let f = fixture(true, Some(stored_definition(true)));
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();

        f.experiment.report_outcome(&user(), 1.0).await.unwrap();
        assert_eq!(f.algorithm.reports(), vec![(1, 1.0)]);
        assert_eq!(f.algorithm.calls("upsert"), 1);
        let handle = f.experiment.algorithm_handle().unwrap();
        assert_eq!(handle.downcast_ref::<u64>(), Some(&1));

        // the in-flight assignment was consumed, the persisted one is used next time
        let lookups = f.store.calls("get_user_variant");
        f.experiment.report_outcome(&user(), 0.5).await.unwrap();
        assert_eq!(f.store.calls("get_user_variant"), lookups + 1);
        assert_eq!(f.algorithm.reports(), vec![(1, 1.0), (1, 0.5)]);
    }

    #[tokio::test]
    async fn report_outcome_rewards_persisted_assignment() {
        let f = fixture(true, Some(stored_definition(true)));
        f.store
            .seed_user_variant(UserVariant::new("456".into(), user(), 0))
            .await;

        f.experiment.report_outcome(&user(), 3.0).await.unwrap();
        assert_eq!(f.algorithm.calls("get_handle"), 1);
        assert_eq!(f.algorithm.reports(), vec![(0, 3.0)]);
    }

    #[tokio::test]
    async fn report_outcome_without_assignment_is_ignored() {
        let f = fixture(true, Some(stored_definition(true)));
        f.experiment.report_outcome(&user(), 3.0).await.unwrap();
        assert_eq!(f.store.calls("get_user_variant"), 1);
        assert!(f.algorithm.reports().is_empty());
    }

    #[tokio::test]
    async fn report_outcome_propagates_report_failure() {
        let f = fixture(true, Some(stored_definition(true)));
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();
        f.algorithm.fail_on("report");

        let err = f.experiment.report_outcome(&user(), 1.0).await.err().unwrap();
        assert!(matches!(err, Error::Collaborator(_)));
        assert_eq!(err.to_string(), "report failed");
        assert_eq!(f.algorithm.calls("upsert"), 0);
        let handle = f.experiment.algorithm_handle().unwrap();
        assert_eq!(handle.downcast_ref::<u64>(), Some(&0));

        // the cached assignment is gone, the retry looks up the persisted one
        let lookups = f.store.calls("get_user_variant");
        assert!(f.experiment.report_outcome(&user(), 1.0).await.is_err());
        assert_eq!(f.store.calls("get_user_variant"), lookups + 1);
        assert_eq!(f.algorithm.calls("report"), 2);
    }

    #[tokio::test]
    async fn report_outcome_propagates_upsert_failure() {
        let f = fixture(true, Some(stored_definition(true)));
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();
        f.algorithm.fail_on("upsert");

        let err = f.experiment.report_outcome(&user(), 2.0).await.err().unwrap();
        assert_eq!(err.to_string(), "upsert failed");
        assert_eq!(f.algorithm.reports(), vec![(1, 2.0)]);
        // the unsaved model is not adopted
        let handle = f.experiment.algorithm_handle().unwrap();
        assert_eq!(handle.downcast_ref::<u64>(), Some(&0));
    }

    #[tokio::test]
    async fn refresh_drops_cached_assignments_beyond_new_variants() {
        let f = fixture(true, Some(stored_definition(true)));
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();
        assert_eq!(f.experiment.variant_index(), 1);

        let mut shrunk = stored_definition(true);
        shrunk.variants.truncate(1);
        f.store.seed_definition(shrunk).await;
        f.algorithm.select(0);

        f.experiment.load_for_user(Some(&user())).await.unwrap();
        assert_eq!(f.experiment.variant_index(), 0);
        assert_eq!(f.algorithm.calls("select_index"), 2);

        // the out-of-range persisted record is replaced, keeping its id
        let upserted = f.store.upserted_user_variants();
        assert_eq!(upserted.len(), 2);
        assert_eq!(upserted[1].index, 0);
        assert_eq!(upserted[1].id, Some("uv-1".into()));

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].variant, "control set");
    }

    #[tokio::test]
    async fn refresh_with_new_id_forgets_cached_assignments() {
        let f = fixture(true, Some(stored_definition(true)));
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();

        let mut replaced = stored_definition(true);
        replaced.id = Some("789".into());
        f.store.seed_definition(replaced).await;
        f.algorithm.select(0);

        f.experiment.load_for_user(Some(&user())).await.unwrap();
        assert_eq!(f.experiment.variant_index(), 0);
        assert_eq!(f.algorithm.calls("select_index"), 2);
        assert_eq!(
            f.store.upserted_user_variants().last(),
            Some(&UserVariant::new("789".into(), user(), 0))
        );
    }

    #[tokio::test]
    async fn refresh_adopts_stored_definition() {
        let replacement = ExperimentDefinition {
            id: Some("123".into()),
            name: "replacement".to_owned(),
            variants: vec![Variant::new("only")],
            is_enabled: true,
            variant_index: 0,
        };
        let f = fixture(false, Some(replacement));
        f.experiment.refresh().await.unwrap();

        assert!(f.experiment.is_enabled());
        assert_eq!(f.experiment.id(), Some("123".into()));
        assert_eq!(f.experiment.variants().len(), 1);
        assert_eq!(f.experiment.variants()[0].name(), "only");
        // the local name is kept
        assert_eq!(f.experiment.name(), "name");
    }

    #[tokio::test]
    async fn refresh_without_definition_disables() {
        let f = fixture(true, None);
        f.experiment.refresh().await.unwrap();
        assert!(!f.experiment.is_enabled());
        assert_eq!(f.experiment.id(), None);
    }

    #[tokio::test]
    async fn refresh_rejects_definition_without_variants() {
        let mut definition = stored_definition(true);
        definition.variants.clear();
        let f = fixture(false, Some(definition));

        let err = f.experiment.refresh().await.err().unwrap();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NoVariants { .. })
        ));
        assert!(!f.experiment.is_enabled());
        assert_eq!(f.experiment.variants().len(), 2);
    }

    #[tokio::test]
    async fn refresh_propagates_store_failure() {
        let f = fixture(true, Some(stored_definition(true)));
        f.store.fail_on("get_definition");
        let err = f.experiment.refresh().await.err().unwrap();
        assert!(matches!(err, Error::Collaborator(_)));
        assert_eq!(err.to_string(), "get_definition failed");
        // local state untouched
        assert!(f.experiment.is_enabled());
    }

    #[test]
    fn force_variant_selects_by_name() {
        let f = fixture(true, None);
        assert_ne!(f.experiment.variant_index(), 1);
        f.experiment.force_variant("b").unwrap();
        assert_eq!(f.experiment.variant_index(), 1);
    }

    #[test]
    fn force_variant_rejects_unknown_name() {
        let f = fixture(true, None);
        f.experiment.force_variant("b").unwrap();
        let err = f.experiment.force_variant("missing").err().unwrap();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::VariantNotFound { ref variant, .. }) if variant == "missing"
        ));
        assert_eq!(f.experiment.variant_index(), 1);
    }

    #[test]
    fn enable_and_disable_are_local() {
        let f = fixture(false, Some(stored_definition(false)));
        f.experiment.enable();
        assert!(f.experiment.is_enabled());
        f.experiment.disable();
        assert!(!f.experiment.is_enabled());
        assert_eq!(f.store.total_calls(), 0);
        assert_eq!(f.algorithm.total_calls(), 0);
    }

    #[tokio::test]
    async fn resolve_when_disabled_asks_algorithm_only() {
        let f = fixture(false, Some(stored_definition(true)));
        f.algorithm.select(1);

        let index = f
            .experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(f.experiment.variant_index(), 1);
        assert_eq!(f.algorithm.calls("select_index"), 1);
        assert_eq!(f.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn resolve_without_user_asks_algorithm_only() {
        let f = fixture(true, Some(stored_definition(true)));
        f.algorithm.select(1);

        f.experiment.resolve_variant_for_user(None).await.unwrap();
        assert_eq!(f.experiment.variant_index(), 1);
        assert_eq!(f.store.total_calls(), 0);
        assert!(f.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_new_user_persists_assignment() {
        let f = fixture(true, Some(stored_definition(true)));
        f.algorithm.select(1);

        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();

        assert_eq!(f.experiment.variant_index(), 1);
        assert_eq!(
            f.store.upserted_user_variants(),
            vec![UserVariant::new("456".into(), user(), 1)]
        );
        assert_eq!(f.algorithm.calls("select_index"), 1);

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].variant, "b");
        assert_eq!(events[0].variant_index, 1);
        assert_eq!(events[0].user_id, user());
    }

    #[tokio::test]
    async fn resolve_prefers_persisted_assignment() {
        let f = fixture(true, Some(stored_definition(true)));
        f.store
            .seed_user_variant(UserVariant::new("456".into(), user(), 0))
            .await;
        f.algorithm.select(1);

        f.experiment.force_variant("b").unwrap();
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();

        assert_eq!(f.experiment.variant_index(), 0);
        assert_eq!(f.algorithm.calls("select_index"), 0);
        assert!(f.store.upserted_user_variants().is_empty());
        assert!(f.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_uses_cache_on_second_call() {
        let f = fixture(true, Some(stored_definition(true)));
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();
        let lookups = f.store.calls("get_user_variant");

        f.experiment.force_variant("control set").unwrap();
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();

        assert_eq!(f.store.calls("get_user_variant"), lookups);
        assert_eq!(f.algorithm.calls("select_index"), 1);
        assert_eq!(f.experiment.variant_index(), 1);
    }

    #[tokio::test]
    async fn resolve_rejects_out_of_range_selection() {
        let f = fixture(true, Some(stored_definition(true)));
        f.algorithm.select(7);

        let err = f
            .experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::VariantIndexOutOfRange { index: 7, len: 2, .. })
        ));
        assert!(f.store.upserted_user_variants().is_empty());
    }

    #[tokio::test]
    async fn resolve_for_user_requires_id() {
        let experiment = ExperimentConfig::new("unsaved")
            .variants(variants())
            .enabled(true)
            .to_experiment()
            .unwrap();
        let err = experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingExperimentId { .. })
        ));
    }

    #[tokio::test]
    async fn resolve_propagates_algorithm_failure() {
        let f = fixture(true, Some(stored_definition(true)));
        f.algorithm.fail_on("select_index");
        let err = f
            .experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "select_index failed");
        assert!(f.store.upserted_user_variants().is_empty());
    }

    #[test]
    fn active_variant_follows_enabled_flag() {
        let f = fixture(false, None);
        assert!(f.experiment.active_variant().is_none());

        f.experiment.enable();
        assert_eq!(
            f.experiment.active_variant().map(|it| it.name().to_owned()),
            Some("control set".to_owned())
        );
    }

    #[tokio::test]
    async fn load_for_user_refreshes_then_resolves() {
        let f = fixture(false, Some(stored_definition(true)));
        f.algorithm.select(1);

        f.experiment.load_for_user(Some(&user())).await.unwrap();
        assert!(f.experiment.is_enabled());
        assert_eq!(f.experiment.variant_index(), 1);
        assert_eq!(f.store.upserted_user_variants().len(), 1);
    }

    #[tokio::test]
    async fn load_for_user_skips_resolution_when_stored_disabled() {
        let f = fixture(true, Some(stored_definition(false)));
        f.experiment.load_for_user(Some(&user())).await.unwrap();
        assert!(!f.experiment.is_enabled());
        assert_eq!(f.algorithm.total_calls(), 0);
    }

    #[tokio::test]
    async fn save_adopts_store_assigned_id() {
        let store = Arc::new(RecordingStore::new(None));
        let experiment = ExperimentConfig::new("fresh")
            .variants(variants())
            .enabled(true)
            .shared_store(store.clone())
            .to_experiment()
            .unwrap();

        experiment.save().await.unwrap();
        assert_eq!(experiment.id(), Some("exp-1".into()));
        assert!(store.definition().await.is_some());
    }

    #[tokio::test]
    async fn delete_clears_everything() {
        let f = fixture(true, Some(stored_definition(true)));
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();

        f.experiment.delete().await.unwrap();
        assert!(!f.experiment.is_enabled());
        assert_eq!(f.experiment.id(), None);
        assert!(f.store.definition().await.is_none());
        assert_eq!(f.store.calls("delete_user_variants"), 1);
        assert_eq!(f.algorithm.calls("delete"), 1);
    }

    #[tokio::test]
    async fn reset_user_forces_new_selection() {
        let f = fixture(true, Some(stored_definition(true)));
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();
        f.experiment.reset_user(&user()).await.unwrap();
        assert_eq!(f.store.calls("delete_user_variant"), 1);

        f.algorithm.select(0);
        f.experiment
            .resolve_variant_for_user(Some(&user()))
            .await
            .unwrap();
        assert_eq!(f.experiment.variant_index(), 0);
        assert_eq!(f.algorithm.calls("select_index"), 2);
    }
}
