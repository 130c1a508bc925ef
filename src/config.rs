use std::sync::Arc;

use crate::{
    assignment_logger::NoopAssignmentLogger, error::ValidationError, AssignmentLogger,
    Experiment, ExperimentId, ExperimentStore, FixedAlgorithm, NoopStore, Result,
    SelectionAlgorithm, Variant,
};

/// Configuration for [`Experiment`].
///
/// Without further configuration an experiment is disabled, is not backed by any store
/// ([`NoopStore`]) and assigns everybody the control variant ([`FixedAlgorithm::control`]).
///
/// # Examples
/// ```
/// # use prosper::{ExperimentConfig, InMemoryStore, Symbol, Variant};
/// let color = Symbol::new("button_color");
/// let experiment = ExperimentConfig::new("checkout-button")
///     .variant(Variant::new("control").with_pick(&color, "blue"))
///     .variant(Variant::new("green").with_pick(&color, "green"))
///     .store(InMemoryStore::new())
///     .enabled(true)
///     .to_experiment()
///     .unwrap();
/// assert_eq!(experiment.variants().len(), 2);
/// ```
pub struct ExperimentConfig {
    pub(crate) name: String,
    pub(crate) id: Option<ExperimentId>,
    pub(crate) variants: Vec<Variant>,
    pub(crate) is_enabled: bool,
    pub(crate) variant_index: usize,
    pub(crate) store: Arc<dyn ExperimentStore>,
    pub(crate) algorithm: Arc<dyn SelectionAlgorithm>,
    pub(crate) assignment_logger: Box<dyn AssignmentLogger + Send + Sync>,
}

impl ExperimentConfig {
    /// Create a default configuration for an experiment called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        ExperimentConfig {
            name: name.into(),
            id: None,
            variants: Vec::new(),
            is_enabled: false,
            variant_index: 0,
            store: Arc::new(NoopStore),
            algorithm: Arc::new(FixedAlgorithm::control()),
            assignment_logger: Box::new(NoopAssignmentLogger),
        }
    }

    /// Append a variant. The first variant is the control.
    pub fn variant(mut self, variant: Variant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Append several variants.
    pub fn variants(mut self, variants: impl IntoIterator<Item = Variant>) -> Self {
        self.variants.extend(variants);
        self
    }

    /// Id of the stored definition, if the experiment is already known to the store.
    pub fn id(mut self, id: impl Into<ExperimentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn enabled(mut self, is_enabled: bool) -> Self {
        self.is_enabled = is_enabled;
        self
    }

    /// Initially selected variant. Defaults to `0`.
    pub fn variant_index(mut self, variant_index: usize) -> Self {
        self.variant_index = variant_index;
        self
    }

    /// Set the persistence store for definitions and user assignments.
    pub fn store(self, store: impl ExperimentStore + 'static) -> Self {
        self.shared_store(Arc::new(store))
    }

    /// Like [`ExperimentConfig::store`], for a store that is shared with other code.
    pub fn shared_store(mut self, store: Arc<dyn ExperimentStore>) -> Self {
        self.store = store;
        self
    }

    /// Set the selection algorithm that assigns variants to new users.
    pub fn algorithm(self, algorithm: impl SelectionAlgorithm + 'static) -> Self {
        self.shared_algorithm(Arc::new(algorithm))
    }

    /// Like [`ExperimentConfig::algorithm`], for an algorithm that is shared with other code.
    pub fn shared_algorithm(mut self, algorithm: Arc<dyn SelectionAlgorithm>) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set assignment logger to pass new assignments to your data warehouse.
    pub fn assignment_logger(
        mut self,
        assignment_logger: impl AssignmentLogger + Send + Sync + 'static,
    ) -> Self {
        self.assignment_logger = Box::new(assignment_logger);
        self
    }

    /// Create a new [`Experiment`] using this configuration.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::NoVariants`] if no variant was configured.
    /// - [`ValidationError::VariantIndexOutOfRange`] if the initial variant index does not point
    ///   into the variants.
    pub fn to_experiment(self) -> Result<Experiment> {
        if self.variants.is_empty() {
            return Err(ValidationError::NoVariants {
                experiment: self.name,
            }
            .into());
        }
        if self.variant_index >= self.variants.len() {
            return Err(ValidationError::VariantIndexOutOfRange {
                experiment: self.name,
                index: self.variant_index,
                len: self.variants.len(),
            }
            .into());
        }
        Ok(Experiment::new(self))
    }
}
