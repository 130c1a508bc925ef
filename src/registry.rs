use std::{any::Any, collections::HashSet, sync::Arc};

use crate::{
    error::ValidationError, pick::downcast, Experiment, PickValue, Result, Symbol, UserId,
};

/// Experiments registered for one logical operation, looked up by the pick symbols they declare.
///
/// Each symbol is owned by exactly one experiment, and every variant of an experiment declares the
/// same symbols. Both are checked by [`Registry::add`]. Lookups read the experiments' current
/// variants, so a refresh that changes an experiment's symbols is reflected immediately.
///
/// A registry is built once and then only read. Experiment state (enabled flag, selected variant)
/// lives inside the experiments, so [`Registry::refresh_all`] works through a shared reference.
///
/// # Examples
/// ```
/// # use prosper::{ExperimentConfig, Registry, Symbol, Variant};
/// let headline = Symbol::new("headline");
/// let registry = Registry::new()
///     .with_experiment(
///         ExperimentConfig::new("homepage")
///             .variant(Variant::new("control").with_pick(&headline, "Welcome"))
///             .variant(Variant::new("bold").with_pick(&headline, "WELCOME!"))
///             .to_experiment()?,
///     )?;
/// assert!(registry.has(&headline));
/// assert_eq!(*registry.pick::<String>(&headline)?, "Welcome");
/// # Ok::<(), prosper::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct Registry {
    experiments: Vec<Experiment>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Validate `experiment` against the registered ones and append it.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::DuplicateExperiment`] if an experiment with the same name is
    ///   registered.
    /// - [`ValidationError::InconsistentPicks`] if a variant declares other symbols than the
    ///   first variant.
    /// - [`ValidationError::SymbolClaimed`] if a symbol is already owned by another experiment.
    ///
    /// The registry is unchanged on error.
    pub fn add(&mut self, experiment: Experiment) -> Result<&mut Registry> {
        if self.experiment_exists(experiment.name()) {
            return Err(ValidationError::DuplicateExperiment {
                name: experiment.name().to_owned(),
            }
            .into());
        }

        let variants = experiment.variants();
        if let Some((reference, rest)) = variants.split_first() {
            let reference_symbols = reference.symbols();
            if let Some(offending) = rest
                .iter()
                .find(|variant| variant.symbols() != reference_symbols)
            {
                return Err(ValidationError::InconsistentPicks {
                    experiment: experiment.name().to_owned(),
                    variant: offending.name().to_owned(),
                    reference: reference.name().to_owned(),
                }
                .into());
            }
        }

        let symbols = experiment.pick_symbols();
        for symbol in &symbols {
            if let Some(owner) = self.owner(symbol) {
                return Err(ValidationError::SymbolClaimed {
                    symbol: symbol.clone(),
                    owner: owner.name().to_owned(),
                }
                .into());
            }
        }

        log::debug!(target: "prosper",
                    experiment = experiment.name(),
                    picks = symbols.len();
                    "registered experiment");

        self.experiments.push(experiment);
        Ok(self)
    }

    /// Builder form of [`Registry::add`].
    pub fn with_experiment(mut self, experiment: Experiment) -> Result<Registry> {
        self.add(experiment)?;
        Ok(self)
    }

    /// Returns `true` if some registered experiment currently declares `symbol`.
    pub fn has(&self, symbol: &Symbol) -> bool {
        self.owner(symbol).is_some()
    }

    /// Value of `symbol` in the active variant of the experiment that declares it.
    ///
    /// Disabled experiments serve their control variant.
    ///
    /// # Errors
    ///
    /// [`ValidationError::PickNotFound`] if no registered experiment declares `symbol`.
    pub fn resolve(&self, symbol: &Symbol) -> Result<PickValue> {
        let value = self
            .owner(symbol)
            .and_then(|experiment| experiment.pick(symbol));

        match value {
            Some(value) => {
                log::trace!(target: "prosper", symbol; "resolved pick");
                Ok(value)
            }
            None => Err(ValidationError::PickNotFound {
                symbol: symbol.clone(),
            }
            .into()),
        }
    }

    /// Typed [`Registry::resolve`].
    ///
    /// # Errors
    ///
    /// In addition to the errors of [`Registry::resolve`], [`Error::TypeMismatch`] if the value
    /// is not a `T`.
    ///
    /// [`Error::TypeMismatch`]: crate::Error::TypeMismatch
    pub fn pick<T: Any + Send + Sync>(&self, symbol: &Symbol) -> Result<Arc<T>> {
        downcast(symbol, self.resolve(symbol)?)
    }

    /// [Load](Experiment::load_for_user) every experiment for `user_id`, in registration order.
    ///
    /// Stops at the first failure and returns it. Experiments before the failing one keep their
    /// refreshed state; the remaining ones are not touched.
    pub async fn refresh_all(&self, user_id: Option<&UserId>) -> Result<()> {
        for experiment in &self.experiments {
            if let Err(err) = experiment.load_for_user(user_id).await {
                log::warn!(target: "prosper",
                           experiment = experiment.name(),
                           user_id;
                           "failed to refresh experiment: {err}");
                return Err(err);
            }
        }
        Ok(())
    }

    /// [Report](Experiment::report_outcome) `score` for `user_id` to every experiment.
    ///
    /// Stops at the first failure, like [`Registry::refresh_all`].
    pub async fn report_outcome_all(&self, user_id: &UserId, score: f64) -> Result<()> {
        for experiment in &self.experiments {
            if let Err(err) = experiment.report_outcome(user_id, score).await {
                log::warn!(target: "prosper",
                           experiment = experiment.name(),
                           user_id;
                           "failed to report outcome: {err}");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Find a registered experiment by name.
    pub fn get_experiment(&self, name: &str) -> Result<&Experiment> {
        self.experiments
            .iter()
            .find(|experiment| experiment.name() == name)
            .ok_or_else(|| {
                ValidationError::ExperimentNotFound {
                    name: name.to_owned(),
                }
                .into()
            })
    }

    pub fn experiment_exists(&self, name: &str) -> bool {
        self.experiments
            .iter()
            .any(|experiment| experiment.name() == name)
    }

    /// Check that `experiment` is registered and has a variant called `variant`.
    pub fn check_experiment_has_variant(&self, experiment: &str, variant: &str) -> Result<()> {
        let found = self.get_experiment(experiment)?;
        if found.variants().iter().any(|it| it.name() == variant) {
            Ok(())
        } else {
            Err(ValidationError::VariantNotFound {
                experiment: experiment.to_owned(),
                variant: variant.to_owned(),
            }
            .into())
        }
    }

    /// Registered experiments, in registration order.
    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    /// Symbols currently declared by the registered experiments.
    pub fn claimed_symbols(&self) -> HashSet<Symbol> {
        self.experiments
            .iter()
            .flat_map(|experiment| experiment.pick_symbols())
            .collect()
    }

    /// First registered experiment that declares `symbol`. Refreshed definitions are not
    /// validated, so registration order breaks ties.
    fn owner(&self, symbol: &Symbol) -> Option<&Experiment> {
        self.experiments
            .iter()
            .find(|experiment| experiment.has_pick(symbol))
    }
}
