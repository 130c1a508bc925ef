use crate::{ExperimentId, Variant};

/// Canonical experiment definition as kept by an [`ExperimentStore`](crate::ExperimentStore).
///
/// A loaded [`Experiment`](crate::Experiment) is a local projection of its definition: refreshing
/// replaces the experiment's id, enabled flag and variants with the ones stored here.
#[derive(Debug, Clone)]
pub struct ExperimentDefinition {
    /// Store-assigned id. `None` for a definition that was never persisted.
    pub id: Option<ExperimentId>,
    pub name: String,
    pub variants: Vec<Variant>,
    pub is_enabled: bool,
    pub variant_index: usize,
}

impl ExperimentDefinition {
    /// Names of the variants, in order.
    pub fn variant_names(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(Variant::name)
    }
}
