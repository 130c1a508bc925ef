use serde::{Deserialize, Serialize};

use crate::{ExperimentId, UserId, UserVariantId};

/// A persisted assignment: which variant index `user_id` holds in `experiment_id`.
///
/// Records are replaced wholesale when a user is re-assigned; use [`UserVariant::with_index`] to
/// derive the replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserVariant {
    /// Store-assigned id. `None` until the record has been persisted.
    pub id: Option<UserVariantId>,
    pub experiment_id: ExperimentId,
    pub user_id: UserId,
    /// Index into the experiment's variant list.
    pub index: usize,
}

impl UserVariant {
    /// Create a record that has not been persisted yet.
    pub fn new(experiment_id: ExperimentId, user_id: UserId, index: usize) -> UserVariant {
        UserVariant {
            id: None,
            experiment_id,
            user_id,
            index,
        }
    }

    /// Replacement record assigning a different index to the same user.
    pub fn with_index(&self, index: usize) -> UserVariant {
        UserVariant {
            index,
            ..self.clone()
        }
    }
}
