use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{ExperimentId, UserId};

/// Emitted whenever a user receives a new (persisted) variant assignment.
///
/// Cached and previously persisted assignments do not produce events, so each user is reported
/// once per experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    /// Name of the experiment.
    pub experiment: String,
    pub experiment_id: ExperimentId,
    /// Name of the assigned variant.
    pub variant: String,
    pub variant_index: usize,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// A trait for forwarding assignment events to your analytics storage.
///
/// # Notes
///
/// This method is called before the assignment is returned to the caller, so it should not
/// block. It should not panic either; handle failures inside the implementation.
///
/// Closures taking an [`AssignmentEvent`] implement this trait:
///
/// ```
/// # use prosper::{ExperimentConfig, Variant};
/// let config = ExperimentConfig::new("banner")
///     .variant(Variant::new("control"))
///     .assignment_logger(|event| println!("{:?}", event));
/// ```
pub trait AssignmentLogger {
    /// Log one assignment event.
    fn log_assignment(&self, event: AssignmentEvent);
}

pub(crate) struct NoopAssignmentLogger;
impl AssignmentLogger for NoopAssignmentLogger {
    fn log_assignment(&self, _event: AssignmentEvent) {}
}

impl<T: Fn(AssignmentEvent)> AssignmentLogger for T {
    fn log_assignment(&self, event: AssignmentEvent) {
        self(event);
    }
}
