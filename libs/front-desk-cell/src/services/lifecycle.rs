// libs/front-desk-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::error::FrontDeskError;
use crate::models::VisitStatus;

pub struct VisitLifecycle;

impl VisitLifecycle {
    /// Validate that a status transition is allowed
    pub fn validate_transition(
        current_status: VisitStatus,
        new_status: VisitStatus,
    ) -> Result<(), FrontDeskError> {
        debug!("Validating visit transition from {} to {}", current_status, new_status);

        if !Self::valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid visit transition attempted: {} -> {}", current_status, new_status);
            return Err(FrontDeskError::InvalidTransition {
                from: current_status.to_string(),
                to: new_status.to_string(),
            });
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn valid_transitions(current_status: VisitStatus) -> &'static [VisitStatus] {
        match current_status {
            VisitStatus::Scheduled => &[
                VisitStatus::Waiting,
                VisitStatus::Cancelled,
                VisitStatus::NoShow,
            ],
            VisitStatus::Waiting => &[VisitStatus::Completed, VisitStatus::Cancelled],
            // Terminal states - no transitions allowed
            VisitStatus::Completed | VisitStatus::Cancelled | VisitStatus::NoShow => &[],
        }
    }

    pub fn is_terminal(status: VisitStatus) -> bool {
        Self::valid_transitions(status).is_empty()
    }
}
