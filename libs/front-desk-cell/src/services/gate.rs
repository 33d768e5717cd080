// Access gate: Locked/Unlocked, derived on every read from the ledger row and
// the override grant. The only stored trace is the check-in latch.
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use realtime_bus_cell::{ChangeKind, EntityKind, EventPublisher};

use crate::error::FrontDeskError;
use crate::models::{Actor, ActorRole, Appointment, OverrideGrant, VisitStatus};
use crate::services::collaborators::ClinicalRecords;
use crate::services::notifier::notify;
use crate::services::store::{mutate_ledger, LedgerCommit, LedgerSnapshot, LedgerStore, Plan};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Locked,
    Unlocked,
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessStatus::Locked => write!(f, "locked"),
            AccessStatus::Unlocked => write!(f, "unlocked"),
        }
    }
}

/// Why an unlocked appointment is unlocked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnlockBasis {
    Settled,
    Override,
    /// Unlocked earlier in this visit; stays open whatever the ledger does next.
    CheckedIn,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateDecision {
    pub status: AccessStatus,
    pub basis: Option<UnlockBasis>,
    pub balance_remaining: Decimal,
}

impl GateDecision {
    pub fn is_unlocked(&self) -> bool {
        self.status == AccessStatus::Unlocked
    }
}

pub fn evaluate(appointment: &Appointment, grant: Option<&OverrideGrant>) -> GateDecision {
    let balance_remaining = appointment.balance_remaining();

    let basis = if appointment.amount_paid >= appointment.amount_required {
        Some(UnlockBasis::Settled)
    } else if grant.is_some() {
        Some(UnlockBasis::Override)
    } else if appointment.checked_in_at.is_some() {
        Some(UnlockBasis::CheckedIn)
    } else {
        None
    };

    GateDecision {
        status: if basis.is_some() {
            AccessStatus::Unlocked
        } else {
            AccessStatus::Locked
        },
        basis,
        balance_remaining,
    }
}

pub fn evaluate_snapshot(snapshot: &LedgerSnapshot) -> GateDecision {
    evaluate(&snapshot.appointment, snapshot.override_grant.as_ref())
}

/// Records the Locked→Unlocked transition on the row: stamps `checked_in_at`
/// and moves a scheduled visit into the waiting room. Returns whether the
/// row changed.
pub fn latch(appointment: &mut Appointment, now: DateTime<Utc>) -> bool {
    if appointment.checked_in_at.is_some() {
        return false;
    }
    match appointment.status {
        VisitStatus::Scheduled => {
            appointment.status = VisitStatus::Waiting;
            appointment.checked_in_at = Some(now);
            true
        }
        VisitStatus::Waiting => {
            appointment.checked_in_at = Some(now);
            true
        }
        VisitStatus::Completed | VisitStatus::Cancelled | VisitStatus::NoShow => false,
    }
}

/// Clinician-facing reason for a locked file. Never includes amounts.
pub fn locked_reason(appointment: &Appointment) -> String {
    if appointment.prior_debt > appointment.amount_paid {
        "Outstanding balance from a previous visit must be settled at the front desk".to_string()
    } else {
        "Awaiting payment at the front desk".to_string()
    }
}

/// Clinicians only reach appointments in their own queue.
pub fn ensure_in_scope(appointment: &Appointment, actor: Actor) -> Result<(), FrontDeskError> {
    if actor.role == ActorRole::Clinician && appointment.clinician_id != actor.id {
        return Err(FrontDeskError::Forbidden(
            "Appointment belongs to another clinician's queue".to_string(),
        ));
    }
    Ok(())
}

/// Guards clinical record access behind the gate.
pub struct AccessGateService {
    store: Arc<dyn LedgerStore>,
    records: Arc<dyn ClinicalRecords>,
    publisher: Arc<dyn EventPublisher>,
}

impl AccessGateService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        records: Arc<dyn ClinicalRecords>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            records,
            publisher,
        }
    }

    pub async fn access_for(&self, appointment_id: Uuid) -> Result<GateDecision, FrontDeskError> {
        let snapshot = self.store.load(appointment_id).await?;
        Ok(evaluate_snapshot(&snapshot))
    }

    /// Opens the clinical record when the gate is open. The first successful
    /// open latches the visit, so later charges or refunds cannot close it.
    pub async fn open_patient_file(
        &self,
        appointment_id: Uuid,
        actor: Actor,
    ) -> Result<Value, FrontDeskError> {
        let ((decision, latched), committed) =
            mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
                ensure_in_scope(&snapshot.appointment, actor)?;

                let decision = evaluate_snapshot(snapshot);
                if !decision.is_unlocked() {
                    return Ok(Plan::Skip((decision, false)));
                }

                let mut appointment = snapshot.appointment.clone();
                if !latch(&mut appointment, Utc::now()) {
                    return Ok(Plan::Skip((decision, false)));
                }

                Ok(Plan::Write {
                    appointment,
                    commit: LedgerCommit::default(),
                    output: (decision, true),
                })
            })
            .await?;

        if !decision.is_unlocked() {
            warn!(
                appointment_id = %appointment_id,
                actor = %actor.id,
                "Patient file requested while locked"
            );
            return Err(FrontDeskError::AccessDenied {
                balance_remaining: decision.balance_remaining,
            });
        }

        if latched {
            info!(appointment_id = %appointment_id, "Access gate latched on first file open");
            notify(
                self.publisher.as_ref(),
                &committed.appointment,
                appointment_id,
                EntityKind::Appointment,
                ChangeKind::AccessGranted,
            )
            .await;
        }

        info!(
            appointment_id = %appointment_id,
            actor = %actor.id,
            basis = ?decision.basis,
            "Opening patient file"
        );
        self.records.open_patient_file(committed.appointment.patient_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(required: i64, paid: i64) -> Appointment {
        let mut apt = Appointment::new(Uuid::new_v4(), Uuid::new_v4(), Utc::now(), Decimal::ZERO);
        apt.amount_required = Decimal::from(required);
        apt.amount_paid = Decimal::from(paid);
        apt
    }

    fn grant(apt: &Appointment) -> OverrideGrant {
        OverrideGrant {
            appointment_id: apt.id,
            granted_by: Uuid::new_v4(),
            granted_at: Utc::now(),
            reason: "supervisor".to_string(),
        }
    }

    #[test]
    fn settled_ledger_unlocks() {
        let decision = evaluate(&appointment(500, 500), None);
        assert_eq!(decision.status, AccessStatus::Unlocked);
        assert_eq!(decision.basis, Some(UnlockBasis::Settled));
        assert_eq!(decision.balance_remaining, Decimal::ZERO);
    }

    #[test]
    fn partial_payment_locks_with_balance() {
        let decision = evaluate(&appointment(500, 300), None);
        assert_eq!(decision.status, AccessStatus::Locked);
        assert_eq!(decision.basis, None);
        assert_eq!(decision.balance_remaining, Decimal::from(200));
    }

    #[test]
    fn override_unlocks_despite_balance() {
        let apt = appointment(500, 300);
        let decision = evaluate(&apt, Some(&grant(&apt)));
        assert_eq!(decision.basis, Some(UnlockBasis::Override));
        assert_eq!(decision.balance_remaining, Decimal::from(200));
    }

    #[test]
    fn latched_visit_stays_unlocked_after_refund() {
        let mut apt = appointment(500, 500);
        assert!(latch(&mut apt, Utc::now()));
        assert_eq!(apt.status, VisitStatus::Waiting);

        apt.amount_paid = Decimal::from(100);
        let decision = evaluate(&apt, None);
        assert_eq!(decision.status, AccessStatus::Unlocked);
        assert_eq!(decision.basis, Some(UnlockBasis::CheckedIn));
        assert_eq!(decision.balance_remaining, Decimal::from(400));
    }

    #[test]
    fn latch_is_one_shot_and_skips_closed_visits() {
        let mut apt = appointment(0, 0);
        let first = Utc::now();
        assert!(latch(&mut apt, first));
        assert!(!latch(&mut apt, first + chrono::Duration::minutes(5)));
        assert_eq!(apt.checked_in_at, Some(first));

        let mut cancelled = appointment(0, 0);
        cancelled.status = VisitStatus::Cancelled;
        assert!(!latch(&mut cancelled, first));
        assert!(cancelled.checked_in_at.is_none());
    }

    #[test]
    fn locked_reason_never_mentions_amounts() {
        let mut apt = appointment(700, 0);
        apt.prior_debt = Decimal::from(200);
        let reason = locked_reason(&apt);
        assert!(reason.contains("previous visit"));
        assert!(!reason.chars().any(|c| c.is_ascii_digit()));
        assert_eq!(locked_reason(&appointment(500, 0)), "Awaiting payment at the front desk");
    }
}
