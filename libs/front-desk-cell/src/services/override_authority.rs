// =====================================================================================
// OVERRIDE AUTHORITY - SUPERVISOR BYPASS OF THE PAYMENT GATE
// =====================================================================================

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use realtime_bus_cell::{ChangeKind, EntityKind, EventPublisher};
use shared_config::AppConfig;

use crate::error::FrontDeskError;
use crate::models::{Actor, OverrideGrant, VisitStatus};
use crate::services::gate;
use crate::services::ledger::reconcile;
use crate::services::notifier::notify;
use crate::services::store::{mutate_ledger, LedgerCommit, LedgerStore, Plan};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "grant", rename_all = "snake_case")]
pub enum OverrideOutcome {
    Granted(OverrideGrant),
    /// A grant already existed; it is returned untouched.
    AlreadyGranted(OverrideGrant),
    /// The gate is already open, nothing to bypass.
    NotRequired,
}

impl OverrideOutcome {
    pub fn grant(&self) -> Option<&OverrideGrant> {
        match self {
            OverrideOutcome::Granted(grant) | OverrideOutcome::AlreadyGranted(grant) => Some(grant),
            OverrideOutcome::NotRequired => None,
        }
    }
}

#[derive(Debug, Clone)]
struct FailureWindow {
    attempts: u32,
    window_started: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

impl FailureWindow {
    fn started(now: DateTime<Utc>) -> Self {
        Self {
            attempts: 0,
            window_started: now,
            locked_until: None,
        }
    }

    /// A lapsed lockout, or an unlocked window older than `span`.
    fn is_spent(&self, now: DateTime<Utc>, span: Duration) -> bool {
        match self.locked_until {
            Some(until) => until <= now,
            None => now - self.window_started > span,
        }
    }
}

pub struct OverrideAuthority {
    store: Arc<dyn LedgerStore>,
    publisher: Arc<dyn EventPublisher>,
    credential_hash: String,
    max_failed_attempts: u32,
    lockout: Duration,
    /// Failed attempts per staff member. There is one override secret for the
    /// whole clinic, so switching appointments must not reset the count.
    failures: RwLock<HashMap<Uuid, FailureWindow>>,
}

impl OverrideAuthority {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn LedgerStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        if !config.is_override_configured() {
            warn!("Override credential not configured, every override will be refused");
        }

        Self {
            store,
            publisher,
            credential_hash: config.override_credential_hash.clone(),
            max_failed_attempts: config.override_max_failed_attempts.max(1),
            lockout: Duration::minutes(config.override_lockout_minutes.max(1)),
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Validates the supervisor credential and records a grant.
    ///
    /// The credential is checked before the appointment is even loaded, so a
    /// refusal says nothing about whether the visit would have needed one.
    #[instrument(skip(self, credential, reason), fields(actor = %actor.id))]
    pub async fn request_override(
        &self,
        appointment_id: Uuid,
        credential: &str,
        reason: &str,
        actor: Actor,
    ) -> Result<OverrideOutcome, FrontDeskError> {
        self.ensure_not_locked_out(actor, appointment_id).await?;

        if !self.verify_credential(credential) {
            self.record_failure(actor, appointment_id).await;
            return Err(FrontDeskError::AuthFailed);
        }
        self.failures.write().await.remove(&actor.id);

        let reason = if reason.trim().is_empty() {
            "Supervisor override at check-in".to_string()
        } else {
            reason.trim().to_string()
        };

        let (outcome, committed) = mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
            if let Some(existing) = &snapshot.override_grant {
                return Ok(Plan::Skip(OverrideOutcome::AlreadyGranted(existing.clone())));
            }

            let current = &snapshot.appointment;
            if matches!(current.status, VisitStatus::Cancelled | VisitStatus::NoShow) {
                return Err(FrontDeskError::InvalidTransition {
                    from: current.status.to_string(),
                    to: VisitStatus::Waiting.to_string(),
                });
            }
            if gate::evaluate_snapshot(snapshot).is_unlocked() {
                return Ok(Plan::Skip(OverrideOutcome::NotRequired));
            }

            let now = Utc::now();
            let grant = OverrideGrant {
                appointment_id,
                granted_by: actor.id,
                granted_at: now,
                reason: reason.clone(),
            };
            let commit = LedgerCommit {
                override_grant: Some(grant.clone()),
                ..LedgerCommit::default()
            };
            let appointment = reconcile(snapshot, current.clone(), &commit, now);

            Ok(Plan::Write {
                appointment,
                commit,
                output: OverrideOutcome::Granted(grant),
            })
        })
        .await?;

        if let OverrideOutcome::Granted(grant) = &outcome {
            info!(
                appointment_id = %appointment_id,
                granted_by = %grant.granted_by,
                balance_remaining = %committed.appointment.balance_remaining(),
                "Override granted"
            );
            notify(
                self.publisher.as_ref(),
                &committed.appointment,
                appointment_id,
                EntityKind::Appointment,
                ChangeKind::AccessGranted,
            )
            .await;
        }

        Ok(outcome)
    }

    /// Seconds until `actor_id` may attempt an override again, if locked out.
    pub async fn lockout_remaining(&self, actor_id: Uuid) -> Option<i64> {
        let failures = self.failures.read().await;
        let locked_until = failures.get(&actor_id)?.locked_until?;
        let remaining = (locked_until - Utc::now()).num_seconds();
        (remaining > 0).then_some(remaining)
    }

    async fn ensure_not_locked_out(
        &self,
        actor: Actor,
        appointment_id: Uuid,
    ) -> Result<(), FrontDeskError> {
        match self.lockout_remaining(actor.id).await {
            Some(retry_after_seconds) => {
                warn!(
                    appointment_id = %appointment_id,
                    actor = %actor.id,
                    "Override attempt during lockout"
                );
                Err(FrontDeskError::RateLimited { retry_after_seconds })
            }
            None => Ok(()),
        }
    }

    fn verify_credential(&self, credential: &str) -> bool {
        if self.credential_hash.is_empty() || credential.is_empty() {
            return false;
        }

        let parsed = match PasswordHash::new(&self.credential_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Override credential hash is malformed: {}", e);
                return false;
            }
        };

        Argon2::default()
            .verify_password(credential.as_bytes(), &parsed)
            .is_ok()
    }

    async fn record_failure(&self, actor: Actor, appointment_id: Uuid) {
        let now = Utc::now();
        let mut failures = self.failures.write().await;
        failures.retain(|_, window| !window.is_spent(now, self.lockout));

        let window = failures
            .entry(actor.id)
            .or_insert_with(|| FailureWindow::started(now));

        window.attempts += 1;
        warn!(
            appointment_id = %appointment_id,
            actor = %actor.id,
            attempts = window.attempts,
            "Override credential rejected"
        );

        if window.attempts >= self.max_failed_attempts {
            window.locked_until = Some(now + self.lockout);
            warn!(
                actor = %actor.id,
                minutes = self.lockout.num_minutes(),
                "Override locked out after repeated failures"
            );
        }
    }
}
