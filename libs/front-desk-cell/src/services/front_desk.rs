// =====================================================================================
// FRONT DESK SERVICE - CHECK-IN, VISIT LIFECYCLE AND DAILY QUEUE
// =====================================================================================

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use realtime_bus_cell::{ChangeKind, EntityKind, EventPublisher};
use shared_config::AppConfig;

use crate::error::FrontDeskError;
use crate::models::{
    Actor, ActorRole, Appointment, BookAppointmentRequest, CheckInOutcome, VisitStatus,
};
use crate::services::collaborators::{ClinicalRecords, PatientAccounts, ServiceCatalog};
use crate::services::gate::{self, AccessGateService, GateDecision};
use crate::services::ledger::LedgerAccumulator;
use crate::services::lifecycle::VisitLifecycle;
use crate::services::notifier::notify;
use crate::services::override_authority::{OverrideAuthority, OverrideOutcome};
use crate::services::projector::{project, QueueRole, QueueView};
use crate::services::service_requests::ServiceRequestChannel;
use crate::services::store::{mutate_ledger, LedgerCommit, LedgerStore, Plan};

const CHECK_IN_OVERRIDE_REASON: &str = "Supervisor override at check-in";

/// Collaborators the front desk is wired against.
#[derive(Clone)]
pub struct FrontDeskDeps {
    pub store: Arc<dyn LedgerStore>,
    pub catalog: Arc<dyn ServiceCatalog>,
    pub accounts: Arc<dyn PatientAccounts>,
    pub records: Arc<dyn ClinicalRecords>,
    pub publisher: Arc<dyn EventPublisher>,
}

pub struct FrontDeskService {
    store: Arc<dyn LedgerStore>,
    accounts: Arc<dyn PatientAccounts>,
    publisher: Arc<dyn EventPublisher>,
    gate: AccessGateService,
    ledger: LedgerAccumulator,
    overrides: OverrideAuthority,
    requests: ServiceRequestChannel,
}

impl FrontDeskService {
    pub fn new(config: &AppConfig, deps: FrontDeskDeps) -> Self {
        Self {
            gate: AccessGateService::new(
                Arc::clone(&deps.store),
                deps.records,
                Arc::clone(&deps.publisher),
            ),
            ledger: LedgerAccumulator::new(
                Arc::clone(&deps.store),
                Arc::clone(&deps.catalog),
                Arc::clone(&deps.publisher),
            ),
            overrides: OverrideAuthority::new(
                config,
                Arc::clone(&deps.store),
                Arc::clone(&deps.publisher),
            ),
            requests: ServiceRequestChannel::new(
                Arc::clone(&deps.store),
                deps.catalog,
                Arc::clone(&deps.publisher),
            ),
            store: deps.store,
            accounts: deps.accounts,
            publisher: deps.publisher,
        }
    }

    pub fn ledger(&self) -> &LedgerAccumulator {
        &self.ledger
    }

    pub fn overrides(&self) -> &OverrideAuthority {
        &self.overrides
    }

    pub fn requests(&self) -> &ServiceRequestChannel {
        &self.requests
    }

    #[instrument(skip(self, request), fields(actor = %actor.id))]
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        actor: Actor,
    ) -> Result<Appointment, FrontDeskError> {
        if request.scheduled_at < Utc::now() - Duration::days(1) {
            return Err(FrontDeskError::Validation(
                "Cannot book an appointment in the past".to_string(),
            ));
        }

        let prior_debt = self.accounts.get_patient_prior_debt(request.patient_id).await?;
        let appointment = Appointment::new(
            request.patient_id,
            request.clinician_id,
            request.scheduled_at,
            prior_debt,
        );
        self.store.insert_appointment(appointment.clone()).await?;

        info!(
            appointment_id = %appointment.id,
            patient_id = %appointment.patient_id,
            prior_debt = %prior_debt,
            "Appointment booked"
        );

        notify(
            self.publisher.as_ref(),
            &appointment,
            appointment.id,
            EntityKind::Appointment,
            ChangeKind::Created,
        )
        .await;

        Ok(appointment)
    }

    /// Admits the patient when the gate is open. With a credential, a locked
    /// gate is escalated to the override authority; without one the refusal
    /// carries the balance still owed.
    #[instrument(skip(self, override_credential), fields(actor = %actor.id))]
    pub async fn check_in(
        &self,
        appointment_id: Uuid,
        override_credential: Option<String>,
        actor: Actor,
    ) -> Result<CheckInOutcome, FrontDeskError> {
        let outcome = self.admit(appointment_id).await?;
        if outcome.granted {
            return Ok(outcome);
        }

        let Some(credential) = override_credential.filter(|c| !c.is_empty()) else {
            info!(
                appointment_id = %appointment_id,
                balance_remaining = ?outcome.balance_remaining,
                "Check-in refused, balance outstanding"
            );
            return Ok(outcome);
        };

        match self
            .overrides
            .request_override(appointment_id, &credential, CHECK_IN_OVERRIDE_REASON, actor)
            .await?
        {
            OverrideOutcome::Granted(grant) | OverrideOutcome::AlreadyGranted(grant) => {
                Ok(CheckInOutcome {
                    granted: true,
                    balance_remaining: None,
                    override_grant: Some(grant),
                })
            }
            // Settled between the first look and the override.
            OverrideOutcome::NotRequired => self.admit(appointment_id).await,
        }
    }

    async fn admit(&self, appointment_id: Uuid) -> Result<CheckInOutcome, FrontDeskError> {
        let ((outcome, latched), committed) =
            mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
                let current = &snapshot.appointment;
                if matches!(current.status, VisitStatus::Cancelled | VisitStatus::NoShow) {
                    return Err(FrontDeskError::InvalidTransition {
                        from: current.status.to_string(),
                        to: VisitStatus::Waiting.to_string(),
                    });
                }

                let decision = gate::evaluate_snapshot(snapshot);
                if !decision.is_unlocked() {
                    return Ok(Plan::Skip((
                        CheckInOutcome {
                            granted: false,
                            balance_remaining: Some(decision.balance_remaining),
                            override_grant: None,
                        },
                        false,
                    )));
                }

                let outcome = CheckInOutcome {
                    granted: true,
                    balance_remaining: None,
                    override_grant: snapshot.override_grant.clone(),
                };
                let mut appointment = current.clone();
                if !gate::latch(&mut appointment, Utc::now()) {
                    return Ok(Plan::Skip((outcome, false)));
                }

                Ok(Plan::Write {
                    appointment,
                    commit: LedgerCommit::default(),
                    output: (outcome, true),
                })
            })
            .await?;

        if latched {
            info!(appointment_id = %appointment_id, "Patient checked in");
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

    /// Moves the visit along its lifecycle. Entering the waiting room goes
    /// through the payment gate like any other check-in.
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn update_visit_status(
        &self,
        appointment_id: Uuid,
        status: VisitStatus,
        actor: Actor,
    ) -> Result<Appointment, FrontDeskError> {
        if status == VisitStatus::Waiting {
            if actor.role != ActorRole::Cashier {
                return Err(FrontDeskError::Forbidden(
                    "Only front desk staff can check a patient in".to_string(),
                ));
            }
            let current = self.store.load(appointment_id).await?.appointment;
            VisitLifecycle::validate_transition(current.status, status)?;

            let outcome = self.check_in(appointment_id, None, actor).await?;
            if !outcome.granted {
                return Err(FrontDeskError::AccessDenied {
                    balance_remaining: outcome.balance_remaining.unwrap_or_default(),
                });
            }
            return Ok(self.store.load(appointment_id).await?.appointment);
        }

        let (appointment, _) = mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
            let mut appointment = snapshot.appointment.clone();
            gate::ensure_in_scope(&appointment, actor)?;
            if appointment.archived {
                return Err(FrontDeskError::LedgerClosed(appointment_id));
            }
            VisitLifecycle::validate_transition(appointment.status, status)?;
            appointment.status = status;

            Ok(Plan::Write {
                appointment: appointment.clone(),
                commit: LedgerCommit::default(),
                output: appointment,
            })
        })
        .await?;

        info!(
            appointment_id = %appointment_id,
            status = %status,
            "Visit status updated"
        );

        notify(
            self.publisher.as_ref(),
            &appointment,
            appointment_id,
            EntityKind::Appointment,
            ChangeKind::Updated,
        )
        .await;

        Ok(appointment)
    }

    /// Archives every appointment of `date`. Returns how many were archived
    /// by this call.
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn close_day(&self, date: NaiveDate, actor: Actor) -> Result<usize, FrontDeskError> {
        let day = self.store.list_for_day(date).await?;
        let mut archived = 0;

        for ledger in day.iter().filter(|ledger| !ledger.appointment.archived) {
            let appointment_id = ledger.appointment.id;
            let (changed, committed) =
                mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
                    if snapshot.appointment.archived {
                        return Ok(Plan::Skip(false));
                    }
                    let mut appointment = snapshot.appointment.clone();
                    appointment.archived = true;
                    Ok(Plan::Write {
                        appointment,
                        commit: LedgerCommit::default(),
                        output: true,
                    })
                })
                .await?;

            if changed {
                archived += 1;
                if committed.appointment.balance_remaining() > rust_decimal::Decimal::ZERO {
                    warn!(
                        appointment_id = %appointment_id,
                        balance_remaining = %committed.appointment.balance_remaining(),
                        "Archived with balance outstanding"
                    );
                }
                notify(
                    self.publisher.as_ref(),
                    &committed.appointment,
                    appointment_id,
                    EntityKind::Appointment,
                    ChangeKind::Archived,
                )
                .await;
            }
        }

        info!(date = %date, archived, "Day closed");
        Ok(archived)
    }

    pub async fn queue(&self, date: NaiveDate, role: QueueRole) -> Result<QueueView, FrontDeskError> {
        let ledgers = self.store.list_for_day(date).await?;
        Ok(project(date, &ledgers, role))
    }

    pub async fn access(&self, appointment_id: Uuid) -> Result<GateDecision, FrontDeskError> {
        self.gate.access_for(appointment_id).await
    }

    pub async fn open_patient_file(
        &self,
        appointment_id: Uuid,
        actor: Actor,
    ) -> Result<Value, FrontDeskError> {
        self.gate.open_patient_file(appointment_id, actor).await
    }

    pub async fn appointment(&self, appointment_id: Uuid) -> Result<Appointment, FrontDeskError> {
        Ok(self.store.load(appointment_id).await?.appointment)
    }
}
