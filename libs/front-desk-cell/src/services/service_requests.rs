// Clinician to cashier requests for extra billable services during a visit.
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use realtime_bus_cell::{ChangeKind, EntityKind, EventPublisher};

use crate::error::FrontDeskError;
use crate::models::{
    Actor, ChargeSource, LineItem, ServiceInfo, ServiceRequest, ServiceRequestStatus, VisitStatus,
};
use crate::services::collaborators::ServiceCatalog;
use crate::services::ledger::{line_item, reconcile};
use crate::services::notifier::notify;
use crate::services::store::{mutate_ledger, LedgerCommit, LedgerStore, Plan};

const MAX_NOTES_LENGTH: usize = 2000;

pub struct ServiceRequestChannel {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<dyn ServiceCatalog>,
    publisher: Arc<dyn EventPublisher>,
}

impl ServiceRequestChannel {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalog: Arc<dyn ServiceCatalog>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            catalog,
            publisher,
        }
    }

    #[instrument(skip(self, notes), fields(actor = %actor.id))]
    pub async fn request_service(
        &self,
        appointment_id: Uuid,
        service_id: Uuid,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<ServiceRequest, FrontDeskError> {
        let notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LENGTH) {
            return Err(FrontDeskError::Validation(format!(
                "Notes cannot exceed {} characters",
                MAX_NOTES_LENGTH
            )));
        }

        let service = self.catalog.get_service(service_id).await?;

        let (request, committed) = mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
            let current = &snapshot.appointment;
            if current.archived
                || matches!(
                    current.status,
                    VisitStatus::Completed | VisitStatus::Cancelled | VisitStatus::NoShow
                )
            {
                return Err(FrontDeskError::LedgerClosed(appointment_id));
            }

            let request = new_request(current.id, current.patient_id, &service, notes.clone(), actor);
            let commit = LedgerCommit {
                service_request: Some(request.clone()),
                ..LedgerCommit::default()
            };

            Ok(Plan::Write {
                appointment: current.clone(),
                commit,
                output: request,
            })
        })
        .await?;

        info!(
            appointment_id = %appointment_id,
            request_id = %request.id,
            service = %request.service_name,
            "Service requested"
        );

        notify(
            self.publisher.as_ref(),
            &committed.appointment,
            request.id,
            EntityKind::ServiceRequest,
            ChangeKind::ServiceRequested,
        )
        .await;

        Ok(request)
    }

    /// Bills the request and marks it fulfilled in one ledger commit.
    ///
    /// Racing fulfilments are serialized by the row version; the loser
    /// re-plans against the committed state and gets `AlreadyFulfilled`.
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn fulfill_request(
        &self,
        request_id: Uuid,
        actor: Actor,
    ) -> Result<(ServiceRequest, LineItem), FrontDeskError> {
        let appointment_id = self.store.appointment_for_request(request_id).await?;

        let ((request, item), committed) =
            mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
                let pending = snapshot
                    .service_request(request_id)
                    .ok_or_else(|| FrontDeskError::not_found("Service request", request_id))?;

                match pending.status {
                    ServiceRequestStatus::Fulfilled => {
                        return Err(FrontDeskError::AlreadyFulfilled(request_id))
                    }
                    ServiceRequestStatus::Rejected => {
                        return Err(FrontDeskError::InvalidTransition {
                            from: pending.status.to_string(),
                            to: ServiceRequestStatus::Fulfilled.to_string(),
                        })
                    }
                    ServiceRequestStatus::Requested => {}
                }
                if snapshot.appointment.ledger_closed() {
                    return Err(FrontDeskError::LedgerClosed(appointment_id));
                }

                let now = Utc::now();
                let service = ServiceInfo {
                    id: pending.service_id,
                    name: pending.service_name.clone(),
                    price: pending.price,
                    category: String::new(),
                };
                let item = line_item(
                    appointment_id,
                    &service,
                    1,
                    pending.price,
                    ChargeSource::ServiceRequest(request_id),
                    actor,
                    now,
                );

                let mut fulfilled = pending.clone();
                fulfilled.status = ServiceRequestStatus::Fulfilled;
                fulfilled.resolved_at = Some(now);
                fulfilled.resolved_by = Some(actor.id);
                fulfilled.line_item_id = Some(item.id);

                let commit = LedgerCommit {
                    line_items: vec![item.clone()],
                    service_request: Some(fulfilled.clone()),
                    ..LedgerCommit::default()
                };
                let appointment = reconcile(snapshot, snapshot.appointment.clone(), &commit, now);

                Ok(Plan::Write {
                    appointment,
                    commit,
                    output: (fulfilled, item),
                })
            })
            .await?;

        info!(
            appointment_id = %appointment_id,
            request_id = %request_id,
            line_item_id = %item.id,
            amount_required = %committed.appointment.amount_required,
            "Service request fulfilled"
        );

        notify(
            self.publisher.as_ref(),
            &committed.appointment,
            request_id,
            EntityKind::ServiceRequest,
            ChangeKind::ServiceFulfilled,
        )
        .await;
        notify(
            self.publisher.as_ref(),
            &committed.appointment,
            appointment_id,
            EntityKind::Appointment,
            ChangeKind::LedgerChanged,
        )
        .await;

        Ok((request, item))
    }

    #[instrument(skip(self, reason), fields(actor = %actor.id))]
    pub async fn reject_request(
        &self,
        request_id: Uuid,
        reason: String,
        actor: Actor,
    ) -> Result<ServiceRequest, FrontDeskError> {
        if reason.trim().is_empty() {
            return Err(FrontDeskError::Validation(
                "Rejection reason is required".to_string(),
            ));
        }

        let appointment_id = self.store.appointment_for_request(request_id).await?;

        let (request, committed) = mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
            let pending = snapshot
                .service_request(request_id)
                .ok_or_else(|| FrontDeskError::not_found("Service request", request_id))?;

            match pending.status {
                ServiceRequestStatus::Requested => {}
                ServiceRequestStatus::Fulfilled => {
                    return Err(FrontDeskError::AlreadyFulfilled(request_id))
                }
                ServiceRequestStatus::Rejected => {
                    return Err(FrontDeskError::InvalidTransition {
                        from: pending.status.to_string(),
                        to: ServiceRequestStatus::Rejected.to_string(),
                    })
                }
            }

            let mut rejected = pending.clone();
            rejected.status = ServiceRequestStatus::Rejected;
            rejected.resolved_at = Some(Utc::now());
            rejected.resolved_by = Some(actor.id);
            rejected.rejection_reason = Some(reason.trim().to_string());

            Ok(Plan::Write {
                appointment: snapshot.appointment.clone(),
                commit: LedgerCommit {
                    service_request: Some(rejected.clone()),
                    ..LedgerCommit::default()
                },
                output: rejected,
            })
        })
        .await?;

        warn!(
            appointment_id = %appointment_id,
            request_id = %request_id,
            "Service request rejected"
        );

        notify(
            self.publisher.as_ref(),
            &committed.appointment,
            request_id,
            EntityKind::ServiceRequest,
            ChangeKind::ServiceRejected,
        )
        .await;

        Ok(request)
    }
}

fn new_request(
    appointment_id: Uuid,
    patient_id: Uuid,
    service: &ServiceInfo,
    notes: Option<String>,
    actor: Actor,
) -> ServiceRequest {
    ServiceRequest {
        id: Uuid::new_v4(),
        appointment_id,
        patient_id,
        service_id: service.id,
        service_name: service.name.clone(),
        price: service.price,
        notes,
        requested_by: actor.id,
        status: ServiceRequestStatus::Requested,
        requested_at: Utc::now(),
        resolved_at: None,
        resolved_by: None,
        line_item_id: None,
        rejection_reason: None,
    }
}
