// Ledger accumulator: charges, payments and refunds for one appointment.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use realtime_bus_cell::{ChangeKind, EntityKind, EventPublisher};

use crate::error::FrontDeskError;
use crate::models::{
    Actor, AnomalyKind, Appointment, ChargeSource, Invoice, InvoiceKind, LedgerAnomaly, LineItem,
    PaymentMethod, PaymentReceipt, PaymentStatus, ServiceInfo,
};
use crate::services::collaborators::ServiceCatalog;
use crate::services::gate;
use crate::services::notifier::notify;
use crate::services::store::{mutate_ledger, LedgerCommit, LedgerSnapshot, LedgerStore, Plan};

pub const MAX_CHARGE_QUANTITY: u32 = 100;

pub fn payment_status(required: Decimal, paid: Decimal, has_refunds: bool) -> PaymentStatus {
    if paid <= Decimal::ZERO {
        if has_refunds {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::Pending
        }
    } else if paid < required {
        PaymentStatus::PartiallyPaid
    } else {
        PaymentStatus::Paid
    }
}

/// Applies `commit` on top of `before` to produce the reconciled row:
/// recomputed totals, payment status and, if the gate is open afterwards,
/// the check-in latch.
pub fn reconcile(
    before: &LedgerSnapshot,
    mut appointment: Appointment,
    commit: &LedgerCommit,
    now: DateTime<Utc>,
) -> Appointment {
    let charges: Decimal = before
        .line_items
        .iter()
        .chain(commit.line_items.iter())
        .map(|item| item.total)
        .sum();
    let paid: Decimal = before
        .invoices
        .iter()
        .chain(commit.invoices.iter())
        .map(|invoice| invoice.paid_amount)
        .sum();
    let has_refunds = before.has_refunds()
        || commit.invoices.iter().any(|i| i.kind == InvoiceKind::Refund);

    appointment.amount_required = appointment.prior_debt + charges;
    appointment.amount_paid = paid;
    appointment.payment_status = payment_status(appointment.amount_required, paid, has_refunds);

    let grant = before.override_grant.as_ref().or(commit.override_grant.as_ref());
    if gate::evaluate(&appointment, grant).is_unlocked() && gate::latch(&mut appointment, now) {
        info!(appointment_id = %appointment.id, "Access gate opened, visit checked in");
    }

    appointment
}

/// Builds the line item for `quantity` units of `service`.
pub fn line_item(
    appointment_id: Uuid,
    service: &ServiceInfo,
    quantity: u32,
    unit_price: Decimal,
    source: ChargeSource,
    actor: Actor,
    now: DateTime<Utc>,
) -> LineItem {
    LineItem {
        id: Uuid::new_v4(),
        appointment_id,
        service_id: service.id,
        service_name: service.name.clone(),
        quantity,
        unit_price,
        total: unit_price * Decimal::from(quantity),
        source,
        created_by: actor.id,
        created_at: now,
    }
}

pub struct LedgerAccumulator {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<dyn ServiceCatalog>,
    publisher: Arc<dyn EventPublisher>,
}

impl LedgerAccumulator {
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

    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn add_charge(
        &self,
        appointment_id: Uuid,
        service_id: Uuid,
        quantity: u32,
        actor: Actor,
    ) -> Result<LineItem, FrontDeskError> {
        if quantity == 0 || quantity > MAX_CHARGE_QUANTITY {
            return Err(FrontDeskError::Validation(format!(
                "Quantity must be between 1 and {}",
                MAX_CHARGE_QUANTITY
            )));
        }

        let service = self.catalog.get_service(service_id).await?;

        let (item, committed) = mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
            if snapshot.appointment.ledger_closed() {
                return Err(FrontDeskError::LedgerClosed(appointment_id));
            }

            let now = Utc::now();
            let item = line_item(
                appointment_id,
                &service,
                quantity,
                service.price,
                ChargeSource::FrontDesk,
                actor,
                now,
            );
            let commit = LedgerCommit {
                line_items: vec![item.clone()],
                ..LedgerCommit::default()
            };
            let appointment = reconcile(snapshot, snapshot.appointment.clone(), &commit, now);

            Ok(Plan::Write {
                appointment,
                commit,
                output: item,
            })
        })
        .await?;

        info!(
            appointment_id = %appointment_id,
            service = %item.service_name,
            total = %item.total,
            amount_required = %committed.appointment.amount_required,
            "Charge added"
        );

        notify(
            self.publisher.as_ref(),
            &committed.appointment,
            appointment_id,
            EntityKind::Appointment,
            ChangeKind::LedgerChanged,
        )
        .await;

        Ok(item)
    }

    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn record_payment(
        &self,
        appointment_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        actor: Actor,
    ) -> Result<PaymentReceipt, FrontDeskError> {
        if amount <= Decimal::ZERO {
            return Err(FrontDeskError::Validation(
                "Payment amount must be positive".to_string(),
            ));
        }

        let ((invoice, anomaly), committed) =
            mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
                if snapshot.appointment.archived {
                    return Err(FrontDeskError::LedgerClosed(appointment_id));
                }

                let now = Utc::now();
                let current = &snapshot.appointment;
                let invoice = Invoice {
                    id: Uuid::new_v4(),
                    appointment_id,
                    kind: InvoiceKind::Payment,
                    line_item_ids: snapshot.line_items.iter().map(|item| item.id).collect(),
                    total: current.amount_required,
                    paid_amount: amount,
                    payment_method: method,
                    note: None,
                    created_by: actor.id,
                    created_at: now,
                };

                // Excess beyond what was already over-collected; the payment
                // itself is always recorded in full.
                let new_paid = current.amount_paid + amount;
                let ceiling = current.amount_required.max(current.amount_paid);
                let anomaly = (snapshot.override_grant.is_none() && new_paid > ceiling).then(|| {
                    LedgerAnomaly {
                        id: Uuid::new_v4(),
                        appointment_id,
                        kind: AnomalyKind::Overpayment,
                        amount: new_paid - ceiling,
                        invoice_id: invoice.id,
                        recorded_at: now,
                    }
                });

                let commit = LedgerCommit {
                    invoices: vec![invoice.clone()],
                    anomalies: anomaly.iter().cloned().collect(),
                    ..LedgerCommit::default()
                };
                let appointment = reconcile(snapshot, current.clone(), &commit, now);

                Ok(Plan::Write {
                    appointment,
                    commit,
                    output: (invoice, anomaly),
                })
            })
            .await?;

        if let Some(anomaly) = &anomaly {
            warn!(
                appointment_id = %appointment_id,
                excess = %anomaly.amount,
                "Overpayment recorded, refund entry required"
            );
        }
        info!(
            appointment_id = %appointment_id,
            amount = %amount,
            amount_paid = %committed.appointment.amount_paid,
            amount_required = %committed.appointment.amount_required,
            "Payment recorded"
        );

        notify(
            self.publisher.as_ref(),
            &committed.appointment,
            invoice.id,
            EntityKind::Invoice,
            ChangeKind::Created,
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

        Ok(PaymentReceipt {
            invoice,
            anomaly,
            appointment: committed.appointment,
        })
    }

    /// Issues a refund invoice. Never closes a file that was already opened.
    #[instrument(skip(self, reason), fields(actor = %actor.id))]
    pub async fn record_refund(
        &self,
        appointment_id: Uuid,
        amount: Decimal,
        reason: String,
        method: PaymentMethod,
        actor: Actor,
    ) -> Result<Invoice, FrontDeskError> {
        if amount <= Decimal::ZERO {
            return Err(FrontDeskError::Validation(
                "Refund amount must be positive".to_string(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(FrontDeskError::Validation(
                "Refund reason is required".to_string(),
            ));
        }

        let (invoice, committed) = mutate_ledger(self.store.as_ref(), appointment_id, |snapshot| {
            let current = &snapshot.appointment;
            if current.archived {
                return Err(FrontDeskError::LedgerClosed(appointment_id));
            }
            if amount > current.amount_paid {
                return Err(FrontDeskError::Validation(format!(
                    "Refund of {} exceeds the {} paid",
                    amount, current.amount_paid
                )));
            }

            let now = Utc::now();
            let invoice = Invoice {
                id: Uuid::new_v4(),
                appointment_id,
                kind: InvoiceKind::Refund,
                line_item_ids: Vec::new(),
                total: current.amount_required,
                paid_amount: -amount,
                payment_method: method,
                note: Some(reason.clone()),
                created_by: actor.id,
                created_at: now,
            };
            let commit = LedgerCommit {
                invoices: vec![invoice.clone()],
                ..LedgerCommit::default()
            };
            let appointment = reconcile(snapshot, current.clone(), &commit, now);

            Ok(Plan::Write {
                appointment,
                commit,
                output: invoice,
            })
        })
        .await?;

        info!(
            appointment_id = %appointment_id,
            amount = %amount,
            amount_paid = %committed.appointment.amount_paid,
            "Refund recorded"
        );

        notify(
            self.publisher.as_ref(),
            &committed.appointment,
            invoice.id,
            EntityKind::Invoice,
            ChangeKind::Created,
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

        Ok(invoice)
    }
}
