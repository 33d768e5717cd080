// Role-specific read models of one day's appointments.
//
// Cashiers see money and pending service requests, never clinical notes.
// Clinicians see whether each file is open, never amounts.
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{PaymentStatus, ServiceRequestStatus, VisitStatus};
use crate::services::gate::{self, AccessStatus};
use crate::services::store::LedgerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    Cashier,
    /// Only this clinician's appointments.
    Clinician(Uuid),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum QueueView {
    Cashier(CashierQueue),
    Clinician(ClinicianQueue),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashierQueue {
    pub date: NaiveDate,
    pub entries: Vec<CashierEntry>,
    pub totals: QueueTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashierEntry {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub clinician_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: VisitStatus,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub payment_status: PaymentStatus,
    pub prior_debt: Decimal,
    pub amount_required: Decimal,
    pub amount_paid: Decimal,
    pub balance_remaining: Decimal,
    pub access_status: AccessStatus,
    pub override_granted: bool,
    pub pending_requests: Vec<PendingRequest>,
    pub anomaly_count: usize,
}

/// A service request awaiting the cashier. Clinical notes are left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRequest {
    pub request_id: Uuid,
    pub service_id: Uuid,
    pub service_name: String,
    pub price: Decimal,
    pub requested_by: Uuid,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueTotals {
    pub appointments: usize,
    pub amount_required: Decimal,
    pub amount_paid: Decimal,
    pub outstanding: Decimal,
    pub pending_requests: usize,
    pub anomalies: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicianQueue {
    pub date: NaiveDate,
    pub clinician_id: Uuid,
    pub entries: Vec<ClinicianEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicianEntry {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: VisitStatus,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub access_status: AccessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_reason: Option<String>,
}

pub fn project(date: NaiveDate, ledgers: &[LedgerSnapshot], role: QueueRole) -> QueueView {
    let mut visible: Vec<&LedgerSnapshot> = ledgers
        .iter()
        .filter(|ledger| !ledger.appointment.archived && ledger.appointment.visit_date() == date)
        .filter(|ledger| match role {
            QueueRole::Cashier => true,
            QueueRole::Clinician(clinician_id) => ledger.appointment.clinician_id == clinician_id,
        })
        .collect();
    visible.sort_by_key(|ledger| ledger.appointment.scheduled_at);

    match role {
        QueueRole::Cashier => QueueView::Cashier(cashier_queue(date, &visible)),
        QueueRole::Clinician(clinician_id) => QueueView::Clinician(ClinicianQueue {
            date,
            clinician_id,
            entries: visible.iter().map(|ledger| clinician_entry(ledger)).collect(),
        }),
    }
}

fn cashier_queue(date: NaiveDate, ledgers: &[&LedgerSnapshot]) -> CashierQueue {
    let entries: Vec<CashierEntry> = ledgers.iter().map(|ledger| cashier_entry(ledger)).collect();

    let totals = entries.iter().fold(QueueTotals::default(), |mut totals, entry| {
        totals.appointments += 1;
        totals.amount_required += entry.amount_required;
        totals.amount_paid += entry.amount_paid;
        totals.outstanding += entry.balance_remaining;
        totals.pending_requests += entry.pending_requests.len();
        totals.anomalies += entry.anomaly_count;
        totals
    });

    CashierQueue {
        date,
        entries,
        totals,
    }
}

fn cashier_entry(ledger: &LedgerSnapshot) -> CashierEntry {
    let apt = &ledger.appointment;
    let decision = gate::evaluate_snapshot(ledger);

    let pending_requests = ledger
        .service_requests
        .iter()
        .filter(|request| request.status == ServiceRequestStatus::Requested)
        .map(|request| PendingRequest {
            request_id: request.id,
            service_id: request.service_id,
            service_name: request.service_name.clone(),
            price: request.price,
            requested_by: request.requested_by,
            requested_at: request.requested_at,
        })
        .collect();

    CashierEntry {
        appointment_id: apt.id,
        patient_id: apt.patient_id,
        clinician_id: apt.clinician_id,
        scheduled_at: apt.scheduled_at,
        status: apt.status,
        checked_in_at: apt.checked_in_at,
        payment_status: apt.payment_status,
        prior_debt: apt.prior_debt,
        amount_required: apt.amount_required,
        amount_paid: apt.amount_paid,
        balance_remaining: decision.balance_remaining,
        access_status: decision.status,
        override_granted: ledger.override_grant.is_some(),
        pending_requests,
        anomaly_count: ledger.anomalies.len(),
    }
}

fn clinician_entry(ledger: &LedgerSnapshot) -> ClinicianEntry {
    let apt = &ledger.appointment;
    let decision = gate::evaluate_snapshot(ledger);

    ClinicianEntry {
        appointment_id: apt.id,
        patient_id: apt.patient_id,
        scheduled_at: apt.scheduled_at,
        status: apt.status,
        checked_in_at: apt.checked_in_at,
        access_status: decision.status,
        locked_reason: (!decision.is_unlocked()).then(|| gate::locked_reason(apt)),
    }
}
