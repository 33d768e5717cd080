// libs/front-desk-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use realtime_bus_cell::Topic;
use shared_models::auth::User;

// ==============================================================================
// APPOINTMENT ROW
// ==============================================================================

/// One visit. Carries denormalized ledger totals reconciled on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub clinician_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: VisitStatus,
    /// Set exactly once, when the access gate first opens for this visit.
    pub checked_in_at: Option<DateTime<Utc>>,
    pub payment_status: PaymentStatus,
    /// Debt carried over from earlier visits, fixed at booking.
    pub prior_debt: Decimal,
    pub amount_required: Decimal,
    pub amount_paid: Decimal,
    pub archived: bool,
    /// Row version for compare-and-set writes.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn new(
        patient_id: Uuid,
        clinician_id: Uuid,
        scheduled_at: DateTime<Utc>,
        prior_debt: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            clinician_id,
            scheduled_at,
            status: VisitStatus::Scheduled,
            checked_in_at: None,
            payment_status: PaymentStatus::Pending,
            prior_debt,
            amount_required: prior_debt,
            amount_paid: Decimal::ZERO,
            archived: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn visit_date(&self) -> NaiveDate {
        self.scheduled_at.date_naive()
    }

    pub fn balance_remaining(&self) -> Decimal {
        (self.amount_required - self.amount_paid).max(Decimal::ZERO)
    }

    /// Charges can no longer be added once the visit is over or the day closed.
    pub fn ledger_closed(&self) -> bool {
        self.archived || self.status == VisitStatus::Completed
    }

    /// Every bus topic a change to this appointment is visible on.
    pub fn topics(&self) -> [Topic; 3] {
        [
            Topic::DailyQueue(self.visit_date()),
            Topic::ClinicianQueue(self.clinician_id),
            Topic::Appointment(self.id),
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Scheduled,
    Waiting,
    Completed,
    Cancelled,
    NoShow,
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisitStatus::Scheduled => write!(f, "scheduled"),
            VisitStatus::Waiting => write!(f, "waiting"),
            VisitStatus::Completed => write!(f, "completed"),
            VisitStatus::Cancelled => write!(f, "cancelled"),
            VisitStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Refunded,
}

// ==============================================================================
// LEDGER ENTRIES
// ==============================================================================

/// Catalog entry as returned by the service catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "request_id", rename_all = "snake_case")]
pub enum ChargeSource {
    FrontDesk,
    ServiceRequest(Uuid),
}

/// Immutable once attached to an appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub service_id: Uuid,
    pub service_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total: Decimal,
    pub source: ChargeSource,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRequestStatus {
    Requested,
    Fulfilled,
    Rejected,
}

impl ServiceRequestStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            ServiceRequestStatus::Requested => false,
            ServiceRequestStatus::Fulfilled | ServiceRequestStatus::Rejected => true,
        }
    }
}

impl fmt::Display for ServiceRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceRequestStatus::Requested => write!(f, "requested"),
            ServiceRequestStatus::Fulfilled => write!(f, "fulfilled"),
            ServiceRequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Clinician's ask for an extra billable service. Kept forever as audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub service_id: Uuid,
    pub service_name: String,
    /// Price quoted when the request was raised; fulfilment bills this amount.
    pub price: Decimal,
    pub notes: Option<String>,
    pub requested_by: Uuid,
    pub status: ServiceRequestStatus,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub line_item_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Insurance,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Payment,
    Refund,
}

/// Immutable payment record. Refunds are separate invoices with a negative
/// `paid_amount`, never edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub kind: InvoiceKind,
    pub line_item_ids: Vec<Uuid>,
    /// Amount required at the time the invoice was issued.
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub note: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Provenance of a supervisor bypass of the payment gate. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideGrant {
    pub appointment_id: Uuid,
    pub granted_by: Uuid,
    pub granted_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Paid total exceeded the amount required without an override grant.
    Overpayment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAnomaly {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub kind: AnomalyKind,
    pub amount: Decimal,
    pub invoice_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

// ==============================================================================
// ACTORS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Cashier,
    Clinician,
}

/// Authenticated caller resolved from the JWT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn cashier(id: Uuid) -> Self {
        Self { id, role: ActorRole::Cashier }
    }

    pub fn clinician(id: Uuid) -> Self {
        Self { id, role: ActorRole::Clinician }
    }

    /// `None` for roles with no front-desk access (patients, unknown claims).
    pub fn from_user(user: &User) -> Option<Self> {
        let id = Uuid::parse_str(&user.id).ok()?;
        let role = match user.role_name().as_str() {
            "cashier" | "receptionist" | "front_desk" | "admin" => ActorRole::Cashier,
            "doctor" | "clinician" => ActorRole::Clinician,
            _ => return None,
        };
        Some(Self { id, role })
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub clinician_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddChargeRequest {
    pub service_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRefundRequest {
    pub amount: Decimal,
    pub reason: String,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub override_credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub credential: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    pub service_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectServiceRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateVisitStatusRequest {
    pub status: VisitStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeQuery {
    pub topic: String,
}

/// Result of a check-in attempt. A refusal always carries the balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInOutcome {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_remaining: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_grant: Option<OverrideGrant>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentReceipt {
    pub invoice: Invoice,
    pub anomaly: Option<LedgerAnomaly>,
    pub appointment: Appointment,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_role(role: Option<&str>) -> User {
        User {
            id: Uuid::new_v4().to_string(),
            email: None,
            role: role.map(str::to_string),
            metadata: None,
            created_at: None,
        }
    }

    #[test]
    fn roles_map_to_actors() {
        assert_eq!(
            Actor::from_user(&user_with_role(Some("Receptionist"))).map(|a| a.role),
            Some(ActorRole::Cashier)
        );
        assert_eq!(
            Actor::from_user(&user_with_role(Some("doctor"))).map(|a| a.role),
            Some(ActorRole::Clinician)
        );
        assert!(Actor::from_user(&user_with_role(Some("patient"))).is_none());
        assert!(Actor::from_user(&user_with_role(None)).is_none());
    }

    #[test]
    fn new_appointment_starts_with_prior_debt_owed() {
        let apt = Appointment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now(),
            Decimal::new(12050, 2),
        );
        assert_eq!(apt.status, VisitStatus::Scheduled);
        assert_eq!(apt.amount_required, Decimal::new(12050, 2));
        assert_eq!(apt.balance_remaining(), Decimal::new(12050, 2));
        assert!(apt.checked_in_at.is_none());
        assert!(!apt.ledger_closed());
    }

    #[test]
    fn check_in_outcome_omits_balance_when_granted() {
        let outcome = CheckInOutcome {
            granted: true,
            balance_remaining: None,
            override_grant: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({ "granted": true }));
    }
}
