use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::FrontDeskError;
use crate::models::{
    Appointment, Invoice, InvoiceKind, LedgerAnomaly, LineItem, OverrideGrant, ServiceRequest,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Appointment {0} was modified by another writer")]
    VersionConflict(Uuid),

    #[error("Appointment not found: {0}")]
    AppointmentNotFound(Uuid),

    #[error("Service request not found: {0}")]
    ServiceRequestNotFound(Uuid),

    #[error("Appointment {0} already exists")]
    Duplicate(Uuid),

    #[error("Override grant already recorded for appointment {0}")]
    GrantExists(Uuid),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Everything the ledger knows about one appointment, read at a single version.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub appointment: Appointment,
    pub line_items: Vec<LineItem>,
    pub invoices: Vec<Invoice>,
    pub service_requests: Vec<ServiceRequest>,
    pub override_grant: Option<OverrideGrant>,
    pub anomalies: Vec<LedgerAnomaly>,
}

impl LedgerSnapshot {
    pub fn new(appointment: Appointment) -> Self {
        Self {
            appointment,
            line_items: Vec::new(),
            invoices: Vec::new(),
            service_requests: Vec::new(),
            override_grant: None,
            anomalies: Vec::new(),
        }
    }

    pub fn service_request(&self, request_id: Uuid) -> Option<&ServiceRequest> {
        self.service_requests.iter().find(|r| r.id == request_id)
    }

    pub fn has_refunds(&self) -> bool {
        self.invoices.iter().any(|i| i.kind == InvoiceKind::Refund)
    }

    pub fn charges_total(&self) -> Decimal {
        self.line_items.iter().map(|item| item.total).sum()
    }
}

/// Appends and row replacement applied together by [`LedgerStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct LedgerCommit {
    pub line_items: Vec<LineItem>,
    pub invoices: Vec<Invoice>,
    /// Inserted, or replaces the stored request with the same id.
    pub service_request: Option<ServiceRequest>,
    pub override_grant: Option<OverrideGrant>,
    pub anomalies: Vec<LedgerAnomaly>,
}

/// Appointment rows plus their append-only line item, invoice, anomaly and
/// service request logs.
///
/// `commit` is a compare-and-set on the appointment row version: either every
/// part of the commit lands or none does.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_appointment(&self, appointment: Appointment) -> Result<(), StoreError>;

    async fn load(&self, appointment_id: Uuid) -> Result<LedgerSnapshot, StoreError>;

    async fn commit(
        &self,
        expected_version: u64,
        appointment: Appointment,
        commit: LedgerCommit,
    ) -> Result<LedgerSnapshot, StoreError>;

    async fn appointment_for_request(&self, request_id: Uuid) -> Result<Uuid, StoreError>;

    async fn list_for_day(&self, date: NaiveDate) -> Result<Vec<LedgerSnapshot>, StoreError>;
}

#[derive(Default)]
struct StoreState {
    ledgers: HashMap<Uuid, LedgerSnapshot>,
    request_index: HashMap<Uuid, Uuid>,
}

/// Process-local [`LedgerStore`].
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<StoreState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_appointment(&self, appointment: Appointment) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.ledgers.contains_key(&appointment.id) {
            return Err(StoreError::Duplicate(appointment.id));
        }
        state.ledgers.insert(appointment.id, LedgerSnapshot::new(appointment));
        Ok(())
    }

    async fn load(&self, appointment_id: Uuid) -> Result<LedgerSnapshot, StoreError> {
        let state = self.state.read().await;
        state
            .ledgers
            .get(&appointment_id)
            .cloned()
            .ok_or(StoreError::AppointmentNotFound(appointment_id))
    }

    async fn commit(
        &self,
        expected_version: u64,
        mut appointment: Appointment,
        commit: LedgerCommit,
    ) -> Result<LedgerSnapshot, StoreError> {
        let mut state = self.state.write().await;
        let appointment_id = appointment.id;

        let ledger = state
            .ledgers
            .get_mut(&appointment_id)
            .ok_or(StoreError::AppointmentNotFound(appointment_id))?;

        if ledger.appointment.version != expected_version {
            return Err(StoreError::VersionConflict(appointment_id));
        }
        if commit.override_grant.is_some() && ledger.override_grant.is_some() {
            return Err(StoreError::GrantExists(appointment_id));
        }

        appointment.version = expected_version + 1;
        appointment.updated_at = Utc::now();
        ledger.appointment = appointment;
        ledger.line_items.extend(commit.line_items);
        ledger.invoices.extend(commit.invoices);
        ledger.anomalies.extend(commit.anomalies);
        if let Some(grant) = commit.override_grant {
            ledger.override_grant = Some(grant);
        }

        let indexed = commit.service_request.as_ref().map(|r| r.id);
        if let Some(request) = commit.service_request {
            match ledger.service_requests.iter_mut().find(|r| r.id == request.id) {
                Some(existing) => *existing = request,
                None => ledger.service_requests.push(request),
            }
        }

        let snapshot = ledger.clone();
        if let Some(request_id) = indexed {
            state.request_index.insert(request_id, appointment_id);
        }

        debug!(
            "Committed ledger for appointment {} at version {}",
            appointment_id, snapshot.appointment.version
        );
        Ok(snapshot)
    }

    async fn appointment_for_request(&self, request_id: Uuid) -> Result<Uuid, StoreError> {
        let state = self.state.read().await;
        state
            .request_index
            .get(&request_id)
            .copied()
            .ok_or(StoreError::ServiceRequestNotFound(request_id))
    }

    async fn list_for_day(&self, date: NaiveDate) -> Result<Vec<LedgerSnapshot>, StoreError> {
        let state = self.state.read().await;
        let mut day: Vec<LedgerSnapshot> = state
            .ledgers
            .values()
            .filter(|ledger| ledger.appointment.visit_date() == date)
            .cloned()
            .collect();
        day.sort_by_key(|ledger| ledger.appointment.scheduled_at);
        Ok(day)
    }
}

/// Outcome of planning a ledger mutation against a snapshot.
pub enum Plan<T> {
    /// Write the new row and appends, then return `output`.
    Write {
        appointment: Appointment,
        commit: LedgerCommit,
        output: T,
    },
    /// Nothing to write; return `output` as-is.
    Skip(T),
}

pub const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Read-plan-commit loop. The plan is re-run against fresh state whenever
/// another writer bumps the row version first.
pub async fn mutate_ledger<T, F>(
    store: &dyn LedgerStore,
    appointment_id: Uuid,
    mut plan: F,
) -> Result<(T, LedgerSnapshot), FrontDeskError>
where
    F: FnMut(&LedgerSnapshot) -> Result<Plan<T>, FrontDeskError>,
{
    for attempt in 1..=MAX_COMMIT_ATTEMPTS {
        let snapshot = store.load(appointment_id).await?;
        let expected_version = snapshot.appointment.version;

        let (appointment, commit, output) = match plan(&snapshot)? {
            Plan::Skip(output) => return Ok((output, snapshot)),
            Plan::Write { appointment, commit, output } => (appointment, commit, output),
        };

        match store.commit(expected_version, appointment, commit).await {
            Ok(committed) => return Ok((output, committed)),
            Err(StoreError::VersionConflict(_)) if attempt < MAX_COMMIT_ATTEMPTS => {
                warn!(
                    "Ledger conflict on appointment {}, retrying attempt {}/{}",
                    appointment_id, attempt, MAX_COMMIT_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_millis(5 * attempt as u64)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(FrontDeskError::ConcurrencyConflict(appointment_id))
}
