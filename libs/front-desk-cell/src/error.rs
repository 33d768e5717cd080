use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::services::store::StoreError;

#[derive(Error, Debug)]
pub enum FrontDeskError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Patient file is locked, balance remaining {balance_remaining}")]
    AccessDenied { balance_remaining: Decimal },

    #[error("Override credential rejected")]
    AuthFailed,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Too many failed override attempts, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },

    #[error("Service request {0} is already fulfilled")]
    AlreadyFulfilled(Uuid),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Ledger for appointment {0} changed concurrently, retry with fresh state")]
    ConcurrencyConflict(Uuid),

    #[error("Ledger for appointment {0} is closed")]
    LedgerClosed(Uuid),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("External service error: {0}")]
    External(String),
}

impl FrontDeskError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        FrontDeskError::NotFound { entity, id }
    }

    /// Business outcomes the caller can act on, as opposed to infrastructure failures.
    pub fn is_business_outcome(&self) -> bool {
        !matches!(self, FrontDeskError::Storage(_) | FrontDeskError::External(_))
    }
}

impl From<StoreError> for FrontDeskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict(id) => FrontDeskError::ConcurrencyConflict(id),
            StoreError::AppointmentNotFound(id) => FrontDeskError::not_found("Appointment", id),
            StoreError::ServiceRequestNotFound(id) => FrontDeskError::not_found("Service request", id),
            other => FrontDeskError::Storage(other.to_string()),
        }
    }
}

impl From<FrontDeskError> for AppError {
    fn from(err: FrontDeskError) -> Self {
        match err {
            FrontDeskError::Validation(msg) => AppError::ValidationError(msg),
            FrontDeskError::AccessDenied { balance_remaining } => AppError::AccessDenied {
                message: "Patient file is locked until the balance is settled".to_string(),
                balance_remaining: balance_remaining.to_string(),
            },
            FrontDeskError::AuthFailed => AppError::Auth(err.to_string()),
            FrontDeskError::Forbidden(msg) => AppError::Forbidden(msg),
            FrontDeskError::RateLimited { .. } => AppError::TooManyRequests(err.to_string()),
            FrontDeskError::NotFound { .. } => AppError::NotFound(err.to_string()),
            FrontDeskError::AlreadyFulfilled(_)
            | FrontDeskError::ConcurrencyConflict(_)
            | FrontDeskError::LedgerClosed(_)
            | FrontDeskError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            FrontDeskError::Storage(msg) => AppError::Database(msg),
            FrontDeskError::External(msg) => AppError::ExternalService(msg),
        }
    }
}
