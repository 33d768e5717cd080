// External collaborators: service catalog, patient accounts, clinical records.
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::error::FrontDeskError;
use crate::models::ServiceInfo;

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn get_service(&self, service_id: Uuid) -> Result<ServiceInfo, FrontDeskError>;
}

#[async_trait]
pub trait PatientAccounts: Send + Sync {
    /// Unpaid balance carried over from earlier visits. Zero when none.
    async fn get_patient_prior_debt(&self, patient_id: Uuid) -> Result<Decimal, FrontDeskError>;
}

/// Clinical record storage. Opaque to the front desk; only reached after the
/// access gate has confirmed the appointment is unlocked.
#[async_trait]
pub trait ClinicalRecords: Send + Sync {
    async fn open_patient_file(&self, patient_id: Uuid) -> Result<Value, FrontDeskError>;
}

/// Supabase-backed implementation of all three collaborators.
#[derive(Clone)]
pub struct SupabaseCollaborators {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseCollaborators {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[derive(Debug, Deserialize)]
struct PatientBalanceRow {
    outstanding_balance: Decimal,
}

fn external(context: &str, err: anyhow::Error) -> FrontDeskError {
    error!("{}: {}", context, err);
    FrontDeskError::External(format!("{}: {}", context, err))
}

#[async_trait]
impl ServiceCatalog for SupabaseCollaborators {
    async fn get_service(&self, service_id: Uuid) -> Result<ServiceInfo, FrontDeskError> {
        let row = self
            .supabase
            .get_service(&service_id.to_string())
            .await
            .map_err(|e| external("Service catalog lookup failed", e))?
            .ok_or_else(|| FrontDeskError::not_found("Service", service_id))?;

        let service: ServiceInfo = serde_json::from_value(row)
            .map_err(|e| FrontDeskError::External(format!("Malformed service row: {}", e)))?;

        if service.price < Decimal::ZERO {
            return Err(FrontDeskError::External(format!(
                "Service {} has a negative price",
                service_id
            )));
        }

        debug!("Resolved service {} ({}) at {}", service.name, service.id, service.price);
        Ok(service)
    }
}

#[async_trait]
impl PatientAccounts for SupabaseCollaborators {
    async fn get_patient_prior_debt(&self, patient_id: Uuid) -> Result<Decimal, FrontDeskError> {
        let row = self
            .supabase
            .get_patient_balance(&patient_id.to_string())
            .await
            .map_err(|e| external("Patient balance lookup failed", e))?;

        let Some(row) = row else {
            return Ok(Decimal::ZERO);
        };

        let balance: PatientBalanceRow = serde_json::from_value(row)
            .map_err(|e| FrontDeskError::External(format!("Malformed balance row: {}", e)))?;

        Ok(balance.outstanding_balance.max(Decimal::ZERO))
    }
}

#[async_trait]
impl ClinicalRecords for SupabaseCollaborators {
    async fn open_patient_file(&self, patient_id: Uuid) -> Result<Value, FrontDeskError> {
        self.supabase
            .get_clinical_record(&patient_id.to_string(), None)
            .await
            .map_err(|e| external("Clinical record lookup failed", e))?
            .ok_or_else(|| FrontDeskError::not_found("Patient file", patient_id))
    }
}
