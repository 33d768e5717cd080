use std::sync::Arc;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use front_desk_cell::services::{ClinicalRecords, PatientAccounts, ServiceCatalog, SupabaseCollaborators};
use front_desk_cell::FrontDeskError;
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn collaborators(server: &MockServer) -> SupabaseCollaborators {
    let config = TestConfig::default()
        .without_override()
        .with_supabase_url(&server.uri())
        .to_app_config();
    SupabaseCollaborators::new(Arc::new(SupabaseClient::new(&config)))
}

#[tokio::test]
async fn service_lookup_parses_catalog_row() {
    let server = MockServer::start().await;
    let service_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .and(query_param("id", format!("eq.{}", service_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::service_response(&service_id.to_string(), "Ultrasound", "149.99", "imaging")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let service = collaborators(&server).get_service(service_id).await.unwrap();
    assert_eq!(service.id, service_id);
    assert_eq!(service.name, "Ultrasound");
    assert_eq!(service.price, dec!(149.99));
    assert_eq!(service.category, "imaging");
}

#[tokio::test]
async fn missing_service_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = collaborators(&server).get_service(Uuid::new_v4()).await;
    assert_matches!(result, Err(FrontDeskError::NotFound { entity: "Service", .. }));
}

#[tokio::test]
async fn prior_debt_defaults_to_zero_and_never_negative() {
    let server = MockServer::start().await;
    let indebted = Uuid::new_v4();
    let in_credit = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/patient_balances"))
        .and(query_param("patient_id", format!("eq.{}", indebted)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_balance_response(&indebted.to_string(), "75.50")
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patient_balances"))
        .and(query_param("patient_id", format!("eq.{}", in_credit)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_balance_response(&in_credit.to_string(), "-20")
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patient_balances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let accounts = collaborators(&server);
    assert_eq!(accounts.get_patient_prior_debt(indebted).await.unwrap(), dec!(75.50));
    assert_eq!(accounts.get_patient_prior_debt(in_credit).await.unwrap(), Decimal::ZERO);
    assert_eq!(accounts.get_patient_prior_debt(Uuid::new_v4()).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn upstream_failure_surfaces_as_external() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/clinical_records"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(MockSupabaseResponses::error_response("boom", "XX000")),
        )
        .mount(&server)
        .await;

    let result = collaborators(&server).open_patient_file(Uuid::new_v4()).await;
    assert_matches!(result, Err(FrontDeskError::External(_)));
    assert!(!result.unwrap_err().is_business_outcome());
}
