use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use front_desk_cell::services::{FrontDeskDeps, FrontDeskService, InMemoryLedgerStore, SupabaseCollaborators};
use front_desk_cell::{front_desk_routes, FrontDeskState};
use realtime_bus_cell::EventBus;
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser, TEST_OVERRIDE_SECRET};

// ==============================================================================
// TEST FIXTURES
// ==============================================================================

struct TestApp {
    router: Router,
    config: TestConfig,
    consultation_id: Uuid,
    _mock_server: MockServer,
}

impl TestApp {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let consultation_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/rest/v1/services"))
            .and(query_param("id", format!("eq.{}", consultation_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::service_response(&consultation_id.to_string(), "Consultation", "500", "general")
            ])))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/patient_balances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/clinical_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::clinical_record_response("patient")
            ])))
            .mount(&mock_server)
            .await;

        let config = TestConfig::default().with_supabase_url(&mock_server.uri());
        let app_config = config.to_arc();

        let collaborators = SupabaseCollaborators::new(Arc::new(SupabaseClient::new(&app_config)));
        let bus = EventBus::open(app_config.event_bus_capacity);
        let deps = FrontDeskDeps {
            store: Arc::new(InMemoryLedgerStore::new()),
            catalog: Arc::new(collaborators.clone()),
            accounts: Arc::new(collaborators.clone()),
            records: Arc::new(collaborators),
            publisher: Arc::new(bus.clone()),
        };
        let state = Arc::new(FrontDeskState {
            config: app_config.clone(),
            service: Arc::new(FrontDeskService::new(&app_config, deps)),
            bus,
        });

        Self {
            router: front_desk_routes(state),
            config,
            consultation_id,
            _mock_server: mock_server,
        }
    }

    fn token_for(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.config.jwt_secret, Some(1))
    }

    async fn send(&self, user: Option<&TestUser>, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", self.token_for(user)));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn book(&self, cashier: &TestUser, clinician: &TestUser) -> String {
        let (status, body) = self
            .send(
                Some(cashier),
                Method::POST,
                "/appointments",
                Some(json!({
                    "patient_id": Uuid::new_v4(),
                    "clinician_id": clinician.id,
                    "scheduled_at": chrono::Utc::now() + chrono::Duration::hours(1)
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["appointment"]["id"].as_str().unwrap().to_string()
    }

    async fn charge_consultation(&self, cashier: &TestUser, appointment_id: &str) {
        let (status, body) = self
            .send(
                Some(cashier),
                Method::POST,
                &format!("/appointments/{}/charges", appointment_id),
                Some(json!({ "service_id": self.consultation_id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }
}

// ==============================================================================
// AUTHENTICATION & ROLES
// ==============================================================================

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let app = TestApp::new().await;
    let (status, _) = app.send(None, Method::GET, "/queue", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_token_is_unauthorized() {
    let app = TestApp::new().await;
    let user = TestUser::cashier("desk@example.com");
    let token = JwtTestUtils::create_expired_token(&user, &app.config.jwt_secret);

    let request = Request::builder()
        .uri("/queue")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn patients_have_no_front_desk_access() {
    let app = TestApp::new().await;
    let patient = TestUser::patient("patient@example.com");
    let (status, _) = app.send(Some(&patient), Method::GET, "/queue", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn clinicians_cannot_record_payments() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let clinician = TestUser::clinician("doc@example.com");
    let apt = app.book(&cashier, &clinician).await;

    let (status, _) = app
        .send(
            Some(&clinician),
            Method::POST,
            &format!("/appointments/{}/payments", apt),
            Some(json!({ "amount": "500", "method": "cash" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn clinicians_cannot_move_patients_to_waiting() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let clinician = TestUser::clinician("doc@example.com");
    let apt = app.book(&cashier, &clinician).await;
    let uri = format!("/appointments/{}/status", apt);

    let (status, _) = app
        .send(Some(&clinician), Method::PATCH, &uri, Some(json!({ "status": "waiting" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(Some(&cashier), Method::PATCH, &uri, Some(json!({ "status": "waiting" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["appointment"]["status"], "waiting");
}

#[tokio::test]
async fn clinicians_are_scoped_to_their_own_queue() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let clinician = TestUser::clinician("doc@example.com");
    let colleague = TestUser::clinician("other-doc@example.com");
    let apt = app.book(&cashier, &clinician).await;

    let (status, _) = app
        .send(Some(&colleague), Method::GET, &format!("/appointments/{}/access", apt), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Some(&colleague), Method::GET, &format!("/appointments/{}/patient-file", apt), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(Some(&clinician), Method::GET, &format!("/appointments/{}/access", apt), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body.get("balance_remaining").is_none());
}

// ==============================================================================
// CHECK-IN FLOW
// ==============================================================================

#[tokio::test]
async fn locked_file_reports_balance_to_clinician() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let clinician = TestUser::clinician("doc@example.com");
    let apt = app.book(&cashier, &clinician).await;
    app.charge_consultation(&cashier, &apt).await;

    let (status, body) = app
        .send(Some(&clinician), Method::GET, &format!("/appointments/{}/patient-file", apt), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["balance_remaining"], "500");

    let (status, body) = app
        .send(
            Some(&cashier),
            Method::POST,
            &format!("/appointments/{}/check-in", apt),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "granted": false, "balanceRemaining": "500" }));
}

#[tokio::test]
async fn paid_visit_checks_in_and_opens_file() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let clinician = TestUser::clinician("doc@example.com");
    let apt = app.book(&cashier, &clinician).await;
    app.charge_consultation(&cashier, &apt).await;

    let (status, body) = app
        .send(
            Some(&cashier),
            Method::POST,
            &format!("/appointments/{}/payments", apt),
            Some(json!({ "amount": "500", "method": "card" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["appointment"]["payment_status"], "paid");
    assert!(body["anomaly"].is_null());

    let (status, body) = app
        .send(Some(&cashier), Method::POST, &format!("/appointments/{}/check-in", apt), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], true);

    let (status, body) = app
        .send(Some(&clinician), Method::GET, &format!("/appointments/{}/patient-file", apt), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["patient_file"].is_object());
}

#[tokio::test]
async fn override_credential_at_check_in() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let clinician = TestUser::clinician("doc@example.com");
    let apt = app.book(&cashier, &clinician).await;
    app.charge_consultation(&cashier, &apt).await;

    let (status, _) = app
        .send(
            Some(&cashier),
            Method::POST,
            &format!("/appointments/{}/check-in", apt),
            Some(json!({ "override_credential": "not-it" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(
            Some(&cashier),
            Method::POST,
            &format!("/appointments/{}/check-in", apt),
            Some(json!({ "override_credential": TEST_OVERRIDE_SECRET })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], true);
    assert_eq!(body["overrideGrant"]["granted_by"], cashier.id);

    let (status, body) = app
        .send(Some(&cashier), Method::GET, &format!("/appointments/{}/access", apt), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_status"], "unlocked");
    assert_eq!(body["basis"], "override");
}

// ==============================================================================
// SERVICE REQUESTS & QUEUE
// ==============================================================================

#[tokio::test]
async fn service_request_fulfilled_once() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let clinician = TestUser::clinician("doc@example.com");
    let apt = app.book(&cashier, &clinician).await;

    let (status, body) = app
        .send(
            Some(&clinician),
            Method::POST,
            &format!("/appointments/{}/service-requests", apt),
            Some(json!({ "service_id": app.consultation_id, "notes": "follow-up" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let request_id = body["service_request"]["id"].as_str().unwrap().to_string();

    let fulfill = format!("/service-requests/{}/fulfill", request_id);
    let (status, body) = app.send(Some(&cashier), Method::POST, &fulfill, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service_request"]["status"], "fulfilled");
    assert_eq!(body["line_item"]["service_name"], "Consultation");

    let (status, _) = app.send(Some(&cashier), Method::POST, &fulfill, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn clinician_queue_hides_amounts() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let clinician = TestUser::clinician("doc@example.com");
    let apt = app.book(&cashier, &clinician).await;
    app.charge_consultation(&cashier, &apt).await;

    let (status, body) = app.send(Some(&clinician), Method::GET, "/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue"]["role"], "clinician");
    let entry = &body["queue"]["entries"][0];
    assert_eq!(entry["appointment_id"], apt.as_str());
    assert_eq!(entry["access_status"], "locked");
    assert!(entry.get("amount_required").is_none());
    assert!(entry.get("balance_remaining").is_none());

    let (status, body) = app.send(Some(&cashier), Method::GET, "/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue"]["role"], "cashier");
    assert_eq!(body["queue"]["entries"][0]["balance_remaining"], "500");
}

#[tokio::test]
async fn unknown_service_is_not_found() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let clinician = TestUser::clinician("doc@example.com");
    let apt = app.book(&cashier, &clinician).await;

    let (status, _) = app
        .send(
            Some(&cashier),
            Method::POST,
            &format!("/appointments/{}/charges", apt),
            Some(json!({ "service_id": Uuid::new_v4(), "quantity": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn subscribe_rejects_malformed_topic() {
    let app = TestApp::new().await;
    let cashier = TestUser::cashier("desk@example.com");
    let (status, _) = app
        .send(Some(&cashier), Method::GET, "/subscribe?topic=everything", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let clinician = TestUser::clinician("doc@example.com");
    let (status, _) = app
        .send(
            Some(&clinician),
            Method::GET,
            &format!("/subscribe?topic=clinician:{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
