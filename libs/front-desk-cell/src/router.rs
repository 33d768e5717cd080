// libs/front-desk-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, FrontDeskState};

pub fn front_desk_routes(state: Arc<FrontDeskState>) -> Router {
    // Every front-desk operation requires an authenticated staff member
    let protected_routes = Router::new()
        .route("/queue", get(handlers::get_queue))
        .route("/subscribe", get(handlers::subscribe))
        .route("/appointments", post(handlers::book_appointment))
        .route("/appointments/{appointment_id}/access", get(handlers::get_access))
        .route("/appointments/{appointment_id}/status", patch(handlers::update_visit_status))

        // Ledger
        .route("/appointments/{appointment_id}/charges", post(handlers::add_charge))
        .route("/appointments/{appointment_id}/payments", post(handlers::record_payment))
        .route("/appointments/{appointment_id}/refunds", post(handlers::record_refund))

        // Access gate
        .route("/appointments/{appointment_id}/check-in", post(handlers::check_in))
        .route("/appointments/{appointment_id}/override", post(handlers::request_override))
        .route("/appointments/{appointment_id}/patient-file", get(handlers::open_patient_file))

        // Service requests
        .route("/appointments/{appointment_id}/service-requests", post(handlers::create_service_request))
        .route("/service-requests/{request_id}/fulfill", post(handlers::fulfill_service_request))
        .route("/service-requests/{request_id}/reject", post(handlers::reject_service_request))

        .route("/days/{date}/close", post(handlers::close_day))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
