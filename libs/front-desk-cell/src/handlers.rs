// libs/front-desk-cell/src/handlers.rs
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{NaiveDate, Utc};
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use realtime_bus_cell::{EventBus, Topic};
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Actor, ActorRole, AddChargeRequest, BookAppointmentRequest, CheckInRequest,
    CreateServiceRequest, OverrideRequest, PaymentMethod, QueueQuery, RecordPaymentRequest,
    RecordRefundRequest, RejectServiceRequest, SubscribeQuery, UpdateVisitStatusRequest,
    VisitStatus,
};
use crate::services::front_desk::FrontDeskService;
use crate::services::gate;
use crate::services::projector::QueueRole;

/// Shared state behind every front-desk route.
#[derive(Clone)]
pub struct FrontDeskState {
    pub config: Arc<AppConfig>,
    pub service: Arc<FrontDeskService>,
    pub bus: EventBus,
}

// ==============================================================================
// ROLE CHECKS
// ==============================================================================

fn actor(user: &User) -> Result<Actor, AppError> {
    Actor::from_user(user)
        .ok_or_else(|| AppError::Forbidden("Front desk access requires a staff role".to_string()))
}

fn cashier(user: &User) -> Result<Actor, AppError> {
    let actor = actor(user)?;
    if actor.role != ActorRole::Cashier {
        return Err(AppError::Forbidden("Only front desk staff can perform this action".to_string()));
    }
    Ok(actor)
}

fn clinician(user: &User) -> Result<Actor, AppError> {
    let actor = actor(user)?;
    if actor.role != ActorRole::Clinician {
        return Err(AppError::Forbidden("Only clinicians can perform this action".to_string()));
    }
    Ok(actor)
}

// ==============================================================================
// QUEUE & BOOKING
// ==============================================================================

pub async fn get_queue(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = actor(&user)?;
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let role = match actor.role {
        ActorRole::Cashier => QueueRole::Cashier,
        ActorRole::Clinician => QueueRole::Clinician(actor.id),
    };

    let view = state.service.queue(date, role).await?;

    Ok(Json(json!({
        "success": true,
        "queue": view
    })))
}

pub async fn book_appointment(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = cashier(&user)?;
    let appointment = state.service.book_appointment(request, actor).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked"
    })))
}

pub async fn update_visit_status(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateVisitStatusRequest>,
) -> Result<Json<Value>, AppError> {
    // Entering the waiting room is a check-in
    let actor = if request.status == VisitStatus::Waiting {
        cashier(&user)?
    } else {
        actor(&user)?
    };
    let appointment = state
        .service
        .update_visit_status(appointment_id, request.status, actor)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

pub async fn close_day(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<Value>, AppError> {
    let actor = cashier(&user)?;
    let archived = state.service.close_day(date, actor).await?;

    Ok(Json(json!({
        "success": true,
        "date": date,
        "archived": archived
    })))
}

// ==============================================================================
// LEDGER HANDLERS
// ==============================================================================

pub async fn add_charge(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<AddChargeRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = cashier(&user)?;
    let line_item = state
        .service
        .ledger()
        .add_charge(appointment_id, request.service_id, request.quantity, actor)
        .await?;

    Ok(Json(json!({
        "success": true,
        "line_item": line_item
    })))
}

pub async fn record_payment(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = cashier(&user)?;
    let receipt = state
        .service
        .ledger()
        .record_payment(appointment_id, request.amount, request.method, actor)
        .await?;

    Ok(Json(json!({
        "success": true,
        "invoice": receipt.invoice,
        "anomaly": receipt.anomaly,
        "appointment": receipt.appointment
    })))
}

pub async fn record_refund(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RecordRefundRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = cashier(&user)?;
    let invoice = state
        .service
        .ledger()
        .record_refund(
            appointment_id,
            request.amount,
            request.reason,
            request.method.unwrap_or(PaymentMethod::Cash),
            actor,
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "invoice": invoice
    })))
}

// ==============================================================================
// ACCESS GATE HANDLERS
// ==============================================================================

pub async fn get_access(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = actor(&user)?;
    let appointment = state.service.appointment(appointment_id).await?;
    gate::ensure_in_scope(&appointment, actor)?;
    let decision = state.service.access(appointment_id).await?;

    // Clinicians get the status and a reason, never the amount
    let body = match actor.role {
        ActorRole::Cashier => json!({
            "success": true,
            "access_status": decision.status,
            "basis": decision.basis,
            "balance_remaining": decision.balance_remaining
        }),
        ActorRole::Clinician => {
            let reason = (!decision.is_unlocked()).then(|| gate::locked_reason(&appointment));
            json!({
                "success": true,
                "access_status": decision.status,
                "locked_reason": reason
            })
        }
    };

    Ok(Json(body))
}

pub async fn check_in(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    request: Option<Json<CheckInRequest>>,
) -> Result<Json<Value>, AppError> {
    let actor = cashier(&user)?;
    let Json(request) = request.unwrap_or_default();

    let outcome = state
        .service
        .check_in(appointment_id, request.override_credential, actor)
        .await?;

    Ok(Json(json!(outcome)))
}

pub async fn request_override(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = cashier(&user)?;
    let outcome = state
        .service
        .overrides()
        .request_override(appointment_id, &request.credential, &request.reason, actor)
        .await?;

    Ok(Json(json!({
        "success": true,
        "override": outcome
    })))
}

pub async fn open_patient_file(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = clinician(&user)?;
    let record = state.service.open_patient_file(appointment_id, actor).await?;

    Ok(Json(json!({
        "success": true,
        "patient_file": record
    })))
}

// ==============================================================================
// SERVICE REQUEST HANDLERS
// ==============================================================================

pub async fn create_service_request(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CreateServiceRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = clinician(&user)?;
    let service_request = state
        .service
        .requests()
        .request_service(appointment_id, request.service_id, request.notes, actor)
        .await?;

    Ok(Json(json!({
        "success": true,
        "service_request": service_request
    })))
}

pub async fn fulfill_service_request(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = cashier(&user)?;
    let (service_request, line_item) = state
        .service
        .requests()
        .fulfill_request(request_id, actor)
        .await?;

    Ok(Json(json!({
        "success": true,
        "service_request": service_request,
        "line_item": line_item
    })))
}

pub async fn reject_service_request(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
    Json(request): Json<RejectServiceRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = cashier(&user)?;
    let service_request = state
        .service
        .requests()
        .reject_request(request_id, request.reason, actor)
        .await?;

    Ok(Json(json!({
        "success": true,
        "service_request": service_request
    })))
}

// ==============================================================================
// LIVE UPDATES
// ==============================================================================

/// Streams `{entityId, entityKind, changeKind}` notifications for one topic.
/// Dropping the connection drops the subscription.
pub async fn subscribe(
    State(state): State<Arc<FrontDeskState>>,
    Extension(user): Extension<User>,
    Query(query): Query<SubscribeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let actor = actor(&user)?;
    let topic: Topic = query
        .topic
        .parse()
        .map_err(|e: realtime_bus_cell::BusError| AppError::BadRequest(e.to_string()))?;

    if let (ActorRole::Clinician, Topic::DailyQueue(_)) = (actor.role, topic) {
        return Err(AppError::Forbidden("Clinicians subscribe to their own queue".to_string()));
    }
    if let (ActorRole::Clinician, Topic::ClinicianQueue(clinician_id)) = (actor.role, topic) {
        if clinician_id != actor.id {
            return Err(AppError::Forbidden("Clinicians subscribe to their own queue".to_string()));
        }
    }

    let subscription = state.bus.subscribe(topic).await.map_err(|e| {
        warn!("Subscription to {} refused: {}", topic, e);
        AppError::ExternalService(e.to_string())
    })?;
    debug!("User {} subscribed to {}", actor.id, topic);

    let events = stream::unfold(subscription, |mut subscription| async move {
        let notification = subscription.recv().await?;
        let event = Event::default()
            .event("change")
            .json_data(notification.event());
        Some((event, subscription))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
