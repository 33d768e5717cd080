use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use front_desk_cell::handlers::FrontDeskState;
use front_desk_cell::router::front_desk_routes;

pub fn create_router(state: Arc<FrontDeskState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Front desk API is running!" }))
        .nest("/front-desk", front_desk_routes(state))
}
