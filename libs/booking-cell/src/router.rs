use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn booking_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}", delete(handlers::cancel_appointment))
        .route("/{appointment_id}/verify-otp", post(handlers::verify_otp))
        .route("/{appointment_id}/resend-otp", post(handlers::resend_otp))
        .route("/{appointment_id}/complete", patch(handlers::complete_appointment))
        .route("/sweep", post(handlers::sweep))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
