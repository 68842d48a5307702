use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/operators/service-requests",
            get(commands::service_request::list_operator_requests_axum),
        )
        .route(
            "/api/operators/service-requests/available",
            get(commands::service_request::list_available_axum),
        )
        .route(
            "/api/operators/service-requests/:id",
            get(commands::service_request::get_operator_request_axum),
        )
        .route(
            "/api/operators/service-requests/:id/accept",
            post(commands::service_request::accept_request_axum),
        )
        .route(
            "/api/operators/service-requests/:id/complete",
            post(commands::service_request::complete_request_axum),
        )
        .route(
            "/api/operators/update-location",
            post(commands::identity::update_operator_location_axum),
        )
        .route(
            "/api/operators/availability",
            post(commands::identity::update_availability_axum),
        )
}
