use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/farmers/fields",
            get(commands::field::list_fields_axum).post(commands::field::create_field_axum),
        )
        .route(
            "/api/farmers/fields/:id",
            get(commands::field::get_field_axum)
                .put(commands::field::update_field_axum)
                .delete(commands::field::delete_field_axum),
        )
        .route(
            "/api/farmers/service-requests",
            get(commands::service_request::list_farmer_requests_axum)
                .post(commands::service_request::create_request_axum),
        )
        .route(
            "/api/farmers/service-requests/:id",
            get(commands::service_request::get_farmer_request_axum)
                .put(commands::service_request::update_farmer_request_axum)
                .delete(commands::service_request::cancel_request_axum),
        )
        .route(
            "/api/farmers/nearby-operators",
            get(commands::matcher::find_nearby_operators_axum),
        )
        .route(
            "/api/farmers/operators/:id",
            get(commands::identity::get_operator_axum),
        )
        .route(
            "/api/farmers/update-location",
            post(commands::identity::update_farmer_location_axum),
        )
}
