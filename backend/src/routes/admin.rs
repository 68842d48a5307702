use crate::commands;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/users", get(commands::admin::list_users_axum))
        .route(
            "/api/admin/users/:id",
            get(commands::admin::get_user_axum)
                .put(commands::admin::update_user_axum)
                .delete(commands::admin::delete_user_axum),
        )
        .route("/api/admin/operators", get(commands::admin::list_operators_axum))
        .route(
            "/api/admin/service-requests",
            get(commands::admin::list_requests_axum),
        )
        .route(
            "/api/admin/service-requests/:id",
            get(commands::admin::get_request_axum).put(commands::admin::update_request_axum),
        )
        .route("/api/admin/stats", get(commands::admin::get_stats_axum))
        .route("/api/admin/audit-log", get(commands::admin::list_audit_log_axum))
}
