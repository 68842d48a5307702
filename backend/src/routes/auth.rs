use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(commands::identity::register_axum))
        .route("/api/auth/login", post(commands::identity::login_axum))
        .route(
            "/api/auth/profile",
            get(commands::identity::get_profile_axum).put(commands::identity::update_profile_axum),
        )
}
