use crate::state::AppState;
use axum::Router;

pub mod admin;
pub mod auth;
pub mod farmers;
pub mod operators;
pub mod weather;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(farmers::router())
        .merge(operators::router())
        .merge(admin::router())
        .merge(weather::router())
}
