use crate::commands;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/weather/current", get(commands::weather::current_weather_axum))
        .route("/api/weather/forecast", get(commands::weather::forecast_axum))
}
