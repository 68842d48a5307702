//! Thin proxy to the OpenWeatherMap REST API.

use crate::config::Config;
use crate::error::{AgriError, AgriResult};
use crate::state::AppState;
use axum::{
    extract::{Query, State as AxumState},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeatherEndpoint {
    Current,
    Forecast,
}

impl WeatherEndpoint {
    fn path(&self) -> &'static str {
        match self {
            WeatherEndpoint::Current => "weather",
            WeatherEndpoint::Forecast => "forecast",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WeatherQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub units: Option<String>,
}

fn coordinate(raw: Option<&str>) -> AgriResult<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| AgriError::Validation("Latitude and longitude are required".to_string()))
}

/// Forwards one lookup and returns the provider's JSON body untouched.
pub async fn fetch_weather(
    http: &reqwest::Client,
    config: &Config,
    endpoint: WeatherEndpoint,
    query: &WeatherQuery,
) -> AgriResult<Value> {
    let lat = coordinate(query.lat.as_deref())?;
    let lon = coordinate(query.lon.as_deref())?;
    let units = query
        .units
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or("metric");

    let api_key = config.weather_api_key.as_deref().ok_or_else(|| {
        tracing::warn!("Weather lookup refused: OPENWEATHER_API_KEY is not set");
        AgriError::ServiceUnavailable("Weather API key is not configured".to_string())
    })?;

    let url = format!(
        "{}/{}",
        config.weather_base_url.trim_end_matches('/'),
        endpoint.path()
    );
    tracing::debug!("Weather request: {} lat={} lon={} units={}", url, lat, lon, units);

    let resp = http
        .get(&url)
        .query(&[
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("units", units.to_string()),
            ("appid", api_key.to_string()),
        ])
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!("Weather provider error: status {}, body {}", status, body);
        return Err(AgriError::Upstream {
            status: status.as_u16(),
            message: format!("Failed to fetch {} data", endpoint.path()),
        });
    }

    Ok(resp.json::<Value>().await?)
}

// Axum Handlers

pub async fn current_weather_axum(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<WeatherQuery>,
) -> AgriResult<Json<Value>> {
    let body = fetch_weather(&state.http, &state.config, WeatherEndpoint::Current, &query).await?;
    Ok(Json(body))
}

pub async fn forecast_axum(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<WeatherQuery>,
) -> AgriResult<Json<Value>> {
    let body = fetch_weather(&state.http, &state.config, WeatherEndpoint::Forecast, &query).await?;
    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query(lat: &str, lon: &str) -> WeatherQuery {
        WeatherQuery {
            lat: Some(lat.into()),
            lon: Some(lon.into()),
            units: None,
        }
    }

    fn config_for(server: &MockServer) -> Config {
        let mut config = Config::for_tests();
        config.weather_api_key = Some("k3y".into());
        config.weather_base_url = server.uri();
        config
    }

    #[tokio::test]
    async fn test_current_weather_passes_body_through() {
        let server = MockServer::start().await;
        let body = json!({"main": {"temp": 21.5}, "name": "Somewhere"});
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("lat", "40.71"))
            .and(query_param("lon", "-74"))
            .and(query_param("units", "metric"))
            .and(query_param("appid", "k3y"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let got = fetch_weather(
            &reqwest::Client::new(),
            &config,
            WeatherEndpoint::Current,
            &query("40.71", "-74.0"),
        )
        .await
        .unwrap();
        assert_eq!(got, body);
    }

    #[tokio::test]
    async fn test_forecast_forwards_units() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("units", "imperial"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"list": []})))
            .mount(&server)
            .await;

        let config = config_for(&server);
        let mut q = query("1", "2");
        q.units = Some("imperial".into());
        let got = fetch_weather(&reqwest::Client::new(), &config, WeatherEndpoint::Forecast, &q)
            .await
            .unwrap();
        assert_eq!(got, json!({"list": []}));
    }

    #[tokio::test]
    async fn test_upstream_status_is_propagated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let config = config_for(&server);
        let err = fetch_weather(
            &reqwest::Client::new(),
            &config,
            WeatherEndpoint::Current,
            &query("1", "2"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgriError::Upstream { status: 401, .. }));
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_key_is_service_unavailable() {
        let config = Config::for_tests();
        let err = fetch_weather(
            &reqwest::Client::new(),
            &config,
            WeatherEndpoint::Current,
            &query("1", "2"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgriError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_coordinates_rejected_before_any_call() {
        let config = Config::for_tests();
        let q = WeatherQuery {
            lat: Some("1".into()),
            lon: None,
            units: None,
        };
        let err = fetch_weather(&reqwest::Client::new(), &config, WeatherEndpoint::Forecast, &q)
            .await
            .unwrap_err();
        assert!(matches!(err, AgriError::Validation(_)));

        let err = fetch_weather(
            &reqwest::Client::new(),
            &config,
            WeatherEndpoint::Forecast,
            &query("north", "2"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgriError::Validation(_)));
    }
}
