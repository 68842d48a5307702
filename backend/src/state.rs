use crate::config::Config;
use crate::db::DbPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub http: reqwest::Client, // Outbound client for the weather provider
}

impl AppState {
    pub fn new(pool: DbPool, config: Config) -> Self {
        AppState {
            pool,
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }
}

impl axum::extract::FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
