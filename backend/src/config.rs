use crate::error::{AgriError, AgriResult};
use std::env;
use std::str::FromStr;

pub const DEFAULT_WEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

const INSECURE_JWT_SECRET: &str = "insecure-development-secret-key-replace-me-immediately";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub port: u16,
    pub jwt_secret: String,
    pub token_ttl_secs: i64,
    pub bcrypt_cost: u32,
    pub allow_admin_signup: bool,
    pub admin_email: String,
    pub admin_password: String,
    pub weather_api_key: Option<String>,
    pub weather_base_url: String,
}

impl Config {
    /// Reads configuration from the process environment. Call `dotenvy::dotenv()` first
    /// if a `.env` file should be honoured.
    pub fn from_env() -> AgriResult<Self> {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, using insecure default!");
            INSECURE_JWT_SECRET.to_string()
        });

        let weather_api_key = env::var("OPENWEATHER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        if weather_api_key.is_none() {
            tracing::warn!("OPENWEATHER_API_KEY not set, weather endpoints will be unavailable");
        }

        Ok(Config {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| {
                tracing::warn!("DATABASE_URL not found in env, using local sqlite file");
                "sqlite://agridrone.db?mode=rwc".to_string()
            }),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            port: parse_var("PORT", 5000)?,
            jwt_secret,
            token_ttl_secs: parse_var("TOKEN_TTL_SECS", 3600)?,
            bcrypt_cost: parse_var("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            allow_admin_signup: parse_var("ALLOW_ADMIN_SIGNUP", false)?,
            admin_email: env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@agridrone.com".into()),
            admin_password: env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin123".into()),
            weather_api_key,
            weather_base_url: env::var("WEATHER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_WEATHER_BASE_URL.to_string()),
        })
    }

    /// Settings for tests: in-memory database and the cheapest bcrypt cost.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            port: 0,
            jwt_secret: "test-secret".to_string(),
            token_ttl_secs: 3600,
            bcrypt_cost: 4,
            allow_admin_signup: false,
            admin_email: "admin@agridrone.com".to_string(),
            admin_password: "admin123".to_string(),
            weather_api_key: None,
            weather_base_url: DEFAULT_WEATHER_BASE_URL.to_string(),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> AgriResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AgriError::Validation(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let v: u32 = parse_var("AGRIDRONE_TEST_SURELY_UNSET_VAR", 7).unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("AGRIDRONE_TEST_BAD_PORT", "not-a-port");
        let res: AgriResult<u16> = parse_var("AGRIDRONE_TEST_BAD_PORT", 5000);
        assert!(matches!(res, Err(AgriError::Validation(_))));
        env::remove_var("AGRIDRONE_TEST_BAD_PORT");
    }
}
