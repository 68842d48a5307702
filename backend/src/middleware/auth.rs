use crate::commands::identity::find_user;
use crate::config::Config;
use crate::db::{DbConn, Role, User};
use crate::error::{AgriError, AgriResult};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

const PUBLIC_ROUTES: [&str; 2] = ["/api/auth/register", "/api/auth/login"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> AgriResult<i64> {
        self.sub
            .parse()
            .map_err(|_| AgriError::Unauthorized("Malformed credential subject".to_string()))
    }
}

/// Issues a bearer credential for `user` that expires `token_ttl_secs` from now.
pub fn issue_token(config: &Config, user: &User) -> AgriResult<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role,
        iat: now as usize,
        exp: (now + config.token_ttl_secs) as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?)
}

pub fn decode_token(config: &Config, token: &str) -> AgriResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!("Rejected credential: {}", e);
        AgriError::Unauthorized("Invalid or expired credential".to_string())
    })
}

fn is_public(path: &str) -> bool {
    !path.starts_with("/api/")
        || PUBLIC_ROUTES.contains(&path)
        || path.starts_with("/api/weather/")
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AgriError> {
    let path = request.uri().path();
    if is_public(path) {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AgriError::Unauthorized("Missing credential".to_string()))?
        .to_str()
        .map_err(|_| AgriError::Unauthorized("Malformed credential".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AgriError::Unauthorized("Expected a bearer credential".to_string()))?;

    let claims = decode_token(&state.config, token.trim())?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Resolves the caller behind `claims` and checks the role against `allowed`.
///
/// The role is re-read from the store rather than trusted from the credential,
/// so an administrative role change takes effect immediately.
pub async fn authorize(conn: &mut DbConn, claims: &Claims, allowed: &[Role]) -> AgriResult<User> {
    let user_id = claims.user_id()?;
    let user = find_user(conn, user_id)
        .await?
        .ok_or_else(|| AgriError::Unauthorized("Account no longer exists".to_string()))?;

    if !allowed.contains(&user.role) {
        tracing::debug!(
            "User {} with role {} denied, requires one of {:?}",
            user.id,
            user.role,
            allowed
        );
        return Err(AgriError::Forbidden("Unauthorized access".to_string()));
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user(role: Role) -> User {
        let now = Utc::now();
        User {
            id: 42,
            email: "f@x.com".into(),
            password_hash: "hash".into(),
            first_name: "F".into(),
            last_name: "X".into(),
            phone: None,
            role,
            is_premium: false,
            latitude: None,
            longitude: None,
            is_available: true,
            service_radius: None,
            hourly_rate: None,
            service_details: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_token_roundtrip_binds_user_id() {
        let config = Config::for_tests();
        let token = issue_token(&config, &sample_user(Role::Farmer)).unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.role, Role::Farmer);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expired_token_is_unauthorized() {
        let mut config = Config::for_tests();
        config.token_ttl_secs = -600;
        let token = issue_token(&config, &sample_user(Role::Operator)).unwrap();
        assert!(matches!(
            decode_token(&config, &token),
            Err(AgriError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let config = Config::for_tests();
        let mut other = Config::for_tests();
        other.jwt_secret = "someone-else".into();
        let token = issue_token(&other, &sample_user(Role::Admin)).unwrap();
        assert!(decode_token(&config, &token).is_err());
    }

    #[test]
    fn test_public_paths() {
        assert!(is_public("/"));
        assert!(is_public("/favicon.ico"));
        assert!(!is_public("/api/auth/login/extra"));
        assert!(is_public("/api/auth/login"));
        assert!(is_public("/api/auth/register"));
        assert!(is_public("/api/weather/current"));
        assert!(!is_public("/api/auth/profile"));
        assert!(!is_public("/api/farmers/fields"));
        assert!(!is_public("/api/admin/stats"));
    }
}
