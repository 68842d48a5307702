use crate::commands::audit::log_system_action;
use crate::commands::validate;
use crate::config::Config;
use crate::db::{begin_write, DbConn, Role, User};
use crate::error::{AgriError, AgriResult};
use crate::middleware::auth::{authorize, issue_token, Claims};
use crate::state::AppState;
use axum::{
    extract::{Path, State as AxumState},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVICE_RADIUS_KM: f64 = 50.0;

const ALL_ROLES: [Role; 3] = [Role::Farmer, Role::Operator, Role::Admin];

/// Public representation of a user. Operator-only attributes are null for other roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserView {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub is_premium: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_available: Option<bool>,
    pub service_radius: Option<f64>,
    pub hourly_rate: Option<f64>,
    pub service_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        let is_operator = user.role == Role::Operator;
        let has_location = user.role != Role::Admin;
        UserView {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone: user.phone.clone(),
            role: user.role,
            is_premium: user.is_premium,
            latitude: user.latitude.filter(|_| has_location),
            longitude: user.longitude.filter(|_| has_location),
            is_available: Some(user.is_available).filter(|_| is_operator),
            service_radius: user.service_radius.filter(|_| is_operator),
            hourly_rate: user.hourly_rate.filter(|_| is_operator),
            service_details: user.service_details.clone().filter(|_| is_operator),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub service_radius: Option<f64>,
    pub hourly_rate: Option<f64>,
    pub service_details: Option<String>,
}

/// Self-service profile changes. `None` leaves the stored value untouched.
/// The role is deliberately absent: it can only change through `admin_update_user`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub service_radius: Option<f64>,
    pub hourly_rate: Option<f64>,
    pub service_details: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminUserUpdate {
    #[serde(flatten)]
    pub profile: ProfileUpdate,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_premium: Option<bool>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationUpdate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_available: Option<bool>,
    pub service_radius: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserView,
    pub access_token: String,
}

pub async fn find_user(conn: &mut DbConn, user_id: i64) -> AgriResult<Option<User>> {
    Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?)
}

pub async fn find_user_by_email(conn: &mut DbConn, email: &str) -> AgriResult<Option<User>> {
    Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?)
}

pub async fn get_profile(conn: &mut DbConn, user_id: i64) -> AgriResult<User> {
    find_user(conn, user_id)
        .await?
        .ok_or_else(|| AgriError::NotFound("User not found".to_string()))
}

fn hash_password(config: &Config, password: &str) -> AgriResult<String> {
    let password = validate::non_empty("Password", password)?;
    Ok(bcrypt::hash(password, config.bcrypt_cost)?)
}

pub async fn register(conn: &mut DbConn, config: &Config, input: RegisterInput) -> AgriResult<User> {
    if input.role == Role::Admin && !config.allow_admin_signup {
        return Err(AgriError::Validation(
            "Administrator accounts cannot be self-registered".to_string(),
        ));
    }

    let email = validate::normalize_email(&input.email)?;
    let first_name = validate::non_empty("First name", &input.first_name)?;
    let last_name = validate::non_empty("Last name", &input.last_name)?;

    if find_user_by_email(conn, &email).await?.is_some() {
        return Err(AgriError::Conflict("Email already registered".to_string()));
    }

    // Operator-only attributes are dropped for every other role.
    let (latitude, longitude, service_radius, hourly_rate, service_details) =
        if input.role == Role::Operator {
            (
                input.latitude.map(validate::latitude).transpose()?,
                input.longitude.map(validate::longitude).transpose()?,
                Some(validate::positive(
                    "Service radius",
                    input.service_radius.unwrap_or(DEFAULT_SERVICE_RADIUS_KM),
                )?),
                Some(validate::non_negative(
                    "Hourly rate",
                    input.hourly_rate.unwrap_or(0.0),
                )?),
                input.service_details,
            )
        } else {
            (None, None, None, None, None)
        };

    let password_hash = hash_password(config, &input.password)?;
    let now = Utc::now();

    let user_id = sqlx::query(
        "INSERT INTO users (
            email, password_hash, first_name, last_name, phone, role, is_premium,
            latitude, longitude, is_available, service_radius, hourly_rate, service_details,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, 1, ?, ?, ?, ?, ?)",
    )
    .bind(&email)
    .bind(password_hash)
    .bind(first_name)
    .bind(last_name)
    .bind(input.phone)
    .bind(input.role)
    .bind(latitude)
    .bind(longitude)
    .bind(service_radius)
    .bind(hourly_rate)
    .bind(service_details)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    tracing::info!("Registered {} account {} ({})", input.role, user_id, email);
    get_profile(conn, user_id).await
}

/// Verifies credentials. Unknown email and wrong password yield the same error.
pub async fn authenticate(
    conn: &mut DbConn,
    config: &Config,
    email: &str,
    password: &str,
) -> AgriResult<User> {
    let invalid = || AgriError::Unauthorized("Invalid credentials".to_string());

    let email = email.trim().to_lowercase();
    match find_user_by_email(conn, &email).await? {
        Some(user) => {
            if bcrypt::verify(password, &user.password_hash).unwrap_or(false) {
                Ok(user)
            } else {
                Err(invalid())
            }
        }
        None => {
            // Spend comparable time so a missing account is not observable.
            let _ = bcrypt::hash(password, config.bcrypt_cost);
            Err(invalid())
        }
    }
}

pub async fn save_user(conn: &mut DbConn, user: &User) -> AgriResult<()> {
    sqlx::query(
        "UPDATE users SET
            email = ?, password_hash = ?, first_name = ?, last_name = ?, phone = ?, role = ?,
            is_premium = ?, latitude = ?, longitude = ?, is_available = ?, service_radius = ?,
            hourly_rate = ?, service_details = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.phone)
    .bind(user.role)
    .bind(user.is_premium)
    .bind(user.latitude)
    .bind(user.longitude)
    .bind(user.is_available)
    .bind(user.service_radius)
    .bind(user.hourly_rate)
    .bind(&user.service_details)
    .bind(Utc::now())
    .bind(user.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn apply_profile(config: &Config, user: &mut User, patch: ProfileUpdate) -> AgriResult<()> {
    if let Some(first_name) = patch.first_name {
        user.first_name = validate::non_empty("First name", &first_name)?;
    }
    if let Some(last_name) = patch.last_name {
        user.last_name = validate::non_empty("Last name", &last_name)?;
    }
    if let Some(phone) = patch.phone {
        user.phone = Some(phone);
    }
    if let Some(password) = patch.password {
        user.password_hash = hash_password(config, &password)?;
    }

    if user.role == Role::Operator {
        if let Some(lat) = patch.latitude {
            user.latitude = Some(validate::latitude(lat)?);
        }
        if let Some(lon) = patch.longitude {
            user.longitude = Some(validate::longitude(lon)?);
        }
        if let Some(radius) = patch.service_radius {
            user.service_radius = Some(validate::positive("Service radius", radius)?);
        }
        if let Some(rate) = patch.hourly_rate {
            user.hourly_rate = Some(validate::non_negative("Hourly rate", rate)?);
        }
        if let Some(details) = patch.service_details {
            user.service_details = Some(details);
        }
    }
    Ok(())
}

pub async fn update_profile(
    conn: &mut DbConn,
    config: &Config,
    user_id: i64,
    patch: ProfileUpdate,
) -> AgriResult<User> {
    let mut user = get_profile(conn, user_id).await?;
    apply_profile(config, &mut user, patch)?;
    save_user(conn, &user).await?;
    get_profile(conn, user_id).await
}

/// Unrestricted update of any attribute, including the role. Audited.
///
/// A farmer who still owns fields keeps the farmer role; an operator who changes role
/// releases their accepted requests.
pub async fn admin_update_user(
    conn: &mut DbConn,
    config: &Config,
    actor_id: i64,
    target_id: i64,
    patch: AdminUserUpdate,
) -> AgriResult<User> {
    let mut user = get_profile(conn, target_id).await?;
    let mut changes = Vec::new();

    if let Some(email) = patch.email {
        user.email = validate::normalize_email(&email)?;
        changes.push("email".to_string());
    }
    if let Some(role) = patch.role {
        if role != user.role {
            changes.push(format!("role {} -> {}", user.role, role));
            match user.role {
                Role::Farmer => {
                    let owned: (i64,) =
                        sqlx::query_as("SELECT COUNT(*) FROM fields WHERE user_id = ?")
                            .bind(target_id)
                            .fetch_one(&mut *conn)
                            .await?;
                    if owned.0 > 0 {
                        return Err(AgriError::InvalidState(format!(
                            "Farmer still owns {} field(s); remove them before changing the role",
                            owned.0
                        )));
                    }
                }
                Role::Operator => {
                    let released = release_accepted(conn, target_id).await?;
                    changes.push(format!("released {} accepted request(s)", released));
                }
                Role::Admin => {}
            }
        }
        user.role = role;
        if role == Role::Operator {
            user.service_radius.get_or_insert(DEFAULT_SERVICE_RADIUS_KM);
            user.hourly_rate.get_or_insert(0.0);
        }
    }
    if let Some(is_premium) = patch.is_premium {
        user.is_premium = is_premium;
        changes.push(format!("is_premium={}", is_premium));
    }
    if let Some(is_available) = patch.is_available {
        user.is_available = is_available;
        changes.push(format!("is_available={}", is_available));
    }
    if patch.profile.password.is_some() {
        changes.push("password".to_string());
    }
    apply_profile(config, &mut user, patch.profile)?;
    save_user(conn, &user).await?;

    log_system_action(
        conn,
        actor_id,
        "admin_update_user",
        &format!("user {}: {}", target_id, changes.join(", ")),
    )
    .await?;

    get_profile(conn, target_id).await
}

/// Hands an operator's accepted, unfinished work back to the pending pool.
async fn release_accepted(conn: &mut DbConn, operator_id: i64) -> AgriResult<u64> {
    Ok(sqlx::query(
        "UPDATE service_requests SET status = 'pending', operator_id = NULL, updated_at = ?
         WHERE operator_id = ? AND status = 'accepted'",
    )
    .bind(Utc::now())
    .bind(operator_id)
    .execute(&mut *conn)
    .await?
    .rows_affected())
}

/// Removes a user. Owned fields and the user's own requests go with it; requests
/// the user had accepted as an operator are released back to the pending pool.
pub async fn admin_delete_user(conn: &mut DbConn, actor_id: i64, target_id: i64) -> AgriResult<()> {
    if actor_id == target_id {
        return Err(AgriError::Validation("Cannot delete your own account".to_string()));
    }
    let user = get_profile(conn, target_id).await?;

    let released = release_accepted(conn, target_id).await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(target_id)
        .execute(&mut *conn)
        .await?;

    log_system_action(
        conn,
        actor_id,
        "admin_delete_user",
        &format!(
            "deleted {} {} ({}), released {} accepted request(s)",
            user.role, user.id, user.email, released
        ),
    )
    .await?;
    Ok(())
}

pub async fn list_users(conn: &mut DbConn, role: Option<Role>) -> AgriResult<Vec<User>> {
    let users = match role {
        Some(role) => {
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE role = ? ORDER BY id ASC")
                .bind(role)
                .fetch_all(&mut *conn)
                .await?
        }
        None => {
            sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id ASC")
                .fetch_all(&mut *conn)
                .await?
        }
    };
    Ok(users)
}

pub async fn get_operator(conn: &mut DbConn, operator_id: i64) -> AgriResult<User> {
    match find_user(conn, operator_id).await? {
        Some(user) if user.role == Role::Operator => Ok(user),
        _ => Err(AgriError::NotFound("Operator not found".to_string())),
    }
}

/// Farmers must send both coordinates; operators may also toggle availability and radius,
/// and their coordinate is only replaced when both halves are present.
pub async fn update_location(
    conn: &mut DbConn,
    user_id: i64,
    patch: LocationUpdate,
) -> AgriResult<User> {
    let mut user = get_profile(conn, user_id).await?;

    match (patch.latitude, patch.longitude) {
        (Some(lat), Some(lon)) => {
            user.latitude = Some(validate::latitude(lat)?);
            user.longitude = Some(validate::longitude(lon)?);
        }
        _ if user.role == Role::Farmer => {
            return Err(AgriError::Validation(
                "Latitude and longitude are required".to_string(),
            ));
        }
        _ => {}
    }

    if user.role == Role::Operator {
        if let Some(is_available) = patch.is_available {
            user.is_available = is_available;
        }
        if let Some(radius) = patch.service_radius {
            user.service_radius = Some(validate::positive("Service radius", radius)?);
        }
    }

    save_user(conn, &user).await?;
    get_profile(conn, user_id).await
}

// Axum Handlers

pub async fn register_axum(
    AxumState(state): AxumState<AppState>,
    Json(input): Json<RegisterInput>,
) -> AgriResult<(StatusCode, Json<AuthResponse>)> {
    let mut tx = begin_write(&state.pool).await?;
    let user = register(&mut tx, &state.config, input).await?;
    tx.commit().await?;

    let access_token = issue_token(&state.config, &user)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserView::from(&user),
            access_token,
        }),
    ))
}

pub async fn login_axum(
    AxumState(state): AxumState<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AgriResult<Json<AuthResponse>> {
    let mut conn = state.pool.acquire().await?;
    let user = authenticate(&mut conn, &state.config, &payload.email, &payload.password).await?;
    let access_token = issue_token(&state.config, &user)?;
    Ok(Json(AuthResponse {
        user: UserView::from(&user),
        access_token,
    }))
}

pub async fn get_profile_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
) -> AgriResult<Json<UserView>> {
    let mut conn = state.pool.acquire().await?;
    let user = authorize(&mut conn, &claims, &ALL_ROLES).await?;
    Ok(Json(UserView::from(&user)))
}

pub async fn update_profile_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<ProfileUpdate>,
) -> AgriResult<Json<UserView>> {
    let mut tx = begin_write(&state.pool).await?;
    let caller = authorize(&mut tx, &claims, &ALL_ROLES).await?;
    let user = update_profile(&mut tx, &state.config, caller.id, patch).await?;
    tx.commit().await?;
    Ok(Json(UserView::from(&user)))
}

pub async fn get_operator_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(operator_id): Path<i64>,
) -> AgriResult<Json<UserView>> {
    let mut conn = state.pool.acquire().await?;
    authorize(&mut conn, &claims, &[Role::Farmer]).await?;
    let operator = get_operator(&mut conn, operator_id).await?;
    Ok(Json(UserView::from(&operator)))
}

pub async fn update_farmer_location_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<LocationUpdate>,
) -> AgriResult<Json<UserView>> {
    let mut tx = begin_write(&state.pool).await?;
    let caller = authorize(&mut tx, &claims, &[Role::Farmer]).await?;
    let user = update_location(&mut tx, caller.id, patch).await?;
    tx.commit().await?;
    Ok(Json(UserView::from(&user)))
}

pub async fn update_operator_location_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<LocationUpdate>,
) -> AgriResult<Json<UserView>> {
    let mut tx = begin_write(&state.pool).await?;
    let caller = authorize(&mut tx, &claims, &[Role::Operator]).await?;
    let user = update_location(&mut tx, caller.id, patch).await?;
    tx.commit().await?;
    Ok(Json(UserView::from(&user)))
}

#[derive(Debug, Default, Deserialize)]
pub struct AvailabilityUpdate {
    pub is_available: Option<bool>,
}

/// Availability calendars are not modelled; only the on/off flag is stored.
pub async fn update_availability_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AvailabilityUpdate>,
) -> AgriResult<Json<UserView>> {
    let mut tx = begin_write(&state.pool).await?;
    let caller = authorize(&mut tx, &claims, &[Role::Operator]).await?;
    let patch = LocationUpdate {
        is_available: payload.is_available,
        ..Default::default()
    };
    let user = update_location(&mut tx, caller.id, patch).await?;
    tx.commit().await?;
    Ok(Json(UserView::from(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_role(role: Role) -> User {
        let now = Utc::now();
        User {
            id: 1,
            email: "u@x.com".into(),
            password_hash: "secret-hash".into(),
            first_name: "U".into(),
            last_name: "X".into(),
            phone: None,
            role,
            is_premium: false,
            latitude: Some(40.0),
            longitude: Some(-74.0),
            is_available: true,
            service_radius: Some(50.0),
            hourly_rate: Some(75.0),
            service_details: Some("DJI Agras T30".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_view_masks_operator_fields_for_other_roles() {
        let farmer = UserView::from(&user_with_role(Role::Farmer));
        assert_eq!(farmer.is_available, None);
        assert_eq!(farmer.service_radius, None);
        assert_eq!(farmer.hourly_rate, None);
        assert_eq!(farmer.service_details, None);
        assert_eq!(farmer.latitude, Some(40.0));

        let admin = UserView::from(&user_with_role(Role::Admin));
        assert_eq!(admin.latitude, None);
        assert_eq!(admin.service_radius, None);

        let operator = UserView::from(&user_with_role(Role::Operator));
        assert_eq!(operator.is_available, Some(true));
        assert_eq!(operator.service_radius, Some(50.0));
        assert_eq!(operator.service_details.as_deref(), Some("DJI Agras T30"));
    }

    #[test]
    fn test_view_never_serializes_password() {
        let json = serde_json::to_value(UserView::from(&user_with_role(Role::Farmer))).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(!json.to_string().contains("secret-hash"));
    }

    #[test]
    fn test_profile_patch_ignores_operator_fields_for_farmer() {
        let config = Config::for_tests();
        let mut farmer = user_with_role(Role::Farmer);
        farmer.service_radius = None;
        let patch = ProfileUpdate {
            phone: Some("555-123-4567".into()),
            service_radius: Some(10.0),
            latitude: Some(1.0),
            ..Default::default()
        };
        apply_profile(&config, &mut farmer, patch).unwrap();
        assert_eq!(farmer.phone.as_deref(), Some("555-123-4567"));
        assert_eq!(farmer.service_radius, None);
        assert_eq!(farmer.latitude, Some(40.0));
        assert_eq!(farmer.first_name, "U");
    }

    #[test]
    fn test_profile_patch_rejects_blank_name() {
        let config = Config::for_tests();
        let mut user = user_with_role(Role::Operator);
        let patch = ProfileUpdate {
            first_name: Some("   ".into()),
            ..Default::default()
        };
        assert!(matches!(
            apply_profile(&config, &mut user, patch),
            Err(AgriError::Validation(_))
        ));
    }

    #[test]
    fn test_profile_patch_has_no_role() {
        // A role smuggled into the self-service payload is simply not part of the struct.
        let patch: ProfileUpdate =
            serde_json::from_str(r#"{"first_name":"Jane","role":"admin"}"#).unwrap();
        assert_eq!(patch.first_name.as_deref(), Some("Jane"));
    }
}
