use crate::commands::audit::{list_audit_entries, log_system_action};
use crate::commands::identity::{self, AdminUserUpdate, UserView};
use crate::commands::service_request::{find_request, list_all};
use crate::db::{begin_write, AuditEntry, DbConn, RequestStatus, Role, ServiceRequest};
use crate::error::{AgriError, AgriResult};
use crate::middleware::auth::{authorize, Claims};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State as AxumState},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

/// Administrative override of a request. Bypasses the lifecycle guards.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminRequestUpdate {
    pub status: Option<RequestStatus>,
    /// `Some(None)` clears the assignment, `None` leaves it untouched.
    #[serde(default, deserialize_with = "deserialize_some")]
    pub operator_id: Option<Option<i64>>,
    pub notes: Option<String>,
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UserStats {
    pub farmers: i64,
    pub operators: i64,
    pub admins: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RequestStats {
    pub pending: i64,
    pub accepted: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DashboardStats {
    pub users: UserStats,
    pub service_requests: RequestStats,
    pub fields: i64,
}

fn parse_filter<T: std::str::FromStr<Err = AgriError>>(raw: Option<String>) -> AgriResult<Option<T>> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| s.parse())
        .transpose()
}

pub async fn get_stats(conn: &mut DbConn) -> AgriResult<DashboardStats> {
    let role_counts: Vec<(Role, i64)> =
        sqlx::query_as("SELECT role, COUNT(*) FROM users GROUP BY role")
            .fetch_all(&mut *conn)
            .await?;
    let status_counts: Vec<(RequestStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM service_requests GROUP BY status")
            .fetch_all(&mut *conn)
            .await?;
    let fields: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fields")
        .fetch_one(&mut *conn)
        .await?;

    let role = |r: Role| {
        role_counts
            .iter()
            .find(|(k, _)| *k == r)
            .map_or(0, |(_, n)| *n)
    };
    let status = |s: RequestStatus| {
        status_counts
            .iter()
            .find(|(k, _)| *k == s)
            .map_or(0, |(_, n)| *n)
    };

    let users = UserStats {
        farmers: role(Role::Farmer),
        operators: role(Role::Operator),
        admins: role(Role::Admin),
        total: role_counts.iter().map(|(_, n)| n).sum(),
    };
    let service_requests = RequestStats {
        pending: status(RequestStatus::Pending),
        accepted: status(RequestStatus::Accepted),
        completed: status(RequestStatus::Completed),
        cancelled: status(RequestStatus::Cancelled),
        total: status_counts.iter().map(|(_, n)| n).sum(),
    };

    Ok(DashboardStats {
        users,
        service_requests,
        fields: fields.0,
    })
}

pub async fn admin_get_request(conn: &mut DbConn, request_id: i64) -> AgriResult<ServiceRequest> {
    find_request(conn, request_id)
        .await?
        .ok_or_else(|| AgriError::NotFound("Service request not found".to_string()))
}

/// Unrestricted update, recorded in the audit log. `completed_at` follows the status.
pub async fn admin_update_request(
    conn: &mut DbConn,
    actor_id: i64,
    request_id: i64,
    patch: AdminRequestUpdate,
) -> AgriResult<ServiceRequest> {
    let mut request = admin_get_request(conn, request_id).await?;
    let before = (request.status, request.operator_id);

    if let Some(operator_id) = patch.operator_id {
        if let Some(id) = operator_id {
            match identity::get_operator(conn, id).await {
                Ok(_) => {}
                Err(AgriError::NotFound(_)) => {
                    return Err(AgriError::Validation(format!(
                        "User {} is not an operator",
                        id
                    )))
                }
                Err(e) => return Err(e),
            }
        }
        request.operator_id = operator_id;
    }
    if let Some(status) = patch.status {
        request.status = status;
        request.completed_at = match status {
            RequestStatus::Completed => request.completed_at.or_else(|| Some(Utc::now())),
            _ => None,
        };
    }
    if let Some(notes) = patch.notes {
        request.notes = Some(notes);
    }

    sqlx::query(
        "UPDATE service_requests SET status = ?, operator_id = ?, notes = ?, completed_at = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(request.status)
    .bind(request.operator_id)
    .bind(&request.notes)
    .bind(request.completed_at)
    .bind(Utc::now())
    .bind(request_id)
    .execute(&mut *conn)
    .await?;

    log_system_action(
        conn,
        actor_id,
        "admin_update_request",
        &format!(
            "request {}: status {} -> {}, operator {:?} -> {:?}",
            request_id, before.0, request.status, before.1, request.operator_id
        ),
    )
    .await?;

    admin_get_request(conn, request_id).await
}

// Axum Handlers

pub async fn list_users_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Query(filter): Query<UserFilter>,
) -> AgriResult<Json<Vec<UserView>>> {
    let mut conn = state.pool.acquire().await?;
    authorize(&mut conn, &claims, &[Role::Admin]).await?;
    let role = parse_filter::<Role>(filter.role)?;
    let users = identity::list_users(&mut conn, role).await?;
    Ok(Json(users.iter().map(UserView::from).collect()))
}

pub async fn get_user_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
) -> AgriResult<Json<UserView>> {
    let mut conn = state.pool.acquire().await?;
    authorize(&mut conn, &claims, &[Role::Admin]).await?;
    let user = identity::get_profile(&mut conn, user_id).await?;
    Ok(Json(UserView::from(&user)))
}

pub async fn update_user_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
    Json(patch): Json<AdminUserUpdate>,
) -> AgriResult<Json<UserView>> {
    let mut tx = begin_write(&state.pool).await?;
    let admin = authorize(&mut tx, &claims, &[Role::Admin]).await?;
    let user = identity::admin_update_user(&mut tx, &state.config, admin.id, user_id, patch).await?;
    tx.commit().await?;
    Ok(Json(UserView::from(&user)))
}

pub async fn delete_user_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
) -> AgriResult<Json<()>> {
    let mut tx = begin_write(&state.pool).await?;
    let admin = authorize(&mut tx, &claims, &[Role::Admin]).await?;
    identity::admin_delete_user(&mut tx, admin.id, user_id).await?;
    tx.commit().await?;
    Ok(Json(()))
}

pub async fn list_operators_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
) -> AgriResult<Json<Vec<UserView>>> {
    let mut conn = state.pool.acquire().await?;
    authorize(&mut conn, &claims, &[Role::Admin]).await?;
    let operators = identity::list_users(&mut conn, Some(Role::Operator)).await?;
    Ok(Json(operators.iter().map(UserView::from).collect()))
}

pub async fn list_requests_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Query(filter): Query<StatusFilter>,
) -> AgriResult<Json<Vec<ServiceRequest>>> {
    let mut conn = state.pool.acquire().await?;
    authorize(&mut conn, &claims, &[Role::Admin]).await?;
    let status = parse_filter::<RequestStatus>(filter.status)?;
    Ok(Json(list_all(&mut conn, status).await?))
}

pub async fn get_request_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
) -> AgriResult<Json<ServiceRequest>> {
    let mut conn = state.pool.acquire().await?;
    authorize(&mut conn, &claims, &[Role::Admin]).await?;
    Ok(Json(admin_get_request(&mut conn, request_id).await?))
}

pub async fn update_request_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
    Json(patch): Json<AdminRequestUpdate>,
) -> AgriResult<Json<ServiceRequest>> {
    let mut tx = begin_write(&state.pool).await?;
    let admin = authorize(&mut tx, &claims, &[Role::Admin]).await?;
    let request = admin_update_request(&mut tx, admin.id, request_id, patch).await?;
    tx.commit().await?;
    Ok(Json(request))
}

pub async fn get_stats_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
) -> AgriResult<Json<DashboardStats>> {
    let mut conn = state.pool.acquire().await?;
    authorize(&mut conn, &claims, &[Role::Admin]).await?;
    Ok(Json(get_stats(&mut conn).await?))
}

pub async fn list_audit_log_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<AuditQuery>,
) -> AgriResult<Json<Vec<AuditEntry>>> {
    let mut conn = state.pool.acquire().await?;
    authorize(&mut conn, &claims, &[Role::Admin]).await?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    Ok(Json(list_audit_entries(&mut conn, limit).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_id_patch_distinguishes_null_from_absent() {
        let absent: AdminRequestUpdate = serde_json::from_str(r#"{"notes":"x"}"#).unwrap();
        assert_eq!(absent.operator_id, None);

        let cleared: AdminRequestUpdate = serde_json::from_str(r#"{"operator_id":null}"#).unwrap();
        assert_eq!(cleared.operator_id, Some(None));

        let set: AdminRequestUpdate = serde_json::from_str(r#"{"operator_id":7}"#).unwrap();
        assert_eq!(set.operator_id, Some(Some(7)));
    }

    #[test]
    fn test_filters_reject_unknown_values() {
        assert_eq!(parse_filter::<Role>(None).unwrap(), None);
        assert_eq!(parse_filter::<Role>(Some("".into())).unwrap(), None);
        assert_eq!(
            parse_filter::<RequestStatus>(Some("pending".into())).unwrap(),
            Some(RequestStatus::Pending)
        );
        assert!(matches!(
            parse_filter::<RequestStatus>(Some("finished".into())),
            Err(AgriError::Validation(_))
        ));
    }
}
