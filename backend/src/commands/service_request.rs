use crate::commands::field::{find_field, get_field};
use crate::commands::validate;
use crate::db::{begin_write, DbConn, Field, RequestStatus, Role, ServiceRequest};
use crate::error::{AgriError, AgriResult};
use crate::middleware::auth::{authorize, Claims};
use crate::state::AppState;
use axum::{
    extract::{Path, State as AxumState},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRequestInput {
    pub field_id: i64,
    pub service_type: String,
    pub scheduled_date: String,
    pub notes: Option<String>,
}

/// Farmer-side edits, only honoured while the request is still pending.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceRequestUpdate {
    pub field_id: Option<i64>,
    pub service_type: Option<String>,
    pub scheduled_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceRequestDetail {
    pub service_request: ServiceRequest,
    pub field: Option<Field>,
}

pub async fn find_request(conn: &mut DbConn, request_id: i64) -> AgriResult<Option<ServiceRequest>> {
    Ok(
        sqlx::query_as::<_, ServiceRequest>("SELECT * FROM service_requests WHERE id = ?")
            .bind(request_id)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

fn not_found() -> AgriError {
    AgriError::NotFound("Service request not found".to_string())
}

async fn require_owned_field(conn: &mut DbConn, farmer_id: i64, field_id: i64) -> AgriResult<()> {
    match get_field(conn, farmer_id, field_id).await {
        Ok(_) => Ok(()),
        Err(AgriError::NotFound(_)) => Err(AgriError::NotFound(
            "Field not found or not owned by you".to_string(),
        )),
        Err(e) => Err(e),
    }
}

pub async fn create_request(
    conn: &mut DbConn,
    farmer_id: i64,
    input: ServiceRequestInput,
) -> AgriResult<ServiceRequest> {
    require_owned_field(conn, farmer_id, input.field_id).await?;
    let service_type = validate::non_empty("Service type", &input.service_type)?;
    let scheduled_date = validate::parse_date("scheduled date", &input.scheduled_date)?;
    let now = Utc::now();

    let request_id = sqlx::query(
        "INSERT INTO service_requests (
            field_id, farmer_id, operator_id, service_type, status, scheduled_date, notes, created_at, updated_at
        ) VALUES (?, ?, NULL, ?, 'pending', ?, ?, ?, ?)",
    )
    .bind(input.field_id)
    .bind(farmer_id)
    .bind(service_type)
    .bind(scheduled_date)
    .bind(input.notes)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    tracing::info!("Farmer {} opened service request {}", farmer_id, request_id);
    find_request(conn, request_id).await?.ok_or_else(not_found)
}

pub async fn get_for_farmer(
    conn: &mut DbConn,
    farmer_id: i64,
    request_id: i64,
) -> AgriResult<ServiceRequest> {
    match find_request(conn, request_id).await? {
        Some(r) if r.farmer_id == farmer_id => Ok(r),
        _ => Err(not_found()),
    }
}

pub async fn farmer_update(
    conn: &mut DbConn,
    farmer_id: i64,
    request_id: i64,
    patch: ServiceRequestUpdate,
) -> AgriResult<ServiceRequest> {
    let mut request = get_for_farmer(conn, farmer_id, request_id).await?;
    if request.status != RequestStatus::Pending {
        return Err(AgriError::InvalidState(format!(
            "Cannot update a service request that is {}",
            request.status
        )));
    }

    if let Some(field_id) = patch.field_id {
        require_owned_field(conn, farmer_id, field_id).await?;
        request.field_id = field_id;
    }
    if let Some(service_type) = patch.service_type {
        request.service_type = validate::non_empty("Service type", &service_type)?;
    }
    if let Some(date) = patch.scheduled_date {
        request.scheduled_date = validate::parse_date("scheduled date", &date)?;
    }
    if let Some(notes) = patch.notes {
        request.notes = Some(notes);
    }

    // Guarded on status so an accept committed in between wins.
    let updated = sqlx::query(
        "UPDATE service_requests SET field_id = ?, service_type = ?, scheduled_date = ?, notes = ?, updated_at = ?
         WHERE id = ? AND farmer_id = ? AND status = 'pending' AND operator_id IS NULL",
    )
    .bind(request.field_id)
    .bind(&request.service_type)
    .bind(request.scheduled_date)
    .bind(&request.notes)
    .bind(Utc::now())
    .bind(request_id)
    .bind(farmer_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(AgriError::InvalidState(
            "Service request is no longer pending".to_string(),
        ));
    }

    get_for_farmer(conn, farmer_id, request_id).await
}

pub async fn farmer_cancel(
    conn: &mut DbConn,
    farmer_id: i64,
    request_id: i64,
) -> AgriResult<ServiceRequest> {
    let request = get_for_farmer(conn, farmer_id, request_id).await?;
    if !request.status.can_transition_to(RequestStatus::Cancelled) {
        return Err(AgriError::InvalidState(format!(
            "Cannot cancel a service request that is {}",
            request.status
        )));
    }

    let updated = sqlx::query(
        "UPDATE service_requests SET status = 'cancelled', updated_at = ?
         WHERE id = ? AND farmer_id = ? AND status = 'pending' AND operator_id IS NULL",
    )
    .bind(Utc::now())
    .bind(request_id)
    .bind(farmer_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(AgriError::InvalidState(
            "Service request is no longer pending".to_string(),
        ));
    }

    tracing::info!("Farmer {} cancelled service request {}", farmer_id, request_id);
    get_for_farmer(conn, farmer_id, request_id).await
}

pub async fn list_available(conn: &mut DbConn) -> AgriResult<Vec<ServiceRequest>> {
    Ok(sqlx::query_as::<_, ServiceRequest>(
        "SELECT * FROM service_requests WHERE status = 'pending' AND operator_id IS NULL ORDER BY scheduled_date ASC, id ASC",
    )
    .fetch_all(&mut *conn)
    .await?)
}

/// Claims a pending, unclaimed request for `operator_id`.
///
/// The claim is a single conditional UPDATE, so of several concurrent callers exactly
/// one sees a changed row; the others get `Conflict`.
pub async fn accept(conn: &mut DbConn, operator_id: i64, request_id: i64) -> AgriResult<ServiceRequest> {
    let claimed = sqlx::query(
        "UPDATE service_requests SET operator_id = ?, status = 'accepted', updated_at = ?
         WHERE id = ? AND status = 'pending' AND operator_id IS NULL",
    )
    .bind(operator_id)
    .bind(Utc::now())
    .bind(request_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if claimed == 0 {
        return match find_request(conn, request_id).await? {
            None => Err(not_found()),
            Some(r) if r.operator_id.is_some() => Err(AgriError::Conflict(
                "Service request has already been claimed".to_string(),
            )),
            Some(r) => Err(AgriError::InvalidState(format!(
                "Cannot accept a service request that is {}",
                r.status
            ))),
        };
    }

    tracing::info!("Operator {} accepted service request {}", operator_id, request_id);
    find_request(conn, request_id).await?.ok_or_else(not_found)
}

pub async fn complete(
    conn: &mut DbConn,
    operator_id: i64,
    request_id: i64,
) -> AgriResult<ServiceRequest> {
    let now = Utc::now();
    let completed = sqlx::query(
        "UPDATE service_requests SET status = 'completed', completed_at = ?, updated_at = ?
         WHERE id = ? AND operator_id = ? AND status = 'accepted'",
    )
    .bind(now)
    .bind(now)
    .bind(request_id)
    .bind(operator_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if completed == 0 {
        return match find_request(conn, request_id).await? {
            Some(r) if r.operator_id == Some(operator_id) => Err(AgriError::InvalidState(
                format!("Cannot complete a service request that is {}", r.status),
            )),
            _ => Err(AgriError::NotFound(
                "Service request not found or not assigned to you".to_string(),
            )),
        };
    }

    tracing::info!("Operator {} completed service request {}", operator_id, request_id);
    find_request(conn, request_id).await?.ok_or_else(not_found)
}

/// Operators may read their own requests and anything still up for grabs.
pub async fn get_for_operator(
    conn: &mut DbConn,
    operator_id: i64,
    request_id: i64,
) -> AgriResult<ServiceRequestDetail> {
    let request = match find_request(conn, request_id).await? {
        Some(r) if r.operator_id == Some(operator_id) => r,
        Some(r) if r.status == RequestStatus::Pending && r.operator_id.is_none() => r,
        _ => {
            return Err(AgriError::NotFound(
                "Service request not found or not accessible".to_string(),
            ))
        }
    };
    let field = find_field(conn, request.field_id).await?;
    Ok(ServiceRequestDetail {
        service_request: request,
        field,
    })
}

pub async fn list_for_farmer(conn: &mut DbConn, farmer_id: i64) -> AgriResult<Vec<ServiceRequest>> {
    Ok(sqlx::query_as::<_, ServiceRequest>(
        "SELECT * FROM service_requests WHERE farmer_id = ? ORDER BY id ASC",
    )
    .bind(farmer_id)
    .fetch_all(&mut *conn)
    .await?)
}

pub async fn list_for_operator(
    conn: &mut DbConn,
    operator_id: i64,
) -> AgriResult<Vec<ServiceRequest>> {
    Ok(sqlx::query_as::<_, ServiceRequest>(
        "SELECT * FROM service_requests WHERE operator_id = ? ORDER BY id ASC",
    )
    .bind(operator_id)
    .fetch_all(&mut *conn)
    .await?)
}

pub async fn list_all(
    conn: &mut DbConn,
    status: Option<RequestStatus>,
) -> AgriResult<Vec<ServiceRequest>> {
    let requests = match status {
        Some(status) => {
            sqlx::query_as::<_, ServiceRequest>(
                "SELECT * FROM service_requests WHERE status = ? ORDER BY id ASC",
            )
            .bind(status)
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, ServiceRequest>("SELECT * FROM service_requests ORDER BY id ASC")
                .fetch_all(&mut *conn)
                .await?
        }
    };
    Ok(requests)
}

// Axum Handlers

pub async fn list_farmer_requests_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
) -> AgriResult<Json<Vec<ServiceRequest>>> {
    let mut conn = state.pool.acquire().await?;
    let farmer = authorize(&mut conn, &claims, &[Role::Farmer]).await?;
    Ok(Json(list_for_farmer(&mut conn, farmer.id).await?))
}

pub async fn create_request_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Json(input): Json<ServiceRequestInput>,
) -> AgriResult<(StatusCode, Json<ServiceRequest>)> {
    let mut tx = begin_write(&state.pool).await?;
    let farmer = authorize(&mut tx, &claims, &[Role::Farmer]).await?;
    let request = create_request(&mut tx, farmer.id, input).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn get_farmer_request_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
) -> AgriResult<Json<ServiceRequest>> {
    let mut conn = state.pool.acquire().await?;
    let farmer = authorize(&mut conn, &claims, &[Role::Farmer]).await?;
    Ok(Json(get_for_farmer(&mut conn, farmer.id, request_id).await?))
}

pub async fn update_farmer_request_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
    Json(patch): Json<ServiceRequestUpdate>,
) -> AgriResult<Json<ServiceRequest>> {
    let mut tx = begin_write(&state.pool).await?;
    let farmer = authorize(&mut tx, &claims, &[Role::Farmer]).await?;
    let request = farmer_update(&mut tx, farmer.id, request_id, patch).await?;
    tx.commit().await?;
    Ok(Json(request))
}

pub async fn cancel_request_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
) -> AgriResult<Json<ServiceRequest>> {
    let mut tx = begin_write(&state.pool).await?;
    let farmer = authorize(&mut tx, &claims, &[Role::Farmer]).await?;
    let request = farmer_cancel(&mut tx, farmer.id, request_id).await?;
    tx.commit().await?;
    Ok(Json(request))
}

pub async fn list_available_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
) -> AgriResult<Json<Vec<ServiceRequest>>> {
    let mut conn = state.pool.acquire().await?;
    authorize(&mut conn, &claims, &[Role::Operator]).await?;
    Ok(Json(list_available(&mut conn).await?))
}

pub async fn list_operator_requests_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
) -> AgriResult<Json<Vec<ServiceRequest>>> {
    let mut conn = state.pool.acquire().await?;
    let operator = authorize(&mut conn, &claims, &[Role::Operator]).await?;
    Ok(Json(list_for_operator(&mut conn, operator.id).await?))
}

pub async fn get_operator_request_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
) -> AgriResult<Json<ServiceRequestDetail>> {
    let mut conn = state.pool.acquire().await?;
    let operator = authorize(&mut conn, &claims, &[Role::Operator]).await?;
    Ok(Json(get_for_operator(&mut conn, operator.id, request_id).await?))
}

pub async fn accept_request_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
) -> AgriResult<Json<ServiceRequest>> {
    let mut tx = begin_write(&state.pool).await?;
    let operator = authorize(&mut tx, &claims, &[Role::Operator]).await?;
    let request = accept(&mut tx, operator.id, request_id).await?;
    tx.commit().await?;
    Ok(Json(request))
}

pub async fn complete_request_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
) -> AgriResult<Json<ServiceRequest>> {
    let mut tx = begin_write(&state.pool).await?;
    let operator = authorize(&mut tx, &claims, &[Role::Operator]).await?;
    let request = complete(&mut tx, operator.id, request_id).await?;
    tx.commit().await?;
    Ok(Json(request))
}
