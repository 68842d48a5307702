use crate::commands::validate;
use crate::db::{begin_write, DbConn, Field, Role};
use crate::error::{AgriError, AgriResult};
use crate::middleware::auth::{authorize, Claims};
use crate::state::AppState;
use axum::{
    extract::{Path, State as AxumState},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FieldInput {
    pub name: String,
    pub description: Option<String>,
    pub area: Option<f64>,
    pub coordinates: String,
    pub crop_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub area: Option<f64>,
    pub coordinates: Option<String>,
    pub crop_type: Option<String>,
}

pub async fn create_field(conn: &mut DbConn, owner_id: i64, input: FieldInput) -> AgriResult<Field> {
    let name = validate::non_empty("Field name", &input.name)?;
    let coordinates = validate::non_empty("Coordinates", &input.coordinates)?;
    let area = input
        .area
        .map(|a| validate::positive("Area", a))
        .transpose()?;
    let now = Utc::now();

    let field_id = sqlx::query(
        "INSERT INTO fields (name, description, area, coordinates, crop_type, user_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(input.description)
    .bind(area)
    .bind(coordinates)
    .bind(input.crop_type)
    .bind(owner_id)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    get_field(conn, owner_id, field_id).await
}

pub async fn list_fields(conn: &mut DbConn, owner_id: i64) -> AgriResult<Vec<Field>> {
    Ok(
        sqlx::query_as::<_, Field>("SELECT * FROM fields WHERE user_id = ? ORDER BY id ASC")
            .bind(owner_id)
            .fetch_all(&mut *conn)
            .await?,
    )
}

/// Absent and foreign-owned fields are indistinguishable to the caller.
pub async fn get_field(conn: &mut DbConn, owner_id: i64, field_id: i64) -> AgriResult<Field> {
    sqlx::query_as::<_, Field>("SELECT * FROM fields WHERE id = ? AND user_id = ?")
        .bind(field_id)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AgriError::NotFound("Field not found".to_string()))
}

/// Unscoped lookup for readers that are not the owner (operators, admins).
pub async fn find_field(conn: &mut DbConn, field_id: i64) -> AgriResult<Option<Field>> {
    Ok(sqlx::query_as::<_, Field>("SELECT * FROM fields WHERE id = ?")
        .bind(field_id)
        .fetch_optional(&mut *conn)
        .await?)
}

pub async fn update_field(
    conn: &mut DbConn,
    owner_id: i64,
    field_id: i64,
    patch: FieldUpdate,
) -> AgriResult<Field> {
    let mut field = get_field(conn, owner_id, field_id).await?;

    if let Some(name) = patch.name {
        field.name = validate::non_empty("Field name", &name)?;
    }
    if let Some(description) = patch.description {
        field.description = Some(description);
    }
    if let Some(area) = patch.area {
        field.area = Some(validate::positive("Area", area)?);
    }
    if let Some(coordinates) = patch.coordinates {
        field.coordinates = validate::non_empty("Coordinates", &coordinates)?;
    }
    if let Some(crop_type) = patch.crop_type {
        field.crop_type = Some(crop_type);
    }

    sqlx::query(
        "UPDATE fields SET name = ?, description = ?, area = ?, coordinates = ?, crop_type = ?, updated_at = ?
         WHERE id = ? AND user_id = ?",
    )
    .bind(&field.name)
    .bind(&field.description)
    .bind(field.area)
    .bind(&field.coordinates)
    .bind(&field.crop_type)
    .bind(Utc::now())
    .bind(field_id)
    .bind(owner_id)
    .execute(&mut *conn)
    .await?;

    get_field(conn, owner_id, field_id).await
}

/// Refused while a pending or accepted request still targets the field; terminal
/// requests are removed together with it.
pub async fn delete_field(conn: &mut DbConn, owner_id: i64, field_id: i64) -> AgriResult<()> {
    get_field(conn, owner_id, field_id).await?;

    let open: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM service_requests WHERE field_id = ? AND status IN ('pending', 'accepted')",
    )
    .bind(field_id)
    .fetch_one(&mut *conn)
    .await?;
    if open.0 > 0 {
        return Err(AgriError::InvalidState(format!(
            "Field has {} open service request(s); cancel or complete them first",
            open.0
        )));
    }

    sqlx::query("DELETE FROM fields WHERE id = ? AND user_id = ?")
        .bind(field_id)
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// Axum Handlers

pub async fn list_fields_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
) -> AgriResult<Json<Vec<Field>>> {
    let mut conn = state.pool.acquire().await?;
    let farmer = authorize(&mut conn, &claims, &[Role::Farmer]).await?;
    Ok(Json(list_fields(&mut conn, farmer.id).await?))
}

pub async fn create_field_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Json(input): Json<FieldInput>,
) -> AgriResult<(StatusCode, Json<Field>)> {
    let mut tx = begin_write(&state.pool).await?;
    let farmer = authorize(&mut tx, &claims, &[Role::Farmer]).await?;
    let field = create_field(&mut tx, farmer.id, input).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(field)))
}

pub async fn get_field_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(field_id): Path<i64>,
) -> AgriResult<Json<Field>> {
    let mut conn = state.pool.acquire().await?;
    let farmer = authorize(&mut conn, &claims, &[Role::Farmer]).await?;
    Ok(Json(get_field(&mut conn, farmer.id, field_id).await?))
}

pub async fn update_field_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(field_id): Path<i64>,
    Json(patch): Json<FieldUpdate>,
) -> AgriResult<Json<Field>> {
    let mut tx = begin_write(&state.pool).await?;
    let farmer = authorize(&mut tx, &claims, &[Role::Farmer]).await?;
    let field = update_field(&mut tx, farmer.id, field_id, patch).await?;
    tx.commit().await?;
    Ok(Json(field))
}

pub async fn delete_field_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Path(field_id): Path<i64>,
) -> AgriResult<Json<()>> {
    let mut tx = begin_write(&state.pool).await?;
    let farmer = authorize(&mut tx, &claims, &[Role::Farmer]).await?;
    delete_field(&mut tx, farmer.id, field_id).await?;
    tx.commit().await?;
    Ok(Json(()))
}
