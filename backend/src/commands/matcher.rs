//! Operator lookup by planar distance.
//!
//! Distances use a flat approximation: the Euclidean norm of the coordinate delta in
//! degrees, scaled by 111 km per degree. It degrades away from the equator, near the
//! poles and across the antimeridian; callers get exactly this figure, not a geodesic one.

use crate::commands::identity::UserView;
use crate::commands::validate;
use crate::db::{DbConn, Role, User};
use crate::error::{AgriError, AgriResult};
use crate::middleware::auth::{authorize, Claims};
use crate::state::AppState;
use axum::{
    extract::{Query, State as AxumState},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

pub const KM_PER_DEGREE: f64 = 111.0;
pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 50.0;

#[derive(Debug, Clone, Serialize)]
pub struct NearbyOperator {
    #[serde(flatten)]
    pub operator: UserView,
    /// Kilometres, rounded to two decimals.
    pub distance: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct NearbyQuery {
    #[serde(alias = "lat")]
    pub latitude: Option<f64>,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
}

pub fn approximate_distance_km(lat: f64, lon: f64, other_lat: f64, other_lon: f64) -> f64 {
    ((other_lat - lat).powi(2) + (other_lon - lon).powi(2)).sqrt() * KM_PER_DEGREE
}

/// Keeps available operators that are within both the search radius and their own
/// service radius, nearest first. Equal distances keep the input order.
pub fn filter_nearby(
    operators: Vec<User>,
    lat: f64,
    lon: f64,
    search_radius_km: f64,
) -> Vec<NearbyOperator> {
    let mut hits: Vec<(f64, User)> = operators
        .into_iter()
        .filter(|op| op.role == Role::Operator && op.is_available)
        .filter_map(|op| {
            let (op_lat, op_lon) = (op.latitude?, op.longitude?);
            let distance = approximate_distance_km(lat, lon, op_lat, op_lon);
            let service_radius = op.service_radius.unwrap_or(0.0);
            (distance <= search_radius_km && distance <= service_radius).then_some((distance, op))
        })
        .collect();

    hits.sort_by(|a, b| a.0.total_cmp(&b.0));

    hits.into_iter()
        .map(|(distance, op)| NearbyOperator {
            operator: UserView::from(&op),
            distance: (distance * 100.0).round() / 100.0,
        })
        .collect()
}

pub async fn find_nearby(
    conn: &mut DbConn,
    lat: f64,
    lon: f64,
    search_radius_km: f64,
) -> AgriResult<Vec<NearbyOperator>> {
    let candidates = sqlx::query_as::<_, User>(
        "SELECT * FROM users
         WHERE role = 'operator' AND is_available = 1
           AND latitude IS NOT NULL AND longitude IS NOT NULL
         ORDER BY id ASC",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(filter_nearby(candidates, lat, lon, search_radius_km))
}

// Axum Handlers

/// Falls back to the farmer's stored location when the query carries no coordinate.
pub async fn find_nearby_operators_axum(
    AxumState(state): AxumState<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<NearbyQuery>,
) -> AgriResult<Json<Vec<NearbyOperator>>> {
    let mut conn = state.pool.acquire().await?;
    let farmer = authorize(&mut conn, &claims, &[Role::Farmer]).await?;

    let (lat, lon) = match (params.latitude, params.longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        (None, None) => match (farmer.latitude, farmer.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(AgriError::Validation(
                    "Latitude and longitude are required".to_string(),
                ))
            }
        },
        _ => {
            return Err(AgriError::Validation(
                "Latitude and longitude are required".to_string(),
            ))
        }
    };
    let lat = validate::latitude(lat)?;
    let lon = validate::longitude(lon)?;
    let radius = validate::positive(
        "Radius",
        params.radius.unwrap_or(DEFAULT_SEARCH_RADIUS_KM),
    )?;

    Ok(Json(find_nearby(&mut conn, lat, lon, radius).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn operator(id: i64, lat: f64, lon: f64, service_radius: f64) -> User {
        let now = Utc::now();
        User {
            id,
            email: format!("op{}@x.com", id),
            password_hash: String::new(),
            first_name: "Op".into(),
            last_name: id.to_string(),
            phone: None,
            role: Role::Operator,
            is_premium: false,
            latitude: Some(lat),
            longitude: Some(lon),
            is_available: true,
            service_radius: Some(service_radius),
            hourly_rate: Some(0.0),
            service_details: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_distance_is_planar_approximation() {
        assert_eq!(approximate_distance_km(0.0, 0.0, 0.0, 0.0), 0.0);
        assert!((approximate_distance_km(0.0, 0.0, 1.0, 0.0) - 111.0).abs() < 1e-9);
        // 3-4-5 triangle in degrees
        assert!((approximate_distance_km(10.0, 20.0, 13.0, 24.0) - 555.0).abs() < 1e-9);
    }

    #[test]
    fn test_operator_outside_own_radius_is_excluded() {
        // ~60 km away, only willing to travel 50 km
        let far = operator(1, 0.0 + 60.0 / 111.0, 0.0, 50.0);
        assert!(filter_nearby(vec![far], 0.0, 0.0, 100.0).is_empty());
    }

    #[test]
    fn test_operator_inside_both_radii_is_included() {
        // 0.36 degrees = 39.96 km
        let near = operator(1, 0.36, 0.0, 50.0);
        for search in [40.0, 50.0, 100.0, 1000.0] {
            let hits = filter_nearby(vec![near.clone()], 0.0, 0.0, search);
            assert_eq!(hits.len(), 1, "search radius {}", search);
            assert_eq!(hits[0].distance, 39.96);
        }
        assert!(filter_nearby(vec![near], 0.0, 0.0, 30.0).is_empty());
    }

    #[test]
    fn test_results_sorted_by_distance_with_stable_ties() {
        let ops = vec![
            operator(1, 0.3, 0.0, 100.0),
            operator(2, 0.1, 0.0, 100.0),
            operator(3, 0.0, 0.2, 100.0),
            operator(4, 0.0, -0.1, 100.0),
        ];
        let ids: Vec<i64> = filter_nearby(ops, 0.0, 0.0, 100.0)
            .iter()
            .map(|n| n.operator.id)
            .collect();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }

    #[test]
    fn test_unavailable_or_unlocated_operators_are_skipped() {
        let mut busy = operator(1, 0.0, 0.0, 50.0);
        busy.is_available = false;
        let mut nowhere = operator(2, 0.0, 0.0, 50.0);
        nowhere.latitude = None;
        let mut farmer = operator(3, 0.0, 0.0, 50.0);
        farmer.role = Role::Farmer;
        assert!(filter_nearby(vec![busy, nowhere, farmer], 0.0, 0.0, 50.0).is_empty());
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        assert!(filter_nearby(Vec::new(), 40.71, -74.0, 50.0).is_empty());
    }
}
