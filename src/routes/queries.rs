//! Interactive query endpoints.
//!
//! - POST   /api/v1/queries          run one indicator query and store it
//! - GET    /api/v1/queries          list stored results
//! - GET    /api/v1/queries/export   stored results as CSV
//! - DELETE /api/v1/queries          clear the session
//! - DELETE /api/v1/queries/:id      remove one result

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, ErrorResponse};
use crate::models::QueryWindow;
use crate::services::coordinates::{check_coordinates, UNNAMED_PLACEMARK};
use crate::services::earth_engine::{build_result, EarthEngineClient};
use crate::services::export::results_to_csv;
use crate::services::extractor::DEFAULT_RADIUS_M;
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::session::{QuerySession, SessionEntry};

/// File name offered by the export endpoint.
const EXPORT_FILE_NAME: &str = "query_results.csv";

/// Shared application state for query endpoints.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) session: QuerySession,
    pub(crate) ee_client: EarthEngineClient,
    pub(crate) retry: RetryPolicy,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// Label stored with the result
    #[serde(default)]
    pub name: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    /// Buffer radius around the point in metres (default 2000)
    #[serde(default)]
    pub radius_m: Option<f64>,
    /// Window start (inclusive)
    pub start_date: NaiveDate,
    /// Window end (exclusive)
    pub end_date: NaiveDate,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClearResponse {
    pub removed: usize,
}

impl QueryRequest {
    fn validate(&self) -> Result<(QueryWindow, f64), AppError> {
        if self.start_date >= self.end_date {
            return Err(AppError::BadRequest(format!(
                "start_date ({}) must be before end_date ({})",
                self.start_date, self.end_date
            )));
        }
        let radius_m = self.radius_m.unwrap_or(DEFAULT_RADIUS_M);
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(AppError::BadRequest(format!(
                "radius_m must be positive, got {}",
                radius_m
            )));
        }
        check_coordinates(self.latitude, self.longitude)?;

        Ok((
            QueryWindow {
                start_date: self.start_date,
                end_date: self.end_date,
            },
            radius_m,
        ))
    }
}

/// Run one indicator query and append it to the session.
#[utoipa::path(
    post,
    path = "/api/v1/queries",
    tag = "Queries",
    request_body = QueryRequest,
    responses(
        (status = 201, description = "Query result stored", body = SessionEntry),
        (status = 400, description = "Invalid dates, radius or coordinates", body = ErrorResponse),
        (status = 502, description = "Earth Engine failed or rejected the query", body = ErrorResponse),
    )
)]
pub async fn create_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<(StatusCode, Json<SessionEntry>), AppError> {
    let (window, radius_m) = req.validate()?;

    let raw = with_retry(
        || {
            state
                .ee_client
                .fetch_indicators(req.longitude, req.latitude, radius_m, window)
        },
        &state.retry,
    )
    .await?;

    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(UNNAMED_PLACEMARK);
    let result = build_result(name, req.longitude, req.latitude, window, raw);
    let entry = state.session.push(result).await;

    tracing::info!(
        "Stored query {} for '{}' ({}..{})",
        entry.id,
        entry.result.city,
        window.start_date,
        window.end_date
    );

    Ok((StatusCode::CREATED, Json(entry)))
}

/// List stored query results in insertion order.
#[utoipa::path(
    get,
    path = "/api/v1/queries",
    tag = "Queries",
    responses(
        (status = 200, description = "Stored query results", body = [SessionEntry]),
    )
)]
pub async fn list_queries(State(state): State<AppState>) -> Json<Vec<SessionEntry>> {
    Json(state.session.list().await)
}

/// Download stored query results as CSV.
#[utoipa::path(
    get,
    path = "/api/v1/queries/export",
    tag = "Queries",
    responses(
        (status = 200, description = "CSV with one row per stored result", content_type = "text/csv", body = String),
    )
)]
pub async fn export_queries(State(state): State<AppState>) -> Result<Response, AppError> {
    let results = state.session.results().await;
    let body = results_to_csv(&results)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", EXPORT_FILE_NAME),
            ),
        ],
        body,
    )
        .into_response())
}

/// Remove every stored result.
#[utoipa::path(
    delete,
    path = "/api/v1/queries",
    tag = "Queries",
    responses(
        (status = 200, description = "Session cleared", body = ClearResponse),
    )
)]
pub async fn clear_queries(State(state): State<AppState>) -> Json<ClearResponse> {
    let removed = state.session.clear().await;
    tracing::info!("Cleared {} stored queries", removed);
    Json(ClearResponse { removed })
}

/// Remove one stored result.
#[utoipa::path(
    delete,
    path = "/api/v1/queries/{id}",
    tag = "Queries",
    params(
        ("id" = Uuid, Path, description = "Stored query id"),
    ),
    responses(
        (status = 204, description = "Entry removed"),
        (status = 404, description = "No entry with this id", body = ErrorResponse),
    )
)]
pub async fn delete_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.session.remove(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Query {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::export::RESULT_COLUMNS;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state_for(api_url: &str) -> AppState {
        AppState {
            session: QuerySession::new(),
            ee_client: EarthEngineClient::new(api_url, "ee-demo", None).unwrap(),
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 0,
                jitter_factor: 0.0,
            },
        }
    }

    fn request() -> QueryRequest {
        QueryRequest {
            name: Some("Campinas".to_string()),
            longitude: -47.0626,
            latitude: -22.9064,
            radius_m: None,
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2023, 1, 21).unwrap(),
        }
    }

    #[test]
    fn test_validate_defaults_radius() {
        let (window, radius) = request().validate().unwrap();
        assert_eq!(radius, DEFAULT_RADIUS_M);
        assert_eq!(window.start_date, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let same_day = QueryRequest {
            end_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            ..request()
        };
        assert!(matches!(same_day.validate(), Err(AppError::BadRequest(_))));

        let no_radius = QueryRequest {
            radius_m: Some(0.0),
            ..request()
        };
        assert!(matches!(no_radius.validate(), Err(AppError::BadRequest(_))));

        let off_planet = QueryRequest {
            latitude: -227.9,
            ..request()
        };
        assert!(matches!(off_planet.validate(), Err(AppError::Coordinate(_))));
    }

    #[tokio::test]
    async fn test_create_query_stores_scaled_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/ee-demo/value:compute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "NDVI": 6123.0,
                    "EVI": 3500.0,
                    "sm_rootzone_pctl": 40.5,
                    "sm_profile_pctl": 38.25,
                    "LST_Day_1km": 15000.0
                }
            })))
            .expect(3)
            .mount(&server)
            .await;

        let state = state_for(&server.uri());
        let (status, Json(entry)) = create_query(State(state.clone()), Json(request()))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(entry.result.city, "Campinas");
        assert_eq!(entry.result.ndvi_mean, Some(0.6123));
        assert_eq!(entry.result.evi_mean, Some(0.35));
        assert_eq!(entry.result.leaf_area_index_mean, None);
        assert!((entry.result.lst_day_1km_celsius.unwrap() - 26.85).abs() < 1e-9);

        let Json(listed) = list_queries(State(state)).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, entry.id);
    }

    #[tokio::test]
    async fn test_create_query_upstream_rejection_is_not_stored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "Geometry is invalid." }
            })))
            .mount(&server)
            .await;

        let state = state_for(&server.uri());
        let err = create_query(State(state.clone()), Json(request()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalRejected { status: 400, .. }));
        assert!(state.session.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_never_calls_upstream() {
        // Unroutable URL: any request would fail with a transport error.
        let state = state_for("http://127.0.0.1:9");
        let req = QueryRequest {
            radius_m: Some(-5.0),
            ..request()
        };
        let err = create_query(State(state), Json(req)).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_export_and_clear() {
        let state = state_for("http://127.0.0.1:9");
        let (window, _) = request().validate().unwrap();
        state
            .session
            .push(build_result(
                "Campinas",
                -47.0626,
                -22.9064,
                window,
                Default::default(),
            ))
            .await;

        let response = export_queries(State(state.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains(EXPORT_FILE_NAME));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                RESULT_COLUMNS.join(",").as_str(),
                "Campinas,-47.0626,-22.9064,2023-01-01,2023-01-21,,,,,,",
            ]
        );

        let Json(cleared) = clear_queries(State(state.clone())).await;
        assert_eq!(cleared.removed, 1);
        assert!(state.session.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_query() {
        let state = state_for("http://127.0.0.1:9");
        let (window, _) = request().validate().unwrap();
        let entry = state
            .session
            .push(build_result("X", 1.0, 1.0, window, Default::default()))
            .await;

        let status = delete_query(State(state.clone()), Path(entry.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = delete_query(State(state), Path(entry.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
