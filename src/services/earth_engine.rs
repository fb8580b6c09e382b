//! Earth Engine REST client for regional indicator means.
//!
//! Each window is answered by three `value:compute` calls, one per dataset.
//! Every call loads the collection, filters it to the window and the point,
//! composites it with a mean, selects the bands and reduces the buffered
//! point with a mean reducer at the dataset's native scale.
//! See: https://developers.google.com/earth-engine/reference/rest/v1/projects.value/compute

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::helpers::opt_round_4dp;
use crate::models::{IndicatorResult, QueryWindow, RawIndicators};

/// Default REST endpoint.
pub const EE_API_URL: &str = "https://earthengine.googleapis.com/v1";

/// Per-request timeout for `value:compute`.
const EE_REQUEST_TIMEOUT_SECS: u64 = 120;

/// MODIS vegetation indices are stored as integers scaled by 10000.
const VEGETATION_INDEX_SCALE: f64 = 0.0001;

/// MODIS LST is stored in units of 0.02 K.
const LST_SCALE: f64 = 0.02;

const KELVIN_OFFSET: f64 = 273.15;

/// One `reduceRegion` request: which collection, which bands, at what scale.
#[derive(Debug, Clone, Copy)]
pub struct DatasetReduction {
    pub collection: &'static str,
    pub bands: &'static [&'static str],
    /// Nominal pixel size in metres passed as `scale`.
    pub scale_m: u32,
}

pub const MOD13Q1: DatasetReduction = DatasetReduction {
    collection: "MODIS/061/MOD13Q1",
    bands: &["NDVI", "EVI"],
    scale_m: 250,
};

pub const SPL4SMGP: DatasetReduction = DatasetReduction {
    collection: "NASA/SMAP/SPL4SMGP/008",
    bands: &["leaf_area_index", "sm_rootzone_pctl", "sm_profile_pctl"],
    scale_m: 10000,
};

pub const MOD11A1: DatasetReduction = DatasetReduction {
    collection: "MODIS/061/MOD11A1",
    bands: &["LST_Day_1km"],
    scale_m: 1000,
};

/// Anything that can answer an indicator query for a point and a window.
///
/// The batch extractor is written against this trait so it can run against
/// the real service or a scripted source.
#[allow(async_fn_in_trait)]
pub trait IndicatorSource {
    async fn query(
        &self,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
        window: QueryWindow,
    ) -> Result<RawIndicators, AppError>;
}

/// Client for the Earth Engine `value:compute` endpoint.
#[derive(Debug, Clone)]
pub struct EarthEngineClient {
    client: reqwest::Client,
    api_url: String,
    project: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ComputeResponse {
    result: Option<HashMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl EarthEngineClient {
    pub fn new(
        api_url: &str,
        project: &str,
        access_token: Option<String>,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(EE_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            access_token,
        })
    }

    /// Build a client from the service section of the app config.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let project = config.ee_project.as_deref().ok_or_else(|| {
            AppError::ConfigError("EE_PROJECT must be set to query Earth Engine".to_string())
        })?;
        if config.ee_access_token.is_none() {
            tracing::warn!("EE_ACCESS_TOKEN is not set; requests will be unauthenticated");
        }
        Self::new(&config.ee_api_url, project, config.ee_access_token.clone())
    }

    fn compute_url(&self) -> String {
        format!("{}/projects/{}/value:compute", self.api_url, self.project)
    }

    /// Fetch all six raw indicators for one window.
    pub async fn fetch_indicators(
        &self,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
        window: QueryWindow,
    ) -> Result<RawIndicators, AppError> {
        let vegetation = self
            .reduce_region(&MOD13Q1, longitude, latitude, radius_m, window)
            .await?;
        let soil = self
            .reduce_region(&SPL4SMGP, longitude, latitude, radius_m, window)
            .await?;
        let temperature = self
            .reduce_region(&MOD11A1, longitude, latitude, radius_m, window)
            .await?;

        Ok(RawIndicators {
            ndvi: band_value(&vegetation, "NDVI"),
            evi: band_value(&vegetation, "EVI"),
            leaf_area_index: band_value(&soil, "leaf_area_index"),
            sm_rootzone_pctl: band_value(&soil, "sm_rootzone_pctl"),
            sm_profile_pctl: band_value(&soil, "sm_profile_pctl"),
            lst_day_1km: band_value(&temperature, "LST_Day_1km"),
        })
    }

    /// Run one `reduceRegion` and return the band → value dictionary.
    ///
    /// An empty collection yields an empty dictionary (or null values), not an
    /// error.
    pub async fn reduce_region(
        &self,
        reduction: &DatasetReduction,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
        window: QueryWindow,
    ) -> Result<HashMap<String, Value>, AppError> {
        let expression =
            build_reduce_region_expression(reduction, longitude, latitude, radius_m, window);

        let mut headers = HeaderMap::new();
        if let Some(token) = &self.access_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                    AppError::ConfigError(format!("Invalid access token header: {}", e))
                })?,
            );
        }

        tracing::debug!(
            "Earth Engine: {} {}..{} at ({}, {})",
            reduction.collection,
            window.start_date,
            window.end_date,
            longitude,
            latitude
        );

        let response = self
            .client
            .post(self.compute_url())
            .headers(headers)
            .json(&json!({ "expression": expression }))
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!("Earth Engine request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let parsed: ComputeResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("Earth Engine JSON parse error: {}", e))
        })?;

        Ok(parsed.result.unwrap_or_default())
    }
}

impl IndicatorSource for EarthEngineClient {
    async fn query(
        &self,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
        window: QueryWindow,
    ) -> Result<RawIndicators, AppError> {
        self.fetch_indicators(longitude, latitude, radius_m, window)
            .await
    }
}

/// Map a non-success response to an error. Throttling and server errors are
/// transient; everything else is a rejection of this request.
fn classify_failure(status: StatusCode, body: &str) -> AppError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AppError::ExternalServiceError(format!("Earth Engine returned HTTP {}: {}", status, message))
    } else {
        AppError::ExternalRejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Read a numeric band value; null, missing or non-numeric means no data.
fn band_value(values: &HashMap<String, Value>, band: &str) -> Option<f64> {
    match values.get(band) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(other) => {
            tracing::warn!("Earth Engine: non-numeric value for {}: {}", band, other);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Expression graph
// ---------------------------------------------------------------------------

fn constant(value: Value) -> Value {
    json!({ "constantValue": value })
}

fn invoke(function_name: &str, arguments: Value) -> Value {
    json!({
        "functionInvocationValue": {
            "functionName": function_name,
            "arguments": arguments,
        }
    })
}

/// Point buffered by `radius_m` metres.
fn buffered_point(longitude: f64, latitude: f64, radius_m: f64) -> Value {
    let point = invoke(
        "GeometryConstructors.Point",
        json!({ "coordinates": constant(json!([longitude, latitude])) }),
    );
    invoke(
        "Geometry.buffer",
        json!({ "geometry": point, "distance": constant(json!(radius_m)) }),
    )
}

/// Build the serialized expression for one dataset reduction.
pub fn build_reduce_region_expression(
    reduction: &DatasetReduction,
    longitude: f64,
    latitude: f64,
    radius_m: f64,
    window: QueryWindow,
) -> Value {
    let region = buffered_point(longitude, latitude, radius_m);

    let collection = invoke(
        "ImageCollection.load",
        json!({ "id": constant(json!(reduction.collection)) }),
    );
    let by_date = invoke(
        "Collection.filter",
        json!({
            "collection": collection,
            "filter": invoke("Filter.dateRangeContains", json!({
                "leftValue": invoke("DateRange", json!({
                    "start": constant(json!(window.start_date.format("%Y-%m-%d").to_string())),
                    "end": constant(json!(window.end_date.format("%Y-%m-%d").to_string())),
                })),
                "rightField": constant(json!("system:time_start")),
            })),
        }),
    );
    let by_bounds = invoke(
        "Collection.filter",
        json!({
            "collection": by_date,
            "filter": invoke("Filter.intersects", json!({
                "leftField": constant(json!(".all")),
                "rightValue": region.clone(),
            })),
        }),
    );
    let composite = invoke("reduce.mean", json!({ "collection": by_bounds }));
    let selected = invoke(
        "Image.select",
        json!({
            "input": composite,
            "bandSelectors": constant(json!(reduction.bands)),
        }),
    );
    let reduced = invoke(
        "Image.reduceRegion",
        json!({
            "image": selected,
            "reducer": invoke("Reducer.mean", json!({})),
            "geometry": region,
            "scale": constant(json!(reduction.scale_m)),
        }),
    );

    json!({
        "result": "0",
        "values": { "0": reduced },
    })
}

// ---------------------------------------------------------------------------
// Scale correction
// ---------------------------------------------------------------------------

/// Scale a raw MODIS NDVI/EVI value to [-1, 1], rounded to 4 places.
pub fn scale_vegetation_index(raw: Option<f64>) -> Option<f64> {
    opt_round_4dp(raw.map(|v| v * VEGETATION_INDEX_SCALE))
}

/// Convert a raw MODIS LST value to degrees Celsius.
pub fn lst_to_celsius(raw: Option<f64>) -> Option<f64> {
    raw.map(|v| v * LST_SCALE - KELVIN_OFFSET)
}

/// Apply scale corrections and attach the point and window.
pub fn build_result(
    city: &str,
    longitude: f64,
    latitude: f64,
    window: QueryWindow,
    raw: RawIndicators,
) -> IndicatorResult {
    IndicatorResult {
        city: city.to_string(),
        longitude,
        latitude,
        period_start: window.start_date,
        period_end: window.end_date,
        ndvi_mean: scale_vegetation_index(raw.ndvi),
        evi_mean: scale_vegetation_index(raw.evi),
        leaf_area_index_mean: raw.leaf_area_index,
        sm_rootzone_pctl_mean: raw.sm_rootzone_pctl,
        sm_profile_pctl_mean: raw.sm_profile_pctl,
        lst_day_1km_celsius: lst_to_celsius(raw.lst_day_1km),
    }
}
