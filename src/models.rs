use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A placemark row as exported, before coordinate repair.
///
/// The name column is called `Placemark Name` in the raw export and `Cidade`
/// in files produced by older tooling; both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateRecord {
    #[serde(rename = "Placemark Name", alias = "Cidade")]
    pub city: String,
    #[serde(rename = "Latitude")]
    pub raw_latitude: String,
    #[serde(rename = "Longitude")]
    pub raw_longitude: String,
}

/// A placemark with repaired, range-checked coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Placemark {
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A half-open date range `[start_date, end_date)` sent to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Regional means as returned by the remote service, before scale correction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawIndicators {
    pub ndvi: Option<f64>,
    pub evi: Option<f64>,
    pub leaf_area_index: Option<f64>,
    pub sm_rootzone_pctl: Option<f64>,
    pub sm_profile_pctl: Option<f64>,
    pub lst_day_1km: Option<f64>,
}

/// Scale-corrected indicators for one point and one window.
///
/// Any indicator may be `None` when the service has no coverage for the
/// region or period. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IndicatorResult {
    pub city: String,
    pub longitude: f64,
    pub latitude: f64,
    /// Window start (inclusive), `YYYY-MM-DD`
    pub period_start: NaiveDate,
    /// Window end (exclusive), `YYYY-MM-DD`
    pub period_end: NaiveDate,
    /// Mean NDVI, scaled to [-1, 1]
    pub ndvi_mean: Option<f64>,
    /// Mean EVI, scaled to [-1, 1]
    pub evi_mean: Option<f64>,
    pub leaf_area_index_mean: Option<f64>,
    /// Root-zone soil moisture percentile
    pub sm_rootzone_pctl_mean: Option<f64>,
    /// Profile soil moisture percentile
    pub sm_profile_pctl_mean: Option<f64>,
    /// Daytime land surface temperature in Celsius
    pub lst_day_1km_celsius: Option<f64>,
}

impl IndicatorResult {
    /// The window this result covers.
    pub fn window(&self) -> QueryWindow {
        QueryWindow {
            start_date: self.period_start,
            end_date: self.period_end,
        }
    }
}
