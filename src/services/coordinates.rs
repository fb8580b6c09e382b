//! Coordinate repair and placemark cleaning.
//!
//! Placemark exports arrive with the decimal point of each coordinate turned
//! into thousands separators (`-22.799.9905` for `-22.7999905`) or dropped
//! entirely (`-227999905`). Repair assumes every coordinate has exactly two
//! integer digits, which holds for all the latitudes and longitudes in the
//! source data but is not a general rule.

use std::path::Path;

use thiserror::Error;

use crate::errors::AppError;
use crate::models::{CoordinateRecord, Placemark};
use crate::services::kml;

/// Name the export tool gives to placemarks that were never labelled.
pub const UNNAMED_PLACEMARK: &str = "Unnamed Placemark";

/// Number of integer digits restored in front of the decimal point.
const INTEGER_DIGITS: usize = 2;

#[derive(Debug, Error, PartialEq)]
pub enum CoordinateError {
    #[error("cannot parse coordinate '{raw}' (repaired as '{repaired}')")]
    Parse { raw: String, repaired: String },
    #[error("{axis} {value} is outside [-{limit}, {limit}]")]
    OutOfRange {
        axis: &'static str,
        value: f64,
        limit: f64,
    },
}

/// Repair a dot-corrupted decimal-degree string into a signed float.
///
/// Every character that is not an ASCII digit or `-` is dropped, then a
/// decimal point is reinserted after the integer digits. Empty input (or a
/// bare sign) yields `0.0`.
pub fn repair_coordinate(raw: &str) -> Result<f64, CoordinateError> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();

    if digits.is_empty() || digits == "-" {
        return Ok(0.0);
    }

    let split_at = if digits.starts_with('-') {
        INTEGER_DIGITS + 1
    } else {
        INTEGER_DIGITS
    };
    // `digits` is pure ASCII, so byte offsets are char offsets.
    let (int_part, frac_part) = digits.split_at(split_at.min(digits.len()));
    let repaired = format!("{}.{}", int_part, frac_part);

    repaired.parse::<f64>().map_err(|_| CoordinateError::Parse {
        raw: raw.to_string(),
        repaired,
    })
}

/// Repair both coordinates of a record and check they are on the globe.
pub fn to_placemark(record: &CoordinateRecord) -> Result<Placemark, CoordinateError> {
    let latitude = repair_coordinate(&record.raw_latitude)?;
    let longitude = repair_coordinate(&record.raw_longitude)?;
    check_coordinates(latitude, longitude)?;
    Ok(Placemark {
        city: record.city.clone(),
        latitude,
        longitude,
    })
}

/// Reject latitudes outside [-90, 90] and longitudes outside [-180, 180].
pub fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), CoordinateError> {
    check_range("latitude", latitude, 90.0)?;
    check_range("longitude", longitude, 180.0)
}

fn check_range(axis: &'static str, value: f64, limit: f64) -> Result<(), CoordinateError> {
    if (-limit..=limit).contains(&value) {
        Ok(())
    } else {
        Err(CoordinateError::OutOfRange { axis, value, limit })
    }
}

/// Repair every record, skipping (and logging) the ones that fail.
pub fn repair_all(records: &[CoordinateRecord]) -> Vec<Placemark> {
    records
        .iter()
        .filter_map(|record| match to_placemark(record) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!("Skipping placemark '{}': {}", record.city, e);
                None
            }
        })
        .collect()
}

/// Drop unlabelled placemarks, keeping the order of the rest.
pub fn drop_unnamed(records: Vec<CoordinateRecord>) -> Vec<CoordinateRecord> {
    let before = records.len();
    let kept: Vec<CoordinateRecord> = records
        .into_iter()
        .filter(|r| r.city != UNNAMED_PLACEMARK)
        .collect();
    if kept.len() < before {
        tracing::debug!(
            "Dropped {} '{}' rows",
            before - kept.len(),
            UNNAMED_PLACEMARK
        );
    }
    kept
}

/// Read placemark rows from a CSV export.
///
/// Only the name, latitude and longitude columns are read; any other column
/// in the export is ignored.
pub fn read_records_csv(path: &Path) -> Result<Vec<CoordinateRecord>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Write placemark rows (raw coordinate strings) to the intermediate CSV.
pub fn write_records_csv(path: &Path, records: &[CoordinateRecord]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a raw placemark export, CSV or KML by file extension.
pub fn read_export(path: &Path) -> Result<Vec<CoordinateRecord>, AppError> {
    let is_kml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("kml"));
    if is_kml {
        Ok(kml::parse_kml_file(path)?)
    } else {
        read_records_csv(path)
    }
}

/// Clean a raw export into the intermediate CSV. Returns the rows written.
///
/// Coordinates are written as found; rows whose coordinates cannot be
/// repaired onto the globe are logged and left out.
pub fn clean_export(input: &Path, output: &Path) -> Result<usize, AppError> {
    let records: Vec<CoordinateRecord> = drop_unnamed(read_export(input)?)
        .into_iter()
        .filter(|record| match to_placemark(record) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Dropping placemark '{}': {}", record.city, e);
                false
            }
        })
        .collect();
    write_records_csv(output, &records)?;
    tracing::info!(
        "Wrote {} placemarks from {} to {}",
        records.len(),
        input.display(),
        output.display()
    );
    Ok(records.len())
}

/// Load placemarks from a cleaned CSV for extraction.
///
/// Every coordinate goes through `repair_coordinate`, so values left with a
/// misplaced single dot are repaired the same way as multi-dot ones. Rows
/// that still fail are logged and skipped.
pub fn load_placemarks(path: &Path) -> Result<Vec<Placemark>, AppError> {
    let records = read_records_csv(path)?;
    let placemarks = repair_all(&records);
    tracing::info!(
        "Loaded {} of {} placemarks from {}",
        placemarks.len(),
        records.len(),
        path.display()
    );
    Ok(placemarks)
}
