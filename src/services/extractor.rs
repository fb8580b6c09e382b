//! Time-windowed batch extraction.
//!
//! For every placemark, walks fixed-size windows across the date range,
//! queries the indicator source once per window and writes one CSV per point.
//!
//! Failure handling:
//! - each window query is retried with backoff on transient errors
//! - every fetched window is appended to a checkpoint file right away, so a
//!   point that fails part-way keeps what it already has
//! - the next run for the same point resumes after the last checkpointed
//!   window; the checkpoint is removed once the result file is written
//! - a failing point does not stop the batch; failures are collected

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};

use crate::errors::AppError;
use crate::models::{IndicatorResult, Placemark, QueryWindow};
use crate::services::earth_engine::{build_result, IndicatorSource};
use crate::services::export::{
    append_result, checkpoint_path, read_checkpoint, result_file_name, write_results,
};
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::windows::{
    compute_windows, default_range_end, default_range_start, DEFAULT_WINDOW_DAYS,
};

/// Search radius around each point unless overridden (metres).
pub const DEFAULT_RADIUS_M: f64 = 2000.0;

/// What to extract for every point.
#[derive(Debug, Clone)]
pub struct ExtractionPlan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub window_days: i64,
    pub radius_m: f64,
    /// Leave points whose result file already exists untouched.
    pub skip_existing: bool,
}

impl Default for ExtractionPlan {
    fn default() -> Self {
        Self {
            start: default_range_start(),
            end: default_range_end(),
            window_days: DEFAULT_WINDOW_DAYS,
            radius_m: DEFAULT_RADIUS_M,
            skip_existing: false,
        }
    }
}

/// Result of extracting one point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointOutcome {
    Written {
        path: PathBuf,
        windows: usize,
        /// Windows taken from a checkpoint instead of the remote service.
        resumed: usize,
    },
    Skipped {
        path: PathBuf,
    },
}

/// Outcome of a whole batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub written: usize,
    pub skipped: usize,
    /// `(city, error message)` for every point that failed.
    pub failed: Vec<(String, String)>,
}

/// Extract every window for one point and write its result file.
pub async fn extract_point<S: IndicatorSource>(
    source: &S,
    placemark: &Placemark,
    plan: &ExtractionPlan,
    retry: &RetryPolicy,
    output_dir: &Path,
) -> Result<PointOutcome, AppError> {
    let result_path = output_dir.join(result_file_name(
        &placemark.city,
        placemark.latitude,
        placemark.longitude,
    ));
    let checkpoint = checkpoint_path(&result_path);

    if plan.skip_existing && result_path.exists() && !checkpoint.exists() {
        tracing::info!(
            "Skipping '{}': {} already exists",
            placemark.city,
            result_path.display()
        );
        return Ok(PointOutcome::Skipped { path: result_path });
    }

    let windows = compute_windows(plan.start, plan.end, plan.window_days)?;
    let mut results = load_checkpoint(&checkpoint, &windows, plan.radius_m)?;
    let resumed = results.len();
    if resumed > 0 {
        tracing::info!(
            "Resuming '{}' from checkpoint: {}/{} windows already fetched",
            placemark.city,
            resumed,
            windows.len()
        );
    }

    for window in &windows[resumed..] {
        let raw = with_retry(
            || {
                source.query(
                    placemark.longitude,
                    placemark.latitude,
                    plan.radius_m,
                    *window,
                )
            },
            retry,
        )
        .await
        .map_err(|e| {
            tracing::error!(
                "'{}' failed at window {}..{} ({} windows checkpointed): {}",
                placemark.city,
                window.start_date,
                window.end_date,
                results.len(),
                e
            );
            e
        })?;

        let result = build_result(
            &placemark.city,
            placemark.longitude,
            placemark.latitude,
            *window,
            raw,
        );
        tracing::debug!("{:?}", result);
        append_result(&checkpoint, &result, plan.radius_m)?;
        results.push(result);
    }

    write_results(&result_path, &results)?;
    if checkpoint.exists() {
        std::fs::remove_file(&checkpoint)?;
    }

    tracing::info!(
        "Wrote {} windows for '{}' to {}",
        results.len(),
        placemark.city,
        result_path.display()
    );

    Ok(PointOutcome::Written {
        path: result_path,
        windows: results.len(),
        resumed,
    })
}

/// Load checkpointed rows that line up with the planned windows.
///
/// A checkpoint written for a different plan (other range, window size or
/// buffer radius) is discarded rather than mixed into the new results.
fn load_checkpoint(
    checkpoint: &Path,
    windows: &[QueryWindow],
    radius_m: f64,
) -> Result<Vec<IndicatorResult>, AppError> {
    if !checkpoint.exists() {
        return Ok(Vec::new());
    }

    let saved = match read_checkpoint(checkpoint) {
        Ok(saved) => saved,
        Err(e) => {
            tracing::warn!(
                "Discarding unreadable checkpoint {}: {}",
                checkpoint.display(),
                e
            );
            std::fs::remove_file(checkpoint)?;
            return Ok(Vec::new());
        }
    };

    if saved.radius_m != Some(radius_m) {
        tracing::warn!(
            "Discarding checkpoint {}: radius {:?} m does not match {} m",
            checkpoint.display(),
            saved.radius_m,
            radius_m
        );
        std::fs::remove_file(checkpoint)?;
        return Ok(Vec::new());
    }

    let rows = saved.results;
    let matches_plan = rows.len() <= windows.len()
        && rows
            .iter()
            .zip(windows)
            .all(|(row, window)| row.window() == *window);

    if !matches_plan {
        tracing::warn!(
            "Discarding checkpoint {}: windows do not match the current plan",
            checkpoint.display()
        );
        std::fs::remove_file(checkpoint)?;
        return Ok(Vec::new());
    }

    Ok(rows)
}

/// Drop placemarks that would write to the same result file as an earlier
/// one, keeping the first.
fn unique_by_result_file(placemarks: &[Placemark]) -> Vec<&Placemark> {
    let mut seen = HashSet::new();
    placemarks
        .iter()
        .filter(|p| {
            let fresh = seen.insert(result_file_name(&p.city, p.latitude, p.longitude));
            if !fresh {
                tracing::warn!(
                    "Skipping duplicate placemark '{}' ({}, {})",
                    p.city,
                    p.latitude,
                    p.longitude
                );
            }
            fresh
        })
        .collect()
}

/// Extract every placemark, at most `concurrency` points at a time.
///
/// Windows within a point are always fetched in order; only independent
/// points overlap.
pub async fn extract_all<S: IndicatorSource>(
    source: &S,
    placemarks: &[Placemark],
    plan: &ExtractionPlan,
    retry: &RetryPolicy,
    output_dir: &Path,
    concurrency: usize,
) -> Result<BatchSummary, AppError> {
    std::fs::create_dir_all(output_dir)?;

    tracing::info!(
        "Extracting {} points, {}..{} in {}-day windows, radius {} m",
        placemarks.len(),
        plan.start,
        plan.end,
        plan.window_days,
        plan.radius_m
    );

    let unique = unique_by_result_file(placemarks);
    let duplicates = placemarks.len() - unique.len();
    let outcomes: Vec<(String, Result<PointOutcome, AppError>)> = stream::iter(unique)
        .map(|placemark| async move {
            let outcome = extract_point(source, placemark, plan, retry, output_dir).await;
            (placemark.city.clone(), outcome)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut summary = BatchSummary {
        skipped: duplicates,
        ..BatchSummary::default()
    };
    for (city, outcome) in outcomes {
        match outcome {
            Ok(PointOutcome::Written {
                path,
                windows,
                resumed,
            }) => {
                tracing::debug!(
                    "'{}': {} windows ({} from checkpoint) in {}",
                    city,
                    windows,
                    resumed,
                    path.display()
                );
                summary.written += 1;
            }
            Ok(PointOutcome::Skipped { path }) => {
                tracing::debug!("'{}': kept {}", city, path.display());
                summary.skipped += 1;
            }
            Err(e) => summary.failed.push((city, e.to_string())),
        }
    }

    tracing::info!(
        "Batch complete: {} written, {} skipped, {} failed",
        summary.written,
        summary.skipped,
        summary.failed.len()
    );

    Ok(summary)
}
