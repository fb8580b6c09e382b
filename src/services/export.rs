//! CSV persistence for indicator results.
//!
//! - per-point result files named after the city and coordinates
//! - append-only checkpoint files written while a point is being extracted
//! - in-memory CSV for the HTTP export endpoint
//! - concatenation of every per-point file in a folder

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::AppError;
use crate::models::IndicatorResult;

/// Column order of every indicator CSV; matches the field order of
/// `IndicatorResult`.
pub const RESULT_COLUMNS: [&str; 11] = [
    "city",
    "longitude",
    "latitude",
    "period_start",
    "period_end",
    "ndvi_mean",
    "evi_mean",
    "leaf_area_index_mean",
    "sm_rootzone_pctl_mean",
    "sm_profile_pctl_mean",
    "lst_day_1km_celsius",
];

/// Suffix of the checkpoint file kept next to an unfinished result file.
pub const CHECKPOINT_SUFFIX: &str = ".partial";

/// Default file name for `combine`.
pub const COMBINED_FILE_NAME: &str = "master_combined.csv";

/// File name for a point's results: `{city}-lat:{latitude}long:{longitude}`.
///
/// Path separators in the city are replaced so the name stays a single path
/// component.
pub fn result_file_name(city: &str, latitude: f64, longitude: f64) -> String {
    let city: String = city
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}-lat:{}long:{}", city, latitude, longitude)
}

/// Checkpoint path belonging to a result file.
pub fn checkpoint_path(result_path: &Path) -> PathBuf {
    let mut name = result_path.as_os_str().to_os_string();
    name.push(CHECKPOINT_SUFFIX);
    PathBuf::from(name)
}

fn write_rows<W: Write>(writer: W, results: &[IndicatorResult]) -> Result<W, AppError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(RESULT_COLUMNS)?;
    for result in results {
        csv_writer.serialize(result)?;
    }
    csv_writer.flush()?;
    csv_writer
        .into_inner()
        .map_err(|e| AppError::InternalError(format!("CSV writer flush failed: {}", e)))
}

/// Write results (header included) to `path`, replacing any existing file.
pub fn write_results(path: &Path, results: &[IndicatorResult]) -> Result<(), AppError> {
    let file = std::fs::File::create(path)?;
    write_rows(file, results)?;
    Ok(())
}

/// Render results as CSV in memory.
pub fn results_to_csv(results: &[IndicatorResult]) -> Result<Vec<u8>, AppError> {
    write_rows(Vec::new(), results)
}

/// Read results from a CSV file, in file order.
pub fn read_results(path: &Path) -> Result<Vec<IndicatorResult>, AppError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut results = Vec::new();
    for row in reader.deserialize() {
        results.push(row?);
    }
    Ok(results)
}

/// Prefix of the first line of a checkpoint, recording the buffer radius its
/// rows were computed with.
const CHECKPOINT_RADIUS_PREFIX: &str = "# radius_m=";

/// Rows fetched so far for one point, plus the radius they were fetched with.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// `None` when the file carries no radius line.
    pub radius_m: Option<f64>,
    pub results: Vec<IndicatorResult>,
}

/// Append one result to a checkpoint file. A new or empty file first gets
/// the radius line and the header.
pub fn append_result(
    path: &Path,
    result: &IndicatorResult,
    radius_m: f64,
) -> Result<(), AppError> {
    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if is_new {
        writeln!(file, "{}{}", CHECKPOINT_RADIUS_PREFIX, radius_m)?;
    }
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_new {
        csv_writer.write_record(RESULT_COLUMNS)?;
    }
    csv_writer.serialize(result)?;
    csv_writer.flush()?;
    Ok(())
}

/// Read a checkpoint written by `append_result`.
pub fn read_checkpoint(path: &Path) -> Result<Checkpoint, AppError> {
    let content = std::fs::read_to_string(path)?;
    let radius_m = content
        .lines()
        .next()
        .and_then(|line| line.strip_prefix(CHECKPOINT_RADIUS_PREFIX))
        .and_then(|value| value.trim().parse::<f64>().ok());

    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_reader(content.as_bytes());
    let mut results = Vec::new();
    for row in reader.deserialize() {
        results.push(row?);
    }
    Ok(Checkpoint { radius_m, results })
}

/// Summary of a `combine` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombineSummary {
    pub files: usize,
    pub rows: usize,
    pub output: PathBuf,
}

fn is_result_file(name: &str, output_name: &str) -> bool {
    name != output_name
        && !name.ends_with(CHECKPOINT_SUFFIX)
        && (name.ends_with(".csv") || name.contains("-lat:"))
}

/// Concatenate every result file in `dir` into `dir/output_name`.
///
/// Files are taken in name order and rows keep their order. Files that fail
/// to parse are logged and skipped. Returns `None` when nothing was found.
pub fn combine_dir(dir: &Path, output_name: &str) -> Result<Option<CombineSummary>, AppError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| is_result_file(n, output_name))
        })
        .collect();
    paths.sort();

    let mut combined = Vec::new();
    let mut files = 0;
    for path in &paths {
        match read_results(path) {
            Ok(rows) => {
                tracing::debug!("Read {} rows from {}", rows.len(), path.display());
                combined.extend(rows);
                files += 1;
            }
            Err(e) => {
                tracing::warn!("Error reading {}: {}", path.display(), e);
            }
        }
    }

    if files == 0 {
        tracing::info!("No result files found in {}", dir.display());
        return Ok(None);
    }

    let output = dir.join(output_name);
    write_results(&output, &combined)?;
    tracing::info!(
        "Combined {} files ({} rows) into {}",
        files,
        combined.len(),
        output.display()
    );

    Ok(Some(CombineSummary {
        files,
        rows: combined.len(),
        output,
    }))
}
