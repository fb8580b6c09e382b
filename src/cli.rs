use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::services::export::COMBINED_FILE_NAME;
use crate::services::extractor::DEFAULT_RADIUS_M;
use crate::services::windows::{default_range_end, default_range_start, DEFAULT_WINDOW_DAYS};

#[derive(Debug, Parser)]
#[command(about = "Regional vegetation, soil moisture and temperature statistics for map placemarks.")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Repair dot-corrupted coordinates in a placemark export (CSV or KML).
    Clean {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "output.csv")]
        output: PathBuf,
    },
    /// Query every window for every cleaned placemark and write one CSV per point.
    Extract(ExtractArgs),
    /// Concatenate every per-point result file in a folder.
    Combine {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value = COMBINED_FILE_NAME)]
        output: String,
    },
    /// Serve the interactive query API.
    Serve {
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Debug, Parser)]
pub struct ExtractArgs {
    /// Cleaned placemark CSV (`Placemark Name`/`Cidade`, `Latitude`, `Longitude`)
    #[arg(long, default_value = "output.csv")]
    pub input: PathBuf,
    /// Folder for result files
    #[arg(long, env = "OUTPUT_DIR", default_value = "./output")]
    pub output_dir: PathBuf,
    /// Range start (inclusive)
    #[arg(long, default_value_t = default_range_start())]
    pub start: NaiveDate,
    /// Range end; the last window may extend past it
    #[arg(long, default_value_t = default_range_end())]
    pub end: NaiveDate,
    #[arg(long, default_value_t = DEFAULT_WINDOW_DAYS)]
    pub window_days: i64,
    /// Buffer radius around each point (metres)
    #[arg(long, default_value_t = DEFAULT_RADIUS_M)]
    pub radius_m: f64,
    /// Points processed at the same time
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,
    /// Leave points that already have a complete result file
    #[arg(long)]
    pub skip_existing: bool,
}
