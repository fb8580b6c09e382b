use crate::errors::AppError;
use crate::services::earth_engine::EE_API_URL;
use crate::services::retry::RetryPolicy;

/// Earth Engine and retry settings, parsed from environment variables.
///
/// Only the commands that talk to Earth Engine load this; `OUTPUT_DIR` and
/// `PORT` are read by the CLI.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Earth Engine REST base URL.
    pub ee_api_url: String,
    /// Cloud project that owns the Earth Engine quota.
    pub ee_project: Option<String>,
    /// OAuth2 bearer token; obtained outside this tool.
    pub ee_access_token: Option<String>,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            ee_api_url: std::env::var("EE_API_URL").unwrap_or_else(|_| EE_API_URL.to_string()),
            ee_project: non_empty_var("EE_PROJECT"),
            ee_access_token: non_empty_var("EE_ACCESS_TOKEN"),
            retry_max_attempts: parse_var("RETRY_MAX_ATTEMPTS", 4)?,
            retry_base_delay_ms: parse_var("RETRY_BASE_DELAY_MS", 2000)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay_ms: self.retry_base_delay_ms,
            ..RetryPolicy::default()
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::ConfigError(format!("{} has an invalid value: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}
