use std::time::Duration;

use gts_core::DEFAULT_KPI_DASHBOARD;
use gts_sheets::DEFAULT_SHEETS_BASE_URL;
use gts_storage::DEFAULT_STORAGE_BASE_URL;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is required")]
    Missing(&'static str),
    #[error("environment variable {key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Process-wide settings, read once at startup and handed to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bucket: String,
    pub spreadsheet_id: String,
    pub port: u16,
    pub download_timeout_secs: u64,
    pub kpi_dashboard: String,
    pub storage_base_url: String,
    pub sheets_base_url: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| non_empty(key).ok_or(ConfigError::Missing(key));

        Ok(Self {
            bucket: required("bucketname")?,
            spreadsheet_id: required("spreadsheet_id")?,
            port: parse_or("PORT", non_empty("PORT"), 8080)?,
            download_timeout_secs: parse_or(
                "GTS_DOWNLOAD_TIMEOUT_SECS",
                non_empty("GTS_DOWNLOAD_TIMEOUT_SECS"),
                50,
            )?,
            kpi_dashboard: non_empty("GTS_KPI_DASHBOARD")
                .unwrap_or_else(|| DEFAULT_KPI_DASHBOARD.to_string()),
            storage_base_url: non_empty("GTS_STORAGE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_STORAGE_BASE_URL.to_string()),
            sheets_base_url: non_empty("GTS_SHEETS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_SHEETS_BASE_URL.to_string()),
        })
    }

    /// Settings for offline use (`plan`), where no bucket or spreadsheet is contacted.
    pub fn offline(kpi_dashboard: impl Into<String>) -> Self {
        Self {
            bucket: String::new(),
            spreadsheet_id: String::new(),
            port: 8080,
            download_timeout_secs: 50,
            kpi_dashboard: kpi_dashboard.into(),
            storage_base_url: DEFAULT_STORAGE_BASE_URL.to_string(),
            sheets_base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
