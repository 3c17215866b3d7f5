//! Error types for each stage of the pipeline.
//!
//! Lookup, download and payload errors are recoverable: they are turned into
//! per-unit outcomes by the schedulers. Configuration errors are fatal.

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid directory url `{url}`: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("invalid file url: {0}")]
    Url(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("worker pool size must be at least 1")]
    NoWorkers,

    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("percentiles must satisfy 0 <= low < high <= 100, got {low} and {high}")]
    InvalidPercentiles { low: f64, high: f64 },

    #[error("target range must be finite with min < max, got [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("directory template `{0}` must contain {{year}}, {{month}}, {{day}} and {{hour}}")]
    InvalidTemplate(String),

    #[error("root directory {path} is not writable: {source}")]
    UnwritableRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
