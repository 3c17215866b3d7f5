//! Remote directory index client.
//!
//! The archive publishes one HTML directory listing per day and hour. A
//! listing is scraped for anchors naming files of the configured channel.

use std::{fmt, sync::OnceLock, time::Duration};

use async_trait::async_trait;
use chrono::Datelike;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::{
    error::{DownloadError, LookupError},
    slot::TimeSlot,
};

pub const DEFAULT_DIRECTORY_TEMPLATE: &str =
    "https://jsoc1.stanford.edu/data/aia/synoptic/{year}/{month}/{day}/H{hour}10/";

#[derive(Debug, Clone, PartialEq, Eq)]
/// A remote file confirmed to exist by a directory listing.
pub struct RemoteLocation {
    pub directory: Url,
    pub file_name: String,
}

impl RemoteLocation {
    pub fn url(&self) -> Result<Url, DownloadError> {
        self.directory
            .join(&self.file_name)
            .map_err(|e| DownloadError::Url(format!("{}{}: {}", self.directory, self.file_name, e)))
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.directory, self.file_name)
    }
}

#[async_trait]
pub trait DirectoryIndex: Send + Sync {
    /// Sorted names of the entries in `directory` ending with `suffix`.
    ///
    /// A directory that does not exist is an empty listing, not an error.
    async fn list(&self, directory: &Url, suffix: &str) -> Result<Vec<String>, LookupError>;
}

#[derive(Clone)]
pub struct HttpDirectoryIndex {
    client: Client,
}

impl HttpDirectoryIndex {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("synoptic/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl DirectoryIndex for HttpDirectoryIndex {
    async fn list(&self, directory: &Url, suffix: &str) -> Result<Vec<String>, LookupError> {
        let request_error = |source| LookupError::Request {
            url: directory.to_string(),
            source,
        };

        let response = self
            .client
            .get(directory.clone())
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(url = %directory, "Directory not found");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(LookupError::Status {
                url: directory.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(request_error)?;

        Ok(matching_entries(&body, suffix))
    }
}

/// Expands `{year}`, `{month}`, `{day}` and `{hour}` in `template` for `slot`.
pub fn directory_url(template: &str, slot: &TimeSlot) -> Result<Url, LookupError> {
    let expanded = template
        .replace("{year}", &format!("{:04}", slot.date.year()))
        .replace("{month}", &format!("{:02}", slot.date.month()))
        .replace("{day}", &format!("{:02}", slot.date.day()))
        .replace("{hour}", &format!("{:02}", slot.hour));

    Url::parse(&expanded).map_err(|e| LookupError::InvalidUrl {
        url: expanded.clone(),
        message: e.to_string(),
    })
}

/// Extracts the anchor targets of an HTML listing that end with `suffix`, sorted and deduplicated.
pub fn matching_entries(html: &str, suffix: &str) -> Vec<String> {
    let mut entries: Vec<String> = href_pattern()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .filter_map(|href| entry_name(href.as_str()))
        .filter(|name| name.ends_with(suffix))
        .collect();

    entries.sort();
    entries.dedup();

    entries
}

fn href_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#).expect("valid href regex")
    })
}

// Last path segment of an href, without query or fragment
fn entry_name(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

// -- Tests -------------------------------------------------------------------
