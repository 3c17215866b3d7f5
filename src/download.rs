//! Streams discovered files into the local archive.
//!
//! Bodies are written to `<target>.part` and renamed onto the target only
//! once complete, so a target that exists is always a finished download.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use indicatif::ProgressBar;
use reqwest::{Client, Url};
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::warn;

use crate::{
    batch::{run_pool, Outcome, Status, Summary},
    discover::FetchPair,
    error::DownloadError,
};

/// Write buffer size; the body reaches disk in blocks of this size.
pub const CHUNK_SIZE: usize = 64 * 1024;

pub type ByteStream = BoxStream<'static, Result<Bytes, DownloadError>>;

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Opens `url` and returns its body as a stream of chunks.
    async fn open(&self, url: &Url) -> Result<ByteStream, DownloadError>;
}

#[derive(Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("synoptic/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn open(&self, url: &Url) -> Result<ByteStream, DownloadError> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        Ok(response.bytes_stream().map_err(DownloadError::from).boxed())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    AlreadyExists(String),
    Succeeded { file_name: String, bytes: u64 },
    Failed { url: String, reason: String },
}

impl Outcome for DownloadOutcome {
    fn status(&self) -> Status {
        match self {
            DownloadOutcome::AlreadyExists(_) => Status::Skipped,
            DownloadOutcome::Succeeded { .. } => Status::Succeeded,
            DownloadOutcome::Failed { .. } => Status::Failed,
        }
    }

    fn subject(&self) -> String {
        match self {
            DownloadOutcome::AlreadyExists(file_name) => file_name.clone(),
            DownloadOutcome::Succeeded { file_name, .. } => file_name.clone(),
            DownloadOutcome::Failed { url, .. } => url.clone(),
        }
    }

    fn reason(&self) -> Option<String> {
        match self {
            DownloadOutcome::Failed { url, reason } => Some(format!("{}: {}", url, reason)),
            _ => None,
        }
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOutcome::AlreadyExists(file_name) => write!(f, "{} exists", file_name),
            DownloadOutcome::Succeeded { file_name, bytes } => {
                write!(f, "{} ({} bytes)", file_name, bytes)
            }
            DownloadOutcome::Failed { url, reason } => write!(f, "{} failed: {}", url, reason),
        }
    }
}

/// Downloads pairs from a remote source.
pub struct Fetcher<S> {
    source: S,
}

impl<S: RemoteSource> Fetcher<S> {
    pub fn new(source: S) -> Self {
        Fetcher { source }
    }

    /// Fetches one pair. Never fails: errors become `DownloadOutcome::Failed`.
    pub async fn fetch(&self, pair: &FetchPair) -> DownloadOutcome {
        let file_name = pair.target.file_name();

        // Discovery may be stale or list the same file twice
        if pair.target.exists() {
            return DownloadOutcome::AlreadyExists(file_name);
        }

        match self.download(pair).await {
            Ok(bytes) => DownloadOutcome::Succeeded { file_name, bytes },
            Err(e) => {
                let url = pair.remote.to_string();
                warn!(slot = %pair.slot, url = %url, error = %e, "Download failed");
                DownloadOutcome::Failed {
                    url,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Fetches every pair with at most `workers` downloads in flight.
    pub async fn fetch_all(
        &self,
        pairs: &[FetchPair],
        workers: usize,
        progress: &ProgressBar,
    ) -> Summary {
        let outcomes = run_pool(pairs, workers, progress, |pair| self.fetch(pair)).await;

        Summary::tally(&outcomes)
    }

    async fn download(&self, pair: &FetchPair) -> Result<u64, DownloadError> {
        let url = pair.remote.url()?;
        let partial = pair.target.partial_path();

        let written = match self.stream_to(&url, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&partial, pair.target.path()).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }

        Ok(written)
    }

    async fn stream_to(&self, url: &Url, partial: &std::path::Path) -> Result<u64, DownloadError> {
        let mut stream = self.source.open(url).await?;

        let file = File::create(partial).await?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        Ok(written)
    }
}

// -- Tests -------------------------------------------------------------------
