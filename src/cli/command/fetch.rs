//! Discover the files available for a date range and download them.

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    batch::Summary,
    cli::create_progress_bar,
    config::FetchConfig,
    discover::{Discovery, FetchPair},
    download::{Fetcher, HttpSource},
    index::HttpDirectoryIndex,
    slot::{candidate_count, candidates},
};

/// Counts of both phases of a fetch run.
pub struct FetchReport {
    pub discovery: Summary,
    pub download: Summary,
}

pub async fn fetch(config: &FetchConfig) -> Result<FetchReport> {
    config.validate()?;

    let (pairs, discovery) = discover(config).await?;
    let download = download(config, &pairs).await?;

    Ok(FetchReport {
        discovery,
        download,
    })
}

async fn discover(config: &FetchConfig) -> Result<(Vec<FetchPair>, Summary)> {
    let index = HttpDirectoryIndex::new(config.listing_timeout)
        .context("Failed to build directory listing client")?;
    let discovery = Discovery::new(index, config.archive.clone(), &config.directory_template);

    let total = candidate_count(config.start, config.end);
    info!(start = %config.start, end = %config.end, slots = total, "Discovering files");

    let bar = create_progress_bar(total, "Listing directories...".to_string());
    let (pairs, summary) = discovery
        .discover(candidates(config.start, config.end), config.workers, &bar)
        .await;
    bar.finish_with_message(format!("{} files to download", pairs.len()));

    info!(%summary, "Discovery finished");
    Ok((pairs, summary))
}

async fn download(config: &FetchConfig, pairs: &[FetchPair]) -> Result<Summary> {
    let source =
        HttpSource::new(config.download_timeout).context("Failed to build download client")?;
    let fetcher = Fetcher::new(source);

    info!(files = pairs.len(), root = %config.archive.root.display(), "Downloading files");

    let bar = create_progress_bar(pairs.len() as u64, "Downloading...".to_string());
    let summary = fetcher.fetch_all(pairs, config.workers, &bar).await;
    bar.finish_with_message("Downloads complete");

    info!(%summary, "Download finished");
    Ok(summary)
}
