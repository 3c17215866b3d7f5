//! Normalize every downloaded file of the archive in place.

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    batch::Summary,
    cli::{create_progress_bar, create_spinner},
    config::NormalizeConfig,
    normalize::{archive_files, normalize_all},
};

pub async fn normalize(config: &NormalizeConfig) -> Result<Summary> {
    config.validate()?;

    let bar = create_spinner("Scanning archive...".to_string());
    let paths = archive_files(&config.archive).with_context(|| {
        format!(
            "Failed to list archive directory {}",
            config.archive.root.display()
        )
    })?;
    bar.finish_with_message(format!("{} files found", paths.len()));

    info!(files = paths.len(), root = %config.archive.root.display(), "Normalizing files");

    let bar = create_progress_bar(paths.len() as u64, "Normalizing...".to_string());
    let summary = normalize_all(paths, config.params, config.workers, &bar).await;
    bar.finish_with_message("Normalization complete");

    info!(%summary, "Normalization finished");
    Ok(summary)
}
