//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use chrono::NaiveDate;
use clap::{command, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    config::{default_root, FetchConfig, NormalizeConfig},
    index::DEFAULT_DIRECTORY_TEMPLATE,
    normalize::NormalizeParams,
    slot::Archive,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Contains the commands
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover and download synoptic files for a date range
    Fetch(FetchArgs),
    /// Normalize downloaded files in place
    Normalize(NormalizeArgs),
}

#[derive(Args, Debug, Clone)]
/// Which files of the local archive to work on
pub struct ArchiveArgs {
    /// Archive directory [default: ~/aia_synoptic]
    #[arg(long, env = "SYNOPTIC_ROOT")]
    pub root: Option<PathBuf>,

    /// Wavelength channel, as it appears in remote file names
    #[arg(long, default_value = "0193", env = "SYNOPTIC_CHANNEL")]
    pub channel: String,

    /// Instrument prefix of local file names
    #[arg(long, default_value = "AIA", env = "SYNOPTIC_INSTRUMENT")]
    pub instrument: String,
}

impl ArchiveArgs {
    fn archive(&self) -> Archive {
        let root = self.root.clone().unwrap_or_else(default_root);
        Archive::new(root, &self.instrument, &self.channel)
    }
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// First day, YYYY-MM-DD
    #[arg(long, env = "SYNOPTIC_START")]
    pub start: NaiveDate,

    /// Last day (inclusive), YYYY-MM-DD
    #[arg(long, env = "SYNOPTIC_END")]
    pub end: NaiveDate,

    #[command(flatten)]
    pub archive: ArchiveArgs,

    /// Concurrent lookups and downloads
    #[arg(long, default_value_t = 20, env = "SYNOPTIC_WORKERS")]
    pub workers: usize,

    /// Remote directory per slot; {year}, {month}, {day} and {hour} are expanded
    #[arg(
        long,
        default_value = DEFAULT_DIRECTORY_TEMPLATE,
        env = "SYNOPTIC_DIRECTORY_TEMPLATE"
    )]
    pub directory_template: String,

    /// Directory listing timeout in seconds
    #[arg(long, default_value_t = 10, env = "SYNOPTIC_LISTING_TIMEOUT")]
    pub listing_timeout: u64,

    /// Per-file download timeout in seconds
    #[arg(long, default_value_t = 300, env = "SYNOPTIC_DOWNLOAD_TIMEOUT")]
    pub download_timeout: u64,
}

impl FetchArgs {
    pub fn config(&self) -> FetchConfig {
        FetchConfig {
            start: self.start,
            end: self.end,
            archive: self.archive.archive(),
            workers: self.workers,
            directory_template: self.directory_template.clone(),
            listing_timeout: Duration::from_secs(self.listing_timeout),
            download_timeout: Duration::from_secs(self.download_timeout),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct NormalizeArgs {
    #[command(flatten)]
    pub archive: ArchiveArgs,

    /// Files normalized concurrently
    #[arg(long, default_value_t = 30, env = "SYNOPTIC_WORKERS")]
    pub workers: usize,

    /// Lower clip percentile
    #[arg(long, default_value_t = 1.0, env = "SYNOPTIC_LOW_PERCENTILE")]
    pub low_percentile: f64,

    /// Upper clip percentile
    #[arg(long, default_value_t = 99.0, env = "SYNOPTIC_HIGH_PERCENTILE")]
    pub high_percentile: f64,

    /// Lowest output value
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub range_min: f64,

    /// Highest output value
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    pub range_max: f64,

    /// Normalize files again even if already normalized
    #[arg(long)]
    pub force: bool,
}

impl NormalizeArgs {
    pub fn config(&self) -> NormalizeConfig {
        NormalizeConfig {
            archive: self.archive.archive(),
            workers: self.workers,
            params: NormalizeParams {
                low_percentile: self.low_percentile,
                high_percentile: self.high_percentile,
                range_min: self.range_min,
                range_max: self.range_max,
                force: self.force,
            },
        }
    }
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    ProgressBar::new(size).with_message(message).with_style(
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    )
}

// -- Tests -------------------------------------------------------------------
