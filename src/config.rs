//! Validated run configuration for each command.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::NaiveDate;
use tracing::debug;

use crate::{error::ConfigError, normalize::NormalizeParams, slot::Archive};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub archive: Archive,
    pub workers: usize,
    pub directory_template: String,
    pub listing_timeout: Duration,
    pub download_timeout: Duration,
}

impl FetchConfig {
    /// Checks every setting and prepares the archive root.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start > self.end {
            return Err(ConfigError::InvalidDateRange {
                start: self.start,
                end: self.end,
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.listing_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("listing"));
        }
        if self.download_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("download"));
        }

        let placeholders = ["{year}", "{month}", "{day}", "{hour}"];
        if !placeholders.iter().all(|p| self.directory_template.contains(p)) {
            return Err(ConfigError::InvalidTemplate(self.directory_template.clone()));
        }

        validate_archive(&self.archive)
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeConfig {
    pub archive: Archive,
    pub workers: usize,
    pub params: NormalizeParams,
}

impl NormalizeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let NormalizeParams {
            low_percentile: low,
            high_percentile: high,
            range_min: min,
            range_max: max,
            ..
        } = self.params;

        if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) || low >= high {
            return Err(ConfigError::InvalidPercentiles { low, high });
        }
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ConfigError::InvalidRange { min, max });
        }

        validate_archive(&self.archive)
    }
}

fn validate_archive(archive: &Archive) -> Result<(), ConfigError> {
    if archive.instrument.trim().is_empty() {
        return Err(ConfigError::Empty("instrument"));
    }
    if archive.channel.trim().is_empty() {
        return Err(ConfigError::Empty("channel"));
    }

    prepare_root(&archive.root)
}

/// Creates `root` if needed and checks a file can be written in it.
pub fn prepare_root(root: &Path) -> Result<(), ConfigError> {
    let unwritable = |source| ConfigError::UnwritableRoot {
        path: root.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(root).map_err(unwritable)?;
    tempfile::tempfile_in(root).map_err(unwritable)?;
    debug!(root = %root.display(), "Archive root is writable");

    Ok(())
}

/// `~/aia_synoptic`, or the working directory when there is no home.
pub fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aia_synoptic")
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::index::DEFAULT_DIRECTORY_TEMPLATE;

    fn fetch_config(root: &Path) -> FetchConfig {
        FetchConfig {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            archive: Archive::new(root, "AIA", "0193"),
            workers: 20,
            directory_template: DEFAULT_DIRECTORY_TEMPLATE.to_string(),
            listing_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(300),
        }
    }

    fn normalize_config(root: &Path) -> NormalizeConfig {
        NormalizeConfig {
            archive: Archive::new(root, "AIA", "0193"),
            workers: 30,
            params: NormalizeParams::default(),
        }
    }

    #[test]
    fn should_accept_defaults_and_create_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("archive");

        fetch_config(&root).validate().unwrap();

        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
        normalize_config(&root).validate().unwrap();
    }

    #[test]
    fn should_reject_reversed_dates() {
        let tmp = TempDir::new().unwrap();
        let mut config = fetch_config(tmp.path());
        std::mem::swap(&mut config.start, &mut config.end);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn should_reject_empty_pool_and_timeouts() {
        let tmp = TempDir::new().unwrap();

        let mut config = fetch_config(tmp.path());
        config.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::NoWorkers)));

        let mut config = fetch_config(tmp.path());
        config.download_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroTimeout("download"))
        ));
    }

    #[test]
    fn should_reject_template_without_placeholders() {
        let tmp = TempDir::new().unwrap();
        let mut config = fetch_config(tmp.path());
        config.directory_template = "https://archive.test/{year}/{month}/{day}/".to_string();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn should_reject_blank_channel() {
        let tmp = TempDir::new().unwrap();
        let mut config = fetch_config(tmp.path());
        config.archive.channel = " ".to_string();

        assert!(matches!(config.validate(), Err(ConfigError::Empty("channel"))));
    }

    #[test]
    fn should_reject_bad_percentiles_and_range() {
        let tmp = TempDir::new().unwrap();

        for (low, high) in [(99.0, 1.0), (50.0, 50.0), (-1.0, 99.0), (1.0, 101.0)] {
            let mut config = normalize_config(tmp.path());
            config.params.low_percentile = low;
            config.params.high_percentile = high;
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidPercentiles { .. })
            ));
        }

        let mut config = normalize_config(tmp.path());
        config.params.range_max = f64::INFINITY;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRange { .. })));
    }

    #[test]
    fn should_reject_root_that_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        assert!(matches!(
            prepare_root(&file),
            Err(ConfigError::UnwritableRoot { .. })
        ));
    }
}
