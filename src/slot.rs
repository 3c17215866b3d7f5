//! Candidate observation slots and their deterministic local file names.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;

pub const HOURS_PER_DAY: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// One candidate observation instant: a calendar day and an hour of that day.
pub struct TimeSlot {
    pub date: NaiveDate,
    pub hour: u32,
}

impl TimeSlot {
    pub fn new(date: NaiveDate, hour: u32) -> Self {
        debug_assert!(hour < HOURS_PER_DAY);
        TimeSlot { date, hour }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.date, self.hour)
    }
}

/// Lazily yields every hourly slot from `start` to `end`, both days inclusive.
pub fn candidates(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = TimeSlot> {
    let days = start.iter_days().take_while(move |day| *day <= end);
    days.flat_map(|date| (0..HOURS_PER_DAY).map(move |hour| TimeSlot::new(date, hour)))
}

/// Number of slots `candidates` yields for the same bounds.
pub fn candidate_count(start: NaiveDate, end: NaiveDate) -> u64 {
    if start > end {
        return 0;
    }
    let days = (end - start).num_days() as u64 + 1;
    days * HOURS_PER_DAY as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Local path a slot is saved to. Its existence marks the slot as fetched.
pub struct LocalTarget(PathBuf);

impl LocalTarget {
    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn exists(&self) -> bool {
        self.0.is_file()
    }

    /// Sibling path the download is streamed into before the final rename.
    pub fn partial_path(&self) -> PathBuf {
        let mut name = self.0.as_os_str().to_owned();
        name.push(".part");
        PathBuf::from(name)
    }

    pub fn file_name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

impl fmt::Display for LocalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Clone)]
/// Naming scheme of the local archive: `{root}/{instrument}_{channel}_{YYYYMMDD}_{HH}00.{ext}`.
pub struct Archive {
    pub root: PathBuf,
    pub instrument: String,
    pub channel: String,
    pub extension: String,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>, instrument: &str, channel: &str) -> Self {
        Archive {
            root: root.into(),
            instrument: instrument.to_string(),
            channel: channel.to_string(),
            extension: "fits".to_string(),
        }
    }

    pub fn target(&self, slot: &TimeSlot) -> LocalTarget {
        let file_name = format!(
            "{}_{}_{}_{:02}00.{}",
            self.instrument,
            self.channel,
            slot.date.format("%Y%m%d"),
            slot.hour,
            self.extension
        );

        LocalTarget(self.root.join(file_name))
    }

    /// Remote entry suffix identifying the channel, e.g. `_0193.fits`.
    pub fn remote_suffix(&self) -> String {
        format!("_{}.{}", self.channel, self.extension)
    }

    /// Whether `path` looks like a finished file of this archive.
    pub fn is_member(&self, path: &Path) -> bool {
        let prefix = format!("{}_{}_", self.instrument, self.channel);
        let suffix = format!(".{}", self.extension);

        path.file_name()
            .map(|n| n.to_string_lossy())
            .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(&suffix))
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn should_enumerate_two_days() {
        let slots: Vec<TimeSlot> = candidates(date(2024, 1, 1), date(2024, 1, 2)).collect();

        assert_eq!(slots.len(), 48);
        assert_eq!(slots[0], TimeSlot::new(date(2024, 1, 1), 0));
        assert_eq!(slots[23], TimeSlot::new(date(2024, 1, 1), 23));
        assert_eq!(slots[24], TimeSlot::new(date(2024, 1, 2), 0));
        assert_eq!(slots[47], TimeSlot::new(date(2024, 1, 2), 23));
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn should_count_slots_without_enumerating() {
        assert_eq!(candidate_count(date(2024, 1, 1), date(2024, 1, 2)), 48);
        assert_eq!(candidate_count(date(2024, 2, 28), date(2024, 3, 1)), 72);
        assert_eq!(candidate_count(date(2024, 1, 2), date(2024, 1, 1)), 0);
    }

    #[test]
    fn should_yield_nothing_for_reversed_range() {
        assert_eq!(candidates(date(2024, 1, 2), date(2024, 1, 1)).count(), 0);
    }

    #[test]
    fn should_restart_deterministically() {
        let first: Vec<_> = candidates(date(2023, 12, 31), date(2024, 1, 1)).collect();
        let second: Vec<_> = candidates(date(2023, 12, 31), date(2024, 1, 1)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn should_name_local_target() {
        let archive = Archive::new("/data", "AIA", "0193");
        let target = archive.target(&TimeSlot::new(date(2024, 1, 1), 3));

        assert_eq!(target.path(), Path::new("/data/AIA_0193_20240101_0300.fits"));
        assert_eq!(target.file_name(), "AIA_0193_20240101_0300.fits");
        assert_eq!(
            target.partial_path(),
            PathBuf::from("/data/AIA_0193_20240101_0300.fits.part")
        );
    }

    #[test]
    fn should_recognise_archive_members() {
        let archive = Archive::new("/data", "AIA", "0193");

        assert_eq!(archive.remote_suffix(), "_0193.fits");
        assert!(archive.is_member(Path::new("/data/AIA_0193_20240101_0300.fits")));
        assert!(!archive.is_member(Path::new("/data/AIA_0193_20240101_0300.fits.part")));
        assert!(!archive.is_member(Path::new("/data/AIA_0171_20240101_0300.fits")));
    }
}
