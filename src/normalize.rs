//! Per-file normalization of archive images.
//!
//! Each image is clipped to percentile bounds computed from its own pixels,
//! square-root compressed, then min-max rescaled to a target range and
//! written back to the same path.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use indicatif::ProgressBar;
use ndarray::Array2;
use tracing::{debug, warn};

use crate::{
    batch::{run_pool, Outcome, Status, Summary},
    fits::{FitsError, FitsFile},
    slot::Archive,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeParams {
    pub low_percentile: f64,
    pub high_percentile: f64,
    pub range_min: f64,
    pub range_max: f64,
    /// Re-normalize files that already carry the marker.
    pub force: bool,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        NormalizeParams {
            low_percentile: 1.0,
            high_percentile: 99.0,
            range_min: 0.0,
            range_max: 1.0,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Clip limits of one image, derived from that image only.
pub struct ClipBounds {
    pub low: f64,
    pub high: f64,
}

impl ClipBounds {
    /// Percentile bounds over the finite pixels of `data`.
    ///
    /// The lower bound is never negative and the upper bound never below
    /// the lower. `None` when the image has no finite pixel.
    pub fn of(data: &Array2<f64>, params: &NormalizeParams) -> Option<Self> {
        let mut values: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
        values.sort_unstable_by(f64::total_cmp);

        let low = percentile(&values, params.low_percentile)?.max(0.0);
        let high = percentile(&values, params.high_percentile)?.max(low);

        Some(ClipBounds { low, high })
    }
}

/// Linear interpolation between the closest ranks of `sorted`.
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * last as f64;
    let below = rank.floor() as usize;
    let above = (below + 1).min(last);
    let fraction = rank - below as f64;

    Some(sorted[below] + (sorted[above] - sorted[below]) * fraction)
}

/// Returns the normalized image and whether it was degenerate.
///
/// A degenerate image (no finite pixel, or constant after compression) comes
/// back filled with `range_min`. Non-finite pixels always map to `range_min`.
pub fn normalize_array(data: &Array2<f64>, params: &NormalizeParams) -> (Array2<f64>, bool) {
    let floor = Array2::from_elem(data.raw_dim(), params.range_min);

    let Some(bounds) = ClipBounds::of(data, params) else {
        return (floor, true);
    };

    let compressed = data.mapv(|v| {
        if v.is_finite() {
            v.clamp(bounds.low, bounds.high).sqrt()
        } else {
            f64::NAN
        }
    });

    let (min, max) = compressed
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if max <= min {
        return (floor, true);
    }

    let span = params.range_max - params.range_min;
    let rescaled = compressed.mapv(|v| {
        if v.is_finite() {
            ((v - min) / (max - min) * span + params.range_min)
                .clamp(params.range_min, params.range_max)
        } else {
            params.range_min
        }
    });

    (rescaled, false)
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    AlreadyNormalized(PathBuf),
    Normalized(PathBuf),
    /// Written as a constant image at the bottom of the range.
    Degenerate(PathBuf),
    Failed(String),
}

impl Outcome for NormalizeOutcome {
    fn status(&self) -> Status {
        match self {
            NormalizeOutcome::AlreadyNormalized(_) => Status::Skipped,
            NormalizeOutcome::Normalized(_) | NormalizeOutcome::Degenerate(_) => {
                Status::Succeeded
            }
            NormalizeOutcome::Failed(_) => Status::Failed,
        }
    }

    fn subject(&self) -> String {
        match self {
            NormalizeOutcome::AlreadyNormalized(path)
            | NormalizeOutcome::Normalized(path)
            | NormalizeOutcome::Degenerate(path) => file_name(path),
            NormalizeOutcome::Failed(reason) => reason.clone(),
        }
    }

    fn reason(&self) -> Option<String> {
        match self {
            NormalizeOutcome::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for NormalizeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeOutcome::AlreadyNormalized(path) => {
                write!(f, "{} already normalized", path.display())
            }
            NormalizeOutcome::Normalized(path) => write!(f, "{} normalized", path.display()),
            NormalizeOutcome::Degenerate(path) => {
                write!(f, "{} is constant, written at range minimum", path.display())
            }
            NormalizeOutcome::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn corrupted(path: &Path, error: impl fmt::Display) -> NormalizeOutcome {
    NormalizeOutcome::Failed(format!("file corrupted: {}, {}", path.display(), error))
}

/// Normalizes one file in place. Never fails: errors become `Failed`.
pub fn normalize_file(path: &Path, params: &NormalizeParams) -> NormalizeOutcome {
    match rewrite(path, params) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Normalization failed");
            corrupted(path, e)
        }
    }
}

fn rewrite(path: &Path, params: &NormalizeParams) -> Result<NormalizeOutcome, FitsError> {
    let mut fits = FitsFile::read(path)?;

    if fits.is_normalized() && !params.force {
        debug!(path = %path.display(), "Already normalized");
        return Ok(NormalizeOutcome::AlreadyNormalized(path.to_path_buf()));
    }

    let payload = fits.payload()?;
    debug!(
        path = %path.display(),
        hdu = payload.index,
        hdus = fits.hdus().len(),
        cards = payload.header.cards().len(),
        "Decoded image"
    );
    let (normalized, degenerate) = normalize_array(&payload.data, params);

    fits.replace_image(payload.index, &normalized)?;
    fits.write_atomic(path)?;

    if degenerate {
        warn!(path = %path.display(), "Image has no dynamic range, written as constant");
        Ok(NormalizeOutcome::Degenerate(path.to_path_buf()))
    } else {
        Ok(NormalizeOutcome::Normalized(path.to_path_buf()))
    }
}

/// Sorted paths of the finished archive files under `archive.root`.
pub fn archive_files(archive: &Archive) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for entry in fs::read_dir(&archive.root)? {
        let path = entry?.path();
        if path.is_file() && archive.is_member(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths)
}

/// Normalizes every path with at most `workers` files in flight.
///
/// The numeric work of each file runs on the blocking thread pool.
pub async fn normalize_all(
    paths: Vec<PathBuf>,
    params: NormalizeParams,
    workers: usize,
    progress: &ProgressBar,
) -> Summary {
    let outcomes = run_pool(paths, workers, progress, |path| async move {
        let task_path = path.clone();
        match tokio::task::spawn_blocking(move || normalize_file(&task_path, &params)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Normalization task aborted");
                corrupted(&path, e)
            }
        }
    })
    .await;

    Summary::tally(&outcomes)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::TempDir;

    use super::*;
    use crate::fits::header::{Card, Header, Value};

    fn write_image(path: &Path, rows: usize, cols: usize, values: &[f32]) {
        let mut header = Header::default();
        for (keyword, value) in [
            ("SIMPLE", Value::Logical(true)),
            ("BITPIX", Value::Integer(-32)),
            ("NAXIS", Value::Integer(2)),
            ("NAXIS1", Value::Integer(cols as i64)),
            ("NAXIS2", Value::Integer(rows as i64)),
            ("TELESCOP", Value::Text("SDO/AIA".to_string())),
        ] {
            header.push(Card::new(keyword, &value, None));
        }

        let mut bytes = header.encode();
        for v in values {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        bytes.resize(bytes.len().div_ceil(2880) * 2880, 0);

        fs::write(path, bytes).unwrap();
    }

    // Compressed image whose header claims far more pixels than its tiles hold
    fn write_oversized_tiles(path: &Path) {
        let mut primary = Header::default();
        for (keyword, value) in [
            ("SIMPLE", Value::Logical(true)),
            ("BITPIX", Value::Integer(8)),
            ("NAXIS", Value::Integer(0)),
            ("EXTEND", Value::Logical(true)),
        ] {
            primary.push(Card::new(keyword, &value, None));
        }

        let mut table = Header::default();
        for (keyword, value) in [
            ("XTENSION", Value::Text("BINTABLE".to_string())),
            ("BITPIX", Value::Integer(8)),
            ("NAXIS", Value::Integer(2)),
            ("NAXIS1", Value::Integer(8)),
            ("NAXIS2", Value::Integer(1)),
            ("PCOUNT", Value::Integer(3)),
            ("GCOUNT", Value::Integer(1)),
            ("TFIELDS", Value::Integer(1)),
            ("TTYPE1", Value::Text("COMPRESSED_DATA".to_string())),
            ("TFORM1", Value::Text("1PB(3)".to_string())),
            ("ZIMAGE", Value::Logical(true)),
            ("ZCMPTYPE", Value::Text("RICE_1".to_string())),
            ("ZBITPIX", Value::Integer(16)),
            ("ZNAXIS", Value::Integer(2)),
            ("ZNAXIS1", Value::Integer(400_000)),
            ("ZNAXIS2", Value::Integer(400_000)),
            ("ZTILE1", Value::Integer(400_000)),
            ("ZTILE2", Value::Integer(400_000)),
        ] {
            table.push(Card::new(keyword, &value, None));
        }

        let mut bytes = primary.encode();
        bytes.extend(table.encode());
        bytes.extend_from_slice(&[0, 0, 0, 3, 0, 0, 0, 0, 0x00, 0x09, 0x00]);
        bytes.resize(bytes.len().div_ceil(2880) * 2880, 0);

        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn should_interpolate_percentiles() {
        let sorted = [0.0, 10.0, 20.0, 30.0, 40.0];

        assert_eq!(percentile(&sorted, 0.0), Some(0.0));
        assert_eq!(percentile(&sorted, 100.0), Some(40.0));
        assert_eq!(percentile(&sorted, 50.0), Some(20.0));
        assert_abs_diff_eq!(percentile(&sorted, 10.0).unwrap(), 4.0, epsilon = 1e-12);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn should_rescale_extremes_to_unit_range() {
        let data = array![[0.0, 100.0], [0.0, 100.0]];
        let (out, degenerate) = normalize_array(&data, &NormalizeParams::default());

        assert!(!degenerate);
        assert_eq!(out, array![[0.0, 1.0], [0.0, 1.0]]);
    }

    #[test]
    fn should_clip_then_compress() {
        let data = Array2::from_shape_vec((1, 101), (0..=100).map(f64::from).collect()).unwrap();
        let (out, _) = normalize_array(&data, &NormalizeParams::default());

        // Clipped to [1, 99], so both tails saturate
        assert_eq!(out[[0, 0]], 0.0);
        assert_eq!(out[[0, 1]], 0.0);
        assert_eq!(out[[0, 99]], 1.0);
        assert_eq!(out[[0, 100]], 1.0);

        let expected = (25.0_f64.sqrt() - 1.0) / (99.0_f64.sqrt() - 1.0);
        assert_abs_diff_eq!(out[[0, 25]], expected, epsilon = 1e-12);
    }

    #[test]
    fn should_keep_values_in_target_range() {
        let data = array![[-50.0, 3.5, 1e6], [f64::NAN, 42.0, 7.25]];
        let (out, _) = normalize_array(&data, &NormalizeParams::default());

        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(out[[1, 0]], 0.0);
    }

    #[test]
    fn should_zero_constant_image() {
        let data = Array2::from_elem((3, 3), 17.0);
        let (out, degenerate) = normalize_array(&data, &NormalizeParams::default());

        assert!(degenerate);
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn should_zero_negative_image() {
        let data = array![[-3.0, -2.0], [-1.0, -10.0]];
        let params = NormalizeParams::default();

        assert_eq!(ClipBounds::of(&data, &params), Some(ClipBounds { low: 0.0, high: 0.0 }));

        let (out, degenerate) = normalize_array(&data, &params);
        assert!(degenerate);
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn should_honour_custom_range() {
        let params = NormalizeParams {
            range_min: -1.0,
            range_max: 1.0,
            ..Default::default()
        };
        let (out, _) = normalize_array(&array![[0.0, 100.0]], &params);

        assert_eq!(out, array![[-1.0, 1.0]]);
    }

    #[test]
    fn should_rewrite_file_and_skip_second_run() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("AIA_0193_20240101_0000.fits");
        write_image(&path, 2, 2, &[0.0, 100.0, 25.0, 100.0]);

        let params = NormalizeParams::default();
        assert_eq!(
            normalize_file(&path, &params),
            NormalizeOutcome::Normalized(path.clone())
        );

        let fits = FitsFile::read(&path).unwrap();
        let payload = fits.payload().unwrap();
        assert!(fits.is_normalized());
        assert_eq!(payload.header.text("TELESCOP"), Some("SDO/AIA".to_string()));
        assert!(payload.data.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(payload.data[[0, 1]], 1.0);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(
            normalize_file(&path, &params),
            NormalizeOutcome::AlreadyNormalized(path.clone())
        );
        assert_eq!(fs::read(&path).unwrap(), bytes);

        let forced = NormalizeParams {
            force: true,
            ..params
        };
        assert_eq!(
            normalize_file(&path, &forced),
            NormalizeOutcome::Normalized(path.clone())
        );
    }

    #[test]
    fn should_report_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("AIA_0193_20240101_0100.fits");
        fs::write(&path, b"<html>503 Service Unavailable</html>").unwrap();

        match normalize_file(&path, &NormalizeParams::default()) {
            NormalizeOutcome::Failed(reason) => {
                assert!(reason.starts_with(&format!("file corrupted: {}, ", path.display())));
            }
            other => panic!("expected a failure, got {:?}", other),
        }
        assert_eq!(
            fs::read(&path).unwrap(),
            b"<html>503 Service Unavailable</html>".to_vec()
        );
    }

    #[test]
    fn should_list_archive_members_only() {
        let tmp = TempDir::new().unwrap();
        let archive = Archive::new(tmp.path(), "AIA", "0193");
        for name in [
            "AIA_0193_20240101_0100.fits",
            "AIA_0193_20240101_0000.fits",
            "AIA_0193_20240101_0200.fits.part",
            "AIA_0171_20240101_0000.fits",
            "notes.txt",
        ] {
            fs::write(tmp.path().join(name), b"").unwrap();
        }

        let files = archive_files(&archive).unwrap();

        assert_eq!(
            files,
            vec![
                tmp.path().join("AIA_0193_20240101_0000.fits"),
                tmp.path().join("AIA_0193_20240101_0100.fits"),
            ]
        );
    }

    #[tokio::test]
    async fn should_isolate_failures_in_batch() {
        let tmp = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for hour in 0..4 {
            let path = tmp.path().join(format!("AIA_0193_20240101_{:02}00.fits", hour));
            write_image(&path, 1, 3, &[hour as f32, 10.0, 20.0]);
            paths.push(path);
        }
        let broken = tmp.path().join("AIA_0193_20240101_0400.fits");
        fs::write(&broken, b"truncated").unwrap();
        paths.push(broken);

        let params = NormalizeParams::default();
        let summary = normalize_all(paths, params, 2, &ProgressBar::hidden()).await;

        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 1);
        assert!(summary.failure_sample[0].starts_with("file corrupted: "));
    }

    #[tokio::test]
    async fn should_fail_oversized_image_without_stopping_batch() {
        let tmp = TempDir::new().unwrap();
        let oversized = tmp.path().join("AIA_0193_20240101_0000.fits");
        write_oversized_tiles(&oversized);
        let good = tmp.path().join("AIA_0193_20240101_0100.fits");
        write_image(&good, 1, 3, &[0.0, 10.0, 20.0]);

        let params = NormalizeParams::default();
        let summary = normalize_all(
            vec![oversized.clone(), good.clone()],
            params,
            2,
            &ProgressBar::hidden(),
        )
        .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        assert!(summary.failure_sample[0].contains(&oversized.display().to_string()));
        assert!(FitsFile::read(&good).unwrap().is_normalized());
    }
}
