//! Bounded fan-out/fan-in over independent units of work.

use std::{fmt, future::Future};

use futures::{stream, StreamExt};
use indicatif::ProgressBar;

/// Number of failure reasons kept for the end-of-run summary.
pub const FAILURE_SAMPLE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Skipped,
    Succeeded,
    Unavailable,
    Failed,
}

/// A per-unit result the batch runner can classify and report.
pub trait Outcome {
    fn status(&self) -> Status;

    /// Short description of the unit, shown as the progress bar message.
    fn subject(&self) -> String;

    /// Failure reason, if the unit failed.
    fn reason(&self) -> Option<String> {
        None
    }
}

/// Runs `work` over every unit with at most `workers` in flight.
///
/// Units are pulled lazily from `units`, so the input may be much larger than
/// the pool. Every outcome is returned, in completion order.
pub async fn run_pool<U, O, F, Fut>(
    units: impl IntoIterator<Item = U>,
    workers: usize,
    progress: &ProgressBar,
    work: F,
) -> Vec<O>
where
    F: Fn(U) -> Fut,
    Fut: Future<Output = O>,
    O: Outcome,
{
    let mut outcomes = Vec::new();
    let mut results = stream::iter(units).map(work).buffer_unordered(workers.max(1));

    while let Some(outcome) = results.next().await {
        let label = match outcome.status() {
            Status::Skipped => "Skipped",
            Status::Succeeded => "Done",
            Status::Unavailable => "Missing",
            Status::Failed => "Failed",
        };
        progress.set_message(format!("{}: {}", label, outcome.subject()));
        progress.inc(1);
        outcomes.push(outcome);
    }

    outcomes
}

#[derive(Debug, Default, Clone, PartialEq)]
/// Aggregate outcome counts of one phase.
pub struct Summary {
    pub skipped: usize,
    pub succeeded: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub failure_sample: Vec<String>,
}

impl Summary {
    pub fn tally<'a, O: Outcome + 'a>(outcomes: impl IntoIterator<Item = &'a O>) -> Self {
        let mut summary = Summary::default();

        for outcome in outcomes {
            match outcome.status() {
                Status::Skipped => summary.skipped += 1,
                Status::Succeeded => summary.succeeded += 1,
                Status::Unavailable => summary.unavailable += 1,
                Status::Failed => {
                    summary.failed += 1;
                    if summary.failure_sample.len() < FAILURE_SAMPLE_SIZE {
                        if let Some(reason) = outcome.reason() {
                            summary.failure_sample.push(reason);
                        }
                    }
                }
            }
        }

        summary
    }

    pub fn total(&self) -> usize {
        self.skipped + self.succeeded + self.unavailable + self.failed
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total: {} succeeded, {} skipped, {} unavailable, {} failed",
            self.total(),
            self.succeeded,
            self.skipped,
            self.unavailable,
            self.failed
        )?;

        for reason in &self.failure_sample {
            write!(f, "\n  - {}", reason)?;
        }
        if self.failed > self.failure_sample.len() {
            write!(f, "\n  ... and {} more", self.failed - self.failure_sample.len())?;
        }

        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        sync::Arc,
        time::Duration,
    };

    use super::*;

    #[derive(Debug)]
    struct Unit(usize, Status);

    impl Outcome for Unit {
        fn status(&self) -> Status {
            self.1
        }

        fn subject(&self) -> String {
            format!("unit {}", self.0)
        }

        fn reason(&self) -> Option<String> {
            Some(format!("unit {} broke", self.0))
        }
    }

    #[tokio::test]
    async fn should_return_every_outcome() {
        let pb = ProgressBar::hidden();
        let outcomes = run_pool(0..50, 4, &pb, |i| async move { Unit(i, Status::Succeeded) }).await;

        let mut ids: Vec<usize> = outcomes.iter().map(|o| o.0).collect();
        ids.sort();

        assert_eq!(ids, (0..50).collect::<Vec<_>>());
        assert_eq!(pb.position(), 50);
    }

    #[tokio::test]
    async fn should_never_exceed_worker_cap() {
        let pb = ProgressBar::hidden();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        run_pool(0..40, 3, &pb, |i| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Unit(i, Status::Succeeded)
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn should_tally_and_cap_failure_sample() {
        let mut outcomes = vec![Unit(0, Status::Skipped), Unit(1, Status::Unavailable)];
        outcomes.extend((2..17).map(|i| Unit(i, Status::Failed)));
        outcomes.push(Unit(17, Status::Succeeded));

        let summary = Summary::tally(&outcomes);

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.unavailable, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 15);
        assert_eq!(summary.failure_sample.len(), FAILURE_SAMPLE_SIZE);
        assert_eq!(summary.total(), 18);
        assert!(summary.to_string().contains("... and 5 more"));
    }
}
