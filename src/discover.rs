//! Discovery: resolves which candidate slots have a file on the remote archive.

use indicatif::ProgressBar;
use tracing::{debug, warn};

use crate::{
    batch::{run_pool, Outcome, Status, Summary},
    index::{directory_url, DirectoryIndex, RemoteLocation},
    slot::{Archive, LocalTarget, TimeSlot},
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A remote file and the local path it is fetched to.
pub struct FetchPair {
    pub slot: TimeSlot,
    pub remote: RemoteLocation,
    pub target: LocalTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    /// The local target already exists; no lookup was made.
    Present(TimeSlot),
    Resolved(FetchPair),
    /// The listing had no file for the channel.
    Missing(TimeSlot),
    Failed { slot: TimeSlot, reason: String },
}

impl Outcome for SlotOutcome {
    fn status(&self) -> Status {
        match self {
            SlotOutcome::Present(_) => Status::Skipped,
            SlotOutcome::Resolved(_) => Status::Succeeded,
            SlotOutcome::Missing(_) => Status::Unavailable,
            SlotOutcome::Failed { .. } => Status::Failed,
        }
    }

    fn subject(&self) -> String {
        match self {
            SlotOutcome::Present(slot) | SlotOutcome::Missing(slot) => slot.to_string(),
            SlotOutcome::Resolved(pair) => pair.remote.file_name.clone(),
            SlotOutcome::Failed { slot, .. } => slot.to_string(),
        }
    }

    fn reason(&self) -> Option<String> {
        match self {
            SlotOutcome::Failed { slot, reason } => Some(format!("{}: {}", slot, reason)),
            _ => None,
        }
    }
}

/// Runs directory lookups for candidate slots.
pub struct Discovery<I> {
    index: I,
    archive: Archive,
    template: String,
}

impl<I: DirectoryIndex> Discovery<I> {
    pub fn new(index: I, archive: Archive, template: &str) -> Self {
        Discovery {
            index,
            archive,
            template: template.to_string(),
        }
    }

    /// Resolves one slot. Never fails: errors become `SlotOutcome::Failed`.
    pub async fn resolve(&self, slot: TimeSlot) -> SlotOutcome {
        let target = self.archive.target(&slot);
        if target.exists() {
            return SlotOutcome::Present(slot);
        }

        let directory = match directory_url(&self.template, &slot) {
            Ok(url) => url,
            Err(e) => {
                warn!(slot = %slot, error = %e, "Directory url expansion failed");
                return SlotOutcome::Failed { slot, reason: e.to_string() };
            }
        };

        let entries = match self.index.list(&directory, &self.archive.remote_suffix()).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(slot = %slot, error = %e, "Directory lookup failed");
                return SlotOutcome::Failed { slot, reason: e.to_string() };
            }
        };

        // Lexicographically first entry wins.
        match entries.into_iter().min() {
            Some(file_name) => SlotOutcome::Resolved(FetchPair {
                slot,
                remote: RemoteLocation { directory, file_name },
                target,
            }),
            None => {
                debug!(slot = %slot, url = %directory, "No file for slot");
                SlotOutcome::Missing(slot)
            }
        }
    }

    /// Resolves every slot with at most `workers` lookups in flight.
    pub async fn discover(
        &self,
        slots: impl IntoIterator<Item = TimeSlot>,
        workers: usize,
        progress: &ProgressBar,
    ) -> (Vec<FetchPair>, Summary) {
        let outcomes = run_pool(slots, workers, progress, |slot| self.resolve(slot)).await;
        let summary = Summary::tally(&outcomes);

        let pairs = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                SlotOutcome::Resolved(pair) => Some(pair),
                _ => None,
            })
            .collect();

        (pairs, summary)
    }
}

// -- Tests -------------------------------------------------------------------
