// Tracking of in-flight submissions.
// Submission ids come from an ever-increasing global counter and are never
// recycled, so a cleared slot can be reused without collision.

use std::collections::HashMap;

use log::debug;
use tokio::task::AbortHandle;

/// Cancellation handle for one in-flight submission.
#[derive(Debug)]
pub struct SubmissionEntry {
    pub author_sequence_id: u64,
    abort: AbortHandle,
}

/// Maps a submission id to its cancellation handle while the request is in
/// flight.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: HashMap<u64, SubmissionEntry>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        CorrelationTable { entries: HashMap::new() }
    }

    pub fn register(&mut self, submission_id: u64, author_sequence_id: u64, abort: AbortHandle) {
        debug!(
            "Registered submission {} for sequence id {}",
            submission_id, author_sequence_id
        );
        self.entries
            .insert(submission_id, SubmissionEntry { author_sequence_id, abort });
    }

    /// Abort the in-flight request for this submission id and drop the slot.
    /// Unknown ids are a no-op.
    pub fn cancel(&mut self, submission_id: u64) {
        if let Some(entry) = self.entries.remove(&submission_id) {
            debug!("Aborting submission {}", submission_id);
            entry.abort.abort();
        }
    }

    /// Drop a settled submission's slot without aborting anything.
    pub fn clear(&mut self, submission_id: u64) {
        self.entries.remove(&submission_id);
    }

    pub fn get(&self, submission_id: u64) -> Option<&SubmissionEntry> {
        self.entries.get(&submission_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
