// Drives one post from optimistic creation through confirmation, timeout,
// retry, or cancellation. Owns the settlement timers and the correlation
// table; everything here runs inside the session's event turn, with I/O
// pushed out to spawned tasks that report back as FeedEvents.

use std::collections::HashMap;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Duration;

use crate::errors::{SettleFailure, TransportError};
use crate::feed::correlation::CorrelationTable;
use crate::feed::state::{FeedState, MergeOutcome};
use crate::feed::FeedEvent;
use crate::models::{Post, SmsTarget};
use crate::transport::{SharedTransport, SubmitRequest, SubmitResponse};

/// If neither success nor failure arrives within this window, the post is
/// treated as failed. The transport's own timeout is ignored; this timer is
/// the single authority.
pub const SETTLEMENT_WINDOW: Duration = Duration::from_secs(10);

pub struct PostLifecycleManager {
    transport: SharedTransport,
    events: mpsc::Sender<FeedEvent>,
    correlation: CorrelationTable,
    /// Ever-increasing submission counter; ids are never recycled.
    submission_seq: u64,
    /// The one authoritative submission per sequence id. Completions whose
    /// submission id no longer matches are stale and ignored.
    current: HashMap<u64, u64>,
    /// Settlement timer per sequence id.
    timers: HashMap<u64, AbortHandle>,
}

impl PostLifecycleManager {
    pub fn new(transport: SharedTransport, events: mpsc::Sender<FeedEvent>) -> Self {
        PostLifecycleManager {
            transport,
            events,
            correlation: CorrelationTable::new(),
            submission_seq: 0,
            current: HashMap::new(),
            timers: HashMap::new(),
        }
    }

    /// Optimistically insert a pending post and start its submission.
    /// Returns the allocated sequence id, or None for an empty message.
    pub fn submit(
        &mut self,
        state: &mut FeedState,
        text: &str,
        sms_targets: &[SmsTarget],
    ) -> Option<u64> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let sequence_id = state.next_sequence_id();
        let post = Post::pending(&state.viewer, sequence_id, text, sms_targets);
        state.push_pending(post);

        let recipient_ids = sms_targets.iter().map(|t| t.id).collect();
        let submission_id = self.dispatch(state, sequence_id, text.to_string(), recipient_ids);
        info!(
            "Submitted post with sequence id {} as submission {}",
            sequence_id, submission_id
        );
        Some(sequence_id)
    }

    /// Issue one delivery attempt and arm its settlement timer.
    fn dispatch(
        &mut self,
        state: &FeedState,
        sequence_id: u64,
        text: String,
        recipient_ids: Vec<u64>,
    ) -> u64 {
        self.submission_seq += 1;
        let submission_id = self.submission_seq;
        self.current.insert(sequence_id, submission_id);

        let transport = self.transport.clone();
        let events = self.events.clone();
        let context = state.context;
        let request = SubmitRequest {
            text,
            author_sequence_id: sequence_id,
            recipient_ids,
        };
        let task = tokio::spawn(async move {
            let result = transport.submit_post(context, request).await;
            if events
                .send(FeedEvent::SubmissionSettled {
                    author_sequence_id: sequence_id,
                    submission_id,
                    result,
                })
                .await
                .is_err()
            {
                debug!("Feed session closed; dropping result of submission {}", submission_id);
            }
        });
        self.correlation
            .register(submission_id, sequence_id, task.abort_handle());
        self.arm_timer(sequence_id, submission_id);
        submission_id
    }

    fn arm_timer(&mut self, sequence_id: u64, submission_id: u64) {
        self.clear_timer(sequence_id);
        let events = self.events.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(SETTLEMENT_WINDOW).await;
            let _ = events
                .send(FeedEvent::SettlementElapsed {
                    author_sequence_id: sequence_id,
                    submission_id,
                })
                .await;
        });
        self.timers.insert(sequence_id, timer.abort_handle());
    }

    fn clear_timer(&mut self, sequence_id: u64) {
        if let Some(timer) = self.timers.remove(&sequence_id) {
            timer.abort();
        }
    }

    /// A submission completed. Stale completions (superseded by a retry or an
    /// earlier realtime confirmation) are discarded against the live state.
    pub fn on_settled(
        &mut self,
        state: &mut FeedState,
        sequence_id: u64,
        submission_id: u64,
        result: Result<SubmitResponse, TransportError>,
    ) {
        if self.current.get(&sequence_id) != Some(&submission_id) {
            debug!(
                "Ignoring stale completion of submission {} for sequence id {}",
                submission_id, sequence_id
            );
            self.correlation.clear(submission_id);
            return;
        }
        match result {
            Ok(response) => {
                self.on_success(state, sequence_id, &response);
                self.clear_timer(sequence_id);
                self.correlation.clear(submission_id);
                self.current.remove(&sequence_id);
            }
            Err(err) => {
                self.correlation.clear(submission_id);
                self.on_failure(state, sequence_id, SettleFailure::from(&err));
            }
        }
    }

    /// A response may acknowledge several objects; only the one matching the
    /// pending post's sequence id triggers replacement.
    fn on_success(&mut self, state: &mut FeedState, sequence_id: u64, response: &SubmitResponse) {
        for payload in &response.objects {
            if payload.author_sequence_id != Some(sequence_id) {
                continue;
            }
            match state.merge_confirmed(payload) {
                MergeOutcome::Replaced => info!(
                    "Post with sequence id {} confirmed ({} sms recipients)",
                    sequence_id, payload.num_sms_recipients
                ),
                MergeOutcome::AlreadyConfirmed => debug!(
                    "Sequence id {} already confirmed via realtime channel",
                    sequence_id
                ),
                MergeOutcome::NoMatch => warn!(
                    "Acknowledgement for sequence id {} matched no local post",
                    sequence_id
                ),
            }
        }
    }

    /// Apply a settlement failure. Suppressed kinds are not user-visible and
    /// leave the post untouched.
    pub fn on_failure(&mut self, state: &mut FeedState, sequence_id: u64, kind: SettleFailure) {
        if kind.suppressed() {
            debug!(
                "Suppressed {:?} for sequence id {}",
                kind, sequence_id
            );
            return;
        }
        if state.mark_failed(sequence_id) {
            warn!("Post with sequence id {} failed: {:?}", sequence_id, kind);
            self.clear_timer(sequence_id);
        }
    }

    /// The settlement window elapsed with no response. The submission is left
    /// registered: a late acknowledgement can still confirm the failed post.
    pub fn on_settlement_elapsed(
        &mut self,
        state: &mut FeedState,
        sequence_id: u64,
        submission_id: u64,
    ) {
        if self.current.get(&sequence_id) != Some(&submission_id) {
            return;
        }
        self.on_failure(state, sequence_id, SettleFailure::TransportTimeoutLocal);
    }

    /// Re-issue a failed post. Aborts any submission still in flight for the
    /// same sequence id, restores the pending visual state, and rearms the
    /// settlement timer. The resend carries only text and sequence id.
    pub fn retry(&mut self, state: &mut FeedState, sequence_id: u64) {
        let Some(text) = state
            .posts
            .iter()
            .find(|p| p.is_unsettled_mine(sequence_id))
            .map(|p| p.text.clone())
        else {
            debug!("Retry requested for unknown sequence id {}", sequence_id);
            return;
        };
        if let Some(&stale) = self.current.get(&sequence_id) {
            self.correlation.cancel(stale);
        }
        state.restore_pending(sequence_id);
        let submission_id = self.dispatch(state, sequence_id, text, Vec::new());
        info!(
            "Retrying sequence id {} as submission {}",
            sequence_id, submission_id
        );
    }

    /// Remove a failed post entirely, aborting anything still in flight.
    pub fn cancel(&mut self, state: &mut FeedState, sequence_id: u64) {
        if let Some(stale) = self.current.remove(&sequence_id) {
            self.correlation.cancel(stale);
        }
        self.clear_timer(sequence_id);
        state.remove_post(sequence_id);
    }

    /// The realtime channel confirmed this post before the HTTP response did.
    /// Clears the settlement timer and forgets the submission so its eventual
    /// completion is treated as stale.
    pub fn confirm_external(&mut self, sequence_id: u64) {
        self.clear_timer(sequence_id);
        self.current.remove(&sequence_id);
    }

    pub fn current_submission(&self, sequence_id: u64) -> Option<u64> {
        self.current.get(&sequence_id).copied()
    }

    pub fn has_timer(&self, sequence_id: u64) -> bool {
        self.timers.contains_key(&sequence_id)
    }

    pub fn in_flight(&self) -> usize {
        self.correlation.len()
    }
}
