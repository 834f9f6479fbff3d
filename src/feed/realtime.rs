// Reconciliation of realtime channel events against the live feed.
// A self-authored post can arrive here before or after the originating HTTP
// response; both paths route through the same replace-or-append decision
// keyed on the author sequence id, so the order never matters.

use log::{debug, info, warn};

use crate::feed::state::MergeOutcome;
use crate::feed::FeedSession;
use crate::models::ContextId;
use crate::transport::{ChannelKey, ChannelMessage, PostPayload, RealtimeEvent};

impl FeedSession {
    /// Entry point for every message delivered on a subscribed channel.
    pub async fn on_channel_message(&mut self, message: ChannelMessage) {
        match message.event {
            RealtimeEvent::MessagePosted { posts } => {
                self.on_message_posted(message.channel, posts);
            }
            RealtimeEvent::StudentAdded { objects } => {
                for student in &objects {
                    if let Err(err) = self.nav.student_added(student).await {
                        warn!("Could not subscribe new student {}: {}", student.id, err);
                    }
                }
            }
            RealtimeEvent::StudentEdited { objects } => {
                for student in &objects {
                    self.nav.student_edited(student);
                }
            }
            RealtimeEvent::StudentRemoved { objects } => {
                for student in &objects {
                    self.nav.student_removed(student).await;
                    if self.state.context == ContextId::student(student.id) {
                        // The active student is gone; posting is disabled
                        // until the embedder navigates away.
                        warn!("Active student {} was removed", student.id);
                        self.state.composer_disabled = true;
                    }
                }
            }
        }
    }

    /// Posts addressed to a non-active context only bump that context's
    /// unread counter; the feed itself is never touched.
    fn on_message_posted(&mut self, channel: ChannelKey, posts: Vec<PostPayload>) {
        let Some(context) = channel.context() else {
            debug!("Ignoring message_posted on roster channel {}", channel);
            return;
        };
        if context != self.state.context {
            self.nav.increment_unread(context);
            return;
        }
        for payload in &posts {
            match self.state.merge_confirmed(payload) {
                MergeOutcome::Replaced => {
                    // The channel beat the HTTP response; settle the pending
                    // submission so the late ack is treated as stale.
                    if let Some(sequence_id) = payload.author_sequence_id {
                        self.lifecycle.confirm_external(sequence_id);
                        info!(
                            "Realtime event confirmed pending post with sequence id {}",
                            sequence_id
                        );
                    }
                }
                MergeOutcome::AlreadyConfirmed => {
                    debug!("Duplicate realtime delivery ignored");
                }
                MergeOutcome::NoMatch => {
                    self.state.append_confirmed(payload, true);
                }
            }
        }
    }
}
