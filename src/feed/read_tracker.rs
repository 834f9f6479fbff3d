// Marks visible unread posts as read once the reader reaches the bottom of
// the feed. Local state flips immediately; the server acknowledgement is
// best-effort and never reverted.

use log::{debug, warn};

use crate::feed::state::FeedState;
use crate::transport::SharedTransport;

pub struct ReadTracker {
    transport: SharedTransport,
}

impl ReadTracker {
    pub fn new(transport: SharedTransport) -> Self {
        ReadTracker { transport }
    }

    /// Called after a debounced scroll settles. If the viewport is at the
    /// bottom, every unread post is marked read locally and a fire-and-forget
    /// acknowledgement is issued per post.
    pub fn mark_visible_read(&self, state: &mut FeedState) {
        if !state.viewport.at_bottom() {
            return;
        }
        let acked = state.mark_all_read();
        if acked.is_empty() {
            return;
        }
        debug!("Marking {} posts read in {:?}", acked.len(), state.context);
        for post_id in acked {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                if let Err(err) = transport.mark_read(post_id).await {
                    // A failed ack does not revert the local read state.
                    warn!("Read acknowledgement for post {} failed: {}", post_id, err);
                }
            });
        }
    }
}
