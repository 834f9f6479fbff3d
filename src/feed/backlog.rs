// On-demand loading of older feed history.
// Triggered by upward scroll near the top of the viewport; the reader's
// visual position is preserved across the prepend.

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::feed::state::FeedState;
use crate::feed::FeedEvent;
use crate::models::Post;
use crate::transport::{BacklogResponse, SharedTransport};

pub struct BacklogPaginator {
    transport: SharedTransport,
    events: mpsc::Sender<FeedEvent>,
    in_flight: bool,
}

impl BacklogPaginator {
    pub fn new(transport: SharedTransport, events: mpsc::Sender<FeedEvent>) -> Self {
        BacklogPaginator { transport, events, in_flight: false }
    }

    /// Request posts strictly older than the topmost post. No-op while a
    /// fetch is in flight or once the history is exhausted.
    pub fn maybe_fetch(&mut self, state: &mut FeedState) -> bool {
        if self.in_flight || !state.backlog_more {
            return false;
        }
        let Some(cursor) = state.oldest_timestamp() else {
            return false;
        };
        self.in_flight = true;
        state.backlog_loading = true;
        debug!("Fetching backlog older than {} for {:?}", cursor, state.context);

        let transport = self.transport.clone();
        let events = self.events.clone();
        let context = state.context;
        tokio::spawn(async move {
            let result = transport.fetch_backlog(context, cursor).await;
            let _ = events.send(FeedEvent::BacklogFetched { result }).await;
        });
        true
    }

    /// Apply a completed fetch: reverse the newest-first batch to
    /// chronological order and prepend it. Failures clear the loading
    /// indicator and are otherwise silent.
    pub fn on_fetched(
        &mut self,
        state: &mut FeedState,
        result: Result<BacklogResponse, TransportError>,
    ) {
        self.in_flight = false;
        state.backlog_loading = false;
        match result {
            Ok(response) => {
                let mut objects = response.objects;
                objects.reverse();
                let viewer_id = state.viewer.id;
                let batch: Vec<Post> = objects
                    .iter()
                    .map(|p| Post::from_payload(p, viewer_id, false))
                    .collect();
                info!("Prepending {} older posts to {:?}", batch.len(), state.context);
                state.prepend_backlog(batch);
                state.backlog_more = response.meta.more;
                if !state.backlog_more {
                    debug!("History exhausted for {:?}", state.context);
                }
            }
            Err(err) => {
                warn!("Backlog fetch for {:?} failed: {}", state.context, err);
            }
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
}
