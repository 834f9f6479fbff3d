// The shared feed view: the ordered post list plus the scroll geometry every
// component reads and mutates. All mutation happens inside the owning
// session's event turn, so none of this is synchronized.

use chrono::{DateTime, Utc};
use log::debug;
use tokio::time::{Duration, Instant};

use crate::feed::sequence;
use crate::models::{Author, ContextId, Post, PostStatus};
use crate::transport::PostPayload;

/// Viewport counts as "at the bottom" within this many units of it.
pub const BOTTOM_PROXIMITY: i64 = 50;
/// Upward scroll within this many units of the top triggers a backlog fetch.
pub const TOP_PROXIMITY: i64 = 80;
/// Scroll events are coalesced into one evaluation per window.
pub const SCROLL_DEBOUNCE: Duration = Duration::from_millis(150);
/// Nominal rendered height of one post, used when the embedder does not
/// report measured geometry.
pub const POST_HEIGHT_HINT: i64 = 48;

/// Headless model of the scrollable feed container. The embedding renderer
/// feeds scroll positions in and may overwrite the estimated content height
/// with measured values; the invariants only depend on relative distances.
#[derive(Debug, Clone)]
pub struct Viewport {
    scroll_top: i64,
    viewport_height: i64,
    content_height: i64,
}

impl Viewport {
    pub fn new(viewport_height: i64) -> Self {
        Viewport { scroll_top: 0, viewport_height, content_height: 0 }
    }

    pub fn scroll_top(&self) -> i64 {
        self.scroll_top
    }

    pub fn content_height(&self) -> i64 {
        self.content_height
    }

    pub fn distance_to_bottom(&self) -> i64 {
        self.content_height - self.scroll_top - self.viewport_height
    }

    pub fn at_bottom(&self) -> bool {
        self.distance_to_bottom() <= BOTTOM_PROXIMITY
    }

    pub fn near_top(&self) -> bool {
        self.scroll_top <= TOP_PROXIMITY
    }

    pub fn set_scroll_top(&mut self, scroll_top: i64) {
        self.scroll_top = scroll_top.max(0);
    }

    pub fn set_content_height(&mut self, content_height: i64) {
        self.content_height = content_height.max(0);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_top = (self.content_height - self.viewport_height).max(0);
    }

    /// Content appended at the bottom; the reader's position is unchanged.
    pub fn grow_content(&mut self, delta: i64) {
        self.content_height += delta;
    }

    pub fn shrink_content(&mut self, delta: i64) {
        self.content_height = (self.content_height - delta).max(0);
        self.scroll_top = self.scroll_top.min(self.content_height);
    }

    /// Content prepended at the top. The scroll offset is recomputed so the
    /// distance from the reader's position to the bottom is unchanged, i.e.
    /// prepending never visually jumps the reader.
    pub fn prepend_content(&mut self, delta: i64) {
        let distance = self.distance_to_bottom();
        self.content_height += delta;
        self.scroll_top = (self.content_height - self.viewport_height - distance).max(0);
    }
}

/// Trailing-edge debouncer: each poke pushes the deadline out by the window,
/// and the owner fires once the deadline passes with no further pokes.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer { window, deadline: None }
    }

    pub fn poke(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the armed deadline; returns false if nothing was armed.
    pub fn fire(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}

/// Outcome of routing a confirmed post against the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A pending local post with the same sequence id was replaced in place.
    Replaced,
    /// The sequence id was already confirmed earlier; nothing changed.
    AlreadyConfirmed,
    /// No local counterpart; the caller should append.
    NoMatch,
}

/// The feed for one active context.
#[derive(Debug)]
pub struct FeedState {
    pub context: ContextId,
    pub viewer: Author,
    pub posts: Vec<Post>,
    pub viewport: Viewport,
    /// Whether older history is known to exist beyond the loaded posts.
    pub backlog_more: bool,
    /// Whether a backlog fetch is currently in flight (drives the loading
    /// indicator).
    pub backlog_loading: bool,
    /// Set when the active student is removed from the roster; the embedding
    /// UI disables the composer.
    pub composer_disabled: bool,
}

impl FeedState {
    pub fn new(context: ContextId, viewer: Author, viewport_height: i64, backlog_more: bool) -> Self {
        FeedState {
            context,
            viewer,
            posts: Vec::new(),
            viewport: Viewport::new(viewport_height),
            backlog_more,
            backlog_loading: false,
            composer_disabled: false,
        }
    }

    /// Sequence id for the next outgoing post.
    pub fn next_sequence_id(&self) -> u64 {
        sequence::next_sequence_id(&self.posts)
    }

    /// Timestamp of the topmost post, the backlog cursor.
    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.posts.first().map(|p| p.timestamp)
    }

    fn unsettled_index(&self, sequence_id: u64) -> Option<usize> {
        self.posts.iter().position(|p| p.is_unsettled_mine(sequence_id))
    }

    /// Optimistic insert at the bottom of the feed, then scroll to it.
    pub fn push_pending(&mut self, post: Post) {
        debug_assert!(post.status == PostStatus::Pending);
        self.posts.push(post);
        self.viewport.grow_content(POST_HEIGHT_HINT);
        self.viewport.scroll_to_bottom();
    }

    /// Route a server-rendered post against the feed: replace the matching
    /// unsettled local post in place if there is one. Idempotent per
    /// sequence id; re-applying the same confirmation changes nothing.
    pub fn merge_confirmed(&mut self, payload: &PostPayload) -> MergeOutcome {
        let Some(sequence_id) = payload.author_sequence_id else {
            return MergeOutcome::NoMatch;
        };
        if let Some(idx) = self.unsettled_index(sequence_id) {
            let was_at_bottom = self.viewport.at_bottom();
            let mut confirmed = Post::from_payload(payload, self.viewer.id, false);
            // The server echoes only a count; keep the display names chosen
            // at creation.
            confirmed.sms_recipients = std::mem::take(&mut self.posts[idx].sms_recipients);
            self.posts[idx] = confirmed;
            if was_at_bottom {
                self.viewport.scroll_to_bottom();
            }
            MergeOutcome::Replaced
        } else if self.posts.iter().any(|p| {
            p.mine && p.author_sequence_id == Some(sequence_id) && p.status == PostStatus::Confirmed
        }) {
            MergeOutcome::AlreadyConfirmed
        } else {
            MergeOutcome::NoMatch
        }
    }

    /// Append a post from another sender (or an unmatched echo), keeping the
    /// reader anchored to the bottom only if they were already there.
    pub fn append_confirmed(&mut self, payload: &PostPayload, unread: bool) {
        let was_at_bottom = self.viewport.at_bottom();
        let post = Post::from_payload(payload, self.viewer.id, unread);
        self.posts.push(post);
        self.viewport.grow_content(POST_HEIGHT_HINT);
        if was_at_bottom {
            self.viewport.scroll_to_bottom();
        }
    }

    /// Transition a pending post to failed. Returns false if the post is not
    /// currently pending, so the failed transition happens at most once.
    pub fn mark_failed(&mut self, sequence_id: u64) -> bool {
        let Some(idx) = self.unsettled_index(sequence_id) else {
            return false;
        };
        if self.posts[idx].status != PostStatus::Pending {
            return false;
        }
        self.posts[idx].status = PostStatus::Failed;
        self.viewport.scroll_to_bottom();
        true
    }

    /// Restore the pending visual state for a retry.
    pub fn restore_pending(&mut self, sequence_id: u64) -> bool {
        match self.unsettled_index(sequence_id) {
            Some(idx) => {
                self.posts[idx].status = PostStatus::Pending;
                true
            }
            None => false,
        }
    }

    /// Remove a canceled post from the feed entirely. Its sequence number is
    /// freed for reuse by the stateless allocator.
    pub fn remove_post(&mut self, sequence_id: u64) -> bool {
        match self.unsettled_index(sequence_id) {
            Some(idx) => {
                self.posts.remove(idx);
                self.viewport.shrink_content(POST_HEIGHT_HINT);
                debug!("Removed canceled post with sequence id {}", sequence_id);
                true
            }
            None => false,
        }
    }

    /// Prepend an already-chronological batch of older posts, preserving the
    /// reader's visual position.
    pub fn prepend_backlog(&mut self, batch: Vec<Post>) {
        if batch.is_empty() {
            return;
        }
        let added = batch.len() as i64 * POST_HEIGHT_HINT;
        self.posts.splice(0..0, batch);
        self.viewport.prepend_content(added);
    }

    /// Mark every unread post read locally, returning the server ids that
    /// still need a read acknowledgement.
    pub fn mark_all_read(&mut self) -> Vec<u64> {
        let mut acked = Vec::new();
        for post in self.posts.iter_mut().filter(|p| p.unread) {
            post.unread = false;
            if let Some(id) = post.post_id {
                acked.push(id);
            }
        }
        acked
    }

    pub fn unread_count(&self) -> usize {
        self.posts.iter().filter(|p| p.unread).count()
    }
}
