// The feed session: one owning event loop per active context.
// All feed mutations happen here, one command or completion at a time, which
// is what makes the merge decisions safe to compute against live state.

use anyhow::Result;
use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};

pub mod backlog;
pub mod correlation;
pub mod lifecycle;
pub mod read_tracker;
pub mod realtime;
pub mod sequence;
pub mod state;

pub use lifecycle::{PostLifecycleManager, SETTLEMENT_WINDOW};
pub use state::{
    Debouncer, FeedState, MergeOutcome, Viewport, BOTTOM_PROXIMITY, POST_HEIGHT_HINT,
    SCROLL_DEBOUNCE, TOP_PROXIMITY,
};

use crate::errors::TransportError;
use crate::models::{Author, ContextId, Post, SmsTarget};
use crate::nav::{NavEntry, NavList};
use crate::transport::{BacklogResponse, ChannelMessage, SharedHub, SharedTransport, SubmitResponse};
use backlog::BacklogPaginator;
use read_tracker::ReadTracker;

/// I/O completions routed back into the session's event turn.
#[derive(Debug)]
pub enum FeedEvent {
    SubmissionSettled {
        author_sequence_id: u64,
        submission_id: u64,
        result: Result<SubmitResponse, TransportError>,
    },
    SettlementElapsed {
        author_sequence_id: u64,
        submission_id: u64,
    },
    BacklogFetched {
        result: Result<BacklogResponse, TransportError>,
    },
}

/// User-driven commands accepted by the session.
#[derive(Debug)]
pub enum FeedCommand {
    Submit { text: String, sms_targets: Vec<SmsTarget> },
    Retry { author_sequence_id: u64 },
    Cancel { author_sequence_id: u64 },
    /// The scroll position moved; evaluation is debounced.
    Scrolled { scroll_top: i64 },
    /// The embedding renderer measured the real content height.
    ViewportMeasured { content_height: i64 },
    /// The navigation list was reloaded (e.g. groups view <-> students view).
    ReplaceNav { entries: Vec<NavEntry> },
    Snapshot { reply: oneshot::Sender<FeedSnapshot> },
    Shutdown,
}

/// Point-in-time copy of the visible state, for display by the embedder.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub context: ContextId,
    pub posts: Vec<Post>,
    pub backlog_more: bool,
    pub backlog_loading: bool,
    pub composer_disabled: bool,
    pub nav_unread: Vec<(ContextId, String, u32)>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub context: ContextId,
    pub viewer: Author,
    pub viewport_height: i64,
    /// Whether the server reports more history than initially rendered.
    pub backlog_more: bool,
    pub nav_entries: Vec<NavEntry>,
}

/// Cloneable handle for driving a running session.
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
}

impl FeedHandle {
    pub async fn send(&self, command: FeedCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("feed session is gone"))
    }

    pub async fn submit(&self, text: &str, sms_targets: Vec<SmsTarget>) -> Result<()> {
        self.send(FeedCommand::Submit { text: text.to_string(), sms_targets }).await
    }

    pub async fn scrolled(&self, scroll_top: i64) -> Result<()> {
        self.send(FeedCommand::Scrolled { scroll_top }).await
    }

    pub async fn snapshot(&self) -> Result<FeedSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(FeedCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| anyhow::anyhow!("feed session is gone"))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(FeedCommand::Shutdown).await
    }
}

pub struct FeedSession {
    state: FeedState,
    nav: NavList,
    lifecycle: PostLifecycleManager,
    backlog: BacklogPaginator,
    reader: ReadTracker,
    scroll_debounce: Debouncer,
    commands: mpsc::Receiver<FeedCommand>,
    events: mpsc::Receiver<FeedEvent>,
    channel_messages: mpsc::Receiver<ChannelMessage>,
}

impl FeedSession {
    /// Wire up a session for one active context: subscribe the roster and
    /// nav channels, zero the active context's unread counter, and hand back
    /// the command handle.
    pub async fn new(
        config: SessionConfig,
        transport: SharedTransport,
        hub: SharedHub,
    ) -> Result<(FeedSession, FeedHandle)> {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (channel_tx, channel_rx) = mpsc::channel(64);

        let mut nav = NavList::new(hub, channel_tx);
        nav.subscribe_roster(config.viewer.id).await?;
        nav.replace_entries(config.nav_entries).await?;
        // Entering a context resets its counter, independent of scroll.
        nav.zero_unread(config.context);

        info!(
            "Feed session opened for {:?} as {} ({})",
            config.context, config.viewer.name, config.viewer.role
        );

        let session = FeedSession {
            state: FeedState::new(
                config.context,
                config.viewer,
                config.viewport_height,
                config.backlog_more,
            ),
            nav,
            lifecycle: PostLifecycleManager::new(transport.clone(), event_tx.clone()),
            backlog: BacklogPaginator::new(transport.clone(), event_tx),
            reader: ReadTracker::new(transport),
            scroll_debounce: Debouncer::new(SCROLL_DEBOUNCE),
            commands: command_rx,
            events: event_rx,
            channel_messages: channel_rx,
        };
        Ok((session, FeedHandle { commands: command_tx }))
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn nav(&self) -> &NavList {
        &self.nav
    }

    pub fn lifecycle(&self) -> &PostLifecycleManager {
        &self.lifecycle
    }

    /// Serialize commands, completions, channel messages and the scroll
    /// debounce into single-turn mutations of the feed.
    pub async fn run(mut self) {
        loop {
            let deadline = self.scroll_debounce.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(message) = self.channel_messages.recv() => {
                    self.on_channel_message(message).await;
                }
                _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    self.scroll_debounce.fire();
                    self.on_scroll_settled();
                }
            }
        }
        debug!("Feed session for {:?} closed", self.state.context);
    }

    /// Returns false when the session should shut down.
    pub async fn handle_command(&mut self, command: FeedCommand) -> bool {
        match command {
            FeedCommand::Submit { text, sms_targets } => {
                if self.state.composer_disabled {
                    debug!("Composer disabled; dropping submit");
                } else {
                    self.lifecycle.submit(&mut self.state, &text, &sms_targets);
                }
            }
            FeedCommand::Retry { author_sequence_id } => {
                self.lifecycle.retry(&mut self.state, author_sequence_id);
            }
            FeedCommand::Cancel { author_sequence_id } => {
                self.lifecycle.cancel(&mut self.state, author_sequence_id);
            }
            FeedCommand::Scrolled { scroll_top } => {
                self.state.viewport.set_scroll_top(scroll_top);
                self.scroll_debounce.poke();
            }
            FeedCommand::ViewportMeasured { content_height } => {
                self.state.viewport.set_content_height(content_height);
            }
            FeedCommand::ReplaceNav { entries } => {
                if let Err(err) = self.nav.replace_entries(entries).await {
                    log::warn!("Nav replacement failed: {}", err);
                }
            }
            FeedCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            FeedCommand::Shutdown => return false,
        }
        true
    }

    pub fn handle_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::SubmissionSettled { author_sequence_id, submission_id, result } => {
                self.lifecycle
                    .on_settled(&mut self.state, author_sequence_id, submission_id, result);
            }
            FeedEvent::SettlementElapsed { author_sequence_id, submission_id } => {
                self.lifecycle.on_settlement_elapsed(
                    &mut self.state,
                    author_sequence_id,
                    submission_id,
                );
            }
            FeedEvent::BacklogFetched { result } => {
                self.backlog.on_fetched(&mut self.state, result);
            }
        }
    }

    /// Drive one queued completion; test and driver helper.
    pub async fn process_next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Drive one queued channel message; test and driver helper.
    pub async fn process_next_channel_message(&mut self) -> bool {
        match self.channel_messages.recv().await {
            Some(message) => {
                self.on_channel_message(message).await;
                true
            }
            None => false,
        }
    }

    /// A debounced scroll settled: fetch backlog near the top, mark posts
    /// read at the bottom.
    pub fn on_scroll_settled(&mut self) {
        if self.state.viewport.near_top() {
            self.backlog.maybe_fetch(&mut self.state);
        }
        if self.state.viewport.at_bottom() {
            self.reader.mark_visible_read(&mut self.state);
        }
    }

    fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            context: self.state.context,
            posts: self.state.posts.clone(),
            backlog_more: self.state.backlog_more,
            backlog_loading: self.state.backlog_loading,
            composer_disabled: self.state.composer_disabled,
            nav_unread: self
                .nav
                .entries()
                .iter()
                .map(|e| (e.context(), e.name.clone(), e.unread))
                .collect(),
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}
