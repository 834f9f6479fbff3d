// External interfaces of the feed core.
// The core never performs I/O itself: HTTP submission, backlog fetches, read
// acknowledgements and the realtime channel all live behind these traits, and
// the wire types mirror the server API.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::TransportError;
use crate::models::{ContextId, ContextKind};

/// A post as rendered by the server, ready for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostPayload {
    pub post_id: Option<u64>,
    pub author_id: u64,
    pub author: String,
    pub role: String,
    pub timestamp: DateTime<Utc>,
    /// Pre-rendered display time, e.g. "3:05pm".
    pub time: String,
    pub text: String,
    /// Echoed back for the sender's own posts; the correlation key.
    #[serde(default)]
    pub author_sequence_id: Option<u64>,
    #[serde(default)]
    pub num_sms_recipients: u32,
}

/// Body of one outgoing post submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
    pub author_sequence_id: u64,
    /// Ids of the notification targets selected in the composer.
    #[serde(default)]
    pub recipient_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub objects: Vec<PostPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogMeta {
    pub more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogResponse {
    pub objects: Vec<PostPayload>,
    pub meta: BacklogMeta,
}

/// HTTP-side collaborator: post submission, history fetch, read acks.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// POST to the per-context post endpoint.
    async fn submit_post(
        &self,
        context: ContextId,
        request: SubmitRequest,
    ) -> Result<SubmitResponse, TransportError>;

    /// GET posts strictly older than the cursor, newest first.
    async fn fetch_backlog(
        &self,
        context: ContextId,
        older_than: DateTime<Utc>,
    ) -> Result<BacklogResponse, TransportError>;

    /// Fire-and-forget read acknowledgement for one post.
    async fn mark_read(&self, post_id: u64) -> Result<(), TransportError>;
}

/// Name of a realtime channel: `student_{id}`, `group_{id}`, or
/// `students_of_{userId}` for roster changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Student(u64),
    Group(u64),
    StudentsOf(u64),
}

impl ChannelKey {
    pub fn for_context(context: ContextId) -> Self {
        match context.kind {
            ContextKind::Student => ChannelKey::Student(context.id),
            ContextKind::Group => ChannelKey::Group(context.id),
        }
    }

    /// The context a post channel addresses; roster channels have none.
    pub fn context(&self) -> Option<ContextId> {
        match *self {
            ChannelKey::Student(id) => Some(ContextId::student(id)),
            ChannelKey::Group(id) => Some(ContextId::group(id)),
            ChannelKey::StudentsOf(_) => None,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::Student(id) => write!(f, "student_{}", id),
            ChannelKey::Group(id) => write!(f, "group_{}", id),
            ChannelKey::StudentsOf(id) => write!(f, "students_of_{}", id),
        }
    }
}

/// A nav-side student record carried by roster events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentPayload {
    pub id: u64,
    pub name: String,
}

/// Events delivered over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    MessagePosted { posts: Vec<PostPayload> },
    StudentAdded { objects: Vec<StudentPayload> },
    StudentEdited { objects: Vec<StudentPayload> },
    StudentRemoved { objects: Vec<StudentPayload> },
}

/// An event together with the channel it arrived on.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: ChannelKey,
    pub event: RealtimeEvent,
}

/// Handle for one live channel subscription. Held by the owner of the
/// subscription and passed back to the hub to tear it down; dropping the
/// handle without unsubscribing leaks the subscription, so owners tear down
/// explicitly.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub channel: ChannelKey,
}

impl Subscription {
    pub fn new(channel: ChannelKey) -> Self {
        Subscription { id: Uuid::new_v4(), channel }
    }
}

/// Realtime-messaging collaborator. One subscription exists per distinct
/// channel; events are delivered into the sink the subscriber provides.
#[async_trait]
pub trait RealtimeHub: Send + Sync {
    async fn subscribe(
        &self,
        channel: ChannelKey,
        sink: mpsc::Sender<ChannelMessage>,
    ) -> Result<Subscription, TransportError>;

    async fn unsubscribe(&self, subscription: &Subscription);
}

/// Shared trait-object aliases used throughout the crate.
pub type SharedTransport = Arc<dyn FeedTransport>;
pub type SharedHub = Arc<dyn RealtimeHub>;
