// Core data model for the feed: contexts, authors, posts.

use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::PostPayload;

/// Whether a feed belongs to a single student or a group of students.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Student,
    Group,
}

/// The student or group whose feed is displayed. Exactly one context is
/// active per session; it is passed explicitly rather than read from
/// ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId {
    pub kind: ContextKind,
    pub id: u64,
}

impl ContextId {
    pub fn student(id: u64) -> Self {
        ContextId { kind: ContextKind::Student, id }
    }

    pub fn group(id: u64) -> Self {
        ContextId { kind: ContextKind::Group, id }
    }
}

/// The viewing user, who authors outgoing posts.
#[derive(Debug, Clone)]
pub struct Author {
    pub id: u64,
    pub name: String,
    pub role: String,
}

/// Delivery status of a post in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStatus {
    /// Created locally, awaiting server acknowledgement.
    Pending,
    /// Acknowledged by the server or received from another sender.
    Confirmed,
    /// Submission failed; retry/cancel affordance is shown.
    Failed,
}

/// An out-of-band text-notification target attached to a post at creation.
#[derive(Debug, Clone)]
pub struct SmsTarget {
    pub id: u64,
    pub display_name: String,
}

/// One message in the feed.
#[derive(Debug, Clone)]
pub struct Post {
    /// Server-assigned id; absent while the post is only known locally.
    pub post_id: Option<u64>,
    pub author_id: u64,
    pub author_name: String,
    pub author_role: String,
    /// Per-author correlation key; set only on the viewer's own posts.
    pub author_sequence_id: Option<u64>,
    pub text: String,
    /// Creation time, also the backlog pagination cursor.
    pub timestamp: DateTime<Utc>,
    /// Human-readable time, precomputed at creation.
    pub timestamp_display: String,
    pub status: PostStatus,
    pub unread: bool,
    pub mine: bool,
    /// Display names of the notification targets chosen at creation.
    pub sms_recipients: Vec<String>,
    /// Server-reported count of recipients actually texted.
    pub num_sms_recipients: u32,
}

impl Post {
    /// Synthesize the optimistic local post shown before the server responds.
    pub fn pending(author: &Author, sequence_id: u64, text: &str, sms_targets: &[SmsTarget]) -> Self {
        let now = Utc::now();
        Post {
            post_id: None,
            author_id: author.id,
            author_name: author.name.clone(),
            author_role: author.role.clone(),
            author_sequence_id: Some(sequence_id),
            text: text.trim().to_string(),
            timestamp: now,
            timestamp_display: format_post_time(now.with_timezone(&Local)),
            status: PostStatus::Pending,
            unread: false,
            mine: true,
            sms_recipients: sms_targets.iter().map(|t| t.display_name.clone()).collect(),
            num_sms_recipients: 0,
        }
    }

    /// Build a confirmed post from a server-rendered payload.
    pub fn from_payload(payload: &PostPayload, viewer_id: u64, unread: bool) -> Self {
        let mine = payload.author_id == viewer_id;
        Post {
            post_id: payload.post_id,
            author_id: payload.author_id,
            author_name: payload.author.clone(),
            author_role: payload.role.clone(),
            author_sequence_id: if mine { payload.author_sequence_id } else { None },
            text: payload.text.clone(),
            timestamp: payload.timestamp,
            timestamp_display: payload.time.clone(),
            status: PostStatus::Confirmed,
            // The viewer's own posts are never unread.
            unread: unread && !mine,
            mine,
            sms_recipients: Vec::new(),
            num_sms_recipients: payload.num_sms_recipients,
        }
    }

    /// True for a locally authored post with this sequence id that has not
    /// been confirmed yet (pending or failed; a failed post is still
    /// replaceable by a late acknowledgement).
    pub fn is_unsettled_mine(&self, sequence_id: u64) -> bool {
        self.mine
            && self.author_sequence_id == Some(sequence_id)
            && self.status != PostStatus::Confirmed
    }
}

/// Render a timestamp the way the feed displays it, e.g. "3:05pm".
pub fn format_post_time(time: DateTime<Local>) -> String {
    let (is_pm, hour) = time.hour12();
    format!(
        "{}:{:02}{}",
        hour,
        time.minute(),
        if is_pm { "pm" } else { "am" }
    )
}

/// Posts are relayed by SMS with a "{author}: " prefix, so the composer
/// budget is whatever remains of a single 160-character message.
pub fn post_char_limit(author_name: &str) -> usize {
    160usize.saturating_sub(author_name.len() + 2)
}
