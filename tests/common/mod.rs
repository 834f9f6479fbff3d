// Common test utilities for integration tests
// This module contains the scriptable in-memory transport and realtime hub
// the feed session is driven against.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};

use chrono::{DateTime, Utc};
use log::LevelFilter;
use tokio::sync::mpsc;

use async_trait::async_trait;
use homeroom::feed::{FeedHandle, FeedSession, SessionConfig};
use homeroom::models::{Author, ContextId};
use homeroom::nav::NavEntry;
use homeroom::transport::{
    BacklogMeta, BacklogResponse, ChannelKey, ChannelMessage, FeedTransport, PostPayload,
    RealtimeEvent, RealtimeHub, SubmitRequest, SubmitResponse, Subscription,
};
use homeroom::TransportError;

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub const VIEWER_ID: u64 = 1;
pub const PARENT_ID: u64 = 9002;
pub const ACTIVE_STUDENT: u64 = 42;
pub const OTHER_STUDENT: u64 = 43;
pub const SOME_GROUP: u64 = 7;

/// What the next scripted submission attempt should do.
pub enum SubmitScript {
    Ok(SubmitResponse),
    Err(TransportError),
    /// Never resolve; the settlement timer is the only way out.
    Hang,
}

/// Scriptable transport. Unscripted submissions echo the request back as a
/// confirmed payload, like the real server's acknowledgement.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<VecDeque<SubmitScript>>,
    next_post_id: AtomicU64,
    pub submits: Mutex<Vec<(ContextId, SubmitRequest)>>,
    pub backlog_script: Mutex<VecDeque<Result<BacklogResponse, TransportError>>>,
    pub backlog_cursors: Mutex<Vec<DateTime<Utc>>>,
    pub read_acks: Mutex<Vec<u64>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(MockTransport { next_post_id: AtomicU64::new(500), ..Default::default() })
    }

    pub fn script_submit(&self, script: SubmitScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn script_backlog(&self, result: Result<BacklogResponse, TransportError>) {
        self.backlog_script.lock().unwrap().push_back(result);
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().unwrap().len()
    }

    fn echo(&self, request: &SubmitRequest) -> SubmitResponse {
        SubmitResponse {
            objects: vec![ack_payload(
                self.next_post_id.fetch_add(1, Ordering::SeqCst),
                VIEWER_ID,
                Some(request.author_sequence_id),
                &request.text,
                request.recipient_ids.len() as u32,
            )],
        }
    }
}

#[async_trait]
impl FeedTransport for MockTransport {
    async fn submit_post(
        &self,
        context: ContextId,
        request: SubmitRequest,
    ) -> Result<SubmitResponse, TransportError> {
        let script = self.scripts.lock().unwrap().pop_front();
        self.submits.lock().unwrap().push((context, request.clone()));
        match script {
            Some(SubmitScript::Ok(response)) => Ok(response),
            Some(SubmitScript::Err(err)) => Err(err),
            Some(SubmitScript::Hang) => std::future::pending().await,
            None => Ok(self.echo(&request)),
        }
    }

    async fn fetch_backlog(
        &self,
        _context: ContextId,
        older_than: DateTime<Utc>,
    ) -> Result<BacklogResponse, TransportError> {
        self.backlog_cursors.lock().unwrap().push(older_than);
        self.backlog_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(BacklogResponse { objects: vec![], meta: BacklogMeta { more: false } }))
    }

    async fn mark_read(&self, post_id: u64) -> Result<(), TransportError> {
        self.read_acks.lock().unwrap().push(post_id);
        Ok(())
    }
}

/// Hub that records subscriptions and lets tests publish channel events.
#[derive(Default)]
pub struct MockHub {
    sinks: Mutex<HashMap<ChannelKey, Vec<(uuid::Uuid, mpsc::Sender<ChannelMessage>)>>>,
    pub log: Mutex<Vec<String>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(MockHub::default())
    }

    pub async fn publish(&self, channel: ChannelKey, event: RealtimeEvent) {
        let sinks: Vec<mpsc::Sender<ChannelMessage>> = {
            let sinks = self.sinks.lock().unwrap();
            sinks
                .get(&channel)
                .map(|subs| subs.iter().map(|(_, s)| s.clone()).collect())
                .unwrap_or_default()
        };
        for sink in sinks {
            let _ = sink.send(ChannelMessage { channel, event: event.clone() }).await;
        }
    }

    pub fn subscription_log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn subscriber_count(&self, channel: ChannelKey) -> usize {
        self.sinks
            .lock()
            .unwrap()
            .get(&channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RealtimeHub for MockHub {
    async fn subscribe(
        &self,
        channel: ChannelKey,
        sink: mpsc::Sender<ChannelMessage>,
    ) -> Result<Subscription, TransportError> {
        let subscription = Subscription::new(channel);
        self.log.lock().unwrap().push(format!("+{}", channel));
        self.sinks
            .lock()
            .unwrap()
            .entry(channel)
            .or_default()
            .push((subscription.id, sink));
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &Subscription) {
        self.log
            .lock()
            .unwrap()
            .push(format!("-{}", subscription.channel));
        if let Some(subs) = self.sinks.lock().unwrap().get_mut(&subscription.channel) {
            subs.retain(|(id, _)| *id != subscription.id);
        }
    }
}

/// A server-rendered post payload.
pub fn ack_payload(
    post_id: u64,
    author_id: u64,
    author_sequence_id: Option<u64>,
    text: &str,
    num_sms_recipients: u32,
) -> PostPayload {
    PostPayload {
        post_id: Some(post_id),
        author_id,
        author: if author_id == VIEWER_ID { "Ms. Rivera".into() } else { "Jane Doe".into() },
        role: if author_id == VIEWER_ID { "Teacher".into() } else { "Parent".into() },
        timestamp: Utc::now(),
        time: "3:05pm".into(),
        text: text.into(),
        author_sequence_id,
        num_sms_recipients,
    }
}

/// A post from another sender, as delivered over the realtime channel.
pub fn parent_post(post_id: u64, text: &str) -> PostPayload {
    ack_payload(post_id, PARENT_ID, None, text, 0)
}

pub struct Fixture {
    pub session: FeedSession,
    pub handle: FeedHandle,
    pub transport: Arc<MockTransport>,
    pub hub: Arc<MockHub>,
}

/// A session viewing the feed of student 42, with another student and a
/// group in the nav.
pub async fn fixture() -> Fixture {
    setup_logging();
    let transport = MockTransport::new();
    let hub = MockHub::new();
    let config = SessionConfig {
        context: ContextId::student(ACTIVE_STUDENT),
        viewer: Author { id: VIEWER_ID, name: "Ms. Rivera".into(), role: "Teacher".into() },
        viewport_height: 200,
        backlog_more: true,
        nav_entries: vec![
            NavEntry::student(ACTIVE_STUDENT, "Alex Doe"),
            NavEntry::student(OTHER_STUDENT, "Sam Nguyen"),
            NavEntry::group(SOME_GROUP, "Homeroom 3B"),
        ],
    };
    let (session, handle) = FeedSession::new(config, transport.clone(), hub.clone())
        .await
        .expect("session setup");
    Fixture { session, handle, transport, hub }
}

/// Deliver everything the hub has queued into the session.
pub async fn drain_channel(session: &mut FeedSession, n: usize) {
    for _ in 0..n {
        assert!(session.process_next_channel_message().await);
    }
}
