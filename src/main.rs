// Demo driver: runs a feed session against an in-process loopback server so
// the whole stack (optimistic posting, confirmation, backlog, realtime
// fan-out, unread tracking) can be exercised from a terminal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use clap::Parser;
use log::{info, LevelFilter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

mod utils;

use homeroom::feed::{FeedSession, SessionConfig};
use homeroom::models::{format_post_time, Author, ContextId, PostStatus, SmsTarget};
use homeroom::nav::NavEntry;
use homeroom::transport::{
    BacklogMeta, BacklogResponse, ChannelKey, ChannelMessage, FeedTransport, PostPayload,
    RealtimeEvent, RealtimeHub, SubmitRequest, SubmitResponse, Subscription,
};
use homeroom::TransportError;

/// Command line arguments for the homeroom demo
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Homeroom: live messaging feed demo against an in-process server.",
    long_about = "Type a message to post it. Commands:\n\
    /older  scroll to the top (loads older history)\n\
    /bottom scroll to the bottom (marks posts read)\n\
    /show   print the current feed\n\
    /quit   exit"
)]
struct Args {
    /// Display name of the posting teacher
    #[arg(long, default_value = "Ms. Rivera")]
    name: String,

    /// Role shown next to the name
    #[arg(long, default_value = "Math Teacher")]
    role: String,

    /// Log file path
    #[arg(long, default_value = "homeroom.log")]
    log: String,
}

const VIEWER_ID: u64 = 1;
const PARENT_ID: u64 = 9002;
const STUDENT_ID: u64 = 42;

/// In-process stand-in for the server: transport and realtime hub in one.
/// Submissions are acknowledged after a short delay and also fanned out on
/// the context's channel, like the real server does.
struct Loopback {
    next_post_id: AtomicU64,
    history: Mutex<Vec<PostPayload>>,
    channels: Mutex<HashMap<ChannelKey, Vec<(uuid::Uuid, mpsc::Sender<ChannelMessage>)>>>,
}

impl Loopback {
    fn new() -> Self {
        let now = Utc::now();
        let history = (0..30)
            .map(|i| {
                let timestamp = now - ChronoDuration::hours(30 - i);
                PostPayload {
                    post_id: Some(i as u64 + 1),
                    author_id: PARENT_ID,
                    author: "Jane Doe".into(),
                    role: "Parent".into(),
                    timestamp,
                    time: format_post_time(timestamp.with_timezone(&Local)),
                    text: format!("Archived note #{}", i + 1),
                    author_sequence_id: None,
                    num_sms_recipients: 0,
                }
            })
            .collect();
        Loopback {
            next_post_id: AtomicU64::new(1000),
            history: Mutex::new(history),
            channels: Mutex::new(HashMap::new()),
        }
    }

    async fn publish(&self, channel: ChannelKey, event: RealtimeEvent) {
        let channels = self.channels.lock().await;
        if let Some(sinks) = channels.get(&channel) {
            for (_, sink) in sinks {
                let _ = sink.send(ChannelMessage { channel, event: event.clone() }).await;
            }
        }
    }

    fn render(&self, author: (&str, &str, u64), request: &SubmitRequest) -> PostPayload {
        let timestamp = Utc::now();
        PostPayload {
            post_id: Some(self.next_post_id.fetch_add(1, Ordering::SeqCst)),
            author_id: author.2,
            author: author.0.to_string(),
            role: author.1.to_string(),
            timestamp,
            time: format_post_time(timestamp.with_timezone(&Local)),
            text: request.text.clone(),
            author_sequence_id: Some(request.author_sequence_id),
            num_sms_recipients: request.recipient_ids.len() as u32,
        }
    }
}

#[async_trait]
impl FeedTransport for Loopback {
    async fn submit_post(
        &self,
        context: ContextId,
        request: SubmitRequest,
    ) -> Result<SubmitResponse, TransportError> {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let payload = self.render(("Ms. Rivera", "Math Teacher", VIEWER_ID), &request);
        // Fan the sender's own post out on the channel as well, like the
        // real server; the feed must converge either way.
        self.publish(
            ChannelKey::for_context(context),
            RealtimeEvent::MessagePosted { posts: vec![payload.clone()] },
        )
        .await;
        Ok(SubmitResponse { objects: vec![payload] })
    }

    async fn fetch_backlog(
        &self,
        _context: ContextId,
        older_than: DateTime<Utc>,
    ) -> Result<BacklogResponse, TransportError> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let history = self.history.lock().await;
        let mut older: Vec<PostPayload> = history
            .iter()
            .filter(|p| p.timestamp < older_than)
            .cloned()
            .collect();
        // Newest-first page of ten, like `order_by=-timestamp`.
        older.reverse();
        let more = older.len() > 10;
        older.truncate(10);
        Ok(BacklogResponse { objects: older, meta: BacklogMeta { more } })
    }

    async fn mark_read(&self, post_id: u64) -> Result<(), TransportError> {
        info!("Server marked post {} read", post_id);
        Ok(())
    }
}

#[async_trait]
impl RealtimeHub for Loopback {
    async fn subscribe(
        &self,
        channel: ChannelKey,
        sink: mpsc::Sender<ChannelMessage>,
    ) -> Result<Subscription, TransportError> {
        let subscription = Subscription::new(channel);
        self.channels
            .lock()
            .await
            .entry(channel)
            .or_default()
            .push((subscription.id, sink));
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &Subscription) {
        let mut channels = self.channels.lock().await;
        if let Some(sinks) = channels.get_mut(&subscription.channel) {
            sinks.retain(|(id, _)| *id != subscription.id);
        }
    }
}

fn print_snapshot(snapshot: &homeroom::FeedSnapshot) {
    println!("--- feed ({:?}) ---", snapshot.context);
    for post in &snapshot.posts {
        let marker = match post.status {
            PostStatus::Pending => "…",
            PostStatus::Failed => "!",
            PostStatus::Confirmed => " ",
        };
        let unread = if post.unread { "*" } else { " " };
        println!(
            "{}{} [{}] {}: {}",
            marker, unread, post.timestamp_display, post.author_name, post.text
        );
    }
    for (context, name, unread) in &snapshot.nav_unread {
        if *unread > 0 {
            println!("    ({} unread in {} {:?})", unread, name, context.kind);
        }
    }
    if snapshot.backlog_more {
        println!("    (scroll up for older posts)");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::setup_logging(Some(&args.log), LevelFilter::Debug)?;
    info!("Homeroom demo starting up");

    let server = Arc::new(Loopback::new());
    let viewer = Author { id: VIEWER_ID, name: args.name.clone(), role: args.role.clone() };
    let context = ContextId::student(STUDENT_ID);
    let config = SessionConfig {
        context,
        viewer,
        viewport_height: 600,
        backlog_more: true,
        nav_entries: vec![
            NavEntry::student(STUDENT_ID, "Alex Doe"),
            NavEntry::student(43, "Sam Nguyen"),
        ],
    };

    let (session, handle) = FeedSession::new(config, server.clone(), server.clone()).await?;
    let session_task = tokio::spawn(session.run());

    // Seed the feed with a couple of recent posts over the channel.
    for text in ["Alex did great on the quiz today.", "Thanks, we saw the grade!"] {
        let request = SubmitRequest { text: text.into(), author_sequence_id: 0, recipient_ids: vec![] };
        let payload = server.render(("Jane Doe", "Parent", PARENT_ID), &request);
        server
            .publish(
                ChannelKey::for_context(context),
                RealtimeEvent::MessagePosted { posts: vec![payload] },
            )
            .await;
    }

    println!("Posting to Alex Doe's feed as {}. /quit to exit.", args.name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        match line.as_str() {
            "" => continue,
            "/quit" => break,
            "/older" => handle.scrolled(0).await?,
            "/bottom" => handle.scrolled(i64::MAX / 2).await?,
            "/show" => {}
            text => {
                let targets =
                    vec![SmsTarget { id: PARENT_ID, display_name: "Jane Doe".into() }];
                handle.submit(text, targets).await?;
            }
        }
        // Let the debounce window and the loopback round-trip settle.
        tokio::time::sleep(Duration::from_millis(500)).await;
        print_snapshot(&handle.snapshot().await?);
    }

    handle.shutdown().await?;
    session_task.await?;
    info!("Homeroom demo shut down");
    Ok(())
}
