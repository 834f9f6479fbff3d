// Integration tests for realtime reconciliation: the replace-or-append merge
// must converge whether the HTTP acknowledgement or the channel echo arrives
// first, and posts for other contexts only move unread counters.

mod common;

use common::*;
use homeroom::feed::{FeedCommand, FeedEvent};
use homeroom::models::{ContextId, PostStatus};
use homeroom::transport::{ChannelKey, RealtimeEvent, StudentPayload, SubmitResponse};

#[tokio::test]
async fn realtime_echo_arriving_first_makes_the_http_ack_stale() {
    let mut fx = fixture().await;
    fx.transport.script_submit(SubmitScript::Hang);

    fx.session
        .handle_command(FeedCommand::Submit { text: "Hello".into(), sms_targets: vec![] })
        .await;

    // The channel fan-out of the sender's own post beats the HTTP response.
    fx.hub
        .publish(
            ChannelKey::Student(ACTIVE_STUDENT),
            RealtimeEvent::MessagePosted {
                posts: vec![ack_payload(601, VIEWER_ID, Some(1), "Hello", 0)],
            },
        )
        .await;
    assert!(fx.session.process_next_channel_message().await);

    {
        let posts = &fx.session.state().posts;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].status, PostStatus::Confirmed);
        // One's own echo is never unread.
        assert!(!posts[0].unread);
    }
    assert!(fx.session.lifecycle().current_submission(1).is_none());
    assert!(!fx.session.lifecycle().has_timer(1));

    // The eventual HTTP completion is stale and changes nothing.
    fx.session.handle_event(FeedEvent::SubmissionSettled {
        author_sequence_id: 1,
        submission_id: 1,
        result: Ok(SubmitResponse { objects: vec![ack_payload(601, VIEWER_ID, Some(1), "Hello", 0)] }),
    });
    assert_eq!(fx.session.state().posts.len(), 1);
}

#[tokio::test]
async fn duplicate_realtime_delivery_after_the_ack_is_ignored() {
    let mut fx = fixture().await;

    fx.session
        .handle_command(FeedCommand::Submit { text: "Hello".into(), sms_targets: vec![] })
        .await;
    assert!(fx.session.process_next_event().await);
    assert_eq!(fx.session.state().posts[0].status, PostStatus::Confirmed);
    let post_id = fx.session.state().posts[0].post_id;

    fx.hub
        .publish(
            ChannelKey::Student(ACTIVE_STUDENT),
            RealtimeEvent::MessagePosted {
                posts: vec![ack_payload(post_id.unwrap(), VIEWER_ID, Some(1), "Hello", 0)],
            },
        )
        .await;
    assert!(fx.session.process_next_channel_message().await);

    let posts = &fx.session.state().posts;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].status, PostStatus::Confirmed);
}

#[tokio::test]
async fn foreign_post_appends_unread_to_the_active_feed() {
    let mut fx = fixture().await;

    fx.hub
        .publish(
            ChannelKey::Student(ACTIVE_STUDENT),
            RealtimeEvent::MessagePosted { posts: vec![parent_post(11, "Thanks for the update!")] },
        )
        .await;
    assert!(fx.session.process_next_channel_message().await);

    let posts = &fx.session.state().posts;
    assert_eq!(posts.len(), 1);
    assert!(!posts[0].mine);
    assert!(posts[0].unread);
    assert_eq!(posts[0].status, PostStatus::Confirmed);
    // The active context's own counter never moves.
    assert_eq!(fx.session.nav().unread(ContextId::student(ACTIVE_STUDENT)), Some(0));
}

#[tokio::test]
async fn post_for_another_context_only_bumps_its_counter() {
    let mut fx = fixture().await;

    fx.hub
        .publish(
            ChannelKey::Student(OTHER_STUDENT),
            RealtimeEvent::MessagePosted { posts: vec![parent_post(21, "About Sam")] },
        )
        .await;
    fx.hub
        .publish(
            ChannelKey::Group(SOME_GROUP),
            RealtimeEvent::MessagePosted { posts: vec![parent_post(22, "Group note")] },
        )
        .await;
    drain_channel(&mut fx.session, 2).await;

    assert!(fx.session.state().posts.is_empty());
    assert_eq!(fx.session.nav().unread(ContextId::student(OTHER_STUDENT)), Some(1));
    assert_eq!(fx.session.nav().unread(ContextId::group(SOME_GROUP)), Some(1));
}

#[tokio::test]
async fn roster_events_keep_the_nav_and_subscriptions_in_step() {
    let mut fx = fixture().await;
    let roster = ChannelKey::StudentsOf(VIEWER_ID);

    fx.hub
        .publish(
            roster,
            RealtimeEvent::StudentAdded {
                objects: vec![StudentPayload { id: 44, name: "Ben Kim".into() }],
            },
        )
        .await;
    assert!(fx.session.process_next_channel_message().await);

    // Inserted in name order, between Alex and Sam.
    let names: Vec<&str> = fx.session.nav().entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Alex Doe", "Ben Kim", "Sam Nguyen", "Homeroom 3B"]);
    assert!(fx.session.nav().is_subscribed(ChannelKey::Student(44)));
    assert_eq!(fx.hub.subscriber_count(ChannelKey::Student(44)), 1);

    fx.hub
        .publish(
            roster,
            RealtimeEvent::StudentEdited {
                objects: vec![StudentPayload { id: 44, name: "Benjamin Kim".into() }],
            },
        )
        .await;
    assert!(fx.session.process_next_channel_message().await);
    assert_eq!(
        fx.session.nav().entry(ContextId::student(44)).unwrap().name,
        "Benjamin Kim"
    );

    fx.hub
        .publish(
            roster,
            RealtimeEvent::StudentRemoved {
                objects: vec![StudentPayload { id: 44, name: "Benjamin Kim".into() }],
            },
        )
        .await;
    assert!(fx.session.process_next_channel_message().await);
    assert!(fx.session.nav().entry(ContextId::student(44)).is_none());
    assert_eq!(fx.hub.subscriber_count(ChannelKey::Student(44)), 0);
}

#[tokio::test]
async fn removing_the_active_student_disables_the_composer() {
    let mut fx = fixture().await;

    fx.hub
        .publish(
            ChannelKey::StudentsOf(VIEWER_ID),
            RealtimeEvent::StudentRemoved {
                objects: vec![StudentPayload { id: ACTIVE_STUDENT, name: "Alex Doe".into() }],
            },
        )
        .await;
    assert!(fx.session.process_next_channel_message().await);
    assert!(fx.session.state().composer_disabled);

    // Submissions are dropped from here on.
    fx.session
        .handle_command(FeedCommand::Submit { text: "Hello?".into(), sms_targets: vec![] })
        .await;
    assert!(fx.session.state().posts.is_empty());
    assert_eq!(fx.transport.submit_count(), 0);
}
