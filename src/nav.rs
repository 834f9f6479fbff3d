// Navigation list of contexts (students and groups) with unread counters,
// plus the realtime subscription lifecycle tied to it: one subscription per
// listed context, all torn down before a replacement list is wired up.

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::models::{ContextId, ContextKind};
use crate::transport::{ChannelKey, ChannelMessage, SharedHub, StudentPayload, Subscription};

/// One row in the navigation list.
#[derive(Debug, Clone)]
pub struct NavEntry {
    pub kind: ContextKind,
    pub id: u64,
    pub name: String,
    /// Unread post counter, shown as a plain integer; zero is rendered
    /// distinctly from nonzero.
    pub unread: u32,
}

impl NavEntry {
    pub fn student(id: u64, name: impl Into<String>) -> Self {
        NavEntry { kind: ContextKind::Student, id, name: name.into(), unread: 0 }
    }

    pub fn group(id: u64, name: impl Into<String>) -> Self {
        NavEntry { kind: ContextKind::Group, id, name: name.into(), unread: 0 }
    }

    pub fn context(&self) -> ContextId {
        ContextId { kind: self.kind, id: self.id }
    }

    pub fn channel(&self) -> ChannelKey {
        ChannelKey::for_context(self.context())
    }
}

/// Explicit owner of live channel subscriptions. Old handles are torn down
/// deterministically before new ones are created, so a list replacement can
/// never double-deliver or leak a stale context.
pub struct SubscriptionSet {
    hub: SharedHub,
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new(hub: SharedHub) -> Self {
        SubscriptionSet { hub, subscriptions: Vec::new() }
    }

    pub fn contains(&self, channel: ChannelKey) -> bool {
        self.subscriptions.iter().any(|s| s.channel == channel)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn channels(&self) -> Vec<ChannelKey> {
        self.subscriptions.iter().map(|s| s.channel).collect()
    }

    /// Subscribe a single channel. At most one subscription exists per
    /// distinct channel; duplicates are ignored.
    pub async fn add(
        &mut self,
        channel: ChannelKey,
        sink: &mpsc::Sender<ChannelMessage>,
    ) -> Result<(), TransportError> {
        if self.contains(channel) {
            debug!("Already subscribed to {}", channel);
            return Ok(());
        }
        let subscription = self.hub.subscribe(channel, sink.clone()).await?;
        self.subscriptions.push(subscription);
        Ok(())
    }

    pub async fn remove(&mut self, channel: ChannelKey) {
        if let Some(idx) = self.subscriptions.iter().position(|s| s.channel == channel) {
            let subscription = self.subscriptions.remove(idx);
            self.hub.unsubscribe(&subscription).await;
        }
    }

    pub async fn clear(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.hub.unsubscribe(&subscription).await;
        }
    }

    /// Replace the whole set: tear down every old subscription, then
    /// establish the new ones.
    pub async fn replace(
        &mut self,
        channels: Vec<ChannelKey>,
        sink: &mpsc::Sender<ChannelMessage>,
    ) -> Result<(), TransportError> {
        self.clear().await;
        for channel in channels {
            self.add(channel, sink).await?;
        }
        Ok(())
    }
}

/// The navigation list and its subscriptions.
pub struct NavList {
    entries: Vec<NavEntry>,
    subscriptions: SubscriptionSet,
    sink: mpsc::Sender<ChannelMessage>,
}

impl NavList {
    pub fn new(hub: SharedHub, sink: mpsc::Sender<ChannelMessage>) -> Self {
        NavList {
            entries: Vec::new(),
            subscriptions: SubscriptionSet::new(hub),
            sink,
        }
    }

    pub fn entries(&self) -> &[NavEntry] {
        &self.entries
    }

    pub fn entry(&self, context: ContextId) -> Option<&NavEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == context.kind && e.id == context.id)
    }

    pub fn is_subscribed(&self, channel: ChannelKey) -> bool {
        self.subscriptions.contains(channel)
    }

    /// Listen for roster changes for this user (`students_of_{userId}`).
    pub async fn subscribe_roster(&mut self, user_id: u64) -> Result<(), TransportError> {
        self.subscriptions
            .add(ChannelKey::StudentsOf(user_id), &self.sink)
            .await
    }

    /// Swap in a new list (e.g. switching between the groups view and a
    /// group's students view). Old post-channel subscriptions are torn down
    /// before the new list's channels are wired up; the roster channel is
    /// kept.
    pub async fn replace_entries(&mut self, entries: Vec<NavEntry>) -> Result<(), TransportError> {
        let mut channels: Vec<ChannelKey> = self
            .subscriptions
            .channels()
            .into_iter()
            .filter(|c| matches!(c, ChannelKey::StudentsOf(_)))
            .collect();
        channels.extend(entries.iter().map(NavEntry::channel));
        self.subscriptions.replace(channels, &self.sink).await?;
        info!("Navigation list replaced with {} entries", entries.len());
        self.entries = entries;
        Ok(())
    }

    /// A post arrived for a context that is not active: bump its counter.
    pub fn increment_unread(&mut self, context: ContextId) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.kind == context.kind && e.id == context.id)
        {
            entry.unread = entry.unread.saturating_add(1);
            debug!("Unread count for {:?} is now {}", context, entry.unread);
        }
    }

    /// Activating a context resets its counter, independent of scroll.
    pub fn zero_unread(&mut self, context: ContextId) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.kind == context.kind && e.id == context.id)
        {
            entry.unread = 0;
        }
    }

    pub fn unread(&self, context: ContextId) -> Option<u32> {
        self.entry(context).map(|e| e.unread)
    }

    /// Insert a new student in case-insensitive name order and subscribe its
    /// post channel.
    pub async fn student_added(&mut self, student: &StudentPayload) -> Result<(), TransportError> {
        if self
            .entries
            .iter()
            .any(|e| e.kind == ContextKind::Student && e.id == student.id)
        {
            return Ok(());
        }
        let entry = NavEntry::student(student.id, student.name.clone());
        let channel = entry.channel();
        let key = student.name.to_lowercase();
        let position = self
            .entries
            .iter()
            .position(|e| e.kind == ContextKind::Student && e.name.to_lowercase() > key)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
        self.subscriptions.add(channel, &self.sink).await?;
        info!("Student {} added to the nav", student.name);
        Ok(())
    }

    /// Rename a listed student in place.
    pub fn student_edited(&mut self, student: &StudentPayload) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.kind == ContextKind::Student && e.id == student.id)
        {
            entry.name = student.name.clone();
        }
    }

    /// Drop a student from the list and tear down its subscription.
    /// Returns true if the entry existed.
    pub async fn student_removed(&mut self, student: &StudentPayload) -> bool {
        let Some(idx) = self
            .entries
            .iter()
            .position(|e| e.kind == ContextKind::Student && e.id == student.id)
        else {
            return false;
        };
        let entry = self.entries.remove(idx);
        self.subscriptions.remove(entry.channel()).await;
        warn!("Student {} removed from the nav", entry.name);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::Mutex;

    /// Hub that records every subscribe/unsubscribe in order.
    #[derive(Default)]
    struct RecordingHub {
        log: Mutex<Vec<String>>,
    }

    impl RecordingHub {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl crate::transport::RealtimeHub for RecordingHub {
        async fn subscribe(
            &self,
            channel: ChannelKey,
            _sink: mpsc::Sender<ChannelMessage>,
        ) -> Result<Subscription, TransportError> {
            self.log.lock().unwrap().push(format!("+{}", channel));
            Ok(Subscription::new(channel))
        }

        async fn unsubscribe(&self, subscription: &Subscription) {
            self.log
                .lock()
                .unwrap()
                .push(format!("-{}", subscription.channel));
        }
    }

    fn nav() -> (NavList, Arc<RecordingHub>) {
        let hub = Arc::new(RecordingHub::default());
        let (sink, _rx) = mpsc::channel(8);
        (NavList::new(hub.clone(), sink), hub)
    }

    #[tokio::test]
    async fn replacing_the_list_tears_down_before_resubscribing() {
        let (mut nav, hub) = nav();
        nav.replace_entries(vec![NavEntry::group(1, "All Students"), NavEntry::group(2, "Math")])
            .await
            .unwrap();
        nav.replace_entries(vec![NavEntry::student(10, "Alice Johnson")])
            .await
            .unwrap();

        assert_eq!(
            hub.log(),
            vec!["+group_1", "+group_2", "-group_1", "-group_2", "+student_10"]
        );
        assert!(nav.is_subscribed(ChannelKey::Student(10)));
        assert!(!nav.is_subscribed(ChannelKey::Group(1)));
    }

    #[tokio::test]
    async fn roster_channel_survives_list_replacement() {
        let (mut nav, _hub) = nav();
        nav.subscribe_roster(5).await.unwrap();
        nav.replace_entries(vec![NavEntry::student(10, "Alice Johnson")])
            .await
            .unwrap();
        assert!(nav.is_subscribed(ChannelKey::StudentsOf(5)));
    }

    #[tokio::test]
    async fn unread_counters_increment_and_reset() {
        let (mut nav, _hub) = nav();
        nav.replace_entries(vec![NavEntry::student(10, "Alice Johnson")])
            .await
            .unwrap();
        let context = ContextId::student(10);
        nav.increment_unread(context);
        nav.increment_unread(context);
        assert_eq!(nav.unread(context), Some(2));
        nav.zero_unread(context);
        assert_eq!(nav.unread(context), Some(0));
    }

    #[tokio::test]
    async fn student_added_inserts_in_name_order_and_subscribes() {
        let (mut nav, _hub) = nav();
        nav.replace_entries(vec![
            NavEntry::student(10, "alice johnson"),
            NavEntry::student(11, "Carla Reyes"),
        ])
        .await
        .unwrap();

        nav.student_added(&StudentPayload { id: 12, name: "Bob Smith".into() })
            .await
            .unwrap();
        let names: Vec<&str> = nav.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alice johnson", "Bob Smith", "Carla Reyes"]);
        assert!(nav.is_subscribed(ChannelKey::Student(12)));

        // Duplicate adds are ignored.
        nav.student_added(&StudentPayload { id: 12, name: "Bob Smith".into() })
            .await
            .unwrap();
        assert_eq!(nav.entries().len(), 3);
    }

    #[tokio::test]
    async fn student_removed_unsubscribes_its_channel() {
        let (mut nav, hub) = nav();
        nav.replace_entries(vec![NavEntry::student(10, "Alice Johnson")])
            .await
            .unwrap();
        assert!(nav.student_removed(&StudentPayload { id: 10, name: "Alice Johnson".into() }).await);
        assert!(nav.entries().is_empty());
        assert!(hub.log().contains(&"-student_10".to_string()));
        assert!(!nav.student_removed(&StudentPayload { id: 10, name: "Alice Johnson".into() }).await);
    }
}
