use std::time::Instant;

use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::ChannelMessage;

use crate::backend::Backend;
use crate::banner::ErrorBanner;
use crate::error::ClientError;
use crate::reactions::ReactionSet;
use crate::realtime::{RealtimeHandle, Subscription};

/// The message list of the active channel, kept in sync with the gateway.
///
/// Top-level messages are ordered by arrival, oldest first, each holding its
/// replies. A feed owns its gateway subscription: dropping the feed (for
/// instance when the user switches channel) unsubscribes.
#[derive(Debug)]
pub struct ChannelFeed {
    channel_id: Uuid,
    messages: Vec<ChannelMessage>,
    _subscription: Subscription,
}

impl ChannelFeed {
    /// Subscribe to `channel_id` and load its history. A failed load leaves
    /// the feed empty and puts the error on the banner; live inserts still
    /// arrive.
    pub async fn activate<B: Backend>(
        backend: &B,
        realtime: &RealtimeHandle,
        channel_id: Uuid,
        banner: &mut ErrorBanner,
    ) -> Self {
        // Subscribe before fetching so nothing inserted in between is missed;
        // overlap is absorbed by `merge`.
        let subscription = realtime.subscribe(channel_id);

        let messages = match backend.list_messages(channel_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to load messages for channel {}: {}", channel_id, e);
                banner.show(format!("Could not load messages: {}", e), Instant::now());
                Vec::new()
            }
        };
        debug!("Channel {} loaded with {} messages", channel_id, messages.len());

        Self {
            channel_id,
            messages,
            _subscription: subscription,
        }
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn messages(&self) -> &[ChannelMessage] {
        &self.messages
    }

    /// A top-level message or a reply.
    pub fn find(&self, message_id: Uuid) -> Option<&ChannelMessage> {
        self.messages.iter().find_map(|m| {
            if m.id == message_id {
                Some(m)
            } else {
                m.replies.iter().find(|r| r.id == message_id)
            }
        })
    }

    fn find_mut(&mut self, message_id: Uuid) -> Option<&mut ChannelMessage> {
        self.messages.iter_mut().find_map(|m| {
            if m.id == message_id {
                Some(m)
            } else {
                m.replies.iter_mut().find(|r| r.id == message_id)
            }
        })
    }

    /// Add or replace a message. A row already present by id is replaced in
    /// place, so the composer's local append and the gateway's later insert
    /// for the same row leave one copy.
    pub fn merge(&mut self, incoming: ChannelMessage) {
        if incoming.channel_id != self.channel_id {
            return;
        }

        let parent_id = incoming.parent_id;
        match parent_id {
            None => match self.messages.iter_mut().find(|m| m.id == incoming.id) {
                Some(existing) => {
                    let mut incoming = incoming;
                    if incoming.replies.is_empty() {
                        incoming.replies = std::mem::take(&mut existing.replies);
                    }
                    *existing = incoming;
                }
                None => self.messages.push(incoming),
            },
            Some(parent_id) => match self.messages.iter_mut().find(|m| m.id == parent_id) {
                Some(parent) => match parent.replies.iter_mut().find(|r| r.id == incoming.id) {
                    Some(existing) => *existing = incoming,
                    None => parent.replies.push(incoming),
                },
                None => debug!("Dropping reply {} to unknown parent {}", incoming.id, parent_id),
            },
        }
    }

    /// Apply a gateway event. Inserts for this channel are re-fetched with
    /// the author joined; reactions are applied in place.
    pub async fn handle_event<B: Backend>(
        &mut self,
        backend: &B,
        event: &GatewayEvent,
        banner: &mut ErrorBanner,
    ) {
        match event {
            GatewayEvent::MessageInsert { id, channel_id, .. } if *channel_id == self.channel_id => {
                match backend.get_message(*id).await {
                    Ok(message) => self.merge(message),
                    Err(e) => {
                        warn!("Failed to fetch message {}: {}", id, e);
                        banner.show(format!("Could not load new message: {}", e), Instant::now());
                    }
                }
            }
            GatewayEvent::ReactionAdd {
                channel_id,
                message_id,
                user_id,
                emoji,
            } if *channel_id == self.channel_id => self.apply_reaction(*message_id, *user_id, emoji, true),
            GatewayEvent::ReactionRemove {
                channel_id,
                message_id,
                user_id,
                emoji,
            } if *channel_id == self.channel_id => self.apply_reaction(*message_id, *user_id, emoji, false),
            _ => {}
        }
    }

    fn apply_reaction(&mut self, message_id: Uuid, user_id: Uuid, emoji: &str, added: bool) {
        let Some(message) = self.find_mut(message_id) else {
            return;
        };
        let mut set = ReactionSet::from(std::mem::take(&mut message.reactions));
        set.apply(user_id, emoji, added);
        message.reactions = set.into_groups();
    }

    /// Toggle `user_id`'s `emoji` on a message and apply the server's
    /// verdict locally. Returns whether the reaction is now present.
    pub async fn toggle_reaction<B: Backend>(
        &mut self,
        backend: &B,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<bool, ClientError> {
        let resp = backend.toggle_reaction(message_id, emoji).await?;
        self.apply_reaction(message_id, user_id, emoji, resp.added);
        Ok(resp.added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBackend, message, reply, user};
    use chrono::Utc;
    use parley_types::events::GatewayCommand;
    use tokio::sync::mpsc;

    fn realtime() -> (RealtimeHandle, mpsc::UnboundedReceiver<GatewayCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RealtimeHandle::new(tx), rx)
    }

    fn insert_event(m: &ChannelMessage) -> GatewayEvent {
        GatewayEvent::MessageInsert {
            id: m.id,
            channel_id: m.channel_id,
            user_id: m.user_id,
            parent_id: m.parent_id,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn activation_loads_history_with_replies() {
        let alice = user("alice");
        let backend = FakeBackend::new(alice.clone());
        let channel_id = Uuid::new_v4();
        let first = message(channel_id, &alice, "first");
        let answer = reply(&first, &alice, "answer");
        backend.store(first.clone());
        backend.store(answer.clone());
        backend.store(message(channel_id, &alice, "second"));
        backend.store(message(Uuid::new_v4(), &alice, "elsewhere"));

        let (handle, mut commands) = realtime();
        let mut banner = ErrorBanner::new();
        let feed = ChannelFeed::activate(&backend, &handle, channel_id, &mut banner).await;

        let contents: Vec<&str> = feed.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second"]);
        assert_eq!(feed.messages()[0].replies[0].id, answer.id);
        assert_eq!(
            commands.try_recv().unwrap(),
            GatewayCommand::Subscribe { channel_ids: vec![channel_id] }
        );
        assert!(banner.current().is_none());

        drop(feed);
        assert_eq!(
            commands.try_recv().unwrap(),
            GatewayCommand::Unsubscribe { channel_ids: vec![channel_id] }
        );
    }

    #[tokio::test]
    async fn reactivating_the_same_channel_keeps_it_subscribed() {
        let backend = FakeBackend::new(user("alice"));
        let channel_id = Uuid::new_v4();
        let (handle, mut commands) = realtime();
        let mut banner = ErrorBanner::new();

        let previous = ChannelFeed::activate(&backend, &handle, channel_id, &mut banner).await;
        let feed = ChannelFeed::activate(&backend, &handle, channel_id, &mut banner).await;
        drop(previous);

        assert_eq!(
            commands.try_recv().unwrap(),
            GatewayCommand::Subscribe { channel_ids: vec![channel_id] }
        );
        assert!(commands.try_recv().is_err());

        drop(feed);
        assert_eq!(
            commands.try_recv().unwrap(),
            GatewayCommand::Unsubscribe { channel_ids: vec![channel_id] }
        );
    }

    #[tokio::test]
    async fn failed_load_shows_banner_and_leaves_feed_empty() {
        let backend = FakeBackend::new(user("alice"));
        backend.state.lock().unwrap().fail_reads = true;
        let (handle, _commands) = realtime();
        let mut banner = ErrorBanner::new();

        let feed = ChannelFeed::activate(&backend, &handle, Uuid::new_v4(), &mut banner).await;

        assert!(feed.messages().is_empty());
        assert!(banner.current().unwrap().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn inserts_are_fetched_and_replies_nest_under_parent() {
        let alice = user("alice");
        let backend = FakeBackend::new(alice.clone());
        let channel_id = Uuid::new_v4();
        let (handle, _commands) = realtime();
        let mut banner = ErrorBanner::new();
        let mut feed = ChannelFeed::activate(&backend, &handle, channel_id, &mut banner).await;

        let top = message(channel_id, &alice, "hello");
        backend.store(top.clone());
        feed.handle_event(&backend, &insert_event(&top), &mut banner).await;

        let answer = reply(&top, &alice, "hi back");
        backend.store(answer.clone());
        feed.handle_event(&backend, &insert_event(&answer), &mut banner).await;

        assert_eq!(feed.messages().len(), 1);
        assert_eq!(feed.messages()[0].replies.len(), 1);
        assert_eq!(feed.find(answer.id).unwrap().content, "hi back");
    }

    #[tokio::test]
    async fn insert_for_a_locally_appended_row_replaces_it() {
        let alice = user("alice");
        let backend = FakeBackend::new(alice.clone());
        let channel_id = Uuid::new_v4();
        let (handle, _commands) = realtime();
        let mut banner = ErrorBanner::new();
        let mut feed = ChannelFeed::activate(&backend, &handle, channel_id, &mut banner).await;

        let local = message(channel_id, &alice, "sent");
        feed.merge(local.clone());
        backend.store(local.clone());
        feed.handle_event(&backend, &insert_event(&local), &mut banner).await;
        feed.handle_event(&backend, &insert_event(&local), &mut banner).await;

        assert_eq!(feed.messages().len(), 1);
    }

    #[tokio::test]
    async fn events_for_other_channels_are_ignored() {
        let alice = user("alice");
        let backend = FakeBackend::new(alice.clone());
        let (handle, _commands) = realtime();
        let mut banner = ErrorBanner::new();
        let mut feed = ChannelFeed::activate(&backend, &handle, Uuid::new_v4(), &mut banner).await;

        let elsewhere = message(Uuid::new_v4(), &alice, "not here");
        backend.store(elsewhere.clone());
        feed.handle_event(&backend, &insert_event(&elsewhere), &mut banner).await;
        feed.merge(elsewhere);

        assert!(feed.messages().is_empty());
    }

    #[tokio::test]
    async fn failed_refetch_surfaces_on_banner() {
        let alice = user("alice");
        let backend = FakeBackend::new(alice.clone());
        let channel_id = Uuid::new_v4();
        let (handle, _commands) = realtime();
        let mut banner = ErrorBanner::new();
        let mut feed = ChannelFeed::activate(&backend, &handle, channel_id, &mut banner).await;

        let missing = message(channel_id, &alice, "never stored");
        feed.handle_event(&backend, &insert_event(&missing), &mut banner).await;

        assert!(feed.messages().is_empty());
        assert!(banner.current().unwrap().contains("Message not found"));
    }

    #[tokio::test]
    async fn reacting_twice_restores_the_message() {
        let alice = user("alice");
        let backend = FakeBackend::new(alice.clone());
        let channel_id = Uuid::new_v4();
        let top = message(channel_id, &alice, "react to me");
        backend.store(top.clone());

        let (handle, _commands) = realtime();
        let mut banner = ErrorBanner::new();
        let mut feed = ChannelFeed::activate(&backend, &handle, channel_id, &mut banner).await;

        let added = feed.toggle_reaction(&backend, top.id, alice.id, "👍").await.unwrap();
        assert!(added);
        assert_eq!(feed.find(top.id).unwrap().reactions[0].count, 1);

        let added = feed.toggle_reaction(&backend, top.id, alice.id, "👍").await.unwrap();
        assert!(!added);
        assert!(feed.find(top.id).unwrap().reactions.is_empty());
        assert!(backend.state.lock().unwrap().reactions.is_empty());
    }

    #[tokio::test]
    async fn gateway_reactions_apply_to_replies() {
        let alice = user("alice");
        let bob = user("bob");
        let backend = FakeBackend::new(alice.clone());
        let channel_id = Uuid::new_v4();
        let top = message(channel_id, &alice, "question");
        let answer = reply(&top, &alice, "answer");
        backend.store(top.clone());
        backend.store(answer.clone());

        let (handle, _commands) = realtime();
        let mut banner = ErrorBanner::new();
        let mut feed = ChannelFeed::activate(&backend, &handle, channel_id, &mut banner).await;

        let event = GatewayEvent::ReactionAdd {
            channel_id,
            message_id: answer.id,
            user_id: bob.id,
            emoji: "🎉".into(),
        };
        feed.handle_event(&backend, &event, &mut banner).await;

        let groups = &feed.find(answer.id).unwrap().reactions;
        assert_eq!(groups[0].user_ids, vec![bob.id]);
    }
}
