use std::collections::HashMap;
use std::time::Instant;

use futures_util::future::try_join_all;
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::api::SendMessageRequest;
use parley_types::models::ChannelMessage;

use crate::backend::{Backend, LocalFile};
use crate::banner::ErrorBanner;
use crate::error::ClientError;
use crate::feed::ChannelFeed;

/// Unsent text and files for one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub text: String,
    pub files: Vec<LocalFile>,
}

impl Draft {
    /// Nothing to send: blank text and no files.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.files.is_empty()
    }
}

/// Message input with one draft per channel, so switching channels keeps
/// what was typed. Sends take `&mut self`: one composer never has two sends
/// in flight.
#[derive(Debug, Default)]
pub struct Composer {
    drafts: HashMap<Uuid, Draft>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self, channel_id: Uuid) -> Option<&Draft> {
        self.drafts.get(&channel_id)
    }

    pub fn set_text(&mut self, channel_id: Uuid, text: impl Into<String>) {
        self.drafts.entry(channel_id).or_default().text = text.into();
    }

    pub fn attach(&mut self, channel_id: Uuid, file: LocalFile) {
        self.drafts.entry(channel_id).or_default().files.push(file);
    }

    pub fn remove_file(&mut self, channel_id: Uuid, index: usize) -> Option<LocalFile> {
        let files = &mut self.drafts.get_mut(&channel_id)?.files;
        (index < files.len()).then(|| files.remove(index))
    }

    pub fn discard(&mut self, channel_id: Uuid) {
        self.drafts.remove(&channel_id);
    }

    /// Upload the draft's files, then post the message.
    ///
    /// Returns `Ok(None)` without touching the network when the draft is
    /// empty. Uploads run concurrently and must all succeed: on the first
    /// failure nothing is posted and the draft stays as it was. The draft is
    /// cleared only once the server has stored the message.
    pub async fn send<B: Backend>(
        &mut self,
        backend: &B,
        channel_id: Uuid,
    ) -> Result<Option<ChannelMessage>, ClientError> {
        let Some(draft) = self.drafts.get(&channel_id).filter(|d| !d.is_empty()) else {
            return Ok(None);
        };

        let uploads = try_join_all(draft.files.iter().map(|file| backend.upload_file(file))).await?;

        let req = SendMessageRequest {
            content: draft.text.trim().to_string(),
            parent_id: None,
            attachments: uploads.iter().map(|u| u.file_id).collect(),
        };
        let message = backend.send_message(channel_id, &req).await?;

        info!(
            "Sent message {} with {} attachments",
            message.id,
            uploads.len()
        );
        self.drafts.remove(&channel_id);
        Ok(Some(message))
    }

    /// Post a text reply under `parent_id`. Blank content is a no-op.
    pub async fn send_reply<B: Backend>(
        &mut self,
        backend: &B,
        channel_id: Uuid,
        parent_id: Uuid,
        content: &str,
    ) -> Result<Option<ChannelMessage>, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        let req = SendMessageRequest {
            content: content.to_string(),
            parent_id: Some(parent_id),
            attachments: vec![],
        };
        Ok(Some(backend.send_message(channel_id, &req).await?))
    }

    /// Send the draft of `feed`'s channel and append the stored row to the
    /// feed. Failures go to the banner. Returns whether a message was posted.
    pub async fn submit<B: Backend>(
        &mut self,
        backend: &B,
        feed: &mut ChannelFeed,
        banner: &mut ErrorBanner,
    ) -> bool {
        match self.send(backend, feed.channel_id()).await {
            Ok(Some(message)) => {
                feed.merge(message);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Send to channel {} failed: {}", feed.channel_id(), e);
                banner.show(e.to_string(), Instant::now());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBackend, message, user};
    use crate::realtime::RealtimeHandle;
    use tokio::sync::mpsc;

    fn file(name: &str) -> LocalFile {
        LocalFile::new(name, "text/plain", name.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn empty_send_makes_no_network_call() {
        let backend = FakeBackend::new(user("alice"));
        let channel_id = Uuid::new_v4();
        let mut composer = Composer::new();

        assert!(composer.send(&backend, channel_id).await.unwrap().is_none());

        composer.set_text(channel_id, "   \n ");
        assert!(composer.send(&backend, channel_id).await.unwrap().is_none());
        assert!(composer.send_reply(&backend, channel_id, Uuid::new_v4(), "  ").await.unwrap().is_none());

        assert_eq!(backend.sends(), 0);
        assert!(backend.uploads().is_empty());
    }

    #[tokio::test]
    async fn files_only_message_is_sent_with_attachments() {
        let backend = FakeBackend::new(user("alice"));
        let channel_id = Uuid::new_v4();
        let mut composer = Composer::new();
        composer.attach(channel_id, file("a.txt"));
        composer.attach(channel_id, file("b.txt"));

        let sent = composer.send(&backend, channel_id).await.unwrap().unwrap();

        assert_eq!(sent.content, "");
        assert_eq!(sent.attachments.len(), 2);
        assert_eq!(backend.uploads().len(), 2);
        assert!(composer.draft(channel_id).is_none());
    }

    #[tokio::test]
    async fn one_failed_upload_aborts_the_whole_send() {
        let backend = FakeBackend::new(user("alice"));
        backend.state.lock().unwrap().fail_uploads.insert("b.txt".into());
        let channel_id = Uuid::new_v4();

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut banner = ErrorBanner::new();
        let mut feed = ChannelFeed::activate(&backend, &RealtimeHandle::new(tx), channel_id, &mut banner).await;

        let mut composer = Composer::new();
        composer.set_text(channel_id, "see attached");
        for name in ["a.txt", "b.txt", "c.txt"] {
            composer.attach(channel_id, file(name));
        }
        let before = composer.draft(channel_id).cloned();

        let posted = composer.submit(&backend, &mut feed, &mut banner).await;

        assert!(!posted);
        assert_eq!(backend.sends(), 0);
        assert!(backend.state.lock().unwrap().messages.is_empty());
        assert!(feed.messages().is_empty());
        assert_eq!(composer.draft(channel_id).cloned(), before);
        assert!(banner.current().unwrap().contains("b.txt"));
    }

    #[tokio::test]
    async fn submit_appends_the_stored_row_once() {
        let alice = user("alice");
        let backend = FakeBackend::new(alice.clone());
        let channel_id = Uuid::new_v4();
        backend.store(message(channel_id, &alice, "earlier"));

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut banner = ErrorBanner::new();
        let mut feed = ChannelFeed::activate(&backend, &RealtimeHandle::new(tx), channel_id, &mut banner).await;

        let mut composer = Composer::new();
        composer.set_text(channel_id, "  hello  ");
        assert!(composer.submit(&backend, &mut feed, &mut banner).await);

        let last = feed.messages().last().unwrap();
        assert_eq!(last.content, "hello");
        assert_eq!(last.user.username, "alice");
        assert_eq!(feed.messages().len(), 2);
    }

    #[tokio::test]
    async fn drafts_are_kept_per_channel() {
        let backend = FakeBackend::new(user("alice"));
        let (general, random) = (Uuid::new_v4(), Uuid::new_v4());
        let mut composer = Composer::new();
        composer.set_text(general, "half-typed");
        composer.set_text(random, "ship it");

        composer.send(&backend, random).await.unwrap();

        assert_eq!(composer.draft(general).unwrap().text, "half-typed");
        assert!(composer.draft(random).is_none());
    }

    #[tokio::test]
    async fn replies_carry_their_parent() {
        let backend = FakeBackend::new(user("alice"));
        let (channel_id, parent_id) = (Uuid::new_v4(), Uuid::new_v4());
        let mut composer = Composer::new();

        let sent = composer
            .send_reply(&backend, channel_id, parent_id, " agreed ")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sent.parent_id, Some(parent_id));
        assert_eq!(sent.content, "agreed");
    }

    #[test]
    fn removing_a_file_keeps_the_rest() {
        let channel_id = Uuid::new_v4();
        let mut composer = Composer::new();
        composer.attach(channel_id, file("a.txt"));
        composer.attach(channel_id, file("b.txt"));

        assert_eq!(composer.remove_file(channel_id, 0).unwrap().name, "a.txt");
        assert!(composer.remove_file(channel_id, 5).is_none());
        assert_eq!(composer.draft(channel_id).unwrap().files.len(), 1);
    }
}
