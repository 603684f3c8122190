//! Per-match message threads.
//!
//! Threads are cached inside the shared `messages` slot, one entry per match.
//! Refreshing or editing one thread never touches the others.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::CacheSlot;
use crate::types::sort_newest_first;
use crate::{
    ApiClient, Message, MessageDraft, Resolved, ResourceCache, Revalidation, SessionManager,
    SyncError,
};

/// Outcome of a batch of mark-read calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkReadReport {
    /// Ids the server confirmed as read.
    pub marked: Vec<i64>,
    /// Ids whose call failed. They stay unread until the next attempt.
    pub failed: Vec<i64>,
}

impl MarkReadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Cache-backed message threads keyed by match id.
pub struct MessageThreads {
    api: Arc<ApiClient>,
    sessions: Arc<SessionManager>,
    cache: Arc<ResourceCache>,
}

impl MessageThreads {
    pub fn new(api: Arc<ApiClient>, sessions: Arc<SessionManager>, cache: Arc<ResourceCache>) -> Self {
        Self {
            api,
            sessions,
            cache,
        }
    }

    /// Cached thread now, fresh thread on settle. Newest message first.
    pub async fn thread(&self, match_id: i64) -> Revalidation<'_, Vec<Message>> {
        self.cache
            .load(CacheSlot::Thread(match_id), self.fetch_thread(match_id))
            .await
    }

    pub async fn refresh_thread(&self, match_id: i64) -> Result<Resolved<Vec<Message>>, SyncError> {
        self.cache
            .refresh(CacheSlot::Thread(match_id), self.fetch_thread(match_id))
            .await
    }

    /// The cached thread without touching the network.
    pub async fn cached_thread(&self, match_id: i64) -> Option<Vec<Message>> {
        self.cache.read(CacheSlot::Thread(match_id)).await
    }

    /// Load a thread like [`thread`](Self::thread), then mark everything
    /// addressed to `reader_id` as read once the refresh settles.
    ///
    /// The settled thread reflects the messages the server confirmed.
    pub async fn open_thread(
        &self,
        match_id: i64,
        reader_id: i64,
    ) -> Revalidation<'_, Vec<Message>> {
        self.thread(match_id)
            .await
            .and_then(move |resolved| self.mark_incoming_read(resolved, reader_id))
    }

    #[tracing::instrument(skip(self, resolved))]
    async fn mark_incoming_read(
        &self,
        mut resolved: Resolved<Vec<Message>>,
        reader_id: i64,
    ) -> Result<Resolved<Vec<Message>>, SyncError> {
        let unread: Vec<i64> = resolved
            .value
            .iter()
            .filter(|m| m.receiver_user_id == reader_id && !m.is_read)
            .map(|m| m.id)
            .collect();
        if unread.is_empty() {
            return Ok(resolved);
        }

        let report = self.mark_read(&unread).await?;
        let marked: HashSet<i64> = report.marked.into_iter().collect();
        for message in &mut resolved.value {
            if marked.contains(&message.id) {
                message.is_read = true;
            }
        }
        Ok(resolved)
    }

    /// Post a message, then prepend the confirmed copy to the cached thread.
    ///
    /// Nothing is cached when the post fails.
    #[tracing::instrument(skip(self, content))]
    pub async fn send(
        &self,
        match_id: i64,
        content: &str,
        sender_id: i64,
        receiver_id: i64,
    ) -> Result<Message, SyncError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::Validation("message content is empty".to_string()));
        }
        self.sessions.require().await?;

        let draft = MessageDraft {
            match_id,
            content: content.to_string(),
            sender_user_id: sender_id,
            receiver_user_id: receiver_id,
        };
        let confirmed: Message = self.api.post_json("/messages", &draft).await?;
        info!(message_id = confirmed.id, "message sent");

        let cached = confirmed.clone();
        let result = self
            .cache
            .edit_threads(move |threads| {
                let thread = threads.entry(match_id).or_default();
                thread.retain(|m| m.id != cached.id);
                thread.insert(0, cached);
                vec![match_id]
            })
            .await;
        if let Err(e) = result {
            warn!(match_id, error = %e, "failed to cache sent message");
        }

        Ok(confirmed)
    }

    /// Mark messages as read, one concurrent call per id.
    ///
    /// Individual failures are logged and reported, never returned. Cached
    /// threads are updated for the ids the server confirmed.
    #[tracing::instrument(skip(self, message_ids), fields(count = message_ids.len()))]
    pub async fn mark_read(&self, message_ids: &[i64]) -> Result<MarkReadReport, SyncError> {
        let mut seen = HashSet::new();
        let ids: Vec<i64> = message_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Ok(MarkReadReport::default());
        }
        self.sessions.require().await?;

        let outcomes = join_all(ids.iter().map(|&id| async move {
            (id, self.api.put_empty(&format!("/messages/{id}/read")).await)
        }))
        .await;

        let mut report = MarkReadReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.marked.push(id),
                Err(e) => {
                    warn!(message_id = id, error = %e, "failed to mark message as read");
                    report.failed.push(id);
                }
            }
        }

        if !report.marked.is_empty() {
            self.reconcile_read(&report.marked).await;
        }
        debug!(marked = report.marked.len(), failed = report.failed.len(), "mark-read finished");
        Ok(report)
    }

    /// Every message involving `user_id`, across matches. Not cached.
    pub async fn messages_for_user(&self, user_id: i64) -> Result<Vec<Message>, SyncError> {
        self.sessions.require().await?;
        let mut messages: Vec<Message> = self
            .api
            .get_json(&format!("/messages/user/{user_id}"))
            .await?;
        sort_newest_first(&mut messages);
        Ok(messages)
    }

    async fn fetch_thread(&self, match_id: i64) -> Result<Vec<Message>, SyncError> {
        self.sessions.require().await?;
        let mut messages: Vec<Message> = self
            .api
            .get_json(&format!("/messages/match/{match_id}"))
            .await?;
        sort_newest_first(&mut messages);
        Ok(messages)
    }

    async fn reconcile_read(&self, marked: &[i64]) {
        let marked: HashSet<i64> = marked.iter().copied().collect();
        let result = self
            .cache
            .edit_threads(|threads| {
                let mut touched = Vec::new();
                for (match_id, thread) in threads.iter_mut() {
                    let mut changed = false;
                    for message in thread.iter_mut() {
                        if marked.contains(&message.id) && !message.is_read {
                            message.is_read = true;
                            changed = true;
                        }
                    }
                    if changed {
                        touched.push(*match_id);
                    }
                }
                touched
            })
            .await;

        if let Err(e) = result {
            warn!(error = %e, "failed to record read state in cache");
        }
    }
}
