//! Stale-while-revalidate cache over the persistent store.
//!
//! Each resource kind has one slot holding its last known good value, tagged
//! with the user it belongs to. A load hands back the cached value immediately
//! and a pending refresh; the refresh overwrites the slot on success and falls
//! back to the slot on recoverable failures. A slot owned by another user reads
//! as a miss. Message threads share the `messages` slot, one entry per match.
//!
//! This module is the only writer of resource slots.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, trace, warn};

use crate::store::keys;
use crate::{KeyValueStore, Message, SyncError};

/// Capacity of the cache event channel. Slow subscribers miss older events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A category of remote-backed, cache-fallback data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Profile,
    Preferences,
    Matches,
    Messages,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Profile,
        ResourceKind::Preferences,
        ResourceKind::Matches,
        ResourceKind::Messages,
    ];

    /// Store key of this kind's slot.
    pub fn key(&self) -> &'static str {
        match self {
            ResourceKind::Profile => keys::PROFILE,
            ResourceKind::Preferences => keys::PREFERENCES,
            ResourceKind::Matches => keys::MATCHES,
            ResourceKind::Messages => keys::MESSAGES,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Addressable unit of cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    /// A whole resource slot, as seen by `user_id`.
    ///
    /// Messages are not addressable this way; use [`CacheSlot::Thread`].
    Resource { kind: ResourceKind, user_id: i64 },
    /// One conversation inside the messages slot.
    Thread(i64),
}

impl CacheSlot {
    pub fn resource(kind: ResourceKind, user_id: i64) -> Self {
        CacheSlot::Resource { kind, user_id }
    }
}

impl std::fmt::Display for CacheSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheSlot::Resource { kind, user_id } => write!(f, "{kind}[user {user_id}]"),
            CacheSlot::Thread(match_id) => write!(f, "messages[{match_id}]"),
        }
    }
}

/// Stored form of a resource slot: the value plus the user it belongs to.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Owned<T> {
    user_id: i64,
    value: T,
}

/// Change notification for cache subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A refresh succeeded and the slot now holds fresh data.
    Refreshed(CacheSlot),
    /// A refresh failed and cached data was served instead.
    ServedStale(CacheSlot),
    /// The slot was rewritten after a confirmed write (update, send, mark-read).
    Updated(CacheSlot),
    /// The slot was emptied.
    Cleared(ResourceKind),
}

/// Where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Returned by the network call of this request.
    Fresh,
    /// Read from the cache because the network call failed.
    Stale { reason: String },
}

/// Outcome of a refresh: a value, fresh or stale.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub freshness: Freshness,
}

impl<T> Resolved<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            freshness: Freshness::Fresh,
        }
    }

    pub fn stale(value: T, reason: &SyncError) -> Self {
        Self {
            value,
            freshness: Freshness::Stale {
                reason: reason.to_string(),
            },
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// A load in progress: the cached value now, the authoritative value later.
///
/// Show [`cached`](Self::cached) right away, then await
/// [`settle`](Self::settle); its result supersedes the cached value.
pub struct Revalidation<'a, T> {
    cached: Option<T>,
    refresh: BoxFuture<'a, Result<Resolved<T>, SyncError>>,
}

impl<'a, T> Revalidation<'a, T> {
    /// Chain `next` after the refresh; the cached value is kept as is.
    pub(crate) fn and_then<F, Fut>(self, next: F) -> Revalidation<'a, T>
    where
        T: Send + 'a,
        F: FnOnce(Resolved<T>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<Resolved<T>, SyncError>> + Send + 'a,
    {
        let Revalidation { cached, refresh } = self;
        Revalidation {
            cached,
            refresh: Box::pin(async move { next(refresh.await?).await }),
        }
    }

    pub fn cached(&self) -> Option<&T> {
        self.cached.as_ref()
    }

    pub fn take_cached(&mut self) -> Option<T> {
        self.cached.take()
    }

    /// Wait for the refresh. Errors only when there is nothing to fall back on.
    pub async fn settle(self) -> Result<Resolved<T>, SyncError> {
        self.refresh.await
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Revalidation<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Revalidation")
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}

/// Owner of every resource slot in the store.
pub struct ResourceCache {
    store: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<CacheEvent>,
    /// Serializes read-modify-write cycles on the shared messages slot.
    threads_lock: Mutex<()>,
}

impl ResourceCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            events,
            threads_lock: Mutex::new(()),
        }
    }

    /// Subscribe to cache change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Read a slot. Missing, unreadable, or undecodable data reads as `None`.
    pub async fn read<T: DeserializeOwned>(&self, slot: CacheSlot) -> Option<T> {
        let raw = match slot {
            CacheSlot::Resource { kind, user_id } => {
                let owned: Owned<Value> = match serde_json::from_value(self.read_raw(kind).await?) {
                    Ok(owned) => owned,
                    Err(e) => {
                        warn!(%slot, error = %e, "cached value has no owner, ignoring");
                        return None;
                    }
                };
                if owned.user_id != user_id {
                    debug!(%slot, owner = owned.user_id, "cached value belongs to another user");
                    return None;
                }
                owned.value
            }
            CacheSlot::Thread(match_id) => {
                let mut threads = self.read_thread_map().await;
                threads.remove(&match_id)?
            }
        };

        match serde_json::from_value(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%slot, error = %e, "cached value has unexpected shape, ignoring");
                None
            }
        }
    }

    /// Start a stale-while-revalidate load of `slot`.
    pub async fn load<'a, T, Fut>(&'a self, slot: CacheSlot, fetch: Fut) -> Revalidation<'a, T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'a,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'a,
    {
        let cached = self.read::<T>(slot).await;
        trace!(%slot, hit = cached.is_some(), "cache lookup");

        let fallback = cached.clone();
        Revalidation {
            cached,
            refresh: Box::pin(self.revalidate(slot, fallback, fetch)),
        }
    }

    /// Refresh `slot` without an optimistic read; falls back like [`load`](Self::load).
    pub async fn refresh<T, Fut>(&self, slot: CacheSlot, fetch: Fut) -> Result<Resolved<T>, SyncError>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        self.revalidate(slot, None, fetch).await
    }

    /// Commit a write remotely, then cache what the server confirmed.
    ///
    /// Nothing is cached when `commit` fails.
    pub async fn write_through<T, Fut>(&self, slot: CacheSlot, commit: Fut) -> Result<T, SyncError>
    where
        T: Serialize,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let confirmed = commit.await?;

        match self.write(slot, &confirmed).await {
            Ok(()) => self.notify(CacheEvent::Updated(slot)),
            Err(e) => warn!(%slot, error = %e, "failed to cache confirmed write"),
        }
        Ok(confirmed)
    }

    /// Empty a resource slot. Failures are logged, not returned.
    pub async fn clear(&self, kind: ResourceKind) {
        let _guard = match kind {
            ResourceKind::Messages => Some(self.threads_lock.lock().await),
            _ => None,
        };

        match self.store.remove(kind.key()).await {
            Ok(()) => self.notify(CacheEvent::Cleared(kind)),
            Err(e) => warn!(%kind, error = %e, "failed to clear cache slot"),
        }
    }

    /// Apply `edit` to the cached threads under the messages lock.
    ///
    /// `edit` sees every readable thread and returns the match ids it changed.
    /// Only those entries are written back; every other entry, unreadable ones
    /// included, is stored exactly as it was. Returns the changed ids.
    pub(crate) async fn edit_threads<F>(&self, edit: F) -> Result<Vec<i64>, SyncError>
    where
        F: FnOnce(&mut BTreeMap<i64, Vec<Message>>) -> Vec<i64>,
    {
        let _guard = self.threads_lock.lock().await;

        let mut raw = self.read_thread_map().await;
        let mut threads: BTreeMap<i64, Vec<Message>> = BTreeMap::new();
        for (match_id, value) in &raw {
            match serde_json::from_value(value.clone()) {
                Ok(thread) => {
                    threads.insert(*match_id, thread);
                }
                Err(e) => debug!(match_id, error = %e, "skipping unreadable cached thread"),
            }
        }

        let touched = edit(&mut threads);
        if touched.is_empty() {
            return Ok(touched);
        }

        for match_id in &touched {
            match threads.remove(match_id) {
                Some(thread) => raw.insert(*match_id, serde_json::to_value(thread)?),
                None => raw.remove(match_id),
            };
        }
        self.store
            .set(keys::MESSAGES, &serde_json::to_string(&raw)?)
            .await?;
        for match_id in &touched {
            self.notify(CacheEvent::Updated(CacheSlot::Thread(*match_id)));
        }
        Ok(touched)
    }

    async fn revalidate<T, Fut>(
        &self,
        slot: CacheSlot,
        fallback: Option<T>,
        fetch: Fut,
    ) -> Result<Resolved<T>, SyncError>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        match fetch.await {
            Ok(fresh) => {
                match self.write(slot, &fresh).await {
                    Ok(()) => debug!(%slot, "cache refreshed"),
                    Err(e) => warn!(%slot, error = %e, "failed to cache fresh value"),
                }
                self.notify(CacheEvent::Refreshed(slot));
                Ok(Resolved::fresh(fresh))
            }
            Err(e) if e.is_recoverable() => {
                let stale = match fallback {
                    Some(value) => Some(value),
                    None => self.read(slot).await,
                };
                match stale {
                    Some(value) => {
                        warn!(%slot, error = %e, "refresh failed, serving cached data");
                        self.notify(CacheEvent::ServedStale(slot));
                        Ok(Resolved::stale(value, &e))
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn write<T: Serialize>(&self, slot: CacheSlot, value: &T) -> Result<(), SyncError> {
        match slot {
            CacheSlot::Resource {
                kind: ResourceKind::Messages,
                ..
            } => {
                return Err(SyncError::Validation(
                    "messages are cached per thread".to_string(),
                ));
            }
            CacheSlot::Resource { kind, user_id } => {
                let owned = Owned { user_id, value };
                self.store
                    .set(kind.key(), &serde_json::to_string(&owned)?)
                    .await?;
            }
            CacheSlot::Thread(match_id) => {
                let value = serde_json::to_value(value)?;
                let _guard = self.threads_lock.lock().await;
                let mut threads = self.read_thread_map().await;
                threads.insert(match_id, value);
                self.store
                    .set(keys::MESSAGES, &serde_json::to_string(&threads)?)
                    .await?;
            }
        }
        Ok(())
    }

    async fn read_raw(&self, kind: ResourceKind) -> Option<Value> {
        let text = match self.store.get(kind.key()).await {
            Ok(text) => text?,
            Err(e) => {
                warn!(%kind, error = %e, "failed to read cache slot");
                return None;
            }
        };

        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%kind, error = %e, "cache slot is not valid JSON, ignoring");
                None
            }
        }
    }

    /// The messages slot as match id to raw thread; empty when absent.
    async fn read_thread_map(&self) -> BTreeMap<i64, Value> {
        let Some(raw) = self.read_raw(ResourceKind::Messages).await else {
            return BTreeMap::new();
        };
        serde_json::from_value(raw).unwrap_or_else(|e| {
            warn!(error = %e, "messages slot has unexpected shape, starting empty");
            BTreeMap::new()
        })
    }

    fn notify(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
