//! Session and cache synchronization core for the Amora client.
//!
//! This crate keeps an authenticated session, fetches remote resources, and
//! maintains a local cache that stands in for the network when it fails.
//!
//! ## Components
//!
//! - **Session**: login, signup, logout, and credential/identity reads
//! - **Cache**: stale-while-revalidate loads and write-through updates
//! - **Enrichment**: concurrent, per-item fault-tolerant match enrichment
//! - **Messages**: per-match threads with send and mark-read reconciliation
//!
//! Front ends go through [`AmoraClient`] and never touch the store or the
//! HTTP client directly.

pub mod cache;
mod client;
mod config;
pub mod enrich;
mod error;
mod http;
mod messages;
mod resources;
mod session;
pub mod store;
mod types;

pub use cache::{CacheEvent, CacheSlot, Freshness, Resolved, ResourceCache, ResourceKind, Revalidation};
pub use client::AmoraClient;
pub use config::{
    ClientConfig, ClientConfigBuilder, DEFAULT_BASE_URL, PLACEHOLDER_NAME, PLACEHOLDER_PHOTO,
};
pub use enrich::MatchEnricher;
pub use error::{StoreError, SyncError};
pub use http::ApiClient;
pub use messages::{MarkReadReport, MessageThreads};
pub use resources::Resources;
pub use session::SessionManager;
pub use store::{FileStore, KeyValueStore, MemoryStore, keys};
pub use types::*;
