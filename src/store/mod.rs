//! Coordination store contract
//!
//! Coordinator and workers never call each other directly. Every piece of
//! cross-participant state goes through a shared, tree-structured store that
//! supports one-shot reads, last-write-wins writes, atomic multi-field
//! patches, subtree deletion and change subscriptions.
//!
//! # Paths
//!
//! Values are `serde_json::Value` trees addressed by `/`-separated paths
//! (`jobs/{jobId}/job/workers`). Empty segments are ignored, so `"jobs/"`
//! and `"jobs"` name the same node.
//!
//! # Subscriptions
//!
//! [`CoordinationStore::subscribe`] returns a [`Subscription`], a single
//! cancellable event stream. Each event carries the full current value at the
//! subscribed path (`None` when the path is absent). The current value is
//! delivered immediately on subscribe, and again whenever the path, one of
//! its descendants or one of its ancestors changes. Dropping the
//! subscription releases the listener.

pub mod memory;

pub use memory::{MemoryStore, StoreOp};

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// One notification delivered on a subscription.
pub type StoreEvent = std::result::Result<Option<Value>, StoreError>;

/// Operations the protocol needs from the shared store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Upsert `value` at `path`, replacing whatever was there.
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// One-shot read of the value or subtree at `path`.
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Open a change stream on `path`.
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;

    /// Close a change stream. Unknown or already-closed subscriptions are ignored.
    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), StoreError>;

    /// Atomically patch the children of `path` without touching siblings.
    ///
    /// Keys may themselves be relative paths (`"result/sum"`).
    async fn update_fields(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Remove the subtree at `path`. Removing an absent path succeeds.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Allocate a globally unique, lexically sortable key under `path`.
    async fn new_key(&self, path: &str) -> Result<String, StoreError>;
}

/// Cancellable stream of change notifications for one path.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    path: String,
    events: mpsc::UnboundedReceiver<StoreEvent>,
}

impl Subscription {
    pub fn new(id: u64, path: impl Into<String>, events: mpsc::UnboundedReceiver<StoreEvent>) -> Self {
        Self {
            id,
            path: path.into(),
            events,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next notification.
    ///
    /// Returns `None` once the store has dropped the listener.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }
}

/// Join path segments with `/`.
pub fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
