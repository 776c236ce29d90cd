//! In-process coordination store
//!
//! A mutex-guarded JSON tree implementing [`CoordinationStore`]. It is what
//! the standalone CLI and the test-suite run the protocol against.
//!
//! Mutations and notification fan-out happen under the same lock, so every
//! subscription observes changes in the order the store accepted them.
//! Empty objects are pruned after writes and deletes, so a collection whose
//! last child was removed reads back as absent.

use super::{segments, CoordinationStore, StoreEvent, Subscription};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Store operation kinds, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Write,
    Read,
    Subscribe,
    UpdateFields,
    Delete,
    NewKey,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl StoreOp {
    fn name(self) -> &'static str {
        match self {
            StoreOp::Write => "write",
            StoreOp::Read => "read",
            StoreOp::Subscribe => "subscribe",
            StoreOp::UpdateFields => "update_fields",
            StoreOp::Delete => "delete",
            StoreOp::NewKey => "new_key",
        }
    }
}

struct Subscriber {
    id: u64,
    path: Vec<String>,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

/// Every call of `op` after the first `skip` fails.
struct Fault {
    op: StoreOp,
    skip: usize,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    next_subscription_id: u64,
    last_key_millis: i64,
    key_counter: u64,
    faults: Vec<Fault>,
}

/// In-memory [`CoordinationStore`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                root: Value::Object(Map::new()),
                ..Default::default()
            }),
        }
    }

    /// Make `op` fail after `skip` successful calls, until cleared.
    pub fn fail_after(&self, op: StoreOp, skip: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.push(Fault { op, skip });
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.clear();
        }
    }

    /// Deliver an error event to every open subscription.
    pub fn break_subscriptions(&self, message: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.retain(|sub| {
                sub.tx
                    .send(Err(StoreError::Unavailable(message.to_string())))
                    .is_ok()
            });
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .map(|mut inner| {
                inner.subscribers.retain(|sub| !sub.tx.is_closed());
                inner.subscribers.len()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn check_fault(&mut self, op: StoreOp, path: &str) -> Result<(), StoreError> {
        for fault in self.faults.iter_mut().filter(|f| f.op == op) {
            if fault.skip == 0 {
                return Err(StoreError::InjectedFailure {
                    op: op.name(),
                    path: path.to_string(),
                });
            }
            fault.skip -= 1;
        }
        Ok(())
    }

    /// Notify subscribers whose path is an ancestor or descendant of any touched path.
    fn notify(&mut self, touched: &[Vec<String>]) {
        let root = &self.root;
        self.subscribers.retain(|sub| {
            let related = touched
                .iter()
                .any(|t| is_prefix(&sub.path, t) || is_prefix(t, &sub.path));
            if !related {
                return !sub.tx.is_closed();
            }
            sub.tx.send(Ok(get(root, &sub.path).cloned())).is_ok()
        });
    }
}

fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| a == b)
}

fn get<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for seg in path {
        node = node.as_object()?.get(seg)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

fn set(root: &mut Value, path: &[String], value: Value) {
    let mut node = root;
    for seg in path {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(obj) => obj.entry(seg.clone()).or_insert(Value::Null),
            _ => unreachable!("intermediate node is always an object"),
        };
    }
    *node = value;
}

/// Remove the value at `path` and prune empty or null nodes left behind.
fn remove(root: &mut Value, path: &[String]) {
    fn remove_rec(node: &mut Value, path: &[String]) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        let Some(obj) = node.as_object_mut() else {
            return;
        };
        if rest.is_empty() {
            obj.remove(first);
            return;
        }
        if let Some(child) = obj.get_mut(first) {
            remove_rec(child, rest);
            if is_empty(child) {
                obj.remove(first);
            }
        }
    }

    if path.is_empty() {
        *root = Value::Object(Map::new());
    } else {
        remove_rec(root, path);
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

fn current_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.check_fault(StoreOp::Write, path)?;
        let segs = segments(path);
        if is_empty(&value) {
            remove(&mut inner.root, &segs);
        } else {
            set(&mut inner.root, &segs, value);
        }
        inner.notify(&[segs]);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let mut inner = self.lock()?;
        inner.check_fault(StoreOp::Read, path)?;
        Ok(get(&inner.root, &segments(path)).cloned())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let mut inner = self.lock()?;
        inner.check_fault(StoreOp::Subscribe, path)?;
        let segs = segments(path);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(get(&inner.root, &segs).cloned()));
        inner.next_subscription_id += 1;
        let id = inner.next_subscription_id;
        inner.subscribers.push(Subscriber { id, path: segs, tx });
        Ok(Subscription::new(id, path, rx))
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.subscribers.retain(|sub| sub.id != subscription.id());
        Ok(())
    }

    async fn update_fields(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.check_fault(StoreOp::UpdateFields, path)?;
        let base = segments(path);
        let mut touched = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            let mut segs = base.clone();
            segs.extend(segments(&key));
            if is_empty(&value) {
                remove(&mut inner.root, &segs);
            } else {
                set(&mut inner.root, &segs, value);
            }
            touched.push(segs);
        }
        inner.notify(&touched);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.check_fault(StoreOp::Delete, path)?;
        let segs = segments(path);
        if get(&inner.root, &segs).is_none() {
            return Ok(());
        }
        remove(&mut inner.root, &segs);
        inner.notify(&[segs]);
        Ok(())
    }

    async fn new_key(&self, path: &str) -> Result<String, StoreError> {
        let mut inner = self.lock()?;
        inner.check_fault(StoreOp::NewKey, path)?;
        inner.last_key_millis = inner.last_key_millis.max(current_millis());
        inner.key_counter += 1;
        Ok(format!("{:012x}{:08x}", inner.last_key_millis, inner.key_counter))
    }
}
