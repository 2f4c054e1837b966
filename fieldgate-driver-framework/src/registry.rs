//! Monitored-item registry: native handles to the topics that created them.

use std::collections::{HashMap, HashSet};

use fieldgate_common::Topic;
use parking_lot::Mutex;

use crate::client::ItemHandle;

#[derive(Debug, Default)]
struct Inner {
    by_handle: HashMap<ItemHandle, Topic>,
    by_topic: HashMap<Topic, ItemHandle>,
    /// Topics accepted while no subscription could be created.
    pending: HashSet<Topic>,
}

/// In-memory bookkeeping of live subscriptions. No I/O.
///
/// A topic maps to at most one handle. Adding a topic that is already
/// registered replaces the old entry and hands the old handle back so the
/// caller can release it.
#[derive(Debug, Default)]
pub struct MonitoredItemRegistry {
    inner: Mutex<Inner>,
}

impl MonitoredItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live subscription. Returns the handle it replaced, if any.
    pub fn add(&self, handle: ItemHandle, topic: Topic) -> Option<ItemHandle> {
        let mut inner = self.inner.lock();
        inner.pending.remove(&topic);
        let replaced = inner.by_topic.insert(topic.clone(), handle);
        if let Some(old) = replaced {
            inner.by_handle.remove(&old);
        }
        inner.by_handle.insert(handle, topic);
        replaced.filter(|old| *old != handle)
    }

    /// Remember a topic to subscribe once the connection is back.
    pub fn add_pending(&self, topic: Topic) {
        let mut inner = self.inner.lock();
        if !inner.by_topic.contains_key(&topic) {
            inner.pending.insert(topic);
        }
    }

    /// Remove entries by handle. Returns how many were registered.
    pub fn remove_all(&self, handles: &[ItemHandle]) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for handle in handles {
            if let Some(topic) = inner.by_handle.remove(handle) {
                inner.by_topic.remove(&topic);
                removed += 1;
            }
        }
        removed
    }

    /// Drop pending topics matching `topic`. Returns how many were dropped.
    pub fn remove_pending(&self, topic: &Topic) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner
            .pending
            .retain(|pending| !(pending == topic || derived_from(pending, topic)));
        before - inner.pending.len()
    }

    pub fn find_by_topic(&self, topic: &Topic) -> Option<ItemHandle> {
        self.inner.lock().by_topic.get(topic).copied()
    }

    pub fn find_by_handle(&self, handle: ItemHandle) -> Option<Topic> {
        self.inner.lock().by_handle.get(&handle).cloned()
    }

    /// Handles registered for a caller-visible topic.
    ///
    /// A path topic matches every concrete topic resolved from it.
    pub fn handles_for(&self, topic: &Topic) -> Vec<ItemHandle> {
        let inner = self.inner.lock();
        if topic.is_path() {
            let mut handles: Vec<ItemHandle> = inner
                .by_handle
                .iter()
                .filter(|(_, registered)| derived_from(registered, topic))
                .map(|(handle, _)| *handle)
                .collect();
            handles.sort();
            handles
        } else {
            inner.by_topic.get(topic).copied().into_iter().collect()
        }
    }

    /// Registered and pending topics.
    pub fn topics(&self) -> Vec<Topic> {
        let inner = self.inner.lock();
        inner
            .by_topic
            .keys()
            .chain(inner.pending.iter())
            .cloned()
            .collect()
    }

    /// Clear the registry, returning every registered and pending topic.
    ///
    /// Used on reconnection: the old handles died with the old client.
    pub fn take_all(&self) -> Vec<Topic> {
        let mut inner = self.inner.lock();
        inner.by_handle.clear();
        let pending = std::mem::take(&mut inner.pending);
        inner
            .by_topic
            .drain()
            .map(|(topic, _)| topic)
            .chain(pending)
            .collect()
    }

    /// Drop everything. Returns the number of live entries removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.by_handle.len();
        inner.by_handle.clear();
        inner.by_topic.clear();
        inner.pending.clear();
        count
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner.lock().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

fn derived_from(concrete: &Topic, path: &Topic) -> bool {
    path.is_path()
        && concrete.system_type == path.system_type
        && concrete.topic_name == path.topic_name
        && concrete.source_path.as_deref() == Some(path.address.as_str())
}
