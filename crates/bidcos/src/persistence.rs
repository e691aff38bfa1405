// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queue store abstraction
//!
//! The storage schema belongs to the embedding application; this crate only
//! needs somewhere to put [`SerializedQueue`]s across restarts.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::Result;
use crate::queue::SerializedQueue;

/// Key-value store for persisted queues.
pub trait QueueStore: Send + Sync {
    /// Save (or overwrite) a queue under `key`.
    fn save(&self, key: &str, queue: &SerializedQueue) -> Result<()>;

    /// Load the queue stored under `key`.
    fn load(&self, key: &str) -> Result<Option<SerializedQueue>>;

    /// Remove `key`. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// All stored keys, sorted.
    fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory store, keeps the JSON text like a database row would.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    rows: Mutex<BTreeMap<String, String>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl QueueStore for MemoryQueueStore {
    fn save(&self, key: &str, queue: &SerializedQueue) -> Result<()> {
        let json = queue.to_json()?;
        self.rows.lock().insert(key.to_string(), json);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<SerializedQueue>> {
        let row = self.rows.lock().get(key).cloned();
        row.map(|json| SerializedQueue::from_json(&json)).transpose()
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.rows.lock().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.rows.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Address;
    use crate::queue::QueueType;

    fn queue(id: u32) -> SerializedQueue {
        SerializedQueue {
            id,
            device: Some(1),
            peer: Address::new(0x200 + id),
            queue_type: QueueType::Config,
            retries: Some(4),
            entries: vec![],
            pending: vec![],
        }
    }

    #[test]
    fn test_save_load_remove() {
        let store = MemoryQueueStore::new();
        store.save("1/000201", &queue(1)).unwrap();
        store.save("1/000202", &queue(2)).unwrap();

        assert_eq!(store.load("1/000201").unwrap(), Some(queue(1)));
        assert_eq!(store.keys().unwrap(), vec!["1/000201", "1/000202"]);

        assert!(store.remove("1/000201").unwrap());
        assert!(!store.remove("1/000201").unwrap());
        assert_eq!(store.load("1/000201").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_save_overwrites() {
        let store = MemoryQueueStore::new();
        let mut q = queue(1);
        store.save("k", &q).unwrap();
        q.retries = 9;
        store.save("k", &q).unwrap();
        assert_eq!(store.load("k").unwrap().map(|q| q.retries), Some(9));
    }
}
