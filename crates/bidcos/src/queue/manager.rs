// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Active queues of one device, one per peer, plus the idle reaper.
//!
//! A peer that stops answering mid-exchange would otherwise pin its queue
//! forever. The reaper clears queues whose last activity is older than
//! `idle_timeout`; `keep_alive`/`long_keep_alive` push that moment back.

use std::sync::{Arc, Weak};

use crossbeam::channel::RecvTimeoutError;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::frame::Address;
use crate::message::MessageRegistry;
use crate::persistence::QueueStore;

use super::timer::TimerHandle;
use super::{Queue, QueueContext, QueueType};

struct ManagerInner {
    context: Arc<QueueContext>,
    queues: DashMap<Address, Queue>,
}

impl ManagerInner {
    fn reap_idle(&self) -> usize {
        let timeout = self.context.config().idle_timeout();
        let idle: Vec<Address> = self
            .queues
            .iter()
            .filter(|entry| entry.value().is_idle(timeout))
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for peer in idle {
            // Re-check: the queue may have been replaced or kept alive since.
            if let Some((_, queue)) = self.queues.remove_if(&peer, |_, q| q.is_idle(timeout)) {
                log::debug!("[queue-manager] reaping idle queue #{} of {}", queue.id(), peer);
                queue.clear();
                reaped += 1;
            }
        }
        reaped
    }
}

/// Map of peer to active queue.
pub struct QueueManager {
    inner: Arc<ManagerInner>,
    reaper: Mutex<Option<TimerHandle>>,
}

impl QueueManager {
    /// Create the manager and start its reaper thread.
    pub fn new(context: Arc<QueueContext>) -> Self {
        let interval = context.config().reaper_interval();
        let inner = Arc::new(ManagerInner {
            context,
            queues: DashMap::new(),
        });

        let weak: Weak<ManagerInner> = Arc::downgrade(&inner);
        let reaper = TimerHandle::spawn("bidcos-queue-reaper", move |stop_rx| {
            log::debug!("[queue-manager] reaper started with interval {:?}", interval);
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.reap_idle();
            }
            log::debug!("[queue-manager] reaper stopped");
        });

        Self {
            inner,
            reaper: Mutex::new(reaper),
        }
    }

    pub fn context(&self) -> &Arc<QueueContext> {
        &self.inner.context
    }

    /// Start a new exchange with `peer`.
    ///
    /// A queue already active for the peer is cleared and replaced.
    pub fn create_queue(&self, peer: Address, queue_type: QueueType) -> Queue {
        let queue = Queue::new(Arc::clone(&self.inner.context), queue_type, peer);
        let previous = self.inner.queues.insert(peer, queue.clone());
        if let Some(previous) = previous {
            log::debug!(
                "[queue-manager] queue #{} of {} replaced by #{}",
                previous.id(),
                peer,
                queue.id()
            );
            previous.clear();
        }
        queue
    }

    pub fn get(&self, peer: Address) -> Option<Queue> {
        self.inner.queues.get(&peer).map(|entry| entry.value().clone())
    }

    /// Clear and forget the queue of `peer`.
    pub fn remove(&self, peer: Address) -> bool {
        match self.inner.queues.remove(&peer) {
            Some((_, queue)) => {
                queue.clear();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queues.is_empty()
    }

    pub fn clear_all(&self) {
        let queues = self.snapshot();
        self.inner.queues.clear();
        for queue in queues {
            queue.clear();
        }
    }

    /// Reap idle queues now. Returns how many were removed.
    pub fn reap_idle(&self) -> usize {
        self.inner.reap_idle()
    }

    /// Persist every active queue and drop stored rows of this device that
    /// no longer have one. Queues that cannot be encoded are skipped with a
    /// warning; store errors abort.
    pub fn save_all(&self, store: &dyn QueueStore) -> Result<usize> {
        let prefix = self.key_prefix();
        let queues = self.snapshot();

        let mut live = Vec::with_capacity(queues.len());
        for queue in &queues {
            let serialized = match queue.to_serialized() {
                Ok(serialized) => serialized,
                Err(e) => {
                    log::warn!("[queue-manager] not saving queue #{} to {}: {}", queue.id(), queue.peer(), e);
                    continue;
                }
            };
            let key = self.key(queue.peer());
            store.save(&key, &serialized)?;
            live.push(key);
        }
        for key in store.keys()? {
            if key.starts_with(&prefix) && !live.contains(&key) {
                store.remove(&key)?;
            }
        }

        log::debug!("[queue-manager] saved {} queues", live.len());
        Ok(live.len())
    }

    /// Restore this device's queues from `store`.
    ///
    /// Restored queues are idle until [`Queue::resume`] is called. A row that
    /// cannot be restored is skipped with a warning and does not hold back
    /// the others.
    pub fn load_all(&self, store: &dyn QueueStore, registry: &MessageRegistry) -> Result<usize> {
        let prefix = self.key_prefix();
        let mut loaded = 0;
        for key in store.keys()? {
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(serialized) = store.load(&key)? else {
                continue;
            };
            let queue = match Queue::from_serialized(
                Some(Arc::clone(&self.inner.context)),
                registry,
                &serialized,
            ) {
                Ok(queue) => queue,
                Err(e) => {
                    log::warn!("[queue-manager] cannot restore {}: {}", key, e);
                    continue;
                }
            };
            if let Some(previous) = self.inner.queues.insert(queue.peer(), queue) {
                previous.clear();
            }
            loaded += 1;
        }

        log::debug!("[queue-manager] loaded {} queues", loaded);
        Ok(loaded)
    }

    fn snapshot(&self) -> Vec<Queue> {
        self.inner
            .queues
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn key_prefix(&self) -> String {
        format!("{}/", self.inner.context.device())
    }

    fn key(&self, peer: Address) -> String {
        format!("{}{}", self.key_prefix(), peer)
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        if let Some(mut reaper) = self.reaper.lock().take() {
            reaper.stop();
        }
    }
}
