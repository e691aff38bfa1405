// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer delivery engine.
//!
//! A [`Queue`] is an ordered sequence of protocol steps for one peer. The
//! front entry is transmitted, a resend timer retries it until the peer
//! acknowledges (the dispatch path then pops it) or the retry budget runs
//! out. Multi-step exchanges are chained as [`PendingQueues`] which are
//! swapped in when the active sequence drains.
//!
//! # Threads
//!
//! Each queue owns at most one `bidcos-resend` and one `bidcos-pop-wait`
//! thread. Structural changes happen under the queue mutex; transport sends,
//! completion callbacks and timer joins happen outside it.

mod engine;
mod entry;
mod manager;
mod pending;
mod serialize;
mod timer;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::transport::Transport;

pub use engine::{Queue, QueueCallback, DEFAULT_RETRIES};
pub use entry::QueueEntry;
pub use manager::QueueManager;
pub use pending::PendingQueues;
pub use serialize::{SerializedEntry, SerializedQueue};

/// Kind of exchange a queue is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    #[default]
    Empty,
    Default,
    Config,
    Pairing,
    PairingCentral,
    Unpairing,
    Peer,
}

/// Opaque context handed to the completion callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParameter {
    pub integers: Vec<i64>,
    pub strings: Vec<String>,
    /// Set when the queue was abandoned after exhausting its retries.
    #[serde(default)]
    pub failed: bool,
}

impl CallbackParameter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_integer(mut self, value: i64) -> Self {
        self.integers.push(value);
        self
    }

    pub fn with_string(mut self, value: impl Into<String>) -> Self {
        self.strings.push(value.into());
        self
    }
}

/// Everything the queues of one device share.
pub struct QueueContext {
    device: u32,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    next_id: AtomicU32,
}

impl QueueContext {
    pub fn new(device: u32, transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            device,
            transport,
            config,
            next_id: AtomicU32::new(1),
        }
    }

    /// Id of the owning device (non-owning handle).
    pub fn device(&self) -> u32 {
        self.device
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn next_queue_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Make sure ids handed out later do not collide with a restored one.
    pub(crate) fn reserve_queue_id(&self, id: u32) {
        self.next_id.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }
}

impl fmt::Debug for QueueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueContext")
            .field("device", &self.device)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
