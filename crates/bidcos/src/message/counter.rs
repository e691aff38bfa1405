// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer message counter table.

use dashmap::DashMap;

use crate::frame::Address;

/// Last message counter seen from (or used towards) each peer.
///
/// Lock-free per entry; callers never hold a queue lock while touching it.
#[derive(Debug, Default)]
pub struct MessageCounters {
    counters: DashMap<Address, u8>,
}

impl MessageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the counter of a frame received from `peer`.
    pub fn record(&self, peer: Address, counter: u8) {
        self.counters.insert(peer, counter);
    }

    pub fn get(&self, peer: Address) -> Option<u8> {
        self.counters.get(&peer).map(|c| *c)
    }

    /// Advance and return the counter for the next frame sent to `peer`.
    pub fn next(&self, peer: Address) -> u8 {
        let mut entry = self.counters.entry(peer).or_insert(0);
        *entry = entry.wrapping_add(1);
        *entry
    }

    pub fn remove(&self, peer: Address) -> Option<u8> {
        self.counters.remove(&peer).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
