// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::collections::VecDeque;

use super::Queue;

/// Follow-on queues run, one at a time and in order, after a queue drains.
#[derive(Debug, Default, Clone)]
pub struct PendingQueues {
    queues: VecDeque<Queue>,
}

impl PendingQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, queue: Queue) {
        self.queues.push_back(queue);
    }

    pub fn pop(&mut self) -> Option<Queue> {
        self.queues.pop_front()
    }

    pub fn front(&self) -> Option<&Queue> {
        self.queues.front()
    }

    /// Put `other` ahead of the queues already waiting.
    pub(crate) fn prepend(&mut self, mut other: PendingQueues) {
        other.queues.append(&mut self.queues);
        self.queues = other.queues;
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Queue> {
        self.queues.iter()
    }
}

impl FromIterator<Queue> for PendingQueues {
    fn from_iter<I: IntoIterator<Item = Queue>>(iter: I) -> Self {
        Self {
            queues: iter.into_iter().collect(),
        }
    }
}
