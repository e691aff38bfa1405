// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistent form of a queue.
//!
//! Packets are stored as hex lines. Message entries store their
//! classification key and are looked up in the registry again on restore,
//! since handlers and builders cannot be persisted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::{Address, Frame};
use crate::message::{Direction, MessageRegistry};

use super::engine::Snapshot;
use super::{Queue, QueueContext, QueueEntry, QueueType};

/// One persisted queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SerializedEntry {
    Message {
        direction: Direction,
        message_type: u8,
        #[serde(default)]
        subtypes: Vec<(usize, u8)>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        packet: Option<String>,
    },
    Packet {
        packet: String,
    },
}

impl SerializedEntry {
    fn from_entry(entry: &QueueEntry) -> Result<Self> {
        Ok(match entry {
            QueueEntry::Message { definition, packet } => SerializedEntry::Message {
                direction: definition.direction(),
                message_type: definition.message_type(),
                subtypes: definition.subtypes().to_vec(),
                packet: packet.as_ref().map(Frame::to_hex).transpose()?,
            },
            QueueEntry::Packet(frame) => SerializedEntry::Packet {
                packet: frame.to_hex()?,
            },
        })
    }

    fn to_entry(&self, registry: &MessageRegistry) -> Result<QueueEntry> {
        match self {
            SerializedEntry::Message {
                direction,
                message_type,
                subtypes,
                packet,
            } => {
                let definition = registry
                    .find_by_type(*direction, *message_type, subtypes)
                    .ok_or_else(|| Error::UnknownMessage {
                        direction: *direction,
                        message_type: *message_type,
                        subtypes: subtypes.clone(),
                    })?;
                let packet = packet.as_deref().map(Frame::from_hex).transpose()?;
                Ok(QueueEntry::Message { definition, packet })
            }
            SerializedEntry::Packet { packet } => Ok(QueueEntry::Packet(Frame::from_hex(packet)?)),
        }
    }
}

/// Persisted queue, keyed by device and peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedQueue {
    pub id: u32,
    pub device: Option<u32>,
    pub peer: Address,
    pub queue_type: QueueType,
    /// Absent for chain members that take the budget of their type's profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    pub entries: Vec<SerializedEntry>,
    #[serde(default)]
    pub pending: Vec<SerializedQueue>,
}

impl SerializedQueue {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Queue {
    /// Snapshot of type, retry budget, entries and pending chain.
    ///
    /// Fails if a packet cannot be encoded, so nothing is persisted that
    /// could not be restored.
    pub fn to_serialized(&self) -> Result<SerializedQueue> {
        let snapshot = self.snapshot();
        Ok(SerializedQueue {
            id: self.id(),
            device: self.device(),
            peer: self.peer(),
            queue_type: snapshot.queue_type,
            retries: snapshot.retries,
            entries: snapshot
                .entries
                .iter()
                .map(SerializedEntry::from_entry)
                .collect::<Result<_>>()?,
            pending: snapshot
                .pending
                .iter()
                .map(Queue::to_serialized)
                .collect::<Result<_>>()?,
        })
    }

    /// JSON form of [`Queue::to_serialized`].
    pub fn serialize(&self) -> Result<String> {
        self.to_serialized()?.to_json()
    }

    /// Rebuild a queue. Nothing is sent until [`Queue::resume`] is called.
    ///
    /// Pending chain members come back detached.
    pub fn from_serialized(
        context: Option<Arc<QueueContext>>,
        registry: &MessageRegistry,
        serialized: &SerializedQueue,
    ) -> Result<Self> {
        if let (Some(context), Some(device)) = (&context, serialized.device) {
            if context.device() != device {
                log::warn!(
                    "[queue] restoring queue #{} of device {} into device {}",
                    serialized.id,
                    device,
                    context.device()
                );
            }
        }

        let entries = serialized
            .entries
            .iter()
            .map(|entry| entry.to_entry(registry))
            .collect::<Result<Vec<_>>>()?;
        let pending = serialized
            .pending
            .iter()
            .map(|member| Queue::from_serialized(None, registry, member))
            .collect::<Result<Vec<_>>>()?;

        Ok(Queue::restore(
            context,
            serialized.id,
            serialized.peer,
            Snapshot {
                queue_type: serialized.queue_type,
                retries: serialized.retries,
                entries,
                pending,
            },
        ))
    }

    /// Parse JSON and rebuild, see [`Queue::from_serialized`].
    pub fn deserialize(
        context: Option<Arc<QueueContext>>,
        registry: &MessageRegistry,
        json: &str,
    ) -> Result<Self> {
        Self::from_serialized(context, registry, &SerializedQueue::from_json(json)?)
    }
}
