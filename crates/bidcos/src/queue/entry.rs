// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::sync::Arc;

use crate::frame::{Address, Frame};
use crate::message::{Direction, MessageDefinition};

/// One protocol step in a queue.
#[derive(Debug, Clone)]
pub enum QueueEntry {
    /// A message template. Outgoing templates are resolved into a frame when
    /// they reach the front (unless `packet` is already set); inbound ones
    /// are expectations that the dispatch path pops once the peer answers.
    Message {
        definition: Arc<MessageDefinition>,
        packet: Option<Frame>,
    },
    /// A ready-to-send frame.
    Packet(Frame),
}

impl QueueEntry {
    pub fn message(definition: Arc<MessageDefinition>) -> Self {
        QueueEntry::Message {
            definition,
            packet: None,
        }
    }

    pub fn packet(frame: Frame) -> Self {
        QueueEntry::Packet(frame)
    }

    pub fn definition(&self) -> Option<&Arc<MessageDefinition>> {
        match self {
            QueueEntry::Message { definition, .. } => Some(definition),
            QueueEntry::Packet(_) => None,
        }
    }

    /// The frame carried by this entry, if already resolved.
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            QueueEntry::Message { packet, .. } => packet.as_ref(),
            QueueEntry::Packet(frame) => Some(frame),
        }
    }

    /// Inbound message the queue is waiting for.
    pub fn is_expectation(&self) -> bool {
        matches!(
            self,
            QueueEntry::Message { definition, .. } if definition.direction() == Direction::In
        )
    }

    /// Frame to transmit when this entry becomes the front, if any.
    pub(crate) fn resolve(&self, peer: Address) -> Option<Frame> {
        match self {
            QueueEntry::Packet(frame) => Some(frame.clone()),
            QueueEntry::Message { definition, .. } if definition.direction() == Direction::In => None,
            QueueEntry::Message {
                packet: Some(frame),
                ..
            } => Some(frame.clone()),
            QueueEntry::Message {
                definition,
                packet: None,
            } => {
                let frame = definition.build(peer);
                if frame.is_none() {
                    log::warn!(
                        "[queue] builder for type 0x{:02X} produced no frame for {}",
                        definition.message_type(),
                        peer
                    );
                }
                frame
            }
        }
    }
}
