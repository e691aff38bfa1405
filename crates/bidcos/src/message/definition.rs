// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message definitions: how to recognize one kind of frame and what to do with it.

use std::sync::Arc;

use crate::frame::{Address, Frame};

use super::access::{AccessContext, AccessMask};
use super::handler::{Binding, FrameBuilder, MessageHandler};
use super::Direction;

/// Immutable catalog entry.
///
/// A definition matches a frame when the message type is equal and every
/// `(position, value)` subtype predicate holds against the payload.
#[derive(Debug, Clone)]
pub struct MessageDefinition {
    message_type: u8,
    subtypes: Vec<(usize, u8)>,
    control_byte: u8,
    access: AccessMask,
    access_pairing: Option<AccessMask>,
    binding: Binding,
}

impl MessageDefinition {
    /// Inbound definition dispatching to `handler`.
    pub fn incoming<H>(message_type: u8, access: AccessMask, handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        Self {
            message_type,
            subtypes: Vec::new(),
            control_byte: 0,
            access,
            access_pairing: None,
            binding: Binding::Incoming(Arc::new(handler)),
        }
    }

    /// Outbound template resolved by `builder`.
    pub fn outgoing<B>(message_type: u8, control_byte: u8, builder: B) -> Self
    where
        B: FrameBuilder + 'static,
    {
        Self {
            message_type,
            subtypes: Vec::new(),
            control_byte,
            access: AccessMask::NONE,
            access_pairing: None,
            binding: Binding::Outgoing(Arc::new(builder)),
        }
    }

    /// Add a subtype predicate (builder style).
    pub fn with_subtype(mut self, position: usize, value: u8) -> Self {
        self.subtypes.push((position, value));
        self
    }

    /// Use a distinct mask while the device is in pairing mode.
    pub fn with_pairing_access(mut self, access: AccessMask) -> Self {
        self.access_pairing = Some(access);
        self
    }

    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    pub fn subtypes(&self) -> &[(usize, u8)] {
        &self.subtypes
    }

    pub fn subtype_count(&self) -> usize {
        self.subtypes.len()
    }

    pub fn direction(&self) -> Direction {
        match self.binding {
            Binding::Incoming(_) => Direction::In,
            Binding::Outgoing(_) => Direction::Out,
        }
    }

    pub fn control_byte(&self) -> u8 {
        self.control_byte
    }

    pub fn access(&self) -> AccessMask {
        self.access
    }

    pub fn access_pairing(&self) -> AccessMask {
        self.access_pairing.unwrap_or(self.access)
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Type and all subtype predicates match `frame`.
    pub fn matches(&self, frame: &Frame) -> bool {
        frame.message_type == self.message_type
            && self
                .subtypes
                .iter()
                .all(|&(position, value)| frame.payload_byte(position) == Some(value))
    }

    /// Same classification key: type plus an identical set of subtype predicates.
    pub fn same_type(&self, message_type: u8, subtypes: &[(usize, u8)]) -> bool {
        self.message_type == message_type
            && self.subtypes.len() == subtypes.len()
            && subtypes.iter().all(|s| self.subtypes.contains(s))
    }

    /// Mask that applies in the given context.
    pub fn applicable_access(&self, ctx: &AccessContext<'_>) -> AccessMask {
        if ctx.device.in_pairing_mode() {
            self.access_pairing()
        } else {
            self.access
        }
    }

    /// Invoke the inbound handler. Outgoing definitions ignore the call.
    pub fn invoke(&self, frame: &Frame) {
        match &self.binding {
            Binding::Incoming(handler) => handler.handle(frame.message_counter, frame),
            Binding::Outgoing(_) => {
                log::warn!(
                    "[message] invoke on outgoing definition type=0x{:02X} ignored",
                    self.message_type
                );
            }
        }
    }

    /// Resolve an outgoing template for `peer`.
    pub fn build(&self, peer: Address) -> Option<Frame> {
        match &self.binding {
            Binding::Outgoing(builder) => builder.build(peer, self),
            Binding::Incoming(_) => None,
        }
    }
}
