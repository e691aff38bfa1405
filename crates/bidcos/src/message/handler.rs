// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handler bindings attached to message definitions.

use std::fmt;
use std::sync::Arc;

use crate::frame::{Address, Frame};

use super::MessageDefinition;

/// Invoked with the frame's message counter once an inbound frame is matched
/// and authorized. Responses are produced by pushing onto the peer's queue.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message_counter: u8, frame: &Frame);
}

impl<F> MessageHandler for F
where
    F: Fn(u8, &Frame) + Send + Sync,
{
    fn handle(&self, message_counter: u8, frame: &Frame) {
        self(message_counter, frame)
    }
}

/// Resolves an outgoing message template into a frame for `peer` when the
/// entry reaches the front of a queue.
pub trait FrameBuilder: Send + Sync {
    fn build(&self, peer: Address, definition: &MessageDefinition) -> Option<Frame>;
}

impl<F> FrameBuilder for F
where
    F: Fn(Address, &MessageDefinition) -> Option<Frame> + Send + Sync,
{
    fn build(&self, peer: Address, definition: &MessageDefinition) -> Option<Frame> {
        self(peer, definition)
    }
}

/// What a definition is bound to. The direction follows from the variant.
#[derive(Clone)]
pub enum Binding {
    Incoming(Arc<dyn MessageHandler>),
    Outgoing(Arc<dyn FrameBuilder>),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Incoming(_) => write!(f, "Binding::Incoming"),
            Binding::Outgoing(_) => write!(f, "Binding::Outgoing"),
        }
    }
}
