// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message catalog: definitions, access masks, handler bindings and the
//! registry that classifies and authorizes inbound frames.

mod access;
mod counter;
mod definition;
mod handler;
mod registry;

use serde::{Deserialize, Serialize};

pub use access::{AccessContext, AccessMask, DeviceContext};
pub use counter::MessageCounters;
pub use definition::MessageDefinition;
pub use handler::{Binding, FrameBuilder, MessageHandler};
pub use registry::{DispatchOutcome, MessageRegistry, MessageRegistryBuilder};

#[cfg(test)]
pub(crate) use access::tests::TestDevice;

/// Direction of a message definition relative to this controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from a peer.
    In,
    /// Sent to a peer.
    Out,
}
