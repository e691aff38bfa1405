// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive path: route an inbound frame to the queue waiting for it or to
//! the registry.
//!
//! A queue usually holds a sent frame followed by the answer it expects:
//!
//! ```text
//! [ Packet(config start, BIDI) | Message(IN ack) | Packet(config write) | ... ]
//! ```
//!
//! When the answer arrives the sent frame is acknowledged (popped, which
//! stops its resend timer) and the expectation's handler runs. The handler
//! pops the expectation itself once it is satisfied.

use std::sync::Arc;

use crate::frame::Frame;
use crate::message::{
    AccessContext, DeviceContext, DispatchOutcome, MessageCounters, MessageDefinition,
    MessageRegistry,
};
use crate::queue::{Queue, QueueManager};

/// Dispatch one inbound frame.
///
/// Authorization is checked before the sender's queue is touched, so a
/// rejected frame leaves queues and counters as they were.
pub fn dispatch_frame(
    registry: &MessageRegistry,
    device: &dyn DeviceContext,
    queues: &QueueManager,
    counters: &MessageCounters,
    frame: &Frame,
) -> DispatchOutcome {
    let queue = queues.get(frame.sender);
    let ctx = AccessContext::new(device).with_queue_type(queue.as_ref().map(Queue::queue_type));

    if let Some(queue) = &queue {
        if let Some((definition, acknowledges_front)) = expected_message(queue, frame) {
            if !registry.authorize(frame, &definition, &ctx) {
                log::debug!(
                    "[dispatch] access denied for {} expected by queue #{}",
                    frame,
                    queue.id()
                );
                return DispatchOutcome::Unauthorized;
            }

            if acknowledges_front {
                queue.pop();
            }
            counters.record(frame.sender, frame.message_counter);
            definition.invoke(frame);
            return DispatchOutcome::Handled;
        }
    }

    registry.dispatch(frame, &ctx, counters)
}

/// Expectation of `queue` that `frame` answers, and whether the front entry
/// (a sent frame) has to be popped to reach it.
fn expected_message(queue: &Queue, frame: &Frame) -> Option<(Arc<MessageDefinition>, bool)> {
    let front = queue.front()?;
    let (entry, acknowledges_front) = if front.is_expectation() {
        (front, false)
    } else {
        (queue.get(1)?, true)
    };

    if !entry.is_expectation() {
        return None;
    }
    let definition = entry.definition()?;
    definition
        .matches(frame)
        .then(|| (Arc::clone(definition), acknowledges_front))
}
