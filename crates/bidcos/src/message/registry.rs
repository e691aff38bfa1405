// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message registry: classification and authorization of frames.
//!
//! Definitions are registered once at setup through [`MessageRegistryBuilder`]
//! and frozen into a [`MessageRegistry`]. Lookup scans in registration order
//! and returns the first definition that matches; that order is the tie-break
//! for overlapping definitions (e.g. a generic type 0x01 entry registered after
//! more specific subtype entries).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::frame::Frame;

use super::access::AccessContext;
use super::counter::MessageCounters;
use super::definition::MessageDefinition;
use super::Direction;

/// Result of [`MessageRegistry::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Matched, authorized and handed to the handler.
    Handled,
    /// No inbound definition matched.
    NoMatch,
    /// Matched but none of the applicable access bits held.
    Unauthorized,
}

/// Collects definitions before any traffic is processed.
#[derive(Debug, Default)]
pub struct MessageRegistryBuilder {
    definitions: Vec<Arc<MessageDefinition>>,
}

impl MessageRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition.
    ///
    /// Fails if a definition with the same direction, type and subtype set is
    /// already registered.
    pub fn register(&mut self, definition: MessageDefinition) -> Result<&mut Self> {
        let duplicate = self.definitions.iter().any(|existing| {
            existing.direction() == definition.direction()
                && existing.same_type(definition.message_type(), definition.subtypes())
        });
        if duplicate {
            return Err(Error::DuplicateDefinition {
                direction: definition.direction(),
                message_type: definition.message_type(),
                subtypes: definition.subtypes().to_vec(),
            });
        }

        log::trace!(
            "[registry] registered {:?} type=0x{:02X} subtypes={:?}",
            definition.direction(),
            definition.message_type(),
            definition.subtypes()
        );
        self.definitions.push(Arc::new(definition));
        Ok(self)
    }

    /// Freeze the catalog.
    pub fn build(self) -> MessageRegistry {
        MessageRegistry {
            definitions: self.definitions,
        }
    }
}

/// Immutable catalog of message definitions.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    definitions: Vec<Arc<MessageDefinition>>,
}

impl MessageRegistry {
    pub fn builder() -> MessageRegistryBuilder {
        MessageRegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// First inbound definition matching `frame`.
    pub fn match_frame(&self, frame: &Frame) -> Option<Arc<MessageDefinition>> {
        self.find(Direction::In, frame)
    }

    /// First definition of `direction` matching `frame`.
    pub fn find(&self, direction: Direction, frame: &Frame) -> Option<Arc<MessageDefinition>> {
        self.definitions
            .iter()
            .find(|def| def.direction() == direction && def.matches(frame))
            .cloned()
    }

    /// Definition with exactly this classification key.
    pub fn find_by_type(
        &self,
        direction: Direction,
        message_type: u8,
        subtypes: &[(usize, u8)],
    ) -> Option<Arc<MessageDefinition>> {
        self.definitions
            .iter()
            .find(|def| def.direction() == direction && def.same_type(message_type, subtypes))
            .cloned()
    }

    /// Whether `frame` may be handled by `definition` in `ctx`. Pure.
    pub fn authorize(
        &self,
        frame: &Frame,
        definition: &MessageDefinition,
        ctx: &AccessContext<'_>,
    ) -> bool {
        definition.applicable_access(ctx).permits(frame, ctx)
    }

    /// Match, authorize, record the sender's counter and invoke the handler.
    pub fn dispatch(
        &self,
        frame: &Frame,
        ctx: &AccessContext<'_>,
        counters: &MessageCounters,
    ) -> DispatchOutcome {
        let Some(definition) = self.match_frame(frame) else {
            log::debug!("[registry] no definition for {}", frame);
            return DispatchOutcome::NoMatch;
        };

        if !self.authorize(frame, &definition, ctx) {
            log::debug!(
                "[registry] access denied for {} (mask {:?})",
                frame,
                definition.applicable_access(ctx)
            );
            return DispatchOutcome::Unauthorized;
        }

        counters.record(frame.sender, frame.message_counter);
        definition.invoke(frame);
        DispatchOutcome::Handled
    }
}
