// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the BidCoS core.
//!
//! Nothing in here is fatal at runtime: the queue engine turns transport
//! failures into retries and the registry turns classification failures into
//! drops. Only registration errors surface to the caller during setup.

use thiserror::Error;

use crate::config::ConfigError;
use crate::message::Direction;
use crate::transport::TransportError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Link
    // ========================================================================
    /// Send failed on the radio link.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame too short, length byte inconsistent or not valid hex.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    // ========================================================================
    // Setup
    // ========================================================================
    /// A definition with the same direction, type and subtypes already exists.
    #[error("Duplicate message definition: {direction:?} type 0x{message_type:02X} subtypes {subtypes:?}")]
    DuplicateDefinition {
        direction: Direction,
        message_type: u8,
        subtypes: Vec<(usize, u8)>,
    },

    /// Engine configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // ========================================================================
    // Persistence
    // ========================================================================
    /// Serialized queue could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A serialized message entry refers to a definition the registry does not know.
    #[error("Unknown message: {direction:?} type 0x{message_type:02X} subtypes {subtypes:?}")]
    UnknownMessage {
        direction: Direction,
        message_type: u8,
        subtypes: Vec<(usize, u8)>,
    },

    /// Queue store backend failure.
    #[error("Store error: {0}")]
    Store(String),
}
