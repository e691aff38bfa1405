// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport capability consumed by the queue engine.
//!
//! The serial stick itself lives outside this crate. A transport may be
//! called concurrently from the receive path and from resend timers, so
//! implementations serialize physical writes themselves.

use std::sync::Arc;

use thiserror::Error;

use crate::frame::Frame;

/// Failure on the radio link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Device not open")]
    NotOpen,

    #[error("Frame rejected: {0}")]
    Rejected(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Blocking frame sink.
pub trait Transport: Send + Sync {
    /// Send one frame. Blocks until the frame is handed to the radio.
    fn send(&self, frame: &Frame) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        (**self).send(frame)
    }
}
