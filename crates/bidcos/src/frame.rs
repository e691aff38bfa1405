// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! BidCoS radio frame.
//!
//! ```text
//! +-----+---------+---------+------+-------------+-------------+---------+
//! | len | counter | control | type | sender[3]   | dest[3]     | payload |
//! +-----+---------+---------+------+-------------+-------------+---------+
//! ```
//!
//! `len` counts every byte after itself. The serial stick exchanges frames as
//! upper-case hex lines, so both a binary and a hex codec are provided.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Size of the fixed header including the length byte.
pub const HEADER_LEN: usize = 10;

/// Largest frame the radio accepts (length byte included).
pub const MAX_FRAME_LEN: usize = 64;

/// Largest payload that still fits in [`MAX_FRAME_LEN`].
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Control byte: wake-up preamble.
pub const CONTROL_WAKE_UP: u8 = 0x01;
/// Control byte: receiver should stay awake for a follow-up.
pub const CONTROL_WAKE_ME_UP: u8 = 0x02;
/// Control byte: burst transmission (long preamble for sleeping peers).
pub const CONTROL_BURST: u8 = 0x10;
/// Control byte: bidirectional, an acknowledgment is expected.
pub const CONTROL_BIDI: u8 = 0x20;

/// 24-bit radio address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u32);

impl Address {
    /// Broadcast destination.
    pub const BROADCAST: Address = Address(0);

    /// Create an address, masking to 24 bits.
    pub const fn new(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    /// Raw value.
    pub const fn value(self) -> u32 {
        self.0
    }

    fn to_bytes(self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self::new((u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2]))
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

/// A decoded BidCoS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_counter: u8,
    pub control_byte: u8,
    pub message_type: u8,
    pub sender: Address,
    pub destination: Address,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(
        message_counter: u8,
        control_byte: u8,
        message_type: u8,
        sender: Address,
        destination: Address,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_counter,
            control_byte,
            message_type,
            sender,
            destination,
            payload,
        }
    }

    /// Decode from raw bytes (length byte first).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::MalformedFrame(format!(
                "frame too short: {} bytes (minimum {})",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if bytes.len() > MAX_FRAME_LEN {
            return Err(too_long(bytes.len()));
        }

        let declared = bytes[0] as usize;
        if declared + 1 != bytes.len() {
            return Err(Error::MalformedFrame(format!(
                "length byte {} does not match {} trailing bytes",
                declared,
                bytes.len() - 1
            )));
        }

        Ok(Self {
            message_counter: bytes[1],
            control_byte: bytes[2],
            message_type: bytes[3],
            sender: Address::from_bytes(&bytes[4..7]),
            destination: Address::from_bytes(&bytes[7..10]),
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }

    /// Encoded size, length byte included.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode to raw bytes (length byte first).
    ///
    /// Fails for payloads over [`MAX_PAYLOAD_LEN`], which [`Frame::from_bytes`]
    /// would reject.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let len = self.encoded_len();
        if len > MAX_FRAME_LEN {
            return Err(too_long(len));
        }
        let mut out = Vec::with_capacity(len);
        out.push((len - 1) as u8);
        out.push(self.message_counter);
        out.push(self.control_byte);
        out.push(self.message_type);
        out.extend_from_slice(&self.sender.to_bytes());
        out.extend_from_slice(&self.destination.to_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decode from a hex line as produced by the serial stick.
    pub fn from_hex(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.len() % 2 != 0 {
            return Err(Error::MalformedFrame(format!(
                "odd number of hex digits: {}",
                line.len()
            )));
        }

        let mut bytes = Vec::with_capacity(line.len() / 2);
        for i in (0..line.len()).step_by(2) {
            let digits = line
                .get(i..i + 2)
                .ok_or_else(|| Error::MalformedFrame("non-ascii input".into()))?;
            let byte = u8::from_str_radix(digits, 16)
                .map_err(|_| Error::MalformedFrame(format!("invalid hex digits {:?}", digits)))?;
            bytes.push(byte);
        }

        Self::from_bytes(&bytes)
    }

    /// Encode as an upper-case hex line.
    pub fn to_hex(&self) -> Result<String> {
        Ok(hex_encode(&self.to_bytes()?))
    }

    /// Payload byte at `position`, if present.
    pub fn payload_byte(&self, position: usize) -> Option<u8> {
        self.payload.get(position).copied()
    }

    /// Peer is expected to acknowledge this frame.
    pub fn expects_ack(&self) -> bool {
        self.control_byte & CONTROL_BIDI != 0
    }

    /// Frame is sent with a burst preamble.
    pub fn is_burst(&self) -> bool {
        self.control_byte & CONTROL_BURST != 0
    }

    pub fn wake_up(&self) -> bool {
        self.control_byte & CONTROL_WAKE_UP != 0
    }

    pub fn wake_me_up(&self) -> bool {
        self.control_byte & CONTROL_WAKE_ME_UP != 0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02X} ctl={:02X} type={:02X} {} -> {} [{}]",
            self.message_counter,
            self.control_byte,
            self.message_type,
            self.sender,
            self.destination,
            hex_encode(&self.payload)
        )
    }
}

fn too_long(len: usize) -> Error {
    Error::MalformedFrame(format!("frame too long: {} bytes (maximum {})", len, MAX_FRAME_LEN))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
