// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! BidCoS delivery core
//!
//! Reliable exchange of control messages with battery-powered BidCoS radio
//! devices over a half-duplex, lossy link.
//!
//! # Features
//!
//! - **Queue Engine**: per-peer ordered protocol steps with resend and
//!   pop-wait timers and a completion callback
//! - **Pending Chains**: multi-step exchanges (pairing, then config) built as
//!   separate queues and run in sequence
//! - **Message Registry**: type/subtype classification and access-mask
//!   authorization of inbound frames
//! - **Persistence**: queues survive restarts through a [`QueueStore`]
//!
//! # Architecture
//!
//! ```text
//! serial stick --> dispatch_frame --> MessageRegistry (match + authorize)
//!                        |                    |
//!                        v                    v
//!                  QueueManager          MessageHandler
//!                  +-- Queue (peer A) --> Transport
//!                  +-- Queue (peer B)       ^
//!                        |                  |
//!                  resend / pop-wait timers-+
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! idle_timeout_ms = 1000
//!
//! [default]
//! resend_interval_ms = 300
//! retries = 4
//!
//! [overrides.pairing]
//! resend_interval_ms = 500
//! long_keep_alive_ms = 5000
//! ```
//!
//! The crate never installs a logger; it logs through the `log` facade.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;
pub mod persistence;
pub mod queue;
pub mod transport;

pub use config::{ConfigError, EngineConfig, TimingProfile};
pub use dispatch::dispatch_frame;
pub use error::{Error, Result};
pub use frame::{Address, Frame};
pub use message::{
    AccessContext, AccessMask, DeviceContext, Direction, DispatchOutcome, FrameBuilder,
    MessageCounters, MessageDefinition, MessageHandler, MessageRegistry, MessageRegistryBuilder,
};
pub use persistence::{MemoryQueueStore, QueueStore};
pub use queue::{
    CallbackParameter, PendingQueues, Queue, QueueContext, QueueEntry, QueueManager, QueueType,
    SerializedQueue,
};
pub use transport::{Transport, TransportError};
