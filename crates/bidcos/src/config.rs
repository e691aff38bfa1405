// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration.
//!
//! Resend timing differs per exchange: a pairing session with a sleeping
//! thermostat tolerates other intervals than a config write to a mains-powered
//! switch. Timing is therefore a [`TimingProfile`] attached to each queue type,
//! with a default profile for types that have no override.
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
//! retries = 6
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueType;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Resend and keep-alive timing for one queue type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingProfile {
    /// Delay between resends of an unacknowledged frame.
    #[serde(default = "default_resend_interval")]
    pub resend_interval_ms: u64,

    /// Delay before the first resend of a burst frame (0 = immediately).
    /// Later resends wait `resend_interval_ms`.
    #[serde(default)]
    pub burst_interval_ms: u64,

    /// Retry budget for the head-of-queue entry.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Time `keep_alive` adds on top of the idle timeout.
    #[serde(default)]
    pub keep_alive_ms: u64,

    /// Time `long_keep_alive` adds on top of the idle timeout.
    #[serde(default = "default_long_keep_alive")]
    pub long_keep_alive_ms: u64,
}

fn default_resend_interval() -> u64 {
    300
}

fn default_retries() -> u32 {
    4
}

fn default_long_keep_alive() -> u64 {
    5000
}

fn default_idle_timeout() -> u64 {
    1000
}

fn default_reaper_interval() -> u64 {
    100
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self {
            resend_interval_ms: default_resend_interval(),
            burst_interval_ms: 0,
            retries: default_retries(),
            keep_alive_ms: 0,
            long_keep_alive_ms: default_long_keep_alive(),
        }
    }
}

impl TimingProfile {
    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    pub fn burst_interval(&self) -> Duration {
        Duration::from_millis(self.burst_interval_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn long_keep_alive(&self) -> Duration {
        Duration::from_millis(self.long_keep_alive_ms)
    }

    /// Set the resend interval.
    pub fn with_resend_interval_ms(mut self, ms: u64) -> Self {
        self.resend_interval_ms = ms;
        self
    }

    /// Set the delay before the first burst resend.
    pub fn with_burst_interval_ms(mut self, ms: u64) -> Self {
        self.burst_interval_ms = ms;
        self
    }

    /// Set the retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Profile used by queue types without an override.
    #[serde(default)]
    pub default: TimingProfile,

    /// Per queue type overrides.
    #[serde(default)]
    pub overrides: HashMap<QueueType, TimingProfile>,

    /// Queues idle for longer than this are reaped by the queue manager.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// How often the queue manager looks for idle queues.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default: TimingProfile::default(),
            overrides: HashMap::new(),
            idle_timeout_ms: default_idle_timeout(),
            reaper_interval_ms: default_reaper_interval(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Timing profile for a queue type.
    pub fn profile(&self, queue_type: QueueType) -> TimingProfile {
        self.overrides
            .get(&queue_type)
            .copied()
            .unwrap_or(self.default)
    }

    /// Override the profile of one queue type.
    pub fn with_override(mut self, queue_type: QueueType, profile: TimingProfile) -> Self {
        self.overrides.insert(queue_type, profile);
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reaper_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reaper_interval_ms must be greater than 0".into(),
            ));
        }

        let profiles = std::iter::once((None, &self.default))
            .chain(self.overrides.iter().map(|(t, p)| (Some(*t), p)));
        for (queue_type, profile) in profiles {
            if profile.resend_interval_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "resend_interval_ms of {} profile must be greater than 0",
                    queue_type.map_or_else(|| "default".to_string(), |t| format!("{:?}", t))
                )));
            }
            if profile.long_keep_alive_ms < profile.keep_alive_ms {
                return Err(ConfigError::Invalid(format!(
                    "long_keep_alive_ms ({}) shorter than keep_alive_ms ({})",
                    profile.long_keep_alive_ms, profile.keep_alive_ms
                )));
            }
        }

        Ok(())
    }
}
