//! Network configuration
//!
//! Settings can be built in code or loaded from JSON. Fields missing from
//! a JSON document take their default values.
//!
//! ```json
//! { "channel": 76, "tx_timeout_ms": 50, "multicast_relay": true }
//! ```

use super::packet::{MAX_FRAME_PAYLOAD, MAX_PAYLOAD_SIZE};
use super::traits::{DataRate, NetworkError, NetworkResult, PaLevel};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Highest channel an nRF24L01 can tune to
pub const MAX_CHANNEL: u8 = 125;

/// Route timeout as a multiple of the transmit timeout, when not set
const ROUTE_TIMEOUT_FACTOR: u32 = 9;

/// Configuration for a `Network`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// RF channel used by `begin_with_address`
    pub channel: u8,

    pub data_rate: DataRate,

    pub pa_level: PaLevel,

    /// Per-frame transmit timeout in milliseconds
    pub tx_timeout_ms: u64,

    /// How long an originator waits for a network ACK, in milliseconds
    ///
    /// Defaults to nine transmit timeouts.
    pub route_timeout_ms: Option<u64>,

    /// Largest message accepted for sending or reassembly
    pub max_payload_size: usize,

    /// Messages held for the application before new ones are dropped
    pub queue_capacity: usize,

    /// Messages that can be under reassembly at once
    pub reassembly_slots: usize,

    /// Listen on the per-level multicast address
    pub multicast: bool,

    /// Forward received multicast frames to the next level down
    pub multicast_relay: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            channel: 90,
            data_rate: DataRate::Mbps1,
            pa_level: PaLevel::Max,
            tx_timeout_ms: 30,
            route_timeout_ms: None,
            max_payload_size: MAX_PAYLOAD_SIZE,
            queue_capacity: 32,
            reassembly_slots: 8,
            multicast: true,
            multicast_relay: false,
        }
    }
}

impl NetworkConfig {
    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> NetworkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> NetworkResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> NetworkResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check values against radio and header limits
    pub fn validate(&self) -> NetworkResult<()> {
        if self.channel > MAX_CHANNEL {
            return Err(NetworkError::Config(format!(
                "channel {} out of range 0-{}",
                self.channel, MAX_CHANNEL
            )));
        }
        if self.max_payload_size < MAX_FRAME_PAYLOAD || self.max_payload_size > 255 * MAX_FRAME_PAYLOAD {
            return Err(NetworkError::Config(format!(
                "max_payload_size {} out of range {}-{}",
                self.max_payload_size,
                MAX_FRAME_PAYLOAD,
                255 * MAX_FRAME_PAYLOAD
            )));
        }
        if self.queue_capacity == 0 {
            return Err(NetworkError::Config("queue_capacity must be at least 1".into()));
        }
        if self.reassembly_slots == 0 {
            return Err(NetworkError::Config("reassembly_slots must be at least 1".into()));
        }
        if self.tx_timeout_ms == 0 {
            return Err(NetworkError::Config("tx_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    /// Effective route timeout
    pub fn route_timeout(&self) -> Duration {
        match self.route_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.tx_timeout() * ROUTE_TIMEOUT_FACTOR,
        }
    }

    /// Builder: set the RF channel
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_data_rate(mut self, rate: DataRate) -> Self {
        self.data_rate = rate;
        self
    }

    pub fn with_pa_level(mut self, level: PaLevel) -> Self {
        self.pa_level = level;
        self
    }

    /// Builder: set the transmit timeout
    pub fn with_tx_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder: set the route timeout explicitly
    pub fn with_route_timeout(mut self, timeout: Duration) -> Self {
        self.route_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_reassembly_slots(mut self, slots: usize) -> Self {
        self.reassembly_slots = slots;
        self
    }

    pub fn with_multicast(mut self, enabled: bool) -> Self {
        self.multicast = enabled;
        self
    }

    /// Builder: relay multicast frames to the next level
    pub fn with_multicast_relay(mut self, relay: bool) -> Self {
        self.multicast_relay = relay;
        self
    }
}
