//! Core network traits
//!
//! This module defines the radio transport handle the network layer drives,
//! the radio configuration enums, and the error and statistics types shared
//! by the rest of the network module.
//!
//! The `Radio` trait mirrors the control surface of an nRF24L01-class
//! transceiver: six reading pipes, one writing pipe, a listening switch and
//! a write that reports whether the hardware auto-acknowledgement arrived.

use super::address::NodeAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in network operations
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Address is not a valid tree address
    #[error("invalid node address {0}")]
    InvalidAddress(NodeAddress),

    /// The radio did not respond during setup
    #[error("radio hardware is not responding")]
    RadioUnavailable,

    /// An operation needing an address ran before `begin`
    #[error("network not started")]
    NotStarted,

    /// Payload exceeds the configured maximum
    #[error("payload of {len} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// Fragment counter would not fit in the header's reserved byte
    #[error("message needs {0} fragments, at most 255 are allowed")]
    TooManyFragments(usize),

    /// The next hop did not acknowledge the frame
    #[error("transmission to {to} via {via} failed")]
    TransmitFailed { to: NodeAddress, via: NodeAddress },

    /// No network ACK came back for a routed frame
    #[error("no network acknowledgement from {to} within {timeout:?}")]
    RouteAckTimeout { to: NodeAddress, timeout: Duration },

    /// Received bytes do not form a frame
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Receive queue is full
    #[error("receive queue full")]
    QueueFull,

    /// Radio driver error
    #[error("radio error: {0}")]
    Radio(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Over-the-air data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataRate {
    /// 250 kbps (longest range)
    Kbps250,
    /// 1 Mbps
    #[default]
    Mbps1,
    /// 2 Mbps
    Mbps2,
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRate::Kbps250 => write!(f, "250KBPS"),
            DataRate::Mbps1 => write!(f, "1MBPS"),
            DataRate::Mbps2 => write!(f, "2MBPS"),
        }
    }
}

/// Hardware CRC length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrcLength {
    Disabled,
    Crc8,
    #[default]
    Crc16,
}

impl fmt::Display for CrcLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrcLength::Disabled => write!(f, "Disabled"),
            CrcLength::Crc8 => write!(f, "8 bits"),
            CrcLength::Crc16 => write!(f, "16 bits"),
        }
    }
}

/// Power amplifier level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaLevel {
    Min,
    Low,
    High,
    #[default]
    Max,
}

impl fmt::Display for PaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaLevel::Min => write!(f, "PA_MIN"),
            PaLevel::Low => write!(f, "PA_LOW"),
            PaLevel::High => write!(f, "PA_HIGH"),
            PaLevel::Max => write!(f, "PA_MAX"),
        }
    }
}

/// Snapshot of a radio's configuration, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioDetails {
    pub channel: u8,
    pub data_rate: DataRate,
    pub crc_length: CrcLength,
    pub pa_level: PaLevel,
    /// Auto-retransmit delay code (250µs steps) and count
    pub retries: (u8, u8),
    pub dynamic_payloads: bool,
    pub dynamic_ack: bool,
    pub listening: bool,
    pub reading_pipes: [Option<u64>; 6],
    pub writing_pipe: Option<u64>,
}

impl fmt::Display for RadioDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RF_CH            = {}", self.channel)?;
        writeln!(f, "Data Rate        = {}", self.data_rate)?;
        writeln!(f, "CRC Length       = {}", self.crc_length)?;
        writeln!(f, "PA Power         = {}", self.pa_level)?;
        writeln!(f, "SETUP_RETR       = delay {} count {}", self.retries.0, self.retries.1)?;
        writeln!(f, "Dynamic Payloads = {}", self.dynamic_payloads)?;
        writeln!(f, "Dynamic ACK      = {}", self.dynamic_ack)?;
        writeln!(f, "Listening        = {}", self.listening)?;
        for (pipe, address) in self.reading_pipes.iter().enumerate() {
            match address {
                Some(a) => writeln!(f, "RX_ADDR_P{}       = 0x{:010x}", pipe, a)?,
                None => writeln!(f, "RX_ADDR_P{}       = closed", pipe)?,
            }
        }
        match self.writing_pipe {
            Some(a) => write!(f, "TX_ADDR          = 0x{:010x}", a),
            None => write!(f, "TX_ADDR          = unset"),
        }
    }
}

/// Radio transport handle driven by the network layer
///
/// Implementations wrap a transceiver driver (or a simulated medium). The
/// network layer owns its radio exclusively; nothing else should read from
/// it while the network is running, or frames meant for routing are lost.
pub trait Radio: fmt::Debug {
    /// Initialize the hardware
    fn begin(&mut self) -> NetworkResult<()>;

    /// Whether the hardware is present and responding
    fn is_valid(&self) -> bool;

    /// Set the RF channel (0-125)
    fn set_channel(&mut self, channel: u8) -> NetworkResult<()>;

    /// Current RF channel
    fn channel(&self) -> u8;

    fn set_data_rate(&mut self, rate: DataRate);

    fn set_crc_length(&mut self, length: CrcLength);

    /// Configure hardware auto-retransmit
    ///
    /// `delay` is in steps of 250µs (0-15), `count` is the number of
    /// retransmissions (0-15).
    fn set_retries(&mut self, delay: u8, count: u8);

    fn set_pa_level(&mut self, level: PaLevel);

    fn enable_dynamic_payloads(&mut self);

    /// Allow per-write suppression of the hardware ACK
    fn enable_dynamic_ack(&mut self);

    /// Listen on `pipe` (0-5) for the given 5-byte address
    fn open_reading_pipe(&mut self, pipe: u8, address: u64);

    /// Direct subsequent writes at the given 5-byte address
    fn open_writing_pipe(&mut self, address: u64);

    fn start_listening(&mut self);

    fn stop_listening(&mut self);

    /// Whether a received frame is waiting in the RX FIFO
    fn available(&self) -> bool;

    /// Pop the next received frame from the RX FIFO
    fn read(&mut self) -> Option<Vec<u8>>;

    /// Transmit a frame to the open writing pipe
    ///
    /// Returns `true` when the receiver acknowledged the frame, or always
    /// when `no_ack` is set and the frame went out.
    fn write(&mut self, frame: &[u8], no_ack: bool, timeout: Duration) -> bool;

    /// Configuration snapshot
    fn details(&self) -> RadioDetails;
}

/// Network layer counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Frames the next hop acknowledged (or no-ack frames sent)
    pub frames_ok: u64,
    /// Frames the next hop did not acknowledge
    pub frames_failed: u64,
    /// Frames read from the radio
    pub frames_received: u64,
    /// Frames forwarded on behalf of other nodes
    pub frames_relayed: u64,
    /// Frames dropped as malformed or misaddressed
    pub frames_invalid: u64,
    /// Messages placed in the receive queue
    pub messages_queued: u64,
    /// Messages dropped because the queue was full
    pub queue_overflows: u64,
    pub network_acks_sent: u64,
    pub network_acks_received: u64,
    pub route_ack_timeouts: u64,
    pub fragments_sent: u64,
    pub messages_reassembled: u64,
    pub reassembly_drops: u64,
    pub multicast_relayed: u64,
    pub multicast_duplicates: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl NetworkStats {
    /// Fraction of hop transmissions that were acknowledged
    pub fn delivery_ratio(&self) -> f64 {
        let total = self.frames_ok + self.frames_failed;
        if total == 0 {
            1.0
        } else {
            self.frames_ok as f64 / total as f64
        }
    }
}
