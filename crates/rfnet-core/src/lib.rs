//! # rfnet Core Library
//!
//! This crate implements an OSI network layer for low-power, half-duplex
//! RF transceivers of the nRF24L01 class. Nodes form a static tree and are
//! identified by octal logical addresses; the layer moves small messages
//! between any two nodes of that tree, however many hops apart they are.
//!
//! ## Overview
//!
//! - **Addressing**: octal tree addresses, parent/child relations, and the
//!   mapping of logical addresses onto 5-byte radio pipe addresses
//! - **Forwarding**: multi-hop routing up and down the tree, with
//!   end-to-end network acknowledgements for routed traffic
//! - **Fragmentation**: messages larger than one 32-byte radio frame are
//!   split and reassembled transparently
//! - **Multicast**: level-based multicast with optional relaying
//! - **Simulation**: an in-memory radio medium for running whole networks
//!   without hardware
//!
//! ## Frame Flow
//!
//! ```text
//! TX: write(header, payload) → fragment → route (next hop, pipe) → Radio::write
//! RX: Radio::read → header check → [for us] reassemble → queue → read()
//!                                → [not for us] route → Radio::write
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rfnet_core::network::{Network, NetworkConfig, NetworkHeader, NodeAddress, SimAir};
//!
//! let air = SimAir::new();
//! let mut base = Network::new(air.radio(), NetworkConfig::default());
//! let mut leaf = Network::new(air.radio(), NetworkConfig::default());
//!
//! base.begin(90, NodeAddress::MASTER).unwrap();
//! leaf.begin(90, NodeAddress::new(0o1)).unwrap();
//!
//! let mut header = NetworkHeader::new(NodeAddress::MASTER, b'T');
//! leaf.write(&mut header, b"hello").unwrap();
//!
//! base.update().unwrap();
//! let (header, payload) = base.read(32).unwrap();
//! assert_eq!(header.from_node, NodeAddress::new(0o1));
//! assert_eq!(payload, b"hello");
//! ```

pub mod network;

// Re-export main types
pub use network::{
    Frame, Network, NetworkConfig, NetworkError, NetworkHeader, NetworkResult, NetworkStats,
    NodeAddress, Radio, SimAir, SimRadio,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::network::{
        Network, NetworkConfig, NetworkError, NetworkHeader, NetworkResult, NodeAddress, Radio,
    };
    // Simulation
    pub use crate::network::{SimAir, SimRadio};
}
