//! Tree Network Layer
//!
//! This module implements the network layer on top of a generic radio
//! transport. The architecture separates concerns into:
//!
//! - **Traits**: the `Radio` transport handle, errors and statistics
//! - **Address**: octal logical addresses and radio pipe addressing
//! - **Packet**: the 8-byte header and 32-byte frame
//! - **Fragment**: splitting and reassembly of long messages
//! - **Routing**: next-hop and pipe selection in the tree
//! - **Node**: the `Network` state machine driven by `update()`
//! - **Simulation**: an in-memory radio medium
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Application Layer                                   │
//! │           begin · update · write · available · peek · read               │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Network<R: Radio>                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  rx queue   │  │ reassembly  │  │   routing   │  │  net ACKs   │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Radio Trait                                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌────────────┐   │
//! │  │ reading pipes│  │ writing pipe │  │  listening   │  │ auto-ack   │   │
//! │  └──────────────┘  └──────────────┘  └──────────────┘  └────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Addressing
//!
//! ```text
//!                    00 (master)
//!          ┌────────┬──┴─────┬────────┐
//!         01       02       03  ...  05
//!       ┌──┴──┐     │
//!      011   021   012
//!       │
//!     0111
//! ```
//!
//! Each octal digit, least significant first, picks a child slot (1-5) at
//! one tree level. Node `021` is child 2 of node `01`.

pub mod traits;
pub mod address;
pub mod packet;
pub mod fragment;
pub mod routing;
pub mod config;
pub mod node;
pub mod simulation;

// Re-export main types
pub use traits::{CrcLength, DataRate, NetworkError, NetworkResult, NetworkStats, PaLevel, Radio, RadioDetails};
pub use address::{level_to_address, pipe_address, NodeAddress};
pub use packet::{Frame, MessageKind, NetworkHeader};
pub use packet::{HEADER_SIZE, MAX_FRAME_PAYLOAD, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, MAX_USER_DEFINED_HEADER_TYPE};
pub use fragment::{DropReason, ReassemblyCache, ReassemblyOutcome};
pub use routing::{NextHop, SendMode, TreePosition};
pub use config::NetworkConfig;
pub use node::Network;
pub use simulation::{AirStats, SimAir, SimRadio};
