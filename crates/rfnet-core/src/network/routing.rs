//! Tree routing
//!
//! Routing in the tree needs no tables: the next hop follows from the
//! local address and the destination alone.
//!
//! ```text
//! destination is ...            next hop              pipe
//! ─────────────────────────────────────────────────────────────
//! a direct child                the child             5
//! a deeper descendant           child towards it      5
//! anything else                 our parent            our slot (1-5)
//! ```
//!
//! Every node listens for its parent on pipe 5 and for child `n` on pipe
//! `n`. Direct modes bypass the tree and multicast uses the shared
//! per-level address on pipe 0.

use super::address::NodeAddress;
use serde::{Deserialize, Serialize};

/// How a frame leaves this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SendMode {
    /// Route through the tree; wait for a network ACK when multi-hop
    #[default]
    Standard,
    /// Forwarding on behalf of another node; no waiting
    Routed,
    /// Straight to the destination radio, without hardware ACK
    DirectToHost,
    /// To a chosen first hop without hardware ACK, then routed onwards
    DirectToRoute,
    /// To every node listening on a level's multicast address
    Multicast,
}

impl SendMode {
    /// Whether the radio should skip waiting for the hardware ACK
    pub fn no_ack(&self) -> bool {
        matches!(
            self,
            SendMode::DirectToHost | SendMode::DirectToRoute | SendMode::Multicast
        )
    }

    /// Whether the originator waits for an end-to-end ACK
    pub fn awaits_network_ack(&self) -> bool {
        matches!(self, SendMode::Standard | SendMode::DirectToRoute)
    }
}

/// Where one transmission goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    pub node: NodeAddress,
    pub pipe: u8,
    pub no_ack: bool,
}

/// A node's position in the tree, computed once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreePosition {
    pub address: NodeAddress,
    pub node_mask: u16,
    pub parent: Option<NodeAddress>,
    pub parent_pipe: u8,
}

/// Pipe every node uses to hear from its parent
pub const PARENT_LISTEN_PIPE: u8 = 5;

/// Pipe carrying multicast traffic
pub const MULTICAST_PIPE: u8 = 0;

impl TreePosition {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            node_mask: address.node_mask(),
            parent: address.parent(),
            parent_pipe: address.parent_pipe(),
        }
    }

    /// Pick the next hop for a frame to `to_node`
    ///
    /// For direct modes `to_node` is the radio that should hear the frame;
    /// for multicast it is the first address of the target level.
    pub fn next_hop(&self, to_node: NodeAddress, mode: SendMode) -> NextHop {
        let no_ack = mode.no_ack();

        match mode {
            SendMode::Multicast => NextHop {
                node: to_node,
                pipe: MULTICAST_PIPE,
                no_ack,
            },
            SendMode::DirectToHost | SendMode::DirectToRoute => NextHop {
                node: to_node,
                pipe: PARENT_LISTEN_PIPE,
                no_ack,
            },
            SendMode::Standard | SendMode::Routed => {
                if self.address.is_descendant(to_node) && to_node != self.address {
                    let child = if self.address.is_direct_child(to_node) {
                        to_node
                    } else {
                        self.address.direct_child_route_to(to_node)
                    };
                    NextHop {
                        node: child,
                        pipe: PARENT_LISTEN_PIPE,
                        no_ack,
                    }
                } else {
                    NextHop {
                        node: self.parent.unwrap_or(NodeAddress::MASTER),
                        pipe: self.parent_pipe,
                        no_ack,
                    }
                }
            }
        }
    }
}
