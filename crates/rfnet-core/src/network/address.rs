//! Logical tree addresses
//!
//! Node addresses are 16-bit values read in octal. Each octal digit,
//! starting from the least significant, selects a child slot (1-5) at
//! one level of the tree:
//!
//! ```text
//! 00      master (root)
//! 03      child 3 of the master
//! 013     child 1 of 03
//! 0213    child 2 of 013
//! ```
//!
//! A digit of 0 never appears inside a valid node address, and the tree is
//! at most four levels deep. The one exception is the multicast
//! pseudo-address `0100`, accepted only when multicast is enabled.
//!
//! This module also maps logical addresses onto the 5-byte pipe
//! addresses the radio listens on.

use super::traits::{NetworkError, NetworkResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address bytes used for pipe numbers and address digits
const ADDRESS_TRANSLATION: [u8; 7] = [0xc3, 0x3c, 0x33, 0xce, 0x3e, 0xe3, 0xec];

/// Base value every pipe address is derived from
const PIPE_ADDRESS_BASE: u64 = 0xCC_CCCC_CCCC;

/// Deepest level `level_to_address` can represent in 16 bits
const MAX_LEVEL: u8 = 6;

/// Digits that fit into the four address bytes of a pipe address
pub const MAX_DEPTH: u8 = 4;

/// Logical node address in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeAddress(u16);

impl NodeAddress {
    /// The root of the tree
    pub const MASTER: NodeAddress = NodeAddress(0);

    /// Destination marker carried in multicast frames
    pub const MULTICAST: NodeAddress = NodeAddress(0o100);

    /// Address used by nodes that have not been assigned one yet
    pub const DEFAULT: NodeAddress = NodeAddress(0o4444);

    pub const fn new(raw: u16) -> Self {
        NodeAddress(raw)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Parse an octal string such as `"011"`, `"0o11"` or `"11"`
    pub fn parse_octal(s: &str) -> NetworkResult<Self> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(NetworkError::Config(format!("empty node address '{}'", s)));
        }
        u16::from_str_radix(digits, 8)
            .map(NodeAddress)
            .map_err(|e| NetworkError::Config(format!("bad octal node address '{}': {}", s, e)))
    }

    pub fn is_master(&self) -> bool {
        self.0 == 0
    }

    pub fn is_multicast(&self) -> bool {
        *self == Self::MULTICAST
    }

    /// Check that the address has at most four digits, each between 1 and 5
    ///
    /// With `multicast_enabled`, the multicast pseudo-address also passes.
    pub fn is_valid(&self, multicast_enabled: bool) -> bool {
        if self.is_multicast() {
            return multicast_enabled;
        }
        if self.depth() > MAX_DEPTH {
            return false;
        }
        let mut node = self.0;
        while node != 0 {
            let digit = node & 0o7;
            if digit == 0 || digit > 5 {
                return false;
            }
            node >>= 3;
        }
        true
    }

    /// Whether this is the first address of its level, as produced by
    /// `level_to_address`
    pub fn is_level_address(&self) -> bool {
        *self == level_to_address(self.depth())
    }

    /// Number of octal digits, which is also the node's tree level
    pub fn depth(&self) -> u8 {
        let mut node = self.0;
        let mut depth = 0;
        while node != 0 {
            node >>= 3;
            depth += 1;
        }
        depth
    }

    /// Mask covering all digits of this address
    pub fn node_mask(&self) -> u16 {
        let mut check: u16 = 0xFFFF;
        while self.0 & check != 0 {
            check <<= 3;
        }
        !check
    }

    /// The parent's address, or `None` for the master
    pub fn parent(&self) -> Option<NodeAddress> {
        if self.is_master() {
            return None;
        }
        Some(NodeAddress(self.0 & (self.node_mask() >> 3)))
    }

    /// Which of the parent's pipes (1-5) this node talks to
    ///
    /// This is the most significant digit: the slot this node occupies
    /// among its parent's children.
    pub fn parent_pipe(&self) -> u8 {
        let mut node = self.0;
        let mut mask = self.node_mask() >> 3;
        while mask != 0 {
            node >>= 3;
            mask >>= 3;
        }
        (node & 0o7) as u8
    }

    /// Whether `node` lies somewhere in the subtree below this address
    pub fn is_descendant(&self, node: NodeAddress) -> bool {
        node.0 & self.node_mask() == self.0
    }

    /// Whether `node` is exactly one level below this address
    pub fn is_direct_child(&self, node: NodeAddress) -> bool {
        self.is_descendant(node) && node.0 & (!self.node_mask() << 3) == 0
    }

    /// The direct child through which `node` is reached
    pub fn direct_child_route_to(&self, node: NodeAddress) -> NodeAddress {
        let child_mask = (self.node_mask() << 3) | 0o7;
        NodeAddress(node.0 & child_mask)
    }

    /// The child slot digit leading towards descendant `node`
    pub fn pipe_to_descendant(&self, node: NodeAddress) -> u8 {
        let mut i = node.0;
        let mut mask = self.node_mask();
        while mask != 0 {
            i >>= 3;
            mask >>= 3;
        }
        (i & 0o7) as u8
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0{:o}", self.0)
    }
}

impl FromStr for NodeAddress {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeAddress::parse_octal(s)
    }
}

impl From<u16> for NodeAddress {
    fn from(raw: u16) -> Self {
        NodeAddress(raw)
    }
}

/// First address of a multicast level
///
/// Level 0 is the master, level 1 is `01`, level 2 is `010`, and so on.
/// Every node at level `n` listens for multicast on pipe 0 of this
/// address. Levels past the deepest representable one saturate.
pub fn level_to_address(level: u8) -> NodeAddress {
    if level == 0 {
        return NodeAddress::MASTER;
    }
    let shift = u32::from(level.min(MAX_LEVEL) - 1) * 3;
    NodeAddress(1 << shift)
}

/// 5-byte radio address of `pipe` (0-5) on `node`
///
/// The low byte encodes the pipe, the following bytes encode the address
/// digits, and the rest keep the `0xCC` base pattern. With multicast enabled,
/// pipe 0 of a non-master node is instead a per-level address shared by
/// every node at that depth.
pub fn pipe_address(node: NodeAddress, pipe: u8, multicast_enabled: bool) -> u64 {
    let mut out = PIPE_ADDRESS_BASE.to_le_bytes();
    let translate = |value: u16| ADDRESS_TRANSLATION[usize::from(value).min(ADDRESS_TRANSLATION.len() - 1)];

    if multicast_enabled && pipe == 0 && !node.is_master() {
        out[1] = translate(u16::from(node.depth()));
    } else {
        let mut dec = node.raw();
        let mut count = 1;
        while dec != 0 {
            out[count] = translate(dec % 8);
            dec /= 8;
            count += 1;
        }
        out[0] = translate(u16::from(pipe));
    }

    u64::from_le_bytes(out)
}
