//! Network header and frame types
//!
//! Every radio frame starts with a fixed 8-byte header, little-endian:
//!
//! ```text
//! ┌────────────┬────────────┬────────────┬──────────┬──────────┐
//! │ from (2B)  │  to (2B)   │  id (2B)   │ type (1B)│ rsvd (1B)│
//! └────────────┴────────────┴────────────┴──────────┴──────────┘
//! ```
//!
//! followed by up to 24 bytes of payload, for a maximum of 32 bytes.
//!
//! Message types 0-127 belong to the application, and any of them sent
//! over more than one hop is confirmed by a network ACK. Types 128-255 are reserved for the network layer itself; fragmentation
//! and acknowledgements travel in that range.

use super::address::NodeAddress;
use super::traits::{NetworkError, NetworkResult};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest frame the radio carries
pub const MAX_FRAME_SIZE: usize = 32;

/// Size of the network header
pub const HEADER_SIZE: usize = 8;

/// Payload bytes that fit in a single frame
pub const MAX_FRAME_PAYLOAD: usize = MAX_FRAME_SIZE - HEADER_SIZE;

/// Default maximum size of a (possibly fragmented) message
pub const MAX_PAYLOAD_SIZE: usize = 144;

/// Highest message type available to applications
pub const MAX_USER_DEFINED_HEADER_TYPE: u8 = 127;

/// Network layer message categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Application message (0-127)
    User(u8),
    /// Address assignment reply
    AddrResponse,
    /// Ping, dropped on arrival
    Ping,
    /// First fragment of a long message
    FirstFragment,
    /// Middle fragment of a long message
    MoreFragments,
    /// Final fragment; the reserved byte carries the user type
    LastFragment,
    /// End-to-end acknowledgement of a routed frame
    Ack,
    /// Poll for nodes accepting new children
    Poll,
    /// Address request from an unassigned node
    ReqAddress,
    /// Any other reserved type
    System(u8),
}

impl MessageKind {
    pub const ADDR_RESPONSE: u8 = 128;
    pub const PING: u8 = 130;
    pub const FIRST_FRAGMENT: u8 = 148;
    pub const MORE_FRAGMENTS: u8 = 149;
    pub const LAST_FRAGMENT: u8 = 150;
    pub const ACK: u8 = 193;
    pub const POLL: u8 = 194;
    pub const REQ_ADDRESS: u8 = 195;

    pub fn from_byte(b: u8) -> Self {
        match b {
            0..=MAX_USER_DEFINED_HEADER_TYPE => MessageKind::User(b),
            Self::ADDR_RESPONSE => MessageKind::AddrResponse,
            Self::PING => MessageKind::Ping,
            Self::FIRST_FRAGMENT => MessageKind::FirstFragment,
            Self::MORE_FRAGMENTS => MessageKind::MoreFragments,
            Self::LAST_FRAGMENT => MessageKind::LastFragment,
            Self::ACK => MessageKind::Ack,
            Self::POLL => MessageKind::Poll,
            Self::REQ_ADDRESS => MessageKind::ReqAddress,
            other => MessageKind::System(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            MessageKind::User(b) | MessageKind::System(b) => *b,
            MessageKind::AddrResponse => Self::ADDR_RESPONSE,
            MessageKind::Ping => Self::PING,
            MessageKind::FirstFragment => Self::FIRST_FRAGMENT,
            MessageKind::MoreFragments => Self::MORE_FRAGMENTS,
            MessageKind::LastFragment => Self::LAST_FRAGMENT,
            MessageKind::Ack => Self::ACK,
            MessageKind::Poll => Self::POLL,
            MessageKind::ReqAddress => Self::REQ_ADDRESS,
        }
    }

    pub fn is_fragment(&self) -> bool {
        matches!(
            self,
            MessageKind::FirstFragment | MessageKind::MoreFragments | MessageKind::LastFragment
        )
    }
}

/// Header carried at the front of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkHeader {
    /// Logical address of the originating node
    pub from_node: NodeAddress,
    /// Logical address of the final destination
    pub to_node: NodeAddress,
    /// Sequence number, assigned by the sending network
    pub id: u16,
    /// Message type
    pub msg_type: u8,
    /// Fragment counter for fragments, the user type on the last fragment
    pub reserved: u8,
}

impl NetworkHeader {
    pub const SIZE: usize = HEADER_SIZE;

    /// Header addressed to `to_node`
    ///
    /// Only the low 7 bits of `msg_type` are kept, so an application cannot
    /// accidentally create a network layer message. The sender fills in
    /// `from_node` and `id` when writing.
    pub fn new(to_node: NodeAddress, msg_type: u8) -> Self {
        Self {
            from_node: NodeAddress::MASTER,
            to_node,
            id: 0,
            msg_type: msg_type & 0x7f,
            reserved: 0,
        }
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::from_byte(self.msg_type)
    }

    pub fn is_fragment(&self) -> bool {
        self.kind().is_fragment()
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        LittleEndian::write_u16(&mut bytes[0..2], self.from_node.raw());
        LittleEndian::write_u16(&mut bytes[2..4], self.to_node.raw());
        LittleEndian::write_u16(&mut bytes[4..6], self.id);
        bytes[6] = self.msg_type;
        bytes[7] = self.reserved;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> NetworkResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(NetworkError::InvalidFrame(format!(
                "{} bytes is shorter than the {}-byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        Ok(Self {
            from_node: NodeAddress::new(LittleEndian::read_u16(&bytes[0..2])),
            to_node: NodeAddress::new(LittleEndian::read_u16(&bytes[2..4])),
            id: LittleEndian::read_u16(&bytes[4..6]),
            msg_type: bytes[6],
            reserved: bytes[7],
        })
    }
}

impl fmt::Display for NetworkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id {:04x} from {} to {} type {}",
            self.id, self.from_node, self.to_node, self.msg_type
        )
    }
}

/// A header plus its payload
///
/// On the air a frame never exceeds `MAX_FRAME_SIZE`. Reassembled
/// messages reuse the type with a longer payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub header: NetworkHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(header: NetworkHeader, payload: &[u8]) -> Self {
        Self {
            header,
            payload: payload.to_vec(),
        }
    }

    /// Wire bytes, with the payload cut to what fits in one frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.payload.len().min(MAX_FRAME_PAYLOAD);
        let mut bytes = Vec::with_capacity(HEADER_SIZE + len);
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload[..len]);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> NetworkResult<Self> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(NetworkError::InvalidFrame(format!(
                "{} bytes exceeds the {}-byte frame limit",
                bytes.len(),
                MAX_FRAME_SIZE
            )));
        }
        let header = NetworkHeader::from_bytes(bytes)?;
        Ok(Self {
            header,
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    /// Total size on the air
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.payload.len().min(MAX_FRAME_PAYLOAD)
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
