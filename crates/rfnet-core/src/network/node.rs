//! Network node
//!
//! `Network` owns a radio and turns it into a node of the tree. The
//! application drives it by calling `update()` often; every call drains the
//! radio, keeps frames addressed to this node and forwards everything else.
//!
//! ## Routed Delivery
//!
//! ```text
//!  011 ──frame──▶ 01 ──frame──▶ 00
//!   ▲              │
//!   └────ACK───────┘   (01 made the final hop, so it reports success)
//! ```
//!
//! When a frame needs more than one hop, the hardware ACK only proves the
//! first hop. The node that makes the final hop therefore sends a network
//! ACK back to the originator, which blocks in `write` (still servicing
//! `update()`) until the ACK arrives or the route timeout expires.

use super::address::{level_to_address, pipe_address, NodeAddress};
use super::config::NetworkConfig;
use super::fragment::{self, ReassemblyCache, ReassemblyOutcome};
use super::packet::{Frame, MessageKind, NetworkHeader, MAX_FRAME_PAYLOAD};
use super::routing::{NextHop, SendMode, TreePosition};
use super::traits::{CrcLength, NetworkError, NetworkResult, NetworkStats, Radio};
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// Pause between polls while waiting for a network ACK
const ACK_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Hardware retransmissions per frame
const RETRY_COUNT: u8 = 5;

/// A node of the tree network
#[derive(Debug)]
pub struct Network<R: Radio> {
    radio: R,
    config: NetworkConfig,
    /// Set by `begin`
    position: Option<TreePosition>,
    multicast_level: u8,
    multicast_relay: bool,
    tx_timeout: Duration,
    route_timeout: Duration,
    next_id: u16,
    /// Sender and id of the last multicast frame accepted
    last_multicast: Option<(NodeAddress, u16)>,
    queue: VecDeque<Frame>,
    reassembly: ReassemblyCache,
    stats: NetworkStats,
}

impl<R: Radio> Network<R> {
    /// Wrap a radio; nothing is sent or received until `begin`
    pub fn new(radio: R, config: NetworkConfig) -> Self {
        let reassembly = ReassemblyCache::new(config.reassembly_slots, config.max_payload_size);
        Self {
            radio,
            multicast_relay: config.multicast_relay,
            tx_timeout: config.tx_timeout(),
            route_timeout: config.route_timeout(),
            config,
            position: None,
            multicast_level: 0,
            next_id: 1,
            last_multicast: None,
            queue: VecDeque::new(),
            reassembly,
            stats: NetworkStats::default(),
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Give the radio back
    pub fn into_radio(self) -> R {
        self.radio
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Start the node on the configured channel
    pub fn begin_with_address(&mut self, address: NodeAddress) -> NetworkResult<()> {
        self.begin(self.config.channel, address)
    }

    /// Configure the radio and start listening as `address`
    ///
    /// The radio itself must already be initialized. Calling `begin` again
    /// restarts the node and discards anything queued.
    pub fn begin(&mut self, channel: u8, address: NodeAddress) -> NetworkResult<()> {
        if !address.is_valid(false) {
            return Err(NetworkError::InvalidAddress(address));
        }
        self.config.validate()?;
        if !self.radio.is_valid() {
            return Err(NetworkError::RadioUnavailable);
        }

        self.radio.stop_listening();
        self.radio.set_channel(channel)?;
        self.radio.set_data_rate(self.config.data_rate);
        self.radio.set_crc_length(CrcLength::Crc16);
        self.radio.enable_dynamic_ack();
        self.radio.enable_dynamic_payloads();
        self.radio.set_pa_level(self.config.pa_level);

        // Stagger retry delays so siblings don't collide on every retry
        let retry_delay = ((address.raw() % 6) + 1) * 2 + 3;
        self.radio.set_retries(retry_delay as u8, RETRY_COUNT);

        self.tx_timeout = self.config.tx_timeout();
        self.route_timeout = self.config.route_timeout();

        for pipe in (0..6u8).rev() {
            self.radio
                .open_reading_pipe(pipe, pipe_address(address, pipe, self.config.multicast));
        }

        let position = TreePosition::new(address);
        self.multicast_level = address.depth();
        self.last_multicast = None;
        self.queue.clear();
        self.reassembly.clear();
        self.position = Some(position);

        self.radio.start_listening();

        tracing::info!(
            "node {} up on channel {} (parent {}, multicast level {})",
            address,
            channel,
            position
                .parent
                .map(|p| p.to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.multicast_level
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.position.is_some()
    }

    /// This node's address, once started
    pub fn node_address(&self) -> Option<NodeAddress> {
        self.position.map(|p| p.address)
    }

    /// The parent's address; `None` for the master or before `begin`
    pub fn parent(&self) -> Option<NodeAddress> {
        self.position.and_then(|p| p.parent)
    }

    /// Whether `address` is acceptable as a destination
    ///
    /// Real node addresses always are; the multicast marker only when
    /// multicast is enabled.
    pub fn is_valid_address(&self, address: NodeAddress) -> bool {
        address.is_valid(self.config.multicast)
    }

    /// Process everything waiting in the radio
    ///
    /// Frames for this node are queued for `read`, frames for others are
    /// forwarded. Returns the type of the last network-layer message
    /// consumed, which is `Some(MessageKind::ACK)` when a network ACK
    /// arrived.
    pub fn update(&mut self) -> NetworkResult<Option<u8>> {
        let position = self.position.ok_or(NetworkError::NotStarted)?;
        let mut result = None;

        while self.radio.is_valid() && self.radio.available() {
            let Some(bytes) = self.radio.read() else {
                break;
            };
            self.stats.frames_received += 1;
            self.stats.bytes_received += bytes.len() as u64;

            let frame = match Frame::from_bytes(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    self.stats.frames_invalid += 1;
                    tracing::debug!("dropping frame: {}", e);
                    continue;
                }
            };
            let header = frame.header;
            tracing::trace!("received {}", header);

            if !self.is_valid_address(header.to_node) {
                self.stats.frames_invalid += 1;
                tracing::debug!("dropping frame for invalid address {}", header.to_node);
                continue;
            }

            if header.to_node == position.address {
                if header.msg_type == MessageKind::ACK {
                    self.stats.network_acks_received += 1;
                    result = Some(MessageKind::ACK);
                    continue;
                }
                self.enqueue(frame);
            } else if self.config.multicast && header.to_node.is_multicast() {
                let key = (header.from_node, header.id);
                if self.last_multicast == Some(key) {
                    self.stats.multicast_duplicates += 1;
                    tracing::debug!("dropping duplicate multicast {}", header);
                    continue;
                }
                self.last_multicast = Some(key);

                if self.multicast_relay {
                    let next_level = level_to_address(self.multicast_level.saturating_add(1));
                    match self.write_frame(&frame, next_level, SendMode::Multicast) {
                        Ok(()) => self.stats.multicast_relayed += 1,
                        Err(e) => tracing::debug!("multicast relay failed: {}", e),
                    }
                }
                self.enqueue(frame);
            } else {
                match self.write_frame(&frame, header.to_node, SendMode::Routed) {
                    Ok(()) => self.stats.frames_relayed += 1,
                    Err(e) => tracing::debug!("could not forward {}: {}", header, e),
                }
            }
        }

        Ok(result)
    }

    /// Whether a message is waiting to be read
    pub fn available(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Header of the next message, without removing it
    pub fn peek(&self) -> Option<&NetworkHeader> {
        self.queue.front().map(|frame| &frame.header)
    }

    /// Next message, without removing it; the payload is cut to `maxlen`
    pub fn peek_message(&self, maxlen: usize) -> Option<(NetworkHeader, Vec<u8>)> {
        self.queue.front().map(|frame| {
            let len = frame.payload.len().min(maxlen);
            (frame.header, frame.payload[..len].to_vec())
        })
    }

    /// Remove the next message; the payload is cut to `maxlen`
    pub fn read(&mut self, maxlen: usize) -> Option<(NetworkHeader, Vec<u8>)> {
        let mut frame = self.queue.pop_front()?;
        frame.payload.truncate(maxlen);
        Some((frame.header, frame.payload))
    }

    /// Send a message through the tree
    ///
    /// Fills in `from_node` and `id`. Payloads longer than one frame are
    /// fragmented. Multi-hop sends block until the destination side
    /// confirms delivery with a network ACK.
    pub fn write(&mut self, header: &mut NetworkHeader, payload: &[u8]) -> NetworkResult<()> {
        self.send_message(header, payload, None)
    }

    /// Send a message with an explicit first hop
    ///
    /// When `via` is the destination the frame goes straight to its radio.
    /// Otherwise `via` receives it and routes it onwards. Neither case uses
    /// a hardware ACK.
    pub fn write_direct(
        &mut self,
        header: &mut NetworkHeader,
        payload: &[u8],
        via: NodeAddress,
    ) -> NetworkResult<()> {
        self.send_message(header, payload, Some(via))
    }

    /// Send a single-frame message to every node of a tree level
    pub fn multicast(&mut self, header: &mut NetworkHeader, payload: &[u8], level: u8) -> NetworkResult<()> {
        let position = self.position.ok_or(NetworkError::NotStarted)?;
        if !self.config.multicast {
            return Err(NetworkError::Config("multicast is disabled".into()));
        }
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(NetworkError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }

        header.from_node = position.address;
        header.to_node = NodeAddress::MULTICAST;
        header.id = self.allocate_id();

        let frame = Frame::new(*header, payload);
        self.write_frame(&frame, level_to_address(level), SendMode::Multicast)
    }

    /// Transmit one prepared frame
    ///
    /// `to_node` is the routing target: the final destination for
    /// `Standard` and `Routed`, the first hop for direct modes, and the
    /// level address for `Multicast`. The frame header goes out as given.
    pub fn write_frame(&mut self, frame: &Frame, to_node: NodeAddress, mode: SendMode) -> NetworkResult<()> {
        let position = self.position.ok_or(NetworkError::NotStarted)?;
        let target_ok = match mode {
            SendMode::Multicast => self.config.multicast && to_node.is_level_address(),
            _ => to_node.is_valid(false),
        };
        if !target_ok {
            return Err(NetworkError::InvalidAddress(to_node));
        }

        let hop = position.next_hop(to_node, mode);
        let bytes = frame.to_bytes();

        if !self.transmit(&bytes, hop) {
            self.stats.frames_failed += 1;
            tracing::debug!(
                "send of {} via {} on pipe {} failed",
                frame.header,
                hop.node,
                hop.pipe
            );
            return Err(NetworkError::TransmitFailed {
                to: frame.header.to_node,
                via: hop.node,
            });
        }
        self.stats.bytes_sent += bytes.len() as u64;
        tracing::trace!("sent {} via {} on pipe {}", frame.header, hop.node, hop.pipe);

        // Final hop of a routed frame: tell the originator it arrived
        if mode == SendMode::Routed
            && hop.node == to_node
            && frame.header.msg_type != MessageKind::ACK
            && frame.header.from_node != position.address
        {
            let mut ack = frame.header;
            ack.msg_type = MessageKind::ACK;
            ack.to_node = frame.header.from_node;
            match self.write_frame(&Frame::new(ack, &[]), ack.to_node, SendMode::Routed) {
                Ok(()) => {
                    self.stats.network_acks_sent += 1;
                    tracing::debug!("route to {} ok, ACK sent to {}", to_node, ack.to_node);
                }
                Err(e) => tracing::debug!("ACK to {} failed: {}", ack.to_node, e),
            }
        }

        if mode.awaits_network_ack() && hop.node != frame.header.to_node {
            self.await_network_ack(frame.header.to_node, hop)?;
        }

        self.stats.frames_ok += 1;
        Ok(())
    }

    /// `(failed, ok)` transmission counts
    pub fn failures(&self) -> (u64, u64) {
        (self.stats.frames_failed, self.stats.frames_ok)
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn multicast_level(&self) -> u8 {
        self.multicast_level
    }

    /// Listen for multicast addressed to a different level
    pub fn set_multicast_level(&mut self, level: u8) {
        self.multicast_level = level;
        if self.config.multicast && self.is_started() {
            self.radio.stop_listening();
            self.radio
                .open_reading_pipe(0, pipe_address(level_to_address(level), 0, true));
            self.radio.start_listening();
        }
    }

    pub fn multicast_relay(&self) -> bool {
        self.multicast_relay
    }

    pub fn set_multicast_relay(&mut self, relay: bool) {
        self.multicast_relay = relay;
    }

    pub fn tx_timeout(&self) -> Duration {
        self.tx_timeout
    }

    pub fn set_tx_timeout(&mut self, timeout: Duration) {
        self.tx_timeout = timeout;
    }

    pub fn route_timeout(&self) -> Duration {
        self.route_timeout
    }

    pub fn set_route_timeout(&mut self, timeout: Duration) {
        self.route_timeout = timeout;
    }

    fn send_message(
        &mut self,
        header: &mut NetworkHeader,
        payload: &[u8],
        via: Option<NodeAddress>,
    ) -> NetworkResult<()> {
        let position = self.position.ok_or(NetworkError::NotStarted)?;
        if payload.len() > self.config.max_payload_size {
            return Err(NetworkError::PayloadTooLarge {
                len: payload.len(),
                max: self.config.max_payload_size,
            });
        }
        if !self.is_valid_address(header.to_node) || header.to_node.is_multicast() {
            return Err(NetworkError::InvalidAddress(header.to_node));
        }

        header.from_node = position.address;
        header.id = self.allocate_id();

        if header.to_node == position.address {
            return if self.push_queue(Frame::new(*header, payload)) {
                Ok(())
            } else {
                Err(NetworkError::QueueFull)
            };
        }

        let (target, mode) = match via {
            None => (header.to_node, SendMode::Standard),
            Some(v) if v == header.to_node => (v, SendMode::DirectToHost),
            Some(v) => (v, SendMode::DirectToRoute),
        };

        let frames = fragment::split(header, payload)?;
        let fragmented = frames.len() > 1;
        if fragmented {
            tracing::debug!("sending {} as {} fragments", header, frames.len());
        }

        for frame in &frames {
            self.write_frame(frame, target, mode)?;
            if fragmented {
                self.stats.fragments_sent += 1;
            }
        }
        Ok(())
    }

    fn transmit(&mut self, bytes: &[u8], hop: NextHop) -> bool {
        let address = pipe_address(hop.node, hop.pipe, self.config.multicast);
        self.radio.stop_listening();
        self.radio.open_writing_pipe(address);
        let ok = self.radio.write(bytes, hop.no_ack, self.tx_timeout);
        self.radio.start_listening();
        ok
    }

    fn await_network_ack(&mut self, to_node: NodeAddress, hop: NextHop) -> NetworkResult<()> {
        let started = Instant::now();
        loop {
            if self.update()? == Some(MessageKind::ACK) {
                return Ok(());
            }
            if started.elapsed() > self.route_timeout {
                self.stats.frames_failed += 1;
                self.stats.route_ack_timeouts += 1;
                tracing::debug!(
                    "no network ACK from {} via {} on pipe {}",
                    to_node,
                    hop.node,
                    hop.pipe
                );
                return Err(NetworkError::RouteAckTimeout {
                    to: to_node,
                    timeout: self.route_timeout,
                });
            }
            thread::sleep(ACK_POLL_INTERVAL);
        }
    }

    fn enqueue(&mut self, frame: Frame) -> bool {
        let kind = frame.header.kind();
        if kind.is_fragment() {
            match self.reassembly.push(frame) {
                ReassemblyOutcome::Pending => true,
                ReassemblyOutcome::Complete(message) => {
                    self.stats.messages_reassembled += 1;
                    self.push_queue(message)
                }
                ReassemblyOutcome::Dropped(reason) => {
                    self.stats.reassembly_drops += 1;
                    tracing::debug!("fragment dropped: {:?}", reason);
                    false
                }
            }
        } else if let MessageKind::User(_) = kind {
            self.push_queue(frame)
        } else {
            tracing::debug!("ignoring system message {}", frame.header);
            false
        }
    }

    fn push_queue(&mut self, frame: Frame) -> bool {
        if self.queue.len() >= self.config.queue_capacity {
            self.stats.queue_overflows += 1;
            tracing::warn!("receive queue full, dropping {}", frame.header);
            return false;
        }
        self.stats.messages_queued += 1;
        self.queue.push_back(frame);
        true
    }

    fn allocate_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }
}
