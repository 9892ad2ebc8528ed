//! Integration tests for traffic between neighbouring nodes.
//!
//! Everything here runs on one thread: a frame for a parent or child lands
//! in the receiver's FIFO immediately, and the receiver picks it up on its
//! next `update()`.

mod common;

use common::{addr, init_logging, node, node_with};
use rfnet_core::network::{
    pipe_address, MessageKind, NetworkConfig, NetworkError, NetworkHeader, NodeAddress, Radio,
    SimAir,
};
use std::time::Duration;

const TX_TIMEOUT: Duration = Duration::from_millis(30);

#[test]
fn test_child_to_master() {
    init_logging();
    let air = SimAir::new();
    let mut master = node(&air, 0o0);
    let mut child = node(&air, 0o3);

    let mut header = NetworkHeader::new(NodeAddress::MASTER, b'T');
    child.write(&mut header, b"temperature=21").expect("write failed");

    assert!(!master.available());
    assert_eq!(master.update().unwrap(), None);
    assert!(master.available());

    let (header, payload) = master.read(144).expect("no message");
    assert_eq!(header.from_node, addr(0o3));
    assert_eq!(header.to_node, NodeAddress::MASTER);
    assert_eq!(header.msg_type, b'T');
    assert_eq!(header.id, 1);
    assert_eq!(payload, b"temperature=21");
    assert_eq!(child.failures(), (0, 1));
}

#[test]
fn test_master_to_child() {
    let air = SimAir::new();
    let mut master = node(&air, 0o0);
    let mut child = node(&air, 0o5);

    let mut header = NetworkHeader::new(addr(0o5), 1);
    master.write(&mut header, &[1, 2, 3, 4]).expect("write failed");

    child.update().unwrap();
    let (header, payload) = child.read(144).expect("no message");
    assert_eq!(header.from_node, NodeAddress::MASTER);
    assert_eq!(payload, vec![1, 2, 3, 4]);
}

#[test]
fn test_fifth_child_reaches_parent() {
    let air = SimAir::new();
    let mut parent = node(&air, 0o1);
    let mut child = node(&air, 0o51);
    // A same-level node must not overhear the child's traffic
    let mut bystander = node(&air, 0o2);

    let mut header = NetworkHeader::new(addr(0o1), 9);
    child.write(&mut header, b"hi").expect("write failed");

    parent.update().unwrap();
    bystander.update().unwrap();
    assert!(parent.available());
    assert!(!bystander.available());
}

#[test]
fn test_fragmented_message_single_hop() {
    let air = SimAir::new().with_fifo_depth(8);
    let mut master = node(&air, 0o0);
    let mut child = node(&air, 0o2);

    let payload: Vec<u8> = (0..100u8).collect();
    let mut header = NetworkHeader::new(NodeAddress::MASTER, 65);
    child.write(&mut header, &payload).expect("write failed");
    assert_eq!(child.stats().fragments_sent, 5);

    master.update().unwrap();
    let (header, received) = master.read(144).expect("no message");
    assert_eq!(header.msg_type, 65);
    assert_eq!(header.from_node, addr(0o2));
    assert_eq!(received, payload);
    assert_eq!(master.stats().messages_reassembled, 1);
    assert!(!master.available());
}

#[test]
fn test_max_size_message() {
    let air = SimAir::new().with_fifo_depth(8);
    let mut master = node(&air, 0o0);
    let mut child = node(&air, 0o4);

    let payload = vec![0x5Au8; 144];
    let mut header = NetworkHeader::new(NodeAddress::MASTER, 2);
    child.write(&mut header, &payload).expect("write failed");

    master.update().unwrap();
    let (_, received) = master.read(144).expect("no message");
    assert_eq!(received.len(), 144);
}

#[test]
fn test_fragments_lost_when_fifo_fills() {
    // Default three-deep FIFO and a receiver that never polls
    let air = SimAir::new();
    let _master = node(&air, 0o0);
    let mut child = node(&air, 0o2);

    let mut header = NetworkHeader::new(NodeAddress::MASTER, 65);
    let result = child.write(&mut header, &[7u8; 100]);
    assert!(matches!(result, Err(NetworkError::TransmitFailed { .. })));
    assert_eq!(child.failures(), (1, 3));
    assert_eq!(air.stats().fifo_overflows, 1);
}

#[test]
fn test_powered_off_child() {
    let air = SimAir::new();
    let mut master = node(&air, 0o0);
    let child = node(&air, 0o1);
    air.set_powered(child.radio().id(), false);

    let mut header = NetworkHeader::new(addr(0o1), 1);
    let err = master.write(&mut header, b"anyone?").unwrap_err();
    match err {
        NetworkError::TransmitFailed { to, via } => {
            assert_eq!(to, addr(0o1));
            assert_eq!(via, addr(0o1));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(master.failures(), (1, 0));
}

#[test]
fn test_route_ack_timeout_then_late_delivery() {
    let air = SimAir::new();
    let mut master = node(&air, 0o0);
    let mut relay = node(&air, 0o1);
    let config = NetworkConfig::default().with_route_timeout(Duration::from_millis(20));
    let mut leaf = node_with(&air, 0o11, config);

    // The relay is not polling, so no network ACK can come back
    let mut header = NetworkHeader::new(NodeAddress::MASTER, 70);
    let err = leaf.write(&mut header, b"slow").unwrap_err();
    assert!(matches!(err, NetworkError::RouteAckTimeout { .. }));
    assert_eq!(leaf.stats().route_ack_timeouts, 1);
    assert_eq!(leaf.failures(), (1, 0));

    // The frame is still sitting at the relay
    relay.update().unwrap();
    assert_eq!(relay.stats().frames_relayed, 1);
    assert_eq!(relay.stats().network_acks_sent, 1);

    master.update().unwrap();
    let (header, payload) = master.read(144).expect("no message");
    assert_eq!(header.from_node, addr(0o11));
    assert_eq!(payload, b"slow");

    assert_eq!(leaf.update().unwrap(), Some(MessageKind::ACK));
}

#[test]
fn test_write_direct_to_host() {
    let air = SimAir::new();
    let mut parent = node(&air, 0o1);
    let mut leaf = node(&air, 0o11);

    let mut header = NetworkHeader::new(addr(0o1), 3);
    leaf.write_direct(&mut header, b"direct", addr(0o1)).expect("write failed");

    parent.update().unwrap();
    let (header, payload) = parent.read(144).expect("no message");
    assert_eq!(header.from_node, addr(0o11));
    assert_eq!(payload, b"direct");
}

#[test]
fn test_invalid_frames_dropped() {
    let air = SimAir::new();
    let mut master = node(&air, 0o0);
    let mut raw = air.radio();
    raw.set_channel(90).unwrap();
    raw.open_writing_pipe(pipe_address(NodeAddress::MASTER, 1, true));

    // Too short for a header
    assert!(raw.write(&[1, 2, 3], false, TX_TIMEOUT));

    // Destination with a bad digit
    let bad = NetworkHeader::new(addr(0o7), 1);
    assert!(raw.write(&bad.to_bytes(), false, TX_TIMEOUT));

    // Network-layer type nobody handles
    let mut ping = NetworkHeader::new(NodeAddress::MASTER, 0);
    ping.msg_type = MessageKind::PING;
    assert!(raw.write(&ping.to_bytes(), false, TX_TIMEOUT));

    master.update().unwrap();
    assert!(!master.available());
    assert_eq!(master.stats().frames_received, 3);
    assert_eq!(master.stats().frames_invalid, 2);
}

#[test]
fn test_orphan_fragment_dropped() {
    let air = SimAir::new();
    let mut master = node(&air, 0o0);
    let mut raw = air.radio();
    raw.set_channel(90).unwrap();
    raw.open_writing_pipe(pipe_address(NodeAddress::MASTER, 2, true));

    let mut last = NetworkHeader::new(NodeAddress::MASTER, 0);
    last.from_node = addr(0o2);
    last.id = 40;
    last.msg_type = MessageKind::LAST_FRAGMENT;
    last.reserved = 65;
    let mut frame = last.to_bytes().to_vec();
    frame.extend_from_slice(b"tail");
    assert!(raw.write(&frame, false, TX_TIMEOUT));

    master.update().unwrap();
    assert!(!master.available());
    assert_eq!(master.stats().reassembly_drops, 1);
}

#[test]
fn test_zero_digit_destination_not_forwarded() {
    let air = SimAir::new();
    let mut master = node(&air, 0o0);
    let mut raw = air.radio();
    raw.set_channel(90).unwrap();
    raw.open_writing_pipe(pipe_address(NodeAddress::MASTER, 1, true));

    let mut header = NetworkHeader::new(addr(0o10), 1);
    header.from_node = addr(0o1);
    header.id = 9;
    assert!(raw.write(&header.to_bytes(), false, TX_TIMEOUT));
    let sent_before = air.stats().transmissions;

    master.update().unwrap();
    assert!(!master.available());
    assert_eq!(master.stats().frames_invalid, 1);
    assert_eq!(master.stats().frames_relayed, 0);
    assert_eq!(master.failures(), (0, 0));
    assert_eq!(air.stats().transmissions, sent_before);
}
