//! Fragmentation and reassembly
//!
//! Messages longer than one frame payload are sent as a train of frames
//! sharing the original header's `from_node`, `to_node` and `id`:
//!
//! ```text
//! 100-byte message, type 65:
//!
//!   FIRST  reserved=5   bytes   0..24
//!   MORE   reserved=4   bytes  24..48
//!   MORE   reserved=3   bytes  48..72
//!   MORE   reserved=2   bytes  72..96
//!   LAST   reserved=65  bytes  96..100
//! ```
//!
//! The reserved byte counts down the fragments still to come, except on
//! the last fragment where it carries the application's message type.
//! Receivers key partial messages by `(from_node, id)` and reject any
//! fragment that arrives out of sequence.

use super::address::NodeAddress;
use super::packet::{Frame, MessageKind, NetworkHeader, MAX_FRAME_PAYLOAD};
use super::traits::{NetworkError, NetworkResult};
use std::collections::{HashMap, VecDeque};

/// Number of frames needed for a payload of `len` bytes
pub fn fragment_count(len: usize) -> usize {
    if len == 0 {
        1
    } else {
        1 + (len - 1) / MAX_FRAME_PAYLOAD
    }
}

/// Split a long payload into fragment frames, in transmit order
///
/// Payloads that fit in one frame come back as a single unmodified frame.
pub fn split(header: &NetworkHeader, payload: &[u8]) -> NetworkResult<Vec<Frame>> {
    if payload.len() <= MAX_FRAME_PAYLOAD {
        return Ok(vec![Frame::new(*header, payload)]);
    }

    let total = fragment_count(payload.len());
    let total = u8::try_from(total).map_err(|_| NetworkError::TooManyFragments(total))?;

    let frames = payload
        .chunks(MAX_FRAME_PAYLOAD)
        .enumerate()
        .map(|(i, chunk)| {
            // Remaining fragments including this one
            let remaining = total - i as u8;
            let mut fragment_header = *header;
            if remaining == 1 {
                fragment_header.msg_type = MessageKind::LAST_FRAGMENT;
                fragment_header.reserved = header.msg_type;
            } else {
                fragment_header.msg_type = if i == 0 {
                    MessageKind::FIRST_FRAGMENT
                } else {
                    MessageKind::MORE_FRAGMENTS
                };
                fragment_header.reserved = remaining;
            }
            Frame::new(fragment_header, chunk)
        })
        .collect();

    Ok(frames)
}

/// Why a fragment was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A middle or last fragment arrived with no message in progress
    MissingFirst,
    /// Fragment counter did not match the next expected one
    OutOfSequence { expected: u8, got: u8 },
    /// Reassembled message would exceed the size limit
    TooLarge,
    /// Fragment header is not usable
    Malformed,
}

/// Result of feeding one fragment to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// More fragments are needed
    Pending,
    /// The message is whole; the header carries the application type
    Complete(Frame),
    /// The fragment was rejected, and any partial message with it
    Dropped(DropReason),
}

#[derive(Debug)]
struct PartialMessage {
    header: NetworkHeader,
    payload: Vec<u8>,
    /// Counter value the next fragment must carry
    expected: u8,
}

/// Bounded cache of messages under reassembly
///
/// When full, starting a new message evicts the oldest partial one.
#[derive(Debug)]
pub struct ReassemblyCache {
    entries: HashMap<(NodeAddress, u16), PartialMessage>,
    order: VecDeque<(NodeAddress, u16)>,
    max_entries: usize,
    max_payload: usize,
}

impl ReassemblyCache {
    pub fn new(max_entries: usize, max_payload: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries: max_entries.max(1),
            max_payload,
        }
    }

    /// Messages currently in progress
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Feed one received fragment
    pub fn push(&mut self, frame: Frame) -> ReassemblyOutcome {
        let key = (frame.header.from_node, frame.header.id);

        match frame.header.kind() {
            MessageKind::FirstFragment => {
                if frame.header.reserved < 2 {
                    return ReassemblyOutcome::Dropped(DropReason::Malformed);
                }
                if frame.payload.len() > self.max_payload {
                    return ReassemblyOutcome::Dropped(DropReason::TooLarge);
                }
                // A new first fragment restarts the message
                self.remove(&key);
                self.make_room();
                self.order.push_back(key);
                self.entries.insert(
                    key,
                    PartialMessage {
                        header: frame.header,
                        expected: frame.header.reserved - 1,
                        payload: frame.payload,
                    },
                );
                ReassemblyOutcome::Pending
            }
            MessageKind::MoreFragments => {
                if frame.header.reserved < 2 {
                    self.remove(&key);
                    return ReassemblyOutcome::Dropped(DropReason::Malformed);
                }
                match self.append(&key, frame.header.reserved, &frame.payload) {
                    Ok(()) => ReassemblyOutcome::Pending,
                    Err(reason) => ReassemblyOutcome::Dropped(reason),
                }
            }
            MessageKind::LastFragment => {
                if let Err(reason) = self.append(&key, 1, &frame.payload) {
                    return ReassemblyOutcome::Dropped(reason);
                }
                match self.remove(&key) {
                    Some(partial) => {
                        let mut header = partial.header;
                        header.msg_type = frame.header.reserved;
                        header.reserved = 0;
                        ReassemblyOutcome::Complete(Frame {
                            header,
                            payload: partial.payload,
                        })
                    }
                    None => ReassemblyOutcome::Dropped(DropReason::MissingFirst),
                }
            }
            _ => ReassemblyOutcome::Dropped(DropReason::Malformed),
        }
    }

    fn append(&mut self, key: &(NodeAddress, u16), counter: u8, chunk: &[u8]) -> Result<(), DropReason> {
        let Some(partial) = self.entries.get_mut(key) else {
            return Err(DropReason::MissingFirst);
        };

        if counter != partial.expected {
            let expected = partial.expected;
            self.remove(key);
            return Err(DropReason::OutOfSequence { expected, got: counter });
        }
        if partial.payload.len() + chunk.len() > self.max_payload {
            self.remove(key);
            return Err(DropReason::TooLarge);
        }

        partial.payload.extend_from_slice(chunk);
        partial.expected -= 1;
        Ok(())
    }

    fn remove(&mut self, key: &(NodeAddress, u16)) -> Option<PartialMessage> {
        let partial = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(partial)
    }

    fn make_room(&mut self) {
        while self.entries.len() >= self.max_entries {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                tracing::debug!(
                    "evicting partial message id {} from {}",
                    oldest.1,
                    oldest.0
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::packet::MAX_PAYLOAD_SIZE;

    fn header(from: u16, id: u16) -> NetworkHeader {
        let mut h = NetworkHeader::new(NodeAddress::MASTER, 65);
        h.from_node = NodeAddress::new(from);
        h.id = id;
        h
    }

    fn message(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn test_fragment_count() {
        assert_eq!(fragment_count(0), 1);
        assert_eq!(fragment_count(24), 1);
        assert_eq!(fragment_count(25), 2);
        assert_eq!(fragment_count(100), 5);
        assert_eq!(fragment_count(144), 6);
    }

    #[test]
    fn test_split_headers() {
        let frames = split(&header(0o1, 7), &message(100)).unwrap();
        assert_eq!(frames.len(), 5);

        let types: Vec<u8> = frames.iter().map(|f| f.header.msg_type).collect();
        assert_eq!(types, vec![148, 149, 149, 149, 150]);

        let reserved: Vec<u8> = frames.iter().map(|f| f.header.reserved).collect();
        assert_eq!(reserved, vec![5, 4, 3, 2, 65]);

        let sizes: Vec<usize> = frames.iter().map(|f| f.payload.len()).collect();
        assert_eq!(sizes, vec![24, 24, 24, 24, 4]);
        assert!(frames.iter().all(|f| f.header.id == 7));
    }

    #[test]
    fn test_split_small_payload_untouched() {
        let h = header(0o1, 1);
        let frames = split(&h, b"short").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header, h);
    }

    #[test]
    fn test_split_too_many_fragments() {
        let result = split(&header(0o1, 1), &vec![0u8; 256 * MAX_FRAME_PAYLOAD]);
        assert!(matches!(result, Err(NetworkError::TooManyFragments(256))));
    }

    #[test]
    fn test_reassemble_in_order() {
        let payload = message(100);
        let mut cache = ReassemblyCache::new(4, MAX_PAYLOAD_SIZE);
        let frames = split(&header(0o1, 9), &payload).unwrap();
        let last = frames.len() - 1;

        for (i, frame) in frames.into_iter().enumerate() {
            match cache.push(frame) {
                ReassemblyOutcome::Pending => assert!(i < last),
                ReassemblyOutcome::Complete(done) => {
                    assert_eq!(i, last);
                    assert_eq!(done.payload, payload);
                    assert_eq!(done.header.msg_type, 65);
                    assert_eq!(done.header.reserved, 0);
                    assert_eq!(done.header.id, 9);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_fragment_clears_message() {
        let mut cache = ReassemblyCache::new(4, MAX_PAYLOAD_SIZE);
        let mut frames = split(&header(0o1, 3), &message(100)).unwrap();
        frames.remove(2);

        assert_eq!(cache.push(frames.remove(0)), ReassemblyOutcome::Pending);
        assert_eq!(cache.push(frames.remove(0)), ReassemblyOutcome::Pending);
        assert_eq!(
            cache.push(frames.remove(0)),
            ReassemblyOutcome::Dropped(DropReason::OutOfSequence { expected: 3, got: 2 })
        );
        assert!(cache.is_empty());
        assert_eq!(
            cache.push(frames.remove(0)),
            ReassemblyOutcome::Dropped(DropReason::MissingFirst)
        );
    }

    #[test]
    fn test_last_without_first_dropped() {
        let mut cache = ReassemblyCache::new(4, MAX_PAYLOAD_SIZE);
        let frames = split(&header(0o2, 4), &message(30)).unwrap();
        let last = frames[1].clone();
        assert_eq!(
            cache.push(last),
            ReassemblyOutcome::Dropped(DropReason::MissingFirst)
        );
    }

    #[test]
    fn test_interleaved_senders() {
        let mut cache = ReassemblyCache::new(4, MAX_PAYLOAD_SIZE);
        let a = split(&header(0o1, 1), &message(48)).unwrap();
        let b = split(&header(0o2, 1), &[7u8; 40]).unwrap();

        assert_eq!(cache.push(a[0].clone()), ReassemblyOutcome::Pending);
        assert_eq!(cache.push(b[0].clone()), ReassemblyOutcome::Pending);
        assert_eq!(cache.len(), 2);

        match cache.push(b[1].clone()) {
            ReassemblyOutcome::Complete(f) => assert_eq!(f.payload, vec![7u8; 40]),
            other => panic!("unexpected outcome {:?}", other),
        }
        match cache.push(a[1].clone()) {
            ReassemblyOutcome::Complete(f) => assert_eq!(f.payload, message(48)),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_size_limit_enforced() {
        let mut cache = ReassemblyCache::new(4, 40);
        let frames = split(&header(0o1, 5), &message(72)).unwrap();
        assert_eq!(cache.push(frames[0].clone()), ReassemblyOutcome::Pending);
        assert_eq!(
            cache.push(frames[1].clone()),
            ReassemblyOutcome::Dropped(DropReason::TooLarge)
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_oldest_entry_evicted() {
        let mut cache = ReassemblyCache::new(2, MAX_PAYLOAD_SIZE);
        let first: Vec<Frame> = (1..=3)
            .map(|id| split(&header(0o1, id), &message(30)).unwrap().remove(0))
            .collect();
        for frame in first {
            assert_eq!(cache.push(frame), ReassemblyOutcome::Pending);
        }
        assert_eq!(cache.len(), 2);

        // id 1 was evicted, so its last fragment has nothing to join
        let tail = split(&header(0o1, 1), &message(30)).unwrap().remove(1);
        assert_eq!(
            cache.push(tail),
            ReassemblyOutcome::Dropped(DropReason::MissingFirst)
        );
    }
}
