//! Simulated radio medium
//!
//! `SimAir` is a shared in-memory "ether" that any number of `SimRadio`
//! handles attach to. A write is delivered to every other powered radio
//! that is tuned to the same channel, has started listening, and has a
//! reading pipe open on the destination address.
//!
//! It models the parts of nRF24L01 behaviour the network layer relies on:
//!
//! - **RX FIFO**: three frames deep by default; a full FIFO refuses frames
//! - **Auto-ACK**: an acknowledged write succeeds only if some radio took
//!   the frame; a no-ACK write always reports success
//! - **Loss**: an optional, seeded per-transmission drop probability
//! - **Power**: radios can be switched off to model node failure
//!
//! Transmissions are instantaneous and happen under the air lock, so a
//! radio never misses a frame because its owner was between a write and
//! `start_listening`. `stop_listening` is therefore recorded but does not
//! mute reception. Handles are `Send`, so each node can run in its own
//! thread.
//!
//! ## Example
//!
//! ```rust
//! use rfnet_core::network::{Radio, SimAir};
//! use std::time::Duration;
//!
//! let air = SimAir::new();
//! let mut tx = air.radio();
//! let mut rx = air.radio();
//!
//! rx.open_reading_pipe(1, 0xCC_CCCC_CC3C);
//! rx.start_listening();
//!
//! tx.open_writing_pipe(0xCC_CCCC_CC3C);
//! assert!(tx.write(b"ping", false, Duration::from_millis(30)));
//! assert_eq!(rx.read().unwrap(), b"ping");
//! ```

use super::config::MAX_CHANNEL;
use super::traits::{CrcLength, DataRate, NetworkError, NetworkResult, PaLevel, Radio, RadioDetails};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// RX FIFO depth of the real transceiver
pub const DEFAULT_FIFO_DEPTH: usize = 3;

const DEFAULT_SEED: u64 = 42;

/// Medium-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirStats {
    /// Writes attempted by any radio
    pub transmissions: u64,
    /// Frames placed in some radio's RX FIFO
    pub deliveries: u64,
    /// Writes no radio picked up
    pub unheard: u64,
    /// Frames refused because a FIFO was full
    pub fifo_overflows: u64,
    /// Writes dropped by loss injection
    pub lost: u64,
}

#[derive(Debug)]
struct Slot {
    channel: u8,
    powered: bool,
    rx_enabled: bool,
    reading_pipes: [Option<u64>; 6],
    fifo: VecDeque<Vec<u8>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            channel: 76,
            powered: true,
            rx_enabled: false,
            reading_pipes: [None; 6],
            fifo: VecDeque::new(),
        }
    }
}

#[derive(Debug)]
struct AirState {
    slots: Vec<Slot>,
    fifo_depth: usize,
    drop_rate: f64,
    rng: StdRng,
    stats: AirStats,
}

/// Shared simulated medium
#[derive(Debug, Clone)]
pub struct SimAir {
    state: Arc<Mutex<AirState>>,
}

impl Default for SimAir {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAir {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AirState {
                slots: Vec::new(),
                fifo_depth: DEFAULT_FIFO_DEPTH,
                drop_rate: 0.0,
                rng: StdRng::seed_from_u64(DEFAULT_SEED),
                stats: AirStats::default(),
            })),
        }
    }

    /// Builder: set the RX FIFO depth of every radio
    pub fn with_fifo_depth(self, depth: usize) -> Self {
        self.lock().fifo_depth = depth.max(1);
        self
    }

    /// Builder: reseed the loss generator
    pub fn with_seed(self, seed: u64) -> Self {
        self.lock().rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Builder: set the loss probability
    pub fn with_drop_rate(self, rate: f64) -> Self {
        self.set_drop_rate(rate);
        self
    }

    /// Probability (0.0-1.0) that a transmission is lost
    pub fn set_drop_rate(&self, rate: f64) {
        self.lock().drop_rate = rate.clamp(0.0, 1.0);
    }

    /// Attach a new radio to the medium
    pub fn radio(&self) -> SimRadio {
        let id = {
            let mut state = self.lock();
            state.slots.push(Slot::new());
            state.slots.len() - 1
        };
        SimRadio {
            air: self.clone(),
            id,
            data_rate: DataRate::default(),
            crc_length: CrcLength::default(),
            pa_level: PaLevel::default(),
            retries: (5, 15),
            dynamic_payloads: false,
            dynamic_ack: false,
            listening: false,
            writing_pipe: None,
        }
    }

    /// Switch a radio on or off; switching off empties its FIFO
    pub fn set_powered(&self, id: usize, powered: bool) {
        let mut state = self.lock();
        if let Some(slot) = state.slots.get_mut(id) {
            slot.powered = powered;
            if !powered {
                slot.fifo.clear();
            }
        }
    }

    pub fn radio_count(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn stats(&self) -> AirStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, AirState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_slot<T>(&self, id: usize, f: impl FnOnce(&mut Slot) -> T) -> Option<T> {
        self.lock().slots.get_mut(id).map(f)
    }

    fn transmit(&self, from: usize, address: u64, frame: &[u8], no_ack: bool) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.stats.transmissions += 1;

        let channel = match state.slots.get(from) {
            Some(sender) if sender.powered => sender.channel,
            _ => return false,
        };

        if state.drop_rate > 0.0 && state.rng.gen_bool(state.drop_rate) {
            state.stats.lost += 1;
            return no_ack;
        }

        let depth = state.fifo_depth;
        let mut heard = 0;
        for (i, slot) in state.slots.iter_mut().enumerate() {
            if i == from || !slot.powered || !slot.rx_enabled || slot.channel != channel {
                continue;
            }
            if !slot.reading_pipes.contains(&Some(address)) {
                continue;
            }
            if slot.fifo.len() >= depth {
                state.stats.fifo_overflows += 1;
                continue;
            }
            slot.fifo.push_back(frame.to_vec());
            heard += 1;
        }

        state.stats.deliveries += heard;
        if heard == 0 {
            state.stats.unheard += 1;
        }
        heard > 0 || no_ack
    }
}

/// A radio attached to a `SimAir`
#[derive(Debug)]
pub struct SimRadio {
    air: SimAir,
    id: usize,
    data_rate: DataRate,
    crc_length: CrcLength,
    pa_level: PaLevel,
    retries: (u8, u8),
    dynamic_payloads: bool,
    dynamic_ack: bool,
    listening: bool,
    writing_pipe: Option<u64>,
}

impl SimRadio {
    /// Index of this radio on its medium
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn air(&self) -> &SimAir {
        &self.air
    }

    /// Frames waiting in the RX FIFO
    pub fn pending(&self) -> usize {
        self.air.with_slot(self.id, |slot| slot.fifo.len()).unwrap_or(0)
    }
}

impl Radio for SimRadio {
    fn begin(&mut self) -> NetworkResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(NetworkError::RadioUnavailable)
        }
    }

    fn is_valid(&self) -> bool {
        self.air.with_slot(self.id, |slot| slot.powered).unwrap_or(false)
    }

    fn set_channel(&mut self, channel: u8) -> NetworkResult<()> {
        if channel > MAX_CHANNEL {
            return Err(NetworkError::Radio(format!("channel {} out of range", channel)));
        }
        self.air.with_slot(self.id, |slot| slot.channel = channel);
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.air.with_slot(self.id, |slot| slot.channel).unwrap_or(0)
    }

    fn set_data_rate(&mut self, rate: DataRate) {
        self.data_rate = rate;
    }

    fn set_crc_length(&mut self, length: CrcLength) {
        self.crc_length = length;
    }

    fn set_retries(&mut self, delay: u8, count: u8) {
        self.retries = (delay.min(15), count.min(15));
    }

    fn set_pa_level(&mut self, level: PaLevel) {
        self.pa_level = level;
    }

    fn enable_dynamic_payloads(&mut self) {
        self.dynamic_payloads = true;
    }

    fn enable_dynamic_ack(&mut self) {
        self.dynamic_ack = true;
    }

    fn open_reading_pipe(&mut self, pipe: u8, address: u64) {
        let index = usize::from(pipe);
        if index < 6 {
            self.air.with_slot(self.id, |slot| slot.reading_pipes[index] = Some(address));
        }
    }

    fn open_writing_pipe(&mut self, address: u64) {
        self.writing_pipe = Some(address);
    }

    fn start_listening(&mut self) {
        self.listening = true;
        self.air.with_slot(self.id, |slot| slot.rx_enabled = true);
    }

    fn stop_listening(&mut self) {
        self.listening = false;
    }

    fn available(&self) -> bool {
        self.air
            .with_slot(self.id, |slot| slot.powered && !slot.fifo.is_empty())
            .unwrap_or(false)
    }

    fn read(&mut self) -> Option<Vec<u8>> {
        self.air.with_slot(self.id, |slot| slot.fifo.pop_front()).flatten()
    }

    fn write(&mut self, frame: &[u8], no_ack: bool, _timeout: Duration) -> bool {
        let Some(address) = self.writing_pipe else {
            return false;
        };
        // Without dynamic ACK the hardware always waits for an ACK
        let no_ack = no_ack && self.dynamic_ack;
        self.air.transmit(self.id, address, frame, no_ack)
    }

    fn details(&self) -> RadioDetails {
        let (channel, reading_pipes) = self
            .air
            .with_slot(self.id, |slot| (slot.channel, slot.reading_pipes))
            .unwrap_or((0, [None; 6]));
        RadioDetails {
            channel,
            data_rate: self.data_rate,
            crc_length: self.crc_length,
            pa_level: self.pa_level,
            retries: self.retries,
            dynamic_payloads: self.dynamic_payloads,
            dynamic_ack: self.dynamic_ack,
            listening: self.listening,
            reading_pipes,
            writing_pipe: self.writing_pipe,
        }
    }
}

impl Drop for SimRadio {
    fn drop(&mut self) {
        self.air.set_powered(self.id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_A: u64 = 0xCC_CCCC_CC3C;
    const ADDR_B: u64 = 0xCC_CCCC_CC33;
    const TIMEOUT: Duration = Duration::from_millis(30);

    fn listener(air: &SimAir, address: u64) -> SimRadio {
        let mut radio = air.radio();
        radio.open_reading_pipe(1, address);
        radio.start_listening();
        radio
    }

    #[test]
    fn test_acked_delivery() {
        let air = SimAir::new();
        let mut tx = air.radio();
        let mut rx = listener(&air, ADDR_A);

        tx.open_writing_pipe(ADDR_A);
        assert!(tx.write(&[1, 2, 3], false, TIMEOUT));
        assert!(rx.available());
        assert_eq!(rx.read(), Some(vec![1, 2, 3]));
        assert!(!rx.available());
        assert_eq!(air.stats().deliveries, 1);
    }

    #[test]
    fn test_unheard_write_fails_unless_no_ack() {
        let air = SimAir::new();
        let mut tx = air.radio();
        tx.enable_dynamic_ack();
        let _rx = listener(&air, ADDR_B);

        tx.open_writing_pipe(ADDR_A);
        assert!(!tx.write(&[1], false, TIMEOUT));
        assert!(tx.write(&[1], true, TIMEOUT));
        assert_eq!(air.stats().unheard, 2);
    }

    #[test]
    fn test_no_ack_needs_dynamic_ack() {
        let air = SimAir::new();
        let mut tx = air.radio();
        tx.open_writing_pipe(ADDR_A);
        assert!(!tx.write(&[1], true, TIMEOUT));
    }

    #[test]
    fn test_fifo_overflow() {
        let air = SimAir::new();
        let mut tx = air.radio();
        let rx = listener(&air, ADDR_A);

        tx.open_writing_pipe(ADDR_A);
        for i in 0..DEFAULT_FIFO_DEPTH {
            assert!(tx.write(&[i as u8], false, TIMEOUT));
        }
        assert!(!tx.write(&[9], false, TIMEOUT));
        assert_eq!(rx.pending(), DEFAULT_FIFO_DEPTH);
        assert_eq!(air.stats().fifo_overflows, 1);
    }

    #[test]
    fn test_channel_and_listening_gate_reception() {
        let air = SimAir::new();
        let mut tx = air.radio();
        let mut rx = listener(&air, ADDR_A);
        let mut idle = air.radio();
        idle.open_reading_pipe(2, ADDR_A);

        tx.set_channel(90).unwrap();
        tx.open_writing_pipe(ADDR_A);
        assert!(!tx.write(&[1], false, TIMEOUT));

        rx.set_channel(90).unwrap();
        assert!(tx.write(&[1], false, TIMEOUT));
        assert!(idle.read().is_none());
        assert!(tx.set_channel(126).is_err());
    }

    #[test]
    fn test_multicast_reaches_all_listeners() {
        let air = SimAir::new();
        let mut tx = air.radio();
        tx.enable_dynamic_ack();
        let mut a = listener(&air, ADDR_A);
        let mut b = listener(&air, ADDR_A);

        tx.open_writing_pipe(ADDR_A);
        assert!(tx.write(b"all", true, TIMEOUT));
        assert_eq!(a.read().unwrap(), b"all");
        assert_eq!(b.read().unwrap(), b"all");
    }

    #[test]
    fn test_power_off() {
        let air = SimAir::new();
        let mut tx = air.radio();
        let rx = listener(&air, ADDR_A);
        tx.open_writing_pipe(ADDR_A);

        air.set_powered(rx.id(), false);
        assert!(!rx.is_valid());
        assert!(!tx.write(&[1], false, TIMEOUT));

        air.set_powered(rx.id(), true);
        assert!(tx.write(&[1], false, TIMEOUT));

        drop(rx);
        assert!(!tx.write(&[1], false, TIMEOUT));
    }

    #[test]
    fn test_drop_rate() {
        let air = SimAir::new().with_seed(7).with_drop_rate(1.0);
        let mut tx = air.radio();
        let _rx = listener(&air, ADDR_A);
        tx.open_writing_pipe(ADDR_A);

        assert!(!tx.write(&[1], false, TIMEOUT));
        assert_eq!(air.stats().lost, 1);

        air.set_drop_rate(0.0);
        assert!(tx.write(&[1], false, TIMEOUT));
    }

    #[test]
    fn test_details() {
        let air = SimAir::new();
        let mut radio = air.radio();
        radio.set_channel(90).unwrap();
        radio.set_retries(20, 5);
        radio.open_reading_pipe(0, ADDR_A);
        let details = radio.details();
        assert_eq!(details.channel, 90);
        assert_eq!(details.retries, (15, 5));
        assert_eq!(details.reading_pipes[0], Some(ADDR_A));
        assert!(!details.listening);
    }
}
