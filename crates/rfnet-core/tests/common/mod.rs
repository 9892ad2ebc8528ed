//! Shared helpers for network integration tests.

#![allow(dead_code)]

use rfnet_core::network::{Network, NetworkConfig, NodeAddress, SimAir, SimRadio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Generous route timeout so loaded CI machines don't time out relays
pub const ROUTE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn addr(raw: u16) -> NodeAddress {
    NodeAddress::new(raw)
}

pub fn config() -> NetworkConfig {
    NetworkConfig::default().with_route_timeout(ROUTE_TIMEOUT)
}

/// A started node on channel 90
pub fn node(air: &SimAir, address: u16) -> Network<SimRadio> {
    node_with(air, address, config())
}

pub fn node_with(air: &SimAir, address: u16, config: NetworkConfig) -> Network<SimRadio> {
    let mut net = Network::new(air.radio(), config);
    net.begin(90, addr(address)).expect("begin failed");
    net
}

/// A node polling `update()` on its own thread
pub struct NodeThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Network<SimRadio>>,
}

impl NodeThread {
    pub fn spawn(mut net: Network<SimRadio>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                net.update().expect("update failed");
                thread::sleep(Duration::from_micros(200));
            }
            // Final drain so nothing in flight is left in the FIFO
            net.update().expect("update failed");
            net
        });
        Self { stop, handle }
    }

    /// Stop polling and hand the node back
    pub fn stop(self) -> Network<SimRadio> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().expect("node thread panicked")
    }
}
