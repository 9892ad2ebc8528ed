//! rfnet Command-Line Interface
//!
//! This CLI provides tools for:
//! - Inspecting tree addresses and their radio pipe addresses
//! - Running the classic hello-world sender/receiver pair over a
//!   simulated network
//! - Simulating whole networks with random traffic and reporting
//!   delivery statistics
//! - Showing the network configuration and radio setup

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rfnet_core::network::{
    pipe_address, AirStats, Network, NetworkConfig, NetworkHeader, NetworkStats, NodeAddress,
    Radio, SendMode, SimAir, SimRadio, TreePosition,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Message type used by the hello and simulate commands
const MSG_TYPE_DATA: u8 = b'D';

/// Message type used for multicast announcements
const MSG_TYPE_ANNOUNCE: u8 = b'A';

/// Pause between `update()` calls in node threads
const POLL_INTERVAL: Duration = Duration::from_micros(500);

#[derive(Parser)]
#[command(name = "rfnet")]
#[command(author, version, about = "RF tree network tools", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Explain a node address: tree position and pipe addresses
    Address {
        /// Node address in octal (e.g. 011)
        address: String,

        /// Show the route from this node to another one
        #[arg(long)]
        route_to: Option<String>,

        /// Compute pipe addresses with multicast disabled
        #[arg(long)]
        no_multicast: bool,
    },

    /// Send counter payloads from one node to another over a simulated tree
    Hello {
        /// Sending node (octal)
        #[arg(long, default_value = "01")]
        from: String,

        /// Receiving node (octal)
        #[arg(long, default_value = "00")]
        to: String,

        /// Number of payloads to send
        #[arg(short, long, default_value = "5")]
        count: u32,

        /// Delay between payloads in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Network configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Simulate a network with random traffic between nodes
    Simulate {
        /// Comma-separated node addresses (octal)
        #[arg(long, default_value = "00,01,02,011,021,012")]
        nodes: String,

        /// Messages each node sends
        #[arg(short, long, default_value = "10")]
        messages: usize,

        /// Payload size in bytes (larger than 24 exercises fragmentation)
        #[arg(long, default_value = "16")]
        payload_size: usize,

        /// Have the master multicast an announcement to this level
        #[arg(long)]
        multicast_level: Option<u8>,

        /// Probability that a transmission is lost (0.0-1.0)
        #[arg(long, default_value = "0.0")]
        drop_rate: f64,

        /// Seed for traffic and loss generation
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Network configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show network configuration and the radio setup of a started node
    Info {
        /// Network configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node address to start (octal)
        #[arg(long, default_value = "00")]
        address: String,
    },
}

fn parse_address(s: &str) -> Result<NodeAddress> {
    let address = NodeAddress::parse_octal(s).with_context(|| format!("Invalid address '{}'", s))?;
    if !address.is_valid(false) {
        bail!("Address {} is not a valid tree address (at most four digits, each 1-5)", address);
    }
    Ok(address)
}

fn load_config(path: Option<&PathBuf>) -> Result<NetworkConfig> {
    match path {
        Some(p) => NetworkConfig::from_json_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Ok(NetworkConfig::default()),
    }
}

/// The node plus every ancestor up to the master
fn path_to_root(address: NodeAddress) -> Vec<NodeAddress> {
    let mut path = vec![address];
    let mut current = address;
    while let Some(parent) = current.parent() {
        path.push(parent);
        current = parent;
    }
    path
}

fn cmd_address(address: String, route_to: Option<String>, no_multicast: bool) -> Result<()> {
    let address = parse_address(&address)?;
    let multicast = !no_multicast;
    let position = TreePosition::new(address);

    println!("=== Node {} ===", address);
    println!();
    println!("Level:       {}", address.depth());
    println!("Node mask:   0{:o}", position.node_mask);
    match position.parent {
        Some(parent) => {
            println!("Parent:      {}", parent);
            println!("Parent pipe: {}", position.parent_pipe);
        }
        None => println!("Parent:      none (master)"),
    }
    println!();
    println!("Reading pipes:");
    for pipe in 0..6u8 {
        let role = match pipe {
            0 if multicast && !address.is_master() => "multicast level".to_string(),
            0 => "unused".to_string(),
            5 if !address.is_master() => "from parent".to_string(),
            n => {
                let slot = u16::from(n).checked_shl(3 * u32::from(address.depth())).unwrap_or(0);
                format!("from child {}", NodeAddress::new(address.raw() | slot))
            }
        };
        println!(
            "  P{}: 0x{:010x}  ({})",
            pipe,
            pipe_address(address, pipe, multicast),
            role
        );
    }

    if let Some(target) = route_to {
        let target = parse_address(&target)?;
        println!();
        println!("Route {} -> {}:", address, target);

        let mut current = address;
        let mut hops = 0;
        while current != target {
            let hop = TreePosition::new(current).next_hop(target, SendMode::Standard);
            println!(
                "  {} -> {} on pipe {} (0x{:010x})",
                current,
                hop.node,
                hop.pipe,
                pipe_address(hop.node, hop.pipe, multicast)
            );
            current = hop.node;
            hops += 1;
            if hops > 12 {
                bail!("Route did not converge");
            }
        }
        println!("  {} hop(s)", hops);
    }

    Ok(())
}

/// A node polling `update()` on its own thread until stopped
struct NodeRunner {
    handle: JoinHandle<Network<SimRadio>>,
}

impl NodeRunner {
    fn spawn<F>(mut net: Network<SimRadio>, running: Arc<AtomicBool>, mut on_poll: F) -> Self
    where
        F: FnMut(&mut Network<SimRadio>) + Send + 'static,
    {
        let handle = thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                if let Err(e) = net.update() {
                    warn!("update failed: {}", e);
                }
                on_poll(&mut net);
                thread::sleep(POLL_INTERVAL);
            }
            net
        });
        Self { handle }
    }

    fn join(self) -> Result<Network<SimRadio>> {
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("Node thread panicked"))
    }
}

fn start_node(air: &SimAir, address: NodeAddress, config: &NetworkConfig) -> Result<Network<SimRadio>> {
    let mut radio = air.radio();
    radio
        .begin()
        .with_context(|| format!("Radio for node {} did not start", address))?;
    let mut net = Network::new(radio, config.clone());
    net.begin_with_address(address)
        .with_context(|| format!("Failed to start node {}", address))?;
    Ok(net)
}

fn cmd_hello(from: String, to: String, count: u32, interval_ms: u64, config: Option<PathBuf>) -> Result<()> {
    let from = parse_address(&from)?;
    let to = parse_address(&to)?;
    if from == to {
        bail!("Sender and receiver must differ");
    }
    let config = load_config(config.as_ref())?;

    // Sender, receiver, and every node on the path between them
    let mut addresses = path_to_root(from);
    for a in path_to_root(to) {
        if !addresses.contains(&a) {
            addresses.push(a);
        }
    }
    addresses.sort();

    println!("=== Hello World ===");
    println!();
    println!("Sender:   {}", from);
    println!("Receiver: {}", to);
    println!("Nodes:    {}", addresses.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "));
    println!("Channel:  {}", config.channel);
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let air = SimAir::new();
    let mut sender = start_node(&air, from, &config)?;
    let mut runners = Vec::new();
    for &address in addresses.iter().filter(|&&a| a != from) {
        let net = start_node(&air, address, &config)?;
        let is_receiver = address == to;
        runners.push(NodeRunner::spawn(net, running.clone(), move |net| {
            if !is_receiver {
                return;
            }
            while let Some((header, payload)) = net.read(8) {
                if payload.len() < 8 {
                    warn!("short payload from {}", header.from_node);
                    continue;
                }
                let ms = LittleEndian::read_u32(&payload[0..4]);
                let counter = LittleEndian::read_u32(&payload[4..8]);
                println!("Received packet #{} at {} from {}", counter, ms, header.from_node);
            }
        }));
    }

    let start = Instant::now();
    let interval = Duration::from_millis(interval_ms);
    let mut sent_ok = 0;
    for counter in 1..=count {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let mut payload = [0u8; 8];
        LittleEndian::write_u32(&mut payload[0..4], start.elapsed().as_millis() as u32);
        LittleEndian::write_u32(&mut payload[4..8], counter);

        let mut header = NetworkHeader::new(to, MSG_TYPE_DATA);
        match sender.write(&mut header, &payload) {
            Ok(()) => {
                sent_ok += 1;
                println!("Sending #{}... ok.", counter);
            }
            Err(e) => println!("Sending #{}... failed: {}", counter, e),
        }

        // Keep servicing the network while idle
        let next = Instant::now() + interval;
        while Instant::now() < next && running.load(Ordering::SeqCst) {
            sender.update()?;
            thread::sleep(POLL_INTERVAL);
        }
    }

    // Give the last frame time to land
    thread::sleep(Duration::from_millis(50));
    running.store(false, Ordering::SeqCst);
    for runner in runners {
        runner.join()?;
    }

    let (fails, ok) = sender.failures();
    println!();
    println!("=== Results ===");
    println!("Sent:     {}/{}", sent_ok, count);
    println!("Frames:   {} ok, {} failed", ok, fails);

    Ok(())
}

#[derive(Serialize)]
struct NodeReport {
    address: String,
    sent: usize,
    send_failures: usize,
    received: usize,
    stats: NetworkStats,
}

#[derive(Serialize)]
struct SimulationReport {
    nodes: Vec<NodeReport>,
    air: AirStats,
    elapsed_ms: u128,
}

/// Per-node traffic plan and tallies, shared with the node thread
struct Traffic {
    plan: Vec<(NodeAddress, Vec<u8>)>,
    multicast: Option<u8>,
    sent: usize,
    failures: usize,
    received: usize,
}

/// Parse a comma-separated node list, dropping repeated addresses
fn parse_node_list(nodes: &str) -> Result<Vec<NodeAddress>> {
    let mut addresses = Vec::new();
    for s in nodes.split(',') {
        let address = parse_address(s.trim())?;
        if addresses.contains(&address) {
            warn!("node {} listed more than once", address);
            continue;
        }
        addresses.push(address);
    }
    if addresses.len() < 2 {
        bail!("Need at least two distinct nodes");
    }
    Ok(addresses)
}

#[allow(clippy::too_many_arguments)]
fn cmd_simulate(
    nodes: String,
    messages: usize,
    payload_size: usize,
    multicast_level: Option<u8>,
    drop_rate: f64,
    seed: u64,
    config: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config.as_ref())?;
    if multicast_level.is_some() {
        config.multicast = true;
        config.multicast_relay = true;
    }
    if payload_size > config.max_payload_size {
        bail!(
            "Payload size {} exceeds maximum of {}",
            payload_size,
            config.max_payload_size
        );
    }

    let addresses = parse_node_list(&nodes)?;
    for a in &addresses {
        for ancestor in path_to_root(*a).into_iter().skip(1) {
            if !addresses.contains(&ancestor) {
                warn!("node {} has no path to the master: {} is missing", a, ancestor);
            }
        }
    }

    if !json {
        println!("=== Network Simulation ===");
        println!();
        println!("Nodes:        {}", addresses.len());
        println!("Messages:     {} per node", messages);
        println!("Payload size: {} bytes", payload_size);
        println!("Drop rate:    {:.2}", drop_rate);
        if let Some(level) = multicast_level {
            println!("Multicast:    level {}", level);
        }
        println!();
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let air = SimAir::new()
        .with_seed(seed)
        .with_drop_rate(drop_rate)
        .with_fifo_depth(8);
    let mut rng = StdRng::seed_from_u64(seed);
    let pending = Arc::new(AtomicUsize::new(addresses.len()));

    let start = Instant::now();
    let mut runners = Vec::new();
    for &address in &addresses {
        let plan: Vec<(NodeAddress, Vec<u8>)> = (0..messages)
            .map(|_| {
                let dest = loop {
                    let candidate = addresses[rng.gen_range(0..addresses.len())];
                    if candidate != address {
                        break candidate;
                    }
                };
                let payload: Vec<u8> = (0..payload_size).map(|_| rng.gen()).collect();
                (dest, payload)
            })
            .collect();

        let mut traffic = Traffic {
            plan,
            multicast: multicast_level.filter(|_| address.is_master()),
            sent: 0,
            failures: 0,
            received: 0,
        };
        let net = start_node(&air, address, &config)?;
        let pending = pending.clone();
        let tally = Arc::new(Mutex::new((0usize, 0usize, 0usize)));
        let out = tally.clone();
        let node_pending = pending.clone();

        let runner = NodeRunner::spawn(net, running.clone(), move |net| {
            while net.read(usize::MAX).is_some() {
                traffic.received += 1;
            }

            if let Some(level) = traffic.multicast.take() {
                let mut header = NetworkHeader::new(NodeAddress::MULTICAST, MSG_TYPE_ANNOUNCE);
                if let Err(e) = net.multicast(&mut header, b"announce", level) {
                    warn!("multicast from {} failed: {}", header.from_node, e);
                }
            }

            if let Some((dest, payload)) = traffic.plan.pop() {
                let mut header = NetworkHeader::new(dest, MSG_TYPE_DATA);
                match net.write(&mut header, &payload) {
                    Ok(()) => traffic.sent += 1,
                    Err(e) => {
                        traffic.failures += 1;
                        info!("{} -> {} failed: {}", header.from_node, dest, e);
                    }
                }
                if traffic.plan.is_empty() {
                    node_pending.fetch_sub(1, Ordering::SeqCst);
                }
            }

            if let Ok(mut t) = out.lock() {
                *t = (traffic.sent, traffic.failures, traffic.received);
            }
        });
        if messages == 0 {
            pending.fetch_sub(1, Ordering::SeqCst);
        }
        runners.push((address, runner, tally));
    }

    while pending.load(Ordering::SeqCst) > 0 && running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(10));
    }
    // Let in-flight frames settle
    thread::sleep(Duration::from_millis(100));
    running.store(false, Ordering::SeqCst);

    let mut reports = Vec::new();
    for (address, runner, tally) in runners {
        let net = runner.join()?;
        let (sent, send_failures, received) = tally
            .lock()
            .map(|t| *t)
            .map_err(|_| anyhow::anyhow!("Tally lock poisoned"))?;
        reports.push(NodeReport {
            address: address.to_string(),
            sent,
            send_failures,
            received,
            stats: net.stats().clone(),
        });
    }

    let report = SimulationReport {
        nodes: reports,
        air: air.stats(),
        elapsed_ms: start.elapsed().as_millis(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{:<8} {:>6} {:>6} {:>8} {:>8} {:>6} {:>6}", "Node", "Sent", "Fail", "Recv", "Relayed", "ACKs", "Frags");
    for node in &report.nodes {
        println!(
            "{:<8} {:>6} {:>6} {:>8} {:>8} {:>6} {:>6}",
            node.address,
            node.sent,
            node.send_failures,
            node.received,
            node.stats.frames_relayed,
            node.stats.network_acks_sent,
            node.stats.fragments_sent
        );
    }

    let sent: usize = report.nodes.iter().map(|n| n.sent).sum();
    let failed: usize = report.nodes.iter().map(|n| n.send_failures).sum();
    let received: usize = report.nodes.iter().map(|n| n.received).sum();
    let attempted = sent + failed;

    println!();
    println!("=== Simulation Results ===");
    println!();
    println!("Messages sent:      {}", sent);
    println!("Send failures:      {}", failed);
    println!("Messages received:  {}", received);
    if attempted > 0 {
        println!("Delivery rate:      {:.1}%", 100.0 * sent as f64 / attempted as f64);
    }
    println!("Air transmissions:  {}", report.air.transmissions);
    println!("Frames lost:        {}", report.air.lost);
    println!("FIFO overflows:     {}", report.air.fifo_overflows);
    println!("Elapsed:            {} ms", report.elapsed_ms);

    Ok(())
}

fn cmd_info(config: Option<PathBuf>, address: String) -> Result<()> {
    let config = load_config(config.as_ref())?;
    let address = parse_address(&address)?;

    println!("=== Network Configuration ===");
    println!();
    println!("{}", config.to_json()?);
    println!();
    println!("Route timeout: {:?}", config.route_timeout());
    println!();

    let air = SimAir::new();
    let net = start_node(&air, address, &config)?;

    println!("=== Radio Setup for Node {} ===", address);
    println!();
    println!("{}", net.radio().details());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Address {
            address,
            route_to,
            no_multicast,
        } => cmd_address(address, route_to, no_multicast),

        Commands::Hello {
            from,
            to,
            count,
            interval_ms,
            config,
        } => cmd_hello(from, to, count, interval_ms, config),

        Commands::Simulate {
            nodes,
            messages,
            payload_size,
            multicast_level,
            drop_rate,
            seed,
            config,
            json,
        } => cmd_simulate(
            nodes,
            messages,
            payload_size,
            multicast_level,
            drop_rate,
            seed,
            config,
            json,
        ),

        Commands::Info { config, address } => cmd_info(config, address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_to_root() {
        let path = path_to_root(NodeAddress::new(0o213));
        let expected: Vec<NodeAddress> = [0o213, 0o13, 0o3, 0o0].iter().map(|&a| NodeAddress::new(a)).collect();
        assert_eq!(path, expected);
        assert_eq!(path_to_root(NodeAddress::MASTER), vec![NodeAddress::MASTER]);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("011").unwrap(), NodeAddress::new(0o11));
        assert!(parse_address("016").is_err());
        assert!(parse_address("xyz").is_err());
    }

    #[test]
    fn test_parse_node_list() {
        let nodes = parse_node_list("00, 01,02,01").unwrap();
        assert_eq!(nodes, vec![NodeAddress::new(0), NodeAddress::new(0o1), NodeAddress::new(0o2)]);
        assert!(parse_node_list("01,01").is_err());
        assert!(parse_node_list("01").is_err());
        assert!(parse_node_list("01,07").is_err());
    }

    #[test]
    fn test_start_node() {
        let air = SimAir::new();
        let net = start_node(&air, NodeAddress::new(0o1), &NetworkConfig::default()).unwrap();
        assert!(net.is_started());
        assert!(net.radio().is_valid());
        assert!(net.radio().details().listening);
        assert!(start_node(&air, NodeAddress::new(0o11111), &NetworkConfig::default()).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["rfnet", "-vv", "simulate", "--nodes", "00,01", "--json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Simulate { nodes, json, messages, .. } => {
                assert_eq!(nodes, "00,01");
                assert!(json);
                assert_eq!(messages, 10);
            }
            _ => panic!("wrong command"),
        }
    }
}
