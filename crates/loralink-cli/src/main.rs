//! LoRaLink Command-Line Interface
//!
//! Exercises the link layer against the in-memory channel simulator:
//! - Reliable sends across a chain of relay nodes, in any ARQ mode
//! - On-demand route discovery and route table inspection
//! - Node statistics after an exchange
//! - Multi-node mesh traffic simulation
//!
//! Topologies are synthetic: `--relays N` builds a line of N+2 nodes spaced
//! so only adjacent nodes are in radio range, which forces every exchange
//! through the relays. For real hardware, implement the `Radio` trait for
//! the target modem and drive `LinkNode` the same way.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loralink_core::arq::ArqMode;
use loralink_core::config::{ArqConfig, LinkConfig};
use loralink_core::frame::{NodeId, Reliability, MTU};
use loralink_core::node::LinkNode;
use loralink_core::sim::{SimConfig, SimMedium, SimRadio};
use loralink_core::traits::LinkStats;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One hop of this length sits comfortably in range at 20 dBm while two
/// hops fall below the simulated receiver sensitivity.
const HOP_M: f64 = 6_000.0;
const FIRST_ID: u16 = 0xa;

#[derive(Parser)]
#[command(name = "loralink")]
#[command(author, version, about = "LoRaLink mesh link-layer toolkit", long_about = None)]
struct Cli {
    /// Enable verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message across a relay chain and report the delivery
    Send {
        /// Message text to deliver
        #[arg(short, long, default_value = "Hello")]
        message: String,

        /// Generate a patterned payload of this many bytes instead
        #[arg(long)]
        size: Option<usize>,

        /// Reliability level (0-4 or none/low/medium/high/critical)
        #[arg(short, long, default_value = "medium")]
        reliability: String,

        /// ARQ mode (stop-and-wait, go-back-n, selective-repeat, block-ack)
        #[arg(long, default_value = "go-back-n")]
        mode: String,

        /// Window (or burst) size for the windowed modes
        #[arg(long, default_value = "4")]
        window: u16,

        /// Relay nodes between sender and destination
        #[arg(long, default_value = "1")]
        relays: usize,

        /// Erase the sender's nth transmissions (repeatable, 0-based)
        #[arg(long = "drop")]
        drops: Vec<u64>,

        /// Print the delivery report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Flood a route request through a relay chain
    Discover {
        /// Relay nodes between origin and target
        #[arg(long, default_value = "1")]
        relays: usize,

        /// Print the resulting route table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every node's route table after discovery traffic
    Routes {
        /// Relay nodes between origin and target
        #[arg(long, default_value = "2")]
        relays: usize,

        #[arg(long)]
        json: bool,
    },

    /// Run an exchange and dump per-node statistics
    Stats {
        #[arg(long, default_value = "1")]
        relays: usize,

        /// Payload size for the exchanged message
        #[arg(long, default_value = "600")]
        size: usize,

        #[arg(long)]
        json: bool,
    },

    /// Random traffic over a multi-node line topology
    Simulate {
        /// Total nodes in the line
        #[arg(short, long, default_value = "4")]
        nodes: usize,

        /// Messages to exchange between random pairs
        #[arg(short, long, default_value = "8")]
        messages: usize,

        /// ARQ mode for every node
        #[arg(long, default_value = "go-back-n")]
        mode: String,

        /// Window (or burst) size for the windowed modes
        #[arg(long, default_value = "4")]
        window: u16,

        /// Random seed for reproducible traffic
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Show protocol constants, reliability policy and airtime figures
    Info {
        /// Spreading factor for the airtime table
        #[arg(long, default_value = "9")]
        sf: u8,

        /// Bandwidth in kHz
        #[arg(long, default_value = "125")]
        bw: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Send {
            message,
            size,
            reliability,
            mode,
            window,
            relays,
            drops,
            json,
        } => cmd_send(message, size, reliability, mode, window, relays, drops, json),
        Commands::Discover { relays, json } => cmd_discover(relays, json),
        Commands::Routes { relays, json } => cmd_routes(relays, json),
        Commands::Stats { relays, size, json } => cmd_stats(relays, size, json),
        Commands::Simulate {
            nodes,
            messages,
            mode,
            window,
            seed,
        } => cmd_simulate(nodes, messages, mode, window, seed),
        Commands::Info { sf, bw } => cmd_info(sf, bw),
    }
}

fn parse_reliability(value: &str) -> Result<Reliability> {
    let normalized = value.to_lowercase();
    if let Ok(level) = normalized.parse::<u8>() {
        return Reliability::from_level(level)
            .with_context(|| format!("Reliability level {} out of range 0-4", level));
    }
    match normalized.as_str() {
        "none" => Ok(Reliability::None),
        "low" => Ok(Reliability::Low),
        "medium" => Ok(Reliability::Medium),
        "high" => Ok(Reliability::High),
        "critical" => Ok(Reliability::Critical),
        _ => anyhow::bail!(
            "Unknown reliability: {}. Use 0-4 or none/low/medium/high/critical",
            value
        ),
    }
}

fn parse_mode(mode: &str, window: u16) -> Result<ArqMode> {
    if window == 0 {
        anyhow::bail!("Window size must be at least 1");
    }
    match mode.to_lowercase().as_str() {
        "stop-and-wait" | "saw" => Ok(ArqMode::StopAndWait),
        "go-back-n" | "gbn" => Ok(ArqMode::GoBackN { window }),
        "selective-repeat" | "sr" => Ok(ArqMode::SelectiveRepeat { window }),
        "block-ack" | "tdd" => Ok(ArqMode::BlockAck { burst: window }),
        _ => anyhow::bail!(
            "Unknown ARQ mode: {}. Use stop-and-wait, go-back-n, selective-repeat or block-ack",
            mode
        ),
    }
}

fn sim_node_config(id: u16, mode: ArqMode) -> LinkConfig {
    LinkConfig {
        node_id: Some(NodeId::from_u16(id)),
        hello_interval: None,
        poll_interval: Duration::from_millis(1),
        route_discovery_timeout: Duration::from_secs(3),
        arq: ArqConfig {
            mode,
            ack_timeout: Duration::from_millis(200),
            listen_slot: Duration::from_millis(400),
            burst_gap: Duration::from_millis(50),
            fragment_spacing: Duration::from_millis(1),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Line of `count` nodes spaced one hop apart, ids 0xa, 0xb, ...
fn build_line(count: usize, mode: ArqMode) -> (SimMedium, Vec<LinkNode<SimRadio>>) {
    let medium = SimMedium::new(
        SimConfig::default()
            .with_airtime_scale(0.0)
            .with_sensitivity(-90.0),
    );
    let nodes = (0..count)
        .map(|i| {
            let id = FIRST_ID + i as u16;
            let radio = medium.attach(NodeId::from_u16(id), i as f64 * HOP_M, 0.0);
            LinkNode::new(sim_node_config(id, mode), radio)
        })
        .collect();
    (medium, nodes)
}

/// Run `action` on the head node while every other node services the mesh
fn with_serviced_tail<T>(
    nodes: &mut [LinkNode<SimRadio>],
    action: impl FnOnce(&mut LinkNode<SimRadio>) -> T,
) -> T {
    let (head, tail) = nodes.split_first_mut().expect("at least one node");
    let stop = Arc::new(AtomicBool::new(false));
    std::thread::scope(|scope| {
        let handles: Vec<_> = tail
            .iter_mut()
            .map(|node| {
                let stop = Arc::clone(&stop);
                scope.spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        node.poll();
                        std::thread::sleep(Duration::from_millis(1));
                    }
                })
            })
            .collect();

        let result = action(head);
        // let acknowledgments and queued relays settle
        std::thread::sleep(Duration::from_millis(300));
        stop.store(true, Ordering::Relaxed);
        for handle in handles {
            handle.join().expect("service thread");
        }
        result
    })
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[allow(clippy::too_many_arguments)]
fn cmd_send(
    message: String,
    size: Option<usize>,
    reliability: String,
    mode: String,
    window: u16,
    relays: usize,
    drops: Vec<u64>,
    json: bool,
) -> Result<()> {
    let reliability = parse_reliability(&reliability)?;
    let mode = parse_mode(&mode, window)?;
    let payload = match size {
        Some(len) => patterned(len),
        None => message.into_bytes(),
    };

    let (medium, mut nodes) = build_line(relays + 2, mode);
    let origin = nodes[0].node_id();
    let target = nodes[relays + 1].node_id();
    if !drops.is_empty() {
        medium.drop_transmissions(origin, &drops);
    }

    if !json {
        println!("=== LoRaLink Send ===");
        println!();
        println!("From:        {}", origin);
        println!("To:          {} ({} relay hops)", target, relays);
        println!("Payload:     {} bytes", payload.len());
        println!("Reliability: {:?}", reliability);
        println!("ARQ mode:    {:?}", mode);
        if !drops.is_empty() {
            println!("Drop plan:   transmissions {:?}", drops);
        }
        println!();
    }

    let result =
        with_serviced_tail(&mut nodes, |head| head.send_message(target, &payload, reliability));

    match result {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Delivered in {:.3} s", report.elapsed.as_secs_f64());
                println!("  Attempts:        {}", report.attempts);
                println!("  Frames sent:     {}", report.frames_sent);
                println!("  Retransmissions: {}", report.retransmissions);
                if report.rx_frames > 0 {
                    println!(
                        "  Receiver totals: {} bytes in {} frames",
                        report.rx_bytes, report.rx_frames
                    );
                }
            }
            let received = nodes[relays + 1].receive();
            info!(delivered = received.is_some(), "destination inbox checked");
            Ok(())
        }
        Err(err) => anyhow::bail!("Send failed: {}", err),
    }
}

fn cmd_discover(relays: usize, json: bool) -> Result<()> {
    let (_medium, mut nodes) = build_line(relays + 2, ArqMode::default());
    let target = nodes[relays + 1].node_id();

    if !json {
        println!("=== LoRaLink Route Discovery ===");
        println!();
        println!("Origin: {}", nodes[0].node_id());
        println!("Target: {} ({} relay hops)", target, relays);
        println!();
    }

    let (next_hop, routes) = with_serviced_tail(&mut nodes, |head| {
        let next_hop = head.discover_route(target);
        (next_hop, head.routes_snapshot())
    });

    match next_hop {
        Ok(next) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&routes)?);
            } else {
                println!("Route found: next hop {}", next);
                println!();
                print_route_table(&routes);
            }
            Ok(())
        }
        Err(err) => anyhow::bail!("Discovery failed: {}", err),
    }
}

fn cmd_routes(relays: usize, json: bool) -> Result<()> {
    let (_medium, mut nodes) = build_line(relays + 2, ArqMode::default());
    let target = nodes[relays + 1].node_id();

    let result = with_serviced_tail(&mut nodes, |head| head.discover_route(target));
    result.map_err(|err| anyhow::anyhow!("Discovery failed: {}", err))?;

    if json {
        let tables: Vec<_> = nodes
            .iter()
            .map(|node| (node.node_id().to_string(), node.routes_snapshot()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }

    println!("=== LoRaLink Route Tables ===");
    for node in &nodes {
        println!();
        println!("Node {}:", node.node_id());
        print_route_table(&node.routes_snapshot());
    }
    Ok(())
}

fn print_route_table(routes: &[loralink_core::routing::RouteInfo]) {
    if routes.is_empty() {
        println!("  (no routes)");
        return;
    }
    println!(
        "  {:<8} {:<8} {:<6} {:<8} {:<10}",
        "Dest", "Next", "Hops", "Age (s)", "RSSI (dBm)"
    );
    println!("  {}", "-".repeat(42));
    for route in routes {
        println!(
            "  {:<8} {:<8} {:<6} {:<8} {:<10.1}",
            route.destination, route.next_hop, route.hop_count, route.age_secs, route.quality
        );
    }
}

fn cmd_stats(relays: usize, size: usize, json: bool) -> Result<()> {
    let (_medium, mut nodes) = build_line(relays + 2, ArqMode::default());
    let target = nodes[relays + 1].node_id();
    let payload = patterned(size);

    let result = with_serviced_tail(&mut nodes, |head| {
        head.send_message(target, &payload, Reliability::Medium)
    });
    result.map_err(|err| anyhow::anyhow!("Send failed: {}", err))?;

    let stats: Vec<(String, LinkStats)> = nodes
        .iter()
        .map(|node| (node.node_id().to_string(), node.stats()))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("=== LoRaLink Node Statistics ===");
    println!();
    println!(
        "{:<6} {:<8} {:<8} {:<8} {:<8} {:<8} {:<8}",
        "Node", "TX", "RX", "Fwd", "AckTx", "AckRx", "Dup"
    );
    println!("{}", "-".repeat(56));
    for (id, s) in &stats {
        println!(
            "{:<6} {:<8} {:<8} {:<8} {:<8} {:<8} {:<8}",
            id, s.frames_tx, s.frames_rx, s.frames_forwarded, s.acks_sent, s.acks_received,
            s.duplicates_dropped
        );
    }
    Ok(())
}

fn cmd_simulate(nodes: usize, messages: usize, mode: String, window: u16, seed: u64) -> Result<()> {
    if nodes < 2 {
        anyhow::bail!("Simulation needs at least 2 nodes");
    }
    let mode = parse_mode(&mode, window)?;
    let (_medium, mut line) = build_line(nodes, mode);
    let ids: Vec<NodeId> = line.iter().map(|n| n.node_id()).collect();

    println!("=== LoRaLink Mesh Simulation ===");
    println!();
    println!("Nodes:    {} in a line, one hop apart", nodes);
    println!("Messages: {}", messages);
    println!("ARQ mode: {:?}", mode);
    println!("Seed:     {}", seed);
    println!();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut delivered = 0usize;
    let mut failed = 0usize;

    for index in 0..messages {
        let from = rng.gen_range(0..nodes);
        let mut to = rng.gen_range(0..nodes);
        while to == from {
            to = rng.gen_range(0..nodes);
        }
        let payload = format!("simulated message {}", index).into_bytes();
        let target = ids[to];

        // rotate the sender to the front so the rest can service the mesh
        line.swap(0, from);
        let result = with_serviced_tail(&mut line, |head| {
            head.send_message(target, &payload, Reliability::Medium)
        });
        line.swap(0, from);

        match result {
            Ok(report) => {
                delivered += 1;
                println!(
                    "[{}] {} -> {}: delivered, {} frame(s), {} retransmission(s)",
                    index,
                    ids[from],
                    target,
                    report.frames_sent,
                    report.retransmissions
                );
            }
            Err(err) => {
                failed += 1;
                println!("[{}] {} -> {}: failed ({})", index, ids[from], target, err);
            }
        }
    }

    println!();
    println!("=== Simulation Results ===");
    println!();
    println!("Delivered: {}/{}", delivered, messages);
    println!("Failed:    {}/{}", failed, messages);
    println!();
    println!("{:<6} {:<8} {:<8} {:<8} {:<8}", "Node", "TX", "RX", "Fwd", "Routes");
    println!("{}", "-".repeat(40));
    for node in &line {
        let stats = node.stats();
        println!(
            "{:<6} {:<8} {:<8} {:<8} {:<8}",
            node.node_id(),
            stats.frames_tx,
            stats.frames_rx,
            stats.frames_forwarded,
            stats.route_count
        );
    }
    Ok(())
}

fn cmd_info(sf: u8, bw: u32) -> Result<()> {
    if !(5..=12).contains(&sf) {
        anyhow::bail!("Invalid spreading factor: {}. Must be 5-12", sf);
    }
    if !matches!(bw, 125 | 250 | 500) {
        anyhow::bail!("Invalid bandwidth: {}kHz. Must be 125, 250, or 500", bw);
    }

    let config = LinkConfig::default();
    let model = loralink_core::config::AirtimeModel {
        spreading_factor: sf,
        bandwidth_hz: bw * 1000,
        ..Default::default()
    };

    println!("=== LoRaLink Protocol Info ===");
    println!();
    println!("MTU:              {} bytes", MTU);
    println!("Chunk size:       {} bytes", config.chunk_size);
    println!("Max fragments:    {}", config.max_fragments);
    println!("Default TTL:      {}", config.default_ttl);
    println!("Default ARQ mode: {:?}", config.arq.mode);
    println!();
    println!("Reliability policy:");
    println!("  {:<10} {:<8} {:<14}", "Level", "Tries", "Final timeout");
    for level in [
        Reliability::None,
        Reliability::Low,
        Reliability::Medium,
        Reliability::High,
        Reliability::Critical,
    ] {
        println!(
            "  {:<10} {:<8} {:<14?}",
            format!("{:?}", level),
            config.message_tries(level),
            config.final_ack_timeout(level)
        );
    }
    println!();
    println!("Time on air at SF{} / {} kHz:", sf, bw);
    println!("  Symbol time: {:.2} ms", model.symbol_time().as_secs_f64() * 1e3);
    for payload in [16usize, 64, 128, MTU] {
        println!(
            "  {:>3} byte frame: {:>8.1} ms",
            payload,
            model.time_on_air(payload).as_secs_f64() * 1e3
        );
    }
    Ok(())
}
