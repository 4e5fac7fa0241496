//! Radio parameters example.
//!
//! This example demonstrates reading and writing AT parameters of a radio
//! reachable through a serial-over-TCP bridge (for example ser2net).
//!
//! Run with: cargo run --example radio_parameters -- 127.0.0.1:9750

use std::time::Duration;

use digimesh_rs::at::{AtString, Integer, NodeDiscovery};
use digimesh_rs::{RadioClient, RadioConfig, ResponseBehavior, StreamTransport};
use tracing_subscriber::EnvFilter;

const DEFAULT_BRIDGE: &str = "127.0.0.1:9750";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bridge = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_BRIDGE.to_string());
    println!("Connecting to radio bridge at {bridge}...");

    let transport = StreamTransport::connect_tcp(bridge.as_str())?;
    let radio = RadioClient::connect(transport, RadioConfig::default())?;
    radio.add_error_handler(|e| eprintln!("Frame error: {e}"));
    radio.add_link_handler(|event| println!("Link event: {event:?}"));

    println!("Connected!");

    // Example 1: Read a single parameter
    println!("\n--- Example 1: Query ---");
    let names: Vec<AtString> = radio.get_parameter_sync("NI", ResponseBehavior::ShutdownFirstResponse)?;
    for name in &names {
        println!("Node identifier: {name}");
    }

    // Example 2: Write parameters and wait for the acknowledgement
    println!("\n--- Example 2: Set ---");
    radio.set_parameter_with("AP", &Integer(1u8), |status| {
        println!("API mode set: {status:?}");
    })?;
    radio.set_parameter_with("NI", &AtString::new("demo"), |status| {
        println!("Node identifier set: {status:?}");
    })?;

    // Example 3: Collect every answer to a network discovery
    println!("\n--- Example 3: Network Discovery ---");
    let nodes: Vec<NodeDiscovery> = radio.get_parameter_sync(
        "ND",
        ResponseBehavior::CollectUntilTimeout(Duration::from_secs(10)),
    )?;
    println!("{} node(s) answered", nodes.len());
    for node in nodes {
        println!(
            "  {} '{}' advertises {:?}",
            node.addr,
            node.node_identifier,
            node.advertised_ids()
        );
    }

    radio.shutdown();
    Ok(())
}
