//! Overlay node example.
//!
//! This example runs two overlay nodes in one process, connected through
//! in-memory radios, and shows item presence, data delivery and loopback.
//!
//! Run with: cargo run --example overlay_node

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use digimesh_rs::at::DeliveryStatus;
use digimesh_rs::{ItemId, MeshAddress, MeshOverlay, MockTransport, OverlayConfig, RadioClient};
use tracing_subscriber::EnvFilter;

const VEHICLE: &str = "Vehicle";
const GROUND_STATION: &str = "GroundStation";
const ADDR_A: MeshAddress = MeshAddress(0x0013_A200_4000_000A);
const ADDR_B: MeshAddress = MeshAddress(0x0013_A200_4000_000B);

fn radio(mock: &Arc<MockTransport>) -> digimesh_rs::Result<RadioClient> {
    mock.acknowledge_at_commands();
    mock.acknowledge_transmits(DeliveryStatus::Success);
    RadioClient::connect_shared(mock.clone(), Default::default())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== DigiMesh Overlay ===\n");

    let mock_a = Arc::new(MockTransport::new());
    let mock_b = Arc::new(MockTransport::new());
    mock_a.deliver_to(ADDR_A, &mock_b, ADDR_B);
    mock_b.deliver_to(ADDR_B, &mock_a, ADDR_A);

    let config = OverlayConfig::new([VEHICLE, GROUND_STATION]).with_advertise_component(VEHICLE);
    let node_a = MeshOverlay::start(radio(&mock_a)?, config.clone())?;
    let node_b = MeshOverlay::start(radio(&mock_b)?, config)?;

    node_b.add_new_item_handler(VEHICLE, |id, addr| {
        println!("[B] vehicle {id} is on radio {addr}");
    })?;
    node_a.add_generic_new_item_handler(|component, id, addr| {
        println!("[A] {component} {id} is on radio {addr}");
    });
    node_a.add_data_handler(|payload, source| {
        println!("[A] data from {source}: {:?}", String::from_utf8_lossy(payload));
    });

    // Example 1: Presence
    println!("--- Example 1: Presence ---");
    node_a.add_item(VEHICLE, ItemId(7))?;
    node_b.add_item(GROUND_STATION, ItemId(1))?;
    thread::sleep(Duration::from_millis(100));

    // Example 2: Data to a remote item
    println!("\n--- Example 2: Remote Data ---");
    node_b.send_data(VEHICLE, ItemId(7), b"waypoint 12")?;
    thread::sleep(Duration::from_millis(100));

    // Example 3: Loopback never touches the radio
    println!("\n--- Example 3: Loopback ---");
    let before = mock_a.sent().len();
    node_a.send_data(VEHICLE, ItemId(7), b"to myself")?;
    println!("Frames written for loopback: {}", mock_a.sent().len() - before);

    // Example 4: Directory contents
    println!("\n--- Example 4: Directories ---");
    println!("[A] vehicles: {:?}", node_a.known_items(VEHICLE)?);
    println!("[B] vehicles: {:?}", node_b.known_items(VEHICLE)?);

    node_a.shutdown();
    node_b.shutdown();
    Ok(())
}
