//! Frame basics example.
//!
//! This example demonstrates how to build, encode and decode API frames and
//! overlay packets without a radio.
//!
//! Run with: cargo run --example frame_basics

use digimesh_rs::at::DeliveryStatus;
use digimesh_rs::{AtCommand, AtStatus, Frame, FrameId, FrameReader, ItemId, MeshAddress, OverlayPacket};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== DigiMesh Frame Basics ===\n");

    // Example 1: An AT command setting the node identifier
    println!("--- Example 1: AT Command ---");
    let command = Frame::at_command(FrameId(1), AtCommand::NI, b"base");
    let bytes = command.to_bytes()?;
    println!("{:?} -> {:02X?}", command.frame_type, bytes);
    println!("Length field: {}, total size: {}", command.body_len(), command.total_size());

    // Example 2: Decoding validates the checksum
    println!("\n--- Example 2: Decoding ---");
    let parsed = Frame::from_bytes(&bytes)?;
    println!("Parsed frame matches original: {}", parsed == command);

    let mut corrupted = bytes.clone();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;
    match Frame::from_bytes(&corrupted) {
        Ok(_) => println!("Corrupted frame accepted?"),
        Err(e) => println!("Corrupted frame rejected: {e}"),
    }

    // Example 3: Reassembling frames from a byte stream
    println!("\n--- Example 3: Stream Reassembly ---");
    let response = Frame::at_response(FrameId(1), AtCommand::NI, AtStatus::Ok, &[]);
    let status = Frame::transmit_status(FrameId(2), 0, DeliveryStatus::Success);

    let mut stream = vec![0x00, 0x13];
    stream.extend(response.to_bytes()?);
    stream.extend(status.to_bytes()?);

    let mut reader = FrameReader::new();
    let (first, second) = stream.split_at(7);
    reader.feed(first);
    println!("After {} bytes: {} frame(s)", first.len(), reader.parse_all().len());
    reader.feed(second);
    for frame in reader.parse_all() {
        let frame = frame?;
        println!("  {:?} id={:?}", frame.frame_type, frame.frame_id);
    }
    println!("Bytes left over: {}", reader.len());

    // Example 4: Overlay packets ride inside transmit requests
    println!("\n--- Example 4: Overlay Packets ---");
    let present = OverlayPacket::ItemPresent {
        component: "Vehicle".to_string(),
        id: ItemId(7),
    };
    let data = present.to_bytes();
    println!("ITEM_PRESENT: {:02X?}", data);

    let request = Frame::transmit_request(FrameId(3), MeshAddress::BROADCAST, &data);
    println!("Transmit request to {}: {} bytes", MeshAddress::BROADCAST, request.total_size());
    let carried = request.transmit_data().unwrap_or_default();
    println!("Carried packet: {:?}", OverlayPacket::from_bytes(carried)?);

    Ok(())
}
