//! Async bridge example.
//!
//! This example runs the radio client over a tokio stream. A task on the
//! other end of an in-memory duplex plays the radio and acknowledges every
//! AT command.
//!
//! Run with: cargo run --example async_bridge --features tokio

use digimesh_rs::at::AtString;
use digimesh_rs::transport_async::AsyncStreamTransport;
use digimesh_rs::{AtCommand, AtStatus, Frame, FrameReader, FrameType, RadioClient, RadioConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// Answer every AT command with OK until the host hangs up.
async fn simulated_radio(mut link: DuplexStream) {
    let mut reader = FrameReader::new();
    let mut buf = [0u8; 256];
    loop {
        let n = match link.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        reader.feed(&buf[..n]);
        for frame in reader.parse_all().into_iter().flatten() {
            let (FrameType::AtCommand, Some(id)) = (frame.frame_type, frame.frame_id) else {
                continue;
            };
            let [c0, c1, value @ ..] = &frame.payload[..] else {
                continue;
            };
            let command = AtCommand([*c0, *c1]);
            println!("[radio] {command} {:?}", String::from_utf8_lossy(value));
            let Ok(reply) = Frame::at_response(id, command, AtStatus::Ok, &[]).to_bytes() else {
                continue;
            };
            if link.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (host, radio_end) = tokio::io::duplex(1024);
    tokio::spawn(simulated_radio(radio_end));

    let transport = AsyncStreamTransport::new(host, Handle::current());
    let radio = RadioClient::connect(transport, RadioConfig::default())?;

    let (done, acked) = oneshot::channel();
    radio.set_parameter_with("NI", &AtString::new("async-node"), move |status| {
        let _ = done.send(status);
    })?;
    println!("[host] NI acknowledged: {:?}", acked.await?);

    radio.shutdown();
    Ok(())
}
