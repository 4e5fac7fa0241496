//! Async transport using Tokio.
//!
//! [`AsyncStreamTransport`] carries frames over any tokio byte stream: a TCP
//! connection to a serial bridge, or an in-memory duplex in tests. The radio
//! client above it stays synchronous; received bytes are dispatched on the
//! runtime's reader task.
//!
//! # Example
//!
//! ```no_run
//! use digimesh_rs::transport_async::AsyncStreamTransport;
//! use digimesh_rs::{RadioClient, RadioConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = AsyncStreamTransport::connect_tcp("127.0.0.1:9750").await?;
//!     let radio = RadioClient::connect(transport, RadioConfig::default())?;
//!     radio.broadcast_message(b"hello")?;
//!     Ok(())
//! }
//! ```

mod stream;

pub use stream::{AsyncStreamTransport, DEFAULT_READ_BUFFER};
