//! Broadcast TCP Chat Library
//!
//! A learning-oriented chat service built on readiness-based
//! non-blocking I/O. A single server task multiplexes every
//! connection; each received chunk of text is rebroadcast to all
//! other connected clients, tagged with the sender's remote port.
//!
//! # Features
//! - Single-threaded readiness event loop (server and client)
//! - Raw UTF-8 text wire format, no framing
//! - Broadcast fan-out with per-connection failure isolation
//! - `quit` control token that closes one session without touching
//!   the others
//! - Concurrent console-input task on the client side
//!
//! # Architecture
//! Both ends share the same multiplexing model:
//! - [`mux::Multiplexer`] wraps tokio's readiness API and owns every
//!   registered channel; [`mux::MuxHandle`] wakes or closes a blocked
//!   `select()` from any thread
//! - [`transfer`] provides drain-until-empty reads and
//!   write-until-complete writes over a small transport trait
//! - [`server::ChatServer`] dispatches accept/read events and fans
//!   messages out to the registry
//! - [`client::ChatClient`] runs the read side while [`input`] feeds
//!   lines into [`client::Sender`] from a separate task
//!
//! # Example
//! ```ignore
//! use chat_relay::server::ChatServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chat_relay::ChatError> {
//!     let server = ChatServer::bind(7777).await?;
//!     server.run().await
//! }
//! ```

pub mod client;
pub mod error;
pub mod input;
pub mod mux;
pub mod server;
pub mod transfer;

// Re-export main types for convenience
pub use client::{ChatClient, Sender};
pub use error::ChatError;
pub use mux::{Event, Multiplexer, MuxHandle, Token};
pub use server::ChatServer;

/// Control token that ends a session (case-sensitive, exact match)
pub const QUIT: &str = "quit";

/// Default server port
pub const DEFAULT_PORT: u16 = 7777;

/// Default server host for the client
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Capacity of the per-operation read buffer in bytes
pub const BUFFER_SIZE: usize = 1024;
