//! TCP session lifecycle, heartbeat liveness, and client/server managers.
//!
//! This crate turns a raw TCP byte stream into framed packets and manages
//! per-connection lifecycle on top of `netframe-wire`:
//!
//! - **Session**: owns one connection's read/write loops, emits fully-framed
//!   packets to per-type handlers, and self-closes on heartbeat timeout.
//! - **Client**: manages a single outbound session across
//!   connect/disconnect cycles on its own reactor thread.
//! - **Server**: accepts inbound connections, keeps a live-session registry,
//!   and offers broadcast/targeted send.
//! - **WorkerPool**: fixed-size background pool for offloading handler work
//!   so reactor-thread callbacks stay short.
//!
//! Every `Client` and `Server` owns its own single-worker tokio runtime;
//! all handler callbacks run on that reactor thread. Handlers that block or
//! burn CPU should hand their work to a [`WorkerPool`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use netframe_session::{Server, Client, SessionConfig};
//! use netframe_wire::{Packet, PacketType};
//!
//! # fn example() -> Result<(), netframe_session::NetError> {
//! let server = Server::new(SessionConfig::default())?;
//! server.on_connect(|session| {
//!     let replier = session.clone();
//!     session.on_packet(PacketType::Text, move |_s, packet| {
//!         replier.send(Packet::text(packet.sequence, "pong"));
//!     });
//! });
//! let addr = server.listen("127.0.0.1", 0)?;
//!
//! let client = Client::new(SessionConfig::default())?;
//! client.on_packet(PacketType::Text, |_s, packet| {
//!     println!("reply: {:?}", packet.payload);
//! });
//! client.connect(&addr.ip().to_string(), addr.port())?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod pool;
pub mod server;
pub mod session;

pub use client::{Client, ClientState};
pub use error::{NetError, PoolError};
pub use pool::WorkerPool;
pub use server::Server;
pub use session::{PacketHandler, SessionConfig, SessionHandle, SessionState};
