//! # serial-link — async serial transport engine
//!
//! Turns a byte-oriented, event-driven serial port into a reliable,
//! backpressure-aware duplex byte stream: inbound bytes are framed into
//! pooled chunks (completed on a line terminator or a full buffer) and
//! outbound chunks are drained to the hardware one at a time, with aborted
//! transmissions resumed from the confirmed offset.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │  SerialLink               ← user API  │
//! │  actor                    ← scheduler │
//! │  SerialPort / PortEvent   ← hardware  │
//! ├───────────────────────────────────────┤
//! │  LinkEngine  ← pure sync state machine│
//! │  BufferPool  ← fixed chunk arena      │
//! └───────────────────────────────────────┘
//! ```
//!
//! The engine is a synchronous state machine owned by a dedicated tokio
//! task; hardware notifications and user commands reach it over channels,
//! so every chunk ownership transition has exactly one writer. The buffer
//! pool is a fixed arena: a chunk is identified by its slot index for the
//! whole session and memory use is bounded at construction.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serial_link::{LinkConfig, PortEvent, SerialLink, SerialPort};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! async fn bridge(port: Arc<dyn SerialPort>, events: mpsc::Receiver<PortEvent>)
//!     -> serial_link::Result<()>
//! {
//!     let config = LinkConfig::default().chunk_capacity(64);
//!     let mut link = SerialLink::open(port, events, config).await?;
//!
//!     link.transmit(b"hello\r\n").await?;
//!
//!     loop {
//!         let chunk = link.recv().await?;
//!         // forward chunk.data() to the peer transport
//!         link.release(chunk);
//!     }
//! }
//! ```

// ── Buffer arena and hardware interface ─────────────────────────────────

pub mod pool;
pub use pool::{BufferPool, Chunk, Owner, SlotId};

pub mod port;
pub use port::{PortEvent, PortFuture, SerialPort};

// ── Configuration & errors ──────────────────────────────────────────────

pub mod config;
pub mod error;
pub use config::LinkConfig;
pub use error::{LinkError, Result};

// ── Engine (sync core + actor driver + facade) ──────────────────────────

pub mod engine;
pub(crate) mod actor;
pub mod link;
pub use link::SerialLink;

pub mod metrics;
pub use metrics::LinkStats;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
