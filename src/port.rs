//! Abstract hardware interface for the link engine
//!
//! The [`SerialPort`] trait covers the calls the engine makes into the
//! driver; completions and received data come back asynchronously as
//! [`PortEvent`] messages on a channel the driver writes to. The trait is
//! object-safe so it can be used as `Arc<dyn SerialPort>`.

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by [`SerialPort`] methods.
pub type PortFuture<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// Asynchronous notifications from the hardware driver.
///
/// The driver's notification context must never block; it only posts these
/// messages. The engine task is the sole consumer, so every buffer
/// ownership transition has exactly one writer.
#[derive(Debug, Clone)]
pub enum PortEvent {
    /// Bytes arrived while reception was enabled
    RxReady { data: Bytes },
    /// The driver asks for a standby receive buffer ahead of need
    RxBufRequest,
    /// The driver confirmed that reception has stopped
    RxDisabled,
    /// The in-flight transmission completed; `len` bytes went out
    TxDone { len: usize },
    /// The in-flight transmission was cut short after `sent` bytes
    TxAborted { sent: usize },
}

/// Byte-oriented serial hardware driven by the link engine.
pub trait SerialPort: Send + Sync + 'static {
    /// Whether the device is operational. Checked once at initialization.
    fn is_ready(&self) -> bool;

    /// Level of the host-ready (DTR-equivalent) line.
    fn host_ready(&self) -> io::Result<bool>;

    /// Begin an asynchronous transmission of `data`. Completion is reported
    /// later as [`PortEvent::TxDone`] or [`PortEvent::TxAborted`]; the call
    /// itself only waits for the hardware to accept the request.
    fn tx<'a>(&'a self, data: &'a [u8]) -> PortFuture<'a>;

    /// Grant the driver a receive buffer of `capacity` bytes and enable
    /// reception into it. `idle_timeout` lets the driver flush a partially
    /// filled buffer after line inactivity. Drivers already receiving treat
    /// a repeated call as the next buffer grant.
    fn rx_enable<'a>(&'a self, capacity: usize, idle_timeout: Duration) -> PortFuture<'a>;

    /// Ask the driver to stop delivering bytes. The stop is confirmed
    /// asynchronously with [`PortEvent::RxDisabled`].
    fn rx_disable<'a>(&'a self) -> PortFuture<'a>;

    /// Answer a [`PortEvent::RxBufRequest`]: `granted` says whether a
    /// standby buffer is available. Drivers must tolerate `false`.
    fn rx_buf_feed<'a>(&'a self, granted: bool) -> PortFuture<'a>;
}
