//! Shared test helpers for link integration tests

use serial_link::{PortFuture, SerialPort};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Route engine logs through the test harness. Idempotent.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A call the engine made into the port, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum PortCall {
    RxEnable(usize),
    RxDisable,
    RxBufFeed(bool),
    Tx(Vec<u8>),
}

/// Scriptable serial port that records every call the engine makes.
/// Completion events are injected by the test through the event channel.
pub struct MockPort {
    ready: bool,
    host_ready: AtomicBool,
    tx_rejects: AtomicUsize,
    calls: Mutex<Vec<PortCall>>,
}

impl MockPort {
    pub fn new() -> Arc<Self> {
        Self::with_ready(true)
    }

    pub fn not_ready() -> Arc<Self> {
        Self::with_ready(false)
    }

    fn with_ready(ready: bool) -> Arc<Self> {
        Arc::new(Self {
            ready,
            host_ready: AtomicBool::new(true),
            tx_rejects: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Make the next `tx` accept fail, like a driver rejecting the request.
    pub fn reject_next_tx(&self) {
        self.tx_rejects.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_host_ready(&self, ready: bool) {
        self.host_ready.store(ready, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PortCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tx_frames(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PortCall::Tx(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Poll until the recorded calls satisfy `pred`. Wrap in
    /// `tokio::time::timeout` from the test.
    pub async fn wait_calls(&self, pred: impl Fn(&[PortCall]) -> bool) {
        loop {
            if pred(&self.calls()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn record(&self, call: PortCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl SerialPort for MockPort {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn host_ready(&self) -> io::Result<bool> {
        Ok(self.host_ready.load(Ordering::SeqCst))
    }

    fn tx<'a>(&'a self, data: &'a [u8]) -> PortFuture<'a> {
        Box::pin(async move {
            if self.tx_rejects.load(Ordering::SeqCst) > 0 {
                self.tx_rejects.fetch_sub(1, Ordering::SeqCst);
                return Err(io::Error::new(io::ErrorKind::Other, "tx rejected"));
            }
            self.record(PortCall::Tx(data.to_vec()));
            Ok(())
        })
    }

    fn rx_enable<'a>(&'a self, capacity: usize, _idle_timeout: Duration) -> PortFuture<'a> {
        Box::pin(async move {
            self.record(PortCall::RxEnable(capacity));
            Ok(())
        })
    }

    fn rx_disable<'a>(&'a self) -> PortFuture<'a> {
        Box::pin(async move {
            self.record(PortCall::RxDisable);
            Ok(())
        })
    }

    fn rx_buf_feed<'a>(&'a self, granted: bool) -> PortFuture<'a> {
        Box::pin(async move {
            self.record(PortCall::RxBufFeed(granted));
            Ok(())
        })
    }
}
