//! Driver task for the link engine — owns the `LinkEngine` exclusively and
//! communicates via channels, so ownership transitions have a single writer
//! by construction.
//!
//! Hardware notifications are applied on this task only; blocking callers
//! (`transmit`, `recv`) live on the facade side of the channels. The retry
//! scheduler is the `retry_at` deadline in the select loop: a single-shot
//! delayed attempt that re-arms a starved receive side or re-submits a
//! rejected transmit, re-scheduling itself while the condition persists.

use crate::config::LinkConfig;
use crate::engine::{LinkEngine, PortRequest};
use crate::error::{LinkError, Result};
use crate::metrics::LinkStats;
use crate::pool::Chunk;
use crate::port::{PortEvent, SerialPort};

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{error, trace, warn};

/// Commands sent to the link actor.
pub(crate) enum LinkCmd {
    Transmit {
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Stats {
        reply: oneshot::Sender<LinkStats>,
    },
}

/// Clonable handle to the link actor.
#[derive(Clone, Debug)]
pub(crate) struct LinkHandle {
    cmd_tx: mpsc::Sender<LinkCmd>,
}

impl LinkHandle {
    pub fn new(cmd_tx: mpsc::Sender<LinkCmd>) -> Self {
        Self { cmd_tx }
    }

    /// Send a command and wait for the reply. Returns `Closed` if the
    /// actor has exited.
    async fn request<T>(&self, cmd: impl FnOnce(oneshot::Sender<T>) -> LinkCmd) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(cmd(reply))
            .await
            .map_err(|_| LinkError::Closed)?;
        rx.await.map_err(|_| LinkError::Closed)
    }

    pub async fn transmit(&self, data: Bytes) -> Result<()> {
        self.request(|reply| LinkCmd::Transmit { data, reply })
            .await?
    }

    pub async fn stats(&self) -> Result<LinkStats> {
        self.request(|reply| LinkCmd::Stats { reply }).await
    }
}

/// Run the link actor loop.
///
/// - `event_rx`: hardware notifications from the driver.
/// - `data_tx`: completed receive units forwarded to `recv()` callers.
pub(crate) async fn run_link_actor(
    mut engine: LinkEngine,
    port: Arc<dyn SerialPort>,
    mut event_rx: mpsc::Receiver<PortEvent>,
    mut cmd_rx: mpsc::Receiver<LinkCmd>,
    data_tx: mpsc::Sender<Chunk>,
    config: LinkConfig,
) {
    let mut retry_at: Option<Instant> = None;

    // Initial flush: the facade queued the greeting and the first arm
    // before spawning the actor.
    flush_requests(&mut engine, &port, &config, &mut retry_at).await;
    forward_inbound(&mut engine, &data_tx);

    loop {
        tokio::select! {
            // Hardware notifications
            event = event_rx.recv() => {
                match event {
                    Some(event) => engine.on_event(event),
                    None => {
                        warn!("hardware event channel closed, stopping link actor");
                        break;
                    }
                }
            }

            // User commands
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(LinkCmd::Transmit { data, reply }) => {
                        let _ = reply.send(engine.transmit(&data));
                    }
                    Some(LinkCmd::Stats { reply }) => {
                        let _ = reply.send(engine.stats());
                    }
                    None => {
                        trace!("facade dropped, stopping link actor");
                        break;
                    }
                }
            }

            // Delayed retry
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)),
                    if retry_at.is_some() => {
                retry_at = None;
                engine.retry();
            }
        }

        flush_requests(&mut engine, &port, &config, &mut retry_at).await;
        forward_inbound(&mut engine, &data_tx);
    }
}

/// Perform all hardware calls the engine raised.
async fn flush_requests(
    engine: &mut LinkEngine,
    port: &Arc<dyn SerialPort>,
    config: &LinkConfig,
    retry_at: &mut Option<Instant>,
) {
    loop {
        let requests = engine.drain_requests();
        if requests.is_empty() {
            return;
        }

        // a handler below may raise follow-up requests (a rejected accept
        // schedules its retry); keep draining until the outbox is empty
        for request in requests {
            match request {
                PortRequest::RxEnable { capacity } => {
                    if let Err(e) = port.rx_enable(capacity, config.rx_idle_timeout).await {
                        warn!(error = %e, "failed to enable reception");
                    }
                }
                PortRequest::RxDisable => {
                    if let Err(e) = port.rx_disable().await {
                        warn!(error = %e, "failed to disable reception");
                    }
                }
                PortRequest::RxBufFeed { granted } => {
                    if let Err(e) = port.rx_buf_feed(granted).await {
                        warn!(error = %e, "failed to answer buffer request");
                    }
                }
                PortRequest::Tx { data } => {
                    if let Err(e) = port.tx(&data).await {
                        warn!(error = %e, "hardware rejected the transmit accept");
                        engine.tx_rejected();
                    }
                }
                PortRequest::ScheduleRetry => {
                    let at = Instant::now() + config.retry_delay;
                    if retry_at.map_or(true, |current| at < current) {
                        *retry_at = Some(at);
                    }
                }
            }
        }
    }
}

/// Move completed receive units into the consumer channel.
fn forward_inbound(engine: &mut LinkEngine, data_tx: &mpsc::Sender<Chunk>) {
    let pool = engine.pool().clone();
    while let Some(chunk) = engine.pop_inbound() {
        // channel capacity equals the pool size, so a live consumer can
        // never observe Full; Closed means the facade is gone
        match data_tx.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(chunk)) => {
                error!(slot = chunk.slot(), "inbound queue full, releasing chunk");
                pool.release(chunk);
            }
            Err(TrySendError::Closed(chunk)) => {
                pool.release(chunk);
            }
        }
    }
}
