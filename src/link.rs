//! Public facade over the link engine

use crate::actor::{run_link_actor, LinkCmd, LinkHandle};
use crate::config::LinkConfig;
use crate::engine::LinkEngine;
use crate::error::{LinkError, Result};
use crate::metrics::LinkStats;
use crate::pool::{BufferPool, Chunk};
use crate::port::{PortEvent, SerialPort};

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info};

/// Duplex byte-stream abstraction over an event-driven serial port.
///
/// `open` wires a [`SerialPort`] and its notification channel to a
/// dedicated engine task; afterwards the link is driven entirely through
/// [`transmit`](Self::transmit) and [`recv`](Self::recv). Chunks handed
/// out by `recv` must be given back with [`release`](Self::release) once
/// consumed.
///
/// ```rust,no_run
/// use serial_link::{LinkConfig, SerialLink};
///
/// # async fn run(port: std::sync::Arc<dyn serial_link::SerialPort>,
/// #              events: tokio::sync::mpsc::Receiver<serial_link::PortEvent>)
/// #     -> serial_link::Result<()> {
/// let mut link = SerialLink::open(port, events, LinkConfig::default()).await?;
///
/// link.transmit(b"AT\r\n").await?;
///
/// let chunk = link.recv().await?;
/// println!("got {} bytes", chunk.len());
/// link.release(chunk);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SerialLink {
    handle: LinkHandle,
    data_rx: mpsc::Receiver<Chunk>,
    pool: Arc<BufferPool>,
    actor: tokio::task::JoinHandle<()>,
}

impl SerialLink {
    /// Initialize the link: verify the port is operational, optionally wait
    /// for the host-ready line, queue the greeting, arm the first receive
    /// buffer, and spawn the engine task.
    pub async fn open(
        port: Arc<dyn SerialPort>,
        events: mpsc::Receiver<PortEvent>,
        config: LinkConfig,
    ) -> Result<Self> {
        config.validate()?;

        if !port.is_ready() {
            error!("serial port is not ready");
            return Err(LinkError::PortNotReady);
        }

        if config.wait_for_host {
            wait_for_host(&port, &config).await?;
        }

        let mut engine = LinkEngine::new(config.clone());
        let pool = engine.pool().clone();

        if let Some(greeting) = &config.greeting {
            engine.transmit(greeting)?;
        }
        engine.start()?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<LinkCmd>(32);
        // sized to the pool: at most pool_chunks completed units can exist
        let (data_tx, data_rx) = mpsc::channel::<Chunk>(config.pool_chunks);

        let actor = tokio::spawn(run_link_actor(
            engine, port, events, cmd_rx, data_tx, config,
        ));

        info!("serial link initialized");
        Ok(Self {
            handle: LinkHandle::new(cmd_tx),
            data_rx,
            pool,
            actor,
        })
    }

    /// Queue `bytes` for transmission. Returns once the engine has taken
    /// the data; completion of the physical send is absorbed internally.
    /// The only caller-visible failure is pool exhaustion.
    pub async fn transmit(&self, bytes: &[u8]) -> Result<()> {
        self.handle.transmit(Bytes::copy_from_slice(bytes)).await
    }

    /// Wait for the next completed receive unit. Never yields an empty
    /// chunk; errs only if the engine task has stopped.
    pub async fn recv(&mut self) -> Result<Chunk> {
        self.data_rx.recv().await.ok_or(LinkError::Closed)
    }

    /// Return a consumed chunk to the pool.
    pub fn release(&self, chunk: Chunk) {
        self.pool.release(chunk);
    }

    /// Snapshot of the engine counters.
    pub async fn stats(&self) -> Result<LinkStats> {
        self.handle.stats().await
    }

    /// The link's buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.actor.abort();
    }
}

/// Poll the host-ready line until it asserts, bounded by the configured
/// timeout.
async fn wait_for_host(port: &Arc<dyn SerialPort>, config: &LinkConfig) -> Result<()> {
    info!("waiting for host ready signal");
    let started = Instant::now();
    let deadline = config.host_wait_timeout.map(|timeout| started + timeout);

    loop {
        if port.host_ready()? {
            break;
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(LinkError::HostWait {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        tokio::time::sleep(config.host_poll_interval).await;
    }

    info!("host ready");
    Ok(())
}
