//! Synchronous link engine core
//!
//! `LinkEngine` is a pure state machine: hardware notifications go in
//! through [`on_event`](LinkEngine::on_event), completed receive units
//! accumulate in an inbound queue, and the hardware calls the engine wants
//! made come out as [`PortRequest`]s drained by the driver task. Keeping
//! the engine free of I/O makes every ownership transition single-threaded
//! and the whole state machine deterministic to test.
//!
//! Receive side: `Idle → Armed → Filling → Disabling → Idle`. The engine
//! holds at most two chunks registered for reception, the active buffer
//! and a standby armed ahead of need, so a completed unit never opens a
//! gap in reception. A unit is complete when the active chunk fills or the
//! last received byte is `\r` or `\n`.
//!
//! Transmit side: FIFO queue drained one chunk at a time. Exactly one
//! chunk is in flight; an aborted transmission is resumed from the byte
//! offset the hardware confirmed, tracked by an [`AbortCursor`].

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::metrics::LinkStats;
use crate::pool::{BufferPool, Chunk, Owner, SlotId};
use crate::port::PortEvent;

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Hardware calls requested by the engine, performed by the driver task.
#[derive(Debug)]
pub enum PortRequest {
    /// Grant the driver a receive buffer and (re-)enable reception
    RxEnable { capacity: usize },
    /// Stop reception; confirmed later by [`PortEvent::RxDisabled`]
    RxDisable,
    /// Answer to a standby-buffer request from the driver
    RxBufFeed { granted: bool },
    /// Start or resume a transmission
    Tx { data: Bytes },
    /// Run the delayed retry after the configured backoff
    ScheduleRetry,
}

/// Receive-side state; the chunk registered with the hardware rides along.
#[derive(Debug)]
enum RxState {
    /// No buffer armed; reception paused (only while waiting for a retry)
    Idle,
    /// A fresh chunk is registered as the receive target
    Armed(Chunk),
    /// Bytes have landed in the active chunk
    Filling(Chunk),
    /// Completion predicate fired; waiting for the driver to confirm stop
    Disabling(Chunk),
}

/// Progress marker for a transmission interrupted by a hardware abort.
#[derive(Debug)]
struct AbortCursor {
    slot: SlotId,
    sent: usize,
}

/// The serial transport engine state machine.
pub struct LinkEngine {
    config: LinkConfig,
    pool: Arc<BufferPool>,

    // Receive side
    rx: RxState,
    rx_next: Option<Chunk>,
    rx_overflow: BytesMut,

    // Transmit side
    in_flight: Option<Chunk>,
    outbound: VecDeque<Chunk>,
    abort: Option<AbortCursor>,

    inbound: VecDeque<Chunk>,
    requests: Vec<PortRequest>,
    stats: LinkStats,
}

impl LinkEngine {
    /// Create an engine with its own buffer pool sized from `config`.
    pub fn new(config: LinkConfig) -> Self {
        let pool = Arc::new(BufferPool::new(config.pool_chunks, config.chunk_capacity));

        Self {
            config,
            pool,
            rx: RxState::Idle,
            rx_next: None,
            rx_overflow: BytesMut::new(),
            in_flight: None,
            outbound: VecDeque::new(),
            abort: None,
            inbound: VecDeque::new(),
            requests: Vec::new(),
            stats: LinkStats::default(),
        }
    }

    /// Shared handle to the engine's buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Arm the first receive buffer. Failing to allocate it here is fatal;
    /// the retry path only covers re-arms once the session is running.
    pub fn start(&mut self) -> Result<()> {
        let chunk = self
            .pool
            .acquire(Owner::HardwareRx)
            .ok_or_else(|| LinkError::exhausted("initial receive buffer"))?;
        self.rx = RxState::Armed(chunk);
        self.requests.push(PortRequest::RxEnable {
            capacity: self.config.chunk_capacity,
        });
        Ok(())
    }

    /// Queue `data` for transmission, starting it immediately when the
    /// transmit side is idle. Payload beyond the chunk capacity is
    /// truncated, matching the bounded-buffer contract.
    pub fn transmit(&mut self, data: &[u8]) -> Result<()> {
        let Some(mut chunk) = self.pool.acquire(Owner::QueuedOutbound) else {
            warn!("unable to allocate a transmit buffer");
            return Err(LinkError::exhausted("transmit buffer"));
        };

        let copied = chunk.fill(data);
        if copied < data.len() {
            trace!(
                dropped = data.len() - copied,
                "transmit payload truncated to chunk capacity"
            );
        }

        self.outbound.push_back(chunk);
        if self.in_flight.is_none() {
            self.send_next();
        }
        Ok(())
    }

    /// Apply a hardware notification.
    pub fn on_event(&mut self, event: PortEvent) {
        match event {
            PortEvent::RxReady { data } => self.on_rx_ready(data),
            PortEvent::RxBufRequest => self.on_rx_buf_request(),
            PortEvent::RxDisabled => self.on_rx_disabled(),
            PortEvent::TxDone { len } => self.on_tx_done(len),
            PortEvent::TxAborted { sent } => self.on_tx_aborted(sent),
        }
    }

    /// Delayed retry, invoked by the scheduler: re-arm reception if it is
    /// paused and restart the transmit queue if nothing is in flight.
    pub fn retry(&mut self) {
        if matches!(self.rx, RxState::Idle) {
            self.stats.rearm_retries += 1;
            self.rearm();
        }
        if self.in_flight.is_none() {
            self.send_next();
        }
    }

    /// The driver could not hand the in-flight chunk to the hardware. The
    /// chunk goes back to the head of the queue, so nothing overtakes it,
    /// and the retry scheduler re-submits it after the backoff.
    pub fn tx_rejected(&mut self) {
        let Some(chunk) = self.in_flight.take() else {
            warn!("tx rejection with no transmission in flight");
            return;
        };

        self.stats.tx_rejects += 1;
        self.abort = None;
        warn!(slot = chunk.slot(), "hardware rejected the transmission, re-queueing");
        self.pool
            .transition(chunk.slot(), Owner::HardwareTx, Owner::QueuedOutbound);
        self.outbound.push_front(chunk);
        self.requests.push(PortRequest::ScheduleRetry);
    }

    /// Next completed receive unit, in hardware completion order.
    pub fn pop_inbound(&mut self) -> Option<Chunk> {
        self.inbound.pop_front()
    }

    /// Take the pending hardware requests, in the order they were raised.
    pub fn drain_requests(&mut self) -> Vec<PortRequest> {
        mem::take(&mut self.requests)
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> LinkStats {
        let mut stats = self.stats.clone();
        stats.pool_free = self.pool.free_chunks();
        stats
    }

    // ── Receive side ────────────────────────────────────────────────────

    fn on_rx_ready(&mut self, mut data: Bytes) {
        trace!(len = data.len(), "rx ready");

        loop {
            if data.is_empty() {
                return;
            }

            match mem::replace(&mut self.rx, RxState::Idle) {
                RxState::Armed(mut chunk) | RxState::Filling(mut chunk) => {
                    let n = fill_unit(&mut chunk, &data);
                    data.advance(n);
                    self.stats.bytes_received += n as u64;

                    if chunk.is_full() {
                        // A full buffer completes without a disable round
                        // trip: the driver rolls straight into the standby.
                        self.publish(chunk);
                        if !self.rearm() {
                            self.drop_bytes(data);
                            return;
                        }
                    } else if chunk.ends_with_terminator() {
                        self.requests.push(PortRequest::RxDisable);
                        if self.rx_next.is_none() {
                            self.rx_next = self.side_acquire();
                        }
                        self.rx = RxState::Disabling(chunk);
                        // trailing bytes belong to the next unit
                        self.fill_next(data);
                        return;
                    } else {
                        self.rx = RxState::Filling(chunk);
                    }
                }
                RxState::Disabling(chunk) => {
                    // bytes racing the stop request land in the standby
                    self.rx = RxState::Disabling(chunk);
                    self.fill_next(data);
                    return;
                }
                RxState::Idle => {
                    self.drop_bytes(data);
                    return;
                }
            }
        }
    }

    fn on_rx_buf_request(&mut self) {
        trace!("rx buffer request");
        if self.rx_next.is_none() {
            self.rx_next = self.side_acquire();
        }
        self.requests.push(PortRequest::RxBufFeed {
            granted: self.rx_next.is_some(),
        });
    }

    fn on_rx_disabled(&mut self) {
        trace!("rx disabled");

        match mem::replace(&mut self.rx, RxState::Idle) {
            RxState::Disabling(chunk) | RxState::Armed(chunk) | RxState::Filling(chunk) => {
                // an unrequested stop (driver idle-timeout flush) retires
                // the active buffer the same way
                self.publish(chunk);
            }
            RxState::Idle => {}
        }

        match self.rx_next.take() {
            // the standby may itself have completed while the stop was in
            // flight; re-check the predicate before promoting it
            Some(next) if next.is_full() || next.ends_with_terminator() => {
                self.publish(next);
                self.rearm();
            }
            Some(next) => {
                self.rx = if next.is_empty() {
                    RxState::Armed(next)
                } else {
                    RxState::Filling(next)
                };
                self.requests.push(PortRequest::RxEnable {
                    capacity: self.config.chunk_capacity,
                });
            }
            None => {
                self.rearm();
            }
        }

        // bytes held back behind a completed standby resume the normal
        // fill path now that the order is settled
        let pending = mem::take(&mut self.rx_overflow);
        if !pending.is_empty() {
            self.on_rx_ready(pending.freeze());
        }
    }

    /// Move a completed unit to the inbound queue, or straight back to the
    /// pool when it is empty. Empty units are never queued.
    fn publish(&mut self, chunk: Chunk) {
        if chunk.is_empty() {
            self.pool.release(chunk);
            return;
        }

        self.pool
            .transition(chunk.slot(), Owner::HardwareRx, Owner::QueuedInbound);
        self.stats.chunks_received += 1;
        trace!(slot = chunk.slot(), len = chunk.len(), "receive unit complete");
        self.inbound.push_back(chunk);
    }

    /// Arm a fresh receive buffer, preferring the standby. On exhaustion
    /// the receive side goes idle and the retry scheduler takes over.
    fn rearm(&mut self) -> bool {
        let chunk = self
            .rx_next
            .take()
            .or_else(|| self.pool.acquire(Owner::HardwareRx));

        match chunk {
            Some(chunk) => {
                self.rx = RxState::Armed(chunk);
                self.requests.push(PortRequest::RxEnable {
                    capacity: self.config.chunk_capacity,
                });
                true
            }
            None => {
                self.stats.alloc_failures += 1;
                warn!("unable to allocate a receive buffer, scheduling re-arm");
                self.rx = RxState::Idle;
                self.requests.push(PortRequest::ScheduleRetry);
                false
            }
        }
    }

    fn side_acquire(&mut self) -> Option<Chunk> {
        let chunk = self.pool.acquire(Owner::HardwareRx);
        if chunk.is_none() {
            self.stats.alloc_failures += 1;
            warn!("unable to allocate a standby receive buffer");
        }
        chunk
    }

    fn fill_next(&mut self, mut data: Bytes) {
        if data.is_empty() {
            return;
        }
        if self.rx_next.is_none() && self.rx_overflow.is_empty() {
            self.rx_next = self.side_acquire();
        }

        match &mut self.rx_next {
            Some(chunk)
                if self.rx_overflow.is_empty()
                    && !chunk.is_full()
                    && !chunk.ends_with_terminator() =>
            {
                let n = fill_unit(chunk, &data);
                data.advance(n);
                self.stats.bytes_received += n as u64;
                if !data.is_empty() {
                    self.rx_overflow.extend_from_slice(&data);
                }
            }
            Some(_) => {
                // the standby already holds a complete unit; later bytes
                // wait for the next arm cycle so units stay in order
                self.rx_overflow.extend_from_slice(&data);
            }
            None => self.drop_bytes(data),
        }
    }

    fn drop_bytes(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.stats.bytes_dropped += data.len() as u64;
        warn!(len = data.len(), "no receive buffer available, dropping bytes");
    }

    // ── Transmit side ───────────────────────────────────────────────────

    fn on_tx_done(&mut self, len: usize) {
        trace!(len, "tx done");
        if self.in_flight.is_none() {
            warn!("tx completion with no transmission in flight");
            return;
        }
        self.complete_in_flight();
    }

    fn on_tx_aborted(&mut self, sent: usize) {
        let (slot, len) = match &self.in_flight {
            Some(chunk) => (chunk.slot(), chunk.len()),
            None => {
                warn!("tx abort with no transmission in flight");
                return;
            }
        };

        self.stats.tx_aborts += 1;

        // repeated partial aborts of the same chunk accumulate progress
        let cursor = self.abort.get_or_insert(AbortCursor { slot, sent: 0 });
        debug_assert_eq!(cursor.slot, slot);
        cursor.sent += sent;
        let resume_at = cursor.sent;

        if resume_at >= len {
            warn!(slot, "abort reported after the whole chunk was sent");
            self.complete_in_flight();
            return;
        }

        debug!(slot, resume_at, remaining = len - resume_at, "resuming aborted transmission");
        if let Some(chunk) = &self.in_flight {
            self.requests.push(PortRequest::Tx {
                data: Bytes::copy_from_slice(&chunk.data()[resume_at..]),
            });
        }
    }

    /// Hand a queued chunk to the hardware. The caller guarantees nothing
    /// is in flight.
    fn begin_send(&mut self, chunk: Chunk) {
        self.pool
            .transition(chunk.slot(), Owner::QueuedOutbound, Owner::HardwareTx);
        trace!(slot = chunk.slot(), len = chunk.len(), "starting transmission");
        self.requests.push(PortRequest::Tx {
            data: Bytes::copy_from_slice(chunk.data()),
        });
        self.in_flight = Some(chunk);
    }

    /// Release the finished chunk and pull the next one. No chunk starts
    /// until the previous owner released it, so exactly one is in flight.
    fn complete_in_flight(&mut self) {
        let Some(chunk) = self.in_flight.take() else {
            return;
        };

        self.stats.bytes_sent += chunk.len() as u64;
        self.stats.chunks_sent += 1;
        self.abort = None;
        self.pool.release(chunk);
        self.send_next();
    }

    fn send_next(&mut self) {
        if let Some(next) = self.outbound.pop_front() {
            self.begin_send(next);
        }
    }
}

/// Append bytes to the active chunk, stopping after the first line
/// terminator so a unit boundary inside one delivery is honored.
fn fill_unit(chunk: &mut Chunk, data: &[u8]) -> usize {
    let limit = data.len().min(chunk.remaining());
    let take = match data[..limit]
        .iter()
        .position(|&byte| matches!(byte, b'\r' | b'\n'))
    {
        Some(pos) => pos + 1,
        None => limit,
    };
    chunk.fill(&data[..take])
}
