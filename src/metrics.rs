//! Counters reported by the link engine

/// Statistics for a link session
///
/// Snapshot taken by [`SerialLink::stats`](crate::SerialLink::stats); all
/// counters are cumulative since initialization.
#[derive(Debug, Default, Clone)]
pub struct LinkStats {
    /// Total payload bytes accepted into receive chunks
    pub bytes_received: u64,
    /// Total payload bytes confirmed sent by the hardware
    pub bytes_sent: u64,
    /// Completed receive units published to the inbound queue
    pub chunks_received: u64,
    /// Transmit chunks fully sent and released
    pub chunks_sent: u64,
    /// Bytes dropped because no receive buffer was armed
    pub bytes_dropped: u64,
    /// Hardware transmit aborts absorbed by cursor resume
    pub tx_aborts: u64,
    /// Transmit accepts the hardware rejected; the chunk was re-queued
    pub tx_rejects: u64,
    /// Failed chunk acquisitions (receive arm and side-channel grants)
    pub alloc_failures: u64,
    /// Delayed re-arm attempts made by the retry scheduler
    pub rearm_retries: u64,
    /// Free chunks in the pool at snapshot time
    pub pool_free: usize,
}
