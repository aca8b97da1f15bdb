//! Arena-backed chunk pool for link buffer allocation
//!
//! The pool is a fixed arena of equally sized chunks with a lock-free free
//! list. A [`Chunk`] carries its arena slot index for the whole session, so
//! components identify buffers structurally instead of by address. Moving a
//! `Chunk` between components is the only way to hand it over; the per-slot
//! [`Owner`] state is tracked on the side and an illegal transition is a
//! debug-build panic.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tracing::error;

/// Stable arena index identifying a chunk for its lifetime
pub type SlotId = u16;

/// Ownership state of a chunk slot
///
/// Exactly one owner at any time. `Free` means the chunk sits in the pool's
/// free list; every other state names the component currently allowed to
/// mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Owner {
    Free = 0,
    HardwareRx = 1,
    HardwareTx = 2,
    QueuedInbound = 3,
    QueuedOutbound = 4,
}

/// A pooled byte buffer of fixed capacity
#[derive(Debug)]
pub struct Chunk {
    slot: SlotId,
    cap: usize,
    data: BytesMut,
}

impl Chunk {
    fn new(slot: SlotId, cap: usize) -> Self {
        Self {
            slot,
            cap,
            data: BytesMut::with_capacity(cap),
        }
    }

    /// Arena slot index of this chunk
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Fixed capacity in bytes
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Number of bytes currently held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.cap
    }

    /// Remaining writable bytes
    pub fn remaining(&self) -> usize {
        self.cap - self.data.len()
    }

    /// Append as much of `src` as fits, returning the number of bytes taken
    pub fn fill(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        self.data.extend_from_slice(&src[..n]);
        n
    }

    /// Payload view
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the last held byte is a line terminator (`\r` or `\n`)
    pub fn ends_with_terminator(&self) -> bool {
        matches!(self.data.last(), Some(&(b'\r' | b'\n')))
    }

    fn reset(&mut self) {
        self.data.clear();
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Fixed-capacity chunk allocator with a lock-free free list
#[derive(Debug)]
pub struct BufferPool {
    free: ArrayQueue<Chunk>,
    owners: Box<[AtomicU8]>,
    chunk_capacity: usize,
    acquires: AtomicUsize,
    failures: AtomicUsize,
}

impl BufferPool {
    /// Create a pool of `chunks` chunks, each `chunk_capacity` bytes
    pub fn new(chunks: usize, chunk_capacity: usize) -> Self {
        let free = ArrayQueue::new(chunks);
        for slot in 0..chunks {
            // queue capacity equals the arena size, push cannot fail here
            let _ = free.push(Chunk::new(slot as SlotId, chunk_capacity));
        }

        Self {
            free,
            owners: (0..chunks).map(|_| AtomicU8::new(Owner::Free as u8)).collect(),
            chunk_capacity,
            acquires: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Capacity of each pooled chunk
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Total number of chunks in the arena
    pub fn capacity(&self) -> usize {
        self.owners.len()
    }

    /// Chunks currently in the free list
    pub fn free_chunks(&self) -> usize {
        self.free.len()
    }

    /// Take a free chunk, recording its new owner. Never blocks; returns
    /// `None` immediately on exhaustion.
    pub fn acquire(&self, owner: Owner) -> Option<Chunk> {
        match self.free.pop() {
            Some(chunk) => {
                self.acquires.fetch_add(1, Ordering::Relaxed);
                self.set_owner(chunk.slot(), Owner::Free, owner);
                Some(chunk)
            }
            None => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Record an ownership handover for a chunk that stays in flight
    pub fn transition(&self, slot: SlotId, from: Owner, to: Owner) {
        self.set_owner(slot, from, to);
    }

    /// Return a chunk to the free list
    pub fn release(&self, mut chunk: Chunk) {
        let slot = chunk.slot();
        let prev = self.owners[slot as usize].swap(Owner::Free as u8, Ordering::AcqRel);
        if prev == Owner::Free as u8 {
            error!(slot, "released chunk was already free");
            debug_assert!(false, "double release of chunk slot {slot}");
            return;
        }

        chunk.reset();
        let _ = self.free.push(chunk);
    }

    /// Current owner of a slot
    pub fn owner(&self, slot: SlotId) -> Owner {
        match self.owners[slot as usize].load(Ordering::Acquire) {
            1 => Owner::HardwareRx,
            2 => Owner::HardwareTx,
            3 => Owner::QueuedInbound,
            4 => Owner::QueuedOutbound,
            _ => Owner::Free,
        }
    }

    /// Pool statistics (successful acquires, failed acquires, free chunks)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.acquires.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
            self.free.len(),
        )
    }

    fn set_owner(&self, slot: SlotId, from: Owner, to: Owner) {
        match self.owners[slot as usize].compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(actual) => {
                error!(
                    slot,
                    expected = from as u8,
                    actual,
                    next = to as u8,
                    "illegal chunk ownership transition"
                );
                debug_assert!(
                    false,
                    "illegal ownership transition for slot {slot}: {from:?} -> {to:?}"
                );
                self.owners[slot as usize].store(to as u8, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_roundtrip() {
        let pool = BufferPool::new(2, 16);
        assert_eq!(pool.free_chunks(), 2);

        let chunk = pool.acquire(Owner::HardwareRx).unwrap();
        assert_eq!(pool.free_chunks(), 1);
        assert_eq!(pool.owner(chunk.slot()), Owner::HardwareRx);
        assert_eq!(chunk.capacity(), 16);

        let slot = chunk.slot();
        pool.release(chunk);
        assert_eq!(pool.free_chunks(), 2);
        assert_eq!(pool.owner(slot), Owner::Free);
    }

    #[test]
    fn test_exhaustion_reported_immediately() {
        let pool = BufferPool::new(1, 16);
        let held = pool.acquire(Owner::HardwareTx).unwrap();
        assert!(pool.acquire(Owner::HardwareRx).is_none());

        let (acquires, failures, _) = pool.stats();
        assert_eq!(acquires, 1);
        assert_eq!(failures, 1);

        pool.release(held);
        assert!(pool.acquire(Owner::HardwareRx).is_some());
    }

    #[test]
    fn test_transition_tracks_handover() {
        let pool = BufferPool::new(1, 16);
        let chunk = pool.acquire(Owner::QueuedOutbound).unwrap();
        pool.transition(chunk.slot(), Owner::QueuedOutbound, Owner::HardwareTx);
        assert_eq!(pool.owner(chunk.slot()), Owner::HardwareTx);
        pool.release(chunk);
    }

    #[test]
    fn test_chunk_fill_truncates() {
        let pool = BufferPool::new(1, 4);
        let mut chunk = pool.acquire(Owner::QueuedOutbound).unwrap();

        assert_eq!(chunk.fill(b"abcdef"), 4);
        assert!(chunk.is_full());
        assert_eq!(chunk.data(), b"abcd");
        assert_eq!(chunk.fill(b"x"), 0);
        pool.release(chunk);
    }

    #[test]
    fn test_terminator_predicate() {
        let pool = BufferPool::new(1, 8);
        let mut chunk = pool.acquire(Owner::HardwareRx).unwrap();

        assert!(!chunk.ends_with_terminator());
        chunk.fill(b"at");
        assert!(!chunk.ends_with_terminator());
        chunk.fill(b"\r");
        assert!(chunk.ends_with_terminator());
        pool.release(chunk);
    }

    #[test]
    fn test_release_clears_payload() {
        let pool = BufferPool::new(1, 8);
        let mut chunk = pool.acquire(Owner::HardwareRx).unwrap();
        chunk.fill(b"stale");
        pool.release(chunk);

        let chunk = pool.acquire(Owner::HardwareRx).unwrap();
        assert!(chunk.is_empty());
        pool.release(chunk);
    }
}
