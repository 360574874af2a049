//! Lock-free buffer pool keyed by channel count.
//!
//! The pool is the sole allocator on the render path: ports rent blocks and
//! return them when their shape changes or their node is disposed. A single
//! free-list cannot serve variable channel counts, so the pool keeps one
//! bounded recycle stack per channel count; rent stays O(1) and topology
//! churn is the only source of allocation after prewarm.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;
use tracing::debug;

use crate::block::AudioBlock;
use crate::{FRAMES_PER_BLOCK, MAX_CHANNELS, MIN_CHANNELS};

/// Maximum recyclable blocks retained per channel count.
const STACK_CAP: usize = 64;

/// Reusable [`AudioBlock`]s and interleaved scratch vectors, both keyed by
/// channel count. Safe for concurrent rent/return from any thread.
pub struct BufferPool {
    /// Recycle stacks, index `channels - 1`.
    blocks: Vec<ArrayQueue<AudioBlock>>,

    /// Interleaved `f32` scratch buffers (`128 * channels` samples each),
    /// index `channels - 1`.
    scratch: Vec<ArrayQueue<Vec<f32>>>,

    rents: AtomicUsize,
    returns: AtomicUsize,
    allocations: AtomicUsize,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Total blocks handed out.
    pub rents: usize,
    /// Total blocks handed back.
    pub returns: usize,
    /// Rents that missed the recycle stack and allocated.
    pub allocations: usize,
    /// Blocks currently held by ports (`rents - returns`).
    pub outstanding: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        let blocks = (0..MAX_CHANNELS).map(|_| ArrayQueue::new(STACK_CAP)).collect();
        let scratch = (0..MAX_CHANNELS).map(|_| ArrayQueue::new(STACK_CAP)).collect();
        Self {
            blocks,
            scratch,
            rents: AtomicUsize::new(0),
            returns: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
        }
    }

    /// Pre-allocate `count` blocks for the given channel count so the first
    /// blocks of a render never allocate.
    pub fn prewarm(&self, channels: usize, count: usize) {
        let stack = &self.blocks[channels - 1];
        for _ in 0..count.min(STACK_CAP) {
            let _ = stack.push(AudioBlock::new(channels));
        }
        debug!(channels, count, "buffer pool prewarmed");
    }

    /// Rent a zeroed, silent block. Pops the recycle stack or allocates on
    /// a miss.
    pub fn rent(&self, channels: usize) -> AudioBlock {
        assert!(
            (MIN_CHANNELS..=MAX_CHANNELS).contains(&channels),
            "channel count {channels} out of range"
        );
        self.rents.fetch_add(1, Ordering::Relaxed);
        match self.blocks[channels - 1].pop() {
            Some(mut block) => {
                block.clear();
                block
            }
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                AudioBlock::new(channels)
            }
        }
    }

    /// Return a block. Pushes onto the matching recycle stack, or drops the
    /// block when the stack is full.
    pub fn recycle(&self, block: AudioBlock) {
        self.returns.fetch_add(1, Ordering::Relaxed);
        let _ = self.blocks[block.channels() - 1].push(block);
    }

    /// Rent an interleaved scratch buffer of `128 * channels` zeroed samples.
    pub fn rent_scratch(&self, channels: usize) -> Vec<f32> {
        assert!((MIN_CHANNELS..=MAX_CHANNELS).contains(&channels));
        match self.scratch[channels - 1].pop() {
            Some(mut buf) => {
                buf.fill(0.0);
                buf
            }
            None => vec![0.0; FRAMES_PER_BLOCK * channels],
        }
    }

    /// Return an interleaved scratch buffer to the pool.
    pub fn recycle_scratch(&self, channels: usize, buf: Vec<f32>) {
        if buf.len() == FRAMES_PER_BLOCK * channels {
            let _ = self.scratch[channels - 1].push(buf);
        }
    }

    /// Counters for conservation checks: `outstanding` never underflows
    /// because every recycle is preceded by a rent.
    pub fn stats(&self) -> PoolStats {
        let rents = self.rents.load(Ordering::Relaxed);
        let returns = self.returns.load(Ordering::Relaxed);
        PoolStats {
            rents,
            returns,
            allocations: self.allocations.load(Ordering::Relaxed),
            outstanding: rents - returns,
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
