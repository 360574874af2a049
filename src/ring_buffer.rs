//! Lock-free SPSC ring of interleaved frames.
//!
//! The ring bridges the render thread (producer) and the device callback
//! (consumer). Capacity is fixed at several device periods; wrap-around is
//! handled as two contiguous copies on each side. The callback never takes
//! a lock and never allocates - on starvation it pads the remainder of the
//! device buffer with silence itself.
//!
//! The consumer half can be dropped and re-claimed, which is what lets a
//! device hot-switch rebuild the output stream while the ring (and any
//! audio already queued in it) stays intact.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

struct RingShared {
    /// Interleaved sample storage; length = `capacity_frames * channels`.
    data: Box<[UnsafeCell<f32>]>,
    /// Monotonic sample counters; index into `data` via `% data.len()`.
    write: CachePadded<AtomicUsize>,
    read: CachePadded<AtomicUsize>,
    channels: usize,
    producer_claimed: AtomicBool,
    consumer_claimed: AtomicBool,
}

// SAFETY: the producer only writes samples in [read, write) headroom it has
// observed via an Acquire load of `read`, and publishes them with a Release
// store of `write`; the consumer mirrors this. Claim flags enforce at most
// one producer and one consumer at a time, so no sample cell is ever written
// and read concurrently.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

/// Handle owning the ring storage. Hand out one [`RingProducer`] and one
/// [`RingConsumer`] at a time via [`producer`](Self::producer) /
/// [`consumer`](Self::consumer).
pub struct FrameRing {
    shared: Arc<RingShared>,
}

impl FrameRing {
    /// Create a ring holding `capacity_frames` frames of `channels`
    /// interleaved samples.
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        assert!(channels >= 1 && capacity_frames >= 1);
        let len = channels * capacity_frames;
        let data = (0..len).map(|_| UnsafeCell::new(0.0)).collect();
        Self {
            shared: Arc::new(RingShared {
                data,
                write: CachePadded::new(AtomicUsize::new(0)),
                read: CachePadded::new(AtomicUsize::new(0)),
                channels,
                producer_claimed: AtomicBool::new(false),
                consumer_claimed: AtomicBool::new(false),
            }),
        }
    }

    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.shared.data.len() / self.shared.channels
    }

    /// Claim the producer half. Returns `None` while a producer is alive.
    pub fn producer(&self) -> Option<RingProducer> {
        self.shared
            .producer_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RingProducer {
                shared: self.shared.clone(),
            })
    }

    /// Claim the consumer half. Returns `None` while a consumer is alive.
    /// After the previous consumer is dropped (e.g. with its device stream),
    /// a fresh one can be claimed for the replacement stream.
    pub fn consumer(&self) -> Option<RingConsumer> {
        self.shared
            .consumer_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RingConsumer {
                shared: self.shared.clone(),
            })
    }
}

/// Render-thread half: pushes interleaved frames.
pub struct RingProducer {
    shared: Arc<RingShared>,
}

impl RingProducer {
    /// Frames that can be written without overtaking the consumer.
    pub fn available_write_frames(&self) -> usize {
        let s = &self.shared;
        let used = s.write.load(Ordering::Relaxed) - s.read.load(Ordering::Acquire);
        (s.data.len() - used) / s.channels
    }

    /// Write interleaved samples (`src.len()` must be a multiple of the
    /// channel count). Returns the number of whole frames written; never
    /// blocks.
    pub fn write_frames(&mut self, src: &[f32]) -> usize {
        let s = &self.shared;
        let read = s.read.load(Ordering::Acquire);
        let write = s.write.load(Ordering::Relaxed);
        let free = s.data.len() - (write - read);
        let n = src.len().min(free) / s.channels * s.channels;

        let cap = s.data.len();
        let idx = write % cap;
        let first = n.min(cap - idx);
        for (i, &v) in src[..first].iter().enumerate() {
            // SAFETY: [write, write + n) is unpublished headroom; only this
            // producer touches it.
            unsafe { *s.data[idx + i].get() = v };
        }
        for (i, &v) in src[first..n].iter().enumerate() {
            unsafe { *s.data[i].get() = v };
        }

        s.write.store(write + n, Ordering::Release);
        n / s.channels
    }
}

impl Drop for RingProducer {
    fn drop(&mut self) {
        self.shared.producer_claimed.store(false, Ordering::Release);
    }
}

/// Device-callback half: drains interleaved frames.
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

impl RingConsumer {
    /// Frames currently queued.
    pub fn available_read_frames(&self) -> usize {
        let s = &self.shared;
        (s.write.load(Ordering::Acquire) - s.read.load(Ordering::Relaxed)) / s.channels
    }

    /// Drain into `dst`, wrapping as needed. Returns the number of samples
    /// copied; the caller pads any remainder with silence.
    pub fn read_samples(&mut self, dst: &mut [f32]) -> usize {
        let s = &self.shared;
        let write = s.write.load(Ordering::Acquire);
        let read = s.read.load(Ordering::Relaxed);
        let n = dst.len().min(write - read);

        let cap = s.data.len();
        let idx = read % cap;
        let first = n.min(cap - idx);
        for (i, slot) in dst[..first].iter_mut().enumerate() {
            // SAFETY: [read, read + n) was published by the producer's
            // Release store of `write`, observed above with Acquire.
            *slot = unsafe { *s.data[idx + i].get() };
        }
        for (i, slot) in dst[first..n].iter_mut().enumerate() {
            *slot = unsafe { *s.data[i].get() };
        }

        s.read.store(read + n, Ordering::Release);
        n
    }
}

impl Drop for RingConsumer {
    fn drop(&mut self) {
        self.shared.consumer_claimed.store(false, Ordering::Release);
    }
}
