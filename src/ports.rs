//! Node input/output ports and channel conversion.
//!
//! An input port owns a leased destination block and the list of upstream
//! outputs feeding it; each block it re-derives its effective channel count
//! from its policy, re-leases the block if the shape changed, and
//! additively mixes every connected source through the channel-conversion
//! law. An output port owns the block its node last published plus the list
//! of downstream consumers (needed for disposal bookkeeping).

use crate::block::AudioBlock;
use crate::buffer_pool::BufferPool;
use crate::node::NodeId;
use crate::{MAX_CHANNELS, MIN_CHANNELS};

/// How an input port derives its effective channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCountMode {
    /// Maximum of the nominal count and every connected source's count.
    Max,
    /// Like `Max`, but clamped to the nominal count.
    ClampedMax,
    /// Always the nominal count.
    Explicit,
}

/// How channel counts are reconciled while mixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelInterpretation {
    /// Speaker layouts: mono fans out, equal-power downmix to mono,
    /// otherwise channel-wise up to the shorter side.
    Speakers,
    /// Plain truncation/zero-padding, no scaling.
    Discrete,
}

/// Identifies one output port: `(node, output index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRef {
    pub node: NodeId,
    pub output: usize,
}

/// Identifies one mixing destination: a node input port or a parameter's
/// hidden summing input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRef {
    Port { node: NodeId, input: usize },
    Param { node: NodeId, param: usize },
}

impl InputRef {
    pub fn node(&self) -> NodeId {
        match *self {
            InputRef::Port { node, .. } | InputRef::Param { node, .. } => node,
        }
    }
}

/// Destination side of graph edges.
pub struct InputPort {
    block: AudioBlock,
    connections: Vec<OutputRef>,
    channel_count: usize,
    mode: ChannelCountMode,
    interpretation: ChannelInterpretation,
}

impl InputPort {
    pub(crate) fn new(
        pool: &BufferPool,
        channel_count: usize,
        mode: ChannelCountMode,
        interpretation: ChannelInterpretation,
    ) -> Self {
        Self {
            block: pool.rent(channel_count),
            connections: Vec::new(),
            channel_count,
            mode,
            interpretation,
        }
    }

    /// The mixed result of the last pull.
    pub fn block(&self) -> &AudioBlock {
        &self.block
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn mode(&self) -> ChannelCountMode {
        self.mode
    }

    pub fn interpretation(&self) -> ChannelInterpretation {
        self.interpretation
    }

    pub(crate) fn connections(&self) -> &[OutputRef] {
        &self.connections
    }

    pub(crate) fn connection_at(&self, idx: usize) -> Option<OutputRef> {
        self.connections.get(idx).copied()
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    pub(crate) fn add_connection(&mut self, from: OutputRef) {
        if !self.connections.contains(&from) {
            self.connections.push(from);
        }
    }

    pub(crate) fn remove_connection(&mut self, from: OutputRef) {
        self.connections.retain(|c| *c != from);
    }

    pub(crate) fn set_channel_count(&mut self, count: usize) {
        debug_assert!((MIN_CHANNELS..=MAX_CHANNELS).contains(&count));
        self.channel_count = count;
    }

    pub(crate) fn set_mode(&mut self, mode: ChannelCountMode) {
        self.mode = mode;
    }

    pub(crate) fn set_interpretation(&mut self, interpretation: ChannelInterpretation) {
        self.interpretation = interpretation;
    }

    /// Effective channel count given the published counts of the connected
    /// sources.
    pub(crate) fn effective_channels<I>(&self, source_counts: I) -> usize
    where
        I: IntoIterator<Item = usize>,
    {
        let effective = match self.mode {
            ChannelCountMode::Explicit => self.channel_count,
            ChannelCountMode::Max => source_counts
                .into_iter()
                .fold(self.channel_count, usize::max),
            // Widest source wins but never exceeds the nominal count; an
            // unconnected port falls back to the nominal.
            ChannelCountMode::ClampedMax => {
                let widest = source_counts.into_iter().fold(0, usize::max);
                if widest == 0 {
                    self.channel_count
                } else {
                    widest.min(self.channel_count)
                }
            }
        };
        effective.clamp(MIN_CHANNELS, MAX_CHANNELS)
    }

    /// Re-lease the destination block if the effective shape changed, then
    /// zero it for mixing.
    pub(crate) fn prepare(&mut self, pool: &BufferPool, effective: usize) {
        if self.block.channels() != effective {
            let old = std::mem::replace(&mut self.block, pool.rent(effective));
            pool.recycle(old);
        }
        self.block.clear();
    }

    /// Mix one source block in.
    pub(crate) fn accumulate(&mut self, source: &AudioBlock) {
        mix_into(source, &mut self.block, self.interpretation);
    }

    pub(crate) fn into_block(self) -> AudioBlock {
        self.block
    }
}

/// Source side of graph edges.
pub struct OutputPort {
    block: AudioBlock,
    consumers: Vec<InputRef>,
}

impl OutputPort {
    pub(crate) fn new(pool: &BufferPool, channel_count: usize) -> Self {
        Self {
            block: pool.rent(channel_count),
            consumers: Vec::new(),
        }
    }

    /// The block published by the owner's last process.
    pub fn block(&self) -> &AudioBlock {
        &self.block
    }

    pub fn block_mut(&mut self) -> &mut AudioBlock {
        &mut self.block
    }

    /// Re-lease the published block if the node wants a different channel
    /// count this block.
    pub fn ensure_channels(&mut self, pool: &BufferPool, channels: usize) {
        if self.block.channels() != channels {
            let old = std::mem::replace(&mut self.block, pool.rent(channels));
            pool.recycle(old);
        }
    }

    pub(crate) fn consumers(&self) -> &[InputRef] {
        &self.consumers
    }

    pub(crate) fn add_consumer(&mut self, to: InputRef) {
        if !self.consumers.contains(&to) {
            self.consumers.push(to);
        }
    }

    pub(crate) fn remove_consumer(&mut self, to: InputRef) {
        self.consumers.retain(|c| *c != to);
    }

    pub(crate) fn into_block(self) -> AudioBlock {
        self.block
    }
}

/// Additive channel-converting mix of `src` into `dst`.
///
/// Speaker interpretation: equal counts add channel-wise; a mono source
/// fans out into every destination channel; a multi-channel source folding
/// to mono is scaled by `1/sqrt(N)` (equal power); anything else adds
/// channel-wise up to the shorter side. Discrete interpretation always
/// truncates/zero-pads channel-wise with no scaling.
pub(crate) fn mix_into(src: &AudioBlock, dst: &mut AudioBlock, interp: ChannelInterpretation) {
    let sc = src.channels();
    let dc = dst.channels();
    // The silent hint comes from the sources, not from the mixed samples:
    // adding any non-silent source drops it, even if the sum is zero.
    let still_silent = dst.is_silent() && src.is_silent();

    match interp {
        ChannelInterpretation::Speakers if sc == 1 && dc > 1 => {
            for ch in 0..dc {
                add_channel(src.channel(0), dst.channel_mut(ch));
            }
        }
        ChannelInterpretation::Speakers if sc > 1 && dc == 1 => {
            let scale = 1.0 / (sc as f32).sqrt();
            for ch in 0..sc {
                for (o, &s) in dst.channel_mut(0).iter_mut().zip(src.channel(ch)) {
                    *o += s * scale;
                }
            }
        }
        // Equal counts, mismatched multi-channel, and everything discrete:
        // channel-wise up to the shorter side.
        _ => {
            for ch in 0..sc.min(dc) {
                add_channel(src.channel(ch), dst.channel_mut(ch));
            }
        }
    }

    dst.set_silent(still_silent);
}

#[inline]
fn add_channel(src: &[f32], dst: &mut [f32]) {
    for (o, &s) in dst.iter_mut().zip(src) {
        *o += s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_of(channels: usize, values: &[f32]) -> AudioBlock {
        let mut b = AudioBlock::new(channels);
        for (ch, &v) in values.iter().enumerate() {
            b.channel_mut(ch).fill(v);
        }
        b
    }

    #[test]
    fn test_mix_equal_channels_adds() {
        let src = block_of(2, &[0.25, -0.5]);
        let mut dst = block_of(2, &[0.5, 0.5]);
        mix_into(&src, &mut dst, ChannelInterpretation::Speakers);
        assert!(dst.channel(0).iter().all(|&v| (v - 0.75).abs() < 1e-6));
        assert!(dst.channel(1).iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_mix_mono_fans_out() {
        let src = block_of(1, &[0.5]);
        let mut dst = AudioBlock::new(2);
        dst.clear();
        mix_into(&src, &mut dst, ChannelInterpretation::Speakers);
        assert!(dst.channel(0).iter().all(|&v| v == 0.5));
        assert!(dst.channel(1).iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_mix_downmix_equal_power() {
        let src = block_of(2, &[1.0, -1.0]);
        let mut dst = AudioBlock::new(1);
        dst.clear();
        mix_into(&src, &mut dst, ChannelInterpretation::Speakers);
        // (1.0 + (-1.0)) / sqrt(2) == 0.0
        assert!(dst.channel(0).iter().all(|&v| v.abs() < 1e-6));
        // Mixed from a non-silent source, so the hint is cleared.
        assert!(!dst.is_silent());
    }

    #[test]
    fn test_mix_downmix_scales_by_sqrt_n() {
        let src = block_of(4, &[1.0, 1.0, 1.0, 1.0]);
        let mut dst = AudioBlock::new(1);
        dst.clear();
        mix_into(&src, &mut dst, ChannelInterpretation::Speakers);
        assert!(dst.channel(0).iter().all(|&v| (v - 2.0).abs() < 1e-5));
    }

    #[test]
    fn test_mix_mismatched_truncates_surplus() {
        let src = block_of(3, &[0.1, 0.2, 0.9]);
        let mut dst = AudioBlock::new(2);
        dst.clear();
        mix_into(&src, &mut dst, ChannelInterpretation::Speakers);
        assert!(dst.channel(0).iter().all(|&v| (v - 0.1).abs() < 1e-6));
        assert!(dst.channel(1).iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_mix_discrete_never_scales() {
        let src = block_of(2, &[1.0, 1.0]);
        let mut dst = AudioBlock::new(1);
        dst.clear();
        mix_into(&src, &mut dst, ChannelInterpretation::Discrete);
        // Discrete truncation: only channel 0, no 1/sqrt(2).
        assert!(dst.channel(0).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_mix_silent_source_keeps_hint() {
        let src = AudioBlock::new(2);
        let mut dst = AudioBlock::new(2);
        dst.clear();
        mix_into(&src, &mut dst, ChannelInterpretation::Speakers);
        assert!(dst.is_silent());
    }

    #[test]
    fn test_effective_channels_modes() {
        let pool = BufferPool::new();
        let mut port = InputPort::new(
            &pool,
            2,
            ChannelCountMode::Max,
            ChannelInterpretation::Speakers,
        );
        assert_eq!(port.effective_channels([1, 4]), 4);

        port.set_mode(ChannelCountMode::ClampedMax);
        assert_eq!(port.effective_channels([1, 4]), 2);
        // Narrower sources are not widened to the nominal count.
        assert_eq!(port.effective_channels([1]), 1);

        port.set_mode(ChannelCountMode::Explicit);
        assert_eq!(port.effective_channels([1, 4]), 2);

        // No sources: every mode falls back to the nominal count.
        port.set_mode(ChannelCountMode::Max);
        assert_eq!(port.effective_channels([]), 2);
    }

    #[test]
    fn test_prepare_releases_on_shape_change() {
        let pool = BufferPool::new();
        let mut port = InputPort::new(
            &pool,
            2,
            ChannelCountMode::Max,
            ChannelInterpretation::Speakers,
        );
        port.prepare(&pool, 4);
        assert_eq!(port.block().channels(), 4);
        // The stereo block went back to the pool.
        assert_eq!(pool.stats().outstanding, 1);
    }
}
