//! Offline rendering driver.
//!
//! Pulls whole blocks from the destination and copies them into caller
//! buffers. Requests need not be block-aligned: when the caller asks for
//! fewer frames than a block produces, the excess is parked per channel in
//! a carry-over area (growing geometrically, never shrinking) and served
//! first on the next call.

use std::sync::Arc;

use crate::context::{AsBaseContext, BaseContext, ContextCore};
use crate::error::{GraphError, Result};
use crate::{DEFAULT_SAMPLE_RATE, FRAMES_PER_BLOCK};

/// A context driven by the caller: every [`render_into`] call runs the
/// render loop on the calling thread, which becomes the pinned render
/// thread on first use.
///
/// [`render_into`]: OfflineContext::render_into
pub struct OfflineContext {
    base: BaseContext,
    core: Arc<ContextCore>,
    /// Per-channel FIFO of frames rendered but not yet handed out.
    carry: Vec<Vec<f32>>,
    carry_pos: usize,
}

impl OfflineContext {
    /// Create an offline context with the given output channel count and
    /// sample rate.
    pub fn new(channels: usize, sample_rate: f64) -> Result<Self> {
        let core = ContextCore::new(sample_rate, channels)?;
        Ok(Self {
            base: BaseContext::new(core.clone()),
            carry: (0..channels).map(|_| Vec::new()).collect(),
            carry_pos: 0,
            core,
        })
    }

    /// Create an offline context at the default 48 kHz.
    pub fn with_channels(channels: usize) -> Result<Self> {
        Self::new(channels, DEFAULT_SAMPLE_RATE)
    }

    /// Render `frame_count` frames into `output[channel][start..]`.
    ///
    /// Channels beyond the graph's output are zeroed; surplus graph
    /// channels are dropped. All argument validation happens before any
    /// processing.
    pub fn render_into(
        &mut self,
        output: &mut [Vec<f32>],
        frame_count: usize,
        start: usize,
    ) -> Result<()> {
        self.core.check_alive()?;
        if output.is_empty() {
            return Err(GraphError::argument("output must have at least one channel"));
        }
        if frame_count == 0 {
            return Err(GraphError::argument("frame count must be positive"));
        }
        for (ch, channel) in output.iter().enumerate() {
            if channel.len() < start + frame_count {
                return Err(GraphError::argument(format!(
                    "channel {ch} holds {} frames, need {}",
                    channel.len(),
                    start + frame_count
                )));
            }
        }

        let mut written = 0;
        while written < frame_count {
            let carried = self.carry_available();
            if carried > 0 {
                let take = carried.min(frame_count - written);
                for (ch, channel) in output.iter_mut().enumerate() {
                    let dst = &mut channel[start + written..start + written + take];
                    if ch < self.carry.len() {
                        dst.copy_from_slice(
                            &self.carry[ch][self.carry_pos..self.carry_pos + take],
                        );
                    } else {
                        dst.fill(0.0);
                    }
                }
                self.carry_pos += take;
                written += take;
                continue;
            }
            // Carry drained: reset (capacity is kept) and render a block.
            for channel in &mut self.carry {
                channel.clear();
            }
            self.carry_pos = 0;

            self.core.process_block()?;
            let take = (frame_count - written).min(FRAMES_PER_BLOCK);
            let graph_channels = self.carry.len();
            self.core.with_destination_block(|block| {
                for ch in 0..graph_channels {
                    let samples = block
                        .filter(|b| ch < b.channels())
                        .map(|b| b.channel(ch));
                    // Requested frames go straight out; the block's tail is
                    // parked in the carry.
                    if ch < output.len() {
                        let dst = &mut output[ch][start + written..start + written + take];
                        match samples {
                            Some(src) => dst.copy_from_slice(&src[..take]),
                            None => dst.fill(0.0),
                        }
                    }
                    match samples {
                        Some(src) => self.carry[ch].extend_from_slice(&src[take..]),
                        None => self.carry[ch].resize(FRAMES_PER_BLOCK - take, 0.0),
                    }
                }
            });
            for channel in output.iter_mut().skip(graph_channels) {
                channel[start + written..start + written + take].fill(0.0);
            }
            written += take;
        }
        Ok(())
    }

    /// Allocating variant of [`render_into`](Self::render_into): renders
    /// `frame_count` frames into fresh per-channel buffers.
    pub fn render(&mut self, frame_count: usize) -> Result<Vec<Vec<f32>>> {
        let channels = self.core.channels();
        let mut output = vec![vec![0.0; frame_count]; channels];
        self.render_into(&mut output, frame_count, 0)?;
        Ok(output)
    }

    fn carry_available(&self) -> usize {
        self.carry.first().map_or(0, |c| c.len() - self.carry_pos)
    }

    /// Number of output channels.
    pub fn channels(&self) -> usize {
        self.core.channels()
    }

    /// Mark the context disposed; every further operation errors.
    pub fn dispose(&self) {
        self.core.dispose();
    }
}

impl AsBaseContext for OfflineContext {
    fn base(&self) -> &BaseContext {
        &self.base
    }
}
