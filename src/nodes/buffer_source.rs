//! Sample playback through the streaming resampler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::BaseContext;
use crate::error::{GraphError, Result};
use crate::node::{
    BlockTiming, EndedNotifier, NodeBody, NodeHandle, ParamSlot, PlaySchedule, ProcessIo,
    Processor, ScheduleAction,
};
use crate::param::{AudioParam, AutomationRate};
use crate::ports::OutputPort;
use crate::resampler::Resampler;
use crate::sample_buffer::SampleBuffer;

/// Construction options.
pub struct BufferSourceOptions {
    pub buffer: Arc<SampleBuffer>,
    /// Initial playback rate multiplier.
    pub playback_rate: f32,
    /// Repeat the loop region until stopped.
    pub looping: bool,
    /// Loop region start, in seconds at the buffer's rate.
    pub loop_start: f64,
    /// Loop region end, in seconds at the buffer's rate (0.0 means the
    /// buffer end).
    pub loop_end: f64,
}

impl BufferSourceOptions {
    pub fn new(buffer: Arc<SampleBuffer>) -> Self {
        Self {
            buffer,
            playback_rate: 1.0,
            looping: false,
            loop_start: 0.0,
            loop_end: 0.0,
        }
    }
}

struct BufferSourceProcessor {
    buffer: Arc<SampleBuffer>,
    resamplers: Vec<Resampler>,
    /// Next source frame to feed into the resamplers.
    cursor: usize,
    /// Source frames left before a scheduled duration runs out.
    remaining: Option<usize>,
    looping: bool,
    loop_start: usize,
    loop_end: usize,
    exhausted: bool,
    schedule: PlaySchedule,
    ended: Arc<EndedNotifier>,
}

impl BufferSourceProcessor {
    /// Feed limit for the current pass: the loop boundary when looping,
    /// otherwise the end of the buffer, additionally capped by a scheduled
    /// duration.
    fn feed_limit(&self) -> usize {
        let mut limit = if self.looping {
            self.loop_end
        } else {
            self.buffer.frames()
        };
        if let Some(remaining) = self.remaining {
            limit = limit.min(self.cursor + remaining);
        }
        limit
    }

    fn consume(&mut self, frames: usize) {
        self.cursor += frames;
        if let Some(remaining) = &mut self.remaining {
            *remaining = remaining.saturating_sub(frames);
            if *remaining == 0 {
                self.exhausted = true;
            }
        }
    }
}

impl Processor for BufferSourceProcessor {
    fn process(&mut self, io: &mut ProcessIo<'_>, timing: &BlockTiming) {
        let channels = self.buffer.channels();
        io.outputs[0].ensure_channels(io.pool, channels);
        let out = io.outputs[0].block_mut();
        out.clear();

        let t1 = timing.block_end_time();
        let window = self
            .schedule
            .window(timing.block_time, t1, timing.sample_rate);

        if let Some((from, to)) = window {
            if !self.exhausted {
                let rate = io.params[0].values()[0] as f64 * self.buffer.sample_rate()
                    / timing.sample_rate;
                let rate = rate.max(0.0);
                let mut produced_total = from;

                while produced_total < to && !self.exhausted {
                    let limit = self.feed_limit().min(self.buffer.frames());
                    let input_len = limit.saturating_sub(self.cursor);

                    let mut consumed = 0;
                    let mut produced = 0;
                    for (ch, resampler) in self.resamplers.iter_mut().enumerate() {
                        let src = &self.buffer.channel(ch)[self.cursor..self.cursor + input_len];
                        let dst = &mut out.channel_mut(ch)[produced_total..to];
                        let (c, p) = resampler.process(src, dst, rate);
                        debug_assert!(ch == 0 || (c == consumed && p == produced));
                        consumed = c;
                        produced = p;
                    }
                    self.consume(consumed);
                    produced_total += produced;

                    if produced_total < to && !self.exhausted {
                        // Input ran dry at the feed limit.
                        if self.looping && self.cursor >= self.loop_end {
                            let b = &self.buffer;
                            let e = self.loop_end;
                            let s = self.loop_start;
                            for (ch, resampler) in self.resamplers.iter_mut().enumerate() {
                                let data = b.channel(ch);
                                resampler.setup_loop(
                                    data[e - 2],
                                    data[e - 1],
                                    data[s],
                                    data[s + 1],
                                );
                            }
                            self.cursor = self.loop_start + 2;
                        } else {
                            self.exhausted = true;
                        }
                    }
                }
            }
        }

        // `ended` fires once: on reaching a scheduled stop, or when the
        // material ran out on a non-looping source.
        if self.schedule.reaches_stop(t1) {
            self.ended.fire();
            io.requests.retire = true;
        } else if self.exhausted && !self.schedule.has_ended() {
            self.schedule.finish();
            self.ended.fire();
            io.requests.retire = true;
        }
    }

    fn schedule(&mut self, action: ScheduleAction) {
        match action {
            ScheduleAction::Start {
                when,
                offset,
                duration,
            } => {
                self.schedule.start(when);
                let frame = (offset * self.buffer.sample_rate()) as usize;
                self.cursor = frame.min(self.buffer.frames());
                self.remaining =
                    duration.map(|d| (d * self.buffer.sample_rate()).ceil() as usize);
                if self.cursor >= self.buffer.frames() && !self.looping {
                    self.exhausted = true;
                }
            }
            ScheduleAction::Stop { when } => self.schedule.stop(when),
        }
    }
}

/// Plays a published [`SampleBuffer`], resampling from the buffer's rate
/// (scaled by `playback_rate`) to the context rate.
///
/// Single-start semantics: the content is pre-configured, so a second
/// `start` is an error.
pub struct BufferSourceNode {
    node: NodeHandle,
    playback_rate: crate::node::ParamHandle,
    started: AtomicBool,
    ended: Arc<EndedNotifier>,
}

impl BufferSourceNode {
    pub fn new(base: &BaseContext, options: BufferSourceOptions) -> Self {
        let core = base.core().clone();
        let pool = core.pool();
        let buffer = options.buffer;

        let playback_rate =
            AudioParam::new("playback_rate", 1.0, 0.0, 64.0, AutomationRate::Control);
        playback_rate.set_value(options.playback_rate.max(0.0));

        // Resolve the loop region to frames; an unusable region (too short
        // for the four-sample window, or out of bounds) disables looping.
        let frames = buffer.frames();
        let loop_start = (options.loop_start * buffer.sample_rate()) as usize;
        let loop_end = if options.loop_end > 0.0 {
            ((options.loop_end * buffer.sample_rate()) as usize).min(frames)
        } else {
            frames
        };
        // The region must cover the four-sample window plus at least one
        // fresh frame per wrap, or playback could stall at the boundary.
        let looping = options.looping && loop_start + 2 < loop_end && loop_end <= frames;

        let ended = EndedNotifier::new();
        let body = NodeBody {
            label: "buffer-source".to_string(),
            inputs: vec![],
            outputs: vec![OutputPort::new(pool, buffer.channels())],
            params: vec![ParamSlot::new(pool, playback_rate.clone())],
            processor: Box::new(BufferSourceProcessor {
                resamplers: (0..buffer.channels()).map(|_| Resampler::new()).collect(),
                buffer,
                cursor: 0,
                remaining: None,
                looping,
                loop_start,
                loop_end,
                exhausted: false,
                schedule: PlaySchedule::new(),
                ended: ended.clone(),
            }),
        };
        let id = core.register(body);

        Self {
            playback_rate: crate::node::ParamHandle::new(playback_rate, id, 0),
            node: NodeHandle::new(core, id, "buffer-source".to_string(), 0, 1),
            started: AtomicBool::new(false),
            ended,
        }
    }

    /// Playback rate multiplier on top of the buffer/context rate ratio.
    pub fn playback_rate(&self) -> &crate::node::ParamHandle {
        &self.playback_rate
    }

    /// Start playback at `when` (`<= 0.0` means immediately).
    pub fn start(&self, when: f64) -> Result<()> {
        self.start_with(when, 0.0, None)
    }

    /// Start playback at `when`, skipping `offset` seconds into the buffer
    /// and playing at most `duration` seconds of material.
    ///
    /// # Errors
    /// A second call reports an invalid operation; a negative offset or a
    /// non-positive duration is an argument error.
    pub fn start_with(&self, when: f64, offset: f64, duration: Option<f64>) -> Result<()> {
        if !offset.is_finite() || offset < 0.0 {
            return Err(GraphError::argument(format!(
                "offset {offset} must be finite and non-negative"
            )));
        }
        if let Some(d) = duration {
            if !d.is_finite() || d <= 0.0 {
                return Err(GraphError::argument(format!(
                    "duration {d} must be finite and positive"
                )));
            }
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(GraphError::invalid(
                "buffer source can only be started once",
            ));
        }
        self.node.post_schedule(ScheduleAction::Start {
            when: when.max(0.0),
            offset,
            duration,
        });
        Ok(())
    }

    /// Stop playback at `when`.
    pub fn stop(&self, when: f64) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            return Err(GraphError::invalid(
                "cannot stop a buffer source before start",
            ));
        }
        self.node.post_schedule(ScheduleAction::Stop {
            when: when.max(0.0),
        });
        Ok(())
    }

    /// Subscribe to the one-shot end notification, fired on a scheduled
    /// stop or when the material runs out.
    pub fn on_ended(&self, f: impl FnOnce() + Send + 'static) {
        self.ended.subscribe(Box::new(f));
    }
}

impl std::ops::Deref for BufferSourceNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.node
    }
}

impl AsRef<NodeHandle> for BufferSourceNode {
    fn as_ref(&self) -> &NodeHandle {
        &self.node
    }
}
