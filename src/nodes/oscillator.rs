//! Waveform oscillator source.

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

/// Waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscillatorShape {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

/// Construction options.
pub struct OscillatorOptions {
    pub shape: OscillatorShape,
    /// Initial frequency in Hz.
    pub frequency: f32,
    /// Initial detune in cents.
    pub detune: f32,
}

impl Default for OscillatorOptions {
    fn default() -> Self {
        Self {
            shape: OscillatorShape::Sine,
            frequency: 440.0,
            detune: 0.0,
        }
    }
}

#[inline]
fn waveform(shape: OscillatorShape, phase: f64) -> f32 {
    match shape {
        OscillatorShape::Sine => (phase * std::f64::consts::TAU).sin() as f32,
        OscillatorShape::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        OscillatorShape::Sawtooth => (2.0 * phase - 1.0) as f32,
        OscillatorShape::Triangle => {
            // Zero-rising at phase 0, peaks at 0.25 and 0.75.
            let p = phase;
            (if p < 0.25 {
                4.0 * p
            } else if p < 0.75 {
                2.0 - 4.0 * p
            } else {
                4.0 * p - 4.0
            }) as f32
        }
    }
}

struct OscillatorProcessor {
    shape: OscillatorShape,
    /// Normalized phase in [0, 1).
    phase: f64,
    schedule: PlaySchedule,
    ended: Arc<EndedNotifier>,
}

impl Processor for OscillatorProcessor {
    fn process(&mut self, io: &mut ProcessIo<'_>, timing: &BlockTiming) {
        let t1 = timing.block_end_time();
        let window = self
            .schedule
            .window(timing.block_time, t1, timing.sample_rate);

        let out = io.outputs[0].block_mut();
        out.clear();

        if let Some((from, to)) = window {
            let freq = io.params[0].values();
            let detune = io.params[1].values();
            let nyquist = timing.sample_rate / 2.0;

            let samples = out.channel_mut(0);
            for i in from..to {
                let f = (freq[i] as f64 * (detune[i] as f64 / 1200.0).exp2())
                    .clamp(-nyquist, nyquist);
                samples[i] = waveform(self.shape, self.phase);
                self.phase = (self.phase + f / timing.sample_rate).rem_euclid(1.0);
            }
        }

        if self.schedule.reaches_stop(t1) {
            self.ended.fire();
            io.requests.retire = true;
        }
    }

    fn schedule(&mut self, action: ScheduleAction) {
        match action {
            ScheduleAction::Start { when, .. } => self.schedule.start(when),
            ScheduleAction::Stop { when } => self.schedule.stop(when),
        }
    }
}

/// A periodic waveform source with `frequency` and `detune` parameters.
///
/// Single-start semantics: the second `start` call is an error.
pub struct OscillatorNode {
    node: NodeHandle,
    frequency: crate::node::ParamHandle,
    detune: crate::node::ParamHandle,
    started: AtomicBool,
    ended: Arc<EndedNotifier>,
}

impl OscillatorNode {
    pub fn new(base: &BaseContext, options: OscillatorOptions) -> Self {
        let core = base.core().clone();
        let pool = core.pool();
        let nyquist = (core.sample_rate() / 2.0) as f32;

        let frequency = AudioParam::new("frequency", 440.0, -nyquist, nyquist, AutomationRate::Audio);
        frequency.set_value(options.frequency.clamp(-nyquist, nyquist));
        let detune = AudioParam::new("detune", 0.0, -153_600.0, 153_600.0, AutomationRate::Audio);
        detune.set_value(options.detune);

        let ended = EndedNotifier::new();
        let body = NodeBody {
            label: "oscillator".to_string(),
            inputs: vec![],
            outputs: vec![OutputPort::new(pool, 1)],
            params: vec![
                ParamSlot::new(pool, frequency.clone()),
                ParamSlot::new(pool, detune.clone()),
            ],
            processor: Box::new(OscillatorProcessor {
                shape: options.shape,
                phase: 0.0,
                schedule: PlaySchedule::new(),
                ended: ended.clone(),
            }),
        };
        let id = core.register(body);

        Self {
            frequency: crate::node::ParamHandle::new(frequency, id, 0),
            detune: crate::node::ParamHandle::new(detune, id, 1),
            node: NodeHandle::new(core, id, "oscillator".to_string(), 0, 1),
            started: AtomicBool::new(false),
            ended,
        }
    }

    /// Oscillation frequency in Hz.
    pub fn frequency(&self) -> &crate::node::ParamHandle {
        &self.frequency
    }

    /// Detune in cents, applied as `frequency * 2^(detune / 1200)`.
    pub fn detune(&self) -> &crate::node::ParamHandle {
        &self.detune
    }

    /// Begin oscillating at `when` (`<= 0.0` means immediately).
    ///
    /// # Errors
    /// A second call reports an invalid operation.
    pub fn start(&self, when: f64) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(GraphError::invalid("oscillator can only be started once"));
        }
        self.node.post_schedule(ScheduleAction::Start {
            when: when.max(0.0),
            offset: 0.0,
            duration: None,
        });
        Ok(())
    }

    /// Stop at `when`; `ended` fires on the first block whose end reaches
    /// the stop time, then the node disposes itself.
    pub fn stop(&self, when: f64) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            return Err(GraphError::invalid("cannot stop an oscillator before start"));
        }
        self.node.post_schedule(ScheduleAction::Stop {
            when: when.max(0.0),
        });
        Ok(())
    }

    /// Subscribe to the one-shot end notification (render-thread callback;
    /// must not block).
    pub fn on_ended(&self, f: impl FnOnce() + Send + 'static) {
        self.ended.subscribe(Box::new(f));
    }
}

impl std::ops::Deref for OscillatorNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.node
    }
}

impl AsRef<NodeHandle> for OscillatorNode {
    fn as_ref(&self) -> &NodeHandle {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_shapes_at_key_phases() {
        assert!(waveform(OscillatorShape::Sine, 0.0).abs() < 1e-6);
        assert!((waveform(OscillatorShape::Sine, 0.25) - 1.0).abs() < 1e-6);

        assert_eq!(waveform(OscillatorShape::Square, 0.1), 1.0);
        assert_eq!(waveform(OscillatorShape::Square, 0.6), -1.0);

        assert!((waveform(OscillatorShape::Sawtooth, 0.0) + 1.0).abs() < 1e-6);
        assert!((waveform(OscillatorShape::Sawtooth, 0.5)).abs() < 1e-6);

        assert!(waveform(OscillatorShape::Triangle, 0.0).abs() < 1e-6);
        assert!((waveform(OscillatorShape::Triangle, 0.25) - 1.0).abs() < 1e-6);
        assert!((waveform(OscillatorShape::Triangle, 0.75) + 1.0).abs() < 1e-6);
    }
}
