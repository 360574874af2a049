//! RBJ cookbook biquad filter.
//!
//! Coefficients are recomputed once per block from the parameter values at
//! block start (per-sample coefficient updates make these forms unstable),
//! then the difference equation runs per sample with per-channel state.

use std::f64::consts::PI;

use crate::context::BaseContext;
use crate::node::{BlockTiming, NodeBody, NodeHandle, ParamSlot, ProcessIo, Processor};
use crate::param::{AudioParam, AutomationRate};
use crate::ports::{ChannelCountMode, ChannelInterpretation, InputPort, OutputPort};
use crate::MAX_CHANNELS;

/// Filter responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadFilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Allpass,
    Peaking,
    Lowshelf,
    Highshelf,
}

/// Construction options.
pub struct BiquadFilterOptions {
    pub kind: BiquadFilterType,
    /// Initial corner/center frequency in Hz.
    pub frequency: f32,
    /// Initial quality factor.
    pub q: f32,
    /// Initial gain in dB (peaking and shelf types only).
    pub gain: f32,
}

impl Default for BiquadFilterOptions {
    fn default() -> Self {
        Self {
            kind: BiquadFilterType::Lowpass,
            frequency: 350.0,
            q: 1.0,
            gain: 0.0,
        }
    }
}

/// Normalized difference-equation coefficients.
#[derive(Clone, Copy)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

fn coefficients(
    kind: BiquadFilterType,
    sample_rate: f64,
    frequency: f64,
    q: f64,
    gain_db: f64,
) -> Coefficients {
    let f0 = frequency.clamp(1.0, sample_rate / 2.0 - 1.0);
    let q = q.max(1e-4);
    let w0 = 2.0 * PI * f0 / sample_rate;
    let (sin_w0, cos_w0) = w0.sin_cos();
    let alpha = sin_w0 / (2.0 * q);
    let a = 10f64.powf(gain_db / 40.0);

    let (b0, b1, b2, a0, a1, a2) = match kind {
        BiquadFilterType::Lowpass => {
            let b1 = 1.0 - cos_w0;
            (b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
        }
        BiquadFilterType::Highpass => {
            let b1 = -(1.0 + cos_w0);
            (-b1 / 2.0, b1, -b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
        }
        BiquadFilterType::Bandpass => {
            (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
        }
        BiquadFilterType::Notch => {
            (1.0, -2.0 * cos_w0, 1.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
        }
        BiquadFilterType::Allpass => (
            1.0 - alpha,
            -2.0 * cos_w0,
            1.0 + alpha,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        ),
        BiquadFilterType::Peaking => (
            1.0 + alpha * a,
            -2.0 * cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w0,
            1.0 - alpha / a,
        ),
        BiquadFilterType::Lowshelf => {
            let s = 2.0 * a.sqrt() * alpha;
            (
                a * ((a + 1.0) - (a - 1.0) * cos_w0 + s),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                a * ((a + 1.0) - (a - 1.0) * cos_w0 - s),
                (a + 1.0) + (a - 1.0) * cos_w0 + s,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                (a + 1.0) + (a - 1.0) * cos_w0 - s,
            )
        }
        BiquadFilterType::Highshelf => {
            let s = 2.0 * a.sqrt() * alpha;
            (
                a * ((a + 1.0) + (a - 1.0) * cos_w0 + s),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                a * ((a + 1.0) + (a - 1.0) * cos_w0 - s),
                (a + 1.0) - (a - 1.0) * cos_w0 + s,
                2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                (a + 1.0) - (a - 1.0) * cos_w0 - s,
            )
        }
    };

    Coefficients {
        b0: b0 / a0,
        b1: b1 / a0,
        b2: b2 / a0,
        a1: a1 / a0,
        a2: a2 / a0,
    }
}

/// Direct form I state for one channel.
#[derive(Clone, Copy, Default)]
struct ChannelState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

struct BiquadProcessor {
    kind: BiquadFilterType,
    state: [ChannelState; MAX_CHANNELS],
}

impl Processor for BiquadProcessor {
    fn process(&mut self, io: &mut ProcessIo<'_>, timing: &BlockTiming) {
        let input = io.inputs[0].block();
        let frequency = io.params[0].values()[0] as f64;
        let q = io.params[1].values()[0] as f64;
        let gain = io.params[2].values()[0] as f64;

        io.outputs[0].ensure_channels(io.pool, input.channels());
        let out = io.outputs[0].block_mut();
        out.clear();

        let c = coefficients(self.kind, timing.sample_rate, frequency, q, gain);

        for ch in 0..input.channels() {
            let s = &mut self.state[ch];
            let src = input.channel(ch);
            for (o, &x) in out.channel_mut(ch).iter_mut().zip(src) {
                let x = x as f64;
                let y = c.b0 * x + c.b1 * s.x1 + c.b2 * s.x2 - c.a1 * s.y1 - c.a2 * s.y2;
                s.x2 = s.x1;
                s.x1 = x;
                s.y2 = s.y1;
                s.y1 = y;
                *o = y as f32;
            }
        }

        if input.is_silent() && self.state.iter().all(|s| s.y1.abs() < 1e-10) {
            // Nothing in, tail decayed: keep the silence hint.
            out.clear();
        }
    }
}

/// An IIR filter node over the eight RBJ responses, with `frequency`, `q`
/// and `gain` parameters (control-rate; coefficients update per block).
pub struct BiquadFilterNode {
    node: NodeHandle,
    frequency: crate::node::ParamHandle,
    q: crate::node::ParamHandle,
    gain: crate::node::ParamHandle,
}

impl BiquadFilterNode {
    pub fn new(base: &BaseContext, options: BiquadFilterOptions) -> Self {
        let core = base.core().clone();
        let pool = core.pool();
        let nyquist = (core.sample_rate() / 2.0) as f32;

        let frequency = AudioParam::new("frequency", 350.0, 0.0, nyquist, AutomationRate::Control);
        frequency.set_value(options.frequency.clamp(0.0, nyquist));
        let q = AudioParam::new("q", 1.0, 1e-4, 1000.0, AutomationRate::Control);
        q.set_value(options.q);
        let gain = AudioParam::new("gain", 0.0, -40.0, 40.0, AutomationRate::Control);
        gain.set_value(options.gain);

        let body = NodeBody {
            label: "biquad-filter".to_string(),
            inputs: vec![InputPort::new(
                pool,
                2,
                ChannelCountMode::Max,
                ChannelInterpretation::Speakers,
            )],
            outputs: vec![OutputPort::new(pool, 2)],
            params: vec![
                ParamSlot::new(pool, frequency.clone()),
                ParamSlot::new(pool, q.clone()),
                ParamSlot::new(pool, gain.clone()),
            ],
            processor: Box::new(BiquadProcessor {
                kind: options.kind,
                state: [ChannelState::default(); MAX_CHANNELS],
            }),
        };
        let id = core.register(body);

        Self {
            frequency: crate::node::ParamHandle::new(frequency, id, 0),
            q: crate::node::ParamHandle::new(q, id, 1),
            gain: crate::node::ParamHandle::new(gain, id, 2),
            node: NodeHandle::new(core, id, "biquad-filter".to_string(), 1, 1),
        }
    }

    pub fn frequency(&self) -> &crate::node::ParamHandle {
        &self.frequency
    }

    pub fn q(&self) -> &crate::node::ParamHandle {
        &self.q
    }

    pub fn gain(&self) -> &crate::node::ParamHandle {
        &self.gain
    }
}

impl std::ops::Deref for BiquadFilterNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.node
    }
}

impl AsRef<NodeHandle> for BiquadFilterNode {
    fn as_ref(&self) -> &NodeHandle {
        &self.node
    }
}
