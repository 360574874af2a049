//! Equal-power stereo panning and distance attenuation laws.

use std::f32::consts::FRAC_PI_2;

use crate::context::BaseContext;
use crate::node::{BlockTiming, NodeBody, NodeHandle, ParamSlot, ProcessIo, Processor};
use crate::param::{AudioParam, AutomationRate};
use crate::ports::{ChannelCountMode, ChannelInterpretation, InputPort, OutputPort};

/// Distance attenuation models for spatialized sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceModel {
    Linear,
    Inverse,
    Exponential,
}

/// Gain for a source at `distance`, after `reference` distance, capped at
/// `max` distance, with the given rolloff factor.
pub fn distance_gain(
    model: DistanceModel,
    distance: f64,
    reference: f64,
    max: f64,
    rolloff: f64,
) -> f64 {
    let d = distance.clamp(reference, max);
    match model {
        DistanceModel::Linear => {
            let span = max - reference;
            if span <= 0.0 {
                1.0
            } else {
                1.0 - rolloff * (d - reference) / span
            }
        }
        DistanceModel::Inverse => {
            reference / (reference + rolloff * (d - reference))
        }
        DistanceModel::Exponential => (d / reference).powf(-rolloff),
    }
}

/// Construction options.
pub struct StereoPannerOptions {
    /// Initial pan position in [-1, 1].
    pub pan: f32,
}

impl Default for StereoPannerOptions {
    fn default() -> Self {
        Self { pan: 0.0 }
    }
}

struct StereoPannerProcessor;

impl Processor for StereoPannerProcessor {
    fn process(&mut self, io: &mut ProcessIo<'_>, _timing: &BlockTiming) {
        let input = io.inputs[0].block();
        let pan = io.params[0].values();

        io.outputs[0].ensure_channels(io.pool, 2);
        let out = io.outputs[0].block_mut();
        out.clear();

        if input.is_silent() {
            return;
        }

        let mono = input.channels() == 1;
        let (left, right) = out.channel_pair_mut(0, 1);

        for i in 0..left.len() {
            let p = pan[i].clamp(-1.0, 1.0);
            let (in_l, in_r) = if mono {
                (input.channel(0)[i], input.channel(0)[i])
            } else {
                (input.channel(0)[i], input.channel(1)[i])
            };

            if mono {
                let theta = (p + 1.0) * 0.5 * FRAC_PI_2;
                left[i] = in_l * theta.cos();
                right[i] = in_r * theta.sin();
            } else if p <= 0.0 {
                let theta = (p + 1.0) * FRAC_PI_2;
                left[i] = in_l + in_r * theta.cos();
                right[i] = in_r * theta.sin();
            } else {
                let theta = p * FRAC_PI_2;
                left[i] = in_l * theta.cos();
                right[i] = in_r + in_l * theta.sin();
            }
        }
    }
}

/// Positions a mono or stereo input in the stereo field with the
/// equal-power law; output is always stereo.
pub struct StereoPannerNode {
    node: NodeHandle,
    pan: crate::node::ParamHandle,
}

impl StereoPannerNode {
    pub fn new(base: &BaseContext, options: StereoPannerOptions) -> Self {
        let core = base.core().clone();
        let pool = core.pool();

        let pan = AudioParam::new("pan", 0.0, -1.0, 1.0, AutomationRate::Audio);
        pan.set_value(options.pan.clamp(-1.0, 1.0));

        let body = NodeBody {
            label: "stereo-panner".to_string(),
            inputs: vec![InputPort::new(
                pool,
                2,
                ChannelCountMode::ClampedMax,
                ChannelInterpretation::Speakers,
            )],
            outputs: vec![OutputPort::new(pool, 2)],
            params: vec![ParamSlot::new(pool, pan.clone())],
            processor: Box::new(StereoPannerProcessor),
        };
        let id = core.register(body);

        Self {
            pan: crate::node::ParamHandle::new(pan, id, 0),
            node: NodeHandle::new(core, id, "stereo-panner".to_string(), 1, 1),
        }
    }

    /// Pan position in [-1, 1]; -1 is hard left.
    pub fn pan(&self) -> &crate::node::ParamHandle {
        &self.pan
    }
}

impl std::ops::Deref for StereoPannerNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.node
    }
}

impl AsRef<NodeHandle> for StereoPannerNode {
    fn as_ref(&self) -> &NodeHandle {
        &self.node
    }
}
