//! Per-sample gain.

use crate::context::BaseContext;
use crate::node::{BlockTiming, NodeBody, NodeHandle, ParamSlot, ProcessIo, Processor};
use crate::param::{AudioParam, AutomationRate};
use crate::ports::{ChannelCountMode, ChannelInterpretation, InputPort, OutputPort};

/// Construction options.
pub struct GainOptions {
    /// Initial value of the `gain` parameter.
    pub gain: f32,
}

impl Default for GainOptions {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

struct GainProcessor;

impl Processor for GainProcessor {
    fn process(&mut self, io: &mut ProcessIo<'_>, _timing: &BlockTiming) {
        let input = io.inputs[0].block();
        let gain = io.params[0].values();

        io.outputs[0].ensure_channels(io.pool, input.channels());
        let out = io.outputs[0].block_mut();
        out.clear();

        if input.is_silent() {
            return;
        }
        for ch in 0..input.channels() {
            let src = input.channel(ch);
            for ((o, &s), &g) in out.channel_mut(ch).iter_mut().zip(src).zip(gain) {
                *o = s * g;
            }
        }
    }
}

/// Multiplies its input by the audio-rate `gain` parameter.
pub struct GainNode {
    node: NodeHandle,
    gain: crate::node::ParamHandle,
}

impl GainNode {
    pub fn new(base: &BaseContext, options: GainOptions) -> Self {
        let core = base.core().clone();
        let pool = core.pool();

        let gain = AudioParam::new("gain", 1.0, f32::MIN, f32::MAX, AutomationRate::Audio);
        gain.set_value(options.gain);

        let body = NodeBody {
            label: "gain".to_string(),
            inputs: vec![InputPort::new(
                pool,
                2,
                ChannelCountMode::Max,
                ChannelInterpretation::Speakers,
            )],
            outputs: vec![OutputPort::new(pool, 2)],
            params: vec![ParamSlot::new(pool, gain.clone())],
            processor: Box::new(GainProcessor),
        };
        let id = core.register(body);

        Self {
            gain: crate::node::ParamHandle::new(gain, id, 0),
            node: NodeHandle::new(core, id, "gain".to_string(), 1, 1),
        }
    }

    /// The multiplier.
    pub fn gain(&self) -> &crate::node::ParamHandle {
        &self.gain
    }
}

impl std::ops::Deref for GainNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.node
    }
}

impl AsRef<NodeHandle> for GainNode {
    fn as_ref(&self) -> &NodeHandle {
        &self.node
    }
}
