//! Constant (DC offset) source with scheduled start/stop.

use std::sync::Arc;

use crate::context::BaseContext;
use crate::error::Result;
use crate::node::{
    BlockTiming, EndedNotifier, NodeBody, NodeHandle, ParamSlot, PlaySchedule, ProcessIo,
    Processor, ScheduleAction,
};
use crate::param::{AudioParam, AutomationRate};
use crate::ports::OutputPort;

/// Construction options.
pub struct ConstantSourceOptions {
    /// Initial value of the `offset` parameter.
    pub offset: f32,
}

impl Default for ConstantSourceOptions {
    fn default() -> Self {
        Self { offset: 1.0 }
    }
}

struct ConstantSourceProcessor {
    schedule: PlaySchedule,
    ended: Arc<EndedNotifier>,
}

impl Processor for ConstantSourceProcessor {
    fn process(&mut self, io: &mut ProcessIo<'_>, timing: &BlockTiming) {
        let out = io.outputs[0].block_mut();
        out.clear();

        let t1 = timing.block_end_time();
        if let Some((from, to)) = self
            .schedule
            .window(timing.block_time, t1, timing.sample_rate)
        {
            let offset = io.params[0].values();
            out.channel_mut(0)[from..to].copy_from_slice(&offset[from..to]);
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

/// A source emitting its `offset` parameter on one mono output.
///
/// Free-form start semantics: a second `start` is silently ignored rather
/// than an error, since there is no pre-configured content to rewind.
pub struct ConstantSourceNode {
    node: NodeHandle,
    offset: crate::node::ParamHandle,
    ended: Arc<EndedNotifier>,
}

impl ConstantSourceNode {
    pub fn new(base: &BaseContext, options: ConstantSourceOptions) -> Self {
        let core = base.core().clone();
        let pool = core.pool();

        let offset = AudioParam::new("offset", 1.0, f32::MIN, f32::MAX, AutomationRate::Audio);
        offset.set_value(options.offset);

        let ended = EndedNotifier::new();
        let body = NodeBody {
            label: "constant-source".to_string(),
            inputs: vec![],
            outputs: vec![OutputPort::new(pool, 1)],
            params: vec![ParamSlot::new(pool, offset.clone())],
            processor: Box::new(ConstantSourceProcessor {
                schedule: PlaySchedule::new(),
                ended: ended.clone(),
            }),
        };
        let id = core.register(body);

        Self {
            offset: crate::node::ParamHandle::new(offset, id, 0),
            node: NodeHandle::new(core, id, "constant-source".to_string(), 0, 1),
            ended,
        }
    }

    /// The emitted value.
    pub fn offset(&self) -> &crate::node::ParamHandle {
        &self.offset
    }

    /// Begin emitting at `when` (`<= 0.0` means immediately). Calling
    /// start again is ignored.
    pub fn start(&self, when: f64) -> Result<()> {
        self.node.post_schedule(ScheduleAction::Start {
            when: when.max(0.0),
            offset: 0.0,
            duration: None,
        });
        Ok(())
    }

    /// Stop emitting at `when`; fires `ended` once the stop time is
    /// reached, after which the node disposes itself.
    pub fn stop(&self, when: f64) -> Result<()> {
        self.node.post_schedule(ScheduleAction::Stop {
            when: when.max(0.0),
        });
        Ok(())
    }

    /// Subscribe to the one-shot end notification. The callback runs on
    /// the render thread and must not block.
    pub fn on_ended(&self, f: impl FnOnce() + Send + 'static) {
        self.ended.subscribe(Box::new(f));
    }
}

impl std::ops::Deref for ConstantSourceNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.node
    }
}

impl AsRef<NodeHandle> for ConstantSourceNode {
    fn as_ref(&self) -> &NodeHandle {
        &self.node
    }
}
