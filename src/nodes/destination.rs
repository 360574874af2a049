//! The context sink.
//!
//! The destination is an ordinary node: one input that every render pulls,
//! one output the drivers read. Its input mixes whatever is connected down
//! to the context's channel count (explicit mode), and its process is a
//! straight copy.

use crate::context::BaseContext;
use crate::node::{BlockTiming, NodeBody, NodeHandle, ProcessIo, Processor};
use crate::ports::{ChannelCountMode, ChannelInterpretation, InputPort, OutputPort};

struct DestinationProcessor;

impl Processor for DestinationProcessor {
    fn process(&mut self, io: &mut ProcessIo<'_>, _timing: &BlockTiming) {
        let input = io.inputs[0].block();
        io.outputs[0].ensure_channels(io.pool, input.channels());
        io.outputs[0].block_mut().copy_from(input);
    }
}

pub(crate) fn destination_body(
    pool: &crate::buffer_pool::BufferPool,
    channels: usize,
) -> NodeBody {
    NodeBody {
        label: "destination".to_string(),
        inputs: vec![InputPort::new(
            pool,
            channels,
            ChannelCountMode::Explicit,
            ChannelInterpretation::Speakers,
        )],
        outputs: vec![OutputPort::new(pool, channels)],
        params: vec![],
        processor: Box::new(DestinationProcessor),
    }
}

/// Handle to the context's destination node.
pub struct DestinationNode {
    node: NodeHandle,
}

impl DestinationNode {
    pub(crate) fn handle(base: &BaseContext) -> Self {
        let core = base.core().clone();
        let id = core.destination_id();
        Self {
            node: NodeHandle::new(core, id, "destination".to_string(), 1, 0),
        }
    }
}

impl std::ops::Deref for DestinationNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.node
    }
}

impl AsRef<NodeHandle> for DestinationNode {
    fn as_ref(&self) -> &NodeHandle {
        &self.node
    }
}
