//! The control-to-render command queue.
//!
//! Every graph mutation is a tagged command (not a closure, so the full set
//! of render-thread operations is visible here). Commands are multi-producer
//! single-consumer: any control thread may post, the render thread drains
//! FIFO at the start of each block. Apply-time failures are swallowed by
//! the drain loop and logged - by then the caller is long gone.

use tracing::warn;

use crate::buffer_pool::BufferPool;
use crate::error::Result;
use crate::graph::GraphState;
use crate::node::{NodeBody, NodeId, ScheduleAction};
use crate::ports::{ChannelCountMode, ChannelInterpretation, InputRef, OutputRef};

/// A graph mutation executed on the render thread.
pub(crate) enum Command {
    /// Insert a fully constructed node body into the arena.
    AddNode { id: NodeId, body: NodeBody },
    /// Add an edge (node output -> node input or param summing input).
    Connect { src: OutputRef, dst: InputRef },
    /// Remove an edge.
    Disconnect { src: OutputRef, dst: InputRef },
    /// Deliver a start/stop message to a source node.
    Schedule { node: NodeId, action: ScheduleAction },
    /// Re-configure one input port's channel policy.
    SetChannelConfig {
        node: NodeId,
        input: usize,
        count: Option<usize>,
        mode: Option<ChannelCountMode>,
        interpretation: Option<ChannelInterpretation>,
    },
    /// Tear a node down and return its buffers.
    Dispose { node: NodeId },
}

impl Command {
    pub(crate) fn apply(self, graph: &mut GraphState, pool: &BufferPool) -> Result<()> {
        match self {
            Command::AddNode { id, body } => {
                graph.insert(id, body);
                Ok(())
            }
            Command::Connect { src, dst } => graph.connect(src, dst),
            Command::Disconnect { src, dst } => {
                graph.disconnect(src, dst);
                Ok(())
            }
            Command::Schedule { node, action } => {
                graph.apply_schedule(node, action);
                Ok(())
            }
            Command::SetChannelConfig {
                node,
                input,
                count,
                mode,
                interpretation,
            } => {
                graph.set_channel_config(node, input, count, mode, interpretation);
                Ok(())
            }
            Command::Dispose { node } => {
                graph.dispose(node, pool);
                Ok(())
            }
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Command::AddNode { .. } => "add-node",
            Command::Connect { .. } => "connect",
            Command::Disconnect { .. } => "disconnect",
            Command::Schedule { .. } => "schedule",
            Command::SetChannelConfig { .. } => "set-channel-config",
            Command::Dispose { .. } => "dispose",
        }
    }
}

/// Drain the queue in FIFO order, swallowing per-command failures.
pub(crate) fn drain(
    rx: &crossbeam::channel::Receiver<Command>,
    graph: &mut GraphState,
    pool: &BufferPool,
) {
    for cmd in rx.try_iter() {
        let kind = cmd.kind();
        if let Err(err) = cmd.apply(graph, pool) {
            warn!(command = kind, %err, "render command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{next_node_id, BlockTiming, ProcessIo, Processor};
    use crate::ports::OutputPort;

    struct Nop;
    impl Processor for Nop {
        fn process(&mut self, _io: &mut ProcessIo<'_>, _timing: &BlockTiming) {}
    }

    #[test]
    fn test_fifo_drain_applies_in_order() {
        let pool = BufferPool::new();
        let mut graph = GraphState::new();
        let (tx, rx) = crossbeam::channel::unbounded();

        let a = next_node_id();
        let b = next_node_id();
        for id in [a, b] {
            tx.send(Command::AddNode {
                id,
                body: NodeBody {
                    label: format!("n{id}"),
                    inputs: vec![crate::ports::InputPort::new(
                        &pool,
                        2,
                        ChannelCountMode::Max,
                        ChannelInterpretation::Speakers,
                    )],
                    outputs: vec![OutputPort::new(&pool, 2)],
                    params: vec![],
                    processor: Box::new(Nop),
                },
            })
            .unwrap();
        }

        // connect then disconnect: after the drain there must be no edge.
        let src = OutputRef { node: a, output: 0 };
        let dst = InputRef::Port { node: b, input: 0 };
        tx.send(Command::Connect { src, dst }).unwrap();
        tx.send(Command::Disconnect { src, dst }).unwrap();

        drain(&rx, &mut graph, &pool);
        assert!(graph.contains(a));
        assert!(graph.contains(b));

        // Processing b pulls nothing and stays silent.
        let timing = BlockTiming {
            block: 1,
            block_time: 0.0,
            sample_rate: 48000.0,
        };
        graph.process_node(b, &timing, &pool).unwrap();
    }

    #[test]
    fn test_failed_command_is_swallowed() {
        let pool = BufferPool::new();
        let mut graph = GraphState::new();
        let (tx, rx) = crossbeam::channel::unbounded();

        // Connecting nodes that do not exist fails at apply time but must
        // not poison the drain.
        tx.send(Command::Connect {
            src: OutputRef {
                node: 9999,
                output: 0,
            },
            dst: InputRef::Port {
                node: 9998,
                input: 0,
            },
        })
        .unwrap();

        let id = next_node_id();
        tx.send(Command::AddNode {
            id,
            body: NodeBody {
                label: "late".to_string(),
                inputs: vec![],
                outputs: vec![OutputPort::new(&pool, 1)],
                params: vec![],
                processor: Box::new(Nop),
            },
        })
        .unwrap();

        drain(&rx, &mut graph, &pool);
        assert!(graph.contains(id));
    }
}
