//! The node arena and the block-synchronous pull scheduler.
//!
//! Connections are `(node id, port index)` pairs resolved against the
//! arena, never shared references, so a graph that is cyclic in its edges
//! stays acyclic in ownership and disposal is deterministic.
//!
//! Processing is demand driven: the driver pulls the destination, which
//! pulls its inputs, which drive their source nodes if they have not run
//! for this block yet. Memoization is the per-node `last_block` stamp;
//! re-entry through a back edge trips the `in_progress` flag and raises a
//! cycle error naming the node.
//!
//! Borrow discipline: node state lives in per-entry `RefCell`s. Upstream
//! recursion happens with no borrow held (connection refs are copied out
//! one at a time); mixing then borrows the destination mutably and each
//! already-processed source immutably. Distinct nodes means distinct
//! `RefCell`s, and a same-node edge is unreachable here because cycle
//! detection fires before any mix.

use std::collections::HashMap;

use crate::block::AudioBlock;
use crate::buffer_pool::BufferPool;
use crate::error::{GraphError, Result};
use crate::node::{BlockTiming, NodeBody, NodeEntry, NodeId, NodeRequests, ProcessIo};
use crate::ports::{InputRef, OutputRef};

/// Which input-like port of a node to operate on.
#[derive(Clone, Copy)]
enum Slot {
    Input(usize),
    Param(usize),
}

/// The render-plane graph: every node body, keyed by id.
pub(crate) struct GraphState {
    nodes: HashMap<NodeId, NodeEntry>,
    /// Sources that asked to retire during this block; drained by the
    /// context after the pull and posted as dispose commands.
    retired: Vec<NodeId>,
}

impl GraphState {
    pub(crate) fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            retired: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, id: NodeId, body: NodeBody) {
        self.nodes.insert(id, NodeEntry::new(body));
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub(crate) fn take_retired(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.retired)
    }

    /// Read access to a node's published output block, if the node and
    /// port exist.
    pub(crate) fn with_output_block<R>(
        &self,
        node: NodeId,
        output: usize,
        f: impl FnOnce(&AudioBlock) -> R,
    ) -> Option<R> {
        let entry = self.nodes.get(&node)?;
        let body = entry.body.borrow();
        body.outputs.get(output).map(|port| f(port.block()))
    }

    /// Borrowed view of a node's published output block.
    pub(crate) fn output_block(
        &self,
        node: NodeId,
        output: usize,
    ) -> Option<std::cell::Ref<'_, AudioBlock>> {
        let entry = self.nodes.get(&node)?;
        let body = entry.body.borrow();
        if body.outputs.get(output).is_none() {
            return None;
        }
        Some(std::cell::Ref::map(body, |b| b.outputs[output].block()))
    }

    /// Add an edge. Both endpoints must exist; a dangling endpoint makes
    /// the connection a no-op rather than an error.
    pub(crate) fn connect(&mut self, src: OutputRef, dst: InputRef) -> Result<()> {
        if !self.nodes.contains_key(&src.node) || !self.nodes.contains_key(&dst.node()) {
            return Err(GraphError::invalid(
                "connect endpoints no longer exist; connection dropped",
            ));
        }

        {
            let body = &mut *self.nodes[&src.node].body.borrow_mut();
            let Some(port) = body.outputs.get_mut(src.output) else {
                return Err(GraphError::argument("output index out of range"));
            };
            port.add_consumer(dst);
        }

        let body = &mut *self.nodes[&dst.node()].body.borrow_mut();
        match dst {
            InputRef::Port { input, .. } => {
                let Some(port) = body.inputs.get_mut(input) else {
                    return Err(GraphError::argument("input index out of range"));
                };
                port.add_connection(src);
            }
            InputRef::Param { param, .. } => {
                let Some(slot) = body.params.get_mut(param) else {
                    return Err(GraphError::argument("param index out of range"));
                };
                slot.input.add_connection(src);
            }
        }
        Ok(())
    }

    /// Remove an edge; absent endpoints or absent edges are treated as
    /// already gone.
    pub(crate) fn disconnect(&mut self, src: OutputRef, dst: InputRef) {
        if let Some(entry) = self.nodes.get(&src.node) {
            let body = &mut *entry.body.borrow_mut();
            if let Some(port) = body.outputs.get_mut(src.output) {
                port.remove_consumer(dst);
            }
        }
        if let Some(entry) = self.nodes.get(&dst.node()) {
            let body = &mut *entry.body.borrow_mut();
            match dst {
                InputRef::Port { input, .. } => {
                    if let Some(port) = body.inputs.get_mut(input) {
                        port.remove_connection(src);
                    }
                }
                InputRef::Param { param, .. } => {
                    if let Some(slot) = body.params.get_mut(param) {
                        slot.input.remove_connection(src);
                    }
                }
            }
        }
    }

    /// Tear a node down: unlink every edge touching it, run the processor's
    /// cleanup, and return every leased block to the pool.
    pub(crate) fn dispose(&mut self, id: NodeId, pool: &BufferPool) {
        let Some(entry) = self.nodes.remove(&id) else {
            return;
        };
        let mut body = entry.body.into_inner();

        // Outputs first: unlink downstream consumers.
        for (output, port) in body.outputs.iter().enumerate() {
            let src = OutputRef { node: id, output };
            for &consumer in port.consumers() {
                if let Some(other) = self.nodes.get(&consumer.node()) {
                    let other = &mut *other.body.borrow_mut();
                    match consumer {
                        InputRef::Port { input, .. } => {
                            if let Some(p) = other.inputs.get_mut(input) {
                                p.remove_connection(src);
                            }
                        }
                        InputRef::Param { param, .. } => {
                            if let Some(s) = other.params.get_mut(param) {
                                s.input.remove_connection(src);
                            }
                        }
                    }
                }
            }
        }

        // Then inputs and params: unlink upstream producers.
        for (input, port) in body.inputs.iter().enumerate() {
            let dst = InputRef::Port { node: id, input };
            for &source in port.connections() {
                if let Some(other) = self.nodes.get(&source.node) {
                    let other = &mut *other.body.borrow_mut();
                    if let Some(p) = other.outputs.get_mut(source.output) {
                        p.remove_consumer(dst);
                    }
                }
            }
        }
        for (param, slot) in body.params.iter().enumerate() {
            let dst = InputRef::Param { node: id, param };
            for &source in slot.input.connections() {
                if let Some(other) = self.nodes.get(&source.node) {
                    let other = &mut *other.body.borrow_mut();
                    if let Some(p) = other.outputs.get_mut(source.output) {
                        p.remove_consumer(dst);
                    }
                }
            }
        }

        body.processor.on_dispose();

        for port in body.inputs.drain(..) {
            pool.recycle(port.into_block());
        }
        for port in body.outputs.drain(..) {
            pool.recycle(port.into_block());
        }
        for slot in body.params.drain(..) {
            pool.recycle(slot.input.into_block());
        }
    }

    pub(crate) fn apply_schedule(&mut self, id: NodeId, action: crate::node::ScheduleAction) {
        if let Some(entry) = self.nodes.get(&id) {
            entry.body.borrow_mut().processor.schedule(action);
        }
    }

    pub(crate) fn set_channel_config(
        &mut self,
        id: NodeId,
        input: usize,
        count: Option<usize>,
        mode: Option<crate::ports::ChannelCountMode>,
        interpretation: Option<crate::ports::ChannelInterpretation>,
    ) {
        if let Some(entry) = self.nodes.get(&id) {
            let body = &mut *entry.body.borrow_mut();
            if let Some(port) = body.inputs.get_mut(input) {
                if let Some(count) = count {
                    port.set_channel_count(count);
                }
                if let Some(mode) = mode {
                    port.set_mode(mode);
                }
                if let Some(interpretation) = interpretation {
                    port.set_interpretation(interpretation);
                }
            }
        }
    }

    /// Pull one node for the current block. Runs at most once per node per
    /// block regardless of fan-out.
    pub(crate) fn process_node(
        &mut self,
        id: NodeId,
        timing: &BlockTiming,
        pool: &BufferPool,
    ) -> Result<()> {
        let Some(entry) = self.nodes.get(&id) else {
            // A broken edge is absence, not an error.
            return Ok(());
        };
        // A node re-entered while in progress is a back edge; check before
        // the memo stamp, which is recorded on entry.
        if entry.in_progress.get() {
            let node = entry.body.borrow().label.clone();
            return Err(GraphError::Cycle { node });
        }
        if entry.last_block.get() == timing.block {
            return Ok(());
        }

        entry.in_progress.set(true);
        entry.last_block.set(timing.block);
        let result = self.run_node(id, timing, pool);
        // Clear even when a downstream cycle error is propagating.
        if let Some(entry) = self.nodes.get(&id) {
            entry.in_progress.set(false);
        }
        result
    }

    fn run_node(&mut self, id: NodeId, timing: &BlockTiming, pool: &BufferPool) -> Result<()> {
        // Parameters first, then inputs, then the processor.
        let (n_params, n_inputs) = {
            let body = self.nodes[&id].body.borrow();
            (body.params.len(), body.inputs.len())
        };

        for p in 0..n_params {
            self.pull_slot(id, Slot::Param(p), timing, pool)?;
        }
        for i in 0..n_inputs {
            self.pull_slot(id, Slot::Input(i), timing, pool)?;
        }

        let entry = &self.nodes[&id];
        let body = &mut *entry.body.borrow_mut();
        let NodeBody {
            inputs,
            outputs,
            params,
            processor,
            ..
        } = body;

        let mut requests = NodeRequests::default();
        let mut io = ProcessIo {
            inputs: inputs.as_slice(),
            params: params.as_slice(),
            outputs: outputs.as_mut_slice(),
            pool,
            requests: &mut requests,
        };
        processor.process(&mut io, timing);

        if requests.retire {
            self.retired.push(id);
        }
        Ok(())
    }

    /// Pull one input-like port: drive every connected source, then mix
    /// their published blocks, then (for parameters) compute the block's
    /// values.
    fn pull_slot(
        &mut self,
        id: NodeId,
        slot: Slot,
        timing: &BlockTiming,
        pool: &BufferPool,
    ) -> Result<()> {
        // Drive sources with no borrow held; copy refs out one at a time so
        // a command cannot invalidate an index mid-walk (commands only run
        // between blocks anyway, but the discipline keeps this obviously
        // sound).
        let mut c = 0;
        loop {
            let conn = {
                let body = self.nodes[&id].body.borrow();
                let port = match slot {
                    Slot::Input(i) => &body.inputs[i],
                    Slot::Param(p) => &body.params[p].input,
                };
                port.connection_at(c)
            };
            let Some(conn) = conn else { break };
            self.process_node(conn.node, timing, pool)?;
            c += 1;
        }

        // Mix. Every source is processed (memoized) by now, and none of
        // them is this node - a same-node edge would have tripped cycle
        // detection above.
        let entry = &self.nodes[&id];
        let body = &mut *entry.body.borrow_mut();

        let port = match slot {
            Slot::Input(i) => &mut body.inputs[i],
            Slot::Param(p) => &mut body.params[p].input,
        };

        let nodes = &self.nodes;
        let effective = {
            let counts = port.connections().iter().filter_map(|conn| {
                nodes.get(&conn.node).and_then(|src| {
                    let src_body = src.body.borrow();
                    src_body
                        .outputs
                        .get(conn.output)
                        .map(|out| out.block().channels())
                })
            });
            port.effective_channels(counts)
        };
        port.prepare(pool, effective);

        let mut c = 0;
        while let Some(conn) = port.connection_at(c) {
            if let Some(src) = self.nodes.get(&conn.node) {
                let src_body = src.body.borrow();
                if let Some(out) = src_body.outputs.get(conn.output) {
                    port.accumulate(out.block());
                }
            }
            c += 1;
        }

        // Parameters additionally compute their block values now.
        if let Slot::Param(p) = slot {
            let crate::node::ParamSlot {
                param,
                input,
                values,
            } = &mut body.params[p];
            let modulation = input.is_connected().then_some(&*input);
            param.compute(
                timing.block_time,
                timing.sample_rate,
                modulation.map(|m| m.block()),
                values,
            );
        }

        Ok(())
    }
}
