//! Node base: identity, processors, schedules, and the public node handle.
//!
//! A node is split across the two planes. The render plane owns a
//! [`NodeBody`]: the ports, the parameter slots, and the boxed
//! [`Processor`] that does the actual signal work. The control plane holds a
//! [`NodeHandle`]: the id, the port counts for synchronous validation, and
//! the context reference through which every mutation is posted.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferPool;
use crate::command::Command;
use crate::context::ContextCore;
use crate::error::{GraphError, Result};
use crate::param::AudioParam;
use crate::ports::{InputPort, InputRef, OutputPort, OutputRef};
use crate::FRAMES_PER_BLOCK;

/// Node identity: a process-wide monotonically increasing 64-bit id. Two
/// nodes are equal iff their ids match, across contexts.
pub type NodeId = u64;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-block timing handed to processors.
#[derive(Debug, Clone, Copy)]
pub struct BlockTiming {
    /// Block number; the counter starts at 0 and is incremented before each
    /// block, so the first rendered block is 1.
    pub block: u64,
    /// Context time at the start of the block, in seconds.
    pub block_time: f64,
    /// Context sample rate.
    pub sample_rate: f64,
}

impl BlockTiming {
    /// Context time at the end of the block.
    pub fn block_end_time(&self) -> f64 {
        self.block_time + FRAMES_PER_BLOCK as f64 / self.sample_rate
    }
}

/// Scheduling messages applied to a processor on the render thread.
pub enum ScheduleAction {
    Start {
        when: f64,
        offset: f64,
        duration: Option<f64>,
    },
    Stop {
        when: f64,
    },
}

/// Side requests a processor can raise during `process`.
#[derive(Default)]
pub struct NodeRequests {
    /// Tear this node down after the block (set by sources that ended).
    pub retire: bool,
}

/// Everything a processor may touch during its block.
pub struct ProcessIo<'a> {
    /// Input ports, already pulled and mixed for this block.
    pub inputs: &'a [InputPort],
    /// Parameter slots, already computed for this block.
    pub params: &'a [ParamSlot],
    /// Output ports to publish into.
    pub outputs: &'a mut [OutputPort],
    /// For re-leasing output blocks on channel-count changes.
    pub pool: &'a BufferPool,
    /// Side requests back to the scheduler.
    pub requests: &'a mut NodeRequests,
}

/// The render-plane capability set of a node type.
///
/// Implementations are leaves: a small struct of DSP state plus this trait.
/// They run exclusively on the render thread.
pub trait Processor: Send {
    /// Produce one block into the output ports. Inputs and parameter values
    /// for the block are ready in `io`.
    fn process(&mut self, io: &mut ProcessIo<'_>, timing: &BlockTiming);

    /// Apply a start/stop message. Non-source nodes ignore these.
    fn schedule(&mut self, _action: ScheduleAction) {}

    /// Render-thread teardown hook, called once during disposal.
    fn on_dispose(&mut self) {}
}

/// A parameter as the render plane sees it: the shared control object, the
/// hidden summing input for audio-rate modulation, and the per-block
/// computed values.
pub struct ParamSlot {
    pub(crate) param: Arc<AudioParam>,
    pub(crate) input: InputPort,
    pub(crate) values: Vec<f32>,
}

impl ParamSlot {
    pub(crate) fn new(pool: &BufferPool, param: Arc<AudioParam>) -> Self {
        use crate::ports::{ChannelCountMode, ChannelInterpretation};
        Self {
            param,
            // Mono, discrete: modulation is read from the first channel of
            // whatever connects, with no speaker scaling.
            input: InputPort::new(
                pool,
                1,
                ChannelCountMode::Explicit,
                ChannelInterpretation::Discrete,
            ),
            values: vec![0.0; FRAMES_PER_BLOCK],
        }
    }

    /// The computed values for the current block (128 samples).
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// The render-plane state of one node.
pub(crate) struct NodeBody {
    pub(crate) label: String,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    pub(crate) params: Vec<ParamSlot>,
    pub(crate) processor: Box<dyn Processor>,
}

/// Arena entry: scheduling flags live outside the body so cycle detection
/// can consult them while the body is borrowed elsewhere on the stack.
pub(crate) struct NodeEntry {
    pub(crate) last_block: Cell<u64>,
    pub(crate) in_progress: Cell<bool>,
    pub(crate) body: RefCell<NodeBody>,
}

impl NodeEntry {
    pub(crate) fn new(body: NodeBody) -> Self {
        Self {
            last_block: Cell::new(0),
            in_progress: Cell::new(false),
            body: RefCell::new(body),
        }
    }
}

/// Fires the `ended` notification exactly once, on the render thread.
/// Subscribers registered after the fact run immediately on the caller.
pub(crate) struct EndedNotifier {
    fired: AtomicBool,
    subscribers: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl EndedNotifier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn subscribe(&self, f: Box<dyn FnOnce() + Send>) {
        if self.fired.load(Ordering::Acquire) {
            f();
            return;
        }
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if self.fired.load(Ordering::Acquire) {
            drop(subs);
            f();
        } else {
            subs.push(f);
        }
    }

    pub(crate) fn fire(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let subs = {
            let mut guard = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for f in subs {
            f();
        }
    }
}

/// Block-edge play window of a scheduled source (render-plane state).
pub(crate) struct PlaySchedule {
    start_time: f64,
    stop_time: f64,
    started: bool,
    ended: bool,
}

impl PlaySchedule {
    pub(crate) fn new() -> Self {
        Self {
            start_time: 0.0,
            stop_time: f64::NAN,
            started: false,
            ended: false,
        }
    }

    pub(crate) fn start(&mut self, when: f64) {
        if !self.started {
            self.started = true;
            self.start_time = when;
        }
    }

    pub(crate) fn stop(&mut self, when: f64) {
        if self.started && !self.ended {
            self.stop_time = when;
        }
    }

    pub(crate) fn has_ended(&self) -> bool {
        self.ended
    }

    /// The frame range `[from, to)` this source plays within the block, or
    /// `None` when it is entirely inactive. `t0`/`t1` are block start/end
    /// times.
    pub(crate) fn window(&self, t0: f64, t1: f64, sample_rate: f64) -> Option<(usize, usize)> {
        if !self.started || self.ended {
            return None;
        }
        let playing = t1 > self.start_time && (self.stop_time.is_nan() || t0 < self.stop_time);
        if !playing {
            return None;
        }

        let from = if t0 < self.start_time && self.start_time < t1 {
            (((self.start_time - t0) * sample_rate).ceil() as usize).min(FRAMES_PER_BLOCK)
        } else {
            0
        };
        let to = if !self.stop_time.is_nan() && t0 < self.stop_time && self.stop_time < t1 {
            (((self.stop_time - t0) * sample_rate).floor() as usize).min(FRAMES_PER_BLOCK)
        } else {
            FRAMES_PER_BLOCK
        };

        (from < to).then_some((from, to))
    }

    /// Whether this block is the first whose end time reaches the stop time.
    /// Latches the ended state.
    pub(crate) fn reaches_stop(&mut self, t1: f64) -> bool {
        if self.started && !self.ended && !self.stop_time.is_nan() && t1 >= self.stop_time {
            self.ended = true;
            return true;
        }
        false
    }

    /// Force the ended state (buffer exhaustion).
    pub(crate) fn finish(&mut self) {
        self.ended = true;
    }
}

/// Control-plane handle shared by every node type.
///
/// Handles validate arguments synchronously, then post mutations through
/// the context's execute-or-post discipline.
pub struct NodeHandle {
    core: Arc<ContextCore>,
    id: NodeId,
    label: String,
    n_inputs: usize,
    n_outputs: usize,
    disposed: AtomicBool,
}

impl NodeHandle {
    pub(crate) fn new(
        core: Arc<ContextCore>,
        id: NodeId,
        label: String,
        n_inputs: usize,
        n_outputs: usize,
    ) -> Self {
        Self {
            core,
            id,
            label,
            n_inputs,
            n_outputs,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn number_of_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn number_of_outputs(&self) -> usize {
        self.n_outputs
    }

    pub(crate) fn core(&self) -> &Arc<ContextCore> {
        &self.core
    }

    fn check_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(GraphError::Disposed);
        }
        self.core.check_alive()
    }

    /// Connect output `output` of this node to input `input` of `dst`.
    pub fn connect(&self, output: usize, dst: &NodeHandle, input: usize) -> Result<()> {
        self.check_alive()?;
        dst.check_alive()?;
        if self.id == dst.id {
            return Err(GraphError::argument("cannot connect a node to itself"));
        }
        if output >= self.n_outputs {
            return Err(GraphError::argument(format!(
                "output index {output} out of range (node has {})",
                self.n_outputs
            )));
        }
        if input >= dst.n_inputs {
            return Err(GraphError::argument(format!(
                "input index {input} out of range (node has {})",
                dst.n_inputs
            )));
        }
        self.core.execute_or_post(Command::Connect {
            src: OutputRef {
                node: self.id,
                output,
            },
            dst: InputRef::Port {
                node: dst.id,
                input,
            },
        });
        Ok(())
    }

    /// Connect output 0 of this node to input 0 of `dst`.
    pub fn connect_to(&self, dst: &NodeHandle) -> Result<()> {
        self.connect(0, dst, 0)
    }

    /// Remove the edge from output `output` to `dst`'s input `input`.
    pub fn disconnect(&self, output: usize, dst: &NodeHandle, input: usize) -> Result<()> {
        self.check_alive()?;
        if output >= self.n_outputs || input >= dst.n_inputs {
            return Err(GraphError::argument("port index out of range"));
        }
        self.core.execute_or_post(Command::Disconnect {
            src: OutputRef {
                node: self.id,
                output,
            },
            dst: InputRef::Port {
                node: dst.id,
                input,
            },
        });
        Ok(())
    }

    /// Feed output `output` into a parameter's hidden summing input for
    /// audio-rate modulation.
    pub fn connect_to_param(&self, output: usize, param: &ParamHandle) -> Result<()> {
        self.check_alive()?;
        if output >= self.n_outputs {
            return Err(GraphError::argument("output index out of range"));
        }
        if self.id == param.node {
            return Err(GraphError::argument(
                "cannot modulate a node's parameter from the node itself",
            ));
        }
        self.core.execute_or_post(Command::Connect {
            src: OutputRef {
                node: self.id,
                output,
            },
            dst: InputRef::Param {
                node: param.node,
                param: param.index,
            },
        });
        Ok(())
    }

    /// Remove a parameter modulation edge.
    pub fn disconnect_from_param(&self, output: usize, param: &ParamHandle) -> Result<()> {
        self.check_alive()?;
        if output >= self.n_outputs {
            return Err(GraphError::argument("output index out of range"));
        }
        self.core.execute_or_post(Command::Disconnect {
            src: OutputRef {
                node: self.id,
                output,
            },
            dst: InputRef::Param {
                node: param.node,
                param: param.index,
            },
        });
        Ok(())
    }

    /// Override the nominal channel count of input `input`.
    pub fn set_channel_count(&self, input: usize, count: usize) -> Result<()> {
        self.check_alive()?;
        if input >= self.n_inputs {
            return Err(GraphError::argument("input index out of range"));
        }
        if !(crate::MIN_CHANNELS..=crate::MAX_CHANNELS).contains(&count) {
            return Err(GraphError::argument(format!(
                "channel count {count} out of range 1..=32"
            )));
        }
        self.core.execute_or_post(Command::SetChannelConfig {
            node: self.id,
            input,
            count: Some(count),
            mode: None,
            interpretation: None,
        });
        Ok(())
    }

    /// Override the channel-count mode of input `input`.
    pub fn set_channel_count_mode(
        &self,
        input: usize,
        mode: crate::ports::ChannelCountMode,
    ) -> Result<()> {
        self.check_alive()?;
        if input >= self.n_inputs {
            return Err(GraphError::argument("input index out of range"));
        }
        self.core.execute_or_post(Command::SetChannelConfig {
            node: self.id,
            input,
            count: None,
            mode: Some(mode),
            interpretation: None,
        });
        Ok(())
    }

    /// Override the channel interpretation of input `input`.
    pub fn set_channel_interpretation(
        &self,
        input: usize,
        interpretation: crate::ports::ChannelInterpretation,
    ) -> Result<()> {
        self.check_alive()?;
        if input >= self.n_inputs {
            return Err(GraphError::argument("input index out of range"));
        }
        self.core.execute_or_post(Command::SetChannelConfig {
            node: self.id,
            input,
            count: None,
            mode: None,
            interpretation: Some(interpretation),
        });
        Ok(())
    }

    pub(crate) fn post_schedule(&self, action: ScheduleAction) {
        self.core.execute_or_post(Command::Schedule {
            node: self.id,
            action,
        });
    }

    /// Tear the node down: every edge removed, buffers returned to the
    /// pool, processor cleanup run on the render thread. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.core.check_alive().is_err() {
            return;
        }
        self.core.execute_or_post(Command::Dispose { node: self.id });
    }
}

/// Control-plane handle to one [`AudioParam`], carrying the location of its
/// hidden summing input so it can be a modulation target.
pub struct ParamHandle {
    pub(crate) param: Arc<AudioParam>,
    pub(crate) node: NodeId,
    pub(crate) index: usize,
}

impl ParamHandle {
    pub(crate) fn new(param: Arc<AudioParam>, node: NodeId, index: usize) -> Self {
        Self { param, node, index }
    }
}

impl std::ops::Deref for ParamHandle {
    type Target = AudioParam;

    fn deref(&self) -> &AudioParam {
        &self.param
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique_and_increasing() {
        let a = next_node_id();
        let b = next_node_id();
        assert!(b > a);
    }

    #[test]
    fn test_play_window_full_block() {
        let mut s = PlaySchedule::new();
        s.start(0.0);
        let sr = 48000.0;
        assert_eq!(s.window(0.0, 128.0 / sr, sr), Some((0, 128)));
    }

    #[test]
    fn test_play_window_not_started() {
        let s = PlaySchedule::new();
        assert_eq!(s.window(0.0, 1.0, 48000.0), None);
    }

    #[test]
    fn test_play_window_mid_block_start() {
        let sr = 48000.0;
        let mut s = PlaySchedule::new();
        s.start(50.0 / sr);
        let (from, to) = s.window(0.0, 128.0 / sr, sr).unwrap();
        assert_eq!(from, 50);
        assert_eq!(to, 128);
    }

    #[test]
    fn test_play_window_mid_block_stop() {
        let sr = 48000.0;
        let mut s = PlaySchedule::new();
        s.start(0.0);
        s.stop(100.0 / sr);
        let (from, to) = s.window(0.0, 128.0 / sr, sr).unwrap();
        assert_eq!(from, 0);
        assert_eq!(to, 100);
        assert!(s.reaches_stop(128.0 / sr));
        // Latched: fires only once.
        assert!(!s.reaches_stop(256.0 / sr));
        assert_eq!(s.window(128.0 / sr, 256.0 / sr, sr), None);
    }

    #[test]
    fn test_play_window_future_start() {
        let sr = 48000.0;
        let mut s = PlaySchedule::new();
        s.start(1.0);
        assert_eq!(s.window(0.0, 128.0 / sr, sr), None);
    }

    #[test]
    fn test_ended_notifier_fires_once() {
        use std::sync::atomic::AtomicUsize;

        let n = EndedNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        n.subscribe(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        n.fire();
        n.fire();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Late subscribers run immediately.
        let c = count.clone();
        n.subscribe(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
