//! Context core: time, the command queue, and the render entry point.
//!
//! The context owns the graph arena, the buffer pool, and the clock. Nodes
//! are created from any control thread; their render-plane state is only
//! ever mutated on the render thread, which is latched the first time
//! [`ContextCore::process_block`] runs. The execute-or-post discipline runs
//! a command inline only when the caller *is* that thread and is between
//! blocks; everything else is queued and drained FIFO at the next block
//! start.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;

use crossbeam::channel::{Receiver, Sender};
use tracing::warn;

use crate::block::AudioBlock;
use crate::buffer_pool::{BufferPool, PoolStats};
use crate::command::{self, Command};
use crate::error::{GraphError, Result};
use crate::graph::GraphState;
use crate::node::{next_node_id, BlockTiming, NodeId};
use crate::{FRAMES_PER_BLOCK, MAX_CHANNELS, MIN_CHANNELS};

/// The graph arena behind single-thread interior mutability.
struct GraphCell(RefCell<GraphState>);

// SAFETY: the cell is only ever borrowed from the pinned render thread.
// `process_block` latches the first caller's thread id and rejects every
// other thread; `execute_or_post` borrows inline only when the caller is
// that same pinned thread outside a block. Until the latch is set, no
// thread borrows at all (everything is posted).
unsafe impl Send for GraphCell {}
unsafe impl Sync for GraphCell {}

/// Shared engine state behind every context flavor and node handle.
pub(crate) struct ContextCore {
    sample_rate: f64,
    channels: usize,
    pool: BufferPool,
    graph: GraphCell,
    tx: Sender<Command>,
    rx: Receiver<Command>,
    destination: NodeId,
    /// Incremented before each block; the first rendered block is 1.
    current_block: AtomicU64,
    /// Context time in seconds, stored as f64 bits.
    current_time: AtomicU64,
    in_render: AtomicBool,
    disposed: AtomicBool,
    render_thread: OnceLock<ThreadId>,
}

impl ContextCore {
    pub(crate) fn new(sample_rate: f64, channels: usize) -> Result<Arc<Self>> {
        if !(sample_rate > 0.0) || !sample_rate.is_finite() {
            return Err(GraphError::argument(format!(
                "sample rate {sample_rate} must be positive and finite"
            )));
        }
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&channels) {
            return Err(GraphError::argument(format!(
                "channel count {channels} out of range 1..=32"
            )));
        }

        let (tx, rx) = crossbeam::channel::unbounded();
        let pool = BufferPool::new();
        pool.prewarm(1, 8);
        pool.prewarm(channels, 8);

        let core = Arc::new(Self {
            sample_rate,
            channels,
            pool,
            graph: GraphCell(RefCell::new(GraphState::new())),
            tx,
            rx,
            destination: next_node_id(),
            current_block: AtomicU64::new(0),
            current_time: AtomicU64::new(0f64.to_bits()),
            in_render: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            render_thread: OnceLock::new(),
        });

        // The destination is queued like any other node; the drain at the
        // head of the first block inserts it before anything pulls.
        let body = crate::nodes::destination::destination_body(&core.pool, channels);
        core.execute_or_post(Command::AddNode {
            id: core.destination,
            body,
        });

        Ok(core)
    }

    pub(crate) fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn destination_id(&self) -> NodeId {
        self.destination
    }

    pub(crate) fn current_block(&self) -> u64 {
        self.current_block.load(Ordering::Acquire)
    }

    pub(crate) fn current_time(&self) -> f64 {
        f64::from_bits(self.current_time.load(Ordering::Acquire))
    }

    fn set_current_time(&self, t: f64) {
        self.current_time.store(t.to_bits(), Ordering::Release);
    }

    pub(crate) fn check_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(GraphError::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_render_thread(&self) -> bool {
        self.render_thread.get() == Some(&std::thread::current().id())
    }

    /// Register a node body under a fresh id. The insertion itself follows
    /// the execute-or-post discipline.
    pub(crate) fn register(&self, body: crate::node::NodeBody) -> NodeId {
        let id = next_node_id();
        self.execute_or_post(Command::AddNode { id, body });
        id
    }

    /// Run `cmd` synchronously iff the caller is the pinned render thread
    /// *between* blocks; otherwise enqueue it. Inline failures get the same
    /// swallow-and-log treatment as drained ones.
    pub(crate) fn execute_or_post(&self, cmd: Command) {
        if self.is_render_thread() && !self.in_render.load(Ordering::Acquire) {
            let mut graph = self.graph.0.borrow_mut();
            let kind = cmd.kind();
            if let Err(err) = cmd.apply(&mut graph, &self.pool) {
                warn!(command = kind, %err, "inline command failed");
            }
        } else {
            // The queue is unbounded; send only fails when the context is
            // gone, and then there is nobody left to care.
            let _ = self.tx.send(cmd);
        }
    }

    /// Render one block into the destination's output port.
    ///
    /// In order: reject a disposed context, pin (or verify) the render
    /// thread, drain the command queue, advance the block counter, pull the
    /// destination, then advance the clock by exactly one block - also when
    /// the pull failed, so realtime keeps moving through a broken graph.
    pub(crate) fn process_block(&self) -> Result<()> {
        self.check_alive()?;

        let me = std::thread::current().id();
        let pinned = *self.render_thread.get_or_init(|| me);
        if pinned != me {
            return Err(GraphError::invalid(
                "process_block called from a thread other than the pinned render thread",
            ));
        }

        {
            let mut graph = self.graph.0.borrow_mut();
            command::drain(&self.rx, &mut graph, &self.pool);
        }

        let block = self.current_block.fetch_add(1, Ordering::AcqRel) + 1;
        let block_time = self.current_time();
        let timing = BlockTiming {
            block,
            block_time,
            sample_rate: self.sample_rate,
        };

        self.in_render.store(true, Ordering::Release);
        let result = {
            let mut graph = self.graph.0.borrow_mut();
            let result = graph.process_node(self.destination, &timing, &self.pool);
            for id in graph.take_retired() {
                let _ = self.tx.send(Command::Dispose { node: id });
            }
            result
        };
        self.in_render.store(false, Ordering::Release);

        self.set_current_time(block_time + FRAMES_PER_BLOCK as f64 / self.sample_rate);
        result
    }

    /// Read access to the destination's published block. `f` sees `None`
    /// when the destination has not produced yet.
    pub(crate) fn with_destination_block<R>(&self, f: impl FnOnce(Option<&AudioBlock>) -> R) -> R {
        let graph = self.graph.0.borrow();
        let block = graph.output_block(self.destination, 0);
        f(block.as_deref())
    }

    /// Render one block and interleave it into `out`. Graph channels beyond
    /// `channels` are dropped; missing ones are zeroed.
    pub(crate) fn process_block_interleaved(&self, out: &mut [f32], channels: usize) -> Result<()> {
        if channels == 0 {
            return Err(GraphError::argument("channel count must be at least 1"));
        }
        if out.len() < FRAMES_PER_BLOCK * channels {
            return Err(GraphError::argument(format!(
                "interleaved buffer holds {} samples, need {}",
                out.len(),
                FRAMES_PER_BLOCK * channels
            )));
        }

        let result = self.process_block();
        let frame_area = &mut out[..FRAMES_PER_BLOCK * channels];
        if result.is_err() {
            frame_area.fill(0.0);
            return result;
        }

        self.with_destination_block(|block| match block {
            Some(block) => {
                for ch in 0..channels {
                    if ch < block.channels() {
                        for (i, &v) in block.channel(ch).iter().enumerate() {
                            frame_area[i * channels + ch] = v;
                        }
                    } else {
                        for i in 0..FRAMES_PER_BLOCK {
                            frame_area[i * channels + ch] = 0.0;
                        }
                    }
                }
            }
            None => frame_area.fill(0.0),
        });
        Ok(())
    }

    pub(crate) fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

/// The shared control surface of every context flavor.
///
/// Node constructors take a `&BaseContext`; the concrete offline/realtime
/// contexts expose it through [`AsBaseContext`].
pub struct BaseContext {
    core: Arc<ContextCore>,
}

impl BaseContext {
    pub(crate) fn new(core: Arc<ContextCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<ContextCore> {
        &self.core
    }

    /// Context sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.core.sample_rate()
    }

    /// Context time in seconds; advances by `128 / sample_rate` per block.
    pub fn current_time(&self) -> f64 {
        self.core.current_time()
    }

    /// Number of blocks rendered so far.
    pub fn current_block(&self) -> u64 {
        self.core.current_block()
    }

    /// Buffer pool counters (rents, returns, outstanding).
    pub fn pool_stats(&self) -> PoolStats {
        self.core.pool_stats()
    }
}

/// Access to the shared context surface plus the node factory methods.
pub trait AsBaseContext {
    fn base(&self) -> &BaseContext;

    /// The context's sink node.
    fn destination(&self) -> crate::nodes::destination::DestinationNode {
        crate::nodes::destination::DestinationNode::handle(self.base())
    }

    /// Creates an oscillator source (sine by default).
    fn create_oscillator(&self) -> crate::nodes::oscillator::OscillatorNode {
        crate::nodes::oscillator::OscillatorNode::new(self.base(), Default::default())
    }

    /// Creates an oscillator source with explicit options.
    fn create_oscillator_with(
        &self,
        options: crate::nodes::oscillator::OscillatorOptions,
    ) -> crate::nodes::oscillator::OscillatorNode {
        crate::nodes::oscillator::OscillatorNode::new(self.base(), options)
    }

    /// Creates a gain node (unity by default).
    fn create_gain(&self) -> crate::nodes::gain::GainNode {
        crate::nodes::gain::GainNode::new(self.base(), Default::default())
    }

    /// Creates a gain node with explicit options.
    fn create_gain_with(
        &self,
        options: crate::nodes::gain::GainOptions,
    ) -> crate::nodes::gain::GainNode {
        crate::nodes::gain::GainNode::new(self.base(), options)
    }

    /// Creates a constant source (offset 1.0 by default).
    fn create_constant_source(&self) -> crate::nodes::constant_source::ConstantSourceNode {
        crate::nodes::constant_source::ConstantSourceNode::new(self.base(), Default::default())
    }

    /// Creates a constant source with explicit options.
    fn create_constant_source_with(
        &self,
        options: crate::nodes::constant_source::ConstantSourceOptions,
    ) -> crate::nodes::constant_source::ConstantSourceNode {
        crate::nodes::constant_source::ConstantSourceNode::new(self.base(), options)
    }

    /// Creates a biquad filter (lowpass by default).
    fn create_biquad_filter(&self) -> crate::nodes::biquad::BiquadFilterNode {
        crate::nodes::biquad::BiquadFilterNode::new(self.base(), Default::default())
    }

    /// Creates a biquad filter with explicit options.
    fn create_biquad_filter_with(
        &self,
        options: crate::nodes::biquad::BiquadFilterOptions,
    ) -> crate::nodes::biquad::BiquadFilterNode {
        crate::nodes::biquad::BiquadFilterNode::new(self.base(), options)
    }

    /// Creates an equal-power stereo panner.
    fn create_stereo_panner(&self) -> crate::nodes::panner::StereoPannerNode {
        crate::nodes::panner::StereoPannerNode::new(self.base(), Default::default())
    }

    /// Creates an equal-power stereo panner with explicit options.
    fn create_stereo_panner_with(
        &self,
        options: crate::nodes::panner::StereoPannerOptions,
    ) -> crate::nodes::panner::StereoPannerNode {
        crate::nodes::panner::StereoPannerNode::new(self.base(), options)
    }

    /// Creates a source that plays a published sample buffer.
    fn create_buffer_source(
        &self,
        buffer: std::sync::Arc<crate::sample_buffer::SampleBuffer>,
    ) -> crate::nodes::buffer_source::BufferSourceNode {
        crate::nodes::buffer_source::BufferSourceNode::new(
            self.base(),
            crate::nodes::buffer_source::BufferSourceOptions::new(buffer),
        )
    }

    /// Creates a buffer source with explicit options (loop region, rate).
    fn create_buffer_source_with(
        &self,
        options: crate::nodes::buffer_source::BufferSourceOptions,
    ) -> crate::nodes::buffer_source::BufferSourceNode {
        crate::nodes::buffer_source::BufferSourceNode::new(self.base(), options)
    }

    fn current_time(&self) -> f64 {
        self.base().current_time()
    }

    fn sample_rate(&self) -> f64 {
        self.base().sample_rate()
    }
}
