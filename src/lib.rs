//! # wavegraph
//!
//! A graph-based audio processing engine: a directed graph of nodes whose
//! sink is pulled in fixed 128-frame blocks, for offline rendering or a
//! realtime device callback.
//!
//! ## Architecture
//!
//! - **Data flows upstream-to-downstream by pull**: a driver asks the
//!   destination for its next block; the destination recursively pulls its
//!   inputs, driving each source node at most once per block.
//! - **Control flows downstream-to-upstream by message**: topology and
//!   node-state mutations post to the context command queue and drain at
//!   the start of the next block (or run inline when the caller is the
//!   render thread between blocks).
//! - **Parameters are sample-accurate**: set-value, linear and exponential
//!   ramps, and target approach compose on a lock-free published event
//!   list; audio-rate parameters accept modulation from any node output.
//! - **The hot path never allocates**: blocks are rented from a pool keyed
//!   by channel count, and the realtime bridge is a lock-free SPSC ring of
//!   interleaved frames.
//!
//! ## Offline rendering
//!
//! ```rust
//! use wavegraph::{AsBaseContext, OfflineContext};
//!
//! let mut ctx = OfflineContext::new(2, 48000.0)?;
//!
//! let source = ctx.create_constant_source();
//! source.offset().set_value(0.25);
//! source.connect_to(&ctx.destination())?;
//! source.start(0.0)?;
//!
//! let rendered = ctx.render(256)?;
//! assert_eq!(rendered.len(), 2);
//! assert!(rendered[0].iter().all(|&s| s == 0.25));
//! # Ok::<(), wavegraph::GraphError>(())
//! ```
//!
//! ## Realtime
//!
//! ```rust,no_run
//! use wavegraph::{AsBaseContext, RealtimeContext, RealtimeOptions};
//!
//! let mut ctx = RealtimeContext::new(RealtimeOptions::default())?;
//! let osc = ctx.create_oscillator();
//! osc.connect_to(&ctx.destination())?;
//! osc.start(0.0)?;
//! ctx.start()?;
//! # Ok::<(), wavegraph::GraphError>(())
//! ```

pub mod block;
pub mod buffer_pool;
mod command;
mod context;
pub mod error;
mod graph;
pub mod node;
pub mod nodes;
pub mod offline;
pub mod param;
pub mod ports;
pub mod realtime;
pub mod resampler;
pub mod ring_buffer;
pub mod sample_buffer;

/// Frames per block: the unit of scheduling.
pub const FRAMES_PER_BLOCK: usize = 128;

/// Minimum channel count of any block or port.
pub const MIN_CHANNELS: usize = 1;

/// Maximum channel count of any block or port.
pub const MAX_CHANNELS: usize = 32;

/// Sample rate used when none is given.
pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

pub use block::AudioBlock;
pub use buffer_pool::{BufferPool, PoolStats};
pub use context::{AsBaseContext, BaseContext};
pub use error::{GraphError, Result};
pub use node::{
    BlockTiming, NodeHandle, NodeId, NodeRequests, ParamHandle, ParamSlot, ProcessIo, Processor,
    ScheduleAction,
};
pub use nodes::biquad::{BiquadFilterNode, BiquadFilterOptions, BiquadFilterType};
pub use nodes::buffer_source::{BufferSourceNode, BufferSourceOptions};
pub use nodes::constant_source::{ConstantSourceNode, ConstantSourceOptions};
pub use nodes::destination::DestinationNode;
pub use nodes::gain::{GainNode, GainOptions};
pub use nodes::oscillator::{OscillatorNode, OscillatorOptions, OscillatorShape};
pub use nodes::panner::{distance_gain, DistanceModel, StereoPannerNode, StereoPannerOptions};
pub use offline::OfflineContext;
pub use param::{AudioParam, AutomationEvent, AutomationRate};
pub use ports::{ChannelCountMode, ChannelInterpretation, InputPort, OutputPort};
pub use realtime::{output_devices, RealtimeContext, RealtimeOptions};
pub use resampler::Resampler;
pub use ring_buffer::{FrameRing, RingConsumer, RingProducer};
pub use sample_buffer::SampleBuffer;
