//! Realtime driver: render thread, ring, and device management.
//!
//! A dedicated render thread produces blocks into the frame ring whenever
//! it has room for one; the cpal output callback drains the ring into the
//! device buffer and pads with silence on underflow (there is no
//! error-raising path out of the callback). Hot-switching devices tears
//! down only the stream: the graph, the clock and the ring - including any
//! audio queued in it - survive the swap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, warn};

use crate::context::{AsBaseContext, BaseContext, ContextCore};
use crate::error::{GraphError, Result};
use crate::ring_buffer::{FrameRing, RingConsumer};
use crate::{FRAMES_PER_BLOCK, MAX_CHANNELS, MIN_CHANNELS};

/// Ring capacity, in device periods.
const RING_PERIODS: usize = 5;

/// Realtime context configuration.
pub struct RealtimeOptions {
    /// Output channel count.
    pub channels: usize,
    /// Device period size in frames.
    pub period_frames: usize,
    /// Sample rate; `None` takes the device default.
    pub sample_rate: Option<f64>,
    /// Output device by name; `None` takes the host default.
    pub device_name: Option<String>,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            channels: 2,
            period_frames: 480,
            sample_rate: None,
            device_name: None,
        }
    }
}

/// Names of the available output devices.
pub fn output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| GraphError::Device(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn find_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| GraphError::Device("no default output device".to_string())),
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| GraphError::Device(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| GraphError::Device(format!("no output device named `{name}`")))
        }
    }
}

/// A context rendered by a dedicated high-priority thread into a device
/// output stream.
pub struct RealtimeContext {
    base: BaseContext,
    core: Arc<ContextCore>,
    ring: FrameRing,
    channels: usize,
    period_frames: usize,
    stream: Option<cpal::Stream>,
    playing: bool,
    stop: Arc<AtomicBool>,
    render_thread: Option<std::thread::JoinHandle<()>>,
}

impl RealtimeContext {
    /// Open the device, start the render thread, and build (but not start)
    /// the output stream. Call [`start`](Self::start) to make sound.
    pub fn new(options: RealtimeOptions) -> Result<Self> {
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&options.channels) {
            return Err(GraphError::argument(format!(
                "channel count {} out of range 1..=32",
                options.channels
            )));
        }
        if options.period_frames == 0 {
            return Err(GraphError::argument("period size must be positive"));
        }

        let device = find_device(options.device_name.as_deref())?;
        let default_config = device
            .default_output_config()
            .map_err(|e| GraphError::Device(e.to_string()))?;
        let sample_rate = options
            .sample_rate
            .unwrap_or(f64::from(default_config.sample_rate().0));

        let core = ContextCore::new(sample_rate, options.channels)?;
        core.pool().prewarm(options.channels, 4);
        let ring = FrameRing::new(options.channels, options.period_frames * RING_PERIODS);

        let stop = Arc::new(AtomicBool::new(false));
        let render_thread = spawn_render_thread(&core, &ring, options.channels, &stop)?;

        let mut this = Self {
            base: BaseContext::new(core.clone()),
            core,
            ring,
            channels: options.channels,
            period_frames: options.period_frames,
            stream: None,
            playing: false,
            stop,
            render_thread: Some(render_thread),
        };
        this.open_stream(&device)?;
        info!(
            sample_rate,
            channels = options.channels,
            period = options.period_frames,
            "realtime context ready"
        );
        Ok(this)
    }

    fn open_stream(&mut self, device: &cpal::Device) -> Result<()> {
        let default_config = device
            .default_output_config()
            .map_err(|e| GraphError::Device(e.to_string()))?;
        let sample_format = default_config.sample_format();

        let mut config: cpal::StreamConfig = default_config.into();
        config.channels = self.channels as u16;
        config.sample_rate = cpal::SampleRate(self.core.sample_rate() as u32);
        config.buffer_size = cpal::BufferSize::Fixed(self.period_frames as u32);

        let consumer = self
            .ring
            .consumer()
            .ok_or_else(|| GraphError::Device("ring consumer still attached".to_string()))?;

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(device, &config, consumer),
            cpal::SampleFormat::I16 => build_stream::<i16>(device, &config, consumer),
            cpal::SampleFormat::U16 => build_stream::<u16>(device, &config, consumer),
            other => Err(GraphError::Device(format!(
                "unsupported sample format {other:?}"
            ))),
        }?;

        self.stream = Some(stream);
        Ok(())
    }

    /// Begin driving the device callback.
    pub fn start(&mut self) -> Result<()> {
        self.core.check_alive()?;
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| GraphError::Device("no stream open".to_string()))?;
        stream
            .play()
            .map_err(|e| GraphError::Device(e.to_string()))?;
        self.playing = true;
        Ok(())
    }

    /// Pause the device callback. The render thread keeps the ring topped
    /// up, so restart is gapless.
    pub fn stop(&mut self) -> Result<()> {
        self.core.check_alive()?;
        if let Some(stream) = self.stream.as_ref() {
            stream
                .pause()
                .map_err(|e| GraphError::Device(e.to_string()))?;
        }
        self.playing = false;
        Ok(())
    }

    /// Rebuild the output on another device, keeping the graph and the
    /// ring (queued audio included) intact.
    pub fn switch_device(&mut self, device_name: Option<&str>) -> Result<()> {
        self.core.check_alive()?;
        let device = find_device(device_name)?;
        // Dropping the old stream releases its consumer half.
        self.stream = None;
        self.open_stream(&device)?;
        if self.playing {
            self.start()?;
        }
        info!(device = device_name.unwrap_or("<default>"), "device switched");
        Ok(())
    }

    /// Tear everything down: stream, render thread, context.
    pub fn dispose(&mut self) {
        self.core.dispose();
        self.stop.store(true, Ordering::Release);
        self.stream = None;
        if let Some(handle) = self.render_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RealtimeContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl AsBaseContext for RealtimeContext {
    fn base(&self) -> &BaseContext {
        &self.base
    }
}

/// The producer loop: whenever the ring has room for a block, render one
/// and push it; otherwise back off briefly.
fn spawn_render_thread(
    core: &Arc<ContextCore>,
    ring: &FrameRing,
    channels: usize,
    stop: &Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>> {
    let core = core.clone();
    let stop = stop.clone();
    let mut producer = ring
        .producer()
        .ok_or_else(|| GraphError::Device("ring producer already attached".to_string()))?;

    std::thread::Builder::new()
        .name("wavegraph-render".to_string())
        .spawn(move || {
            info!("render thread up");
            while !stop.load(Ordering::Acquire) {
                if producer.available_write_frames() >= FRAMES_PER_BLOCK {
                    let mut scratch = core.pool().rent_scratch(channels);
                    match core.process_block_interleaved(&mut scratch, channels) {
                        Ok(()) => {}
                        Err(GraphError::Disposed) => {
                            core.pool().recycle_scratch(channels, scratch);
                            break;
                        }
                        Err(err) => {
                            // The block already came back as silence; keep
                            // the clock moving.
                            warn!(%err, "render error, producing silence");
                        }
                    }
                    producer.write_frames(&scratch);
                    core.pool().recycle_scratch(channels, scratch);
                } else {
                    std::thread::sleep(Duration::from_micros(200));
                }
            }
            info!("render thread down");
        })
        .map_err(|e| GraphError::Device(format!("failed to spawn render thread: {e}")))
}

/// Build the output stream for one sample format. The callback drains the
/// ring and pads with silence; it never blocks, allocates, or errors.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: RingConsumer,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    // One-time growth per device buffer size.
                    scratch.resize(data.len(), 0.0);
                }
                let got = consumer.read_samples(&mut scratch[..data.len()]);
                for (out, &s) in data.iter_mut().zip(&scratch[..got]) {
                    *out = T::from_sample(s);
                }
                for out in data.iter_mut().skip(got) {
                    *out = T::from_sample(0.0);
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| GraphError::Device(e.to_string()))?;
    Ok(stream)
}
