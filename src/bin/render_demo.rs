//! Offline render demo: a detuned oscillator pair through a gain ramp,
//! written to a WAV file.

use clap::Parser;
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;
use wavegraph::{AsBaseContext, OfflineContext, OscillatorOptions, OscillatorShape};

#[derive(Parser, Debug)]
#[command(author, version, about = "Render a demo graph to a WAV file")]
struct Args {
    /// Output path
    #[arg(short, long, default_value = "demo.wav")]
    output: String,

    /// Duration in seconds
    #[arg(short, long, default_value_t = 2.0)]
    duration: f64,

    /// Sample rate in Hz
    #[arg(short, long, default_value_t = 48000.0)]
    sample_rate: f64,

    /// Base oscillator frequency in Hz
    #[arg(short, long, default_value_t = 220.0)]
    frequency: f32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let frames = (args.duration * args.sample_rate) as usize;

    let mut ctx = OfflineContext::new(2, args.sample_rate)?;
    let destination = ctx.destination();

    // Two slightly detuned sawtooths, panned apart, under a fade-in.
    let gain = ctx.create_gain();
    gain.gain().set_value(0.0);
    gain.gain().set_value_at_time(0.0, 0.0)?;
    gain.gain()
        .linear_ramp_to_value_at_time(0.4, args.duration.min(0.5))?;
    gain.connect_to(&destination)?;

    for (detune, pan) in [(-7.0, -0.6), (7.0, 0.6)] {
        let osc = ctx.create_oscillator_with(OscillatorOptions {
            shape: OscillatorShape::Sawtooth,
            frequency: args.frequency,
            detune,
        });
        let panner = ctx.create_stereo_panner();
        panner.pan().set_value(pan);
        osc.connect_to(&panner)?;
        panner.connect_to(&gain)?;
        osc.start(0.0)?;
    }

    info!(frames, rate = args.sample_rate, "rendering");
    let rendered = ctx.render(frames)?;

    let spec = WavSpec {
        channels: 2,
        sample_rate: args.sample_rate as u32,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&args.output, spec)?;
    for i in 0..frames {
        writer.write_sample(rendered[0][i])?;
        writer.write_sample(rendered[1][i])?;
    }
    writer.finalize()?;

    info!(path = %args.output, "done");
    Ok(())
}
