//! Source scheduling: sample-accurate start/stop, `ended`, start rules.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wavegraph::{AsBaseContext, GraphError, OfflineContext, FRAMES_PER_BLOCK};

#[test]
fn test_stop_mid_block_zeroes_tail_and_fires_ended_once() {
    // Oscillator started at t=0, stopped just past frame 100: frames
    // 0..100 carry the waveform, frames 100.. are exactly zero, `ended`
    // fires exactly once, and the node disposes itself afterwards.
    let sr = 48000.0;
    let mut ctx = OfflineContext::new(2, sr).unwrap();
    let osc = ctx.create_oscillator();
    osc.connect_to(&ctx.destination()).unwrap();
    osc.start(0.0).unwrap();
    osc.stop(100.5 / sr).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let observer = fired.clone();
    osc.on_ended(move || {
        observer.fetch_add(1, Ordering::SeqCst);
    });

    let out = ctx.render(2 * FRAMES_PER_BLOCK).unwrap();
    let samples = &out[0];

    // The waveform is live up to frame 100 (sample 0 of a sine is 0).
    let expected_99 = (TAU * 440.0 * 99.0 / sr).sin() as f32;
    assert!((samples[99] - expected_99).abs() < 1e-4);
    for (i, &s) in samples.iter().enumerate().take(2 * FRAMES_PER_BLOCK).skip(100) {
        assert_eq!(s, 0.0, "frame {i} after stop");
    }

    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Self-disposed: further scheduling still reports through the handle,
    // but the render plane is gone and stays silent.
    let out = ctx.render(FRAMES_PER_BLOCK).unwrap();
    assert!(out[0].iter().all(|&s| s == 0.0));
}

#[test]
fn test_start_mid_block_zeroes_head() {
    let sr = 48000.0;
    let mut ctx = OfflineContext::new(2, sr).unwrap();
    let source = ctx.create_constant_source();
    source.offset().set_value(1.0);
    source.connect_to(&ctx.destination()).unwrap();
    // ceil(50.5) = 51 is the first live frame.
    source.start(50.5 / sr).unwrap();

    let out = ctx.render(FRAMES_PER_BLOCK).unwrap();
    let samples = &out[0];
    assert!(samples[..51].iter().all(|&s| s == 0.0));
    assert!(samples[51..].iter().all(|&s| s == 1.0));
}

#[test]
fn test_start_in_a_later_block() {
    let sr = 48000.0;
    let mut ctx = OfflineContext::new(2, sr).unwrap();
    let source = ctx.create_constant_source();
    source.connect_to(&ctx.destination()).unwrap();
    source.start(FRAMES_PER_BLOCK as f64 / sr).unwrap();

    let out = ctx.render(2 * FRAMES_PER_BLOCK).unwrap();
    assert!(out[0][..FRAMES_PER_BLOCK].iter().all(|&s| s == 0.0));
    assert!(out[0][FRAMES_PER_BLOCK..].iter().all(|&s| s == 1.0));
}

#[test]
fn test_oscillator_is_single_start() {
    let ctx = OfflineContext::new(2, 48000.0).unwrap();
    let osc = ctx.create_oscillator();
    osc.start(0.0).unwrap();
    assert!(matches!(
        osc.start(1.0),
        Err(GraphError::InvalidOperation(_))
    ));
}

#[test]
fn test_constant_source_ignores_second_start() {
    let mut ctx = OfflineContext::new(2, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();
    // Free-form source: silently ignored, playback unaffected.
    source.start(5.0).unwrap();

    let out = ctx.render(128).unwrap();
    assert!(out[0].iter().all(|&s| s == 1.0));
}

#[test]
fn test_stop_before_start_is_invalid() {
    let ctx = OfflineContext::new(2, 48000.0).unwrap();
    let osc = ctx.create_oscillator();
    assert!(matches!(
        osc.stop(1.0),
        Err(GraphError::InvalidOperation(_))
    ));
}

#[test]
fn test_ended_subscription_after_the_fact_runs_immediately() {
    let sr = 48000.0;
    let mut ctx = OfflineContext::new(2, sr).unwrap();
    let osc = ctx.create_oscillator();
    osc.connect_to(&ctx.destination()).unwrap();
    osc.start(0.0).unwrap();
    osc.stop(10.0 / sr).unwrap();
    ctx.render(FRAMES_PER_BLOCK).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let observer = fired.clone();
    osc.on_ended(move || {
        observer.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_negative_when_means_immediately() {
    let mut ctx = OfflineContext::new(2, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.connect_to(&ctx.destination()).unwrap();
    source.start(-3.0).unwrap();

    let out = ctx.render(64).unwrap();
    assert!(out[0].iter().all(|&s| s == 1.0));
}
