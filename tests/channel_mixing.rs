//! Channel conversion across real graphs: up-mix, equal-power down-mix,
//! interpretation and mode overrides.

use std::f32::consts::FRAC_PI_4;

use wavegraph::{
    AsBaseContext, ChannelCountMode, ChannelInterpretation, OfflineContext, StereoPannerOptions,
};

#[test]
fn test_mono_source_fans_out_to_stereo_destination() {
    let mut ctx = OfflineContext::new(2, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.offset().set_value(0.5);
    source.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.render(128).unwrap();
    assert!(out[0].iter().all(|&s| s == 0.5));
    assert!(out[1].iter().all(|&s| s == 0.5));
}

#[test]
fn test_stereo_cancellation_downmixes_to_exact_zero() {
    // (left, right) = (1, -1) into a mono destination: the equal-power law
    // gives (1 + (-1)) / sqrt(2) == 0 on every frame.
    let mut ctx = OfflineContext::new(1, 48000.0).unwrap();

    let left = ctx.create_constant_source();
    left.offset().set_value(1.0);
    let to_left = ctx.create_stereo_panner();
    to_left.pan().set_value(-1.0);
    left.connect_to(&to_left).unwrap();

    let right = ctx.create_constant_source();
    right.offset().set_value(-1.0);
    let to_right = ctx.create_stereo_panner();
    to_right.pan().set_value(1.0);
    right.connect_to(&to_right).unwrap();

    to_left.connect_to(&ctx.destination()).unwrap();
    to_right.connect_to(&ctx.destination()).unwrap();
    left.start(0.0).unwrap();
    right.start(0.0).unwrap();

    let out = ctx.render(128).unwrap();
    assert!(out[0].iter().all(|&s| s.abs() < 1e-6));
}

#[test]
fn test_equal_power_downmix_scaling() {
    // A centered pan spreads a unit mono signal as (cos pi/4, sin pi/4);
    // the mono downmix then sums with 1/sqrt(2): 2 * cos(pi/4) / sqrt(2)
    // lands back on 1.0.
    let mut ctx = OfflineContext::new(1, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.offset().set_value(1.0);
    let panner = ctx.create_stereo_panner();
    source.connect_to(&panner).unwrap();
    panner.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.render(128).unwrap();
    let expected = 2.0 * FRAC_PI_4.cos() / 2.0f32.sqrt();
    assert!(out[0]
        .iter()
        .all(|&s| (s - expected).abs() < 1e-5));
}

#[test]
fn test_discrete_interpretation_truncates_without_scaling() {
    // Same stereo signal into a mono destination, but discrete: only
    // channel 0 arrives, unscaled.
    let mut ctx = OfflineContext::new(1, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.offset().set_value(0.8);
    let panner = ctx.create_stereo_panner_with(StereoPannerOptions { pan: -1.0 });
    source.connect_to(&panner).unwrap();
    panner.connect_to(&ctx.destination()).unwrap();
    ctx.destination()
        .set_channel_interpretation(0, ChannelInterpretation::Discrete)
        .unwrap();
    source.start(0.0).unwrap();

    let out = ctx.render(128).unwrap();
    // Hard-left pan put the whole signal on channel 0.
    assert!(out[0].iter().all(|&s| (s - 0.8).abs() < 1e-6));
}

#[test]
fn test_clamped_max_keeps_nominal_width() {
    // A stereo source into a gain clamped to mono: the gain mixes down
    // before multiplying.
    let mut ctx = OfflineContext::new(1, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.offset().set_value(1.0);
    let panner = ctx.create_stereo_panner();
    source.connect_to(&panner).unwrap();

    let gain = ctx.create_gain();
    gain.set_channel_count(0, 1).unwrap();
    gain.set_channel_count_mode(0, ChannelCountMode::ClampedMax)
        .unwrap();
    panner.connect_to(&gain).unwrap();
    gain.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.render(128).unwrap();
    let expected = 2.0 * FRAC_PI_4.cos() / 2.0f32.sqrt();
    assert!(out[0]
        .iter()
        .all(|&s| (s - expected).abs() < 1e-5));
}

#[test]
fn test_max_mode_widens_to_widest_source() {
    // Stereo panner output through a gain left in max mode stays stereo
    // end to end.
    let mut ctx = OfflineContext::new(2, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.offset().set_value(1.0);
    let panner = ctx.create_stereo_panner_with(StereoPannerOptions { pan: 1.0 });
    source.connect_to(&panner).unwrap();
    let gain = ctx.create_gain();
    panner.connect_to(&gain).unwrap();
    gain.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.render(128).unwrap();
    // Hard right: silence left, full signal right.
    assert!(out[0].iter().all(|&s| s.abs() < 1e-6));
    assert!(out[1].iter().all(|&s| (s - 1.0).abs() < 1e-5));
}
