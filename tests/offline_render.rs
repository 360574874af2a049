//! Offline driver: end-to-end rendering, carry-over, validation, clock.

use wavegraph::{AsBaseContext, GraphError, OfflineContext, FRAMES_PER_BLOCK};

#[test]
fn test_constant_source_renders_dc() {
    // Constant 0.5 into a stereo destination: every frame of both channels
    // is exactly 0.5.
    let mut ctx = OfflineContext::new(2, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.offset().set_value(0.5);
    source.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.render(256).unwrap();
    assert_eq!(out.len(), 2);
    for channel in &out {
        assert_eq!(channel.len(), 256);
        assert!(channel.iter().all(|&s| s == 0.5));
    }
}

#[test]
fn test_render_into_with_start_offset() {
    let mut ctx = OfflineContext::new(1, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.offset().set_value(1.0);
    source.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let mut out = vec![vec![-9.0; 100]];
    ctx.render_into(&mut out, 60, 40).unwrap();
    assert!(out[0][..40].iter().all(|&s| s == -9.0));
    assert!(out[0][40..].iter().all(|&s| s == 1.0));
}

#[test]
fn test_carry_over_across_unaligned_requests() {
    // A ramping gain makes every output frame distinct, so any dropped or
    // duplicated carry frame shows up as a discontinuity.
    let sr = 48000.0;
    let mut ctx = OfflineContext::new(2, sr).unwrap();
    let source = ctx.create_constant_source();
    source.offset().set_value(1.0);
    let gain = ctx.create_gain();
    gain.gain().set_value_at_time(0.0, 0.0).unwrap();
    gain.gain()
        .linear_ramp_to_value_at_time(1.0, 1024.0 / sr)
        .unwrap();
    source.connect_to(&gain).unwrap();
    gain.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    // Awkward request sizes straddling block boundaries.
    let mut pieces = Vec::new();
    for n in [37, 100, 1, 200, 174] {
        let out = ctx.render(n).unwrap();
        pieces.extend_from_slice(&out[0]);
    }

    assert_eq!(pieces.len(), 512);
    for (i, &v) in pieces.iter().enumerate() {
        let expected = i as f32 / 1024.0;
        assert!(
            (v - expected).abs() < 1e-4,
            "frame {i}: {v} vs {expected}"
        );
    }
}

#[test]
fn test_extra_output_channels_are_zeroed() {
    let mut ctx = OfflineContext::new(1, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    // Caller asks for 3 channels from a mono graph.
    let mut out = vec![vec![7.0; 128]; 3];
    ctx.render_into(&mut out, 128, 0).unwrap();
    assert!(out[0].iter().all(|&s| s == 1.0));
    assert!(out[1].iter().all(|&s| s == 0.0));
    assert!(out[2].iter().all(|&s| s == 0.0));
}

#[test]
fn test_argument_validation_before_processing() {
    let mut ctx = OfflineContext::new(2, 48000.0).unwrap();

    let mut empty: Vec<Vec<f32>> = vec![];
    assert!(matches!(
        ctx.render_into(&mut empty, 128, 0),
        Err(GraphError::Argument(_))
    ));

    let mut out = vec![vec![0.0; 64]];
    assert!(matches!(
        ctx.render_into(&mut out, 0, 0),
        Err(GraphError::Argument(_))
    ));
    // start + frames exceeds the channel buffer.
    assert!(matches!(
        ctx.render_into(&mut out, 64, 1),
        Err(GraphError::Argument(_))
    ));
    // Nothing was rendered: the clock never moved.
    assert_eq!(ctx.base().current_time(), 0.0);
}

#[test]
fn test_clock_advances_exactly_per_block() {
    let sr = 44100.0;
    let mut ctx = OfflineContext::new(1, sr).unwrap();
    let source = ctx.create_constant_source();
    source.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let blocks = 7;
    ctx.render(blocks * FRAMES_PER_BLOCK).unwrap();

    // Same accumulation, same doubles: the comparison is exact.
    let mut expected = 0.0f64;
    for _ in 0..blocks {
        expected += FRAMES_PER_BLOCK as f64 / sr;
    }
    assert_eq!(ctx.base().current_time(), expected);
    assert_eq!(ctx.base().current_block(), blocks as u64);
}

#[test]
fn test_pool_conservation_across_dispose() {
    let mut ctx = OfflineContext::new(2, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    let gain = ctx.create_gain();
    source.connect_to(&gain).unwrap();
    gain.connect_to(&ctx.destination()).unwrap();
    source.start(0.0).unwrap();
    ctx.render(128).unwrap();

    let before = ctx.base().pool_stats();
    gain.dispose();
    ctx.render(128).unwrap();
    let after = ctx.base().pool_stats();

    // The gain held an input block, an output block, and one param
    // modulation block; all three came back.
    assert_eq!(after.outstanding + 3, before.outstanding);
}

#[test]
fn test_disposed_context_rejects_everything() {
    let mut ctx = OfflineContext::new(1, 48000.0).unwrap();
    let source = ctx.create_constant_source();
    source.connect_to(&ctx.destination()).unwrap();
    ctx.dispose();

    assert!(matches!(ctx.render(128), Err(GraphError::Disposed)));
    let other = ctx.create_gain();
    assert!(matches!(
        source.connect_to(&other),
        Err(GraphError::Disposed)
    ));
}

#[test]
fn test_unconnected_destination_renders_silence() {
    let mut ctx = OfflineContext::new(2, 48000.0).unwrap();
    let out = ctx.render(300).unwrap();
    assert!(out.iter().all(|ch| ch.iter().all(|&s| s == 0.0)));
}
