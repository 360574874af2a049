use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wavegraph::{AsBaseContext, OfflineContext, FRAMES_PER_BLOCK};

fn bench_block_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");

    group.bench_function("osc_gain_chain_block", |b| {
        let mut ctx = OfflineContext::new(2, 48000.0).unwrap();
        let osc = ctx.create_oscillator();
        let gain = ctx.create_gain();
        gain.gain().set_value(0.5);
        osc.connect_to(&gain).unwrap();
        gain.connect_to(&ctx.destination()).unwrap();
        osc.start(0.0).unwrap();

        let mut out = vec![vec![0.0f32; FRAMES_PER_BLOCK]; 2];
        b.iter(|| {
            ctx.render_into(black_box(&mut out), FRAMES_PER_BLOCK, 0).unwrap();
        });
    });

    group.bench_function("fanout_16_sources_block", |b| {
        let mut ctx = OfflineContext::new(2, 48000.0).unwrap();
        let mix = ctx.create_gain();
        mix.gain().set_value(1.0 / 16.0);
        mix.connect_to(&ctx.destination()).unwrap();
        for i in 0..16 {
            let osc = ctx.create_oscillator();
            osc.frequency().set_value(110.0 * (i + 1) as f32);
            osc.connect_to(&mix).unwrap();
            osc.start(0.0).unwrap();
        }

        let mut out = vec![vec![0.0f32; FRAMES_PER_BLOCK]; 2];
        b.iter(|| {
            ctx.render_into(black_box(&mut out), FRAMES_PER_BLOCK, 0).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_block_render);
criterion_main!(benches);
