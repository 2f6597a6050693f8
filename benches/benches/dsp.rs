use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use dsp::fastmath::{approx5_exp2, approx_atan1, saturate_hard, signal_from_freq};
use dsp::{OscConfig, OscInputs, OscTable, Oscillator, WaveForm};

fn oscillator_variants(c: &mut Criterion) {
    let mut group = c.benchmark_group("oscillator");
    let saw = Arc::new(OscTable::new(48_000.0, WaveForm::Saw));
    let pulse = Arc::new(OscTable::new(48_000.0, WaveForm::Pulse));
    let freq = vec![signal_from_freq(220.0) as f32; 256];
    let modulation: Vec<f32> = (0..256).map(|i| (i as f32 / 128.0) - 1.0).collect();
    let mut out = vec![0.0f32; 256];

    group.bench_function("plain_saw_256", |b| {
        let mut osc = Oscillator::new(OscConfig::new(Arc::clone(&saw)));
        b.iter(|| osc.process(&OscInputs::default(), black_box(&mut out), None));
    });

    group.bench_function("freq_exp_fm_saw_256", |b| {
        let mut config = OscConfig::new(Arc::clone(&saw));
        config.exponential_fm = true;
        config.fm_strength = 0.5;
        let mut osc = Oscillator::new(config);
        let inputs = OscInputs {
            freq: Some(&freq),
            modulation: Some(&modulation),
            ..OscInputs::default()
        };
        b.iter(|| osc.process(&inputs, black_box(&mut out), None));
    });

    group.bench_function("pwm_pulse_256", |b| {
        let mut config = OscConfig::new(Arc::clone(&pulse));
        config.pulse_mod_strength = 0.25;
        let mut osc = Oscillator::new(config);
        let inputs = OscInputs {
            pwm: Some(&modulation),
            ..OscInputs::default()
        };
        b.iter(|| osc.process(&inputs, black_box(&mut out), None));
    });

    group.finish();
}

fn fast_math(c: &mut Criterion) {
    let mut group = c.benchmark_group("fastmath");
    let values: Vec<f64> = (0..1024).map(|i| (i as f64 / 64.0) - 8.0).collect();

    group.bench_function("approx5_exp2", |b| {
        b.iter(|| {
            values
                .iter()
                .map(|v| approx5_exp2(black_box(*v as f32)))
                .sum::<f64>()
        })
    });
    group.bench_function("approx_atan1", |b| {
        b.iter(|| values.iter().map(|v| approx_atan1(black_box(*v))).sum::<f64>())
    });
    group.bench_function("saturate_hard", |b| {
        b.iter(|| {
            values
                .iter()
                .map(|v| saturate_hard(black_box(*v), 1.0))
                .sum::<f64>()
        })
    });

    group.finish();
}

criterion_group!(benches, oscillator_variants, fast_math);
criterion_main!(benches);
