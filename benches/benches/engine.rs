use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use dsp::amplifier::{ICHANNEL_AUDIO_IN1, OCHANNEL_AUDIO_OUT};
use dsp::oscillator::OCHANNEL_OUT;
use dsp::{Amplifier, AmplifierParams, OscConfig, OscTable, OscillatorModule, WaveForm};
use engine_graph::{GraphConfig, SignalGraph, Transaction};
use engine_rt::notification_channel;
use io_backends::{NullDriver, PcmOutputModule, StreamConfig};

fn scene_48_voices(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    group.measurement_time(Duration::from_secs(15));
    group.sample_size(20);

    group.bench_function("48_voices_96k_block64", |b| {
        let stream = StreamConfig {
            sample_rate: 96_000,
            block_size: 64,
            ..StreamConfig::default()
        };
        let mut graph = SignalGraph::new(GraphConfig::new(stream.sample_rate, stream.block_size));
        let (notifier, _notifications) = notification_channel(16);
        let table = Arc::new(OscTable::new(96_000.0, WaveForm::Saw));
        let driver = Arc::new(NullDriver::unpaced(stream));

        let mut txn = Transaction::new();
        let output = PcmOutputModule::new(driver, 64)
            .expect("output bridge")
            .insert(&mut txn);
        for voice in 0..48 {
            let osc = txn.integrate(OscillatorModule::new(
                OscConfig::new(Arc::clone(&table)).with_frequency(110.0 + voice as f64),
            ));
            let amp = txn.integrate(Amplifier::new(AmplifierParams {
                alevel1: 2.0,
                base_level: 100.0,
                ..AmplifierParams::default()
            }));
            txn.connect_stream(osc, OCHANNEL_OUT, amp, ICHANNEL_AUDIO_IN1);
            txn.connect_joint(amp, OCHANNEL_AUDIO_OUT, output.module, voice % 2);
        }
        txn.prepare_buffers(64);
        graph.apply(&mut txn).expect("graph install");

        let mut tick = 0u64;
        b.iter(|| {
            graph.process(64, tick, &notifier);
            tick += 64;
        });
    });

    group.finish();
}

criterion_group!(benches, scene_48_voices);
criterion_main!(benches);
