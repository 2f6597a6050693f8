use dsp::oscillator::{ICHANNEL_FREQ, ICHANNEL_SYNC, OCHANNEL_OUT};
use dsp::{ConstantModule, OscConfig, OscInputs, OscTable, Oscillator, OscillatorModule, WaveForm};
use engine_graph::{GraphConfig, InputChannel, SignalGraph, Transaction};
use engine_rt::notification_channel;
use std::sync::Arc;

fn table(form: WaveForm) -> Arc<OscTable> {
    Arc::new(OscTable::with_table_bits(48_000.0, form, 10))
}

#[test]
fn output_repeats_with_exact_period() {
    // 750 Hz at 48 kHz: 64 samples per cycle, increment 2^26
    let mut osc = Oscillator::new(OscConfig::new(table(WaveForm::Saw)).with_frequency(750.0));
    let block = 48;
    let mut out = vec![0.0f32; block * 8];
    for (k, chunk) in out.chunks_mut(block).enumerate() {
        osc.process(&OscInputs::default(), chunk, None);
        let expected = ((k + 1) as u64 * block as u64 * (1u64 << 26)) as u32;
        assert_eq!(osc.state().cur_pos, expected);
    }
    for i in 0..out.len() - 64 {
        assert_eq!(out[i], out[i + 64], "sample {i}");
    }
}

#[test]
fn block_split_is_transparent() {
    let config = OscConfig::new(table(WaveForm::Square)).with_frequency(331.0);
    let mut whole = Oscillator::new(config.clone());
    let mut split = Oscillator::new(config);
    let mut a = vec![0.0f32; 256];
    let mut b = vec![0.0f32; 256];
    whole.process(&OscInputs::default(), &mut a, None);
    for chunk in b.chunks_mut(64) {
        split.process(&OscInputs::default(), chunk, None);
    }
    assert_eq!(a, b);
    assert_eq!(whole.state(), split.state());
}

#[test]
fn sync_edge_resets_phase_exactly() {
    let config = OscConfig::new(table(WaveForm::Sine))
        .with_frequency(1000.0)
        .with_phase(0.25);
    let mut osc = Oscillator::new(config);
    let edge = 37;
    let mut sync = vec![0.0f32; edge + 1];
    sync[edge] = 1.0;
    let mut out = vec![0.0f32; edge + 1];
    let inputs = OscInputs {
        sync: Some(&sync),
        ..OscInputs::default()
    };
    osc.process(&inputs, &mut out, None);

    assert_eq!(out[edge], 1.0);
    let sync_pos = 1u32 << 30;
    let pos_inc = (1000.0 * 4_294_967_296.0f64 / 48_000.0).round() as u32;
    assert_eq!(osc.state().cur_pos, sync_pos.wrapping_add(pos_inc));
    assert_eq!(osc.state().last_sync_level, 1.0);
}

#[test]
fn at_most_one_sync_pulse_per_cycle() {
    // 48000 / 1100 is not an integer period
    let mut osc = Oscillator::new(OscConfig::new(table(WaveForm::Saw)).with_frequency(1100.0));
    let mut out = vec![0.0f32; 4800];
    let mut pulses = vec![0.0f32; 4800];
    for (mono, sync) in out.chunks_mut(100).zip(pulses.chunks_mut(100)) {
        osc.process(&OscInputs::default(), mono, Some(sync));
    }
    let positions: Vec<usize> = pulses
        .iter()
        .enumerate()
        .filter(|(_, v)| **v == 1.0)
        .map(|(i, _)| i)
        .collect();
    assert!((109..=111).contains(&positions.len()), "{} pulses", positions.len());
    for pair in positions.windows(2) {
        assert!(pair[1] - pair[0] >= 43, "pulses at {pair:?}");
    }
}

#[test]
fn frequency_input_drives_module_in_graph() {
    let (notifier, _events) = notification_channel(4);
    let mut graph = SignalGraph::new(GraphConfig::new(48_000, 64));
    let mut txn = Transaction::new();
    let freq = txn.integrate(ConstantModule::single(750.0 / 24_000.0));
    let osc = txn.integrate(OscillatorModule::new(
        OscConfig::new(table(WaveForm::Sine)).with_frequency(100.0),
    ));
    txn.connect(freq, 0, osc, InputChannel::Stream(ICHANNEL_FREQ));
    txn.set_consumer(osc, true);
    graph.apply(&mut txn).unwrap();

    graph.process(64, 0, &notifier);
    let first = graph.ostream(osc, OCHANNEL_OUT).unwrap().to_vec();
    graph.process(64, 64, &notifier);
    let second = graph.ostream(osc, OCHANNEL_OUT).unwrap().to_vec();
    // the input overrides the configured 100 Hz from the first sample on
    assert_eq!(first[0], 0.0);
    assert_eq!(first, second);
    let module = graph.module_mut::<OscillatorModule>(osc).unwrap();
    assert!((module.oscillator().state().last_freq_level - 750.0).abs() < 1e-9);
}

#[test]
fn sync_output_follows_connection() {
    let (notifier, _events) = notification_channel(4);
    let mut graph = SignalGraph::new(GraphConfig::new(48_000, 32));
    let mut txn = Transaction::new();
    let master = txn.integrate(OscillatorModule::new(
        OscConfig::new(table(WaveForm::Saw)).with_frequency(3000.0),
    ));
    let slave = txn.integrate(OscillatorModule::new(
        OscConfig::new(table(WaveForm::Saw)).with_frequency(700.0),
    ));
    txn.connect(master, 1, slave, InputChannel::Stream(ICHANNEL_SYNC));
    txn.set_consumer(slave, true);
    graph.apply(&mut txn).unwrap();
    graph.process(32, 0, &notifier);

    let master_mode = graph
        .module_mut::<OscillatorModule>(master)
        .and_then(|m| m.oscillator().mode())
        .unwrap();
    let slave_mode = graph
        .module_mut::<OscillatorModule>(slave)
        .and_then(|m| m.oscillator().mode())
        .unwrap();
    assert!(master_mode.osync && !master_mode.isync);
    assert!(slave_mode.isync && !slave_mode.osync);
}
