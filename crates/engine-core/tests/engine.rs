use dsp::oscillator::{ICHANNEL_FREQ, OCHANNEL_OUT};
use dsp::fastmath::signal_from_freq;
use dsp::{ConstantModule, OscConfig, OscTable, OscillatorModule, WaveForm};
use engine_core::{Engine, EngineConfig, EngineContext, EngineError};
use engine_graph::{
    GraphError, InputChannel, Module, ModuleClass, ModuleId, ProcessContext, Transaction,
};
use engine_rt::{notification_channel, ControlEvent, EventQueue, TickClock};
use io_backends::{MemoryDriver, PcmInputModule, PcmOutputModule};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn engine(block_size: usize) -> Engine {
    Engine::new(EngineConfig::default().with_block_size(block_size)).unwrap()
}

fn oscillator_patch(engine: &Engine) -> ModuleId {
    let table = Arc::new(OscTable::new(48_000.0, WaveForm::Saw));
    let mut txn = Transaction::new();
    let freq = txn.integrate(ConstantModule::single(signal_from_freq(441.0) as f32));
    let osc = txn.integrate(OscillatorModule::new(OscConfig::new(table)));
    txn.connect_stream(freq, 0, osc, ICHANNEL_FREQ);
    txn.set_consumer(osc, true);
    engine.commit(&mut txn).unwrap();
    assert!(txn.is_empty());
    osc
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn block_split_matches_whole_block() {
    let mut whole = engine(256);
    let osc = oscillator_patch(&whole);
    whole.render(256).unwrap();
    let expected = whole.graph().unwrap().ostream(osc, OCHANNEL_OUT).unwrap().to_vec();

    let mut split = engine(256);
    let osc = oscillator_patch(&split);
    let mut rendered = Vec::new();
    for _ in 0..4 {
        split.render(64).unwrap();
        let block = split.graph().unwrap().ostream(osc, OCHANNEL_OUT).unwrap();
        rendered.extend_from_slice(&block[..64]);
    }
    assert_eq!(split.tick_stamp(), 256);
    assert_eq!(rendered, expected);
}

#[test]
fn connect_and_disconnect_in_one_transaction_never_sound() {
    let mut engine = engine(16);
    let driver = Arc::new(MemoryDriver::new(48_000, 1024));

    let mut txn = Transaction::new();
    let steady = txn.integrate(ConstantModule::single(0.5));
    let bridge = PcmOutputModule::new(driver.clone(), 16)
        .unwrap()
        .insert(&mut txn);
    txn.connect_joint(steady, 0, bridge.module, 0);
    engine.commit(&mut txn).unwrap();

    let mut txn = Transaction::new();
    let glitch = txn.integrate(ConstantModule::single(0.25));
    txn.connect_joint(glitch, 0, bridge.module, 0);
    txn.disconnect(glitch, 0, bridge.module, InputChannel::Joint(0));
    engine.commit(&mut txn).unwrap();

    engine.render(16).unwrap();
    let out = driver.take_output();
    assert_eq!(out.len(), 32);
    assert!(out.chunks_exact(2).all(|frame| frame == [0.5, 0.0]));
}

#[test]
fn rejected_transaction_changes_nothing() {
    let engine = engine(16);
    let mut txn = Transaction::new();
    let a = txn.integrate(ConstantModule::single(1.0));
    let b = txn.integrate(ConstantModule::single(2.0));
    txn.disconnect(a, 0, b, InputChannel::Stream(0));
    let jobs = txn.len();

    let err = engine.commit(&mut txn).unwrap_err();
    assert!(matches!(err, EngineError::Graph(GraphError::NoSuchInput { .. })));
    assert_eq!(txn.len(), jobs);
    assert!(engine.topology().is_empty());
}

#[test]
fn full_queue_hands_transaction_back() {
    let config = EngineConfig::default()
        .with_block_size(16)
        .with_transaction_queue_capacity(1);
    let mut engine = Engine::new(config).unwrap();

    let mut first = Transaction::new();
    first.integrate(ConstantModule::single(1.0));
    engine.commit(&mut first).unwrap();

    let mut second = Transaction::new();
    let id = second.integrate(ConstantModule::single(2.0));
    assert!(matches!(
        engine.commit(&mut second),
        Err(EngineError::QueueFull)
    ));
    assert_eq!(second.len(), 1);
    assert!(!engine.topology().contains(id));

    engine.render(16).unwrap();
    engine.commit(&mut second).unwrap();
    assert!(engine.topology().contains(id));
}

#[test]
fn input_bridge_announces_itself_once() {
    let mut engine = engine(32);
    let driver = Arc::new(MemoryDriver::new(48_000, 256));
    let mut txn = Transaction::new();
    let input = txn.integrate(PcmInputModule::new(driver, 32).unwrap());
    txn.set_consumer(input, true);
    engine.commit(&mut txn).unwrap();

    engine.render(32).unwrap();
    engine.render(32).unwrap();
    assert_eq!(
        engine.notifications().drain(),
        vec![ControlEvent::PcmInputActive]
    );
}

#[test]
fn running_engine_streams_until_stopped() {
    let mut engine = engine(64);
    let driver = Arc::new(MemoryDriver::new(48_000, 64 * 2 * 64));
    engine.start().unwrap();
    assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));
    assert!(matches!(engine.render(64), Err(EngineError::AlreadyRunning)));

    let mut txn = Transaction::new();
    let source = txn.integrate(ConstantModule::single(0.125));
    let bridge = PcmOutputModule::new(driver.clone(), 64)
        .unwrap()
        .insert(&mut txn);
    txn.connect_joint(source, 0, bridge.module, 1);
    engine.commit(&mut txn).unwrap();

    let mut played = Vec::new();
    assert!(wait_for(|| {
        played.extend(driver.take_output());
        played.len() >= 64 * 2 * 4
    }));
    assert!(played.chunks_exact(2).all(|frame| frame == [0.0, 0.125]));

    let teardown = engine.stop().unwrap();
    assert!(!engine.is_running());
    assert_eq!(teardown.modules.len(), 2);
    assert_eq!(teardown.polls.len(), 1);
    assert!(engine.topology().is_empty());
    assert!(engine.tick_stamp() >= 256);
    assert!(engine
        .notifications()
        .drain()
        .contains(&ControlEvent::EngineStopped));
}

#[test]
fn engine_without_polls_idles() {
    let mut engine = Engine::new(
        EngineConfig::default()
            .with_block_size(32)
            .with_idle_timeout(Duration::from_millis(1)),
    )
    .unwrap();
    engine.start().unwrap();
    let mut txn = Transaction::new();
    let id = txn.integrate(ConstantModule::single(1.0));
    txn.set_consumer(id, true);
    engine.commit(&mut txn).unwrap();

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(engine.tick_stamp(), 0);

    let teardown = engine.stop().unwrap();
    assert_eq!(teardown.modules.len(), 1);
    assert!(teardown.polls.is_empty());
}

#[test]
fn oversized_render_is_refused() {
    let mut engine = engine(32);
    assert!(matches!(
        engine.render(33),
        Err(EngineError::BlockTooLarge {
            n_values: 33,
            block_size: 32
        })
    ));
    assert!(matches!(engine.stop(), Err(EngineError::NotRunning)));
}

struct CountsDrops(Arc<AtomicUsize>);

impl Module for CountsDrops {
    fn class(&self) -> ModuleClass {
        ModuleClass::new(0, 0, 1)
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_>) {}
}

impl Drop for CountsDrops {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn short_lived(drops: &Arc<AtomicUsize>) -> Transaction {
    let mut txn = Transaction::new();
    let id = txn.integrate(CountsDrops(Arc::clone(drops)));
    txn.discard(id);
    txn
}

#[test]
fn spent_transactions_are_only_dropped_by_the_control_side() {
    let mut engine = Engine::new(
        EngineConfig::default()
            .with_block_size(16)
            .with_reclaim_queue_capacity(1),
    )
    .unwrap();
    let drops = Arc::new(AtomicUsize::new(0));

    engine.commit(&mut short_lived(&drops)).unwrap();
    engine.commit(&mut short_lived(&drops)).unwrap();
    let mut third = short_lived(&drops);
    assert!(matches!(engine.commit(&mut third), Err(EngineError::QueueFull)));
    assert_eq!(third.len(), 2);

    // one spent transaction fills the reclaim queue, the other waits
    engine.graph().unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    engine.commit(&mut third).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    engine.render(16).unwrap();
    engine.render(16).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 3);
    assert!(engine.topology().is_empty());
}

#[test]
#[should_panic(expected = "invalid transaction reached the engine thread")]
fn unvalidated_transaction_is_fatal_on_the_engine_side() {
    let config = EngineConfig::default().with_block_size(16);
    let transactions = EventQueue::new(4);
    let (notifier, _notifications) = notification_channel(4);
    let mut context = EngineContext::new(
        &config,
        transactions.clone(),
        EventQueue::new(4),
        notifier,
        TickClock::new(),
    );

    // bypasses the topology check that Engine::commit performs
    let mut txn = Transaction::new();
    txn.connect_stream(ModuleId::fresh(), 0, ModuleId::fresh(), 0);
    transactions.try_push(txn).unwrap();
    context.apply_pending();
}
