//! Modules bridging the signal graph to a PCM driver.

use crate::{PcmDriver, PcmError, PcmWriter, PCM_CHANNELS};
use engine_graph::{
    Module, ModuleClass, ModuleCost, ModuleId, PollId, PollSource, ProcessContext, Readiness,
    ResetContext, Transaction,
};
use engine_rt::ControlEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub const JCHANNEL_LEFT: usize = 0;
pub const JCHANNEL_RIGHT: usize = 1;
pub const OCHANNEL_LEFT: usize = 0;
pub const OCHANNEL_RIGHT: usize = 1;

/// Readiness predicate registered next to an output bridge.
pub struct PcmPoll {
    driver: Arc<dyn PcmDriver>,
}

impl PcmPoll {
    pub fn new(driver: Arc<dyn PcmDriver>) -> Self {
        Self { driver }
    }
}

impl PollSource for PcmPoll {
    fn poll(&mut self, n_values: usize) -> Readiness {
        self.driver.pcm_check_io(n_values)
    }
}

/// Mixes its left and right joint inputs and writes them to the driver.
pub struct PcmOutputModule {
    driver: Arc<dyn PcmDriver>,
    mix: [Vec<f32>; PCM_CHANNELS],
    interleaved: Vec<f32>,
    writer: Option<Box<dyn PcmWriter>>,
    writer_failures: Arc<AtomicU64>,
}

/// Ids needed to take an inserted output bridge back out of the graph.
#[derive(Debug, Clone)]
pub struct PcmOutputHandle {
    pub module: ModuleId,
    pub poll: PollId,
    writer_failures: Arc<AtomicU64>,
}

impl PcmOutputHandle {
    /// Number of blocks the auxiliary writer failed to take.
    pub fn writer_failures(&self) -> u64 {
        self.writer_failures.load(Ordering::Relaxed)
    }
}

impl PcmOutputModule {
    pub const CLASS: ModuleClass = ModuleClass::new(0, PCM_CHANNELS, 0);

    pub fn new(driver: Arc<dyn PcmDriver>, block_size: usize) -> Result<Self, PcmError> {
        if !driver.writable() {
            return Err(PcmError::NotWritable(driver.name().to_owned()));
        }
        if driver.pcm_frequency() == 0 {
            return Err(PcmError::ZeroFrequency(driver.name().to_owned()));
        }
        if block_size == 0 {
            return Err(PcmError::ZeroBlockSize);
        }
        Ok(Self {
            driver,
            mix: [vec![0.0; block_size], vec![0.0; block_size]],
            interleaved: vec![0.0; block_size * PCM_CHANNELS],
            writer: None,
            writer_failures: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Mirrors every written block into `writer`.
    pub fn with_writer(mut self, writer: impl PcmWriter) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    pub fn block_size(&self) -> usize {
        self.mix[0].len()
    }

    /// Integrates the bridge as a consumer and registers its readiness poll.
    pub fn insert(self, txn: &mut Transaction) -> PcmOutputHandle {
        let driver = Arc::clone(&self.driver);
        let writer_failures = Arc::clone(&self.writer_failures);
        let module = txn.integrate(self);
        txn.set_consumer(module, true);
        let poll = txn.add_poll(PcmPoll::new(driver));
        PcmOutputHandle {
            module,
            poll,
            writer_failures,
        }
    }

    pub fn remove(handle: &PcmOutputHandle, txn: &mut Transaction) {
        txn.remove_poll(handle.poll);
        txn.discard(handle.module);
    }
}

impl Module for PcmOutputModule {
    fn class(&self) -> ModuleClass {
        Self::CLASS
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let n = ctx.n_values;
        for (channel, mix) in self.mix.iter_mut().enumerate() {
            let mix = &mut mix[..n];
            let mut sources = ctx.inputs.jstreams(channel);
            match sources.next() {
                Some(first) => {
                    mix.copy_from_slice(first);
                    for source in sources {
                        for (acc, value) in mix.iter_mut().zip(source) {
                            *acc += *value;
                        }
                    }
                }
                None => mix.copy_from_slice(ctx.inputs.zeros()),
            }
        }

        let interleaved = &mut self.interleaved[..n * PCM_CHANNELS];
        let [left, right] = &self.mix;
        for (frame, (l, r)) in interleaved
            .chunks_exact_mut(PCM_CHANNELS)
            .zip(left.iter().zip(right.iter()))
        {
            frame[0] = *l;
            frame[1] = *r;
        }
        self.driver.pcm_write(interleaved);

        if let Some(writer) = self.writer.as_mut() {
            if writer.write(ctx.tick_stamp, interleaved).is_err() {
                self.writer_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Counters the input bridge keeps for requests smaller than a block.
///
/// A partial request is served from the tail of the last full block the
/// driver delivered; misaligned or growing requests therefore repeat or skip
/// captured audio.
#[derive(Debug, Default)]
pub struct PcmInputStats {
    partial_requests: AtomicU64,
    misaligned_requests: AtomicU64,
    growing_requests: AtomicU64,
}

impl PcmInputStats {
    pub fn partial_requests(&self) -> u64 {
        self.partial_requests.load(Ordering::Relaxed)
    }

    /// Requests whose length does not divide the block size.
    pub fn misaligned_requests(&self) -> u64 {
        self.misaligned_requests.load(Ordering::Relaxed)
    }

    /// Requests longer than the previous one since the last reset.
    pub fn growing_requests(&self) -> u64 {
        self.growing_requests.load(Ordering::Relaxed)
    }
}

/// Reads one block per evaluation from the driver onto two output streams.
pub struct PcmInputModule {
    driver: Arc<dyn PcmDriver>,
    block_size: usize,
    buffer: Vec<f32>,
    last_request: usize,
    announced: Arc<AtomicBool>,
    stats: Arc<PcmInputStats>,
}

impl PcmInputModule {
    pub const CLASS: ModuleClass =
        ModuleClass::new(0, 0, PCM_CHANNELS).with_cost(ModuleCost::Expensive);

    pub fn new(driver: Arc<dyn PcmDriver>, block_size: usize) -> Result<Self, PcmError> {
        if driver.pcm_frequency() == 0 {
            return Err(PcmError::ZeroFrequency(driver.name().to_owned()));
        }
        if block_size == 0 {
            return Err(PcmError::ZeroBlockSize);
        }
        Ok(Self {
            driver,
            block_size,
            buffer: vec![0.0; block_size * PCM_CHANNELS],
            last_request: 0,
            announced: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PcmInputStats::default()),
        })
    }

    /// Integrates the bridge. It only runs once something consumes its
    /// outputs.
    pub fn insert(self, txn: &mut Transaction) -> ModuleId {
        txn.integrate(self)
    }

    pub fn remove(module: ModuleId, txn: &mut Transaction) {
        txn.discard(module);
    }

    pub fn stats(&self) -> Arc<PcmInputStats> {
        Arc::clone(&self.stats)
    }

    /// True once the activation notice went out.
    pub fn announced(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.announced)
    }

    fn track_request(&mut self, n_values: usize) {
        if n_values == self.block_size {
            self.last_request = n_values;
            return;
        }
        self.stats.partial_requests.fetch_add(1, Ordering::Relaxed);
        if self.block_size % n_values != 0 {
            self.stats.misaligned_requests.fetch_add(1, Ordering::Relaxed);
        }
        if self.last_request != 0 && n_values > self.last_request {
            self.stats.growing_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.last_request = n_values;
    }
}

impl Module for PcmInputModule {
    fn class(&self) -> ModuleClass {
        Self::CLASS
    }

    fn reset(&mut self, ctx: &ResetContext<'_>) {
        self.last_request = 0;
        if !self.announced.swap(true, Ordering::AcqRel) {
            ctx.notifier.notify(ControlEvent::PcmInputActive);
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let n = ctx.n_values;
        assert!(
            n > 0 && n <= self.block_size,
            "pcm input asked for {n} values, block size is {}",
            self.block_size
        );
        self.track_request(n);

        if self.driver.readable() {
            let read = self.driver.pcm_read(&mut self.buffer);
            assert_eq!(
                read,
                self.buffer.len(),
                "pcm driver `{}` returned a short read",
                self.driver.name()
            );
        } else {
            self.buffer.fill(0.0);
        }

        let tail = &self.buffer[self.buffer.len() - n * PCM_CHANNELS..];
        let (left, right) = ctx.outputs.pair(OCHANNEL_LEFT, OCHANNEL_RIGHT);
        for (frame, (l, r)) in tail
            .chunks_exact(PCM_CHANNELS)
            .zip(left.iter_mut().zip(right.iter_mut()))
        {
            *l = frame[0];
            *r = frame[1];
        }
    }
}
