use crate::job::InputChannel;
use engine_rt::Notifier;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identity of a module, assigned once when it is handed to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Scheduling hint used to order otherwise independent modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleCost {
    #[default]
    Cheap,
    Expensive,
}

/// Static shape of a module: channel counts and cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleClass {
    pub n_istreams: usize,
    pub n_jstreams: usize,
    pub n_ostreams: usize,
    pub cost: ModuleCost,
}

impl ModuleClass {
    pub const fn new(n_istreams: usize, n_jstreams: usize, n_ostreams: usize) -> Self {
        Self {
            n_istreams,
            n_jstreams,
            n_ostreams,
            cost: ModuleCost::Cheap,
        }
    }

    pub const fn with_cost(mut self, cost: ModuleCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn accepts(&self, channel: InputChannel) -> bool {
        match channel {
            InputChannel::Stream(index) => index < self.n_istreams,
            InputChannel::Joint(index) => index < self.n_jstreams,
        }
    }
}

/// Type erasure helper so parameter closures can reach the concrete module.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A unit of block-based signal processing owned by the graph once integrated.
pub trait Module: AsAny + Send + 'static {
    fn class(&self) -> ModuleClass;

    /// Computes `ctx.n_values` samples for every output stream.
    fn process(&mut self, ctx: &mut ProcessContext<'_>);

    /// Called before the first evaluation after integration or a graph reset.
    fn reset(&mut self, _ctx: &ResetContext<'_>) {}
}

pub fn downcast_mut<M: Module>(module: &mut dyn Module) -> Option<&mut M> {
    module.as_any_mut().downcast_mut::<M>()
}

pub fn downcast_ref<M: Module>(module: &dyn Module) -> Option<&M> {
    module.as_any().downcast_ref::<M>()
}

/// Graph-internal address of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub slot: usize,
    pub ostream: usize,
}

/// Read access to the buffers feeding a module during one block.
pub struct StreamInputs<'a> {
    pub(crate) istreams: &'a [Option<Endpoint>],
    pub(crate) jstreams: &'a [Vec<Endpoint>],
    pub(crate) buffers: &'a [Vec<Vec<f32>>],
    pub(crate) zeros: &'a [f32],
    pub(crate) n_values: usize,
}

impl<'a> StreamInputs<'a> {
    pub fn is_connected(&self, istream: usize) -> bool {
        matches!(self.istreams.get(istream), Some(Some(_)))
    }

    /// Returns the connected buffer, or the shared zero block when unconnected.
    pub fn istream(&self, istream: usize) -> &'a [f32] {
        self.connected(istream).unwrap_or(&self.zeros[..self.n_values])
    }

    pub fn connected(&self, istream: usize) -> Option<&'a [f32]> {
        let endpoint = (*self.istreams.get(istream)?)?;
        Some(self.resolve(endpoint))
    }

    pub fn jstream_len(&self, jstream: usize) -> usize {
        self.jstreams.get(jstream).map_or(0, Vec::len)
    }

    pub fn jstream(&self, jstream: usize, connection: usize) -> &'a [f32] {
        self.resolve(self.jstreams[jstream][connection])
    }

    pub fn jstreams(&self, jstream: usize) -> impl Iterator<Item = &'a [f32]> + '_ {
        self.jstreams
            .get(jstream)
            .into_iter()
            .flatten()
            .map(move |endpoint| self.resolve(*endpoint))
    }

    pub fn zeros(&self) -> &'a [f32] {
        &self.zeros[..self.n_values]
    }

    fn resolve(&self, endpoint: Endpoint) -> &'a [f32] {
        &self.buffers[endpoint.slot][endpoint.ostream][..self.n_values]
    }
}

/// Write access to a module's own output buffers during one block.
pub struct StreamOutputs<'a> {
    pub(crate) buffers: &'a mut [Vec<f32>],
    pub(crate) users: &'a [usize],
    pub(crate) n_values: usize,
}

impl<'a> StreamOutputs<'a> {
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// True when another module reads this output stream.
    pub fn is_connected(&self, ostream: usize) -> bool {
        self.users.get(ostream).is_some_and(|users| *users > 0)
    }

    pub fn ostream(&mut self, ostream: usize) -> &mut [f32] {
        &mut self.buffers[ostream][..self.n_values]
    }

    /// Borrows two distinct output streams at once.
    pub fn pair(&mut self, first: usize, second: usize) -> (&mut [f32], &mut [f32]) {
        assert_ne!(first, second, "output streams must differ");
        let n = self.n_values;
        if first < second {
            let (head, tail) = self.buffers.split_at_mut(second);
            (&mut head[first][..n], &mut tail[0][..n])
        } else {
            let (head, tail) = self.buffers.split_at_mut(first);
            (&mut tail[0][..n], &mut head[second][..n])
        }
    }
}

/// Everything a module sees while computing one block.
pub struct ProcessContext<'a> {
    pub n_values: usize,
    pub tick_stamp: u64,
    pub sample_rate: f32,
    pub inputs: StreamInputs<'a>,
    pub outputs: StreamOutputs<'a>,
    pub notifier: &'a Notifier,
}

pub struct ResetContext<'a> {
    pub sample_rate: f32,
    pub block_size: usize,
    pub tick_stamp: u64,
    pub notifier: &'a Notifier,
}
