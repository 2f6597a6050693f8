use crate::error::GraphError;
use crate::job::{InputChannel, Job, Transaction};
use crate::module::{
    downcast_mut, Endpoint, Module, ModuleClass, ModuleCost, ModuleId, ProcessContext,
    ResetContext, StreamInputs, StreamOutputs,
};
use crate::poll::{PollId, PollSet, PollSource, Readiness};
use engine_rt::Notifier;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphConfig {
    pub sample_rate: u32,
    pub block_size: usize,
}

impl GraphConfig {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 256,
        }
    }
}

struct Node {
    id: ModuleId,
    class: ModuleClass,
    seq: u64,
    istreams: Vec<Option<Endpoint>>,
    jstreams: Vec<Vec<Endpoint>>,
    consumer: bool,
    /// Connections fed by each output stream.
    users: Vec<usize>,
    needs_reset: bool,
}

impl Node {
    fn dependents(&self) -> usize {
        self.users.iter().sum()
    }

    fn sources(&self) -> impl Iterator<Item = &Endpoint> + '_ {
        self.istreams
            .iter()
            .flatten()
            .chain(self.jstreams.iter().flatten())
    }
}

/// Scratch storage reused by every order rebuild.
#[derive(Default)]
struct Scratch {
    live: Vec<bool>,
    indegree: Vec<usize>,
    downstream: Vec<Vec<usize>>,
    stack: Vec<usize>,
    ready: BinaryHeap<Reverse<(u8, u64, usize)>>,
}

/// What is left of a graph after [`SignalGraph::teardown`].
#[derive(Default)]
pub struct Teardown {
    pub modules: Vec<(ModuleId, Box<dyn Module>)>,
    pub polls: Vec<(PollId, Box<dyn PollSource>)>,
}

/// Realtime-side signal graph: owns modules, their output buffers and the
/// registered readiness predicates.
pub struct SignalGraph {
    config: GraphConfig,
    nodes: Vec<Option<Node>>,
    modules: Vec<Option<Box<dyn Module>>>,
    outputs: Vec<Vec<Vec<f32>>>,
    slots: HashMap<ModuleId, usize>,
    free: Vec<usize>,
    polls: PollSet,
    zeros: Vec<f32>,
    order: Vec<usize>,
    order_dirty: bool,
    next_seq: u64,
    scratch: Scratch,
}

impl SignalGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self::with_capacity(config, 64)
    }

    pub fn with_capacity(config: GraphConfig, modules: usize) -> Self {
        Self {
            config,
            nodes: Vec::with_capacity(modules),
            modules: Vec::with_capacity(modules),
            outputs: Vec::with_capacity(modules),
            slots: HashMap::with_capacity(modules),
            free: Vec::with_capacity(modules),
            polls: PollSet::new(),
            zeros: vec![0.0; config.block_size],
            order: Vec::with_capacity(modules),
            order_dirty: false,
            next_seq: 0,
            scratch: Scratch::default(),
        }
    }

    pub fn config(&self) -> GraphConfig {
        self.config
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.len()
    }

    /// Applies every job of `txn` in order. Spent payloads (discarded modules,
    /// removed poll sources) are left inside the jobs for the caller to reclaim.
    pub fn apply(&mut self, txn: &mut Transaction) -> Result<(), GraphError> {
        for job in txn.jobs_mut() {
            self.apply_job(job)?;
        }
        Ok(())
    }

    pub fn apply_job(&mut self, job: &mut Job) -> Result<(), GraphError> {
        if job.changes_topology() {
            self.order_dirty = true;
        }
        match job {
            Job::Integrate {
                id,
                class,
                module,
                buffers,
                ..
            } => {
                if self.slots.contains_key(&*id) {
                    return Err(GraphError::AlreadyIntegrated(*id));
                }
                let module = module.take().ok_or(GraphError::SpentJob)?;
                let mut buffers = std::mem::take(buffers);
                let block_size = self.config.block_size;
                if buffers.len() != class.n_ostreams
                    || buffers.iter().any(|buffer| buffer.len() < block_size)
                {
                    buffers = (0..class.n_ostreams)
                        .map(|_| vec![0.0; block_size])
                        .collect();
                }
                self.integrate_module(*id, *class, module, buffers);
            }
            Job::Discard {
                id,
                reclaimed,
                buffers,
            } => {
                let (module, released) = self.discard(*id)?;
                *reclaimed = Some(module);
                *buffers = released;
            }
            Job::Connect {
                src,
                ostream,
                dst,
                channel,
            } => self.connect(*src, *ostream, *dst, *channel)?,
            Job::Disconnect {
                src,
                ostream,
                dst,
                channel,
            } => self.disconnect(*src, *ostream, *dst, *channel)?,
            Job::SetConsumer { id, consumer } => self.set_consumer(*id, *consumer)?,
            Job::AddPoll { id, source } => {
                let source = source.take().ok_or(GraphError::SpentJob)?;
                if !self.polls.insert(*id, source) {
                    return Err(GraphError::DuplicatePoll(*id));
                }
            }
            Job::RemovePoll { id, reclaimed } => {
                *reclaimed = Some(self.polls.remove(*id).ok_or(GraphError::UnknownPoll(*id))?);
            }
            Job::Access { id, func, .. } => {
                let slot = self.slot(*id)?;
                if let Some(module) = self.modules[slot].as_deref_mut() {
                    func(module);
                }
            }
        }
        Ok(())
    }

    /// Integrates a module directly, outside of a transaction.
    pub fn integrate<M: Module>(&mut self, module: M) -> Result<ModuleId, GraphError> {
        let mut txn = Transaction::new();
        let id = txn.integrate(module);
        self.apply(&mut txn)?;
        Ok(id)
    }

    fn integrate_module(
        &mut self,
        id: ModuleId,
        class: ModuleClass,
        module: Box<dyn Module>,
        buffers: Vec<Vec<f32>>,
    ) {
        let node = Node {
            id,
            class,
            seq: self.next_seq,
            istreams: vec![None; class.n_istreams],
            jstreams: vec![Vec::new(); class.n_jstreams],
            consumer: false,
            users: vec![0; class.n_ostreams],
            needs_reset: true,
        };
        self.next_seq += 1;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                self.modules[slot] = Some(module);
                self.outputs[slot] = buffers;
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.modules.push(Some(module));
                self.outputs.push(buffers);
                self.nodes.len() - 1
            }
        };
        self.slots.insert(id, slot);
        self.order_dirty = true;
    }

    /// Removes a module that no longer feeds anything, severing its own inputs.
    pub fn discard(
        &mut self,
        id: ModuleId,
    ) -> Result<(Box<dyn Module>, Vec<Vec<f32>>), GraphError> {
        let slot = self.slot(id)?;
        let dependents = self.node(slot).dependents();
        if dependents > 0 {
            return Err(GraphError::LiveDependents {
                module: id,
                dependents,
            });
        }
        let node = self.nodes[slot].take().ok_or(GraphError::UnknownModule(id))?;
        for endpoint in node.sources() {
            if let Some(source) = self.nodes[endpoint.slot].as_mut() {
                source.users[endpoint.ostream] -= 1;
            }
        }
        let module = self.modules[slot]
            .take()
            .ok_or(GraphError::UnknownModule(id))?;
        let buffers = std::mem::take(&mut self.outputs[slot]);
        self.slots.remove(&id);
        self.free.push(slot);
        self.order_dirty = true;
        Ok((module, buffers))
    }

    pub fn connect(
        &mut self,
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        channel: InputChannel,
    ) -> Result<(), GraphError> {
        let (src_slot, dst_slot) = self.endpoints(src, ostream, dst, channel)?;
        if self.reaches(src_slot, dst_slot) {
            return Err(GraphError::Cycle { src, dst });
        }
        let endpoint = Endpoint {
            slot: src_slot,
            ostream,
        };
        let node = self.node_mut(dst_slot);
        match channel {
            InputChannel::Stream(index) => {
                if node.istreams[index].is_some() {
                    return Err(GraphError::InputOccupied {
                        module: dst,
                        istream: index,
                    });
                }
                node.istreams[index] = Some(endpoint);
            }
            InputChannel::Joint(index) => node.jstreams[index].push(endpoint),
        }
        self.node_mut(src_slot).users[ostream] += 1;
        self.order_dirty = true;
        Ok(())
    }

    pub fn disconnect(
        &mut self,
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        channel: InputChannel,
    ) -> Result<(), GraphError> {
        let (src_slot, dst_slot) = self.endpoints(src, ostream, dst, channel)?;
        let endpoint = Endpoint {
            slot: src_slot,
            ostream,
        };
        let not_connected = GraphError::NotConnected {
            src,
            ostream,
            dst,
            channel,
        };
        let node = self.node_mut(dst_slot);
        match channel {
            InputChannel::Stream(index) => {
                if node.istreams[index] != Some(endpoint) {
                    return Err(not_connected);
                }
                node.istreams[index] = None;
            }
            InputChannel::Joint(index) => {
                let connections = &mut node.jstreams[index];
                let position = connections
                    .iter()
                    .position(|existing| *existing == endpoint)
                    .ok_or(not_connected)?;
                connections.remove(position);
            }
        }
        self.node_mut(src_slot).users[ostream] -= 1;
        self.order_dirty = true;
        Ok(())
    }

    pub fn set_consumer(&mut self, id: ModuleId, consumer: bool) -> Result<(), GraphError> {
        let slot = self.slot(id)?;
        self.node_mut(slot).consumer = consumer;
        self.order_dirty = true;
        Ok(())
    }

    /// Typed access to an integrated module from the thread that owns the graph.
    pub fn module_mut<M: Module>(&mut self, id: ModuleId) -> Option<&mut M> {
        let slot = *self.slots.get(&id)?;
        downcast_mut::<M>(self.modules[slot].as_deref_mut()?)
    }

    /// Output buffer of `id` as computed by the last block.
    pub fn ostream(&self, id: ModuleId, ostream: usize) -> Option<&[f32]> {
        let slot = *self.slots.get(&id)?;
        self.outputs[slot].get(ostream).map(Vec::as_slice)
    }

    /// Consults the registered poll sources.
    pub fn poll(&mut self, n_values: usize) -> Option<Readiness> {
        self.polls.check(n_values)
    }

    /// Marks every module for a reset before its next evaluation.
    pub fn reset_all(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.needs_reset = true;
        }
    }

    /// Modules scheduled for the next block, in evaluation order.
    pub fn schedule(&mut self) -> Vec<ModuleId> {
        if self.order_dirty {
            self.rebuild_order();
        }
        self.order
            .iter()
            .filter_map(|slot| self.nodes[*slot].as_ref().map(|node| node.id))
            .collect()
    }

    /// Evaluates one block of `n_values` samples in dependency order.
    pub fn process(&mut self, n_values: usize, tick_stamp: u64, notifier: &Notifier) {
        assert!(
            n_values > 0 && n_values <= self.config.block_size,
            "block of {n_values} values exceeds the configured block size"
        );
        if self.order_dirty {
            self.rebuild_order();
        }
        let sample_rate = self.config.sample_rate as f32;
        for position in 0..self.order.len() {
            let slot = self.order[position];
            let (Some(node), Some(module)) =
                (self.nodes[slot].as_mut(), self.modules[slot].as_deref_mut())
            else {
                continue;
            };
            if node.needs_reset {
                node.needs_reset = false;
                module.reset(&ResetContext {
                    sample_rate,
                    block_size: self.config.block_size,
                    tick_stamp,
                    notifier,
                });
            }
            let mut own = std::mem::take(&mut self.outputs[slot]);
            let mut ctx = ProcessContext {
                n_values,
                tick_stamp,
                sample_rate,
                inputs: StreamInputs {
                    istreams: &node.istreams,
                    jstreams: &node.jstreams,
                    buffers: &self.outputs,
                    zeros: &self.zeros,
                    n_values,
                },
                outputs: StreamOutputs {
                    buffers: &mut own,
                    users: &node.users,
                    n_values,
                },
                notifier,
            };
            module.process(&mut ctx);
            self.outputs[slot] = own;
        }
    }

    /// Removes every module and poll source, returning them to the caller.
    pub fn teardown(&mut self) -> Teardown {
        let mut teardown = Teardown::default();
        for slot in 0..self.nodes.len() {
            if let (Some(node), Some(module)) = (self.nodes[slot].take(), self.modules[slot].take())
            {
                teardown.modules.push((node.id, module));
            }
        }
        teardown.polls.extend(self.polls.drain());
        self.nodes.clear();
        self.modules.clear();
        self.outputs.clear();
        self.slots.clear();
        self.free.clear();
        self.order.clear();
        self.order_dirty = false;
        teardown
    }

    fn slot(&self, id: ModuleId) -> Result<usize, GraphError> {
        self.slots
            .get(&id)
            .copied()
            .ok_or(GraphError::UnknownModule(id))
    }

    fn node(&self, slot: usize) -> &Node {
        self.nodes[slot]
            .as_ref()
            .unwrap_or_else(|| panic!("graph slot {slot} is vacant"))
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node {
        self.nodes[slot]
            .as_mut()
            .unwrap_or_else(|| panic!("graph slot {slot} is vacant"))
    }

    fn endpoints(
        &self,
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        channel: InputChannel,
    ) -> Result<(usize, usize), GraphError> {
        let src_slot = self.slot(src)?;
        let dst_slot = self.slot(dst)?;
        if ostream >= self.node(src_slot).class.n_ostreams {
            return Err(GraphError::NoSuchOutput {
                module: src,
                ostream,
            });
        }
        if !self.node(dst_slot).class.accepts(channel) {
            return Err(GraphError::NoSuchInput {
                module: dst,
                channel,
            });
        }
        Ok((src_slot, dst_slot))
    }

    /// True when `target` is `from` or feeds it, directly or transitively.
    fn reaches(&mut self, from: usize, target: usize) -> bool {
        let scratch = &mut self.scratch;
        scratch.live.clear();
        scratch.live.resize(self.nodes.len(), false);
        scratch.stack.clear();
        scratch.stack.push(from);
        while let Some(slot) = scratch.stack.pop() {
            if slot == target {
                return true;
            }
            if std::mem::replace(&mut scratch.live[slot], true) {
                continue;
            }
            if let Some(node) = self.nodes[slot].as_ref() {
                scratch
                    .stack
                    .extend(node.sources().map(|endpoint| endpoint.slot));
            }
        }
        false
    }

    /// Kahn's algorithm restricted to consumers and their transitive sources.
    /// Ready modules are taken expensive-first, then in integration order.
    fn rebuild_order(&mut self) {
        let count = self.nodes.len();
        let scratch = &mut self.scratch;
        scratch.live.clear();
        scratch.live.resize(count, false);
        scratch.indegree.clear();
        scratch.indegree.resize(count, 0);
        scratch.downstream.resize_with(count, Vec::new);
        for list in &mut scratch.downstream {
            list.clear();
        }
        scratch.stack.clear();
        scratch.ready.clear();

        for (slot, node) in self.nodes.iter().enumerate() {
            if node.as_ref().is_some_and(|node| node.consumer) {
                scratch.stack.push(slot);
            }
        }
        while let Some(slot) = scratch.stack.pop() {
            if std::mem::replace(&mut scratch.live[slot], true) {
                continue;
            }
            if let Some(node) = self.nodes[slot].as_ref() {
                for endpoint in node.sources() {
                    scratch.indegree[slot] += 1;
                    scratch.downstream[endpoint.slot].push(slot);
                    scratch.stack.push(endpoint.slot);
                }
            }
        }

        let key = |node: &Node, slot: usize| {
            let rank = match node.class.cost {
                ModuleCost::Expensive => 0,
                ModuleCost::Cheap => 1,
            };
            Reverse((rank, node.seq, slot))
        };
        for (slot, node) in self.nodes.iter().enumerate() {
            if let Some(node) = node {
                if scratch.live[slot] && scratch.indegree[slot] == 0 {
                    scratch.ready.push(key(node, slot));
                }
            }
        }

        self.order.clear();
        while let Some(Reverse((_, _, slot))) = scratch.ready.pop() {
            self.order.push(slot);
            for index in 0..scratch.downstream[slot].len() {
                let next = scratch.downstream[slot][index];
                scratch.indegree[next] -= 1;
                if scratch.indegree[next] == 0 {
                    if let Some(node) = self.nodes[next].as_ref() {
                        scratch.ready.push(key(node, next));
                    }
                }
            }
        }
        self.order_dirty = false;
    }
}
