use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::scheduler::Scheduler;
use engine_graph::{SignalGraph, Teardown, Topology, Transaction};
use engine_rt::{notification_channel, EventQueue, Notifications, TickClock};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

enum State {
    Idle(Box<EngineContext>),
    Running(Scheduler),
}

/// Control-domain handle of the synthesis engine.
///
/// Transactions are validated against a mirror of the graph topology when
/// committed, then queued for the realtime thread. While the engine is not
/// started, blocks can be rendered synchronously with [`Engine::render`].
pub struct Engine {
    config: EngineConfig,
    topology: Mutex<Topology>,
    transactions: EventQueue<Transaction>,
    reclaim: EventQueue<Transaction>,
    notifications: Notifications,
    clock: TickClock,
    // committed transactions not yet handed back through `reclaim`
    in_flight: AtomicUsize,
    state: Option<State>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let transactions = EventQueue::new(config.transaction_queue_capacity);
        let reclaim = EventQueue::new(config.reclaim_queue_capacity);
        let (notifier, notifications) = notification_channel(config.notification_capacity);
        let clock = TickClock::new();
        let context = EngineContext::new(
            &config,
            transactions.clone(),
            reclaim.clone(),
            notifier,
            clock.clone(),
        );
        Ok(Self {
            config,
            topology: Mutex::new(Topology::default()),
            transactions,
            reclaim,
            notifications,
            clock,
            in_flight: AtomicUsize::new(0),
            state: Some(State::Idle(Box::new(context))),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Events raised by modules on the realtime thread.
    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    /// Sample stamp of the next block to be evaluated.
    pub fn tick_stamp(&self) -> u64 {
        self.clock.now()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, Some(State::Running(_)))
    }

    /// Snapshot of the topology as of the last successful commit.
    pub fn topology(&self) -> Topology {
        self.topology.lock().clone()
    }

    /// Validates `txn` and queues it for the realtime thread.
    ///
    /// On success `txn` is left empty. A rejected transaction is neither
    /// queued nor altered; on [`EngineError::QueueFull`] it stays with the
    /// caller for a later retry. Commits are also refused while more spent
    /// transactions are outstanding than the reclaim queue and the engine's
    /// backlog can hold, so the realtime thread never drops one itself.
    pub fn commit(&self, txn: &mut Transaction) -> Result<(), EngineError> {
        self.collect_garbage();
        if txn.is_empty() {
            return Ok(());
        }
        txn.prepare_buffers(self.config.block_size);

        let mut topology = self.topology.lock();
        let next = topology.check(txn)?;
        let jobs = txn.len();
        let in_flight = self.in_flight.load(Ordering::Acquire);
        if in_flight >= self.in_flight_limit() {
            tracing::warn!(jobs, in_flight, "spent transactions not reclaimed, commit rejected");
            return Err(EngineError::QueueFull);
        }
        if let Err(rejected) = self.transactions.push_or_return(std::mem::take(txn)) {
            *txn = rejected;
            tracing::warn!(jobs, "transaction queue full, commit rejected");
            return Err(EngineError::QueueFull);
        }
        *topology = next;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        drop(topology);

        tracing::debug!(jobs, "transaction committed");
        if let Some(State::Running(scheduler)) = &self.state {
            scheduler.wake();
        }
        Ok(())
    }

    /// Drops spent transactions handed back by the realtime thread.
    pub fn collect_garbage(&self) -> usize {
        let mut collected = 0;
        while let Ok(mut txn) = self.reclaim.try_pop() {
            let (modules, polls) = txn.take_reclaimed();
            if !modules.is_empty() || !polls.is_empty() {
                tracing::trace!(
                    modules = modules.len(),
                    polls = polls.len(),
                    "reclaimed objects dropped"
                );
            }
            collected += 1;
        }
        if collected > 0 {
            self.in_flight.fetch_sub(collected, Ordering::AcqRel);
        }
        collected
    }

    fn in_flight_limit(&self) -> usize {
        // reclaim queue plus the context's backlog of the same size
        self.config.reclaim_queue_capacity * 2
    }

    /// Spawns the realtime thread.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let context = match self.state.take() {
            Some(State::Idle(context)) => context,
            Some(State::Running(scheduler)) => {
                self.state = Some(State::Running(scheduler));
                return Err(EngineError::AlreadyRunning);
            }
            None => return Err(EngineError::NotRunning),
        };
        // the context is handed to the thread; keep a fresh one on failure
        match Scheduler::spawn(*context, &self.config.thread_name) {
            Ok(scheduler) => {
                tracing::info!(
                    sample_rate = self.config.sample_rate,
                    block_size = self.config.block_size,
                    thread = %self.config.thread_name,
                    "engine started"
                );
                self.state = Some(State::Running(scheduler));
                Ok(())
            }
            Err(err) => {
                self.reset_idle();
                Err(err)
            }
        }
    }

    /// Stops the realtime thread at the next tick boundary.
    ///
    /// All modules are removed from the graph and returned. The engine can
    /// be started again afterwards with an empty graph.
    pub fn stop(&mut self) -> Result<Teardown, EngineError> {
        let scheduler = match self.state.take() {
            Some(State::Running(scheduler)) => scheduler,
            other => {
                self.state = other;
                return Err(EngineError::NotRunning);
            }
        };
        let result = scheduler.stop();
        self.collect_garbage();
        match result {
            Ok((mut context, teardown)) => {
                let backlog = context.take_backlog();
                self.in_flight.fetch_sub(backlog.len(), Ordering::AcqRel);
                drop(backlog);
                *self.topology.lock() = Topology::default();
                self.state = Some(State::Idle(Box::new(context)));
                tracing::info!(
                    modules = teardown.modules.len(),
                    polls = teardown.polls.len(),
                    "engine stopped"
                );
                Ok(teardown)
            }
            Err(err) => {
                tracing::error!("engine thread failed: {err}");
                self.reset_idle();
                Err(err)
            }
        }
    }

    /// Applies queued transactions and evaluates `n_values` samples on the
    /// calling thread. Only available while the engine is not started.
    pub fn render(&mut self, n_values: usize) -> Result<(), EngineError> {
        let block_size = self.config.block_size;
        if n_values == 0 || n_values > block_size {
            return Err(EngineError::BlockTooLarge {
                n_values,
                block_size,
            });
        }
        let context = self.idle_context()?;
        context.apply_pending();
        context.process(n_values);
        self.collect_garbage();
        Ok(())
    }

    /// Applies queued transactions without evaluating, then exposes the graph.
    pub fn graph(&mut self) -> Result<&mut SignalGraph, EngineError> {
        let context = self.idle_context()?;
        context.apply_pending();
        Ok(context.graph_mut())
    }

    fn idle_context(&mut self) -> Result<&mut EngineContext, EngineError> {
        match self.state.as_mut() {
            Some(State::Idle(context)) => Ok(context),
            Some(State::Running(_)) => Err(EngineError::AlreadyRunning),
            None => Err(EngineError::NotRunning),
        }
    }

    fn reset_idle(&mut self) {
        let (notifier, notifications) = notification_channel(self.config.notification_capacity);
        self.notifications = notifications;
        *self.topology.lock() = Topology::default();
        while self.transactions.try_pop().is_ok() {}
        self.collect_garbage();
        self.in_flight.store(0, Ordering::Release);
        self.state = Some(State::Idle(Box::new(EngineContext::new(
            &self.config,
            self.transactions.clone(),
            self.reclaim.clone(),
            notifier,
            self.clock.clone(),
        ))));
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                tracing::error!("engine shutdown failed: {err}");
            }
        }
    }
}
