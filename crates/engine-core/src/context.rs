use crate::config::EngineConfig;
use engine_graph::{GraphConfig, Readiness, SignalGraph, Teardown, Transaction};
use engine_rt::{EventQueue, Notifier, TickClock};
use std::time::Duration;

/// What the realtime thread should do after applying pending transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Evaluate one block now.
    Process,
    /// Sleep for at most the given time, then ask again.
    Wait(Duration),
}

/// State owned by whoever evaluates the graph: the scheduler thread while
/// the engine runs, the engine handle otherwise.
pub struct EngineContext {
    graph: SignalGraph,
    transactions: EventQueue<Transaction>,
    reclaim: EventQueue<Transaction>,
    backlog: Vec<Transaction>,
    notifier: Notifier,
    clock: TickClock,
    idle_timeout: Duration,
}

impl EngineContext {
    pub fn new(
        config: &EngineConfig,
        transactions: EventQueue<Transaction>,
        reclaim: EventQueue<Transaction>,
        notifier: Notifier,
        clock: TickClock,
    ) -> Self {
        Self {
            graph: SignalGraph::new(GraphConfig::new(config.sample_rate, config.block_size)),
            transactions,
            reclaim,
            backlog: Vec::with_capacity(config.reclaim_queue_capacity),
            notifier,
            clock,
            idle_timeout: config.idle_timeout(),
        }
    }

    pub fn graph(&self) -> &SignalGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SignalGraph {
        &mut self.graph
    }

    pub fn block_size(&self) -> usize {
        self.graph.block_size()
    }

    pub fn tick_stamp(&self) -> u64 {
        self.clock.now()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Applies every queued transaction in commit order.
    ///
    /// # Panics
    ///
    /// Transactions are validated before they are queued; one that still
    /// fails here means the topology mirror diverged from the graph.
    pub fn apply_pending(&mut self) -> usize {
        self.flush_backlog();
        let mut applied = 0;
        while let Ok(mut txn) = self.transactions.try_pop() {
            if let Err(err) = self.graph.apply(&mut txn) {
                panic!("invalid transaction reached the engine thread: {err}");
            }
            self.reclaim(txn);
            applied += 1;
        }
        applied
    }

    pub fn next_action(&mut self) -> TickAction {
        match self.graph.poll(self.graph.block_size()) {
            None => TickAction::Wait(self.idle_timeout),
            Some(Readiness::Ready) => TickAction::Process,
            Some(Readiness::Pending { timeout }) => TickAction::Wait(timeout),
        }
    }

    /// Evaluates one full block and advances the tick stamp.
    pub fn process_block(&mut self) {
        let block_size = self.graph.block_size();
        self.process(block_size);
    }

    pub fn process(&mut self, n_values: usize) {
        self.graph
            .process(n_values, self.clock.now(), &self.notifier);
        self.clock.advance(n_values as u64);
    }

    /// Removes every module and poll source from the graph.
    pub fn teardown(&mut self) -> Teardown {
        self.graph.teardown()
    }

    // spent transactions still own discarded modules and removed polls; the
    // control side drops them. The engine caps transactions in flight at the
    // reclaim capacity plus the reserved backlog, so this never reallocates.
    fn reclaim(&mut self, txn: Transaction) {
        if let Err(txn) = self.reclaim.push_or_return(txn) {
            self.backlog.push(txn);
        }
    }

    fn flush_backlog(&mut self) {
        while let Some(txn) = self.backlog.pop() {
            if let Err(txn) = self.reclaim.push_or_return(txn) {
                self.backlog.push(txn);
                break;
            }
        }
    }

    /// Hands any backlog of spent transactions out directly.
    pub(crate) fn take_backlog(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.backlog)
    }
}
