use crate::module::{downcast_mut, Module, ModuleClass, ModuleId};
use crate::poll::{PollId, PollSource};
use std::any::TypeId;
use std::fmt;

/// Destination input of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputChannel {
    /// Single-connection input stream.
    Stream(usize),
    /// Joint stream accepting any number of connections.
    Joint(usize),
}

pub type AccessFn = Box<dyn FnMut(&mut dyn Module) + Send>;

/// One step of a transaction.
pub enum Job {
    Integrate {
        id: ModuleId,
        class: ModuleClass,
        type_id: TypeId,
        module: Option<Box<dyn Module>>,
        /// Output buffers allocated on the control side before the handoff.
        buffers: Vec<Vec<f32>>,
    },
    Discard {
        id: ModuleId,
        reclaimed: Option<Box<dyn Module>>,
        /// Output buffers released by the graph, freed on the control side.
        buffers: Vec<Vec<f32>>,
    },
    Connect {
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        channel: InputChannel,
    },
    Disconnect {
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        channel: InputChannel,
    },
    SetConsumer {
        id: ModuleId,
        consumer: bool,
    },
    AddPoll {
        id: PollId,
        source: Option<Box<dyn PollSource>>,
    },
    RemovePoll {
        id: PollId,
        reclaimed: Option<Box<dyn PollSource>>,
    },
    Access {
        id: ModuleId,
        type_id: TypeId,
        func: AccessFn,
    },
}

impl Job {
    /// True for jobs that can change the evaluation order.
    pub fn changes_topology(&self) -> bool {
        matches!(
            self,
            Job::Integrate { .. }
                | Job::Discard { .. }
                | Job::Connect { .. }
                | Job::Disconnect { .. }
                | Job::SetConsumer { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::Integrate { .. } => "integrate",
            Job::Discard { .. } => "discard",
            Job::Connect { .. } => "connect",
            Job::Disconnect { .. } => "disconnect",
            Job::SetConsumer { .. } => "set-consumer",
            Job::AddPoll { .. } => "add-poll",
            Job::RemovePoll { .. } => "remove-poll",
            Job::Access { .. } => "access",
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Integrate { id, class, .. } => f
                .debug_struct("Integrate")
                .field("id", id)
                .field("class", class)
                .finish_non_exhaustive(),
            Job::Discard { id, .. } => f.debug_struct("Discard").field("id", id).finish(),
            Job::Connect {
                src,
                ostream,
                dst,
                channel,
            }
            | Job::Disconnect {
                src,
                ostream,
                dst,
                channel,
            } => f
                .debug_struct(self.name())
                .field("src", src)
                .field("ostream", ostream)
                .field("dst", dst)
                .field("channel", channel)
                .finish(),
            Job::SetConsumer { id, consumer } => f
                .debug_struct("SetConsumer")
                .field("id", id)
                .field("consumer", consumer)
                .finish(),
            Job::AddPoll { id, .. } => f.debug_struct("AddPoll").field("id", id).finish(),
            Job::RemovePoll { id, .. } => f.debug_struct("RemovePoll").field("id", id).finish(),
            Job::Access { id, .. } => f.debug_struct("Access").field("id", id).finish(),
        }
    }
}

/// Ordered batch of jobs applied atomically between two blocks.
#[derive(Debug, Default)]
pub struct Transaction {
    jobs: Vec<Job>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integrate<M: Module>(&mut self, module: M) -> ModuleId {
        let id = ModuleId::fresh();
        self.jobs.push(Job::Integrate {
            id,
            class: module.class(),
            type_id: TypeId::of::<M>(),
            module: Some(Box::new(module)),
            buffers: Vec::new(),
        });
        id
    }

    pub fn integrate_boxed(&mut self, module: Box<dyn Module>) -> ModuleId {
        let id = ModuleId::fresh();
        self.jobs.push(Job::Integrate {
            id,
            class: module.class(),
            type_id: (*module).as_any().type_id(),
            module: Some(module),
            buffers: Vec::new(),
        });
        id
    }

    pub fn discard(&mut self, id: ModuleId) {
        self.jobs.push(Job::Discard {
            id,
            reclaimed: None,
            buffers: Vec::new(),
        });
    }

    pub fn connect(&mut self, src: ModuleId, ostream: usize, dst: ModuleId, channel: InputChannel) {
        self.jobs.push(Job::Connect {
            src,
            ostream,
            dst,
            channel,
        });
    }

    pub fn connect_stream(&mut self, src: ModuleId, ostream: usize, dst: ModuleId, istream: usize) {
        self.connect(src, ostream, dst, InputChannel::Stream(istream));
    }

    pub fn connect_joint(&mut self, src: ModuleId, ostream: usize, dst: ModuleId, jstream: usize) {
        self.connect(src, ostream, dst, InputChannel::Joint(jstream));
    }

    pub fn disconnect(
        &mut self,
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        channel: InputChannel,
    ) {
        self.jobs.push(Job::Disconnect {
            src,
            ostream,
            dst,
            channel,
        });
    }

    pub fn set_consumer(&mut self, id: ModuleId, consumer: bool) {
        self.jobs.push(Job::SetConsumer { id, consumer });
    }

    pub fn add_poll<P: PollSource>(&mut self, source: P) -> PollId {
        let id = PollId::fresh();
        self.jobs.push(Job::AddPoll {
            id,
            source: Some(Box::new(source)),
        });
        id
    }

    pub fn remove_poll(&mut self, id: PollId) {
        self.jobs.push(Job::RemovePoll {
            id,
            reclaimed: None,
        });
    }

    /// Queues a closure that runs on the realtime thread with typed access to
    /// the module, at the same block boundary as the rest of the transaction.
    pub fn access<M, F>(&mut self, id: ModuleId, mut func: F)
    where
        M: Module,
        F: FnMut(&mut M) + Send + 'static,
    {
        self.jobs.push(Job::Access {
            id,
            type_id: TypeId::of::<M>(),
            func: Box::new(move |module: &mut dyn Module| {
                if let Some(module) = downcast_mut::<M>(module) {
                    func(module);
                }
            }),
        });
    }

    pub fn push(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn append(&mut self, other: Transaction) {
        self.jobs.extend(other.jobs);
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn jobs_mut(&mut self) -> &mut [Job] {
        &mut self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn changes_topology(&self) -> bool {
        self.jobs.iter().any(Job::changes_topology)
    }

    /// Allocates block-sized output buffers for every integrated module so the
    /// realtime side never has to.
    pub fn prepare_buffers(&mut self, block_size: usize) {
        for job in &mut self.jobs {
            if let Job::Integrate { class, buffers, .. } = job {
                if buffers.len() != class.n_ostreams {
                    *buffers = (0..class.n_ostreams)
                        .map(|_| vec![0.0; block_size])
                        .collect();
                }
            }
        }
    }

    /// Modules and poll sources released by applying this transaction.
    pub fn take_reclaimed(&mut self) -> (Vec<Box<dyn Module>>, Vec<Box<dyn PollSource>>) {
        let mut modules = Vec::new();
        let mut sources = Vec::new();
        for job in &mut self.jobs {
            match job {
                Job::Discard { reclaimed, .. } => modules.extend(reclaimed.take()),
                Job::RemovePoll { reclaimed, .. } => sources.extend(reclaimed.take()),
                _ => {}
            }
        }
        (modules, sources)
    }
}
