use crate::error::GraphError;
use crate::job::{InputChannel, Job, Transaction};
use crate::module::{ModuleClass, ModuleId};
use crate::poll::PollId;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};

type Source = (ModuleId, usize);

#[derive(Debug, Clone)]
struct Entry {
    class: ModuleClass,
    type_id: TypeId,
    istreams: Vec<Option<Source>>,
    jstreams: Vec<Vec<Source>>,
    consumer: bool,
    dependents: usize,
}

/// Control-side mirror of the realtime graph.
///
/// Every transaction is replayed against a copy of the mirror before it is
/// handed to the realtime thread, so configuration errors surface to the
/// caller and the realtime side only ever sees valid jobs.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    modules: HashMap<ModuleId, Entry>,
    polls: HashSet<PollId>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `txn` and returns the topology it would produce.
    pub fn check(&self, txn: &Transaction) -> Result<Topology, GraphError> {
        let mut next = self.clone();
        for job in txn.jobs() {
            next.apply(job)?;
        }
        Ok(next)
    }

    /// Validates `txn` and adopts the result, leaving `self` untouched on error.
    pub fn commit(&mut self, txn: &Transaction) -> Result<(), GraphError> {
        *self = self.check(txn)?;
        Ok(())
    }

    pub fn apply(&mut self, job: &Job) -> Result<(), GraphError> {
        match job {
            Job::Integrate {
                id, class, type_id, ..
            } => {
                if self.modules.contains_key(id) {
                    return Err(GraphError::AlreadyIntegrated(*id));
                }
                self.modules.insert(
                    *id,
                    Entry {
                        class: *class,
                        type_id: *type_id,
                        istreams: vec![None; class.n_istreams],
                        jstreams: vec![Vec::new(); class.n_jstreams],
                        consumer: false,
                        dependents: 0,
                    },
                );
            }
            Job::Discard { id, .. } => {
                let entry = self.entry(*id)?;
                if entry.dependents > 0 {
                    return Err(GraphError::LiveDependents {
                        module: *id,
                        dependents: entry.dependents,
                    });
                }
                let entry = self
                    .modules
                    .remove(id)
                    .ok_or(GraphError::UnknownModule(*id))?;
                let sources = entry
                    .istreams
                    .iter()
                    .flatten()
                    .chain(entry.jstreams.iter().flatten());
                for (src, _) in sources {
                    if let Some(source) = self.modules.get_mut(src) {
                        source.dependents -= 1;
                    }
                }
            }
            Job::Connect {
                src,
                ostream,
                dst,
                channel,
            } => {
                self.check_endpoints(*src, *ostream, *dst, *channel)?;
                if self.reaches(*src, *dst) {
                    return Err(GraphError::Cycle {
                        src: *src,
                        dst: *dst,
                    });
                }
                let entry = self.entry_mut(*dst)?;
                match *channel {
                    InputChannel::Stream(index) => {
                        if entry.istreams[index].is_some() {
                            return Err(GraphError::InputOccupied {
                                module: *dst,
                                istream: index,
                            });
                        }
                        entry.istreams[index] = Some((*src, *ostream));
                    }
                    InputChannel::Joint(index) => entry.jstreams[index].push((*src, *ostream)),
                }
                self.entry_mut(*src)?.dependents += 1;
            }
            Job::Disconnect {
                src,
                ostream,
                dst,
                channel,
            } => {
                self.check_endpoints(*src, *ostream, *dst, *channel)?;
                let not_connected = GraphError::NotConnected {
                    src: *src,
                    ostream: *ostream,
                    dst: *dst,
                    channel: *channel,
                };
                let entry = self.entry_mut(*dst)?;
                match *channel {
                    InputChannel::Stream(index) => {
                        if entry.istreams[index] != Some((*src, *ostream)) {
                            return Err(not_connected);
                        }
                        entry.istreams[index] = None;
                    }
                    InputChannel::Joint(index) => {
                        let connections = &mut entry.jstreams[index];
                        let position = connections
                            .iter()
                            .position(|source| *source == (*src, *ostream))
                            .ok_or(not_connected)?;
                        connections.remove(position);
                    }
                }
                self.entry_mut(*src)?.dependents -= 1;
            }
            Job::SetConsumer { id, consumer } => self.entry_mut(*id)?.consumer = *consumer,
            Job::AddPoll { id, .. } => {
                if !self.polls.insert(*id) {
                    return Err(GraphError::DuplicatePoll(*id));
                }
            }
            Job::RemovePoll { id, .. } => {
                if !self.polls.remove(id) {
                    return Err(GraphError::UnknownPoll(*id));
                }
            }
            Job::Access { id, type_id, .. } => {
                if self.entry(*id)?.type_id != *type_id {
                    return Err(GraphError::TypeMismatch(*id));
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.modules.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.len()
    }

    pub fn is_consumer(&self, id: ModuleId) -> bool {
        self.modules.get(&id).is_some_and(|entry| entry.consumer)
    }

    /// Number of connections fed by `id`.
    pub fn dependents(&self, id: ModuleId) -> usize {
        self.modules.get(&id).map_or(0, |entry| entry.dependents)
    }

    pub fn connection_count(&self) -> usize {
        self.modules
            .values()
            .map(|entry| {
                entry.istreams.iter().flatten().count()
                    + entry.jstreams.iter().map(Vec::len).sum::<usize>()
            })
            .sum()
    }

    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.keys().copied()
    }

    fn entry(&self, id: ModuleId) -> Result<&Entry, GraphError> {
        self.modules.get(&id).ok_or(GraphError::UnknownModule(id))
    }

    fn entry_mut(&mut self, id: ModuleId) -> Result<&mut Entry, GraphError> {
        self.modules.get_mut(&id).ok_or(GraphError::UnknownModule(id))
    }

    fn check_endpoints(
        &self,
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        channel: InputChannel,
    ) -> Result<(), GraphError> {
        if ostream >= self.entry(src)?.class.n_ostreams {
            return Err(GraphError::NoSuchOutput {
                module: src,
                ostream,
            });
        }
        if !self.entry(dst)?.class.accepts(channel) {
            return Err(GraphError::NoSuchInput {
                module: dst,
                channel,
            });
        }
        Ok(())
    }

    /// True when `target` is `from` or one of its upstream sources.
    fn reaches(&self, from: ModuleId, target: ModuleId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(entry) = self.modules.get(&id) {
                let sources = entry
                    .istreams
                    .iter()
                    .flatten()
                    .chain(entry.jstreams.iter().flatten());
                stack.extend(sources.map(|(src, _)| *src));
            }
        }
        false
    }
}
