use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Answer of a readiness predicate for the next block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not ready; the scheduler may sleep up to `timeout` before asking again.
    Pending { timeout: Duration },
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Predicate consulted by the scheduler before every block.
pub trait PollSource: Send + 'static {
    fn poll(&mut self, n_values: usize) -> Readiness;
}

impl<F> PollSource for F
where
    F: FnMut(usize) -> Readiness + Send + 'static,
{
    fn poll(&mut self, n_values: usize) -> Readiness {
        self(n_values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PollId(u64);

impl PollId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "poll#{}", self.0)
    }
}

/// Registered readiness predicates in registration order.
#[derive(Default)]
pub struct PollSet {
    sources: Vec<(PollId, Box<dyn PollSource>)>,
}

impl PollSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn contains(&self, id: PollId) -> bool {
        self.sources.iter().any(|(existing, _)| *existing == id)
    }

    pub fn insert(&mut self, id: PollId, source: Box<dyn PollSource>) -> bool {
        if self.contains(id) {
            return false;
        }
        self.sources.push((id, source));
        true
    }

    pub fn remove(&mut self, id: PollId) -> Option<Box<dyn PollSource>> {
        let position = self.sources.iter().position(|(existing, _)| *existing == id)?;
        Some(self.sources.remove(position).1)
    }

    /// Consults every source. `None` when nothing is registered, otherwise
    /// `Ready` if any source is ready or `Pending` with the smallest timeout.
    pub fn check(&mut self, n_values: usize) -> Option<Readiness> {
        let mut shortest: Option<Duration> = None;
        let mut ready = false;
        for (_, source) in &mut self.sources {
            match source.poll(n_values) {
                Readiness::Ready => ready = true,
                Readiness::Pending { timeout } => {
                    shortest = Some(shortest.map_or(timeout, |current| current.min(timeout)));
                }
            }
        }
        if ready {
            Some(Readiness::Ready)
        } else {
            shortest.map(|timeout| Readiness::Pending { timeout })
        }
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (PollId, Box<dyn PollSource>)> + '_ {
        self.sources.drain(..)
    }
}
