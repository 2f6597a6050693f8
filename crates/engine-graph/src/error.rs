use crate::job::InputChannel;
use crate::module::ModuleId;
use crate::poll::PollId;
use thiserror::Error;

/// Configuration errors detected while validating or applying a transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("{0} is already integrated")]
    AlreadyIntegrated(ModuleId),
    #[error("{0} is not integrated")]
    UnknownModule(ModuleId),
    #[error("{module} has no output stream {ostream}")]
    NoSuchOutput { module: ModuleId, ostream: usize },
    #[error("{module} has no input channel {channel:?}")]
    NoSuchInput {
        module: ModuleId,
        channel: InputChannel,
    },
    #[error("input stream {istream} of {module} is already connected")]
    InputOccupied { module: ModuleId, istream: usize },
    #[error("{src}:{ostream} is not connected to {dst} {channel:?}")]
    NotConnected {
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        channel: InputChannel,
    },
    #[error("connecting {src} to {dst} would create a cycle")]
    Cycle { src: ModuleId, dst: ModuleId },
    #[error("{module} still feeds {dependents} connection(s)")]
    LiveDependents { module: ModuleId, dependents: usize },
    #[error("poll source {0} is already registered")]
    DuplicatePoll(PollId),
    #[error("poll source {0} is not registered")]
    UnknownPoll(PollId),
    #[error("parameter access targets {0} with a mismatched module type")]
    TypeMismatch(ModuleId),
    #[error("job payload was already consumed")]
    SpentJob,
}
