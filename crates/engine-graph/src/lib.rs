//! Transactional signal graph for the Harmoniq synthesis engine.

pub mod error;
pub mod graph;
pub mod job;
pub mod module;
pub mod poll;
pub mod topology;

pub use error::GraphError;
pub use graph::{GraphConfig, SignalGraph, Teardown};
pub use job::{AccessFn, InputChannel, Job, Transaction};
pub use module::{
    downcast_mut, downcast_ref, AsAny, Module, ModuleClass, ModuleCost, ModuleId, ProcessContext,
    ResetContext, StreamInputs, StreamOutputs,
};
pub use poll::{PollId, PollSet, PollSource, Readiness};
pub use topology::Topology;
