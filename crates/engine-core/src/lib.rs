//! Engine orchestration: configuration, the realtime scheduler and the
//! control handle that commits transactions to it.

mod config;
mod context;
mod engine;
mod error;
mod scheduler;

pub use config::EngineConfig;
pub use context::{EngineContext, TickAction};
pub use engine::Engine;
pub use error::EngineError;
pub use scheduler::Scheduler;
