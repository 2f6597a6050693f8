use engine_graph::GraphError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The transaction was validated but the queue had no room; the caller
    /// still holds it and may retry.
    #[error("transaction queue is full")]
    QueueFull,
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    #[error("block of {n_values} values exceeds the block size {block_size}")]
    BlockTooLarge { n_values: usize, block_size: usize },
    #[error("failed to spawn engine thread")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread panicked: {0}")]
    ThreadPanicked(String),
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}
