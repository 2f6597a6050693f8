use crate::error::EngineError;
use anyhow::Context;
use io_backends::StreamConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Samples per block; fixed while the engine runs.
    pub block_size: usize,
    pub transaction_queue_capacity: usize,
    pub reclaim_queue_capacity: usize,
    pub notification_capacity: usize,
    /// How long the scheduler sleeps when no poll source is registered.
    pub idle_timeout_ms: u64,
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 256,
            transaction_queue_capacity: 1024,
            reclaim_queue_capacity: 1024,
            notification_capacity: 64,
            idle_timeout_ms: 10,
            thread_name: "harmoniq-engine".into(),
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Takes sample rate and block size from a driver stream configuration.
    pub fn with_stream(mut self, stream: &StreamConfig) -> Self {
        self.sample_rate = stream.sample_rate;
        self.block_size = stream.block_size;
        self
    }

    pub fn with_transaction_queue_capacity(mut self, capacity: usize) -> Self {
        self.transaction_queue_capacity = capacity;
        self
    }

    pub fn with_reclaim_queue_capacity(mut self, capacity: usize) -> Self {
        self.reclaim_queue_capacity = capacity;
        self
    }

    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.max(1))
    }

    /// Stream configuration for drivers matching this engine.
    pub fn stream(&self) -> StreamConfig {
        StreamConfig {
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            ..StreamConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| Err(EngineError::InvalidConfig(reason.to_owned()));
        if self.sample_rate == 0 {
            return invalid("sample_rate must be non-zero");
        }
        if self.block_size == 0 {
            return invalid("block_size must be non-zero");
        }
        if self.transaction_queue_capacity == 0 || self.reclaim_queue_capacity == 0 {
            return invalid("queue capacities must be non-zero");
        }
        if self.notification_capacity == 0 {
            return invalid("notification_capacity must be non-zero");
        }
        if self.thread_name.is_empty() || self.thread_name.contains('\0') {
            return invalid("thread_name must be a non-empty string without NUL");
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("invalid engine config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "block_size": 64 }"#).unwrap();
        assert_eq!(config.block_size, 64);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.thread_name, "harmoniq-engine");
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let err = EngineConfig::default().with_block_size(0).validate();
        assert!(matches!(err, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn stream_round_trips_rate_and_block() {
        let config = EngineConfig::default()
            .with_sample_rate(44_100)
            .with_block_size(128);
        let stream = config.stream();
        assert_eq!(stream.sample_rate, 44_100);
        assert_eq!(stream.block_size, 128);
        assert_eq!(EngineConfig::default().with_stream(&stream), config);
    }
}
