//! PCM drivers and the bridge modules that connect them to the signal graph.

pub mod driver;
pub mod pcm_module;
pub mod writer;

#[cfg(feature = "cpal")]
pub mod cpal_driver;

#[cfg(not(feature = "cpal"))]
pub mod cpal_driver {
    use super::*;
    use engine_graph::Readiness;

    /// Placeholder so callers compile without the `cpal` feature.
    pub struct CpalDriver {
        _private: (),
    }

    /// Keeps device streams alive; never constructed in this build.
    pub struct CpalStreams {
        _private: (),
    }

    impl CpalStreams {
        pub fn play(&self) -> Result<()> {
            Err(BackendError::Backend(
                "cpal backend not available in this build".into(),
            ))
        }

        pub fn pause(&self) -> Result<()> {
            Ok(())
        }
    }

    impl CpalDriver {
        pub fn open(
            _device: &DeviceId,
            _config: &StreamConfig,
            _capture: bool,
        ) -> Result<(Self, CpalStreams)> {
            Err(BackendError::Backend(
                "cpal backend not available in this build".into(),
            ))
        }
    }

    impl PcmDriver for CpalDriver {
        fn name(&self) -> &str {
            "cpal (stub)"
        }

        fn pcm_frequency(&self) -> u32 {
            0
        }

        fn readable(&self) -> bool {
            false
        }

        fn writable(&self) -> bool {
            false
        }

        fn pcm_read(&self, _buffer: &mut [f32]) -> usize {
            0
        }

        fn pcm_write(&self, _buffer: &[f32]) {}

        fn pcm_check_io(&self, _n_values: usize) -> Readiness {
            Readiness::Ready
        }
    }

    pub fn devices() -> Result<Vec<DeviceInfo>> {
        Ok(Vec::new())
    }
}

pub use driver::{MemoryDriver, NullDriver, PcmDriver};
pub use pcm_module::{
    PcmInputModule, PcmInputStats, PcmOutputHandle, PcmOutputModule, PcmPoll,
};
pub use writer::{PcmWriter, WavPcmWriter, WavRecording};

use thiserror::Error;

/// The bridges always exchange interleaved stereo frames.
pub const PCM_CHANNELS: usize = 2;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub block_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: PCM_CHANNELS,
            block_size: 256,
        }
    }
}

impl StreamConfig {
    /// Wall-clock length of one block.
    pub fn block_duration(&self) -> std::time::Duration {
        frames_to_duration(self.block_size as u64, self.sample_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// The empty id selects the host's default device.
    pub fn default_device() -> Self {
        Self(String::new())
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub is_default_output: bool,
    pub is_default_input: bool,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("stream configuration unsupported")]
    UnsupportedConfiguration,
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum PcmError {
    #[error("pcm driver `{0}` is not writable")]
    NotWritable(String),
    #[error("pcm driver `{0}` reports a zero sample rate")]
    ZeroFrequency(String),
    #[error("block size must be non-zero")]
    ZeroBlockSize,
    #[error("recorder buffer overrun, {dropped} values dropped")]
    WriterOverrun { dropped: usize },
    #[error("recorder already finished")]
    WriterClosed,
    #[error("wav encoding failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("recorder thread panicked")]
    WorkerPanicked,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub(crate) fn frames_to_duration(frames: u64, sample_rate: u32) -> std::time::Duration {
    if sample_rate == 0 {
        return std::time::Duration::ZERO;
    }
    std::time::Duration::from_secs_f64(frames as f64 / f64::from(sample_rate))
}
