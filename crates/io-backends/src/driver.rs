//! PCM driver abstraction plus the drivers that need no hardware.

use crate::{frames_to_duration, StreamConfig, PCM_CHANNELS};
use engine_graph::Readiness;
use engine_rt::EventQueue;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A stereo PCM device as seen by the bridge modules.
///
/// Buffers are interleaved. `pcm_read` and `pcm_write` are called from the
/// realtime thread and must not block; a driver that cannot deliver a full
/// block pads it with silence instead of returning short.
pub trait PcmDriver: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Sample rate in Hz; zero means the device is not open.
    fn pcm_frequency(&self) -> u32;

    fn readable(&self) -> bool;

    fn writable(&self) -> bool;

    /// Fills `buffer` with captured frames and returns the number of values written.
    fn pcm_read(&self, buffer: &mut [f32]) -> usize;

    fn pcm_write(&self, buffer: &[f32]);

    /// Whether the device can take (or deliver) `n_values` more frames now.
    fn pcm_check_io(&self, n_values: usize) -> Readiness;
}

/// Discards playback and paces itself against the wall clock.
///
/// The clock starts with the first write. An unpaced driver is always ready,
/// which renders as fast as the engine can evaluate.
#[derive(Debug)]
pub struct NullDriver {
    config: StreamConfig,
    paced: bool,
    epoch: OnceCell<Instant>,
    frames_written: AtomicU64,
}

impl NullDriver {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            paced: true,
            epoch: OnceCell::new(),
            frames_written: AtomicU64::new(0),
        }
    }

    pub fn unpaced(config: StreamConfig) -> Self {
        Self {
            paced: false,
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_paced(&self) -> bool {
        self.paced
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Acquire)
    }
}

impl PcmDriver for NullDriver {
    fn name(&self) -> &str {
        "null"
    }

    fn pcm_frequency(&self) -> u32 {
        self.config.sample_rate
    }

    fn readable(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        true
    }

    fn pcm_read(&self, buffer: &mut [f32]) -> usize {
        buffer.fill(0.0);
        buffer.len()
    }

    fn pcm_write(&self, buffer: &[f32]) {
        self.epoch.get_or_init(Instant::now);
        self.frames_written
            .fetch_add((buffer.len() / PCM_CHANNELS) as u64, Ordering::AcqRel);
    }

    fn pcm_check_io(&self, _n_values: usize) -> Readiness {
        if !self.paced {
            return Readiness::Ready;
        }
        let Some(epoch) = self.epoch.get() else {
            return Readiness::Ready;
        };
        // one block of lead keeps the device side fed
        let due = frames_to_duration(self.frames_written(), self.config.sample_rate);
        let horizon = epoch.elapsed() + self.config.block_duration();
        if due <= horizon {
            Readiness::Ready
        } else {
            Readiness::Pending {
                timeout: due - horizon,
            }
        }
    }
}

/// Loopback driver backed by lock-free queues.
///
/// Capture data is fed from the control side with [`MemoryDriver::feed`];
/// playback accumulates until [`MemoryDriver::take_output`] drains it.
#[derive(Debug)]
pub struct MemoryDriver {
    sample_rate: u32,
    readable: bool,
    writable: bool,
    capture: EventQueue<f32>,
    playback: EventQueue<f32>,
    underruns: AtomicU64,
    overruns: AtomicU64,
}

impl MemoryDriver {
    /// `capacity` is counted in values, per direction.
    pub fn new(sample_rate: u32, capacity: usize) -> Self {
        Self {
            sample_rate,
            readable: true,
            writable: true,
            capture: EventQueue::new(capacity),
            playback: EventQueue::new(capacity),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    pub fn with_readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Queues interleaved capture values; returns how many fit.
    pub fn feed(&self, values: &[f32]) -> usize {
        values
            .iter()
            .take_while(|value| self.capture.try_push(**value).is_ok())
            .count()
    }

    /// Drains everything written so far.
    pub fn take_output(&self) -> Vec<f32> {
        std::iter::from_fn(|| self.playback.try_pop().ok()).collect()
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

impl PcmDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn pcm_frequency(&self) -> u32 {
        self.sample_rate
    }

    fn readable(&self) -> bool {
        self.readable
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn pcm_read(&self, buffer: &mut [f32]) -> usize {
        let mut starved = false;
        for value in buffer.iter_mut() {
            *value = match self.capture.try_pop() {
                Ok(sample) => sample,
                Err(_) => {
                    starved = true;
                    0.0
                }
            };
        }
        if starved {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        buffer.len()
    }

    fn pcm_write(&self, buffer: &[f32]) {
        let accepted = buffer
            .iter()
            .take_while(|value| self.playback.try_push(**value).is_ok())
            .count();
        if accepted < buffer.len() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn pcm_check_io(&self, _n_values: usize) -> Readiness {
        Readiness::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn null_driver_paces_after_first_write() {
        let config = StreamConfig {
            sample_rate: 1_000,
            channels: 2,
            block_size: 10,
        };
        let driver = NullDriver::new(config);
        assert_eq!(driver.pcm_check_io(10), Readiness::Ready);

        // one second of audio is far ahead of the wall clock
        driver.pcm_write(&vec![0.0; 2_000]);
        assert_eq!(driver.frames_written(), 1_000);
        match driver.pcm_check_io(10) {
            Readiness::Pending { timeout } => {
                assert!(timeout > Duration::from_millis(500));
                assert!(timeout <= Duration::from_millis(990));
            }
            Readiness::Ready => panic!("driver should be ahead of the clock"),
        }
    }

    #[test]
    fn unpaced_null_driver_is_always_ready() {
        let driver = NullDriver::unpaced(StreamConfig::default());
        driver.pcm_write(&vec![0.0; 48_000 * 2]);
        assert_eq!(driver.pcm_check_io(256), Readiness::Ready);
        assert!(!driver.readable());
    }

    #[test]
    fn memory_driver_pads_capture_underruns() {
        let driver = MemoryDriver::new(48_000, 8);
        assert_eq!(driver.feed(&[1.0, 2.0, 3.0]), 3);
        let mut buffer = [9.0; 4];
        assert_eq!(driver.pcm_read(&mut buffer), 4);
        assert_eq!(buffer, [1.0, 2.0, 3.0, 0.0]);
        assert_eq!(driver.underruns(), 1);
    }

    #[test]
    fn memory_driver_counts_playback_overruns() {
        let driver = MemoryDriver::new(48_000, 4);
        driver.pcm_write(&[0.5; 6]);
        assert_eq!(driver.overruns(), 1);
        assert_eq!(driver.take_output(), vec![0.5; 4]);
        assert!(driver.take_output().is_empty());
    }
}
