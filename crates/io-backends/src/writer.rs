//! Auxiliary recorders fed by the PCM output bridge.

use crate::{PcmError, PCM_CHANNELS};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DRAIN_INTERVAL: Duration = Duration::from_millis(2);
const NO_TICK: u64 = u64::MAX;

/// Receives every block the output bridge hands to its driver.
///
/// Runs on the realtime thread: implementations must not block. Errors are
/// counted by the bridge and never interrupt playback.
pub trait PcmWriter: Send + 'static {
    fn write(&mut self, tick_stamp: u64, interleaved: &[f32]) -> Result<(), PcmError>;
}

#[derive(Debug)]
struct Shared {
    finished: AtomicBool,
    dropped: AtomicU64,
    first_tick: AtomicU64,
    // values pushed by the realtime half and not yet encoded
    pending: AtomicUsize,
    capacity: usize,
}

/// Realtime half of a WAV recording: copies blocks into a ring buffer.
pub struct WavPcmWriter {
    producer: HeapProd<f32>,
    shared: Arc<Shared>,
    start_tick: u64,
    max_frames: Option<u64>,
    accepted: u64,
}

/// Control half of a WAV recording: owns the encoder thread.
pub struct WavRecording {
    path: PathBuf,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<Result<u64, PcmError>>>,
}

impl WavPcmWriter {
    /// Creates a 32-bit float stereo WAV file and spawns its encoder thread.
    ///
    /// `buffer_frames` sizes the ring buffer between the realtime thread and
    /// the encoder.
    pub fn create(
        path: impl AsRef<Path>,
        sample_rate: u32,
        buffer_frames: usize,
    ) -> Result<(Self, WavRecording), PcmError> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: PCM_CHANNELS as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let wav = hound::WavWriter::create(&path, spec)?;
        let capacity = buffer_frames.max(1) * PCM_CHANNELS;
        let ring = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = ring.split();
        let shared = Arc::new(Shared {
            finished: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            first_tick: AtomicU64::new(NO_TICK),
            pending: AtomicUsize::new(0),
            capacity,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("pcm-recorder".into())
            .spawn(move || drain(consumer, wav, &worker_shared))?;
        tracing::debug!(path = %path.display(), sample_rate, "wav recorder started");

        Ok((
            Self {
                producer,
                shared: Arc::clone(&shared),
                start_tick: 0,
                max_frames: None,
                accepted: 0,
            },
            WavRecording {
                path,
                shared,
                worker: Some(worker),
            },
        ))
    }

    /// Ignores frames stamped before `tick`.
    pub fn starting_at(mut self, tick: u64) -> Self {
        self.start_tick = tick;
        self
    }

    /// Stops recording after `frames` frames.
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn frames_accepted(&self) -> u64 {
        self.accepted
    }
}

impl PcmWriter for WavPcmWriter {
    fn write(&mut self, tick_stamp: u64, interleaved: &[f32]) -> Result<(), PcmError> {
        if self.shared.finished.load(Ordering::Acquire) {
            return Err(PcmError::WriterClosed);
        }
        let frames = (interleaved.len() / PCM_CHANNELS) as u64;
        if tick_stamp + frames <= self.start_tick {
            return Ok(());
        }
        let skip = self.start_tick.saturating_sub(tick_stamp);
        let mut take = frames - skip;
        if let Some(max) = self.max_frames {
            take = take.min(max.saturating_sub(self.accepted));
        }
        if take == 0 {
            return Ok(());
        }

        let wanted = take as usize * PCM_CHANNELS;
        // whole frames only, so channels never swap in the file
        let room = self.producer.vacant_len() / PCM_CHANNELS * PCM_CHANNELS;
        let from = skip as usize * PCM_CHANNELS;
        let count = wanted.min(room);
        // counted before the push so the encoder never subtracts first
        self.shared.pending.fetch_add(count, Ordering::AcqRel);
        let pushed = self.producer.push_slice(&interleaved[from..from + count]);
        if pushed < count {
            self.shared.pending.fetch_sub(count - pushed, Ordering::AcqRel);
        }
        if pushed > 0 && self.accepted == 0 {
            self.shared
                .first_tick
                .store(tick_stamp + skip, Ordering::Release);
        }
        self.accepted += (pushed / PCM_CHANNELS) as u64;

        if pushed < wanted {
            let dropped = wanted - pushed;
            self.shared
                .dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
            return Err(PcmError::WriterOverrun { dropped });
        }
        Ok(())
    }
}

impl WavRecording {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tick stamp of the first recorded frame.
    pub fn first_tick(&self) -> Option<u64> {
        match self.shared.first_tick.load(Ordering::Acquire) {
            NO_TICK => None,
            tick => Some(tick),
        }
    }

    /// Frames buffered for the encoder thread.
    pub fn pending_frames(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire) / PCM_CHANNELS
    }

    /// Frames the ring buffer can hold before blocks get dropped.
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity / PCM_CHANNELS
    }

    /// False once the encoder thread exited, e.g. after a write error.
    pub fn is_encoding(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Blocks until the ring has room for `frames` more frames.
    ///
    /// Gives up, returning false, when the encoder thread is gone or the ring
    /// cannot hold that many frames at all. Only for producers that may
    /// block, such as offline renders.
    pub fn wait_for_room(&self, frames: usize) -> bool {
        if frames > self.capacity_frames() {
            return false;
        }
        while self.pending_frames() + frames > self.capacity_frames() {
            if !self.is_encoding() {
                return false;
            }
            thread::sleep(DRAIN_INTERVAL / 2);
        }
        true
    }

    /// Values lost to ring buffer overruns.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Flushes pending frames, finalizes the file and returns the frame count.
    ///
    /// Call once the realtime side stopped writing, e.g. after the bridge was
    /// removed or the engine stopped.
    pub fn finish(mut self) -> Result<u64, PcmError> {
        let frames = self.join()?;
        tracing::info!(
            path = %self.path.display(),
            frames,
            dropped = self.dropped(),
            "wav recording finished"
        );
        Ok(frames)
    }

    fn join(&mut self) -> Result<u64, PcmError> {
        self.shared.finished.store(true, Ordering::Release);
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| PcmError::WorkerPanicked)?,
            None => Err(PcmError::WriterClosed),
        }
    }
}

impl Drop for WavRecording {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.join() {
                tracing::warn!(path = %self.path.display(), "wav recording failed: {err}");
            }
        }
    }
}

fn drain(
    mut consumer: HeapCons<f32>,
    mut wav: hound::WavWriter<BufWriter<File>>,
    shared: &Shared,
) -> Result<u64, PcmError> {
    let mut scratch = vec![0.0f32; 4096];
    let mut values = 0u64;
    loop {
        let finished = shared.finished.load(Ordering::Acquire);
        let n = consumer.pop_slice(&mut scratch);
        for sample in &scratch[..n] {
            wav.write_sample(*sample)?;
        }
        shared.pending.fetch_sub(n, Ordering::AcqRel);
        values += n as u64;
        if n == 0 {
            if finished {
                break;
            }
            thread::sleep(DRAIN_INTERVAL);
        }
    }
    wav.finalize()?;
    Ok(values / PCM_CHANNELS as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_after_finish_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (mut writer, recording) =
            WavPcmWriter::create(dir.path().join("closed.wav"), 48_000, 64).unwrap();
        writer.write(0, &[0.25; 8]).unwrap();
        assert_eq!(recording.finish().unwrap(), 4);
        assert!(matches!(
            writer.write(4, &[0.25; 8]),
            Err(PcmError::WriterClosed)
        ));
    }

    #[test]
    fn waiting_for_room_never_drops_frames() {
        let dir = tempfile::tempdir().unwrap();
        let (mut writer, recording) =
            WavPcmWriter::create(dir.path().join("paced.wav"), 48_000, 16).unwrap();
        assert_eq!(recording.capacity_frames(), 16);
        assert!(!recording.wait_for_room(17));

        for block in 0..64u64 {
            assert!(recording.wait_for_room(8));
            writer.write(block * 8, &[0.125; 16]).unwrap();
        }
        assert_eq!(recording.dropped(), 0);
        assert_eq!(recording.finish().unwrap(), 512);
    }

    #[test]
    fn frame_limit_truncates_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, recording) =
            WavPcmWriter::create(dir.path().join("limit.wav"), 48_000, 64).unwrap();
        let mut writer = writer.with_max_frames(6);
        writer.write(0, &[0.5; 8]).unwrap();
        writer.write(4, &[0.5; 8]).unwrap();
        writer.write(8, &[0.5; 8]).unwrap();
        assert_eq!(writer.frames_accepted(), 6);
        assert_eq!(recording.finish().unwrap(), 6);
    }
}
