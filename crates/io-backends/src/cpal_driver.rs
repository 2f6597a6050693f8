use crate::{
    frames_to_duration, BackendError, DeviceId, DeviceInfo, PcmDriver, Result, StreamConfig,
    PCM_CHANNELS,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use engine_graph::Readiness;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Blocks of slack between the engine and the device callbacks.
const RING_BLOCKS: usize = 4;

/// PCM driver on top of a cpal host.
///
/// Playback and capture each go through a ring buffer; the device callbacks
/// own one end, the bridge modules the other. The locks are only ever taken
/// by the engine thread and are therefore uncontended.
pub struct CpalDriver {
    name: String,
    sample_rate: u32,
    block_size: usize,
    playback: Mutex<HeapProd<f32>>,
    capture: Option<Mutex<HeapCons<f32>>>,
}

/// Device streams; must stay alive (and on the opening thread) while the
/// driver is in use.
pub struct CpalStreams {
    output: cpal::Stream,
    input: Option<cpal::Stream>,
}

impl CpalStreams {
    pub fn play(&self) -> Result<()> {
        self.output.play().map_err(backend)?;
        if let Some(input) = &self.input {
            input.play().map_err(backend)?;
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.output.pause().map_err(backend)?;
        if let Some(input) = &self.input {
            input.pause().map_err(backend)?;
        }
        Ok(())
    }
}

fn backend(err: impl std::fmt::Display) -> BackendError {
    BackendError::Backend(err.to_string())
}

fn resolve_device(host: &cpal::Host, device: &DeviceId) -> Result<cpal::Device> {
    if device.0.is_empty() {
        return host
            .default_output_device()
            .ok_or_else(|| BackendError::Backend("no default output device".into()));
    }
    for dev in host.devices().map_err(backend)? {
        if let Ok(name) = dev.name() {
            if name == device.0 {
                return Ok(dev);
            }
        }
    }
    Err(BackendError::DeviceNotFound(device.0.clone()))
}

fn select_config(
    mut ranges: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
    config: &StreamConfig,
) -> Result<cpal::StreamConfig> {
    let desired_rate = cpal::SampleRate(config.sample_rate);
    ranges
        .find(|range| {
            range.channels() as usize == PCM_CHANNELS
                && range.min_sample_rate() <= desired_rate
                && range.max_sample_rate() >= desired_rate
        })
        .map(|range| range.with_sample_rate(desired_rate).config())
        .ok_or(BackendError::UnsupportedConfiguration)
}

impl CpalDriver {
    /// Opens playback (and capture when `capture` is set) on `device`.
    pub fn open(
        device: &DeviceId,
        config: &StreamConfig,
        capture: bool,
    ) -> Result<(Self, CpalStreams)> {
        let host = cpal::default_host();
        let device = resolve_device(&host, device)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let ring_len = config.block_size * PCM_CHANNELS * RING_BLOCKS;

        let out_config = select_config(
            device.supported_output_configs().map_err(backend)?,
            config,
        )?;
        let (playback, mut device_side) = HeapRb::<f32>::new(ring_len).split();
        let output = device
            .build_output_stream(
                &out_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let n = device_side.pop_slice(data);
                    data[n..].fill(0.0);
                },
                move |err| {
                    tracing::error!("cpal output stream error: {err}");
                },
                None,
            )
            .map_err(backend)?;

        let (input, capture) = if capture {
            let in_config = select_config(
                device.supported_input_configs().map_err(backend)?,
                config,
            )?;
            let (mut device_side, engine_side) = HeapRb::<f32>::new(ring_len).split();
            let input = device
                .build_input_stream(
                    &in_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        device_side.push_slice(data);
                    },
                    move |err| {
                        tracing::error!("cpal input stream error: {err}");
                    },
                    None,
                )
                .map_err(backend)?;
            (Some(input), Some(Mutex::new(engine_side)))
        } else {
            (None, None)
        };

        tracing::info!(
            device = %name,
            sample_rate = config.sample_rate,
            block_size = config.block_size,
            capture = capture,
            "cpal driver opened"
        );
        Ok((
            Self {
                name,
                sample_rate: config.sample_rate,
                block_size: config.block_size,
                playback: Mutex::new(playback),
                capture,
            },
            CpalStreams { output, input },
        ))
    }
}

impl PcmDriver for CpalDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn pcm_frequency(&self) -> u32 {
        self.sample_rate
    }

    fn readable(&self) -> bool {
        self.capture.is_some()
    }

    fn writable(&self) -> bool {
        true
    }

    fn pcm_read(&self, buffer: &mut [f32]) -> usize {
        let n = match self.capture.as_ref().and_then(|capture| capture.try_lock()) {
            Some(mut capture) => capture.pop_slice(buffer),
            None => 0,
        };
        buffer[n..].fill(0.0);
        buffer.len()
    }

    fn pcm_write(&self, buffer: &[f32]) {
        if let Some(mut playback) = self.playback.try_lock() {
            playback.push_slice(buffer);
        }
    }

    fn pcm_check_io(&self, n_values: usize) -> Readiness {
        let Some(playback) = self.playback.try_lock() else {
            return Readiness::Ready;
        };
        let needed = n_values.max(self.block_size) * PCM_CHANNELS;
        let vacant = playback.vacant_len();
        if vacant >= needed {
            Readiness::Ready
        } else {
            let missing = ((needed - vacant) / PCM_CHANNELS) as u64;
            Readiness::Pending {
                timeout: frames_to_duration(missing, self.sample_rate),
            }
        }
    }
}

pub fn devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_output = host
        .default_output_device()
        .and_then(|device| device.name().ok())
        .unwrap_or_default();
    let default_input = host
        .default_input_device()
        .and_then(|device| device.name().ok())
        .unwrap_or_default();
    let mut result = Vec::new();
    for device in host.devices().map_err(backend)? {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        result.push(DeviceInfo {
            id: DeviceId(name.clone()),
            is_default_output: name == default_output,
            is_default_input: name == default_input,
            name,
        });
    }
    Ok(result)
}
