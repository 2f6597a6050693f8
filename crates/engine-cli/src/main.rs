use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use engine_core::{Engine, EngineConfig};
use engine_graph::Transaction;
use io_backends::cpal_driver::{self, CpalDriver};
use io_backends::{DeviceId, NullDriver, PcmDriver, PcmOutputModule, WavPcmWriter};
use tracing_subscriber::EnvFilter;

mod patch;

use patch::PatchSpec;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render(args) => execute_render(args),
        Commands::Play(args) => execute_play(args),
        Commands::Devices => execute_devices(),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Renders oscillator patches with the Harmoniq synthesis engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a patch into a WAV file through the null driver.
    Render(RenderArgs),
    /// Play a patch on an audio device (requires the `cpal` feature).
    Play(PlayArgs),
    /// List audio devices (requires the `cpal` feature).
    Devices,
}

#[derive(Args)]
struct PatchArgs {
    /// Path to a patch description (JSON). Overrides --wave/--frequency.
    #[arg(long)]
    patch: Option<PathBuf>,
    /// Wave form of the single voice used without a patch file.
    #[arg(long, default_value = "saw")]
    wave: String,
    /// Frequency in Hz of the single voice used without a patch file.
    #[arg(long, default_value_t = 220.0)]
    frequency: f64,
    /// Duration in seconds; defaults to the patch duration.
    #[arg(long)]
    duration: Option<f32>,
    /// Engine configuration (JSON) replacing the patch's engine section.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the engine block size.
    #[arg(long)]
    block_size: Option<usize>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    patch: PatchArgs,
    /// Output path for the WAV file.
    #[arg(long)]
    output: PathBuf,
    /// Run the engine thread against a wall-clock paced driver instead of
    /// rendering as fast as possible on the calling thread.
    #[arg(long)]
    realtime: bool,
}

#[derive(Args)]
struct PlayArgs {
    #[command(flatten)]
    patch: PatchArgs,
    /// Output device name; the host default when omitted.
    #[arg(long)]
    device: Option<String>,
}

impl PatchArgs {
    fn resolve(&self) -> Result<PatchSpec> {
        let mut patch = match &self.patch {
            Some(path) => PatchSpec::load(path)?,
            None => PatchSpec::single(&self.wave, self.frequency, 2.0),
        };
        if let Some(path) = &self.config {
            patch.engine = EngineConfig::load(path)?;
        }
        if let Some(block_size) = self.block_size {
            patch.engine.block_size = block_size;
        }
        if let Some(duration) = self.duration {
            patch.duration_seconds = duration;
        }
        patch.engine.validate().context("invalid engine settings")?;
        Ok(patch)
    }
}

fn execute_render(args: RenderArgs) -> Result<()> {
    let patch = args.patch.resolve()?;
    let config = patch.engine.clone();
    let stream = config.stream();
    let frames = patch.duration_frames();

    let driver = Arc::new(if args.realtime {
        NullDriver::new(stream.clone())
    } else {
        NullDriver::unpaced(stream.clone())
    });
    let (writer, recording) =
        WavPcmWriter::create(&args.output, stream.sample_rate, stream.block_size * 64)
            .with_context(|| format!("failed to create {}", args.output.display()))?;

    let mut engine = Engine::new(config.clone())?;
    let mut txn = Transaction::new();
    let output = PcmOutputModule::new(driver.clone(), config.block_size)?
        .with_writer(writer.with_max_frames(frames))
        .insert(&mut txn);
    let voices = patch.build(&mut txn, output.module)?;
    engine.commit(&mut txn)?;
    tracing::info!(patch = %patch.name, voices = voices.len(), frames, "rendering");

    if args.realtime {
        engine.start()?;
        let deadline = Instant::now()
            + Duration::from_secs_f32(patch.duration_seconds.max(0.0) * 2.0)
            + Duration::from_secs(5);
        while driver.frames_written() < frames {
            if Instant::now() > deadline {
                return Err(anyhow!("engine stalled after {} frames", driver.frames_written()));
            }
            thread::sleep(stream.block_duration());
        }
        engine.stop()?;
    } else {
        // the recorder is the only sink, so rendering waits for it
        let mut rendered = 0;
        while rendered < frames {
            if !recording.wait_for_room(config.block_size) {
                break;
            }
            engine.render(config.block_size)?;
            rendered += config.block_size as u64;
        }
    }

    let failures = output.writer_failures();
    let written = recording.finish()?;
    if !args.realtime && written < frames {
        return Err(anyhow!(
            "recorder stopped after {written} of {frames} frames ({failures} blocks lost)"
        ));
    }
    if failures > 0 {
        tracing::warn!(blocks = failures, "recorder could not keep up, output has gaps");
    }
    println!(
        "Rendered patch '{}' ({} frames) to {}",
        patch.name,
        written,
        args.output.display()
    );
    Ok(())
}

fn execute_play(args: PlayArgs) -> Result<()> {
    let patch = args.patch.resolve()?;
    let config = patch.engine.clone();
    let device = args
        .device
        .clone()
        .map(DeviceId)
        .unwrap_or_else(DeviceId::default_device);
    let (driver, streams) = CpalDriver::open(&device, &config.stream(), false)
        .map_err(|err| anyhow!("failed to open audio device: {err}"))?;
    let driver = Arc::new(driver);
    println!("Playing '{}' on {}", patch.name, driver.name());

    let mut engine = Engine::new(config.clone())?;
    let mut txn = Transaction::new();
    let output = PcmOutputModule::new(driver, config.block_size)?.insert(&mut txn);
    patch.build(&mut txn, output.module)?;
    engine.commit(&mut txn)?;

    streams
        .play()
        .map_err(|err| anyhow!("failed to start stream: {err}"))?;
    engine.start()?;
    thread::sleep(Duration::from_secs_f32(patch.duration_seconds.max(0.0)));
    engine.stop()?;
    streams
        .pause()
        .map_err(|err| anyhow!("failed to stop stream: {err}"))?;
    Ok(())
}

fn execute_devices() -> Result<()> {
    let devices = cpal_driver::devices().map_err(|err| anyhow!("{err}"))?;
    if devices.is_empty() {
        println!("No audio devices available");
    }
    for device in devices {
        let mut flags = Vec::new();
        if device.is_default_output {
            flags.push("default output");
        }
        if device.is_default_input {
            flags.push("default input");
        }
        if flags.is_empty() {
            println!("{}", device.name);
        } else {
            println!("{} ({})", device.name, flags.join(", "));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_render_writes_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("square.wav");
        execute_render(RenderArgs {
            patch: PatchArgs {
                patch: None,
                wave: "square".into(),
                frequency: 330.0,
                duration: Some(0.1),
                config: None,
                block_size: Some(100),
            },
            output: output.clone(),
            realtime: false,
        })
        .unwrap();
        // 4800 stereo float frames plus the header
        let len = std::fs::metadata(&output).unwrap().len();
        assert!(len > 4_800 * 2 * 4);
        assert!(len < 4_800 * 2 * 4 + 128);
    }

    #[test]
    fn long_offline_render_keeps_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("long.wav");
        // far more than the recorder ring holds
        execute_render(RenderArgs {
            patch: PatchArgs {
                patch: None,
                wave: "saw".into(),
                frequency: 110.0,
                duration: Some(3.0),
                config: None,
                block_size: None,
            },
            output: output.clone(),
            realtime: false,
        })
        .unwrap();
        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.duration(), 144_000);
        let samples: Vec<f32> = reader.into_samples::<f32>().map(Result::unwrap).collect();
        assert!(samples.iter().any(|v| *v != 0.0));
        assert!(samples[samples.len() - 128..].iter().any(|v| *v != 0.0));
    }
}
