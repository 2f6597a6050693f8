use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use dsp::amplifier::{ICHANNEL_AUDIO_IN1, OCHANNEL_AUDIO_OUT};
use dsp::oscillator::{ICHANNEL_FREQ_MOD, OCHANNEL_OUT};
use dsp::{Amplifier, AmplifierParams, OscConfig, OscTable, OscillatorModule, WaveForm};
use engine_core::EngineConfig;
use engine_graph::{ModuleId, Transaction};
use io_backends::pcm_module::{JCHANNEL_LEFT, JCHANNEL_RIGHT};
use serde::Deserialize;

/// A set of oscillator voices mixed into the stereo output.
#[derive(Debug, Deserialize)]
pub struct PatchSpec {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default = "default_duration")]
    pub duration_seconds: f32,
    #[serde(default)]
    pub voices: Vec<VoiceSpec>,
}

#[derive(Debug, Deserialize)]
pub struct VoiceSpec {
    #[serde(default = "default_wave")]
    pub wave: String,
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(default)]
    pub phase: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub pan: Pan,
    #[serde(default)]
    pub pulse_width: Option<f32>,
    #[serde(default)]
    pub vibrato: Option<VibratoSpec>,
}

#[derive(Debug, Deserialize)]
pub struct VibratoSpec {
    pub frequency: f64,
    /// Modulation depth in octaves.
    pub depth: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pan {
    Left,
    Right,
    #[default]
    Center,
}

impl Pan {
    fn channels(self) -> &'static [usize] {
        match self {
            Pan::Left => &[JCHANNEL_LEFT],
            Pan::Right => &[JCHANNEL_RIGHT],
            Pan::Center => &[JCHANNEL_LEFT, JCHANNEL_RIGHT],
        }
    }
}

fn default_name() -> String {
    "untitled".into()
}

fn default_duration() -> f32 {
    2.0
}

fn default_wave() -> String {
    "sine".into()
}

fn default_frequency() -> f64 {
    440.0
}

fn default_gain() -> f64 {
    0.5
}

impl PatchSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read patch file {}", path.display()))?;
        let patch: Self = serde_json::from_str(&data)
            .with_context(|| format!("{} is not a valid patch file", path.display()))?;
        patch
            .engine
            .validate()
            .with_context(|| format!("{} has an invalid engine section", path.display()))?;
        Ok(patch)
    }

    /// A patch with one centred voice.
    pub fn single(wave: &str, frequency: f64, duration_seconds: f32) -> Self {
        Self {
            name: format!("{wave} {frequency} Hz"),
            engine: EngineConfig::default(),
            duration_seconds,
            voices: vec![VoiceSpec {
                wave: wave.to_owned(),
                frequency,
                phase: 0.0,
                gain: default_gain(),
                pan: Pan::Center,
                pulse_width: None,
                vibrato: None,
            }],
        }
    }

    pub fn duration_frames(&self) -> u64 {
        (f64::from(self.duration_seconds.max(0.0)) * f64::from(self.engine.sample_rate)).round()
            as u64
    }

    /// Adds every voice to `txn`, feeding the joint inputs of `output`.
    pub fn build(&self, txn: &mut Transaction, output: ModuleId) -> Result<Vec<ModuleId>> {
        let mix_freq = f64::from(self.engine.sample_rate);
        let mut tables: HashMap<WaveForm, Arc<OscTable>> = HashMap::new();
        let mut table = |form: WaveForm| {
            Arc::clone(
                tables
                    .entry(form)
                    .or_insert_with(|| Arc::new(OscTable::new(mix_freq, form))),
            )
        };

        let mut voices = Vec::with_capacity(self.voices.len());
        for (index, voice) in self.voices.iter().enumerate() {
            let form: WaveForm = voice
                .wave
                .parse()
                .map_err(|err: String| anyhow!("voice {index}: {err}"))?;
            if !(voice.frequency > 0.0 && voice.frequency < mix_freq / 2.0) {
                return Err(anyhow!(
                    "voice {index}: frequency {} Hz is outside (0, {}) Hz",
                    voice.frequency,
                    mix_freq / 2.0
                ));
            }

            let mut config = OscConfig::new(table(form))
                .with_frequency(voice.frequency)
                .with_phase(voice.phase.rem_euclid(1.0));
            if let Some(width) = voice.pulse_width {
                config.pulse_width = width.clamp(0.0, 1.0);
            }
            if let Some(vibrato) = &voice.vibrato {
                config.exponential_fm = true;
                config.fm_strength = vibrato.depth;
            }
            let osc = txn.integrate(OscillatorModule::new(config));

            if let Some(vibrato) = &voice.vibrato {
                let lfo = txn.integrate(OscillatorModule::new(
                    OscConfig::new(table(WaveForm::Sine)).with_frequency(vibrato.frequency),
                ));
                txn.connect_stream(lfo, OCHANNEL_OUT, osc, ICHANNEL_FREQ_MOD);
            }

            let amp = txn.integrate(Amplifier::new(AmplifierParams {
                alevel1: voice.gain * 100.0,
                base_level: 100.0,
                ..AmplifierParams::default()
            }));
            txn.connect_stream(osc, OCHANNEL_OUT, amp, ICHANNEL_AUDIO_IN1);
            for channel in voice.pan.channels() {
                txn.connect_joint(amp, OCHANNEL_AUDIO_OUT, output, *channel);
            }
            voices.push(osc);
        }
        Ok(voices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_graph::{ModuleClass, Topology};

    #[test]
    fn voices_default_sensibly() {
        let patch: PatchSpec = serde_json::from_str(
            r#"{ "voices": [ { "wave": "saw", "pan": "left" }, { "frequency": 220.0 } ] }"#,
        )
        .unwrap();
        assert_eq!(patch.engine, EngineConfig::default());
        assert_eq!(patch.voices[0].frequency, 440.0);
        assert_eq!(patch.voices[0].pan, Pan::Left);
        assert_eq!(patch.voices[1].wave, "sine");
        assert_eq!(patch.duration_frames(), 96_000);
    }

    #[test]
    fn built_patch_validates() {
        struct Sink;
        impl engine_graph::Module for Sink {
            fn class(&self) -> ModuleClass {
                ModuleClass::new(0, 2, 0)
            }
            fn process(&mut self, _ctx: &mut engine_graph::ProcessContext<'_>) {}
        }

        let mut patch = PatchSpec::single("square", 110.0, 1.0);
        patch.voices[0].vibrato = Some(VibratoSpec {
            frequency: 5.0,
            depth: 0.1,
        });
        let mut txn = Transaction::new();
        let sink = txn.integrate(Sink);
        let voices = patch.build(&mut txn, sink).unwrap();
        assert_eq!(voices.len(), 1);

        let mut topology = Topology::default();
        topology.commit(&txn).unwrap();
        assert_eq!(topology.len(), 4);
        assert_eq!(topology.connection_count(), 4);
    }

    #[test]
    fn unknown_wave_is_reported() {
        let patch = PatchSpec::single("noise", 440.0, 1.0);
        let mut txn = Transaction::new();
        let err = patch.build(&mut txn, ModuleId::fresh()).unwrap_err();
        assert!(err.to_string().contains("unknown wave form"));
    }
}
