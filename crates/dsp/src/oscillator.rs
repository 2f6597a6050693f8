//! Wavetable oscillator with sync, frequency modulation and pulse width
//! modulation.
//!
//! Phase is a 32-bit fixed-point position: the upper `log2(n_values)` bits
//! index the table and the remaining bits are the interpolation fraction, so
//! phase wrap-around is plain integer overflow. The per-sample loop is one
//! generic function monomorphized over the feature set; the matching variant
//! is picked once whenever the configuration or the connected inputs change.

use crate::fastmath::{
    approx5_exp2, cent_tune_fast, dtoi, signal_freq_changed, signal_raising_edge, signal_to_freq,
    PWM_CHANGE_EPSILON,
};
use crate::wavetable::{OscTable, OscWave};
use engine_graph::{Module, ModuleClass, ProcessContext, ResetContext};
use std::sync::Arc;

pub const ICHANNEL_FREQ: usize = 0;
pub const ICHANNEL_FREQ_MOD: usize = 1;
pub const ICHANNEL_PWM: usize = 2;
pub const ICHANNEL_SYNC: usize = 3;
pub const OCHANNEL_OUT: usize = 0;
pub const OCHANNEL_SYNC: usize = 1;

#[derive(Debug, Clone)]
pub struct OscConfig {
    pub table: Arc<OscTable>,
    pub exponential_fm: bool,
    /// Frequency in Hz used while no frequency input is connected.
    pub cfreq: f64,
    pub transpose_factor: f64,
    /// Cents, clamped to `-100..=100`.
    pub fine_tune: i32,
    /// Phase in `[0, 1)` that sync resets jump to.
    pub phase: f64,
    /// Linear: fraction of the base increment. Exponential: octaves.
    pub fm_strength: f32,
    pub self_fm_strength: f32,
    pub pulse_width: f32,
    pub pulse_mod_strength: f32,
}

impl OscConfig {
    pub fn new(table: Arc<OscTable>) -> Self {
        Self {
            table,
            exponential_fm: false,
            cfreq: 440.0,
            transpose_factor: 1.0,
            fine_tune: 0,
            phase: 0.0,
            fm_strength: 0.0,
            self_fm_strength: 0.0,
            pulse_width: 0.5,
            pulse_mod_strength: 0.0,
        }
    }

    pub fn with_frequency(mut self, cfreq: f64) -> Self {
        self.cfreq = cfreq;
        self
    }

    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmMode {
    None,
    Linear,
    Exponential,
    SelfMod,
}

impl FmMode {
    const fn tag(self) -> u8 {
        match self {
            FmMode::None => 0,
            FmMode::Linear => 1,
            FmMode::Exponential => 2,
            FmMode::SelfMod => 3,
        }
    }
}

const FM_LINEAR: u8 = FmMode::Linear.tag();
const FM_EXP: u8 = FmMode::Exponential.tag();
const FM_SELF: u8 = FmMode::SelfMod.tag();

/// Feature set of one kernel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OscMode {
    pub isync: bool,
    pub osync: bool,
    pub freq: bool,
    pub fm: FmMode,
    pub pwm: bool,
    pub pulse: bool,
}

/// Phase and tracking state carried across blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OscState {
    pub cur_pos: u32,
    pub last_pos: u32,
    pub last_sync_level: f32,
    pub last_freq_level: f64,
    pub last_pwm_level: f32,
    pub pwm_offset: u32,
    pub pwm_center: f32,
    pub pwm_max: f32,
}

/// Input buffers of one block; `None` for unconnected inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OscInputs<'a> {
    pub freq: Option<&'a [f32]>,
    pub modulation: Option<&'a [f32]>,
    pub sync: Option<&'a [f32]>,
    pub pwm: Option<&'a [f32]>,
}

type Kernel = fn(&OscConfig, &mut OscWave, &mut OscState, &OscInputs<'_>, &mut [f32], &mut [f32]);

pub struct Oscillator {
    config: OscConfig,
    wave: OscWave,
    state: OscState,
    mode: Option<OscMode>,
    kernel: Kernel,
}

impl Oscillator {
    pub fn new(config: OscConfig) -> Self {
        let wave = config.table.lookup(config.cfreq * config.transpose_factor);
        Self {
            config,
            wave,
            state: OscState::default(),
            mode: None,
            kernel: process_variant::<false, false, false, 0, false, false>,
        }
    }

    pub fn config(&self) -> &OscConfig {
        &self.config
    }

    pub fn state(&self) -> &OscState {
        &self.state
    }

    pub fn wave(&self) -> &OscWave {
        &self.wave
    }

    pub fn mode(&self) -> Option<OscMode> {
        self.mode
    }

    /// Replaces the configuration; the variant and table band are re-derived
    /// on the next block while the phase is kept.
    pub fn set_config(&mut self, config: OscConfig) {
        self.config = config;
        self.mode = None;
    }

    pub fn reset(&mut self) {
        self.state = OscState::default();
        self.mode = None;
    }

    pub fn mode_for(&self, inputs: &OscInputs<'_>, osync: bool) -> OscMode {
        let fm = match (inputs.modulation.is_some(), self.config.exponential_fm) {
            (true, true) => FmMode::Exponential,
            (true, false) => FmMode::Linear,
            (false, _) if self.config.self_fm_strength != 0.0 => FmMode::SelfMod,
            (false, _) => FmMode::None,
        };
        let pulse = self.config.table.wave_form().is_pulse();
        OscMode {
            isync: inputs.sync.is_some(),
            osync,
            freq: inputs.freq.is_some(),
            fm,
            pwm: pulse && inputs.pwm.is_some(),
            pulse,
        }
    }

    /// Renders `mono.len()` samples. Every connected input must hold at
    /// least that many values.
    pub fn process(&mut self, inputs: &OscInputs<'_>, mono: &mut [f32], sync_out: Option<&mut [f32]>) {
        let mode = self.mode_for(inputs, sync_out.is_some());
        if self.mode != Some(mode) {
            self.switch_mode(mode);
        }
        let sync_out = sync_out.unwrap_or(&mut []);
        (self.kernel)(
            &self.config,
            &mut self.wave,
            &mut self.state,
            inputs,
            mono,
            sync_out,
        );
    }

    fn switch_mode(&mut self, mode: OscMode) {
        let freq_changed = self.mode.map_or(true, |old| old.freq != mode.freq);
        if freq_changed {
            let fcpos = self.state.cur_pos as f64 * self.wave.ifrac_to_float;
            let flpos = self.state.last_pos as f64 * self.wave.ifrac_to_float;
            self.state.last_freq_level = self.config.cfreq;
            self.wave = self
                .config
                .table
                .lookup(self.config.cfreq * self.config.transpose_factor);
            self.state.last_pos = (flpos / self.wave.ifrac_to_float) as i64 as u32;
            self.state.cur_pos = (fcpos / self.wave.ifrac_to_float) as i64 as u32;
        }
        if !mode.isync {
            self.state.last_sync_level = 0.0;
        }
        if mode.pulse {
            self.state.last_pwm_level = 0.0;
            let values = self.config.table.values(&self.wave);
            update_pwm_offset(&self.config, &self.wave, values, 0.0, &mut self.state);
        }
        self.kernel = select_kernel(mode);
        self.mode = Some(mode);
    }
}

/// Output sync test: true when the phase passed `sync_pos` between `last_pos`
/// and `cur_pos`, accounting for a wrap-around in between.
#[inline]
pub fn output_sync(sync_pos: u32, last_pos: u32, cur_pos: u32) -> bool {
    let hits = (sync_pos <= cur_pos) as u8 + (last_pos < sync_pos) as u8 + (cur_pos < last_pos) as u8;
    hits >= 2
}

#[inline]
fn phase_delta(delta: f64) -> u32 {
    delta as i64 as u32
}

fn update_pwm_offset(
    config: &OscConfig,
    wave: &OscWave,
    values: &[f32],
    pulse_mod: f32,
    state: &mut OscState,
) {
    let foffset = (config.pulse_width + pulse_mod * config.pulse_mod_strength).clamp(0.0, 1.0);
    let fb = wave.n_frac_bits;
    let pwm_offset = ((foffset * wave.n_values as f32) as u32) << fb;
    let maxp_offs = (wave.min_pos + wave.n_values + wave.max_pos) << (fb - 1);
    let minp_offs = (wave.max_pos + wave.min_pos) << (fb - 1);
    let read = |pos: u32| values[(pos >> fb) as usize];

    let mpos = maxp_offs.wrapping_add(pwm_offset >> 1);
    let max = read(mpos) - read(mpos.wrapping_sub(pwm_offset));
    let mpos = minp_offs.wrapping_add(pwm_offset >> 1);
    let min = read(mpos) - read(mpos.wrapping_sub(pwm_offset));

    let center = (min + max) / -2.0;
    let peak = (min + center).abs().max((max + center).abs());
    state.pwm_offset = pwm_offset;
    if peak < f32::MIN_POSITIVE {
        state.pwm_max = 1.0;
        state.pwm_center = if foffset < 0.5 { -1.0 } else { 1.0 };
    } else {
        state.pwm_center = center;
        state.pwm_max = 1.0 / peak;
    }
}

fn process_variant<
    const ISYNC: bool,
    const OSYNC: bool,
    const FREQ: bool,
    const FM: u8,
    const PWM: bool,
    const PULSE: bool,
>(
    config: &OscConfig,
    wave: &mut OscWave,
    state: &mut OscState,
    inputs: &OscInputs<'_>,
    mono: &mut [f32],
    sync_out: &mut [f32],
) {
    let table = &*config.table;
    let transpose = config.transpose_factor;
    let fine_tune = cent_tune_fast(config.fine_tune);
    let freq_in = inputs.freq.unwrap_or(&[]);
    let mod_in = inputs.modulation.unwrap_or(&[]);
    let sync_in = inputs.sync.unwrap_or(&[]);
    let pwm_in = inputs.pwm.unwrap_or(&[]);

    let mut last_sync_level = state.last_sync_level;
    let mut last_pwm_level = state.last_pwm_level;
    let mut last_freq_level = state.last_freq_level;
    let mut cur_pos = state.cur_pos;
    let mut last_pos = state.last_pos;
    let mut values = table.values(wave);

    let mut pos_inc = dtoi(last_freq_level * transpose * fine_tune * wave.freq_to_step) as u32;
    let mut sync_pos = wave.sync_pos(config.phase);
    let mut posm_strength = pos_inc as f32 * config.fm_strength;
    let mut self_posm_strength = pos_inc as f32 * config.self_fm_strength;

    for i in 0..mono.len() {
        if ISYNC {
            let sync_level = sync_in[i];
            if signal_raising_edge(last_sync_level, sync_level) {
                cur_pos = sync_pos;
                if OSYNC {
                    sync_out[i] = 1.0;
                }
            } else if OSYNC {
                sync_out[i] = if output_sync(sync_pos, last_pos, cur_pos) { 1.0 } else { 0.0 };
            }
            last_sync_level = sync_level;
        } else if OSYNC {
            sync_out[i] = if output_sync(sync_pos, last_pos, cur_pos) { 1.0 } else { 0.0 };
        }

        if FREQ {
            let freq_level = signal_to_freq(freq_in[i] as f64);
            if signal_freq_changed(last_freq_level, freq_level) {
                let transposed = transpose * freq_level;
                if transposed <= wave.min_freq || transposed > wave.max_freq {
                    let fcpos = cur_pos as f64 * wave.ifrac_to_float;
                    let flpos = last_pos as f64 * wave.ifrac_to_float;
                    let next = table.lookup(transposed);
                    if next.entry != wave.entry {
                        *wave = next;
                        values = table.values(wave);
                        last_pos = (flpos / wave.ifrac_to_float) as i64 as u32;
                        cur_pos = (fcpos / wave.ifrac_to_float) as i64 as u32;
                        sync_pos = wave.sync_pos(config.phase);
                        pos_inc = dtoi(transposed * fine_tune * wave.freq_to_step) as u32;
                        if PULSE {
                            last_pwm_level = 0.0;
                            update_pwm_offset(config, wave, values, last_pwm_level, state);
                        }
                    } else {
                        pos_inc = dtoi(transposed * fine_tune * wave.freq_to_step) as u32;
                    }
                } else {
                    pos_inc = dtoi(transposed * fine_tune * wave.freq_to_step) as u32;
                }
                posm_strength = pos_inc as f32 * config.fm_strength;
                self_posm_strength = pos_inc as f32 * config.self_fm_strength;
                last_freq_level = freq_level;
            }
        }

        if PWM {
            let pwm_level = pwm_in[i];
            if (last_pwm_level - pwm_level).abs() > PWM_CHANGE_EPSILON {
                last_pwm_level = pwm_level;
                update_pwm_offset(config, wave, values, pwm_level, state);
            }
        }

        let fb = wave.n_frac_bits;
        let v = if PULSE {
            let tpos = (cur_pos >> fb) as usize;
            let ipos = (cur_pos.wrapping_sub(state.pwm_offset) >> fb) as usize;
            (values[tpos] - values[ipos] + state.pwm_center) * state.pwm_max
        } else {
            let tpos = (cur_pos >> fb) as usize;
            let ffrac = ((cur_pos & wave.frac_bitmask) as f64 * wave.ifrac_to_float) as f32;
            values[tpos] * (1.0 - ffrac) + values[tpos + 1] * ffrac
        };
        mono[i] = v;

        if OSYNC {
            last_pos = cur_pos;
        }
        match FM {
            FM_LINEAR => {
                let delta = pos_inc as f64 + posm_strength as f64 * mod_in[i] as f64;
                cur_pos = cur_pos.wrapping_add(phase_delta(delta));
            }
            FM_EXP => {
                let factor = approx5_exp2(config.fm_strength * mod_in[i]);
                cur_pos = cur_pos.wrapping_add(phase_delta(pos_inc as f64 * factor));
            }
            FM_SELF => {
                cur_pos = cur_pos.wrapping_add(phase_delta(self_posm_strength as f64 * v as f64));
                cur_pos = cur_pos.wrapping_add(pos_inc);
            }
            _ => cur_pos = cur_pos.wrapping_add(pos_inc),
        }
    }

    state.last_pos = if OSYNC { last_pos } else { cur_pos };
    state.cur_pos = cur_pos;
    state.last_sync_level = last_sync_level;
    state.last_freq_level = last_freq_level;
    state.last_pwm_level = last_pwm_level;
}

fn select_kernel(mode: OscMode) -> Kernel {
    match (mode.isync, mode.osync) {
        (false, false) => select_freq::<false, false>(mode),
        (false, true) => select_freq::<false, true>(mode),
        (true, false) => select_freq::<true, false>(mode),
        (true, true) => select_freq::<true, true>(mode),
    }
}

fn select_freq<const ISYNC: bool, const OSYNC: bool>(mode: OscMode) -> Kernel {
    if mode.freq {
        select_fm::<ISYNC, OSYNC, true>(mode)
    } else {
        select_fm::<ISYNC, OSYNC, false>(mode)
    }
}

fn select_fm<const ISYNC: bool, const OSYNC: bool, const FREQ: bool>(mode: OscMode) -> Kernel {
    match mode.fm {
        FmMode::None => select_pulse::<ISYNC, OSYNC, FREQ, 0>(mode),
        FmMode::Linear => select_pulse::<ISYNC, OSYNC, FREQ, FM_LINEAR>(mode),
        FmMode::Exponential => select_pulse::<ISYNC, OSYNC, FREQ, FM_EXP>(mode),
        FmMode::SelfMod => select_pulse::<ISYNC, OSYNC, FREQ, FM_SELF>(mode),
    }
}

fn select_pulse<const ISYNC: bool, const OSYNC: bool, const FREQ: bool, const FM: u8>(
    mode: OscMode,
) -> Kernel {
    match (mode.pwm, mode.pulse) {
        (true, true) => process_variant::<ISYNC, OSYNC, FREQ, FM, true, true>,
        (false, true) => process_variant::<ISYNC, OSYNC, FREQ, FM, false, true>,
        _ => process_variant::<ISYNC, OSYNC, FREQ, FM, false, false>,
    }
}

/// Graph module wrapping an [`Oscillator`].
///
/// Inputs: frequency (signal, 1.0 = 24 kHz), frequency modulation, pulse width
/// modulation, hard sync. Outputs: audio and sync pulses.
pub struct OscillatorModule {
    osc: Oscillator,
}

impl OscillatorModule {
    pub const CLASS: ModuleClass = ModuleClass::new(4, 0, 2);

    pub fn new(config: OscConfig) -> Self {
        Self {
            osc: Oscillator::new(config),
        }
    }

    pub fn oscillator(&self) -> &Oscillator {
        &self.osc
    }

    pub fn set_config(&mut self, config: OscConfig) {
        self.osc.set_config(config);
    }

    pub fn set_frequency(&mut self, cfreq: f64) {
        let config = OscConfig {
            cfreq,
            ..self.osc.config().clone()
        };
        self.osc.set_config(config);
    }
}

impl Module for OscillatorModule {
    fn class(&self) -> ModuleClass {
        Self::CLASS
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let inputs = OscInputs {
            freq: ctx.inputs.connected(ICHANNEL_FREQ),
            modulation: ctx.inputs.connected(ICHANNEL_FREQ_MOD),
            sync: ctx.inputs.connected(ICHANNEL_SYNC),
            pwm: ctx.inputs.connected(ICHANNEL_PWM),
        };
        let osync = ctx.outputs.is_connected(OCHANNEL_SYNC);
        let (mono, sync) = ctx.outputs.pair(OCHANNEL_OUT, OCHANNEL_SYNC);
        self.osc.process(&inputs, mono, osync.then_some(sync));
    }

    fn reset(&mut self, _ctx: &ResetContext<'_>) {
        self.osc.reset();
    }
}
