//! Band-limited single-cycle wavetables, one table per frequency band.

use std::f64::consts::TAU;

pub const DEFAULT_TABLE_BITS: u32 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveForm {
    Sine,
    Triangle,
    Saw,
    Square,
    /// Rendered from saw tables by subtracting a phase-shifted copy.
    Pulse,
}

impl WaveForm {
    pub fn is_pulse(self) -> bool {
        matches!(self, WaveForm::Pulse)
    }

    pub fn name(self) -> &'static str {
        match self {
            WaveForm::Sine => "sine",
            WaveForm::Triangle => "triangle",
            WaveForm::Saw => "saw",
            WaveForm::Square => "square",
            WaveForm::Pulse => "pulse",
        }
    }

    fn harmonic_gain(self, k: usize) -> f64 {
        match self {
            WaveForm::Sine => (k == 1) as u8 as f64,
            WaveForm::Saw | WaveForm::Pulse => 1.0 / k as f64,
            WaveForm::Square if k % 2 == 1 => 1.0 / k as f64,
            WaveForm::Triangle if k % 2 == 1 => {
                let sign = if (k / 2) % 2 == 0 { 1.0 } else { -1.0 };
                sign / (k * k) as f64
            }
            _ => 0.0,
        }
    }
}

impl std::str::FromStr for WaveForm {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sine" => Ok(WaveForm::Sine),
            "triangle" => Ok(WaveForm::Triangle),
            "saw" => Ok(WaveForm::Saw),
            "square" => Ok(WaveForm::Square),
            "pulse" => Ok(WaveForm::Pulse),
            other => Err(format!("unknown wave form '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
struct TableEntry {
    min_freq: f64,
    max_freq: f64,
    /// `n_values + 1` samples, the last repeating the first for interpolation.
    values: Vec<f32>,
    min_pos: u32,
    max_pos: u32,
}

/// Set of band-limited tables for one wave form at one mixing frequency.
#[derive(Debug, Clone)]
pub struct OscTable {
    mix_freq: f64,
    wave_form: WaveForm,
    table_bits: u32,
    entries: Vec<TableEntry>,
}

/// View of the table entry an oscillator currently reads, with the
/// fixed-point conversion factors for its size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscWave {
    pub entry: usize,
    pub min_freq: f64,
    pub max_freq: f64,
    pub n_values: u32,
    pub n_frac_bits: u32,
    pub frac_bitmask: u32,
    pub freq_to_step: f64,
    pub phase_to_pos: f64,
    pub ifrac_to_float: f64,
    pub min_pos: u32,
    pub max_pos: u32,
}

impl OscWave {
    /// Fixed-point position of a phase in `[0, 1)`.
    pub fn sync_pos(&self, phase: f64) -> u32 {
        (phase * self.phase_to_pos) as i64 as u32
    }
}

impl OscTable {
    pub fn new(mix_freq: f64, wave_form: WaveForm) -> Self {
        Self::with_table_bits(mix_freq, wave_form, DEFAULT_TABLE_BITS)
    }

    /// Builds tables of `2^table_bits` values. Each band above the lowest
    /// halves the number of harmonics so none exceeds the Nyquist frequency.
    pub fn with_table_bits(mix_freq: f64, wave_form: WaveForm, table_bits: u32) -> Self {
        assert!(
            (3..=16).contains(&table_bits),
            "table size of 2^{table_bits} values is out of range"
        );
        assert!(mix_freq > 0.0, "mixing frequency must be positive");
        let n_values = 1usize << table_bits;
        let nyquist = mix_freq / 2.0;
        let bands = if wave_form == WaveForm::Sine {
            1
        } else {
            table_bits as usize - 1
        };
        let mut entries = Vec::with_capacity(bands);
        let mut min_freq = 0.0;
        for band in 0..bands {
            let harmonics = 1usize << (bands - 1 - band);
            let max_freq = if band + 1 == bands {
                f64::INFINITY
            } else {
                nyquist / harmonics as f64
            };
            entries.push(render_entry(wave_form, n_values, harmonics, min_freq, max_freq));
            min_freq = max_freq;
        }
        Self {
            mix_freq,
            wave_form,
            table_bits,
            entries,
        }
    }

    pub fn mix_freq(&self) -> f64 {
        self.mix_freq
    }

    pub fn wave_form(&self) -> WaveForm {
        self.wave_form
    }

    pub fn n_values(&self) -> u32 {
        1 << self.table_bits
    }

    pub fn bands(&self) -> usize {
        self.entries.len()
    }

    /// Finds the band covering `freq`, with the band edges as `(min, max]`.
    pub fn lookup(&self, freq: f64) -> OscWave {
        let entry = self
            .entries
            .iter()
            .position(|entry| freq <= entry.max_freq)
            .unwrap_or(self.entries.len() - 1);
        let table = &self.entries[entry];
        let n_values = self.n_values();
        let n_frac_bits = 32 - self.table_bits;
        let int_one = (1u64 << n_frac_bits) as f64;
        OscWave {
            entry,
            min_freq: table.min_freq,
            max_freq: table.max_freq,
            n_values,
            n_frac_bits,
            frac_bitmask: (1u32 << n_frac_bits) - 1,
            freq_to_step: int_one * n_values as f64 / self.mix_freq,
            phase_to_pos: n_values as f64 * int_one,
            ifrac_to_float: 1.0 / int_one,
            min_pos: table.min_pos,
            max_pos: table.max_pos,
        }
    }

    pub fn values(&self, wave: &OscWave) -> &[f32] {
        &self.entries[wave.entry].values
    }
}

fn render_entry(
    wave_form: WaveForm,
    n_values: usize,
    harmonics: usize,
    min_freq: f64,
    max_freq: f64,
) -> TableEntry {
    let mut values = vec![0.0f32; n_values + 1];
    let mut rendered = vec![0.0f64; n_values];
    for (n, sample) in rendered.iter_mut().enumerate() {
        let x = TAU * n as f64 / n_values as f64;
        let (s1, c1) = x.sin_cos();
        let (mut s, mut c) = (s1, c1);
        let mut acc = 0.0;
        for k in 1..=harmonics {
            acc += wave_form.harmonic_gain(k) * s;
            let next_c = c * c1 - s * s1;
            s = s * c1 + c * s1;
            c = next_c;
        }
        *sample = acc;
    }
    let peak = rendered
        .iter()
        .fold(0.0f64, |peak, value| peak.max(value.abs()))
        .max(f64::MIN_POSITIVE);
    let mut min_pos = 0;
    let mut max_pos = 0;
    for (n, value) in rendered.iter().enumerate() {
        values[n] = (value / peak) as f32;
        if *value < rendered[min_pos] {
            min_pos = n;
        }
        if *value > rendered[max_pos] {
            max_pos = n;
        }
    }
    values[n_values] = values[0];
    TableEntry {
        min_freq,
        max_freq,
        values,
        min_pos: min_pos as u32,
        max_pos: max_pos as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_cover_every_frequency() {
        let table = OscTable::with_table_bits(48_000.0, WaveForm::Saw, 8);
        assert_eq!(table.bands(), 7);
        let low = table.lookup(10.0);
        let high = table.lookup(23_000.0);
        assert_eq!(low.entry, 0);
        assert_eq!(high.entry, table.bands() - 1);
        assert_eq!(table.lookup(-5.0).entry, 0);
        let edge = table.lookup(low.max_freq);
        assert_eq!(edge.entry, 0);
    }

    #[test]
    fn fixed_point_factors() {
        let table = OscTable::with_table_bits(48_000.0, WaveForm::Sine, 10);
        let wave = table.lookup(440.0);
        assert_eq!(wave.n_frac_bits, 22);
        assert_eq!(wave.phase_to_pos, 4_294_967_296.0);
        assert_eq!(wave.sync_pos(0.25), 1 << 30);
        assert_eq!(wave.sync_pos(1.0), 0);
        assert!((wave.freq_to_step - 4_294_967_296.0 / 48_000.0).abs() < 1e-9);
    }

    #[test]
    fn tables_are_normalized_with_guard() {
        for form in [WaveForm::Sine, WaveForm::Triangle, WaveForm::Saw, WaveForm::Square] {
            let table = OscTable::with_table_bits(44_100.0, form, 9);
            for band in 0..table.bands() {
                let wave = OscWave {
                    entry: band,
                    ..table.lookup(0.0)
                };
                let values = table.values(&wave);
                assert_eq!(values.len(), 513);
                assert_eq!(values[512], values[0]);
                let peak = values.iter().fold(0.0f32, |p, v| p.max(v.abs()));
                assert!((peak - 1.0).abs() < 1e-6, "{} band {band}", form.name());
            }
        }
    }

    #[test]
    fn sine_extremes_sit_at_quarter_points() {
        let table = OscTable::with_table_bits(48_000.0, WaveForm::Sine, 8);
        let wave = table.lookup(100.0);
        assert_eq!(wave.max_pos, 64);
        assert_eq!(wave.min_pos, 192);
    }
}
