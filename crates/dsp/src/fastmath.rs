//! Fast approximations of transcendental functions and signal helpers.
//!
//! The exp2 family splits the exponent into a rounded integer part, written
//! straight into the IEEE-754 exponent bits, and a fractional part in
//! `[-0.5, 0.5]` evaluated with a truncated Taylor polynomial of increasing
//! order. The tanh family is built on top of the exp2 of the same order.

use once_cell::sync::Lazy;

/// Frequency represented by a signal value of 1.0.
pub const SIGNAL_TO_FREQ_FACTOR: f64 = 24_000.0;
pub const SIGNAL_FROM_FREQ_FACTOR: f64 = 1.0 / SIGNAL_TO_FREQ_FACTOR;
/// Frequency changes below this are ignored by oscillators.
pub const FREQ_CHANGE_EPSILON: f64 = 1e-7;
/// Pulse width changes below this are ignored by oscillators.
pub const PWM_CHANGE_EPSILON: f32 = 1.0 / 65_536.0;
pub const MAX_FINE_TUNE: i32 = 100;

const TWO_DIV_LN2: f64 = 2.885_390_081_777_926_814_719_849_362;

const C1: f64 = 0.693_147_180_559_945_309_417_232_121_458_18;
const C2: f64 = 0.240_226_506_959_100_712_333_551_263_163_33;
const C3: f64 = 0.055_504_108_664_821_579_953_142_263_768_622;
const C4: f64 = 0.009_618_129_107_628_477_161_979_071_573_658_9;
const C5: f64 = 0.001_333_355_814_642_844_342_341_222_198_799_6;
const C6: f64 = 0.000_154_035_303_933_816_099_544_370_973_327_42;
const C7: f64 = 0.000_015_252_733_804_059_840_280_025_439_012_01;
const C8: f64 = 0.000_001_321_548_679_014_430_948_840_375_822_828_8;
const C9: f64 = 0.000_000_101_780_860_092_396_997_274_900_075_977_45;

#[inline]
pub fn signal_to_freq(value: f64) -> f64 {
    SIGNAL_TO_FREQ_FACTOR * value
}

#[inline]
pub fn signal_from_freq(freq: f64) -> f64 {
    SIGNAL_FROM_FREQ_FACTOR * freq
}

#[inline]
pub fn signal_raising_edge(last: f32, current: f32) -> bool {
    last < current
}

#[inline]
pub fn signal_freq_changed(last: f64, current: f64) -> bool {
    (last - current).abs() > FREQ_CHANGE_EPSILON
}

#[inline]
pub fn signal_value_clip(x: f64) -> f64 {
    if x > 1.0 {
        1.0
    } else if x < -1.0 {
        -1.0
    } else {
        x
    }
}

/// Rounds to the nearest integer, halves away from zero.
#[inline]
pub fn ftoi(x: f32) -> i32 {
    (x + 0.5_f32.copysign(x)) as i32
}

#[inline]
pub fn dtoi(x: f64) -> i64 {
    (x + 0.5_f64.copysign(x)) as i64
}

/// `2^i` for integer `i`, built from the exponent bits alone.
#[inline]
fn exp2_int(i: i32) -> f64 {
    let bits = ((127i32.wrapping_add(i) & 0xff) as u32) << 23;
    f32::from_bits(bits) as f64
}

#[inline]
fn exp2_split(ex: f32) -> (f64, f64) {
    let i = ftoi(ex);
    (exp2_int(i), ex as f64 - i as f64)
}

#[inline]
pub fn approx2_exp2(ex: f32) -> f64 {
    let (p, x) = exp2_split(ex);
    p * (1.0 + x * (C1 + x * C2))
}

#[inline]
pub fn approx3_exp2(ex: f32) -> f64 {
    let (p, x) = exp2_split(ex);
    p * (1.0 + x * (C1 + x * (C2 + x * C3)))
}

#[inline]
pub fn approx4_exp2(ex: f32) -> f64 {
    let (p, x) = exp2_split(ex);
    p * (1.0 + x * (C1 + x * (C2 + x * (C3 + x * C4))))
}

#[inline]
pub fn approx5_exp2(ex: f32) -> f64 {
    let (p, x) = exp2_split(ex);
    p * (1.0 + x * (C1 + x * (C2 + x * (C3 + x * (C4 + x * C5)))))
}

#[inline]
pub fn approx6_exp2(ex: f32) -> f64 {
    let (p, x) = exp2_split(ex);
    p * (1.0 + x * (C1 + x * (C2 + x * (C3 + x * (C4 + x * (C5 + x * C6))))))
}

#[inline]
pub fn approx7_exp2(ex: f32) -> f64 {
    let (p, x) = exp2_split(ex);
    p * (1.0 + x * (C1 + x * (C2 + x * (C3 + x * (C4 + x * (C5 + x * (C6 + x * C7)))))))
}

#[inline]
pub fn approx8_exp2(ex: f32) -> f64 {
    let (p, x) = exp2_split(ex);
    p * (1.0
        + x * (C1 + x * (C2 + x * (C3 + x * (C4 + x * (C5 + x * (C6 + x * (C7 + x * C8))))))))
}

#[inline]
pub fn approx9_exp2(ex: f32) -> f64 {
    let (p, x) = exp2_split(ex);
    p * (1.0
        + x * (C1
            + x * (C2
                + x * (C3 + x * (C4 + x * (C5 + x * (C6 + x * (C7 + x * (C8 + x * C9)))))))))
}

#[inline]
fn tanh_with(x: f32, exp2: fn(f32) -> f64) -> f64 {
    if x < -20.0 {
        return -1.0;
    }
    if x > 20.0 {
        return 1.0;
    }
    let bpot = exp2((x as f64 * TWO_DIV_LN2) as f32);
    (bpot - 1.0) / (bpot + 1.0)
}

#[inline]
pub fn approx2_tanh(x: f32) -> f64 {
    tanh_with(x, approx2_exp2)
}

#[inline]
pub fn approx3_tanh(x: f32) -> f64 {
    tanh_with(x, approx3_exp2)
}

#[inline]
pub fn approx4_tanh(x: f32) -> f64 {
    tanh_with(x, approx4_exp2)
}

#[inline]
pub fn approx5_tanh(x: f32) -> f64 {
    tanh_with(x, approx5_exp2)
}

#[inline]
pub fn approx6_tanh(x: f32) -> f64 {
    tanh_with(x, approx6_exp2)
}

#[inline]
pub fn approx7_tanh(x: f32) -> f64 {
    tanh_with(x, approx7_exp2)
}

#[inline]
pub fn approx8_tanh(x: f32) -> f64 {
    tanh_with(x, approx8_exp2)
}

#[inline]
pub fn approx9_tanh(x: f32) -> f64 {
    tanh_with(x, approx9_exp2)
}

/// `atan(x) / (PI / 2)` with an absolute error below 0.01.
#[inline]
pub fn approx_atan1(x: f64) -> f64 {
    const N1: f64 = 0.411_568_755_219_516_025_064_872_463_099_08;
    const N2: f64 = 1.009_127_254_279_002_558_607_966_355_915_8;
    const D1: f64 = 0.819_011_568_570_818_414_418_906_032_355_99;
    if x < 0.0 {
        let numerator = x * N1 - N2;
        let denominator = (x * D1 - 1.0) * x + N2;
        -1.0 - numerator / denominator
    } else {
        let numerator = x * -N1 - N2;
        let denominator = (x * D1 + 1.0) * x + N2;
        1.0 + numerator / denominator
    }
}

/// Prescale factor for `approx_atan1(x * prescale)` from a linear boost in
/// `[0, 1]`: 0.5 yields 1.0, the ends yield 1/100 and 100.
pub fn approx_atan1_prescale(boost_amount: f64) -> f64 {
    const MAX_BOOST: f64 = 100.0;
    const RECIP_TAN_1_DIV_0_75: f64 = 0.242_029_426_955_186_677_058_249_904_427_66;
    if !(0.0..=1.0).contains(&boost_amount) {
        return 1.0;
    }
    let centered = boost_amount * 2.0 - 1.0;
    MAX_BOOST.powf((centered / 0.75).tan() * RECIP_TAN_1_DIV_0_75)
}

const QC_A: f64 = 1.204_601_247_903_694_689_877_156_332_989_29;
const QC_B: f64 = 0.204_601_247_903_694_689_877_156_332_989_29;

/// Upper right quadrant of a circle over `[0, 1]`.
#[inline]
pub fn approx_qcircle1(x: f64) -> f64 {
    (QC_A * x - QC_A) / (x - QC_A)
}

/// Upper left quadrant.
#[inline]
pub fn approx_qcircle2(x: f64) -> f64 {
    QC_A * x / (x + QC_B)
}

/// Lower left quadrant.
#[inline]
pub fn approx_qcircle3(x: f64) -> f64 {
    (QC_B - QC_B * x) / (x + QC_B)
}

/// Lower right quadrant.
#[inline]
pub fn approx_qcircle4(x: f64) -> f64 {
    -QC_B * x / (x - QC_A)
}

/// Clamps to `[-limit, limit]` with arithmetic only.
#[inline]
pub fn saturate_hard(value: f64, limit: f64) -> f64 {
    let v1 = (value + limit).abs();
    let v2 = (value - limit).abs();
    0.5 * (v1 - v2)
}

#[inline]
pub fn saturate_branching(value: f64, limit: f64) -> f64 {
    if value >= limit {
        limit
    } else if value <= -limit {
        -limit
    } else {
        value
    }
}

static CENT_TABLE: Lazy<[f64; 201]> = Lazy::new(|| {
    let mut table = [0.0; 201];
    for (index, slot) in table.iter_mut().enumerate() {
        let cents = index as f64 - MAX_FINE_TUNE as f64;
        *slot = (cents / 1200.0).exp2();
    }
    table
});

/// Frequency factor for a fine tune in cents, clamped to `-100..=100`.
#[inline]
pub fn cent_tune_fast(fine_tune: i32) -> f64 {
    let clamped = fine_tune.clamp(-MAX_FINE_TUNE, MAX_FINE_TUNE);
    CENT_TABLE[(clamped + MAX_FINE_TUNE) as usize]
}

/// Frequency factor for a transposition in semitones (equal temperament).
pub fn transpose_factor(semitones: i32) -> f64 {
    (semitones as f64 / 12.0).exp2()
}
