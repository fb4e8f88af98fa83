//! Baseband DSP: per-sample transforms over one I/Q block.
//!
//! Two paths run over the same block:
//! - **AM**: envelope detection → single-pole IIR low-pass → AM buffer
//!   (signed-15, ≈[0, 16384]) for the OOK side of the pulse detector.
//! - **FM**: phase discriminator (`x[n]·conj(x[n-1])` → `arg`) → the same
//!   low-pass → FM buffer (signed-15 frequency samples, ±32767 = ±π rad/sample)
//!   for the FSK side.
//!
//! Filter and discriminator state persists between blocks; the structs here
//! are owned by the pipeline and carried across calls.

use num_complex::Complex;

/// Fixed-point scale for the low-pass coefficients.
const F_SCALE: i32 = 15;
/// Low-pass pole, `a = [1, 0.96907]` in Q15.
const LP_A1: i32 = (0.96907 * (1 << F_SCALE) as f64) as i32;
/// Low-pass zeros, `b = [0.015466, 0.015466]` in Q15.
const LP_B: i32 = (0.015466 * (1 << F_SCALE) as f64) as i32;

/// State of the single-pole low-pass filter (one previous input, one output).
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterState {
    x_old: i32,
    y_old: i32,
}

/// State of the FM discriminator: the previous I/Q sample plus its own
/// low-pass state for the frequency output.
#[derive(Debug, Default, Clone, Copy)]
pub struct FmDemodState {
    prev: Complex<f32>,
    lp: FilterState,
}

/// Envelope detection for CU8 I/Q data.
///
/// Cheap L1 magnitude `|I - 128| + |Q - 128|`, scaled so that a full-scale
/// phasor (128 on one axis) lands at 16384, the detector's working ceiling.
pub fn envelope_detect_cu8(iq_buf: &[u8], y_buf: &mut [i16], num_samples: usize) {
    for n in 0..num_samples {
        let i = (iq_buf[2 * n] as i32 - 128).abs();
        let q = (iq_buf[2 * n + 1] as i32 - 128).abs();
        y_buf[n] = ((i + q) << 6).min(i16::MAX as i32) as i16;
    }
}

/// Magnitude estimate for CS16 I/Q data.
///
/// Alpha-max-plus-beta-min approximation `max + min/2`, halved so a full-scale
/// axis phasor (32767) lands at 16383. Diagonal overdrive may exceed that;
/// the detector clamps its high estimate anyway.
pub fn magnitude_est_cs16(iq_buf: &[i16], y_buf: &mut [i16], num_samples: usize) {
    for n in 0..num_samples {
        let i = (iq_buf[2 * n] as i32).abs();
        let q = (iq_buf[2 * n + 1] as i32).abs();
        let est = i.max(q) + i.min(q) / 2;
        y_buf[n] = ((est >> 1).min(i16::MAX as i32)) as i16;
    }
}

/// Apply the fixed-coefficient single-pole IIR low-pass in place of `x_buf`
/// into `y_buf`. One accumulator of state survives between blocks.
pub fn low_pass_filter(x_buf: &[i16], y_buf: &mut [i16], num_samples: usize, state: &mut FilterState) {
    let mut x_old = state.x_old;
    let mut y_old = state.y_old;
    for n in 0..num_samples {
        let x = x_buf[n] as i32;
        let y = (LP_A1 * y_old + LP_B * x + LP_B * x_old) >> F_SCALE;
        y_buf[n] = y as i16;
        x_old = x;
        y_old = y;
    }
    state.x_old = x_old;
    state.y_old = y_old;
}

/// FM demodulation of one CU8 block into signed-15 frequency samples.
///
/// For each consecutive pair, the phase difference is the argument of
/// `x[n]·conj(x[n-1])`; ±π rad/sample maps to ±32767. The output runs through
/// the same low-pass as the envelope so both detector inputs see matched group
/// delay.
pub fn fm_demod_cu8(iq_buf: &[u8], y_buf: &mut [i16], num_samples: usize, state: &mut FmDemodState) {
    let mut prev = state.prev;
    for n in 0..num_samples {
        let cur = Complex::new(
            iq_buf[2 * n] as f32 - 128.0,
            iq_buf[2 * n + 1] as f32 - 128.0,
        );
        y_buf[n] = phase_diff_s15(cur, prev);
        prev = cur;
    }
    state.prev = prev;
    let mut lp = state.lp;
    low_pass_self(y_buf, num_samples, &mut lp);
    state.lp = lp;
}

/// FM demodulation of one CS16 block. Same discriminator as
/// [`fm_demod_cu8`], inputs already signed.
pub fn fm_demod_cs16(iq_buf: &[i16], y_buf: &mut [i16], num_samples: usize, state: &mut FmDemodState) {
    let mut prev = state.prev;
    for n in 0..num_samples {
        let cur = Complex::new(iq_buf[2 * n] as f32, iq_buf[2 * n + 1] as f32);
        y_buf[n] = phase_diff_s15(cur, prev);
        prev = cur;
    }
    state.prev = prev;
    let mut lp = state.lp;
    low_pass_self(y_buf, num_samples, &mut lp);
    state.lp = lp;
}

#[inline]
fn phase_diff_s15(cur: Complex<f32>, prev: Complex<f32>) -> i16 {
    let d = cur * prev.conj();
    // arg() of the zero vector is 0, so a silent block demodulates to 0.
    (d.arg() / std::f32::consts::PI * 32767.0) as i16
}

fn low_pass_self(buf: &mut [i16], num_samples: usize, state: &mut FilterState) {
    let mut x_old = state.x_old;
    let mut y_old = state.y_old;
    for v in buf.iter_mut().take(num_samples) {
        let x = *v as i32;
        let y = (LP_A1 * y_old + LP_B * x + LP_B * x_old) >> F_SCALE;
        *v = y as i16;
        x_old = x;
        y_old = y;
    }
    state.x_old = x_old;
    state.y_old = y_old;
}
