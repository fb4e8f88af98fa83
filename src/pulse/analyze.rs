//! Pulse analyzer: given an unknown package, build width histograms, guess
//! the modulation, log a flex-decoder spec for it, and attempt a trial
//! demodulation.

use super::PulseData;
use crate::demod::{self, Modulation};
use crate::device::Device;

const MAX_HIST_BINS: usize = 16;

/// 20% tolerance still discerns between pulse widths 0.33, 0.66, 1.0.
const TOLERANCE: f32 = 0.2;

/// Histogram bin over integer widths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistBin {
    pub count: u32,
    pub sum: i64,
    pub mean: i32,
    pub min: i32,
    pub max: i32,
}

/// Width histogram with up to 16 bins. A value matches a bin when
/// `|x - mean| < tolerance * max(x, mean)`; otherwise a new bin opens.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    bins: Vec<HistBin>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn bin(&self, index: usize) -> &HistBin {
        &self.bins[index]
    }

    /// Accumulate widths (unsorted bins, in first-seen order).
    pub fn sum(&mut self, data: &[u32], tolerance: f32) {
        for &x in data {
            let x = x as i32;
            let matched = self
                .bins
                .iter()
                .position(|bin| (x - bin.mean).abs() < (tolerance * x.max(bin.mean) as f32) as i32);
            match matched {
                Some(i) => {
                    let bin = &mut self.bins[i];
                    bin.count += 1;
                    bin.sum += x as i64;
                    bin.mean = (bin.sum / bin.count as i64) as i32;
                    bin.min = bin.min.min(x);
                    bin.max = bin.max.max(x);
                }
                None if self.bins.len() < MAX_HIST_BINS => {
                    self.bins.push(HistBin {
                        count: 1,
                        sum: x as i64,
                        mean: x,
                        min: x,
                        max: x,
                    });
                }
                None => {}
            }
        }
    }

    pub fn delete_bin(&mut self, index: usize) {
        if index < self.bins.len() {
            self.bins.remove(index);
        }
    }

    /// Fuse pairs of bins whose means lie within tolerance of each other.
    pub fn fuse_bins(&mut self, tolerance: f32) {
        let mut n = 0;
        while n + 1 < self.bins.len() {
            let mut m = n + 1;
            while m < self.bins.len() {
                let (bn, bm) = (self.bins[n].mean, self.bins[m].mean);
                if (bn - bm).abs() < (tolerance * bn.max(bm) as f32) as i32 {
                    let other = self.bins[m];
                    let bin = &mut self.bins[n];
                    bin.count += other.count;
                    bin.sum += other.sum;
                    bin.mean = (bin.sum / bin.count as i64) as i32;
                    bin.min = bin.min.min(other.min);
                    bin.max = bin.max.max(other.max);
                    self.bins.remove(m);
                    // compare the fused bin at the same place again
                } else {
                    m += 1;
                }
            }
            n += 1;
        }
    }

    pub fn sort_by_mean(&mut self) {
        self.bins.sort_by_key(|b| b.mean);
    }

    pub fn sort_by_count(&mut self) {
        self.bins.sort_by_key(|b| b.count);
    }

    fn log(&self, sample_rate: u32) {
        let to_us = 1e6 / sample_rate as f64;
        for (n, bin) in self.bins.iter().enumerate() {
            tracing::info!(
                " [{:2}] count: {:4},  width: {:4.0} us [{:.0};{:.0}]\t({:4} S)",
                n,
                bin.count,
                bin.mean as f64 * to_us,
                bin.min as f64 * to_us,
                bin.max as f64 * to_us,
                bin.mean
            );
        }
    }
}

/// Analyze one package: log the width distributions, guess the modulation,
/// log the matching flex-decoder spec, attempt a trial demodulation (with no
/// decoder attached, so matched rows land in the debug log). Returns the
/// guessed device, timings populated in both µs and sample space.
pub fn pulse_analyzer(data: &mut PulseData) -> Option<Device> {
    if data.num_pulses() == 0 {
        return None;
    }
    let to_ms = 1e3 / data.sample_rate as f64;
    let to_us = 1e6 / data.sample_rate as f64;

    // Pulse period data; the last gap does not count into the total.
    let mut periods: Vec<u32> = Vec::with_capacity(data.num_pulses());
    let mut total_period: i64 = 0;
    for n in 0..data.num_pulses() {
        periods.push(data.pulse[n] + data.gap[n]);
        total_period += (data.pulse[n] + data.gap[n]) as i64;
    }
    total_period -= data.gap[data.num_pulses() - 1] as i64;

    let mut hist_pulses = Histogram::new();
    let mut hist_gaps = Histogram::new();
    let mut hist_periods = Histogram::new();
    hist_pulses.sum(&data.pulse, TOLERANCE);
    hist_gaps.sum(&data.gap[..data.num_pulses() - 1], TOLERANCE); // leave out the end gap
    hist_periods.sum(&periods[..periods.len() - 1], TOLERANCE);
    hist_pulses.fuse_bins(TOLERANCE);
    hist_gaps.fuse_bins(TOLERANCE);
    hist_periods.fuse_bins(TOLERANCE);

    tracing::info!("analyzing pulses...");
    tracing::info!(
        "total count: {:4},  width: {:.2} ms\t\t({:5} S)",
        data.num_pulses(),
        total_period as f64 * to_ms,
        total_period
    );
    tracing::info!("pulse width distribution:");
    hist_pulses.log(data.sample_rate);
    tracing::info!("gap width distribution:");
    hist_gaps.log(data.sample_rate);
    tracing::info!("pulse period distribution:");
    hist_periods.log(data.sample_rate);
    tracing::info!(
        "level estimates [high, low]: {:6}, {:6}",
        data.ook_high_estimate,
        data.ook_low_estimate
    );
    tracing::info!(
        "rssi: {:.1} dB snr: {:.1} dB noise: {:.1} dB",
        data.rssi_db,
        data.snr_db,
        data.noise_db
    );
    tracing::info!(
        "frequency offsets [F1, F2]: {:6}, {:6}\t({:+.1} kHz, {:+.1} kHz)",
        data.fsk_f1_est,
        data.fsk_f2_est,
        data.fsk_f1_est as f64 / i16::MAX as f64 * data.sample_rate as f64 / 2.0 / 1000.0,
        data.fsk_f2_est as f64 / i16::MAX as f64 * data.sample_rate as f64 / 2.0 / 1000.0
    );

    hist_pulses.sort_by_mean(); // easier to work with sorted data
    hist_gaps.sort_by_mean();
    if !hist_pulses.is_empty() && hist_pulses.bin(0).mean == 0 {
        // Remove the FSK initial zero-pulse artifact
        hist_pulses.delete_bin(0);
    }

    let mut device = Device::new("Analyzer Device", Modulation::Unknown);

    if data.num_pulses() == 1 {
        tracing::info!("guessing modulation: single pulse detected; frequency shift keying or just noise...");
    } else if hist_pulses.len() == 1 && hist_gaps.len() == 1 {
        tracing::info!("guessing modulation: un-modulated signal, maybe a preamble...");
    } else if hist_pulses.len() == 1 && hist_gaps.len() > 1 {
        tracing::info!("guessing modulation: pulse position modulation with fixed pulse width");
        device.modulation = Modulation::OokPpm;
        device.s_short_width = hist_gaps.bin(0).mean as f32;
        device.s_long_width = hist_gaps.bin(1).mean as f32;
        device.s_gap_limit = hist_gaps.bin(1).max as f32 + 1.0; // above the next lower gap
        device.s_reset_limit = hist_gaps.bin(hist_gaps.len() - 1).max as f32 + 1.0; // above the biggest gap
    } else if hist_pulses.len() == 2 && hist_gaps.len() == 1 {
        tracing::info!("guessing modulation: pulse width modulation with fixed gap");
        device.modulation = Modulation::OokPwm;
        device.s_short_width = hist_pulses.bin(0).mean as f32;
        device.s_long_width = hist_pulses.bin(1).mean as f32;
        device.s_tolerance = (device.s_long_width - device.s_short_width) * 0.4;
        device.s_reset_limit = hist_gaps.bin(hist_gaps.len() - 1).max as f32 + 1.0;
    } else if hist_pulses.len() == 2 && hist_gaps.len() == 2 && hist_periods.len() == 1 {
        tracing::info!("guessing modulation: pulse width modulation with fixed period");
        device.modulation = Modulation::OokPwm;
        device.s_short_width = hist_pulses.bin(0).mean as f32;
        device.s_long_width = hist_pulses.bin(1).mean as f32;
        device.s_tolerance = (device.s_long_width - device.s_short_width) * 0.4;
        device.s_reset_limit = hist_gaps.bin(hist_gaps.len() - 1).max as f32 + 1.0;
    } else if hist_pulses.len() == 2 && hist_gaps.len() == 2 && hist_periods.len() == 3 {
        tracing::info!("guessing modulation: manchester coding");
        device.modulation = Modulation::OokManchesterZerobit;
        // the shortest pulse is half a period
        device.s_short_width = hist_pulses.bin(0).mean.min(hist_pulses.bin(1).mean) as f32;
        device.s_long_width = 0.0; // not used
        device.s_reset_limit = hist_gaps.bin(hist_gaps.len() - 1).max as f32 + 1.0;
    } else if hist_pulses.len() == 2 && hist_gaps.len() >= 3 {
        tracing::info!("guessing modulation: pulse width modulation with multiple packets");
        device.modulation = Modulation::OokPwm;
        device.s_short_width = hist_pulses.bin(0).mean as f32;
        device.s_long_width = hist_pulses.bin(1).mean as f32;
        device.s_gap_limit = hist_gaps.bin(1).max as f32 + 1.0; // above the second gap
        device.s_tolerance = (device.s_long_width - device.s_short_width) * 0.4;
        device.s_reset_limit = hist_gaps.bin(hist_gaps.len() - 1).max as f32 + 1.0;
    } else if hist_pulses.len() >= 3
        && hist_gaps.len() >= 3
        && is_multiple(hist_pulses.bin(1).mean, hist_pulses.bin(0).mean, 2)
        && is_multiple(hist_pulses.bin(2).mean, hist_pulses.bin(0).mean, 3)
        && is_multiple(hist_gaps.bin(0).mean, hist_pulses.bin(0).mean, 1)
        && is_multiple(hist_gaps.bin(1).mean, hist_pulses.bin(0).mean, 2)
        && is_multiple(hist_gaps.bin(2).mean, hist_pulses.bin(0).mean, 3)
    {
        tracing::info!("guessing modulation: pulse code modulation (not return to zero)");
        device.modulation = Modulation::FskPcm;
        device.s_short_width = hist_pulses.bin(0).mean as f32; // the shortest pulse is the bit width
        device.s_long_width = hist_pulses.bin(0).mean as f32; // bit period equals pulse length (NRZ)
        device.s_reset_limit = hist_pulses.bin(0).mean as f32 * 1024.0; // no limit to runs of zeros...
    } else if hist_pulses.len() == 3 {
        tracing::info!("guessing modulation: pulse width modulation with sync/delimiter");
        // the lowest-count pulse width is most likely the sync
        hist_pulses.sort_by_count();
        let p1 = hist_pulses.bin(1).mean as f32;
        let p2 = hist_pulses.bin(2).mean as f32;
        device.modulation = Modulation::OokPwm;
        device.s_short_width = p1.min(p2);
        device.s_long_width = p1.max(p2);
        device.s_sync_width = hist_pulses.bin(0).mean as f32;
        device.s_reset_limit = hist_gaps.bin(hist_gaps.len() - 1).max as f32 + 1.0;
    } else {
        tracing::info!("guessing modulation: no clue...");
    }

    if device.modulation == Modulation::Unknown {
        return None;
    }

    // mirror the sample-space guesses back into µs so the device could be
    // registered at a different sample rate
    device.short_width = (device.s_short_width as f64 * to_us) as f32;
    device.long_width = (device.s_long_width as f64 * to_us) as f32;
    device.gap_limit = (device.s_gap_limit as f64 * to_us) as f32;
    device.reset_limit = (device.s_reset_limit as f64 * to_us) as f32;
    device.sync_width = (device.s_sync_width as f64 * to_us) as f32;
    device.tolerance = (device.s_tolerance as f64 * to_us) as f32;
    device.f_short_width = 1.0 / device.s_short_width;
    device.f_long_width = if device.s_long_width > 0.0 {
        1.0 / device.s_long_width
    } else {
        0.0
    };

    tracing::info!(
        "attempting demodulation... short_width: {:.0}, long_width: {:.0}, reset_limit: {:.0}, sync_width: {:.0}",
        device.short_width,
        device.long_width,
        device.reset_limit,
        device.sync_width
    );
    match device.modulation {
        Modulation::FskPcm => {
            tracing::info!(
                "use a flex decoder with -X 'n=name,m=FSK_PCM,s={:.0},l={:.0},r={:.0}'",
                device.short_width,
                device.long_width,
                device.reset_limit
            );
            demod::pcm(data, &mut device);
        }
        Modulation::OokPpm => {
            tracing::info!(
                "use a flex decoder with -X 'n=name,m=OOK_PPM,s={:.0},l={:.0},g={:.0},r={:.0}'",
                device.short_width,
                device.long_width,
                device.gap_limit,
                device.reset_limit
            );
            let last = data.num_pulses() - 1;
            data.gap[last] = device.s_reset_limit as u32 + 1; // be sure to terminate the package
            demod::ppm(data, &mut device);
        }
        Modulation::OokPwm => {
            tracing::info!(
                "use a flex decoder with -X 'n=name,m=OOK_PWM,s={:.0},l={:.0},r={:.0},g={:.0},t={:.0},y={:.0}'",
                device.short_width,
                device.long_width,
                device.reset_limit,
                device.gap_limit,
                device.tolerance,
                device.sync_width
            );
            let last = data.num_pulses() - 1;
            data.gap[last] = device.s_reset_limit as u32 + 1;
            demod::pwm(data, &mut device);
        }
        Modulation::OokManchesterZerobit => {
            tracing::info!(
                "use a flex decoder with -X 'n=name,m=OOK_MC_ZEROBIT,s={:.0},l={:.0},r={:.0}'",
                device.short_width,
                device.long_width,
                device.reset_limit
            );
            let last = data.num_pulses() - 1;
            data.gap[last] = device.s_reset_limit as u32 + 1;
            demod::manchester_zerobit(data, &mut device);
        }
        _ => tracing::info!("unsupported"),
    }

    Some(device)
}

/// Whether `mean` is the `factor`-th multiple of `base`, within `base/8`.
fn is_multiple(mean: i32, base: i32, factor: i32) -> bool {
    (mean - factor * base).abs() <= base / 8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(pulse: Vec<u32>, gap: Vec<u32>) -> PulseData {
        let mut data = PulseData::new();
        data.sample_rate = 250_000;
        data.pulse = pulse;
        data.gap = gap;
        data
    }

    #[test]
    fn histogram_fuses_nearby_widths_to_one_bin() {
        let mut hist = Histogram::new();
        hist.sum(&[100, 102, 98, 101, 103], TOLERANCE);
        hist.fuse_bins(TOLERANCE);
        assert_eq!(hist.len(), 1);
        assert_eq!(hist.bin(0).count, 5);
        assert!((hist.bin(0).mean - 100).abs() <= 1); // 504/5 = 100.8, truncated
        assert_eq!(hist.bin(0).min, 98);
        assert_eq!(hist.bin(0).max, 103);
    }

    #[test]
    fn histogram_separates_distinct_widths() {
        let mut hist = Histogram::new();
        hist.sum(&[100, 500, 102, 505, 98], TOLERANCE);
        hist.fuse_bins(TOLERANCE);
        assert_eq!(hist.len(), 2);
    }

    #[test]
    fn fuse_merges_adjacent_created_bins() {
        // 100 and 115 open separate paths depending on order; fusing must
        // leave a single bin since the means sit within 20%.
        let mut hist = Histogram::new();
        hist.sum(&[100], TOLERANCE);
        hist.sum(&[130], 0.01); // force a second bin
        hist.fuse_bins(0.3);
        assert_eq!(hist.len(), 1);
        assert_eq!(hist.bin(0).count, 2);
    }

    #[test]
    fn classifies_bare_ppm() {
        // fixed 50-sample pulses, alternating 100/500 gaps
        let mut data = package(
            vec![50; 8],
            vec![100, 500, 100, 500, 100, 500, 100, 2800],
        );
        let device = pulse_analyzer(&mut data).expect("a guess");
        assert_eq!(device.modulation, Modulation::OokPpm);
        assert!((device.s_short_width - 100.0).abs() <= 2.0);
        assert!((device.s_long_width - 500.0).abs() <= 2.0);
        // terminal gap was forced beyond the reset limit
        assert!(data.gap[7] as f32 > device.s_reset_limit);
    }

    #[test]
    fn classifies_pwm_fixed_gap() {
        let mut data = package(
            vec![100, 300, 100, 300, 300, 100],
            vec![200, 200, 200, 200, 200, 2000],
        );
        let device = pulse_analyzer(&mut data).expect("a guess");
        assert_eq!(device.modulation, Modulation::OokPwm);
        assert!((device.s_short_width - 100.0).abs() <= 2.0);
        assert!((device.s_long_width - 300.0).abs() <= 2.0);
        assert!(device.s_tolerance > 0.0);
    }

    #[test]
    fn classifies_pwm_with_sync() {
        // three pulse widths; the rare 900 is the delimiter
        let mut data = package(
            vec![100, 300, 100, 300, 900, 100, 300, 100],
            vec![200, 210, 190, 205, 200, 195, 205, 2000],
        );
        let device = pulse_analyzer(&mut data).expect("a guess");
        assert_eq!(device.modulation, Modulation::OokPwm);
        assert!((device.s_sync_width - 900.0).abs() <= 2.0);
        assert!((device.s_short_width - 100.0).abs() <= 2.0);
        assert!((device.s_long_width - 300.0).abs() <= 2.0);
    }

    #[test]
    fn classifies_fsk_pcm_multiples() {
        // pulses and gaps at 1x/2x/3x of 40 samples
        let mut data = package(
            vec![40, 80, 120, 40, 80, 120, 40, 40],
            vec![40, 80, 120, 40, 80, 120, 40, 0],
        );
        let device = pulse_analyzer(&mut data).expect("a guess");
        assert_eq!(device.modulation, Modulation::FskPcm);
        assert!((device.s_short_width - 40.0).abs() <= 2.0);
        assert!((device.s_long_width - 40.0).abs() <= 2.0);
    }

    #[test]
    fn single_pulse_yields_no_guess() {
        let mut data = package(vec![50], vec![3000]);
        assert!(pulse_analyzer(&mut data).is_none());
    }

    #[test]
    fn unmodulated_preamble_yields_no_guess() {
        let mut data = package(vec![100; 6], vec![100, 100, 100, 100, 100, 3000]);
        assert!(pulse_analyzer(&mut data).is_none());
    }

    #[test]
    fn ppm_guess_feeds_back_through_demodulator() {
        use crate::demod;
        let mut data = package(
            vec![50; 8],
            vec![100, 500, 100, 500, 100, 500, 100, 2800],
        );
        let mut device = pulse_analyzer(&mut data).expect("a guess");
        let (decoder, seen) = crate::device::tests::capture_decoder();
        device.decoder = Some(decoder);
        let out = demod::ppm(&data, &mut device);
        assert!(out.events >= 1, "trial demod produced no rows");
        let bits = seen.lock().unwrap().clone().unwrap();
        assert_eq!(bits.bits_per_row(0), 7); // 0101010 from alternating gaps
    }
}
