//! Pulse Interval Width Modulation: every level shift is a bit boundary and
//! the interval width carries the bit, short = 1, long = 0.
//!
//! [`piwm_raw`]: intervals may span several short widths; each contributes
//! that many repeated bits (pulses = 1, gaps = 0).
//!
//! [`piwm_dc`]: strictly differential-coded, one bit per interval.

use super::DemodEvents;
use crate::bitbuffer::BitBuffer;
use crate::device::Device;
use crate::pulse::PulseData;

fn interleave(pulses: &PulseData) -> Vec<f32> {
    let mut symbols = Vec::with_capacity(pulses.num_pulses() * 2);
    for n in 0..pulses.num_pulses() {
        symbols.push(pulses.pulse[n] as f32);
        symbols.push(pulses.gap[n] as f32);
    }
    symbols
}

pub fn piwm_raw(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    let mut out = DemodEvents::default();
    let mut bits = BitBuffer::new();
    let symbols = interleave(pulses);

    for (n, &w) in symbols.iter().enumerate() {
        // number of short widths this interval spans
        let count = (w * dev.f_short_width + 0.5) as i32;
        if count > 0 && (w - count as f32 * dev.s_short_width).abs() < dev.s_tolerance {
            // even index = pulse = run of ones, odd = gap = run of zeros
            for _ in 0..count {
                bits.add_bit(n % 2 == 0);
            }
        } else if w >= dev.s_reset_limit - dev.s_tolerance && !bits.is_empty() {
            // End of message
            out.absorb(dev.run_decoder(&bits));
            bits.clear();
        }
    }
    if !bits.is_empty() {
        out.absorb(dev.run_decoder(&bits));
    }
    out
}

pub fn piwm_dc(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    let mut out = DemodEvents::default();
    let mut bits = BitBuffer::new();
    let symbols = interleave(pulses);

    for &w in &symbols {
        if (w - dev.s_short_width).abs() < dev.s_tolerance {
            bits.add_bit(true);
        } else if (w - dev.s_long_width).abs() < dev.s_tolerance {
            bits.add_bit(false);
        } else if w >= dev.s_reset_limit - dev.s_tolerance && !bits.is_empty() {
            // End of message
            out.absorb(dev.run_decoder(&bits));
            bits.clear();
        }
    }
    if !bits.is_empty() {
        out.absorb(dev.run_decoder(&bits));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demod::Modulation;
    use crate::device::tests::capture_decoder;

    #[test]
    fn raw_intervals_expand_to_runs() {
        let (decoder, seen) = capture_decoder();
        let mut dev = Device::new("piwm raw", Modulation::OokPiwmRaw);
        dev.short_width = 100.0;
        dev.long_width = 100.0;
        dev.tolerance = 30.0;
        dev.reset_limit = 1_000.0;
        dev.update_timings(1_000_000);
        dev.decoder = Some(decoder);

        // pulse 200 = 11, gap 100 = 0, pulse 100 = 1, reset gap (off the
        // short-width grid so it cannot read as a run)
        let mut pulses = PulseData::new();
        pulses.pulse = vec![200, 100];
        pulses.gap = vec![100, 1_550];

        let out = piwm_raw(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        assert_eq!(bits.bits_per_row(0), 4);
        assert_eq!(bits.byte(0, 0), 0b1101_0000);
    }

    #[test]
    fn dc_one_bit_per_interval() {
        let (decoder, seen) = capture_decoder();
        let mut dev = Device::new("piwm dc", Modulation::OokPiwmDc);
        dev.short_width = 100.0;
        dev.long_width = 250.0;
        dev.tolerance = 40.0;
        dev.reset_limit = 1_000.0;
        dev.update_timings(1_000_000);
        dev.decoder = Some(decoder);

        // 100 (1), 250 (0), 100 (1), 100 (1), reset
        let mut pulses = PulseData::new();
        pulses.pulse = vec![100, 100];
        pulses.gap = vec![250, 100];
        pulses.pulse.push(100);
        pulses.gap.push(1_500);

        let out = piwm_dc(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        assert_eq!(bits.bits_per_row(0), 5);
        assert_eq!(bits.byte(0, 0), 0b1011_1000);
    }
}
