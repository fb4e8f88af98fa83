//! Pulse Code Modulation (RZ and NRZ).
//!
//! `short_width` is the nominal width of a pulse, `long_width` the width of a
//! bit period (equal widths mean NRZ, where runs of ones are not separated by
//! gaps). Each pulse contributes a run of ones rounded to bit periods, the
//! trailing gap a run of zeros.

use super::DemodEvents;
use crate::bitbuffer::BitBuffer;
use crate::device::Device;
use crate::pulse::PulseData;

pub fn pcm(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    let mut out = DemodEvents::default();
    let mut bits = BitBuffer::new();

    for n in 0..pulses.num_pulses() {
        // Number of high bit periods (1 for RZ, possibly many for NRZ)
        let highs = (pulses.pulse[n] as f32 * dev.f_short_width + 0.5) as i32;
        // Number of low bit periods in the rest of the symbol (pulse + gap)
        let lows =
            ((pulses.pulse[n] + pulses.gap[n]) as f32 * dev.f_long_width + 0.5) as i32 - highs;

        for _ in 0..highs {
            bits.add_bit(true);
        }
        for _ in 0..lows.max(0) {
            bits.add_bit(false);
        }

        // End of message: no more pulses (FSK) or a reset-length silence (OOK)
        let last = n == pulses.num_pulses() - 1;
        if (last || pulses.gap[n] as f32 > dev.s_reset_limit) && !bits.is_empty() {
            out.absorb(dev.run_decoder(&bits));
            bits.clear();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demod::Modulation;
    use crate::device::tests::capture_decoder;

    fn nrz_device(bit_width: f32) -> Device {
        let mut dev = Device::new("pcm test", Modulation::FskPcm);
        dev.short_width = bit_width;
        dev.long_width = bit_width;
        dev.reset_limit = bit_width * 64.0;
        dev.update_timings(1_000_000); // 1 sample per µs
        dev
    }

    #[test]
    fn nrz_runs_expand_to_bit_counts() {
        let (decoder, seen) = capture_decoder();
        let mut dev = nrz_device(100.0);
        dev.decoder = Some(decoder);

        // 3 bit periods high, 2 low, 1 high, end of stream
        let mut pulses = PulseData::new();
        pulses.sample_rate = 1_000_000;
        pulses.pulse = vec![300, 100];
        pulses.gap = vec![200, 0];

        let out = pcm(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().expect("decoder ran");
        assert_eq!(bits.num_rows(), 1);
        assert_eq!(bits.bits_per_row(0), 6);
        assert_eq!(bits.byte(0, 0), 0b1110_0100);
    }

    #[test]
    fn rz_pulse_is_single_one() {
        let (decoder, seen) = capture_decoder();
        let mut dev = Device::new("pcm rz", Modulation::OokPcmRz);
        dev.short_width = 100.0;
        dev.long_width = 400.0;
        dev.reset_limit = 3000.0;
        dev.update_timings(1_000_000);
        dev.decoder = Some(decoder);

        // pulse + gap spanning one symbol: 1 followed by 0s to the period
        let mut pulses = PulseData::new();
        pulses.pulse = vec![100, 100];
        pulses.gap = vec![300, 4000];

        let out = pcm(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        // each symbol: one 1 and zero-fill to the 400 µs period
        assert_eq!(bits.bits_per_row(0), 2 + 9); // second gap rounds to 10 periods
        assert!(bits.bit(0, 0));
        assert!(bits.bit(0, 1));
        assert!(!bits.bit(0, 2));
    }
}
