//! Pulse Position Modulation: fixed pulse width, the gap length carries the
//! bit. Short gap = 0, long gap = 1. A gap above `gap_limit` breaks the row
//! (multi-packet transmissions); a gap above `reset_limit` ends the message.

use super::DemodEvents;
use crate::bitbuffer::BitBuffer;
use crate::device::Device;
use crate::pulse::PulseData;

pub fn ppm(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    let mut out = DemodEvents::default();
    let mut bits = BitBuffer::new();
    // threshold between short and long gap
    let symbol_mid = (dev.s_short_width + dev.s_long_width) / 2.0;

    for n in 0..pulses.num_pulses() {
        let gap = pulses.gap[n] as f32;
        if gap < symbol_mid {
            bits.add_bit(false);
        } else if dev.s_gap_limit <= 0.0 || gap < dev.s_gap_limit {
            bits.add_bit(true);
        } else if gap < dev.s_reset_limit {
            bits.add_row(); // new packet in a multipacket transmission
        }

        // End of message: a reset-length gap, or no more pulses
        let last = n == pulses.num_pulses() - 1;
        if (gap >= dev.s_reset_limit || last) && !bits.is_empty() {
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

    fn ppm_device() -> Device {
        let mut dev = Device::new("ppm test", Modulation::OokPpm);
        dev.short_width = 100.0;
        dev.long_width = 500.0;
        dev.gap_limit = 1700.0;
        dev.reset_limit = 10_000.0;
        dev.update_timings(1_000_000);
        dev
    }

    #[test]
    fn short_and_long_gaps_decode_to_bits() {
        let (decoder, seen) = capture_decoder();
        let mut dev = ppm_device();
        dev.decoder = Some(decoder);

        let mut pulses = PulseData::new();
        pulses.pulse = vec![50; 8];
        pulses.gap = vec![100, 500, 100, 500, 500, 100, 100, 11_000];

        let out = ppm(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        assert_eq!(bits.num_rows(), 1);
        assert_eq!(bits.bits_per_row(0), 7); // terminal gap ends the message
        assert_eq!(bits.byte(0, 0), 0b0101_1000); // 0101100 zero-padded
    }

    #[test]
    fn gap_limit_breaks_rows() {
        let (decoder, seen) = capture_decoder();
        let mut dev = ppm_device();
        dev.decoder = Some(decoder);

        let mut pulses = PulseData::new();
        pulses.pulse = vec![50; 5];
        pulses.gap = vec![100, 100, 2000, 500, 11_000];

        let out = ppm(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        assert_eq!(bits.num_rows(), 2);
        assert_eq!(bits.bits_per_row(0), 2);
        assert_eq!(bits.bits_per_row(1), 1);
        assert!(bits.bit(1, 0));
    }
}
