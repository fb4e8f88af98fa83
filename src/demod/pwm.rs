//! Pulse Width Modulation: the pulse length carries the bit, short = 1,
//! long = 0. The trailing gap distinguishes data, sync, row break and message
//! end by crossing the `sync_width` / `gap_limit` / `reset_limit` thresholds.
//!
//! With `tolerance` set, widths match precisely (`|w - expected| < tolerance`)
//! and a `sync_width` pulse starts a new row; anything else is ignored as
//! noise. Without it, the pulse is classified by the short/long midpoint.

use super::DemodEvents;
use crate::bitbuffer::BitBuffer;
use crate::device::Device;
use crate::pulse::PulseData;

pub fn pwm(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    let mut out = DemodEvents::default();
    let mut bits = BitBuffer::new();

    for n in 0..pulses.num_pulses() {
        let w = pulses.pulse[n] as f32;
        if dev.s_tolerance > 0.0 {
            // precise matching
            if (w - dev.s_short_width).abs() < dev.s_tolerance {
                bits.add_bit(true);
            } else if (w - dev.s_long_width).abs() < dev.s_tolerance {
                bits.add_bit(false);
            } else if dev.s_sync_width > 0.0 && (w - dev.s_sync_width).abs() < dev.s_tolerance {
                bits.add_row(); // sync/delimiter pulse
            }
            // outside every window: ignore as noise
        } else {
            // midpoint classification
            if w < (dev.s_short_width + dev.s_long_width) / 2.0 {
                bits.add_bit(true);
            } else {
                bits.add_bit(false);
            }
        }

        let gap = pulses.gap[n] as f32;
        let last = n == pulses.num_pulses() - 1;
        if (gap > dev.s_reset_limit || last) && !bits.is_empty() {
            // End of message
            out.absorb(dev.run_decoder(&bits));
            bits.clear();
        } else if dev.s_gap_limit > 0.0 && gap > dev.s_gap_limit {
            // New packet in a multipacket transmission
            if bits.bits_per_row(bits.num_rows().saturating_sub(1)) > 0 {
                bits.add_row();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demod::Modulation;
    use crate::device::tests::capture_decoder;

    fn pwm_device() -> Device {
        let mut dev = Device::new("pwm test", Modulation::OokPwm);
        dev.short_width = 200.0;
        dev.long_width = 600.0;
        dev.reset_limit = 5_000.0;
        dev.update_timings(1_000_000);
        dev
    }

    #[test]
    fn midpoint_classification() {
        let (decoder, seen) = capture_decoder();
        let mut dev = pwm_device();
        dev.decoder = Some(decoder);

        let mut pulses = PulseData::new();
        pulses.pulse = vec![200, 600, 200, 200, 600];
        pulses.gap = vec![400, 400, 400, 400, 6_000];

        let out = pwm(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        assert_eq!(bits.bits_per_row(0), 5);
        assert_eq!(bits.byte(0, 0), 0b1011_0000);
    }

    #[test]
    fn sync_pulse_starts_new_row_with_tolerance() {
        let (decoder, seen) = capture_decoder();
        let mut dev = pwm_device();
        dev.sync_width = 1_200.0;
        dev.tolerance = 80.0;
        dev.update_timings(1_000_000);
        dev.decoder = Some(decoder);

        let mut pulses = PulseData::new();
        pulses.pulse = vec![200, 600, 1_200, 200, 3_000];
        pulses.gap = vec![400, 400, 400, 400, 6_000];

        let out = pwm(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        // the 3000-sample pulse matches nothing and is dropped
        assert_eq!(bits.num_rows(), 2);
        assert_eq!(bits.bits_per_row(0), 2);
        assert_eq!(bits.bits_per_row(1), 1);
    }

    #[test]
    fn gap_limit_breaks_rows() {
        let (decoder, seen) = capture_decoder();
        let mut dev = pwm_device();
        dev.gap_limit = 1_000.0;
        dev.update_timings(1_000_000);
        dev.decoder = Some(decoder);

        let mut pulses = PulseData::new();
        pulses.pulse = vec![200, 200, 600];
        pulses.gap = vec![400, 2_000, 6_000];

        let out = pwm(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        assert_eq!(bits.num_rows(), 2);
        assert_eq!(bits.bits_per_row(0), 2);
        assert_eq!(bits.bits_per_row(1), 1);
    }
}
