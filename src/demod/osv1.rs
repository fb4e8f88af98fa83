//! Oregon Scientific v1 pulse width framing.
//!
//! The transmission is a preamble of 12 half-bit pulses, a sync gap of at
//! least two bit periods, then Manchester-coded data where the accumulated
//! half-bit count decides whether a pulse edge is a clock or a data
//! transition. `short_width` is the half-bit width.

use super::DemodEvents;
use crate::bitbuffer::BitBuffer;
use crate::device::Device;
use crate::pulse::PulseData;

pub fn osv1(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    let mut out = DemodEvents::default();
    let halfbit_min = dev.s_short_width / 2.0;
    let halfbit_max = dev.s_short_width * 1.5;
    let sync_min = 2.0 * halfbit_max;

    // preamble: half-bit pulses until the sync gap
    let mut preamble = 0;
    let mut n = 0;
    while n < pulses.num_pulses() {
        let (p, g) = (pulses.pulse[n] as f32, pulses.gap[n] as f32);
        if p > halfbit_min && g > halfbit_min {
            preamble += 1;
            if g > sync_min {
                break;
            }
        } else {
            return out; // stray width, not an OSv1 frame
        }
        n += 1;
    }
    if preamble != 12 {
        tracing::debug!("osv1: preamble count {} != 12", preamble);
        return out;
    }

    // data: Manchester decode on half-bit accumulation. A long pulse or gap
    // (more than 1.5 half-bits) lands on a bit boundary and flips the level.
    let mut bits = BitBuffer::new();
    let mut halfbits = 0u32;
    n += 1;
    while n < pulses.num_pulses() {
        let (p, g) = (pulses.pulse[n] as f32, pulses.gap[n] as f32);
        for (w, lvl) in [(p, true), (g, false)] {
            let count = if w > halfbit_max { 2 } else { 1 };
            for _ in 0..count {
                halfbits += 1;
                if halfbits % 2 == 0 {
                    // second half of a bit period: the level here IS the bit
                    // (Manchester: low-to-high = 1 in the v1 convention)
                    bits.add_bit(lvl);
                }
            }
        }
        if g > dev.s_reset_limit {
            break;
        }
        n += 1;
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

    fn osv1_device() -> Device {
        let mut dev = Device::new("osv1 test", Modulation::OokPwmOsv1);
        dev.short_width = 1_000.0;
        dev.reset_limit = 30_000.0;
        dev.update_timings(1_000_000);
        dev
    }

    fn preamble(pulses: &mut PulseData) {
        for _ in 0..11 {
            pulses.pulse.push(1_000);
            pulses.gap.push(1_000);
        }
        pulses.pulse.push(1_000);
        pulses.gap.push(4_000); // sync gap
    }

    #[test]
    fn rejects_wrong_preamble_count() {
        let (decoder, seen) = capture_decoder();
        let mut dev = osv1_device();
        dev.decoder = Some(decoder);

        let mut pulses = PulseData::new();
        for _ in 0..8 {
            pulses.pulse.push(1_000);
            pulses.gap.push(1_000);
        }
        pulses.pulse.push(1_000);
        pulses.gap.push(4_000);
        pulses.pulse.push(1_000);
        pulses.gap.push(40_000);

        let out = osv1(&pulses, &mut dev);
        assert_eq!(out.events, 0);
        assert!(seen.lock().unwrap().is_none());
    }

    #[test]
    fn decodes_after_valid_preamble() {
        let (decoder, seen) = capture_decoder();
        let mut dev = osv1_device();
        dev.decoder = Some(decoder);

        let mut pulses = PulseData::new();
        preamble(&mut pulses);
        // a few alternating data cycles
        for _ in 0..4 {
            pulses.pulse.push(1_000);
            pulses.gap.push(1_000);
        }
        pulses.pulse.push(1_000);
        pulses.gap.push(40_000);

        let out = osv1(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        assert!(bits.bits_per_row(0) >= 4);
    }
}
