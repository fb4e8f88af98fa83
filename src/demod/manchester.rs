//! Manchester decoders.
//!
//! [`manchester_zerobit`]: IEEE 802.3 convention clocked at `short_width`
//! half-bits, rising edge = 0, falling edge = 1, with the first half-bit
//! hardcoded to zero (the convention several OOK sensor families transmit).
//! Edges more than 1.5 half-bit periods after the previous recorded bit are
//! data edges; closer edges are mid-bit clock transitions.
//!
//! [`dmc`]: Differential Manchester - a level shift within the clock cycle
//! encodes the bit; short interval = 1, long interval = 0, and a missing
//! expected short half is a coding error that breaks the row.

use super::DemodEvents;
use crate::bitbuffer::BitBuffer;
use crate::device::Device;
use crate::pulse::PulseData;

pub fn manchester_zerobit(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    let mut out = DemodEvents::default();
    let mut bits = BitBuffer::new();
    let mut time_since_last = 0f32;

    // First rising edge is always counted as a zero (hardcoded zerobit)
    bits.add_bit(false);

    for n in 0..pulses.num_pulses() {
        // Falling edge is at the end of the pulse
        if pulses.pulse[n] as f32 + time_since_last > dev.s_short_width * 1.5 {
            // more than 1.5 half-bits since the last recorded bit: data edge
            bits.add_bit(true);
            time_since_last = 0.0;
        } else {
            time_since_last += pulses.pulse[n] as f32;
        }

        let gap = pulses.gap[n] as f32;
        let last = n == pulses.num_pulses() - 1;
        if gap > dev.s_reset_limit || last {
            // End of message
            out.absorb(dev.run_decoder(&bits));
            bits.clear();
            bits.add_bit(false); // prime the next message's zerobit
            time_since_last = 0.0;
        } else if gap + time_since_last > dev.s_short_width * 1.5 {
            // Rising edge at the end of the gap is a data edge
            bits.add_bit(false);
            time_since_last = 0.0;
        } else {
            time_since_last += gap;
        }
    }
    out
}

pub fn dmc(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    let mut out = DemodEvents::default();
    let mut bits = BitBuffer::new();

    // interleave pulses and gaps into one symbol stream
    let mut symbols = Vec::with_capacity(pulses.num_pulses() * 2);
    for n in 0..pulses.num_pulses() {
        symbols.push(pulses.pulse[n] as f32);
        symbols.push(pulses.gap[n] as f32);
    }

    let mut n = 0;
    while n < symbols.len() {
        let w = symbols[n];
        if (w - dev.s_short_width).abs() < dev.s_tolerance {
            // Short - 1, and the second short half of the cycle must follow
            bits.add_bit(true);
            n += 1;
            if n < symbols.len() && (symbols[n] - dev.s_short_width).abs() >= dev.s_tolerance {
                if symbols[n] >= dev.s_reset_limit - dev.s_tolerance {
                    // don't expect another short half at end of message
                    n -= 1;
                } else if bits.bits_per_row(bits.num_rows().saturating_sub(1)) > 0 {
                    bits.add_row(); // coding error
                }
            }
        } else if (w - dev.s_long_width).abs() < dev.s_tolerance {
            // Long - 0
            bits.add_bit(false);
        } else if w >= dev.s_reset_limit - dev.s_tolerance && !bits.is_empty() {
            // End of message
            out.absorb(dev.run_decoder(&bits));
            bits.clear();
        }
        n += 1;
    }
    // Terminal zero gap of an FSK package also ends the message
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
    fn zerobit_decodes_alternating_clock() {
        let (decoder, seen) = capture_decoder();
        let mut dev = Device::new("mc test", Modulation::OokManchesterZerobit);
        dev.short_width = 100.0;
        dev.reset_limit = 2_000.0;
        dev.update_timings(1_000_000);
        dev.decoder = Some(decoder);

        // After the forced zero: edges more than 1.5 half-bits after the last
        // recorded bit are data edges, falling = 1, rising = 0.
        let mut pulses = PulseData::new();
        pulses.pulse = vec![100, 200, 100, 100];
        pulses.gap = vec![100, 100, 200, 3_000];

        let out = manchester_zerobit(&pulses, &mut dev);
        assert_eq!(out.events, 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        // forced 0, rising 0, falling 1, falling 1, rising 0
        assert_eq!(bits.bits_per_row(0), 5);
        assert_eq!(bits.byte(0, 0), 0b0011_0000);
    }

    #[test]
    fn dmc_short_pairs_and_longs() {
        let (decoder, seen) = capture_decoder();
        let mut dev = Device::new("dmc test", Modulation::OokDmc);
        dev.short_width = 100.0;
        dev.long_width = 200.0;
        dev.tolerance = 30.0;
        dev.reset_limit = 1_000.0;
        dev.update_timings(1_000_000);
        dev.decoder = Some(decoder);

        // short+short = 1, long = 0, long = 0, short+short = 1, reset
        let mut pulses = PulseData::new();
        pulses.pulse = vec![100, 200, 100];
        pulses.gap = vec![100, 200, 100];
        // stream: 100 100 200 200 100 100 -> 1 0 0 1 plus trailing flush
        let extra_reset = 2_000;
        pulses.pulse.push(extra_reset);
        pulses.gap.push(0);

        let out = dmc(&pulses, &mut dev);
        assert!(out.events >= 1);
        let bits = seen.lock().unwrap().clone().unwrap();
        assert_eq!(bits.bits_per_row(0), 4);
        assert_eq!(bits.byte(0, 0), 0b1001_0000);
    }
}
