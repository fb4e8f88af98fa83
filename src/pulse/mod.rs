//! Pulse packages: the unit of decoding.
//!
//! A [`PulseData`] is one detected package - parallel pulse/gap width arrays
//! in samples plus timing, level and carrier estimates. The pipeline owns two
//! of these (OOK and FSK) and reuses them across packages.

pub mod analyze;
pub mod detect;

use std::io::{self, BufRead, Write};

/// Maximum number of pulses per package.
pub const PD_MAX_PULSES: usize = 1200;
/// Minimum number of pulses before an FSK package is accepted.
pub const PD_MIN_PULSES: usize = 16;
/// Pulses and gaps shorter than this many samples are spurious.
pub const PD_MIN_PULSE_SAMPLES: u32 = 10;
/// End-of-package when the gap exceeds this many times the largest pulse...
pub const PD_MAX_GAP_RATIO: u32 = 10;
/// ...but only if the gap also exceeds this many milliseconds...
pub const PD_MIN_GAP_MS: u32 = 10;
/// ...and unconditionally when the gap exceeds this many milliseconds.
pub const PD_MAX_GAP_MS: u32 = 100;

/// One detected pulse package.
#[derive(Debug, Clone, Default)]
pub struct PulseData {
    /// Absolute sample index where the package begins.
    pub offset: u64,
    /// Sample rate that produced this package.
    pub sample_rate: u32,
    /// Samples elapsed since the package began, referenced to end of block.
    pub start_ago: u32,
    /// Samples elapsed since the package ended, referenced to end of block.
    pub end_ago: u32,
    /// Pulse widths in samples. `pulse.len()` is the pulse count.
    pub pulse: Vec<u32>,
    /// Gap widths in samples, parallel to `pulse`. The final gap may be zero
    /// (end of stream) or the actual terminal gap.
    pub gap: Vec<u32>,
    /// Envelope low (noise floor) estimate at end of package.
    pub ook_low_estimate: i32,
    /// Envelope high estimate at end of package.
    pub ook_high_estimate: i32,
    /// Signed-15 frequency-deviation estimate of the F1 tone; carrier offset
    /// estimate for pure OOK packages.
    pub fsk_f1_est: i32,
    /// Signed-15 frequency-deviation estimate of the F2 tone; 0 for pure OOK.
    pub fsk_f2_est: i32,
    /// Absolute carrier frequency (center + F1 deviation), set post-detection.
    pub freq1_hz: f32,
    /// Absolute carrier frequency (center + F2 deviation), set post-detection.
    pub freq2_hz: f32,
    pub rssi_db: f32,
    pub snr_db: f32,
    pub noise_db: f32,
}

impl PulseData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pulses in the package.
    pub fn num_pulses(&self) -> usize {
        self.pulse.len()
    }

    /// Reset everything; capacity is kept so packages reuse their allocations.
    pub fn clear(&mut self) {
        let (mut pulse, mut gap) = (std::mem::take(&mut self.pulse), std::mem::take(&mut self.gap));
        pulse.clear();
        gap.clear();
        *self = Self::default();
        self.pulse = pulse;
        self.gap = gap;
    }

    /// Log the package at debug level, one line per pulse/gap pair.
    pub fn debug_print(&self) {
        tracing::debug!("pulse data: {} pulses", self.num_pulses());
        for n in 0..self.num_pulses() {
            tracing::debug!(
                "[{:3}] pulse: {:4}, gap: {:4}, period: {:4}",
                n,
                self.pulse[n],
                self.gap[n],
                self.pulse[n] + self.gap[n]
            );
        }
    }

    /// Overlay this package onto a two-bit-per-sample logic buffer. `bits` is
    /// OR-ed over every pulse (0x02 for OOK, 0x04 for FSK), 0x01 marks the
    /// whole frame.
    pub fn dump_raw(&self, buf: &mut [u8], buf_offset: u64, bits: u8) {
        let mut pos = self.offset as i64 - buf_offset as i64;
        for n in 0..self.num_pulses() {
            bounded_fill(buf, pos, self.pulse[n] as i64, 0x01 | bits);
            pos += self.pulse[n] as i64;
            bounded_fill(buf, pos, self.gap[n] as i64, 0x01);
            pos += self.gap[n] as i64;
        }
    }

    // ── Text dump format ─────────────────────────────────────────────────
    // `;`-prefixed header lines, then one "pulse gap" pair per line in
    // microseconds, closed by ";end". Loadable back for replay.

    /// Write the text-format header once per output file.
    pub fn print_pulse_header(w: &mut dyn Write, sample_rate: u32) -> io::Result<()> {
        writeln!(w, ";pulse data")?;
        writeln!(w, ";version 1")?;
        writeln!(w, ";timescale 1us")?;
        writeln!(w, ";samplerate {}", sample_rate)
    }

    /// Append this package in text format.
    pub fn dump_text(&self, w: &mut dyn Write) -> io::Result<()> {
        let to_us = 1e6 / self.sample_rate as f64;
        if self.fsk_f2_est != 0 {
            writeln!(
                w,
                ";fsk {} pulses, f1 {}, f2 {}",
                self.num_pulses(),
                self.fsk_f1_est,
                self.fsk_f2_est
            )?;
        } else {
            writeln!(w, ";ook {} pulses", self.num_pulses())?;
        }
        for n in 0..self.num_pulses() {
            writeln!(
                w,
                "{:.0} {:.0}",
                self.pulse[n] as f64 * to_us,
                self.gap[n] as f64 * to_us
            )?;
        }
        writeln!(w, ";end")
    }

    /// Read the next package from a text-format stream. Returns a package
    /// with zero pulses at end of input.
    pub fn load_text(&mut self, r: &mut dyn BufRead, sample_rate: u32) -> io::Result<()> {
        self.clear();
        self.sample_rate = sample_rate;
        let per_us = sample_rate as f64 / 1e6;
        let mut line = String::new();
        loop {
            line.clear();
            if r.read_line(&mut line)? == 0 {
                return Ok(()); // end of input
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix(';') {
                if rest.starts_with("end") {
                    return Ok(());
                }
                if let Some(fsk) = rest.strip_prefix("fsk ") {
                    // recover the estimates so replay dispatches to FSK demods
                    let mut it = fsk.split(',').skip(1);
                    self.fsk_f1_est = parse_trailing_int(it.next()).unwrap_or(0);
                    self.fsk_f2_est = parse_trailing_int(it.next()).unwrap_or(0);
                }
                continue;
            }
            let mut it = line.split_whitespace();
            let (Some(p), Some(g)) = (it.next(), it.next()) else {
                continue;
            };
            let (Ok(p), Ok(g)) = (p.parse::<f64>(), g.parse::<f64>()) else {
                tracing::warn!("bad pulse line in text input: {:?}", line);
                continue;
            };
            if self.num_pulses() < PD_MAX_PULSES {
                self.pulse.push((p * per_us).round() as u32);
                self.gap.push((g * per_us).round() as u32);
            }
        }
    }
}

fn parse_trailing_int(s: Option<&str>) -> Option<i32> {
    s.and_then(|s| s.split_whitespace().last()).and_then(|v| v.parse().ok())
}

fn bounded_fill(buf: &mut [u8], offset: i64, len: i64, bits: u8) {
    let (mut offset, mut len) = (offset, len);
    if offset < 0 {
        len += offset;
        offset = 0;
    }
    if offset + len > buf.len() as i64 {
        len = buf.len() as i64 - offset;
    }
    for b in buf.iter_mut().skip(offset as usize).take(len.max(0) as usize) {
        *b |= bits;
    }
}

// ── Value-Change-Dump ────────────────────────────────────────────────────────

/// VCD header: timescale 1 µs up to 500 kHz, 100 ns above; wires FRAME/AM/FM.
pub fn print_vcd_header(w: &mut dyn Write, sample_rate: u32) -> io::Result<()> {
    let timescale = if sample_rate <= 500_000 { "1 us" } else { "100 ns" };
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(w, "$date {} $end", now)?;
    writeln!(w, "$version rx433 {} $end", env!("CARGO_PKG_VERSION"))?;
    writeln!(w, "$comment Acquisition at {} Hz $end", sample_rate)?;
    writeln!(w, "$timescale {} $end", timescale)?;
    writeln!(w, "$scope module rx433 $end")?;
    writeln!(w, "$var wire 1 / FRAME $end")?;
    writeln!(w, "$var wire 1 ' AM $end")?;
    writeln!(w, "$var wire 1 \" FM $end")?;
    writeln!(w, "$upscope $end")?;
    writeln!(w, "$enddefinitions $end")?;
    writeln!(w, "#0 0/ 0' 0\"")
}

/// Append one package to a VCD stream. `ch_id` is `'` for OOK, `"` for FSK.
pub fn print_vcd(w: &mut dyn Write, data: &PulseData, ch_id: char, sample_rate: u32) -> io::Result<()> {
    let scale = if sample_rate <= 500_000 {
        1_000_000.0 / sample_rate as f64
    } else {
        10_000_000.0 / sample_rate as f64
    };
    let mut pos = data.offset;
    for n in 0..data.num_pulses() {
        if n == 0 {
            writeln!(w, "#{:.0} 1/ 1{}", pos as f64 * scale, ch_id)?;
        } else {
            writeln!(w, "#{:.0} 1{}", pos as f64 * scale, ch_id)?;
        }
        pos += data.pulse[n] as u64;
        writeln!(w, "#{:.0} 0{}", pos as f64 * scale, ch_id)?;
        pos += data.gap[n] as u64;
    }
    if data.num_pulses() > 0 {
        writeln!(w, "#{:.0} 0/", pos as f64 * scale)?;
    }
    Ok(())
}
