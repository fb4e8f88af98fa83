//! Adaptive pulse detection: OOK envelope detector with an overlaid FSK
//! frequency detector.
//!
//! The detector segments the continuous AM + FM sample streams into discrete
//! [`PulseData`] packages. One call consumes samples until a package completes
//! or the block runs dry; the caller drains a block by re-invoking until
//! `None` ("out of data"). All estimator state persists between blocks.
//!
//! OOK key design: a very slow noise-floor estimator (only while idle), a fast
//! high-level estimator (only during pulses), threshold at the midpoint with
//! ±12% hysteresis, and spurious-pulse/gap suppression below
//! [`PD_MIN_PULSE_SAMPLES`].
//!
//! FSK key design: FSK packages appear to the OOK side as one long pulse
//! because the carrier never drops. An inner detector therefore runs only
//! during the first OOK pulse, priming an F1 estimate and splitting the run
//! into pulse (F1) / gap (F2) intervals once the deviation exceeds half of
//! [`FSK_DEFAULT_FM_DELTA`]. If it has produced enough pulses by the time the
//! envelope finally drops, the package is emitted as FSK instead.

use super::{PulseData, PD_MAX_GAP_MS, PD_MAX_GAP_RATIO, PD_MAX_PULSES, PD_MIN_GAP_MS, PD_MIN_PULSES, PD_MIN_PULSE_SAMPLES};

// OOK adaptive level estimator constants
/// Default ratio between high and low (noise) level.
const OOK_HIGH_LOW_RATIO: i32 = 8;
/// Minimum estimate of high level.
pub const OOK_MIN_HIGH_LEVEL: i32 = 1000;
/// Maximum estimate for high level (a unit phasor is 128, anything above is overdrive).
pub const OOK_MAX_HIGH_LEVEL: i32 = 128 * 128;
/// Slowness of the OOK high level estimator.
const OOK_EST_HIGH_RATIO: i32 = 64;
/// Slowness of the OOK low level (noise) estimator (very slow).
pub const OOK_EST_LOW_RATIO: i32 = 1024;

// FSK adaptive frequency estimator constants
/// Default estimate for frequency delta.
pub const FSK_DEFAULT_FM_DELTA: i32 = 6000;
/// Slowness of the FSK estimators.
const FSK_EST_RATIO: i32 = 32;

/// Which kind of package a detect call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseClass {
    Ook,
    Fsk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum OokState {
    #[default]
    Idle,
    Pulse,
    GapStart,
    Gap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FskState {
    /// Initial frequency estimation.
    #[default]
    Init,
    /// High frequency (pulse).
    F1,
    /// Low frequency (gap).
    F2,
    /// Absorbing error state until the outer detector resets.
    Error,
}

/// Inner FSK detector state, active only during the first OOK pulse.
#[derive(Debug, Clone, Copy, Default)]
struct FskDetect {
    state: FskState,
    pulse_length: u32,
    f1_est: i32,
    f2_est: i32,
}

impl FskDetect {
    /// Feed one FM sample. Pulses land on the higher frequency (F1), gaps on
    /// the lower (F2). Spurious runs shorter than [`PD_MIN_PULSE_SAMPLES`]
    /// are coalesced back into the neighbouring interval.
    fn detect(&mut self, fm_n: i16, fsk_pulses: &mut PulseData) {
        let fm_n = fm_n as i32;
        let f1_delta = (fm_n - self.f1_est).abs();
        let f2_delta = (fm_n - self.f2_est).abs();
        self.pulse_length += 1;

        match self.state {
            FskState::Init => {
                if self.pulse_length < PD_MIN_PULSE_SAMPLES {
                    // Quick initial estimator
                    self.f1_est = self.f1_est / 2 + fm_n / 2;
                } else if f1_delta > FSK_DEFAULT_FM_DELTA / 2 {
                    if fm_n > self.f1_est {
                        // Positive deviation: the initial interval was the low
                        // side, so it becomes a leading gap with a zero pulse.
                        self.state = FskState::F1;
                        self.f2_est = self.f1_est;
                        self.f1_est = fm_n;
                        fsk_pulses.pulse.push(0);
                        fsk_pulses.gap.push(self.pulse_length);
                        self.pulse_length = 0;
                    } else {
                        // Negative deviation: the initial interval was a pulse.
                        self.state = FskState::F2;
                        self.f2_est = fm_n;
                        fsk_pulses.pulse.push(self.pulse_length);
                        self.pulse_length = 0;
                    }
                } else {
                    self.f1_est += fm_n / FSK_EST_RATIO - self.f1_est / FSK_EST_RATIO;
                }
            }
            FskState::F1 => {
                // Closer to F2 than F1?
                if f1_delta > f2_delta {
                    self.state = FskState::F2;
                    if self.pulse_length >= PD_MIN_PULSE_SAMPLES {
                        fsk_pulses.pulse.push(self.pulse_length);
                        self.pulse_length = 0;
                    } else {
                        // Spurious: rewind into the previous gap
                        self.pulse_length += fsk_pulses.gap.pop().unwrap_or(0);
                        // Back at the initial interval, and it was a gap?
                        if fsk_pulses.gap.is_empty() && fsk_pulses.pulse.first() == Some(&0) {
                            fsk_pulses.pulse.pop();
                            self.f1_est = self.f2_est;
                            self.state = FskState::Init;
                        }
                    }
                } else {
                    self.f1_est += fm_n / FSK_EST_RATIO - self.f1_est / FSK_EST_RATIO;
                }
            }
            FskState::F2 => {
                // Closer to F1 than F2?
                if f2_delta > f1_delta {
                    self.state = FskState::F1;
                    if self.pulse_length >= PD_MIN_PULSE_SAMPLES {
                        fsk_pulses.gap.push(self.pulse_length);
                        self.pulse_length = 0;
                        if fsk_pulses.num_pulses() >= PD_MAX_PULSES {
                            tracing::warn!("FSK detect: maximum number of pulses reached");
                            self.state = FskState::Error;
                        }
                    } else {
                        // Spurious: rewind into the previous pulse
                        self.pulse_length += fsk_pulses.pulse.pop().unwrap_or(0);
                        if fsk_pulses.pulse.is_empty() {
                            self.state = FskState::Init;
                        }
                    }
                } else {
                    self.f2_est += fm_n / FSK_EST_RATIO - self.f2_est / FSK_EST_RATIO;
                }
            }
            FskState::Error => {}
        }
    }

    /// Store the interval in flight at end of package.
    fn wrap_up(&mut self, fsk_pulses: &mut PulseData) {
        if fsk_pulses.num_pulses() < PD_MAX_PULSES {
            self.pulse_length += 1;
            if self.state == FskState::F1 {
                fsk_pulses.pulse.push(self.pulse_length);
                fsk_pulses.gap.push(0); // zero gap at end
            } else {
                fsk_pulses.gap.push(self.pulse_length);
            }
        }
    }
}

/// Stateful dual-channel pulse detector. Owned by the pipeline; estimator
/// state carries across sample blocks.
#[derive(Debug, Default)]
pub struct PulseDetector {
    ook_state: OokState,
    /// Counter for the current pulse or gap run.
    pulse_length: u32,
    /// Largest pulse seen in the current package.
    max_pulse: u32,
    /// Resume position inside the current block across calls.
    data_counter: usize,
    /// Lead-in before any pulse is accepted, so the noise estimate settles.
    lead_in_counter: i32,
    ook_low_estimate: i32,
    ook_high_estimate: i32,
    fsk: FskDetect,
}

impl PulseDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current envelope estimates, for diagnostics.
    pub fn estimates(&self) -> (i32, i32) {
        (self.ook_low_estimate, self.ook_high_estimate)
    }

    /// Demodulate OOK and FSK packages from one block of envelope + FM data.
    ///
    /// Returns `Some(PulseClass)` when a package completed (the matching
    /// destination buffer is populated) or `None` when the block is consumed.
    /// Internal state advances to the first unprocessed sample, so the caller
    /// re-invokes with the same block to drain it.
    #[allow(clippy::too_many_arguments)]
    pub fn detect(
        &mut self,
        am_buf: &[i16],
        fm_buf: &[i16],
        len: usize,
        level_limit: u16,
        sample_rate: u32,
        sample_offset: u64,
        pulses: &mut PulseData,
        fsk_pulses: &mut PulseData,
    ) -> Option<PulseClass> {
        let samples_per_ms = sample_rate / 1000;
        self.ook_high_estimate = self.ook_high_estimate.max(OOK_MIN_HIGH_LEVEL);

        if self.data_counter == 0 {
            // age the pulse data if this is a fresh buffer
            pulses.start_ago = pulses.start_ago.saturating_add(len as u32);
            fsk_pulses.start_ago = fsk_pulses.start_ago.saturating_add(len as u32);
        }

        while self.data_counter < len {
            let am_n = am_buf[self.data_counter] as i32;
            let mut ook_threshold =
                self.ook_low_estimate + (self.ook_high_estimate - self.ook_low_estimate) / 2;
            if level_limit != 0 {
                ook_threshold = level_limit as i32; // manual override
            }
            let ook_hysteresis = ook_threshold / 8; // ±12%

            match self.ook_state {
                OokState::Idle => {
                    if am_n > ook_threshold + ook_hysteresis
                        && self.lead_in_counter > OOK_EST_LOW_RATIO
                    {
                        // New pulse: initialize both packages
                        pulses.clear();
                        fsk_pulses.clear();
                        pulses.offset = sample_offset + self.data_counter as u64;
                        fsk_pulses.offset = pulses.offset;
                        pulses.sample_rate = sample_rate;
                        fsk_pulses.sample_rate = sample_rate;
                        pulses.start_ago = (len - self.data_counter) as u32;
                        fsk_pulses.start_ago = pulses.start_ago;
                        self.pulse_length = 0;
                        self.max_pulse = 0;
                        self.fsk = FskDetect::default();
                        self.ook_state = OokState::Pulse;
                    } else {
                        // Estimate low (noise) level
                        let ook_low_delta = am_n - self.ook_low_estimate;
                        self.ook_low_estimate += ook_low_delta / OOK_EST_LOW_RATIO;
                        // compensate for lack of fixed-point scaling
                        self.ook_low_estimate += if ook_low_delta > 0 { 1 } else { -1 };
                        self.ook_high_estimate = (OOK_HIGH_LOW_RATIO * self.ook_low_estimate)
                            .clamp(OOK_MIN_HIGH_LEVEL, OOK_MAX_HIGH_LEVEL);
                        if self.lead_in_counter <= OOK_EST_LOW_RATIO {
                            self.lead_in_counter += 1;
                        }
                    }
                }
                OokState::Pulse => {
                    self.pulse_length += 1;
                    if am_n < ook_threshold - ook_hysteresis {
                        // End of pulse
                        if self.pulse_length < PD_MIN_PULSE_SAMPLES {
                            self.ook_state = OokState::Idle; // spurious
                        } else {
                            pulses.pulse.push(self.pulse_length);
                            self.max_pulse = self.max_pulse.max(self.pulse_length);
                            self.pulse_length = 0;
                            self.ook_state = OokState::GapStart;
                        }
                    } else {
                        self.ook_high_estimate += am_n / OOK_EST_HIGH_RATIO
                            - self.ook_high_estimate / OOK_EST_HIGH_RATIO;
                        self.ook_high_estimate = self
                            .ook_high_estimate
                            .clamp(OOK_MIN_HIGH_LEVEL, OOK_MAX_HIGH_LEVEL);
                        // Estimate pulse carrier frequency
                        let fm_n = fm_buf[self.data_counter] as i32;
                        pulses.fsk_f1_est +=
                            fm_n / OOK_EST_HIGH_RATIO - pulses.fsk_f1_est / OOK_EST_HIGH_RATIO;
                    }
                    // FSK demodulation, only during the first pulse
                    if pulses.gap.is_empty() {
                        self.fsk.detect(fm_buf[self.data_counter], fsk_pulses);
                    }
                }
                OokState::GapStart => {
                    self.pulse_length += 1;
                    if am_n > ook_threshold + ook_hysteresis {
                        // Spurious short gap: restore the pulse in flight
                        self.pulse_length += pulses.pulse.pop().unwrap_or(0);
                        self.ook_state = OokState::Pulse;
                    } else if self.pulse_length >= PD_MIN_PULSE_SAMPLES {
                        self.ook_state = OokState::Gap;
                        // Did the inner detector see an FSK package?
                        // (completed pulse/gap pairs, i.e. stored gaps)
                        if fsk_pulses.gap.len() > PD_MIN_PULSES {
                            self.fsk.wrap_up(fsk_pulses);
                            fsk_pulses.fsk_f1_est = self.fsk.f1_est;
                            fsk_pulses.fsk_f2_est = self.fsk.f2_est;
                            fsk_pulses.ook_low_estimate = self.ook_low_estimate;
                            fsk_pulses.ook_high_estimate = self.ook_high_estimate;
                            pulses.end_ago = (len - self.data_counter) as u32;
                            fsk_pulses.end_ago = pulses.end_ago;
                            self.ook_state = OokState::Idle;
                            return Some(PulseClass::Fsk);
                        }
                    }
                    // FSK demodulation continues through a short gap - the
                    // envelope may come right back.
                    if pulses.gap.is_empty() {
                        self.fsk.detect(fm_buf[self.data_counter], fsk_pulses);
                    }
                }
                OokState::Gap => {
                    self.pulse_length += 1;
                    if am_n > ook_threshold + ook_hysteresis {
                        // New pulse: the gap is complete
                        pulses.gap.push(self.pulse_length);

                        if pulses.num_pulses() >= PD_MAX_PULSES {
                            self.ook_state = OokState::Idle;
                            pulses.ook_low_estimate = self.ook_low_estimate;
                            pulses.ook_high_estimate = self.ook_high_estimate;
                            pulses.end_ago = (len - self.data_counter) as u32;
                            return Some(PulseClass::Ook);
                        }

                        self.pulse_length = 0;
                        self.ook_state = OokState::Pulse;
                    }

                    // End of package if the gap is too long
                    if (self.pulse_length > PD_MAX_GAP_RATIO * self.max_pulse
                        && self.pulse_length > PD_MIN_GAP_MS * samples_per_ms)
                        || self.pulse_length > PD_MAX_GAP_MS * samples_per_ms
                    {
                        pulses.gap.push(self.pulse_length);
                        self.ook_state = OokState::Idle;
                        pulses.ook_low_estimate = self.ook_low_estimate;
                        pulses.ook_high_estimate = self.ook_high_estimate;
                        pulses.end_ago = (len - self.data_counter) as u32;
                        return Some(PulseClass::Ook);
                    }
                }
            }
            self.data_counter += 1;
        }

        self.data_counter = 0;
        None // out of data
    }
}
