//! Line-code demodulators: stateless functions mapping a pulse package to
//! bit rows plus an event count.
//!
//! Each function walks the pulse/gap widths of one [`PulseData`], classifies
//! widths against the device's sample-space timings, accumulates bits into a
//! [`BitBuffer`], and hands completed messages to the device decoder on
//! end-of-message (reset gap, or no more pulses). Width matching is
//! `|actual - expected| < tolerance` in samples.

mod manchester;
mod osv1;
mod pcm;
mod piwm;
mod ppm;
mod pwm;

pub use manchester::{dmc, manchester_zerobit};
pub use osv1::osv1;
pub use pcm::pcm;
pub use piwm::{piwm_dc, piwm_raw};
pub use ppm::ppm;
pub use pwm::pwm;

use crate::data::DataRecord;
use crate::device::Device;
use crate::pulse::PulseData;

/// The line code and carrier family of a device, dispatched by match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    /// Pulse Code Modulation, Return-to-Zero. Pulse = 1, no pulse = 0.
    OokPcmRz,
    /// Pulse Position Modulation. Short gap = 0, long gap = 1.
    OokPpm,
    /// Pulse Width Modulation. Short pulse = 1, long pulse = 0.
    OokPwm,
    /// Manchester with hardcoded zerobit. Rising edge = 0, falling edge = 1.
    OokManchesterZerobit,
    /// Pulse Interval Width, raw. Level shift per bit, short interval = 1.
    OokPiwmRaw,
    /// Pulse Interval Width, differential-coded variant.
    OokPiwmDc,
    /// Differential Manchester: level shift within the clock cycle.
    OokDmc,
    /// Pulse Width Modulation, Oregon Scientific v1 preamble/sync framing.
    OokPwmOsv1,
    /// FSK Pulse Code Modulation (NRZ or RZ by short/long widths).
    FskPcm,
    /// FSK Pulse Width Modulation.
    FskPwm,
    /// FSK Manchester with hardcoded zerobit.
    FskManchesterZerobit,
    /// Pseudo-modulation of the unknown-signal path; never demodulated.
    Unknown,
}

impl Modulation {
    /// Devices in the FSK family need the FM discriminator running.
    pub fn is_fsk(self) -> bool {
        matches!(
            self,
            Modulation::FskPcm | Modulation::FskPwm | Modulation::FskManchesterZerobit
        )
    }
}

/// Result of one demodulation pass: decode event count and the records the
/// device produced, in arrival order.
#[derive(Debug, Default)]
pub struct DemodEvents {
    pub events: u32,
    pub records: Vec<DataRecord>,
}

impl DemodEvents {
    pub(crate) fn absorb(&mut self, (events, records): (u32, Vec<DataRecord>)) {
        self.events += events;
        self.records.extend(records);
    }
}

/// Demodulate one OOK package against a single device.
pub fn demod_ook(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    match dev.modulation {
        Modulation::OokPcmRz => pcm(pulses, dev),
        Modulation::OokPpm => ppm(pulses, dev),
        Modulation::OokPwm => pwm(pulses, dev),
        Modulation::OokManchesterZerobit | Modulation::FskManchesterZerobit => {
            // FSK Manchester devices also run on OOK packages; some senders
            // key the carrier hard enough to register on the envelope.
            manchester_zerobit(pulses, dev)
        }
        Modulation::OokPiwmRaw => piwm_raw(pulses, dev),
        Modulation::OokPiwmDc => piwm_dc(pulses, dev),
        Modulation::OokDmc => dmc(pulses, dev),
        Modulation::OokPwmOsv1 => osv1(pulses, dev),
        Modulation::FskPcm | Modulation::FskPwm => DemodEvents::default(),
        Modulation::Unknown => {
            tracing::warn!("unknown modulation in protocol {:?}", dev.name);
            DemodEvents::default()
        }
    }
}

/// Demodulate one FSK package against a single device.
pub fn demod_fsk(pulses: &PulseData, dev: &mut Device) -> DemodEvents {
    match dev.modulation {
        Modulation::FskPcm => pcm(pulses, dev),
        Modulation::FskPwm => pwm(pulses, dev),
        Modulation::FskManchesterZerobit => manchester_zerobit(pulses, dev),
        Modulation::OokPcmRz
        | Modulation::OokPpm
        | Modulation::OokPwm
        | Modulation::OokManchesterZerobit
        | Modulation::OokPiwmRaw
        | Modulation::OokPiwmDc
        | Modulation::OokDmc
        | Modulation::OokPwmOsv1 => DemodEvents::default(),
        Modulation::Unknown => {
            tracing::warn!("unknown modulation in protocol {:?}", dev.name);
            DemodEvents::default()
        }
    }
}
