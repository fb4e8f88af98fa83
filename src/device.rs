//! Device descriptors: one per protocol, binding a line code, timing
//! parameters and a decode callback.
//!
//! Timing fields are in microseconds; the sample-space equivalents (`s_*`)
//! are recomputed by [`Device::update_timings`] whenever the sample rate
//! changes. Descriptors live for the lifetime of the pipeline.

use crate::bitbuffer::BitBuffer;
use crate::data::DataRecord;
use crate::demod::Modulation;

/// Classified decoder rejections, aggregated into the periodic stats record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFail {
    /// Catch-all rejection.
    Other = 0,
    /// Message length check failed.
    AbortLength = 1,
    /// Bailed out early, e.g. on a bad preamble.
    AbortEarly = 2,
    /// Message integrity check failed (checksum, CRC, parity).
    FailMic = 3,
    /// Sanity check on decoded values failed.
    FailSanity = 4,
}

/// A decode attempt either yields records (one event each) or a classified
/// rejection. An empty `Ok` means the bits were not for this device.
pub type DecodeResult = std::result::Result<Vec<DataRecord>, DecodeFail>;

/// A protocol's bit-level decoder. Implementations are table entries; state,
/// if any, lives behind interior mutability.
pub trait Decoder: Send {
    fn decode(&self, bits: &BitBuffer) -> DecodeResult;
}

/// Per-device decode statistics, flushed after each stats report.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceStats {
    /// Decoder invocations.
    pub events: u32,
    /// Invocations that produced at least one record.
    pub ok: u32,
    /// Total records produced.
    pub messages: u32,
    /// Rejections, indexed by [`DecodeFail`].
    pub fails: [u32; 5],
}

/// One protocol descriptor.
pub struct Device {
    pub name: String,
    /// 1-based table index, 0 for ad-hoc devices (flex, analyzer, pseudo).
    pub protocol_num: u32,
    /// 0 enabled, 1 disabled, 2 forced (stays enabled regardless of the
    /// user's selection set; reserved for pseudo-devices).
    pub disabled: u8,
    pub modulation: Modulation,

    // Timing in microseconds
    pub short_width: f32,
    pub long_width: f32,
    pub gap_limit: f32,
    pub reset_limit: f32,
    pub sync_width: f32,
    pub tolerance: f32,

    // Sample-space timing, derived by update_timings()
    pub(crate) s_short_width: f32,
    pub(crate) s_long_width: f32,
    pub(crate) s_gap_limit: f32,
    pub(crate) s_reset_limit: f32,
    pub(crate) s_sync_width: f32,
    pub(crate) s_tolerance: f32,
    /// Bits per sample at the short/long widths (for NRZ run expansion).
    pub(crate) f_short_width: f32,
    pub(crate) f_long_width: f32,

    /// The bit-level decode callback. `None` logs the rows instead (used by
    /// the analyzer's trial demodulation).
    pub decoder: Option<Box<dyn Decoder>>,
    /// Keys this device can produce, for the CSV schema.
    pub fields: Vec<String>,

    pub(crate) stats: DeviceStats,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("protocol_num", &self.protocol_num)
            .field("modulation", &self.modulation)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

impl Device {
    pub fn new(name: &str, modulation: Modulation) -> Self {
        Self {
            name: name.to_string(),
            protocol_num: 0,
            disabled: 0,
            modulation,
            short_width: 0.0,
            long_width: 0.0,
            gap_limit: 0.0,
            reset_limit: 0.0,
            sync_width: 0.0,
            tolerance: 0.0,
            s_short_width: 0.0,
            s_long_width: 0.0,
            s_gap_limit: 0.0,
            s_reset_limit: 0.0,
            s_sync_width: 0.0,
            s_tolerance: 0.0,
            f_short_width: 0.0,
            f_long_width: 0.0,
            decoder: None,
            fields: Vec::new(),
            stats: DeviceStats::default(),
        }
    }

    /// Recompute the sample-space timing fields for a sample rate.
    pub fn update_timings(&mut self, sample_rate: u32) {
        let samples_per_us = sample_rate as f32 / 1.0e6;
        self.f_short_width = 1.0 / (self.short_width * samples_per_us);
        self.f_long_width = 1.0 / (self.long_width * samples_per_us);
        self.s_short_width = self.short_width * samples_per_us;
        self.s_long_width = self.long_width * samples_per_us;
        self.s_gap_limit = self.gap_limit * samples_per_us;
        self.s_reset_limit = self.reset_limit * samples_per_us;
        self.s_sync_width = self.sync_width * samples_per_us;
        self.s_tolerance = self.tolerance * samples_per_us;
    }

    /// Run the decode callback on a completed message, updating the stats
    /// counters. Returns the event count and the records to dispatch.
    pub(crate) fn run_decoder(&mut self, bits: &BitBuffer) -> (u32, Vec<DataRecord>) {
        let Some(decoder) = &self.decoder else {
            bits.debug_print(&self.name);
            return (0, Vec::new());
        };
        self.stats.events += 1;
        match decoder.decode(bits) {
            Ok(records) if !records.is_empty() => {
                self.stats.ok += 1;
                self.stats.messages += records.len() as u32;
                (records.len() as u32, records)
            }
            Ok(_) => (0, Vec::new()),
            Err(fail) => {
                self.stats.fails[fail as usize] += 1;
                (0, Vec::new())
            }
        }
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub(crate) fn flush_stats(&mut self) {
        self.stats = DeviceStats::default();
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::data::Value;
    use std::sync::{Arc, Mutex};

    /// A decoder that records the bit buffer it saw and reports one event.
    pub struct CaptureDecoder {
        pub seen: Arc<Mutex<Option<BitBuffer>>>,
    }

    impl Decoder for CaptureDecoder {
        fn decode(&self, bits: &BitBuffer) -> DecodeResult {
            *self.seen.lock().unwrap() = Some(bits.clone());
            let mut rec = DataRecord::new();
            rec.push("model", "", Value::String("capture".into()));
            Ok(vec![rec])
        }
    }

    /// Build a capture decoder plus the handle its captures land in.
    pub fn capture_decoder() -> (Box<dyn Decoder>, Arc<Mutex<Option<BitBuffer>>>) {
        let seen = Arc::new(Mutex::new(None));
        (
            Box::new(CaptureDecoder { seen: seen.clone() }),
            seen,
        )
    }

    #[test]
    fn update_timings_derives_sample_space() {
        let mut dev = Device::new("t", Modulation::OokPpm);
        dev.short_width = 400.0;
        dev.long_width = 2000.0;
        dev.reset_limit = 10_000.0;
        dev.update_timings(250_000);
        assert!((dev.s_short_width - 100.0).abs() < 1e-3);
        assert!((dev.s_long_width - 500.0).abs() < 1e-3);
        assert!((dev.s_reset_limit - 2500.0).abs() < 1e-3);
        assert!((dev.f_short_width - 0.01).abs() < 1e-6);
    }

    #[test]
    fn stats_count_events_and_fails() {
        struct Failing;
        impl Decoder for Failing {
            fn decode(&self, _bits: &BitBuffer) -> DecodeResult {
                Err(DecodeFail::FailMic)
            }
        }
        let mut dev = Device::new("t", Modulation::OokPpm);
        dev.decoder = Some(Box::new(Failing));
        let bits = BitBuffer::new();
        let (events, records) = dev.run_decoder(&bits);
        assert_eq!(events, 0);
        assert!(records.is_empty());
        assert_eq!(dev.stats().events, 1);
        assert_eq!(dev.stats().fails[DecodeFail::FailMic as usize], 1);
    }
}
