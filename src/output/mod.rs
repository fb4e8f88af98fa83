//! Record sinks: output channels receiving the decoded, annotated records.
//!
//! Delivery is fire-and-forget; send failures are logged and swallowed.
//! A sink that declares `wants_ext` also receives unknown-signal deliveries
//! carrying the extended side channel (raw bit buffer, pulse data,
//! modulation tag).

pub mod csv;
pub mod ext;
pub mod json;
pub mod kv;
pub mod syslog;

pub use csv::CsvSink;
pub use ext::ExtSink;
pub use json::JsonSink;
pub use kv::KvSink;
pub use syslog::SyslogSink;

use crate::bitbuffer::BitBuffer;
use crate::config::Config;
use crate::data::DataRecord;
use crate::demod::Modulation;
use crate::pulse::PulseData;

/// Extended side channel for in-process consumers.
pub struct ExtData<'a> {
    /// Raw bit rows; absent for unknown signals that never demodulated.
    pub bitbuffer: Option<&'a BitBuffer>,
    pub pulses: &'a PulseData,
    /// The line code that matched; `None` for unknown signals.
    pub modulation: Option<Modulation>,
    pub sample_rate: u32,
    pub center_frequency: u32,
}

/// An output channel. Records arrive in strict package order.
pub trait Sink: Send {
    /// Called once before the first record, with the CSV-style field schema.
    fn start(&mut self, _fields: &[String]) {}

    /// Called at block boundaries so the sink can push queued I/O.
    fn poll(&mut self) {}

    fn emit(&mut self, record: &DataRecord);

    /// Delivery with the extended side channel; default drops the extension.
    fn emit_ext(&mut self, record: &DataRecord, _ext: &ExtData<'_>) {
        self.emit(record);
    }

    /// Whether this sink consumes unknown-signal deliveries.
    fn wants_ext(&self) -> bool {
        false
    }
}

/// The well-known output fields for the configured report options. These lead
/// the CSV schema; device fields follow.
pub fn well_known_fields(cfg: &Config) -> Vec<&'static str> {
    let mut fields = vec!["time", "msg", "codes"];
    if cfg.output_tag.is_some() {
        fields.push("tag");
    }
    if cfg.report_protocol {
        fields.push("protocol");
    }
    if cfg.report_description {
        fields.push("description");
    }
    if cfg.report_meta {
        fields.extend(["mod", "freq", "freq1", "freq2", "rssi", "snr", "noise"]);
    }
    fields
}
