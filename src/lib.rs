//! rx433 - generic ISM-band (433 MHz) digital radio receiver pipeline.
//!
//! The crate consumes an I/Q sample stream (live SDR front-end behind the
//! [`SampleSource`] trait, or captured files), demodulates AM/OOK and FM/FSK
//! basebands, segments them into pulse packages with an adaptive dual-channel
//! detector, runs each package through a bank of line-code demodulators, and
//! hands decoded bit rows to per-device protocol decoders that emit
//! structured key-value records to the configured output sinks.
//!
//! ```no_run
//! use rx433::{Config, JsonSink, Pipeline};
//!
//! # fn main() -> rx433::Result<()> {
//! let mut pipeline = Pipeline::new(Config::default());
//! pipeline.register_builtin_devices(&[]);
//! pipeline.add_sink(Box::new(JsonSink::new(std::io::stdout())));
//! pipeline.run_files(&["capture.cu8".to_string()])?;
//! # Ok(())
//! # }
//! ```
//!
//! The concrete SDR drivers, device catalogue beyond the shipped samples,
//! and CLI argument handling are external collaborators: implement
//! [`SampleSource`] for a driver, [`device::Decoder`] for a protocol, and
//! [`output::Sink`] for an output channel.

pub mod baseband;
pub mod bitbuffer;
pub mod config;
pub mod data;
pub mod demod;
pub mod device;
pub mod devices;
pub mod dumper;
pub mod error;
pub mod fileformat;
pub mod flex;
pub mod output;
pub mod pipeline;
pub mod pulse;
pub mod registry;
pub mod sampgrab;
pub mod source;

pub use bitbuffer::BitBuffer;
pub use config::{Config, ConversionMode, GrabMode, TimeMode};
pub use data::{DataRecord, Value};
pub use demod::Modulation;
pub use device::{DecodeFail, Device};
pub use error::{Error, Result};
pub use output::{CsvSink, ExtSink, JsonSink, KvSink, Sink, SyslogSink};
pub use pipeline::Pipeline;
pub use pulse::analyze::pulse_analyzer;
pub use pulse::detect::{PulseClass, PulseDetector};
pub use pulse::PulseData;
pub use registry::Registry;
pub use source::{FileSource, MemorySource, SampleSource};
