//! Pipeline configuration.
//!
//! A [`Config`] is built once, handed to [`crate::Pipeline`], and stays
//! unchanged for the whole start/run cycle. Defaults match the common
//! 433.92 MHz setup: 250 kHz sample rate, adaptive detection level, a single
//! center frequency, 10 minute hop dwell.

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 250_000;
/// Default center frequency in Hz.
pub const DEFAULT_FREQUENCY: u32 = 433_920_000;
/// Default dwell per frequency slot, in seconds.
pub const DEFAULT_HOP_TIME: u32 = 60 * 10;
/// Default I/Q block size in bytes (librtlsdr default).
pub const DEFAULT_BLOCK_SIZE: u32 = 16 * 32 * 512;
/// Smallest accepted block size in bytes.
pub const MINIMAL_BLOCK_SIZE: u32 = 512;
/// Largest accepted block size in bytes.
pub const MAXIMAL_BLOCK_SIZE: u32 = 256 * 16384;

/// Unit conversion applied to decoded records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionMode {
    /// Leave fields as the device reported them.
    #[default]
    Native,
    /// Rewrite customary-unit fields (`_F`, `_mph`, `_inch`, `_inHg`, `_PSI`) to SI.
    Si,
    /// Rewrite SI fields (`_C`, `_kph`, `_mm`, `_hPa`, `_kPa`) to customary.
    Customary,
}

/// How the `time` field of each record is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    /// Pick [`TimeMode::Samples`] for file input, [`TimeMode::Date`] otherwise.
    #[default]
    Default,
    /// Local date and time, `YYYY-MM-DD HH:MM:SS`.
    Date,
    /// Position in the input stream, `@0.123456s`.
    Samples,
    /// Seconds since the UNIX epoch.
    Unix,
    /// ISO-8601, `YYYY-MM-DDTHH:MM:SS`.
    Iso,
    /// No time field.
    Off,
}

/// Which frames the sample grabber writes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrabMode {
    #[default]
    Disabled,
    /// Every frame.
    All,
    /// Only frames no decoder matched.
    Unknown,
    /// Only frames at least one decoder matched.
    Known,
}

/// Pipeline configuration. See field docs; everything has a sane default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target center frequencies in Hz. More than one enables hopping.
    pub frequencies: Vec<u32>,
    /// Per-slot dwell times in seconds. Missing slots reuse the last entry.
    pub hop_times: Vec<u32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// I/Q block size in bytes. Clamped to [`MINIMAL_BLOCK_SIZE`], [`MAXIMAL_BLOCK_SIZE`].
    pub out_block_size: u32,
    /// Manual detection level [0-16384]. 0 = adaptive.
    pub level_limit: u16,
    /// Stop after this many bytes of input. 0 = no restriction.
    pub bytes_to_read: u64,
    /// Run the pulse analyzer on every detected package.
    pub analyze_pulses: bool,
    /// Pass packages no decoder matched (>= 10 pulses) to ext-capable sinks.
    pub report_unknown: bool,
    /// Append mod/freq/rssi/snr/noise to every record.
    pub report_meta: bool,
    /// Prepend the protocol number to every record.
    pub report_protocol: bool,
    /// Prepend the device description to every record.
    pub report_description: bool,
    /// Time field format.
    pub report_time: TimeMode,
    /// Literal tag prepended to every record; `"PATH"` and `"FILE"` expand to
    /// the current input file path / basename.
    pub output_tag: Option<String>,
    /// Unit conversion mode.
    pub conversion_mode: ConversionMode,
    /// Stop after this many seconds. 0 = run forever.
    pub duration: u32,
    /// Stop once at least one event was decoded from a block.
    pub stop_after_events: bool,
    /// Stats report level: 0 off, 1 successful devices, 2 active devices, 3 all.
    pub report_stats: u8,
    /// Emit a stats record every this many seconds. 0 = only on demand.
    pub stats_interval: u32,
    /// Sample grabber mode.
    pub grab_mode: GrabMode,
    /// Directory for grabbed signal files (empty = working directory).
    pub grab_path: String,
    /// Abort the process if a block callback overruns 3 seconds.
    pub watchdog: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frequencies: vec![DEFAULT_FREQUENCY],
            hop_times: vec![DEFAULT_HOP_TIME],
            sample_rate: DEFAULT_SAMPLE_RATE,
            out_block_size: DEFAULT_BLOCK_SIZE,
            level_limit: 0,
            bytes_to_read: 0,
            analyze_pulses: false,
            report_unknown: false,
            report_meta: false,
            report_protocol: false,
            report_description: false,
            report_time: TimeMode::Default,
            output_tag: None,
            conversion_mode: ConversionMode::Native,
            duration: 0,
            stop_after_events: false,
            report_stats: 0,
            stats_interval: 0,
            grab_mode: GrabMode::Disabled,
            grab_path: String::new(),
            watchdog: false,
        }
    }
}

impl Config {
    /// Block size with out-of-range values replaced by the default.
    pub(crate) fn effective_block_size(&self) -> u32 {
        if self.out_block_size < MINIMAL_BLOCK_SIZE || self.out_block_size > MAXIMAL_BLOCK_SIZE {
            tracing::warn!(
                "block size {} out of range [{}, {}], falling back to default",
                self.out_block_size,
                MINIMAL_BLOCK_SIZE,
                MAXIMAL_BLOCK_SIZE
            );
            DEFAULT_BLOCK_SIZE
        } else {
            self.out_block_size
        }
    }

    /// Dwell time for a frequency slot; missing entries reuse the last one.
    pub(crate) fn hop_time_for(&self, slot: usize) -> u32 {
        match self.hop_times.get(slot) {
            Some(&t) => t,
            None => self.hop_times.last().copied().unwrap_or(DEFAULT_HOP_TIME),
        }
    }
}
