//! Pipeline driver: consumes sample blocks, runs the baseband DSP, drains
//! the pulse detector, dispatches packages to the registered decoders, and
//! delivers annotated records to the output sinks.
//!
//! The core is single-threaded cooperative: one logical task drives
//! everything, and the only shared state is the `do_exit` / `do_exit_async`
//! flag pair, set by signal handlers and tested at block boundaries. A
//! watchdog (when enabled) aborts the process if a block callback fails to
//! return within 3 seconds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};

use crate::baseband::{self, FilterState, FmDemodState};
use crate::config::{Config, ConversionMode, GrabMode, TimeMode};
use crate::data::{convert_units, DataRecord, Value};
use crate::demod::{self, DemodEvents};
use crate::dumper::{dump_samples, DumpBuffers, Dumper};
use crate::error::Result;
use crate::fileformat::{FileFormat, SampleFormat};
use crate::output::{well_known_fields, ExtData, Sink};
use crate::pulse::detect::{PulseClass, PulseDetector};
use crate::pulse::{self, analyze, PulseData};
use crate::registry::Registry;
use crate::sampgrab::SampleGrabber;
use crate::source::{FileSource, SampleSource};

/// Ring capacity of the sample grabber, in blocks.
const GRABBER_BLOCKS: usize = 12;
/// Watchdog deadline per block callback.
const WATCHDOG_SECS: u64 = 3;

/// Process-abort watchdog around each block callback. Disabled unless the
/// config opts in; the monitor thread outlives the pipeline harmlessly.
struct Watchdog {
    deadline_ms: Arc<AtomicU64>,
}

impl Watchdog {
    fn spawn() -> Self {
        let deadline_ms = Arc::new(AtomicU64::new(0));
        let shared = deadline_ms.clone();
        std::thread::Builder::new()
            .name("rx433-watchdog".into())
            .spawn(move || loop {
                std::thread::sleep(Duration::from_millis(500));
                let deadline = shared.load(Ordering::Relaxed);
                if deadline != 0 && now_ms() > deadline {
                    tracing::error!("block callback overran {} s, aborting", WATCHDOG_SECS);
                    std::process::abort();
                }
            })
            .expect("watchdog thread");
        Self { deadline_ms }
    }

    fn arm(&self) {
        self.deadline_ms
            .store(now_ms() + WATCHDOG_SECS * 1000, Ordering::Relaxed);
    }

    fn disarm(&self) {
        self.deadline_ms.store(0, Ordering::Relaxed);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The receiver pipeline. Owns buffers, detector state, the device registry,
/// dumpers, the sample grabber and the output sinks for one start/run cycle.
pub struct Pipeline {
    cfg: Config,
    registry: Registry,
    sinks: Vec<Box<dyn Sink>>,
    dumpers: Vec<Dumper>,
    dump_scratch: DumpBuffers,
    samp_grab: Option<SampleGrabber>,

    sample_format: SampleFormat,
    /// Format of the current file input; drives the S16 buffer overrides.
    load_format: Option<FileFormat>,
    in_filename: Option<String>,

    am_buf: Vec<i16>,
    fm_buf: Vec<i16>,
    u8_buf: Vec<u8>,
    temp_buf: Vec<i16>,
    iq_scratch: Vec<i16>,
    lowpass_state: FilterState,
    fm_state: FmDemodState,
    enable_fm: bool,

    detector: PulseDetector,
    pulse_data: PulseData,
    fsk_pulse_data: PulseData,

    center_frequency: u32,
    frequency_index: usize,
    hop_start: Instant,
    stop_time: Option<Instant>,
    stats_time: Option<Instant>,

    input_pos: u64,
    bytes_to_read_left: u64,
    sample_file_pos: f64,
    now: DateTime<Local>,
    report_time: TimeMode,

    frame_event_count: u32,
    frame_start_ago: u32,
    frame_end_ago: u32,
    frames_count: u32,
    frames_fsk: u32,
    frames_events: u32,

    do_exit: Arc<AtomicBool>,
    do_exit_async: Arc<AtomicBool>,
    watchdog: Option<Watchdog>,
    outputs_started: bool,
}

impl Pipeline {
    pub fn new(cfg: Config) -> Self {
        let watchdog = cfg.watchdog.then(Watchdog::spawn);
        let samp_grab = (cfg.grab_mode != GrabMode::Disabled).then(|| {
            SampleGrabber::new(GRABBER_BLOCKS * cfg.effective_block_size() as usize)
        });
        let center_frequency = cfg.frequencies.first().copied().unwrap_or_default();
        let report_time = cfg.report_time;
        Self {
            cfg,
            registry: Registry::new(),
            sinks: Vec::new(),
            dumpers: Vec::new(),
            dump_scratch: DumpBuffers::default(),
            samp_grab,
            sample_format: SampleFormat::Cu8,
            load_format: None,
            in_filename: None,
            am_buf: Vec::new(),
            fm_buf: Vec::new(),
            u8_buf: Vec::new(),
            temp_buf: Vec::new(),
            iq_scratch: Vec::new(),
            lowpass_state: FilterState::default(),
            fm_state: FmDemodState::default(),
            enable_fm: false,
            detector: PulseDetector::new(),
            pulse_data: PulseData::new(),
            fsk_pulse_data: PulseData::new(),
            center_frequency,
            frequency_index: 0,
            hop_start: Instant::now(),
            stop_time: None,
            stats_time: None,
            input_pos: 0,
            bytes_to_read_left: 0,
            sample_file_pos: 0.0,
            now: Local::now(),
            report_time,
            frame_event_count: 0,
            frame_start_ago: 0,
            frame_end_ago: 0,
            frames_count: 0,
            frames_fsk: 0,
            frames_events: 0,
            do_exit: Arc::new(AtomicBool::new(false)),
            do_exit_async: Arc::new(AtomicBool::new(false)),
            watchdog,
            outputs_started: false,
        }
    }

    // ── Setup ────────────────────────────────────────────────────────────

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn register_builtin_devices(&mut self, selection: &[bool]) {
        self.registry.register_builtin_devices(&self.cfg, selection);
        self.enable_fm = self.registry.needs_fm();
    }

    pub fn register_flex_devices(&mut self, specs: &[String]) -> Result<()> {
        self.registry.register_flex_devices(&self.cfg, specs)?;
        self.enable_fm = self.registry.needs_fm();
        Ok(())
    }

    /// Register an ad-hoc device (tests, embedding hosts).
    pub fn register_device(&mut self, mut dev: crate::device::Device) {
        dev.update_timings(self.cfg.sample_rate);
        self.enable_fm = self.enable_fm || dev.modulation.is_fsk();
        self.registry.push_device(dev);
    }

    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn add_dumper(&mut self, spec: &str, overwrite: bool) -> Result<()> {
        let dumper = Dumper::create(spec, overwrite, self.cfg.sample_rate)?;
        self.dumpers.push(dumper);
        Ok(())
    }

    /// The stop flag, for wiring into signal handlers.
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        self.do_exit.clone()
    }

    /// Stop the pipeline after the current block.
    pub fn signal_stop(&self) {
        self.do_exit.store(true, Ordering::SeqCst);
    }

    /// Stop the current tuning only; the hop loop continues.
    pub fn signal_hop(&self) {
        self.do_exit_async.store(true, Ordering::SeqCst);
    }

    fn start_outputs(&mut self) {
        if self.outputs_started {
            return;
        }
        self.outputs_started = true;
        let fields = self.registry.csv_fields(&well_known_fields(&self.cfg));
        for sink in &mut self.sinks {
            sink.start(&fields);
        }
    }

    // ── Driver loops ─────────────────────────────────────────────────────

    /// Drive a live source: tune, read blocks, hop between the configured
    /// frequencies, stop on duration / byte / event limits.
    pub fn run(&mut self, source: &mut dyn SampleSource) -> Result<()> {
        if self.registry.is_empty() && !self.cfg.analyze_pulses && self.dumpers.is_empty() {
            tracing::warn!("no decoders, analyzer or dumpers active");
        }
        if self.cfg.frequencies.is_empty() {
            self.cfg.frequencies.push(crate::config::DEFAULT_FREQUENCY);
        }
        self.sample_format = source.sample_format();
        self.report_time = match self.cfg.report_time {
            TimeMode::Default => TimeMode::Date,
            other => other,
        };
        self.bytes_to_read_left = self.cfg.bytes_to_read;
        self.start_outputs();

        source.set_sample_rate(self.cfg.sample_rate)?;
        source.reset()?;
        source.activate()?;

        if self.cfg.duration > 0 {
            self.stop_time = Some(Instant::now() + Duration::from_secs(self.cfg.duration as u64));
        }
        if self.cfg.report_stats > 0 && self.cfg.stats_interval > 0 {
            self.stats_time =
                Some(Instant::now() + Duration::from_secs(self.cfg.stats_interval as u64));
        }

        let block_size = self.cfg.effective_block_size() as usize;
        let mut buf = vec![0u8; block_size];

        while !self.do_exit.load(Ordering::SeqCst) {
            self.hop_start = Instant::now();
            self.center_frequency = self.cfg.frequencies[self.frequency_index];
            if let Err(e) = source.set_center_freq(self.center_frequency) {
                tracing::warn!("failed to set center frequency: {}", e);
            }

            while !self.do_exit.load(Ordering::SeqCst) && !self.do_exit_async.load(Ordering::SeqCst)
            {
                let n = source.read_block(&mut buf)?;
                if n == 0 {
                    self.signal_stop();
                    break;
                }
                self.process_block(&buf[..n])?;
            }

            self.do_exit_async.store(false, Ordering::SeqCst);
            self.frequency_index = (self.frequency_index + 1) % self.cfg.frequencies.len();
        }

        if self.cfg.report_stats > 0 {
            let report = self.create_report_data(self.cfg.report_stats);
            self.emit_event_record(report);
            self.flush_report_data();
        }
        source.stop();
        source.close()?;
        Ok(())
    }

    /// Drive captured files. PULSE_OOK files replay packages directly; all
    /// other formats run through the normal block path, with a final zeroed
    /// block so the last package terminates.
    pub fn run_files(&mut self, specs: &[String]) -> Result<()> {
        self.report_time = match self.cfg.report_time {
            TimeMode::Default => TimeMode::Samples,
            other => other,
        };
        self.bytes_to_read_left = self.cfg.bytes_to_read;
        self.start_outputs();
        if self.cfg.duration > 0 {
            self.stop_time = Some(Instant::now() + Duration::from_secs(self.cfg.duration as u64));
        }

        let block_size = self.cfg.effective_block_size() as usize;
        for spec in specs {
            let mut source = FileSource::open(spec)?;
            self.in_filename = Some(source.path().display().to_string());

            if source.format() == FileFormat::PulseOok {
                self.replay_pulse_file(&mut source)?;
                continue;
            }

            self.sample_format = source.sample_format();
            self.load_format = Some(source.format());
            self.sample_file_pos = 0.0;

            let bytes_per_sample = 2.0 * self.sample_format.sample_size() as f64;
            let mut buf = vec![0u8; block_size];
            let mut n_blocks = 0u64;
            loop {
                let n = source.read_block(&mut buf)?;
                if n == 0 {
                    break;
                }
                self.sample_file_pos = (n_blocks as f64 * block_size as f64 + n as f64)
                    / self.cfg.sample_rate as f64
                    / bytes_per_sample;
                n_blocks += 1;
                self.process_block(&buf[..n])?;
                if self.do_exit.load(Ordering::SeqCst) {
                    break;
                }
            }

            // one cleared block to force end-of-package detection
            let fill = match self.sample_format {
                SampleFormat::Cu8 => 128u8,
                SampleFormat::Cs16 => 0u8,
            };
            buf.fill(fill);
            self.sample_file_pos =
                (n_blocks + 1) as f64 * block_size as f64 / self.cfg.sample_rate as f64 / bytes_per_sample;
            self.process_block(&buf)?;
            tracing::debug!("file {:?} issued {} blocks", spec, n_blocks);
        }
        self.load_format = None;
        self.in_filename = None;
        Ok(())
    }

    fn replay_pulse_file(&mut self, source: &mut FileSource) -> Result<()> {
        let sample_rate = self.cfg.sample_rate;
        loop {
            if self.do_exit.load(Ordering::SeqCst) {
                break;
            }
            let mut package = PulseData::new();
            package.load_text(source.reader(), sample_rate)?;
            if package.num_pulses() == 0 {
                break;
            }
            let class = if package.fsk_f2_est != 0 {
                self.fsk_pulse_data = package;
                PulseClass::Fsk
            } else {
                self.pulse_data = package;
                PulseClass::Ook
            };
            self.run_package(class);
        }
        Ok(())
    }

    // ── Block processing ─────────────────────────────────────────────────

    /// Process one I/Q block: sinks poll, baseband DSP, detector drain with
    /// per-package dispatch, frame bookkeeping, sample dumps, then the
    /// stop/hop/stats checks.
    pub fn process_block(&mut self, iq_buf: &[u8]) -> Result<()> {
        for sink in &mut self.sinks {
            sink.poll();
        }
        if self.do_exit.load(Ordering::SeqCst) || self.do_exit_async.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut len = iq_buf.len();
        if self.bytes_to_read_left > 0 && self.bytes_to_read_left <= len as u64 {
            len = self.bytes_to_read_left as usize;
            self.signal_stop();
        }

        self.now = Local::now();
        let sample_size = self.sample_format.sample_size();
        let n_samples = len / 2 / sample_size;
        if n_samples == 0 {
            return Ok(());
        }

        // age the frame position if there is one
        if self.frame_start_ago > 0 {
            self.frame_start_ago = self.frame_start_ago.saturating_add(n_samples as u32);
        }
        if self.frame_end_ago > 0 {
            self.frame_end_ago = self.frame_end_ago.saturating_add(n_samples as u32);
        }

        if let Some(watchdog) = &self.watchdog {
            watchdog.arm();
        }

        if let Some(grab) = &mut self.samp_grab {
            grab.push(&iq_buf[..len]);
        }

        self.am_buf.resize(n_samples, 0);
        self.fm_buf.resize(n_samples, 0);
        self.run_baseband(&iq_buf[..len], n_samples);

        let mut d_events = 0u32;
        let want_detect = !self.registry.is_empty()
            || self.cfg.analyze_pulses
            || !self.dumpers.is_empty()
            || self.samp_grab.is_some();
        if want_detect {
            if self.dumpers.iter().any(|d| d.format == FileFormat::U8Logic) {
                self.u8_buf.clear();
                self.u8_buf.resize(n_samples, 0);
            }

            loop {
                let result = self.detector.detect(
                    &self.am_buf,
                    &self.fm_buf,
                    n_samples,
                    self.cfg.level_limit,
                    self.cfg.sample_rate,
                    self.input_pos,
                    &mut self.pulse_data,
                    &mut self.fsk_pulse_data,
                );
                let Some(class) = result else {
                    break; // out of data
                };

                // new package: start frame tracking if none is open
                let (start_ago, end_ago) = match class {
                    PulseClass::Ook => (self.pulse_data.start_ago, self.pulse_data.end_ago),
                    PulseClass::Fsk => (self.fsk_pulse_data.start_ago, self.fsk_pulse_data.end_ago),
                };
                if self.frame_start_ago == 0 {
                    self.frame_start_ago = start_ago;
                }
                self.frame_end_ago = end_ago;

                match class {
                    PulseClass::Ook => {
                        self.calc_rssi_snr(PulseClass::Ook);
                        if self.cfg.analyze_pulses {
                            tracing::info!(
                                "detected OOK package\t{}",
                                self.time_pos_string(start_ago).unwrap_or_default()
                            );
                        }
                        let p_events = self.run_package(PulseClass::Ook);
                        self.frames_count += 1;
                        self.frames_events += u32::from(p_events > 0);
                        self.feed_package_dumpers(PulseClass::Ook);
                        self.pulse_data.debug_print();
                        if self.cfg.analyze_pulses && self.analyzer_wanted(p_events) {
                            analyze::pulse_analyzer(&mut self.pulse_data);
                        }
                        d_events += p_events;
                    }
                    PulseClass::Fsk => {
                        self.calc_rssi_snr(PulseClass::Fsk);
                        if self.cfg.analyze_pulses {
                            tracing::info!(
                                "detected FSK package\t{}",
                                self.time_pos_string(start_ago).unwrap_or_default()
                            );
                        }
                        let p_events = self.run_package(PulseClass::Fsk);
                        self.frames_fsk += 1;
                        self.frames_events += u32::from(p_events > 0);
                        self.feed_package_dumpers(PulseClass::Fsk);
                        self.fsk_pulse_data.debug_print();
                        if self.cfg.analyze_pulses && self.analyzer_wanted(p_events) {
                            analyze::pulse_analyzer(&mut self.fsk_pulse_data);
                        }
                        d_events += p_events;
                    }
                }
            }

            // frame bookkeeping: flush the grabber once a frame fully aged
            self.frame_event_count += d_events;
            if self.frame_start_ago > 0 && self.frame_end_ago > n_samples as u32 {
                self.write_grabbed_frame(n_samples);
                self.frame_start_ago = 0;
                self.frame_event_count = 0;
            }

            // dump the partial per-block logic state
            if self.dumpers.iter().any(|d| d.format == FileFormat::U8Logic) {
                self.pulse_data.dump_raw(&mut self.u8_buf, self.input_pos, 0x02);
                self.fsk_pulse_data.dump_raw(&mut self.u8_buf, self.input_pos, 0x04);
            }
        }

        dump_samples(
            &mut self.dumpers,
            &mut self.dump_scratch,
            &iq_buf[..len],
            self.sample_format,
            n_samples,
            &self.am_buf,
            &self.fm_buf,
            &self.u8_buf,
        )?;

        self.input_pos += n_samples as u64;
        if self.bytes_to_read_left > 0 {
            self.bytes_to_read_left = self.bytes_to_read_left.saturating_sub(len as u64);
        }

        if self.cfg.stop_after_events && d_events > 0 {
            self.signal_stop();
            self.signal_hop();
        }

        // frequency hop
        let hop_time = self.cfg.hop_time_for(self.frequency_index);
        if self.cfg.frequencies.len() > 1
            && self.hop_start.elapsed() >= Duration::from_secs(hop_time as u64)
        {
            self.signal_hop();
        }
        // duration cap
        if let Some(stop_time) = self.stop_time {
            if Instant::now() >= stop_time {
                self.signal_stop();
                self.signal_hop();
                tracing::info!("time expired, exiting");
            }
        }
        // periodic stats
        if let Some(stats_time) = self.stats_time {
            if Instant::now() >= stats_time {
                let report = self.create_report_data(self.cfg.report_stats);
                self.emit_event_record(report);
                self.flush_report_data();
                self.stats_time =
                    Some(stats_time + Duration::from_secs(self.cfg.stats_interval as u64));
            }
        }

        if let Some(watchdog) = &self.watchdog {
            watchdog.disarm();
        }
        Ok(())
    }

    fn run_baseband(&mut self, iq_buf: &[u8], n_samples: usize) {
        self.temp_buf.resize(n_samples, 0);
        match self.sample_format {
            SampleFormat::Cu8 => {
                baseband::envelope_detect_cu8(iq_buf, &mut self.temp_buf, n_samples);
                baseband::low_pass_filter(&self.temp_buf, &mut self.am_buf, n_samples, &mut self.lowpass_state);
                if self.enable_fm {
                    baseband::fm_demod_cu8(iq_buf, &mut self.fm_buf, n_samples, &mut self.fm_state);
                }
            }
            SampleFormat::Cs16 => {
                self.iq_scratch.clear();
                self.iq_scratch.extend(
                    iq_buf
                        .chunks_exact(2)
                        .map(|c| i16::from_le_bytes([c[0], c[1]])),
                );
                baseband::magnitude_est_cs16(&self.iq_scratch, &mut self.temp_buf, n_samples);
                baseband::low_pass_filter(&self.temp_buf, &mut self.am_buf, n_samples, &mut self.lowpass_state);
                if self.enable_fm {
                    baseband::fm_demod_cs16(&self.iq_scratch, &mut self.fm_buf, n_samples, &mut self.fm_state);
                }
            }
        }

        // special input formats override the demodulated buffers
        match self.load_format {
            Some(FileFormat::S16Am) => {
                for (n, c) in iq_buf.chunks_exact(2).take(n_samples).enumerate() {
                    self.am_buf[n] = i16::from_le_bytes([c[0], c[1]]);
                }
            }
            Some(FileFormat::S16Fm) => {
                for (n, c) in iq_buf.chunks_exact(2).take(n_samples).enumerate() {
                    self.fm_buf[n] = i16::from_le_bytes([c[0], c[1]]);
                }
            }
            _ => {}
        }
    }

    /// Run every matching demodulator over the populated package and
    /// dispatch the records. Returns the package event count.
    fn run_package(&mut self, class: PulseClass) -> u32 {
        let mut p_events = 0u32;
        for i in 0..self.registry.len() {
            let ev: DemodEvents = {
                let dev = &mut self.registry.devices_mut()[i];
                match class {
                    PulseClass::Ook => demod::demod_ook(&self.pulse_data, dev),
                    PulseClass::Fsk => demod::demod_fsk(&self.fsk_pulse_data, dev),
                }
            };
            p_events += ev.events;
            if !ev.records.is_empty() {
                let (name, protocol_num) = {
                    let dev = &self.registry.devices()[i];
                    (dev.name.clone(), dev.protocol_num)
                };
                for record in ev.records {
                    self.dispatch_record(record, class, &name, protocol_num);
                }
            }
        }

        // Unknown OOK signal of significant length: deliver the raw package
        // to ext-capable sinks only.
        if class == PulseClass::Ook
            && p_events == 0
            && self.cfg.report_unknown
            && self.pulse_data.num_pulses() > 10
            && self.sinks.iter().any(|s| s.wants_ext())
        {
            let mut record = DataRecord::new();
            record.push("model", "", Value::String("unknown device".into()));
            self.prepend_time_and_tag(&mut record);
            let ext = ExtData {
                bitbuffer: None,
                pulses: &self.pulse_data,
                modulation: None,
                sample_rate: self.cfg.sample_rate,
                center_frequency: self.center_frequency,
            };
            for sink in &mut self.sinks {
                if sink.wants_ext() {
                    sink.emit_ext(&record, &ext);
                }
            }
        }
        p_events
    }

    /// Annotate one record (units, description, protocol, meta, time, tag)
    /// and deliver it to every sink.
    fn dispatch_record(
        &mut self,
        mut record: DataRecord,
        class: PulseClass,
        dev_name: &str,
        protocol_num: u32,
    ) {
        if self.cfg.conversion_mode != ConversionMode::Native {
            convert_units(&mut record, self.cfg.conversion_mode);
        }

        if self.cfg.report_description {
            record.prepend("description", "Description", Value::String(dev_name.into()));
        }
        if self.cfg.report_protocol && protocol_num > 0 {
            record.prepend("protocol", "Protocol", Value::Int(protocol_num as i64));
        }

        if self.cfg.report_meta {
            match class {
                PulseClass::Fsk => {
                    let p = &self.fsk_pulse_data;
                    record.push("mod", "Modulation", Value::String("FSK".into()));
                    record.push_fmt("freq1", "Freq1", "%.1f MHz", Value::Double(p.freq1_hz as f64 / 1e6));
                    record.push_fmt("freq2", "Freq2", "%.1f MHz", Value::Double(p.freq2_hz as f64 / 1e6));
                    record.push_fmt("rssi", "RSSI", "%.1f dB", Value::Double(p.rssi_db as f64));
                    record.push_fmt("snr", "SNR", "%.1f dB", Value::Double(p.snr_db as f64));
                    record.push_fmt("noise", "Noise", "%.1f dB", Value::Double(p.noise_db as f64));
                }
                PulseClass::Ook => {
                    let p = &self.pulse_data;
                    record.push("mod", "Modulation", Value::String("ASK".into()));
                    record.push_fmt("freq", "Freq", "%.1f MHz", Value::Double(p.freq1_hz as f64 / 1e6));
                    record.push_fmt("rssi", "RSSI", "%.1f dB", Value::Double(p.rssi_db as f64));
                    record.push_fmt("snr", "SNR", "%.1f dB", Value::Double(p.snr_db as f64));
                    record.push_fmt("noise", "Noise", "%.1f dB", Value::Double(p.noise_db as f64));
                }
            }
        }

        self.prepend_time_and_tag(&mut record);

        for sink in &mut self.sinks {
            sink.emit(&record);
        }
    }

    fn prepend_time_and_tag(&self, record: &mut DataRecord) {
        if let Some(time_str) = self.time_pos_string(0) {
            record.prepend("time", "", Value::String(time_str));
        }
        if let Some(tag) = &self.cfg.output_tag {
            let expanded = match (tag.as_str(), &self.in_filename) {
                ("PATH", Some(path)) => path.clone(),
                ("FILE", Some(path)) => std::path::Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.clone()),
                _ => tag.clone(),
            };
            record.prepend("tag", "Tag", Value::String(expanded));
        }
    }

    /// Render the report time for a position `samples_ago` back from the end
    /// of the current block. `None` when time reporting is off.
    fn time_pos_string(&self, samples_ago: u32) -> Option<String> {
        match self.report_time {
            TimeMode::Off => None,
            TimeMode::Samples => {
                let s_per_sample = 1.0 / self.cfg.sample_rate as f64;
                Some(format!(
                    "@{:.6}s",
                    self.sample_file_pos - samples_ago as f64 * s_per_sample
                ))
            }
            mode => {
                let us_ago = samples_ago as i64 * 1_000_000 / self.cfg.sample_rate as i64;
                let when = self.now - chrono::Duration::microseconds(us_ago);
                Some(match mode {
                    TimeMode::Unix => when.timestamp().to_string(),
                    TimeMode::Iso => when.format("%Y-%m-%dT%H:%M:%S").to_string(),
                    _ => when.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
            }
        }
    }

    fn analyzer_wanted(&self, p_events: u32) -> bool {
        match self.cfg.grab_mode {
            GrabMode::Disabled | GrabMode::All => true,
            GrabMode::Unknown => p_events == 0,
            GrabMode::Known => p_events > 0,
        }
    }

    fn feed_package_dumpers(&mut self, class: PulseClass) {
        let (data, ch_id, bits) = match class {
            PulseClass::Ook => (&self.pulse_data, '\'', 0x02),
            PulseClass::Fsk => (&self.fsk_pulse_data, '"', 0x04),
        };
        for dumper in &mut self.dumpers {
            let res = match dumper.format {
                FileFormat::VcdLogic => {
                    pulse::print_vcd(&mut dumper.file, data, ch_id, self.cfg.sample_rate)
                }
                FileFormat::PulseOok => data.dump_text(&mut dumper.file),
                FileFormat::U8Logic => {
                    data.dump_raw(&mut self.u8_buf, self.input_pos, bits);
                    Ok(())
                }
                _ => Ok(()),
            };
            if let Err(e) = res {
                tracing::warn!("package dump failed on {:?}: {}", dumper.path(), e);
            }
        }
    }

    fn write_grabbed_frame(&mut self, n_samples: usize) {
        let Some(grab) = &mut self.samp_grab else {
            return;
        };
        let wanted = match self.cfg.grab_mode {
            GrabMode::Disabled => false,
            GrabMode::All => true,
            GrabMode::Unknown => self.frame_event_count == 0,
            GrabMode::Known => self.frame_event_count > 0,
        };
        if !wanted {
            return;
        }
        let frame_pad = (n_samples / 8) as u32;
        let start_padded = self.frame_start_ago.saturating_add(frame_pad);
        let end_padded = self.frame_end_ago.saturating_sub(frame_pad);
        let len_padded = start_padded.saturating_sub(end_padded);
        if len_padded == 0 {
            return;
        }
        if let Err(e) = grab.write(
            len_padded,
            end_padded,
            &self.cfg.grab_path,
            true,
            self.sample_format,
            self.center_frequency,
            self.cfg.sample_rate,
        ) {
            tracing::warn!("signal grab failed: {}", e);
        }
    }

    // ── Signal metrics ───────────────────────────────────────────────────

    /// Derive RSSI/SNR/noise and the absolute carrier frequencies for the
    /// just-detected package.
    fn calc_rssi_snr(&mut self, class: PulseClass) {
        let sample_rate = self.cfg.sample_rate as f32;
        let center = self.center_frequency as f32;
        let amplitude = self.sample_format == SampleFormat::Cu8;
        let data = match class {
            PulseClass::Ook => &mut self.pulse_data,
            PulseClass::Fsk => &mut self.fsk_pulse_data,
        };
        let asnr = data.ook_high_estimate as f32 / (data.ook_low_estimate as f32 + 1.0);
        let foffs1 = data.fsk_f1_est as f32 / i16::MAX as f32 * sample_rate / 2.0;
        let foffs2 = data.fsk_f2_est as f32 / i16::MAX as f32 * sample_rate / 2.0;
        data.freq1_hz = foffs1 + center;
        data.freq2_hz = foffs2 + center;
        // amplitude (CU8) readings are squares, hence the 10x coefficient
        if amplitude {
            data.rssi_db = 10.0 * (data.ook_high_estimate as f32).log10() - 42.1442;
            data.noise_db = 10.0 * (data.ook_low_estimate as f32 + 1.0).log10() - 42.1442;
            data.snr_db = 10.0 * asnr.log10();
        } else {
            data.rssi_db = 20.0 * (data.ook_high_estimate as f32).log10() - 84.2884;
            data.noise_db = 20.0 * (data.ook_low_estimate as f32 + 1.0).log10() - 84.2884;
            data.snr_db = 20.0 * asnr.log10();
        }
    }

    // ── Stats reporting ──────────────────────────────────────────────────

    /// Build the stats record. Level 1 reports successful devices, 2 active
    /// devices, 3 all registered devices.
    fn create_report_data(&self, level: u8) -> DataRecord {
        let mut dev_records = Vec::new();
        for dev in self.registry.devices() {
            let stats = dev.stats();
            if level <= 2 && stats.events == 0 {
                continue;
            }
            if level <= 1 && stats.ok == 0 {
                continue;
            }
            if level == 0 {
                continue;
            }
            let mut rec = DataRecord::new();
            rec.push("device", "", Value::Int(dev.protocol_num as i64))
                .push("name", "", Value::String(dev.name.clone()))
                .push("events", "", Value::Int(stats.events as i64))
                .push("ok", "", Value::Int(stats.ok as i64))
                .push("messages", "", Value::Int(stats.messages as i64));
            let fail_keys = [
                "fail_other",
                "abort_length",
                "abort_early",
                "fail_mic",
                "fail_sanity",
            ];
            for (key, &count) in fail_keys.iter().zip(stats.fails.iter()) {
                if count > 0 {
                    rec.push(key, "", Value::Int(count as i64));
                }
            }
            dev_records.push(Value::Record(rec));
        }

        let mut frames = DataRecord::new();
        frames
            .push("count", "", Value::Int(self.frames_count as i64))
            .push("fsk", "", Value::Int(self.frames_fsk as i64))
            .push("events", "", Value::Int(self.frames_events as i64));

        let mut report = DataRecord::new();
        report
            .push("enabled", "", Value::Int(self.registry.len() as i64))
            .push("frames", "", Value::Record(frames))
            .push("stats", "", Value::Array(dev_records));
        report
    }

    fn flush_report_data(&mut self) {
        self.frames_count = 0;
        self.frames_fsk = 0;
        self.frames_events = 0;
        for dev in self.registry.devices_mut() {
            dev.flush_stats();
        }
    }

    /// Deliver a pipeline event record (stats) to every sink, time-prefixed.
    fn emit_event_record(&mut self, mut record: DataRecord) {
        if let Some(time_str) = self.time_pos_string(0) {
            record.prepend("time", "", Value::String(time_str));
        }
        for sink in &mut self.sinks {
            sink.emit(&record);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flex;
    use crate::output::ExtSink;
    use std::sync::Mutex;

    const RATE: u32 = 250_000;

    /// Sink capturing records (and whether they arrived with ext data).
    fn capture_sink() -> (Box<dyn Sink>, Arc<Mutex<Vec<(DataRecord, bool)>>>) {
        let seen: Arc<Mutex<Vec<(DataRecord, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sink = ExtSink::new(Box::new(move |rec, ext| {
            seen2.lock().unwrap().push((rec.clone(), ext.is_some()));
        }));
        (Box::new(sink), seen)
    }

    /// CU8 block: lead-in noise, 12 PPM pulses (200 samples) with alternating
    /// 400/1200 gaps, terminal silence.
    fn ppm_block() -> Vec<u8> {
        let mut iq = Vec::new();
        let mut push = |level: u8, n: usize| {
            for _ in 0..n {
                iq.push(level);
                iq.push(128);
            }
        };
        push(128, 2000); // idle lead-in
        for n in 0..12 {
            push(255, 200);
            push(128, if n % 2 == 0 { 400 } else { 1200 });
        }
        push(128, 8000);
        iq
    }

    fn ppm_pipeline(cfg: Config) -> Pipeline {
        let mut pipeline = Pipeline::new(cfg);
        let dev = flex::create_device("n=probe,m=OOK_PPM,s=1600,l=4800,r=10000").unwrap();
        pipeline.register_device(dev);
        pipeline
    }

    #[test]
    fn end_to_end_ppm_decode() {
        let mut cfg = Config::default();
        cfg.report_meta = true;
        let mut pipeline = ppm_pipeline(cfg);
        let (sink, seen) = capture_sink();
        pipeline.add_sink(sink);
        pipeline.start_outputs();

        pipeline.process_block(&ppm_block()).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "expected exactly one record");
        let (rec, with_ext) = &seen[0];
        assert!(!with_ext);
        assert_eq!(rec.get("model").unwrap().value, Value::String("probe".into()));
        // annotation: time leads, meta trails
        assert_eq!(rec.fields()[0].key, "time");
        assert_eq!(rec.get("mod").unwrap().value, Value::String("ASK".into()));
        assert!(rec.get("rssi").is_some());
        match &rec.get("codes").unwrap().value {
            Value::Array(rows) => assert_eq!(rows[0], Value::String("{11}554".into())),
            other => panic!("codes not an array: {:?}", other),
        }
    }

    #[test]
    fn unknown_packages_reach_ext_sinks_only() {
        let mut cfg = Config::default();
        cfg.report_unknown = true;
        let mut pipeline = Pipeline::new(cfg);
        // a decoder that will not match the signal
        let dev = flex::create_device("n=probe,m=OOK_PPM,s=10,l=20,r=50,bits=64").unwrap();
        pipeline.register_device(dev);
        let (sink, seen) = capture_sink();
        pipeline.add_sink(sink);
        pipeline.start_outputs();

        pipeline.process_block(&ppm_block()).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (rec, with_ext) = &seen[0];
        assert!(*with_ext, "unknown delivery must carry ext data");
        assert_eq!(
            rec.get("model").unwrap().value,
            Value::String("unknown device".into())
        );
    }

    #[test]
    fn stop_after_events_raises_exit() {
        let mut cfg = Config::default();
        cfg.stop_after_events = true;
        let mut pipeline = ppm_pipeline(cfg);
        pipeline.start_outputs();
        pipeline.process_block(&ppm_block()).unwrap();
        assert!(pipeline.do_exit.load(Ordering::SeqCst));
    }

    #[test]
    fn rssi_snr_math_for_amplitude_input() {
        let mut pipeline = Pipeline::new(Config::default());
        pipeline.pulse_data.ook_high_estimate = 16384;
        pipeline.pulse_data.ook_low_estimate = 100;
        pipeline.pulse_data.fsk_f1_est = 0;
        pipeline.calc_rssi_snr(PulseClass::Ook);
        let d = &pipeline.pulse_data;
        assert!((d.rssi_db - 0.0).abs() < 0.01); // 10*log10(16384) == 42.1442
        assert!(d.snr_db > 20.0);
        assert!((d.freq1_hz - 433_920_000.0).abs() < 1.0);
    }

    #[test]
    fn stats_report_counts_frames_and_devices() {
        let mut cfg = Config::default();
        cfg.report_stats = 3;
        let mut pipeline = ppm_pipeline(cfg);
        let (sink, seen) = capture_sink();
        pipeline.add_sink(sink);
        pipeline.start_outputs();
        pipeline.process_block(&ppm_block()).unwrap();

        let report = pipeline.create_report_data(3);
        match &report.get("frames").unwrap().value {
            Value::Record(frames) => {
                assert_eq!(frames.get("count").unwrap().value, Value::Int(1));
                assert_eq!(frames.get("events").unwrap().value, Value::Int(1));
            }
            other => panic!("frames not a record: {:?}", other),
        }
        match &report.get("stats").unwrap().value {
            Value::Array(devs) => {
                assert_eq!(devs.len(), 1);
                match &devs[0] {
                    Value::Record(d) => {
                        assert_eq!(d.get("ok").unwrap().value, Value::Int(1));
                    }
                    other => panic!("stats entry not a record: {:?}", other),
                }
            }
            other => panic!("stats not an array: {:?}", other),
        }

        pipeline.flush_report_data();
        assert_eq!(pipeline.frames_count, 0);
        let _ = seen;
    }

    #[test]
    fn run_files_decodes_a_cu8_capture() {
        let dir = std::env::temp_dir().join("rx433-pipeline-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ppm.cu8");
        std::fs::write(&path, ppm_block()).unwrap();

        let mut cfg = Config::default();
        cfg.out_block_size = 4096;
        let mut pipeline = ppm_pipeline(cfg);
        let (sink, seen) = capture_sink();
        pipeline.add_sink(sink);

        pipeline
            .run_files(&[path.to_string_lossy().into_owned()])
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        // file input defaults to sample-position timestamps
        match &seen[0].0.get("time").unwrap().value {
            Value::String(s) => assert!(s.starts_with('@'), "time {:?}", s),
            other => panic!("time not a string: {:?}", other),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn replay_pulse_file_round_trip() {
        let dir = std::env::temp_dir().join("rx433-pipeline-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("replay.ook");

        // write a pulse capture of the same PPM package
        let mut package = PulseData::new();
        package.sample_rate = RATE;
        package.pulse = vec![200; 8];
        package.gap = vec![400, 1200, 400, 1200, 400, 1200, 400, 8000];
        let mut out = Vec::new();
        PulseData::print_pulse_header(&mut out, RATE).unwrap();
        package.dump_text(&mut out).unwrap();
        std::fs::write(&path, out).unwrap();

        let mut pipeline = ppm_pipeline(Config::default());
        let (sink, seen) = capture_sink();
        pipeline.add_sink(sink);
        pipeline
            .run_files(&[path.to_string_lossy().into_owned()])
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].0.get("model").unwrap().value,
            Value::String("probe".into())
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn run_stops_when_source_drains() {
        use crate::source::MemorySource;
        let mut cfg = Config::default();
        cfg.out_block_size = 4096;
        let mut pipeline = ppm_pipeline(cfg);
        let (sink, seen) = capture_sink();
        pipeline.add_sink(sink);

        let mut source = MemorySource::new(ppm_block(), SampleFormat::Cu8);
        pipeline.run(&mut source).unwrap();

        // the source draining to zero stops the run cleanly
        assert!(pipeline.do_exit.load(Ordering::SeqCst));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
