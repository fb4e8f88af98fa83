//! Sample sources.
//!
//! [`SampleSource`] is the contract an SDR front-end (or anything else that
//! produces fixed-size I/Q blocks) implements towards the pipeline. The
//! concrete hardware drivers live outside this crate; [`FileSource`] covers
//! captured files in every recognized input format.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fileformat::{parse_file_info, FileFormat, SampleFormat};

/// Contract for a block-oriented I/Q sample producer. All tuning operations
/// may fail; the pipeline logs and continues where the original would.
pub trait SampleSource: Send {
    /// Native sample format of the blocks this source produces.
    fn sample_format(&self) -> SampleFormat;

    /// Reset the stream before activation.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Activate the stream (start the ADC, begin buffering).
    fn activate(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_center_freq(&mut self, _hz: u32) -> Result<()> {
        Ok(())
    }

    fn set_sample_rate(&mut self, _rate: u32) -> Result<()> {
        Ok(())
    }

    /// Gain spec, driver-defined grammar. Empty means auto.
    fn set_tuner_gain(&mut self, _gain: &str) -> Result<()> {
        Ok(())
    }

    fn set_freq_correction(&mut self, _ppm: i32) -> Result<()> {
        Ok(())
    }

    /// Blocking read of up to `buf.len()` bytes. Returns 0 at end of stream.
    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Ask the source to stop delivering; `read_block` returns 0 afterwards.
    fn stop(&mut self);

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A captured-file sample source. CF32 input is clamped to ±1 and rescaled
/// to Q0.15; S16_AM / S16_FM payloads pass through and override the matching
/// demod buffer in the pipeline.
pub struct FileSource {
    pub(crate) format: FileFormat,
    path: PathBuf,
    reader: BufReader<File>,
    stopped: bool,
    /// Scratch for CF32 conversion.
    floats: Vec<u8>,
}

impl FileSource {
    pub fn open(spec: &str) -> Result<Self> {
        let info = parse_file_info(spec)?;
        let path = PathBuf::from(&info.path);
        let file = File::open(&path)?;
        tracing::info!("reading samples from file {:?} ({:?})", path, info.format);
        Ok(Self {
            format: info.format,
            path,
            reader: BufReader::new(file),
            stopped: false,
            floats: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Reader access for the PULSE_OOK replay path.
    pub(crate) fn reader(&mut self) -> &mut BufReader<File> {
        &mut self.reader
    }
}

impl SampleSource for FileSource {
    fn sample_format(&self) -> SampleFormat {
        match self.format {
            FileFormat::Cu8Iq | FileFormat::S16Am | FileFormat::S16Fm => SampleFormat::Cu8,
            _ => SampleFormat::Cs16,
        }
    }

    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.stopped {
            return Ok(0);
        }
        if self.format == FileFormat::Cf32Iq {
            // read floats, clamp to [-1, 1], scale to Q0.15
            let want = buf.len() / 2 * 4;
            self.floats.resize(want, 0);
            let n = read_full(&mut self.reader, &mut self.floats)?;
            let n_floats = n / 4;
            for i in 0..n_floats {
                let v = f32::from_le_bytes([
                    self.floats[4 * i],
                    self.floats[4 * i + 1],
                    self.floats[4 * i + 2],
                    self.floats[4 * i + 3],
                ]);
                let s = (v * i16::MAX as f32).clamp(-(i16::MAX as f32), i16::MAX as f32) as i16;
                buf[2 * i..2 * i + 2].copy_from_slice(&s.to_le_bytes());
            }
            Ok(n_floats * 2)
        } else {
            Ok(read_full(&mut self.reader, buf)?)
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Read until the buffer is full or the stream ends.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// A canned in-memory source, mostly for tests and embedding hosts.
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
    format: SampleFormat,
    stopped: bool,
}

impl MemorySource {
    pub fn new(data: Vec<u8>, format: SampleFormat) -> Self {
        Self {
            data,
            pos: 0,
            format,
            stopped: false,
        }
    }
}

impl SampleSource for MemorySource {
    fn sample_format(&self) -> SampleFormat {
        self.format
    }

    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.stopped {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
