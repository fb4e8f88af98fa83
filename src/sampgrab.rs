//! Sample grabber: a ring buffer over the most recent raw I/Q, for
//! retrospective dumping of the signal that just decoded (or didn't).
//!
//! The pipeline pushes every block; when a frame ages out it asks for a
//! padded window counted backwards from the end of the stream.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fileformat::SampleFormat;

pub struct SampleGrabber {
    buffer: Vec<u8>,
    capacity: usize,
    /// Next write position in the ring.
    head: usize,
    /// Total bytes ever pushed (saturates the ring once past capacity).
    filled: usize,
    /// Grab file counter for unique names.
    file_index: u32,
}

impl SampleGrabber {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            capacity,
            head: 0,
            filled: 0,
            file_index: 0,
        }
    }

    /// Append one raw block, overwriting the oldest data.
    pub fn push(&mut self, iq_buf: &[u8]) {
        for &b in iq_buf {
            self.buffer[self.head] = b;
            self.head = (self.head + 1) % self.capacity;
        }
        self.filled = (self.filled + iq_buf.len()).min(self.capacity);
    }

    /// Write a window of `len` samples ending `end_ago` samples before the
    /// newest data. The file is named `g<NNN>_<freq>M_<rate>k.<ext>` in
    /// `dir` (or the working directory).
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        &mut self,
        len_samples: u32,
        end_ago: u32,
        dir: &str,
        overwrite: bool,
        sample_format: SampleFormat,
        center_frequency: u32,
        sample_rate: u32,
    ) -> Result<PathBuf> {
        let bytes_per_sample = 2 * sample_format.sample_size();
        let len = len_samples as usize * bytes_per_sample;
        let end_ago = end_ago as usize * bytes_per_sample;
        if len + end_ago > self.filled {
            return Err(Error::InvalidParam("grab window larger than buffered data"));
        }

        let ext = match sample_format {
            SampleFormat::Cu8 => "cu8",
            SampleFormat::Cs16 => "cs16",
        };
        self.file_index += 1;
        let name = format!(
            "g{:03}_{:.6}M_{}k.{}",
            self.file_index,
            center_frequency as f64 / 1e6,
            sample_rate / 1000,
            ext
        );
        let path = if dir.is_empty() {
            PathBuf::from(name)
        } else {
            Path::new(dir).join(name)
        };
        if !overwrite && path.exists() {
            return Err(Error::FileExists(path));
        }

        let mut out = BufWriter::new(File::create(&path)?);
        // start of the window, counted back from the ring head
        let back = (len + end_ago) % self.capacity;
        let start = (self.head + self.capacity - back) % self.capacity;
        let mut pos = start;
        let mut remaining = len;
        while remaining > 0 {
            let run = remaining.min(self.capacity - pos);
            out.write_all(&self.buffer[pos..pos + run])?;
            pos = (pos + run) % self.capacity;
            remaining -= run;
        }
        out.flush()?;
        tracing::info!("grabbed signal to {:?}", path);
        Ok(path)
    }
}
