//! Sample dumpers: write raw or converted sample streams alongside decoding.
//!
//! Each dumper converts the current block into its target format (including
//! Q0.7 <-> Q0.15 rescaling between CU8 and CS16) and appends it to a file.
//! VCD and PULSE_OOK dumpers are event-based instead and are fed per package
//! by the pipeline. A short write is fatal to the pipeline - samples would
//! be silently lost otherwise.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::fileformat::{parse_file_info, FileFormat, SampleFormat};
use crate::pulse::{self, PulseData};

/// One open dump target.
pub struct Dumper {
    pub format: FileFormat,
    pub(crate) file: BufWriter<File>,
    path: String,
}

impl Dumper {
    /// Open a dump target from a `[format:]path` spec. Refuses to clobber an
    /// existing file unless `overwrite` is set. VCD and PULSE_OOK targets get
    /// their header written immediately.
    pub fn create(spec: &str, overwrite: bool, sample_rate: u32) -> Result<Self> {
        let info = parse_file_info(spec)?;
        if !overwrite && Path::new(&info.path).exists() {
            return Err(Error::FileExists(info.path.into()));
        }
        let file = File::create(&info.path)?;
        let mut dumper = Self {
            format: info.format,
            file: BufWriter::new(file),
            path: info.path,
        };
        match dumper.format {
            FileFormat::VcdLogic => pulse::print_vcd_header(&mut dumper.file, sample_rate)?,
            FileFormat::PulseOok => PulseData::print_pulse_header(&mut dumper.file, sample_rate)?,
            _ => {}
        }
        Ok(dumper)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Scratch buffers for the per-block format conversions, reused across blocks.
#[derive(Default)]
pub struct DumpBuffers {
    bytes: Vec<u8>,
    floats: Vec<f32>,
}

/// Write one block to every sample-stream dumper. `iq_buf` is the raw block,
/// `am_buf`/`fm_buf` the demodulated streams, `u8_buf` the logic overlay.
#[allow(clippy::too_many_arguments)]
pub fn dump_samples(
    dumpers: &mut [Dumper],
    scratch: &mut DumpBuffers,
    iq_buf: &[u8],
    sample_format: SampleFormat,
    n_samples: usize,
    am_buf: &[i16],
    fm_buf: &[i16],
    u8_buf: &[u8],
) -> Result<()> {
    for dumper in dumpers {
        if matches!(dumper.format, FileFormat::VcdLogic | FileFormat::PulseOok) {
            continue;
        }
        let res = write_block(
            dumper,
            scratch,
            iq_buf,
            sample_format,
            n_samples,
            am_buf,
            fm_buf,
            u8_buf,
        );
        if let Err(e) = res {
            tracing::error!("short write on {:?}, samples lost", dumper.path);
            return Err(e.into());
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_block(
    dumper: &mut Dumper,
    scratch: &mut DumpBuffers,
    iq_buf: &[u8],
    sample_format: SampleFormat,
    n_samples: usize,
    am_buf: &[i16],
    fm_buf: &[i16],
    u8_buf: &[u8],
) -> io::Result<()> {
    let out = &mut dumper.file;
    match dumper.format {
        FileFormat::Cu8Iq => match sample_format {
            SampleFormat::Cu8 => out.write_all(&iq_buf[..n_samples * 2])?,
            SampleFormat::Cs16 => {
                // scale Q0.15 to Q0.7
                scratch.bytes.clear();
                for n in 0..n_samples * 2 {
                    let v = i16::from_le_bytes([iq_buf[2 * n], iq_buf[2 * n + 1]]);
                    scratch.bytes.push(((v >> 8) as i16 + 128) as u8);
                }
                out.write_all(&scratch.bytes)?;
            }
        },
        FileFormat::Cs16Iq => match sample_format {
            SampleFormat::Cs16 => out.write_all(&iq_buf[..n_samples * 4])?,
            SampleFormat::Cu8 => {
                // scale Q0.7 to Q0.15
                scratch.bytes.clear();
                for &b in &iq_buf[..n_samples * 2] {
                    let v = ((b as i16 - 128) << 8) as i16;
                    scratch.bytes.extend_from_slice(&v.to_le_bytes());
                }
                out.write_all(&scratch.bytes)?;
            }
        },
        FileFormat::S16Am => write_i16s(out, &am_buf[..n_samples])?,
        FileFormat::S16Fm => write_i16s(out, &fm_buf[..n_samples])?,
        FileFormat::F32Am => {
            scratch.floats.clear();
            scratch
                .floats
                .extend(am_buf[..n_samples].iter().map(|&v| v as f32 / 32768.0));
            write_f32s(out, &scratch.floats)?;
        }
        FileFormat::F32Fm => {
            scratch.floats.clear();
            scratch
                .floats
                .extend(fm_buf[..n_samples].iter().map(|&v| v as f32 / 32768.0));
            write_f32s(out, &scratch.floats)?;
        }
        FileFormat::F32I | FileFormat::F32Q => {
            let component = usize::from(dumper.format == FileFormat::F32Q);
            scratch.floats.clear();
            match sample_format {
                SampleFormat::Cu8 => {
                    for n in 0..n_samples {
                        let v = iq_buf[n * 2 + component] as f32 - 128.0;
                        scratch.floats.push(v / 128.0);
                    }
                }
                SampleFormat::Cs16 => {
                    for n in 0..n_samples {
                        let i = (n * 2 + component) * 2;
                        let v = i16::from_le_bytes([iq_buf[i], iq_buf[i + 1]]);
                        scratch.floats.push(v as f32 / 32768.0);
                    }
                }
            }
            write_f32s(out, &scratch.floats)?;
        }
        FileFormat::U8Logic => out.write_all(&u8_buf[..n_samples])?,
        FileFormat::Cf32Iq | FileFormat::VcdLogic | FileFormat::PulseOok => {}
    }
    Ok(())
}

fn write_i16s(out: &mut dyn Write, data: &[i16]) -> io::Result<()> {
    for &v in data {
        out.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn write_f32s(out: &mut dyn Write, data: &[f32]) -> io::Result<()> {
    for &v in data {
        out.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> String {
        let dir = std::env::temp_dir().join("rx433-dumper-tests");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn refuses_to_clobber_without_overwrite() {
        let path = tmp_path("clobber.cu8");
        std::fs::write(&path, b"x").unwrap();
        assert!(Dumper::create(&path, false, 250_000).is_err());
        assert!(Dumper::create(&path, true, 250_000).is_ok());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn cu8_to_cs16_rescales() {
        let path = tmp_path("conv.cs16");
        let mut dumper = Dumper::create(&path, true, 250_000).unwrap();
        let iq = [128u8, 0, 255, 128];
        let mut scratch = DumpBuffers::default();
        write_block(
            &mut dumper,
            &mut scratch,
            &iq,
            SampleFormat::Cu8,
            2,
            &[],
            &[],
            &[],
        )
        .unwrap();
        dumper.file.flush().unwrap();
        drop(dumper);
        let bytes = std::fs::read(&path).unwrap();
        let v0 = i16::from_le_bytes([bytes[0], bytes[1]]);
        let v1 = i16::from_le_bytes([bytes[2], bytes[3]]);
        let v2 = i16::from_le_bytes([bytes[4], bytes[5]]);
        assert_eq!(v0, 0); // 128 -> 0
        assert_eq!(v1, -128 << 8); // 0 -> -32768
        assert_eq!(v2, 127 << 8); // 255 -> 32512
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn am_stream_writes_le_i16() {
        let path = tmp_path("sig.am.s16");
        let mut dumper = Dumper::create(&path, true, 250_000).unwrap();
        let am = [100i16, -100, 16384];
        let mut scratch = DumpBuffers::default();
        write_block(
            &mut dumper,
            &mut scratch,
            &[],
            SampleFormat::Cu8,
            3,
            &am,
            &[],
            &[],
        )
        .unwrap();
        dumper.file.flush().unwrap();
        drop(dumper);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 16384);
        std::fs::remove_file(&path).ok();
    }
}
