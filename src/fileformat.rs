//! File formats for sample input and dump output, recognized by extension.
//!
//! A spec may carry an explicit override in front of the path, e.g.
//! `cs16:capture.bin`. Compound extensions pick the payload: `x.am.s16` is
//! AM samples, `x.fm.s16` FM samples, `x.logic.u8` the two-bit state stream.

use std::path::Path;

use crate::error::{Error, Result};

/// Size of one I/Q sample in bytes per component stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Unsigned 8-bit I/Q (1 byte per component).
    Cu8,
    /// Signed 16-bit I/Q (2 bytes per component).
    Cs16,
}

impl SampleFormat {
    /// Bytes per component sample.
    pub fn sample_size(self) -> usize {
        match self {
            SampleFormat::Cu8 => 1,
            SampleFormat::Cs16 => 2,
        }
    }
}

/// Every recognized input and dump format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Cu8Iq,
    Cs16Iq,
    /// Float I/Q normalized to [-1, 1].
    Cf32Iq,
    /// Pre-demodulated AM samples; bypasses envelope detection.
    S16Am,
    /// Pre-demodulated FM samples; bypasses the discriminator.
    S16Fm,
    F32Am,
    F32Fm,
    F32I,
    F32Q,
    /// Two-bit-per-sample state stream (bit 1 frame, bit 2 OOK, bit 3 FSK).
    U8Logic,
    /// Value-Change-Dump text.
    VcdLogic,
    /// Pre-captured pulse/gap text stream.
    PulseOok,
}

impl FileFormat {
    fn from_token(token: &str) -> Option<Self> {
        Some(match token.to_ascii_lowercase().as_str() {
            "cu8" => FileFormat::Cu8Iq,
            "cs16" => FileFormat::Cs16Iq,
            "cf32" => FileFormat::Cf32Iq,
            "am.s16" | "am" => FileFormat::S16Am,
            "fm.s16" | "fm" => FileFormat::S16Fm,
            "am.f32" => FileFormat::F32Am,
            "fm.f32" => FileFormat::F32Fm,
            "i.f32" => FileFormat::F32I,
            "q.f32" => FileFormat::F32Q,
            "logic.u8" | "logic" => FileFormat::U8Logic,
            "vcd" => FileFormat::VcdLogic,
            "ook" => FileFormat::PulseOok,
            _ => return None,
        })
    }

    /// Sample size for I/Q input formats; `None` for everything else.
    pub fn sample_format(self) -> Option<SampleFormat> {
        match self {
            FileFormat::Cu8Iq => Some(SampleFormat::Cu8),
            FileFormat::Cs16Iq | FileFormat::Cf32Iq => Some(SampleFormat::Cs16),
            _ => None,
        }
    }
}

/// A parsed file spec: format plus path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub format: FileFormat,
    pub path: String,
}

/// Parse `[format:]path`, falling back to the (possibly compound) extension.
pub fn parse_file_info(spec: &str) -> Result<FileInfo> {
    if let Some((prefix, path)) = spec.split_once(':') {
        if let Some(format) = FileFormat::from_token(prefix) {
            return Ok(FileInfo {
                format,
                path: path.to_string(),
            });
        }
    }

    let name = Path::new(spec)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(spec)
        .to_ascii_lowercase();

    // longest matching compound extension wins
    let mut parts: Vec<&str> = name.split('.').skip(1).collect();
    while !parts.is_empty() {
        let token = parts.join(".");
        if let Some(format) = FileFormat::from_token(&token) {
            return Ok(FileInfo {
                format,
                path: spec.to_string(),
            });
        }
        parts.remove(0);
    }
    Err(Error::FileFormat(spec.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_simple_extensions() {
        assert_eq!(parse_file_info("x.cu8").unwrap().format, FileFormat::Cu8Iq);
        assert_eq!(parse_file_info("x.cs16").unwrap().format, FileFormat::Cs16Iq);
        assert_eq!(parse_file_info("x.cf32").unwrap().format, FileFormat::Cf32Iq);
        assert_eq!(parse_file_info("x.ook").unwrap().format, FileFormat::PulseOok);
        assert_eq!(parse_file_info("x.vcd").unwrap().format, FileFormat::VcdLogic);
    }

    #[test]
    fn compound_extensions_pick_the_payload() {
        assert_eq!(parse_file_info("sig.am.s16").unwrap().format, FileFormat::S16Am);
        assert_eq!(parse_file_info("sig.fm.s16").unwrap().format, FileFormat::S16Fm);
        assert_eq!(parse_file_info("sig.logic.u8").unwrap().format, FileFormat::U8Logic);
        assert_eq!(parse_file_info("sig.i.f32").unwrap().format, FileFormat::F32I);
    }

    #[test]
    fn explicit_override_beats_extension() {
        let info = parse_file_info("cs16:capture.dat").unwrap();
        assert_eq!(info.format, FileFormat::Cs16Iq);
        assert_eq!(info.path, "capture.dat");
    }

    #[test]
    fn unknown_extension_errors() {
        assert!(parse_file_info("x.wav").is_err());
    }
}
