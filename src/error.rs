//! Crate-wide error type.
//!
//! The pipeline distinguishes errors that abort a start/run cycle (I/O on
//! sample dumps, bad flex specs, source failures) from recoverable conditions
//! (decoder rejections, detector overflows) which are logged and counted but
//! never surface as `Err`.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A mandatory parameter was missing or out of range; the operation is refused.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// The pipeline was asked to start while already running.
    #[error("internal error: {0}")]
    Internal(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Unrecognized file extension or malformed format override.
    #[error("unknown file format: {0}")]
    FileFormat(String),

    /// Output file exists and overwrite was not allowed.
    #[error("output file already exists: {0}")]
    FileExists(PathBuf),

    /// Malformed flex decoder spec string.
    #[error("bad flex spec: {0}")]
    FlexSpec(String),

    /// The sample source reported a failure (open, tune, read).
    #[error("sample source error: {0}")]
    Source(String),
}
