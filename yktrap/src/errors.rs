//! Errors that can occur when configuring yktrap.

use std::{io, num::ParseIntError, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable didn't have the expected shape.
    #[error("{var} must be of the format `{format}`")]
    BadFormat {
        var: &'static str,
        format: &'static str,
    },
    /// An environment variable that should hold an integer didn't.
    #[error("Invalid {var} value '{value}': {source}")]
    NotAnInteger {
        var: &'static str,
        value: String,
        source: ParseIntError,
    },
    /// An integer was outside the range allowed for `var`.
    #[error("{var} value {value} is out of range: {reason}")]
    OutOfRange {
        var: &'static str,
        value: usize,
        reason: String,
    },
    /// The log file couldn't be created.
    #[error("Can't create log file {}: {source}", .path.display())]
    LogFile { path: PathBuf, source: io::Error },
}
