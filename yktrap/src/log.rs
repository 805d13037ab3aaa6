//! The implementation of the `YKTRAP_LOG` environment variable.
//!
//! Nothing in here is async-signal-safe: logging only ever happens on the host side of a boundary,
//! once control has come back from guest code.

use crate::errors::ConfigError;
use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};
use strum::{EnumCount, FromRepr, IntoStaticStr};

const LOG_VAR: &str = "YKTRAP_LOG";
const LOG_FORMAT: &str = "[<path|->:]<level>";

/// How verbose should yktrap's logging be?
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, FromRepr, IntoStaticStr, PartialEq, PartialOrd)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Verbosity {
    /// Disable logging entirely.
    Disabled,
    /// Log errors.
    Error,
    /// Log warnings (e.g. guarded calls rejected for nesting too deeply).
    Warning,
    /// Log every unwind to a boundary, with its reason.
    Unwind,
    /// Log every boundary entry and exit.
    Boundary,
}

pub(crate) struct Log {
    /// The requested [Verbosity] level for logging.
    level: Verbosity,
    /// The path to write to. A value of `None` means stderr.
    path: Option<PathBuf>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: Verbosity::Error,
            path: None,
        }
    }
}

impl Log {
    /// Create a [Log] from the value of `YKTRAP_LOG` as returned by `lookup`.
    pub(crate) fn from_lookup(
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let s = match lookup(LOG_VAR) {
            Some(s) => s,
            None => return Ok(Self::default()),
        };
        let (path, level) = match s.split(':').collect::<Vec<_>>()[..] {
            [path, level] => {
                if path == "-" {
                    (None, level)
                } else {
                    let path = PathBuf::from(path);
                    // If there's an existing log file, truncate (i.e. empty it), so that later
                    // appends to the log aren't appending to a previous log run.
                    File::create(&path).map_err(|source| ConfigError::LogFile {
                        path: path.clone(),
                        source,
                    })?;
                    (Some(path), level)
                }
            }
            [level] => (None, level),
            [..] => {
                return Err(ConfigError::BadFormat {
                    var: LOG_VAR,
                    format: LOG_FORMAT,
                })
            }
        };
        let level = level
            .parse::<u8>()
            .map_err(|source| ConfigError::NotAnInteger {
                var: LOG_VAR,
                value: level.to_owned(),
                source,
            })?;
        let max_level = Verbosity::COUNT - 1;
        let level = Verbosity::from_repr(level).ok_or_else(|| ConfigError::OutOfRange {
            var: LOG_VAR,
            value: usize::from(level),
            reason: format!("maximum level is {max_level}"),
        })?;
        Ok(Self { path, level })
    }

    /// Would a message at `level` be written?
    pub(crate) fn enabled(&self, level: Verbosity) -> bool {
        level != Verbosity::Disabled && level <= self.level
    }

    /// Log `msg` as a single `yktrap-<level>: <msg>` line, if `level` is enabled. Failures to
    /// write are ignored.
    pub(crate) fn log(&self, level: Verbosity, msg: &str) {
        if !self.enabled(level) {
            return;
        }
        let name: &'static str = level.into();
        let line = format!("yktrap-{name}: {msg}\n");
        match &self.path {
            Some(p) => append(p, &line),
            None => {
                io::stderr().lock().write_all(line.as_bytes()).ok();
            }
        }
    }
}

/// Append `line` to the file at `path`, recreating the file if it has been removed.
fn append(path: &Path, line: &str) {
    if let Ok(mut f) = File::options().append(true).create(true).open(path) {
        f.write_all(line.as_bytes()).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn lookup(v: Option<&str>) -> impl Fn(&str) -> Option<String> + '_ {
        move |k| {
            assert_eq!(k, LOG_VAR);
            v.map(|x| x.to_owned())
        }
    }

    #[test]
    fn unset_is_errors_to_stderr() {
        let log = Log::from_lookup(&lookup(None)).unwrap();
        assert_eq!(log.level, Verbosity::Error);
        assert!(log.path.is_none());
        assert!(log.enabled(Verbosity::Error));
        assert!(!log.enabled(Verbosity::Warning));
    }

    #[test]
    fn level_only() {
        let log = Log::from_lookup(&lookup(Some("4"))).unwrap();
        assert_eq!(log.level, Verbosity::Boundary);
        assert!(log.path.is_none());
        let log = Log::from_lookup(&lookup(Some("-:3"))).unwrap();
        assert_eq!(log.level, Verbosity::Unwind);
        assert!(log.path.is_none());
        let log = Log::from_lookup(&lookup(Some("0"))).unwrap();
        assert!(!log.enabled(Verbosity::Error));
    }

    #[test]
    fn bad_values() {
        assert!(matches!(
            Log::from_lookup(&lookup(Some("a:b:c"))),
            Err(ConfigError::BadFormat { .. })
        ));
        assert!(matches!(
            Log::from_lookup(&lookup(Some("loud"))),
            Err(ConfigError::NotAnInteger { .. })
        ));
        match Log::from_lookup(&lookup(Some("5"))) {
            Err(e @ ConfigError::OutOfRange { .. }) => {
                assert_eq!(
                    e.to_string(),
                    "YKTRAP_LOG value 5 is out of range: maximum level is 4"
                )
            }
            _ => panic!(),
        }
    }

    #[test]
    fn log_to_file() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("trap.log");
        fs::write(&p, "stale contents\n").unwrap();
        let v = format!("{}:2", p.to_str().unwrap());
        let log = Log::from_lookup(&lookup(Some(&v))).unwrap();
        // The previous run's log is truncated.
        assert_eq!(fs::read_to_string(&p).unwrap(), "");
        log.log(Verbosity::Error, "e");
        log.log(Verbosity::Warning, "w");
        log.log(Verbosity::Unwind, "u");
        log.log(Verbosity::Disabled, "d");
        assert_eq!(
            fs::read_to_string(&p).unwrap(),
            "yktrap-error: e\nyktrap-warning: w\n"
        );
        fs::remove_file(&p).unwrap();
        log.log(Verbosity::Error, "again");
        assert_eq!(fs::read_to_string(&p).unwrap(), "yktrap-error: again\n");
    }
}
