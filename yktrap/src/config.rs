//! Configuring a [TrapContext].

use crate::{context::TrapContext, errors::ConfigError, log::Log};
use std::env;

/// How many guarded calls may be live at once on a single [TrapContext] if not otherwise
/// specified.
pub const DEFAULT_MAX_NESTING: usize = 1024;
const MAX_NESTING_VAR: &str = "YKTRAP_MAX_NESTING";

/// Configure a [TrapContext].
pub struct TrapContextBuilder {
    max_nesting: usize,
    log: Log,
}

impl TrapContextBuilder {
    /// Create a builder with default parameters, ignoring the environment.
    pub fn new() -> Self {
        Self {
            max_nesting: DEFAULT_MAX_NESTING,
            log: Log::default(),
        }
    }

    /// Create a builder configured from the `YKTRAP_*` environment variables:
    ///
    ///   * `YKTRAP_LOG=[<path|->:]<level>`: where to log to, and how verbosely (0 = off, 1 =
    ///     errors, 2 = warnings, 3 = unwinds, 4 = every boundary entry and exit).
    ///   * `YKTRAP_MAX_NESTING=<n>`: the maximum number of simultaneously live guarded calls per
    ///     context (see [TrapContextBuilder::max_nesting]).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|k| env::var(k).ok())
    }

    /// As [TrapContextBuilder::from_env], but with environment variables looked up via `lookup`.
    pub(crate) fn from_lookup(
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let log = Log::from_lookup(lookup)?;
        let max_nesting = match lookup(MAX_NESTING_VAR) {
            Some(x) => {
                let n = x
                    .parse::<usize>()
                    .map_err(|source| ConfigError::NotAnInteger {
                        var: MAX_NESTING_VAR,
                        value: x.clone(),
                        source,
                    })?;
                if n == 0 {
                    return Err(ConfigError::OutOfRange {
                        var: MAX_NESTING_VAR,
                        value: n,
                        reason: "must be at least 1".to_owned(),
                    });
                }
                n
            }
            None => DEFAULT_MAX_NESTING,
        };
        Ok(Self { max_nesting, log })
    }

    /// Change the maximum number of guarded calls that may be live at once. A guarded call that
    /// would exceed this fails with [TrapCode::StackOverflow](crate::TrapCode::StackOverflow)
    /// without running its body.
    pub fn max_nesting(mut self, max_nesting: usize) -> Self {
        self.max_nesting = max_nesting;
        self
    }

    /// Consume the builder and create a [TrapContext] for the current thread.
    pub fn build(self) -> TrapContext {
        TrapContext::new(self.max_nesting, self.log)
    }
}

impl Default for TrapContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |k| vars.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let b = TrapContextBuilder::from_lookup(&env_of(&[])).unwrap();
        assert_eq!(b.max_nesting, DEFAULT_MAX_NESTING);
        assert_eq!(TrapContextBuilder::new().max_nesting, DEFAULT_MAX_NESTING);
        assert_eq!(TrapContextBuilder::new().max_nesting(3).max_nesting, 3);
    }

    #[test]
    fn max_nesting_from_env() {
        let b =
            TrapContextBuilder::from_lookup(&env_of(&[("YKTRAP_MAX_NESTING", "16")])).unwrap();
        assert_eq!(b.max_nesting, 16);
        assert_eq!(b.build().max_nesting(), 16);
    }

    #[test]
    fn bad_max_nesting() {
        match TrapContextBuilder::from_lookup(&env_of(&[("YKTRAP_MAX_NESTING", "lots")])) {
            Err(e @ ConfigError::NotAnInteger { .. }) => assert_eq!(
                e.to_string(),
                "Invalid YKTRAP_MAX_NESTING value 'lots': invalid digit found in string"
            ),
            _ => panic!(),
        }
        assert!(matches!(
            TrapContextBuilder::from_lookup(&env_of(&[("YKTRAP_MAX_NESTING", "0")])),
            Err(ConfigError::OutOfRange { value: 0, .. })
        ));
    }

    #[test]
    fn bad_log() {
        assert!(matches!(
            TrapContextBuilder::from_lookup(&env_of(&[("YKTRAP_LOG", "x")])),
            Err(ConfigError::NotAnInteger { .. })
        ));
    }
}
