//! Compiled regular-expression pattern lists.
//!
//! Branch ignore/allow lists and conflicting-file ignore lists are written as
//! regular expressions in the configuration file. They are compiled exactly
//! once, when the configuration is loaded, so an invalid pattern is reported
//! at startup rather than in the middle of a run.

use regex_lite::Regex;

use crate::errors::ConfigError;

/// An ordered set of compiled patterns. A value matches the set when any
/// pattern finds a match anywhere in it (unanchored, like `Regex::is_match`).
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    /// Compile every pattern in `sources`. `field` names the configuration
    /// key for error reporting.
    pub fn compile<S: AsRef<str>>(field: &str, sources: &[S]) -> Result<Self, ConfigError> {
        let patterns = sources
            .iter()
            .map(|s| {
                let source = s.as_ref();
                Regex::new(source).map_err(|e| ConfigError::InvalidPattern {
                    field: field.to_string(),
                    pattern: source.to_string(),
                    detail: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// `true` if any pattern matches `value`.
    pub fn matches(&self, value: &str) -> bool {
        self.first_match(value).is_some()
    }

    /// The source text of the first pattern matching `value`, for logging.
    pub fn first_match(&self, value: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|re| re.is_match(value))
            .map(|re| re.as_str())
    }
}
