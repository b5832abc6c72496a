//! Search-run configuration.
//!
//! Read from an optional TOML file; every field has a default, and command-line
//! flags override whatever the file says.
//!
//! ```toml
//! n_subsets = 50
//! exploration_ratio = 0.5
//! test_fraction = 0.3
//! on_evaluation_error = "skip"
//! candidate_timeout_secs = 600
//! seed = 42
//! threads = 8
//! max_iterations = 20
//! ```

use crate::evaluate::DEFAULT_TEST_FRACTION;
use crate::generate::{DEFAULT_EXPLORATION_RATIO, DEFAULT_N_SUBSETS, SelectionParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while reading the search configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the search configuration from TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidRange { field: &'static str, reason: String },
}

/// What a run does when scoring a candidate fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationPolicy {
    /// The first failure fails the run; nothing is recorded for that iteration.
    #[default]
    Abort,
    /// Failed candidates are left out of the record and listed in `skipped_<k>.txt`.
    Skip,
}

impl fmt::Display for EvaluationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        })
    }
}

impl FromStr for EvaluationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(ConfigError::InvalidRange {
                field: "on_evaluation_error",
                reason: format!("'{other}' is neither 'abort' nor 'skip'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Elites carried into each heuristic iteration.
    pub n_subsets: usize,
    /// Exploration sample size relative to `n_subsets`.
    pub exploration_ratio: f64,
    /// Held-out fraction of samples per evaluation.
    pub test_fraction: f64,
    pub on_evaluation_error: EvaluationPolicy,
    pub candidate_timeout_secs: Option<u64>,
    /// Base seed. Without one, a fresh seed is drawn and logged.
    pub seed: Option<u64>,
    /// Scoring worker threads. Defaults to the number of logical CPUs.
    pub threads: Option<usize>,
    /// Stop after this subset size instead of growing to the full universe.
    pub max_iterations: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_subsets: DEFAULT_N_SUBSETS,
            exploration_ratio: DEFAULT_EXPLORATION_RATIO,
            test_fraction: DEFAULT_TEST_FRACTION,
            on_evaluation_error: EvaluationPolicy::default(),
            candidate_timeout_secs: None,
            seed: None,
            threads: None,
            max_iterations: None,
        }
    }
}

impl SearchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml(&toml_string)
    }

    pub fn from_toml(toml_string: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| ConfigError::InvalidRange { field, reason };

        if self.n_subsets == 0 {
            return Err(invalid("n_subsets", "must be at least 1".to_string()));
        }
        if !(self.exploration_ratio.is_finite() && self.exploration_ratio >= 0.0) {
            return Err(invalid(
                "exploration_ratio",
                format!("{} must be a finite, non-negative number", self.exploration_ratio),
            ));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(invalid(
                "test_fraction",
                format!("{} must lie strictly between 0 and 1", self.test_fraction),
            ));
        }
        if self.threads == Some(0) {
            return Err(invalid("threads", "must be at least 1".to_string()));
        }
        if self.candidate_timeout_secs == Some(0) {
            return Err(invalid("candidate_timeout_secs", "must be at least 1".to_string()));
        }
        if self.max_iterations == Some(0) {
            return Err(invalid("max_iterations", "must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn selection(&self) -> SelectionParams {
        SelectionParams {
            n_subsets: self.n_subsets,
            exploration_ratio: self.exploration_ratio,
        }
    }

    pub fn candidate_timeout(&self) -> Option<Duration> {
        self.candidate_timeout_secs.map(Duration::from_secs)
    }

    pub fn worker_threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }

    /// The final subset size for a universe of `n` features.
    pub fn last_iteration(&self, n: usize) -> usize {
        self.max_iterations.map_or(n, |max| max.min(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = SearchConfig::from_toml("").unwrap();
        assert_eq!(config, SearchConfig::default());
        assert_eq!(config.n_subsets, 50);
        assert_eq!(config.exploration_ratio, 0.5);
        assert_eq!(config.on_evaluation_error, EvaluationPolicy::Abort);
        assert!(config.candidate_timeout().is_none());
    }

    #[test]
    fn fields_are_read_from_toml() {
        let config = SearchConfig::from_toml(
            "n_subsets = 10\non_evaluation_error = \"skip\"\ncandidate_timeout_secs = 5\nmax_iterations = 3\n",
        )
        .unwrap();
        assert_eq!(config.n_subsets, 10);
        assert_eq!(config.on_evaluation_error, EvaluationPolicy::Skip);
        assert_eq!(config.candidate_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.last_iteration(10), 3);
        assert_eq!(config.last_iteration(2), 2);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            SearchConfig::from_toml("n_subset = 10\n"),
            Err(ConfigError::TomlParseError(_))
        ));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            SearchConfig { n_subsets: 0, ..SearchConfig::default() },
            SearchConfig { exploration_ratio: -0.1, ..SearchConfig::default() },
            SearchConfig { exploration_ratio: f64::NAN, ..SearchConfig::default() },
            SearchConfig { test_fraction: 0.0, ..SearchConfig::default() },
            SearchConfig { test_fraction: 1.0, ..SearchConfig::default() },
            SearchConfig { threads: Some(0), ..SearchConfig::default() },
            SearchConfig { candidate_timeout_secs: Some(0), ..SearchConfig::default() },
            SearchConfig { max_iterations: Some(0), ..SearchConfig::default() },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidRange { .. })),
                "accepted {config:?}"
            );
        }
    }

    #[test]
    fn policy_parses_from_flags() {
        assert_eq!("Skip".parse::<EvaluationPolicy>().unwrap(), EvaluationPolicy::Skip);
        assert!("retry".parse::<EvaluationPolicy>().is_err());
    }
}
