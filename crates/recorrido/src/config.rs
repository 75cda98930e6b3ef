//! Harness configuration
//!
//! Loaded from YAML (or JSON) with every field optional. Durations are
//! written in milliseconds:
//!
//! ```yaml
//! parallelism: 4
//! default_timeout_ms: 5000
//! default_poll_interval_ms: 50
//! retry_whitelist: [action_rejected]
//! retry_max_attempts: 3
//! retry_backoff: { kind: exponential, initial_ms: 100, factor: 2.0, max_ms: 2000 }
//! lane_provision_retries: 2
//! test_timeout_ms: 120000
//! artifact_dir: target/recorrido/artifacts
//! log_tail_lines: 200
//! ```

use crate::capture::DEFAULT_LOG_TAIL_LINES;
use crate::result::{RecorridoError, RecorridoResult};
use crate::retry::{
    BackoffSchedule, RetryMatcher, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRYABLE_SIGNATURE,
};
use crate::wait::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default provisioning retries per lane
pub const DEFAULT_PROVISION_RETRIES: u32 = 2;

/// Default whole-test budget (2 minutes)
pub const DEFAULT_TEST_TIMEOUT_MS: u64 = 120_000;

/// Default artifact directory
pub const DEFAULT_ARTIFACT_DIR: &str = "target/recorrido/artifacts";

/// Serialize a [`Duration`] as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Lane pool size
    pub parallelism: usize,
    /// Wait timeout used by page actions
    #[serde(rename = "default_timeout_ms", with = "duration_ms")]
    pub default_timeout: Duration,
    /// Poll interval used by page actions
    #[serde(rename = "default_poll_interval_ms", with = "duration_ms")]
    pub default_poll_interval: Duration,
    /// Error signatures the retry engine treats as transient
    pub retry_whitelist: BTreeSet<String>,
    /// Attempt ceiling for retried actions
    pub retry_max_attempts: u32,
    /// Delay between retried attempts
    pub retry_backoff: BackoffSchedule,
    /// Extra provisioning attempts before a test is marked `error`
    pub lane_provision_retries: u32,
    /// Whole-test budget
    #[serde(rename = "test_timeout_ms", with = "duration_ms")]
    pub test_timeout: Duration,
    /// Where failure artifacts are written
    pub artifact_dir: PathBuf,
    /// Log lines kept in each artifact
    pub log_tail_lines: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            default_timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            default_poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry_whitelist: BTreeSet::from([DEFAULT_RETRYABLE_SIGNATURE.to_string()]),
            retry_max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: BackoffSchedule::default(),
            lane_provision_retries: DEFAULT_PROVISION_RETRIES,
            test_timeout: Duration::from_millis(DEFAULT_TEST_TIMEOUT_MS),
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
        }
    }
}

impl HarnessConfig {
    /// Parse YAML
    pub fn from_yaml_str(yaml: &str) -> RecorridoResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml`/`.json` file
    pub fn from_path(path: &Path) -> RecorridoResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RecorridoError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            let config: Self = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> RecorridoResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> RecorridoResult<()> {
        if self.parallelism == 0 {
            return Err(RecorridoError::config("parallelism must be at least 1"));
        }
        if self.retry_max_attempts == 0 {
            return Err(RecorridoError::config(
                "retry_max_attempts must be at least 1",
            ));
        }
        if self.default_poll_interval.is_zero() {
            return Err(RecorridoError::config(
                "default_poll_interval_ms must be positive",
            ));
        }
        if self.test_timeout.is_zero() {
            return Err(RecorridoError::config("test_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Set parallelism
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the default wait timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the default poll interval
    #[must_use]
    pub const fn with_default_poll_interval(mut self, interval: Duration) -> Self {
        self.default_poll_interval = interval;
        self
    }

    /// Replace the retry whitelist
    #[must_use]
    pub fn with_retry_whitelist<I, S>(mut self, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retry_whitelist = signatures.into_iter().map(Into::into).collect();
        self
    }

    /// Set the retry attempt ceiling
    #[must_use]
    pub const fn with_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = attempts;
        self
    }

    /// Set the retry backoff
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set provisioning retries
    #[must_use]
    pub const fn with_lane_provision_retries(mut self, retries: u32) -> Self {
        self.lane_provision_retries = retries;
        self
    }

    /// Set the whole-test budget
    #[must_use]
    pub const fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Set the artifact directory
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Set the log tail length
    #[must_use]
    pub const fn with_log_tail_lines(mut self, lines: usize) -> Self {
        self.log_tail_lines = lines;
        self
    }

    /// Retry policy for page actions
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_backoff.clone(),
            RetryMatcher::Whitelist(self.retry_whitelist.clone()),
        )
    }

    /// Retry policy for lane provisioning: every failure is retried
    #[must_use]
    pub fn provision_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lane_provision_retries.saturating_add(1),
            self.retry_backoff.clone(),
            RetryMatcher::predicate(|_| true),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    
    #[test]
    fn test_defaults() {
        let c = HarnessConfig::default();
        assert!(c.parallelism >= 1);
        assert_eq!(c.default_timeout, Duration::from_secs(5));
        assert_eq!(c.default_poll_interval, Duration::from_millis(50));
        assert!(c.retry_whitelist.contains("action_rejected"));
        assert_eq!(c.retry_max_attempts, 3);
        assert_eq!(c.lane_provision_retries, 2);
        assert_eq!(c.test_timeout, Duration::from_secs(120));
        assert_eq!(c.log_tail_lines, 200);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let c = HarnessConfig::from_yaml_str(
            "parallelism: 3\ndefault_timeout_ms: 750\nretry_whitelist: [action_rejected, timeout]\n",
        )
        .unwrap();
        assert_eq!(c.parallelism, 3);
        assert_eq!(c.default_timeout, Duration::from_millis(750));
        assert_eq!(c.retry_whitelist.len(), 2);
        assert_eq!(c.retry_max_attempts, 3);
    }

    #[test]
    fn test_backoff_from_yaml() {
        let c = HarnessConfig::from_yaml_str(
            "retry_backoff:\n  kind: explicit\n  delays_ms: [5, 10]\n",
        )
        .unwrap();
        assert_eq!(c.retry_policy().backoff().delay_for(3), Duration::from_millis(10));
    }

    #[test]
    fn test_validation() {
        assert!(HarnessConfig::from_yaml_str("parallelism: 0").is_err());
        assert!(HarnessConfig::from_yaml_str("retry_max_attempts: 0").is_err());
        assert!(HarnessConfig::from_yaml_str("default_poll_interval_ms: 0").is_err());
        assert!(HarnessConfig::from_yaml_str("no_such_key: 1").is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let c = HarnessConfig::default().with_parallelism(2).with_artifact_dir("out");
        let back = HarnessConfig::from_yaml_str(&c.to_yaml().unwrap()).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn test_from_path_json_and_yaml() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(yaml, "parallelism: 6").unwrap();
        assert_eq!(HarnessConfig::from_path(yaml.path()).unwrap().parallelism, 6);

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(json, "{{\"log_tail_lines\": 10}}").unwrap();
        assert_eq!(HarnessConfig::from_path(json.path()).unwrap().log_tail_lines, 10);

        let err = HarnessConfig::from_path(Path::new("/definitely/missing.yaml")).unwrap_err();
        assert_eq!(err.signature(), "config");
    }

    #[test]
    fn test_policies() {
        let c = HarnessConfig::default()
            .with_retry_whitelist(["timeout"])
            .with_retry_max_attempts(4)
            .with_lane_provision_retries(0);
        let policy = c.retry_policy();
        assert_eq!(policy.max_attempts(), 4);
        let timeout = RecorridoError::Timeout {
            description: "x".into(),
            elapsed: Duration::ZERO,
            last_observed: "y".into(),
        };
        assert!(matches!(
            policy.classify::<()>(Err(timeout)),
            crate::retry::AttemptOutcome::Retryable(_)
        ));
        assert_eq!(c.provision_policy().max_attempts(), 1);
    }
}
