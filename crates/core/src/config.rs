use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str) -> Option<T> {
    profiled_env_opt(profile, key).and_then(|v| v.parse().ok())
}

fn profiled_env_bool(profile: &str, key: &str) -> Option<bool> {
    profiled_env_opt(profile, key).and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

// ── Scheduler config ──────────────────────────────────────────

/// Task manager configuration, read once when the manager is built.
///
/// Parsed from TOML (every key optional) with `CADENCE_*` environment
/// overrides applied on top. When `CADENCE_PROFILE` is set (e.g. `SIM`),
/// each override is first looked up as `{PROFILE}_{KEY}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Warn when a single task runs far longer than an average frame.
    #[serde(default = "default_warn_task_duration")]
    pub warn_task_duration: bool,
    /// Multiple of the average frame duration that triggers a warning.
    #[serde(default = "default_warning_threshold")]
    pub task_duration_warning_threshold: f64,
    /// Sweep removed entries out of the deferred queue every N frames.
    #[serde(default = "default_cleanup_interval")]
    pub do_later_cleanup_interval: u64,
    /// Target upper bound for a frame, used by the epoch limiter.
    #[serde(default = "default_max_epoch")]
    pub max_epoch_duration: f64,
    /// Publish the extra do-later lifecycle events.
    #[serde(default)]
    pub verbose: bool,
    /// `run()` performs a single frame and returns.
    #[serde(default)]
    pub stepping: bool,
    /// `run()` logs task faults and stops instead of propagating them.
    #[serde(default)]
    pub extended_exceptions: bool,
    /// Id of a task to wrap in a profiling session the next time it runs.
    #[serde(default)]
    pub profile_task_id: Option<u64>,
}

fn default_warn_task_duration() -> bool { true }
fn default_warning_threshold() -> f64 { 40.0 }
fn default_cleanup_interval() -> u64 { 2000 }
fn default_max_epoch() -> f64 { 1.0 / 30.0 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            warn_task_duration: default_warn_task_duration(),
            task_duration_warning_threshold: default_warning_threshold(),
            do_later_cleanup_interval: default_cleanup_interval(),
            max_epoch_duration: default_max_epoch(),
            verbose: false,
            stepping: false,
            extended_exceptions: false,
            profile_task_id: None,
        }
    }
}

impl SchedulerConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from defaults plus environment (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `CADENCE_<KEY>` overrides `<key>`, e.g.
    /// `CADENCE_MAX_EPOCH_DURATION` -> `max_epoch_duration`.
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        let p = env_opt("CADENCE_PROFILE").unwrap_or_default().to_uppercase();
        let p = p.as_str();

        if let Some(v) = profiled_env_bool(p, "CADENCE_WARN_TASK_DURATION") {
            self.warn_task_duration = v;
        }
        if let Some(v) = profiled_env_parse(p, "CADENCE_TASK_DURATION_WARNING_THRESHOLD") {
            self.task_duration_warning_threshold = v;
        }
        if let Some(v) = profiled_env_parse(p, "CADENCE_DO_LATER_CLEANUP_INTERVAL") {
            self.do_later_cleanup_interval = v;
        }
        if let Some(v) = profiled_env_parse(p, "CADENCE_MAX_EPOCH_DURATION") {
            self.max_epoch_duration = v;
        }
        if let Some(v) = profiled_env_bool(p, "CADENCE_VERBOSE") {
            self.verbose = v;
        }
        if let Some(v) = profiled_env_bool(p, "CADENCE_STEPPING") {
            self.stepping = v;
        }
        if let Some(v) = profiled_env_bool(p, "CADENCE_EXTENDED_EXCEPTIONS") {
            self.extended_exceptions = v;
        }
        if let Some(v) = profiled_env_parse(p, "CADENCE_PROFILE_TASK_ID") {
            self.profile_task_id = Some(v);
        }
    }

    /// Reject values the step engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.task_duration_warning_threshold.is_finite()
            && self.task_duration_warning_threshold > 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "task_duration_warning_threshold must be a positive number, got {}",
                self.task_duration_warning_threshold
            )));
        }
        if self.do_later_cleanup_interval == 0 {
            return Err(ConfigError::Invalid(
                "do_later_cleanup_interval must be at least 1 frame".into(),
            ));
        }
        if !(self.max_epoch_duration.is_finite() && self.max_epoch_duration >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "max_epoch_duration must be a non-negative number, got {}",
                self.max_epoch_duration
            )));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler config loaded:");
        tracing::info!(
            "  durations:   warn={}, threshold={}x avg frame",
            self.warn_task_duration,
            self.task_duration_warning_threshold
        );
        tracing::info!("  do-laters:   cleanup every {} frames", self.do_later_cleanup_interval);
        tracing::info!("  epoch:       max {:.4}s", self.max_epoch_duration);
        tracing::info!(
            "  modes:       verbose={}, stepping={}, extended_exceptions={}",
            self.verbose,
            self.stepping,
            self.extended_exceptions
        );
    }

    /// JSON view of the config for diagnostics endpoints and reports.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "warn_task_duration": self.warn_task_duration,
            "task_duration_warning_threshold": self.task_duration_warning_threshold,
            "do_later_cleanup_interval": self.do_later_cleanup_interval,
            "max_epoch_duration": self.max_epoch_duration,
            "verbose": self.verbose,
            "stepping": self.stepping,
            "extended_exceptions": self.extended_exceptions,
            "profile_task_id": self.profile_task_id,
        })
    }
}
