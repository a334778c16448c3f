//! Application-level configuration loading, including scoring and durability knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "COMPSYNC_LIVE_CONFIG_PATH";

/// Default inclusive score range accepted from judges.
const DEFAULT_SCORE_MIN: f64 = 0.0;
const DEFAULT_SCORE_MAX: f64 = 100.0;
/// Default time after a routine leaves `current` during which its judges may
/// still amend their scores.
const DEFAULT_GRACE_WINDOW_SECS: u64 = 120;
/// Default age beyond which a stored snapshot is not trusted for resync.
const DEFAULT_SNAPSHOT_STALENESS_HOURS: u64 = 24;
/// Default deadline for a director command awaiting the session gate.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5;
/// Default directory holding per-competition snapshot files and score logs.
const DEFAULT_DATA_DIR: &str = "data";
/// Default capacity of the per-competition viewer broadcast channel.
const DEFAULT_VIEWER_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Lowest score a judge may submit.
    pub score_min: f64,
    /// Highest score a judge may submit.
    pub score_max: f64,
    /// Post-performance window during which scores stay amendable.
    pub grace_window: Duration,
    /// Age beyond which a stored snapshot is discarded at bootstrap.
    pub snapshot_staleness: Duration,
    /// Deadline for a command awaiting acknowledgment by the session gate.
    pub command_timeout: Duration,
    /// When set, `next` is refused while a connected judge is not ready.
    pub require_all_judges_ready: bool,
    /// Directory holding snapshot files and finalized score logs.
    pub data_dir: PathBuf,
    /// Capacity of each competition's viewer broadcast channel.
    pub viewer_channel_capacity: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Whether `score` falls inside the configured inclusive range.
    pub fn score_in_range(&self, score: f64) -> bool {
        score.is_finite() && score >= self.score_min && score <= self.score_max
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            score_min: DEFAULT_SCORE_MIN,
            score_max: DEFAULT_SCORE_MAX,
            grace_window: Duration::from_secs(DEFAULT_GRACE_WINDOW_SECS),
            snapshot_staleness: Duration::from_secs(DEFAULT_SNAPSHOT_STALENESS_HOURS * 3600),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            require_all_judges_ready: false,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            viewer_channel_capacity: DEFAULT_VIEWER_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    score_min: Option<f64>,
    score_max: Option<f64>,
    grace_window_secs: Option<u64>,
    snapshot_staleness_hours: Option<u64>,
    command_timeout_secs: Option<u64>,
    require_all_judges_ready: Option<bool>,
    data_dir: Option<String>,
    viewer_channel_capacity: Option<usize>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            score_min: raw.score_min.unwrap_or(defaults.score_min),
            score_max: raw.score_max.unwrap_or(defaults.score_max),
            grace_window: raw
                .grace_window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.grace_window),
            snapshot_staleness: raw
                .snapshot_staleness_hours
                .map(|hours| Duration::from_secs(hours * 3600))
                .unwrap_or(defaults.snapshot_staleness),
            command_timeout: raw
                .command_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.command_timeout),
            require_all_judges_ready: raw
                .require_all_judges_ready
                .unwrap_or(defaults.require_all_judges_ready),
            data_dir: raw.data_dir.map(PathBuf::from).unwrap_or(defaults.data_dir),
            viewer_channel_capacity: raw
                .viewer_channel_capacity
                .unwrap_or(defaults.viewer_channel_capacity),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_raw_config_keeps_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"score_max": 10.0, "grace_window_secs": 30}"#).unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.score_max, 10.0);
        assert_eq!(config.score_min, DEFAULT_SCORE_MIN);
        assert_eq!(config.grace_window, Duration::from_secs(30));
        assert!(!config.require_all_judges_ready);
    }

    #[test]
    fn score_range_is_inclusive() {
        let config = AppConfig::default();
        assert!(config.score_in_range(0.0));
        assert!(config.score_in_range(100.0));
        assert!(config.score_in_range(87.5));
        assert!(!config.score_in_range(100.1));
        assert!(!config.score_in_range(-0.5));
        assert!(!config.score_in_range(f64::NAN));
    }
}
