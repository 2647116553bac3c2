//! Server configuration.
//!
//! Loaded from a JSON file with every field optional; absent fields take
//! the defaults below. Validation is fail-fast at startup: a config that
//! passes `validate()` never produces a runtime option error.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seconds per minute.
pub const MINUTE: u32 = 60;
/// Seconds per hour.
pub const HOUR: u32 = 60 * MINUTE;
/// Seconds per day.
pub const DAY: u32 = 24 * HOUR;

/// Maximum entries in each default-threshold table.
const MAX_DEFAULT_THRESHOLDS: usize = 8;
/// Maximum entries in the fill-zero pattern list.
const MAX_FILL_BLANK_ZEROS: usize = 8;
/// Minimum expiration measured in periods.
const MIN_EXPIRATION_PERIODS: u32 = 5;

/// Configuration validation and loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("interval should be between 1s and 5min")]
    Interval,
    #[error("period should be at least 1h and no less than interval")]
    Period,
    #[error("expiration should be a multiple of period, at least {MIN_EXPIRATION_PERIODS} periods")]
    Expiration,
    #[error("detector port should be non-zero")]
    DetectorPort,
    #[error("trending factors should be in (0, 1)")]
    TrendingFactor,
    #[error("filter offset should be in (0, 1)")]
    FilterOffset,
    #[error("filter times by period should not exceed expiration")]
    FilterTimes,
    #[error("default threshold tables accept at most {MAX_DEFAULT_THRESHOLDS} non-zero entries")]
    DefaultThresholds,
    #[error("fill blank zeros accepts at most {MAX_FILL_BLANK_ZEROS} patterns")]
    FillBlankZeros,
    #[error("alerter workers should be at least 1")]
    AlerterWorkers,
    #[error("alerter interval should be positive")]
    AlerterInterval,
    #[error("alerter one day limit should be positive")]
    AlerterOneDayLimit,
    #[error("silent time range hours should be within 0..=23")]
    SilentTimeRange,
    #[error("cache percentage should be in [0, 1]")]
    CachePercentage,
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ingestion interval all metrics share, in seconds.
    pub interval: u32,
    /// Storage slab width in seconds.
    pub period: u32,
    /// Retention depth in seconds, a multiple of `period`.
    pub expiration: u32,
    pub storage: StorageConfig,
    pub detector: DetectorConfig,
    pub alerter: AlerterConfig,
}

/// Storage section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the index, metric and event stores.
    pub path: String,
    /// Mirror a sample of links into memory.
    pub enable_cache: bool,
    /// Per-link admission probability for the memory mirror.
    pub cache_percentage: f64,
}

/// Detector section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// TCP port the line protocol listens on.
    pub port: u16,
    /// Trend smoothing factor applied for low severity rules.
    pub trending_factor_low: f64,
    /// Trend smoothing factor applied for middle severity rules.
    pub trending_factor_middle: f64,
    /// Trend smoothing factor applied for high severity rules.
    pub trending_factor_high: f64,
    /// History window half-width as a fraction of `period`.
    pub filter_offset: f64,
    /// Number of same-phase periods history queries look back.
    pub filter_times: usize,
    /// Minimum history points required before scoring.
    pub least_count: usize,
    /// Names matching these patterns are dropped after rule matching.
    pub blacklist: Vec<String>,
    /// Apply the per-pattern interval hit limit.
    pub enable_interval_hit_limit: bool,
    /// Matches allowed per pattern per interval.
    pub interval_hit_limit: u32,
    /// Names matching these patterns bypass the hit limit.
    pub interval_limit_ignore_list: Vec<String>,
    /// Default upper thresholds by pattern, first match wins.
    pub default_threshold_maxs: BTreeMap<String, f64>,
    /// Default lower thresholds by pattern, first match wins.
    pub default_threshold_mins: BTreeMap<String, f64>,
    /// Patterns whose history gaps are filled with zeros.
    pub fill_blank_zeros: Vec<String>,
    /// Name patterns tracked for idleness when matched by high severity
    /// rules.
    pub idle_metric_check_list: Vec<String>,
    /// Seconds between idle sweeps.
    pub idle_metric_check_interval: u32,
    /// Upper bound on tracked idle names.
    pub idle_metric_track_limit: usize,
    /// Include the current period's samples in history queries.
    pub using_recent_data_points: bool,
    /// Log a warning when one sample's detection exceeds this, in
    /// milliseconds.
    pub warning_timeout: u64,
}

/// Alerter section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlerterConfig {
    /// External command receiving the JSON event as its argument; empty
    /// disables command dispatch.
    pub command: String,
    /// Seconds before a running command is killed.
    pub exec_command_timeout: u32,
    /// Worker tasks draining the event channel.
    pub workers: usize,
    /// Minimum seconds between alerts for one `(rule, metric)` key.
    pub interval: u32,
    /// Window the consecutive-hit filter counts within, in seconds.
    pub alert_check_interval: u32,
    /// Consecutive hits inside the window required before notifying.
    pub notify_after: usize,
    /// Accepted alerts per key per day.
    pub one_day_limit: u32,
    /// Default quiet hours `[start, end)` used by projects without their
    /// own range.
    pub default_silent_time_range: [u32; 2],
    /// Names matching these patterns never alert.
    pub blacklist: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: 10,
            period: DAY,
            expiration: 7 * DAY,
            storage: StorageConfig::default(),
            detector: DetectorConfig::default(),
            alerter: AlerterConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "storage".into(),
            enable_cache: false,
            cache_percentage: 0.0,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            port: 2015,
            trending_factor_low: 0.1,
            trending_factor_middle: 0.2,
            trending_factor_high: 0.3,
            filter_offset: 0.01,
            filter_times: 4,
            least_count: 30,
            blacklist: Vec::new(),
            enable_interval_hit_limit: true,
            interval_hit_limit: 100,
            interval_limit_ignore_list: Vec::new(),
            default_threshold_maxs: BTreeMap::new(),
            default_threshold_mins: BTreeMap::new(),
            fill_blank_zeros: Vec::new(),
            idle_metric_check_list: Vec::new(),
            idle_metric_check_interval: 2 * MINUTE,
            idle_metric_track_limit: 10 * 1024,
            using_recent_data_points: true,
            warning_timeout: 300,
        }
    }
}

impl Default for AlerterConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            exec_command_timeout: 10,
            workers: 4,
            interval: 20 * MINUTE,
            alert_check_interval: 20 * MINUTE,
            notify_after: 1,
            one_day_limit: 5,
            default_silent_time_range: [0, 6],
            blacklist: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for
    /// absent fields.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Validate every option. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < 1 || self.interval > 5 * MINUTE {
            return Err(ConfigError::Interval);
        }
        if self.period < HOUR || self.period < self.interval {
            return Err(ConfigError::Period);
        }
        if self.expiration < self.period * MIN_EXPIRATION_PERIODS
            || self.expiration % self.period != 0
        {
            return Err(ConfigError::Expiration);
        }
        if !(0.0..=1.0).contains(&self.storage.cache_percentage) {
            return Err(ConfigError::CachePercentage);
        }
        self.detector.validate(self.period, self.expiration)?;
        self.alerter.validate()
    }
}

impl DetectorConfig {
    fn validate(&self, period: u32, expiration: u32) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::DetectorPort);
        }
        for factor in [
            self.trending_factor_low,
            self.trending_factor_middle,
            self.trending_factor_high,
        ] {
            if factor <= 0.0 || factor >= 1.0 {
                return Err(ConfigError::TrendingFactor);
            }
        }
        if self.filter_offset <= 0.0 || self.filter_offset >= 1.0 {
            return Err(ConfigError::FilterOffset);
        }
        if self.filter_times == 0 || self.filter_times as u32 * period > expiration {
            return Err(ConfigError::FilterTimes);
        }
        for table in [&self.default_threshold_maxs, &self.default_threshold_mins] {
            if table.len() > MAX_DEFAULT_THRESHOLDS || table.values().any(|v| *v == 0.0) {
                return Err(ConfigError::DefaultThresholds);
            }
        }
        if self.fill_blank_zeros.len() > MAX_FILL_BLANK_ZEROS {
            return Err(ConfigError::FillBlankZeros);
        }
        Ok(())
    }
}

impl AlerterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::AlerterWorkers);
        }
        if self.interval == 0 {
            return Err(ConfigError::AlerterInterval);
        }
        if self.one_day_limit == 0 {
            return Err(ConfigError::AlerterOneDayLimit);
        }
        if self.default_silent_time_range.iter().any(|h| *h > 23) {
            return Err(ConfigError::SilentTimeRange);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_interval_bounds() {
        let mut cfg = Config::default();
        cfg.interval = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Interval)));
        cfg.interval = 6 * MINUTE;
        assert!(matches!(cfg.validate(), Err(ConfigError::Interval)));
    }

    #[test]
    fn test_expiration_must_be_period_multiple() {
        let mut cfg = Config::default();
        cfg.expiration = 7 * DAY + 1;
        assert!(matches!(cfg.validate(), Err(ConfigError::Expiration)));
        cfg.expiration = 2 * DAY;
        assert!(matches!(cfg.validate(), Err(ConfigError::Expiration)));
    }

    #[test]
    fn test_filter_times_within_expiration() {
        let mut cfg = Config::default();
        cfg.detector.filter_times = 8;
        assert!(matches!(cfg.validate(), Err(ConfigError::FilterTimes)));
    }

    #[test]
    fn test_zero_default_threshold_rejected() {
        let mut cfg = Config::default();
        cfg.detector
            .default_threshold_maxs
            .insert("a.*".into(), 0.0);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DefaultThresholds)
        ));
    }

    #[test]
    fn test_parse_partial_file() {
        let raw = r#"{"interval": 20, "detector": {"port": 9000}}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.interval, 20);
        assert_eq!(cfg.detector.port, 9000);
        assert_eq!(cfg.period, DAY);
        assert!(cfg.validate().is_ok());
    }
}
