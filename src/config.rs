//! Configuration management with environment variable support.
//!
//! Every timing constant the backup engine relies on can be tuned from the
//! environment. Values that fail to parse fall back to the default.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `PANEL_BACKUP_CAPTURE_MIN_INTERVAL_MS` | Minimum gap between two viewport captures | `550` |
//! | `PANEL_BACKUP_CAPTURE_ATTEMPTS` | Attempts per viewport capture | `3` |
//! | `PANEL_BACKUP_CAPTURE_BACKOFF_MS` | Backoff base between capture attempts | `500` |
//! | `PANEL_BACKUP_CAPTURE_TIMEOUT_MS` | Timeout of a single capture attempt | `5000` |
//! | `PANEL_BACKUP_SETTLE_MS` | Delay after navigating to a panel | `400` |
//! | `PANEL_BACKUP_SUBPANEL_SETTLE_MS` | Delay after activating a sub-panel | `600` |
//! | `PANEL_BACKUP_VARIANT_SETTLE_MS` | Delay after switching a profile | `500` |
//! | `PANEL_BACKUP_DISCOVERY_ATTEMPTS` | Attempts to find navigable panels | `10` |
//! | `PANEL_BACKUP_DISCOVERY_DELAY_MS` | Delay between discovery attempts | `1000` |
//! | `PANEL_BACKUP_QUIESCENCE_POLL_MS` | Console output poll interval | `1000` |
//! | `PANEL_BACKUP_DIFF_TIMEOUT_MS` | Budget for the `diff all` output | `30000` |
//! | `PANEL_BACKUP_DUMP_TIMEOUT_MS` | Budget for the `dump all` output | `90000` |
//! | `PANEL_BACKUP_KEEPALIVE_SECS` | Liveness signal interval | `20` |
//! | `PANEL_BACKUP_OUTPUT_DIR` | Where packaged archives are written | `./backups` |
//! | `PANEL_BACKUP_PREFERENCES` | Preferences file | `./backups/preferences.json` |

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default minimum gap between captures (the primitive allows ~2/s)
pub const DEFAULT_CAPTURE_MIN_INTERVAL_MS: u64 = 550;

/// Default number of capture attempts
pub const DEFAULT_CAPTURE_ATTEMPTS: u32 = 3;

/// Default capture backoff base (milliseconds)
pub const DEFAULT_CAPTURE_BACKOFF_MS: u64 = 500;

/// Default timeout for one capture attempt (milliseconds)
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 5_000;

/// Default settle delay after panel navigation (milliseconds)
pub const DEFAULT_SETTLE_MS: u64 = 400;

/// Default settle delay after a sub-panel click (milliseconds)
pub const DEFAULT_SUBPANEL_SETTLE_MS: u64 = 600;

/// Default settle delay after a profile switch (milliseconds)
pub const DEFAULT_VARIANT_SETTLE_MS: u64 = 500;

/// Default number of panel discovery attempts
pub const DEFAULT_DISCOVERY_ATTEMPTS: u32 = 10;

/// Default delay between discovery attempts (milliseconds)
pub const DEFAULT_DISCOVERY_DELAY_MS: u64 = 1_000;

/// Default console poll interval (milliseconds)
pub const DEFAULT_QUIESCENCE_POLL_MS: u64 = 1_000;

/// Default budget for the concise console dump (milliseconds)
pub const DEFAULT_DIFF_TIMEOUT_MS: u64 = 30_000;

/// Default budget for the full console dump (milliseconds)
pub const DEFAULT_DUMP_TIMEOUT_MS: u64 = 90_000;

/// Default keepalive interval (seconds)
pub const DEFAULT_KEEPALIVE_SECS: u64 = 20;

/// Default archive output directory
pub const DEFAULT_OUTPUT_DIR: &str = "./backups";

/// Default preferences file name inside the output directory
pub const DEFAULT_PREFERENCES_FILE: &str = "preferences.json";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_CAPTURE_MIN_INTERVAL_MS: &str = "PANEL_BACKUP_CAPTURE_MIN_INTERVAL_MS";
pub const ENV_CAPTURE_ATTEMPTS: &str = "PANEL_BACKUP_CAPTURE_ATTEMPTS";
pub const ENV_CAPTURE_BACKOFF_MS: &str = "PANEL_BACKUP_CAPTURE_BACKOFF_MS";
pub const ENV_CAPTURE_TIMEOUT_MS: &str = "PANEL_BACKUP_CAPTURE_TIMEOUT_MS";
pub const ENV_SETTLE_MS: &str = "PANEL_BACKUP_SETTLE_MS";
pub const ENV_SUBPANEL_SETTLE_MS: &str = "PANEL_BACKUP_SUBPANEL_SETTLE_MS";
pub const ENV_VARIANT_SETTLE_MS: &str = "PANEL_BACKUP_VARIANT_SETTLE_MS";
pub const ENV_DISCOVERY_ATTEMPTS: &str = "PANEL_BACKUP_DISCOVERY_ATTEMPTS";
pub const ENV_DISCOVERY_DELAY_MS: &str = "PANEL_BACKUP_DISCOVERY_DELAY_MS";
pub const ENV_QUIESCENCE_POLL_MS: &str = "PANEL_BACKUP_QUIESCENCE_POLL_MS";
pub const ENV_DIFF_TIMEOUT_MS: &str = "PANEL_BACKUP_DIFF_TIMEOUT_MS";
pub const ENV_DUMP_TIMEOUT_MS: &str = "PANEL_BACKUP_DUMP_TIMEOUT_MS";
pub const ENV_KEEPALIVE_SECS: &str = "PANEL_BACKUP_KEEPALIVE_SECS";
pub const ENV_OUTPUT_DIR: &str = "PANEL_BACKUP_OUTPUT_DIR";
pub const ENV_PREFERENCES: &str = "PANEL_BACKUP_PREFERENCES";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Timing of the backup engine
    pub backup: BackupSettings,
    /// Output locations
    pub paths: PathSettings,
}

/// Timing knobs used by the capture service and the backup units
#[derive(Debug, Clone, PartialEq)]
pub struct BackupSettings {
    pub capture_min_interval: Duration,
    pub capture_attempts: u32,
    pub capture_backoff: Duration,
    pub capture_timeout: Duration,
    pub settle: Duration,
    pub subpanel_settle: Duration,
    pub variant_settle: Duration,
    pub discovery_attempts: u32,
    pub discovery_delay: Duration,
    pub quiescence_poll: Duration,
    pub diff_timeout: Duration,
    pub dump_timeout: Duration,
    pub keepalive_interval: Duration,
}

/// Output locations
#[derive(Debug, Clone)]
pub struct PathSettings {
    /// Directory receiving packaged archives
    pub output_dir: PathBuf,
    /// Preferences file
    pub preferences: PathBuf,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            backup: BackupSettings::from_env(),
            paths: PathSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            backup: BackupSettings::defaults(),
            paths: PathSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl BackupSettings {
    /// Create backup settings from environment variables
    pub fn from_env() -> Self {
        let d = Self::defaults();
        Self {
            capture_min_interval: env_millis(ENV_CAPTURE_MIN_INTERVAL_MS)
                .unwrap_or(d.capture_min_interval),
            capture_attempts: env_parse(ENV_CAPTURE_ATTEMPTS)
                .filter(|n| *n > 0)
                .unwrap_or(d.capture_attempts),
            capture_backoff: env_millis(ENV_CAPTURE_BACKOFF_MS).unwrap_or(d.capture_backoff),
            capture_timeout: env_millis(ENV_CAPTURE_TIMEOUT_MS).unwrap_or(d.capture_timeout),
            settle: env_millis(ENV_SETTLE_MS).unwrap_or(d.settle),
            subpanel_settle: env_millis(ENV_SUBPANEL_SETTLE_MS).unwrap_or(d.subpanel_settle),
            variant_settle: env_millis(ENV_VARIANT_SETTLE_MS).unwrap_or(d.variant_settle),
            discovery_attempts: env_parse(ENV_DISCOVERY_ATTEMPTS)
                .filter(|n| *n > 0)
                .unwrap_or(d.discovery_attempts),
            discovery_delay: env_millis(ENV_DISCOVERY_DELAY_MS).unwrap_or(d.discovery_delay),
            quiescence_poll: env_millis(ENV_QUIESCENCE_POLL_MS).unwrap_or(d.quiescence_poll),
            diff_timeout: env_millis(ENV_DIFF_TIMEOUT_MS).unwrap_or(d.diff_timeout),
            dump_timeout: env_millis(ENV_DUMP_TIMEOUT_MS).unwrap_or(d.dump_timeout),
            keepalive_interval: env_parse(ENV_KEEPALIVE_SECS)
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.keepalive_interval),
        }
    }

    /// Create backup settings with hardcoded defaults
    pub fn defaults() -> Self {
        Self {
            capture_min_interval: Duration::from_millis(DEFAULT_CAPTURE_MIN_INTERVAL_MS),
            capture_attempts: DEFAULT_CAPTURE_ATTEMPTS,
            capture_backoff: Duration::from_millis(DEFAULT_CAPTURE_BACKOFF_MS),
            capture_timeout: Duration::from_millis(DEFAULT_CAPTURE_TIMEOUT_MS),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            subpanel_settle: Duration::from_millis(DEFAULT_SUBPANEL_SETTLE_MS),
            variant_settle: Duration::from_millis(DEFAULT_VARIANT_SETTLE_MS),
            discovery_attempts: DEFAULT_DISCOVERY_ATTEMPTS,
            discovery_delay: Duration::from_millis(DEFAULT_DISCOVERY_DELAY_MS),
            quiescence_poll: Duration::from_millis(DEFAULT_QUIESCENCE_POLL_MS),
            diff_timeout: Duration::from_millis(DEFAULT_DIFF_TIMEOUT_MS),
            dump_timeout: Duration::from_millis(DEFAULT_DUMP_TIMEOUT_MS),
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
        }
    }

    /// Short delays for a simulated device, which applies changes at once
    pub fn fast() -> Self {
        Self {
            capture_min_interval: Duration::ZERO,
            capture_backoff: Duration::from_millis(10),
            settle: Duration::ZERO,
            subpanel_settle: Duration::ZERO,
            variant_settle: Duration::from_millis(10),
            discovery_delay: Duration::from_millis(50),
            quiescence_poll: Duration::from_millis(20),
            ..Self::defaults()
        }
    }

    /// Override the capture spacing
    pub fn capture_min_interval(mut self, interval: Duration) -> Self {
        self.capture_min_interval = interval;
        self
    }

    /// Override the discovery retry budget
    pub fn discovery(mut self, attempts: u32, delay: Duration) -> Self {
        self.discovery_attempts = attempts.max(1);
        self.discovery_delay = delay;
        self
    }

    /// Override both console budgets
    pub fn console_timeouts(mut self, diff: Duration, dump: Duration) -> Self {
        self.diff_timeout = diff;
        self.dump_timeout = dump;
        self
    }

    /// Override the keepalive interval
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl PathSettings {
    /// Create path settings from environment variables
    pub fn from_env() -> Self {
        let output_dir = env::var(ENV_OUTPUT_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let preferences = env::var(ENV_PREFERENCES)
            .map(PathBuf::from)
            .unwrap_or_else(|_| output_dir.join(DEFAULT_PREFERENCES_FILE));
        Self {
            output_dir,
            preferences,
        }
    }

    /// Create path settings with defaults
    pub fn defaults() -> Self {
        let output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
        Self {
            preferences: output_dir.join(DEFAULT_PREFERENCES_FILE),
            output_dir,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

/// Get the archive output directory (convenience function)
pub fn output_dir() -> PathBuf {
    get().paths.output_dir.clone()
}

/// Get the preferences file path (convenience function)
pub fn preferences_path() -> PathBuf {
    get().paths.preferences.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.backup.capture_attempts, DEFAULT_CAPTURE_ATTEMPTS);
        assert_eq!(config.backup.discovery_attempts, 10);
        assert_eq!(config.backup.keepalive_interval, Duration::from_secs(20));
        assert_eq!(config.paths.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert!(config.paths.preferences.ends_with(DEFAULT_PREFERENCES_FILE));
    }

    #[test]
    fn test_settings_builders() {
        let settings = BackupSettings::defaults()
            .capture_min_interval(Duration::from_millis(10))
            .discovery(0, Duration::from_millis(5))
            .console_timeouts(Duration::from_secs(1), Duration::from_secs(2));

        assert_eq!(settings.capture_min_interval, Duration::from_millis(10));
        assert_eq!(settings.discovery_attempts, 1);
        assert_eq!(settings.diff_timeout, Duration::from_secs(1));
        assert_eq!(settings.dump_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        assert_eq!(env_parse::<u64>("PANEL_BACKUP_TEST_UNSET_VARIABLE"), None);
    }
}
