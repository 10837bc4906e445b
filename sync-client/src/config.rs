//! Configuration loading for the sync engine.
//!
//! Configuration is loaded from a TOML file (default: `vibe-sync.toml`) or
//! a string. Every field has a default, so an empty document is valid.

use crate::cache::CacheClass;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vibe_sync_core::ReconnectPolicy;

/// Root configuration for the sync engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    /// Cache TTLs and sweeping.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Reconciliation debounce windows.
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Polling fallback intervals.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Realtime channel behaviour.
    #[serde(default)]
    pub channel: ChannelConfig,
}

/// Cache configuration. TTLs in seconds, per cache class.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Friends list TTL (default: 5 minutes).
    #[serde(default = "default_friends_ttl")]
    pub friends_ttl_secs: u64,
    /// Stories TTL (default: 2 minutes).
    #[serde(default = "default_stories_ttl")]
    pub stories_ttl_secs: u64,
    /// Vibe-reels feed TTL (default: 5 minutes).
    #[serde(default = "default_reels_ttl")]
    pub reels_ttl_secs: u64,
    /// Conversation list TTL (default: 2 minutes).
    #[serde(default = "default_conversations_ttl")]
    pub conversations_ttl_secs: u64,
    /// Message thread TTL (default: 1 minute).
    #[serde(default = "default_messages_ttl")]
    pub messages_ttl_secs: u64,
    /// Profile TTL (default: 10 minutes).
    #[serde(default = "default_profiles_ttl")]
    pub profiles_ttl_secs: u64,
    /// Sweep interval while foregrounded (default: 60 seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Reconciliation throttle configuration. Windows in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    /// Friendship changes debounce (default: 500ms).
    #[serde(default = "default_slow_debounce")]
    pub friends_debounce_ms: u64,
    /// Story changes debounce (default: 300ms).
    #[serde(default = "default_fast_debounce")]
    pub stories_debounce_ms: u64,
    /// Reel changes debounce (default: 500ms).
    #[serde(default = "default_slow_debounce")]
    pub reels_debounce_ms: u64,
    /// Conversation changes debounce (default: 300ms).
    #[serde(default = "default_fast_debounce")]
    pub conversations_debounce_ms: u64,
    /// Upper bound on total wait under a continuous stream of hints
    /// (default: 2000ms, 0 = unbounded).
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,
}

/// Polling fallback configuration. Intervals in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Enable polling (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Friends poll (default: 60s).
    #[serde(default = "default_friends_poll")]
    pub friends_secs: u64,
    /// Stories poll (default: 30s).
    #[serde(default = "default_stories_poll")]
    pub stories_secs: u64,
    /// Reels poll (default: 120s).
    #[serde(default = "default_reels_poll")]
    pub reels_secs: u64,
    /// Conversation list poll (default: 10s).
    #[serde(default = "default_conversations_poll")]
    pub conversations_secs: u64,
    /// Open message thread poll (default: 1s).
    #[serde(default = "default_messages_poll")]
    pub messages_secs: u64,
    /// Profiles poll (default: 600s).
    #[serde(default = "default_profiles_poll")]
    pub profiles_secs: u64,
}

/// Realtime channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// `manual` (stay down, rely on polling) or `backoff` (default: manual).
    #[serde(default)]
    pub reconnect: ReconnectMode,
    /// Attempts before giving up in `backoff` mode (default: 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Reconnect mode as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    /// Never reconnect automatically.
    #[default]
    Manual,
    /// Reconnect with capped exponential backoff.
    Backoff,
}

// Default value functions
fn default_friends_ttl() -> u64 {
    5 * 60
}

fn default_stories_ttl() -> u64 {
    2 * 60
}

fn default_reels_ttl() -> u64 {
    5 * 60
}

fn default_conversations_ttl() -> u64 {
    2 * 60
}

fn default_messages_ttl() -> u64 {
    60
}

fn default_profiles_ttl() -> u64 {
    10 * 60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_fast_debounce() -> u64 {
    300
}

fn default_slow_debounce() -> u64 {
    500
}

fn default_max_wait() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_friends_poll() -> u64 {
    60
}

fn default_stories_poll() -> u64 {
    30
}

fn default_reels_poll() -> u64 {
    120
}

fn default_conversations_poll() -> u64 {
    10
}

fn default_messages_poll() -> u64 {
    1
}

fn default_profiles_poll() -> u64 {
    600
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            friends_ttl_secs: default_friends_ttl(),
            stories_ttl_secs: default_stories_ttl(),
            reels_ttl_secs: default_reels_ttl(),
            conversations_ttl_secs: default_conversations_ttl(),
            messages_ttl_secs: default_messages_ttl(),
            profiles_ttl_secs: default_profiles_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            friends_debounce_ms: default_slow_debounce(),
            stories_debounce_ms: default_fast_debounce(),
            reels_debounce_ms: default_slow_debounce(),
            conversations_debounce_ms: default_fast_debounce(),
            max_wait_ms: default_max_wait(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            friends_secs: default_friends_poll(),
            stories_secs: default_stories_poll(),
            reels_secs: default_reels_poll(),
            conversations_secs: default_conversations_poll(),
            messages_secs: default_messages_poll(),
            profiles_secs: default_profiles_poll(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectMode::Manual,
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl ThrottleConfig {
    /// Debounce window for `class`.
    ///
    /// Messages share the conversations window and profiles share the
    /// friends window.
    pub fn debounce(&self, class: CacheClass) -> Duration {
        let ms = match class {
            CacheClass::Friends | CacheClass::Profiles => self.friends_debounce_ms,
            CacheClass::Stories => self.stories_debounce_ms,
            CacheClass::Reels => self.reels_debounce_ms,
            CacheClass::Conversations | CacheClass::Messages => self.conversations_debounce_ms,
        };
        Duration::from_millis(ms)
    }

    /// The wait bound, or `None` when configured as 0.
    pub fn max_wait(&self) -> Option<Duration> {
        (self.max_wait_ms > 0).then(|| Duration::from_millis(self.max_wait_ms))
    }
}

impl PollingConfig {
    /// Polling interval for `class`.
    pub fn interval(&self, class: CacheClass) -> Duration {
        let secs = match class {
            CacheClass::Friends => self.friends_secs,
            CacheClass::Stories => self.stories_secs,
            CacheClass::Reels => self.reels_secs,
            CacheClass::Conversations => self.conversations_secs,
            CacheClass::Messages => self.messages_secs,
            CacheClass::Profiles => self.profiles_secs,
        };
        Duration::from_secs(secs)
    }
}

impl ChannelConfig {
    /// The reconnect policy this config describes.
    pub fn policy(&self) -> ReconnectPolicy {
        match self.reconnect {
            ReconnectMode::Manual => ReconnectPolicy::Manual,
            ReconnectMode::Backoff => ReconnectPolicy::Backoff {
                max_attempts: self.max_reconnect_attempts,
            },
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make timers spin or never fire.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_ttl = [
            ("cache.friends_ttl_secs", self.cache.friends_ttl_secs),
            ("cache.stories_ttl_secs", self.cache.stories_ttl_secs),
            ("cache.reels_ttl_secs", self.cache.reels_ttl_secs),
            ("cache.conversations_ttl_secs", self.cache.conversations_ttl_secs),
            ("cache.messages_ttl_secs", self.cache.messages_ttl_secs),
            ("cache.profiles_ttl_secs", self.cache.profiles_ttl_secs),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
            ("polling.friends_secs", self.polling.friends_secs),
            ("polling.stories_secs", self.polling.stories_secs),
            ("polling.reels_secs", self.polling.reels_secs),
            ("polling.conversations_secs", self.polling.conversations_secs),
            ("polling.messages_secs", self.polling.messages_secs),
            ("polling.profiles_secs", self.polling.profiles_secs),
        ];
        if let Some((field, _)) = zero_ttl.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: "must be greater than zero".into(),
            });
        }

        let debounces = [
            ("throttle.friends_debounce_ms", self.throttle.friends_debounce_ms),
            ("throttle.stories_debounce_ms", self.throttle.stories_debounce_ms),
            ("throttle.reels_debounce_ms", self.throttle.reels_debounce_ms),
            ("throttle.conversations_debounce_ms", self.throttle.conversations_debounce_ms),
        ];
        if let Some((field, _)) = debounces.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: "must be greater than zero".into(),
            });
        }
        if let Some(max_wait) = self.throttle.max_wait() {
            if let Some((field, _)) = debounces
                .iter()
                .find(|(_, value)| Duration::from_millis(*value) > max_wait)
            {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    reason: "debounce window exceeds throttle.max_wait_ms".into(),
                });
            }
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}
