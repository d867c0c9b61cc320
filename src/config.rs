//! Configuration and settings management
//!
//! Loads settings from environment variables and defines runtime constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fallback instance name when `EVO_INSTANCE_NAME` is not set
pub const DEFAULT_INSTANCE_NAME: &str = "defaultbot";
/// File name of the single-instance lock inside the temp directory
pub const DEFAULT_LOCK_FILE_NAME: &str = "evo-relay.lock";

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub bot_token: String,
    /// Base URL of the messaging gateway
    pub evo_api_url: String,
    /// Value for the gateway `apikey` header
    pub authentication_api_key: Option<String>,
    /// Instance used by connect/restart/qrcode/send commands
    #[serde(default = "default_instance_name")]
    pub evo_instance_name: String,
    /// Destination address for test messages and relayed media
    pub test_phone_number: Option<String>,
    /// Path of the single-instance lock file
    pub lock_file: Option<String>,
    /// Drop updates queued while the bot was offline
    #[serde(default = "default_skip_pending_updates")]
    pub skip_pending_updates: bool,
}

fn default_instance_name() -> String {
    DEFAULT_INSTANCE_NAME.to_string()
}

const fn default_skip_pending_updates() -> bool {
    true
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use evo_relay::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or a required key is missing.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Environment::default() maps UPPER_SNAKE_CASE to snake_case keys
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()
    }

    /// Normalizes values and rejects blank required settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the first missing required key.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.bot_token = self.bot_token.trim().to_string();
        if self.bot_token.is_empty() {
            return Err(ConfigError::Message("BOT_TOKEN not set".into()));
        }

        self.evo_api_url = self.evo_api_url.trim().trim_end_matches('/').to_string();
        if self.evo_api_url.is_empty() {
            return Err(ConfigError::Message("EVO_API_URL not set".into()));
        }

        self.evo_instance_name = self.evo_instance_name.trim().to_string();
        if self.evo_instance_name.is_empty() {
            self.evo_instance_name = default_instance_name();
        }

        self.authentication_api_key = non_blank(self.authentication_api_key);
        self.test_phone_number = non_blank(self.test_phone_number);
        self.lock_file = non_blank(self.lock_file);

        Ok(self)
    }

    /// Location of the single-instance lock file
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.lock_file.as_ref().map_or_else(
            || std::env::temp_dir().join(DEFAULT_LOCK_FILE_NAME),
            PathBuf::from,
        )
    }

    /// Configured destination for outgoing test messages and media
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.test_phone_number.as_deref()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// Gateway timeouts
/// Timeout for status and metadata calls
pub const GATEWAY_METADATA_TIMEOUT_SECS: u64 = 20;
/// Timeout for JSON POST calls
pub const GATEWAY_JSON_TIMEOUT_SECS: u64 = 30;
/// Timeout for calls carrying a file payload
pub const GATEWAY_UPLOAD_TIMEOUT_SECS: u64 = 60;

// Polling supervisor
/// Long-poll wait passed to `getUpdates`
pub const POLL_TIMEOUT_SECS: u64 = 50;
/// Extra headroom for the HTTP client over the long-poll wait
pub const POLL_HTTP_HEADROOM_SECS: u64 = 15;
/// Smallest backoff delay after a failed polling cycle
pub const BACKOFF_MIN_SECS: u64 = 1;
/// Largest backoff delay after repeated failures
pub const BACKOFF_MAX_SECS: u64 = 60;
/// How often a parked process retries the single-instance lock
pub const LOCK_RETRY_INTERVAL_SECS: u64 = 5;
/// How long in-flight conversations may finish after shutdown is requested
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

// Conversation state
/// Idle time after which an armed upload expectation is forgotten
pub const EXPECTATION_IDLE_TTL_SECS: u64 = 900;
/// Maximum number of conversations with an armed expectation
pub const EXPECTATION_MAX_CONVERSATIONS: u64 = 10_000;
/// Idle time after which a conversation worker exits
pub const CONVERSATION_IDLE_SECS: u64 = 300;

// Telegram API
/// Bot API download limit (20 MB)
pub const TELEGRAM_MAX_DOWNLOAD_BYTES: u32 = 20 * 1024 * 1024;
/// Telegram message limit with a safety margin
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;
/// Initial delay before retrying a failed reply
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum delay between reply retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Number of retries for replies and downloads
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Get the long-poll wait from env or default.
///
/// Environment variable: `POLL_TIMEOUT_SECS`.
#[must_use]
pub fn get_poll_timeout_secs() -> u64 {
    env_u64("POLL_TIMEOUT_SECS", POLL_TIMEOUT_SECS)
}

/// Get the minimum backoff from env or default.
///
/// Environment variable: `BACKOFF_MIN_SECS`. Never below one second.
#[must_use]
pub fn get_backoff_min_secs() -> u64 {
    env_u64("BACKOFF_MIN_SECS", BACKOFF_MIN_SECS).max(1)
}

/// Get the maximum backoff from env or default.
///
/// Environment variable: `BACKOFF_MAX_SECS`.
#[must_use]
pub fn get_backoff_max_secs() -> u64 {
    env_u64("BACKOFF_MAX_SECS", BACKOFF_MAX_SECS).max(get_backoff_min_secs())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
