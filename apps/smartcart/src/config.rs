use std::str::FromStr;
use std::time::Duration;

use cart_sdk::Timeouts;

pub const DEFAULT_SERVER_BASE: &str = "http://127.0.0.1:5000";
pub const DEFAULT_LOG_FILTER: &str = "info,smartcart_core=debug";
/// Upper bound on immediate `/cart` retries per refresh.
pub const MAX_CART_RETRIES: u32 = 100;

/// What to do with an optimistic patch when the server call behind it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackPolicy {
    /// Restore the cache as it was before the patch.
    #[default]
    Revert,
    /// Leave the patch in place until the next refresh overwrites it.
    Keep,
}

impl FromStr for RollbackPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "revert" => Ok(RollbackPolicy::Revert),
            "keep" => Ok(RollbackPolicy::Keep),
            other => Err(format!("unknown rollback policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub server_base: String,
    pub log_filter: String,
    pub poll_interval: Duration,
    pub max_errors: u32,
    pub cart_retries: u32,
    pub error_notice_window: Duration,
    pub rollback: RollbackPolicy,
    pub timeouts: Timeouts,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            server_base: DEFAULT_SERVER_BASE.into(),
            log_filter: DEFAULT_LOG_FILTER.into(),
            poll_interval: Duration::from_millis(2_000),
            max_errors: 3,
            cart_retries: 3,
            error_notice_window: Duration::from_millis(20_000),
            rollback: RollbackPolicy::Revert,
            timeouts: Timeouts::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, fallback: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(fallback)
        };

        let server_base = lookup("SMARTCART_SERVER_BASE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.server_base);
        let log_filter = lookup("RUST_LOG").unwrap_or(defaults.log_filter);
        let poll_interval = millis("SMARTCART_POLL_INTERVAL_MS", defaults.poll_interval);
        let max_errors = parsed("SMARTCART_MAX_ERRORS")
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.max_errors);
        let cart_retries = parsed("SMARTCART_CART_RETRIES")
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.cart_retries);
        let error_notice_window = millis(
            "SMARTCART_ERROR_NOTICE_WINDOW_MS",
            defaults.error_notice_window,
        );
        let rollback = lookup("SMARTCART_ROLLBACK")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rollback);
        let timeouts = Timeouts {
            default: millis("SMARTCART_TIMEOUT_DEFAULT_MS", defaults.timeouts.default),
            camera_start: millis(
                "SMARTCART_TIMEOUT_CAMERA_START_MS",
                defaults.timeouts.camera_start,
            ),
            camera_stop: millis(
                "SMARTCART_TIMEOUT_CAMERA_STOP_MS",
                defaults.timeouts.camera_stop,
            ),
            prompt: millis("SMARTCART_TIMEOUT_PROMPT_MS", defaults.timeouts.prompt),
        };

        Self {
            server_base,
            log_filter,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            max_errors: max_errors.max(1),
            cart_retries: cart_retries.min(MAX_CART_RETRIES),
            error_notice_window,
            rollback,
            timeouts,
        }
    }
}
