//! Client configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_KEYRING_SERVICE: &str = "com.insurobot.copilot";
const PROFILE_FILE: &str = "insurance-copilot-session.json";

/// Configuration for the copilot client stack.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend API root, including the version prefix.
    pub base_url: String,

    /// Total timeout for a single HTTP request.
    pub request_timeout: Duration,

    pub connect_timeout: Duration,

    /// Keyring service name the token pair is stored under.
    pub keyring_service: String,

    /// JSON file holding the non-secret session state (user record).
    pub profile_path: PathBuf,

    /// Store tokens in the OS keyring instead of the profile file.
    pub use_keyring: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(40),
            connect_timeout: Duration::from_secs(10),
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            profile_path: default_profile_path(),
            use_keyring: true,
        }
    }
}

fn default_profile_path() -> PathBuf {
    let dir = env::var("XDG_STATE_HOME")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| env::var("HOME").ok().map(|h| PathBuf::from(h).join(".local/state")))
        .unwrap_or_else(env::temp_dir);
    dir.join(PROFILE_FILE)
}

fn env_trimmed(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `COPILOT_API_URL` - API root (default: http://localhost:8000/api/v1)
    /// - `COPILOT_REQUEST_TIMEOUT_SECS` - request timeout (default: 40)
    /// - `COPILOT_CONNECT_TIMEOUT_SECS` - connect timeout (default: 10)
    /// - `COPILOT_KEYRING_SERVICE` - keyring service name
    /// - `COPILOT_PROFILE_PATH` - session profile file
    /// - `COPILOT_USE_KEYRING` - store tokens in the OS keyring (default: true)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_trimmed("COPILOT_API_URL") {
            config.base_url = url;
        }
        if let Some(secs) = env_trimmed("COPILOT_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_trimmed("COPILOT_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(service) = env_trimmed("COPILOT_KEYRING_SERVICE") {
            config.keyring_service = service;
        }
        if let Some(path) = env_trimmed("COPILOT_PROFILE_PATH") {
            config.profile_path = PathBuf::from(path);
        }
        if let Some(flag) = env_trimmed("COPILOT_USE_KEYRING").and_then(|v| parse_bool(&v)) {
            config.use_keyring = flag;
        }

        config
    }

    /// Full URL for an API path such as `/threads`.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
