use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::types::Credentials;

// ---------------------------------------------------------------------------
// AppConfig: file-based config loader (rewards-autopilot.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "REWARDS_AUTOPILOT_CONFIG";
pub const ENV_EMAIL: &str = "REWARDS_EMAIL";
pub const ENV_PASSWORD: &str = "REWARDS_PASSWORD";
pub const ENV_TOTP_SECRET: &str = "REWARDS_TOTP_SECRET";
pub const ENV_LOGIN_URL: &str = "REWARDS_LOGIN_URL";
pub const ENV_LANDING_URL: &str = "REWARDS_LANDING_URL";
pub const ENV_STORAGE_STATE: &str = "REWARDS_STORAGE_STATE";
pub const ENV_HEADLESS: &str = "REWARDS_HEADLESS";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

pub const DEFAULT_LOGIN_URL: &str = "https://login.live.com/";
pub const DEFAULT_LANDING_URL: &str = "https://rewards.bing.com/";
pub const DEFAULT_HOME_URL: &str = "https://www.bing.com/";

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_truthy(raw: &str) -> Option<bool> {
    let v = raw.trim().to_ascii_lowercase();
    if matches!(v.as_str(), "1" | "true" | "yes" | "on") {
        Some(true)
    } else if matches!(v.as_str(), "0" | "false" | "no" | "off") {
        Some(false)
    } else {
        None
    }
}

/// Account / URL sub-config (mirrors the `account` key in rewards-autopilot.json).
#[derive(serde::Deserialize, Default, Clone)]
pub struct AccountConfig {
    /// Identity-provider entry point used by auto-login and manual login.
    pub login_url: Option<String>,
    /// Rewards page used to check the session after login.
    pub landing_url: Option<String>,
    /// Neutral post-login page the manual watcher reloads before detecting.
    pub home_url: Option<String>,
    pub storage_state_path: Option<String>,
    pub email: Option<String>,
    /// Never logged.
    pub password: Option<String>,
    /// Never logged.
    pub totp_secret: Option<String>,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("login_url", &self.login_url)
            .field("landing_url", &self.landing_url)
            .field("home_url", &self.home_url)
            .field("storage_state_path", &self.storage_state_path)
            .field("email", &self.email.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AccountConfig {
    /// Login URL: JSON field → `REWARDS_LOGIN_URL` → `https://login.live.com/`.
    pub fn resolve_login_url(&self) -> String {
        non_empty(&self.login_url)
            .or_else(|| env_non_empty(ENV_LOGIN_URL))
            .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string())
    }

    /// Landing URL: JSON field → `REWARDS_LANDING_URL` → `https://rewards.bing.com/`.
    pub fn resolve_landing_url(&self) -> String {
        non_empty(&self.landing_url)
            .or_else(|| env_non_empty(ENV_LANDING_URL))
            .unwrap_or_else(|| DEFAULT_LANDING_URL.to_string())
    }

    pub fn resolve_home_url(&self) -> String {
        non_empty(&self.home_url).unwrap_or_else(|| DEFAULT_HOME_URL.to_string())
    }

    /// Snapshot path: JSON field → `REWARDS_STORAGE_STATE` → `~/.rewards-autopilot/storage_state.json`.
    ///
    /// A leading `~/` is expanded against the home directory.
    pub fn resolve_storage_state_path(&self) -> PathBuf {
        if let Some(p) = non_empty(&self.storage_state_path).or_else(|| env_non_empty(ENV_STORAGE_STATE))
        {
            return expand_home(&p);
        }
        default_storage_state_path()
    }

    /// Credentials: JSON fields → `REWARDS_EMAIL` / `REWARDS_PASSWORD` / `REWARDS_TOTP_SECRET`.
    ///
    /// Returns `None` unless both email and password resolve.
    pub fn resolve_credentials(&self) -> Option<Credentials> {
        let email = non_empty(&self.email).or_else(|| env_non_empty(ENV_EMAIL))?;
        let password = self
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| std::env::var(ENV_PASSWORD).ok().filter(|p| !p.is_empty()))?;
        let mut creds = Credentials::new(email, password);
        if let Some(secret) = non_empty(&self.totp_secret).or_else(|| env_non_empty(ENV_TOTP_SECRET))
        {
            creds = creds.with_otp_secret(secret);
        }
        Some(creds)
    }
}

/// Login flow sub-config (mirrors the `login` key).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct LoginConfig {
    /// Whether credential-driven login is attempted before falling back to manual login.
    pub auto_login: Option<bool>,
    pub max_transitions: Option<u32>,
    pub timeout_seconds: Option<u64>,
    /// Consecutive failed attempts allowed on one state before giving up on it.
    pub max_state_retries: Option<u32>,
    /// Answer "Yes" on the "Stay signed in?" prompt. Default: `true`.
    pub stay_signed_in: Option<bool>,
    pub manual_timeout_seconds: Option<u64>,
    pub poll_interval_seconds: Option<u64>,
}

impl LoginConfig {
    pub fn resolve_auto_login(&self) -> bool {
        self.auto_login.unwrap_or(true)
    }

    pub fn resolve_max_transitions(&self) -> u32 {
        self.max_transitions.filter(|n| *n > 0).unwrap_or(20)
    }

    pub fn resolve_timeout_seconds(&self) -> u64 {
        self.timeout_seconds.filter(|n| *n > 0).unwrap_or(300)
    }

    pub fn resolve_max_state_retries(&self) -> u32 {
        self.max_state_retries.unwrap_or(2)
    }

    pub fn resolve_stay_signed_in(&self) -> bool {
        self.stay_signed_in.unwrap_or(true)
    }

    pub fn resolve_manual_timeout_seconds(&self) -> u64 {
        self.manual_timeout_seconds.filter(|n| *n > 0).unwrap_or(120)
    }

    pub fn resolve_poll_interval_seconds(&self) -> u64 {
        self.poll_interval_seconds.filter(|n| *n > 0).unwrap_or(5)
    }
}

/// Login-status detection sub-config (mirrors the `detection` key).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct DetectionConfig {
    pub cache_ttl_seconds: Option<u64>,
    pub signal_timeout_seconds: Option<u64>,
}

impl DetectionConfig {
    pub fn resolve_cache_ttl_seconds(&self) -> u64 {
        self.cache_ttl_seconds.unwrap_or(300)
    }

    pub fn resolve_signal_timeout_seconds(&self) -> u64 {
        self.signal_timeout_seconds.filter(|n| *n > 0).unwrap_or(10)
    }
}

/// Browser launch sub-config (mirrors the `browser` key).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct BrowserLaunchConfig {
    pub headless: Option<bool>,
    pub executable: Option<String>,
    /// Persistent profile directory; a throwaway profile is used when unset.
    pub user_data_dir: Option<String>,
}

impl BrowserLaunchConfig {
    /// Headless: JSON field → `REWARDS_HEADLESS` (truthy) → `false`.
    pub fn resolve_headless(&self) -> bool {
        if let Some(b) = self.headless {
            return b;
        }
        std::env::var(ENV_HEADLESS)
            .ok()
            .and_then(|v| parse_truthy(&v))
            .unwrap_or(false)
    }

    /// Explicit executable: JSON field → `CHROME_EXECUTABLE`, only when the path exists.
    pub fn resolve_executable(&self) -> Option<String> {
        non_empty(&self.executable)
            .or_else(|| env_non_empty(ENV_CHROME_EXECUTABLE))
            .filter(|p| Path::new(p).exists())
    }

    pub fn resolve_user_data_dir(&self) -> Option<PathBuf> {
        non_empty(&self.user_data_dir).map(|p| expand_home(&p))
    }
}

/// Top-level config loaded from `rewards-autopilot.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
#[serde(default)]
pub struct AppConfig {
    pub account: AccountConfig,
    pub login: LoginConfig,
    pub detection: DetectionConfig,
    pub browser: BrowserLaunchConfig,
}

/// Load `rewards-autopilot.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `REWARDS_AUTOPILOT_CONFIG` env var path
/// 2. `./rewards-autopilot.json`
/// 3. `../rewards-autopilot.json`
///
/// Missing file → `AppConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `AppConfig::default()`.
pub fn load_config() -> AppConfig {
    let mut candidates = vec![
        PathBuf::from("rewards-autopilot.json"),
        PathBuf::from("../rewards-autopilot.json"),
    ];
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => return parse_config(&contents, path),
            Err(_) => continue,
        }
    }

    AppConfig::default()
}

fn parse_config(contents: &str, path: &Path) -> AppConfig {
    match serde_json::from_str::<AppConfig>(contents) {
        Ok(cfg) => {
            tracing::info!("rewards-autopilot.json loaded from {}", path.display());
            cfg
        }
        Err(e) => {
            tracing::warn!(
                "rewards-autopilot.json parse error at {}: {}; using defaults",
                path.display(),
                e
            );
            AppConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn expand_home(p: &str) -> PathBuf {
    if let Some(rest) = p.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(p)
}

/// `~/.rewards-autopilot/storage_state.json`, or `./storage_state.json` without a home dir.
pub fn default_storage_state_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".rewards-autopilot").join("storage_state.json"),
        None => PathBuf::from("storage_state.json"),
    }
}
