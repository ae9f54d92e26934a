use serde::{Deserialize, Serialize};
use std::fmt;

/// Login credentials for one attempt. Never logged: `Debug` redacts every secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    /// Base32 TOTP secret for authenticator-app 2FA.
    pub otp_secret: Option<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            otp_secret: None,
        }
    }

    pub fn with_otp_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.otp_secret = if secret.trim().is_empty() {
            None
        } else {
            Some(secret)
        };
        self
    }

    pub fn has_otp_secret(&self) -> bool {
        self.otp_secret.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &"<redacted>")
            .field("password", &"<redacted>")
            .field("otp_secret", &self.otp_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session snapshot (storage_state.json)
// ─────────────────────────────────────────────────────────────────────────────

/// One cookie as persisted in the snapshot file.
///
/// `expires` is a Unix timestamp in seconds, `-1` for session cookies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default = "default_cookie_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_cookie_expiry() -> f64 {
    -1.0
}

impl Cookie {
    /// Identity of a cookie inside a jar: name + domain + path.
    pub fn key(&self) -> (String, String, String) {
        (self.name.clone(), self.domain.clone(), self.path.clone())
    }

    pub fn is_session_scoped(&self) -> bool {
        self.expires <= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// Local storage captured for one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginStorage {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

/// Serialized authentication state of a browser context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<OriginStorage>,
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn cookie_names(&self) -> Vec<&str> {
        self.cookies.iter().map(|c| c.name.as_str()).collect()
    }

    /// Earliest persistent cookie expiry, ignoring session-scoped cookies.
    pub fn min_cookie_expiry(&self) -> Option<f64> {
        self.cookies
            .iter()
            .filter(|c| !c.is_session_scoped())
            .map(|c| c.expires)
            .reduce(f64::min)
    }
}
