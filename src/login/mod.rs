//! Sign-in automation: state handlers, the login state machine, the
//! manual-login watcher and the weighted login-status detector.

pub mod detector;
pub mod handlers;
pub mod machine;
pub mod signals;
pub mod state;
pub mod totp;
pub mod watcher;

pub use detector::{DetectionInfo, DetectorSettings, LoginStatusDetector};
pub use machine::{LoginError, LoginStateMachine, MachineDiagnostic, MachineSettings};
pub use signals::{vote, SignalKind, SignalVotes};
pub use state::LoginState;
pub use watcher::{ManualLoginWatcher, WatcherSettings};

/// URL fragments that mean "still inside the identity provider".
pub const LOGIN_FLOW_KEYWORDS: &[&str] = &["login", "oauth", "authenticate", "signin", "auth"];

/// Redirect URLs that look like login pages but are only emitted once the
/// identity provider has accepted the sign-in.
pub const OAUTH_CALLBACK_MARKERS: &[&str] = &[
    "complete-client-signin",
    "complete-sso-with-redirect",
    "oauth-silent",
];

/// Hosts that only render account chrome for signed-in users.
pub const POST_LOGIN_HOSTS: &[&str] = &[
    "rewards.bing.com",
    "rewards.microsoft.com",
    "account.microsoft.com",
    "www.bing.com",
    "bing.com",
];

pub fn is_oauth_callback(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    OAUTH_CALLBACK_MARKERS.iter().any(|m| lower.contains(m))
}

/// True while `url` is part of the sign-in flow (callbacks excluded).
pub fn is_login_flow_url(url: &str) -> bool {
    if is_oauth_callback(url) {
        return false;
    }
    let lower = url.to_ascii_lowercase();
    LOGIN_FLOW_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// True when `url`'s host is one of [`POST_LOGIN_HOSTS`].
pub fn is_post_login_host(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .map(|host| POST_LOGIN_HOSTS.iter().any(|h| host == *h))
        .unwrap_or(false)
}

/// `scheme://host/path` of `url`, dropping query and fragment, which can
/// carry login hints.
pub fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => format!(
            "{}://{}{}",
            u.scheme(),
            u.host_str().unwrap_or_default(),
            u.path()
        ),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}
