//! The four independent login signals and the weighted vote that combines them.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use serde::Serialize;

use super::is_login_flow_url;
use crate::browser::{AuthPage, Locator};

// ─────────────────────────────────────────────────────────────────────────────
// Vote
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    UserElement,
    Cookie,
    ApiResponse,
    PageContent,
}

impl SignalKind {
    pub const ALL: [SignalKind; 4] = [
        SignalKind::UserElement,
        SignalKind::Cookie,
        SignalKind::ApiResponse,
        SignalKind::PageContent,
    ];

    pub fn weight(self) -> u32 {
        match self {
            SignalKind::UserElement => 3,
            SignalKind::Cookie => 2,
            SignalKind::ApiResponse => 2,
            SignalKind::PageContent => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::UserElement => "user_element",
            SignalKind::Cookie => "cookie",
            SignalKind::ApiResponse => "api_response",
            SignalKind::PageContent => "page_content",
        }
    }
}

/// One optional verdict per signal; `None` means the signal abstained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalVotes {
    pub user_element: Option<bool>,
    pub cookie: Option<bool>,
    pub api_response: Option<bool>,
    pub page_content: Option<bool>,
}

impl SignalVotes {
    pub fn get(&self, kind: SignalKind) -> Option<bool> {
        match kind {
            SignalKind::UserElement => self.user_element,
            SignalKind::Cookie => self.cookie,
            SignalKind::ApiResponse => self.api_response,
            SignalKind::PageContent => self.page_content,
        }
    }

    pub fn set(&mut self, kind: SignalKind, value: Option<bool>) {
        match kind {
            SignalKind::UserElement => self.user_element = value,
            SignalKind::Cookie => self.cookie = value,
            SignalKind::ApiResponse => self.api_response = value,
            SignalKind::PageContent => self.page_content = value,
        }
    }

    /// `user_element=true cookie=false api_response=unknown page_content=unknown`
    pub fn describe(&self) -> String {
        SignalKind::ALL
            .iter()
            .map(|k| {
                let v = match self.get(*k) {
                    Some(true) => "true",
                    Some(false) => "false",
                    None => "unknown",
                };
                format!("{}={}", k.as_str(), v)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub logged_in: bool,
    pub logged_in_score: u32,
    pub logged_out_score: u32,
}

/// Weighted vote over the signals that did not abstain.
///
/// Ties go to the cookie signal when it voted, otherwise to "not logged in".
pub fn vote(votes: &SignalVotes) -> VoteOutcome {
    let (mut yes, mut no) = (0u32, 0u32);
    for kind in SignalKind::ALL {
        match votes.get(kind) {
            Some(true) => yes += kind.weight(),
            Some(false) => no += kind.weight(),
            None => {}
        }
    }
    let logged_in = match yes.cmp(&no) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => votes.cookie.unwrap_or(false),
    };
    VoteOutcome {
        logged_in,
        logged_in_score: yes,
        logged_out_score: no,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Signals
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LoginSignal: Send + Sync {
    fn kind(&self) -> SignalKind;

    /// Signals that navigate or reload run after the read-only ones.
    fn mutates_page(&self) -> bool {
        false
    }

    async fn probe(&self, page: &dyn AuthPage) -> anyhow::Result<Option<bool>>;
}

/// The default signal set, in vote order.
pub fn default_signals() -> Vec<Box<dyn LoginSignal>> {
    vec![
        Box::new(UserElementSignal::default()),
        Box::new(CookieSignal::default()),
        Box::new(ApiResponseSignal::default()),
        Box::new(PageContentSignal),
    ]
}

// ── userElement ──────────────────────────────────────────────────────────────

pub const LOGGED_IN_LOCATORS: &[Locator] = &[
    Locator::Css("#mectrl_currentAccount_primary"),
    Locator::Css("#mectrl_headerPicture"),
    Locator::Css("#id_n"),
    Locator::Css("button[aria-label*='Account manager for']"),
    Locator::Css("div.id_avatar"),
    Locator::Css("#meControl .mectrl_profilepic"),
];

pub const LOGGED_OUT_LOCATORS: &[Locator] = &[
    Locator::Css("a[href*='login.live.com']"),
    Locator::Css("a[href*='login.microsoftonline.com']"),
    Locator::Css("button[data-testid='sign-in']"),
    Locator::Css("#id_s"),
    Locator::Button("Sign in"),
];

pub struct UserElementSignal {
    pub logged_in: &'static [Locator],
    pub logged_out: &'static [Locator],
}

impl Default for UserElementSignal {
    fn default() -> Self {
        Self {
            logged_in: LOGGED_IN_LOCATORS,
            logged_out: LOGGED_OUT_LOCATORS,
        }
    }
}

#[async_trait]
impl LoginSignal for UserElementSignal {
    fn kind(&self) -> SignalKind {
        SignalKind::UserElement
    }

    async fn probe(&self, page: &dyn AuthPage) -> anyhow::Result<Option<bool>> {
        for loc in self.logged_in {
            if page.probe(*loc).await?.visible {
                return Ok(Some(true));
            }
        }
        for loc in self.logged_out {
            if page.probe(*loc).await?.visible {
                return Ok(Some(false));
            }
        }
        Ok(None)
    }
}

// ── cookie ───────────────────────────────────────────────────────────────────

/// Cookies only issued after a successful Microsoft account sign-in.
pub const AUTH_COOKIE_NAMES: &[&str] = &[
    "ESTSAUTH",
    "ESTSAUTHPERSISTENT",
    "SAML11",
    "RPSAuth",
    "RPSSecAuth",
    "MSPAuth",
    "MSPProf",
    "WLSSC",
    "__Host-MSAAUTH",
    "_U",
];

pub const AUTH_COOKIE_URLS: &[&str] = &[
    "https://login.live.com",
    "https://login.microsoftonline.com",
    "https://account.microsoft.com",
    "https://rewards.bing.com",
    "https://www.bing.com",
];

pub struct CookieSignal {
    pub urls: Vec<String>,
    pub names: &'static [&'static str],
}

impl Default for CookieSignal {
    fn default() -> Self {
        Self {
            urls: AUTH_COOKIE_URLS.iter().map(|u| u.to_string()).collect(),
            names: AUTH_COOKIE_NAMES,
        }
    }
}

#[async_trait]
impl LoginSignal for CookieSignal {
    fn kind(&self) -> SignalKind {
        SignalKind::Cookie
    }

    async fn probe(&self, page: &dyn AuthPage) -> anyhow::Result<Option<bool>> {
        let cookies = page.cookies(&self.urls).await?;
        let present: HashSet<&str> = cookies
            .iter()
            .map(|c| c.name.as_str())
            .filter(|n| self.names.contains(n))
            .collect();
        Ok(match present.len() {
            0 => Some(false),
            1 => None,
            _ => Some(true),
        })
    }
}

// ── apiResponse ──────────────────────────────────────────────────────────────

pub const API_URL_PATTERNS: &[&str] = &["api", "rewards", "account", "profile"];

const AUTH_BODY_KEYS: &[&str] = &["user", "account", "profile"];

pub struct ApiResponseSignal {
    pub url_patterns: &'static [&'static str],
    pub window: Duration,
}

impl Default for ApiResponseSignal {
    fn default() -> Self {
        Self {
            url_patterns: API_URL_PATTERNS,
            window: Duration::from_secs(3),
        }
    }
}

fn body_looks_authenticated(body: &str) -> bool {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    let Some(obj) = json.as_object() else {
        return false;
    };
    for key in ["authenticated", "isAuthenticated"] {
        if let Some(flag) = obj.get(key).and_then(|v| v.as_bool()) {
            return flag;
        }
    }
    AUTH_BODY_KEYS
        .iter()
        .any(|k| obj.get(*k).map(|v| !v.is_null()).unwrap_or(false))
}

#[async_trait]
impl LoginSignal for ApiResponseSignal {
    fn kind(&self) -> SignalKind {
        SignalKind::ApiResponse
    }

    fn mutates_page(&self) -> bool {
        true
    }

    async fn probe(&self, page: &dyn AuthPage) -> anyhow::Result<Option<bool>> {
        // Reloading a sign-in form would throw away what was typed into it.
        if is_login_flow_url(&page.url().await?) {
            return Ok(None);
        }

        let responses = page.reload_observing(self.window).await?;
        let relevant: Vec<_> = responses
            .iter()
            .filter(|r| {
                let lower = r.url.to_ascii_lowercase();
                self.url_patterns.iter().any(|p| lower.contains(p))
            })
            .collect();

        if relevant.iter().any(|r| r.status == 401) {
            return Ok(Some(false));
        }
        let authed = relevant.iter().any(|r| {
            r.status == 200
                && (r
                    .set_cookie
                    .as_deref()
                    .map(|h| AUTH_COOKIE_NAMES.iter().any(|n| h.contains(n)))
                    .unwrap_or(false)
                    || r.body.as_deref().map(body_looks_authenticated).unwrap_or(false))
        });
        Ok(if authed { Some(true) } else { None })
    }
}

// ── pageContent ──────────────────────────────────────────────────────────────

const TITLE_IN: &[&str] = &["rewards", "dashboard", "account", "profile"];
const TITLE_OUT: &[&str] = &["sign in", "login", "authenticate"];
const BODY_IN: &[&str] = &[
    "welcome back",
    "your account",
    "sign out",
    "logout",
    "dashboard",
    "your rewards",
    "points breakdown",
];
const BODY_OUT: &[&str] = &[
    "sign in to continue",
    "please sign in",
    "login required",
    "create account",
    "create one!",
    "forgot password",
];

struct KeywordSets {
    title_in: Option<AhoCorasick>,
    title_out: Option<AhoCorasick>,
    body_in: Option<AhoCorasick>,
    body_out: Option<AhoCorasick>,
}

static KEYWORDS: OnceLock<KeywordSets> = OnceLock::new();

fn matcher(patterns: &[&str]) -> Option<AhoCorasick> {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(patterns)
        .ok()
}

fn keywords() -> &'static KeywordSets {
    KEYWORDS.get_or_init(|| KeywordSets {
        title_in: matcher(TITLE_IN),
        title_out: matcher(TITLE_OUT),
        body_in: matcher(BODY_IN),
        body_out: matcher(BODY_OUT),
    })
}

/// Number of distinct keywords from `ac` found in `text`.
fn distinct_hits(ac: &Option<AhoCorasick>, text: &str) -> u32 {
    let Some(ac) = ac else { return 0 };
    ac.find_overlapping_iter(text)
        .map(|m| m.pattern())
        .collect::<HashSet<_>>()
        .len() as u32
}

/// Scores `(logged_in, logged_out)` for a page's URL, title and body text.
pub fn content_scores(url: &str, title: &str, body: &str) -> (u32, u32) {
    let kw = keywords();
    let mut logged_in = distinct_hits(&kw.title_in, title) + distinct_hits(&kw.body_in, body);
    let mut logged_out = distinct_hits(&kw.title_out, title) + distinct_hits(&kw.body_out, body);
    if is_login_flow_url(url) {
        logged_out += 1;
    }
    if super::is_oauth_callback(url) {
        logged_in += 1;
    }
    (logged_in, logged_out)
}

pub struct PageContentSignal;

#[async_trait]
impl LoginSignal for PageContentSignal {
    fn kind(&self) -> SignalKind {
        SignalKind::PageContent
    }

    async fn probe(&self, page: &dyn AuthPage) -> anyhow::Result<Option<bool>> {
        let url = page.url().await?;
        let title = page.title().await.unwrap_or_default();
        let body = page.body_text().await.unwrap_or_default();
        let (yes, no) = content_scores(&url, &title, &body);
        Ok(if yes > no {
            Some(true)
        } else if no > yes {
            Some(false)
        } else {
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(ue: Option<bool>, ck: Option<bool>, api: Option<bool>, pc: Option<bool>) -> SignalVotes {
        SignalVotes {
            user_element: ue,
            cookie: ck,
            api_response: api,
            page_content: pc,
        }
    }

    #[test]
    fn user_element_outweighs_cookie() {
        let out = vote(&votes(Some(true), Some(false), None, None));
        assert!(out.logged_in);
        assert_eq!((out.logged_in_score, out.logged_out_score), (3, 2));
    }

    #[test]
    fn tie_follows_cookie_vote() {
        assert!(vote(&votes(None, Some(true), Some(false), None)).logged_in);
        assert!(!vote(&votes(None, Some(false), Some(true), None)).logged_in);
    }

    #[test]
    fn tie_without_cookie_fails_closed() {
        // 3 vs 2 + 1
        assert!(!vote(&votes(Some(true), None, Some(false), Some(false))).logged_in);
        assert!(!vote(&SignalVotes::default()).logged_in);
    }

    #[test]
    fn page_content_alone_decides_when_others_abstain() {
        assert!(vote(&votes(None, None, None, Some(true))).logged_in);
        assert!(!vote(&votes(None, None, None, Some(false))).logged_in);
    }

    #[test]
    fn describe_lists_every_signal() {
        let d = votes(Some(true), None, Some(false), None).describe();
        assert_eq!(
            d,
            "user_element=true cookie=unknown api_response=false page_content=unknown"
        );
    }

    #[test]
    fn content_scores_favor_login_form() {
        let (yes, no) = content_scores(
            "https://login.live.com/login.srf",
            "Sign in to your Microsoft account",
            "Sign in. Email, phone, or Skype. No account? Create one!",
        );
        assert!(no > yes, "in={yes} out={no}");
    }

    #[test]
    fn content_scores_favor_dashboard() {
        let (yes, no) = content_scores(
            "https://rewards.bing.com/",
            "Microsoft Rewards",
            "Welcome back! Your rewards dashboard. Points breakdown. Sign out",
        );
        assert!(yes > no, "in={yes} out={no}");
    }

    #[test]
    fn auth_body_detection() {
        assert!(body_looks_authenticated(r#"{"user": {"id": 1}}"#));
        assert!(!body_looks_authenticated(r#"{"authenticated": false, "user": {}}"#));
        assert!(!body_looks_authenticated(r#"{"user": null}"#));
        assert!(!body_looks_authenticated("<html>"));
    }
}
