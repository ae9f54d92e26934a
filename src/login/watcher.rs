//! Manual-login watcher: a human signs in, the watcher clears the obvious
//! interstitials and reports when the session becomes authenticated.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::detector::LoginStatusDetector;
use super::handlers::{STAY_SIGNED_IN_MARKERS, STAY_SIGNED_IN_YES};
use super::{is_login_flow_url, is_oauth_callback, redact_url};
use crate::browser::{AuthPage, Locator};
use crate::core::clock::{elapsed_since, Clock, TokioClock};
use crate::core::config::{DEFAULT_HOME_URL, DEFAULT_LOGIN_URL};

/// Vendor promotions shown between sign-in and the landing page.
const PROMO_DISMISS: &[Locator] = &[
    Locator::Button("No, thanks"),
    Locator::Css("button[id*=\"dismiss\"]"),
    Locator::Css("button[class*=\"dismiss\"]"),
];

const PROMO_SETTLE: Duration = Duration::from_secs(2);

/// Text that must accompany a KMSI marker before the watcher answers it.
const STAY_SIGNED_IN_TITLES: &[Locator] = &[
    Locator::Heading("Stay signed in?"),
    Locator::Text("Stay signed in"),
];

/// Second-factor inputs. While one is on screen only the human can proceed.
const SECOND_FACTOR_MARKERS: &[Locator] = &[
    Locator::Css("input[name=\"otc\"]"),
    Locator::Css("input[type=\"tel\"]"),
    Locator::Css("input[aria-label*=\"code\"]"),
    Locator::Css("div[data-value=\"PhoneAppOTP\"]"),
    Locator::Css("div[data-value=\"PhoneAppNotification\"]"),
];

/// Post-credential redirect that only completes once the browser leaves it.
const POST_SRF_MARKER: &str = "ppsecure/post.srf";

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    /// How often a "still waiting" line is logged.
    pub progress_interval: Duration,
    pub stay_signed_in: bool,
    pub login_url: String,
    /// Page loaded to evaluate the session once the login flow is left.
    pub home_url: String,
    /// Open `login_url` before polling starts.
    pub navigate_to_login: bool,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            progress_interval: Duration::from_secs(30),
            stay_signed_in: true,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            home_url: DEFAULT_HOME_URL.to_string(),
            navigate_to_login: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    LoggedIn,
    Waiting(&'static str),
}

pub struct ManualLoginWatcher {
    settings: WatcherSettings,
    detector: Arc<LoginStatusDetector>,
    clock: Arc<dyn Clock>,
}

impl ManualLoginWatcher {
    pub fn new(settings: WatcherSettings, detector: Arc<LoginStatusDetector>) -> Self {
        Self::with_clock(settings, detector, Arc::new(TokioClock))
    }

    pub fn with_clock(
        settings: WatcherSettings,
        detector: Arc<LoginStatusDetector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            detector,
            clock,
        }
    }

    /// Polls `page` until the detector confirms a signed-in session or
    /// `timeout` elapses. Never fails: every page error counts as "not yet".
    pub async fn wait_for_manual_login(&self, page: &dyn AuthPage, timeout: Duration) -> bool {
        info!(
            "manual_login: 👤 waiting up to {}s for a manual sign-in",
            timeout.as_secs()
        );
        if self.settings.navigate_to_login {
            if let Err(e) = page.goto(&self.settings.login_url).await {
                warn!("manual_login: could not open login page: {}", e);
            }
        }

        let start = self.clock.now();
        let mut last_progress = start;
        let mut last_failed_url: Option<String> = None;

        loop {
            let elapsed = elapsed_since(self.clock.as_ref(), start);
            if elapsed >= timeout {
                warn!(
                    "manual_login: ⏱️ no sign-in detected within {}s",
                    timeout.as_secs()
                );
                return false;
            }

            match self.tick(page, &mut last_failed_url).await {
                Tick::LoggedIn => {
                    info!(
                        "manual_login: ✅ sign-in detected after {:.0}s",
                        elapsed_since(self.clock.as_ref(), start).as_secs_f64()
                    );
                    return true;
                }
                Tick::Waiting(reason) => debug!("manual_login: waiting ({})", reason),
            }

            if elapsed_since(self.clock.as_ref(), last_progress) >= self.settings.progress_interval
            {
                last_progress = self.clock.now();
                let elapsed = elapsed_since(self.clock.as_ref(), start);
                info!(
                    "manual_login: still waiting ({}s elapsed, {}s left)",
                    elapsed.as_secs(),
                    timeout.saturating_sub(elapsed).as_secs()
                );
            }

            self.clock.sleep(self.settings.poll_interval).await;
        }
    }

    async fn tick(&self, page: &dyn AuthPage, last_failed_url: &mut Option<String>) -> Tick {
        if page.click_first(PROMO_DISMISS).await {
            info!("manual_login: dismissed a promotional interstitial");
            let _ = page.wait_for_load(PROMO_SETTLE).await;
        }

        let kmsi = self.is_stay_signed_in_prompt(page).await;
        if kmsi && self.settings.stay_signed_in {
            if page.click_first(STAY_SIGNED_IN_YES).await {
                info!("manual_login: answered 'Yes' on stay-signed-in prompt");
                return Tick::Waiting("stay-signed-in answered");
            }
            return Tick::Waiting("stay-signed-in prompt without a control");
        }

        if page.first_visible(SECOND_FACTOR_MARKERS).await.is_some() {
            return Tick::Waiting("second factor in progress");
        }

        let url = match page.url().await {
            Ok(u) => u,
            Err(e) => {
                debug!("manual_login: url unavailable: {}", e);
                return Tick::Waiting("page unavailable");
            }
        };

        let post_srf = !kmsi && url.to_ascii_lowercase().contains(POST_SRF_MARKER);
        if is_oauth_callback(&url) || post_srf {
            info!(
                "manual_login: sign-in callback at {}, moving to {}",
                redact_url(&url),
                self.settings.home_url
            );
            if let Err(e) = page.goto(&self.settings.home_url).await {
                warn!("manual_login: navigation after callback failed: {}", e);
                return Tick::Waiting("callback navigation failed");
            }
            return self.check(page, last_failed_url).await;
        }

        if is_login_flow_url(&url) {
            return Tick::Waiting("still in login flow");
        }

        if last_failed_url.as_deref() == Some(url.as_str()) {
            // Already reloaded this page once; only the verdict may have changed.
            return if self.detector.detect(page, false).await {
                Tick::LoggedIn
            } else {
                Tick::Waiting("not signed in yet")
            };
        }

        if let Err(e) = page.goto(&self.settings.home_url).await {
            warn!("manual_login: navigation to home failed: {}", e);
            return Tick::Waiting("home navigation failed");
        }
        if let Err(e) = page.reload().await {
            debug!("manual_login: reload failed: {}", e);
        }
        self.check(page, last_failed_url).await
    }

    async fn check(&self, page: &dyn AuthPage, last_failed_url: &mut Option<String>) -> Tick {
        if self.detector.force_recheck(page).await {
            return Tick::LoggedIn;
        }
        *last_failed_url = page.url().await.ok();
        Tick::Waiting("not signed in yet")
    }

    /// A KMSI prompt needs both its wording and one of its controls, so an
    /// unrelated confirmation is never answered.
    async fn is_stay_signed_in_prompt(&self, page: &dyn AuthPage) -> bool {
        let titled = match page.title().await {
            Ok(t) if t.to_ascii_lowercase().contains("stay signed in") => true,
            _ => page.first_visible(STAY_SIGNED_IN_TITLES).await.is_some(),
        };
        if !titled {
            return false;
        }
        for loc in STAY_SIGNED_IN_MARKERS
            .iter()
            .filter(|l| matches!(l, Locator::Css(_)))
        {
            if page.is_present(*loc).await {
                return true;
            }
        }
        false
    }
}
