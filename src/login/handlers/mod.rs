//! One handler per sign-in page.
//!
//! A handler recognizes its page (`can_handle`, read-only) and performs the
//! single action that moves past it (`handle`). Overlaps between handlers
//! are settled by the priority order in [`default_handlers`].

use std::time::Duration;

use async_trait::async_trait;
use rand::distr::{Distribution, Uniform};

use super::state::LoginState;
use crate::browser::{AuthPage, Locator};
use crate::core::types::Credentials;

mod challenges;
mod credentials;
mod outcomes;
mod prompts;

pub use challenges::{GetACodeHandler, OtpCodeEntryHandler, PasswordlessHandler, RecoveryEmailHandler};
pub use credentials::{EmailInputHandler, PasswordInputHandler, TotpHandler};
pub use outcomes::{AuthBlockedHandler, LoggedInHandler};
pub use prompts::StaySignedInHandler;
pub(crate) use prompts::{STAY_SIGNED_IN_MARKERS, STAY_SIGNED_IN_YES};

#[async_trait]
pub trait StateHandler: Send + Sync {
    fn state(&self) -> LoginState;

    /// States this handler's action is expected to lead to.
    fn next_states(&self) -> &'static [LoginState];

    /// Whether a failed `handle` is worth repeating on the same page.
    fn retryable(&self, _credentials: &Credentials) -> bool {
        true
    }

    /// Pure recognition. Must not change the page.
    async fn can_handle(&self, page: &dyn AuthPage) -> bool;

    /// Performs the state's action. `true` when it believes it advanced.
    async fn handle(&self, page: &dyn AuthPage, credentials: &Credentials) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct HandlerSettings {
    /// Answer "Yes" on the "Stay signed in?" prompt.
    pub stay_signed_in: bool,
    /// Lower/upper bound of the pause between typing and clicking.
    pub pause_ms: (u64, u64),
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            stay_signed_in: true,
            pause_ms: (300, 900),
        }
    }
}

/// The ten handlers in dispatch priority order.
pub fn default_handlers(settings: HandlerSettings) -> Vec<Box<dyn StateHandler>> {
    vec![
        Box::new(LoggedInHandler),
        Box::new(AuthBlockedHandler),
        Box::new(StaySignedInHandler::new(settings)),
        Box::new(TotpHandler::new(settings)),
        Box::new(OtpCodeEntryHandler),
        Box::new(PasswordInputHandler::new(settings)),
        Box::new(PasswordlessHandler),
        Box::new(EmailInputHandler::new(settings)),
        Box::new(GetACodeHandler),
        Box::new(RecoveryEmailHandler),
    ]
}

// ── Shared page signatures ───────────────────────────────────────────────────

pub(crate) const PASSWORD_FIELDS: &[Locator] = &[
    Locator::Css("input[type=\"password\"]"),
    Locator::Css("input[name=\"passwd\"]"),
    Locator::Css("#i0118"),
];

pub(crate) const EMAIL_FIELDS: &[Locator] = &[
    Locator::Css("input[type=\"email\"]"),
    Locator::Css("input[name=\"loginfmt\"]"),
    Locator::Css("#i0116"),
];

pub(crate) const TOTP_FIELDS: &[Locator] = &[
    Locator::Css("#idTxtBx_SAOTCC_OTC"),
    Locator::Css("input[name=\"otc\"]"),
];

pub(crate) const CODE_ENTRY_MARKERS: &[Locator] = &[
    Locator::Css("[data-testid=\"codeEntry\"]"),
    Locator::Heading("Enter your code"),
];

/// Primary submit control shared by most identity-provider pages.
pub(crate) const SUBMIT_BUTTONS: &[Locator] = &[
    Locator::Css("#idSIButton9"),
    Locator::Css("button[type=\"submit\"]"),
    Locator::Css("input[type=\"submit\"]"),
];

pub(crate) async fn any_visible(page: &dyn AuthPage, locators: &[Locator]) -> bool {
    page.first_visible(locators).await.is_some()
}

pub(crate) async fn any_present(page: &dyn AuthPage, locators: &[Locator]) -> bool {
    for loc in locators {
        if page.is_present(*loc).await {
            return true;
        }
    }
    false
}

pub(crate) async fn on_login_flow(page: &dyn AuthPage) -> bool {
    page.url()
        .await
        .map(|u| super::is_login_flow_url(&u))
        .unwrap_or(false)
}

/// Human-paced pause between interactions.
pub(crate) async fn pause(settings: &HandlerSettings) {
    let (lo, hi) = settings.pause_ms;
    let ms = if hi > lo {
        let mut rng = rand::rng();
        Uniform::new(lo, hi)
            .map(|d| d.sample(&mut rng))
            .unwrap_or(lo)
    } else {
        lo
    };
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
