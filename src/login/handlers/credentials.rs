//! Pages that consume a credential: email, password and authenticator code.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    any_present, any_visible, on_login_flow, pause, HandlerSettings, StateHandler,
    CODE_ENTRY_MARKERS, EMAIL_FIELDS, PASSWORD_FIELDS, SUBMIT_BUTTONS, TOTP_FIELDS,
};
use crate::browser::{AuthPage, Locator};
use crate::core::types::Credentials;
use crate::login::state::LoginState;
use crate::login::totp;

const SUBMIT_SETTLE: Duration = Duration::from_secs(5);

async fn type_and_submit(
    page: &dyn AuthPage,
    settings: &HandlerSettings,
    fields: &[Locator],
    value: &str,
    submit: &[Locator],
) -> bool {
    if !page.fill_first(fields, value).await {
        return false;
    }
    pause(settings).await;
    if !page.click_first(submit).await {
        return false;
    }
    let _ = page.wait_for_load(SUBMIT_SETTLE).await;
    true
}

// ── EmailInput ───────────────────────────────────────────────────────────────

pub struct EmailInputHandler {
    settings: HandlerSettings,
}

impl EmailInputHandler {
    pub fn new(settings: HandlerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl StateHandler for EmailInputHandler {
    fn state(&self) -> LoginState {
        LoginState::EmailInput
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[
            LoginState::PasswordInput,
            LoginState::Passwordless,
            LoginState::OtpCodeEntry,
            LoginState::GetACode,
        ]
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        on_login_flow(page).await
            && any_visible(page, EMAIL_FIELDS).await
            && !any_visible(page, PASSWORD_FIELDS).await
    }

    async fn handle(&self, page: &dyn AuthPage, credentials: &Credentials) -> bool {
        let ok = type_and_submit(
            page,
            &self.settings,
            EMAIL_FIELDS,
            &credentials.email,
            SUBMIT_BUTTONS,
        )
        .await;
        if ok {
            info!("login_handler: email submitted");
        } else {
            warn!("login_handler: email field or Next button not found");
        }
        ok
    }
}

// ── PasswordInput ────────────────────────────────────────────────────────────

pub struct PasswordInputHandler {
    settings: HandlerSettings,
}

impl PasswordInputHandler {
    pub fn new(settings: HandlerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl StateHandler for PasswordInputHandler {
    fn state(&self) -> LoginState {
        LoginState::PasswordInput
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[
            LoginState::StaySignedIn,
            LoginState::Totp2FA,
            LoginState::OtpCodeEntry,
            LoginState::RecoveryEmail,
            LoginState::LoggedIn,
            LoginState::AuthBlocked,
        ]
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        on_login_flow(page).await && any_visible(page, PASSWORD_FIELDS).await
    }

    async fn handle(&self, page: &dyn AuthPage, credentials: &Credentials) -> bool {
        let ok = type_and_submit(
            page,
            &self.settings,
            PASSWORD_FIELDS,
            &credentials.password,
            SUBMIT_BUTTONS,
        )
        .await;
        if ok {
            info!("login_handler: password submitted");
        } else {
            warn!("login_handler: password field or Sign in button not found");
        }
        ok
    }
}

// ── Totp2FA ──────────────────────────────────────────────────────────────────

const TOTP_SUBMIT: &[Locator] = &[
    Locator::Css("#idSubmit_SAOTCC_Continue"),
    Locator::Css("#idSIButton9"),
    Locator::Css("button[type=\"submit\"]"),
    Locator::Css("input[type=\"submit\"]"),
];

/// Codes this close to rollover are not worth typing.
const MIN_CODE_LIFETIME_SECS: u64 = 3;

pub struct TotpHandler {
    settings: HandlerSettings,
}

impl TotpHandler {
    pub fn new(settings: HandlerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl StateHandler for TotpHandler {
    fn state(&self) -> LoginState {
        LoginState::Totp2FA
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[LoginState::StaySignedIn, LoginState::LoggedIn]
    }

    fn retryable(&self, credentials: &Credentials) -> bool {
        credentials.has_otp_secret()
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        if any_present(page, CODE_ENTRY_MARKERS).await {
            return false;
        }
        if page.is_visible(TOTP_FIELDS[0]).await {
            return true;
        }
        page.is_visible(TOTP_FIELDS[1]).await
            && page.is_visible(Locator::Text("authenticator app")).await
    }

    async fn handle(&self, page: &dyn AuthPage, credentials: &Credentials) -> bool {
        let Some(secret) = credentials.otp_secret.as_deref() else {
            warn!("login_handler: authenticator code requested but no TOTP secret is configured");
            return false;
        };

        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let remaining = totp::seconds_remaining(now);
        if remaining < MIN_CODE_LIFETIME_SECS {
            tokio::time::sleep(Duration::from_secs(remaining + 1)).await;
        }

        let code = match totp::current_code(secret) {
            Ok(c) => c,
            Err(e) => {
                warn!("login_handler: cannot generate TOTP code: {}", e);
                return false;
            }
        };

        let ok = type_and_submit(page, &self.settings, TOTP_FIELDS, &code, TOTP_SUBMIT).await;
        if ok {
            info!("login_handler: authenticator code submitted");
        } else {
            warn!("login_handler: code field or Verify button not found");
        }
        ok
    }
}
