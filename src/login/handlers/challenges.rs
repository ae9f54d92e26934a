//! Verification challenges the bot cannot answer itself. Most of them only
//! recognize the page and hand it back as "cannot advance".

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    any_present, any_visible, on_login_flow, StateHandler, CODE_ENTRY_MARKERS, EMAIL_FIELDS,
    PASSWORD_FIELDS, TOTP_FIELDS,
};
use crate::browser::{AuthPage, Locator};
use crate::core::types::Credentials;
use crate::login::state::LoginState;

// ── Passwordless ─────────────────────────────────────────────────────────────

const PASSWORDLESS_TEXTS: &[Locator] = &[
    Locator::Text("Approve sign in request"),
    Locator::Text("Use your password instead"),
    Locator::Text("Sign in another way"),
    Locator::Text("Other ways to sign in"),
    Locator::Text("Check your phone"),
];

/// Push-notification approval page.
pub struct PasswordlessHandler;

#[async_trait]
impl StateHandler for PasswordlessHandler {
    fn state(&self) -> LoginState {
        LoginState::Passwordless
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[]
    }

    fn retryable(&self, _credentials: &Credentials) -> bool {
        false
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        on_login_flow(page).await
            && any_visible(page, PASSWORDLESS_TEXTS).await
            && !any_visible(page, PASSWORD_FIELDS).await
            && !any_visible(page, EMAIL_FIELDS).await
            && !any_visible(page, TOTP_FIELDS).await
            && !any_present(page, CODE_ENTRY_MARKERS).await
    }

    async fn handle(&self, _page: &dyn AuthPage, _credentials: &Credentials) -> bool {
        warn!("login_handler: passwordless approval required, needs a human");
        false
    }
}

// ── GetACode ─────────────────────────────────────────────────────────────────

const GET_A_CODE_TEXTS: &[Locator] = &[
    Locator::Text("We need to verify your identity"),
    Locator::Text("Get a code"),
];

/// "Verify your identity" page offering to send a code by email or SMS.
pub struct GetACodeHandler;

#[async_trait]
impl StateHandler for GetACodeHandler {
    fn state(&self) -> LoginState {
        LoginState::GetACode
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[]
    }

    fn retryable(&self, _credentials: &Credentials) -> bool {
        false
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        any_visible(page, GET_A_CODE_TEXTS).await && !any_present(page, CODE_ENTRY_MARKERS).await
    }

    async fn handle(&self, _page: &dyn AuthPage, _credentials: &Credentials) -> bool {
        warn!("login_handler: identity verification by emailed/texted code required, needs a human");
        false
    }
}

// ── OtpCodeEntry ─────────────────────────────────────────────────────────────

const OTP_BYPASS: &[Locator] = &[
    Locator::Button("Use your password"),
    Locator::Css("#idA_PWD_SwitchToPassword"),
    Locator::Css("[data-testid=\"viewFooter\"] [role=\"button\"]"),
];

/// "Enter your code" page reached when the account defaults to emailed codes.
/// The only way forward without a human is to switch back to the password.
pub struct OtpCodeEntryHandler;

#[async_trait]
impl StateHandler for OtpCodeEntryHandler {
    fn state(&self) -> LoginState {
        LoginState::OtpCodeEntry
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[LoginState::PasswordInput]
    }

    fn retryable(&self, _credentials: &Credentials) -> bool {
        false
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        any_present(page, CODE_ENTRY_MARKERS).await
    }

    async fn handle(&self, page: &dyn AuthPage, _credentials: &Credentials) -> bool {
        if page.click_first(OTP_BYPASS).await {
            info!("login_handler: switched from emailed code to password");
            let _ = page.wait_for_load(Duration::from_secs(5)).await;
            true
        } else {
            warn!("login_handler: code entry page without a password option, needs a human");
            false
        }
    }
}

// ── RecoveryEmail ────────────────────────────────────────────────────────────

const RECOVERY_TEXTS: &[Locator] = &[
    Locator::Text("Verify your recovery email"),
    Locator::Text("Help us protect your account"),
];

const RECOVERY_SKIP: &[Locator] = &[Locator::Css("#iShowSkip"), Locator::Button("Skip for now")];

/// Recovery-address verification or the "protect your account" nag.
pub struct RecoveryEmailHandler;

#[async_trait]
impl StateHandler for RecoveryEmailHandler {
    fn state(&self) -> LoginState {
        LoginState::RecoveryEmail
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[LoginState::StaySignedIn, LoginState::LoggedIn]
    }

    fn retryable(&self, _credentials: &Credentials) -> bool {
        false
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        any_visible(page, RECOVERY_TEXTS).await
    }

    async fn handle(&self, page: &dyn AuthPage, _credentials: &Credentials) -> bool {
        if page.click_first(RECOVERY_SKIP).await {
            info!("login_handler: skipped recovery setup prompt");
            let _ = page.wait_for_load(Duration::from_secs(5)).await;
            true
        } else {
            warn!("login_handler: recovery email verification required, needs a human");
            false
        }
    }
}
