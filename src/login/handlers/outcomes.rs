//! Terminal pages. Neither handler acts; recognizing them ends the run.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{any_visible, StateHandler};
use crate::browser::{AuthPage, Locator};
use crate::core::types::Credentials;
use crate::login::signals::LOGGED_IN_LOCATORS;
use crate::login::state::LoginState;
use crate::login::{is_oauth_callback, is_post_login_host};

pub struct LoggedInHandler;

#[async_trait]
impl StateHandler for LoggedInHandler {
    fn state(&self) -> LoginState {
        LoginState::LoggedIn
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[]
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        let Ok(url) = page.url().await else {
            return false;
        };
        if is_oauth_callback(&url) {
            return true;
        }
        is_post_login_host(&url) && any_visible(page, LOGGED_IN_LOCATORS).await
    }

    async fn handle(&self, _page: &dyn AuthPage, _credentials: &Credentials) -> bool {
        info!("login_handler: signed-in page reached");
        true
    }
}

const BLOCKED_TEXTS: &[Locator] = &[
    Locator::Text("Please retry with a different device"),
    Locator::Text("Your account has been locked"),
    Locator::Text("Sign-in is blocked"),
];

/// Lock-out and "try another device" pages.
pub struct AuthBlockedHandler;

#[async_trait]
impl StateHandler for AuthBlockedHandler {
    fn state(&self) -> LoginState {
        LoginState::AuthBlocked
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[]
    }

    fn retryable(&self, _credentials: &Credentials) -> bool {
        false
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        any_visible(page, BLOCKED_TEXTS).await
    }

    async fn handle(&self, _page: &dyn AuthPage, _credentials: &Credentials) -> bool {
        warn!("login_handler: 🔒 account sign-in is blocked, needs human review");
        false
    }
}
