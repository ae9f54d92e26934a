use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{any_present, pause, HandlerSettings, StateHandler};
use crate::browser::{AuthPage, Locator};
use crate::core::types::Credentials;
use crate::login::state::LoginState;

pub(crate) const STAY_SIGNED_IN_MARKERS: &[Locator] = &[
    Locator::Heading("Stay signed in?"),
    Locator::Css("#KmsiCheckboxField"),
    Locator::Css("[data-testid=\"kmsiVideo\"]"),
];

pub(crate) const STAY_SIGNED_IN_YES: &[Locator] = &[
    Locator::Css("#idSIButton9"),
    Locator::Css("button[data-testid=\"primaryButton\"]"),
    Locator::Button("Yes"),
];

const STAY_SIGNED_IN_NO: &[Locator] = &[
    Locator::Css("#idBtn_Back"),
    Locator::Css("button[data-testid=\"secondaryButton\"]"),
    Locator::Button("No"),
];

/// "Stay signed in?" (KMSI) prompt.
pub struct StaySignedInHandler {
    settings: HandlerSettings,
}

impl StaySignedInHandler {
    pub fn new(settings: HandlerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl StateHandler for StaySignedInHandler {
    fn state(&self) -> LoginState {
        LoginState::StaySignedIn
    }

    fn next_states(&self) -> &'static [LoginState] {
        &[LoginState::LoggedIn]
    }

    async fn can_handle(&self, page: &dyn AuthPage) -> bool {
        any_present(page, STAY_SIGNED_IN_MARKERS).await
    }

    async fn handle(&self, page: &dyn AuthPage, _credentials: &Credentials) -> bool {
        pause(&self.settings).await;
        let (controls, answer) = if self.settings.stay_signed_in {
            (STAY_SIGNED_IN_YES, "Yes")
        } else {
            (STAY_SIGNED_IN_NO, "No")
        };
        if page.click_first(controls).await {
            info!("login_handler: answered '{}' on stay-signed-in prompt", answer);
            let _ = page.wait_for_load(Duration::from_secs(5)).await;
            true
        } else {
            warn!("login_handler: stay-signed-in prompt without a '{}' control", answer);
            false
        }
    }
}
