//! Browser capabilities consumed by the login subsystem.
//!
//! The login code never touches `chromiumoxide` directly: it drives an
//! [`AuthPage`] and an [`AuthContext`]. [`cdp`] provides the Chromium
//! implementation, tests provide in-memory ones.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::types::{Cookie, SessionSnapshot};

pub mod browser_manager;
pub mod cdp;

pub use cdp::{CdpContext, CdpPage};

/// How an element (or text) is looked up on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locator {
    /// CSS selector.
    Css(&'static str),
    /// Case-insensitive substring of the page's visible text.
    Text(&'static str),
    /// Heading (`h1` to `h3`, `[role=heading]`) whose trimmed text equals this exactly.
    Heading(&'static str),
    /// Button-like control whose trimmed label equals this, ignoring case.
    Button(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Presence {
    pub present: bool,
    pub visible: bool,
}

/// A network response seen while a page reloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedResponse {
    pub url: String,
    pub status: u16,
    pub set_cookie: Option<String>,
    pub content_type: Option<String>,
    /// Body text, only fetched for JSON responses.
    pub body: Option<String>,
}

#[async_trait]
pub trait AuthPage: Send + Sync {
    /// Stable identifier of this page within its context.
    fn id(&self) -> String;

    async fn url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;
    /// Rendered text of the document body.
    async fn body_text(&self) -> Result<String>;

    async fn probe(&self, locator: Locator) -> Result<Presence>;

    /// Clicks the first visible match. `Ok(false)` when nothing matched.
    async fn click(&self, locator: Locator) -> Result<bool>;

    /// Replaces the value of the first visible match. `Ok(false)` when nothing matched.
    async fn fill(&self, locator: Locator, value: &str) -> Result<bool>;

    async fn goto(&self, url: &str) -> Result<()>;
    async fn reload(&self) -> Result<()>;

    /// Waits until the document settles or `timeout` elapses. Never fails on timeout.
    async fn wait_for_load(&self, timeout: Duration) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Cookies visible to the given URLs.
    async fn cookies(&self, urls: &[String]) -> Result<Vec<Cookie>>;

    /// Reloads the page and returns the responses received within `window`.
    ///
    /// The response subscription only lives for the duration of the call.
    async fn reload_observing(&self, window: Duration) -> Result<Vec<ObservedResponse>>;

    async fn close(&self) -> Result<()>;

    async fn is_visible(&self, locator: Locator) -> bool {
        self.probe(locator).await.map(|p| p.visible).unwrap_or(false)
    }

    async fn is_present(&self, locator: Locator) -> bool {
        self.probe(locator).await.map(|p| p.present).unwrap_or(false)
    }

    /// First locator in `locators` that is visible, if any.
    async fn first_visible(&self, locators: &[Locator]) -> Option<Locator> {
        for loc in locators {
            if self.is_visible(*loc).await {
                return Some(*loc);
            }
        }
        None
    }

    /// Clicks the first locator in `locators` that matches something.
    async fn click_first(&self, locators: &[Locator]) -> bool {
        for loc in locators {
            if let Ok(true) = self.click(*loc).await {
                return true;
            }
        }
        false
    }

    /// Fills the first locator in `locators` that matches something.
    async fn fill_first(&self, locators: &[Locator], value: &str) -> bool {
        for loc in locators {
            if let Ok(true) = self.fill(*loc, value).await {
                return true;
            }
        }
        false
    }
}

#[async_trait]
pub trait AuthContext: Send + Sync {
    /// All open pages, in creation order.
    async fn pages(&self) -> Result<Vec<Arc<dyn AuthPage>>>;

    /// Accepts every JavaScript dialog (alert, confirm, beforeunload) on every
    /// open page until [`AuthContext::release_dialog_handlers`]. Returns how
    /// many pages were hooked.
    async fn auto_accept_dialogs(&self) -> Result<usize>;

    async fn release_dialog_handlers(&self);

    /// Serialized cookies and per-origin local storage.
    async fn storage_state(&self) -> Result<SessionSnapshot>;

    async fn apply_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()>;
}
