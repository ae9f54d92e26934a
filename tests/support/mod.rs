//! In-memory browser for scenario tests.
//!
//! A [`FakePage`] shows one [`Screen`] at a time. Clicking a locator a screen
//! lists in `on_click` swaps in the next screen, `goto` follows `routes`, and
//! `timeline` entries replace the screen once tokio time passes their offset
//! (a human acting in the browser).
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::Instant;

use rewards_autopilot::browser::{AuthContext, AuthPage, Locator, ObservedResponse, Presence};
use rewards_autopilot::core::clock::Clock;
use rewards_autopilot::{Cookie, SessionSnapshot};

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

// ── Screens ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Screen {
    pub url: String,
    pub title: String,
    pub body: String,
    pub headings: Vec<String>,
    pub buttons: Vec<String>,
    /// CSS selectors rendered and visible.
    pub elements: Vec<String>,
    /// CSS selectors in the DOM but hidden.
    pub hidden: Vec<String>,
    pub on_click: Vec<(Locator, Screen)>,
}

impl Screen {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn heading(mut self, text: &str) -> Self {
        self.headings.push(text.to_string());
        self
    }

    pub fn button(mut self, label: &str) -> Self {
        self.buttons.push(label.to_string());
        self
    }

    pub fn element(mut self, selector: &str) -> Self {
        self.elements.push(selector.to_string());
        self
    }

    pub fn hidden(mut self, selector: &str) -> Self {
        self.hidden.push(selector.to_string());
        self
    }

    pub fn on_click(mut self, locator: Locator, next: Screen) -> Self {
        self.on_click.push((locator, next));
        self
    }

    fn probe(&self, locator: Locator) -> Presence {
        match locator {
            Locator::Css(sel) => {
                let visible = self.elements.iter().any(|e| e == sel);
                Presence {
                    present: visible || self.hidden.iter().any(|e| e == sel),
                    visible,
                }
            }
            Locator::Text(text) => {
                let needle = text.to_lowercase();
                let haystack = format!(
                    "{}\n{}\n{}",
                    self.body,
                    self.headings.join("\n"),
                    self.buttons.join("\n")
                )
                .to_lowercase();
                let hit = haystack.contains(&needle);
                Presence {
                    present: hit,
                    visible: hit,
                }
            }
            Locator::Heading(text) => {
                let hit = self.headings.iter().any(|h| h.trim() == text);
                Presence {
                    present: hit,
                    visible: hit,
                }
            }
            Locator::Button(label) => {
                let hit = self
                    .buttons
                    .iter()
                    .any(|b| b.trim().eq_ignore_ascii_case(label));
                Presence {
                    present: hit,
                    visible: hit,
                }
            }
        }
    }
}

// ── Faults ──────────────────────────────────────────────────────────────────

/// How an injected browser call misbehaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    Fail,
    Hang,
}

impl Fault {
    async fn strike(self, what: &str) -> Result<()> {
        match self {
            Fault::Fail => Err(anyhow!("{} failed: target closed", what)),
            Fault::Hang => std::future::pending().await,
        }
    }
}

// ── Page ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PageState {
    screen: Screen,
    routes: HashMap<String, Screen>,
    timeline: Vec<(Instant, Screen)>,
    cookies: Vec<Cookie>,
    responses: Vec<ObservedResponse>,
    fail_goto: bool,
    evaluate_fault: Option<Fault>,
    close_fault: Option<Fault>,
    closed: bool,
    clicks: Vec<Locator>,
    fills: Vec<(Locator, String)>,
    navigations: Vec<String>,
    reloads: usize,
    evaluations: Vec<String>,
}

pub struct FakePage {
    id: String,
    state: Mutex<PageState>,
    events: Arc<Mutex<Vec<String>>>,
}

impl FakePage {
    pub fn new(screen: Screen) -> Self {
        Self::with_id("page-1", screen)
    }

    pub fn with_id(id: &str, screen: Screen) -> Self {
        Self {
            id: id.to_string(),
            state: Mutex::new(PageState {
                screen,
                ..Default::default()
            }),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shares an event log with a [`FakeContext`].
    pub fn with_events(mut self, events: Arc<Mutex<Vec<String>>>) -> Self {
        self.events = events;
        self
    }

    pub fn route(self, url: &str, screen: Screen) -> Self {
        self.state.lock().unwrap().routes.insert(url.to_string(), screen);
        self
    }

    /// Replaces the screen once `after` has elapsed from now.
    pub fn at(self, after: Duration, screen: Screen) -> Self {
        self.state
            .lock()
            .unwrap()
            .timeline
            .push((Instant::now() + after, screen));
        self
    }

    pub fn cookies_jar(self, cookies: Vec<Cookie>) -> Self {
        self.state.lock().unwrap().cookies = cookies;
        self
    }

    pub fn responses(self, responses: Vec<ObservedResponse>) -> Self {
        self.state.lock().unwrap().responses = responses;
        self
    }

    pub fn failing_goto(self) -> Self {
        self.state.lock().unwrap().fail_goto = true;
        self
    }

    pub fn evaluate_fault(self, fault: Fault) -> Self {
        self.state.lock().unwrap().evaluate_fault = Some(fault);
        self
    }

    pub fn close_fault(self, fault: Fault) -> Self {
        self.state.lock().unwrap().close_fault = Some(fault);
        self
    }

    pub fn current_url(&self) -> String {
        self.sync().screen.url.clone()
    }

    pub fn clicks(&self) -> Vec<Locator> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(Locator, String)> {
        self.state.lock().unwrap().fills.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn reloads(&self) -> usize {
        self.state.lock().unwrap().reloads
    }

    pub fn evaluations(&self) -> Vec<String> {
        self.state.lock().unwrap().evaluations.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn sync(&self) -> std::sync::MutexGuard<'_, PageState> {
        let mut st = self.state.lock().unwrap();
        let now = Instant::now();
        let mut due: Vec<(Instant, Screen)> = Vec::new();
        st.timeline.retain(|(at, screen)| {
            if *at <= now {
                due.push((*at, screen.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        if let Some((_, screen)) = due.pop() {
            st.screen = screen;
        }
        st
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl AuthPage for FakePage {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn url(&self) -> Result<String> {
        Ok(self.sync().screen.url.clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.sync().screen.title.clone())
    }

    async fn body_text(&self) -> Result<String> {
        Ok(self.sync().screen.body.clone())
    }

    async fn probe(&self, locator: Locator) -> Result<Presence> {
        Ok(self.sync().screen.probe(locator))
    }

    async fn click(&self, locator: Locator) -> Result<bool> {
        let mut st = self.sync();
        if !st.screen.probe(locator).visible {
            return Ok(false);
        }
        st.clicks.push(locator);
        let next = st
            .screen
            .on_click
            .iter()
            .find(|(l, _)| *l == locator)
            .map(|(_, s)| s.clone());
        if let Some(next) = next {
            st.screen = next;
        }
        Ok(true)
    }

    async fn fill(&self, locator: Locator, value: &str) -> Result<bool> {
        let mut st = self.sync();
        if !st.screen.probe(locator).visible {
            return Ok(false);
        }
        st.fills.push((locator, value.to_string()));
        Ok(true)
    }

    async fn goto(&self, url: &str) -> Result<()> {
        let mut st = self.sync();
        st.navigations.push(url.to_string());
        if st.fail_goto {
            return Err(anyhow!("net::ERR_NAME_NOT_RESOLVED"));
        }
        if let Some(screen) = st.routes.get(url).cloned() {
            st.screen = screen;
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.sync().reloads += 1;
        Ok(())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let fault = {
            let mut st = self.sync();
            st.evaluations.push(script.to_string());
            st.evaluate_fault
        };
        if let Some(fault) = fault {
            fault.strike("evaluate").await?;
        }
        if script.contains("onbeforeunload") {
            self.log(format!("neutralize:{}", self.id));
        }
        Ok(serde_json::Value::Bool(true))
    }

    async fn cookies(&self, _urls: &[String]) -> Result<Vec<Cookie>> {
        Ok(self.sync().cookies.clone())
    }

    async fn reload_observing(&self, _window: Duration) -> Result<Vec<ObservedResponse>> {
        let mut st = self.sync();
        st.reloads += 1;
        Ok(st.responses.clone())
    }

    async fn close(&self) -> Result<()> {
        let fault = self.state.lock().unwrap().close_fault;
        if let Some(fault) = fault {
            fault.strike("close").await?;
        }
        self.state.lock().unwrap().closed = true;
        self.log(format!("close:{}", self.id));
        Ok(())
    }
}

// ── Context ─────────────────────────────────────────────────────────────────

pub struct FakeContext {
    pages: Vec<Arc<FakePage>>,
    snapshot: Mutex<SessionSnapshot>,
    applied: Mutex<Vec<SessionSnapshot>>,
    dialog_fault: Option<Fault>,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl FakeContext {
    /// Pages must have been built with [`FakeContext::event_log`] to share its log.
    pub fn new(pages: Vec<Arc<FakePage>>, events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            pages,
            snapshot: Mutex::new(SessionSnapshot::default()),
            applied: Mutex::new(Vec::new()),
            dialog_fault: None,
            events,
        }
    }

    pub fn event_log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn with_snapshot(self, snapshot: SessionSnapshot) -> Self {
        *self.snapshot.lock().unwrap() = snapshot;
        self
    }

    pub fn dialog_fault(mut self, fault: Fault) -> Self {
        self.dialog_fault = Some(fault);
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<SessionSnapshot> {
        self.applied.lock().unwrap().clone()
    }

    fn log(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

#[async_trait]
impl AuthContext for FakeContext {
    async fn pages(&self) -> Result<Vec<Arc<dyn AuthPage>>> {
        Ok(self
            .pages
            .iter()
            .filter(|p| !p.is_closed())
            .map(|p| Arc::clone(p) as Arc<dyn AuthPage>)
            .collect())
    }

    async fn auto_accept_dialogs(&self) -> Result<usize> {
        self.log("dialogs");
        if let Some(fault) = self.dialog_fault {
            fault.strike("dialog setup").await?;
        }
        Ok(self.pages.iter().filter(|p| !p.is_closed()).count())
    }

    async fn release_dialog_handlers(&self) {
        self.log("release");
    }

    async fn storage_state(&self) -> Result<SessionSnapshot> {
        let open = self.pages.iter().filter(|p| !p.is_closed()).count();
        self.log(&format!("capture:{}", open));
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn apply_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.log("apply");
        self.applied.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

// ── Clock ───────────────────────────────────────────────────────────────────

/// Clock that only moves when told to.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn wall_millis(&self) -> i64 {
        1_700_000_000_000 + self.offset.lock().unwrap().as_millis() as i64
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

// ── Fixtures ────────────────────────────────────────────────────────────────

pub const LOGIN_URL: &str = "https://login.live.com/login.srf";

pub fn cookie(name: &str) -> Cookie {
    Cookie {
        name: name.to_string(),
        value: format!("{}-value", name),
        domain: ".live.com".to_string(),
        path: "/".to_string(),
        expires: -1.0,
        http_only: true,
        secure: true,
        same_site: Some("None".to_string()),
    }
}

pub fn signed_in_screen() -> Screen {
    Screen::new("https://rewards.bing.com/")
        .title("Microsoft Rewards")
        .body("Welcome back! Points breakdown")
        .element("#mectrl_headerPicture")
}

pub fn bing_home_signed_in() -> Screen {
    Screen::new("https://www.bing.com/")
        .title("Bing")
        .body("Sign out")
        .element("#id_n")
}

pub fn bing_home_signed_out() -> Screen {
    Screen::new("https://www.bing.com/")
        .title("Bing")
        .body("Search the web")
        .button("Sign in")
        .element("#id_s")
}

pub fn email_screen() -> Screen {
    Screen::new(LOGIN_URL)
        .title("Sign in to your Microsoft account")
        .body("Sign in Email, phone, or Skype No account? Create one!")
        .element("input[type=\"email\"]")
        .element("input[name=\"loginfmt\"]")
        .element("#i0116")
        .element("#idSIButton9")
}

pub fn password_screen() -> Screen {
    Screen::new(LOGIN_URL)
        .title("Sign in to your Microsoft account")
        .body("Enter password Forgot password? Other ways to sign in")
        .element("input[type=\"password\"]")
        .element("input[name=\"passwd\"]")
        .element("#i0118")
        .element("#idSIButton9")
}

pub fn totp_screen() -> Screen {
    Screen::new(LOGIN_URL)
        .title("Sign in to your Microsoft account")
        .body("Enter code. Enter the code displayed in the authenticator app on your mobile device")
        .element("#idTxtBx_SAOTCC_OTC")
        .element("input[name=\"otc\"]")
        .element("#idSubmit_SAOTCC_Continue")
}

pub fn otp_code_entry_screen() -> Screen {
    Screen::new(LOGIN_URL)
        .title("Sign in to your Microsoft account")
        .heading("Enter your code")
        .body("We sent a code to a***@b.com")
        .element("[data-testid=\"codeEntry\"]")
        .button("Use your password")
}

pub fn passwordless_screen() -> Screen {
    Screen::new(LOGIN_URL)
        .heading("Approve sign in request")
        .body("Open your phone and tap the number shown. Use your password instead")
}

pub fn get_a_code_screen() -> Screen {
    Screen::new("https://account.live.com/identity/confirm")
        .title("Verify your identity")
        .body("We need to verify your identity. How would you like to get your security code?")
        .button("Get a code")
}

pub fn recovery_email_screen() -> Screen {
    Screen::new("https://account.live.com/proofs/Add")
        .title("Protect your account")
        .body("Help us protect your account. Add a recovery address.")
        .element("#iShowSkip")
        .button("Skip for now")
}

pub fn stay_signed_in_screen() -> Screen {
    Screen::new("https://login.live.com/ppsecure/post.srf")
        .title("Stay signed in?")
        .heading("Stay signed in?")
        .body("Do this to reduce the number of times you are asked to sign in.")
        .element("#KmsiCheckboxField")
        .element("#idSIButton9")
        .element("#idBtn_Back")
        .button("Yes")
        .button("No")
}

pub fn auth_blocked_screen() -> Screen {
    Screen::new(LOGIN_URL)
        .title("Sign in to your Microsoft account")
        .body("Please retry with a different device or sign-in method.")
}

pub fn unknown_screen() -> Screen {
    Screen::new("https://example.com/?q=private")
        .title("Example Domain")
        .body("Hello world")
}

/// Email → Password → rewards landing, driven by the Next/Sign in button.
pub fn email_password_flow() -> Screen {
    let submit = Locator::Css("#idSIButton9");
    email_screen().on_click(submit, password_screen().on_click(submit, signed_in_screen()))
}
