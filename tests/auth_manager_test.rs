mod support;

use std::sync::Arc;
use std::time::Duration;

use rewards_autopilot::login::LoginState;
use rewards_autopilot::{AuthManager, AuthSettings, Credentials, LoginStatusDetector, SessionStore};
use support::*;

const LANDING: &str = "https://rewards.bing.com/";
const HOME: &str = "https://www.bing.com/";

fn manager(dir: &tempfile::TempDir) -> AuthManager {
    let mut settings = AuthSettings::default();
    settings.login_url = LOGIN_URL.to_string();
    settings.landing_url = LANDING.to_string();
    settings.auto_login = true;
    settings.manual_timeout = Duration::from_secs(30);
    settings.handlers.pause_ms = (0, 0);
    settings.watcher.login_url = LOGIN_URL.to_string();
    settings.watcher.home_url = HOME.to_string();
    let detector = Arc::new(LoginStatusDetector::new(settings.detector));
    let store = SessionStore::new(dir.path().join("storage_state.json"));
    AuthManager::new(settings, detector, store)
}

fn context_for(page: FakePage) -> (FakeContext, Arc<FakePage>) {
    let events = FakeContext::event_log();
    let page = Arc::new(page.with_events(Arc::clone(&events)));
    let context = FakeContext::new(vec![Arc::clone(&page)], events).with_snapshot(
        rewards_autopilot::SessionSnapshot {
            cookies: vec![cookie("MSPAuth"), cookie("MSPProf")],
            origins: vec![],
        },
    );
    (context, page)
}

#[tokio::test(start_paused = true)]
async fn auto_login_reports_success_and_keeps_diagnostics() {
    init_logger();
    let dir = tempfile::tempdir().expect("tempdir");
    let auth = manager(&dir);
    let page = FakePage::new(Screen::new("about:blank")).route(LOGIN_URL, email_password_flow());

    assert!(auth.auto_login(&page, &Credentials::new("a@b.com", "x")).await);

    let diag = auth.last_diagnostic().expect("diagnostic");
    assert_eq!(diag.transition_count, 2);
    assert_eq!(diag.current_state, LoginState::LoggedIn);
    assert_eq!(page.navigations()[0], LOGIN_URL);
}

#[tokio::test(start_paused = true)]
async fn auto_login_returns_false_for_missing_totp_secret() {
    let dir = tempfile::tempdir().expect("tempdir");
    let auth = manager(&dir);
    let submit = rewards_autopilot::Locator::Css("#idSIButton9");
    let flow = email_screen().on_click(submit, password_screen().on_click(submit, totp_screen()));
    let page = FakePage::new(Screen::new("about:blank")).route(LOGIN_URL, flow);

    assert!(!auth.auto_login(&page, &Credentials::new("a@b.com", "x")).await);
    assert_eq!(
        auth.last_diagnostic().map(|d| d.current_state),
        Some(LoginState::AuthBlocked)
    );
}

#[tokio::test(start_paused = true)]
async fn auto_login_swallows_machine_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let auth = manager(&dir);
    let page = FakePage::new(Screen::new("about:blank")).route(LOGIN_URL, unknown_screen());

    assert!(!auth.auto_login(&page, &Credentials::new("a@b.com", "x")).await);
    let diag = auth.last_diagnostic().expect("diagnostic");
    assert!(diag
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("https://example.com/")));
}

#[tokio::test(start_paused = true)]
async fn is_logged_in_treats_navigation_failure_as_signed_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let auth = manager(&dir);
    let page = FakePage::new(signed_in_screen()).failing_goto();

    assert!(!auth.is_logged_in(&page, true).await);
    assert_eq!(page.navigations(), vec![LANDING.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn is_logged_in_navigates_then_detects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let auth = manager(&dir);
    let page = FakePage::new(Screen::new("about:blank")).route(LANDING, signed_in_screen());

    assert!(auth.is_logged_in(&page, true).await);
    // Without navigation the fresh cached verdict is reused.
    assert!(auth.is_logged_in(&page, false).await);
    assert_eq!(page.navigations().len(), 1);
    assert_eq!(page.reloads(), 1);
}

#[tokio::test(start_paused = true)]
async fn refresh_session_saves_after_manual_login() {
    let dir = tempfile::tempdir().expect("tempdir");
    let auth = manager(&dir);
    let (context, page) = context_for(
        FakePage::new(Screen::new("about:blank"))
            .route(LOGIN_URL, email_screen())
            .route(HOME, bing_home_signed_in())
            .at(Duration::from_secs(7), signed_in_screen()),
    );

    assert!(!auth.session_exists());
    assert!(auth.refresh_session(page.as_ref(), &context).await);
    assert!(auth.session_exists());
    assert_eq!(auth.storage_path(), dir.path().join("storage_state.json"));
}

#[tokio::test(start_paused = true)]
async fn refresh_session_does_not_save_when_nobody_signs_in() {
    let dir = tempfile::tempdir().expect("tempdir");
    let auth = manager(&dir);
    let (context, page) = context_for(
        FakePage::new(Screen::new("about:blank")).route(LOGIN_URL, email_screen()),
    );

    assert!(!auth.refresh_session(page.as_ref(), &context).await);
    assert!(!auth.session_exists());
    assert!(context.events().iter().all(|e| e != "dialogs"));
}

#[tokio::test(start_paused = true)]
async fn ensure_logged_in_uses_a_valid_saved_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let auth = manager(&dir);
    let store = SessionStore::new(auth.storage_path());
    store
        .write(&rewards_autopilot::SessionSnapshot {
            cookies: vec![cookie("MSPAuth")],
            origins: vec![],
        })
        .expect("seed");
    let (context, page) = context_for(
        FakePage::new(Screen::new("about:blank")).route(LANDING, signed_in_screen()),
    );

    assert!(auth.ensure_logged_in(page.as_ref(), &context, None).await);
    assert_eq!(context.applied().len(), 1);
    assert!(auth.last_diagnostic().is_none());
}

#[tokio::test(start_paused = true)]
async fn ensure_logged_in_falls_back_to_credentials_and_saves() {
    let dir = tempfile::tempdir().expect("tempdir");
    let auth = manager(&dir);
    let (context, page) = context_for(
        FakePage::new(Screen::new("about:blank"))
            .route(LANDING, Screen::new(LANDING).title("Microsoft Rewards").button("Sign in").element("#id_s"))
            .route(LOGIN_URL, email_password_flow()),
    );
    let creds = Credentials::new("a@b.com", "x");

    assert!(auth.ensure_logged_in(page.as_ref(), &context, Some(&creds)).await);
    assert!(auth.session_exists());
    assert_eq!(auth.last_diagnostic().map(|d| d.transition_count), Some(2));
}
