//! Authentication orchestrator: the one entry point the rest of the bot uses.
//!
//! Composes the login-status detector, the credential-driven state machine,
//! the manual-login watcher and the session store. Every public operation
//! returns a plain `bool`; reasons are logged and kept in
//! [`AuthManager::last_diagnostic`].

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use tracing::{error, info, warn};

use crate::browser::{AuthContext, AuthPage};
use crate::core::clock::{Clock, TokioClock};
use crate::core::config::AppConfig;
use crate::core::types::Credentials;
use crate::features::session_store::SessionStore;
use crate::login::handlers::{default_handlers, HandlerSettings};
use crate::login::{
    redact_url, DetectorSettings, LoginError, LoginStateMachine, LoginStatusDetector,
    MachineDiagnostic, MachineSettings, ManualLoginWatcher, WatcherSettings,
};

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub login_url: String,
    /// Rewards page used to judge the session.
    pub landing_url: String,
    pub auto_login: bool,
    pub manual_timeout: Duration,
    pub machine: MachineSettings,
    pub handlers: HandlerSettings,
    pub watcher: WatcherSettings,
    pub detector: DetectorSettings,
    /// Upper bound on retrying a failed navigation to the login page.
    pub navigation_retry: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl AuthSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let login_url = cfg.account.resolve_login_url();
        let stay_signed_in = cfg.login.resolve_stay_signed_in();
        Self {
            landing_url: cfg.account.resolve_landing_url(),
            auto_login: cfg.login.resolve_auto_login(),
            manual_timeout: Duration::from_secs(cfg.login.resolve_manual_timeout_seconds()),
            machine: MachineSettings {
                max_transitions: cfg.login.resolve_max_transitions(),
                timeout: Duration::from_secs(cfg.login.resolve_timeout_seconds()),
                max_state_retries: cfg.login.resolve_max_state_retries(),
                ..MachineSettings::default()
            },
            handlers: HandlerSettings {
                stay_signed_in,
                ..HandlerSettings::default()
            },
            watcher: WatcherSettings {
                poll_interval: Duration::from_secs(cfg.login.resolve_poll_interval_seconds()),
                stay_signed_in,
                login_url: login_url.clone(),
                home_url: cfg.account.resolve_home_url(),
                ..WatcherSettings::default()
            },
            detector: DetectorSettings {
                cache_ttl: Duration::from_secs(cfg.detection.resolve_cache_ttl_seconds()),
                signal_timeout: Duration::from_secs(cfg.detection.resolve_signal_timeout_seconds()),
            },
            navigation_retry: Duration::from_secs(20),
            login_url,
        }
    }
}

pub struct AuthManager {
    settings: AuthSettings,
    detector: Arc<LoginStatusDetector>,
    store: SessionStore,
    clock: Arc<dyn Clock>,
    last_diagnostic: Mutex<Option<MachineDiagnostic>>,
}

impl AuthManager {
    pub fn new(settings: AuthSettings, detector: Arc<LoginStatusDetector>, store: SessionStore) -> Self {
        Self {
            settings,
            detector,
            store,
            clock: Arc::new(TokioClock),
            last_diagnostic: Mutex::new(None),
        }
    }

    /// Settings, detector and session path from `rewards-autopilot.json`.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let settings = AuthSettings::from_config(cfg);
        let detector = Arc::new(LoginStatusDetector::new(settings.detector));
        let store = SessionStore::new(cfg.account.resolve_storage_state_path());
        Self::new(settings, detector, store)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn detector(&self) -> &Arc<LoginStatusDetector> {
        &self.detector
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Is the session on `page` signed in?
    ///
    /// With `navigate`, the landing page is opened first and the verdict is
    /// recomputed; a failed navigation counts as "not signed in". Without it,
    /// a fresh cached verdict is reused.
    pub async fn is_logged_in(&self, page: &dyn AuthPage, navigate: bool) -> bool {
        if !navigate {
            return self.detector.detect(page, true).await;
        }
        if let Err(e) = page.goto(&self.settings.landing_url).await {
            warn!(
                "auth_manager: navigation to {} failed, treating as signed out: {}",
                self.settings.landing_url, e
            );
            return false;
        }
        let _ = page.wait_for_load(Duration::from_secs(10)).await;
        self.detector.force_recheck(page).await
    }

    /// Drives the credential sign-in flow. `false` on every failure; the
    /// cause is logged and kept in [`AuthManager::last_diagnostic`].
    pub async fn auto_login(&self, page: &dyn AuthPage, credentials: &Credentials) -> bool {
        if let Err(e) = self.open_login_page(page).await {
            warn!("auth_manager: could not reach the login page: {:#}", e);
            return false;
        }

        let mut machine = LoginStateMachine::with_clock(
            self.settings.machine,
            default_handlers(self.settings.handlers),
            Arc::clone(&self.detector),
            Arc::clone(&self.clock),
        );
        let outcome = machine.handle_login(page, credentials).await;
        self.set_last_diagnostic(machine.diagnostic_info());

        match outcome {
            Ok(true) => {
                info!("auth_manager: ✅ automatic sign-in succeeded");
                true
            }
            Ok(false) => {
                warn!(
                    "auth_manager: automatic sign-in stopped at {}, needs a human",
                    machine.current_state()
                );
                false
            }
            Err(e @ LoginError::Timeout { .. }) => {
                warn!("auth_manager: ⏱️ auth timeout: {}", e);
                false
            }
            Err(e @ LoginError::TooManyTransitions { .. }) => {
                error!("auth_manager: 🔁 too many transitions: {}", e);
                false
            }
            Err(e @ LoginError::UnrecognizedPage { .. }) => {
                error!("auth_manager: ❓ unrecognized page: {}", e);
                false
            }
        }
    }

    pub async fn wait_for_manual_login(&self, page: &dyn AuthPage, timeout: Duration) -> bool {
        let watcher = ManualLoginWatcher::with_clock(
            self.settings.watcher.clone(),
            Arc::clone(&self.detector),
            Arc::clone(&self.clock),
        );
        watcher.wait_for_manual_login(page, timeout).await
    }

    /// Manual sign-in followed by a snapshot save that keeps `page` open.
    pub async fn refresh_session(&self, page: &dyn AuthPage, context: &dyn AuthContext) -> bool {
        if !self
            .wait_for_manual_login(page, self.settings.manual_timeout)
            .await
        {
            return false;
        }
        let id = page.id();
        self.store.save_keeping(context, Some(&id)).await
    }

    pub fn session_exists(&self) -> bool {
        self.store.exists()
    }

    pub fn storage_path(&self) -> &Path {
        self.store.path()
    }

    /// Restore, verify, sign in with credentials, fall back to a human, then
    /// persist. Stops at the first step that yields a signed-in session.
    pub async fn ensure_logged_in(
        &self,
        page: &dyn AuthPage,
        context: &dyn AuthContext,
        credentials: Option<&Credentials>,
    ) -> bool {
        if self.store.restore(context).await {
            info!("auth_manager: restored saved session, verifying");
            if self.is_logged_in(page, true).await {
                info!("auth_manager: ✅ saved session is still valid");
                return true;
            }
            info!("auth_manager: saved session is stale");
        } else if self.is_logged_in(page, true).await {
            return self.persist(page, context).await;
        }

        if self.settings.auto_login {
            if let Some(creds) = credentials {
                if self.auto_login(page, creds).await {
                    return self.persist(page, context).await;
                }
            }
        }

        info!("auth_manager: 👤 falling back to manual sign-in");
        if self
            .wait_for_manual_login(page, self.settings.manual_timeout)
            .await
        {
            return self.persist(page, context).await;
        }
        false
    }

    /// Diagnostic of the most recent [`AuthManager::auto_login`] run.
    pub fn last_diagnostic(&self) -> Option<MachineDiagnostic> {
        self.last_diagnostic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_diagnostic(&self, diagnostic: MachineDiagnostic) {
        *self
            .last_diagnostic
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(diagnostic);
    }

    /// Saving is best effort: the session is signed in either way.
    async fn persist(&self, page: &dyn AuthPage, context: &dyn AuthContext) -> bool {
        let id = page.id();
        if !self.store.save_keeping(context, Some(&id)).await {
            warn!("auth_manager: signed in, but the session could not be saved");
        }
        true
    }

    async fn open_login_page(&self, page: &dyn AuthPage) -> anyhow::Result<()> {
        let url = self.settings.login_url.as_str();
        retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(500))
                .with_max_interval(Duration::from_secs(5))
                .with_max_elapsed_time(Some(self.settings.navigation_retry))
                .build(),
            || async {
                page.goto(url).await.map_err(|e| {
                    warn!("auth_manager: opening {} failed, retrying: {}", redact_url(url), e);
                    backoff::Error::transient(anyhow!("{}", e))
                })
            },
        )
        .await?;
        let _ = page.wait_for_load(Duration::from_secs(10)).await;
        Ok(())
    }
}
