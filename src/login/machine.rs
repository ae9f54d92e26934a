//! Login state machine: recognize the current sign-in page, run its handler,
//! record the transition, repeat until a terminal state.
//!
//! ```text
//!   ┌────────────── deadline / transition ceiling ──────────────┐
//!   │                                                           │
//!   ▼                                                           │
//! detector (forced) ──yes──► LoggedIn ─► Ok(true)               │
//!   │no                                                         │
//!   ▼                                                           │
//! first handler whose can_handle() is true (priority order)     │
//!   │none after re-probing ─► Err(UnrecognizedPage)             │
//!   ▼                                                           │
//! AuthBlocked ─► Ok(false)                                      │
//! other ─► handle() ──advanced──────────────────────────────────┘
//!            │failed: retry same state, then ─► AuthBlocked ─► Ok(false)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use super::detector::LoginStatusDetector;
use super::handlers::StateHandler;
use super::redact_url;
use super::state::LoginState;
use crate::browser::AuthPage;
use crate::core::clock::{elapsed_since, Clock, TokioClock};
use crate::core::types::Credentials;

const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoginError {
    #[error("login did not finish within {timeout_secs}s (elapsed {elapsed_secs:.1}s)")]
    Timeout { timeout_secs: u64, elapsed_secs: f64 },
    #[error("login exceeded {max} state transitions without reaching a terminal state")]
    TooManyTransitions { max: u32 },
    #[error("no handler recognizes the current page ({url})")]
    UnrecognizedPage { url: String },
}

impl LoginError {
    /// Short machine-readable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LoginError::Timeout { .. } => "timeout",
            LoginError::TooManyTransitions { .. } => "too_many_transitions",
            LoginError::UnrecognizedPage { .. } => "unrecognized_page",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StateTransition {
    pub from: LoginState,
    pub to: LoginState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HandlerAttempt {
    pub state: LoginState,
    pub advanced: bool,
    /// Consecutive failures on this state before this attempt.
    pub retry: u32,
    pub at: DateTime<Utc>,
}

/// Snapshot of a machine run, readable after success or failure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MachineDiagnostic {
    pub current_state: LoginState,
    pub transition_count: u32,
    pub max_transitions: u32,
    pub timeout_seconds: u64,
    pub state_history: Vec<StateTransition>,
    pub attempts: Vec<HandlerAttempt>,
    pub registered_handlers: Vec<LoginState>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MachineSettings {
    pub max_transitions: u32,
    pub timeout: Duration,
    /// Failed attempts allowed on one state (after the first) before giving up.
    pub max_state_retries: u32,
    /// Pause after each handler action.
    pub step_delay: Duration,
    /// Extra recognition passes before a page counts as unrecognized.
    pub recognition_attempts: u32,
    pub recognition_interval: Duration,
    /// Upper bound on waiting for the page to settle each iteration.
    pub settle_timeout: Duration,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            max_transitions: 20,
            timeout: Duration::from_secs(300),
            max_state_retries: 2,
            step_delay: Duration::from_secs(1),
            recognition_attempts: 3,
            recognition_interval: Duration::from_secs(1),
            settle_timeout: Duration::from_secs(10),
        }
    }
}

/// Drives one login attempt. Build a fresh machine per attempt.
pub struct LoginStateMachine {
    settings: MachineSettings,
    handlers: Vec<Box<dyn StateHandler>>,
    detector: Arc<LoginStatusDetector>,
    clock: Arc<dyn Clock>,
    current: LoginState,
    transition_count: u32,
    history: VecDeque<StateTransition>,
    attempts: VecDeque<HandlerAttempt>,
    last_error: Option<String>,
}

impl LoginStateMachine {
    /// `handlers` must already be in dispatch priority order.
    pub fn new(
        settings: MachineSettings,
        handlers: Vec<Box<dyn StateHandler>>,
        detector: Arc<LoginStatusDetector>,
    ) -> Self {
        Self::with_clock(settings, handlers, detector, Arc::new(TokioClock))
    }

    pub fn with_clock(
        settings: MachineSettings,
        handlers: Vec<Box<dyn StateHandler>>,
        detector: Arc<LoginStatusDetector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            handlers,
            detector,
            clock,
            current: LoginState::EmailInput,
            transition_count: 0,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            attempts: VecDeque::with_capacity(HISTORY_LIMIT),
            last_error: None,
        }
    }

    pub fn current_state(&self) -> LoginState {
        self.current
    }

    pub fn transition_count(&self) -> u32 {
        self.transition_count
    }

    pub fn diagnostic_info(&self) -> MachineDiagnostic {
        MachineDiagnostic {
            current_state: self.current,
            transition_count: self.transition_count,
            max_transitions: self.settings.max_transitions,
            timeout_seconds: self.settings.timeout.as_secs(),
            state_history: self.history.iter().cloned().collect(),
            attempts: self.attempts.iter().cloned().collect(),
            registered_handlers: self.handlers.iter().map(|h| h.state()).collect(),
            last_error: self.last_error.clone(),
        }
    }

    /// Runs the sign-in flow on `page`.
    ///
    /// `Ok(true)` when signed in, `Ok(false)` when the flow ended blocked or
    /// needing a human. Errors mean the flow could not be driven at all.
    pub async fn handle_login(
        &mut self,
        page: &dyn AuthPage,
        credentials: &Credentials,
    ) -> Result<bool, LoginError> {
        let started = self.clock.now();
        info!(
            "login_machine: starting (max_transitions={}, timeout={}s, handlers={})",
            self.settings.max_transitions,
            self.settings.timeout.as_secs(),
            self.handlers.len()
        );
        let result = self.run(page, credentials, started).await;
        match &result {
            Ok(true) => info!(
                "login_machine: ✅ signed in after {} transitions",
                self.transition_count
            ),
            Ok(false) => warn!(
                "login_machine: stopped in {} after {} transitions",
                self.current, self.transition_count
            ),
            Err(e) => {
                warn!("login_machine: {} ({})", e, e.kind());
                self.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn run(
        &mut self,
        page: &dyn AuthPage,
        credentials: &Credentials,
        started: Instant,
    ) -> Result<bool, LoginError> {
        let mut advanced_last = false;
        let mut failures_here = 0u32;
        let mut expected: &'static [LoginState] = &[];

        loop {
            self.check_deadline(started)?;

            let settle = self.settings.settle_timeout.min(self.remaining(started));
            let _ = page.wait_for_load(settle).await;

            let signed_in = tokio::time::timeout(
                self.remaining(started),
                self.detector.force_recheck(page),
            )
            .await
            .map_err(|_| self.timeout_error(started))?;
            if signed_in {
                if self.current != LoginState::LoggedIn {
                    self.record(LoginState::LoggedIn);
                }
                return Ok(true);
            }

            let idx = self.recognize(page, started).await?;
            let observed = self.handlers[idx].state();

            if observed != self.current || advanced_last {
                if advanced_last && !expected.is_empty() && !expected.contains(&observed) {
                    warn!(
                        "login_machine: unexpected transition {} → {}",
                        self.current, observed
                    );
                }
                if observed != self.current {
                    failures_here = 0;
                }
                self.transition(observed)?;
            }

            if observed.is_terminal() {
                let _ = self.handlers[idx].handle(page, credentials).await;
                return Ok(observed == LoginState::LoggedIn);
            }

            let remaining = self.remaining(started);
            let advanced =
                match tokio::time::timeout(remaining, self.handlers[idx].handle(page, credentials))
                    .await
                {
                    Ok(advanced) => advanced,
                    Err(_) => return Err(self.timeout_error(started)),
                };
            self.record_attempt(observed, advanced, failures_here);

            if advanced {
                advanced_last = true;
                failures_here = 0;
                expected = self.handlers[idx].next_states();
            } else {
                advanced_last = false;
                failures_here += 1;
                let retryable = self.handlers[idx].retryable(credentials);
                if !retryable || failures_here > self.settings.max_state_retries {
                    warn!(
                        "login_machine: {} could not advance after {} attempt(s), giving up",
                        observed, failures_here
                    );
                    self.transition(LoginState::AuthBlocked)?;
                    return Ok(false);
                }
                info!(
                    "login_machine: {} did not advance, retry {}/{}",
                    observed, failures_here, self.settings.max_state_retries
                );
            }

            self.clock.sleep(self.settings.step_delay).await;
        }
    }

    /// Index of the first handler claiming the page, re-probing a few times
    /// so a slow page load is not mistaken for an unknown page.
    async fn recognize(
        &self,
        page: &dyn AuthPage,
        started: Instant,
    ) -> Result<usize, LoginError> {
        let mut pass = 0u32;
        loop {
            for (idx, handler) in self.handlers.iter().enumerate() {
                if handler.can_handle(page).await {
                    return Ok(idx);
                }
            }
            if pass >= self.settings.recognition_attempts {
                break;
            }
            pass += 1;
            self.check_deadline(started)?;
            self.clock.sleep(self.settings.recognition_interval).await;
        }
        let url = page.url().await.unwrap_or_default();
        Err(LoginError::UnrecognizedPage {
            url: redact_url(&url),
        })
    }

    /// Records `current → to` and enforces the transition ceiling.
    fn transition(&mut self, to: LoginState) -> Result<(), LoginError> {
        self.record(to);
        if self.transition_count > self.settings.max_transitions {
            return Err(LoginError::TooManyTransitions {
                max: self.settings.max_transitions,
            });
        }
        Ok(())
    }

    fn record(&mut self, to: LoginState) {
        let from = self.current;
        self.current = to;
        self.transition_count += 1;
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from,
            to,
            at: Utc::now(),
        });
        info!(
            "login_machine: {} → {} (transition {}/{})",
            from, to, self.transition_count, self.settings.max_transitions
        );
    }

    fn record_attempt(&mut self, state: LoginState, advanced: bool, retry: u32) {
        if self.attempts.len() == HISTORY_LIMIT {
            self.attempts.pop_front();
        }
        self.attempts.push_back(HandlerAttempt {
            state,
            advanced,
            retry,
            at: Utc::now(),
        });
    }

    fn remaining(&self, started: Instant) -> Duration {
        self.settings
            .timeout
            .saturating_sub(elapsed_since(self.clock.as_ref(), started))
    }

    fn check_deadline(&self, started: Instant) -> Result<(), LoginError> {
        if elapsed_since(self.clock.as_ref(), started) >= self.settings.timeout {
            return Err(self.timeout_error(started));
        }
        Ok(())
    }

    fn timeout_error(&self, started: Instant) -> LoginError {
        LoginError::Timeout {
            timeout_secs: self.settings.timeout.as_secs(),
            elapsed_secs: elapsed_since(self.clock.as_ref(), started).as_secs_f64(),
        }
    }
}
