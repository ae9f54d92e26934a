//! Login-status detector: four independent signals, a weighted vote and a
//! TTL-bounded verdict cache.
//!
//! One detector is built per process and shared (`Arc`) by the state
//! machine, the manual-login watcher and the orchestrator. The cache is the
//! only state it owns; callers that know the page moved somewhere materially
//! different use [`LoginStatusDetector::force_recheck`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::signals::{default_signals, vote, LoginSignal, SignalVotes};
use crate::browser::AuthPage;
use crate::core::clock::{Clock, TokioClock};

#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    pub cache_ttl: Duration,
    /// Budget for each individual signal.
    pub signal_timeout: Duration,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            signal_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    status: bool,
    at: Instant,
    timestamp_ms: i64,
    reason: String,
    votes: SignalVotes,
}

/// Read-only view of the detection cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionInfo {
    pub cached_status: Option<bool>,
    pub cache_timestamp: Option<i64>,
    pub cache_reason: Option<String>,
    pub cache_valid: bool,
}

pub struct LoginStatusDetector {
    settings: DetectorSettings,
    clock: Arc<dyn Clock>,
    signals: Vec<Box<dyn LoginSignal>>,
    cache: Mutex<Option<CacheEntry>>,
}

impl std::fmt::Debug for LoginStatusDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginStatusDetector")
            .field("settings", &self.settings)
            .field(
                "signals",
                &self.signals.iter().map(|s| s.kind()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl LoginStatusDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self::with_parts(settings, Arc::new(TokioClock), default_signals())
    }

    pub fn with_parts(
        settings: DetectorSettings,
        clock: Arc<dyn Clock>,
        signals: Vec<Box<dyn LoginSignal>>,
    ) -> Self {
        Self {
            settings,
            clock,
            signals,
            cache: Mutex::new(None),
        }
    }

    fn cache(&self) -> MutexGuard<'_, Option<CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.clock.now().saturating_duration_since(entry.at) < self.settings.cache_ttl
    }

    /// Is `page`'s session authenticated? Within the TTL a cached verdict is
    /// returned without probing, unless `use_cache` is false.
    pub async fn detect(&self, page: &dyn AuthPage, use_cache: bool) -> bool {
        if use_cache {
            if let Some(entry) = self.cache().as_ref().filter(|e| self.is_fresh(e)) {
                debug!(
                    "login_detector: cached verdict logged_in={} ({})",
                    entry.status, entry.reason
                );
                return entry.status;
            }
        }

        let votes = self.gather(page).await;
        let outcome = vote(&votes);
        let reason = format!(
            "{} (in={} out={})",
            votes.describe(),
            outcome.logged_in_score,
            outcome.logged_out_score
        );
        info!(
            "login_detector: logged_in={} {}",
            outcome.logged_in, reason
        );

        *self.cache() = Some(CacheEntry {
            status: outcome.logged_in,
            at: self.clock.now(),
            timestamp_ms: self.clock.wall_millis(),
            reason,
            votes,
        });
        outcome.logged_in
    }

    /// Clears the cache, then detects.
    pub async fn force_recheck(&self, page: &dyn AuthPage) -> bool {
        self.clear();
        self.detect(page, false).await
    }

    pub fn clear(&self) {
        *self.cache() = None;
    }

    pub fn detection_info(&self) -> DetectionInfo {
        match self.cache().as_ref() {
            Some(entry) => DetectionInfo {
                cached_status: Some(entry.status),
                cache_timestamp: Some(entry.timestamp_ms),
                cache_reason: Some(entry.reason.clone()),
                cache_valid: self.is_fresh(entry),
            },
            None => DetectionInfo::default(),
        }
    }

    /// Per-signal votes behind the cached verdict.
    pub fn last_votes(&self) -> Option<SignalVotes> {
        self.cache().as_ref().map(|e| e.votes)
    }

    async fn gather(&self, page: &dyn AuthPage) -> SignalVotes {
        let timeout = self.settings.signal_timeout;
        let (mutating, read_only): (Vec<_>, Vec<_>) =
            self.signals.iter().partition(|s| s.mutates_page());

        let mut votes = SignalVotes::default();
        let results = join_all(
            read_only
                .iter()
                .map(|s| run_signal(s.as_ref(), page, timeout)),
        )
        .await;
        for (signal, result) in read_only.iter().zip(results) {
            votes.set(signal.kind(), result);
        }
        for signal in mutating {
            let result = run_signal(signal.as_ref(), page, timeout).await;
            votes.set(signal.kind(), result);
        }
        votes
    }
}

async fn run_signal(
    signal: &dyn LoginSignal,
    page: &dyn AuthPage,
    timeout: Duration,
) -> Option<bool> {
    match tokio::time::timeout(timeout, signal.probe(page)).await {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) => {
            warn!(
                "login_detector: {} signal failed, treating as unknown: {}",
                signal.kind().as_str(),
                e
            );
            None
        }
        Err(_) => {
            warn!(
                "login_detector: {} signal timed out after {:?}",
                signal.kind().as_str(),
                timeout
            );
            None
        }
    }
}
