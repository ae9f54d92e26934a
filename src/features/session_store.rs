//! Session snapshot persistence (`storage_state.json`).
//!
//! Capturing a browser context is only reliable once it is quiet: pending
//! `beforeunload` prompts or extra tabs can hang the capture or leave it half
//! written. [`SessionStore::save`] therefore quiesces the context first:
//!
//! 1. auto-accept every JavaScript dialog,
//! 2. neutralize `beforeunload` handlers on every open page,
//! 3. close every page except the primary one,
//! 4. settle, capture cookies + local storage,
//! 5. write the snapshot atomically.
//!
//! Steps 1 to 3 are best effort with short timeouts; a failing step is logged and
//! the save carries on. Only a failed capture or write makes `save` return
//! `false`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::browser::{AuthContext, AuthPage};
use crate::core::config::default_storage_state_path;
use crate::core::types::SessionSnapshot;

/// Overrides `beforeunload` on the current document so closing or navigating
/// the page cannot raise a "Leave site?" confirmation.
pub const UNLOAD_NEUTRALIZER_JS: &str = r#"(() => {
  try {
    window.onbeforeunload = null;
    const orig = window.addEventListener;
    window.addEventListener = function(type, listener, opts) {
      if (type === 'beforeunload') return;
      return orig.call(this, type, listener, opts);
    };
    window.addEventListener.__neutralized = true;
    return true;
  } catch (e) {
    return false;
  }
})()"#;

/// Default expiry window when every cookie is session-scoped.
const SESSION_COOKIE_TTL_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Copy)]
pub struct StepTimeouts {
    pub dialogs: Duration,
    pub neutralize: Duration,
    pub close: Duration,
    pub settle: Duration,
    pub capture: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            dialogs: Duration::from_secs(5),
            neutralize: Duration::from_secs(5),
            close: Duration::from_secs(5),
            settle: Duration::from_millis(500),
            capture: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    timeouts: StepTimeouts,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(default_storage_state_path())
    }
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeouts: StepTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: StepTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Quiesces `context` and persists its snapshot, keeping the first page open.
    pub async fn save(&self, context: &dyn AuthContext) -> bool {
        self.save_keeping(context, None).await
    }

    /// Like [`SessionStore::save`], keeping the page whose id is `primary`
    /// (the first page when `None` or not found).
    pub async fn save_keeping(&self, context: &dyn AuthContext, primary: Option<&str>) -> bool {
        let t = self.timeouts;

        match tokio::time::timeout(t.dialogs, context.auto_accept_dialogs()).await {
            Ok(Ok(n)) => debug!("session_store: dialog auto-accept on {} page(s)", n),
            Ok(Err(e)) => warn!("session_store: dialog handler setup failed: {}", e),
            Err(_) => warn!("session_store: dialog handler setup timed out"),
        }

        let pages = match context.pages().await {
            Ok(p) => p,
            Err(e) => {
                warn!("session_store: listing pages failed: {}", e);
                Vec::new()
            }
        };

        for page in &pages {
            match tokio::time::timeout(t.neutralize, page.evaluate(UNLOAD_NEUTRALIZER_JS)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("session_store: unload neutralizer failed on {}: {}", page.id(), e),
                Err(_) => warn!("session_store: unload neutralizer timed out on {}", page.id()),
            }
        }

        let keep = primary_index(&pages, primary);
        let mut closed = 0usize;
        for (idx, page) in pages.iter().enumerate() {
            if Some(idx) == keep {
                continue;
            }
            match tokio::time::timeout(t.close, page.close()).await {
                Ok(Ok(())) => closed += 1,
                Ok(Err(e)) => warn!("session_store: closing {} failed: {}", page.id(), e),
                Err(_) => warn!("session_store: closing {} timed out", page.id()),
            }
        }
        if closed > 0 {
            info!("session_store: closed {} extra page(s) before capture", closed);
        }

        tokio::time::sleep(t.settle).await;

        let captured = tokio::time::timeout(t.capture, context.storage_state()).await;
        context.release_dialog_handlers().await;

        let snapshot = match captured {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!("session_store: capture failed: {}", e);
                return false;
            }
            Err(_) => {
                warn!(
                    "session_store: capture timed out after {}s",
                    t.capture.as_secs()
                );
                return false;
            }
        };

        if snapshot.is_empty() {
            warn!("session_store: captured no cookies, keeping the previous snapshot");
            return false;
        }

        match self.write(&snapshot) {
            Ok(()) => {
                info!(
                    "session_store: 💾 saved {} cookies, {} origin(s) to {}",
                    snapshot.cookies.len(),
                    snapshot.origins.len(),
                    self.path.display()
                );
                true
            }
            Err(e) => {
                warn!("session_store: write failed: {:#}", e);
                false
            }
        }
    }

    /// Writes `snapshot` via a temp file + rename so readers never see a
    /// partial file.
    pub fn write(&self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }

    /// The stored snapshot, or `None` when the file is absent, not JSON, not
    /// an object, lacks a `cookies` array, or holds no cookies.
    pub fn load(&self) -> Option<SessionSnapshot> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                debug!("session_store: no snapshot at {}: {}", self.path.display(), e);
                return None;
            }
        };
        let snapshot = match parse_snapshot(&content) {
            Some(s) => s,
            None => {
                warn!(
                    "session_store: ignoring invalid snapshot at {}",
                    self.path.display()
                );
                return None;
            }
        };
        if snapshot.is_empty() {
            return None;
        }
        info!(
            "session_store: 🍪 loaded {} cookies from {}",
            snapshot.cookies.len(),
            self.path.display()
        );
        Some(snapshot)
    }

    /// Loads the snapshot into `context`. `false` when there is nothing to
    /// restore or applying it failed.
    pub async fn restore(&self, context: &dyn AuthContext) -> bool {
        let Some(snapshot) = self.load() else {
            return false;
        };
        match context.apply_snapshot(&snapshot).await {
            Ok(()) => true,
            Err(e) => {
                warn!("session_store: restore failed: {}", e);
                false
            }
        }
    }

    /// Deletes the snapshot file. `true` when a file was removed.
    pub fn clear(&self) -> bool {
        if !self.path.exists() {
            return false;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("session_store: 🗑️  removed {}", self.path.display());
                true
            }
            Err(e) => {
                warn!(
                    "session_store: failed to remove {}: {}",
                    self.path.display(),
                    e
                );
                false
            }
        }
    }

    /// Unix time (seconds) at which the stored session should be treated as stale.
    pub fn expiry(&self) -> Option<f64> {
        self.load()
            .and_then(|s| effective_session_expiry(&s, chrono::Utc::now().timestamp() as f64))
    }
}

fn primary_index(pages: &[Arc<dyn AuthPage>], primary: Option<&str>) -> Option<usize> {
    if pages.is_empty() {
        return None;
    }
    primary
        .and_then(|id| pages.iter().position(|p| p.id() == id))
        .or(Some(0))
}

fn parse_snapshot(content: &str) -> Option<SessionSnapshot> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    if !value.get("cookies").map(|c| c.is_array()).unwrap_or(false) {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Earliest persistent cookie expiry, or `now + 24h` when every cookie is
/// session-scoped. `None` for an empty jar.
pub fn effective_session_expiry(snapshot: &SessionSnapshot, now: f64) -> Option<f64> {
    if snapshot.is_empty() {
        return None;
    }
    Some(
        snapshot
            .min_cookie_expiry()
            .unwrap_or(now + SESSION_COOKIE_TTL_SECS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Cookie;

    fn cookie(name: &str, expires: f64) -> Cookie {
        Cookie {
            name: name.into(),
            value: "v".into(),
            domain: ".live.com".into(),
            path: "/".into(),
            expires,
            http_only: true,
            secure: true,
            same_site: None,
        }
    }

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().join("nested").join("storage_state.json"));
        (dir, store)
    }

    #[test]
    fn expiry_defaults_to_a_day_for_session_cookies() {
        let snap = SessionSnapshot {
            cookies: vec![cookie("MSPAuth", -1.0), cookie("MSPProf", -1.0)],
            origins: vec![],
        };
        assert_eq!(effective_session_expiry(&snap, 1_000.0), Some(87_400.0));
    }

    #[test]
    fn expiry_prefers_earliest_persistent_cookie() {
        let snap = SessionSnapshot {
            cookies: vec![
                cookie("a", -1.0),
                cookie("b", 1_900_000_000.0),
                cookie("c", 1_800_000_000.0),
            ],
            origins: vec![],
        };
        assert_eq!(effective_session_expiry(&snap, 0.0), Some(1_800_000_000.0));
        assert_eq!(effective_session_expiry(&SessionSnapshot::default(), 0.0), None);
    }

    #[test]
    fn write_creates_parent_and_leaves_no_temp_file() {
        let (_dir, store) = store();
        let snap = SessionSnapshot {
            cookies: vec![cookie("MSPAuth", -1.0)],
            origins: vec![],
        };
        store.write(&snap).expect("write");
        assert!(store.exists());
        assert!(!store.path().with_extension("json.tmp").exists());
        assert_eq!(store.load(), Some(snap));
    }

    #[test]
    fn load_rejects_invalid_shapes() {
        let (_dir, store) = store();
        assert!(store.load().is_none());

        std::fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        for body in ["{}", "[]", "not json", r#"{"cookies": 3}"#, r#"{"cookies": []}"#] {
            std::fs::write(store.path(), body).expect("write");
            assert!(store.load().is_none(), "accepted {body}");
        }
    }

    #[test]
    fn load_accepts_playwright_shape() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        std::fs::write(
            store.path(),
            r#"{"cookies":[{"name":"MSPAuth","value":"x","domain":".live.com","path":"/",
                 "expires":-1,"httpOnly":true,"secure":true,"sameSite":"None"}],
                "origins":[{"origin":"https://rewards.bing.com",
                 "localStorage":[{"name":"k","value":"v"}]}]}"#,
        )
        .expect("write");
        let snap = store.load().expect("snapshot");
        assert_eq!(snap.cookie_names(), vec!["MSPAuth"]);
        assert_eq!(snap.origins[0].local_storage[0].name, "k");
    }

    #[test]
    fn clear_removes_file_once() {
        let (_dir, store) = store();
        store
            .write(&SessionSnapshot {
                cookies: vec![cookie("_U", -1.0)],
                origins: vec![],
            })
            .expect("write");
        assert!(store.clear());
        assert!(!store.exists());
        assert!(!store.clear());
    }
}
