//! Chromium launch for the login subsystem.
//!
//! Finds a Chromium-family executable, builds a headed or headless
//! `BrowserConfig` and returns a [`CdpContext`] with one open tab.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Browser;
use futures::StreamExt;
use rand::seq::IndexedRandom;
use tracing::{info, warn};

use super::cdp::{CdpContext, CdpPage};
use crate::core::config::BrowserLaunchConfig;

// ── User-Agent pool ──────────────────────────────────────────────────────────

const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
];

/// Returns a randomly-chosen Chromium desktop User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

// ── Browser executable discovery ─────────────────────────────────────────────

const PATH_CANDIDATES: &[&str] = &[
    "microsoft-edge",
    "microsoft-edge-stable",
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "brave-browser",
];

#[cfg(target_os = "macos")]
const INSTALL_PATHS: &[&str] = &[
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
];

#[cfg(target_os = "windows")]
const INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const INSTALL_PATHS: &[&str] = &[
    "/usr/bin/microsoft-edge",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. explicit override (config `browser.executable` or `CHROME_EXECUTABLE`)
/// 2. `which` lookup over `PATH`
/// 3. OS-specific well-known install paths
pub fn find_chrome_executable(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = explicit.filter(|p| Path::new(p).exists()) {
        return Some(PathBuf::from(p));
    }

    for exe in PATH_CANDIDATES {
        if let Ok(path) = which::which(exe) {
            return Some(path);
        }
    }

    INSTALL_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

// ── Config builder ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: PathBuf,
    pub headless: bool,
    pub user_data_dir: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
}

impl LaunchOptions {
    /// Resolves launch options from config. `None` when no browser is installed.
    pub fn from_config(cfg: &BrowserLaunchConfig) -> Option<Self> {
        let executable = find_chrome_executable(cfg.resolve_executable().as_deref())?;
        Some(Self {
            executable,
            headless: cfg.resolve_headless(),
            user_data_dir: cfg.resolve_user_data_dir(),
            width: 1280,
            height: 900,
        })
    }
}

/// Build a `BrowserConfig`.
///
/// Manual login needs a visible window, so headed mode is the default;
/// `--disable-blink-features=AutomationControlled` hides `navigator.webdriver`.
pub fn build_browser_config(opts: &LaunchOptions) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(&opts.executable)
        .viewport(Viewport {
            width: opts.width,
            height: opts.height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(opts.width, opts.height)
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-crash-reporter")
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", random_user_agent()));

    if !opts.headless {
        builder = builder.with_head();
    }
    if let Some(dir) = &opts.user_data_dir {
        builder = builder.user_data_dir(dir);
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

/// Launch the browser and open one tab on `about:blank`.
pub async fn launch(opts: &LaunchOptions) -> Result<(Arc<CdpContext>, Arc<CdpPage>)> {
    let config = build_browser_config(opts)?;
    info!(
        "🚀 browser: launching {} (headless={})",
        opts.executable.display(),
        opts.headless
    );
    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| anyhow!("failed to launch ({}): {}", opts.executable.display(), e))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("browser: CDP handler error: {}", e);
            }
        }
    });

    let context = Arc::new(CdpContext::new(browser, handler_task));
    let page = context.new_page("about:blank").await?;
    Ok((context, page))
}
