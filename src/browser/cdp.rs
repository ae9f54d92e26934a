//! `chromiumoxide` implementation of the browser capabilities.
//!
//! Element lookups run as one injected script per call so visibility, text
//! matching and the action itself see the same DOM snapshot.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventResponseReceived, GetCookiesParams, GetResponseBodyParams, RequestId,
    SetCookiesParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventJavascriptDialogOpening,
    HandleJavaScriptDialogParams,
};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AuthContext, AuthPage, Locator, ObservedResponse, Presence};
use crate::core::types::{Cookie, OriginStorage, SessionSnapshot};

const DEFAULT_NAV_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_BODIES: usize = 6;

// ── Page ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CdpPage {
    page: Page,
    nav_timeout: Duration,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            nav_timeout: DEFAULT_NAV_TIMEOUT,
        }
    }

    pub fn with_nav_timeout(mut self, timeout: Duration) -> Self {
        self.nav_timeout = timeout;
        self
    }

    async fn eval_value(&self, script: &str) -> Result<serde_json::Value> {
        let result = self.page.evaluate(script).await?;
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn run_locator(
        &self,
        locator: Locator,
        action: &str,
        value: Option<&str>,
    ) -> Result<LocatorOutcome> {
        let script = locator_script(locator, action, value.unwrap_or(""));
        let raw = self.eval_value(&script).await?;
        Ok(serde_json::from_value(raw).unwrap_or_default())
    }

    async fn response_body(&self, request_id: RequestId) -> Option<String> {
        let resp = tokio::time::timeout(
            Duration::from_secs(3),
            self.page.execute(GetResponseBodyParams::new(request_id)),
        )
        .await
        .ok()?
        .ok()?;
        let body = resp.result.body.clone();
        if resp.result.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(body)
                .ok()
                .and_then(|b| String::from_utf8(b).ok())
        } else {
            Some(body)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LocatorOutcome {
    #[serde(default)]
    present: bool,
    #[serde(default)]
    visible: bool,
    #[serde(default)]
    acted: bool,
}

fn locator_parts(locator: Locator) -> (&'static str, &'static str) {
    match locator {
        Locator::Css(s) => ("css", s),
        Locator::Text(s) => ("text", s),
        Locator::Heading(s) => ("heading", s),
        Locator::Button(s) => ("button", s),
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn locator_script(locator: Locator, action: &str, value: &str) -> String {
    let (kind, needle) = locator_parts(locator);
    format!(
        r#"(() => {{
  const kind = {kind}, needle = {needle}, action = {action}, value = {value};
  const norm = (t) => (t || '').replace(/\s+/g, ' ').trim();
  const shown = (el) => {{
    if (!el) return false;
    const s = window.getComputedStyle(el);
    if (s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  }};
  if (kind === 'text') {{
    const body = document.body ? (document.body.innerText || '') : '';
    const found = body.toLowerCase().includes(needle.toLowerCase());
    return {{ present: found, visible: found, acted: false }};
  }}
  let matches = [];
  if (kind === 'css') {{
    try {{ matches = Array.from(document.querySelectorAll(needle)); }} catch (e) {{ matches = []; }}
  }} else if (kind === 'heading') {{
    matches = Array.from(document.querySelectorAll('h1,h2,h3,[role="heading"]'))
      .filter((el) => norm(el.textContent) === needle);
  }} else {{
    const want = needle.toLowerCase();
    matches = Array.from(document.querySelectorAll('button,[role="button"],input[type="submit"],input[type="button"],a'))
      .filter((el) => norm(el.innerText || el.value).toLowerCase() === want);
  }}
  const target = matches.find(shown);
  const out = {{ present: matches.length > 0, visible: !!target, acted: false }};
  if (!target || action === 'probe') return out;
  target.scrollIntoView({{ block: 'center' }});
  if (action === 'click') {{
    target.click();
    out.acted = true;
  }} else if (action === 'focus') {{
    target.focus();
    const proto = Object.getPrototypeOf(target);
    const desc = Object.getOwnPropertyDescriptor(proto, 'value');
    if (desc && desc.set) {{ desc.set.call(target, ''); }} else {{ target.value = ''; }}
    target.dispatchEvent(new Event('input', {{ bubbles: true }}));
    out.acted = document.activeElement === target;
  }}
  return out;
}})()"#,
        kind = js_string(kind),
        needle = js_string(needle),
        action = js_string(action),
        value = js_string(value),
    )
}

const BODY_TEXT_JS: &str = "document.body ? (document.body.innerText || '') : ''";

#[async_trait]
impl AuthPage for CdpPage {
    fn id(&self) -> String {
        let id: &str = self.page.target_id().as_ref();
        id.to_string()
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn body_text(&self) -> Result<String> {
        Ok(self
            .eval_value(BODY_TEXT_JS)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn probe(&self, locator: Locator) -> Result<Presence> {
        let out = self.run_locator(locator, "probe", None).await?;
        Ok(Presence {
            present: out.present,
            visible: out.visible,
        })
    }

    async fn click(&self, locator: Locator) -> Result<bool> {
        Ok(self.run_locator(locator, "click", None).await?.acted)
    }

    async fn fill(&self, locator: Locator, value: &str) -> Result<bool> {
        if !matches!(locator, Locator::Css(_)) {
            return Err(anyhow!("fill needs a CSS locator, got {:?}", locator));
        }
        if !self.run_locator(locator, "focus", None).await?.acted {
            return Ok(false);
        }
        self.page.execute(InsertTextParams::new(value)).await?;
        Ok(true)
    }

    async fn goto(&self, url: &str) -> Result<()> {
        tokio::time::timeout(self.nav_timeout, self.page.goto(url))
            .await
            .map_err(|_| anyhow!("navigation to {} timed out", url))?
            .map_err(|e| anyhow!("navigation to {} failed: {}", url, e))?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        tokio::time::timeout(self.nav_timeout, self.page.reload())
            .await
            .map_err(|_| anyhow!("reload timed out"))?
            .map_err(|e| anyhow!("reload failed: {}", e))?;
        Ok(())
    }

    async fn wait_for_load(&self, timeout: Duration) -> Result<()> {
        wait_until_stable(&self.page, 500, timeout).await;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.eval_value(script).await
    }

    async fn cookies(&self, urls: &[String]) -> Result<Vec<Cookie>> {
        let mut params = GetCookiesParams::default();
        if !urls.is_empty() {
            params.urls = Some(urls.to_vec());
        }
        let resp = self.page.execute(params).await?;
        Ok(resp
            .result
            .cookies
            .iter()
            .filter_map(|c| serde_json::to_value(c).ok())
            .filter_map(|v| serde_json::from_value::<Cookie>(v).ok())
            .collect())
    }

    async fn reload_observing(&self, window: Duration) -> Result<Vec<ObservedResponse>> {
        // Dropping `events` on any return path unsubscribes the listener.
        let mut events = self.page.event_listener::<EventResponseReceived>().await?;
        let deadline = tokio::time::Instant::now() + window;
        let reload = self.page.reload();
        tokio::pin!(reload);
        let mut reloaded = false;
        let mut seen: Vec<(RequestId, ObservedResponse)> = Vec::new();

        loop {
            tokio::select! {
                res = &mut reload, if !reloaded => {
                    reloaded = true;
                    if let Err(e) = res {
                        debug!("reload_observing: reload error: {}", e);
                    }
                }
                ev = events.next() => match ev {
                    Some(ev) => seen.push((ev.request_id.clone(), observed_from_event(&ev))),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        drop(events);

        let mut out = Vec::with_capacity(seen.len());
        let mut bodies = 0usize;
        for (request_id, mut resp) in seen {
            let is_json = resp
                .content_type
                .as_deref()
                .map(|t| t.contains("json"))
                .unwrap_or(false);
            if is_json && resp.status == 200 && bodies < MAX_RESPONSE_BODIES {
                resp.body = self.response_body(request_id).await;
                bodies += 1;
            }
            out.push(resp);
        }
        Ok(out)
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await?;
        Ok(())
    }
}

fn observed_from_event(ev: &EventResponseReceived) -> ObservedResponse {
    let headers = serde_json::to_value(&ev.response.headers).unwrap_or_default();
    let header = |name: &str| -> Option<String> {
        headers.as_object().and_then(|map| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .and_then(|(_, v)| v.as_str().map(str::to_string))
        })
    };
    ObservedResponse {
        url: ev.response.url.clone(),
        status: u16::try_from(ev.response.status).unwrap_or(0),
        set_cookie: header("set-cookie"),
        content_type: Some(ev.response.mime_type.clone()).filter(|m| !m.is_empty()),
        body: None,
    }
}

/// Wait until the document is complete and no new resource entries appear
/// for `quiet_ms`, or until `timeout` has elapsed.
pub async fn wait_until_stable(page: &Page, quiet_ms: u64, timeout: Duration) {
    let poll = Duration::from_millis(250);
    let quiet = Duration::from_millis(quiet_ms);
    let start = tokio::time::Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = tokio::time::Instant::now();

    loop {
        if start.elapsed() >= timeout {
            debug!("wait_until_stable: timeout after {}ms", timeout.as_millis());
            break;
        }

        let count: u64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_u64())
            .unwrap_or(0);

        let ready_complete: bool = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_str().map(|s| s == "complete"))
            .unwrap_or(false);

        if !ready_complete || count != last_count {
            last_count = count;
            stable_since = tokio::time::Instant::now();
        } else if stable_since.elapsed() >= quiet {
            break;
        }

        tokio::time::sleep(poll).await;
    }
}

// ── Context ─────────────────────────────────────────────────────────────────

const LOCAL_STORAGE_JS: &str = r#"(() => {
  try {
    const entries = [];
    for (let i = 0; i < window.localStorage.length; i++) {
      const name = window.localStorage.key(i);
      entries.push({ name, value: window.localStorage.getItem(name) || '' });
    }
    return { origin: window.location.origin, localStorage: entries };
  } catch (e) {
    return { origin: window.location.origin, localStorage: [] };
  }
})()"#;

/// A launched Chromium instance and the pages it owns.
pub struct CdpContext {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
    dialog_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    nav_timeout: Duration,
}

impl CdpContext {
    /// Wraps a launched browser. `handler_task` drives its CDP event loop.
    pub fn new(browser: Browser, handler_task: JoinHandle<()>) -> Self {
        Self {
            browser: Mutex::new(browser),
            handler_task,
            dialog_tasks: std::sync::Mutex::new(Vec::new()),
            nav_timeout: DEFAULT_NAV_TIMEOUT,
        }
    }

    /// Opens a new tab on `url`.
    pub async fn new_page(&self, url: &str) -> Result<Arc<CdpPage>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page(url)
            .await
            .map_err(|e| anyhow!("failed to open tab: {}", e))?;
        Ok(Arc::new(
            CdpPage::new(page).with_nav_timeout(self.nav_timeout),
        ))
    }

    /// Closes the browser and stops its event loop.
    pub async fn shutdown(&self) {
        self.release_dialog_handlers().await;
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("browser: close failed: {}", e);
        }
        let _ = browser.wait().await;
        self.handler_task.abort();
        info!("🛑 browser shut down");
    }

    async fn raw_pages(&self) -> Result<Vec<Page>> {
        Ok(self.browser.lock().await.pages().await?)
    }
}

impl Drop for CdpContext {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.dialog_tasks.lock() {
            for t in tasks.drain(..) {
                t.abort();
            }
        }
        self.handler_task.abort();
    }
}

fn cookie_param(cookie: &Cookie) -> Option<CookieParam> {
    let mut value = serde_json::to_value(cookie).ok()?;
    if cookie.is_session_scoped() {
        if let Some(map) = value.as_object_mut() {
            map.remove("expires");
        }
    }
    serde_json::from_value::<CookieParam>(value).ok()
}

fn local_storage_seed_script(storage: &OriginStorage) -> String {
    let entries = serde_json::to_string(&storage.local_storage).unwrap_or_else(|_| "[]".into());
    format!(
        r#"(() => {{
  if (window.location.origin !== {origin}) return;
  try {{
    for (const e of {entries}) {{ window.localStorage.setItem(e.name, e.value); }}
  }} catch (e) {{}}
}})()"#,
        origin = js_string(&storage.origin),
        entries = entries,
    )
}

#[async_trait]
impl AuthContext for CdpContext {
    async fn pages(&self) -> Result<Vec<Arc<dyn AuthPage>>> {
        Ok(self
            .raw_pages()
            .await?
            .into_iter()
            .map(|p| Arc::new(CdpPage::new(p).with_nav_timeout(self.nav_timeout)) as Arc<dyn AuthPage>)
            .collect())
    }

    async fn auto_accept_dialogs(&self) -> Result<usize> {
        let pages = self.raw_pages().await?;
        let mut hooked = Vec::with_capacity(pages.len());
        for page in pages {
            let mut events = match page.event_listener::<EventJavascriptDialogOpening>().await {
                Ok(ev) => ev,
                Err(e) => {
                    warn!("browser: dialog listener failed: {}", e);
                    continue;
                }
            };
            let task = tokio::spawn(async move {
                while let Some(ev) = events.next().await {
                    debug!("browser: auto-accepting {:?} dialog", ev.r#type);
                    if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(true)).await {
                        warn!("browser: dialog accept failed: {}", e);
                    }
                }
            });
            hooked.push(task);
        }
        let count = hooked.len();
        if let Ok(mut tasks) = self.dialog_tasks.lock() {
            tasks.extend(hooked);
        }
        Ok(count)
    }

    async fn release_dialog_handlers(&self) {
        if let Ok(mut tasks) = self.dialog_tasks.lock() {
            for t in tasks.drain(..) {
                t.abort();
            }
        }
    }

    async fn storage_state(&self) -> Result<SessionSnapshot> {
        let cookies = self
            .browser
            .lock()
            .await
            .get_cookies()
            .await?
            .iter()
            .filter_map(|c| serde_json::to_value(c).ok())
            .filter_map(|v| serde_json::from_value::<Cookie>(v).ok())
            .collect();

        let mut origins = Vec::new();
        let mut seen = HashSet::new();
        for page in self.raw_pages().await? {
            let raw = match page.evaluate(LOCAL_STORAGE_JS).await {
                Ok(r) => r.into_value::<serde_json::Value>().unwrap_or_default(),
                Err(e) => {
                    debug!("browser: localStorage read failed: {}", e);
                    continue;
                }
            };
            let Ok(storage) = serde_json::from_value::<OriginStorage>(raw) else {
                continue;
            };
            if !storage.origin.starts_with("http") || !seen.insert(storage.origin.clone()) {
                continue;
            }
            origins.push(storage);
        }

        Ok(SessionSnapshot { cookies, origins })
    }

    async fn apply_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let mut pages = self.raw_pages().await?;
        if pages.is_empty() {
            let page = self.browser.lock().await.new_page("about:blank").await?;
            pages.push(page);
        }

        let params: Vec<CookieParam> = snapshot.cookies.iter().filter_map(cookie_param).collect();
        if !params.is_empty() {
            let count = params.len();
            pages[0]
                .execute(SetCookiesParams::new(params))
                .await
                .map_err(|e| anyhow!("Network.setCookies failed: {}", e))?;
            info!("browser: 💉 restored {} cookies", count);
        }

        for storage in snapshot.origins.iter().filter(|o| !o.local_storage.is_empty()) {
            let script = local_storage_seed_script(storage);
            for page in &pages {
                if let Err(e) = page
                    .execute(AddScriptToEvaluateOnNewDocumentParams::new(script.clone()))
                    .await
                {
                    warn!("browser: localStorage seed for {} failed: {}", storage.origin, e);
                }
            }
        }
        Ok(())
    }
}
