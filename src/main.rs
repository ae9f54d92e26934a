use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use rewards_autopilot::browser::browser_manager::{self, LaunchOptions};
use rewards_autopilot::browser::{AuthPage, CdpContext, CdpPage};
use rewards_autopilot::features::session_store::effective_session_expiry;
use rewards_autopilot::{load_config, AppConfig, AuthManager, SessionStore};

const USAGE: &str = "\
usage:
  rewards-autopilot login   [--manual] [--timeout SECS] [--headless]
  rewards-autopilot status  [--headless]
  rewards-autopilot session [--clear]";

const EXIT_FAILED: u8 = 1;
const EXIT_NO_BROWSER: u8 = 2;

#[derive(Debug, Default)]
struct Flags {
    manual: bool,
    headless: bool,
    clear: bool,
    timeout: Option<u64>,
}

fn parse_flags(args: &[String]) -> Result<Flags, String> {
    let mut flags = Flags::default();
    let mut it = args.iter();
    while let Some(a) = it.next() {
        match a.as_str() {
            "--manual" => flags.manual = true,
            "--headless" => flags.headless = true,
            "--clear" => flags.clear = true,
            "--timeout" => {
                let v = it.next().ok_or("--timeout needs a value")?;
                flags.timeout = Some(parse_secs(v)?);
            }
            other => {
                if let Some(v) = other.strip_prefix("--timeout=") {
                    flags.timeout = Some(parse_secs(v)?);
                } else {
                    return Err(format!("unknown argument: {}", other));
                }
            }
        }
    }
    Ok(flags)
}

fn parse_secs(v: &str) -> Result<u64, String> {
    v.trim()
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("invalid --timeout value: {}", v))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{}", USAGE);
        return Ok(ExitCode::from(EXIT_FAILED));
    };
    let flags = match parse_flags(rest) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            return Ok(ExitCode::from(EXIT_FAILED));
        }
    };

    let mut config = load_config();
    if flags.headless {
        config.browser.headless = Some(true);
    }

    match command.as_str() {
        "login" => login(config, &flags).await,
        "status" => status(config).await,
        "session" => Ok(session(&config, &flags)),
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(ExitCode::SUCCESS)
        }
        other => {
            eprintln!("unknown command: {}\n{}", other, USAGE);
            Ok(ExitCode::from(EXIT_FAILED))
        }
    }
}

async fn open_browser(config: &AppConfig) -> Option<(Arc<CdpContext>, Arc<CdpPage>)> {
    let Some(opts) = LaunchOptions::from_config(&config.browser) else {
        error!("no Chromium-family browser found (set CHROME_EXECUTABLE)");
        return None;
    };
    match browser_manager::launch(&opts).await {
        Ok(pair) => Some(pair),
        Err(e) => {
            error!("browser launch failed: {:#}", e);
            None
        }
    }
}

async fn login(mut config: AppConfig, flags: &Flags) -> anyhow::Result<ExitCode> {
    if let Some(secs) = flags.timeout {
        config.login.manual_timeout_seconds = Some(secs);
    }
    if flags.manual {
        config.login.auto_login = Some(false);
    }
    let credentials = config.account.resolve_credentials();
    if credentials.is_none() && !flags.manual {
        info!("no credentials configured, waiting for a manual sign-in");
    }

    let Some((context, page)) = open_browser(&config).await else {
        return Ok(ExitCode::from(EXIT_NO_BROWSER));
    };
    let manager = AuthManager::from_config(&config);

    let ok = if flags.manual {
        manager.refresh_session(page.as_ref(), context.as_ref()).await
    } else {
        manager
            .ensure_logged_in(page.as_ref(), context.as_ref(), credentials.as_ref())
            .await
    };
    context.shutdown().await;

    if ok {
        println!("signed in; session saved to {}", manager.storage_path().display());
        return Ok(ExitCode::SUCCESS);
    }
    warn!("sign-in failed");
    if let Some(diag) = manager.last_diagnostic() {
        println!("{}", serde_json::to_string_pretty(&diag)?);
    }
    Ok(ExitCode::from(EXIT_FAILED))
}

async fn status(config: AppConfig) -> anyhow::Result<ExitCode> {
    let Some((context, page)) = open_browser(&config).await else {
        return Ok(ExitCode::from(EXIT_NO_BROWSER));
    };
    let manager = AuthManager::from_config(&config);
    let restored = manager.store().restore(context.as_ref()).await;
    let logged_in = manager.is_logged_in(page.as_ref(), true).await;
    let url = page.url().await.unwrap_or_default();
    context.shutdown().await;

    let report = serde_json::json!({
        "logged_in": logged_in,
        "session_restored": restored,
        "url": rewards_autopilot::login::redact_url(&url),
        "detection": manager.detector().detection_info(),
        "votes": manager.detector().last_votes(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if logged_in {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    })
}

fn session(config: &AppConfig, flags: &Flags) -> ExitCode {
    let store = SessionStore::new(config.account.resolve_storage_state_path());
    if flags.clear {
        let removed = store.clear();
        println!(
            "{} {}",
            if removed { "removed" } else { "nothing to remove at" },
            store.path().display()
        );
        return ExitCode::SUCCESS;
    }

    let snapshot = store.load();
    let now = chrono::Utc::now().timestamp() as f64;
    let expiry = snapshot
        .as_ref()
        .and_then(|s| effective_session_expiry(s, now))
        .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
        .map(|t| t.to_rfc3339());
    let report = serde_json::json!({
        "path": store.path().display().to_string(),
        "exists": store.exists(),
        "cookies": snapshot.as_ref().map(|s| s.cookies.len()).unwrap_or(0),
        "origins": snapshot.as_ref().map(|s| s.origins.len()).unwrap_or(0),
        "expires": expiry,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(s) => {
            println!("{}", s);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}
