//! Browser capability used by the pipeline.
//!
//! The pipeline only needs three things from a browser: navigate, evaluate
//! an expression in the page, and fetch a URL from the page's origin. [`PageContext`] is that seam; [`ChromeSession`] is the
//! real implementation on top of `headless_chrome`.
//!
//! Stealth is configured before the first navigation:
//!   - launch flags (`--headless=new`, `--disable-blink-features=AutomationControlled`)
//!   - `Tab::enable_stealth_mode` (evasions injected on every new document)
//!   - a desktop Chrome user agent

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::HarvestError;
use crate::settings::Settings;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const PLATFORM: &str = "Win32";
/// Extra time the async side waits past a tab call's own timeout.
const CALL_GRACE: Duration = Duration::from_secs(5);
/// Extra time a tab fetch gets past the in-page abort.
const FETCH_GRACE: Duration = Duration::from_secs(5);

/// A live page the pipeline can drive.
///
/// Expressions passed to `evaluate` should produce primitives (strings,
/// numbers); objects are not marshalled back by value.
#[async_trait]
pub trait PageContext: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), HarvestError>;

    async fn evaluate(&self, expression: &str) -> Result<Value, HarvestError>;

    /// `fetch(url)` run inside the page, returning the response body.
    async fn fetch_text(&self, url: &str) -> Result<String, HarvestError>;
}

/// A page that owns a browser and must be released once the run is over.
pub trait Session: PageContext {
    fn close(self);
}

/// In-page fetch expression for `url`. Non-2xx responses reject.
///
/// Credentials stay at the `same-origin` default: bundles are served from
/// a CDN with `Access-Control-Allow-Origin: *`, which rejects credentialed
/// requests.
pub fn fetch_expression(url: &str, timeout: Duration) -> String {
    // serde_json quoting gives a valid JS string literal
    let quoted = serde_json::to_string(url).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(async () => {{
    const res = await fetch({quoted}, {{ signal: AbortSignal.timeout({ms}) }});
    if (!res.ok) throw new Error("HTTP " + res.status);
    return await res.text();
}})()"#,
        ms = timeout.as_millis()
    )
}

fn stealth_args(headless: bool) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        "--window-size=1920,1080".to_string(),
        "--disable-extensions".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--lang=en-US,en".to_string(),
        "--log-level=3".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ];
    if headless {
        // headless_chrome's own headless flag selects the old headless mode
        args.insert(0, "--headless=new".to_string());
    }
    args
}

/// A launched Chrome process with one stealth-configured tab.
///
/// Owns the browser process: dropping the session (or calling
/// [`Session::close`]) kills it. Tab calls run one at a time.
pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
    gate: Arc<Mutex<()>>,
    nav_timeout: Duration,
    fetch_timeout: Duration,
}

impl ChromeSession {
    pub async fn launch(settings: &Settings) -> Result<Self, HarvestError> {
        let headless = settings.headless;
        let nav_timeout = settings.nav_timeout();
        let fetch_timeout = settings.fetch_timeout();
        let idle = nav_timeout.max(fetch_timeout).max(settings.ready_timeout()) + Duration::from_secs(60);

        tokio::task::spawn_blocking(move || {
            Self::launch_blocking(headless, nav_timeout, fetch_timeout, idle)
        })
        .await
        .map_err(|e| HarvestError::Launch(e.to_string()))?
    }

    fn launch_blocking(
        headless: bool,
        nav_timeout: Duration,
        fetch_timeout: Duration,
        idle: Duration,
    ) -> Result<Self, HarvestError> {
        let args = stealth_args(headless);
        let arg_refs: Vec<&OsStr> = args.iter().map(OsStr::new).collect();

        let options = LaunchOptions::default_builder()
            .headless(false)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(idle)
            .args(arg_refs)
            .build()
            .map_err(|e| HarvestError::Launch(format!("launch options: {e}")))?;

        info!(headless, "Launching Chrome");
        let browser = Browser::new(options)
            .map_err(|e| HarvestError::Launch(format!("{e:#} (is Chrome installed?)")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| HarvestError::Launch(format!("tab: {e:#}")))?;

        tab.enable_stealth_mode()
            .map_err(|e| HarvestError::Launch(format!("stealth: {e:#}")))?;
        tab.set_user_agent(USER_AGENT, Some(ACCEPT_LANGUAGE), Some(PLATFORM))
            .map_err(|e| HarvestError::Launch(format!("user agent: {e:#}")))?;

        Ok(Self {
            _browser: browser,
            tab,
            gate: Arc::new(Mutex::new(())),
            nav_timeout,
            fetch_timeout,
        })
    }

    /// Run a blocking tab call with the tab's own timeout set to `limit`.
    async fn with_tab<T, F>(&self, what: String, limit: Duration, f: F) -> Result<T, HarvestError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, HarvestError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        run_serialized(&self.gate, what, limit + CALL_GRACE, move || {
            tab.set_default_timeout(limit);
            f(tab)
        })
        .await
    }
}

impl Session for ChromeSession {
    fn close(self) {
        drop(self);
        info!("Browser session closed");
    }
}

/// Run `f` on the blocking pool while holding `gate`, bounded by `limit`.
///
/// The gate moves into the blocking task, so a call abandoned on timeout
/// keeps it until `f` actually returns and the next call cannot overlap.
async fn run_serialized<T, F>(
    gate: &Arc<Mutex<()>>,
    what: String,
    limit: Duration,
    f: F,
) -> Result<T, HarvestError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, HarvestError> + Send + 'static,
{
    let call = async {
        let permit = Arc::clone(gate).lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
    };
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(HarvestError::Evaluate(format!("{what}: {join}"))),
        Err(_) => Err(HarvestError::Timeout { what, after: limit }),
    }
}

#[async_trait]
impl PageContext for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), HarvestError> {
        let target = url.to_string();
        let result = self
            .with_tab(format!("navigation to {url}"), self.nav_timeout, move |tab| {
                tab.navigate_to(&target)
                    .and_then(|tab| tab.wait_until_navigated())
                    .map(|_| ())
                    .map_err(|e| HarvestError::Evaluate(format!("{e:#}")))
            })
            .await;

        // Anything going wrong here is a failed navigation, timeouts included.
        result.map_err(|e| HarvestError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        debug!("Navigated to {}", url);
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, HarvestError> {
        let expression = expression.to_string();
        self.with_tab("evaluation".to_string(), self.fetch_timeout, move |tab| {
            tab.evaluate(&expression, true)
                .map(|remote| remote.value.unwrap_or(Value::Null))
                .map_err(|e| HarvestError::Evaluate(format!("{e:#}")))
        })
        .await
    }

    async fn fetch_text(&self, url: &str) -> Result<String, HarvestError> {
        let expression = fetch_expression(url, self.fetch_timeout);
        let target = url.to_string();
        // the in-page abort fires first
        let limit = self.fetch_timeout + FETCH_GRACE;
        self.with_tab(format!("fetch {url}"), limit, move |tab| {
            let remote = tab.evaluate(&expression, true).map_err(|e| HarvestError::Fetch {
                url: target.clone(),
                reason: format!("{e:#}"),
            })?;
            match remote.value {
                Some(Value::String(body)) => Ok(body),
                other => Err(HarvestError::Fetch {
                    url: target,
                    reason: format!("non-text result: {other:?}"),
                }),
            }
        })
        .await
    }
}
