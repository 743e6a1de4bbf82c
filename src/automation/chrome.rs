//! Chrome-backed automation sessions over the DevTools protocol.
//!
//! The filter page renders each `<select>` through Choices.js. Options are
//! read from the dropdown items when present and from the native select
//! otherwise. After a selection the page is reloaded with the filters as
//! query parameters so the session always reflects `applied`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chromiumoxide::error::CdpError;
use chromiumoxide::handler::HandlerConfig;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::resource::{AutomationError, AutomationResource, ResourceFactory};
use crate::config::BrowserSettings;
use crate::models::{AppliedFilters, FilterField, FilterOption};
use crate::scrapers::{clean_options, filter_url};

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

const POLL_INTERVAL: Duration = Duration::from_millis(250);

static PROFILE_COUNTER: AtomicUsize = AtomicUsize::new(0);

const OPTIONS_SCRIPT: &str = r#"
(() => {
  const select = document.querySelector(`select[name="${NAME}"]`);
  if (!select) return null;
  let items = [];
  const wrapper = select.closest('.choices');
  if (wrapper) {
    items = Array.from(wrapper.querySelectorAll('.choices__list--dropdown .choices__item[data-value]'))
      .map(el => ({ value: el.getAttribute('data-value') || '', label: el.textContent || '' }));
  }
  if (items.length === 0) {
    items = Array.from(select.options).map(o => ({ value: o.value, label: o.textContent || '' }));
  }
  return JSON.stringify(items);
})()
"#;

const SELECT_SCRIPT: &str = r#"
(() => {
  const value = VALUE;
  const select = document.querySelector(`select[name="${NAME}"]`);
  if (!select) return 'no-select';
  const wrapper = select.closest('.choices');
  if (wrapper) {
    const inner = wrapper.querySelector('.choices__inner');
    if (inner) inner.click();
    const item = wrapper.querySelector(`.choices__list--dropdown .choices__item[data-value="${CSS.escape(value)}"]`);
    if (item) {
      item.scrollIntoView(true);
      item.click();
      return 'ok';
    }
  }
  const option = Array.from(select.options).find(o => o.value === value);
  if (!option) return 'no-option';
  select.value = value;
  select.dispatchEvent(new Event('change', { bubbles: true }));
  return 'ok';
})()
"#;

fn classify(context: &str, e: CdpError) -> AutomationError {
    let message = format!("{}: {}", context, e);
    match e {
        CdpError::Timeout => AutomationError::Timeout(message),
        CdpError::Ws(_) | CdpError::Io(_) | CdpError::NoResponse | CdpError::ChannelSendError(_) => {
            AutomationError::ConnectionLost(message)
        }
        _ => AutomationError::Other(message),
    }
}

fn find_chrome() -> Result<PathBuf, AutomationError> {
    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            debug!("Found Chrome at: {}", path);
            return Ok(p.to_path_buf());
        }
    }

    for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    debug!("Found Chrome in PATH: {}", path);
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }

    Err(AutomationError::Other(
        "Chrome/Chromium not found; install it or set BROWSER_URL to a remote DevTools endpoint"
            .to_string(),
    ))
}

/// One browser tab on the filter page.
pub struct ChromeSession {
    runtime: Handle,
    browser: Browser,
    page: Page,
    base_url: Url,
    timeout: Duration,
    remote: bool,
    profile_dir: Option<PathBuf>,
    handler: JoinHandle<()>,
}

impl ChromeSession {
    /// Launch (or connect to) a browser and open a blank tab.
    pub async fn open(
        settings: &BrowserSettings,
        base_url: Url,
        runtime: Handle,
    ) -> Result<Self, AutomationError> {
        let (browser, mut handler, profile_dir) = match settings.remote_url.as_deref() {
            Some(remote) => {
                let (browser, handler) = connect_remote(remote, settings.timeout()).await?;
                (browser, handler, None)
            }
            None => {
                let (browser, handler, dir) = launch(settings).await?;
                (browser, handler, Some(dir))
            }
        };

        let handler = runtime.spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| classify("Failed to open tab", e))?;

        Ok(Self {
            runtime,
            browser,
            page,
            base_url,
            timeout: settings.timeout(),
            remote: settings.remote_url.is_some(),
            profile_dir,
            handler,
        })
    }

    async fn navigate(&self, url: &Url) -> Result<(), AutomationError> {
        debug!("Opening {}", url);
        match tokio::time::timeout(self.timeout, self.page.goto(url.as_str())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(match classify("Navigation failed", e) {
                    AutomationError::Other(message) => AutomationError::ConnectionLost(message),
                    other => other,
                })
            }
            Err(_) => return Err(AutomationError::Timeout(format!("loading {}", url))),
        }
        self.wait_for_filters().await
    }

    /// Poll until the level select is present.
    async fn wait_for_filters(&self) -> Result<(), AutomationError> {
        let probe = format!(
            "!!document.querySelector('select[name=\"{}\"]')",
            FilterField::Level.param()
        );
        let wait = async {
            loop {
                let ready = self
                    .page
                    .evaluate(probe.clone())
                    .await
                    .ok()
                    .and_then(|r| r.into_value::<bool>().ok())
                    .unwrap_or(false);
                if ready {
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| AutomationError::Timeout("waiting for the filter form".to_string()))
    }

    async fn eval_string(&self, script: String) -> Result<Option<String>, AutomationError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| classify("Script failed", e))?;
        match result.value() {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(AutomationError::Other(format!(
                "Unexpected script result: {}",
                other
            ))),
        }
    }

    async fn read_options(&self, field: FilterField) -> Result<Vec<FilterOption>, AutomationError> {
        let script = OPTIONS_SCRIPT.replace("${NAME}", field.param());
        let raw = self
            .eval_string(script)
            .await?
            .ok_or_else(|| AutomationError::ElementNotFound(format!("select {}", field.param())))?;
        let options: Vec<FilterOption> = serde_json::from_str(&raw)
            .map_err(|e| AutomationError::Other(format!("Malformed option list: {}", e)))?;
        Ok(clean_options(options))
    }

    async fn apply(
        &self,
        field: FilterField,
        value: &str,
        applied: &AppliedFilters,
    ) -> Result<(), AutomationError> {
        let literal = serde_json::to_string(value)
            .map_err(|e| AutomationError::Other(e.to_string()))?;
        let script = SELECT_SCRIPT
            .replace("${NAME}", field.param())
            .replace("VALUE", &literal);

        match self.eval_string(script).await?.as_deref() {
            Some("ok") => {}
            Some("no-select") | None => {
                return Err(AutomationError::ElementNotFound(format!(
                    "select {}",
                    field.param()
                )))
            }
            Some(_) => {
                return Err(AutomationError::ElementNotFound(format!(
                    "{}={}",
                    field.param(),
                    value
                )))
            }
        }

        let next = applied.clone().with(field, value);
        self.navigate(&filter_url(&self.base_url, &next)).await
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.page.clone().close().await {
            debug!("Closing tab failed: {}", e);
        }
        if !self.remote {
            if let Err(e) = self.browser.close().await {
                warn!("Closing browser failed: {}", e);
            }
            let _ = self.browser.wait().await;
        }
    }
}

async fn launch(
    settings: &BrowserSettings,
) -> Result<(Browser, chromiumoxide::Handler, PathBuf), AutomationError> {
    let chrome = find_chrome()?;
    let profile_dir = std::env::temp_dir().join(format!(
        "admission-crawler-{}-{}",
        std::process::id(),
        PROFILE_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));

    info!("Launching browser (headless={})", settings.headless);

    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome)
        .user_data_dir(&profile_dir)
        .request_timeout(settings.timeout());
    if !settings.headless {
        builder = builder.with_head();
    }
    builder = builder
        .arg("--disable-dev-shm-usage")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--disable-gpu");
    for arg in &settings.chrome_args {
        builder = builder.arg(arg);
    }

    let config = builder
        .build()
        .map_err(|e| AutomationError::Other(format!("Failed to build browser config: {}", e)))?;
    let (browser, handler) = Browser::launch(config)
        .await
        .map_err(|e| classify("Failed to launch browser", e))?;

    Ok((browser, handler, profile_dir))
}

async fn connect_remote(
    url: &str,
    timeout: Duration,
) -> Result<(Browser, chromiumoxide::Handler), AutomationError> {
    info!("Connecting to remote browser at {}", url);

    let http_url = url.replace("ws://", "http://").replace("wss://", "https://");
    let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

    let lost = |e: reqwest::Error| AutomationError::ConnectionLost(format!("{}: {}", version_url, e));
    let version: serde_json::Value = reqwest::Client::new()
        .get(&version_url)
        .timeout(timeout)
        .send()
        .await
        .map_err(lost)?
        .json()
        .await
        .map_err(lost)?;

    let ws_url = version
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AutomationError::Other("No webSocketDebuggerUrl in response".to_string()))?;

    let handler_config = HandlerConfig {
        request_timeout: timeout,
        ..Default::default()
    };
    Browser::connect_with_config(ws_url, handler_config)
        .await
        .map_err(|e| classify("Failed to connect to remote browser", e))
}

impl AutomationResource for ChromeSession {
    fn load_base(&mut self) -> Result<(), AutomationError> {
        let url = self.base_url.clone();
        self.runtime.clone().block_on(self.navigate(&url))
    }

    fn options(&mut self, field: FilterField) -> Result<Vec<FilterOption>, AutomationError> {
        self.runtime.clone().block_on(self.read_options(field))
    }

    fn select(
        &mut self,
        field: FilterField,
        value: &str,
        applied: &AppliedFilters,
    ) -> Result<(), AutomationError> {
        self.runtime.clone().block_on(self.apply(field, value, applied))
    }

    fn page_html(&mut self) -> Result<String, AutomationError> {
        self.runtime
            .clone()
            .block_on(self.page.content())
            .map_err(|e| classify("Failed to read page", e))
    }

    fn close(&mut self) {
        let runtime = self.runtime.clone();
        runtime.block_on(self.shutdown());
        self.handler.abort();
        if let Some(dir) = self.profile_dir.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

/// Creates [`ChromeSession`]s for the pool.
pub struct ChromeSessionFactory {
    settings: BrowserSettings,
    base_url: Url,
    runtime: Handle,
}

impl ChromeSessionFactory {
    /// `runtime` drives the DevTools connection; sessions are used from
    /// executor threads that block on it.
    pub fn new(settings: BrowserSettings, base_url: Url, runtime: Handle) -> Self {
        Self {
            settings,
            base_url,
            runtime,
        }
    }
}

impl ResourceFactory for ChromeSessionFactory {
    fn create(&self) -> Result<Box<dyn AutomationResource>, AutomationError> {
        let session = self.runtime.block_on(ChromeSession::open(
            &self.settings,
            self.base_url.clone(),
            self.runtime.clone(),
        ))?;
        Ok(Box::new(session))
    }
}
