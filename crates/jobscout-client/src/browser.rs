use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use jobscout_core::error::AppError;
use tokio::task::JoinHandle;

use crate::session::{SessionConfig, check_page};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Headless Chromium session driven over the Chrome DevTools Protocol.
///
/// Renders JavaScript before handing back the HTML, for boards whose result
/// lists are built client-side. Each session owns its own browser process;
/// every [`BrowserSession::load`] opens a tab, waits for the requested
/// element, grabs the rendered DOM, and closes the tab.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    timeout: Duration,
}

impl BrowserSession {
    /// Launch Chromium. Any failure here is a [`AppError::SetupError`].
    pub async fn launch(config: &SessionConfig) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .request_timeout(config.timeout);

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let browser_config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg(format!("--user-agent={}", config.user_agent))
            .build()
            .map_err(|e| AppError::SetupError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AppError::SetupError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            timeout: config.timeout,
        })
    }

    pub async fn load(&self, url: &str, wait_for: &str) -> Result<String, AppError> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to navigate to {url}: {e}")))?;

        let result = tokio::time::timeout(self.timeout, wait_for_element(&page, url, wait_for)).await;
        let _ = page.close().await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "Failed to close browser");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// Poll the rendered DOM until `wait_for` shows up or a throttling page is
/// detected. The caller bounds this with the navigation timeout.
async fn wait_for_element(page: &Page, url: &str, wait_for: &str) -> Result<String, AppError> {
    loop {
        let html = page
            .content()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read page content: {e}")))?;

        match check_page(&html, url, wait_for) {
            Ok(()) => return Ok(html),
            Err(AppError::ElementNotFound(_)) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) => return Err(e),
        }
    }
}

/// Locate a Chrome/Chromium binary, honouring `CHROME_BIN`.
///
/// Snap-packaged Chromium exposes a wrapper that rejects standard Chrome
/// flags, so the real binary inside the snap is preferred. `None` lets
/// `chromiumoxide` do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}
