use std::time::Duration;

use jobscout_core::error::AppError;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};

#[cfg(feature = "browser")]
use crate::browser::BrowserSession;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// How sessions are opened.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-page load timeout.
    pub timeout: Duration,
    pub user_agent: String,
    /// Render pages in headless Chromium instead of plain HTTP.
    pub browser: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            browser: false,
        }
    }
}

impl SessionConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_browser(mut self, browser: bool) -> Self {
        self.browser = browser;
        self
    }
}

/// One adapter's connection to the outside world.
pub enum PageSession {
    Http(HttpSession),
    #[cfg(feature = "browser")]
    Browser(BrowserSession),
}

impl PageSession {
    /// Open a session of the kind `config` asks for.
    ///
    /// Asking for a browser session in a build without the `browser`
    /// feature is a [`AppError::SetupError`].
    pub async fn open(config: &SessionConfig) -> Result<Self, AppError> {
        if config.browser {
            #[cfg(feature = "browser")]
            {
                return Ok(PageSession::Browser(BrowserSession::launch(config).await?));
            }
            #[cfg(not(feature = "browser"))]
            {
                return Err(AppError::SetupError(
                    "browser sessions require building with the `browser` feature".to_string(),
                ));
            }
        }
        Ok(PageSession::Http(HttpSession::new(config)?))
    }

    /// Load `url` and return its HTML once an element matching `wait_for`
    /// is present.
    pub async fn load(&self, url: &str, wait_for: &str) -> Result<String, AppError> {
        match self {
            PageSession::Http(session) => session.load(url, wait_for).await,
            #[cfg(feature = "browser")]
            PageSession::Browser(session) => session.load(url, wait_for).await,
        }
    }

    pub async fn close(self) {
        match self {
            PageSession::Http(_) => {}
            #[cfg(feature = "browser")]
            PageSession::Browser(session) => session.close().await,
        }
    }
}

/// Plain HTTP session using reqwest.
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    timeout_secs: u64,
}

impl HttpSession {
    pub fn new(config: &SessionConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::SetupError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: config.timeout.as_secs(),
        })
    }

    pub async fn load(&self, url: &str, wait_for: &str) -> Result<String, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if let Some(err) = status_error(status, url) {
            return Err(err);
        }

        let html = response
            .text()
            .await
            .map_err(|e| self.map_request_error(e))?;
        check_page(&html, url, wait_for)?;
        Ok(html)
    }

    fn map_request_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() || e.is_request() || e.is_body() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

/// Classify a non-success status. `None` for 2xx.
pub(crate) fn status_error(status: StatusCode, url: &str) -> Option<AppError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(AppError::RateLimited(format!("HTTP 429 for {url}")))
    } else if status.is_server_error() {
        Some(AppError::NetworkError(format!(
            "HTTP {} for {url}",
            status.as_u16()
        )))
    } else {
        Some(AppError::HttpError(format!(
            "HTTP {} for {url}",
            status.as_u16()
        )))
    }
}

const RATE_LIMIT_MARKERS: [&str; 3] = ["too many requests", "rate limit", "unusual traffic"];

/// True when the page is a provider's throttling page rather than content.
///
/// Only the `<title>` and top-level headings are inspected, since posting
/// bodies can mention rate limits legitimately.
pub(crate) fn is_rate_limit_page(document: &Html) -> bool {
    let Ok(selector) = Selector::parse("title, h1") else {
        return false;
    };
    document.select(&selector).any(|el| {
        let text = el.text().collect::<String>().to_lowercase();
        RATE_LIMIT_MARKERS.iter().any(|m| text.contains(m))
    })
}

/// Validate a loaded page: throttling pages become [`AppError::RateLimited`],
/// pages without `wait_for` become [`AppError::ElementNotFound`].
pub(crate) fn check_page(html: &str, url: &str, wait_for: &str) -> Result<(), AppError> {
    let document = Html::parse_document(html);
    if is_rate_limit_page(&document) {
        return Err(AppError::RateLimited(format!("Throttling page served for {url}")));
    }

    let selector = Selector::parse(wait_for)
        .map_err(|e| AppError::ExtractionError(format!("Bad selector {wait_for}: {e}")))?;
    if document.select(&selector).next().is_none() {
        return Err(AppError::ElementNotFound(format!("{wait_for} on {url}")));
    }
    Ok(())
}
