//! Remote browser session.
//!
//! Connects to an already running headless Chrome over the DevTools
//! protocol (chromiumoxide). Each session owns one page with a fixed
//! 1024x2048 viewport at device scale 2 and `screen` media emulation.
//!
//! Certificate checks may be relaxed for the endpoint connection only: the
//! `/json/version` discovery request honours `accept_invalid_certs`, pages
//! always verify the sites they load, and nothing process-wide is touched.
//! The DevTools WebSocket is opened by chromiumoxide with its default TLS
//! roots, so a `wss://` socket cannot skip verification and is refused when
//! that is asked for.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::extract::Clip;

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetEmulatedMediaParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
#[cfg(feature = "browser")]
use chromiumoxide::handler::HandlerConfig;
#[cfg(feature = "browser")]
use chromiumoxide::page::ScreenshotParams;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;

#[cfg(feature = "browser")]
const VIEWPORT_WIDTH: i64 = 1024;
#[cfg(feature = "browser")]
const VIEWPORT_HEIGHT: i64 = 2048;
#[cfg(feature = "browser")]
const DEVICE_SCALE_FACTOR: f64 = 2.0;

#[cfg(feature = "browser")]
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One open page on a remote browser.
#[async_trait]
pub trait PageSession: Send {
    /// Prepare a freshly connected session for use.
    async fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Navigate and wait for the load to finish.
    async fn goto(&mut self, url: &str) -> Result<()>;

    /// Rendered HTML of the current document.
    async fn content(&mut self) -> Result<String>;

    /// URL of the current document, after redirects.
    async fn current_url(&mut self) -> Result<String>;

    /// Wait until `selector` matches. Returns `false` on timeout.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Capture `clip` of the current page as PNG.
    async fn screenshot_clip(&mut self, clip: &Clip) -> Result<Vec<u8>>;

    /// Close the page and the connection. Idempotent, never fails.
    async fn disconnect(&mut self);
}

/// Run `setup` on a connected session. On failure the session is closed
/// before the setup error is returned.
pub async fn open_or_close<S>(mut session: S) -> Result<Box<dyn PageSession>>
where
    S: PageSession + 'static,
{
    if let Err(e) = session.setup().await {
        session.disconnect().await;
        return Err(e);
    }
    Ok(Box::new(session))
}

/// Opens page sessions.
#[async_trait]
pub trait BrowserConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PageSession>>;
}

/// The `/json/version` URL for an HTTP DevTools endpoint, or `None` when the
/// endpoint already is a WebSocket URL.
pub fn version_url(endpoint: &str) -> Option<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        None
    } else {
        Some(format!("{}/json/version", endpoint.trim_end_matches('/')))
    }
}

/// Resolve an endpoint to the browser's DevTools WebSocket URL.
pub async fn discover_websocket_url(client: &reqwest::Client, endpoint: &str) -> Result<String> {
    let Some(version_url) = version_url(endpoint) else {
        return Ok(endpoint.to_string());
    };

    let info: serde_json::Value = client
        .get(&version_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PipelineError::network(&version_url, e))?
        .json()
        .await
        .map_err(|e| PipelineError::network(&version_url, format!("bad version info: {}", e)))?;

    info.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Browser(format!("no webSocketDebuggerUrl at {}", version_url)))
}

/// Refuse a `wss://` DevTools socket when certificate checks are to be
/// skipped: the socket cannot honour that.
pub fn check_websocket_tls(ws_url: &str, accept_invalid_certs: bool) -> Result<()> {
    if accept_invalid_certs && ws_url.starts_with("wss://") {
        return Err(PipelineError::Config(format!(
            "cannot skip certificate verification for WebSocket endpoint {}; \
             use a certificate trusted by the system roots and set accept_invalid_certs = false, \
             or connect over ws://",
            ws_url
        )));
    }
    Ok(())
}

/// Connector for a remote Chrome/Chromium.
#[derive(Debug, Clone)]
pub struct ChromeConnector {
    endpoint: Option<String>,
    accept_invalid_certs: bool,
    timeout: Duration,
}

impl ChromeConnector {
    pub fn new(endpoint: Option<String>, accept_invalid_certs: bool, timeout: Duration) -> Self {
        Self {
            endpoint,
            accept_invalid_certs,
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.browser_url.clone(),
            settings.accept_invalid_certs,
            Duration::from_secs(settings.request_timeout),
        )
    }

    fn endpoint(&self) -> Result<&str> {
        self.endpoint.as_deref().ok_or_else(|| {
            PipelineError::Config("no remote browser endpoint configured".to_string())
        })
    }

    #[cfg(feature = "browser")]
    fn discovery_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl BrowserConnector for ChromeConnector {
    async fn connect(&self) -> Result<Box<dyn PageSession>> {
        let endpoint = self.endpoint()?;
        info!("Connecting to remote browser at {}", endpoint);

        let ws_url = discover_websocket_url(&self.discovery_client()?, endpoint).await?;
        debug!("DevTools WebSocket: {}", ws_url);
        check_websocket_tls(&ws_url, self.accept_invalid_certs)?;

        // Pages always verify certificates
        let config = HandlerConfig {
            ignore_https_errors: false,
            request_timeout: self.timeout,
            viewport: None,
            ..Default::default()
        };
        let (browser, mut handler) = Browser::connect_with_config(ws_url.as_str(), config)
            .await
            .map_err(|e| PipelineError::Browser(format!("failed to connect to {}: {}", ws_url, e)))?;

        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        open_or_close(ChromeSession {
            browser,
            page: None,
            handler: Some(handler),
            closed: false,
        })
        .await
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl BrowserConnector for ChromeConnector {
    async fn connect(&self) -> Result<Box<dyn PageSession>> {
        self.endpoint()?;
        Err(PipelineError::Browser(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
                .to_string(),
        ))
    }
}

/// A chromiumoxide connection with its single page.
#[cfg(feature = "browser")]
pub struct ChromeSession {
    browser: Browser,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
    closed: bool,
}

#[cfg(feature = "browser")]
impl ChromeSession {
    async fn open_page(&mut self) -> Result<()> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| PipelineError::Browser(format!("failed to open page: {}", e)))?;

        page.execute(SetDeviceMetricsOverrideParams::new(
            VIEWPORT_WIDTH,
            VIEWPORT_HEIGHT,
            DEVICE_SCALE_FACTOR,
            false,
        ))
        .await
        .map_err(|e| PipelineError::Browser(format!("failed to set viewport: {}", e)))?;

        page.execute(SetEmulatedMediaParams::builder().media("screen").build())
            .await
            .map_err(|e| PipelineError::Browser(format!("failed to emulate media: {}", e)))?;

        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| PipelineError::Browser("session is closed".to_string()))
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl PageSession for ChromeSession {
    async fn setup(&mut self) -> Result<()> {
        self.open_page().await
    }

    async fn goto(&mut self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        self.page()?
            .goto(url)
            .await
            .map_err(|e| PipelineError::network(url, e))?;
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        self.page()?
            .content()
            .await
            .map_err(|e| PipelineError::Browser(format!("failed to read page content: {}", e)))
    }

    async fn current_url(&mut self) -> Result<String> {
        self.page()?
            .url()
            .await
            .map_err(|e| PipelineError::Browser(format!("failed to read page URL: {}", e)))?
            .ok_or_else(|| PipelineError::Browser("page has no URL".to_string()))
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        let page = self.page()?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if page.find_element(selector).await.is_ok() {
                debug!("Selector {} found", selector);
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn screenshot_clip(&mut self, clip: &Clip) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(Viewport {
                x: clip.x as f64,
                y: clip.y as f64,
                width: clip.width as f64,
                height: clip.height as f64,
                scale: 1.0,
            })
            .build();

        self.page()?
            .screenshot(params)
            .await
            .map_err(|e| PipelineError::Browser(format!("screenshot failed: {}", e)))
    }

    async fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close page: {}", e);
            }
        }
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser connection: {}", e);
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        debug!("Browser session closed");
    }
}

#[cfg(feature = "browser")]
impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}
