use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{
    Browser, BrowserConfig, Page,
    error::CdpError,
    browser::HeadlessMode,
    cdp::browser_protocol::{
        network::{EnableParams, EventRequestWillBeSent},
        page::AddScriptToEvaluateOnNewDocumentParams,
    },
};
use tempfile::TempDir;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::StreamExt;
use tracing::{debug, instrument, warn};

use crate::{
    config::SessionConfig,
    error::{FailureReason, SessionFault},
};

/// Hides `navigator.webdriver` before any page script gets to look at it
const HIDE_WEBDRIVER_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

const BODY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Grace period for Chrome to exit after a clean close before it gets killed
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// A single isolated browser, owned by one extraction attempt
#[async_trait]
pub trait Session: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionFault>;

    /// Waits until the document has a `<body>`, returning `false` if `timeout` elapsed first
    async fn wait_for_body(&mut self, timeout: Duration) -> Result<bool, SessionFault>;

    /// Synthetic click on the document body
    async fn click_body(&mut self) -> Result<(), SessionFault>;

    /// Every request URL issued since the session started, in request order
    fn observed_requests(&mut self) -> Vec<String>;

    /// Fully rendered markup of the current document
    async fn content(&mut self) -> Result<String, SessionFault>;

    /// Tears the browser down. Must be called exactly once.
    async fn release(&mut self);
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Session>, FailureReason>;
}

/// Launches one headless Chrome per session
#[derive(Debug, Clone)]
pub struct ChromeSessionFactory {
    config: SessionConfig,
}

impl ChromeSessionFactory {
    #[must_use]
    pub const fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self, profile: &TempDir) -> Result<BrowserConfig, String> {
        let mut builder = BrowserConfig::builder()
            .headless_mode(HeadlessMode::True)
            .no_sandbox()
            .user_data_dir(profile.path())
            .launch_timeout(self.config.launch_timeout)
            .args([
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--disable-blink-features=AutomationControlled",
                "--disable-popup-blocking",
                "--autoplay-policy=no-user-gesture-required",
                "--mute-audio",
                "--no-first-run",
            ])
            .arg(format!("--user-agent={}", self.config.user_agent));

        if let Some(executable) = &self.config.executable {
            builder = builder.chrome_executable(executable);
        }

        builder.build()
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    #[instrument(skip(self))]
    async fn acquire(&self) -> Result<Box<dyn Session>, FailureReason> {
        let profile = tempfile::Builder::new()
            .prefix("stream-squirrel-")
            .tempdir()
            .map_err(|e| FailureReason::SessionStartError(format!("profile directory: {e}")))?;

        let config = self
            .browser_config(&profile)
            .map_err(FailureReason::SessionStartError)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FailureReason::SessionStartError(e.to_string()))?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        match prepare_page(&browser).await {
            Ok((page, requests, listener)) => {
                debug!("Browser session ready");
                Ok(Box::new(ChromeSession {
                    browser,
                    page,
                    handler,
                    listener,
                    requests,
                    observed: Vec::new(),
                    profile: Some(profile),
                    released: false,
                }))
            }
            Err(e) => {
                shutdown_browser(&mut browser).await;
                handler.abort();
                Err(FailureReason::SessionStartError(e.to_string()))
            }
        }
    }
}

/// Opens a blank tab with request capture and automation countermeasures in place
async fn prepare_page(
    browser: &Browser,
) -> Result<(Page, mpsc::UnboundedReceiver<String>, JoinHandle<()>), SessionFault> {
    let page = browser.new_page("about:blank").await?;
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
        HIDE_WEBDRIVER_SCRIPT,
    ))
    .await?;
    page.execute(EnableParams::default()).await?;

    let mut events = page.event_listener::<EventRequestWillBeSent>().await?;
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if tx.send(event.request.url.clone()).is_err() {
                break;
            }
        }
    });

    Ok((page, rx, listener))
}

async fn shutdown_browser(browser: &mut Browser) {
    if let Err(e) = browser.close().await {
        debug!("Browser did not close cleanly, killing it: {e}");
        kill_browser(browser).await;
        return;
    }

    match tokio::time::timeout(EXIT_GRACE, browser.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Unable to reap browser process: {e}"),
        Err(_) => {
            debug!("Browser still running {EXIT_GRACE:?} after close, killing it");
            kill_browser(browser).await;
        }
    }
}

async fn kill_browser(browser: &mut Browser) {
    if let Some(Err(e)) = browser.kill().await {
        warn!("Unable to kill browser process: {e}");
    }
}

/// Errors `find_element` returns while the element simply isn't in the document yet
const fn is_missing_element(error: &CdpError) -> bool {
    matches!(error, CdpError::NotFound | CdpError::Chrome(_))
}

pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    listener: JoinHandle<()>,
    requests: mpsc::UnboundedReceiver<String>,
    observed: Vec<String>,
    profile: Option<TempDir>,
    released: bool,
}

#[async_trait]
impl Session for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionFault> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn wait_for_body(&mut self, timeout: Duration) -> Result<bool, SessionFault> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.page.find_element("body").await {
                Ok(_) => return Ok(true),
                Err(e) if is_missing_element(&e) => {}
                Err(e) => return Err(e.into()),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(BODY_POLL_INTERVAL).await;
        }
    }

    async fn click_body(&mut self) -> Result<(), SessionFault> {
        self.page.find_element("body").await?.click().await?;
        Ok(())
    }

    fn observed_requests(&mut self) -> Vec<String> {
        while let Ok(url) = self.requests.try_recv() {
            self.observed.push(url);
        }
        self.observed.clone()
    }

    async fn content(&mut self) -> Result<String, SessionFault> {
        Ok(self.page.content().await?)
    }

    async fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }

        self.listener.abort();
        if let Err(e) = self.page.clone().close().await {
            debug!("Page did not close cleanly: {e}");
        }
        shutdown_browser(&mut self.browser).await;
        self.handler.abort();

        if let Some(profile) = self.profile.take()
            && let Err(e) = profile.close()
        {
            warn!("Unable to remove browser profile directory: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_elements_are_retried() {
        assert!(is_missing_element(&CdpError::NotFound));
        assert!(!is_missing_element(&CdpError::Timeout));
        assert!(!is_missing_element(&CdpError::NoResponse));
    }
}
