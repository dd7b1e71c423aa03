//! Automation session: one browser process and one tab per job
//!
//! The process owns a cancellation token; the tab's token is a child of it.
//! Cancelling the process (or the job above it) tears down the tab too,
//! while a tab-level timeout leaves the process alone.

use gameqa_common::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, BrowserProcess, LaunchOptions, PageHandle};

/// Script reporting whether the document root is structurally ready
const READY_PROBE: &str =
    "document.readyState !== 'loading' && !!document.documentElement && !!document.body";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A live browser process/tab pairing
pub struct AutomationSession {
    process: Option<Box<dyn BrowserProcess>>,
    page: Option<Arc<dyn PageHandle>>,
    process_token: CancellationToken,
    tab_token: CancellationToken,
}

impl AutomationSession {
    /// Launch a browser and open its tab. The process token is derived from
    /// `parent`, so cancelling the job tears the session down.
    pub async fn open(
        driver: &dyn BrowserDriver,
        options: &LaunchOptions,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let process_token = parent.child_token();
        let tab_token = process_token.child_token();

        let mut process = tokio::select! {
            _ = process_token.cancelled() => {
                return Err(Error::Cancelled("cancelled while launching browser".to_string()));
            }
            process = driver.launch(options) => process.map_err(launch_failed)?,
        };

        let page = match process.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let _ = process.shutdown().await;
                return Err(launch_failed(e));
            }
        };

        debug!(headless = options.headless, "Browser session opened");

        Ok(Self {
            process: Some(process),
            page: Some(page),
            process_token,
            tab_token,
        })
    }

    /// The tab, or `SessionCrash` once the session is closed
    pub fn page(&self) -> Result<&Arc<dyn PageHandle>> {
        self.page
            .as_ref()
            .ok_or_else(|| Error::SessionCrash("session is closed".to_string()))
    }

    pub fn is_open(&self) -> bool {
        self.page.is_some()
    }

    /// Load `url` and wait until the document root is ready
    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let page = self.page()?.clone();
        info!("Navigating to {}", url);

        let load = async {
            page.goto(url).await?;
            loop {
                let ready = page.evaluate(READY_PROBE).await?;
                if ready.as_bool().unwrap_or(false) {
                    return Ok(());
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };

        match self.run(tokio::time::timeout(timeout, load)).await? {
            Ok(result) => result,
            Err(_) => {
                warn!("Navigation to {} timed out after {:?}", url, timeout);
                Err(Error::NavigationTimeout {
                    url: url.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    /// Sleep unless the session is torn down first
    pub async fn pause(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Run `fut` until it completes or the tab is cancelled
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            _ = self.tab_token.cancelled() => {
                Err(Error::Cancelled("browser session was torn down".to_string()))
            }
            out = fut => Ok(out),
        }
    }

    /// Close the tab and kill the process. Safe to call more than once.
    pub async fn close(&mut self) {
        self.process_token.cancel();

        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Closing tab failed: {}", e);
            }
        }

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.shutdown().await {
                warn!("Browser shutdown failed: {}", e);
            }
            debug!("Browser session closed");
        }
    }
}

/// A browser that never came up counts as a crashed session
fn launch_failed(e: Error) -> Error {
    match e {
        Error::Browser(message) => Error::SessionCrash(format!("browser failed to start: {}", message)),
        other => other,
    }
}

impl Drop for AutomationSession {
    fn drop(&mut self) {
        // Dropping the process handle kills the browser.
        if self.process.is_some() {
            warn!("Browser session dropped without close; killing process");
            self.process_token.cancel();
            self.page.take();
            self.process.take();
        }
    }
}
