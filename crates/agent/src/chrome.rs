//! Chrome DevTools Protocol driver built on chromiumoxide

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::{
    EvaluateParams, EventConsoleApiCalled, EventExceptionThrown,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use gameqa_common::{Error, LogLevel, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::{BrowserDriver, BrowserProcess, ConsoleEvent, KeyStroke, LaunchOptions, PageHandle};

const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Launches local Chrome/Chromium processes
#[derive(Debug, Clone, Default)]
pub struct ChromeDriver;

impl ChromeDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserProcess>> {
        // Fresh profile per process so no state leaks between jobs
        let profile_dir = tempfile::tempdir()?;

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(options.viewport_width, options.viewport_height)
            .viewport(Viewport {
                width: options.viewport_width,
                height: options.viewport_height,
                device_scale_factor: Some(1.0),
                ..Default::default()
            })
            .user_data_dir(profile_dir.path())
            .arg("--force-device-scale-factor=1")
            .arg("--autoplay-policy=no-user-gesture-required");

        // New headless mode keeps WebGL available to canvas games
        builder = if options.headless {
            builder.with_head().arg("--headless=new")
        } else {
            builder.with_head()
        };

        if let Some(path) = &options.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        for arg in &options.extra_args {
            builder = builder.arg(arg.as_str());
        }

        let config = builder.build().map_err(Error::Browser)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;

        let alive = Arc::new(AtomicBool::new(true));
        let handler_alive = alive.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler event error: {}", e);
                }
            }
            handler_alive.store(false, Ordering::SeqCst);
        });

        Ok(Box::new(ChromeProcess {
            browser: Some(browser),
            handler_task,
            alive,
            _profile_dir: profile_dir,
        }))
    }
}

/// A launched Chrome process
pub struct ChromeProcess {
    browser: Option<Browser>,
    handler_task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
    _profile_dir: tempfile::TempDir,
}

#[async_trait]
impl BrowserProcess for ChromeProcess {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| Error::SessionCrash("browser already shut down".to_string()))?;
        let page = browser.new_page("about:blank").await.map_err(browser_err)?;
        Ok(Arc::new(ChromePage {
            page,
            alive: self.alive.clone(),
        }))
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut browser) = self.browser.take() {
            let graceful = tokio::time::timeout(CLOSE_GRACE, async {
                browser.close().await.map_err(browser_err)?;
                browser.wait().await?;
                Ok::<_, Error>(())
            })
            .await;

            if !matches!(graceful, Ok(Ok(()))) {
                warn!("Browser did not exit cleanly; killing it");
                if let Some(Err(e)) = browser.kill().await {
                    warn!("Failed to kill browser: {}", e);
                }
            }
        }
        self.handler_task.abort();
        Ok(())
    }
}

impl Drop for ChromeProcess {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

/// A Chrome tab
pub struct ChromePage {
    page: Page,
    alive: Arc<AtomicBool>,
}

impl ChromePage {
    fn check_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::SessionCrash("browser connection closed".to_string()))
        }
    }

    fn map_err(&self, e: impl std::fmt::Display) -> Error {
        if self.alive.load(Ordering::SeqCst) {
            Error::Browser(e.to_string())
        } else {
            Error::SessionCrash(e.to_string())
        }
    }
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn console_events(&self) -> Result<mpsc::UnboundedReceiver<ConsoleEvent>> {
        self.check_alive()?;
        let mut console = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| self.map_err(e))?;
        let mut exceptions = self
            .page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(|e| self.map_err(e))?;

        let (tx, rx) = mpsc::unbounded_channel();

        let console_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = console.next().await {
                let message = event
                    .args
                    .iter()
                    .map(|arg| {
                        arg.value
                            .as_ref()
                            .map(|v| match v {
                                serde_json::Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .or_else(|| arg.description.clone())
                            .unwrap_or_default()
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                let source = event.stack_trace.as_ref().and_then(|trace| {
                    trace.call_frames.first().map(|frame| {
                        format!("{}:{}:{}", frame.url, frame.line_number, frame.column_number)
                    })
                });
                let level = LogLevel::from_console_type(event.r#type.as_ref());
                if console_tx.send(ConsoleEvent { level, message, source }).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let details = &event.exception_details;
                let message = details
                    .exception
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                let source = details
                    .url
                    .as_ref()
                    .map(|url| format!("{}:{}:{}", url, details.line_number, details.column_number));
                if tx
                    .send(ConsoleEvent {
                        level: LogLevel::Error,
                        message,
                        source,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.check_alive()?;
        self.page.goto(url).await.map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.check_alive()?;
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(Error::Browser)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        self.check_alive()?;
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn key_press(&self, key: &KeyStroke) -> Result<()> {
        self.check_alive()?;
        for (kind, is_down) in [
            (DispatchKeyEventType::KeyDown, true),
            (DispatchKeyEventType::KeyUp, false),
        ] {
            let mut params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key.key.clone())
                .code(key.code.clone())
                .windows_virtual_key_code(key.key_code as i64)
                .native_virtual_key_code(key.key_code as i64);
            if let (true, Some(text)) = (is_down, &key.text) {
                params = params.text(text.clone());
            }
            let params = params.build().map_err(Error::Browser)?;
            self.page.execute(params).await.map_err(|e| self.map_err(e))?;
        }
        Ok(())
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<()> {
        self.check_alive()?;
        // Some engines only register clicks after a prior move
        let steps = [
            (DispatchMouseEventType::MouseMoved, None),
            (DispatchMouseEventType::MousePressed, Some(MouseButton::Left)),
            (DispatchMouseEventType::MouseReleased, Some(MouseButton::Left)),
        ];
        for (kind, button) in steps {
            let mut params = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
            if let Some(button) = button {
                params = params.button(button).click_count(1);
            }
            let params = params.build().map_err(Error::Browser)?;
            self.page.execute(params).await.map_err(|e| self.map_err(e))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.page.clone().close().await.map_err(|e| self.map_err(e))
    }
}

fn browser_err(e: chromiumoxide::error::CdpError) -> Error {
    Error::Browser(e.to_string())
}
