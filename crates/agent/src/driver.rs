//! Browser driver abstraction
//!
//! The session, detector, dispatcher and evidence collector only talk to a
//! browser through these traits. [`crate::chrome::ChromeDriver`] implements
//! them over the Chrome DevTools Protocol.

use async_trait::async_trait;
use gameqa_common::{config::BrowserConfig, LogLevel, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Options for launching one browser process
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub chrome_executable: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    pub fn from_config(config: &BrowserConfig, headless: bool) -> Self {
        Self {
            headless,
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            chrome_executable: config.chrome_executable.clone(),
            extra_args: config.extra_args.clone(),
        }
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::from_config(&BrowserConfig::default(), true)
    }
}

/// A console message or uncaught exception reported by the page
#[derive(Debug, Clone)]
pub struct ConsoleEvent {
    pub level: LogLevel,
    pub message: String,
    pub source: Option<String>,
}

/// A key with DOM `key`/`code` and legacy `keyCode` semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStroke {
    pub key: String,
    pub code: String,
    pub key_code: u32,
    /// Text inserted by the key, if any
    pub text: Option<String>,
}

/// Launches browser processes
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserProcess>>;
}

/// A running browser process. Shutting it down closes every page it owns.
#[async_trait]
pub trait BrowserProcess: Send + Sync {
    /// Open a new blank tab
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>>;

    /// Terminate the process
    async fn shutdown(&mut self) -> Result<()>;
}

/// A single tab
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Subscribe to console and exception events
    async fn console_events(&self) -> Result<mpsc::UnboundedReceiver<ConsoleEvent>>;

    /// Start navigation and wait for the load to commit
    async fn goto(&self, url: &str) -> Result<()>;

    /// Evaluate a script and return its JSON value
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Capture the viewport as PNG
    async fn screenshot_png(&self) -> Result<Vec<u8>>;

    /// Send a trusted key down/up pair to the focused element
    async fn key_press(&self, key: &KeyStroke) -> Result<()>;

    /// Send a trusted left click at viewport coordinates
    async fn mouse_click(&self, x: f64, y: f64) -> Result<()>;

    /// Close the tab
    async fn close(&self) -> Result<()>;
}
