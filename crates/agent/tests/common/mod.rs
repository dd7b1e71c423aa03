//! Scripted fakes for the browser driver and the scoring service

#![allow(dead_code)]

use async_trait::async_trait;
use gameqa_agent::driver::{
    BrowserDriver, BrowserProcess, ConsoleEvent, KeyStroke, LaunchOptions, PageHandle,
};
use gameqa_agent::evaluator::{ScoringError, ScoringRequest, ScoringService};
use gameqa_common::{config::QaConfig, Error, LogLevel, Result};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const GOOD_SCORE: &str = r#"{"overall": 78, "interactivity": 80, "visual_quality": 75,
    "error_severity": 10, "confidence": 85, "reasoning": "Character moves on input",
    "issues": [], "recommendations": ["Add a pause menu"]}"#;

/// Config with short waits so a full pipeline finishes quickly
pub fn fast_config() -> QaConfig {
    let mut config = QaConfig::default();
    config.interaction.step_wait_ms = 5;
    config.interaction.post_entry_wait_ms = 5;
    config.interaction.plan_budget_secs = 5;
    config.scoring.retry_base_delay_ms = 10;
    config
}

/// Encode a solid 64x48 PNG, optionally with a white block in the corner
pub fn frame(with_block: bool) -> Vec<u8> {
    let img = RgbaImage::from_fn(64, 48, |x, y| {
        if with_block && x < 32 && y < 24 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 40, 255])
        }
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageOutputFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// What the fake page looks like and how it behaves
#[derive(Clone)]
pub struct PageScript {
    pub nav_delay: Duration,
    pub probe: Value,
    pub candidates: Value,
    pub console: Vec<ConsoleEvent>,
    pub fail_launch: bool,
    pub fail_screenshots: bool,
    /// Scripts containing any of these markers fail with a browser error
    pub failing_scripts: Vec<&'static str>,
}

impl PageScript {
    /// Canvas game with a visible Start button and one console error
    pub fn canvas_game() -> Self {
        Self {
            nav_delay: Duration::from_millis(10),
            probe: json!({
                "canvas_count": 1,
                "primary_canvas": {"x": 0.0, "y": 0.0, "width": 640.0, "height": 480.0},
                "interactive_count": 1,
                "markers": []
            }),
            candidates: json!([
                {"index": 0, "tag": "a", "text": "Help", "visible": true,
                 "rect": {"x": 600.0, "y": 10.0, "width": 40.0, "height": 20.0}},
                {"index": 1, "tag": "button", "text": "Start", "visible": true,
                 "rect": {"x": 300.0, "y": 220.0, "width": 80.0, "height": 40.0}}
            ]),
            console: vec![
                ConsoleEvent {
                    level: LogLevel::Info,
                    message: "engine booted".to_string(),
                    source: None,
                },
                ConsoleEvent {
                    level: LogLevel::Error,
                    message: "Failed to load sound.ogg".to_string(),
                    source: Some("https://games.test/app.js:10:4".to_string()),
                },
            ],
            fail_launch: false,
            fail_screenshots: false,
            failing_scripts: Vec::new(),
        }
    }

    /// Only a hidden Start button
    pub fn hidden_start(canvas: bool) -> Self {
        let mut script = Self::canvas_game();
        script.candidates = json!([
            {"index": 0, "tag": "button", "text": "Start", "visible": false, "rect": null}
        ]);
        if !canvas {
            script.probe = json!({
                "canvas_count": 0,
                "primary_canvas": null,
                "interactive_count": 1,
                "markers": [".board"]
            });
        }
        script
    }

    /// Page scripts matching `marker` throw, as after a client-side redirect
    pub fn failing_script(mut self, marker: &'static str) -> Self {
        self.failing_scripts.push(marker);
        self
    }

    pub fn slow(mut self, nav_delay: Duration) -> Self {
        self.nav_delay = nav_delay;
        self
    }
}

/// Counters shared by every process and page a driver creates
#[derive(Default)]
pub struct FakeStats {
    pub launches: AtomicUsize,
    pub open: AtomicUsize,
    pub max_open: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub keys: AtomicUsize,
    pub clicks: AtomicUsize,
    pub focus_calls: AtomicUsize,
    pub screenshots: AtomicUsize,
    consoles: Mutex<Vec<mpsc::UnboundedSender<ConsoleEvent>>>,
}

impl FakeStats {
    pub fn inputs(&self) -> usize {
        self.keys.load(Ordering::SeqCst) + self.clicks.load(Ordering::SeqCst)
    }

    /// Queue a console event on every page of this driver without yielding
    pub fn emit(&self, event: ConsoleEvent) {
        for tx in self.consoles.lock().iter() {
            let _ = tx.send(event.clone());
        }
    }
}

pub struct FakeDriver {
    script: PageScript,
    pub stats: Arc<FakeStats>,
}

impl FakeDriver {
    pub fn new(script: PageScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            stats: Arc::new(FakeStats::default()),
        })
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn BrowserProcess>> {
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_launch {
            return Err(Error::Browser("chrome exited with status 1".to_string()));
        }
        let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            script: self.script.clone(),
            stats: self.stats.clone(),
            alive: AtomicBool::new(true),
        }))
    }
}

struct FakeProcess {
    script: PageScript,
    stats: Arc<FakeStats>,
    alive: AtomicBool,
}

impl FakeProcess {
    fn exit(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.stats.open.fetch_sub(1, Ordering::SeqCst);
            self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BrowserProcess for FakeProcess {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
        Ok(Arc::new(FakePage {
            script: self.script.clone(),
            stats: self.stats.clone(),
            listeners: Mutex::new(Vec::new()),
        }))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.exit();
        Ok(())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.exit();
    }
}

struct FakePage {
    script: PageScript,
    stats: Arc<FakeStats>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<ConsoleEvent>>>,
}

#[async_trait]
impl PageHandle for FakePage {
    async fn console_events(&self) -> Result<mpsc::UnboundedReceiver<ConsoleEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.stats.consoles.lock().push(tx.clone());
        self.listeners.lock().push(tx);
        Ok(rx)
    }

    async fn goto(&self, _url: &str) -> Result<()> {
        for event in &self.script.console {
            for tx in self.listeners.lock().iter() {
                let _ = tx.send(event.clone());
            }
        }
        tokio::time::sleep(self.script.nav_delay).await;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        if self.script.failing_scripts.iter().any(|marker| script.contains(marker)) {
            return Err(Error::Browser("Execution context was destroyed".to_string()));
        }
        let value = if script.contains("document.readyState") {
            json!(true)
        } else if script.contains("canvas_count") {
            self.script.probe.clone()
        } else if script.contains("scrollIntoView") {
            json!({"x": 300.0, "y": 220.0, "width": 80.0, "height": 40.0})
        } else if script.contains("data-gameqa-candidate") {
            self.script.candidates.clone()
        } else if script.contains(".focus()") {
            self.stats.focus_calls.fetch_add(1, Ordering::SeqCst);
            json!(true)
        } else if script.contains("KeyboardEvent") {
            self.stats.keys.fetch_add(1, Ordering::SeqCst);
            json!(true)
        } else if script.contains("elementFromPoint") {
            json!(true)
        } else {
            Value::Null
        };
        Ok(value)
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        if self.script.fail_screenshots {
            return Err(Error::Browser("Page.captureScreenshot failed".to_string()));
        }
        self.stats.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(frame(self.stats.inputs() > 0))
    }

    async fn key_press(&self, _key: &KeyStroke) -> Result<()> {
        self.stats.keys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mouse_click(&self, _x: f64, _y: f64) -> Result<()> {
        self.stats.clicks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Scoring service replaying scripted responses, then a fallback
pub struct FakeScorer {
    responses: Mutex<VecDeque<std::result::Result<String, ScoringError>>>,
    fallback: std::result::Result<String, ScoringError>,
    pub calls: AtomicUsize,
    pub last_image_count: AtomicUsize,
}

impl FakeScorer {
    pub fn always(response: std::result::Result<String, ScoringError>) -> Arc<Self> {
        Self::scripted(Vec::new(), response)
    }

    pub fn scripted(
        responses: Vec<std::result::Result<String, ScoringError>>,
        fallback: std::result::Result<String, ScoringError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            fallback,
            calls: AtomicUsize::new(0),
            last_image_count: AtomicUsize::new(0),
        })
    }

    pub fn good() -> Arc<Self> {
        Self::always(Ok(GOOD_SCORE.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringService for FakeScorer {
    async fn score(&self, request: &ScoringRequest) -> std::result::Result<String, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_image_count
            .store(request.images.len(), Ordering::SeqCst);
        let next = self.responses.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Scoring service whose implementation panics
pub struct PanickingScorer;

#[async_trait]
impl ScoringService for PanickingScorer {
    async fn score(&self, _request: &ScoringRequest) -> std::result::Result<String, ScoringError> {
        panic!("scoring backend exploded");
    }
}
