//! Evidence collection
//!
//! The collector owns the job's [`Evidence`]. Logs arrive from a background
//! listener registered before navigation; screenshots are captured on demand.
//! Once [`EvidenceCollector::stop_capture`] runs the evidence is frozen and
//! anything arriving later is discarded.

use bytes::Bytes;
use chrono::Utc;
use gameqa_common::{ArtifactRef, CaptureContext, Evidence, LogEntry, Result, Screenshot};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::task::Poll;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::ConsoleEvent;
use crate::session::AutomationSession;

/// Console entries kept per job; later entries are counted but dropped
pub const MAX_LOG_ENTRIES: usize = 1000;

#[derive(Debug, Default)]
struct CollectorState {
    evidence: Evidence,
    /// Console events not yet recorded; `None` once capture stops
    events: Option<mpsc::UnboundedReceiver<ConsoleEvent>>,
    capturing: bool,
    frozen: bool,
    dropped_logs: usize,
    warnings: Vec<String>,
}

impl CollectorState {
    fn record(&mut self, event: ConsoleEvent) {
        if self.evidence.logs.len() >= MAX_LOG_ENTRIES {
            self.dropped_logs += 1;
            return;
        }
        self.evidence.logs.push(LogEntry {
            timestamp: Utc::now(),
            level: event.level,
            source: event.source,
            message: event.message,
        });
    }

    /// Record everything already queued and close the channel
    fn drain(&mut self) {
        let Some(mut events) = self.events.take() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            self.record(event);
        }
    }
}

/// Captures screenshots and console output for one session
pub struct EvidenceCollector {
    state: Arc<Mutex<CollectorState>>,
    listener: Option<JoinHandle<()>>,
    viewport: (u32, u32),
}

impl EvidenceCollector {
    /// `viewport` is reported for screenshots whose size cannot be decoded
    pub fn new(viewport: (u32, u32)) -> Self {
        Self {
            state: Arc::new(Mutex::new(CollectorState::default())),
            listener: None,
            viewport,
        }
    }

    /// Register the console listener. Call before navigating so load-time
    /// messages are kept. A second call is a no-op.
    pub async fn start_capture(&mut self, session: &AutomationSession) -> Result<()> {
        {
            let state = self.state.lock();
            if state.capturing || state.frozen {
                warn!("Evidence capture already started for this session");
                return Ok(());
            }
        }

        let events = session.page()?.console_events().await?;
        {
            let mut state = self.state.lock();
            state.events = Some(events);
            state.capturing = true;
        }

        // The receiver stays in the shared state so stop_capture can drain
        // whatever is queued before freezing
        let state = self.state.clone();
        self.listener = Some(tokio::spawn(async move {
            loop {
                let next = std::future::poll_fn(|cx| match state.lock().events.as_mut() {
                    Some(events) => events.poll_recv(cx),
                    None => Poll::Ready(None),
                })
                .await;
                let Some(event) = next else {
                    break;
                };
                let mut state = state.lock();
                if state.frozen {
                    break;
                }
                state.record(event);
            }
        }));

        debug!("Evidence capture started");
        Ok(())
    }

    /// Capture the viewport. Failures are recorded as warnings and yield
    /// `None`; the pipeline carries on with fewer screenshots.
    pub async fn capture_screenshot(
        &self,
        session: &AutomationSession,
        context: CaptureContext,
    ) -> Option<Screenshot> {
        if self.state.lock().frozen {
            debug!("Ignoring {} screenshot after capture stopped", context);
            return None;
        }

        let captured = match session.page() {
            Ok(page) => session.run(page.screenshot_png()).await.and_then(|r| r),
            Err(e) => Err(e),
        };

        let data = match captured {
            Ok(data) => data,
            Err(e) => {
                let message = format!("Failed to capture {} screenshot: {}", context, e);
                warn!("{}", message);
                self.state.lock().warnings.push(message);
                return None;
            }
        };

        let (width, height) = image_dimensions(&data).unwrap_or(self.viewport);
        let screenshot = Screenshot {
            context,
            captured_at: Utc::now(),
            artifact: ArtifactRef::for_bytes(&data),
            width,
            height,
            data: Bytes::from(data),
        };

        let mut state = self.state.lock();
        if state.frozen {
            return None;
        }
        state.evidence.screenshots.push(screenshot.clone());
        debug!(
            "Captured {} screenshot ({}x{}, {} bytes)",
            context, width, height, screenshot.artifact.size_bytes
        );
        Some(screenshot)
    }

    /// Freeze the evidence. Events queued before this call are kept;
    /// later ones are discarded. Idempotent.
    pub fn stop_capture(&mut self) {
        let mut state = self.state.lock();
        if state.frozen {
            return;
        }
        state.drain();
        state.frozen = true;
        state.capturing = false;
        if state.dropped_logs > 0 {
            let message = format!(
                "Console output truncated: {} entries beyond {} were dropped",
                state.dropped_logs, MAX_LOG_ENTRIES
            );
            state.warnings.push(message);
        }
        drop(state);

        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        debug!("Evidence capture stopped");
    }

    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen
    }

    /// Copy of the evidence collected so far
    pub fn snapshot(&self) -> Evidence {
        self.state.lock().evidence.clone()
    }

    /// Stop capturing and hand over the evidence and warnings
    pub fn finish(mut self) -> (Evidence, Vec<String>) {
        self.stop_capture();
        let mut state = self.state.lock();
        (
            std::mem::take(&mut state.evidence),
            std::mem::take(&mut state.warnings),
        )
    }
}

impl Drop for EvidenceCollector {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
