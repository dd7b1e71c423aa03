//! Game-type detection
//!
//! A single probe script inspects the loaded page; classification itself is
//! a pure function over the probe so it can be tested without a browser.

use gameqa_common::{Error, GameType, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::session::AutomationSession;

/// Interactive DOM elements beyond this count make a canvas page hybrid
pub const HYBRID_INTERACTIVE_THRESHOLD: usize = 5;

/// Selectors typical of DOM-rendered game engines and board/card layouts
pub const DOM_ENGINE_MARKERS: &[&str] = &[
    "[data-game]",
    "#game-board",
    ".game-board",
    ".board",
    ".grid-cell",
    ".tile",
    ".card",
    "#game[role='application']",
    "[data-phaser-dom]",
];

/// Axis-aligned rectangle in viewport CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Raw facts collected from the page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageProbe {
    pub canvas_count: usize,
    /// Largest visible canvas
    #[serde(default)]
    pub primary_canvas: Option<Rect>,
    /// Visible interactive elements that are not canvases
    pub interactive_count: usize,
    /// Engine markers found in the document
    #[serde(default)]
    pub markers: Vec<String>,
}

/// Result of classifying a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub game_type: GameType,
    /// 0-100
    pub confidence: u8,
    /// Number of signals the decision rests on
    pub evidence_count: usize,
    pub primary_canvas: Option<Rect>,
    /// Set when the caller supplied the game type
    pub overridden: bool,
}

impl Classification {
    /// Classification forced by the request
    pub fn overridden(game_type: GameType, probe: Option<&PageProbe>) -> Self {
        Self {
            game_type,
            confidence: 100,
            evidence_count: 0,
            primary_canvas: probe.and_then(|p| p.primary_canvas),
            overridden: true,
        }
    }
}

/// Decide the game type from a probe.
///
/// Rules, in order:
/// 1. engine markers and no canvas: DOM
/// 2. canvas with more than [`HYBRID_INTERACTIVE_THRESHOLD`] interactive elements: hybrid
/// 3. canvas: canvas
/// 4. otherwise: DOM
pub fn classify(probe: &PageProbe) -> Classification {
    let has_canvas = probe.canvas_count > 0;
    let markers = probe.markers.len();

    let (game_type, confidence, evidence_count) = if markers > 0 && !has_canvas {
        (GameType::Dom, (60 + 10 * markers).min(95) as u8, markers)
    } else if has_canvas && probe.interactive_count > HYBRID_INTERACTIVE_THRESHOLD {
        (GameType::Hybrid, 70, probe.canvas_count + probe.interactive_count)
    } else if has_canvas {
        let confidence = if probe.primary_canvas.is_some() { 85 } else { 60 };
        (GameType::Canvas, confidence, probe.canvas_count)
    } else {
        (GameType::Dom, 30, 0)
    };

    Classification {
        game_type,
        confidence,
        evidence_count,
        primary_canvas: probe.primary_canvas,
        overridden: false,
    }
}

/// Run the probe script against the session's page
pub async fn probe(session: &AutomationSession) -> Result<PageProbe> {
    let script = probe_script();
    let value = session.page()?.evaluate(&script).await?;
    serde_json::from_value(value)
        .map_err(|e| Error::Browser(format!("unexpected detector probe result: {}", e)))
}

/// Probe and classify the page
pub async fn detect(session: &AutomationSession) -> Result<(PageProbe, Classification)> {
    let probe = probe(session).await?;
    let classification = classify(&probe);
    debug!(
        canvases = probe.canvas_count,
        interactive = probe.interactive_count,
        markers = probe.markers.len(),
        "Classified page as {} ({}%)",
        classification.game_type,
        classification.confidence
    );
    Ok((probe, classification))
}

fn probe_script() -> String {
    let markers = serde_json::to_string(DOM_ENGINE_MARKERS).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
  const visible = (el) => {{
    const style = window.getComputedStyle(el);
    const r = el.getBoundingClientRect();
    return el.getClientRects().length > 0 && style.visibility !== 'hidden' && r.width > 0 && r.height > 0;
  }};
  const rect = (el) => {{ const r = el.getBoundingClientRect(); return {{ x: r.x, y: r.y, width: r.width, height: r.height }}; }};
  const canvases = Array.from(document.querySelectorAll('canvas'));
  const shown = canvases.filter(visible).sort((a, b) => (b.width * b.height) - (a.width * a.height));
  const interactive = Array.from(document.querySelectorAll(
    'button, a[href], input, select, textarea, [role="button"], [onclick], [tabindex]:not([tabindex="-1"])'
  )).filter((el) => el.tagName !== 'CANVAS' && visible(el));
  const markers = {markers}.filter((sel) => {{
    try {{ return document.querySelector(sel) !== null; }} catch (e) {{ return false; }}
  }});
  return {{
    canvas_count: canvases.length,
    primary_canvas: shown.length > 0 ? rect(shown[0]) : null,
    interactive_count: interactive.length,
    markers,
  }};
}})()"#
    )
}
