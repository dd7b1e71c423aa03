//! Interaction dispatch
//!
//! Input is routed through a [`DispatchTarget`] chosen once per session from
//! the detector's classification:
//!
//! - `Canvas`: focus the primary canvas, then send trusted key/mouse events;
//!   points are relative to the canvas.
//! - `Element`: synthesize DOM keyboard events on the focused element (they
//!   bubble to document/window listeners); points are viewport coordinates.
//! - `Window`: trusted events with no focus change.

use gameqa_common::{config::InteractionConfig, CaptureContext, GameType, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::detector::{Classification, Rect};
use crate::driver::KeyStroke;
use crate::evidence::EvidenceCollector;
use crate::schema::{ActionStep, InteractionSchema};
use crate::session::AutomationSession;

/// Keys sent by the standard plan: directions first, then actions
pub const STANDARD_PLAN_KEYS: &[&str] = &[
    "ArrowUp", "ArrowRight", "ArrowDown", "ArrowLeft", "Space", "Enter", "w", "a", "s", "d",
];

/// Where a click lands
#[derive(Debug, Clone, PartialEq)]
pub enum ClickAt {
    Selector(String),
    /// Relative to the canvas for canvas targets, otherwise to the viewport
    Point { x: f64, y: f64 },
}

/// Focus the canvas and make sure it can receive keyboard focus
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasTarget {
    pub rect: Rect,
}

/// Dispatch to the focused DOM element
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementTarget;

/// Dispatch to the window
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowTarget;

/// Input routing chosen once per session
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchTarget {
    Canvas(CanvasTarget),
    Element(ElementTarget),
    Window(WindowTarget),
}

impl DispatchTarget {
    /// Pick the target for a classified page
    pub fn for_classification(classification: &Classification) -> Self {
        match (classification.game_type, classification.primary_canvas) {
            (GameType::Canvas | GameType::Hybrid, Some(rect)) => {
                DispatchTarget::Canvas(CanvasTarget { rect })
            }
            (GameType::Canvas, None) => DispatchTarget::Window(WindowTarget),
            (GameType::Hybrid | GameType::Dom, _) => DispatchTarget::Element(ElementTarget),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DispatchTarget::Canvas(_) => "canvas",
            DispatchTarget::Element(_) => "element",
            DispatchTarget::Window(_) => "window",
        }
    }

    /// Press `key`; returns whether a plausible receiver was found
    pub async fn dispatch_key(&self, session: &AutomationSession, key: &KeyStroke) -> Result<bool> {
        match self {
            DispatchTarget::Canvas(t) => t.key(session, key).await,
            DispatchTarget::Element(t) => t.key(session, key).await,
            DispatchTarget::Window(t) => t.key(session, key).await,
        }
    }

    /// Click; returns whether a plausible receiver was found
    pub async fn dispatch_click(&self, session: &AutomationSession, at: &ClickAt) -> Result<bool> {
        if let ClickAt::Selector(selector) = at {
            return click_selector(session, selector).await;
        }
        match self {
            DispatchTarget::Canvas(t) => t.click(session, at).await,
            DispatchTarget::Element(t) => t.click(session, at).await,
            DispatchTarget::Window(t) => t.click(session, at).await,
        }
    }
}

impl CanvasTarget {
    async fn key(&self, session: &AutomationSession, key: &KeyStroke) -> Result<bool> {
        let page = session.page()?;
        let focused = page.evaluate(FOCUS_CANVAS_SCRIPT).await?.as_bool().unwrap_or(false);
        if !focused {
            return Ok(false);
        }
        page.key_press(key).await?;
        Ok(true)
    }

    async fn click(&self, session: &AutomationSession, at: &ClickAt) -> Result<bool> {
        let (x, y) = match at {
            ClickAt::Point { x, y } => (self.rect.x + x, self.rect.y + y),
            ClickAt::Selector(_) => self.rect.center(),
        };
        session.page()?.mouse_click(x, y).await?;
        Ok(true)
    }
}

impl ElementTarget {
    async fn key(&self, session: &AutomationSession, key: &KeyStroke) -> Result<bool> {
        let script = synthetic_key_script(key);
        let delivered = session.page()?.evaluate(&script).await?;
        Ok(delivered.as_bool().unwrap_or(false))
    }

    async fn click(&self, session: &AutomationSession, at: &ClickAt) -> Result<bool> {
        let ClickAt::Point { x, y } = at else {
            return Ok(false);
        };
        let page = session.page()?;
        let hit = page
            .evaluate(&format!("document.elementFromPoint({}, {}) !== null", x, y))
            .await?
            .as_bool()
            .unwrap_or(false);
        if hit {
            page.mouse_click(*x, *y).await?;
        }
        Ok(hit)
    }
}

impl WindowTarget {
    async fn key(&self, session: &AutomationSession, key: &KeyStroke) -> Result<bool> {
        session.page()?.key_press(key).await?;
        Ok(true)
    }

    async fn click(&self, session: &AutomationSession, at: &ClickAt) -> Result<bool> {
        let ClickAt::Point { x, y } = at else {
            return Ok(false);
        };
        session.page()?.mouse_click(*x, *y).await?;
        Ok(true)
    }
}

const FOCUS_CANVAS_SCRIPT: &str = r#"(() => {
  const canvases = Array.from(document.querySelectorAll('canvas'));
  if (canvases.length === 0) return false;
  const c = canvases.sort((a, b) => (b.width * b.height) - (a.width * a.height))[0];
  if (!c.hasAttribute('tabindex')) c.setAttribute('tabindex', '0');
  c.focus();
  return true;
})()"#;

fn synthetic_key_script(key: &KeyStroke) -> String {
    let init = serde_json::json!({
        "key": key.key,
        "code": key.code,
        "keyCode": key.key_code,
        "which": key.key_code,
        "bubbles": true,
        "cancelable": true,
    });
    format!(
        r#"(() => {{
  const target = document.activeElement || document.body;
  if (!target) return false;
  const init = {init};
  target.dispatchEvent(new KeyboardEvent('keydown', init));
  target.dispatchEvent(new KeyboardEvent('keyup', init));
  return true;
}})()"#
    )
}

/// Resolve a selector to a visible element and click its center
async fn click_selector(session: &AutomationSession, selector: &str) -> Result<bool> {
    let selector_json = serde_json::to_string(selector)?;
    let script = format!(
        r#"(() => {{
  let el;
  try {{ el = document.querySelector({selector_json}); }} catch (e) {{ return null; }}
  if (!el || el.getClientRects().length === 0) return null;
  el.scrollIntoView({{ block: 'center', inline: 'center' }});
  const r = el.getBoundingClientRect();
  if (r.width === 0 || r.height === 0) return null;
  return {{ x: r.x, y: r.y, width: r.width, height: r.height }};
}})()"#
    );
    let page = session.page()?;
    let value = page.evaluate(&script).await?;
    let Ok(rect) = serde_json::from_value::<Rect>(value) else {
        return Ok(false);
    };
    let (x, y) = rect.center();
    page.mouse_click(x, y).await?;
    Ok(true)
}

// ============================================================================
// Key table
// ============================================================================

/// Translate a key name into DOM key/code/keyCode values.
///
/// Accepts DOM key names (`ArrowUp`, `Enter`, `a`), DOM codes (`KeyA`,
/// `Digit1`) and a few aliases (`up`, `space`, `esc`).
pub fn key_stroke(name: &str) -> Option<KeyStroke> {
    let special = |key: &str, code: &str, key_code: u32, text: Option<&str>| KeyStroke {
        key: key.to_string(),
        code: code.to_string(),
        key_code,
        text: text.map(str::to_string),
    };

    let lowered = name.trim().to_ascii_lowercase();
    let stroke = match lowered.as_str() {
        "arrowup" | "up" => special("ArrowUp", "ArrowUp", 38, None),
        "arrowdown" | "down" => special("ArrowDown", "ArrowDown", 40, None),
        "arrowleft" | "left" => special("ArrowLeft", "ArrowLeft", 37, None),
        "arrowright" | "right" => special("ArrowRight", "ArrowRight", 39, None),
        "space" | "spacebar" => special(" ", "Space", 32, Some(" ")),
        "enter" | "return" => special("Enter", "Enter", 13, Some("\r")),
        "escape" | "esc" => special("Escape", "Escape", 27, None),
        "tab" => special("Tab", "Tab", 9, None),
        "shift" => special("Shift", "ShiftLeft", 16, None),
        "control" | "ctrl" => special("Control", "ControlLeft", 17, None),
        _ => {
            let raw = name.trim();
            let ch = (if raw.chars().count() == 1 {
                raw.chars().next()
            } else if let Some(rest) = raw.strip_prefix("Key").filter(|r| r.len() == 1) {
                rest.chars().next().map(|c| c.to_ascii_lowercase())
            } else if let Some(rest) = raw.strip_prefix("Digit").filter(|r| r.len() == 1) {
                rest.chars().next()
            } else {
                None
            })?;

            if ch.is_ascii_alphabetic() {
                let upper = ch.to_ascii_uppercase();
                KeyStroke {
                    key: ch.to_string(),
                    code: format!("Key{}", upper),
                    key_code: upper as u32,
                    text: Some(ch.to_string()),
                }
            } else if ch.is_ascii_digit() {
                KeyStroke {
                    key: ch.to_string(),
                    code: format!("Digit{}", ch),
                    key_code: ch as u32,
                    text: Some(ch.to_string()),
                }
            } else {
                return None;
            }
        }
    };
    Some(stroke)
}

// ============================================================================
// Entry control discovery
// ============================================================================

/// Start/play affordance vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct EntryVocabulary {
    pub exact: Vec<String>,
    pub substrings: Vec<String>,
}

impl EntryVocabulary {
    pub fn from_config(config: &InteractionConfig) -> Self {
        Self {
            exact: config.entry_exact.iter().map(|s| normalize_text(s)).collect(),
            substrings: config.entry_substrings.iter().map(|s| normalize_text(s)).collect(),
        }
    }
}

impl Default for EntryVocabulary {
    fn default() -> Self {
        Self::from_config(&InteractionConfig::default())
    }
}

/// An interactive element reported by the page
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ElementInfo {
    /// Index assigned by the candidate scan
    pub index: usize,
    pub tag: String,
    pub text: String,
    /// Participates in layout
    pub visible: bool,
    #[serde(default)]
    pub rect: Option<Rect>,
}

impl ElementInfo {
    pub fn selector(&self) -> String {
        format!("[{}=\"{}\"]", CANDIDATE_ATTR, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Substring,
}

/// Outcome of entry-control discovery
#[derive(Debug, Clone, PartialEq)]
pub enum EntryControl {
    Element { element: ElementInfo, kind: MatchKind },
    /// No matching element; click the primary canvas instead
    CanvasFallback(Rect),
    NotFound,
}

impl EntryControl {
    pub fn is_match(&self) -> bool {
        matches!(self, EntryControl::Element { .. })
    }

    pub fn describe(&self) -> Option<String> {
        match self {
            EntryControl::Element { element, .. } => {
                Some(format!("<{}> \"{}\"", element.tag, element.text))
            }
            EntryControl::CanvasFallback(_) => Some("canvas".to_string()),
            EntryControl::NotFound => None,
        }
    }
}

const CANDIDATE_ATTR: &str = "data-gameqa-candidate";

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Pick the entry control among candidates: visible elements only, exact
/// text matches before substring matches, document order within each pass.
pub fn match_entry_control<'a>(
    candidates: &'a [ElementInfo],
    vocabulary: &EntryVocabulary,
) -> Option<(&'a ElementInfo, MatchKind)> {
    let visible = || candidates.iter().filter(|c| c.visible);

    let exact = visible().find(|c| {
        let text = normalize_text(&c.text);
        vocabulary.exact.iter().any(|word| *word == text)
    });
    if let Some(el) = exact {
        return Some((el, MatchKind::Exact));
    }

    visible()
        .find(|c| {
            let text = normalize_text(&c.text);
            !text.is_empty() && vocabulary.substrings.iter().any(|word| text.contains(word.as_str()))
        })
        .map(|el| (el, MatchKind::Substring))
}

/// Resolve a match (or its absence) into the entry-control policy
pub fn resolve_entry_control(
    candidates: &[ElementInfo],
    vocabulary: &EntryVocabulary,
    primary_canvas: Option<Rect>,
) -> EntryControl {
    match match_entry_control(candidates, vocabulary) {
        Some((element, kind)) => EntryControl::Element {
            element: element.clone(),
            kind,
        },
        None => match primary_canvas {
            Some(rect) => EntryControl::CanvasFallback(rect),
            None => EntryControl::NotFound,
        },
    }
}

const CANDIDATE_SCAN_SCRIPT: &str = r#"(() => {
  const nodes = Array.from(document.querySelectorAll(
    'button, a, input[type="button"], input[type="submit"], [role="button"], [onclick], [tabindex]'
  ));
  return nodes.map((el, index) => {
    el.setAttribute('data-gameqa-candidate', String(index));
    const style = window.getComputedStyle(el);
    const r = el.getBoundingClientRect();
    const visible = el.getClientRects().length > 0 && style.visibility !== 'hidden'
      && r.width > 0 && r.height > 0;
    const text = (el.innerText || el.value || el.getAttribute('aria-label') || el.title || '').trim();
    return {
      index,
      tag: el.tagName.toLowerCase(),
      text: text.slice(0, 80),
      visible,
      rect: visible ? { x: r.x, y: r.y, width: r.width, height: r.height } : null,
    };
  });
})()"#;

/// Scan interactive elements on the page
pub async fn scan_candidates(session: &AutomationSession) -> Result<Vec<ElementInfo>> {
    let value = session.page()?.evaluate(CANDIDATE_SCAN_SCRIPT).await?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Locate the start/play control
pub async fn find_entry_control(
    session: &AutomationSession,
    vocabulary: &EntryVocabulary,
    primary_canvas: Option<Rect>,
) -> Result<EntryControl> {
    let candidates = scan_candidates(session).await?;
    let entry = resolve_entry_control(&candidates, vocabulary, primary_canvas);
    debug!(candidates = candidates.len(), "Entry control: {:?}", entry.describe());
    Ok(entry)
}

/// Click the entry control; `NotFound` is a no-op
pub async fn activate_entry_control(
    session: &AutomationSession,
    target: &DispatchTarget,
    entry: &EntryControl,
) -> Result<bool> {
    match entry {
        EntryControl::Element { element, .. } => {
            target
                .dispatch_click(session, &ClickAt::Selector(element.selector()))
                .await
        }
        EntryControl::CanvasFallback(rect) => {
            let (x, y) = rect.center();
            session.page()?.mouse_click(x, y).await?;
            Ok(true)
        }
        EntryControl::NotFound => Ok(false),
    }
}

// ============================================================================
// Interaction plans
// ============================================================================

/// Fixed probe plan: each key followed by a short wait, with screenshots
/// after the directional and the action phases.
pub fn standard_plan(config: &InteractionConfig) -> Vec<ActionStep> {
    plan_for_keys(STANDARD_PLAN_KEYS.iter().map(|k| k.to_string()), config)
}

fn plan_for_keys(keys: impl IntoIterator<Item = String>, config: &InteractionConfig) -> Vec<ActionStep> {
    let keys: Vec<String> = keys.into_iter().collect();
    let midpoint = keys.len() / 2;
    let mut plan = Vec::with_capacity(keys.len() * 2 + 2);
    for (i, key) in keys.into_iter().enumerate() {
        plan.push(ActionStep::Press { key });
        plan.push(ActionStep::Wait { ms: config.step_wait_ms });
        if i + 1 == midpoint {
            plan.push(ActionStep::Screenshot);
        }
    }
    plan.push(ActionStep::Screenshot);
    plan
}

/// Plan for a job: explicit schema steps, then schema key bindings, then the
/// standard plan. Returns warnings for bindings that cannot be sent.
pub fn plan_for(schema: Option<&InteractionSchema>, config: &InteractionConfig) -> (Vec<ActionStep>, Vec<String>) {
    let Some(schema) = schema else {
        return (standard_plan(config), Vec::new());
    };
    if !schema.steps.is_empty() {
        return (schema.steps.clone(), Vec::new());
    }
    let (known, unknown) = schema.bound_keys();
    let warnings = unknown
        .into_iter()
        .map(|k| format!("Unsupported key in interaction schema: {}", k))
        .collect();
    if known.is_empty() {
        (standard_plan(config), warnings)
    } else {
        (plan_for_keys(known, config), warnings)
    }
}

/// Counters from executing a plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanOutcome {
    pub steps_executed: usize,
    pub keys_delivered: usize,
    pub clicks_delivered: usize,
    pub screenshots: usize,
    pub timed_out: bool,
    pub warnings: Vec<String>,
}

/// Execute `plan` against the session, time-boxed to `budget`.
///
/// Running out of budget stops the plan early without an error; session
/// errors (crash, cancellation) propagate.
pub async fn execute_plan(
    session: &AutomationSession,
    target: &DispatchTarget,
    collector: &EvidenceCollector,
    plan: &[ActionStep],
    budget: Duration,
) -> Result<PlanOutcome> {
    let mut outcome = PlanOutcome::default();
    let deadline = tokio::time::Instant::now() + budget;

    for step in plan {
        if tokio::time::Instant::now() >= deadline {
            outcome.timed_out = true;
            break;
        }
        debug!(target = target.name(), "Plan step {}", step.label());

        match step {
            ActionStep::Press { key } => match key_stroke(key) {
                Some(stroke) => {
                    if target.dispatch_key(session, &stroke).await? {
                        outcome.keys_delivered += 1;
                    } else {
                        outcome.warnings.push(format!("No receiver for key {}", key));
                    }
                }
                None => outcome.warnings.push(format!("Unsupported key: {}", key)),
            },
            ActionStep::Click { selector, x, y } => {
                let at = match (selector, x, y) {
                    (Some(sel), _, _) => ClickAt::Selector(sel.clone()),
                    (None, Some(x), Some(y)) => ClickAt::Point { x: *x, y: *y },
                    _ => {
                        outcome.warnings.push("Click step without a target".to_string());
                        continue;
                    }
                };
                if target.dispatch_click(session, &at).await? {
                    outcome.clicks_delivered += 1;
                } else {
                    outcome.warnings.push(format!("No receiver for {}", step.label()));
                }
            }
            ActionStep::Wait { ms } => {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                let wait = Duration::from_millis(*ms).min(remaining);
                session.pause(wait).await?;
            }
            ActionStep::Screenshot => {
                if collector
                    .capture_screenshot(session, CaptureContext::PostInteraction)
                    .await
                    .is_some()
                {
                    outcome.screenshots += 1;
                }
            }
        }
        outcome.steps_executed += 1;
    }

    if outcome.timed_out {
        warn!(
            "Interaction plan stopped after {} of {} steps (budget {:?})",
            outcome.steps_executed,
            plan.len(),
            budget
        );
        outcome
            .warnings
            .push(format!("Interaction plan exceeded its {:?} budget", budget));
    } else {
        info!(
            keys = outcome.keys_delivered,
            clicks = outcome.clicks_delivered,
            "Interaction plan finished"
        );
    }
    Ok(outcome)
}
