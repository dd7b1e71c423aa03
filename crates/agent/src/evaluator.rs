//! Playability evaluation
//!
//! The [`Evaluator`] selects a bounded set of screenshots and a condensed log
//! summary, asks a [`ScoringService`] for a five-dimension score and applies
//! the retry policy. When every attempt fails it falls back to a heuristic
//! score derived from the evidence, so a job always ends up with a score.

use async_trait::async_trait;
use bytes::Bytes;
use gameqa_common::{
    config::ScoringConfig, CaptureContext, Error, Evidence, GameType, LogLevel, PlayabilityScore,
    Result, Screenshot,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::visual;

/// Distinct log messages included in a summary
const LOG_SUMMARY_LINES: usize = 20;

/// Longest log message included in a summary
const LOG_MESSAGE_CHARS: usize = 200;

/// Failure reported by a scoring service
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum ScoringError {
    /// Timeouts, rate limiting, server errors
    #[error("transient scoring failure: {0}")]
    Transient(String),

    /// The service refused the request as malformed
    #[error("scoring request rejected: {0}")]
    Rejected(String),

    /// The response could not be read as a score
    #[error("scoring response does not match the score schema: {0}")]
    Schema(String),
}

impl ScoringError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScoringError::Transient(_))
    }
}

/// Screenshot sent to the scoring service
#[derive(Debug, Clone)]
pub struct ScoringImage {
    pub context: CaptureContext,
    pub data: Bytes,
}

/// Everything the scoring service receives for one evaluation
#[derive(Debug, Clone)]
pub struct ScoringRequest {
    pub url: String,
    pub game_type: Option<GameType>,
    pub images: Vec<ScoringImage>,
    pub log_summary: String,
    pub prompt: String,
}

/// Vision-capable scoring backend. Returns the raw response text.
#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn score(&self, request: &ScoringRequest) -> std::result::Result<String, ScoringError>;
}

/// What the evaluator knows about the job besides its evidence
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub url: String,
    pub game_type: Option<GameType>,
    /// Free-text description from the interaction schema
    pub description: Option<String>,
}

/// Outcome of an evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: PlayabilityScore,
    /// Calls made to the scoring service
    pub attempts: u32,
    /// Last scoring failure when the score is degraded
    pub failure: Option<String>,
}

impl Evaluation {
    pub fn is_degraded(&self) -> bool {
        self.score.degraded
    }
}

/// Applies the retry and fallback policy around a [`ScoringService`]
#[derive(Clone)]
pub struct Evaluator {
    service: Arc<dyn ScoringService>,
    config: ScoringConfig,
}

impl Evaluator {
    pub fn new(service: Arc<dyn ScoringService>, config: ScoringConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score `evidence`.
    ///
    /// Transient failures are retried with linear backoff; other failures
    /// stop immediately. Exhausting the attempts yields a degraded score, so
    /// the only error is cancellation.
    pub async fn evaluate(
        &self,
        context: &EvaluationContext,
        evidence: &Evidence,
        cancel: &CancellationToken,
    ) -> Result<Evaluation> {
        if evidence.screenshots.is_empty() {
            let reason = "no screenshots to evaluate".to_string();
            warn!("Skipping scoring service: {}", reason);
            return Ok(Evaluation {
                score: degraded_score(evidence, &self.config, &reason),
                attempts: 0,
                failure: Some(reason),
            });
        }

        let request = self.build_request(context, evidence);
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let call = tokio::time::timeout(self.config.request_timeout(), self.service.score(&request));
            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled("evaluation cancelled".to_string()));
                }
                response = call => response,
            };

            let result = match response {
                Ok(result) => result,
                Err(_) => Err(ScoringError::Transient(format!(
                    "no response within {:?}",
                    self.config.request_timeout()
                ))),
            };

            match result.and_then(|text| parse_score(&text)) {
                Ok(score) => {
                    info!(
                        attempt,
                        overall = score.overall,
                        confidence = score.confidence,
                        "Playability scored"
                    );
                    return Ok(Evaluation {
                        score,
                        attempts,
                        failure: None,
                    });
                }
                Err(e) => {
                    warn!("Scoring attempt {}/{} failed: {}", attempt, max_attempts, e);
                    let retry = e.is_retryable() && attempt < max_attempts;
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                    let delay = self.config.retry_delay(attempt);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(Error::Cancelled("evaluation cancelled".to_string()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "scoring service unavailable".to_string());
        warn!(
            "{}",
            Error::EvaluatorFailure(format!("{} after {} attempt(s); using heuristic score", reason, attempts))
        );
        Ok(Evaluation {
            score: degraded_score(evidence, &self.config, &reason),
            attempts,
            failure: Some(reason),
        })
    }

    /// Build the request sent to the scoring service
    pub fn build_request(&self, context: &EvaluationContext, evidence: &Evidence) -> ScoringRequest {
        let images = select_screenshots(&evidence.screenshots, self.config.max_images)
            .into_iter()
            .map(|shot| ScoringImage {
                context: shot.context,
                data: shot.data.clone(),
            })
            .collect();
        let log_summary = summarize_logs(evidence);
        ScoringRequest {
            url: context.url.clone(),
            game_type: context.game_type,
            prompt: build_prompt(context, &log_summary),
            images,
            log_summary,
        }
    }
}

/// Pick at most `max` screenshots: the initial frame, the final frame and
/// error frames first, then the remaining frames in capture order. The
/// selection is returned in capture order.
pub fn select_screenshots(shots: &[Screenshot], max: usize) -> Vec<&Screenshot> {
    if shots.len() <= max {
        return shots.iter().collect();
    }

    let mut priority: Vec<usize> = Vec::with_capacity(shots.len());
    let initial = shots
        .iter()
        .position(|s| s.context == CaptureContext::Initial)
        .unwrap_or(0);
    let last = shots
        .iter()
        .rposition(|s| s.context == CaptureContext::Final)
        .unwrap_or(shots.len() - 1);
    priority.push(initial);
    priority.push(last);
    priority.extend(
        shots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.context == CaptureContext::Error)
            .map(|(i, _)| i),
    );
    priority.extend(0..shots.len());

    let mut chosen: Vec<usize> = Vec::with_capacity(max);
    for index in priority {
        if chosen.len() == max {
            break;
        }
        if !chosen.contains(&index) {
            chosen.push(index);
        }
    }
    chosen.sort_unstable();
    chosen.into_iter().map(|i| &shots[i]).collect()
}

/// Condense console output into a few lines: counts, then distinct error and
/// warning messages
pub fn summarize_logs(evidence: &Evidence) -> String {
    let mut lines = vec![format!(
        "console: {} entries, {} errors, {} warnings",
        evidence.logs.len(),
        evidence.error_count(),
        evidence.warning_count()
    )];

    let mut seen: Vec<&str> = Vec::new();
    for entry in evidence
        .logs
        .iter()
        .filter(|l| matches!(l.level, LogLevel::Error | LogLevel::Warning))
    {
        if seen.len() == LOG_SUMMARY_LINES {
            break;
        }
        if seen.contains(&entry.message.as_str()) {
            continue;
        }
        seen.push(&entry.message);

        let message: String = entry.message.chars().take(LOG_MESSAGE_CHARS).collect();
        let level = if entry.level == LogLevel::Error { "error" } else { "warning" };
        match &entry.source {
            Some(source) => lines.push(format!("[{}] {} ({})", level, message, source)),
            None => lines.push(format!("[{}] {}", level, message)),
        }
    }
    lines.join("\n")
}

fn build_prompt(context: &EvaluationContext, log_summary: &str) -> String {
    let mut prompt = format!(
        "You are reviewing screenshots of a browser game at {} to judge whether it is playable.\n",
        context.url
    );
    if let Some(game_type) = context.game_type {
        prompt.push_str(&format!("Rendering: {}.\n", game_type));
    }
    if let Some(description) = &context.description {
        prompt.push_str(&format!("Controls and description: {}\n", description));
    }
    prompt.push_str("Console summary:\n");
    prompt.push_str(log_summary);
    prompt.push_str(
        "\n\nRespond with a single JSON object with integer fields overall, interactivity, \
         visual_quality, error_severity (0 = no errors, 100 = unusable) and confidence, each \
         between 0 and 100, a reasoning string, and issues and recommendations as arrays of strings.",
    );
    prompt
}

/// Parse a scoring response into a score.
///
/// The JSON object may be wrapped in prose or a code fence and may nest the
/// dimensions under `score`. Missing or out-of-range dimensions are schema
/// violations.
pub fn parse_score(text: &str) -> std::result::Result<PlayabilityScore, ScoringError> {
    let start = text
        .find('{')
        .ok_or_else(|| ScoringError::Schema("no JSON object in response".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ScoringError::Schema("unterminated JSON object".to_string()))?;

    let mut value: Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| ScoringError::Schema(e.to_string()))?;
    if let Some(inner) = value.get("score").filter(|v| v.is_object()).cloned() {
        value = inner;
    }

    Ok(PlayabilityScore {
        overall: dimension(&value, &["overall", "overall_score", "playability"])?,
        interactivity: dimension(&value, &["interactivity", "interactivity_score"])?,
        visual_quality: dimension(&value, &["visual_quality", "visual", "visual_quality_score"])?,
        error_severity: dimension(&value, &["error_severity", "errors", "error_severity_score"])?,
        confidence: dimension(&value, &["confidence"])?,
        reasoning: value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        issues: string_list(&value, "issues"),
        recommendations: string_list(&value, "recommendations"),
        degraded: false,
    })
}

fn dimension(value: &Value, names: &[&str]) -> std::result::Result<u8, ScoringError> {
    let raw = names
        .iter()
        .find_map(|name| value.get(*name))
        .ok_or_else(|| ScoringError::Schema(format!("missing field {}", names[0])))?;
    let number = raw
        .as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .ok_or_else(|| ScoringError::Schema(format!("{} is not a number", names[0])))?;
    if !(0.0..=100.0).contains(&number) {
        return Err(ScoringError::Schema(format!(
            "{} out of range: {}",
            names[0], number
        )));
    }
    Ok(number.round() as u8)
}

fn string_list(value: &Value, name: &str) -> Vec<String> {
    value
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Heuristic score from console errors and whether the screen changed
/// between the first and last screenshot. Confidence stays below the
/// low-confidence threshold.
pub fn degraded_score(evidence: &Evidence, config: &ScoringConfig, reason: &str) -> PlayabilityScore {
    let errors = evidence.error_count();
    let change = visual::first_to_last(&evidence.screenshots).map(|d| d.changed);

    let interactivity: u8 = match change {
        Some(true) => 60,
        Some(false) => 20,
        None => 10,
    };
    let visual_quality: u8 = match (evidence.screenshots.is_empty(), change) {
        (true, _) => 0,
        (false, Some(true)) => 55,
        (false, _) => 40,
    };
    let error_severity = (errors * 20).min(100) as u8;
    let overall = ((interactivity as u32 + visual_quality as u32 + (100 - error_severity) as u32) / 3) as u8;

    let mut issues = Vec::new();
    if errors > 0 {
        issues.push(format!("{} console error(s) during the session", errors));
    }
    match change {
        Some(false) => issues.push("No visible change between first and last screenshot".to_string()),
        None => issues.push("Not enough screenshots to detect visible change".to_string()),
        Some(true) => {}
    }

    PlayabilityScore {
        overall,
        interactivity,
        visual_quality,
        error_severity,
        confidence: config
            .degraded_confidence
            .min(config.low_confidence_threshold.saturating_sub(1)),
        reasoning: format!(
            "Heuristic score; the scoring service was unavailable ({}).",
            reason
        ),
        issues,
        recommendations: vec!["Re-run the test once the scoring service is reachable".to_string()],
        degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gameqa_common::{ArtifactRef, LogEntry};

    fn shot(context: CaptureContext, data: &[u8]) -> Screenshot {
        Screenshot {
            context,
            captured_at: Utc::now(),
            artifact: ArtifactRef::for_bytes(data),
            width: 10,
            height: 10,
            data: Bytes::copy_from_slice(data),
        }
    }

    fn error_log(message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Error,
            source: None,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let text = r#"{"overall": 72, "interactivity": 80, "visual_quality": 65.4,
            "error_severity": 10, "confidence": 88, "reasoning": "Responds to input",
            "issues": ["slow start"], "recommendations": []}"#;
        let score = parse_score(text).unwrap();
        assert_eq!(score.overall, 72);
        assert_eq!(score.visual_quality, 65);
        assert_eq!(score.issues, vec!["slow start".to_string()]);
        assert!(!score.degraded);
    }

    #[test]
    fn test_parse_wrapped_and_nested() {
        let text = "Here you go:\n```json\n{\"score\": {\"overall\": \"50\", \"interactivity\": 40, \
                    \"visual\": 60, \"errors\": 0, \"confidence\": 70}}\n```";
        let score = parse_score(text).unwrap();
        assert_eq!(score.overall, 50);
        assert_eq!(score.visual_quality, 60);
        assert_eq!(score.reasoning, "");
    }

    #[test]
    fn test_parse_rejects_schema_violations() {
        assert!(matches!(parse_score("no json here"), Err(ScoringError::Schema(_))));
        assert!(matches!(
            parse_score(r#"{"overall": 101, "interactivity": 1, "visual_quality": 1, "error_severity": 1, "confidence": 1}"#),
            Err(ScoringError::Schema(_))
        ));
        assert!(matches!(parse_score(r#"{"overall": 10}"#), Err(ScoringError::Schema(_))));
        assert!(!ScoringError::Schema(String::new()).is_retryable());
        assert!(ScoringError::Transient(String::new()).is_retryable());
    }

    #[test]
    fn test_select_prioritises_initial_error_final() {
        let shots: Vec<Screenshot> = vec![
            shot(CaptureContext::Initial, b"0"),
            shot(CaptureContext::PostInteraction, b"1"),
            shot(CaptureContext::PostInteraction, b"2"),
            shot(CaptureContext::Error, b"3"),
            shot(CaptureContext::PostInteraction, b"4"),
            shot(CaptureContext::PostInteraction, b"5"),
            shot(CaptureContext::Final, b"6"),
        ];
        let selected = select_screenshots(&shots, 4);
        let bytes: Vec<&[u8]> = selected.iter().map(|s| s.data.as_ref()).collect();
        assert_eq!(bytes, vec![&b"0"[..], &b"1"[..], &b"3"[..], &b"6"[..]]);
    }

    #[test]
    fn test_select_keeps_everything_under_cap() {
        let shots = vec![shot(CaptureContext::Initial, b"a"), shot(CaptureContext::Final, b"b")];
        assert_eq!(select_screenshots(&shots, 5).len(), 2);
    }

    #[test]
    fn test_log_summary_dedupes() {
        let evidence = Evidence {
            screenshots: vec![],
            logs: vec![error_log("boom"), error_log("boom"), error_log("bang")],
        };
        let summary = summarize_logs(&evidence);
        assert!(summary.starts_with("console: 3 entries, 3 errors"));
        assert_eq!(summary.matches("boom").count(), 1);
        assert!(summary.contains("[error] bang"));
    }

    #[test]
    fn test_degraded_score_heuristics() {
        let config = ScoringConfig::default();
        let evidence = Evidence {
            screenshots: vec![shot(CaptureContext::Initial, b"x"), shot(CaptureContext::Final, b"x")],
            logs: vec![error_log("a"), error_log("b")],
        };
        let score = degraded_score(&evidence, &config, "down");
        assert!(score.degraded);
        assert_eq!(score.interactivity, 20);
        assert_eq!(score.error_severity, 40);
        assert_eq!(score.overall, (20 + 40 + 60) / 3);
        assert!(score.confidence < config.low_confidence_threshold);
    }
}
