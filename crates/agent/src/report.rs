//! Report assembly
//!
//! [`ReportBuilder`] accumulates whatever the pipeline produced, complete or
//! not, and [`ReportBuilder::build`] consumes it into an immutable [`Report`]
//! with a derived [`Summary`].

use chrono::{DateTime, Utc};
use gameqa_common::{
    Evidence, GameType, JobError, PlayabilityScore, Report, ReportMetadata, ReportStatus, Summary,
    Verdict,
};
use std::collections::HashMap;
use std::time::Duration;

use crate::visual;

/// Error severity at or above this is a critical issue
const CRITICAL_ERROR_SEVERITY: u8 = 70;

/// Builder for a job's report
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    job_id: String,
    url: Option<String>,
    evidence: Evidence,
    score: Option<PlayabilityScore>,
    metadata: ReportMetadata,
    artifact_links: HashMap<String, String>,
    pass_threshold: u8,
    low_confidence_threshold: u8,
    incomplete: bool,
}

impl ReportBuilder {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            url: None,
            evidence: Evidence::default(),
            score: None,
            metadata: ReportMetadata::default(),
            artifact_links: HashMap::new(),
            pass_threshold: 50,
            low_confidence_threshold: 30,
            incomplete: false,
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn score(mut self, score: PlayabilityScore) -> Self {
        self.score = Some(score);
        self
    }

    pub fn game_type(mut self, game_type: GameType) -> Self {
        self.metadata.game_type = Some(game_type);
        self
    }

    /// Description of the entry control that was activated
    pub fn entry_control(mut self, description: impl Into<String>) -> Self {
        self.metadata.entry_control = Some(description.into());
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.metadata.started_at = Some(started_at);
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.metadata.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.metadata.headless = headless;
        self
    }

    /// Record the failure that ended the job; the report becomes incomplete
    pub fn error(mut self, error: JobError) -> Self {
        self.metadata.error = Some(error);
        self.incomplete = true;
        self
    }

    pub fn warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.metadata.warnings.extend(warnings);
        self
    }

    /// Uploaded artifact locations keyed by digest
    pub fn artifact_links(mut self, links: HashMap<String, String>) -> Self {
        self.artifact_links = links;
        self
    }

    pub fn pass_threshold(mut self, threshold: u8) -> Self {
        self.pass_threshold = threshold;
        self
    }

    pub fn low_confidence_threshold(mut self, threshold: u8) -> Self {
        self.low_confidence_threshold = threshold;
        self
    }

    /// Produce the report
    pub fn build(self) -> Report {
        let status = if self.incomplete {
            ReportStatus::Incomplete
        } else {
            ReportStatus::Complete
        };
        let evidence = self.evidence.with_links(&self.artifact_links);
        let summary = summarize(
            status,
            &evidence,
            self.score.as_ref(),
            &self.metadata,
            self.pass_threshold,
            self.low_confidence_threshold,
        );

        Report {
            job_id: self.job_id,
            url: self.url.unwrap_or_default(),
            status,
            metadata: self.metadata,
            evidence,
            score: self.score,
            summary,
            created_at: Utc::now(),
        }
    }
}

fn summarize(
    status: ReportStatus,
    evidence: &Evidence,
    score: Option<&PlayabilityScore>,
    metadata: &ReportMetadata,
    pass_threshold: u8,
    low_confidence_threshold: u8,
) -> Summary {
    let mut passed = Vec::new();
    let mut failed = Vec::new();
    let mut check = |ok: bool, name: &str| {
        if ok {
            passed.push(name.to_string());
        } else {
            failed.push(name.to_string());
        }
    };

    let load_failed = metadata.error.as_ref().is_some_and(|e| {
        matches!(
            e.category,
            gameqa_common::ErrorCategory::NavigationTimeout | gameqa_common::ErrorCategory::SessionCrash
        )
    });
    let errors = evidence.error_count();
    let change = visual::first_to_last(&evidence.screenshots).map(|d| d.changed);

    check(!load_failed && !evidence.screenshots.is_empty(), "page_loaded");
    check(!evidence.screenshots.is_empty(), "screenshots_captured");
    check(errors == 0, "no_console_errors");
    check(metadata.entry_control.is_some(), "entry_control_found");
    check(change == Some(true), "visible_change_after_interaction");
    check(score.is_some_and(|s| !s.degraded), "scored_by_evaluator");
    check(status == ReportStatus::Complete, "test_completed");

    let mut critical = Vec::new();
    if let Some(error) = &metadata.error {
        critical.push(format!("{}: {}", error.category, error.message));
    }
    if let Some(score) = score {
        if score.error_severity >= CRITICAL_ERROR_SEVERITY {
            critical.push(format!("Severe runtime errors (severity {})", score.error_severity));
        }
        if score.confidence < low_confidence_threshold {
            critical.push(format!("Low confidence score ({})", score.confidence));
        }
    }
    if errors > 0 && score.is_none() {
        critical.push(format!("{} console error(s) recorded", errors));
    }

    let verdict = match score {
        Some(score)
            if status == ReportStatus::Complete
                && metadata.error.is_none()
                && score.overall >= pass_threshold =>
        {
            Verdict::Pass
        }
        _ => Verdict::Fail,
    };

    Summary {
        verdict,
        passed_checks: passed,
        failed_checks: failed,
        critical_issues: critical,
    }
}
