//! Core types for GameQA

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::ErrorCategory;

// ============================================================================
// Requests and jobs
// ============================================================================

/// Rendering model of the page under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Canvas,
    Dom,
    Hybrid,
}

impl std::fmt::Display for GameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameType::Canvas => write!(f, "canvas"),
            GameType::Dom => write!(f, "dom"),
            GameType::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for GameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "canvas" => Ok(GameType::Canvas),
            "dom" => Ok(GameType::Dom),
            "hybrid" => Ok(GameType::Hybrid),
            other => Err(format!("unknown game type: {}", other)),
        }
    }
}

/// A test request as supplied by the intake layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestRequest {
    pub url: String,
    /// Job deadline override in seconds
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    #[serde(default)]
    pub headless: Option<bool>,
    /// Explicit game type, bypasses detection
    #[serde(default)]
    pub game_type: Option<GameType>,
    /// Raw interaction schema (JSON or YAML), parsed leniently
    #[serde(default)]
    pub interaction_schema: Option<String>,
}

impl TestRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Resolved configuration a job runs with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub max_duration_secs: u64,
    pub headless: bool,
    pub game_type: Option<GameType>,
    pub interaction_schema: Option<String>,
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Fixed progress checkpoints of the test pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    Queued,
    SessionInit,
    Navigation,
    EvidenceBaseline,
    Interaction,
    EvidenceFinalize,
    Evaluation,
    ReportAssembly,
    Finished,
}

impl Milestone {
    pub fn progress(&self) -> u8 {
        match self {
            Milestone::Queued => 0,
            Milestone::SessionInit => 10,
            Milestone::Navigation => 20,
            Milestone::EvidenceBaseline => 35,
            Milestone::Interaction => 50,
            Milestone::EvidenceFinalize => 70,
            Milestone::Evaluation => 80,
            Milestone::ReportAssembly => 95,
            Milestone::Finished => 100,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Milestone::Queued => "Waiting for a browser slot",
            Milestone::SessionInit => "Launching browser",
            Milestone::Navigation => "Loading game page",
            Milestone::EvidenceBaseline => "Capturing initial state",
            Milestone::Interaction => "Interacting with game",
            Milestone::EvidenceFinalize => "Capturing final state",
            Milestone::Evaluation => "Evaluating playability",
            Milestone::ReportAssembly => "Assembling report",
            Milestone::Finished => "Test finished",
        }
    }
}

/// Error recorded on a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&crate::Error> for JobError {
    fn from(e: &crate::Error) -> Self {
        Self {
            category: e.category(),
            message: e.to_string(),
        }
    }
}

/// One end-to-end test run against a single URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub config: JobConfig,
    pub status: JobStatus,
    /// 0-100, never decreases
    pub progress: u8,
    pub message: String,
    #[serde(default)]
    pub error: Option<JobError>,
    #[serde(default)]
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub report: Option<Report>,
}

impl Job {
    pub fn new(url: String, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url,
            config,
            status: JobStatus::Pending,
            progress: Milestone::Queued.progress(),
            message: Milestone::Queued.message().to_string(),
            error: None,
            batch_id: None,
            created_at: now,
            updated_at: now,
            report: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Aggregate view over a group of jobs submitted together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub job_ids: Vec<String>,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub created_at: DateTime<Utc>,
}

impl BatchJob {
    /// Recompute aggregate counts from child statuses
    pub fn from_children<'a>(
        id: String,
        job_ids: Vec<String>,
        created_at: DateTime<Utc>,
        statuses: impl IntoIterator<Item = &'a JobStatus>,
    ) -> Self {
        let mut batch = Self {
            id,
            total: job_ids.len(),
            job_ids,
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            created_at,
        };
        for status in statuses {
            match status {
                JobStatus::Pending => batch.pending += 1,
                JobStatus::Running => batch.running += 1,
                JobStatus::Completed => batch.completed += 1,
                JobStatus::Failed => batch.failed += 1,
            }
        }
        batch
    }

    pub fn is_finished(&self) -> bool {
        self.completed + self.failed == self.total
    }
}

// ============================================================================
// Evidence
// ============================================================================

/// When a screenshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureContext {
    Initial,
    PostInteraction,
    Final,
    Error,
}

impl std::fmt::Display for CaptureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureContext::Initial => write!(f, "initial"),
            CaptureContext::PostInteraction => write!(f, "post_interaction"),
            CaptureContext::Final => write!(f, "final"),
            CaptureContext::Error => write!(f, "error"),
        }
    }
}

/// Reference to a stored binary artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// SHA-256 of the content, hex encoded
    pub digest: String,
    pub size_bytes: u64,
    /// Resolved location once uploaded
    #[serde(default)]
    pub url: Option<String>,
}

impl ArtifactRef {
    pub fn for_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self {
            digest: hex::encode(hasher.finalize()),
            size_bytes: data.len() as u64,
            url: None,
        }
    }
}

/// A captured viewport image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    pub context: CaptureContext,
    pub captured_at: DateTime<Utc>,
    pub artifact: ArtifactRef,
    pub width: u32,
    pub height: u32,
    /// PNG bytes; not serialized into reports
    #[serde(skip)]
    pub data: Bytes,
}

/// Console log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Map a console API call type (`log`, `warn`, `error`, ...) to a level
    pub fn from_console_type(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "error" | "assert" | "exception" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warning,
            "debug" | "trace" | "verbose" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

/// A console or runtime log event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Source location, e.g. `https://host/app.js:10:4`
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
}

/// Screenshots and logs captured during one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub screenshots: Vec<Screenshot>,
    pub logs: Vec<LogEntry>,
}

impl Evidence {
    pub fn is_empty(&self) -> bool {
        self.screenshots.is_empty() && self.logs.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.logs.iter().filter(|l| l.level == LogLevel::Error).count()
    }

    pub fn warning_count(&self) -> usize {
        self.logs.iter().filter(|l| l.level == LogLevel::Warning).count()
    }

    /// Copy with artifact links filled in from `links` (keyed by digest)
    pub fn with_links(mut self, links: &HashMap<String, String>) -> Self {
        for shot in &mut self.screenshots {
            if let Some(url) = links.get(&shot.artifact.digest) {
                shot.artifact.url = Some(url.clone());
            }
        }
        self
    }
}

// ============================================================================
// Scoring and reports
// ============================================================================

/// Five-dimension playability score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayabilityScore {
    pub overall: u8,
    pub interactivity: u8,
    pub visual_quality: u8,
    /// Lower is better
    pub error_severity: u8,
    pub confidence: u8,
    pub reasoning: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Produced by heuristics instead of the scoring service
    #[serde(default)]
    pub degraded: bool,
}

/// Report completeness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Complete,
    Incomplete,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStatus::Complete => write!(f, "complete"),
            ReportStatus::Incomplete => write!(f, "incomplete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

/// Derived pass/fail summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub verdict: Verdict,
    pub passed_checks: Vec<String>,
    pub failed_checks: Vec<String>,
    pub critical_issues: Vec<String>,
}

/// Run metadata carried by a report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(default)]
    pub game_type: Option<GameType>,
    #[serde(default)]
    pub entry_control: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub error: Option<JobError>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Immutable result of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub job_id: String,
    pub url: String,
    pub status: ReportStatus,
    pub metadata: ReportMetadata,
    pub evidence: Evidence,
    #[serde(default)]
    pub score: Option<PlayabilityScore>,
    pub summary: Summary,
    pub created_at: DateTime<Utc>,
}
