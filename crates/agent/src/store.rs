//! Persistence and artifact storage collaborators
//!
//! The orchestrator hands finished reports to a [`JobStore`] and screenshot
//! bytes to an [`ArtifactStore`]. Failures at this boundary surface as
//! `StorageFailure` and never abort a job.

use async_trait::async_trait;
use gameqa_common::{Error, Report, ReportStatus, Result, Screenshot, Verdict};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Selects reports from a store
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<ReportStatus>,
    pub verdict: Option<Verdict>,
    /// Substring of the target URL
    pub url_contains: Option<String>,
    /// Newest first, at most this many
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, report: &Report) -> bool {
        self.status.map_or(true, |s| report.status == s)
            && self.verdict.map_or(true, |v| report.summary.verdict == v)
            && self
                .url_contains
                .as_deref()
                .map_or(true, |needle| report.url.contains(needle))
    }

    fn apply(&self, mut reports: Vec<Report>) -> Vec<Report> {
        reports.retain(|r| self.matches(r));
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = self.limit {
            reports.truncate(limit);
        }
        reports
    }
}

/// Durable store of finished job reports
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a report; returns once the write is durable
    async fn save_completed_job(&self, report: &Report) -> Result<()>;

    async fn load_job(&self, job_id: &str) -> Result<Report>;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Report>>;
}

/// Blob storage for screenshots
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the screenshot bytes and return a resolvable location
    async fn upload(&self, screenshot: &Screenshot) -> Result<String>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keeps reports in memory
#[derive(Default)]
pub struct MemoryJobStore {
    reports: RwLock<HashMap<String, Report>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.read().is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save_completed_job(&self, report: &Report) -> Result<()> {
        self.reports
            .write()
            .insert(report.job_id.clone(), report.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: &str) -> Result<Report> {
        self.reports
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Report>> {
        let reports = self.reports.read().values().cloned().collect();
        Ok(filter.apply(reports))
    }
}

// ============================================================================
// Filesystem stores
// ============================================================================

/// One JSON file per job under a directory
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &str) -> Result<PathBuf> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidArgument(format!("invalid job id: {}", job_id)));
        }
        Ok(self.dir.join(format!("{}.json", job_id)))
    }
}

fn storage_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::StorageFailure(format!("{}: {}", context, e))
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn save_completed_job(&self, report: &Report) -> Result<()> {
        let path = self.path_for(&report.job_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_err("create reports dir", e))?;

        let content = serde_json::to_vec_pretty(report)?;
        // Write then rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| storage_err("create report file", e))?;
            tokio::io::AsyncWriteExt::write_all(&mut file, &content)
                .await
                .map_err(|e| storage_err("write report", e))?;
            file.sync_all()
                .await
                .map_err(|e| storage_err("sync report", e))?;
        }
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_err("commit report", e))?;

        debug!("Saved report {}", path.display());
        Ok(())
    }

    async fn load_job(&self, job_id: &str) -> Result<Report> {
        let path = self.path_for(job_id)?;
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("job", job_id));
            }
            Err(e) => return Err(storage_err("read report", e)),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Report>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err("list reports", e)),
        };

        let mut reports = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("list reports", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read(&path)
                .await
                .map_err(|e| storage_err("read report", e))?;
            match serde_json::from_slice::<Report>(&content) {
                Ok(report) => reports.push(report),
                Err(e) => debug!("Skipping unreadable report {}: {}", path.display(), e),
            }
        }
        Ok(filter.apply(reports))
    }
}

/// Content-addressed screenshot files, `<digest>.png`
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn upload(&self, screenshot: &Screenshot) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_err("create artifacts dir", e))?;
        let path = self.dir.join(format!("{}.png", screenshot.artifact.digest));
        if tokio::fs::metadata(&path).await.is_err() {
            tokio::fs::write(&path, &screenshot.data)
                .await
                .map_err(|e| storage_err("write artifact", e))?;
        }
        let absolute = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        Ok(format!("file://{}", absolute.display()))
    }
}
