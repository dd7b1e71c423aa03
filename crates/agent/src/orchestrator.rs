//! Test orchestrator
//!
//! Owns the job and batch tables, the concurrency semaphore and one task per
//! job. A job task waits for a browser slot, then runs the pipeline:
//!
//! ```text
//! open session -> start capture -> navigate -> detect -> initial screenshot
//!   -> entry control -> interaction plan -> final screenshot -> close session
//!   -> evaluate -> upload artifacts -> build report -> persist
//! ```
//!
//! The whole pipeline runs under the job deadline. Whatever happens, the
//! session is closed and a report is assembled from the evidence gathered so
//! far before the job reaches its terminal status.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use gameqa_common::{
    BatchJob, CaptureContext, Error, Evidence, GameType, Job, JobConfig, JobError, JobStatus, Milestone,
    PlayabilityScore, QaConfig, Report, Result, TestRequest,
};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::detector::{self, Classification, PageProbe};
use crate::dispatcher::{self, DispatchTarget, EntryControl, EntryVocabulary};
use crate::driver::{BrowserDriver, LaunchOptions};
use crate::evaluator::{EvaluationContext, Evaluator, ScoringService};
use crate::evidence::EvidenceCollector;
use crate::report::ReportBuilder;
use crate::schema::{InteractionSchema, MAX_SCHEMA_BYTES};
use crate::session::AutomationSession;
use crate::store::{ArtifactStore, JobStore};

/// Upper bound on capturing an error-context screenshot after a failure
const ERROR_CAPTURE_TIMEOUT: Duration = Duration::from_secs(3);

/// Identifiers returned by a batch submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSubmission {
    pub batch_id: String,
    pub job_ids: Vec<String>,
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

struct BatchEntry {
    job_ids: Vec<String>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<String, JobEntry>,
    batches: HashMap<String, BatchEntry>,
}

struct Inner {
    config: QaConfig,
    driver: Arc<dyn BrowserDriver>,
    evaluator: Evaluator,
    job_store: Option<Arc<dyn JobStore>>,
    artifact_store: Option<Arc<dyn ArtifactStore>>,
    tables: RwLock<Tables>,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: QaConfig,
    driver: Arc<dyn BrowserDriver>,
    scorer: Arc<dyn ScoringService>,
    job_store: Option<Arc<dyn JobStore>>,
    artifact_store: Option<Arc<dyn ArtifactStore>>,
}

impl OrchestratorBuilder {
    /// Persist finished reports
    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// Upload screenshots before report assembly
    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    pub fn build(self) -> Orchestrator {
        let slots = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let evaluator = Evaluator::new(self.scorer, self.config.scoring.clone());
        Orchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                driver: self.driver,
                evaluator,
                job_store: self.job_store,
                artifact_store: self.artifact_store,
                tables: RwLock::new(Tables::default()),
                slots,
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

/// Accepts test requests and runs them with bounded concurrency
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(
        config: QaConfig,
        driver: Arc<dyn BrowserDriver>,
        scorer: Arc<dyn ScoringService>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            driver,
            scorer,
            job_store: None,
            artifact_store: None,
        }
    }

    pub fn config(&self) -> &QaConfig {
        &self.inner.config
    }

    /// Validate `request`, create a pending job and schedule it. Returns
    /// without waiting for a browser slot.
    pub fn submit(&self, request: TestRequest) -> Result<String> {
        let job = self.inner.prepare(request, None)?;
        let job_id = job.id.clone();
        let cancel = self.inner.insert(job);
        self.spawn(job_id.clone(), cancel);
        Ok(job_id)
    }

    /// Submit up to `max_batch_size` requests as one batch. Every request is
    /// validated before any job is created.
    pub fn submit_batch(&self, requests: Vec<TestRequest>) -> Result<BatchSubmission> {
        let max = self.inner.config.max_batch_size;
        if requests.is_empty() || requests.len() > max {
            return Err(Error::InvalidArgument(format!(
                "a batch must contain between 1 and {} URLs, got {}",
                max,
                requests.len()
            )));
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let jobs = requests
            .into_iter()
            .map(|request| self.inner.prepare(request, Some(batch_id.clone())))
            .collect::<Result<Vec<_>>>()?;
        let job_ids: Vec<String> = jobs.iter().map(|job| job.id.clone()).collect();

        let mut spawned = Vec::with_capacity(jobs.len());
        {
            let mut tables = self.inner.tables.write();
            tables.batches.insert(
                batch_id.clone(),
                BatchEntry {
                    job_ids: job_ids.clone(),
                    created_at: Utc::now(),
                },
            );
            for job in jobs {
                let job_id = job.id.clone();
                let cancel = self.inner.insert_into(&mut tables, job);
                spawned.push((job_id, cancel));
            }
        }
        for (job_id, cancel) in spawned {
            self.spawn(job_id, cancel);
        }

        info!("Submitted batch {} with {} jobs", batch_id, job_ids.len());
        Ok(BatchSubmission { batch_id, job_ids })
    }

    /// Snapshot of a job
    pub fn get_status(&self, job_id: &str) -> Result<Job> {
        self.inner
            .tables
            .read()
            .jobs
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    /// Aggregate view recomputed from the batch's jobs
    pub fn get_batch_status(&self, batch_id: &str) -> Result<BatchJob> {
        let tables = self.inner.tables.read();
        let batch = tables
            .batches
            .get(batch_id)
            .ok_or_else(|| Error::not_found("batch", batch_id))?;
        let statuses: Vec<JobStatus> = batch
            .job_ids
            .iter()
            .filter_map(|id| tables.jobs.get(id).map(|entry| entry.job.status))
            .collect();
        Ok(BatchJob::from_children(
            batch_id.to_string(),
            batch.job_ids.clone(),
            batch.created_at,
            &statuses,
        ))
    }

    /// Snapshots of every known job, oldest first
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .tables
            .read()
            .jobs
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    /// Cancel a job. Terminal jobs are left alone.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        let tables = self.inner.tables.read();
        let entry = tables
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::not_found("job", job_id))?;
        if !entry.job.status.is_terminal() {
            info!("Cancelling job {}", job_id);
            entry.cancel.cancel();
        }
        Ok(())
    }

    /// Cancel every unfinished job of a batch; returns how many were signalled
    pub fn cancel_batch(&self, batch_id: &str) -> Result<usize> {
        let tables = self.inner.tables.read();
        let batch = tables
            .batches
            .get(batch_id)
            .ok_or_else(|| Error::not_found("batch", batch_id))?;
        let mut cancelled = 0;
        for entry in batch.job_ids.iter().filter_map(|id| tables.jobs.get(id)) {
            if !entry.job.status.is_terminal() {
                entry.cancel.cancel();
                cancelled += 1;
            }
        }
        info!("Cancelled {} jobs of batch {}", cancelled, batch_id);
        Ok(cancelled)
    }

    /// Wait until a job reaches a terminal status and return its snapshot
    pub async fn wait(&self, job_id: &str) -> Result<Job> {
        let mut done = {
            let tables = self.inner.tables.read();
            tables
                .jobs
                .get(job_id)
                .map(|entry| entry.done.subscribe())
                .ok_or_else(|| Error::not_found("job", job_id))?
        };
        // An error means the job entry is gone; the snapshot below reports it
        let _ = done.wait_for(|finished| *finished).await;
        self.get_status(job_id)
    }

    /// Stop accepting jobs, cancel everything unfinished and wait for the
    /// job tasks to wind down
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.inner.shutdown.cancel();
        let job_ids: Vec<String> = self.inner.tables.read().jobs.keys().cloned().collect();
        for job_id in job_ids {
            let _ = self.wait(&job_id).await;
        }
    }

    fn spawn(&self, job_id: String, cancel: CancellationToken) {
        let inner = self.inner.clone();
        let span = info_span!("job", job_id = %job_id);
        tokio::spawn(
            async move {
                let task = inner.clone().run_job(job_id.clone(), cancel);
                // Backstop for panics outside the pipeline; the job must still
                // reach a terminal status so waiters wake up
                if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                    let err = Error::Internal(format!("job task panicked: {}", panic_message(&*panic)));
                    error!("{}", err);
                    inner.complete(&job_id, &Err(err), None, None);
                }
            }
            .instrument(span),
        );
    }
}

/// Require an absolute http(s) URL with a host
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| Error::InvalidArgument(format!("invalid URL '{}': {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidArgument(format!(
            "unsupported URL scheme '{}': only http and https are allowed",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidArgument(format!("URL '{}' has no host", url)));
    }
    Ok(())
}

impl Inner {
    fn prepare(&self, request: TestRequest, batch_id: Option<String>) -> Result<Job> {
        if self.shutdown.is_cancelled() {
            return Err(Error::InvalidArgument("orchestrator is shutting down".to_string()));
        }
        validate_url(&request.url)?;

        if let Some(schema) = &request.interaction_schema {
            if schema.trim().is_empty() {
                return Err(Error::InvalidArgument("interaction schema is empty".to_string()));
            }
            if schema.len() > MAX_SCHEMA_BYTES {
                return Err(Error::InvalidArgument(format!(
                    "interaction schema exceeds {} bytes",
                    MAX_SCHEMA_BYTES
                )));
            }
        }

        let max_duration_secs = match request.max_duration_secs {
            Some(0) => {
                return Err(Error::InvalidArgument(
                    "max duration must be at least one second".to_string(),
                ))
            }
            Some(secs) => secs,
            None => self.config.job_deadline_secs,
        };

        let mut job = Job::new(
            request.url.trim().to_string(),
            JobConfig {
                max_duration_secs,
                headless: request.headless.unwrap_or(self.config.browser.headless),
                game_type: request.game_type,
                interaction_schema: request.interaction_schema,
            },
        );
        job.batch_id = batch_id;
        Ok(job)
    }

    fn insert(&self, job: Job) -> CancellationToken {
        let mut tables = self.tables.write();
        self.insert_into(&mut tables, job)
    }

    fn insert_into(&self, tables: &mut Tables, job: Job) -> CancellationToken {
        let cancel = self.shutdown.child_token();
        let (done, _) = watch::channel(false);
        debug!("Created job {} for {}", job.id, job.url);
        tables.jobs.insert(
            job.id.clone(),
            JobEntry {
                job,
                cancel: cancel.clone(),
                done,
            },
        );
        cancel
    }

    fn snapshot(&self, job_id: &str) -> Option<Job> {
        self.tables.read().jobs.get(job_id).map(|entry| entry.job.clone())
    }

    /// Apply a legal status transition; returns false if it was refused
    fn transition(&self, job_id: &str, next: JobStatus) -> bool {
        let mut tables = self.tables.write();
        let Some(entry) = tables.jobs.get_mut(job_id) else {
            return false;
        };
        if !entry.job.status.can_transition_to(next) {
            warn!("Refusing transition {} -> {}", entry.job.status, next);
            return false;
        }
        entry.job.status = next;
        entry.job.touch();
        true
    }

    /// Record a milestone; progress only moves forward
    fn advance(&self, job_id: &str, milestone: Milestone) {
        {
            let mut tables = self.tables.write();
            let Some(entry) = tables.jobs.get_mut(job_id) else {
                return;
            };
            let job = &mut entry.job;
            if job.status != JobStatus::Running || milestone.progress() <= job.progress {
                return;
            }
            job.progress = milestone.progress();
            job.message = milestone.message().to_string();
            job.touch();
        }
        debug!(progress = milestone.progress(), "{}", milestone.message());
    }

    /// Put a job in its terminal state and wake waiters
    fn complete(&self, job_id: &str, result: &Result<()>, report: Option<Report>, note: Option<String>) {
        let mut tables = self.tables.write();
        let Some(entry) = tables.jobs.get_mut(job_id) else {
            return;
        };
        let next = if result.is_ok() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        if !entry.job.status.can_transition_to(next) {
            warn!("Job already terminal ({}); dropping outcome", entry.job.status);
            return;
        }

        let job = &mut entry.job;
        job.status = next;
        match result {
            Ok(()) => {
                job.progress = Milestone::Finished.progress();
                job.message = Milestone::Finished.message().to_string();
            }
            Err(e) => {
                job.error = Some(JobError::from(e));
                job.message = e.to_string();
            }
        }
        if let Some(note) = note {
            job.message = format!("{} ({})", job.message, note);
        }
        job.report = report;
        job.touch();
        entry.done.send_replace(true);
    }

    async fn run_job(self: Arc<Self>, job_id: String, cancel: CancellationToken) {
        let Some(job) = self.snapshot(&job_id) else {
            return;
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                let err = Error::Cancelled("cancelled before a browser slot was free".to_string());
                info!("{}", err);
                self.complete(&job_id, &Err(err), None, None);
                return;
            }
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    let err = Error::Internal("concurrency limiter closed".to_string());
                    self.complete(&job_id, &Err(err), None, None);
                    return;
                }
            },
        };

        if !self.transition(&job_id, JobStatus::Running) {
            return;
        }
        info!("Testing {}", job.url);

        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = Duration::from_secs(job.config.max_duration_secs);
        let mut run = JobRun::new(&job, &self.config);

        let pipeline = unwind_guard(self.pipeline(&mut run, &cancel));
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled("job was cancelled".to_string())),
            outcome = tokio::time::timeout(deadline, pipeline) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::Cancelled(format!(
                    "job exceeded its {}s deadline",
                    deadline.as_secs()
                ))),
            },
        };

        if let Err(e) = &result {
            warn!("Job failed: {}", e);
            run.capture_error_frame(e).await;
        }
        run.teardown().await;

        self.advance(&job_id, Milestone::ReportAssembly);
        let mut output = run.finish();
        let links = self.upload_artifacts(&output.evidence, &mut output.warnings).await;

        let mut builder = ReportBuilder::new(job_id.clone())
            .url(job.url.clone())
            .evidence(output.evidence)
            .artifact_links(links)
            .started_at(started_at)
            .duration(clock.elapsed())
            .headless(job.config.headless)
            .warnings(output.warnings)
            .pass_threshold(self.config.report.pass_threshold)
            .low_confidence_threshold(self.config.scoring.low_confidence_threshold);
        if let Some(game_type) = output.game_type {
            builder = builder.game_type(game_type);
        }
        if let Some(entry) = output.entry_control {
            builder = builder.entry_control(entry);
        }
        if let Some(score) = output.score {
            builder = builder.score(score);
        }
        if let Err(e) = &result {
            builder = builder.error(JobError::from(e));
        }
        let report = builder.build();

        let note = self.persist(&report).await;
        self.complete(&job_id, &result, Some(report), note);
        info!(
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "Job {}",
            if result.is_ok() { "completed" } else { "failed" }
        );

        // Held until the terminal status is visible so at most N jobs are
        // ever observed running
        drop(permit);
    }

    async fn pipeline(&self, run: &mut JobRun, cancel: &CancellationToken) -> Result<()> {
        let job_id = run.job_id.clone();

        self.advance(&job_id, Milestone::SessionInit);
        let options = LaunchOptions::from_config(&self.config.browser, run.config.headless);
        let session = AutomationSession::open(self.driver.as_ref(), &options, cancel).await?;
        let session = run.session.insert(session);

        if let Err(e) = run.collector.start_capture(session).await {
            let message = format!("Console capture unavailable: {}", e);
            warn!("{}", message);
            run.warnings.push(message);
        }

        self.advance(&job_id, Milestone::Navigation);
        session
            .navigate(&run.url, self.config.navigation_timeout())
            .await?;

        self.advance(&job_id, Milestone::EvidenceBaseline);
        let schema = parse_schema(run.config.interaction_schema.as_deref(), &mut run.warnings);
        let forced = run
            .config
            .game_type
            .or_else(|| schema.as_ref().and_then(|s| s.game_type));
        let classification = match forced {
            Some(game_type) => {
                let probe = detector::probe(session).await.ok();
                Classification::overridden(game_type, probe.as_ref())
            }
            None => match detector::detect(session).await {
                Ok((_, classification)) => classification,
                Err(e) if e.ends_session() => return Err(e),
                Err(e) => {
                    let message = format!("Game type detection failed ({}); assuming DOM", e);
                    warn!("{}", message);
                    run.warnings.push(message);
                    detector::classify(&PageProbe::default())
                }
            },
        };
        info!(
            confidence = classification.confidence,
            overridden = classification.overridden,
            "Game type: {}",
            classification.game_type
        );
        run.game_type = Some(classification.game_type);
        run.collector
            .capture_screenshot(session, CaptureContext::Initial)
            .await;

        self.advance(&job_id, Milestone::Interaction);
        let target = DispatchTarget::for_classification(&classification);
        let vocabulary = EntryVocabulary::from_config(&self.config.interaction);
        let entry =
            match dispatcher::find_entry_control(session, &vocabulary, classification.primary_canvas)
                .await
            {
                Ok(entry) => entry,
                Err(e) if e.ends_session() => return Err(e),
                Err(e) => {
                    let message = format!("Entry control scan failed: {}", e);
                    warn!("{}", message);
                    run.warnings.push(message);
                    EntryControl::NotFound
                }
            };
        match entry.describe() {
            Some(description) => {
                if dispatcher::activate_entry_control(session, &target, &entry).await? {
                    info!("Activated entry control {}", description);
                    run.entry_control = Some(description);
                    session
                        .pause(Duration::from_millis(self.config.interaction.post_entry_wait_ms))
                        .await?;
                } else {
                    let message = format!("Entry control {} could not be clicked", description);
                    warn!("{}", message);
                    run.warnings.push(message);
                }
            }
            None => {
                let message = "No entry control found; assuming the game starts on its own";
                warn!("{}", message);
                run.warnings.push(message.to_string());
            }
        }

        let (plan, plan_warnings) = dispatcher::plan_for(schema.as_ref(), &self.config.interaction);
        run.warnings.extend(plan_warnings);
        let outcome = dispatcher::execute_plan(
            session,
            &target,
            &run.collector,
            &plan,
            self.config.interaction.plan_budget(),
        )
        .await?;
        run.warnings.extend(outcome.warnings);

        self.advance(&job_id, Milestone::EvidenceFinalize);
        run.collector
            .capture_screenshot(session, CaptureContext::Final)
            .await;
        session.close().await;
        run.collector.stop_capture();

        self.advance(&job_id, Milestone::Evaluation);
        let evidence = run.collector.snapshot();
        let context = EvaluationContext {
            url: run.url.clone(),
            game_type: run.game_type,
            description: schema.and_then(|s| s.description),
        };
        let evaluation = self.evaluator.evaluate(&context, &evidence, cancel).await?;
        if let Some(failure) = &evaluation.failure {
            run.warnings.push(format!(
                "{}; heuristic score used",
                Error::EvaluatorFailure(failure.clone())
            ));
        }
        run.score = Some(evaluation.score);
        Ok(())
    }

    /// Upload screenshots concurrently within the configured bound. Failures
    /// only cost the report its links.
    async fn upload_artifacts(
        &self,
        evidence: &Evidence,
        warnings: &mut Vec<String>,
    ) -> HashMap<String, String> {
        let mut links = HashMap::new();
        let Some(store) = &self.artifact_store else {
            return links;
        };
        if evidence.screenshots.is_empty() {
            return links;
        }

        let uploads = evidence.screenshots.iter().map(|shot| async move {
            (shot.artifact.digest.clone(), store.upload(shot).await)
        });
        let limit = Duration::from_secs(self.config.storage.upload_timeout_secs);
        match tokio::time::timeout(limit, join_all(uploads)).await {
            Ok(results) => {
                for (digest, result) in results {
                    match result {
                        Ok(url) => {
                            links.insert(digest, url);
                        }
                        Err(e) => {
                            let short = digest.get(..12).unwrap_or(&digest);
                            warnings.push(format!("Artifact upload failed for {}: {}", short, e));
                        }
                    }
                }
            }
            Err(_) => {
                warnings.push(format!("Artifact uploads did not finish within {:?}", limit));
            }
        }
        if links.len() < evidence.screenshots.len() {
            warn!(
                "Uploaded {} of {} screenshots",
                links.len(),
                evidence.screenshots.len()
            );
        }
        links
    }

    /// Save the report; a failure becomes a note on the job
    async fn persist(&self, report: &Report) -> Option<String> {
        let store = self.job_store.as_ref()?;
        match store.save_completed_job(report).await {
            Ok(()) => None,
            Err(e) => {
                let err = match e {
                    e @ Error::StorageFailure(_) => e,
                    other => Error::StorageFailure(other.to_string()),
                };
                warn!("Report not persisted: {}", err);
                Some(format!("report not persisted: {}", err))
            }
        }
    }
}

/// Turn a panic inside `fut` into an internal error
async fn unwind_guard<F: Future<Output = Result<()>>>(fut: F) -> Result<()> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::Internal(format!("job panicked: {}", panic_message(&*panic)))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn parse_schema(raw: Option<&str>, warnings: &mut Vec<String>) -> Option<InteractionSchema> {
    match InteractionSchema::parse(raw?) {
        Ok(schema) => Some(schema),
        Err(reason) => {
            let message = format!("Interaction schema ignored ({}); using detection", reason);
            warn!("{}", message);
            warnings.push(message);
            None
        }
    }
}

/// State a job accumulates while its pipeline runs. It lives outside the
/// pipeline future so a timed-out or cancelled run can still be torn down and
/// reported.
struct JobRun {
    job_id: String,
    url: String,
    config: JobConfig,
    session: Option<AutomationSession>,
    collector: EvidenceCollector,
    warnings: Vec<String>,
    game_type: Option<GameType>,
    entry_control: Option<String>,
    score: Option<PlayabilityScore>,
}

struct RunOutput {
    evidence: Evidence,
    warnings: Vec<String>,
    game_type: Option<GameType>,
    entry_control: Option<String>,
    score: Option<PlayabilityScore>,
}

impl JobRun {
    fn new(job: &Job, config: &QaConfig) -> Self {
        Self {
            job_id: job.id.clone(),
            url: job.url.clone(),
            config: job.config.clone(),
            session: None,
            collector: EvidenceCollector::new((
                config.browser.viewport_width,
                config.browser.viewport_height,
            )),
            warnings: Vec::new(),
            game_type: None,
            entry_control: None,
            score: None,
        }
    }

    /// Grab an error-context frame while the page is still up. Skipped for
    /// cancellations, where the tab is already being torn down.
    async fn capture_error_frame(&mut self, error: &Error) {
        if matches!(error, Error::Cancelled(_)) || self.collector.is_frozen() {
            return;
        }
        let Some(session) = self.session.as_ref().filter(|s| s.is_open()) else {
            return;
        };
        let capture = self.collector.capture_screenshot(session, CaptureContext::Error);
        if tokio::time::timeout(ERROR_CAPTURE_TIMEOUT, capture).await.is_err() {
            debug!("Error screenshot timed out");
        }
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.close().await;
        }
        self.collector.stop_capture();
    }

    fn finish(self) -> RunOutput {
        let (evidence, mut warnings) = self.collector.finish();
        warnings.extend(self.warnings);
        RunOutput {
            evidence,
            warnings,
            game_type: self.game_type,
            entry_control: self.entry_control,
            score: self.score,
        }
    }
}
