//! Run Command - test one or more game URLs in-process

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use gameqa_agent::store::{FileArtifactStore, FileJobStore};
use gameqa_agent::{ChromeDriver, HttpScoringService, Orchestrator};
use gameqa_common::{GameType, Job, JobStatus, QaConfig, TestRequest, Verdict};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::output::{
    self, print_error, print_list, print_success, print_warning, OutputFormat, TableDisplay,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Args)]
pub struct RunArgs {
    /// Game URLs to test; more than one is submitted as a batch
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Per-job deadline in seconds
    #[arg(long)]
    pub max_duration: Option<u64>,

    /// Skip detection and treat the page as this game type (canvas, dom, hybrid)
    #[arg(long)]
    pub game_type: Option<GameType>,

    /// Interaction schema file (JSON or YAML)
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Maximum concurrent browser sessions
    #[arg(long)]
    pub concurrency: Option<usize>,
}

/// One line of the run summary
#[derive(Serialize)]
struct JobRow {
    id: String,
    url: String,
    status: JobStatus,
    verdict: Option<Verdict>,
    score: Option<u8>,
    confidence: Option<u8>,
    message: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        let score = job.report.as_ref().and_then(|r| r.score.as_ref());
        Self {
            id: job.id.clone(),
            url: job.url.clone(),
            status: job.status,
            verdict: job.report.as_ref().map(|r| r.summary.verdict),
            score: score.map(|s| s.overall),
            confidence: score.map(|s| s.confidence),
            message: job.message.clone(),
        }
    }
}

impl TableDisplay for JobRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "URL", "Status", "Verdict", "Score", "Confidence", "Message"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            output::short_id(&self.id).to_string(),
            self.url.clone(),
            output::job_status(self.status),
            self.verdict.map(output::verdict).unwrap_or_else(|| "-".to_string()),
            self.score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            self.confidence.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            self.message.clone(),
        ]
    }
}

/// Run the tests; returns whether every job passed
pub async fn execute(args: RunArgs, mut config: QaConfig, format: OutputFormat) -> Result<bool> {
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = concurrency;
    }

    let schema = match &args.schema {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading interaction schema {}", path.display()))?,
        ),
        None => None,
    };

    let requests: Vec<TestRequest> = args
        .urls
        .iter()
        .map(|url| TestRequest {
            url: url.clone(),
            max_duration_secs: args.max_duration,
            headless: args.headed.then_some(false),
            game_type: args.game_type,
            interaction_schema: schema.clone(),
        })
        .collect();

    let scorer = HttpScoringService::from_config(&config.scoring)?;
    if !scorer.has_credentials() {
        print_warning(&format!(
            "{} is not set; scoring requests will likely be rejected and heuristic scores used",
            config.scoring.api_key_env
        ));
    }

    let reports_dir = config.reports_dir();
    let orchestrator = Orchestrator::builder(config.clone(), Arc::new(ChromeDriver::new()), Arc::new(scorer))
        .job_store(Arc::new(FileJobStore::new(&reports_dir)))
        .artifact_store(Arc::new(FileArtifactStore::new(config.artifacts_dir())))
        .build();

    let job_ids = if requests.len() == 1 {
        let request = requests.into_iter().next();
        match request {
            Some(request) => vec![orchestrator.submit(request)?],
            None => bail!("no URL given"),
        }
    } else {
        let batch = orchestrator.submit_batch(requests)?;
        if format == OutputFormat::Table {
            println!(
                "{} Batch {} with {} jobs",
                "→".cyan(),
                output::short_id(&batch.batch_id).bold(),
                batch.job_ids.len()
            );
        }
        batch.job_ids
    };

    let jobs = tokio::select! {
        jobs = watch(&orchestrator, &job_ids, format) => jobs?,
        _ = tokio::signal::ctrl_c() => {
            print_warning("Interrupted; cancelling outstanding jobs");
            orchestrator.shutdown().await;
            job_ids
                .iter()
                .map(|id| orchestrator.get_status(id))
                .collect::<gameqa_common::Result<Vec<_>>>()?
        }
    };

    match format {
        OutputFormat::Json => output::print_json(&jobs),
        OutputFormat::Yaml => output::print_yaml(&jobs),
        _ => {
            let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
            print_list(&rows, format);
            print_findings(&jobs);
            println!("Reports saved to {}", reports_dir.display());
        }
    }

    let passed = jobs.iter().all(|job| {
        job.status == JobStatus::Completed
            && job.report.as_ref().map(|r| r.summary.verdict) == Some(Verdict::Pass)
    });
    if format == OutputFormat::Table {
        if passed {
            print_success(&format!("{} of {} tests passed", jobs.len(), jobs.len()));
        } else {
            let failed = jobs
                .iter()
                .filter(|job| job.report.as_ref().map(|r| r.summary.verdict) != Some(Verdict::Pass))
                .count();
            print_error(&format!("{} of {} tests did not pass", failed, jobs.len()));
        }
    }
    Ok(passed)
}

/// Poll until every job is terminal, drawing one progress bar per job
async fn watch(orchestrator: &Orchestrator, job_ids: &[String], format: OutputFormat) -> Result<Vec<Job>> {
    let multi = if format == OutputFormat::Table {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")?
        .progress_chars("=> ");

    let bars: Vec<ProgressBar> = job_ids
        .iter()
        .map(|id| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_prefix(output::short_id(id).to_string());
            bar
        })
        .collect();

    loop {
        let mut jobs = Vec::with_capacity(job_ids.len());
        for (id, bar) in job_ids.iter().zip(&bars) {
            let job = orchestrator.get_status(id)?;
            if !bar.is_finished() {
                bar.set_position(job.progress as u64);
                bar.set_message(job.message.clone());
                if job.status.is_terminal() {
                    debug!("Job {} finished: {}", id, job.status);
                    bar.finish_with_message(output::job_status(job.status));
                }
            }
            jobs.push(job);
        }
        if jobs.iter().all(|job| job.status.is_terminal()) {
            return Ok(jobs);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn print_findings(jobs: &[Job]) {
    for job in jobs {
        let Some(report) = &job.report else {
            continue;
        };
        let issues = &report.summary.critical_issues;
        let warnings = &report.metadata.warnings;
        if issues.is_empty() && warnings.is_empty() {
            continue;
        }
        println!();
        println!("{} {}", output::short_id(&job.id).bold(), job.url.dimmed());
        for issue in issues {
            println!("  {} {}", "✗".red(), issue);
        }
        for warning in warnings {
            println!("  {} {}", "!".yellow(), warning);
        }
    }
    println!();
}
