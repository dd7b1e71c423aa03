//! Jobs Commands - browse stored reports

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use gameqa_agent::store::{FileJobStore, JobFilter, JobStore};
use gameqa_common::{QaConfig, Report, ReportStatus, Verdict};
use serde::Serialize;

use crate::output::{self, print_list, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum JobsCommands {
    /// List stored reports, newest first
    List {
        /// Only reports with this status
        #[arg(long)]
        status: Option<StatusArg>,

        /// Only reports with this verdict
        #[arg(long)]
        verdict: Option<VerdictArg>,

        /// Only URLs containing this text
        #[arg(long)]
        url: Option<String>,

        /// Maximum number of reports
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one report
    Show {
        /// Job ID
        id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Complete,
    Incomplete,
}

impl From<StatusArg> for ReportStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Complete => ReportStatus::Complete,
            StatusArg::Incomplete => ReportStatus::Incomplete,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VerdictArg {
    Pass,
    Fail,
}

impl From<VerdictArg> for Verdict {
    fn from(arg: VerdictArg) -> Self {
        match arg {
            VerdictArg::Pass => Verdict::Pass,
            VerdictArg::Fail => Verdict::Fail,
        }
    }
}

/// Report display wrapper for listings
#[derive(Serialize)]
pub struct ReportRow {
    pub job_id: String,
    pub url: String,
    pub status: ReportStatus,
    pub verdict: Verdict,
    pub score: Option<u8>,
    pub created_at: String,
}

impl From<&Report> for ReportRow {
    fn from(report: &Report) -> Self {
        Self {
            job_id: report.job_id.clone(),
            url: report.url.clone(),
            status: report.status,
            verdict: report.summary.verdict,
            score: report.score.as_ref().map(|s| s.overall),
            created_at: report.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl TableDisplay for ReportRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "URL", "Status", "Verdict", "Score", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            output::short_id(&self.job_id).to_string(),
            self.url.clone(),
            output::report_status(self.status),
            output::verdict(self.verdict),
            self.score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            self.created_at.clone(),
        ]
    }
}

pub async fn execute(cmd: JobsCommands, config: &QaConfig, format: OutputFormat) -> Result<()> {
    let store = FileJobStore::new(config.reports_dir());

    match cmd {
        JobsCommands::List {
            status,
            verdict,
            url,
            limit,
        } => {
            let filter = JobFilter {
                status: status.map(Into::into),
                verdict: verdict.map(Into::into),
                url_contains: url,
                limit: Some(limit),
            };
            let reports = store.list_jobs(&filter).await?;
            let rows: Vec<ReportRow> = reports.iter().map(ReportRow::from).collect();
            print_list(&rows, format);
        }

        JobsCommands::Show { id } => {
            let report = load(&store, &id).await?;
            match format {
                OutputFormat::Json => output::print_json(&report),
                OutputFormat::Yaml => output::print_yaml(&report),
                _ => print_report(&report),
            }
        }
    }

    Ok(())
}

/// Load by full ID, falling back to a unique prefix match
async fn load(store: &FileJobStore, id: &str) -> Result<Report> {
    match store.load_job(id).await {
        Ok(report) => Ok(report),
        Err(gameqa_common::Error::NotFound { .. }) => {
            let mut matches: Vec<Report> = store
                .list_jobs(&JobFilter::default())
                .await?
                .into_iter()
                .filter(|r| r.job_id.starts_with(id))
                .collect();
            match matches.len() {
                1 => Ok(matches.remove(0)),
                0 => anyhow::bail!("no report for job {}", id),
                n => anyhow::bail!("{} reports match prefix {}; use a longer ID", n, id),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &Report) {
    println!("{}", "━".repeat(60).dimmed());
    println!("{}", " Playability Report".bold());
    println!("{}", "━".repeat(60).dimmed());
    println!();

    let meta = &report.metadata;
    println!("  Job:        {}", report.job_id.cyan());
    println!("  URL:        {}", report.url);
    println!("  Status:     {}", output::report_status(report.status));
    println!("  Verdict:    {}", output::verdict(report.summary.verdict));
    if let Some(game_type) = meta.game_type {
        println!("  Game type:  {}", game_type);
    }
    if let Some(entry) = &meta.entry_control {
        println!("  Entry:      {}", entry);
    }
    println!("  Duration:   {:.1}s", meta.duration_ms as f64 / 1000.0);
    println!("  Created:    {}", report.created_at.to_rfc3339().dimmed());
    if let Some(error) = &meta.error {
        println!("  Error:      {} {}", error.category.to_string().red(), error.message);
    }
    println!();

    if let Some(score) = &report.score {
        let source = if score.degraded { " (heuristic)".yellow().to_string() } else { String::new() };
        println!("{}{}", "Score:".bold(), source);
        println!("  Overall:         {}", score.overall);
        println!("  Interactivity:   {}", score.interactivity);
        println!("  Visual quality:  {}", score.visual_quality);
        println!("  Error severity:  {}", score.error_severity);
        println!("  Confidence:      {}", score.confidence);
        if !score.reasoning.is_empty() {
            println!("  {}", score.reasoning.dimmed());
        }
        for recommendation in &score.recommendations {
            println!("  → {}", recommendation);
        }
        println!();
    }

    println!("{}", "Checks:".bold());
    for check in &report.summary.passed_checks {
        println!("  {} {}", "✓".green(), check);
    }
    for check in &report.summary.failed_checks {
        println!("  {} {}", "✗".red(), check);
    }
    println!();

    if !report.summary.critical_issues.is_empty() {
        println!("{}", "Critical issues:".bold());
        for issue in &report.summary.critical_issues {
            println!("  {} {}", "✗".red(), issue);
        }
        println!();
    }

    println!("{}", "Evidence:".bold());
    for shot in &report.evidence.screenshots {
        let location = shot.artifact.url.as_deref().unwrap_or("(not uploaded)");
        println!(
            "  {:<17} {}x{}  {}",
            shot.context.to_string(),
            shot.width,
            shot.height,
            location.dimmed()
        );
    }
    println!(
        "  {} log entries, {} errors, {} warnings",
        report.evidence.logs.len(),
        report.evidence.error_count(),
        report.evidence.warning_count()
    );

    if !meta.warnings.is_empty() {
        println!();
        println!("{}", "Warnings:".bold());
        for warning in &meta.warnings {
            println!("  {} {}", "!".yellow(), warning);
        }
    }
}
