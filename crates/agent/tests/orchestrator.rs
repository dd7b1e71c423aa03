//! Orchestrator behaviour against a scripted browser and scorer

mod common;

use common::{fast_config, FakeDriver, FakeScorer, PageScript, PanickingScorer};
use gameqa_agent::evaluator::ScoringError;
use gameqa_agent::store::{JobFilter, JobStore, MemoryJobStore};
use gameqa_agent::Orchestrator;
use gameqa_common::{
    CaptureContext, Error, ErrorCategory, GameType, JobStatus, QaConfig, ReportStatus,
    TestRequest, Verdict,
};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(config: QaConfig, driver: Arc<FakeDriver>, scorer: Arc<FakeScorer>) -> Orchestrator {
    Orchestrator::builder(config, driver, scorer).build()
}

#[tokio::test]
async fn job_runs_to_a_complete_report() {
    let driver = FakeDriver::new(PageScript::canvas_game());
    let scorer = FakeScorer::good();
    let orch = orchestrator(fast_config(), driver.clone(), scorer.clone());

    let job_id = orch.submit(TestRequest::new("https://games.test/snake")).unwrap();
    let job = orch.wait(&job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.error.is_none());

    let report = job.report.expect("completed job carries a report");
    assert_eq!(report.status, ReportStatus::Complete);
    assert_eq!(report.metadata.game_type, Some(GameType::Canvas));
    assert!(report.metadata.entry_control.as_deref().unwrap().contains("Start"));

    let score = report.score.expect("scored");
    assert_eq!(score.overall, 78);
    assert!(!score.degraded);
    assert_eq!(report.summary.verdict, Verdict::Pass);

    let contexts: Vec<CaptureContext> =
        report.evidence.screenshots.iter().map(|s| s.context).collect();
    assert_eq!(contexts.first(), Some(&CaptureContext::Initial));
    assert_eq!(contexts.last(), Some(&CaptureContext::Final));
    assert!(report.evidence.logs.iter().any(|l| l.message.contains("sound.ogg")));

    assert_eq!(scorer.calls(), 1);
    assert!(scorer.last_image_count.load(Ordering::SeqCst) <= 5);
    assert_eq!(driver.stats.open.load(Ordering::SeqCst), 0, "browser left running");
}

#[tokio::test]
async fn progress_never_decreases_and_transitions_are_legal() {
    let driver = FakeDriver::new(PageScript::canvas_game().slow(Duration::from_millis(50)));
    let orch = orchestrator(fast_config(), driver, FakeScorer::good());
    let job_id = orch.submit(TestRequest::new("https://games.test/pong")).unwrap();

    let mut last_progress = 0;
    let mut last_status = JobStatus::Pending;
    loop {
        let job = orch.get_status(&job_id).unwrap();
        assert!(job.progress >= last_progress, "progress went backwards");
        if job.status != last_status {
            assert!(
                last_status.can_transition_to(job.status),
                "illegal transition {} -> {}",
                last_status,
                job.status
            );
        }
        last_progress = job.progress;
        last_status = job.status;
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(last_status, JobStatus::Completed);
}

#[tokio::test]
async fn running_jobs_never_exceed_the_concurrency_cap() {
    let mut config = fast_config();
    config.max_concurrency = 2;
    let driver = FakeDriver::new(PageScript::canvas_game().slow(Duration::from_millis(80)));
    let orch = orchestrator(config, driver.clone(), FakeScorer::good());

    let ids: Vec<String> = (0..6)
        .map(|i| orch.submit(TestRequest::new(format!("https://games.test/{}", i))).unwrap())
        .collect();

    loop {
        let jobs = orch.list_jobs();
        let running = jobs.iter().filter(|j| j.status == JobStatus::Running).count();
        assert!(running <= 2, "{} jobs running", running);
        if jobs.iter().all(|j| j.status.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for id in &ids {
        assert_eq!(orch.get_status(id).unwrap().status, JobStatus::Completed);
    }
    assert!(driver.stats.max_open.load(Ordering::SeqCst) <= 2);
    assert_eq!(driver.stats.launches.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn oversized_or_empty_batch_is_rejected_without_jobs() {
    let orch = orchestrator(
        fast_config(),
        FakeDriver::new(PageScript::canvas_game()),
        FakeScorer::good(),
    );

    let eleven = (0..11)
        .map(|i| TestRequest::new(format!("https://games.test/{}", i)))
        .collect();
    assert!(matches!(orch.submit_batch(eleven), Err(Error::InvalidArgument(_))));
    assert!(matches!(orch.submit_batch(Vec::new()), Err(Error::InvalidArgument(_))));

    let mixed = vec![
        TestRequest::new("https://games.test/ok"),
        TestRequest::new("javascript:alert(1)"),
    ];
    assert!(matches!(orch.submit_batch(mixed), Err(Error::InvalidArgument(_))));

    assert!(orch.list_jobs().is_empty());
}

#[tokio::test]
async fn batch_status_tracks_children() {
    let orch = orchestrator(
        fast_config(),
        FakeDriver::new(PageScript::canvas_game()),
        FakeScorer::good(),
    );
    let requests = (0..3)
        .map(|i| TestRequest::new(format!("https://games.test/{}", i)))
        .collect();
    let batch = orch.submit_batch(requests).unwrap();
    assert_eq!(batch.job_ids.len(), 3);

    let early = orch.get_batch_status(&batch.batch_id).unwrap();
    assert_eq!(early.total, 3);
    assert_eq!(early.pending + early.running + early.completed + early.failed, 3);

    for id in &batch.job_ids {
        let job = orch.wait(id).await.unwrap();
        assert_eq!(job.batch_id.as_deref(), Some(batch.batch_id.as_str()));
    }
    let done = orch.get_batch_status(&batch.batch_id).unwrap();
    assert_eq!(done.completed, 3);
    assert!(done.is_finished());

    let unique: HashSet<&String> = batch.job_ids.iter().collect();
    assert_eq!(unique.len(), 3);
}

#[tokio::test]
async fn malformed_requests_fail_synchronously() {
    let orch = orchestrator(
        fast_config(),
        FakeDriver::new(PageScript::canvas_game()),
        FakeScorer::good(),
    );
    for url in ["", "not a url", "ftp://games.test/x", "/relative/path"] {
        assert!(
            matches!(orch.submit(TestRequest::new(url)), Err(Error::InvalidArgument(_))),
            "accepted {:?}",
            url
        );
    }

    let mut request = TestRequest::new("https://games.test/x");
    request.interaction_schema = Some("   ".to_string());
    assert!(matches!(orch.submit(request), Err(Error::InvalidArgument(_))));

    let mut request = TestRequest::new("https://games.test/x");
    request.max_duration_secs = Some(0);
    assert!(matches!(orch.submit(request), Err(Error::InvalidArgument(_))));

    assert!(orch.list_jobs().is_empty());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let orch = orchestrator(
        fast_config(),
        FakeDriver::new(PageScript::canvas_game()),
        FakeScorer::good(),
    );
    assert!(matches!(orch.get_status("missing"), Err(Error::NotFound { .. })));
    assert!(matches!(orch.get_batch_status("missing"), Err(Error::NotFound { .. })));
    assert!(matches!(orch.cancel("missing"), Err(Error::NotFound { .. })));
}

#[tokio::test(start_paused = true)]
async fn deadline_fails_job_with_incomplete_report() {
    let driver = FakeDriver::new(PageScript::canvas_game().slow(Duration::from_secs(30)));
    let orch = orchestrator(fast_config(), driver.clone(), FakeScorer::good());

    let mut request = TestRequest::new("https://games.test/slow");
    request.max_duration_secs = Some(1);
    let job_id = orch.submit(request).unwrap();
    let job = orch.wait(&job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.expect("failed job carries an error");
    assert!(matches!(
        error.category,
        ErrorCategory::NavigationTimeout | ErrorCategory::Cancelled
    ));
    assert!(!error.message.is_empty());

    let report = job.report.expect("best-effort report");
    assert_eq!(report.status, ReportStatus::Incomplete);
    assert!(report.score.is_none());
    assert!(!report.evidence.logs.is_empty(), "load-time console output kept");
    assert_eq!(driver.stats.open.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn navigation_timeout_is_reported() {
    let mut config = fast_config();
    config.navigation_timeout_secs = 2;
    let driver = FakeDriver::new(PageScript::canvas_game().slow(Duration::from_secs(30)));
    let orch = orchestrator(config, driver, FakeScorer::good());

    let job_id = orch.submit(TestRequest::new("https://games.test/hang")).unwrap();
    let job = orch.wait(&job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().category, ErrorCategory::NavigationTimeout);
    let report = job.report.unwrap();
    assert_eq!(report.status, ReportStatus::Incomplete);
    assert!(report
        .evidence
        .screenshots
        .iter()
        .any(|s| s.context == CaptureContext::Error));
}

#[tokio::test]
async fn exhausted_scorer_yields_degraded_score_not_failure() {
    let scorer = FakeScorer::always(Err(ScoringError::Transient("HTTP 503".to_string())));
    let config = fast_config();
    let threshold = config.scoring.low_confidence_threshold;
    let orch = orchestrator(config, FakeDriver::new(PageScript::canvas_game()), scorer.clone());

    let job_id = orch.submit(TestRequest::new("https://games.test/flaky")).unwrap();
    let job = orch.wait(&job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(scorer.calls(), 3);
    let report = job.report.unwrap();
    let score = report.score.unwrap();
    assert!(score.degraded);
    assert!(score.confidence < threshold);
    assert!(report
        .metadata
        .warnings
        .iter()
        .any(|w| w.contains("Evaluator failure")));
}

#[tokio::test]
async fn launch_failure_is_a_session_crash() {
    let mut script = PageScript::canvas_game();
    script.fail_launch = true;
    let orch = orchestrator(fast_config(), FakeDriver::new(script), FakeScorer::good());

    let job_id = orch.submit(TestRequest::new("https://games.test/x")).unwrap();
    let job = orch.wait(&job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().category, ErrorCategory::SessionCrash);
    assert_eq!(job.report.unwrap().status, ReportStatus::Incomplete);
}

#[tokio::test]
async fn cancelling_a_pending_job_frees_no_slot() {
    let mut config = fast_config();
    config.max_concurrency = 1;
    let driver = FakeDriver::new(PageScript::canvas_game().slow(Duration::from_millis(200)));
    let orch = orchestrator(config, driver.clone(), FakeScorer::good());

    let first = orch.submit(TestRequest::new("https://games.test/1")).unwrap();
    let second = orch.submit(TestRequest::new("https://games.test/2")).unwrap();
    orch.cancel(&second).unwrap();

    let cancelled = orch.wait(&second).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Failed);
    assert_eq!(cancelled.error.unwrap().category, ErrorCategory::Cancelled);

    assert_eq!(orch.wait(&first).await.unwrap().status, JobStatus::Completed);
    assert_eq!(driver.stats.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_batch_unwinds_running_jobs() {
    let driver = FakeDriver::new(PageScript::canvas_game().slow(Duration::from_secs(60)));
    let orch = orchestrator(fast_config(), driver.clone(), FakeScorer::good());
    let requests = (0..2)
        .map(|i| TestRequest::new(format!("https://games.test/{}", i)))
        .collect();
    let batch = orch.submit_batch(requests).unwrap();

    // Let both jobs reach navigation
    while driver.stats.launches.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(orch.cancel_batch(&batch.batch_id).unwrap(), 2);

    for id in &batch.job_ids {
        let job = orch.wait(id).await.unwrap();
        assert_eq!(job.error.unwrap().category, ErrorCategory::Cancelled);
    }
    assert_eq!(orch.get_batch_status(&batch.batch_id).unwrap().failed, 2);
    assert_eq!(driver.stats.open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unparseable_schema_degrades_to_detection() {
    let orch = orchestrator(
        fast_config(),
        FakeDriver::new(PageScript::canvas_game()),
        FakeScorer::good(),
    );
    let mut request = TestRequest::new("https://games.test/x");
    request.interaction_schema = Some("{\"controls\": [".to_string());
    let job = orch.wait(&orch.submit(request).unwrap()).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    let report = job.report.unwrap();
    assert_eq!(report.metadata.game_type, Some(GameType::Canvas));
    assert!(report
        .metadata
        .warnings
        .iter()
        .any(|w| w.contains("Interaction schema ignored")));
}

#[tokio::test]
async fn explicit_game_type_overrides_detection() {
    let orch = orchestrator(
        fast_config(),
        FakeDriver::new(PageScript::canvas_game()),
        FakeScorer::good(),
    );
    let mut request = TestRequest::new("https://games.test/x");
    request.game_type = Some(GameType::Dom);
    let job = orch.wait(&orch.submit(request).unwrap()).await.unwrap();
    assert_eq!(job.report.unwrap().metadata.game_type, Some(GameType::Dom));
}

#[tokio::test]
async fn completed_reports_are_persisted() {
    let store = Arc::new(MemoryJobStore::new());
    let orch = Orchestrator::builder(
        fast_config(),
        FakeDriver::new(PageScript::canvas_game()),
        FakeScorer::good(),
    )
    .job_store(store.clone())
    .build();

    let job_id = orch.submit(TestRequest::new("https://games.test/x")).unwrap();
    orch.wait(&job_id).await.unwrap();

    let saved = store.load_job(&job_id).await.unwrap();
    assert_eq!(saved.url, "https://games.test/x");
    assert_eq!(store.list_jobs(&JobFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn shutdown_cancels_outstanding_jobs() {
    let driver = FakeDriver::new(PageScript::canvas_game().slow(Duration::from_secs(60)));
    let orch = orchestrator(fast_config(), driver.clone(), FakeScorer::good());
    let job_id = orch.submit(TestRequest::new("https://games.test/x")).unwrap();

    orch.shutdown().await;

    let job = orch.get_status(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(matches!(
        orch.submit(TestRequest::new("https://games.test/y")),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(driver.stats.open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panicking_scorer_fails_job_as_internal() {
    let driver = FakeDriver::new(PageScript::canvas_game());
    let orch = Orchestrator::builder(fast_config(), driver.clone(), Arc::new(PanickingScorer)).build();

    let job_id = orch.submit(TestRequest::new("https://games.test/boom")).unwrap();
    let job = tokio::time::timeout(Duration::from_secs(5), orch.wait(&job_id))
        .await
        .expect("job reaches a terminal status")
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.expect("failed job carries an error");
    assert_eq!(error.category, ErrorCategory::Internal);
    assert!(error.message.contains("scoring backend exploded"));

    let report = job.report.expect("best-effort report");
    assert_eq!(report.status, ReportStatus::Incomplete);
    assert!(!report.evidence.screenshots.is_empty());
    assert_eq!(driver.stats.open.load(Ordering::SeqCst), 0, "browser left running");

    tokio::time::timeout(Duration::from_secs(3), orch.shutdown())
        .await
        .expect("shutdown finishes");
}

#[tokio::test]
async fn detection_script_error_defaults_to_dom() {
    let driver = FakeDriver::new(PageScript::canvas_game().failing_script("canvas_count"));
    let orch = orchestrator(fast_config(), driver, FakeScorer::good());

    let job_id = orch.submit(TestRequest::new("https://games.test/redirects")).unwrap();
    let job = orch.wait(&job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    let report = job.report.unwrap();
    assert_eq!(report.metadata.game_type, Some(GameType::Dom));
    assert!(report
        .metadata
        .warnings
        .iter()
        .any(|w| w.contains("detection failed")));
}

#[tokio::test]
async fn entry_scan_error_is_a_warning() {
    let driver = FakeDriver::new(PageScript::canvas_game().failing_script("data-gameqa-candidate"));
    let orch = orchestrator(fast_config(), driver, FakeScorer::good());

    let job_id = orch.submit(TestRequest::new("https://games.test/menu")).unwrap();
    let job = orch.wait(&job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    let report = job.report.unwrap();
    assert!(report.metadata.entry_control.is_none());
    assert!(report
        .metadata
        .warnings
        .iter()
        .any(|w| w.contains("Entry control scan failed")));
}
