//! Retry, fallback and cancellation behaviour of the evaluator

mod common;

use bytes::Bytes;
use chrono::Utc;
use common::{frame, FakeScorer, GOOD_SCORE};
use gameqa_agent::evaluator::{EvaluationContext, ScoringError};
use gameqa_agent::Evaluator;
use gameqa_common::config::ScoringConfig;
use gameqa_common::{
    ArtifactRef, CaptureContext, Error, Evidence, GameType, LogEntry, LogLevel, Screenshot,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn shot(context: CaptureContext, changed: bool) -> Screenshot {
    let data = frame(changed);
    Screenshot {
        context,
        captured_at: Utc::now(),
        artifact: ArtifactRef::for_bytes(&data),
        width: 64,
        height: 48,
        data: Bytes::from(data),
    }
}

fn evidence(count: usize) -> Evidence {
    let mut screenshots = vec![shot(CaptureContext::Initial, false)];
    for _ in 1..count.saturating_sub(1) {
        screenshots.push(shot(CaptureContext::PostInteraction, true));
    }
    if count > 1 {
        screenshots.push(shot(CaptureContext::Final, true));
    }
    Evidence {
        screenshots,
        logs: vec![LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Error,
            source: None,
            message: "Uncaught TypeError: player is undefined".to_string(),
        }],
    }
}

fn context() -> EvaluationContext {
    EvaluationContext {
        url: "https://games.test/runner".to_string(),
        game_type: Some(GameType::Canvas),
        description: None,
    }
}

fn transient() -> Result<String, ScoringError> {
    Err(ScoringError::Transient("HTTP 429".to_string()))
}

#[tokio::test]
async fn same_evidence_scores_the_same() {
    let evaluator = Evaluator::new(FakeScorer::good(), ScoringConfig::default());
    let evidence = evidence(3);
    let cancel = CancellationToken::new();

    let first = evaluator.evaluate(&context(), &evidence, &cancel).await.unwrap();
    let second = evaluator.evaluate(&context(), &evidence, &cancel).await.unwrap();
    assert_eq!(first.score, second.score);
    assert_eq!(first.attempts, 1);
    assert!(!first.is_degraded());
}

#[tokio::test]
async fn image_count_is_capped() {
    let scorer = FakeScorer::good();
    let evaluator = Evaluator::new(scorer.clone(), ScoringConfig::default());
    evaluator
        .evaluate(&context(), &evidence(9), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        scorer.last_image_count.load(std::sync::atomic::Ordering::SeqCst),
        ScoringConfig::default().max_images
    );
}

#[tokio::test]
async fn malformed_response_is_not_retried() {
    let scorer = FakeScorer::always(Ok("the game looks fun".to_string()));
    let evaluator = Evaluator::new(scorer.clone(), ScoringConfig::default());

    let evaluation = evaluator
        .evaluate(&context(), &evidence(2), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(scorer.calls(), 1);
    assert!(evaluation.is_degraded());
    assert!(evaluation.failure.is_some());
    assert!(evaluation.score.error_severity > 0);
}

#[tokio::test]
async fn rejected_request_is_not_retried() {
    let scorer = FakeScorer::always(Err(ScoringError::Rejected("HTTP 401".to_string())));
    let evaluator = Evaluator::new(scorer.clone(), ScoringConfig::default());
    let evaluation = evaluator
        .evaluate(&context(), &evidence(2), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(scorer.calls(), 1);
    assert!(evaluation.is_degraded());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_linearly() {
    let scorer = FakeScorer::scripted(vec![transient(), transient()], Ok(GOOD_SCORE.to_string()));
    let config = ScoringConfig::default();
    let base = config.retry_base_delay_ms;
    let evaluator = Evaluator::new(scorer.clone(), config);

    let started = tokio::time::Instant::now();
    let evaluation = evaluator
        .evaluate(&context(), &evidence(2), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(scorer.calls(), 3);
    assert_eq!(evaluation.attempts, 3);
    assert!(!evaluation.is_degraded());
    // base after the first failure, twice the base after the second
    assert!(started.elapsed() >= Duration::from_millis(base * 3));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_backoff() {
    let scorer = FakeScorer::always(transient());
    let evaluator = Evaluator::new(scorer.clone(), ScoringConfig::default());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let result = evaluator.evaluate(&context(), &evidence(2), &cancel).await;
    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert_eq!(scorer.calls(), 1);
}

#[tokio::test]
async fn no_screenshots_skips_the_service() {
    let scorer = FakeScorer::good();
    let evaluator = Evaluator::new(scorer.clone(), ScoringConfig::default());
    let evaluation = evaluator
        .evaluate(&context(), &Evidence::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(scorer.calls(), 0);
    assert_eq!(evaluation.attempts, 0);
    assert!(evaluation.is_degraded());
    assert!(evaluation.score.confidence < ScoringConfig::default().low_confidence_threshold);
}
