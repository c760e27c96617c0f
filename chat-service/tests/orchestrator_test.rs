//! Fallback, retry, timeout and cancellation behaviour of the orchestrator.
//!
//! All tests run on tokio's paused clock, so backoff sleeps and attempt
//! timeouts complete instantly while still being measurable.

mod common;

use chat_service::models::{AttemptClass, AttemptOutcome, GeneratedContent, OutputModality};
use chat_service::services::providers::mock::{ScriptedBackend, Step};
use chat_service::services::providers::ProviderError;
use chat_service::services::GenerationError;
use common::{audio_endpoint, endpoint, orchestrator, request, text_request};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn server_error() -> Step {
    Step::Fail(ProviderError::ServerError {
        status: 503,
        message: "overloaded".to_string(),
    })
}

fn rate_limited() -> Step {
    Step::Fail(ProviderError::RateLimited("slow down".to_string()))
}

#[tokio::test(start_paused = true)]
async fn first_endpoint_success_makes_one_call() {
    let backend = Arc::new(ScriptedBackend::new().script("a", [Step::text("hello")]));
    let orch = orchestrator(vec![endpoint("a", 0, 3), endpoint("b", 1, 3)], backend.clone());

    let result = orch
        .generate(&text_request("hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.endpoint_id, "a");
    assert_eq!(result.content, GeneratedContent::Text("hello".to_string()));
    assert_eq!(backend.calls("a"), 1);
    assert_eq!(backend.calls("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn retry_next_advances_to_following_endpoint() {
    let backend = Arc::new(
        ScriptedBackend::with_fallback(rate_limited()).script("b", [Step::text("from b")]),
    );
    let orch = orchestrator(vec![endpoint("a", 0, 3), endpoint("b", 1, 3)], backend.clone());

    let started = Instant::now();
    let result = orch
        .generate(&text_request("hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.endpoint_id, "b");
    assert!(backend.calls("a") <= 3);
    assert_eq!(backend.calls("a"), 1);
    // No backoff before moving on.
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn exhausted_after_every_budget_is_spent() {
    let backend = Arc::new(ScriptedBackend::with_fallback(server_error()));
    let orch = orchestrator(vec![endpoint("a", 0, 2), endpoint("b", 1, 3)], backend.clone());

    let report = orch
        .generate_with_report(&text_request("hi"), &CancellationToken::new())
        .await;

    assert_eq!(report.result, Err(GenerationError::Exhausted { attempts: 5 }));
    assert_eq!(backend.calls("a"), 2);
    assert_eq!(backend.calls("b"), 3);
    assert_eq!(report.remote_calls(), 5);
    assert!(report.attempts.iter().all(|a| matches!(
        a.outcome,
        AttemptOutcome::Failed {
            class: AttemptClass::RetrySame,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_stops_the_chain() {
    let backend = Arc::new(ScriptedBackend::new().script(
        "a",
        [Step::Fail(ProviderError::ContentFiltered("SAFETY".to_string()))],
    ));
    let orch = orchestrator(
        vec![endpoint("a", 0, 3), endpoint("b", 1, 3), endpoint("c", 2, 3)],
        backend.clone(),
    );

    let err = orch
        .generate(&text_request("hi"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Rejected(_)));
    assert_eq!(backend.calls("a"), 1);
    assert_eq!(backend.calls("b"), 0);
    assert_eq!(backend.calls("c"), 0);
}

#[tokio::test(start_paused = true)]
async fn retry_same_recovers_on_same_endpoint() {
    let backend = Arc::new(
        ScriptedBackend::new().script("a", [server_error(), server_error(), Step::text("third")]),
    );
    let orch = orchestrator(vec![endpoint("a", 0, 3), endpoint("b", 1, 3)], backend.clone());

    let result = orch
        .generate(&text_request("hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.endpoint_id, "a");
    assert_eq!(backend.calls("a"), 3);
    assert_eq!(backend.calls("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_and_skips_sleep_after_last_attempt() {
    let backend = Arc::new(ScriptedBackend::with_fallback(server_error()));
    let orch = orchestrator(vec![endpoint("a", 0, 3)], backend.clone());

    let started = Instant::now();
    let result = orch
        .generate(&text_request("hi"), &CancellationToken::new())
        .await;

    assert_eq!(result, Err(GenerationError::Exhausted { attempts: 3 }));
    // 100ms before retry 2, 200ms before retry 3, nothing after the last.
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn attempt_timeout_is_retried_on_same_endpoint() {
    let backend = Arc::new(ScriptedBackend::new().script("a", [Step::Hang, Step::text("late")]));
    let orch = orchestrator(vec![endpoint("a", 0, 2), endpoint("b", 1, 2)], backend.clone());

    let report = orch
        .generate_with_report(&text_request("hi"), &CancellationToken::new())
        .await;

    let result = report.result.unwrap();
    assert_eq!(result.endpoint_id, "a");
    assert_eq!(backend.calls("a"), 2);
    match &report.attempts[0].outcome {
        AttemptOutcome::Failed { class, reason } => {
            assert_eq!(*class, AttemptClass::RetrySame);
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected timeout failure, got {:?}", other),
    }
    assert_eq!(report.attempts[0].latency, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn slow_but_in_time_response_is_accepted() {
    let backend = Arc::new(ScriptedBackend::new().script(
        "a",
        [Step::after(Duration::from_secs(4), Step::text("just in time"))],
    ));
    let orch = orchestrator(vec![endpoint("a", 0, 1)], backend.clone());

    let result = orch
        .generate(&text_request("hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.content, GeneratedContent::Text("just in time".to_string()));
}

#[tokio::test(start_paused = true)]
async fn empty_chain_is_exhausted() {
    let backend = Arc::new(ScriptedBackend::new());
    let orch = orchestrator(Vec::new(), backend.clone());

    let result = orch
        .generate(&text_request("hi"), &CancellationToken::new())
        .await;

    assert_eq!(result, Err(GenerationError::Exhausted { attempts: 0 }));
    assert_eq!(backend.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn endpoints_without_capability_are_skipped_without_calls() {
    let backend = Arc::new(ScriptedBackend::new());
    let orch = orchestrator(
        vec![endpoint("text-only", 0, 2), audio_endpoint("speaker", 1, 2)],
        backend.clone(),
    );

    let report = orch
        .generate_with_report(&request("say hi", OutputModality::Audio), &CancellationToken::new())
        .await;

    let result = report.result.as_ref().unwrap();
    assert_eq!(result.endpoint_id, "speaker");
    assert!(matches!(result.content, GeneratedContent::Audio { .. }));
    assert_eq!(backend.calls("text-only"), 0);
    assert_eq!(report.attempts[0].attempt, 0);
    assert_eq!(report.attempts[0].outcome.label(), "retry_next");
    assert_eq!(report.remote_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn priority_decides_order_not_configuration_order() {
    let backend = Arc::new(ScriptedBackend::with_fallback(rate_limited()).script("first", [Step::text("ok")]));
    let orch = orchestrator(
        vec![endpoint("second", 5, 1), endpoint("first", 1, 1)],
        backend.clone(),
    );

    let result = orch
        .generate(&text_request("hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.endpoint_id, "first");
    assert_eq!(backend.call_log(), vec!["first".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_in_flight_attempt() {
    let backend = Arc::new(ScriptedBackend::new().script("a", [Step::Hang]));
    let orch = orchestrator(vec![endpoint("a", 0, 3), endpoint("b", 1, 3)], backend.clone());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = orch.generate(&text_request("hi"), &cancel).await;

    assert_eq!(result, Err(GenerationError::Cancelled));
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(backend.calls("a"), 1);
    assert_eq!(backend.calls("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_backoff_sleep() {
    let backend = Arc::new(ScriptedBackend::with_fallback(server_error()));
    let mut config = common::test_config();
    config.backoff = service_core::retry::BackoffPolicy::fixed(
        Duration::from_secs(60),
        Duration::from_secs(60),
    );
    let orch = chat_service::services::GenerationOrchestrator::new(
        vec![endpoint("a", 0, 3)],
        backend.clone(),
        config,
    );
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = orch.generate(&text_request("hi"), &cancel).await;

    assert_eq!(result, Err(GenerationError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(backend.calls("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_token_makes_no_calls() {
    let backend = Arc::new(ScriptedBackend::new());
    let orch = orchestrator(vec![endpoint("a", 0, 3)], backend.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orch.generate(&text_request("hi"), &cancel).await;

    assert_eq!(result, Err(GenerationError::Cancelled));
    assert_eq!(backend.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_invocations_do_not_share_state() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .script("a", [rate_limited()])
            .script("b", [Step::text("b answers")]),
    );
    let orch = orchestrator(vec![endpoint("a", 0, 1), endpoint("b", 1, 1)], backend.clone());
    let cancel = CancellationToken::new();

    let first_request = text_request("one");
    let second_request = text_request("two");
    let (first, second) = futures::join!(
        orch.generate(&first_request, &cancel),
        orch.generate(&second_request, &cancel),
    );

    // One call consumed the scripted rate limit; both still produce an answer.
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(backend.calls("a"), 2);
}
