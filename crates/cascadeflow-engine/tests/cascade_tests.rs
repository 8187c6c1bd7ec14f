//! Cascade engine behavior with mock providers.

use std::sync::Arc;

use cascadeflow_core::{ChunkPhase, ModelConfig, StreamEvent};
use cascadeflow_engine::{CascadeConfig, CascadeEngine, CascadeRequest};
use cascadeflow_llm::{MockProvider, MockResponse};

fn config() -> CascadeConfig {
    let drafter = ModelConfig::new("draft-model", "mock", 1.0);
    let verifier = ModelConfig::new("verify-model", "mock", 2.0);
    CascadeConfig::new(drafter, verifier)
}

fn engine(drafter: MockProvider, verifier: MockProvider) -> Arc<CascadeEngine> {
    Arc::new(CascadeEngine::new(
        config(),
        Arc::new(drafter),
        Arc::new(verifier),
    ))
}

async fn collect(engine: &Arc<CascadeEngine>, request: CascadeRequest) -> Vec<StreamEvent> {
    let mut rx = engine.stream(request);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

#[tokio::test]
async fn good_draft_is_accepted_without_verifier() {
    let drafter = MockProvider::new("mock")
        .with_mock_response(MockResponse::text("4").with_usage(100, 50));
    let verifier = MockProvider::new("mock");
    let verifier_requests = verifier.recorded_requests();

    let engine = engine(drafter, verifier);
    let result = engine
        .run(&CascadeRequest::from_prompt("What is 2+2?"))
        .await
        .unwrap();

    assert!(result.draft_accepted);
    assert_eq!(result.content, "4");
    assert_eq!(result.model_used, "draft-model");
    assert!(result.quality_score >= 0.65);
    assert_eq!(result.complexity, "simple");
    // Verifier never ran.
    assert!(verifier_requests.lock().is_empty());
    // Accepted path: savings are the avoided verifier call.
    // draft: 150 tokens at 1.0/1K = 0.15; avoided: 150 at 2.0/1K = 0.30.
    assert!((result.cost - 0.15).abs() < 1e-9);
    assert!((result.cost_saved - 0.15).abs() < 1e-9);
}

#[tokio::test]
async fn bad_draft_escalates_to_verifier() {
    let drafter = MockProvider::new("mock")
        .with_mock_response(MockResponse::text("Bananas are yellow fruit").with_usage(100, 20));
    let verifier = MockProvider::new("mock").with_mock_response(
        MockResponse::text("TCP is connection-oriented; UDP is datagram-based.")
            .with_usage(100, 40),
    );

    let engine = engine(drafter, verifier);
    let result = engine
        .run(&CascadeRequest::from_prompt(
            "Explain the difference between TCP and UDP protocols",
        ))
        .await
        .unwrap();

    assert!(!result.draft_accepted);
    assert_eq!(result.model_used, "verify-model");
    assert!(result.content.starts_with("TCP is"));
    // Rejected path: the drafter tokens were wasted.
    // draft: 120 at 1.0/1K = 0.12; verifier: 140 at 2.0/1K = 0.28.
    assert!((result.cost - 0.40).abs() < 1e-9);
    assert!((result.cost_saved - (-0.12)).abs() < 1e-9);
    assert_eq!(result.metadata["draft_total_tokens"], 120);
    assert_eq!(result.metadata["verifier_total_tokens"], 140);
    assert_eq!(result.metadata["total_tokens"], 260);
}

#[tokio::test]
async fn drafter_failure_degrades_to_verifier_only() {
    let drafter = MockProvider::new("mock").with_error("connection reset", None);
    let verifier = MockProvider::new("mock")
        .with_mock_response(MockResponse::text("verified answer").with_usage(50, 25));

    let engine = engine(drafter, verifier);
    let result = engine
        .run(&CascadeRequest::from_prompt("Anything at all"))
        .await
        .unwrap();

    assert!(!result.draft_accepted);
    assert_eq!(result.content, "verified answer");
    assert!(result.metadata.contains_key("drafter_error"));
    assert_eq!(result.metadata["draft_total_tokens"], 0);
}

#[tokio::test]
async fn verifier_failure_after_rejection_propagates() {
    let drafter = MockProvider::new("mock")
        .with_mock_response(MockResponse::text("nope").with_usage(10, 5));
    let verifier = MockProvider::new("mock").with_error("overloaded", Some(529));

    let engine = engine(drafter, verifier);
    let err = engine
        .run(&CascadeRequest::from_prompt(
            "Explain the difference between TCP and UDP protocols",
        ))
        .await
        .unwrap_err();

    assert_eq!(err.upstream_status(), Some(529));
}

#[tokio::test]
async fn stream_accept_path_event_order() {
    let drafter = MockProvider::new("mock")
        .with_mock_response(MockResponse::text("4").with_usage(100, 50));
    let verifier = MockProvider::new("mock");

    let engine = engine(drafter, verifier);
    let events = collect(&engine, CascadeRequest::from_prompt("What is 2+2?")).await;

    assert!(matches!(events[0], StreamEvent::Routing { .. }));
    assert!(matches!(
        events[1],
        StreamEvent::TextChunk {
            phase: ChunkPhase::Draft,
            ..
        }
    ));
    let decision_idx = events
        .iter()
        .position(|e| matches!(e, StreamEvent::DraftDecision { .. }))
        .unwrap();
    match &events[decision_idx] {
        StreamEvent::DraftDecision { accepted, .. } => assert!(*accepted),
        _ => unreachable!(),
    }
    assert!(matches!(events.last().unwrap(), StreamEvent::Complete { .. }));
    // No switch event on the accept path.
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Switch { .. })));
}

#[tokio::test]
async fn stream_reject_path_switches_to_verifier() {
    let drafter = MockProvider::new("mock")
        .with_mock_response(MockResponse::text("wrong draft").with_usage(10, 2));
    let verifier = MockProvider::new("mock")
        .with_mock_response(MockResponse::text("right answer").with_usage(10, 2));

    let engine = engine(drafter, verifier);
    let events = collect(
        &engine,
        CascadeRequest::from_prompt("Explain the difference between TCP and UDP protocols"),
    )
    .await;

    // Draft chunks come before the (rejecting) decision, then a switch, then
    // verifier chunks.
    let decision_idx = events
        .iter()
        .position(|e| matches!(e, StreamEvent::DraftDecision { accepted: false, .. }))
        .expect("rejecting decision");
    let switch_idx = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Switch { .. }))
        .expect("switch event");
    assert!(switch_idx > decision_idx);

    let draft_text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextChunk {
                content,
                phase: ChunkPhase::Draft,
            } => Some(content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(draft_text, "wrong draft");

    let verifier_text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextChunk {
                content,
                phase: ChunkPhase::Verifier,
            } => Some(content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(verifier_text, "right answer");

    // All verifier chunks come after the switch.
    let first_verifier_idx = events
        .iter()
        .position(|e| {
            matches!(
                e,
                StreamEvent::TextChunk {
                    phase: ChunkPhase::Verifier,
                    ..
                }
            )
        })
        .unwrap();
    assert!(first_verifier_idx > switch_idx);
    assert!(matches!(events.last().unwrap(), StreamEvent::Complete { .. }));
}

#[tokio::test]
async fn stream_verifier_error_surfaces_as_error_event() {
    let drafter = MockProvider::new("mock")
        .with_mock_response(MockResponse::text("nope").with_usage(10, 2));
    let verifier = MockProvider::new("mock").with_error("overloaded", Some(529));

    let engine = engine(drafter, verifier);
    let events = collect(
        &engine,
        CascadeRequest::from_prompt("Explain the difference between TCP and UDP protocols"),
    )
    .await;

    match events.last().unwrap() {
        StreamEvent::Error {
            message,
            status_code,
        } => {
            assert_eq!(*status_code, Some(529));
            assert!(message.contains("overloaded"));
        }
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn function_call_fast_path_accepts_tool_drafts() {
    // The drafter answers a tool prompt with a structured tool response; the
    // scorer's function-call fast path should accept it.
    let drafter = MockProvider::new("mock").with_mock_response(
        MockResponse::text("Tool: get_weather\nParameters: {\"location\": \"Paris\"}")
            .with_usage(50, 10),
    );
    let verifier = MockProvider::new("mock");
    let verifier_requests = verifier.recorded_requests();

    let engine = engine(drafter, verifier);
    let result = engine
        .run(&CascadeRequest::from_prompt(
            "You have access to the following tools:\n- get_weather: Returns weather for a city.\n\
             Call the function when needed. Respond with Tool and Parameters.",
        ))
        .await
        .unwrap();

    assert!(result.draft_accepted);
    assert!(verifier_requests.lock().is_empty());
    assert!((result.quality_score - 0.72).abs() < 1e-9);
}

#[tokio::test]
async fn cascade_decisions_fire_callbacks() {
    use cascadeflow_telemetry::{CallbackEvent, CallbackManager};

    let drafter = MockProvider::new("mock")
        .with_mock_response(MockResponse::text("4").with_usage(100, 50));
    let verifier = MockProvider::new("mock");
    let callbacks = Arc::new(CallbackManager::new());

    let engine = Arc::new(
        CascadeEngine::new(config(), Arc::new(drafter), Arc::new(verifier))
            .with_callbacks(Arc::clone(&callbacks)),
    );
    engine
        .run(&CascadeRequest::from_prompt("What is 2+2?"))
        .await
        .unwrap();

    assert_eq!(callbacks.triggers_for(CallbackEvent::QueryStart), 1);
    assert_eq!(callbacks.triggers_for(CallbackEvent::CascadeDecision), 1);
}
