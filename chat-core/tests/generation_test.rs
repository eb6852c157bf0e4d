//! End-to-end generation against recorded engine fixtures.
//!
//! Every test plays back a fixture instead of loading a model, then checks
//! the caller-visible behaviour (text, history) and the engine-side counters
//! (sessions opened and released, steps taken).

use chat_core::{
    AuthorRole, ConversationHistory, EngineError, FinishReason, GenerationError,
    GenerationService, GenerationSettings, ModelOptions, RecordedEngine, RecordedExchange,
    RecordedFixture, SearchOption,
};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn service_with(exchanges: Vec<RecordedExchange>) -> (GenerationService, Arc<RecordedEngine>) {
    let engine = Arc::new(RecordedEngine::new(RecordedFixture { exchanges }));
    let options = ModelOptions::new("/models/recorded")
        .with_model_id("recorded")
        .with_step_workers(4);
    let service = GenerationService::new(engine.clone(), &options).expect("valid options");
    (service, engine)
}

fn history_with_user(message: &str) -> ConversationHistory {
    let mut history = ConversationHistory::new();
    history.add_user_message(message);
    history
}

#[test_log::test(tokio::test)]
async fn test_two_plus_two_scenario() {
    let (service, engine) = service_with(vec![RecordedExchange::new([" 4", "."])
        .for_prompt("<|user|>\n2+2?<|end|>\n<|assistant|>")]);
    let mut history = history_with_user("2+2?");

    let completion = service
        .generate(
            &mut history,
            &GenerationSettings::new().with_max_tokens(5),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!completion.text.is_empty());
    assert_eq!(completion.text, "4.");
    assert_eq!(completion.finish_reason, FinishReason::EndOfSequence);

    let params = engine.last_params().unwrap();
    assert_eq!(params.len(), 1);
    assert_eq!(params.get("max_length"), Some(SearchOption::Int(5)));

    assert_eq!(history.len(), 2);
    assert_eq!(history.turns()[1].role, AuthorRole::Assistant);
    assert_eq!(history.turns()[1].content, "4.");
    assert_eq!(engine.sessions_released(), 1);
}

#[tokio::test]
async fn test_blocking_joins_chunks_without_separator() {
    let (service, _engine) = service_with(vec![RecordedExchange::new(["Hi", "!"])]);
    let mut history = history_with_user("hello");

    let completion = service
        .generate(&mut history, &GenerationSettings::new(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(completion.text, "Hi!");
    assert_eq!(completion.chunk_count, 2);
    assert_eq!(history.len(), 2);
    assert_eq!(history.turns()[1].content, "Hi!");
}

#[tokio::test]
async fn test_failure_before_first_chunk_leaves_history_unchanged() {
    let (service, engine) = service_with(vec![RecordedExchange::new(["never"]).failing_at_step(0)]);
    let mut history = history_with_user("hello");
    let before = history.clone();

    let err = service
        .generate(&mut history, &GenerationSettings::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GenerationError::GenerationFailed(EngineError::Step(_))
    ));
    assert_eq!(history, before);
    assert_eq!(engine.sessions_opened(), 1);
    assert_eq!(engine.sessions_released(), 1);
}

#[tokio::test]
async fn test_prompt_mismatch_is_generation_failure() {
    let (service, engine) =
        service_with(vec![RecordedExchange::new(["x"]).for_prompt("something else")]);
    let mut history = history_with_user("hello");

    let err = service
        .generate(&mut history, &GenerationSettings::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err.engine_error(),
        Some(EngineError::Tokenization(_))
    ));
    assert_eq!(history.len(), 1);
    assert_eq!(engine.sessions_opened(), 0);
}

#[tokio::test]
async fn test_streaming_does_not_touch_history() {
    let (service, engine) = service_with(vec![RecordedExchange::new([" Hello", ",", " world"])]);
    let history = history_with_user("greet me");

    let chunks: Vec<String> = service
        .stream(&history, &GenerationSettings::new(), CancellationToken::new())
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    assert_eq!(chunks, vec!["Hello", ",", " world"]);
    assert_eq!(history.len(), 1);
    assert_eq!(engine.sessions_released(), 1);
}

#[tokio::test]
async fn test_streaming_failure_keeps_delivered_chunks() {
    let (service, engine) =
        service_with(vec![RecordedExchange::new([" a", " b", " c"]).failing_at_step(2)]);
    let history = history_with_user("go");

    let mut stream = service.stream(&history, &GenerationSettings::new(), CancellationToken::new());
    let mut delivered = Vec::new();
    let mut failure = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => delivered.push(chunk),
            Err(e) => failure = Some(e),
        }
    }

    assert_eq!(delivered, vec!["a", " b"]);
    assert!(matches!(failure, Some(GenerationError::GenerationFailed(_))));
    assert_eq!(stream.text(), "a b");
    assert_eq!(engine.sessions_released(), 1);
}

#[tokio::test]
async fn test_cancel_mid_stream_emits_nothing_more() {
    let (service, engine) = service_with(vec![RecordedExchange::new(["1", "2", "3", "4", "5"])]);
    let history = history_with_user("count");
    let cancel = CancellationToken::new();

    let mut stream = service.stream(&history, &GenerationSettings::new(), cancel.clone());
    assert_eq!(stream.next().await.unwrap().unwrap(), "1");
    cancel.cancel();

    assert!(stream.next().await.is_none());
    assert_eq!(stream.finish_reason(), Some(FinishReason::Cancelled));
    assert_eq!(stream.chunk_count(), 1);
    assert_eq!(engine.steps_taken(), 1);
    assert_eq!(engine.sessions_released(), 1);
}

#[tokio::test]
async fn test_blocking_cancel_returns_partial_text_without_recording_it() {
    let (service, engine) = service_with(vec![RecordedExchange::new(["a", "b", "c"])]);
    let mut history = history_with_user("go");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let completion = service
        .generate(&mut history, &GenerationSettings::new(), cancel)
        .await
        .unwrap();

    assert_eq!(completion.finish_reason, FinishReason::Cancelled);
    assert_eq!(completion.text, "");
    assert_eq!(completion.chunk_count, 0);
    assert_eq!(history.len(), 1);
    assert_eq!(history.turns()[0].content, "go");
    assert_eq!(engine.steps_taken(), 0);
    assert_eq!(engine.sessions_released(), 1);
}

#[tokio::test]
async fn test_deadline_cancels_generation() {
    let (service, engine) = service_with(vec![RecordedExchange::new(["a", "b", "c"])]);
    let history = history_with_user("go");
    let cancel = CancellationToken::new();

    let mut stream = service.stream(&history, &GenerationSettings::new(), cancel.clone());
    assert!(stream.next().await.is_some());

    let deadline = chat_common::cancel_after(cancel.clone(), Duration::from_millis(10));
    deadline.await.unwrap();

    assert!(stream.next().await.is_none());
    assert_eq!(stream.finish_reason(), Some(FinishReason::Cancelled));
    assert_eq!(engine.sessions_released(), 1);
}

#[tokio::test]
async fn test_dropped_stream_releases_session() {
    let (service, engine) = service_with(vec![RecordedExchange::new(["a", "b", "c"])]);
    let history = history_with_user("go");

    let mut stream = service.stream(&history, &GenerationSettings::new(), CancellationToken::new());
    stream.next().await.unwrap().unwrap();
    drop(stream);

    assert_eq!(engine.sessions_opened(), 1);
    assert_eq!(engine.sessions_released(), 1);
}

#[tokio::test]
async fn test_fixture_exhaustion_is_reported() {
    let (service, _engine) = service_with(vec![RecordedExchange::new(["only"])]);

    service
        .generate_text("first", &GenerationSettings::new(), CancellationToken::new())
        .await
        .unwrap();
    let err = service
        .generate_text("second", &GenerationSettings::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err.engine_error(),
        Some(EngineError::FixtureExhausted {
            attempted: 2,
            recorded: 1
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_have_independent_sessions() {
    let exchanges = (0..6)
        .map(|i| {
            RecordedExchange::new([format!(" r{}", i), "-".to_string(), format!("{}", i)])
                .for_prompt(format!("request {}", i))
        })
        .collect::<Vec<_>>();
    let (service, engine) = service_with(exchanges);
    let service = Arc::new(service);

    // Encode order follows fixture order, so open every session before stepping.
    let mut handles = Vec::new();
    for i in 0..6 {
        let input = format!("request {}", i);
        let service = Arc::clone(&service);
        let completion = tokio::spawn(async move {
            service
                .generate_text(&input, &GenerationSettings::new(), CancellationToken::new())
                .await
        });
        handles.push((i, completion));
        while engine.sessions_opened() <= i {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    for (i, handle) in handles {
        let completion = handle.await.unwrap().unwrap();
        assert_eq!(completion.text, format!("r{}-{}", i, i));
    }
    assert_eq!(engine.sessions_opened(), 6);
    assert_eq!(engine.sessions_released(), 6);
}

#[tokio::test]
async fn test_service_from_fixture_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"exchanges": [{{"prompt": "<|system|>\nBe brief.<|user|>\nHi<|end|>\n<|assistant|>", "tokens": [" Hello", "!"]}}]}}"#
    )
    .unwrap();

    let engine = Arc::new(RecordedEngine::from_file(file.path()).unwrap());
    let service = GenerationService::new(engine.clone(), &ModelOptions::new("/m")).unwrap();

    let mut history = ConversationHistory::new();
    history.add_system_message("Be brief.");
    history.add_user_message("Hi");
    let completion = service
        .generate(&mut history, &GenerationSettings::new(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(completion.text, "Hello!");
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn test_settings_from_generic_json() {
    let (service, engine) = service_with(vec![RecordedExchange::new(["ok"])]);
    let settings = GenerationSettings::from_json(serde_json::json!({
        "temperature": 0.7,
        "min_tokens": 1,
        "num_beams": 4,
        "stop": ["\n"]
    }))
    .unwrap();

    service
        .generate_text("go", &settings, CancellationToken::new())
        .await
        .unwrap();

    let params = engine.last_params().unwrap();
    assert_eq!(params.get("temperature"), Some(SearchOption::Float(0.7)));
    assert_eq!(params.get("min_length"), Some(SearchOption::Int(1)));
    assert_eq!(params.get("max_length"), Some(SearchOption::Int(2048)));
    assert_eq!(params.get("num_beams"), None);
    assert_eq!(params.get("stop"), None);
    assert_eq!(params.len(), 3);
}
