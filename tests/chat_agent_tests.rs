//! ChatAgent commit points, failure handling, cancellation and scheduled tasks.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use common::*;
use waypoint::agent::{ChatAgent, ConversationStore, FileConversationStore, OnFinish};
use waypoint::schedule::{Schedule, ScheduleKind};
use waypoint::tools::ToolRegistry;
use waypoint::types::*;

fn counting_on_finish(counter: Arc<AtomicUsize>) -> OnFinish {
    Box::new(move |_message| {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    })
}

fn schedule_stub(description: &str) -> Schedule {
    Schedule {
        id: "sched-1".into(),
        description: description.into(),
        kind: ScheduleKind::Delayed { seconds: 60 },
        next_run: chrono::Utc::now(),
        created_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn scheduled_task_appends_exactly_one_user_message() {
    let (agent, _store) = agent(ScriptedProvider::new(), ToolRegistry::new());
    let before = vec![Message::user("hello"), Message::assistant(vec![Part::text("hi")])];
    agent
        .on_chat_message(before.clone(), None, CancellationToken::new())
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await;
    let stored_before = agent.messages().await.unwrap();

    agent
        .execute_task("send report", &schedule_stub("send report"))
        .await
        .unwrap();

    let after = agent.messages().await.unwrap();
    assert_eq!(after.len(), stored_before.len() + 1);
    assert_eq!(&after[..stored_before.len()], &stored_before[..]);
    let added = after.last().unwrap();
    assert_eq!(added.role, Role::User);
    assert_eq!(added.text(), "Running scheduled task: send report");
    assert!(added.metadata.created_at.is_some());
}

#[tokio::test]
async fn on_finish_receives_the_assembled_message_once() {
    let provider = ScriptedProvider::with(vec![Script::text("Hello there!")]);
    let (agent, _store) = agent(provider, ToolRegistry::new());
    let (tx, rx) = oneshot::channel();
    let on_finish: OnFinish = Box::new(move |message| {
        Box::pin(async move {
            let _ = tx.send(message);
        })
    });

    let events = collect(
        agent
            .on_chat_message(vec![Message::user("hi")], Some(on_finish), CancellationToken::new())
            .await
            .unwrap(),
    )
    .await;

    let finished = rx.await.unwrap();
    assert_eq!(finished.role, Role::Assistant);
    assert_eq!(finished.text(), "Hello there!");
    assert_eq!(
        events[0],
        StreamEvent::Start {
            message_id: finished.id.clone()
        }
    );
    assert_eq!(agent.messages().await.unwrap().last().unwrap().id, finished.id);
}

#[tokio::test]
async fn model_failure_ends_with_error_and_skips_on_finish() {
    let provider = ScriptedProvider::with(vec![Script::FailAfter("Partial ".into())]);
    let (agent, _store) = agent(provider, ToolRegistry::new());
    let finished = Arc::new(AtomicUsize::new(0));

    let events = collect(
        agent
            .on_chat_message(
                vec![Message::user("hi").with_id("u1")],
                Some(counting_on_finish(finished.clone())),
                CancellationToken::new(),
            )
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(text_of(&events), "Partial ");
    match events.last() {
        Some(StreamEvent::Error { error_text }) => {
            assert!(error_text.contains("upstream connection reset"))
        }
        other => panic!("expected terminal error, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Finish { .. })));
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    // only the inbound batch was committed
    let history = agent.messages().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, "u1");
}

#[tokio::test]
async fn rejected_stream_surfaces_as_error_event() {
    let provider = ScriptedProvider::with(vec![Script::Reject("model overloaded".into())]);
    let (agent, _store) = agent(provider, ToolRegistry::new());

    let events = collect(
        agent
            .on_chat_message(vec![Message::user("hi")], None, CancellationToken::new())
            .await
            .unwrap(),
    )
    .await;

    assert!(matches!(events[0], StreamEvent::Start { .. }));
    assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
}

#[tokio::test]
async fn abort_stops_events_and_skips_on_finish() {
    let provider = ScriptedProvider::with(vec![Script::Hang("Thinking".into())]);
    let (agent, _store) = agent(provider, ToolRegistry::new());
    let finished = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();

    let mut stream = agent
        .on_chat_message(
            vec![Message::user("hi")],
            Some(counting_on_finish(finished.clone())),
            cancel.clone(),
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(event) = stream.next().await {
        let is_delta = matches!(event, StreamEvent::TextDelta { .. });
        seen.push(event);
        if is_delta {
            cancel.cancel();
        }
    }

    assert!(!seen.iter().any(StreamEvent::is_terminal));
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    // the run lock is released once the canceled turn unwinds
    tokio::time::timeout(
        Duration::from_secs(1),
        agent.execute_task("after abort", &schedule_stub("after abort")),
    )
    .await
    .expect("run lock released")
    .unwrap();
}

#[tokio::test]
async fn scheduled_task_waits_for_the_active_turn() {
    let provider = ScriptedProvider::with(vec![Script::text("Done.")]);
    let (agent, _store) = agent(provider, ToolRegistry::new());

    let stream = agent
        .on_chat_message(vec![Message::user("hi")], None, CancellationToken::new())
        .await
        .unwrap();
    let task_agent = Arc::clone(&agent);
    let task = tokio::spawn(async move {
        task_agent
            .execute_task("nightly backup", &schedule_stub("nightly backup"))
            .await
    });
    collect(stream).await;
    task.await.unwrap().unwrap();

    let history = agent.messages().await.unwrap();
    let texts: Vec<String> = history.iter().map(Message::text).collect();
    assert_eq!(texts, vec!["hi", "Done.", "Running scheduled task: nightly backup"]);
}

#[tokio::test]
async fn file_store_keeps_history_across_agents() {
    let dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn ConversationStore> = Arc::new(FileConversationStore::new(dir.path()));
    let build = |provider: Arc<ScriptedProvider>| {
        Arc::new(
            ChatAgent::builder()
                .session_id("persisted")
                .store(Arc::clone(&store))
                .registry(Arc::new(weather_registry(Default::default(), json!("sunny"))))
                .provider(provider)
                .build(),
        )
    };

    let first = build(ScriptedProvider::with(vec![Script::tool_call(
        "w1",
        "getWeatherInformation",
        json!({ "city": "Lisbon" }),
    )]));
    collect(
        first
            .on_chat_message(vec![Message::user("weather in Lisbon?")], None, CancellationToken::new())
            .await
            .unwrap(),
    )
    .await;
    drop(first);

    let second = build(ScriptedProvider::with(vec![Script::text("Sunny in Lisbon.")]));
    let events = collect(
        second
            .on_chat_message(
                vec![Message::user("yes").with_decision("w1", ToolDecision::Approved)],
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(
        events[0],
        StreamEvent::ToolOutputAvailable {
            tool_call_id: "w1".into(),
            output: json!("sunny"),
        }
    );
    let history = store.load("persisted").await.unwrap();
    assert_eq!(history.last().unwrap().text(), "Sunny in Lisbon.");
}
