//! Task scheduler timing and its hand-off to the agent.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::ScriptedProvider;
use waypoint::agent::{InMemoryConversationStore, SessionRegistry};
use waypoint::error::AgentError;
use waypoint::schedule::{ScheduleKind, Scheduler};
use waypoint::tools::builtin::{default_registry, CANCEL_TASK_TOOL, LIST_TASKS_TOOL, SCHEDULE_TASK_TOOL};
use waypoint::tools::{ToolContext, ToolRegistry};

async fn call(registry: &ToolRegistry, name: &str, input: serde_json::Value) -> serde_json::Value {
    let tool = registry.get(name).unwrap();
    let handler = tool.automatic_handler().unwrap();
    tool.execute(handler.as_ref(), &input, ToolContext::default()).await
}

#[tokio::test(start_paused = true)]
async fn delayed_task_fires_once_and_is_removed() {
    let (scheduler, mut fired) = Scheduler::new();
    let schedule = scheduler
        .schedule("water the plants", ScheduleKind::Delayed { seconds: 30 })
        .unwrap();
    assert_eq!(scheduler.list().len(), 1);

    let task = fired.recv().await.unwrap();
    assert_eq!(task.description, "water the plants");
    assert_eq!(task.schedule.id, schedule.id);
    assert!(scheduler.list().is_empty());
}

#[tokio::test(start_paused = true)]
async fn canceled_task_never_fires() {
    let (scheduler, mut fired) = Scheduler::new();
    let schedule = scheduler
        .schedule("call mom", ScheduleKind::Delayed { seconds: 10 })
        .unwrap();

    assert!(scheduler.cancel(&schedule.id));
    assert!(!scheduler.cancel(&schedule.id));
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(fired.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn cron_task_rearms_after_firing() {
    let (scheduler, mut fired) = Scheduler::new();
    let schedule = scheduler
        .schedule("tick", ScheduleKind::Cron { expression: "* * * * * *".into() })
        .unwrap();

    for _ in 0..2 {
        let task = fired.recv().await.unwrap();
        assert_eq!(task.schedule.id, schedule.id);
    }
    assert_eq!(scheduler.list().len(), 1);
}

#[tokio::test]
async fn invalid_schedules_are_rejected() {
    let (scheduler, _fired) = Scheduler::new();
    for kind in [
        ScheduleKind::Cron { expression: "every tuesday".into() },
        ScheduleKind::Delayed { seconds: 0 },
        ScheduleKind::Scheduled { date: chrono::Utc::now() - chrono::TimeDelta::hours(1) },
    ] {
        let err = scheduler.schedule("nope", kind).unwrap_err();
        assert!(matches!(err, AgentError::Schedule(_)));
    }
    assert!(scheduler.list().is_empty());
}

#[tokio::test]
async fn scheduling_tools_drive_the_scheduler() {
    let (scheduler, _fired) = Scheduler::new();
    let registry = default_registry(scheduler.clone()).unwrap();

    let none = call(&registry, LIST_TASKS_TOOL, json!({})).await;
    assert_eq!(none, json!("No scheduled tasks found."));

    let created = call(
        &registry,
        SCHEDULE_TASK_TOOL,
        json!({ "description": "stretch", "when": { "type": "delayed", "delayInSeconds": 600 } }),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["description"], "stretch");

    let listed = call(&registry, LIST_TASKS_TOOL, json!({})).await;
    assert_eq!(listed[0]["id"], id.as_str());

    let canceled = call(&registry, CANCEL_TASK_TOOL, json!({ "taskId": id })).await;
    assert_eq!(canceled, json!(format!("Task {id} has been successfully canceled.")));
    assert!(scheduler.list().is_empty());

    let missing = call(&registry, CANCEL_TASK_TOOL, json!({ "taskId": "ghost" })).await;
    assert!(missing["error"].as_str().unwrap().contains("ghost"));

    let unscheduled = call(
        &registry,
        SCHEDULE_TASK_TOOL,
        json!({ "description": "someday", "when": { "type": "no-schedule" } }),
    )
    .await;
    assert!(unscheduled.get("error").is_some());
}

#[tokio::test(start_paused = true)]
async fn fired_task_lands_in_the_session_history() {
    let sessions = SessionRegistry::new(
        Arc::new(InMemoryConversationStore::new()),
        ScriptedProvider::new(),
    );
    let agent = sessions.get_or_create("reminders").await.unwrap();
    agent
        .scheduler()
        .unwrap()
        .schedule("send report", ScheduleKind::Delayed { seconds: 5 })
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    let history = agent.messages().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text(), "Running scheduled task: send report");
}
