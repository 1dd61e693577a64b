//! Built-in assistant tools.
//!
//! `getWeatherInformation` needs a human approval before it runs. The local
//! time and scheduling tools execute automatically; the scheduling tools
//! operate on the [`Scheduler`] they are bound to.
//!
//! ```rust,no_run
//! use waypoint::schedule::Scheduler;
//! use waypoint::tools::builtin::default_registry;
//!
//! # async fn example() -> waypoint::error::Result<()> {
//! let (scheduler, _fired) = Scheduler::new();
//! let registry = default_registry(scheduler)?;
//! assert_eq!(registry.len(), 5);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::schedule::{ScheduleKind, Scheduler};
use crate::tools::arguments::ToolInput;
use crate::tools::registry::{ToolContext, ToolDefinition, ToolRegistry};
use crate::tools::types::ToolSchema;

pub const WEATHER_TOOL: &str = "getWeatherInformation";
pub const LOCAL_TIME_TOOL: &str = "getLocalTime";
pub const SCHEDULE_TASK_TOOL: &str = "scheduleTask";
pub const LIST_TASKS_TOOL: &str = "getScheduledTasks";
pub const CANCEL_TASK_TOOL: &str = "cancelScheduledTask";

/// Weather lookup; runs only once the user approves.
pub fn weather_tool() -> ToolDefinition {
    ToolDefinition::on_approval(
        WEATHER_TOOL,
        "Show the weather in a given city to the user",
        ToolSchema::object()
            .string("city", "The city to get the weather for", true)
            .build(),
        |input: ToolInput, _ctx: ToolContext| async move {
            let city = input.str("city")?;
            Ok(json!(format!("The weather in {city} is sunny")))
        },
    )
}

/// Current time for a location, reported in UTC.
pub fn local_time_tool() -> ToolDefinition {
    ToolDefinition::automatic(
        LOCAL_TIME_TOOL,
        "Get the local time for a specified location",
        ToolSchema::object()
            .string("location", "The location to get the time for", true)
            .build(),
        |input: ToolInput, _ctx: ToolContext| async move {
            let location = input.str("location")?;
            Ok(json!({
                "location": location,
                "utcTime": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            }))
        },
    )
}

#[derive(Debug, Deserialize)]
struct ScheduleTaskInput {
    description: String,
    when: When,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum When {
    Scheduled {
        date: DateTime<Utc>,
    },
    Delayed {
        #[serde(rename = "delayInSeconds")]
        delay_in_seconds: u64,
    },
    Cron {
        cron: String,
    },
    NoSchedule,
}

fn when_schema() -> ToolSchema {
    ToolSchema::object()
        .one_of(
            "type",
            "How the task is timed",
            &["scheduled", "delayed", "cron", "no-schedule"],
            true,
        )
        .string("date", "RFC 3339 timestamp for scheduled tasks", false)
        .integer("delayInSeconds", "Delay for delayed tasks", false)
        .string("cron", "Cron expression for recurring tasks", false)
        .build()
}

/// Register a task with `scheduler`.
pub fn schedule_task_tool(scheduler: Scheduler) -> ToolDefinition {
    ToolDefinition::automatic(
        SCHEDULE_TASK_TOOL,
        "A tool to schedule a task to be executed at a later time",
        ToolSchema::object()
            .string("description", "What the task should do", true)
            .object("when", "When the task should run", when_schema(), true)
            .build(),
        move |input: ToolInput, _ctx: ToolContext| {
            let scheduler = scheduler.clone();
            async move {
                let request: ScheduleTaskInput = input.parse()?;
                let kind = match request.when {
                    When::Scheduled { date } => ScheduleKind::Scheduled { date },
                    When::Delayed { delay_in_seconds } => ScheduleKind::Delayed {
                        seconds: delay_in_seconds,
                    },
                    When::Cron { cron } => ScheduleKind::Cron { expression: cron },
                    When::NoSchedule => {
                        return Err(AgentError::InvalidArgument(
                            "not a valid schedule input".into(),
                        ))
                    }
                };
                let schedule = scheduler.schedule(request.description, kind)?;
                Ok(serde_json::to_value(schedule)?)
            }
        },
    )
}

/// List the tasks `scheduler` holds.
pub fn list_tasks_tool(scheduler: Scheduler) -> ToolDefinition {
    ToolDefinition::automatic(
        LIST_TASKS_TOOL,
        "List all tasks that have been scheduled",
        ToolSchema::empty(),
        move |_input: ToolInput, _ctx: ToolContext| {
            let scheduler = scheduler.clone();
            async move {
                let tasks = scheduler.list();
                if tasks.is_empty() {
                    return Ok(json!("No scheduled tasks found."));
                }
                Ok(serde_json::to_value(tasks)?)
            }
        },
    )
}

/// Cancel a task by id.
pub fn cancel_task_tool(scheduler: Scheduler) -> ToolDefinition {
    ToolDefinition::automatic(
        CANCEL_TASK_TOOL,
        "Cancel a scheduled task using its ID",
        ToolSchema::object()
            .string("taskId", "The ID of the task to cancel", true)
            .build(),
        move |input: ToolInput, _ctx: ToolContext| {
            let scheduler = scheduler.clone();
            async move {
                let task_id = input.str("taskId")?;
                if !scheduler.cancel(task_id) {
                    return Err(AgentError::Schedule(format!("no task with id '{task_id}'")));
                }
                Ok(Value::String(format!(
                    "Task {task_id} has been successfully canceled."
                )))
            }
        },
    )
}

/// All built-in tools, with the scheduling tools bound to `scheduler`.
pub fn default_registry(scheduler: Scheduler) -> Result<ToolRegistry> {
    ToolRegistry::new()
        .with(weather_tool())?
        .with(local_time_tool())?
        .with(schedule_task_tool(scheduler.clone()))?
        .with(list_tasks_tool(scheduler.clone()))?
        .with(cancel_task_tool(scheduler))
}
