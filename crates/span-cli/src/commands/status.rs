//! `span status` — summarizes the most recent session recorded in the
//! event log: task, change count, first few errors. Reads `.span/events.jsonl`
//! directly rather than replaying the full engine, since this is a
//! read-only projection over already-persisted state.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use span_observe::EventLog;

pub fn execute(cwd: &Path) -> Result<()> {
    let events = EventLog::new(cwd.join(".span").join("events.jsonl"))
        .read_all()
        .context("reading event log")?;

    let Some(session_id) = events
        .iter()
        .rev()
        .find(|e| e.event_type == "session_start")
        .and_then(|e| e.data.get("session_id"))
        .and_then(Value::as_str)
    else {
        println!("no sessions recorded yet");
        return Ok(());
    };

    let belongs = |data: &Value| data.get("session_id").and_then(Value::as_str) == Some(session_id);

    let task = events
        .iter()
        .find(|e| e.event_type == "session_start" && belongs(&e.data))
        .and_then(|e| e.data.get("task"))
        .and_then(Value::as_str)
        .unwrap_or("<unknown task>");

    let applied = events
        .iter()
        .filter(|e| e.event_type == "tool_result" && belongs(&e.data))
        .filter(|e| e.data.get("text").and_then(Value::as_str).is_some_and(|t| t.contains("applied and verified")))
        .count();

    let errors: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == "tool_result" && belongs(&e.data))
        .filter_map(|e| e.data.get("text").and_then(Value::as_str))
        .filter(|t| !t.contains("applied and verified"))
        .filter(|t| t.starts_with("patch failed") || t.contains("Error") || t.contains("Failure"))
        .take(3)
        .collect();

    let outcome = events
        .iter()
        .rev()
        .find(|e| e.event_type == "finalize" && belongs(&e.data))
        .and_then(|e| e.data.get("outcome"))
        .and_then(Value::as_str)
        .unwrap_or("in progress");

    println!("session: {session_id}");
    println!("task: {task}");
    println!("changes kept: {applied}");
    println!("outcome: {outcome}");
    if !errors.is_empty() {
        println!("recent errors:");
        for err in errors {
            println!("  - {err}");
        }
    }

    Ok(())
}
