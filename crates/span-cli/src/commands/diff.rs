//! `span diff [--session ID]` — reconstructs the per-file diffs of a
//! session's accepted changes from the `apply_patch` tool_call/tool_result
//! event pairs. There is no separate patch-staging store; the event log is
//! the only record of what was applied.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use span_observe::EventLog;

pub fn execute(cwd: &Path, session: Option<String>) -> Result<()> {
    let events = EventLog::new(cwd.join(".span").join("events.jsonl"))
        .read_all()
        .context("reading event log")?;

    let session_id = match session {
        Some(id) => Some(id),
        None => events
            .iter()
            .rev()
            .find(|e| e.event_type == "session_start")
            .and_then(|e| e.data.get("session_id"))
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    let Some(session_id) = session_id else {
        println!("no sessions recorded yet");
        return Ok(());
    };

    let verified_call_ids: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == "tool_result")
        .filter(|e| e.data.get("session_id").and_then(Value::as_str) == Some(session_id.as_str()))
        .filter(|e| e.data.get("text").and_then(Value::as_str).is_some_and(|t| t.contains("applied and verified")))
        .filter_map(|e| e.data.get("tool_use_id").and_then(Value::as_str))
        .collect();

    let mut printed = 0;
    for event in &events {
        if event.event_type != "tool_call" {
            continue;
        }
        if event.data.get("session_id").and_then(Value::as_str) != Some(session_id.as_str()) {
            continue;
        }
        if event.data.get("name").and_then(Value::as_str) != Some("apply_patch") {
            continue;
        }
        let Some(call_id) = event.data.get("tool_use_id").and_then(Value::as_str) else {
            continue;
        };
        if !verified_call_ids.contains(&call_id) {
            continue;
        }
        let path = event.data["input"].get("path").and_then(Value::as_str).unwrap_or("<unknown>");
        let diff = event.data["input"].get("diff").and_then(Value::as_str).unwrap_or("");
        println!("--- {path} ---");
        println!("{diff}");
        printed += 1;
    }

    if printed == 0 {
        println!("no accepted changes for session {session_id}");
    }

    Ok(())
}
