//! `span logs [--session ID] [--tail N]` — prints recorded events in write
//! order, optionally restricted to one session and/or the last N entries.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use span_observe::EventLog;

pub fn execute(cwd: &Path, session: Option<String>, tail: Option<usize>) -> Result<()> {
    let log = EventLog::new(cwd.join(".span").join("events.jsonl"));
    let mut events = match tail {
        Some(n) => log.tail(n).context("reading event log")?,
        None => log.read_all().context("reading event log")?,
    };

    if let Some(session_id) = session.as_deref() {
        events.retain(|e| e.data.get("session_id").and_then(Value::as_str) == Some(session_id));
    }

    if events.is_empty() {
        println!("no matching events");
        return Ok(());
    }

    for event in events {
        println!("{} {} {}", event.timestamp.to_rfc3339(), event.event_type, event.data);
    }

    Ok(())
}
