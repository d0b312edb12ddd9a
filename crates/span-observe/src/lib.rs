//! Append-only structured trace of plan / tool-call / tool-result /
//! revert-failure events. The sole cross-session persistent record of
//! agent behavior; consumed by the `status`/`logs`/`diff` CLI commands.
//!
//! Grounded in the teacher's `Observer::record_event` discipline: open,
//! append, close per write, no long-lived file handle, full reload on
//! read. Unlike the teacher's `Observer` this carries no telemetry sink —
//! the distilled spec is explicit that this system is not networked.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use span_core::Event;

pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends one event, flushing before returning. Opens and closes the
    /// file for this write alone.
    pub fn append(&self, event: &Event) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening event log {}", self.path.display()))?;
        let line = serde_json::to_string(event).context("serializing event")?;
        writeln!(file, "{line}").with_context(|| format!("writing to {}", self.path.display()))?;
        file.flush()?;
        Ok(())
    }

    /// Reloads the entire file and returns events in write order. An
    /// absent file yields an empty log rather than an error.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading event log {}", self.path.display()))?;
        let mut events = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(line)
                .with_context(|| format!("parsing event log line: {line}"))?;
            events.push(event);
        }
        Ok(events)
    }

    /// Returns the most recent `n` events, preserving write order.
    pub fn tail(&self, n: usize) -> Result<Vec<Event>> {
        let mut events = self.read_all()?;
        if events.len() > n {
            events = events.split_off(events.len() - n);
        }
        Ok(events)
    }

    /// Removes the log file entirely.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("removing {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(event_type: &str) -> Event {
        Event::new(event_type, json!({"k": "v"}))
    }

    #[test]
    fn round_trip_preserves_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));

        log.append(&sample("plan")).unwrap();
        log.append(&sample("tool_call")).unwrap();
        log.append(&sample("tool_result")).unwrap();

        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, "plan");
        assert_eq!(events[1].event_type, "tool_call");
        assert_eq!(events[2].event_type, "tool_result");
    }

    #[test]
    fn reading_missing_log_yields_empty_vec() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        log.append(&sample("plan")).unwrap();
        assert!(log.path().exists());
        log.clear().unwrap();
        assert!(!log.path().exists());
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn tail_returns_last_n_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        for i in 0..5 {
            log.append(&sample(&format!("event{i}"))).unwrap();
        }
        let tail = log.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].event_type, "event3");
        assert_eq!(tail[1].event_type, "event4");
    }

    #[test]
    fn tail_larger_than_log_returns_whole_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        log.append(&sample("only")).unwrap();
        let tail = log.tail(50).unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn event_type_and_data_are_byte_equal_after_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        let original = Event::new("tool_result", json!({"nested": {"a": 1, "b": [1,2,3]}}));
        log.append(&original).unwrap();

        let events = log.read_all().unwrap();
        assert_eq!(events[0].event_type, original.event_type);
        assert_eq!(events[0].data, original.data);
    }
}
