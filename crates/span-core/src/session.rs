use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One accepted edit. Owned exclusively by the `SessionState` that produced
/// it; never shared or mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOp {
    pub path: String,
    pub forward_diff: String,
    pub reverse_diff: String,
    pub step_id: u64,
    pub timestamp: DateTime<Utc>,
}

/// One message in the model transcript, either a plain text turn or a
/// tool-result envelope. Kept as raw JSON since the wire shape is owned by
/// LLMBridge, not by the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: String,
    pub content: Value,
}

/// Hard resource limits for one task execution. Checked before every model
/// request and before every tool invocation; breaching one is a clean stop,
/// never a retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentLimits {
    pub max_turns: u64,
    pub max_tool_calls: u64,
    pub max_patch_attempts: u64,
    pub max_retries_per_patch: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tool_calls: 50,
            max_patch_attempts: 15,
            max_retries_per_patch: 3,
        }
    }
}

/// The in-memory record for one task execution.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub original_task: String,
    pub transcript: Vec<TranscriptMessage>,
    pub changes: Vec<ChangeOp>,
    pub turn_count: u64,
    pub tool_call_count: u64,
    pub patch_attempt_count: u64,
    pub retry_count: BTreeMap<String, u64>,
    pub created_files: HashSet<String>,
    pub last_errors: Vec<String>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, original_task: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            original_task: original_task.into(),
            transcript: Vec::new(),
            changes: Vec::new(),
            turn_count: 0,
            tool_call_count: 0,
            patch_attempt_count: 0,
            retry_count: BTreeMap::new(),
            created_files: HashSet::new(),
            last_errors: Vec::new(),
        }
    }

    /// Which limit, if any, has been reached. Names match the distilled
    /// spec's stop-reason strings exactly (`"max_turns"`, `"max_tool_calls"`,
    /// `"max_patch_attempts"`), since they are surfaced verbatim to the user.
    pub fn exceeded_limit(&self, limits: &AgentLimits) -> Option<&'static str> {
        if self.turn_count >= limits.max_turns {
            return Some("max_turns");
        }
        if self.tool_call_count >= limits.max_tool_calls {
            return Some("max_tool_calls");
        }
        if self.patch_attempt_count >= limits.max_patch_attempts {
            return Some("max_patch_attempts");
        }
        None
    }

    pub fn retries_for(&self, path: &str) -> u64 {
        self.retry_count.get(path).copied().unwrap_or(0)
    }
}
