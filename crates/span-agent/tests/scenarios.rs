//! End-to-end exercise of `AgentEngine::run_task` against a real temp
//! working tree, driving the model side with a scripted `LlmClient` so the
//! whole plan → turn loop → finalize pipeline runs deterministically.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;

use serde_json::json;

use span_agent::{AgentEngine, ScriptedAnswers};
use span_core::{AgentLimits, Config};
use span_llm::{ContentBlock, LlmClient, Message, ToolSchema};

struct ScriptedLlm {
    responses: RefCell<VecDeque<Message>>,
}

impl ScriptedLlm {
    fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().collect()),
        }
    }
}

impl LlmClient for ScriptedLlm {
    fn send_message(
        &self,
        _system_prompt: &str,
        _message_history: &[Message],
        _tool_schemas: &[ToolSchema],
        _max_tokens: u32,
    ) -> anyhow::Result<Message> {
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted llm exhausted"))
    }
}

fn text_only(text: &str) -> Message {
    Message {
        role: "assistant".to_string(),
        content: vec![ContentBlock::Text { text: text.to_string() }],
    }
}

fn tool_use(id: &str, name: &str, input: serde_json::Value) -> Message {
    Message {
        role: "assistant".to_string(),
        content: vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }],
    }
}

fn config_syntax_only() -> Config {
    let mut cfg = Config::default();
    cfg.verification.ruff = false;
    cfg.verification.pytest = false;
    cfg.verification.mypy = false;
    cfg.verification.mypy_full = false;
    cfg
}

#[test]
fn full_pipeline_accepts_a_single_edit_and_keeps_it() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.py"), "x = 1\ny = 2\nz = 3\nw = 4\nv = 5\n").unwrap();

    let diff = "--- a.py\n+++ a.py\n@@ -1,5 +1,5 @@\n x = 1\n-y = 2\n+y = 22\n z = 3\n w = 4\n v = 5\n";
    let llm = ScriptedLlm::new(vec![
        text_only("1. read a.py\n2. change y to 22\n3. stop"),
        tool_use("t1", "apply_patch", json!({"path": "a.py", "diff": diff})),
        text_only("done"),
    ]);

    let mut engine =
        AgentEngine::with_in_memory_index(dir.path().to_path_buf(), config_syntax_only(), llm, AgentLimits::default())
            .unwrap();

    let mut io = ScriptedAnswers::new([true]);
    let (session, kept) = engine.run_task("change y to 22", false, &mut io).unwrap();

    assert!(kept);
    assert!(session.changes.is_empty(), "kept changes clear the change list");
    assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), "x = 1\ny = 22\nz = 3\nw = 4\nv = 5\n");
}

#[test]
fn full_pipeline_reverts_when_user_declines_at_finalization() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.py"), "x = 1\ny = 2\nz = 3\nw = 4\nv = 5\n").unwrap();
    let original = fs::read_to_string(dir.path().join("a.py")).unwrap();

    let diff = "--- a.py\n+++ a.py\n@@ -1,5 +1,5 @@\n x = 1\n-y = 2\n+y = 22\n z = 3\n w = 4\n v = 5\n";
    let llm = ScriptedLlm::new(vec![
        text_only("plan"),
        tool_use("t1", "apply_patch", json!({"path": "a.py", "diff": diff})),
        text_only("done"),
    ]);

    let mut engine =
        AgentEngine::with_in_memory_index(dir.path().to_path_buf(), config_syntax_only(), llm, AgentLimits::default())
            .unwrap();

    let mut io = ScriptedAnswers::new([false]);
    let (_, kept) = engine.run_task("change y to 22", false, &mut io).unwrap();

    assert!(kept, "finalize returns true even on a successful revert");
    assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), original);
}

#[test]
fn plan_review_abort_never_touches_the_working_tree() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
    let original = fs::read_to_string(dir.path().join("a.py")).unwrap();

    let llm = ScriptedLlm::new(vec![text_only("1. edit a.py\n2. stop")]);
    let mut engine =
        AgentEngine::with_in_memory_index(dir.path().to_path_buf(), config_syntax_only(), llm, AgentLimits::default())
            .unwrap();

    let mut io = ScriptedAnswers::new([false]);
    let result = engine.run_task("change something", true, &mut io);

    assert!(result.is_err());
    assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), original);
}
