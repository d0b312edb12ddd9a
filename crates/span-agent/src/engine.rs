//! The core orchestrator: planning, the turn loop, patch-with-verify,
//! limit accounting, finalization, and revision. Represented as an
//! explicit state machine (`plan` → `turn_loop` → `finalize`) rather than
//! a single recursive call, per the design note in §9 of the distilled
//! spec — this keeps limit checks uniform and each stage independently
//! testable.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use serde_json::json;

use span_core::{AgentLimits, ChangeOp, Config, Event, SessionState, SpanError, SpanResult, TranscriptMessage};
use span_diff::apply as apply_diff;
use span_index::DependencyIndex;
use span_llm::{extract_text, extract_tool_calls, has_tool_use, ContentBlock, LlmClient, Message, ToolCallRequest};
use span_observe::EventLog;
use span_verify::VerifyOutcome;

use crate::interaction::UserInteraction;
use crate::prompts::{compress_plan_preview, revision_summary, EXECUTE_SYSTEM_PROMPT, MAX_TOKENS, PLAN_SYSTEM_PROMPT};
use crate::tools::{self, ToolCall};

const SHELL_TIMEOUT: Duration = Duration::from_secs(300);

pub struct AgentEngine<L: LlmClient> {
    project_root: PathBuf,
    config: Config,
    llm: L,
    events: EventLog,
    index: Option<DependencyIndex>,
    limits: AgentLimits,
}

impl<L: LlmClient> AgentEngine<L> {
    /// Opens (or creates) `.span/` under `project_root` for the event log
    /// and dependency index, matching the persisted-state layout of §6.
    pub fn new(project_root: PathBuf, config: Config, llm: L, limits: AgentLimits) -> anyhow::Result<Self> {
        let state_dir = project_root.join(".span");
        std::fs::create_dir_all(&state_dir)?;
        let events = EventLog::new(state_dir.join("events.jsonl"));
        let index = DependencyIndex::open(&state_dir.join("repo.db")).ok();
        Ok(Self {
            project_root,
            config,
            llm,
            events,
            index,
            limits,
        })
    }

    /// Builds an engine over an in-memory dependency index, for tests that
    /// don't want a `repo.db` file on disk. The event log still lives
    /// under `project_root/.span/` — only the dependency index is
    /// in-memory.
    pub fn with_in_memory_index(project_root: PathBuf, config: Config, llm: L, limits: AgentLimits) -> anyhow::Result<Self> {
        let state_dir = project_root.join(".span");
        std::fs::create_dir_all(&state_dir)?;
        Ok(Self {
            events: EventLog::new(state_dir.join("events.jsonl")),
            project_root,
            config,
            llm,
            index: DependencyIndex::open_in_memory().ok(),
            limits,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gives `span-cli`'s `status`/`logs`/`diff` commands read access to the
    /// same event log this engine writes, without a second open handle.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Disables affected-test narrowing: `patch_with_verify` then falls
    /// back to `config.fallback_tests` (or skips the test stage, if that's
    /// empty too) instead of asking the dependency index. Backs `span run
    /// --full`, which asks for the whole configured suite rather than a
    /// dependency-narrowed subset.
    pub fn disable_dependency_index(&mut self) {
        self.index = None;
    }

    fn log_event(&self, event_type: &str, data: serde_json::Value) {
        let event = Event::new(event_type, data);
        let _ = self.events.append(&event);
    }

    /// Sends the task to the model under the PLAN prompt with no tools and
    /// records the `plan` event.
    pub fn plan(&mut self, session: &mut SessionState) -> SpanResult<String> {
        let task_message = text_message("user", &session.original_task);
        let response = self
            .llm
            .send_message(PLAN_SYSTEM_PROMPT, &[task_message], &[], MAX_TOKENS)
            .map_err(|e| SpanError::ModelError(e.to_string()))?;
        let plan_text = extract_text(&response);
        self.log_event("plan", json!({"session_id": session.session_id, "text": plan_text}));
        Ok(plan_text)
    }

    /// When `plan_review` is requested, shows a compressed preview and
    /// waits for approval. Returns `false` on a decisive "n".
    pub fn maybe_review_plan(&mut self, plan_text: &str, plan_review: bool, io: &mut dyn UserInteraction) -> bool {
        if !plan_review {
            return true;
        }
        io.show(&compress_plan_preview(plan_text));
        io.confirm("Proceed with this plan?")
    }

    /// Seeds the transcript with a single user message containing the task
    /// and the plan, as the turn loop's starting point.
    pub fn seed_transcript(&self, session: &mut SessionState, plan_text: &str) {
        let content = format!("Task: {}\n\nPlan:\n{plan_text}", session.original_task);
        session.transcript.push(text_message("user", &content));
    }

    /// Runs the turn loop to completion: either the model stops emitting
    /// tool use (`"model_complete"`) or a limit is hit (the limit's name).
    pub fn turn_loop(&mut self, session: &mut SessionState) -> SpanResult<&'static str> {
        loop {
            if let Some(reason) = session.exceeded_limit(&self.limits) {
                return Ok(reason);
            }

            session.turn_count += 1;
            let llm_messages = to_llm_messages(&session.transcript);
            let response = self
                .llm
                .send_message(EXECUTE_SYSTEM_PROMPT, &llm_messages, &tools::tool_schemas(), MAX_TOKENS)
                .map_err(|e| SpanError::ModelError(e.to_string()))?;

            session.transcript.push(to_transcript_message(&response));

            if !has_tool_use(&response) {
                return Ok("model_complete");
            }

            let calls = extract_tool_calls(&response);
            let mut result_blocks = Vec::new();
            let mut limit_hit: Option<&'static str> = None;

            for call in &calls {
                session.tool_call_count += 1;
                if tools::is_apply_patch(call) {
                    session.patch_attempt_count += 1;
                }

                if let Some(reason) = session.exceeded_limit(&self.limits) {
                    limit_hit = Some(reason);
                    break;
                }

                let result_text = self.dispatch_and_log(session, call);
                result_blocks.push(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: result_text,
                });
            }

            if !result_blocks.is_empty() {
                session.transcript.push(TranscriptMessage {
                    role: "user".to_string(),
                    content: serde_json::to_value(&result_blocks).unwrap_or(serde_json::Value::Null),
                });
            }

            if let Some(reason) = limit_hit {
                return Ok(reason);
            }
        }
    }

    fn dispatch_and_log(&mut self, session: &mut SessionState, call: &ToolCallRequest) -> String {
        let session_id = session.session_id.clone();
        self.log_event(
            "tool_call",
            json!({"session_id": session_id, "tool_use_id": call.id, "name": call.name, "input": call.input}),
        );

        let result_text = match tools::parse_tool_call(call) {
            Ok(ToolCall::ReadFile { path }) => self.exec_read_file(&path),
            Ok(ToolCall::RunShell { command }) => self.exec_run_shell(&command),
            Ok(ToolCall::ApplyPatch { path, diff }) => self.patch_with_verify(session, &path, &diff),
            Err(e) => e.to_string(),
        };

        self.log_event(
            "tool_result",
            json!({"session_id": session_id, "tool_use_id": call.id, "text": result_text}),
        );
        result_text
    }

    fn exec_read_file(&self, path: &str) -> String {
        let full = self.project_root.join(path);
        match std::fs::read_to_string(&full) {
            Ok(content) => tools::format_numbered(&content),
            Err(e) => format!("error reading {path}: {e}"),
        }
    }

    fn exec_run_shell(&self, command: &str) -> String {
        match span_shell::run_shell(command, &self.project_root, SHELL_TIMEOUT) {
            Ok(outcome) => {
                let mut text = String::new();
                text.push_str(&outcome.stdout);
                if !outcome.stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&outcome.stderr);
                }
                if outcome.timed_out {
                    text.push_str("\n[run_shell] command timed out");
                }
                text.push_str(&format!("\n[exit code: {:?}]", outcome.exit_code));
                text
            }
            Err(e) => format!("run_shell rejected: {e}"),
        }
    }

    /// Applies, verifies, and accepts-or-reverts a single `apply_patch`
    /// call, per §4.7's patch-with-verify contract.
    fn patch_with_verify(&mut self, session: &mut SessionState, path: &str, diff: &str) -> String {
        if session.retries_for(path) >= self.limits.max_retries_per_patch {
            return format!(
                "terminal: {path} has reached the maximum of {} retries; stop retrying this file.",
                self.limits.max_retries_per_patch
            );
        }

        let full_path = self.project_root.join(path);
        let existed_before = full_path.exists();

        let outcome = match apply_diff(&full_path, diff) {
            Ok(outcome) => outcome,
            Err(e) => {
                *session.retry_count.entry(path.to_string()).or_insert(0) += 1;
                return format!("patch failed: {}", apply_error_hint(&e));
            }
        };

        match span_verify::verify_patch(&self.project_root, path, &self.config, self.index.as_ref()) {
            VerifyOutcome::Pass => {
                session.retry_count.remove(path);
                if !existed_before {
                    session.created_files.insert(path.to_string());
                }
                let change = ChangeOp {
                    path: path.to_string(),
                    forward_diff: diff.to_string(),
                    reverse_diff: outcome.reverse_diff,
                    step_id: session.patch_attempt_count,
                    timestamp: chrono::Utc::now(),
                };
                session.changes.push(change);
                "applied and verified — stop working on this file".to_string()
            }
            VerifyOutcome::Fail(diag) => {
                *session.retry_count.entry(path.to_string()).or_insert(0) += 1;
                if let Err(revert_err) = apply_diff(&full_path, &outcome.reverse_diff) {
                    self.log_event(
                        "revert_failed",
                        json!({"session_id": session.session_id, "path": path, "error": revert_err}),
                    );
                }
                let message = diag.to_string();
                session.last_errors.push(message.clone());
                message
            }
        }
    }

    /// Runs the advisory final type check, presents the aggregated diff,
    /// and keeps or reverts per the user's choice. Returns `false` only
    /// when there was nothing to finalize.
    pub fn finalize(&mut self, session: &mut SessionState, io: &mut dyn UserInteraction) -> SpanResult<bool> {
        if session.changes.is_empty() {
            return Ok(false);
        }

        for diagnostic in span_verify::verify_final(&self.project_root, &self.config) {
            span_core::warn_log(&diagnostic.to_string());
        }

        io.show(&render_final_diff(session));
        let keep = io.confirm_keep("Keep these changes?");

        if keep {
            session.changes.clear();
            self.log_event("finalize", json!({"session_id": session.session_id, "outcome": "kept"}));
            return Ok(true);
        }

        let mut failed = Vec::new();
        for change in session.changes.iter().rev() {
            let full_path = self.project_root.join(&change.path);
            if apply_diff(&full_path, &change.reverse_diff).is_err() {
                failed.push(change.path.clone());
            }
        }

        if !failed.is_empty() {
            self.log_event(
                "revert_failed",
                json!({"session_id": session.session_id, "paths": failed.clone()}),
            );
            return Err(SpanError::RevertFailure(failed));
        }

        session.changes.clear();
        self.log_event("finalize", json!({"session_id": session.session_id, "outcome": "reverted"}));
        Ok(true)
    }

    /// Composes the revision summary for re-entering the pipeline as a new
    /// task, per §4.7 Revision.
    pub fn revision_task(&self, session: &SessionState) -> String {
        revision_summary(session)
    }

    /// Runs one full task end to end: plan, optional review, turn loop,
    /// finalize. Returns the final session state plus whether any changes
    /// were kept (`false` only when nothing was ever accepted).
    pub fn run_task(&mut self, task: &str, plan_review: bool, io: &mut dyn UserInteraction) -> SpanResult<(SessionState, bool)> {
        let mut session = SessionState::new(generate_session_id(), task);
        self.log_event(
            "session_start",
            json!({"session_id": session.session_id, "task": session.original_task}),
        );

        let plan_text = self.plan(&mut session)?;
        if !self.maybe_review_plan(&plan_text, plan_review, io) {
            return Err(SpanError::UserInterrupt);
        }
        self.seed_transcript(&mut session, &plan_text);

        let stop_reason = self.turn_loop(&mut session)?;
        if stop_reason != "model_complete" {
            io.show(&format!("stopped: {stop_reason}"));
        }

        let kept = self.finalize(&mut session, io)?;
        Ok((session, kept))
    }
}

fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:08}", rng.gen_range(0..100_000_000u32))
}

fn apply_error_hint(raw: &str) -> String {
    if raw.contains("no such line") {
        "line count mismatch".to_string()
    } else if raw.contains("hunk doesn't match file") {
        "hunk doesn't match file".to_string()
    } else {
        raw.to_string()
    }
}

fn text_message(role: &str, text: &str) -> TranscriptMessage {
    let blocks = vec![ContentBlock::Text { text: text.to_string() }];
    TranscriptMessage {
        role: role.to_string(),
        content: serde_json::to_value(&blocks).unwrap_or(serde_json::Value::Null),
    }
}

fn to_transcript_message(msg: &Message) -> TranscriptMessage {
    TranscriptMessage {
        role: msg.role.clone(),
        content: serde_json::to_value(&msg.content).unwrap_or(serde_json::Value::Null),
    }
}

fn to_llm_messages(transcript: &[TranscriptMessage]) -> Vec<Message> {
    transcript
        .iter()
        .map(|m| Message {
            role: m.role.clone(),
            content: serde_json::from_value(m.content.clone()).unwrap_or_default(),
        })
        .collect()
}

fn render_final_diff(session: &SessionState) -> String {
    session
        .changes
        .iter()
        .map(|c| {
            let marker = if session.created_files.contains(&c.path) { " (created)" } else { "" };
            format!("--- {}{marker} ---\n{}", c.path, c.forward_diff)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
