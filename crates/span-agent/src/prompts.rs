//! System prompt text and the small amount of text-shaping logic around
//! it: plan preview compression and revision summaries. Kept separate from
//! `engine.rs` since these are the parts most likely to need tuning
//! independent of the control flow.

use span_core::SessionState;

pub const PLAN_SYSTEM_PROMPT: &str = "\
You are span, a local coding agent. Given a task, respond with a short, \
concrete plan for how you will accomplish it using the tools available in \
the execution phase (read_file, apply_patch, run_shell). Do not call any \
tools now; just describe the plan in plain text.";

pub const EXECUTE_SYSTEM_PROMPT: &str = "\
You are span, a local coding agent. Use read_file to inspect project \
files, apply_patch to make verified edits, and run_shell to invoke an \
allowlisted command. apply_patch is verified automatically: a passing \
result tells you to stop editing that file, a failing result gives you \
the verifier's diagnostics so you can try again. When the task is \
complete, respond with plain text and no further tool use.";

pub const MAX_TOKENS: u32 = 4096;

/// Up to 6 lines extracted from a plan's numbered or bulleted items, or
/// otherwise the first ~50 words, per §4.7 Planning.
pub fn compress_plan_preview(plan_text: &str) -> String {
    let item_lines: Vec<&str> = plan_text
        .lines()
        .map(str::trim)
        .filter(|l| is_list_item(l))
        .collect();

    if !item_lines.is_empty() {
        return item_lines.into_iter().take(6).collect::<Vec<_>>().join("\n");
    }

    plan_text
        .split_whitespace()
        .take(50)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_list_item(line: &str) -> bool {
    if line.is_empty() {
        return false;
    }
    if let Some(rest) = line.strip_prefix(['-', '*']) {
        return rest.starts_with(' ') || rest.is_empty();
    }
    let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    matches!(line.as_bytes().get(digits.len()), Some(b'.') | Some(b')'))
}

/// The summary prefixed to a revised task, per §4.7 Revision: original
/// task, step count, successful change paths, up to three last errors.
pub fn revision_summary(session: &SessionState) -> String {
    let mut parts = vec![format!("Previous attempt at: {}", session.original_task)];
    parts.push(format!("Steps taken: {}", session.turn_count));

    if session.changes.is_empty() {
        parts.push("No changes were kept.".to_string());
    } else {
        let paths: Vec<&str> = session.changes.iter().map(|c| c.path.as_str()).collect();
        parts.push(format!("Successful changes: {}", paths.join(", ")));
    }

    if !session.last_errors.is_empty() {
        let recent: Vec<&str> = session
            .last_errors
            .iter()
            .rev()
            .take(3)
            .map(String::as_str)
            .collect();
        parts.push(format!("Last errors: {}", recent.join(" | ")));
    }

    parts.join("\n")
}
