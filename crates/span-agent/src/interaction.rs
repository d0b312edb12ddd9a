//! The single I/O abstraction every suspension point in the turn loop goes
//! through for user-facing output and approval prompts. Keeping this as a
//! trait (rather than calling `println!`/`stdin` directly from the engine)
//! is what lets tests drive S1-S6 deterministically with scripted answers,
//! per the design note on user prompts as suspension points.

/// A yes/no confirmation plus plain status output, plus a separate
/// keep-changes confirmation with the opposite default. The plan-proceed
/// prompt (`confirm`) is default-yes: "decisive n" means the trimmed,
/// lowercased reply is exactly `"n"` or `"no"`, and anything else, including
/// an empty reply, counts as approval. The finalize keep-changes prompt
/// (`confirm_keep`) is default-*no*: only a trimmed, lowercased `"y"` or
/// `"yes"` keeps the changes, and anything else, including an empty reply,
/// reverts. The two prompts need opposite defaults, so one `confirm` method
/// cannot serve both.
pub trait UserInteraction {
    fn show(&mut self, text: &str);
    fn confirm(&mut self, prompt: &str) -> bool;
    fn confirm_keep(&mut self, prompt: &str) -> bool;
}

/// Approves every prompt without pausing. Used by non-interactive callers
/// (e.g. `span run` without `--plan`) and as the default in tests that
/// don't care about the approval path.
#[derive(Debug, Default)]
pub struct AutoApprove;

impl UserInteraction for AutoApprove {
    fn show(&mut self, _text: &str) {}

    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }

    fn confirm_keep(&mut self, _prompt: &str) -> bool {
        true
    }
}

/// Replays a fixed script of answers in order, one per `confirm`/
/// `confirm_keep` call, drawn from a single shared queue. Exhausting the
/// script falls back to approval. Built for tests.
#[derive(Debug, Default)]
pub struct ScriptedAnswers {
    shown: Vec<String>,
    answers: std::collections::VecDeque<bool>,
}

impl ScriptedAnswers {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            shown: Vec::new(),
            answers: answers.into_iter().collect(),
        }
    }

    pub fn shown(&self) -> &[String] {
        &self.shown
    }
}

impl UserInteraction for ScriptedAnswers {
    fn show(&mut self, text: &str) {
        self.shown.push(text.to_string());
    }

    fn confirm(&mut self, prompt: &str) -> bool {
        self.shown.push(prompt.to_string());
        self.answers.pop_front().unwrap_or(true)
    }

    fn confirm_keep(&mut self, prompt: &str) -> bool {
        self.shown.push(prompt.to_string());
        self.answers.pop_front().unwrap_or(true)
    }
}

/// Parses a raw terminal reply the way the spec defines "decisive n":
/// trimmed, lowercased, exactly `"n"` or `"no"` aborts; anything else
/// proceeds. Used by the default-yes plan-proceed prompt.
pub fn is_decisive_no(reply: &str) -> bool {
    matches!(reply.trim().to_lowercase().as_str(), "n" | "no")
}

/// Parses a raw terminal reply for the default-*no* keep-changes prompt:
/// trimmed, lowercased, exactly `"y"` or `"yes"` keeps; anything else,
/// including an empty reply, reverts.
pub fn is_decisive_yes(reply: &str) -> bool {
    matches!(reply.trim().to_lowercase().as_str(), "y" | "yes")
}
