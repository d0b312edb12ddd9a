//! The real, stdin/stdout-backed `UserInteraction` used by `span run`.
//! `AutoApprove`/`ScriptedAnswers` (in `span-agent`) exist for tests; this
//! is the one interactive implementation that actually reads a line.

use std::io::{self, Write};

use span_agent::{is_decisive_no, is_decisive_yes, UserInteraction};

pub struct Terminal;

impl UserInteraction for Terminal {
    fn show(&mut self, text: &str) {
        println!("{text}");
    }

    fn confirm(&mut self, prompt: &str) -> bool {
        print!("{prompt} [Y/n] ");
        let _ = io::stdout().flush();
        let mut reply = String::new();
        if io::stdin().read_line(&mut reply).is_err() {
            return true;
        }
        !is_decisive_no(&reply)
    }

    fn confirm_keep(&mut self, prompt: &str) -> bool {
        print!("{prompt} [y/N] ");
        let _ = io::stdout().flush();
        let mut reply = String::new();
        if io::stdin().read_line(&mut reply).is_err() {
            return false;
        }
        is_decisive_yes(&reply)
    }
}
