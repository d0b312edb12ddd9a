//! Allowlist-filtered invocation of external processes: the test runner,
//! linter, type checker, a bounded language-interpreter invocation, and
//! read-only source-control queries.
//!
//! Commands are tokenized with shell-style word splitting and the resulting
//! argv is executed directly (never handed to `sh -c`), so the allowlist of
//! programs, flags, and positional-argument shapes is the actual security
//! boundary rather than cosmetic.

use std::collections::HashSet;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

struct ProgramRule {
    allowed_flags: &'static [&'static str],
    allowed_positional: bool,
}

fn allowed_programs() -> &'static [(&'static str, ProgramRule)] {
    static RULES: &[(&str, ProgramRule)] = &[
        (
            "pytest",
            ProgramRule {
                allowed_flags: &["-v", "-x", "-q", "--version", "--tb=short", "--tb=long", "--lf", "--ff"],
                allowed_positional: true,
            },
        ),
        (
            "ruff",
            ProgramRule {
                allowed_flags: &["check", "format", "--fix"],
                allowed_positional: true,
            },
        ),
        (
            "mypy",
            ProgramRule {
                allowed_flags: &["--strict", "--no-error-summary"],
                allowed_positional: true,
            },
        ),
        (
            "python",
            ProgramRule {
                allowed_flags: &["-m", "-c"],
                allowed_positional: true,
            },
        ),
        (
            "git",
            ProgramRule {
                allowed_flags: &["status", "diff", "log", "show"],
                allowed_positional: true,
            },
        ),
    ];
    RULES
}

fn rule_for(program: &str) -> Option<&'static ProgramRule> {
    allowed_programs()
        .iter()
        .find(|(name, _)| *name == program)
        .map(|(_, rule)| rule)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    DisallowedProgram(String),
    EmptyCommand,
    TokenizeFailed(String),
    DisallowedFlag { program: String, flag: String },
    PositionalNotAllowed { program: String, arg: String },
    SuspiciousPath { program: String, arg: String },
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DisallowedProgram(p) => {
                let names: Vec<&str> = allowed_programs().iter().map(|(n, _)| *n).collect();
                write!(f, "program not allowed: {p}. allowed: {}", names.join(", "))
            }
            Self::EmptyCommand => write!(f, "empty command"),
            Self::TokenizeFailed(e) => write!(f, "failed to parse command: {e}"),
            Self::DisallowedFlag { program, flag } => {
                write!(f, "flag not allowed for {program}: {flag}")
            }
            Self::PositionalNotAllowed { program, arg } => {
                write!(f, "positional arguments not allowed for {program}: {arg}")
            }
            Self::SuspiciousPath { program, arg } => {
                write!(f, "suspicious path in argument for {program}: {arg}")
            }
        }
    }
}

impl std::error::Error for GateError {}

#[derive(Debug, Clone)]
pub struct ShellOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Flag-shaped tokens recognized as "the flag position" for each program,
/// distinguishing them from positional arguments even when they don't start
/// with `-` (e.g. `ruff check`, `git status`).
fn keyword_flags() -> HashSet<&'static str> {
    ["check", "format", "status", "diff", "log", "show"].into_iter().collect()
}

fn validate_args(program: &str, rule: &ProgramRule, args: &[String]) -> Result<(), GateError> {
    let keywords = keyword_flags();
    for arg in args {
        let looks_like_flag = arg.starts_with('-') || keywords.contains(arg.as_str());
        if looks_like_flag {
            if !rule.allowed_flags.contains(&arg.as_str()) {
                return Err(GateError::DisallowedFlag {
                    program: program.to_string(),
                    flag: arg.clone(),
                });
            }
        } else {
            if !rule.allowed_positional {
                return Err(GateError::PositionalNotAllowed {
                    program: program.to_string(),
                    arg: arg.clone(),
                });
            }
            if arg.contains("..") || arg.starts_with('/') {
                return Err(GateError::SuspiciousPath {
                    program: program.to_string(),
                    arg: arg.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Tokenizes `command`, checks it against the allowlist, and — if
/// accepted — runs it directly (no shell interpretation) with a wall-clock
/// timeout, returning the collected output whether or not it succeeded.
pub fn run_shell(command: &str, cwd: &Path, timeout: Duration) -> Result<ShellOutcome, GateError> {
    let args = shell_words::split(command).map_err(|e| GateError::TokenizeFailed(e.to_string()))?;
    let Some((program, rest)) = args.split_first() else {
        return Err(GateError::EmptyCommand);
    };

    let rule = rule_for(program).ok_or_else(|| GateError::DisallowedProgram(program.clone()))?;
    validate_args(program, rule, rest)?;

    Ok(spawn_and_wait(program, rest, cwd, timeout))
}

fn spawn_and_wait(program: &str, args: &[String], cwd: &Path, timeout: Duration) -> ShellOutcome {
    let spawned = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawned {
        Ok(c) => c,
        Err(e) => {
            return ShellOutcome {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("failed to spawn {program}: {e}"),
                timed_out: false,
            };
        }
    };

    match child.wait_timeout(timeout) {
        Ok(Some(_)) => {
            let output = child.wait_with_output().expect("process already exited");
            ShellOutcome {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
            }
        }
        Ok(None) => {
            let _ = child.kill();
            let output = child.wait_with_output().unwrap_or_else(|_| std::process::Output {
                status: Default::default(),
                stdout: Vec::new(),
                stderr: Vec::new(),
            });
            ShellOutcome {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: true,
            }
        }
        Err(e) => ShellOutcome {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed waiting on {program}: {e}"),
            timed_out: false,
        },
    }
}
