//! `span` — the command-line entry point. Parses arguments with `clap`,
//! loads `Config`, and dispatches to `run`/`status`/`logs`/`diff`, following
//! the teacher's `Parser`/`Subcommand`/`Args` + `run()` dispatcher shape.

mod commands;
mod terminal;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

const EXIT_OK: u8 = 0;
const EXIT_ERROR: u8 = 1;

#[derive(Parser)]
#[command(name = "span", about = "A verification-first local coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task end to end: plan, edit, verify, finalize.
    Run(RunArgs),
    /// Summarize the most recent session recorded in the event log.
    Status,
    /// Print recorded events, most recent last.
    Logs(LogsArgs),
    /// Print the consolidated diff of a session's accepted changes.
    Diff(DiffArgs),
}

#[derive(Args)]
struct RunArgs {
    /// The natural-language task to perform.
    task: String,
    /// Show the plan and ask for approval before executing it.
    #[arg(long)]
    plan: bool,
    /// Use the Opus model instead of the configured default.
    #[arg(long)]
    opus: bool,
    /// Force the test stage to run the full suite instead of the affected subset.
    #[arg(long)]
    full: bool,
    /// Print `[span]`-prefixed progress output.
    #[arg(long)]
    verbose: bool,
}

#[derive(Args)]
struct LogsArgs {
    /// Restrict output to events from this session id.
    #[arg(long)]
    session: Option<String>,
    /// Only print the last N events.
    #[arg(long)]
    tail: Option<usize>,
}

#[derive(Args)]
struct DiffArgs {
    /// Restrict output to changes from this session id; defaults to the most recent.
    #[arg(long)]
    session: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("span: could not determine current directory: {e}");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match run(cli, cwd) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            eprintln!("span: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(cli: Cli, cwd: PathBuf) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => commands::run::execute(&cwd, args_to_run_args(args)),
        Commands::Status => commands::status::execute(&cwd),
        Commands::Logs(args) => commands::logs::execute(&cwd, args.session, args.tail),
        Commands::Diff(args) => commands::diff::execute(&cwd, args.session),
    }
}

fn args_to_run_args(args: RunArgs) -> commands::run::RunOptions {
    commands::run::RunOptions {
        task: args.task,
        plan_review: args.plan,
        opus: args.opus,
        full: args.full,
        verbose: args.verbose,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_all_flags() {
        let cli = Cli::try_parse_from(["span", "run", "fix the bug", "--plan", "--opus", "--full", "--verbose"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.task, "fix the bug");
                assert!(args.plan && args.opus && args.full && args.verbose);
            }
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn parses_run_with_task_only() {
        let cli = Cli::try_parse_from(["span", "run", "do something"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.task, "do something");
                assert!(!args.plan && !args.opus && !args.full && !args.verbose);
            }
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn parses_status_with_no_args() {
        let cli = Cli::try_parse_from(["span", "status"]).unwrap();
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn parses_logs_with_session_and_tail() {
        let cli = Cli::try_parse_from(["span", "logs", "--session", "abcd1234", "--tail", "10"]).unwrap();
        match cli.command {
            Commands::Logs(args) => {
                assert_eq!(args.session.as_deref(), Some("abcd1234"));
                assert_eq!(args.tail, Some(10));
            }
            _ => panic!("expected Logs"),
        }
    }

    #[test]
    fn parses_diff_without_session() {
        let cli = Cli::try_parse_from(["span", "diff"]).unwrap();
        match cli.command {
            Commands::Diff(args) => assert!(args.session.is_none()),
            _ => panic!("expected Diff"),
        }
    }

    #[test]
    fn run_requires_a_task_argument() {
        assert!(Cli::try_parse_from(["span", "run"]).is_err());
    }
}
