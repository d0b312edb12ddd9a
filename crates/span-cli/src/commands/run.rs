//! `span run` — the interactive entry point: load config, build the model
//! client and limits, and drive one full `AgentEngine::run_task`.

use std::path::Path;

use anyhow::{bail, Context, Result};

use span_agent::AgentEngine;
use span_core::{verbose_log, AgentLimits, Config};
use span_llm::{AnthropicClient, LlmConfig};

use crate::terminal::Terminal;

const OPUS_MODEL: &str = "claude-3-opus-20240229";

pub struct RunOptions {
    pub task: String,
    pub plan_review: bool,
    pub opus: bool,
    pub full: bool,
    pub verbose: bool,
}

pub fn execute(cwd: &Path, opts: RunOptions) -> Result<()> {
    if opts.verbose {
        // SAFETY: single-threaded at this point in startup, before any
        // worker or model request is spawned.
        unsafe { std::env::set_var("SPAN_VERBOSE", "1") };
    }

    let config = Config::load(cwd, None).context("loading span.yaml")?;
    let api_key = config
        .api_key()
        .with_context(|| format!("environment variable {} is not set", config.api_key_env))?;

    let model = if opts.opus { OPUS_MODEL.to_string() } else { config.model.clone() };
    let llm_config = LlmConfig::new(model, api_key);
    let llm = AnthropicClient::new(llm_config).context("building Anthropic client")?;

    let limits = AgentLimits {
        max_turns: config.max_steps,
        max_tool_calls: config.max_steps.saturating_mul(4).max(AgentLimits::default().max_tool_calls),
        max_patch_attempts: AgentLimits::default().max_patch_attempts,
        max_retries_per_patch: config.max_retries_per_step,
    };

    let mut engine = AgentEngine::new(cwd.to_path_buf(), config, llm, limits).context("initializing agent engine")?;
    if opts.full {
        engine.disable_dependency_index();
    }

    verbose_log(opts.verbose, &format!("starting task: {}", opts.task));

    let mut io = Terminal;
    let (session, kept) = engine.run_task(&opts.task, opts.plan_review, &mut io)?;

    if !kept && !session.last_errors.is_empty() {
        bail!("task ended without any kept changes; last error: {}", session.last_errors.last().unwrap());
    }

    Ok(())
}
