use thiserror::Error;

/// Fatal-to-CLI and tool-result error taxonomy shared across the workspace.
///
/// Most failures inside the turn loop are captured as `anyhow::Error` and
/// returned to the model as a tool result; only the variants the engine
/// cannot recover from propagate to the CLI boundary as `SpanError`.
#[derive(Debug, Error)]
pub enum SpanError {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("model request failed: {0}")]
    ModelError(String),

    #[error("invalid patch: {0}")]
    PatchInvalid(String),

    #[error("patch application failed: {0}")]
    PatchApplyFailed(String),

    #[error("verification failed: {0}")]
    VerificationFailure(String),

    #[error("failed to revert changes in: {}", .0.join(", "))]
    RevertFailure(Vec<String>),

    #[error("limit reached: {0}")]
    LimitReached(String),

    #[error("tool missing: {0}")]
    ToolMissing(String),

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    #[error("interrupted by user")]
    UserInterrupt,
}

pub type SpanResult<T> = std::result::Result<T, SpanError>;
