use thiserror::Error;

/// Fatal pipeline errors. Everything else is absorbed into risk flags or
/// degraded confidence; these two kinds halt the process with exit code 1.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No-lookahead violation, selection-key collision, or a contradictory
    /// state transition (e.g. settling a bet on a game that is not final).
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Migration failure or an unexpected column.
    #[error("schema error: {0}")]
    Schema(String),
}

impl PipelineError {
    pub fn invariant(msg: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(PipelineError::Invariant(msg.into()))
    }

    pub fn schema(msg: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(PipelineError::Schema(msg.into()))
    }
}
