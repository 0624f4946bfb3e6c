use thiserror::Error;

/// Internal invariant failures raised while synthesising a strategy. These point at a bug in the
/// analysis graph construction, never at a property of the input model, so a probe that hits one is
/// aborted rather than treated as infeasible.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SynthesisError {
    #[error("chosen action {action} at state {state} is out of range ({available} transitions available)")]
    ActionOutOfRange {
        state: usize,
        action: usize,
        available: usize,
    },

    #[error("backup motion left the violated copy: {from} -> {to} (min goal color {min_goal_color})")]
    BackupEscaped {
        from: usize,
        to: usize,
        min_goal_color: u32,
    },
}

#[derive(Debug, Error)]
pub enum RampsError {
    #[error("{0}")]
    Usage(String),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed input '{file}' line {line}: {reason}")]
    Parse {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("invalid model in '{file}': {reason}")]
    Invalid {
        file: String,
        reason: String,
    },

    #[error("malformed parity file '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write probe history: {0}")]
    Csv(#[from] csv::Error),

    #[error("internal error: {0}")]
    Synthesis(#[from] SynthesisError),
}

impl RampsError {
    pub fn parse(file: &str, line: usize, reason: impl Into<String>) -> RampsError {
        RampsError::Parse {
            file: file.to_string(),
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RampsError>;
