//! Error types for sandbox operations.

/// Error type for sandbox operations.
///
/// Probes never produce these; they downgrade failures to `false`. Lifecycle
/// operations surface them only after their single self-heal attempt, and
/// fatal variants carry actionable guidance rather than raw tool output.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} is not available. {guidance}")]
    ToolUnavailable { tool: String, guidance: String },

    #[error("'{program}' could not be launched: {message}")]
    Launch { program: String, message: String },

    #[error("{context} failed with exit code {code}")]
    CommandFailed {
        context: String,
        code: i32,
        stderr: String,
    },

    #[error("sandbox '{name}' is unresponsive. {guidance}")]
    Unresponsive { name: String, guidance: String },

    #[error("sandbox setup failed: {message}")]
    Setup { message: String },

    #[error("file sync failed: {message}")]
    Sync { message: String },
}

impl Error {
    pub fn tool_unavailable<T: Into<String>, G: Into<String>>(tool: T, guidance: G) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            guidance: guidance.into(),
        }
    }

    pub fn command_failed<C: Into<String>>(context: C, code: i32, stderr: &str) -> Self {
        Self::CommandFailed {
            context: context.into(),
            code,
            stderr: stderr.trim().to_string(),
        }
    }

    pub fn unresponsive<N: Into<String>, G: Into<String>>(name: N, guidance: G) -> Self {
        Self::Unresponsive {
            name: name.into(),
            guidance: guidance.into(),
        }
    }

    pub fn setup<S: Into<String>>(message: S) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    pub fn sync<S: Into<String>>(message: S) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    /// True for failures of the sandbox itself, as opposed to a non-zero
    /// exit of the program the user asked to run. The dispatcher retries
    /// batch runs once for these, never for program failures.
    pub fn is_sandbox_level(&self) -> bool {
        matches!(
            self,
            Self::Launch { .. } | Self::Unresponsive { .. } | Self::ToolUnavailable { .. }
        )
    }
}

impl From<pl_exec::ExecError> for Error {
    fn from(err: pl_exec::ExecError) -> Self {
        match err {
            pl_exec::ExecError::NotFound { program } => Self::Launch {
                message: format!("'{program}' is not installed or not on PATH"),
                program,
            },
            pl_exec::ExecError::Launch { program, source } => Self::Launch {
                message: source.to_string(),
                program,
            },
            pl_exec::ExecError::Interrupted { program } => Self::Launch {
                message: "terminated by a signal".to_string(),
                program,
            },
        }
    }
}
