//! Subprocess execution helpers shared by the sandbox backends.
//!
//! Everything that talks to `docker`, `micromamba`, or the host Python goes
//! through [`CommandLine`]. A command that could not be launched at all
//! (missing binary, permission problem) is an [`ExecError`], which keeps it
//! distinct from a command that ran and returned a non-zero exit code.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Result type for command execution.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Failure to run a command at all. A non-zero exit code is *not* an error
/// at this layer; callers inspect [`CommandOutput::exit_code`] for that.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("'{program}' is not installed or not on PATH")]
    NotFound { program: String },

    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' was terminated by a signal")]
    Interrupted { program: String },
}

/// Captured result of a finished command.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout with surrounding whitespace removed, for substring probes.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// One external command invocation: program, arguments, working directory
/// and extra environment variables.
#[derive(Clone, Debug)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// A composite command run through `bash -c`. Used only where a single
    /// argv cannot express the invocation (pipelines, activation hooks).
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("bash").arg("-c").arg(script.into())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The invocation as a single string, for log and error messages.
    pub fn rendered(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    fn launch_error(&self, source: std::io::Error) -> ExecError {
        if source.kind() == std::io::ErrorKind::NotFound {
            ExecError::NotFound {
                program: self.program.clone(),
            }
        } else {
            ExecError::Launch {
                program: self.program.clone(),
                source,
            }
        }
    }

    fn exit_code(&self, status: std::process::ExitStatus) -> Result<i32> {
        status.code().ok_or_else(|| ExecError::Interrupted {
            program: self.program.clone(),
        })
    }

    /// Run to completion, capturing stdout and stderr.
    pub async fn run_captured(&self) -> Result<CommandOutput> {
        tracing::debug!(command = %self.rendered(), "running (captured)");
        let output = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.launch_error(e))?;

        Ok(CommandOutput {
            exit_code: self.exit_code(output.status)?,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run with stdout/stderr discarded; only the exit code matters.
    pub async fn run_quiet(&self) -> Result<i32> {
        tracing::debug!(command = %self.rendered(), "running (quiet)");
        let status = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| self.launch_error(e))?;
        self.exit_code(status)
    }

    /// Run with stdout/stderr inherited from the parent, stdin closed.
    /// Used for long operations whose progress the user should see
    /// (image builds, environment creation).
    pub async fn run_streamed(&self) -> Result<i32> {
        tracing::debug!(command = %self.rendered(), "running (streamed)");
        let status = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.launch_error(e))?;
        self.exit_code(status)
    }

    /// Run attached to the caller's terminal. The exit code is forwarded
    /// literally, including sentinel codes the invoked program uses.
    pub async fn run_interactive(&self) -> Result<i32> {
        tracing::debug!(command = %self.rendered(), "running (interactive)");
        let status = self
            .command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.launch_error(e))?;
        self.exit_code(status)
    }
}
