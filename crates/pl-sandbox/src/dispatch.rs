//! Script and command dispatch into the sandbox.
//!
//! The dispatcher confirms readiness, handles the copy-mode sync phases
//! around execution, and propagates exit codes literally - including the
//! exit-all-sessions sentinel an interactive session uses to terminate any
//! outer module loop.

use std::path::Path;
use std::sync::Arc;

use pl_exec::{CommandLine, CommandOutput};
use pl_sandbox_core::{
    ExecutionRequest, FileAccessMode, Result, SandboxBackend, EXIT_ALL_SESSIONS,
};
use tokio_util::sync::CancellationToken;

use crate::manager::SandboxManager;
use crate::sync::SyncEngine;

/// Result of one dispatch. Sync failures are carried alongside the exit
/// code rather than replacing it; a failed pull never masks the program's
/// own result.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub exit_code: i32,
    /// Captured output for batch runs; `None` for interactive runs.
    pub output: Option<CommandOutput>,
    pub sync_failures: usize,
}

impl DispatchOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The program asked for every nested session to end.
    pub fn exit_all_sessions(&self) -> bool {
        self.exit_code == EXIT_ALL_SESSIONS
    }
}

/// Runs scripts and commands inside a managed sandbox.
pub struct Dispatcher {
    manager: SandboxManager,
    sync: SyncEngine,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn SandboxBackend>) -> Self {
        Self {
            manager: SandboxManager::new(backend.clone()),
            sync: SyncEngine::new(backend),
        }
    }

    pub fn manager(&self) -> &SandboxManager {
        &self.manager
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    /// Run a demo script (with args) inside the sandbox. The script path is
    /// rewritten relative to the project root so it resolves inside the
    /// sandbox workspace.
    pub async fn run_script(
        &self,
        script: &Path,
        args: &[String],
        interactive: bool,
    ) -> Result<DispatchOutcome> {
        let rel = self.manager.backend().layout().relative_script(script);
        let command = render_script_command(&rel, args);
        self.run_command(&command, interactive).await
    }

    /// Run a shell command inside the sandbox.
    pub async fn run_command(&self, command: &str, interactive: bool) -> Result<DispatchOutcome> {
        let request = if interactive {
            ExecutionRequest::interactive(command)
        } else {
            ExecutionRequest::batch(command)
        };
        self.run_request(&request).await
    }

    /// Run one execution request. Readiness is reconfirmed on every call;
    /// a sandbox listed as running is never trusted without a fresh probe.
    pub async fn run_request(&self, request: &ExecutionRequest) -> Result<DispatchOutcome> {
        self.manager.ensure_ready().await?;
        if request.interactive {
            self.run_interactive(&request.command).await
        } else {
            self.run_batch(&request.command).await
        }
    }

    /// Run the demo script directly on the host (`--no-docker`), with the
    /// same exit-code semantics as a sandboxed interactive run.
    pub async fn run_script_on_host(
        layout: &pl_sandbox_core::ProjectLayout,
        script: &Path,
        args: &[String],
    ) -> Result<DispatchOutcome> {
        let rel = layout.relative_script(script);
        let code = CommandLine::new("python3")
            .arg(rel.to_string_lossy())
            .args(args.iter().cloned())
            .current_dir(&layout.project_root)
            .run_interactive()
            .await?;
        Ok(DispatchOutcome {
            exit_code: code,
            output: None,
            sync_failures: 0,
        })
    }

    async fn run_interactive(&self, command: &str) -> Result<DispatchOutcome> {
        let backend = self.manager.backend();
        if backend.file_access() != FileAccessMode::Copy {
            let code = backend.exec_interactive(command).await?;
            return Ok(DispatchOutcome {
                exit_code: code,
                output: None,
                sync_failures: 0,
            });
        }

        println!("Copy mode: files will be synced back periodically during the session");
        let token = CancellationToken::new();
        let worker = tokio::spawn({
            let engine = self.sync.clone();
            let token = token.clone();
            async move { engine.pull_periodically(token).await }
        });

        let result = backend.exec_interactive(command).await;

        // The worker must be fully stopped before the final pull; two
        // passes writing the same host files would race.
        token.cancel();
        let _ = worker.await;

        println!("Performing final sync...");
        let sync_failures = match self.sync.pull(false).await {
            Ok(report) => report.failures,
            Err(e) => {
                tracing::warn!(error = %e, "final sync failed");
                1
            }
        };

        let code = result?;
        Ok(DispatchOutcome {
            exit_code: code,
            output: None,
            sync_failures,
        })
    }

    async fn run_batch(&self, command: &str) -> Result<DispatchOutcome> {
        let backend = self.manager.backend();
        if backend.file_access() == FileAccessMode::Copy {
            self.sync.push().await?;
        }

        let output = match backend.exec_captured(command).await {
            Ok(output) => output,
            Err(e) if e.is_sandbox_level() => {
                // The sandbox, not the program, failed. One restart, one
                // retry; the program's own exit codes are never retried.
                println!("Command failed to launch, restarting the sandbox and retrying...");
                self.manager.recreate().await?;
                backend.exec_captured(command).await?
            }
            Err(e) => return Err(e),
        };

        let mut sync_failures = 0;
        if backend.file_access() == FileAccessMode::Copy {
            match self.sync.pull(false).await {
                Ok(report) => sync_failures = report.failures,
                Err(e) => {
                    tracing::warn!(error = %e, "post-run sync failed");
                    sync_failures = 1;
                }
            }
        }

        Ok(DispatchOutcome {
            exit_code: output.exit_code,
            output: Some(output),
            sync_failures,
        })
    }
}

/// Render `python <script> <args...>` as one shell command line, quoting
/// parts that contain spaces.
fn render_script_command(script_rel: &Path, args: &[String]) -> String {
    let mut parts = vec!["python".to_string(), script_rel.to_string_lossy().into_owned()];
    parts.extend(args.iter().cloned());
    parts
        .iter()
        .map(|part| {
            if part.contains(' ') {
                format!("\"{part}\"")
            } else {
                part.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_sandbox_core::{Error, ProjectLayout};
    use pl_sandbox_mock::MockBackend;
    use std::path::PathBuf;

    fn ready_mock(root: &Path) -> MockBackend {
        let mock = MockBackend::new(ProjectLayout::rooted_at(root));
        {
            let mut state = mock.state();
            state.exists = true;
            state.responsive = true;
        }
        mock
    }

    fn dispatcher_over(mock: MockBackend) -> (Dispatcher, Arc<MockBackend>) {
        let mock = Arc::new(mock);
        (Dispatcher::new(mock.clone()), mock)
    }

    #[test]
    fn script_command_rendering_quotes_spaced_args() {
        let cmd = render_script_command(
            Path::new("python/learn_python.py"),
            &["--functions".to_string(), "basic".to_string(), "two words".to_string()],
        );
        assert_eq!(
            cmd,
            "python python/learn_python.py --functions basic \"two words\""
        );
    }

    #[tokio::test]
    async fn copy_mode_batch_pushes_runs_and_pulls_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (dispatcher, mock) = dispatcher_over(ready_mock(tmp.path()));

        let script = tmp.path().join("python/learn_python.py");
        let args = vec!["--functions".to_string(), "basic".to_string()];
        let outcome = dispatcher.run_script(&script, &args, false).await.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(mock.count_calls("copy_in"), 1);
        assert_eq!(mock.count_calls("list_files"), 1);
        let calls = mock.calls();
        let exec = calls.iter().find(|c| c.starts_with("exec:")).unwrap();
        assert_eq!(
            exec,
            "exec: python python/learn_python.py --functions basic"
        );
    }

    #[tokio::test]
    async fn program_exit_code_is_reported_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = ready_mock(tmp.path());
        mock.state().exec_results.push_back(Ok(CommandOutput {
            exit_code: 7,
            stdout: String::new(),
            stderr: "demo failed".into(),
        }));
        let (dispatcher, mock) = dispatcher_over(mock);

        let outcome = dispatcher.run_command("python boom.py", false).await.unwrap();

        assert_eq!(outcome.exit_code, 7);
        // No restart for the program's own failure.
        assert_eq!(mock.count_calls("remove"), 0);
        assert_eq!(mock.count_calls("exec"), 1);
    }

    #[tokio::test]
    async fn sandbox_level_failure_triggers_one_restart_and_retry() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = ready_mock(tmp.path());
        mock.state().exec_results.push_back(Err(Error::Launch {
            program: "docker".into(),
            message: "container wedged".into(),
        }));
        mock.state().exec_results.push_back(Ok(CommandOutput {
            exit_code: 0,
            stdout: "recovered".into(),
            stderr: String::new(),
        }));
        let (dispatcher, mock) = dispatcher_over(mock);

        let outcome = dispatcher.run_command("python demo.py", false).await.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output.as_ref().unwrap().stdout, "recovered");
        assert_eq!(mock.count_calls("exec"), 2);
        assert_eq!(mock.count_calls("remove"), 1);
        assert_eq!(mock.count_calls("create"), 1);
    }

    #[tokio::test]
    async fn exit_all_sessions_code_is_forwarded_literally() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = ready_mock(tmp.path());
        mock.state().interactive_codes.push_back(EXIT_ALL_SESSIONS);
        let (dispatcher, _mock) = dispatcher_over(mock);

        let outcome = dispatcher.run_command("python demo.py", true).await.unwrap();

        assert_eq!(outcome.exit_code, EXIT_ALL_SESSIONS);
        assert!(outcome.exit_all_sessions());
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn ordinary_nonzero_exit_is_not_exit_all_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = ready_mock(tmp.path());
        mock.state().interactive_codes.push_back(1);
        let (dispatcher, _mock) = dispatcher_over(mock);

        let outcome = dispatcher.run_command("python demo.py", true).await.unwrap();

        assert_eq!(outcome.exit_code, 1);
        assert!(!outcome.exit_all_sessions());
    }

    #[tokio::test]
    async fn interactive_copy_mode_runs_a_final_sync_after_the_session() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = ready_mock(tmp.path());
        mock.state()
            .files
            .insert("/workspace/made_inside.md".into(), b"hello".to_vec());
        mock.state().interactive_codes.push_back(0);
        let (dispatcher, mock) = dispatcher_over(mock);

        let outcome = dispatcher.run_command("python demo.py", true).await.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(tmp.path().join("made_inside.md").exists());
        // The final pull happens exactly once after the session ends (the
        // short interactive run leaves no time for background passes).
        assert!(mock.count_calls("list_files") >= 1);
    }

    #[tokio::test]
    async fn dispatch_fails_when_sandbox_cannot_become_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockBackend::new(ProjectLayout::rooted_at(tmp.path()));
        {
            let mut state = mock.state();
            state.exists = true;
            state.start_succeeds = false;
        }
        let (dispatcher, _mock) = dispatcher_over(mock);

        let err = dispatcher.run_command("python demo.py", false).await.unwrap_err();
        assert!(matches!(err, Error::Unresponsive { .. }));
    }

    #[tokio::test]
    async fn mount_mode_batch_skips_sync_phases() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockBackend::new(ProjectLayout::rooted_at(tmp.path()))
            .with_file_access(FileAccessMode::Mount);
        {
            let mut state = mock.state();
            state.exists = true;
            state.responsive = true;
        }
        let (dispatcher, mock) = dispatcher_over(mock);

        let script = PathBuf::from("/elsewhere/demo.py");
        let outcome = dispatcher.run_script(&script, &[], false).await.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(mock.count_calls("copy_in"), 0);
        assert_eq!(mock.count_calls("list_files"), 0);
        // Outside the project root the bare file name is used.
        let calls = mock.calls();
        assert!(calls.iter().any(|c| c == "exec: python demo.py"));
    }
}
