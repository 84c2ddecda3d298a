//! Scriptable in-memory sandbox backend for tests.
//!
//! Probe answers, exec results and the sandbox-side file tree are all set by
//! the test; every trait call is appended to a call log so tests can assert
//! on operation order and counts.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use pl_exec::CommandOutput;
use pl_sandbox_core::{
    BackendKind, Error, FileAccessMode, ProjectLayout, Result, SandboxBackend,
};

/// Mutable, scriptable state behind a [`MockBackend`].
pub struct MockState {
    pub runtime_available: bool,
    pub image_ready: bool,
    pub exists: bool,
    /// Fallback responsiveness once `responsive_plan` is exhausted.
    pub responsive: bool,
    /// Scripted answers consumed by successive `is_responsive` calls.
    pub responsive_plan: VecDeque<bool>,
    pub owner_ok: bool,
    /// When true, `start_instance` flips `responsive` on.
    pub start_succeeds: bool,
    /// Sandbox-side files, absolute path -> content, served by
    /// `list_workspace_files` and `copy_out`.
    pub files: BTreeMap<String, Vec<u8>>,
    /// Scripted results for `exec_captured`; exhausted calls succeed with
    /// empty output.
    pub exec_results: VecDeque<Result<CommandOutput>>,
    /// Scripted exit codes for `exec_interactive`; exhausted calls exit 0.
    pub interactive_codes: VecDeque<i32>,
    /// Every trait call, in order, e.g. `"create"`, `"exec: python x.py"`.
    pub calls: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            runtime_available: true,
            image_ready: true,
            exists: false,
            responsive: false,
            responsive_plan: VecDeque::new(),
            owner_ok: true,
            start_succeeds: true,
            files: BTreeMap::new(),
            exec_results: VecDeque::new(),
            interactive_codes: VecDeque::new(),
            calls: Vec::new(),
        }
    }
}

/// In-memory [`SandboxBackend`] double.
pub struct MockBackend {
    file_access: FileAccessMode,
    workspace_root: String,
    layout: ProjectLayout,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            file_access: FileAccessMode::Copy,
            workspace_root: "/workspace".to_string(),
            layout,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_file_access(mut self, mode: FileAccessMode) -> Self {
        self.file_access = mode;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| *c == name || c.starts_with(&format!("{name}:")))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.state().calls.push(call.into());
    }
}

#[async_trait::async_trait]
impl SandboxBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    fn name(&self) -> &str {
        "mock-sandbox"
    }

    fn file_access(&self) -> FileAccessMode {
        self.file_access
    }

    fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    fn workspace_root(&self) -> &str {
        &self.workspace_root
    }

    async fn runtime_available(&self) -> bool {
        self.record("runtime_available");
        self.state().runtime_available
    }

    async fn image_ready(&self) -> bool {
        self.record("image_ready");
        self.state().image_ready
    }

    async fn instance_exists(&self) -> bool {
        self.record("exists");
        self.state().exists
    }

    async fn is_responsive(&self) -> bool {
        self.record("is_responsive");
        let mut state = self.state();
        match state.responsive_plan.pop_front() {
            Some(answer) => answer,
            None => state.exists && state.responsive,
        }
    }

    async fn owner_matches(&self) -> bool {
        self.record("owner_matches");
        self.state().owner_ok
    }

    async fn build_image(&self) -> Result<()> {
        self.record("build_image");
        self.state().image_ready = true;
        Ok(())
    }

    async fn create_instance(&self) -> Result<()> {
        self.record("create");
        let mut state = self.state();
        state.exists = true;
        state.owner_ok = true;
        Ok(())
    }

    async fn start_instance(&self) -> Result<()> {
        self.record("start");
        let mut state = self.state();
        if state.start_succeeds {
            state.responsive = true;
        }
        Ok(())
    }

    async fn stop_instance(&self) -> Result<()> {
        self.record("stop");
        self.state().responsive = false;
        Ok(())
    }

    async fn remove_instance(&self) -> Result<()> {
        self.record("remove");
        let mut state = self.state();
        state.exists = false;
        state.responsive = false;
        Ok(())
    }

    async fn destroy_image(&self) -> Result<()> {
        self.record("destroy_image");
        self.state().image_ready = false;
        Ok(())
    }

    async fn exec_captured(&self, command: &str) -> Result<CommandOutput> {
        self.record(format!("exec: {command}"));
        match self.state().exec_results.pop_front() {
            Some(result) => result,
            None => Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    async fn exec_interactive(&self, command: &str) -> Result<i32> {
        self.record(format!("exec_interactive: {command}"));
        Ok(self.state().interactive_codes.pop_front().unwrap_or(0))
    }

    async fn copy_in(&self) -> Result<()> {
        self.record("copy_in");
        Ok(())
    }

    async fn copy_out(&self, sandbox_path: &str, host_path: &Path) -> Result<()> {
        self.record(format!("copy_out: {sandbox_path}"));
        let content = self
            .state()
            .files
            .get(sandbox_path)
            .cloned()
            .ok_or_else(|| Error::sync(format!("no such sandbox file: {sandbox_path}")))?;
        std::fs::write(host_path, content).map_err(Error::Io)?;
        Ok(())
    }

    async fn list_workspace_files(&self, patterns: &[String]) -> Result<Vec<String>> {
        self.record("list_files");
        let state = self.state();
        let suffixes: Vec<String> = patterns
            .iter()
            .map(|p| p.trim_start_matches('*').to_string())
            .collect();
        Ok(state
            .files
            .keys()
            .filter(|path| suffixes.iter().any(|s| path.ends_with(s.as_str())))
            .cloned()
            .collect())
    }
}
