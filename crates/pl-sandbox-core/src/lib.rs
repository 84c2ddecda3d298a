//! Shared types and the backend seam for pylearn sandboxes.
//!
//! This crate defines the interface every sandbox backend (Docker container,
//! local micromamba installation) must provide, without any backend-specific
//! logic, so the lifecycle manager, sync engine and dispatcher can be written
//! once against it.

use std::path::{Path, PathBuf};

pub mod error;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sandbox operations.
pub use error::Error;

pub use pl_exec::CommandOutput;

/// Exit code a program inside the sandbox returns to mean "terminate all
/// nested sessions". The dispatcher forwards it literally and the CLI's
/// module loop short-circuits on it.
pub const EXIT_ALL_SESSIONS: i32 = 42;

/// Backend kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Docker container backend.
    Docker,
    /// Local micromamba environment backend.
    Micromamba,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Micromamba => write!(f, "micromamba"),
        }
    }
}

/// How project files reach the sandbox. Fixed at construction; a sandbox is
/// never switched between modes within one lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAccessMode {
    /// The project directory is bind-mounted into the sandbox.
    Mount,
    /// Files are explicitly pushed and pulled (restricted hosts where bind
    /// mounts are unavailable).
    Copy,
}

impl std::fmt::Display for FileAccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mount => write!(f, "mount"),
            Self::Copy => write!(f, "copy"),
        }
    }
}

/// Where the project lives on the host.
#[derive(Clone, Debug)]
pub struct ProjectLayout {
    /// Root of the project tree mirrored into the sandbox.
    pub project_root: PathBuf,
    /// Directory holding the demo scripts and the environment definition.
    pub script_dir: PathBuf,
}

impl ProjectLayout {
    /// Layout rooted at the given directory, with scripts under `python/`.
    pub fn rooted_at(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let script_dir = project_root.join("python");
        Self {
            project_root,
            script_dir,
        }
    }

    /// Layout rooted at the current working directory.
    pub fn discover() -> std::io::Result<Self> {
        Ok(Self::rooted_at(std::env::current_dir()?))
    }

    /// The declarative package list consumed when the sandbox is created.
    pub fn env_file(&self) -> PathBuf {
        self.script_dir.join("environment.yml")
    }

    /// The Dockerfile used to build the sandbox image.
    pub fn dockerfile(&self) -> PathBuf {
        self.script_dir.join("Dockerfile")
    }

    /// A script path made relative to the project root, so it resolves to
    /// the same file inside the sandbox workspace. Paths outside the project
    /// fall back to the bare file name.
    pub fn relative_script(&self, script: &Path) -> PathBuf {
        match script.strip_prefix(&self.project_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => PathBuf::from(script.file_name().unwrap_or(script.as_os_str())),
        }
    }
}

/// A single command or script invocation bound for the sandbox. Created per
/// dispatch, consumed immediately, never persisted.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    /// Shell command line run inside the sandbox workspace.
    pub command: String,
    /// Attach the caller's terminal instead of capturing output.
    pub interactive: bool,
}

impl ExecutionRequest {
    pub fn batch(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            interactive: false,
        }
    }

    pub fn interactive(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            interactive: true,
        }
    }
}

/// Snapshot of the probes, recomputed fresh on every call. No field is
/// cached across lifecycle operations; stale state is always assumed.
#[derive(Clone, Debug, serde::Serialize)]
pub struct SandboxStatus {
    pub kind: BackendKind,
    pub name: String,
    pub file_access: FileAccessMode,
    /// The runtime tool itself (docker daemon, micromamba binary) responds.
    pub runtime_available: bool,
    /// The image / base installation the sandbox is created from exists.
    pub image_ready: bool,
    /// An instance (container / environment) exists under the expected name.
    pub exists: bool,
    /// The instance executes a trivial command successfully.
    pub running: bool,
}

/// Capability interface for one sandbox implementation.
///
/// Probes are idempotent and must swallow execution failures, answering
/// `false` ("unknown" downgrades to "not ready"). Lifecycle methods return
/// errors with actionable guidance; retries are the manager's job, not the
/// backend's.
#[async_trait::async_trait]
pub trait SandboxBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Instance name (container name or environment name).
    fn name(&self) -> &str;

    fn file_access(&self) -> FileAccessMode;

    fn layout(&self) -> &ProjectLayout;

    /// Path of the project workspace as seen from inside the sandbox.
    fn workspace_root(&self) -> &str;

    // Probes.

    async fn runtime_available(&self) -> bool;

    async fn image_ready(&self) -> bool;

    async fn instance_exists(&self) -> bool;

    /// Goes beyond "listed as running": executes a trivial command inside
    /// the sandbox and verifies success.
    async fn is_responsive(&self) -> bool;

    /// Whether the existing instance's recorded owner mapping matches the
    /// current process. Backends without an ownership concept answer `true`.
    /// A mismatch must force recreation, never silent reuse.
    async fn owner_matches(&self) -> bool;

    // Lifecycle.

    async fn build_image(&self) -> Result<()>;

    async fn create_instance(&self) -> Result<()>;

    async fn start_instance(&self) -> Result<()>;

    async fn stop_instance(&self) -> Result<()>;

    async fn remove_instance(&self) -> Result<()>;

    async fn destroy_image(&self) -> Result<()>;

    // Execution.

    /// Run a command inside the sandbox, capturing output. A non-zero exit
    /// is a successful `CommandOutput`, not an error.
    async fn exec_captured(&self, command: &str) -> Result<CommandOutput>;

    /// Run a command attached to the caller's terminal. The exit code is
    /// forwarded literally, including [`EXIT_ALL_SESSIONS`].
    async fn exec_interactive(&self, command: &str) -> Result<i32>;

    // Copy-mode file transfer. Mount-mode backends reject these.

    /// Copy the whole project tree into the sandbox workspace.
    async fn copy_in(&self) -> Result<()>;

    /// Copy one file out of the sandbox to the given host path.
    async fn copy_out(&self, sandbox_path: &str, host_path: &Path) -> Result<()>;

    /// Workspace paths matching any of the glob patterns, absolute as seen
    /// from inside the sandbox. Recomputed on every call.
    async fn list_workspace_files(&self, patterns: &[String]) -> Result<Vec<String>>;
}
