//! Docker container backend for pylearn sandboxes.
//!
//! All state is inferred by invoking the `docker` CLI and inspecting its
//! output; nothing is cached between probes. Quiet/templated outputs
//! (`docker images -q`, `docker inspect --format`) are preferred over prose
//! parsing, but the protocol stays textual and best-effort.

use std::path::Path;
use std::time::Duration;

use pl_exec::{CommandLine, CommandOutput};
use pl_sandbox_core::{
    BackendKind, Error, FileAccessMode, ProjectLayout, Result, SandboxBackend,
};

/// Default image tag.
pub const DEFAULT_IMAGE: &str = "python-learning";
/// Default container name.
pub const DEFAULT_CONTAINER: &str = "python-learning-env";

/// Project workspace path inside the container.
const WORKSPACE: &str = "/workspace";
/// Wrapper that activates the conda environment before running a command.
const ACTIVATE: &str = "/opt/conda/activate_env.sh";
/// Settle time after `docker start` before the container is probed.
const START_SETTLE: Duration = Duration::from_secs(2);

/// Environment passed to every container so matplotlib and fontconfig write
/// their caches somewhere the mapped user can.
const CONTAINER_ENV: &[(&str, &str)] = &[
    ("MPLCONFIGDIR", "/tmp/matplotlib"),
    ("FONTCONFIG_PATH", "/tmp/fontconfig"),
    ("XDG_CACHE_HOME", "/tmp/cache"),
    ("MPLBACKEND", "Agg"),
];

/// Configuration for a Docker-backed sandbox. Immutable after construction.
#[derive(Clone, Debug)]
pub struct DockerConfig {
    pub image_name: String,
    pub container_name: String,
    pub file_access: FileAccessMode,
    pub layout: ProjectLayout,
}

impl DockerConfig {
    pub fn new(layout: ProjectLayout, file_access: FileAccessMode) -> Self {
        Self {
            image_name: DEFAULT_IMAGE.to_string(),
            container_name: DEFAULT_CONTAINER.to_string(),
            file_access,
            layout,
        }
    }
}

/// Docker container backend.
pub struct DockerBackend {
    cfg: DockerConfig,
}

impl DockerBackend {
    pub fn new(cfg: DockerConfig) -> Self {
        Self { cfg }
    }

    fn docker<I, S>(args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::new("docker").args(args)
    }

    /// Effective UID:GID of the current process, recorded on the container
    /// so ownership drift can be detected on later runs.
    fn user_mapping() -> String {
        #[cfg(unix)]
        {
            format!("{}:{}", nix::unistd::getuid(), nix::unistd::getgid())
        }
        #[cfg(not(unix))]
        {
            "1000:1000".to_string()
        }
    }

    /// `docker exec` argv prefix for this container, routed through the
    /// environment activation wrapper.
    fn exec_prefix(&self, interactive: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.push("-it".to_string());
        }
        args.push(self.cfg.container_name.clone());
        args.push(ACTIVATE.to_string());
        args
    }

    fn check(&self, context: &str, out: &CommandOutput) -> Result<()> {
        if out.success() {
            Ok(())
        } else {
            Err(Error::command_failed(context, out.exit_code, &out.stderr))
        }
    }
}

#[async_trait::async_trait]
impl SandboxBackend for DockerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    fn name(&self) -> &str {
        &self.cfg.container_name
    }

    fn file_access(&self) -> FileAccessMode {
        self.cfg.file_access
    }

    fn layout(&self) -> &ProjectLayout {
        &self.cfg.layout
    }

    fn workspace_root(&self) -> &str {
        WORKSPACE
    }

    async fn runtime_available(&self) -> bool {
        let client_ok = Self::docker(["--version"])
            .run_quiet()
            .await
            .map(|code| code == 0)
            .unwrap_or(false);
        if !client_ok {
            return false;
        }
        // The client existing says nothing about the daemon.
        Self::docker(["info"])
            .run_quiet()
            .await
            .map(|code| code == 0)
            .unwrap_or(false)
    }

    async fn image_ready(&self) -> bool {
        Self::docker(["images", "-q", &self.cfg.image_name])
            .run_captured()
            .await
            .map(|out| out.success() && !out.stdout_trimmed().is_empty())
            .unwrap_or(false)
    }

    async fn instance_exists(&self) -> bool {
        let filter = format!("name={}", self.cfg.container_name);
        Self::docker(["ps", "-a", "-q", "-f", &filter])
            .run_captured()
            .await
            .map(|out| out.success() && !out.stdout_trimmed().is_empty())
            .unwrap_or(false)
    }

    async fn is_responsive(&self) -> bool {
        let filter = format!("name={}", self.cfg.container_name);
        let listed = Self::docker(["ps", "-q", "-f", &filter])
            .run_captured()
            .await
            .map(|out| out.success() && !out.stdout_trimmed().is_empty())
            .unwrap_or(false);
        if !listed {
            return false;
        }
        // A container can be listed as running while wedged inside; prove
        // it by executing a trivial command.
        let mut args = self.exec_prefix(false);
        args.extend(["echo".to_string(), "ok".to_string()]);
        Self::docker(args)
            .run_quiet()
            .await
            .map(|code| code == 0)
            .unwrap_or(false)
    }

    async fn owner_matches(&self) -> bool {
        let out = Self::docker([
            "inspect",
            &self.cfg.container_name,
            "--format",
            "{{.Config.User}}",
        ])
        .run_captured()
        .await;
        match out {
            Ok(out) if out.success() => out.stdout_trimmed() == Self::user_mapping(),
            _ => false,
        }
    }

    async fn build_image(&self) -> Result<()> {
        println!("Building Docker image '{}'...", self.cfg.image_name);
        let dockerfile = self.cfg.layout.dockerfile();
        let code = Self::docker([
            "build",
            "-t",
            &self.cfg.image_name,
            "-f",
            &dockerfile.to_string_lossy(),
            &self.cfg.layout.script_dir.to_string_lossy(),
        ])
        .run_streamed()
        .await?;
        if code != 0 {
            return Err(Error::setup(format!(
                "building image '{}' failed (exit code {code}); \
                 check {} and the Docker daemon logs",
                self.cfg.image_name,
                dockerfile.display()
            )));
        }
        Ok(())
    }

    async fn create_instance(&self) -> Result<()> {
        let mapping = Self::user_mapping();
        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            self.cfg.container_name.clone(),
            "--user".into(),
            mapping,
        ];
        if self.cfg.file_access == FileAccessMode::Mount {
            args.push("-v".into());
            args.push(format!(
                "{}:{WORKSPACE}",
                self.cfg.layout.project_root.display()
            ));
        }
        args.push("-w".into());
        args.push(WORKSPACE.into());
        for (key, value) in CONTAINER_ENV {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push("-it".into());
        args.push(self.cfg.image_name.clone());

        let out = Self::docker(args).run_captured().await?;
        if !out.success() {
            let mut message = format!(
                "creating container '{}' failed: {}",
                self.cfg.container_name,
                out.stderr.trim()
            );
            if self.cfg.file_access == FileAccessMode::Mount {
                message.push_str(
                    "; bind mounts are restricted on some hosts - try copy mode (--copy-mode)",
                );
            }
            return Err(Error::setup(message));
        }
        Ok(())
    }

    async fn start_instance(&self) -> Result<()> {
        let out = Self::docker(["start", &self.cfg.container_name])
            .run_captured()
            .await?;
        self.check("docker start", &out)?;
        // Give the container a moment before the caller re-probes it.
        tokio::time::sleep(START_SETTLE).await;
        Ok(())
    }

    async fn stop_instance(&self) -> Result<()> {
        let out = Self::docker(["stop", &self.cfg.container_name])
            .run_captured()
            .await?;
        self.check("docker stop", &out)
    }

    async fn remove_instance(&self) -> Result<()> {
        let out = Self::docker(["rm", "-f", &self.cfg.container_name])
            .run_captured()
            .await?;
        self.check("docker rm", &out)
    }

    async fn destroy_image(&self) -> Result<()> {
        let out = Self::docker(["rmi", &self.cfg.image_name]).run_captured().await?;
        self.check("docker rmi", &out)
    }

    async fn exec_captured(&self, command: &str) -> Result<CommandOutput> {
        let mut args = self.exec_prefix(false);
        args.extend(["bash".to_string(), "-c".to_string(), command.to_string()]);
        Ok(Self::docker(args).run_captured().await?)
    }

    async fn exec_interactive(&self, command: &str) -> Result<i32> {
        let mut args = self.exec_prefix(true);
        args.extend(["bash".to_string(), "-c".to_string(), command.to_string()]);
        Ok(Self::docker(args).run_interactive().await?)
    }

    async fn copy_in(&self) -> Result<()> {
        let source = format!("{}/.", self.cfg.layout.project_root.display());
        let dest = format!("{}:{WORKSPACE}/", self.cfg.container_name);
        let out = Self::docker(["cp", &source, &dest]).run_captured().await?;
        if !out.success() {
            return Err(Error::sync(format!(
                "copying project files into '{}' failed: {}",
                self.cfg.container_name,
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn copy_out(&self, sandbox_path: &str, host_path: &Path) -> Result<()> {
        let source = format!("{}:{sandbox_path}", self.cfg.container_name);
        let out = Self::docker(["cp", &source, &host_path.to_string_lossy()])
            .run_captured()
            .await?;
        if !out.success() {
            return Err(Error::sync(format!(
                "copying '{sandbox_path}' out of the container failed: {}",
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn list_workspace_files(&self, patterns: &[String]) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for pattern in patterns {
            let find = format!("find {WORKSPACE} -name '{pattern}' -type f 2>/dev/null");
            let args = vec![
                "exec".to_string(),
                self.cfg.container_name.clone(),
                "bash".to_string(),
                "-c".to_string(),
                find,
            ];
            let out = Self::docker(args).run_captured().await?;
            if !out.success() {
                tracing::debug!(pattern, code = out.exit_code, "workspace scan pattern failed");
                continue;
            }
            found.extend(
                out.stdout
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(mode: FileAccessMode) -> DockerBackend {
        DockerBackend::new(DockerConfig::new(ProjectLayout::rooted_at("/proj"), mode))
    }

    #[test]
    fn default_names_match_the_learning_environment() {
        let b = backend(FileAccessMode::Mount);
        assert_eq!(b.name(), "python-learning-env");
        assert_eq!(b.kind(), BackendKind::Docker);
        assert_eq!(b.workspace_root(), "/workspace");
    }

    #[test]
    fn user_mapping_is_uid_colon_gid() {
        let mapping = DockerBackend::user_mapping();
        let parts: Vec<&str> = mapping.split(':').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].parse::<u32>().is_ok());
        assert!(parts[1].parse::<u32>().is_ok());
    }

    #[test]
    fn exec_prefix_routes_through_activation_wrapper() {
        let b = backend(FileAccessMode::Copy);
        let prefix = b.exec_prefix(false);
        assert_eq!(prefix, vec!["exec", "python-learning-env", ACTIVATE]);
        let interactive = b.exec_prefix(true);
        assert_eq!(interactive[1], "-it");
    }

    #[tokio::test]
    async fn probes_swallow_missing_docker() {
        // Probes must answer false, never error, when docker is absent or
        // the daemon is down. Either outcome of this environment is fine;
        // the call just must not panic.
        let b = backend(FileAccessMode::Mount);
        let _ = b.runtime_available().await;
        let _ = b.instance_exists().await;
    }
}
