//! Local micromamba environment backend for pylearn sandboxes.
//!
//! Installs micromamba under `<project>/.mamba` and manages a named
//! environment created from `environment.yml`. Works without Docker on
//! Linux, macOS, WSL, and - through an optional proot-distro wrapper - on
//! Termux hosts. The environment shares the project directory, so this
//! backend is always mount-mode; copy-mode operations do not apply.

use std::path::{Path, PathBuf};

use pl_exec::{CommandLine, CommandOutput};
use pl_sandbox_core::{
    BackendKind, Error, FileAccessMode, ProjectLayout, Result, SandboxBackend,
};

/// Default environment name.
pub const DEFAULT_ENV: &str = "python-learning";

/// Official one-line installer; `-b` keeps it non-interactive and
/// `BIN_FOLDER` pins where the binary lands.
const INSTALL_SCRIPT: &str = "curl -L micro.mamba.pm/install.sh | bash -s -- -b";

/// Configuration for a micromamba-backed sandbox. Immutable after
/// construction.
#[derive(Clone, Debug)]
pub struct MambaConfig {
    pub env_name: String,
    /// Installation prefix, `<project>/.mamba` by default.
    pub mamba_root: PathBuf,
    /// When set, every command is wrapped in `proot-distro login <distro> --`
    /// (Termux hosts where neither Docker nor a native install works).
    pub proot_distro: Option<String>,
    pub layout: ProjectLayout,
}

impl MambaConfig {
    pub fn new(layout: ProjectLayout) -> Self {
        let mamba_root = layout.project_root.join(".mamba");
        Self {
            env_name: DEFAULT_ENV.to_string(),
            mamba_root,
            proot_distro: None,
            layout,
        }
    }

    pub fn with_proot_distro(mut self, distro: impl Into<String>) -> Self {
        self.proot_distro = Some(distro.into());
        self
    }
}

/// Local micromamba environment backend.
pub struct MambaBackend {
    cfg: MambaConfig,
    micromamba_bin: PathBuf,
}

impl MambaBackend {
    pub fn new(cfg: MambaConfig) -> Self {
        let micromamba_bin = cfg.mamba_root.join("bin").join("micromamba");
        Self { cfg, micromamba_bin }
    }

    /// A command wrapped for this backend: proot-distro prefix when
    /// configured, `MAMBA_ROOT_PREFIX` always.
    fn wrapped<I, S>(&self, program: &str, args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let line = match &self.cfg.proot_distro {
            Some(distro) => CommandLine::new("proot-distro")
                .args(["login", distro, "--", program])
                .args(args),
            None => CommandLine::new(program).args(args),
        };
        line.env("MAMBA_ROOT_PREFIX", self.cfg.mamba_root.to_string_lossy())
    }

    fn mamba<I, S>(&self, args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wrapped(&self.micromamba_bin.to_string_lossy(), args)
    }

    /// Shell line that activates the environment in an interactive shell.
    fn activation(&self) -> String {
        let bin = self.micromamba_bin.to_string_lossy();
        format!(
            "eval \"$({bin} shell hook -s bash)\" && {bin} activate {}",
            self.cfg.env_name
        )
    }

    fn binary_installed(&self) -> bool {
        self.micromamba_bin.is_file()
    }

    /// Download URL for the current platform, or an error naming what is
    /// unsupported.
    fn download_url() -> Result<String> {
        let os = match std::env::consts::OS {
            "linux" => "linux",
            "macos" => "osx",
            other => {
                return Err(Error::setup(format!(
                    "unsupported operating system for micromamba: {other}"
                )))
            }
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "64",
            "aarch64" => "aarch64",
            other => {
                return Err(Error::setup(format!(
                    "unsupported architecture for micromamba: {other}"
                )))
            }
        };
        Ok(format!("https://micro.mamba.pm/api/micromamba/{os}-{arch}/latest"))
    }

    /// Fallback used when the install script fails: fetch the binary
    /// directly and mark it executable.
    async fn install_direct(&self) -> Result<()> {
        let url = Self::download_url()?;
        let dest = self.micromamba_bin.clone();
        tokio::fs::create_dir_all(self.cfg.mamba_root.join("bin")).await?;

        println!("Downloading micromamba from {url}...");
        tokio::task::spawn_blocking(move || -> Result<()> {
            let response = ureq::get(&url)
                .call()
                .map_err(|e| Error::setup(format!("micromamba download failed: {e}")))?;
            let mut reader = response.into_reader();
            let mut file = std::fs::File::create(&dest)?;
            std::io::copy(&mut reader, &mut file)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::setup(format!("micromamba download task failed: {e}")))??;

        if self.binary_installed() {
            println!("Micromamba installed at {}", self.micromamba_bin.display());
            Ok(())
        } else {
            Err(Error::setup(
                "micromamba download completed but the binary is missing",
            ))
        }
    }
}

#[async_trait::async_trait]
impl SandboxBackend for MambaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Micromamba
    }

    fn name(&self) -> &str {
        &self.cfg.env_name
    }

    fn file_access(&self) -> FileAccessMode {
        FileAccessMode::Mount
    }

    fn layout(&self) -> &ProjectLayout {
        &self.cfg.layout
    }

    fn workspace_root(&self) -> &str {
        // The environment runs directly against the project tree.
        self.cfg
            .layout
            .project_root
            .to_str()
            .unwrap_or(".")
    }

    async fn runtime_available(&self) -> bool {
        if !self.binary_installed() {
            return false;
        }
        self.mamba(["--version"])
            .run_quiet()
            .await
            .map(|code| code == 0)
            .unwrap_or(false)
    }

    async fn image_ready(&self) -> bool {
        self.binary_installed()
    }

    async fn instance_exists(&self) -> bool {
        if !self.binary_installed() {
            return false;
        }
        self.mamba(["env", "list"])
            .run_captured()
            .await
            .map(|out| out.success() && out.stdout.contains(&self.cfg.env_name))
            .unwrap_or(false)
    }

    async fn is_responsive(&self) -> bool {
        if !self.instance_exists().await {
            return false;
        }
        self.mamba(["run", "-n", &self.cfg.env_name, "python", "-c", "pass"])
            .run_quiet()
            .await
            .map(|code| code == 0)
            .unwrap_or(false)
    }

    async fn owner_matches(&self) -> bool {
        // Local files are owned by whoever created them; there is no
        // recorded mapping to drift.
        true
    }

    async fn build_image(&self) -> Result<()> {
        if self.binary_installed() {
            return Ok(());
        }
        println!("Installing micromamba into {}...", self.cfg.mamba_root.display());
        let bin_dir = self.cfg.mamba_root.join("bin");
        tokio::fs::create_dir_all(&bin_dir).await?;

        let code = CommandLine::shell(INSTALL_SCRIPT)
            .current_dir(&self.cfg.layout.project_root)
            .env("MAMBA_ROOT_PREFIX", self.cfg.mamba_root.to_string_lossy())
            .env("BIN_FOLDER", bin_dir.to_string_lossy())
            .run_streamed()
            .await;

        match code {
            Ok(0) if self.binary_installed() => {
                println!("Micromamba installed at {}", self.micromamba_bin.display());
                Ok(())
            }
            _ => {
                tracing::warn!("install script failed, falling back to direct download");
                self.install_direct().await
            }
        }
    }

    async fn create_instance(&self) -> Result<()> {
        let env_file = self.cfg.layout.env_file();
        if !env_file.is_file() {
            return Err(Error::setup(format!(
                "environment file not found: {}",
                env_file.display()
            )));
        }
        println!(
            "Creating environment '{}' from {}...",
            self.cfg.env_name,
            env_file.display()
        );
        let code = self
            .mamba(["create", "-f", &env_file.to_string_lossy(), "-y"])
            .run_streamed()
            .await?;
        if code != 0 {
            return Err(Error::setup(format!(
                "creating environment '{}' failed (exit code {code})",
                self.cfg.env_name
            )));
        }
        // Package cache is pure dead weight once the env exists.
        let _ = self.mamba(["clean", "--all", "-y"]).run_captured().await;
        Ok(())
    }

    async fn start_instance(&self) -> Result<()> {
        // A local environment has no long-running process to start.
        Ok(())
    }

    async fn stop_instance(&self) -> Result<()> {
        Ok(())
    }

    async fn remove_instance(&self) -> Result<()> {
        let out = self
            .mamba(["env", "remove", "-n", &self.cfg.env_name, "-y"])
            .run_captured()
            .await?;
        if !out.success() {
            return Err(Error::command_failed(
                "micromamba env remove",
                out.exit_code,
                &out.stderr,
            ));
        }
        Ok(())
    }

    async fn destroy_image(&self) -> Result<()> {
        if self.cfg.mamba_root.exists() {
            println!(
                "Removing micromamba installation at {}...",
                self.cfg.mamba_root.display()
            );
            tokio::fs::remove_dir_all(&self.cfg.mamba_root).await?;
        }
        Ok(())
    }

    async fn exec_captured(&self, command: &str) -> Result<CommandOutput> {
        let out = self
            .mamba(["run", "-n", &self.cfg.env_name, "bash", "-c", command])
            .current_dir(&self.cfg.layout.project_root)
            .run_captured()
            .await?;
        Ok(out)
    }

    async fn exec_interactive(&self, command: &str) -> Result<i32> {
        let script = format!("{} && {command}", self.activation());
        let code = CommandLine::shell(script)
            .current_dir(&self.cfg.layout.project_root)
            .env("MAMBA_ROOT_PREFIX", self.cfg.mamba_root.to_string_lossy())
            .run_interactive()
            .await?;
        Ok(code)
    }

    async fn copy_in(&self) -> Result<()> {
        Err(Error::sync(
            "the micromamba backend shares the project directory; copy mode does not apply",
        ))
    }

    async fn copy_out(&self, _sandbox_path: &str, _host_path: &Path) -> Result<()> {
        Err(Error::sync(
            "the micromamba backend shares the project directory; copy mode does not apply",
        ))
    }

    async fn list_workspace_files(&self, _patterns: &[String]) -> Result<Vec<String>> {
        Err(Error::sync(
            "the micromamba backend shares the project directory; copy mode does not apply",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(root: &Path) -> MambaBackend {
        MambaBackend::new(MambaConfig::new(ProjectLayout::rooted_at(root)))
    }

    #[test]
    fn mamba_root_defaults_under_project() {
        let b = backend(Path::new("/proj"));
        assert_eq!(b.cfg.mamba_root, PathBuf::from("/proj/.mamba"));
        assert_eq!(b.micromamba_bin, PathBuf::from("/proj/.mamba/bin/micromamba"));
        assert_eq!(b.name(), DEFAULT_ENV);
    }

    #[test]
    fn always_mount_mode() {
        let b = backend(Path::new("/proj"));
        assert_eq!(b.file_access(), FileAccessMode::Mount);
        assert_eq!(b.workspace_root(), "/proj");
    }

    #[test]
    fn activation_hooks_the_shell_then_activates() {
        let b = backend(Path::new("/proj"));
        let line = b.activation();
        assert!(line.contains("shell hook -s bash"));
        assert!(line.ends_with("activate python-learning"));
    }

    #[test]
    fn download_url_matches_platform() {
        // Only meaningful on the platforms the backend supports.
        if matches!(std::env::consts::OS, "linux" | "macos") {
            let url = MambaBackend::download_url().unwrap();
            assert!(url.starts_with("https://micro.mamba.pm/api/micromamba/"));
            assert!(url.ends_with("/latest"));
        }
    }

    #[tokio::test]
    async fn probes_answer_false_without_installation() {
        let tmp = tempfile::tempdir().unwrap();
        let b = backend(tmp.path());
        assert!(!b.runtime_available().await);
        assert!(!b.image_ready().await);
        assert!(!b.instance_exists().await);
        assert!(!b.is_responsive().await);
        assert!(b.owner_matches().await);
    }

    #[tokio::test]
    async fn copy_mode_operations_are_rejected() {
        let b = backend(Path::new("/proj"));
        assert!(matches!(b.copy_in().await, Err(Error::Sync { .. })));
        assert!(matches!(
            b.copy_out("/proj/a.py", Path::new("/tmp/a.py")).await,
            Err(Error::Sync { .. })
        ));
    }

    #[test]
    fn proot_prefix_wraps_commands() {
        let cfg = MambaConfig::new(ProjectLayout::rooted_at("/proj")).with_proot_distro("ubuntu");
        let b = MambaBackend::new(cfg);
        let rendered = b.mamba(["env", "list"]).rendered();
        assert!(rendered.starts_with("proot-distro login ubuntu --"));
        assert!(rendered.ends_with("env list"));
    }
}
