//! `pl env` - sandbox environment management.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pl_sandbox::SandboxManager;
use pl_sandbox_core::ProjectLayout;

use crate::session::{build_backend, BackendChoice};

#[derive(Subcommand)]
pub enum EnvCommands {
    /// Provision the sandbox (build image/installation, create, start)
    Setup(SetupArgs),
    /// Show sandbox status
    Status(StatusArgs),
    /// Remove the sandbox and its image/installation
    Cleanup(CleanupArgs),
    /// Tear the sandbox down and rebuild it from the environment definition
    Rebuild(RebuildArgs),
}

impl EnvCommands {
    pub async fn run(self) -> Result<()> {
        match self {
            Self::Setup(args) => args.run().await,
            Self::Status(args) => args.run().await,
            Self::Cleanup(args) => args.run().await,
            Self::Rebuild(args) => args.run().await,
        }
    }
}

#[derive(Args)]
pub struct SetupArgs {
    /// Create the sandbox for copy mode instead of bind-mounting
    #[arg(long = "copy-mode", visible_alias = "cm")]
    pub copy_mode: bool,

    /// Remove any existing sandbox and image first
    #[arg(long)]
    pub rebuild: bool,

    #[arg(long, value_enum, default_value_t = BackendChoice::Docker)]
    pub backend: BackendChoice,

    /// Wrap the mamba backend in `proot-distro login <DISTRO>` (Termux)
    #[arg(long, value_name = "DISTRO")]
    pub proot: Option<String>,
}

impl SetupArgs {
    pub async fn run(self) -> Result<()> {
        let layout = ProjectLayout::discover().context("failed to locate the project root")?;
        let backend = build_backend(self.backend, self.copy_mode, self.proot.as_deref(), &layout);
        let manager = SandboxManager::new(backend);

        println!("Setting up the sandbox environment...");
        if self.rebuild {
            manager.rebuild().await?;
        } else {
            manager.ensure_ready().await?;
        }

        println!("Sandbox environment is ready");
        if self.copy_mode {
            println!("Copy mode enabled - files are copied instead of mounted");
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct StatusArgs {
    /// Emit machine-readable JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Report status for a copy-mode sandbox
    #[arg(long = "copy-mode", visible_alias = "cm")]
    pub copy_mode: bool,

    #[arg(long, value_enum, default_value_t = BackendChoice::Docker)]
    pub backend: BackendChoice,

    /// Wrap the mamba backend in `proot-distro login <DISTRO>` (Termux)
    #[arg(long, value_name = "DISTRO")]
    pub proot: Option<String>,
}

impl StatusArgs {
    pub async fn run(self) -> Result<()> {
        let layout = ProjectLayout::discover().context("failed to locate the project root")?;
        let backend = build_backend(self.backend, self.copy_mode, self.proot.as_deref(), &layout);
        let manager = SandboxManager::new(backend);
        let status = manager.status().await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        println!("Sandbox environment status ({})", status.kind);
        println!("==================================================");
        println!("File access: {}", status.file_access);
        println!("Runtime available: {}", yes_no(status.runtime_available));
        println!("Image/installation ready: {}", yes_no(status.image_ready));
        println!("Instance exists: {}", yes_no(status.exists));
        println!("Running and responsive: {}", yes_no(status.running));

        if status.running {
            if let Some(path) = manager.python_path().await {
                println!("Python path: {path}");
            }
            let packages = manager.packages_sample(10).await;
            if !packages.is_empty() {
                println!();
                println!("Installed packages (sample):");
                for line in packages {
                    println!("  {line}");
                }
            }
        } else if status.exists {
            println!();
            println!("The sandbox exists but is not running; start it with 'pl env setup'");
        } else {
            println!();
            println!("No sandbox instance found; create one with 'pl env setup'");
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct CleanupArgs {
    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    #[arg(long, value_enum, default_value_t = BackendChoice::Docker)]
    pub backend: BackendChoice,

    /// Wrap the mamba backend in `proot-distro login <DISTRO>` (Termux)
    #[arg(long, value_name = "DISTRO")]
    pub proot: Option<String>,
}

impl CleanupArgs {
    pub async fn run(self) -> Result<()> {
        let layout = ProjectLayout::discover().context("failed to locate the project root")?;
        let backend = build_backend(self.backend, false, self.proot.as_deref(), &layout);
        let manager = SandboxManager::new(backend);
        let status = manager.status().await;

        if !status.exists && !status.image_ready {
            println!("No sandbox environment found");
            return Ok(());
        }

        println!("Found sandbox resources:");
        if status.exists {
            println!("  - instance: {}", status.name);
        }
        if status.image_ready {
            println!("  - image/installation ({})", status.kind);
        }

        if !self.yes && !confirm("Remove the sandbox environment? [y/N]: ")? {
            println!("Cleanup cancelled");
            return Ok(());
        }

        manager.teardown().await?;
        println!("Sandbox environment removed");
        Ok(())
    }
}

#[derive(Args)]
pub struct RebuildArgs {
    /// Rebuild the sandbox for copy mode
    #[arg(long = "copy-mode", visible_alias = "cm")]
    pub copy_mode: bool,

    #[arg(long, value_enum, default_value_t = BackendChoice::Docker)]
    pub backend: BackendChoice,

    /// Wrap the mamba backend in `proot-distro login <DISTRO>` (Termux)
    #[arg(long, value_name = "DISTRO")]
    pub proot: Option<String>,
}

impl RebuildArgs {
    pub async fn run(self) -> Result<()> {
        let layout = ProjectLayout::discover().context("failed to locate the project root")?;
        let backend = build_backend(self.backend, self.copy_mode, self.proot.as_deref(), &layout);
        let manager = SandboxManager::new(backend);
        manager.rebuild().await?;
        println!("Sandbox environment rebuilt");
        Ok(())
    }
}

/// Ask a yes/no question on the terminal; anything but y/yes declines.
fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
