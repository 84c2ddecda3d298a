//! Per-invocation session context.
//!
//! One `SessionConfig` is built from the parsed CLI arguments and passed
//! explicitly into every dispatch, replacing the module-level mutable flags
//! the demo layer and the shell layer used to share.

use std::sync::Arc;

use pl_sandbox_core::{FileAccessMode, ProjectLayout, SandboxBackend};
use pl_sandbox_docker::{DockerBackend, DockerConfig};
use pl_sandbox_mamba::{MambaBackend, MambaConfig};

/// Which sandbox implementation `--force-docker` (and `pl env`) drives.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum BackendChoice {
    /// Docker container (requires a running daemon).
    Docker,
    /// Local micromamba installation under `<project>/.mamba`.
    Mamba,
}

/// Where demo modules execute.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RuntimePolicy {
    /// Directly on the host Python (the default, and `--no-docker`).
    Host,
    /// Inside the managed sandbox (`--force-docker`).
    Sandbox,
}

/// Configuration for one CLI invocation.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub interactive: bool,
    pub step: bool,
    pub doc: bool,
    pub snippets: bool,
    pub copy_mode: bool,
    pub runtime: RuntimePolicy,
    pub backend_choice: BackendChoice,
    pub proot_distro: Option<String>,
}

impl SessionConfig {
    pub fn from_run_args(args: &crate::run::RunArgs) -> Self {
        Self {
            // Interactive breakpoints and snippet export default to on;
            // the --no-* flags switch them off.
            interactive: !args.no_interactive,
            step: args.step,
            doc: args.doc,
            snippets: !args.no_snip,
            copy_mode: args.copy_mode,
            runtime: if args.force_docker {
                RuntimePolicy::Sandbox
            } else {
                RuntimePolicy::Host
            },
            backend_choice: args.backend,
            proot_distro: args.proot.clone(),
        }
    }

    /// Arguments forwarded to the demo script so the session configuration
    /// survives the hop into the sandbox.
    pub fn script_args(&self, module_key: &str) -> Vec<String> {
        let mut args = vec!["--functions".to_string(), module_key.to_string()];
        if self.interactive {
            args.push("--interactive".to_string());
        } else {
            args.push("--no-interactive".to_string());
        }
        if self.step {
            args.push("--step".to_string());
        }
        if self.doc {
            args.push("--doc".to_string());
        }
        if self.snippets {
            args.push("--snip".to_string());
        } else {
            args.push("--no-snip".to_string());
        }
        if self.copy_mode {
            args.push("--cm".to_string());
        }
        args
    }

    /// Construct the configured sandbox backend for this session.
    pub fn build_backend(&self, layout: &ProjectLayout) -> Arc<dyn SandboxBackend> {
        build_backend(
            self.backend_choice,
            self.copy_mode,
            self.proot_distro.as_deref(),
            layout,
        )
    }
}

/// Shared backend construction for `pl run` and `pl env`.
pub fn build_backend(
    choice: BackendChoice,
    copy_mode: bool,
    proot_distro: Option<&str>,
    layout: &ProjectLayout,
) -> Arc<dyn SandboxBackend> {
    match choice {
        BackendChoice::Docker => {
            let mode = if copy_mode {
                FileAccessMode::Copy
            } else {
                FileAccessMode::Mount
            };
            Arc::new(DockerBackend::new(DockerConfig::new(layout.clone(), mode)))
        }
        BackendChoice::Mamba => {
            let mut cfg = MambaConfig::new(layout.clone());
            if let Some(distro) = proot_distro {
                cfg = cfg.with_proot_distro(distro);
            }
            Arc::new(MambaBackend::new(cfg))
        }
    }
}
