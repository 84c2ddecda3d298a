//! `pl run` - execute demo modules on the host or in the sandbox.

use anyhow::{Context, Result};
use clap::Args;
use pl_sandbox::Dispatcher;
use pl_sandbox_core::ProjectLayout;

use crate::modules;
use crate::session::{RuntimePolicy, SessionConfig};

/// Arguments for running demo modules.
#[derive(Args)]
pub struct RunArgs {
    /// Demo modules to run (default: all; see `pl list`)
    pub modules: Vec<String>,

    /// Drop into a Python shell at breakpoints (default)
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Disable interactive breakpoints
    #[arg(long, conflicts_with = "interactive")]
    pub no_interactive: bool,

    /// Step mode: breakpoint after every line of the CSV module
    #[arg(short = 's', long)]
    pub step: bool,

    /// Show docstrings on the first tab press in the shell
    #[arg(long)]
    pub doc: bool,

    /// Export code snippets to practice/<module>/ (default)
    #[arg(long)]
    pub snip: bool,

    /// Disable snippet export
    #[arg(long, conflicts_with = "snip")]
    pub no_snip: bool,

    /// Copy files between host and sandbox instead of bind-mounting
    /// (for restricted hosts)
    #[arg(long = "copy-mode", visible_alias = "cm")]
    pub copy_mode: bool,

    /// Run every module inside the managed sandbox
    #[arg(long, conflicts_with = "no_docker")]
    pub force_docker: bool,

    /// Run directly on the host Python
    #[arg(long)]
    pub no_docker: bool,

    /// Sandbox backend used with --force-docker
    #[arg(long, value_enum, default_value_t = crate::session::BackendChoice::Docker)]
    pub backend: crate::session::BackendChoice,

    /// Wrap the mamba backend in `proot-distro login <DISTRO>` (Termux)
    #[arg(long, value_name = "DISTRO")]
    pub proot: Option<String>,
}

impl RunArgs {
    pub async fn run(self) -> Result<()> {
        let layout = ProjectLayout::discover().context("failed to locate the project root")?;
        let session = SessionConfig::from_run_args(&self);
        let selected = modules::select(&self.modules)?;
        let script = layout.script_dir.join("learn_python.py");

        match session.runtime {
            RuntimePolicy::Host => {
                println!("Running directly on the host Python");
            }
            RuntimePolicy::Sandbox => {
                println!("Running in the managed sandbox (--force-docker)");
                if session.copy_mode {
                    println!("Copy mode enabled - files are copied instead of mounted");
                }
            }
        }
        if session.interactive {
            println!("Interactive mode enabled - breakpoints drop into a Python shell");
        }

        // One dispatcher for the whole loop; readiness is still re-probed
        // per dispatch.
        let dispatcher = match session.runtime {
            RuntimePolicy::Sandbox => Some(Dispatcher::new(session.build_backend(&layout))),
            RuntimePolicy::Host => None,
        };

        for module in selected {
            println!();
            println!("Demonstrating {}:", module.description);
            let args = session.script_args(module.key);

            let outcome = match &dispatcher {
                Some(dispatcher) => dispatcher
                    .run_script(&script, &args, session.interactive)
                    .await?,
                None => Dispatcher::run_script_on_host(&layout, &script, &args).await?,
            };

            if let Some(output) = &outcome.output {
                print!("{}", output.stdout);
            }
            if outcome.sync_failures > 0 {
                println!(
                    "Warning: {} file(s) failed to sync back from the sandbox",
                    outcome.sync_failures
                );
            }
            if outcome.exit_all_sessions() {
                println!("Exit-all-sessions requested; skipping the remaining modules");
                break;
            }
            if !outcome.success() {
                println!(
                    "Module '{}' exited with code {}",
                    module.key, outcome.exit_code
                );
            }
        }
        Ok(())
    }
}
