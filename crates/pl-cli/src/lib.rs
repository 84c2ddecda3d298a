//! pylearn CLI library

pub mod env;
pub mod modules;
pub mod run;
pub mod session;

// Re-export CLI types for testing
pub use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pl")]
#[command(about = "Interactive Python-learning toolkit with a managed sandbox")]
#[command(version, author, long_about = None)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run demo modules
    Run(run::RunArgs),
    /// Sandbox environment management
    Env {
        #[command(subcommand)]
        subcommand: env::EnvCommands,
    },
    /// List available demo modules
    List,
    /// Generate a shell completion script
    Completions(CompletionsArgs),
}

#[derive(clap::Args)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

impl CompletionsArgs {
    pub fn run(self) -> anyhow::Result<()> {
        let mut cmd = Cli::command();
        clap_complete::generate(self.shell, &mut cmd, "pl", &mut std::io::stdout());
        Ok(())
    }
}

/// Print the module registry (`pl list`).
pub fn list_modules() {
    println!("Available modules:");
    for module in modules::MODULES {
        println!("  {}: {}", module.key, module.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_modules_and_mode_flags() {
        let cli = Cli::try_parse_from([
            "pl",
            "run",
            "basic",
            "advanced",
            "--copy-mode",
            "--force-docker",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.modules, vec!["basic", "advanced"]);
                assert!(args.copy_mode);
                assert!(args.force_docker);
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn copy_mode_has_cm_alias() {
        let cli = Cli::try_parse_from(["pl", "run", "--cm"]).unwrap();
        match cli.command {
            Commands::Run(args) => assert!(args.copy_mode),
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn force_docker_and_no_docker_conflict() {
        let result = Cli::try_parse_from(["pl", "run", "--force-docker", "--no-docker"]);
        assert!(result.is_err());
    }

    #[test]
    fn env_status_accepts_json() {
        let cli = Cli::try_parse_from(["pl", "env", "status", "--json"]).unwrap();
        match cli.command {
            Commands::Env {
                subcommand: env::EnvCommands::Status(args),
            } => assert!(args.json),
            _ => panic!("expected env status subcommand"),
        }
    }

    #[test]
    fn env_setup_accepts_backend_and_rebuild() {
        let cli =
            Cli::try_parse_from(["pl", "env", "setup", "--backend", "mamba", "--rebuild"]).unwrap();
        match cli.command {
            Commands::Env {
                subcommand: env::EnvCommands::Setup(args),
            } => {
                assert_eq!(args.backend, session::BackendChoice::Mamba);
                assert!(args.rebuild);
            }
            _ => panic!("expected env setup subcommand"),
        }
    }

    #[test]
    fn completions_parses_a_shell() {
        let cli = Cli::try_parse_from(["pl", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions(_)));
    }
}
