use anyhow::Result;
use pl_cli::{Cli, Commands, Parser};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Run(args) => args.run().await,
        Commands::Env { subcommand } => subcommand.run().await,
        Commands::List => {
            pl_cli::list_modules();
            Ok(())
        }
        Commands::Completions(args) => args.run(),
    }
}
