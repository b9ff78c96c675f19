use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "warden", about = "Behavioral-compliance engine for automated agents")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded action stream through the engine
    Run(commands::run::RunArgs),
    /// Validate, show or locate the policy file
    Policy(commands::policy::PolicyArgs),
    /// Inspect the audit log
    Audit(commands::audit::AuditArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Policy(args) => commands::policy::run(args),
        Commands::Audit(args) => commands::audit::run(args).await,
    }
}
