use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use warden_core::{AuditLog, JsonlAuditLog};

#[derive(Args)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommands,
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Print the most recent audit-log entries
    Tail {
        /// Number of entries
        #[arg(short = 'n', long, default_value_t = 10)]
        lines: usize,

        /// Audit log (defaults to the XDG data location)
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

pub async fn run(args: AuditArgs) -> Result<()> {
    match args.command {
        AuditCommands::Tail { lines, log } => tail(log, lines).await,
    }
}

async fn tail(path: Option<PathBuf>, lines: usize) -> Result<()> {
    let log = JsonlAuditLog::new(path.unwrap_or_else(warden_paths::audit_log_file));
    for entry in log.tail(lines).await? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}
