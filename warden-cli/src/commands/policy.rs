use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use warden_core::{load_policy_from_file, load_policy_or_conservative};

#[derive(Args)]
pub struct PolicyArgs {
    #[command(subcommand)]
    pub command: PolicyCommands,
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Validate a policy file, failing on any error
    Check {
        /// Policy file (defaults to the XDG config location)
        path: Option<PathBuf>,
    },
    /// Print the effective policy, defaults filled in
    Show {
        path: Option<PathBuf>,
    },
    /// Show default file locations
    Path,
}

pub fn run(args: PolicyArgs) -> Result<()> {
    match args.command {
        PolicyCommands::Check { path } => check(resolve(path)),
        PolicyCommands::Show { path } => show(resolve(path)),
        PolicyCommands::Path => show_paths(),
    }
}

fn resolve(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(warden_paths::policy_file)
}

fn check(path: PathBuf) -> Result<()> {
    let loaded = load_policy_from_file(&path)
        .with_context(|| format!("policy {} is invalid", path.display()))?;
    for warning in &loaded.warnings {
        println!("warning: {}", warning);
    }
    println!("{}: ok", path.display());
    Ok(())
}

fn show(path: PathBuf) -> Result<()> {
    let loaded = load_policy_or_conservative(&path);
    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }
    println!("{}", toml::to_string_pretty(&loaded.policy)?);
    Ok(())
}

fn show_paths() -> Result<()> {
    println!("Policy:    {}", warden_paths::policy_file().display());
    println!("Audit log: {}", warden_paths::audit_log_file().display());
    Ok(())
}
