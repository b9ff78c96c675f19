//! Replay a JSONL action stream through the engine.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::{info, warn};
use warden_core::{ActionEvent, AuditEngine, WardenError, load_policy_or_conservative};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Action stream, one JSON `{kind, timestamp, params}` object per line
    #[arg(long)]
    pub events: PathBuf,

    /// Policy file (defaults to the XDG config location)
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Audit log (overrides the policy; defaults to the XDG data location)
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Sensitive operation to check against the final state
    #[arg(long)]
    pub check: Vec<String>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let policy_path = args.policy.unwrap_or_else(warden_paths::policy_file);
    let mut loaded = load_policy_or_conservative(&policy_path);
    if let Some(path) = args.audit_log {
        loaded.policy.audit.log_path = Some(path);
    } else if loaded.policy.audit.log_path.is_none() {
        loaded.policy.audit.log_path = Some(warden_paths::audit_log_file());
    }

    let file = File::open(&args.events)
        .with_context(|| format!("failed to open {}", args.events.display()))?;
    let events = read_events(BufReader::new(file))?;

    let engine = AuditEngine::from_loaded(loaded)?;
    engine.start().await;

    let mut recorded = 0usize;
    let mut flagged = 0usize;
    for event in events {
        match engine.record_event(event) {
            Ok(verdict) => {
                recorded += 1;
                if verdict.is_flagged() {
                    flagged += 1;
                }
            }
            Err(WardenError::Locked(reason)) => {
                warn!(%reason, recorded, "engine locked; stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    info!(recorded, flagged, "replay complete");

    let report = match engine.force_audit().await {
        Some(report) => Some(report),
        None => engine.last_report(),
    };
    engine.stop().await?;

    if let Some(report) = report {
        println!("{}", serde_json::to_string_pretty(report.as_ref())?);
    }
    println!("state: {}", engine.current_state());
    for op in &args.check {
        println!("{}: {:?}", op, engine.decide(op));
    }
    Ok(())
}

/// Parse one event per non-blank line.
fn read_events(reader: impl BufRead) -> Result<Vec<ActionEvent>> {
    let mut events = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ActionEvent = serde_json::from_str(&line)
            .with_context(|| format!("line {}: not an action event", n + 1))?;
        if let Some(prev) = events.last().map(|e: &ActionEvent| e.timestamp)
            && event.timestamp < prev
        {
            bail!("line {}: timestamp goes backwards", n + 1);
        }
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_events() {
        let input = "\
{\"kind\":\"walk\",\"timestamp\":\"2026-01-01T12:00:00Z\"}

{\"kind\":\"mine\",\"timestamp\":\"2026-01-01T12:00:01.250Z\",\"params\":{\"target\":\"ore\"}}
";
        let events = read_events(input.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].param_str("target"), Some("ore"));
    }

    #[test]
    fn test_read_events_rejects_garbage() {
        let err = read_events("not json\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_read_events_rejects_time_travel() {
        let input = "\
{\"kind\":\"walk\",\"timestamp\":\"2026-01-01T12:00:05Z\"}
{\"kind\":\"walk\",\"timestamp\":\"2026-01-01T12:00:01Z\"}
";
        assert!(read_events(input.as_bytes()).is_err());
    }
}
