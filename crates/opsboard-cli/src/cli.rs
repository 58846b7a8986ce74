//! Command-line argument parsing with clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use opsboard_sources::{ReleaseStatus, RunStatus, Severity};
use serde_json::Value;

/// Query the opsboard backend from the terminal.
#[derive(Parser, Debug)]
#[command(name = "opsboard", version, about, long_about = None)]
pub struct Cli {
    /// Backend URL. Defaults to `OPSBOARD_API_URL`.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Dependency audit results.
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
    /// Workflow runs.
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
    /// Releases.
    Releases {
        #[command(subcommand)]
        command: ReleasesCommand,
    },
    /// Backend health and build info.
    System {
        #[command(subcommand)]
        command: SystemCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    Summary,
    Findings {
        #[arg(long, value_enum)]
        severity: Option<SeverityArg>,
        #[arg(long)]
        package: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Finding {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RunsCommand {
    List {
        #[arg(long)]
        workflow: Option<String>,
        #[arg(long, value_enum)]
        status: Option<RunStatusArg>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Get {
        id: String,
    },
    Cancel {
        id: String,
    },
    Submit(SubmitArgs),
    /// Follow a run's live logs (or events) until interrupted.
    Tail(TailArgs),
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    pub workflow: String,
    /// Run parameter as KEY=VALUE; VALUE is parsed as JSON when possible.
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,
    #[arg(long)]
    pub idempotency_key: Option<String>,
}

#[derive(Args, Debug)]
pub struct TailArgs {
    pub id: String,
    /// Follow lifecycle events instead of log lines.
    #[arg(long)]
    pub events: bool,
    /// Reconnect after drops, resuming from the last event.
    #[arg(long)]
    pub reconnect: bool,
    #[arg(long, default_value_t = 5, requires = "reconnect")]
    pub max_retries: u32,
}

#[derive(Subcommand, Debug)]
pub enum ReleasesCommand {
    List {
        #[arg(long, value_enum)]
        status: Option<ReleaseStatusArg>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Get {
        id: String,
    },
    Publish {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SystemCommand {
    Health,
    Info,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SeverityArg {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl From<SeverityArg> for Severity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Critical => Self::Critical,
            SeverityArg::High => Self::High,
            SeverityArg::Medium => Self::Medium,
            SeverityArg::Low => Self::Low,
            SeverityArg::Info => Self::Info,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RunStatusArg {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl From<RunStatusArg> for RunStatus {
    fn from(arg: RunStatusArg) -> Self {
        match arg {
            RunStatusArg::Queued => Self::Queued,
            RunStatusArg::Running => Self::Running,
            RunStatusArg::Succeeded => Self::Succeeded,
            RunStatusArg::Failed => Self::Failed,
            RunStatusArg::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ReleaseStatusArg {
    Draft,
    Published,
    Archived,
}

impl From<ReleaseStatusArg> for ReleaseStatus {
    fn from(arg: ReleaseStatusArg) -> Self {
        match arg {
            ReleaseStatusArg::Draft => Self::Draft,
            ReleaseStatusArg::Published => Self::Published,
            ReleaseStatusArg::Archived => Self::Archived,
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn params_prefer_json_values() {
        assert_eq!(parse_param("retries=3"), Ok(("retries".into(), Value::from(3))));
        assert_eq!(parse_param("branch=main"), Ok(("branch".into(), Value::from("main"))));
        assert_eq!(parse_param("note=a=b"), Ok(("note".into(), Value::from("a=b"))));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn tail_flags_parse() {
        let cli = Cli::try_parse_from([
            "opsboard", "runs", "tail", "run-1", "--events", "--reconnect", "--max-retries", "2",
        ])
        .expect("parse");
        match cli.command {
            Command::Runs {
                command: RunsCommand::Tail(args),
            } => {
                assert!(args.events);
                assert!(args.reconnect);
                assert_eq!(args.max_retries, 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
