//! `opsboard`: terminal access to the ops dashboard backend.

mod cli;

use anyhow::Context as _;
use clap::Parser as _;
use opsboard_client::observability::init_observability;
use opsboard_client::stream::{ConnectionState, ReconnectPolicy};
use opsboard_client::ClientConfig;
use opsboard_sources::{
    DataSources, FindingFilter, LogLine, ReleaseFilter, RunFilter, SubmitRun, WorkflowSource,
};
use serde::Serialize;
use tracing::info;

use crate::cli::{AuditCommand, Cli, Command, ReleasesCommand, RunsCommand, SystemCommand, TailArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_observability();

    let cli = Cli::parse();
    let config = match cli.api_url {
        Some(url) => ClientConfig::new(url),
        None => ClientConfig::from_env().context("set OPSBOARD_API_URL or pass --api-url")?,
    };
    let sources = DataSources::from_config(config).context("failed to build api client")?;

    match cli.command {
        Command::Audit { command } => match command {
            AuditCommand::Summary => print_json(&sources.audit.summary().await?),
            AuditCommand::Findings {
                severity,
                package,
                limit,
            } => {
                let filter = FindingFilter {
                    severity: severity.map(Into::into),
                    package,
                    limit,
                    cursor: None,
                };
                print_json(&sources.audit.list_findings(&filter).await?)
            }
            AuditCommand::Finding { id } => print_json(&sources.audit.get_finding(&id).await?),
        },
        Command::Runs { command } => match command {
            RunsCommand::List {
                workflow,
                status,
                limit,
            } => {
                let filter = RunFilter {
                    workflow,
                    status: status.map(Into::into),
                    limit,
                    cursor: None,
                };
                print_json(&sources.workflows.list_runs(&filter).await?)
            }
            RunsCommand::Get { id } => print_json(&sources.workflows.get_run(&id).await?),
            RunsCommand::Cancel { id } => print_json(&sources.workflows.cancel_run(&id).await?),
            RunsCommand::Submit(args) => {
                let mut request = SubmitRun::new(args.workflow);
                for (key, value) in args.params {
                    request = request.param(key, value);
                }
                if let Some(key) = args.idempotency_key {
                    request = request.idempotency_key(key);
                }
                print_json(&sources.workflows.submit_run(&request).await?)
            }
            RunsCommand::Tail(args) => tail(sources.workflows.clone(), args).await,
        },
        Command::Releases { command } => match command {
            ReleasesCommand::List { status, limit } => {
                let filter = ReleaseFilter {
                    status: status.map(Into::into),
                    limit,
                    cursor: None,
                };
                print_json(&sources.releases.list_releases(&filter).await?)
            }
            ReleasesCommand::Get { id } => print_json(&sources.releases.get_release(&id).await?),
            ReleasesCommand::Publish { id } => {
                print_json(&sources.releases.publish_release(&id).await?)
            }
        },
        Command::System { command } => match command {
            SystemCommand::Health => print_json(&sources.system.health().await?),
            SystemCommand::Info => print_json(&sources.system.info().await?),
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints events until the stream closes or Ctrl-C is pressed.
async fn tail(workflows: WorkflowSource, args: TailArgs) -> anyhow::Result<()> {
    let workflows = if args.reconnect {
        workflows.with_reconnect(ReconnectPolicy::default().with_max_retries(args.max_retries))
    } else {
        workflows
    };
    let mut sub = if args.events {
        workflows.stream_events(&args.id).await?
    } else {
        workflows.stream_logs(&args.id).await?
    };
    let closer = sub.closer();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(event = "cli.tail_interrupted", domain = "cli", run_id = %args.id);
                closer.close_and_wait().await;
                return Ok(());
            }
            next = sub.next_event() => {
                let Some(event) = next else { break };
                match LogLine::from_event(&event) {
                    Ok(line) if !args.events => {
                        let step = line.step.as_deref().unwrap_or("-");
                        println!(
                            "{} {:>5} [{step}] {}",
                            event.timestamp.to_rfc3339(),
                            line.level,
                            line.message
                        );
                    }
                    _ => println!("{}", serde_json::to_string(&event)?),
                }
            }
        }
    }

    let status = sub.status();
    if status.parse_errors > 0 {
        eprintln!("skipped {} malformed event(s)", status.parse_errors);
    }
    match (status.state, status.last_error) {
        (ConnectionState::ClosedError, Some(err)) => {
            Err(anyhow::Error::new(err).context(format!("stream for run {} closed", args.id)))
        }
        _ => Ok(()),
    }
}
