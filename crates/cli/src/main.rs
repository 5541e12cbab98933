mod commands;

use std::path::PathBuf;

use actionflow_engine::{EngineConfig, ExecutionReport};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "actionflow")]
#[command(version, about = "Actionflow Command Line Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an action manually against a seeded in-memory store
    ///
    /// Examples:
    ///     actionflow exec act_welcome --seed ./seed.yaml --record rec_1
    ///     actionflow exec act_welcome --seed ./seed.yaml --json
    #[command(verbatim_doc_comment)]
    Exec {
        /// Action id
        #[arg(value_name = "ACTION")]
        action_id: String,

        /// Seed file (YAML or JSON) with object types, records, lists and actions
        #[arg(short, long)]
        seed: PathBuf,

        /// Record the action runs against
        #[arg(short, long)]
        record: Option<String>,

        /// Workspace to run in (default: the action's workspace)
        #[arg(short, long)]
        workspace: Option<String>,

        /// Actor recorded as the initiator
        #[arg(long)]
        actor: Option<String>,

        /// Emit only the JSON report
        #[arg(short, long)]
        json: bool,
    },

    /// Dispatch a trigger event read from a file
    Emit {
        /// Event file (YAML or JSON)
        #[arg(value_name = "EVENT")]
        event: PathBuf,

        /// Seed file
        #[arg(short, long)]
        seed: PathBuf,

        /// Emit only the JSON reports
        #[arg(short, long)]
        json: bool,
    },

    /// Check an action definition file for problems
    Validate {
        /// Action file (YAML or JSON)
        #[arg(value_name = "ACTION")]
        action: PathBuf,
    },

    /// List scheduled actions due in a time window
    Due {
        /// Seed file
        #[arg(short, long)]
        seed: PathBuf,

        /// Window start, RFC 3339 (default: one minute before --at)
        #[arg(long, value_parser = parse_time)]
        since: Option<DateTime<Utc>>,

        /// Window end, RFC 3339 (default: now)
        #[arg(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,
    },
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{s}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("Invalid ACTIONFLOW_* engine settings")?;

    match cli.command {
        Commands::Exec {
            action_id,
            seed,
            record,
            workspace,
            actor,
            json,
        } => {
            let request = commands::ExecRequest {
                action_id,
                record_id: record,
                workspace_id: workspace,
                actor_id: actor,
            };
            let report = commands::exec(&seed, config, request).await?;
            print_reports(std::slice::from_ref(&report), json)?;
            if !report.succeeded() {
                bail!("Execution {} failed", report.execution_id);
            }
        }
        Commands::Emit { event, seed, json } => {
            let reports = commands::emit(&seed, config, &event).await?;
            if reports.is_empty() && !json {
                println!("No actions triggered");
            }
            print_reports(&reports, json)?;
        }
        Commands::Validate { action } => {
            let issues = commands::validate(&action, &config)?;
            if issues.is_empty() {
                println!("{}: OK", action.display());
            } else {
                for issue in &issues {
                    println!("{}: {}", action.display(), issue);
                }
                bail!("{} issue(s) found", issues.len());
            }
        }
        Commands::Due { seed, since, at } => {
            let at = at.unwrap_or_else(Utc::now);
            let since = since.unwrap_or(at - chrono::Duration::minutes(1));
            let due = commands::due(&seed, config, since, at).await?;
            if due.is_empty() {
                println!("No scheduled actions due in ({since}, {at}]");
            }
            for action in &due {
                println!(
                    "{}\t{}\t{}",
                    action.id,
                    action.trigger.schedule.as_deref().unwrap_or_default(),
                    action.name
                );
            }
        }
    }

    Ok(())
}

fn print_reports(reports: &[ExecutionReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }

    for report in reports {
        println!(
            "{} {} ({})",
            report.action_id, report.status, report.execution_id
        );
        for result in &report.step_results {
            match &result.error {
                Some(error) => println!("  x {} [{}]: {}", result.step_id, result.step_type, error),
                None => println!("  - {} [{}]", result.step_id, result.step_type),
            }
        }
        if let Some(error) = &report.error {
            println!("  error: {error}");
        }
    }
    Ok(())
}
