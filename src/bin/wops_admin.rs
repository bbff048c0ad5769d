use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use warehouse_ops::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::RequestKind,
    services::{expiration::SweepOutcome, ServiceContainer, ServiceFactory},
};

/// Operator tooling for the warehouse operations service.
#[derive(Parser)]
#[command(name = "wops-admin", version, about)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Run the deadline sweep for one request kind now
    SweepDeadlines {
        #[arg(long, value_parser = parse_kind)]
        kind: RequestKind,
    },
    /// Run the extension sweep for one request kind now
    SweepExtensions {
        #[arg(long, value_parser = parse_kind)]
        kind: RequestKind,
    },
    /// Print the next recurring stock-check instant
    NextRecurrence,
    /// Reserve and print the next identifier for a prefix and day
    AllocateId {
        #[arg(long)]
        prefix: String,
        /// Local business day, YYYY-MM-DD; defaults to today in the operating timezone
        #[arg(long)]
        day: Option<NaiveDate>,
    },
}

fn parse_kind(raw: &str) -> Result<RequestKind, String> {
    RequestKind::from_slug(raw)
        .ok_or_else(|| format!("unknown kind '{}': expected import, export or stock-check", raw))
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;

        Ok(Self {
            config,
            db: Arc::new(db_pool),
        })
    }

    fn services(&self) -> ServiceContainer {
        ServiceFactory::new(self.db.clone(), &self.config, None).build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::SweepDeadlines { kind } => {
            let outcome = context
                .services()
                .expiration
                .sweep_deadlines(kind, Utc::now())
                .await
                .with_context(|| format!("deadline sweep for {} failed", kind))?;
            render_outcome(&outcome, cli.json)?;
        }
        Commands::SweepExtensions { kind } => {
            let outcome = context
                .services()
                .expiration
                .sweep_extensions(kind, Utc::now())
                .await
                .with_context(|| format!("extension sweep for {} failed", kind))?;
            render_outcome(&outcome, cli.json)?;
        }
        Commands::NextRecurrence => {
            let services = context.services();
            let next = services
                .recurrence
                .compute_next_recurrence(Utc::now())
                .await
                .context("failed to compute next recurrence")?;
            let local = next.with_timezone(&services.recurrence.timezone());
            if cli.json {
                print_json(&serde_json::json!({ "next_run": next, "local": local.to_rfc3339() }))?;
            } else {
                println!("Next recurring stock check: {} ({})", local, next);
            }
        }
        Commands::AllocateId { prefix, day } => {
            let day = day.unwrap_or_else(|| {
                Utc::now()
                    .with_timezone(&context.config.timezone())
                    .date_naive()
            });
            let id = context
                .services()
                .allocator
                .allocate_id(&prefix, day)
                .await
                .with_context(|| format!("failed to allocate id for {} on {}", prefix, day))?;
            println!("{}", id);
        }
    }

    Ok(())
}

fn render_outcome(outcome: &SweepOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    match outcome.skipped {
        Some(reason) => println!(
            "- {} sweep on {} skipped ({:?})",
            outcome.kind, outcome.day, reason
        ),
        None => println!(
            "- {} on {} • cancelled {} • released holds {}",
            outcome.kind, outcome.day, outcome.cancelled_count, outcome.released_holds
        ),
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
