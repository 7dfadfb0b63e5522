//! # Triage Entry Point
//!
//! Operator commands for the triage engine: apply migrations, run sweeps,
//! submit a report by hand, or run the background worker.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use triage::{
    clock::SystemClock,
    config::{AppConfig, ConfigLoader},
    db,
    dispatch::OrchestrationDispatcher,
    intake::{IncomingErrorReport, IntakeEngine},
    migration::{Migrator, MigratorTrait},
    models::ErrorType,
    orchestrator::{IssueOrchestrator, LifecyclePolicy},
    pipeline::ErrorPipeline,
    scheduler::SweepScheduler,
    telemetry,
    tracker::GitHubTrackerFactory,
};

#[derive(Debug, Parser)]
#[command(name = "triage", version, about = "Error deduplication and issue lifecycle engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Run one sweep pass and print the summary.
    Sweep {
        /// Only sweep this project.
        #[arg(long)]
        project: Option<Uuid>,
    },
    /// Submit one error report and wait for its tracker work to finish.
    Report {
        #[arg(long)]
        project: Uuid,
        #[arg(long, value_enum, default_value = "server")]
        kind: ReportKind,
        #[arg(long)]
        message: String,
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Run the periodic sweep scheduler until interrupted.
    Worker,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReportKind {
    Client,
    Server,
}

impl From<ReportKind> for ErrorType {
    fn from(kind: ReportKind) -> Self {
        match kind {
            ReportKind::Client => ErrorType::Client,
            ReportKind::Server => ErrorType::Server,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;
    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    let db = Arc::new(
        db::init_pool(&config)
            .await
            .context("initializing database connection pool")?,
    );
    db::health_check(&db).await?;

    match cli.command {
        Command::Migrate => {
            Migrator::up(db.as_ref(), None)
                .await
                .context("applying migrations")?;
            info!("Migrations applied");
        }
        Command::Sweep { project } => {
            let scheduler =
                SweepScheduler::new(db.clone(), orchestrator(&config, &db)?, config.sweep.clone());
            let summary = match project {
                Some(project_id) => scheduler.run_project(project_id).await?,
                None => scheduler.run_once().await?,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Report {
            project,
            kind,
            message,
            code,
            url,
        } => {
            let mut report = IncomingErrorReport::new(kind.into(), message);
            if let Some(code) = code {
                report = report.with_error_code(code);
            }
            if let Some(url) = url {
                report = report.with_url(url);
            }

            let shutdown = CancellationToken::new();
            let (dispatcher, worker) = OrchestrationDispatcher::spawn(
                orchestrator(&config, &db)?,
                config.dispatch.clone(),
                shutdown.clone(),
            );
            let pipeline = ErrorPipeline::new(
                Arc::new(IntakeEngine::new(db.clone(), Arc::new(SystemClock))),
                dispatcher,
            );
            let outcome = pipeline.report(project, &report).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            // Queued work is drained before the worker exits.
            shutdown.cancel();
            worker.await.context("dispatcher task failed")?;
        }
        Command::Worker => {
            let scheduler =
                SweepScheduler::new(db.clone(), orchestrator(&config, &db)?, config.sweep.clone());
            let shutdown = CancellationToken::new();
            let handle = tokio::spawn(scheduler.run(shutdown.clone()));

            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            info!("Shutdown signal received");
            shutdown.cancel();
            handle.await.context("sweep scheduler task failed")??;
        }
    }

    Ok(())
}

fn orchestrator(config: &AppConfig, db: &Arc<DatabaseConnection>) -> Result<Arc<IssueOrchestrator>> {
    let trackers = GitHubTrackerFactory::new(&config.github_api_base, config.tracker_timeout())
        .context("building tracker client")?;
    Ok(Arc::new(IssueOrchestrator::new(
        db.clone(),
        Arc::new(trackers),
        Arc::new(SystemClock),
        LifecyclePolicy::from(&config.lifecycle),
    )))
}
