use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{error, info};

use attempt_stats::cli::{Cli, ReportKind, ReportSource, RunOptions};
use attempt_stats::config::AppConfig;
use attempt_stats::db::{self, Db};
use attempt_stats::ingest::IngestClient;
use attempt_stats::models::Attempt;
use attempt_stats::report::{BatchReportBuilder, DbReportBuilder, ReportBuilder};
use attempt_stats::sender::{EmailReportSender, ReportSender, SheetsReportSender};
use attempt_stats::store::AttemptStore;
use attempt_stats::logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;
    let _guard = logging::init(&cfg.logging)?;
    logging::rotate_logs(&cfg.logging);

    // Scheduled-batch contract: everything past logging init is caught and
    // logged, and the process exits successfully either way. Failures are
    // visible in the logs only.
    if let Err(e) = run(&cli, &cfg).await {
        error!(error = %format!("{e:#}"), "execution failed");
    }
    Ok(())
}

async fn run(cli: &Cli, cfg: &AppConfig) -> Result<()> {
    info!("start execution");
    // Option validation precedes every side effect.
    let opts = RunOptions::from_cli(cli, Local::now().naive_local())?;

    let pool = db::connect(&cfg.database).await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let outcome = pipeline(&opts, cfg, pool.clone()).await;
    pool.close().await;
    info!("database connection closed");
    outcome?;

    info!("execution successful");
    Ok(())
}

async fn pipeline(opts: &RunOptions, cfg: &AppConfig, pool: Db) -> Result<()> {
    let store = AttemptStore::new(pool);

    if opts.truncate {
        info!("truncating attempts");
        store.truncate().await?;
    }

    let mut batch: Option<Vec<Attempt>> = None;
    if !opts.no_fetch {
        let client = IngestClient::new(&cfg.ingest)?;
        let mut attempts = client.fetch_attempts(opts.start, opts.end).await?;
        if attempts.is_empty() {
            info!("no attempts fetched, nothing to persist");
        } else {
            store.insert_many(&mut attempts).await?;
        }
        batch = Some(attempts);
    }

    let Some(target) = &opts.report else {
        info!("report source not specified, report skipped");
        return Ok(());
    };

    let report = match target.source {
        // The batch builder counts whatever it is given; the batch was
        // fetched for exactly [start, end], so no re-filtering happens here.
        ReportSource::Api => {
            BatchReportBuilder::new(opts.start, opts.end, batch.unwrap_or_default())
                .build_report()
                .await?
        }
        ReportSource::Db => {
            DbReportBuilder::new(opts.start, opts.end, store.clone())
                .build_report()
                .await?
        }
    };

    match target.kind {
        ReportKind::Email => {
            let mailer = cfg
                .mailer
                .clone()
                .context("mailer section missing from configuration")?;
            let Some(recipient) = target.email.clone() else {
                anyhow::bail!("email address must be specified");
            };
            EmailReportSender::new(mailer, recipient).send(&report).await;
        }
        ReportKind::Gsheets => {
            let gsheets = cfg
                .gsheets
                .clone()
                .context("gsheets section missing from configuration")?;
            SheetsReportSender::new(gsheets).send(&report).await;
        }
    }
    Ok(())
}
