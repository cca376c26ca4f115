use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use attachment_scraper::config::{Cli, LogFormat, ScraperConfig};
use attachment_scraper::pipeline::{Pipeline, SearchCriterion};
use attachment_scraper::prompt::read_criterion;
use attachment_scraper::storage::LocalDirStore;
use mailbox_api::GmailClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ScraperConfig::load(Cli::parse())?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init(),
    }

    let criterion = match config.from.as_deref() {
        Some(from) => SearchCriterion::new(from)?,
        None => read_criterion(io::stdin().lock(), io::stdout())?,
    };

    let token = config
        .credentials
        .resolve()
        .context("Failed to resolve Gmail credentials")?;
    let mailbox = GmailClient::new(&config.gmail, token).context("Failed to create Gmail client")?;
    let store = LocalDirStore::new(&config.output_dir);

    info!(
        criterion = %criterion,
        output_dir = %config.output_dir.display(),
        concurrency = config.limits.max_concurrency,
        "Starting attachment scraper"
    );

    let pipeline = Pipeline::new(Arc::new(mailbox), Arc::new(store), config.limits);
    match pipeline.run(&criterion).await {
        Ok(report) if report.listed == 0 => {
            println!("No messages found.");
            Ok(())
        }
        Ok(report) => {
            println!(
                "Saved {} attachment(s) from {} message(s) to {}",
                report.saved.len(),
                report.fetched,
                config.output_dir.display()
            );
            Ok(())
        }
        Err(failure) => {
            for additional in failure.additional() {
                error!(stage = %additional.stage(), error = %additional, "Additional pipeline error");
            }
            if !failure.saved().is_empty() {
                info!(saved = failure.saved().len(), "Attachments saved before the failure were kept");
            }
            Err(failure.into())
        }
    }
}
