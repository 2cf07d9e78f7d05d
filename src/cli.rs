//! Command-line interface components.

use crate::config::MaskerConfig;
use crate::models::BatchSummary;
use crate::notification;
use crate::processor::LogProcessor;
use crate::storage::{RemoteStore, ServerSideEncryption};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "access-log-masker")]
#[command(about = "Mask client addresses in CloudFront access logs and split them by date")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mask source logs into per-date outputs in the destination bucket
    Mask(KeyArgs),
    /// Delete the source logs of masked outputs
    Purge(KeyArgs),
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Object keys to handle
    #[arg(value_name = "KEY")]
    pub keys: Vec<String>,

    /// SQS batch of S3 notifications naming further keys
    #[arg(long, value_name = "FILE")]
    pub event: Option<PathBuf>,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

impl KeyArgs {
    /// Keys given on the command line followed by those created in
    /// `bucket` according to the event file.
    pub fn collect_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let mut keys = self.keys.clone();
        if let Some(path) = &self.event {
            let envelope = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read event file {}", path.display()))?;
            let notified = notification::object_keys(&envelope, bucket)
                .with_context(|| format!("Invalid event file {}", path.display()))?;
            debug!("{} keys notified in {}", notified.len(), path.display());
            keys.extend(notified);
        }
        Ok(keys)
    }
}

/// Set up structured logging on stderr
pub fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = cli.log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("access_log_masker={}", log_level)));

    if cli.quiet {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

/// Run `cli` against S3 using the configuration from the environment.
///
/// Cancelling `token` aborts the objects in flight; the call still returns
/// only once they have been cleaned up.
pub async fn run(cli: Cli, runtime: Handle, token: CancellationToken) -> Result<BatchSummary> {
    let config = MaskerConfig::from_env().context("Invalid configuration")?;
    let store = RemoteStore::amazon_s3(
        runtime,
        &[
            (config.source_bucket.as_str(), ServerSideEncryption::None),
            (
                config.destination_bucket.as_str(),
                config.server_side_encryption,
            ),
        ],
    )
    .context("Failed to configure S3 clients")?;

    let (source_bucket, destination_bucket) = (
        config.source_bucket.clone(),
        config.destination_bucket.clone(),
    );
    let processor = Arc::new(LogProcessor::new(Arc::new(store), config).with_cancellation(token));

    let summary = match cli.command {
        Commands::Mask(args) => {
            let keys = args.collect_keys(&source_bucket)?;
            if keys.is_empty() {
                warn!("No source keys to mask");
            }
            info!("Masking {} objects from {}", keys.len(), source_bucket);
            processor.process_objects(keys).await
        }
        Commands::Purge(args) => {
            let keys = args.collect_keys(&destination_bucket)?;
            if keys.is_empty() {
                warn!("No masked keys to purge sources for");
            }
            info!("Removing sources of {} masked objects", keys.len());
            processor.remove_sources(keys).await
        }
    };

    info!(
        "Done: {} processed, {} missing, {} failed, {} rows written, {} skipped",
        summary.objects_processed,
        summary.objects_missing,
        summary.objects_failed,
        summary.rows_written,
        summary.rows_skipped
    );
    Ok(summary)
}
