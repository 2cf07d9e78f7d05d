use access_log_masker::cli::{self, Cli};
use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli::setup_logging(&cli) {
        eprintln!("Failed to set up logging: {}", e);
        process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        // Create cancellation token for coordinating graceful shutdown
        let cancellation_token = CancellationToken::new();

        let signal_token = cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        eprintln!("\nReceived CTRL+C, aborting objects in flight...");
                        signal_token.cancel();
                    }
                    Err(e) => tracing::warn!("Failed to install CTRL+C signal handler: {}", e),
                },
                _ = signal_token.cancelled() => {}
            }
        });

        // run to completion so every started upload is committed or aborted
        let handle = tokio::runtime::Handle::current();
        let result = cli::run(cli, handle, cancellation_token.clone()).await;
        if cancellation_token.is_cancelled() {
            return Err(anyhow::anyhow!("Processing interrupted by user"));
        }
        // stop the signal watcher
        cancellation_token.cancel();
        result
    });

    match result {
        Ok(summary) if summary.has_failures() => {
            eprintln!("Error: {} objects failed", summary.objects_failed);
            process::exit(1);
        }
        Ok(_) => process::exit(0),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}
