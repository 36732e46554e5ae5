use cardflow::cli::{args::Args, commands};
use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;

fn main() {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        let cancellation_token = CancellationToken::new();

        // Ctrl-C stops the run between stages; the card is restored before it returns
        let signal_token = cancellation_token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    eprintln!("\nReceived CTRL+C, finishing the current stage and restoring the card...");
                    signal_token.cancel();
                }
                Err(e) => eprintln!("Failed to install CTRL+C signal handler: {}", e),
            }
        });

        commands::run(args, cancellation_token).await
    });

    match result {
        Ok(outcome) => process::exit(outcome.exit_code()),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}
