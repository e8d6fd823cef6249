//! masterd - Security Scan Orchestration Daemon
//!
//! Main entry point for the daemon binary (Section 10.3).

use clap::Parser;
use masterd::Daemon;
use scan_core::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "masterd", about = "Security scan orchestration daemon")]
struct Cli {
    /// Path to a key=value config file, merged over the built-in defaults.
    #[arg(long, env = "MASTERD_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured bind address.
    #[arg(long, env = "MASTERD_BIND_ADDR")]
    bind_addr: Option<String>,
}

fn main() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load config from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    runtime.block_on(async {
        let daemon = match Daemon::new(config).await {
            Ok(daemon) => Arc::new(daemon),
            Err(e) => {
                error!("failed to initialize daemon: {}", e);
                std::process::exit(1);
            }
        };

        let runner = Arc::clone(&daemon);
        let mut run_handle = tokio::spawn(async move { runner.run().await });

        tokio::select! {
            result = &mut run_handle => {
                report_run_result(result);
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT; draining in-flight work");
                daemon.shutdown();
            }
        }

        report_run_result(run_handle.await);
    });
}

fn report_run_result(result: Result<masterd::AppResult<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("daemon error: {}", e),
        Err(e) => error!("daemon task panicked: {}", e),
    }
}
