//! memc-load - installed-apps log loader

use anyhow::Result;
use clap::Parser;
use memc_common::logging::{init_logging, LogConfig, LogLevel};
use memc_load::cli::Cli;
use memc_load::{codec, RunSummary};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};

/// Exit status when at least one file was rejected, empty or aborted
const EXIT_FILES_FAILED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guard = match init(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("memc-load: cannot initialize logging: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if cli.test {
        return match codec::self_test() {
            Ok(records) => {
                info!(records, "Codec self-test passed");
                ExitCode::SUCCESS
            },
            Err(e) => {
                error!(error = %e, "Codec self-test failed");
                ExitCode::FAILURE
            },
        };
    }

    let started = Instant::now();
    match run(&cli).await {
        Ok(summary) => {
            info!(
                files = summary.files.len(),
                failed = summary.failed().count(),
                elapsed_secs = started.elapsed().as_secs_f64(),
                "Run completed"
            );
            if summary.all_succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FILES_FAILED)
            }
        },
        Err(e) => {
            error!(error = %format!("{e:#}"), "Unexpected error");
            ExitCode::FAILURE
        },
    }
}

fn init(cli: &Cli) -> Result<memc_common::logging::LogGuard> {
    let mut builder = LogConfig::builder().log_file_prefix("memc-load");
    if let Some(path) = &cli.log {
        builder = builder.log_file(path);
    }
    if cli.dry {
        builder = builder.level(LogLevel::Debug);
    }

    // Environment variables take precedence over flags
    let log_config = builder.build().merge_env()?;
    init_logging(&log_config)
}

/// Log the effective options, then validate and run them
async fn run(cli: &Cli) -> Result<RunSummary> {
    let config = cli.loader_config();

    info!(
        options = %serde_json::to_string(&config)?,
        "memc-load started with options"
    );

    memc_load::run(&config).await
}
