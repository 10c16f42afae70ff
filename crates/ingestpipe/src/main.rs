//! Bulk warehouse ingestion engine: CLI entry point.
//!
//! Builds the application context once (config, logging, warehouse pool)
//! and dispatches to one of the closed set of subcommand operations
//! (spec.md section 9, "dynamic duck-typed operation objects become a
//! closed set of tagged operation variants").

mod cli;
mod commands;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use ingestpipe_protocol::Config;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().unwrap_or_else(ingestpipe_logging::default_log_dir);
    if let Err(err) = ingestpipe_logging::init_logging(ingestpipe_logging::LogConfig {
        app_name: "ingestpipe",
        log_dir: log_dir.clone(),
        log_level: cli.log_level.as_deref(),
        quiet: cli.quiet,
    }) {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start async runtime: {err:#}");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(run(cli, log_dir))
}

async fn run(cli: Cli, log_dir: std::path::PathBuf) -> ExitCode {
    match dispatch(&cli, &log_dir).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "ingestpipe failed");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(cli: &Cli, log_dir: &std::path::PathBuf) -> Result<ExitCode> {
    // Commands that manage the config file itself don't load/validate one
    // as a precondition.
    match &cli.command {
        Command::ValidateConfig => return commands::config_cmd::validate_config(&cli.config),
        Command::MigrateConfig { output } => {
            return commands::config_cmd::migrate_config(&cli.config, output)
        }
        _ => {}
    }

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    match &cli.command {
        Command::Load { base_path, month, skip_qc, validate_in_snowflake, max_workers } => {
            commands::load::run(
                &config,
                base_path,
                month,
                *skip_qc,
                *validate_in_snowflake,
                *max_workers,
                log_dir,
                cli.quiet,
            )
            .await
        }
        Command::Delete { table, month, dry_run, yes } => {
            commands::delete::run(&config, table, month, *dry_run, *yes).await
        }
        Command::Validate { table, month, output } => {
            commands::validate::run(&config, table.as_deref(), month.as_deref(), output.as_deref())
                .await
        }
        Command::CheckDuplicates { table, key_columns, date_range } => {
            commands::check_duplicates::run(&config, table, key_columns, date_range.as_deref()).await
        }
        Command::Report { tables, output } => {
            commands::report::run(&config, tables.as_deref(), output.as_deref()).await
        }
        Command::Compare { file1, file2, quick } => commands::compare::run(file1, file2, *quick),
        Command::ValidateConfig | Command::MigrateConfig { .. } => unreachable!("handled above"),
    }
}
