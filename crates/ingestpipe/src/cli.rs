//! Command-line surface (spec.md section 6): one binary, subcommands, a
//! handful of flags shared by all of them.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ingestpipe", about = "Bulk warehouse ingestion engine", version)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, default_value = "ingestpipe.json")]
    pub config: PathBuf,

    /// Directory for the rotating log file and the structured events file.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Overrides `RUST_LOG` for the console sink only.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Suppress non-warning console output; the log file is unaffected.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load one month's declared files into the warehouse.
    Load {
        /// Directory under which each FileSpec's pattern is resolved.
        #[arg(long)]
        base_path: PathBuf,

        /// Target month, `YYYY-MM`.
        #[arg(long)]
        month: String,

        /// Skip the QC-gate phase for every file this run.
        #[arg(long)]
        skip_qc: bool,

        /// Gate `Succeeded` on post-load validation passing, instead of
        /// only warning (spec.md section 9, Open Questions).
        #[arg(long)]
        validate_in_snowflake: bool,

        /// Maximum pipelines in flight at once; defaults to `min(cpus, 8)`.
        #[arg(long)]
        max_workers: Option<usize>,
    },

    /// Delete one table's rows for one month, with impact preview.
    Delete {
        #[arg(long)]
        table: String,

        #[arg(long)]
        month: String,

        /// Stop after computing impact; never issues the `DELETE`.
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation gate.
        #[arg(long)]
        yes: bool,
    },

    /// Re-run post-load validation for a table/month without loading.
    Validate {
        #[arg(long)]
        table: Option<String>,

        #[arg(long)]
        month: Option<String>,

        /// Write the JSON result here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Report duplicate-key groups for a table.
    CheckDuplicates {
        #[arg(long)]
        table: String,

        /// Comma-separated key columns, e.g. `a,b,c`.
        #[arg(long = "key-columns", value_delimiter = ',')]
        key_columns: Vec<String>,

        /// `YYYY-MM-DD:YYYY-MM-DD`, restricts the scan to a date window.
        #[arg(long = "date-range")]
        date_range: Option<String>,
    },

    /// Row-count and date-coverage summary for configured tables.
    Report {
        /// Comma-separated table names; defaults to every configured table.
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,

        /// Write JSON here instead of printing a table to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Compare two local files without touching the warehouse.
    Compare {
        file1: PathBuf,
        file2: PathBuf,

        /// Compare only row counts and byte sizes, skip the content diff.
        #[arg(long)]
        quick: bool,
    },

    /// Parse and validate a config file without running anything. Uses the
    /// top-level `--config` path.
    ValidateConfig,

    /// Upgrade an old-schema config file to the current version. Reads the
    /// top-level `--config` path, writes the migrated file to `--output`.
    MigrateConfig {
        #[arg(long)]
        output: PathBuf,
    },
}
