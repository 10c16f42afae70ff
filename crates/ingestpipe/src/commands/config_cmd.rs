//! `validate-config` / `migrate-config` (SPEC_FULL.md section C.3).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use ingestpipe_protocol::{migrate_config_json, Config};

pub fn validate_config(path: &Path) -> Result<ExitCode> {
    match Config::load(path) {
        Ok(config) => {
            println!("config valid: {} file spec(s) configured", config.files.len());
            Ok(ExitCode::from(0))
        }
        Err(err) => {
            eprintln!("config invalid: {err:#}");
            Ok(ExitCode::from(1))
        }
    }
}

pub fn migrate_config(input: &Path, output: &PathBuf) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let migrated = migrate_config_json(&raw).context("failed to migrate config")?;

    // Fail closed: don't write a file we can't ourselves parse back as the
    // current schema.
    let parsed: Config =
        serde_json::from_str(&migrated).context("migrated config does not parse as current schema")?;
    parsed.validate().context("migrated config failed validation")?;

    std::fs::write(output, &migrated)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("migrated config written to {}", output.display());
    Ok(ExitCode::from(0))
}
