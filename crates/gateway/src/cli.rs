//! Command-line interface: `parley serve` (default), `parley config
//! validate|show`, `parley version`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use parley_domain::config::{Config, ConfigSeverity};

#[derive(Parser)]
#[command(name = "parley", about = "Streaming conversational AI gateway")]
pub struct Cli {
    /// Path to the TOML config file (default: ./parley.toml, then
    /// $PARLEY_CONFIG).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway server (the default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and exit non-zero on errors.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load the config file; a missing file yields the defaults.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = explicit
        .map(PathBuf::from)
        .or_else(|| std::env::var("PARLEY_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./parley.toml"));

    if !path.exists() {
        tracing::info!(path = %path.display(), "config file not found; using defaults");
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    Ok((config, path))
}

/// Print validation results; returns false when any error was found.
pub fn validate(config: &Config, path: &Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
