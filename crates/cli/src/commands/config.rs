//! Config Commands

use anyhow::{bail, Result};
use clap::Subcommand;
use gameqa_common::QaConfig;
use std::path::Path;

use crate::output::{self, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

pub fn execute(cmd: ConfigCommands, path: &Path, config: &QaConfig, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            QaConfig::default().save(path)?;
            print_success(&format!("Wrote default configuration to {}", path.display()));
        }

        ConfigCommands::Show => match format {
            OutputFormat::Json => output::print_json(config),
            OutputFormat::Yaml => output::print_yaml(config),
            _ => print!("{}", toml::to_string_pretty(config)?),
        },
    }
    Ok(())
}
