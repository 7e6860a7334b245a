pub mod toml_config;

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use crate::utils::validation::{validate_path, Validate};
#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "dynamic-http-transform")]
#[command(about = "Enrich JSON Lines records with data fetched from a per-record HTTP endpoint")]
pub struct CliConfig {
    #[arg(long, short = 'c', help = "TOML transform configuration")]
    pub config: String,

    #[arg(long, short = 'i', default_value = "-", help = "Input JSON Lines file, '-' for stdin")]
    pub input: String,

    #[arg(long, short = 'o', default_value = "-", help = "Output JSON Lines file, '-' for stdout")]
    pub output: String,

    #[arg(long, short = 'e', help = "Per-record errors as JSON Lines (default: stderr)")]
    pub errors: Option<String>,

    #[arg(long, help = "Print the resolved URL for each record without calling the endpoint")]
    pub dry_run: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[arg(long, short = 'v', help = "Enable verbose output")]
    pub verbose: bool,
}

#[cfg(feature = "cli")]
impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("config", &self.config)?;
        validate_path("input", &self.input)?;
        validate_path("output", &self.output)?;
        if let Some(errors) = &self.errors {
            validate_path("errors", errors)?;
        }
        Ok(())
    }
}
