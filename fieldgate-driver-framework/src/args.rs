//! CLI argument parsing for drivers.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all drivers.
#[derive(Parser, Debug, Clone)]
#[command(about = "Fieldgate protocol driver")]
pub struct DriverArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override the driver instance id from the configuration.
    #[arg(long)]
    pub id: Option<String>,
}

impl DriverArgs {
    /// Parse CLI arguments, falling back to `default_config` when `--config` is absent.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::parse_from_with_default(std::env::args_os(), default_config)
    }

    /// Parse from an explicit argument list, exiting with usage on error.
    pub fn parse_from_with_default<I, T>(args: I, default_config: &'static str) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from_with_default(args, default_config).unwrap_or_else(|e| e.exit())
    }

    /// Parse from an explicit argument list.
    pub fn try_parse_from_with_default<I, T>(
        args: I,
        default_config: &'static str,
    ) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config).required(false))
            .try_get_matches_from(args)?;
        <Self as clap::FromArgMatches>::from_arg_matches(&matches)
    }
}
