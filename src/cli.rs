//! CLI argument parsing for hookline

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for trace events
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text lines (default)
    Text,
    /// One JSON object per event
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "hookline")]
#[command(version)]
#[command(about = "Call interception and tracing for managed methods and native exports")]
#[command(long_about = None)]
pub struct Cli {
    /// Enable debug tracing output on stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Output format for trace events
    #[arg(long = "format", value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse and validate a hook plan
    Check {
        /// Path to the plan (TOML)
        plan: PathBuf,
    },

    /// List the exported symbols of a module file
    Exports {
        /// Path to the module (shared object or executable)
        module: PathBuf,

        /// Only list symbols matching this regex
        #[arg(short = 'f', long = "filter", value_name = "REGEX")]
        filter: Option<String>,
    },

    /// Resolve an exported symbol in this process and print its attach line
    Resolve {
        /// Module name or path; empty string searches every loaded module
        module: String,

        /// Symbol name
        symbol: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_check() {
        let cli = Cli::parse_from(["hookline", "check", "hooks.toml"]);
        match cli.command {
            Command::Check { plan } => assert_eq!(plan, PathBuf::from("hooks.toml")),
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(!cli.debug);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_cli_exports_filter() {
        let cli = Cli::parse_from(["hookline", "exports", "/lib/libc.so.6", "-f", "^open"]);
        match cli.command {
            Command::Exports { module, filter } => {
                assert_eq!(module, PathBuf::from("/lib/libc.so.6"));
                assert_eq!(filter.as_deref(), Some("^open"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_resolve_with_global_flags() {
        let cli = Cli::parse_from([
            "hookline", "resolve", "libc.so.6", "open", "--format", "json", "--debug",
        ]);
        assert!(cli.debug);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Resolve { module, symbol } => {
                assert_eq!(module, "libc.so.6");
                assert_eq!(symbol, "open");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["hookline"]).is_err());
    }
}
