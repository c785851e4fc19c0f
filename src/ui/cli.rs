//! Command-line interface definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hexscan: file scanner with encrypted quarantine
#[derive(Parser, Debug)]
#[command(name = "hexscan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Use this configuration file instead of the default
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine processing
    Json,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan files or directories
    Scan(ScanArgs),

    /// Manage quarantined items
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },

    /// Manage the signature index
    Signatures {
        #[command(subcommand)]
        action: SignatureAction,
    },

    /// Inspect pattern rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show application information
    Info,
}

/// Options for the scan command.
#[derive(clap::Args, Debug, Clone)]
pub struct ScanArgs {
    /// Files or directories to scan
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Number of worker tasks
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Disable the heuristic scorer
    #[arg(long)]
    pub no_heuristic: bool,

    /// Disable pattern rules
    #[arg(long)]
    pub no_rules: bool,

    /// Enable the experimental statistical scorer
    #[arg(long)]
    pub statistical: bool,

    /// Quarantine files judged malicious
    #[arg(long)]
    pub quarantine: bool,

    /// Per-file timeout in seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub file_timeout: Option<u64>,

    /// Job deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Write the full JSON report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Quarantine subcommands.
#[derive(Subcommand, Debug)]
pub enum QuarantineAction {
    /// List quarantined items
    List {
        /// Include restored and deleted entries
        #[arg(short, long)]
        all: bool,
    },

    /// Restore a quarantined item
    Restore {
        /// ID of item to restore
        id: u64,

        /// Restore here instead of the original path
        #[arg(long)]
        to: Option<PathBuf>,
    },

    /// Delete a quarantined item permanently
    Delete {
        /// ID of item to delete
        id: u64,
    },

    /// Check that an item still decrypts intact
    Verify {
        /// ID of item to verify
        id: u64,
    },

    /// Show quarantine statistics
    Stats,

    /// Delete items older than the retention period
    Purge {
        /// Retention in days (defaults to quarantine.retention_days)
        #[arg(short, long)]
        days: Option<u32>,
    },
}

/// Signature subcommands.
#[derive(Subcommand, Debug)]
pub enum SignatureAction {
    /// Import signatures from a JSON file into the configured index
    Import {
        file: PathBuf,
    },

    /// Export the effective signature index to a JSON file
    Export {
        file: PathBuf,
    },

    /// Show index statistics
    Info,
}

/// Rule subcommands.
#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// List loaded rules
    List,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset,

    /// Print the configuration file location
    Path,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan() {
        let cli = Cli::try_parse_from([
            "hexscan",
            "scan",
            "/tmp/a",
            "/tmp/b",
            "--threads",
            "4",
            "--no-rules",
            "--quarantine",
            "--deadline",
            "60",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Scan(args)) => {
                assert_eq!(args.paths.len(), 2);
                assert_eq!(args.threads, Some(4));
                assert!(args.no_rules);
                assert!(!args.no_heuristic);
                assert!(args.quarantine);
                assert_eq!(args.deadline, Some(60));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_scan_requires_path() {
        assert!(Cli::try_parse_from(["hexscan", "scan"]).is_err());
    }

    #[test]
    fn test_parse_quarantine_restore() {
        let cli =
            Cli::try_parse_from(["hexscan", "--format", "json", "quarantine", "restore", "7", "--to", "/tmp/x"])
                .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Some(Commands::Quarantine {
                action: QuarantineAction::Restore { id, to },
            }) => {
                assert_eq!(id, 7);
                assert_eq!(to, Some(PathBuf::from("/tmp/x")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["hexscan", "-v", "-q", "info"]).is_err());
    }
}
