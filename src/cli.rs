// src/cli.rs

//! Command-line definitions
//!
//! Execution lives in the `runner` module; this only declares the
//! surface.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "buildreq-prune")]
#[command(version)]
#[command(
    about = "Find build requirements that can be dropped without changing the built packages",
    long_about = None
)]
pub struct Cli {
    /// Path to the source package to analyze
    pub srpm: PathBuf,

    /// Name of the mock root configuration
    #[arg(long, default_value = "default")]
    pub root: String,

    /// Keep the working directory on exit
    #[arg(long)]
    pub no_clean: bool,

    /// Only check that two reference builds produce equivalent packages
    #[arg(long)]
    pub reproduce_only: bool,

    /// Run probe rebuilds against the package cache only
    #[arg(long)]
    pub offline: bool,

    /// Assume unneeded subsets compose without rebuilding (fast, unsound)
    #[arg(long)]
    pub assume_compose: bool,

    /// Log verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub loglvl: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Default tracing filter for the level
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
            Self::Critical => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_invocation() {
        let cli = Cli::try_parse_from(["buildreq-prune", "pkg-1.0-1.src.rpm"]).unwrap();
        assert_eq!(cli.srpm, PathBuf::from("pkg-1.0-1.src.rpm"));
        assert_eq!(cli.root, "default");
        assert!(!cli.no_clean);
        assert!(!cli.reproduce_only);
        assert_eq!(cli.loglvl, LogLevel::Info);
    }

    #[test]
    fn test_parse_full_invocation() {
        let cli = Cli::try_parse_from([
            "buildreq-prune",
            "pkg.src.rpm",
            "--root",
            "fedora-rawhide-x86_64",
            "--no-clean",
            "--reproduce-only",
            "--offline",
            "--assume-compose",
            "--loglvl",
            "warning",
        ])
        .unwrap();
        assert_eq!(cli.root, "fedora-rawhide-x86_64");
        assert!(cli.no_clean);
        assert!(cli.reproduce_only);
        assert!(cli.offline);
        assert!(cli.assume_compose);
        assert_eq!(cli.loglvl, LogLevel::Warning);
    }

    #[test]
    fn test_srpm_argument_is_required() {
        assert!(Cli::try_parse_from(["buildreq-prune"]).is_err());
    }
}
