// src/main.rs

use anyhow::Context;
use buildreq_prune::cli::{Cli, LogLevel};
use buildreq_prune::runner::{self, RunOptions};
use buildreq_prune::Error;
use clap::Parser;
use tracing::error;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.loglvl);

    if let Err(err) = run(cli) {
        error!("{:#}", err);
        // Exit 1 is reserved for the reproducibility gate
        if matches!(err.downcast_ref::<Error>(), Some(Error::NotReproducible)) {
            std::process::exit(1);
        }
        std::process::exit(2);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let srpm = std::fs::canonicalize(&cli.srpm)
        .with_context(|| format!("cannot resolve {}", cli.srpm.display()))?;

    let options = RunOptions {
        srpm,
        root: cli.root,
        no_clean: cli.no_clean,
        reproduce_only: cli.reproduce_only,
        offline: cli.offline,
        assume_compose: cli.assume_compose,
    };

    if let Some(line) = runner::run(&options)? {
        println!("{}", line);
    }
    Ok(())
}

fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_filter())),
        )
        .with_writer(std::io::stderr)
        .init();
}
