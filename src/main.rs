//! stm - Simple Task Master CLI
//!
//! File-based task tracking: one Markdown file per task, coordinated across
//! concurrent invocations by an advisory lock.

use clap::Parser;
use stm::cleanup;
use stm::cli::Cli;
use stm::output::report_error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    // Tracing is opt-in via RUST_LOG.
    // Keep startup robust in scripted envs: ignore invalid/huge filters.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() || raw.len() > 4096 {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new("off"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = cli.run() {
        report_error(&err, json);
        // exit() skips destructors, so lock guards never get to run.
        cleanup::release_all();
        std::process::exit(err.exit_code());
    }
}
