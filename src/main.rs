//! Harvest agent: connects to a collector, searches the local search root
//! for names matching the collector's patterns, and sends what it finds.

use anyhow::{Context, Result};
use clap::Parser;

use harvest::cli::AgentOpts;
use harvest::config::AgentConfig;
use harvest::logger::init_tracing;
use harvest::net_async::client;

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // 128 + SIGINT
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let opts = AgentOpts::parse();
    init_tracing(opts.verbose);

    let cfg = AgentConfig::resolve(&opts)?;
    if !cfg.search_root.is_dir() {
        tracing::warn!(
            "search path {} is not a directory yet; sessions will send nothing until it exists",
            cfg.search_root.display()
        );
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(client::run(&cfg))
}
