use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use harvest::cli::CollectorOpts;
use harvest::config::CollectorConfig;
use harvest::logger::{init_tracing, AuditLog, JsonlAudit, NoopAudit};
use harvest::net_async::server::{self, CollectorContext};
use harvest::storage::Storage;

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let opts = CollectorOpts::parse();
    init_tracing(opts.verbose);

    let cfg = CollectorConfig::resolve(&opts)?;
    let storage = Storage::open(&cfg.base_dir)
        .with_context(|| format!("Failed to prepare base directory {}", cfg.base_dir.display()))?;

    let audit: Arc<dyn AuditLog> = match &cfg.audit_log {
        Some(path) => Arc::new(JsonlAudit::new(path)?),
        None => Arc::new(NoopAudit),
    };

    if cfg.bind.starts_with("0.0.0.0") {
        tracing::warn!("binding to 0.0.0.0 accepts agents on every interface; there is no authentication");
    }

    let ctx = Arc::new(CollectorContext::new(cfg.patterns.clone(), storage, audit));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(server::serve(&cfg.bind, ctx))
}
