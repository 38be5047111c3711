use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Install the fmt subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Audit trail of collector activity, one call per event.
pub trait AuditLog: Send + Sync {
    fn session_start(&self, _session: &str, _peer: &str) {}
    fn saved(&self, _session: &str, _host: &str, _address: &str, _path: &str, _bytes: usize) {}
    fn rejected(&self, _session: &str, _host: &str, _address: &str, _path: &str, _reason: &str) {}
    fn failed(&self, _session: &str, _host: &str, _address: &str, _path: &str, _reason: &str) {}
    fn session_end(&self, _session: &str, _saved: u64, _rejected: u64, _failed: u64, _error: Option<&str>) {}
}

pub struct NoopAudit;
impl AuditLog for NoopAudit {}

#[derive(Serialize, Debug, Default)]
pub struct AuditEntry<'a> {
    pub timestamp: String,
    pub event: &'a str,
    pub session: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<[u64; 3]>,
}

/// Append-only JSON lines file.
pub struct JsonlAudit {
    file: Mutex<BufWriter<File>>,
}

impl JsonlAudit {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(BufWriter::new(f)),
        })
    }

    fn line(&self, mut entry: AuditEntry<'_>) {
        entry.timestamp = Utc::now().to_rfc3339();
        let mut w = self.file.lock();
        if serde_json::to_writer(&mut *w, &entry).is_ok() {
            let _ = w.write_all(b"\n");
            let _ = w.flush();
        }
    }
}

impl AuditLog for JsonlAudit {
    fn session_start(&self, session: &str, peer: &str) {
        self.line(AuditEntry {
            event: "session_start",
            session,
            peer: Some(peer),
            ..Default::default()
        });
    }
    fn saved(&self, session: &str, host: &str, address: &str, path: &str, bytes: usize) {
        self.line(AuditEntry {
            event: "saved",
            session,
            host: Some(host),
            address: Some(address),
            path: Some(path),
            bytes: Some(bytes),
            ..Default::default()
        });
    }
    fn rejected(&self, session: &str, host: &str, address: &str, path: &str, reason: &str) {
        self.line(AuditEntry {
            event: "rejected",
            session,
            host: Some(host),
            address: Some(address),
            path: Some(path),
            reason: Some(reason),
            ..Default::default()
        });
    }
    fn failed(&self, session: &str, host: &str, address: &str, path: &str, reason: &str) {
        self.line(AuditEntry {
            event: "failed",
            session,
            host: Some(host),
            address: Some(address),
            path: Some(path),
            reason: Some(reason),
            ..Default::default()
        });
    }
    fn session_end(&self, session: &str, saved: u64, rejected: u64, failed: u64, error: Option<&str>) {
        self.line(AuditEntry {
            event: "session_end",
            session,
            counts: Some([saved, rejected, failed]),
            reason: error,
            ..Default::default()
        });
    }
}
