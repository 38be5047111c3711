//! Collector-side persistence of received records.
//!
//! Layout: `<base>/<host>_<address>_<timestamp>_<seq>/<relative_path>`.
//! Every destination is validated against the base root before anything is
//! created or written.

use crate::codec::FileRecord;
use crate::error::{io_err, StorageError};
use crate::protocol_core::{clean_relative, ensure_dir_exists, ensure_parent_exists, ensure_within};
use chrono::{DateTime, Local};
use std::io::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d___%H_%M_%S";

/// Per-connection key that scopes storage. Captured when the connection is
/// accepted; `sequence` keeps two sessions in the same second apart. Host and
/// address are pinned by the first record of the session.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub peer: SocketAddr,
    pub started_at: DateTime<Local>,
    pub sequence: u64,
    origin: Option<(String, String)>,
}

impl SessionIdentity {
    pub fn new(peer: SocketAddr, sequence: u64) -> Self {
        Self {
            peer,
            started_at: Local::now(),
            sequence,
            origin: None,
        }
    }

    pub fn stamp(&self) -> String {
        format!(
            "{}_{:04}",
            self.started_at.format(TIMESTAMP_FORMAT),
            self.sequence
        )
    }

    /// Fix host and address from `record` if the session has none yet.
    /// Every later record of the session resolves to the same subtree.
    pub fn adopt_origin(&mut self, record: &FileRecord) {
        if self.origin.is_none() {
            self.origin = Some((self.host_for(record), self.address_for(record)));
        }
    }

    /// Pinned host, else the one reported by the record, else "unknown".
    pub fn host_for(&self, record: &FileRecord) -> String {
        if let Some((host, _)) = &self.origin {
            return host.clone();
        }
        let host = record.origin_host.trim();
        if host.is_empty() {
            "unknown".to_string()
        } else {
            host.to_string()
        }
    }

    /// Pinned address, else the one reported by the record, else the peer's IP.
    pub fn address_for(&self, record: &FileRecord) -> String {
        if let Some((_, addr)) = &self.origin {
            return addr.clone();
        }
        let addr = record.origin_address.trim();
        if addr.is_empty() {
            self.peer.ip().to_string()
        } else {
            addr.to_string()
        }
    }

    /// Single path segment naming this client's subtree.
    pub fn client_dir_name(&self, record: &FileRecord) -> String {
        format!(
            "{}_{}_{}",
            sanitize_segment(&self.host_for(record)),
            sanitize_segment(&self.address_for(record)),
            self.stamp()
        )
    }
}

/// Replace everything except letters, digits and `-` with `_`, so the result
/// is always one safe segment (no separators, no dots).
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Folder(PathBuf),
    File { path: PathBuf, bytes: usize },
}

impl SaveOutcome {
    pub fn path(&self) -> &Path {
        match self {
            SaveOutcome::Folder(p) => p,
            SaveOutcome::File { path, .. } => path,
        }
    }
}

/// Storage base root. Read-only after `open`; safe to share between
/// connections.
#[derive(Debug, Clone)]
pub struct Storage {
    base: PathBuf,
}

impl Storage {
    /// Create (if needed) and canonicalize the base root.
    pub fn open(base: &Path) -> Result<Self, StorageError> {
        ensure_dir_exists(base)?;
        let base = base.canonicalize().map_err(|e| io_err(base, e))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Compute and validate where `record` lands. No filesystem mutation.
    pub fn destination(
        &self,
        record: &FileRecord,
        identity: &SessionIdentity,
    ) -> Result<PathBuf, StorageError> {
        let safe = clean_relative(&record.relative_path)?;
        let candidate = self
            .base
            .join(identity.client_dir_name(record))
            .join(safe);
        ensure_within(&self.base, &candidate)?;
        Ok(candidate)
    }

    /// Persist one record. Folder markers only ensure the directory exists;
    /// files replace any previous content at the same path atomically.
    pub fn save(
        &self,
        record: &FileRecord,
        identity: &SessionIdentity,
    ) -> Result<SaveOutcome, StorageError> {
        let dest = self.destination(record, identity)?;
        match &record.content {
            None => {
                ensure_dir_exists(&dest)?;
                Ok(SaveOutcome::Folder(dest))
            }
            Some(bytes) => {
                ensure_parent_exists(&dest)?;
                write_atomic(&dest, bytes)?;
                Ok(SaveOutcome::File {
                    path: dest,
                    bytes: bytes.len(),
                })
            }
        }
    }
}

fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".harvest-")
        .tempfile_in(parent)
        .map_err(|e| io_err(parent, e))?;
    tmp.write_all(bytes).map_err(|e| io_err(tmp.path(), e))?;
    tmp.as_file().sync_data().map_err(|e| io_err(tmp.path(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))
            .map_err(|e| io_err(tmp.path(), e))?;
    }

    tmp.persist(dest).map_err(|e| io_err(dest, e.error))?;
    Ok(())
}
