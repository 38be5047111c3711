//! Configuration resolution. Runs once, before any network or filesystem
//! work, and produces immutable values the rest of the crate only reads.

use crate::cli::{AgentOpts, CollectorOpts};
use crate::error::ConfigError;
use crate::fs_enum::DiscoveryOptions;
use crate::protocol::{discovery, session, DEFAULT_HOST, DEFAULT_PORT, MAX_FILE_BYTES};
use crate::url::{parse_collector_addr, CollectorAddr};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Agent settings read from `--config`. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentFile {
    pub target: Option<String>,
    pub port: Option<u16>,
    pub search_path: Option<PathBuf>,
    pub ext: Option<bool>,
    pub file: Option<bool>,
    pub folder: Option<bool>,
    pub max_depth: Option<usize>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub idle_secs: Option<u64>,
}

impl AgentFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per burst before the burst is reported as failed.
    pub attempts: u32,
    pub delay: Duration,
    /// Sleep after a failed burst before starting the next one.
    pub burst_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: session::RETRY_ATTEMPTS,
            delay: Duration::from_secs(session::RETRY_DELAY_SECS),
            burst_pause: Duration::from_secs(session::BURST_PAUSE_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub collector: CollectorAddr,
    pub search_root: PathBuf,
    pub discovery: DiscoveryOptions,
    pub retry: RetryPolicy,
    pub idle: Duration,
    pub once: bool,
}

/// `<home>/Documents`, the usual place coursework lives.
pub fn default_search_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("Documents"))
}

impl AgentConfig {
    pub fn resolve(opts: &AgentOpts) -> Result<Self, ConfigError> {
        let file = match &opts.config {
            Some(path) => AgentFile::load(path)?,
            None => AgentFile::default(),
        };
        Self::merge(opts, file, default_search_root())
    }

    /// Command line over config file over defaults.
    pub fn merge(
        opts: &AgentOpts,
        file: AgentFile,
        home_default: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let port = opts.port.or(file.port).unwrap_or(DEFAULT_PORT);
        let raw_target = opts
            .target
            .clone()
            .or(file.target)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let collector =
            parse_collector_addr(&raw_target, port).ok_or_else(|| ConfigError::Invalid {
                field: "target",
                reason: format!("cannot parse collector address {raw_target:?}"),
            })?;

        let search_root = opts
            .search_path
            .clone()
            .or(file.search_path)
            .or(home_default)
            .ok_or(ConfigError::NoSearchRoot)?;

        let (match_files, match_folders) = if opts.file || opts.folder {
            (opts.file, opts.folder)
        } else {
            match (file.file, file.folder) {
                (None, None) => (true, true),
                (f, d) => (f.unwrap_or(false), d.unwrap_or(false)),
            }
        };
        if !match_files && !match_folders {
            return Err(ConfigError::Invalid {
                field: "file/folder",
                reason: "at least one of file or folder matching must be enabled".to_string(),
            });
        }

        let max_depth = opts
            .max_depth
            .or(file.max_depth)
            .unwrap_or(discovery::MAX_DEPTH);
        if max_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_depth",
                reason: "must be at least 1".to_string(),
            });
        }

        let attempts = opts
            .retry_attempts
            .or(file.retry_attempts)
            .unwrap_or(session::RETRY_ATTEMPTS);
        if attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        let delay_secs = opts
            .retry_delay_secs
            .or(file.retry_delay_secs)
            .unwrap_or(session::RETRY_DELAY_SECS);
        let filter_extensions = if opts.ext {
            true
        } else if opts.no_ext {
            false
        } else {
            file.ext.unwrap_or(false)
        };

        let idle_secs = opts
            .idle_secs
            .or(file.idle_secs)
            .unwrap_or(session::IDLE_SECS);

        Ok(Self {
            collector,
            search_root,
            discovery: DiscoveryOptions {
                max_depth,
                match_files,
                match_folders,
                filter_extensions,
                max_file_bytes: MAX_FILE_BYTES,
            },
            retry: RetryPolicy {
                attempts,
                delay: Duration::from_secs(delay_secs),
                burst_pause: Duration::from_secs(session::BURST_PAUSE_SECS),
            },
            idle: Duration::from_secs(idle_secs),
            once: opts.once,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub bind: String,
    pub base_dir: PathBuf,
    pub patterns: Vec<String>,
    pub audit_log: Option<PathBuf>,
}

impl CollectorConfig {
    pub fn resolve(opts: &CollectorOpts) -> Result<Self, ConfigError> {
        if opts.patterns.is_empty() {
            return Err(ConfigError::Invalid {
                field: "patterns",
                reason: "at least one pattern is required".to_string(),
            });
        }
        // A blank pattern is a substring of every name
        if let Some(pos) = opts.patterns.iter().position(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "patterns",
                reason: format!("pattern #{} is blank", pos + 1),
            });
        }
        Ok(Self {
            bind: opts.bind.clone(),
            base_dir: opts.base_dir.clone(),
            patterns: opts.patterns.clone(),
            audit_log: opts.audit_log.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    fn opts(args: &[&str]) -> AgentOpts {
        let mut full = vec!["harvest"];
        full.extend_from_slice(args);
        AgentOpts::try_parse_from(full).unwrap()
    }

    fn home() -> Option<PathBuf> {
        Some(PathBuf::from("/home/student/Documents"))
    }

    #[test]
    fn test_defaults() {
        let cfg = AgentConfig::merge(&opts(&[]), AgentFile::default(), home()).unwrap();
        assert_eq!(cfg.collector.host, DEFAULT_HOST);
        assert_eq!(cfg.collector.port, DEFAULT_PORT);
        assert_eq!(cfg.search_root, PathBuf::from("/home/student/Documents"));
        assert_eq!(cfg.discovery, DiscoveryOptions::default());
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.idle, Duration::from_secs(session::IDLE_SECS));
        assert!(!cfg.once);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = AgentFile {
            target: Some("10.0.0.1".to_string()),
            port: Some(9000),
            max_depth: Some(8),
            ext: Some(true),
            folder: Some(true),
            file: Some(false),
            ..Default::default()
        };
        let cfg = AgentConfig::merge(
            &opts(&["192.168.2.50", "/srv/tugas", "--max-depth", "2"]),
            file,
            home(),
        )
        .unwrap();
        assert_eq!(cfg.collector.authority(), "192.168.2.50:9000");
        assert_eq!(cfg.search_root, PathBuf::from("/srv/tugas"));
        assert_eq!(cfg.discovery.max_depth, 2);
        assert!(cfg.discovery.filter_extensions);
        assert!(cfg.discovery.match_folders && !cfg.discovery.match_files);
    }

    #[test]
    fn test_command_line_can_disable_file_extension_filter() {
        let file = || AgentFile {
            ext: Some(true),
            ..Default::default()
        };
        let cfg = AgentConfig::merge(&opts(&[]), file(), home()).unwrap();
        assert!(cfg.discovery.filter_extensions);
        let cfg = AgentConfig::merge(&opts(&["--no-ext"]), file(), home()).unwrap();
        assert!(!cfg.discovery.filter_extensions);
        let cfg = AgentConfig::merge(&opts(&["--ext"]), AgentFile::default(), home()).unwrap();
        assert!(cfg.discovery.filter_extensions);
    }

    #[test]
    fn test_mode_flags() {
        let cfg = AgentConfig::merge(&opts(&["--file"]), AgentFile::default(), home()).unwrap();
        assert!(cfg.discovery.match_files && !cfg.discovery.match_folders);

        let file = AgentFile {
            file: Some(false),
            folder: Some(false),
            ..Default::default()
        };
        assert!(AgentConfig::merge(&opts(&[]), file, home()).is_err());
    }

    #[test]
    fn test_invalid_values() {
        assert!(AgentConfig::merge(&opts(&["--max-depth", "0"]), AgentFile::default(), home()).is_err());
        assert!(
            AgentConfig::merge(&opts(&["--retry-attempts", "0"]), AgentFile::default(), home())
                .is_err()
        );
        assert!(AgentConfig::merge(&opts(&["http://x"]), AgentFile::default(), home()).is_err());
        assert!(matches!(
            AgentConfig::merge(&opts(&[]), AgentFile::default(), None),
            Err(ConfigError::NoSearchRoot)
        ));
    }

    #[test]
    fn test_config_file_parsing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("agent.toml");
        std::fs::write(
            &path,
            "target = \"lab-server\"\nport = 8181\nmax_depth = 4\nidle_secs = 30\n",
        )
        .unwrap();
        let file = AgentFile::load(&path).unwrap();
        let cfg = AgentConfig::merge(&opts(&[]), file, home()).unwrap();
        assert_eq!(cfg.collector.authority(), "lab-server:8181");
        assert_eq!(cfg.discovery.max_depth, 4);
        assert_eq!(cfg.idle, Duration::from_secs(30));

        std::fs::write(&path, "unknown_key = 1\n").unwrap();
        assert!(matches!(AgentFile::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            AgentFile::load(&tmp.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_collector_rejects_blank_pattern() {
        let ok = CollectorOpts::try_parse_from(["harvestd", "Struktur Data"]).unwrap();
        assert_eq!(CollectorConfig::resolve(&ok).unwrap().patterns, vec!["Struktur Data"]);

        let blank = CollectorOpts::try_parse_from(["harvestd", "lab", "  "]).unwrap();
        assert!(CollectorConfig::resolve(&blank).is_err());
    }
}
