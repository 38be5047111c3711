//! Command-line surfaces of both binaries

use clap::Parser;
use std::path::PathBuf;

/// Agent options. Unset values fall back to `--config`, then built-in defaults.
#[derive(Clone, Debug, Default, Parser)]
#[command(
    name = "harvest",
    version,
    about = "Harvest agent - searches this workstation for coursework and sends it to the collector"
)]
pub struct AgentOpts {
    /// Collector address: host, host:port, or harvest://host[:port]
    pub target: Option<String>,

    /// Directory to search (default: ~/Documents)
    pub search_path: Option<PathBuf>,

    /// Collector port when TARGET has none
    #[arg(long)]
    pub port: Option<u16>,

    /// Only send .c, .cpp and .py files
    #[arg(long, overrides_with = "no_ext")]
    pub ext: bool,

    /// Send files of any extension, even if the config file sets `ext`
    #[arg(long = "no-ext", overrides_with = "ext")]
    pub no_ext: bool,

    /// Enable file-name matching
    #[arg(long)]
    pub file: bool,

    /// Enable folder matching
    #[arg(long)]
    pub folder: bool,

    /// Maximum search depth below the search path
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Connection attempts per retry burst
    #[arg(long)]
    pub retry_attempts: Option<u32>,

    /// Seconds between connection attempts
    #[arg(long)]
    pub retry_delay_secs: Option<u64>,

    /// Seconds to wait between sessions
    #[arg(long)]
    pub idle_secs: Option<u64>,

    /// Run one session and exit
    #[arg(long)]
    pub once: bool,

    /// TOML file with default settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Collector options
#[derive(Clone, Debug, Parser)]
#[command(
    name = "harvestd",
    version,
    about = "Harvest collector - distributes patterns and stores files sent by agents"
)]
pub struct CollectorOpts {
    /// Patterns matched (case-insensitively) against folder and file names
    #[arg(required = true, num_args = 1..)]
    pub patterns: Vec<String>,

    /// Bind address (host:port)
    #[arg(long, default_value = crate::protocol::DEFAULT_BIND)]
    pub bind: String,

    /// Directory received files are stored under
    #[arg(long, default_value = crate::protocol::DEFAULT_BASE_DIR)]
    pub base_dir: PathBuf,

    /// Append a JSON-lines audit trail to this file
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}
