//! Shared protocol constants for the harvest framed transport

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"HRVS";
pub const VERSION: u16 = 1;

// Header: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub const HEADER_LEN: usize = 11;

// Maximum frame payload size (64MB) - prevents DoS via memory exhaustion
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// Room left in a record frame for the JSON envelope: field names, path and
// origin strings.
pub const RECORD_ENVELOPE_BYTES: usize = 64 * 1024;

// Largest file the agent will send. Base64 grows content by 4/3, so this is
// the largest size whose encoding still leaves the envelope room in a frame.
pub const MAX_FILE_BYTES: u64 = ((MAX_FRAME_SIZE - RECORD_ENVELOPE_BYTES) / 4 * 3) as u64;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_BASE_DIR: &str = "received_files";

// Frame type IDs
pub mod frame {
    /// Collector -> agent, exactly once, immediately after accept.
    pub const PATTERNS: u8 = 1;
    /// Agent -> collector, zero or more, in discovery order.
    pub const RECORD: u8 = 2;

    pub fn name(t: u8) -> &'static str {
        match t {
            PATTERNS => "PATTERNS",
            RECORD => "RECORD",
            _ => "UNKNOWN",
        }
    }
}

// Discovery defaults
pub mod discovery {
    /// Depth bound measured in path separators below the search root.
    pub const MAX_DEPTH: usize = 5;

    /// Allow-list used when the extension filter is enabled.
    pub const SOURCE_EXTENSIONS: &[&str] = &["c", "cpp", "py"];
}

// Agent session loop defaults
pub mod session {
    pub const RETRY_ATTEMPTS: u32 = 100;
    pub const RETRY_DELAY_SECS: u64 = 5;
    /// Pause after an exhausted retry burst before the next burst.
    pub const BURST_PAUSE_SECS: u64 = 5;
    /// Pause between one finished session and the next discovery pass.
    pub const IDLE_SECS: u64 = 9;
    /// Records buffered between the blocking walk and the socket writer.
    pub const RECORD_QUEUE: usize = 16;
}

// Centralized timeout constants
pub mod timeouts {
    // Connection establishment timeout per attempt (ms)
    pub const CONNECT_MS: u64 = 3_000;

    // Agent waits this long for the pattern frame (ms)
    pub const PATTERNS_MS: u64 = 30_000;

    // Collector waits this long between records before dropping the agent (ms)
    pub const RECORD_IDLE_MS: u64 = 600_000;

    // Base timeout for writes (ms)
    pub const WRITE_BASE_MS: u64 = 5_000;

    // Additional timeout per MB of data (ms)
    pub const PER_MB_MS: u64 = 100;

    // Calculate write deadline based on payload size (ms)
    // base + per-MB allowance (ceil)
    pub fn write_deadline_ms(payload_len: usize) -> u64 {
        let mb = (payload_len as u64 + 1_048_575) / 1_048_576;
        WRITE_BASE_MS + mb * PER_MB_MS
    }
}
