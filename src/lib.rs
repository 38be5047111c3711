//! Harvest library
//!
//! Networked file harvesting: a collector hands out name patterns, agents
//! search their workstation for matching folders and files and stream them
//! back, and the collector stores everything under a per-session directory.

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod fs_enum;
pub mod logger;
pub mod net_async;
pub mod pattern;
pub mod protocol;
pub mod protocol_core;
pub mod storage;
pub mod url;
