//! Bounded, pattern-driven discovery of coursework under a search root.
//!
//! The walk is depth-first, pre-order, sorted by name, and never follows
//! symlinks. Because a directory is always visited before anything beneath
//! it, the matched-folder set is complete for every ancestor by the time a
//! file is classified, so both logical passes run in one walk.

use crate::pattern::PatternSet;
use crate::protocol::{discovery, MAX_FILE_BYTES};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Entry with size information for classification
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
}

/// Fully resolved discovery options, fixed for the whole pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Entries deeper than this many separators below the root are skipped
    /// together with their subtree.
    pub max_depth: usize,
    /// Include files whose own name matches.
    pub match_files: bool,
    /// Emit markers for matching folders and include everything under them.
    pub match_folders: bool,
    /// Restrict qualifying files to `protocol::discovery::SOURCE_EXTENSIONS`.
    pub filter_extensions: bool,
    pub max_file_bytes: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_depth: discovery::MAX_DEPTH,
            match_files: true,
            match_folders: true,
            filter_extensions: false,
            max_file_bytes: MAX_FILE_BYTES,
        }
    }
}

impl DiscoveryOptions {
    fn extension_allowed(&self, path: &Path) -> bool {
        if !self.filter_extensions {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                discovery::SOURCE_EXTENSIONS
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            })
            .unwrap_or(false)
    }
}

/// One qualifying item. `content == None` is a matched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub relative_path: String,
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub folders_matched: u64,
    pub files_matched: u64,
    pub bytes_read: u64,
    pub skipped_unreadable: u64,
    pub skipped_extension: u64,
    pub skipped_too_large: u64,
}

impl DiscoveryStats {
    pub fn emitted(&self) -> u64 {
        self.folders_matched + self.files_matched
    }
}

/// Lazy discovery pass. Each call to `discover` walks again from scratch.
pub struct Discovery {
    root: PathBuf,
    patterns: PatternSet,
    options: DiscoveryOptions,
    walker: Option<walkdir::IntoIter>,
    matched_folders: Vec<PathBuf>,
    stats: DiscoveryStats,
}

/// Start a discovery pass over `root`. A missing root or an empty pattern set
/// yields nothing.
pub fn discover(root: &Path, patterns: &PatternSet, options: &DiscoveryOptions) -> Discovery {
    let walker = if !root.is_dir() {
        warn!("search root {} does not exist or is not a directory", root.display());
        None
    } else if patterns.is_empty() {
        info!("empty pattern set, nothing to discover");
        None
    } else {
        debug!(
            "discovery: root={} depth<={} files={} folders={} ext_filter={}",
            root.display(),
            options.max_depth,
            options.match_files,
            options.match_folders,
            options.filter_extensions
        );
        Some(
            WalkDir::new(root)
                .follow_links(false)
                .max_depth(options.max_depth)
                .sort_by_file_name()
                .into_iter(),
        )
    };

    Discovery {
        root: root.to_path_buf(),
        patterns: patterns.clone(),
        options: options.clone(),
        walker,
        matched_folders: Vec::new(),
        stats: DiscoveryStats::default(),
    }
}

impl Discovery {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> DiscoveryStats {
        self.stats
    }

    pub fn matched_folders(&self) -> &[PathBuf] {
        &self.matched_folders
    }

    fn in_matched_folder(&self, path: &Path) -> bool {
        // Component-wise: "Lab 1" is not an ancestor of "Lab 10/x"
        self.matched_folders.iter().any(|f| path.starts_with(f))
    }

    fn classify_dir(&mut self, entry: FileEntry) -> Option<Discovered> {
        if !self.options.match_folders || !self.patterns.matches(&entry.name) {
            return None;
        }
        let relative_path = relative_wire_path(&self.root, &entry.path)?;
        debug!("matched folder {}", relative_path);
        self.matched_folders.push(entry.path);
        self.stats.folders_matched += 1;
        Some(Discovered {
            relative_path,
            content: None,
        })
    }

    fn classify_file(&mut self, entry: FileEntry) -> Option<Discovered> {
        let by_name = self.options.match_files && self.patterns.matches(&entry.name);
        let by_ancestry = self.options.match_folders && self.in_matched_folder(&entry.path);
        if !by_name && !by_ancestry {
            return None;
        }

        if !self.options.extension_allowed(&entry.path) {
            self.stats.skipped_extension += 1;
            return None;
        }

        if entry.size > self.options.max_file_bytes {
            warn!(
                "skipping {} ({} bytes exceeds {} byte limit)",
                entry.path.display(),
                entry.size,
                self.options.max_file_bytes
            );
            self.stats.skipped_too_large += 1;
            return None;
        }

        let relative_path = relative_wire_path(&self.root, &entry.path)?;
        let content = match std::fs::read(&entry.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("error reading file {}: {}", entry.path.display(), e);
                self.stats.skipped_unreadable += 1;
                return None;
            }
        };
        // The file may have grown since it was stat'ed
        if content.len() as u64 > self.options.max_file_bytes {
            warn!(
                "skipping {} (grew to {} bytes while being read)",
                entry.path.display(),
                content.len()
            );
            self.stats.skipped_too_large += 1;
            return None;
        }

        self.stats.files_matched += 1;
        self.stats.bytes_read += content.len() as u64;
        Some(Discovered {
            relative_path,
            content: Some(content),
        })
    }
}

impl Iterator for Discovery {
    type Item = Discovered;

    fn next(&mut self) -> Option<Discovered> {
        loop {
            let next = self.walker.as_mut()?.next();
            let entry = match next {
                None => {
                    self.walker = None;
                    return None;
                }
                Some(Ok(e)) => e,
                Some(Err(e)) => {
                    // Unreadable directory or entry: skip, keep walking
                    warn!("discovery walk error: {}", e);
                    self.stats.skipped_unreadable += 1;
                    continue;
                }
            };

            // The root itself is never a candidate
            if entry.depth() == 0 {
                continue;
            }

            let file_type = entry.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                continue;
            }

            let size = if file_type.is_file() {
                match entry.metadata() {
                    Ok(m) => m.len(),
                    Err(e) => {
                        warn!("skipping {} (metadata error: {})", entry.path().display(), e);
                        self.stats.skipped_unreadable += 1;
                        continue;
                    }
                }
            } else {
                0
            };

            let file_entry = FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.into_path(),
                size,
                is_directory: file_type.is_dir(),
            };

            let found = if file_entry.is_directory {
                self.classify_dir(file_entry)
            } else {
                self.classify_file(file_entry)
            };
            if found.is_some() {
                return found;
            }
        }
    }
}

/// Path of `path` relative to `root`, joined with `/` regardless of platform.
pub fn relative_wire_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
