//! Shared protocol logic for both peers
//!
//! Frame header handling used by the codec, and the path-safety helpers the
//! collector runs before touching the filesystem.

use crate::error::{io_err, ProtocolError, StorageError};
use crate::protocol::{HEADER_LEN, MAGIC, MAX_FRAME_SIZE, VERSION};
use std::path::{Component, Path, PathBuf};

/// Validate frame payload size against protocol::MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

/// Build frame header (11 bytes)
/// Format: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = frame_type;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, u32), ProtocolError> {
    if &header[0..4] != MAGIC {
        return Err(ProtocolError::BadMagic);
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(ProtocolError::VersionMismatch {
            got: version,
            expected: VERSION,
        });
    }

    let frame_type = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);

    Ok((frame_type, payload_len))
}

/// Lexically clean a relative path received off the wire.
///
/// Both `/` and `\` are accepted as separators. `.` segments are dropped and
/// `..` removes the preceding segment. Absolute paths, drive prefixes, NUL
/// bytes, and any `..` that would climb above the starting point are refused.
pub fn clean_relative(rel: &str) -> Result<PathBuf, StorageError> {
    let invalid = |reason: &'static str| StorageError::InvalidPath {
        path: rel.to_string(),
        reason,
    };

    if rel.contains('\0') {
        return Err(invalid("contains NUL byte"));
    }
    if rel.starts_with('/') || rel.starts_with('\\') {
        return Err(StorageError::Escape {
            path: rel.to_string(),
        });
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in rel.split(|c: char| c == '/' || c == '\\') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(StorageError::Escape {
                        path: rel.to_string(),
                    });
                }
            }
            s => {
                // Windows ADS and drive-letter defense
                #[cfg(windows)]
                if s.contains(':') {
                    return Err(invalid("path component contains colon"));
                }
                segments.push(s);
            }
        }
    }

    if segments.is_empty() {
        return Err(invalid("empty path"));
    }

    let mut safe = PathBuf::new();
    for seg in segments {
        safe.push(seg);
    }

    // Anything the platform parses as other than a plain name is an injection.
    if !safe.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(StorageError::Escape {
            path: rel.to_string(),
        });
    }

    Ok(safe)
}

/// Verify `candidate` is a descendant of `root`, component-wise, and that no
/// existing symlinked ancestor redirects it elsewhere. `root` must already be
/// canonical. Nothing is created or modified.
pub fn ensure_within(root: &Path, candidate: &Path) -> Result<(), StorageError> {
    let escape = || StorageError::Escape {
        path: candidate.display().to_string(),
    };

    if candidate == root || !candidate.starts_with(root) {
        return Err(escape());
    }

    // Resolve the deepest ancestor that already exists
    let mut existing = candidate;
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return Err(escape()),
        }
    }
    let resolved = existing
        .canonicalize()
        .map_err(|e| io_err(existing, e))?;
    if !resolved.starts_with(root) {
        return Err(escape());
    }

    Ok(())
}

/// Join a wire path under `root` and verify the result stays inside it.
pub fn normalize_under_root(root: &Path, rel: &str) -> Result<PathBuf, StorageError> {
    let safe = clean_relative(rel)?;
    let joined = root.join(safe);
    ensure_within(root, &joined)?;
    Ok(joined)
}

/// Create directory with parent creation
pub fn ensure_dir_exists(path: &Path) -> Result<(), StorageError> {
    if !path.is_dir() {
        std::fs::create_dir_all(path).map_err(|e| io_err(path, e))?;
    }
    Ok(())
}

/// Create parent directory if needed
pub fn ensure_parent_exists(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        ensure_dir_exists(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn canonical_tmp() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        (temp_dir, root)
    }

    #[test]
    fn test_clean_relative_safe_paths() {
        assert_eq!(
            clean_relative("Project/Struktur Data 1/main.cpp").unwrap(),
            PathBuf::from("Project").join("Struktur Data 1").join("main.cpp")
        );
        assert_eq!(
            clean_relative("./a/./b.txt").unwrap(),
            PathBuf::from("a").join("b.txt")
        );
        assert_eq!(
            clean_relative("a//b.txt").unwrap(),
            PathBuf::from("a").join("b.txt")
        );
        assert_eq!(
            clean_relative("a\\b\\c.py").unwrap(),
            PathBuf::from("a").join("b").join("c.py")
        );
        // `..` that stays inside is folded away
        assert_eq!(
            clean_relative("a/x/../b.txt").unwrap(),
            PathBuf::from("a").join("b.txt")
        );
    }

    #[test]
    fn test_clean_relative_unsafe_paths() {
        assert!(matches!(
            clean_relative("../../etc/passwd"),
            Err(StorageError::Escape { .. })
        ));
        assert!(matches!(
            clean_relative("a/../../etc/passwd"),
            Err(StorageError::Escape { .. })
        ));
        assert!(matches!(
            clean_relative("/etc/passwd"),
            Err(StorageError::Escape { .. })
        ));
        assert!(matches!(
            clean_relative("\\windows\\system32"),
            Err(StorageError::Escape { .. })
        ));
        assert!(matches!(
            clean_relative("file\0.txt"),
            Err(StorageError::InvalidPath { .. })
        ));
        assert!(matches!(
            clean_relative("./"),
            Err(StorageError::InvalidPath { .. })
        ));
        assert!(matches!(
            clean_relative("a/.."),
            Err(StorageError::InvalidPath { .. })
        ));
    }

    #[cfg(windows)]
    #[test]
    fn test_clean_relative_windows_ads() {
        assert!(clean_relative("file.txt:stream").is_err());
        assert!(clean_relative("C:/Windows/win.ini").is_err());
    }

    #[test]
    fn test_ensure_within_rejects_sibling_prefix() {
        let (_tmp, root) = canonical_tmp();
        let base = root.join("base");
        fs::create_dir(&base).unwrap();
        fs::create_dir(root.join("base_evil")).unwrap();

        assert!(ensure_within(&base, &base.join("ok.txt")).is_ok());
        assert!(ensure_within(&base, &root.join("base_evil").join("x.txt")).is_err());
        assert!(ensure_within(&base, &base).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_within_rejects_symlink_escape() {
        let (_tmp, root) = canonical_tmp();
        let base = root.join("base");
        let outside = root.join("outside");
        fs::create_dir(&base).unwrap();
        fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, base.join("link")).unwrap();

        let err = normalize_under_root(&base, "link/stolen.txt").unwrap_err();
        assert!(err.is_rejection());
        assert!(!outside.join("stolen.txt").exists());
    }

    #[test]
    fn test_normalize_under_root_new_nested_path() {
        let (_tmp, root) = canonical_tmp();
        let result = normalize_under_root(&root, "client/deep/nested/file.txt").unwrap();
        assert!(result.starts_with(&root));
        assert!(result.ends_with("client/deep/nested/file.txt"));
        // Validation alone creates nothing
        assert!(!root.join("client").exists());
    }

    #[test]
    fn test_frame_header_round_trip() {
        let header = build_frame_header(crate::protocol::frame::RECORD, 12345);
        let (parsed_type, parsed_len) = parse_frame_header(&header).unwrap();
        assert_eq!(parsed_type, crate::protocol::frame::RECORD);
        assert_eq!(parsed_len, 12345);
    }

    #[test]
    fn test_parse_frame_header_invalid_magic() {
        let mut header = build_frame_header(1, 100);
        header[0..4].copy_from_slice(b"WRNG");
        assert!(matches!(
            parse_frame_header(&header),
            Err(ProtocolError::BadMagic)
        ));
    }

    #[test]
    fn test_parse_frame_header_wrong_version() {
        let mut header = build_frame_header(1, 100);
        header[4..6].copy_from_slice(&999u16.to_le_bytes());
        assert!(matches!(
            parse_frame_header(&header),
            Err(ProtocolError::VersionMismatch { got: 999, .. })
        ));
    }

    #[test]
    fn test_validate_frame_size_edge_cases() {
        assert!(validate_frame_size(0).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE + 1).is_err());
        assert!(validate_frame_size(usize::MAX).is_err());
    }

    #[test]
    fn test_ensure_parent_exists() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("new").join("nested").join("file.txt");

        assert!(!file_path.parent().unwrap().exists());
        ensure_parent_exists(&file_path).unwrap();
        assert!(file_path.parent().unwrap().is_dir());

        // Should be idempotent
        ensure_parent_exists(&file_path).unwrap();
    }
}
