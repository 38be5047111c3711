//! Name matching against the operator-supplied pattern set.
//!
//! One rule for both folders and files: a name matches when any pattern is a
//! case-insensitive substring of it.

/// Returns true when some pattern is a case-insensitive substring of `name`.
/// An empty pattern set never matches.
pub fn matches<S: AsRef<str>>(name: &str, patterns: &[S]) -> bool {
    let name = name.to_lowercase();
    patterns
        .iter()
        .any(|p| name.contains(&p.as_ref().to_lowercase()))
}

/// Pattern set with the lowercase forms computed once, for use inside a
/// discovery pass where every entry is tested.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    original: Vec<String>,
    folded: Vec<String>,
}

impl PatternSet {
    pub fn new(patterns: Vec<String>) -> Self {
        let folded = patterns.iter().map(|p| p.to_lowercase()).collect();
        Self {
            original: patterns,
            folded,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.original
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.folded.is_empty() {
            return false;
        }
        let name = name.to_lowercase();
        self.folded.iter().any(|p| name.contains(p.as_str()))
    }
}

impl From<Vec<String>> for PatternSet {
    fn from(patterns: Vec<String>) -> Self {
        Self::new(patterns)
    }
}
