//! Handles into loaded source text
//!
//! The core never interprets body text. It cuts snippets out of `.hyp` files
//! and passes them to the evaluator, which caches its parse by snippet id.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SNIPPET: AtomicU64 = AtomicU64::new(1);

/// A coverage region: one statement line of one file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegionId {
    pub file: Arc<str>,
    pub line: u32,
}

impl RegionId {
    pub fn new(file: impl Into<Arc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// A span of source text cut out of a file, with its origin position
#[derive(Debug, Clone)]
pub struct Snippet {
    /// Process-unique id, stable for the lifetime of the loaded plan
    pub id: u64,
    pub text: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl Snippet {
    pub fn new(text: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            id: NEXT_SNIPPET.fetch_add(1, Ordering::Relaxed),
            text: text.into(),
            line,
            column,
        }
    }
}

/// A loaded `.hyp` file
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Display name used in reports and coverage regions
    pub name: Arc<str>,
    /// Top-level `fn` declarations, visible to every body in the file
    pub helpers: Vec<Snippet>,
    /// Statement lines of the helpers
    pub helper_regions: Vec<u32>,
    /// Whether this file is excluded from coverage
    pub coverage_excluded: bool,
}

impl SourceFile {
    pub fn new(path: PathBuf, name: impl Into<Arc<str>>) -> Self {
        Self {
            path,
            name: name.into(),
            helpers: Vec::new(),
            helper_regions: Vec::new(),
            coverage_excluded: false,
        }
    }

    pub fn region(&self, line: u32) -> RegionId {
        RegionId::new(self.name.clone(), line)
    }
}

/// Opaque handle to a script body (test body, setup or teardown block)
#[derive(Debug, Clone)]
pub struct BodyRef {
    pub file: Arc<SourceFile>,
    pub snippet: Snippet,
    /// Statement lines inside the body, as reported by the evaluator
    pub regions: Vec<u32>,
}

impl BodyRef {
    pub fn id(&self) -> u64 {
        self.snippet.id
    }

    pub fn line(&self) -> u32 {
        self.snippet.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_ids_are_unique() {
        let a = Snippet::new("x", 1, 1);
        let b = Snippet::new("x", 1, 1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_regions_order_by_file_then_line() {
        let mut regions = vec![
            RegionId::new("b.hyp", 1),
            RegionId::new("a.hyp", 9),
            RegionId::new("a.hyp", 2),
        ];
        regions.sort();
        assert_eq!(regions[0], RegionId::new("a.hyp", 2));
        assert_eq!(regions[2], RegionId::new("b.hyp", 1));
    }
}
