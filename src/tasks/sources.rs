//! Source file discovery.
//!
//! A [`SourceSet`] is a list of glob patterns resolved against the project
//! root. Patterns may use `{a,b}` alternatives, which `glob` does not support,
//! so they are expanded into one pattern per alternative first. Each matched
//! file keeps its path relative to a base directory, which decides where the
//! file lands under the build directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::{klog_warn, Result};

const MAGIC: &[char] = &['*', '?', '[', '{'];

/// A matched source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute (or root-joined) path of the file.
    pub path: PathBuf,
    /// Path relative to the set's base directory.
    pub relative: PathBuf,
}

/// Glob patterns plus the base directory output paths are mirrored from.
#[derive(Debug, Clone)]
pub struct SourceSet {
    root: PathBuf,
    patterns: Vec<String>,
    base: Option<PathBuf>,
}

impl SourceSet {
    /// Patterns are relative to `root` and use forward slashes.
    pub fn new(root: impl Into<PathBuf>, patterns: &[&str]) -> Self {
        Self {
            root: root.into(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            base: None,
        }
    }

    /// Mirror outputs relative to `base` (relative to root) instead of each
    /// pattern's glob parent.
    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Resolve every pattern to the files it currently matches.
    ///
    /// Results are de-duplicated and sorted by path, so runs over unchanged
    /// sources process files in the same order.
    pub fn resolve(&self) -> Result<Vec<SourceFile>> {
        let mut files = BTreeMap::new();
        for pattern in &self.patterns {
            for expanded in expand_braces(pattern) {
                let base = match &self.base {
                    Some(base) => self.root.join(base),
                    None => self.root.join(glob_parent(&expanded)),
                };
                let full = format!("{}/{}", escaped_root(&self.root), expanded);
                for entry in glob::glob_with(&full, match_options())? {
                    let path = match entry {
                        Ok(path) => path,
                        Err(e) => {
                            klog_warn!("Skipping unreadable path: {}", e);
                            continue;
                        }
                    };
                    if !path.is_file() {
                        continue;
                    }
                    let relative = match path.strip_prefix(&base) {
                        Ok(rel) => rel.to_path_buf(),
                        Err(_) => PathBuf::from(path.file_name().unwrap_or_default()),
                    };
                    files.entry(path.clone()).or_insert(SourceFile { path, relative });
                }
            }
        }
        Ok(files.into_values().collect())
    }

    /// Whether a path relative to the root matches any pattern.
    pub fn matches(&self, relative: &Path) -> bool {
        self.patterns.iter().any(|pattern| matches_glob(pattern, relative))
    }
}

/// The root as a literal glob prefix, so `[`, `*` or `?` in directory names
/// are not read as pattern syntax.
fn escaped_root(root: &Path) -> String {
    let root = root.to_string_lossy();
    Pattern::escape(root.trim_end_matches('/'))
}

/// Glob options shared by resolution and watch matching: `*` stays within a
/// path segment, only `**` crosses directories.
pub fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// Test a root-relative path against a pattern with `{a,b}` alternatives.
pub fn matches_glob(pattern: &str, relative: &Path) -> bool {
    expand_braces(pattern).iter().any(|expanded| {
        Pattern::new(expanded)
            .map(|p| p.matches_path_with(relative, match_options()))
            .unwrap_or(false)
    })
}

/// Expand `{a,b}` alternatives into separate patterns.
///
/// Nested groups are expanded recursively; a pattern without a complete
/// group is returned unchanged.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in pattern[open..].char_indices() {
        let idx = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(idx),
            _ => {}
        }
    }
    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(&splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| {
            let alternative = &pattern[w[0] + 1..w[1]];
            expand_braces(&format!("{}{}{}", prefix, alternative, suffix))
        })
        .collect()
}

/// The leading path of a pattern that contains no glob syntax.
pub fn glob_parent(pattern: &str) -> PathBuf {
    let segments: Vec<&str> = pattern.split('/').collect();
    let mut parent = PathBuf::new();
    // The last segment is a file pattern even when it is literal.
    for segment in &segments[..segments.len().saturating_sub(1)] {
        if segment.contains(MAGIC) {
            break;
        }
        parent.push(segment);
    }
    parent
}
