//! Filesystem glob expansion.
//!
//! Patterns are split into a literal base directory and a wildcard remainder.
//! The base is walked with `walkdir` and every file whose base-relative path
//! matches the compiled remainder is returned. Supported syntax:
//!
//! - `*` matches within one path segment, `?` matches one character
//! - `**` matches across segments (`vendor/**/*.js` also matches `vendor/a.js`)
//! - `[abc]` / `[!abc]` character classes
//! - `{js,mjs}` alternatives

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::normalize_path;
use crate::errors::{KilnError, Result};

/// A compiled glob pattern
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    base: PathBuf,
    matcher: Option<Regex>,
    recursive: bool,
    depth: usize,
}

/// Expands glob patterns relative to a fixed root directory
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    root: PathBuf,
}

/// Ordered, deduplicated vendor script paths
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorSet {
    paths: Vec<PathBuf>,
}

impl GlobPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let normalized = pattern.replace('\\', "/");
        let absolute = normalized.starts_with('/');

        let segments: Vec<&str> = normalized
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();

        let literal_len = segments
            .iter()
            .take_while(|segment| !has_wildcard(segment))
            .count();

        let mut base = if absolute { PathBuf::from("/") } else { PathBuf::new() };
        for segment in &segments[..literal_len] {
            base.push(segment);
        }

        let rest = &segments[literal_len..];
        let (matcher, recursive) = if rest.is_empty() {
            (None, false)
        } else {
            let remainder = rest.join("/");
            let regex = Regex::new(&translate(&remainder, pattern)?)?;
            (Some(regex), remainder.contains("**"))
        };

        Ok(Self {
            source: pattern.to_string(),
            base,
            matcher,
            recursive,
            depth: rest.len(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether a base-relative path (with `/` separators) matches
    pub fn matches_relative(&self, relative: &str) -> bool {
        match &self.matcher {
            Some(regex) => regex.is_match(relative),
            None => relative.is_empty(),
        }
    }
}

impl GlobMatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };
        Self { root: normalize_path(&root) }
    }

    /// Expand a pattern into absolute file paths, sorted lexicographically.
    /// A pattern that matches nothing yields an empty list.
    pub fn expand(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let glob = GlobPattern::compile(pattern)?;
        let base = normalize_path(&self.root.join(&glob.base));

        let mut matches = Vec::new();

        if glob.matcher.is_none() {
            if base.is_file() {
                matches.push(base);
            }
            return Ok(matches);
        }

        if !base.is_dir() {
            debug!("Glob base {} does not exist", base.display());
            return Ok(matches);
        }

        let mut walker = WalkDir::new(&base).follow_links(true).sort_by_file_name();
        if !glob.recursive {
            walker = walker.max_depth(glob.depth);
        }

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| base.clone());
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("file system loop"));
                KilnError::file_system_error("Failed to walk glob base", path, source)
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&base) else {
                continue;
            };
            if glob.matches_relative(&to_slash(relative)) {
                matches.push(entry.path().to_path_buf());
            }
        }

        matches.sort();
        matches.dedup();
        debug!("Glob '{}' matched {} files", pattern, matches.len());
        Ok(matches)
    }
}

impl VendorSet {
    /// Expand every pattern in order, keeping the first occurrence of each path
    pub fn collect(matcher: &GlobMatcher, patterns: &[String]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in patterns {
            for path in matcher.expand(pattern)? {
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        Ok(Self { paths })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Render a relative path with `/` separators
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn has_wildcard(segment: &str) -> bool {
    segment.contains(['*', '?', '[', '{'])
}

/// Translate the wildcard remainder of a pattern into an anchored regex
fn translate(glob: &str, original: &str) -> Result<String> {
    let invalid = |reason: &str| KilnError::config(format!("invalid glob '{}': {}", original, reason));

    let mut regex = String::from("^");
    let mut chars = glob.chars().peekable();
    let mut brace_depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        regex.push_str("(?:.*/)?");
                    } else {
                        regex.push_str(".*");
                    }
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            '[' => {
                regex.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    regex.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        regex.push('\\');
                    }
                    regex.push(inner);
                }
                if !closed {
                    return Err(invalid("unclosed '['"));
                }
                regex.push(']');
            }
            '{' => {
                brace_depth += 1;
                regex.push_str("(?:");
            }
            '}' => {
                if brace_depth == 0 {
                    return Err(invalid("unmatched '}'"));
                }
                brace_depth -= 1;
                regex.push(')');
            }
            ',' if brace_depth > 0 => regex.push('|'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }

    if brace_depth > 0 {
        return Err(invalid("unclosed '{'"));
    }

    regex.push('$');
    Ok(regex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, relative).unwrap();
    }

    fn relative_names(root: &Path, paths: &[PathBuf]) -> Vec<String> {
        let root = fs::canonicalize(root).unwrap();
        paths
            .iter()
            .map(|p| to_slash(fs::canonicalize(p).unwrap().strip_prefix(&root).unwrap()))
            .collect()
    }

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "vendor/b.js");
        touch(temp.path(), "vendor/a.js");
        touch(temp.path(), "vendor/notes.md");
        touch(temp.path(), "vendor/nested/c.js");
        touch(temp.path(), "vendor/nested/deeper/d.mjs");
        temp
    }

    #[test]
    fn test_single_level_wildcard() {
        let temp = fixture();
        let matcher = GlobMatcher::new(temp.path());
        let paths = matcher.expand("vendor/*.js").unwrap();
        assert_eq!(relative_names(temp.path(), &paths), vec!["vendor/a.js", "vendor/b.js"]);
        assert!(paths.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn test_recursive_wildcard() {
        let temp = fixture();
        let matcher = GlobMatcher::new(temp.path());
        let paths = matcher.expand("vendor/**/*.js").unwrap();
        assert_eq!(
            relative_names(temp.path(), &paths),
            vec!["vendor/a.js", "vendor/b.js", "vendor/nested/c.js"]
        );
    }

    #[test]
    fn test_alternatives_and_classes() {
        let temp = fixture();
        let matcher = GlobMatcher::new(temp.path());

        let paths = matcher.expand("vendor/**/*.{js,mjs}").unwrap();
        assert_eq!(paths.len(), 4);

        let paths = matcher.expand("vendor/[ab].js").unwrap();
        assert_eq!(relative_names(temp.path(), &paths), vec!["vendor/a.js", "vendor/b.js"]);

        let paths = matcher.expand("vendor/[!a].js").unwrap();
        assert_eq!(relative_names(temp.path(), &paths), vec!["vendor/b.js"]);
    }

    #[test]
    fn test_no_match_is_empty() {
        let temp = fixture();
        let matcher = GlobMatcher::new(temp.path());
        assert!(matcher.expand("vendor/**/*.ts").unwrap().is_empty());
        assert!(matcher.expand("missing/**/*.js").unwrap().is_empty());
    }

    #[test]
    fn test_literal_pattern() {
        let temp = fixture();
        let matcher = GlobMatcher::new(temp.path());
        assert_eq!(matcher.expand("vendor/a.js").unwrap().len(), 1);
        assert!(matcher.expand("vendor/zzz.js").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(GlobPattern::compile("vendor/{a,b").is_err());
        assert!(GlobPattern::compile("vendor/[ab").is_err());
        assert!(GlobPattern::compile("vendor/a}").is_err());
    }

    #[test]
    fn test_vendor_set_deduplicates_in_pattern_order() {
        let temp = fixture();
        let matcher = GlobMatcher::new(temp.path());
        let set = VendorSet::collect(
            &matcher,
            &["vendor/b.js".to_string(), "vendor/*.js".to_string()],
        )
        .unwrap();

        assert_eq!(
            relative_names(temp.path(), set.paths()),
            vec!["vendor/b.js", "vendor/a.js"]
        );
    }
}
