//! # Ignore Patterns
//!
//! Compiles wildcard ignore patterns (as found in a project's `IgnoredPaths`) into a single
//! [`regex::RegexSet`] and tests root-relative archive paths against it.
//!
//! `*` matches any run of characters, including separators, so `*.log` excludes `a.log`
//! as well as `dir/b.log`. `?` matches exactly one character. Patterns are anchored to the
//! whole relative path: `cache/*` matches `cache/x` but not `other/cache/x`.
//! Directories are tested with a trailing `/` (e.g. `cache/`), files without.

use regex::{RegexSet, RegexSetBuilder};

use crate::common::normalize_separators;
use crate::PackError;

/// A compiled set of ignore patterns.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    set: RegexSet,
    patterns: Vec<String>,
}

impl Default for PathMatcher {
    fn default() -> Self {
        Self::empty()
    }
}

impl PathMatcher {
    /// A matcher that excludes nothing.
    pub fn empty() -> Self {
        Self { set: RegexSet::empty(), patterns: Vec::new() }
    }

    /// Compiles `patterns` with case-sensitive matching.
    pub fn compile<I, S>(patterns: I) -> Result<Self, PackError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(patterns, false)
    }

    /// Compiles `patterns` so that `*.LOG` also excludes `app.log`.
    pub fn compile_case_insensitive<I, S>(patterns: I) -> Result<Self, PackError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(patterns, true)
    }

    fn build<I, S>(patterns: I, case_insensitive: bool) -> Result<Self, PackError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(|p| p.as_ref().to_string()).collect();
        if patterns.is_empty() {
            return Ok(Self::empty());
        }
        let set = RegexSetBuilder::new(patterns.iter().map(|p| wildcard_to_regex(p)))
            .case_insensitive(case_insensitive)
            // file names may contain line breaks
            .dot_matches_new_line(true)
            .build()
            .map_err(|source| PackError::Pattern { pattern: patterns.join(", "), source })?;
        Ok(Self { set, patterns })
    }

    /// True if `relative_path` matches any compiled pattern.
    pub fn matches(&self, relative_path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        if relative_path.contains('\\') {
            self.set.is_match(&normalize_separators(relative_path))
        } else {
            self.set.is_match(relative_path)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The source patterns, in the order they were given.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Translates a wildcard pattern into an anchored regular expression.
pub fn wildcard_to_regex(pattern: &str) -> String {
    let pattern = normalize_separators(pattern);
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '*' | '?' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if ch == '*' { ".*" } else { "." });
            }
            _ => literal.push(ch),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}
