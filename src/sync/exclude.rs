//! Exclude pattern matching for depot syncs.
//!
//! Patterns use depot wildcard syntax: `...` matches across path segments,
//! `*` matches within one segment, and a leading `//` anchors the pattern
//! at the depot root. A trailing `/` means "this directory and everything
//! under it".

use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::depot::{DepotError, Result};

/// A single depot wildcard expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathPattern {
    raw: String,
}

impl PathPattern {
    /// Create a pattern, normalizing a trailing `/` to `/...`.
    pub fn new(pattern: &str) -> Self {
        let pattern = pattern.trim();
        let raw = if pattern.ends_with('/') && pattern.len() > 2 {
            format!("{}...", pattern)
        } else {
            pattern.to_string()
        };
        Self { raw }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Anchored patterns start at the depot root.
    pub fn is_anchored(&self) -> bool {
        self.raw.starts_with("//")
    }

    /// Translate into an anchored regular expression.
    pub fn to_regex(&self) -> String {
        let mut out = String::with_capacity(self.raw.len() * 2 + 8);
        out.push_str(if self.is_anchored() { "^" } else { "(?:^|/)" });

        let mut rest = self.raw.as_str();
        while let Some(c) = rest.chars().next() {
            if rest.starts_with("/.../") {
                // Zero or more whole segments
                out.push_str("/(?:.*/)?");
                rest = &rest[5..];
            } else if rest == "/..." {
                // The directory itself or anything below it
                out.push_str("(?:/.*)?");
                rest = "";
            } else if rest.starts_with("...") {
                out.push_str(".*");
                rest = &rest[3..];
            } else if c == '*' {
                out.push_str("[^/]*");
                rest = &rest[1..];
            } else {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                rest = &rest[c.len_utf8()..];
            }
        }

        out.push('$');
        out
    }

    pub fn compile(&self) -> Result<Regex> {
        Regex::new(&self.to_regex()).map_err(|e| DepotError::InvalidPattern {
            pattern: self.raw.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Immutable matcher built from an exclusion set.
///
/// Safe to share between worker threads without locking.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    matchers: Vec<(PathPattern, Regex)>,
}

impl CompiledQuery {
    pub fn empty() -> Self {
        Self { matchers: Vec::new() }
    }

    /// Compile every pattern. Patterns are sorted so the first-hit result
    /// does not depend on insertion order.
    pub fn compile<'a, I>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut patterns: Vec<PathPattern> = patterns.into_iter().map(PathPattern::new).collect();
        patterns.sort();
        patterns.dedup();

        let mut matchers = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = pattern.compile()?;
            matchers.push((pattern, regex));
        }

        Ok(Self { matchers })
    }

    /// Return the first pattern that excludes `path`.
    pub fn is_excluded(&self, path: &str) -> Option<&str> {
        self.matchers
            .iter()
            .find(|(_, regex)| regex.is_match(path))
            .map(|(pattern, _)| pattern.as_str())
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl Default for CompiledQuery {
    fn default() -> Self {
        Self::empty()
    }
}

/// Caller-owned set of exclusion patterns with a lazily compiled matcher.
///
/// Mutations only mark the cached query dirty; compilation happens on the
/// next [`get_query`](Self::get_query).
#[derive(Debug, Default)]
pub struct ExclusionFilter {
    patterns: HashSet<PathPattern>,
    compiled: Mutex<Option<Arc<CompiledQuery>>>,
}

impl Clone for ExclusionFilter {
    fn clone(&self) -> Self {
        Self {
            patterns: self.patterns.clone(),
            compiled: Mutex::new(None),
        }
    }
}

impl ExclusionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern. Returns false if it (or an equivalent spelling) was
    /// already present.
    pub fn add_exclude(&mut self, pattern: &str) -> bool {
        let pattern = PathPattern::new(pattern);
        if pattern.as_str().is_empty() {
            return false;
        }
        let added = self.patterns.insert(pattern);
        if added {
            self.invalidate();
        }
        added
    }

    /// Remove a pattern. `//a/` and `//a/...` name the same exclusion.
    /// Returns false if it was not present.
    pub fn remove_exclude(&mut self, pattern: &str) -> bool {
        let removed = self.patterns.remove(&PathPattern::new(pattern));
        if removed {
            self.invalidate();
        }
        removed
    }

    /// Add one pattern per line, skipping blanks and `#` comments.
    pub fn extend_from_lines(&mut self, content: &str) -> usize {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter(|line| self.add_exclude(line))
            .count()
    }

    /// Normalized patterns, in no particular order. The iterator can be cloned to restart it.
    pub fn read_excludes(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.patterns.iter().map(PathPattern::as_str)
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.patterns.contains(&PathPattern::new(pattern))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The compiled matcher, rebuilt only if the set changed since the last call.
    pub fn get_query(&self) -> Result<Arc<CompiledQuery>> {
        let mut cached = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(query) = cached.as_ref() {
            return Ok(Arc::clone(query));
        }

        let query = Arc::new(CompiledQuery::compile(self.read_excludes())?);
        *cached = Some(Arc::clone(&query));
        Ok(query)
    }

    fn invalidate(&mut self) {
        *self.compiled.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
