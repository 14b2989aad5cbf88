//! Include/exclude filtering of item ids by glob pattern.

use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use spacecraft_shared::{Result, SpaceCraftError};

/// Decides which items of a collection make it into the export.
#[derive(Debug, Clone)]
pub struct ItemFilter {
    /// If non-empty, an id must match at least one.
    include: Vec<Regex>,
    /// An id matching any of these is dropped.
    exclude: Vec<Regex>,
    /// Exclusion list of exact ids.
    excluded_ids: HashSet<String>,
}

impl ItemFilter {
    pub fn new(include: &[String], exclude: &[String], excluded_ids: &[String]) -> Result<Self> {
        Ok(Self {
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
            excluded_ids: excluded_ids.iter().cloned().collect(),
        })
    }

    pub fn accepts(&self, id: &str) -> bool {
        if self.excluded_ids.contains(id) {
            debug!(id, "on exclusion list");
            return false;
        }

        if self.exclude.iter().any(|p| p.is_match(id)) {
            debug!(id, "matched exclude pattern");
            return false;
        }

        if !self.include.is_empty() {
            return self.include.iter().any(|p| p.is_match(id));
        }

        true
    }

    /// Split `ids` into (accepted, rejected), preserving order.
    pub fn partition<'a>(&self, ids: &'a [String]) -> (Vec<&'a str>, Vec<&'a str>) {
        ids.iter()
            .map(String::as_str)
            .partition(|id| self.accepts(id))
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| glob_to_regex(p)).collect()
}

/// Convert a glob-like pattern to an anchored regex.
///
/// `**` matches anything, `*` anything except `/`, `?` one character.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    if pattern.trim().is_empty() {
        return Err(SpaceCraftError::validation("empty filter pattern"));
    }

    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");

    Regex::new(&format!("^{escaped}$")).map_err(|e| {
        SpaceCraftError::validation(format!("invalid filter pattern '{pattern}': {e}"))
    })
}
