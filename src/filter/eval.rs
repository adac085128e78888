//! Evaluates a parsed `FilterExpr` against one candidate unit/stack.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::discovery::{DiscoveredEntry, EntryType};
use crate::filter::{Attr, FilterExpr};

/// Everything a filter predicate might need to know about one candidate.
/// `source` and `reads` require the unit's configuration to already be
/// evaluated; they're `None` for stacks and for units whose config failed to
/// parse (such a unit simply never matches an attr-qualified term that needs
/// it, matching "errors local to parsing a single file... fatal for that
/// unit only").
pub struct FilterCandidate<'a> {
    pub entry: &'a DiscoveredEntry,
    pub source: Option<&'a str>,
    pub reads: &'a HashSet<PathBuf>,
    /// Paths touched by a git diff, used only for `GitRange` terms.
    pub changed_in_range: bool,
}

fn entry_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

pub fn eval(expr: &FilterExpr, c: &FilterCandidate) -> bool {
    match expr {
        FilterExpr::Match { attr, pattern, .. } => match attr {
            Attr::Path => super::glob_matches_path(pattern, &c.entry.path),
            Attr::Name => pattern.matches(&entry_name(&c.entry.path)),
            Attr::PathOrName => super::glob_matches_path(pattern, &c.entry.path) || pattern.matches(&entry_name(&c.entry.path)),
            Attr::Type => pattern.matches(c.entry.entry_type.as_str()),
            Attr::Source => c.source.map(|s| pattern.matches(s)).unwrap_or(false),
            Attr::Reading => c.reads.iter().any(|p| super::glob_matches_path(pattern, p)),
        },
        FilterExpr::GitRange { .. } => c.changed_in_range,
        FilterExpr::Not(inner) => !eval(inner, c),
        FilterExpr::Union(parts) => parts.iter().any(|p| eval(p, c)),
        FilterExpr::Intersect(parts) => parts.iter().all(|p| eval(p, c)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;
    use std::path::PathBuf;

    fn entry(path: &str, ty: EntryType) -> DiscoveredEntry {
        DiscoveredEntry { entry_type: ty, path: PathBuf::from(path) }
    }

    #[test]
    fn type_filter_matches_unit_only() {
        let unit = entry("/tree/unit", EntryType::Unit);
        let stack = entry("/tree/stack", EntryType::Stack);
        let expr = parse("type=unit", false).unwrap();
        let reads = HashSet::new();
        assert!(eval(&expr, &FilterCandidate { entry: &unit, source: None, reads: &reads, changed_in_range: false }));
        assert!(!eval(&expr, &FilterCandidate { entry: &stack, source: None, reads: &reads, changed_in_range: false }));
    }

    #[test]
    fn negation_inverts() {
        let unit = entry("/tree/unit", EntryType::Unit);
        let expr = parse("!type=stack", false).unwrap();
        let reads = HashSet::new();
        assert!(eval(&expr, &FilterCandidate { entry: &unit, source: None, reads: &reads, changed_in_range: false }));
    }
}
