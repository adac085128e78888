//! C4 — Filter Language.
//!
//! `query := term (',' term)*`
//! `term  := '!' term | '{' query '}' | attr '=' pattern | pattern`
//! `attr  ∈ {path, name, type, source, reading}` (unprefixed = path or name)
//! A `|` between terms intersects; `!` negates; `,` (and separate `--filter`
//! flags) union. A git-range term `[rev...rev]` selects units whose path
//! overlaps the diff between the two revisions (`git_range`); with
//! `--filter-allow-destroy`, a unit whose path only had files deleted since
//! `rev` still matches, for destroy planning.

pub mod eval;
pub mod git_range;

use std::path::Path;

use glob::Pattern;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unknown filter attribute '{attr}' at offset {offset}")]
    UnknownAttribute { attr: String, offset: usize },

    #[error("malformed glob pattern '{pattern}': {source}")]
    MalformedGlob { pattern: String, #[source] source: glob::PatternError },

    #[error("unbalanced braces in filter expression at offset {offset}")]
    UnbalancedBraces { offset: usize },

    #[error("malformed git range '{text}' at offset {offset}")]
    MalformedGitRange { text: String, offset: usize },

    #[error("git range {from}...{to} failed: {source}")]
    GitRangeFailed { from: String, to: String, #[source] source: git2::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Attr {
    /// Not itself a recognised attribute keyword; matches an unqualified
    /// pattern against both path and name.
    #[strum(disabled)]
    PathOrName,
    Path,
    Name,
    Type,
    Source,
    Reading,
}

#[derive(Debug, Clone)]
pub enum FilterExpr {
    Match { attr: Attr, pattern: Pattern, raw: String },
    GitRange { from: String, to: String, allow_destroy: bool },
    Not(Box<FilterExpr>),
    /// Comma-separated union.
    Union(Vec<FilterExpr>),
    /// `|`-separated intersection.
    Intersect(Vec<FilterExpr>),
}

/// Splits `s` on `sep` at brace-nesting depth 0 only.
fn split_top_level(s: &str, sep: char) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push((start, &s[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push((start, &s[start..]));
    parts
}

fn parse_attr(s: &str) -> Option<Attr> {
    use std::str::FromStr;
    Attr::from_str(s).ok()
}

fn parse_term(raw: &str, base_offset: usize, allow_destroy: bool) -> Result<FilterExpr, FilterError> {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix('!') {
        return Ok(FilterExpr::Not(Box::new(parse_term(rest, base_offset + 1, allow_destroy)?)));
    }
    if trimmed.starts_with('{') {
        if !trimmed.ends_with('}') {
            return Err(FilterError::UnbalancedBraces { offset: base_offset });
        }
        let inner = &trimmed[1..trimmed.len() - 1];
        return parse_query(inner, base_offset + 1, allow_destroy);
    }
    if trimmed.starts_with('[') {
        if !trimmed.ends_with(']') {
            return Err(FilterError::UnbalancedBraces { offset: base_offset });
        }
        let inner = &trimmed[1..trimmed.len() - 1];
        let parts: Vec<&str> = inner.splitn(2, "...").collect();
        if parts.len() != 2 {
            return Err(FilterError::MalformedGitRange { text: trimmed.to_string(), offset: base_offset });
        }
        return Ok(FilterExpr::GitRange { from: parts[0].trim().to_string(), to: parts[1].trim().to_string(), allow_destroy });
    }

    // Intersection binds tighter than union: within a single comma-term,
    // top-level `|` intersects.
    let pipe_parts = split_top_level(trimmed, '|');
    if pipe_parts.len() > 1 {
        let mut exprs = Vec::new();
        for (offset, part) in pipe_parts {
            exprs.push(parse_term(part, base_offset + offset, allow_destroy)?);
        }
        return Ok(FilterExpr::Intersect(exprs));
    }

    if let Some(eq_idx) = trimmed.find('=') {
        let attr_str = trimmed[..eq_idx].trim();
        if let Some(attr) = parse_attr(attr_str) {
            let pattern_str = trimmed[eq_idx + 1..].trim();
            let pattern = Pattern::new(pattern_str)
                .map_err(|source| FilterError::MalformedGlob { pattern: pattern_str.to_string(), source })?;
            return Ok(FilterExpr::Match { attr, pattern, raw: pattern_str.to_string() });
        }
        return Err(FilterError::UnknownAttribute { attr: attr_str.to_string(), offset: base_offset });
    }

    let pattern =
        Pattern::new(trimmed).map_err(|source| FilterError::MalformedGlob { pattern: trimmed.to_string(), source })?;
    Ok(FilterExpr::Match { attr: Attr::PathOrName, pattern, raw: trimmed.to_string() })
}

fn parse_query(s: &str, base_offset: usize, allow_destroy: bool) -> Result<FilterExpr, FilterError> {
    let parts = split_top_level(s, ',');
    if parts.len() == 1 {
        return parse_term(parts[0].1, base_offset + parts[0].0, allow_destroy);
    }
    let mut terms = Vec::new();
    for (offset, part) in parts {
        if part.trim().is_empty() {
            continue;
        }
        terms.push(parse_term(part, base_offset + offset, allow_destroy)?);
    }
    Ok(FilterExpr::Union(terms))
}

/// Parses one `--filter` expression. Multiple flags union their results at
/// the call site (`Filter::union_all`). `allow_destroy` mirrors
/// `--filter-allow-destroy` onto every `GitRange` term the expression
/// contains, since the flag is global to the invocation rather than
/// per-term syntax.
pub fn parse(expr: &str, allow_destroy: bool) -> Result<FilterExpr, FilterError> {
    let depth_check = expr.chars().fold(0i32, |d, c| match c {
        '{' | '[' => d + 1,
        '}' | ']' => d - 1,
        _ => d,
    });
    if depth_check != 0 {
        return Err(FilterError::UnbalancedBraces { offset: expr.len() });
    }
    parse_query(expr, 0, allow_destroy)
}

/// Collects every `GitRange` term's `(from, to, allow_destroy)` out of a
/// parsed filter expression, recursing through `Not`/`Union`/`Intersect`.
pub fn collect_git_ranges(expr: &FilterExpr, out: &mut Vec<(String, String, bool)>) {
    match expr {
        FilterExpr::GitRange { from, to, allow_destroy } => out.push((from.clone(), to.clone(), *allow_destroy)),
        FilterExpr::Not(inner) => collect_git_ranges(inner, out),
        FilterExpr::Union(parts) | FilterExpr::Intersect(parts) => {
            for p in parts {
                collect_git_ranges(p, out);
            }
        }
        FilterExpr::Match { .. } => {}
    }
}

/// Same as [`collect_git_ranges`] over a whole `--filter` list.
pub fn collect_all_git_ranges(filters: &[FilterExpr]) -> Vec<(String, String, bool)> {
    let mut out = Vec::new();
    for f in filters {
        collect_git_ranges(f, &mut out);
    }
    out
}

/// Unions the results of evaluating every `--filter` flag (each already
/// parsed) against a candidate list, keeping stable sorted output so two
/// runs over the same tree always list matches in the same order.
pub fn union_all<'a, T, F>(exprs: &[FilterExpr], items: &'a [T], matcher: F) -> Vec<&'a T>
where
    F: Fn(&FilterExpr, &T) -> bool,
{
    if exprs.is_empty() {
        return items.iter().collect();
    }
    items.iter().filter(|item| exprs.iter().any(|e| matcher(e, item))).collect()
}

pub fn glob_matches_path(pattern: &Pattern, path: &Path) -> bool {
    pattern.matches_path(path) || pattern.matches(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_pattern() {
        let expr = parse("./unit", false).unwrap();
        assert!(matches!(expr, FilterExpr::Match { attr: Attr::PathOrName, .. }));
    }

    #[test]
    fn parses_attr_pattern() {
        let expr = parse("type=unit", false).unwrap();
        assert!(matches!(expr, FilterExpr::Match { attr: Attr::Type, .. }));
    }

    #[test]
    fn parses_union() {
        let expr = parse("a,b", false).unwrap();
        match expr {
            FilterExpr::Union(v) => assert_eq!(v.len(), 2),
            _ => panic!("expected union"),
        }
    }

    #[test]
    fn parses_negation() {
        let expr = parse("!type=stack", false).unwrap();
        assert!(matches!(expr, FilterExpr::Not(_)));
    }

    #[test]
    fn parses_group_and_intersection() {
        let expr = parse("{a,b}|type=unit", false).unwrap();
        assert!(matches!(expr, FilterExpr::Intersect(_)));
    }

    #[test]
    fn unknown_attribute_errors() {
        let err = parse("bogus=x", false).unwrap_err();
        assert!(matches!(err, FilterError::UnknownAttribute { .. }));
    }

    #[test]
    fn unbalanced_braces_errors() {
        let err = parse("{a,b", false).unwrap_err();
        assert!(matches!(err, FilterError::UnbalancedBraces { .. }));
    }

    #[test]
    fn parses_git_range() {
        let expr = parse("[main...HEAD]", false).unwrap();
        assert!(matches!(expr, FilterExpr::GitRange { .. }));
    }

    #[test]
    fn parses_git_range_with_allow_destroy() {
        let expr = parse("[main...HEAD]", true).unwrap();
        assert!(matches!(expr, FilterExpr::GitRange { allow_destroy: true, .. }));
    }

    #[test]
    fn collects_git_ranges_through_union_and_negation() {
        let expr = parse("![main...HEAD],type=unit", true).unwrap();
        let mut out = Vec::new();
        collect_git_ranges(&expr, &mut out);
        assert_eq!(out, vec![("main".to_string(), "HEAD".to_string(), true)]);
    }
}
