//! C3 — Discovery. Walks the working tree with `walkdir`, classifies
//! directories as `unit`/`stack`/`external`, honours include/exclude glob
//! sets, and prunes hidden folders. The "reading" filter and
//! `--queue-include-units-reading` are applied downstream, once configs are
//! parsed (see `engine::run`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::Pattern;
use thiserror::Error;
use walkdir::WalkDir;

use crate::constants::{UNIT_CONFIG_FILENAME, UNIT_CONFIG_FILENAME_JSON};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("io error walking {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("ambiguous unit at {path}: more than one recognised config file present")]
    AmbiguousUnit { path: PathBuf },

    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidGlob { pattern: String, #[source] source: glob::PatternError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryType {
    Unit,
    Stack,
    External,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Unit => "unit",
            EntryType::Stack => "stack",
            EntryType::External => "external",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveredEntry {
    pub entry_type: EntryType,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub include_dirs: Vec<String>,
    pub exclude_dirs: Vec<String>,
    /// Absolute paths naming `--queue-include-units-reading`. Discovery
    /// itself doesn't evaluate configs, so this field is only carried here
    /// for the CLI to populate; the actual restriction (only units whose
    /// evaluated config transitively read one of these paths, directly or
    /// through `read_terragrunt_config`/SOPS) is applied in
    /// `engine::run`'s `matches_reading`, once C2 has parsed every unit.
    pub include_units_reading: Vec<PathBuf>,
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, DiscoveryError> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(|source| DiscoveryError::InvalidGlob { pattern: p.clone(), source }))
        .collect()
}

fn matches_any(path: &Path, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|p| p.matches_path(path))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.file_name().to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

/// Walks `root`, returning every unit/stack directory in lexicographic order
/// (the order guaranteed for user-facing listings; the scheduler imposes its
/// own DAG order separately).
pub fn discover(root: &Path, opts: &DiscoveryOptions) -> Result<Vec<DiscoveredEntry>, DiscoveryError> {
    let include_globs = compile_globs(&opts.include_dirs)?;
    let exclude_globs = compile_globs(&opts.exclude_dirs)?;

    let mut entries = Vec::new();
    let mut unit_dirs: HashSet<PathBuf> = HashSet::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| DiscoveryError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path();

        let has_hcl = dir.join(UNIT_CONFIG_FILENAME).is_file();
        let has_json = dir.join(UNIT_CONFIG_FILENAME_JSON).is_file();
        if has_hcl && has_json {
            return Err(DiscoveryError::AmbiguousUnit { path: dir.to_path_buf() });
        }
        if has_hcl || has_json {
            unit_dirs.insert(dir.to_path_buf());
            entries.push(DiscoveredEntry { entry_type: EntryType::Unit, path: dir.to_path_buf() });
        } else if dir != root && has_child_unit(dir, &unit_dirs, root) {
            entries.push(DiscoveredEntry { entry_type: EntryType::Stack, path: dir.to_path_buf() });
        }
    }

    let filtered: Vec<DiscoveredEntry> = entries
        .into_iter()
        .filter(|e| {
            if !include_globs.is_empty() && !matches_any(&e.path, &include_globs) {
                return false;
            }
            if matches_any(&e.path, &exclude_globs) {
                return false;
            }
            true
        })
        .collect();

    let mut out = filtered;
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out.dedup_by(|a, b| a.path == b.path);
    Ok(out)
}

/// A directory is a stack iff it (transitively) contains at least one unit.
/// Computed lazily against the set of unit directories already seen; since
/// `walkdir` descends depth-first this undercounts stacks whose only unit
/// appears later in iteration order, so callers needing a precise stack/unit
/// split should post-process with `reclassify_stacks`.
fn has_child_unit(dir: &Path, unit_dirs: &HashSet<PathBuf>, root: &Path) -> bool {
    unit_dirs.iter().any(|u| u.starts_with(dir) && u != dir) || dir == root
}

/// Second pass: once all units are known, recompute which non-unit
/// directories are stacks (any ancestor of a discovered unit, excluding the
/// unit directories themselves and the tree root when it directly holds a
/// unit).
pub fn reclassify_stacks(root: &Path, mut entries: Vec<DiscoveredEntry>) -> Vec<DiscoveredEntry> {
    let unit_dirs: HashSet<PathBuf> =
        entries.iter().filter(|e| e.entry_type == EntryType::Unit).map(|e| e.path.clone()).collect();

    let mut stacks: HashSet<PathBuf> = HashSet::new();
    for unit in &unit_dirs {
        let mut cur = unit.parent();
        while let Some(dir) = cur {
            if dir == root.parent().unwrap_or(root) {
                break;
            }
            if !unit_dirs.contains(dir) {
                stacks.insert(dir.to_path_buf());
            }
            if dir == root {
                break;
            }
            cur = dir.parent();
        }
    }

    for e in entries.iter_mut() {
        if e.entry_type != EntryType::Unit && stacks.contains(&e.path) {
            e.entry_type = EntryType::Stack;
        }
    }
    entries.retain(|e| e.entry_type == EntryType::Unit || stacks.contains(&e.path));
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch_unit(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(UNIT_CONFIG_FILENAME), "").unwrap();
    }

    #[test]
    fn discovers_units_and_prunes_hidden_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        touch_unit(&tmp.path().join("a"));
        touch_unit(&tmp.path().join("b"));
        fs::create_dir_all(tmp.path().join(".hidden")).unwrap();
        fs::write(tmp.path().join(".hidden").join(UNIT_CONFIG_FILENAME), "").unwrap();

        let entries = discover(tmp.path(), &DiscoveryOptions::default()).unwrap();
        let units: Vec<_> = entries.iter().filter(|e| e.entry_type == EntryType::Unit).collect();
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn ambiguous_unit_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(UNIT_CONFIG_FILENAME), "").unwrap();
        fs::write(dir.join(UNIT_CONFIG_FILENAME_JSON), "").unwrap();
        let err = discover(tmp.path(), &DiscoveryOptions::default()).unwrap_err();
        assert!(matches!(err, DiscoveryError::AmbiguousUnit { .. }));
    }

    #[test]
    fn exclude_dir_removes_matching_units() {
        let tmp = tempfile::tempdir().unwrap();
        touch_unit(&tmp.path().join("prod").join("a"));
        touch_unit(&tmp.path().join("staging").join("b"));
        let opts = DiscoveryOptions { exclude_dirs: vec![format!("{}/staging/**", tmp.path().display())], ..Default::default() };
        let entries = discover(tmp.path(), &opts).unwrap();
        assert!(entries.iter().all(|e| !e.path.to_string_lossy().contains("staging")));
    }

    #[test]
    fn reclassify_stacks_marks_ancestors() {
        let tmp = tempfile::tempdir().unwrap();
        touch_unit(&tmp.path().join("group").join("a"));
        let entries = discover(tmp.path(), &DiscoveryOptions::default()).unwrap();
        let reclassified = reclassify_stacks(tmp.path(), entries);
        assert!(reclassified.iter().any(|e| e.entry_type == EntryType::Stack && e.path.ends_with("group")));
    }
}
