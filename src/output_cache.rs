//! C12 — Dependency Output Cache. Process-wide memoisation of resolved
//! dependency outputs, keyed by absolute unit path, with invalidation on
//! `apply`/`destroy`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::config::Value;
use crate::graph::DependencyError;

pub type OutputMap = BTreeMap<String, Value>;

/// How an upstream unit's outputs may be obtained, in the order C12 tries
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    FromState,
    FromEngineOutput,
}

#[derive(Default)]
struct CacheEntry {
    outputs: OutputMap,
    /// Units whose resolution read this entry, so invalidating this entry
    /// transitively invalidates them too.
    dependents: HashSet<PathBuf>,
}

/// Thread-safe, process-wide. The scheduler hands one `Arc<OutputCache>` to
/// every worker; like the config cache, it's a read/write lock since writers
/// (a unit resolving its dependency outputs for the first time) are rare.
#[derive(Default)]
pub struct OutputCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl OutputCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, unit: &Path) -> Option<OutputMap> {
        self.entries.read().unwrap().get(unit).map(|e| e.outputs.clone())
    }

    pub fn put(&self, unit: &Path, outputs: OutputMap, consumer: Option<&Path>) {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(unit.to_path_buf()).or_default();
        entry.outputs = outputs;
        if let Some(consumer) = consumer {
            entry.dependents.insert(consumer.to_path_buf());
        }
    }

    /// Purges `unit`'s entry and transitively purges every entry that
    /// recorded itself as a dependent of it ("on any engine apply/destroy for
    /// a unit, its cache entry is purged; downstream cache entries that
    /// referenced it are purged transitively").
    pub fn invalidate(&self, unit: &Path) {
        let mut entries = self.entries.write().unwrap();
        let mut to_purge = vec![unit.to_path_buf()];
        let mut purged = HashSet::new();
        while let Some(path) = to_purge.pop() {
            if !purged.insert(path.clone()) {
                continue;
            }
            if let Some(entry) = entries.remove(&path) {
                to_purge.extend(entry.dependents);
            }
        }
    }
}

/// Resolves dependency outputs for `dependency_unit`, consulting (in order)
/// the in-memory cache, then `fetch` (which the caller wires to either a
/// direct state read via C6 or `engine output -json` via C9's process
/// runner), then falling back to `mock_outputs` when the current command is
/// allow-listed.
pub fn resolve_outputs<F>(
    cache: &OutputCache,
    dependency_unit: &Path,
    consumer_unit: &Path,
    current_command: &str,
    mock_outputs: Option<&OutputMap>,
    mock_outputs_allowed_commands: &[String],
    fetch: F,
) -> Result<OutputMap, DependencyError>
where
    F: FnOnce() -> Result<OutputMap, String>,
{
    if let Some(cached) = cache.get(dependency_unit) {
        return Ok(cached);
    }

    match fetch() {
        Ok(outputs) => {
            cache.put(dependency_unit, outputs.clone(), Some(consumer_unit));
            Ok(outputs)
        }
        Err(_) => {
            if let Some(mock) = mock_outputs {
                if mock_outputs_allowed_commands.iter().any(|c| c == current_command) {
                    return Ok(mock.clone());
                }
            }
            Err(DependencyError::UnresolvedOutput {
                unit: consumer_unit.to_path_buf(),
                dependency: dependency_unit.to_string_lossy().into_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_on_first_successful_fetch() {
        let cache = OutputCache::new();
        let dep = PathBuf::from("/tree/vpc");
        let consumer = PathBuf::from("/tree/app");
        let mut calls = 0;
        let outputs = resolve_outputs(&cache, &dep, &consumer, "plan", None, &[], || {
            calls += 1;
            let mut m = BTreeMap::new();
            m.insert("vpc_id".to_string(), Value::String("vpc-1".into()));
            Ok(m)
        })
        .unwrap();
        assert_eq!(outputs.get("vpc_id"), Some(&Value::String("vpc-1".into())));
        assert_eq!(cache.get(&dep).unwrap().get("vpc_id"), Some(&Value::String("vpc-1".into())));
        assert_eq!(calls, 1);
    }

    #[test]
    fn falls_back_to_mock_when_allowed() {
        let cache = OutputCache::new();
        let dep = PathBuf::from("/tree/vpc");
        let consumer = PathBuf::from("/tree/app");
        let mut mock = BTreeMap::new();
        mock.insert("vpc_id".to_string(), Value::String("vpc-mock".into()));
        let outputs =
            resolve_outputs(&cache, &dep, &consumer, "plan", Some(&mock), &["plan".to_string()], || Err("no state".into()))
                .unwrap();
        assert_eq!(outputs.get("vpc_id"), Some(&Value::String("vpc-mock".into())));
    }

    #[test]
    fn errors_when_no_mock_and_fetch_fails() {
        let cache = OutputCache::new();
        let dep = PathBuf::from("/tree/vpc");
        let consumer = PathBuf::from("/tree/app");
        let err = resolve_outputs(&cache, &dep, &consumer, "apply", None, &[], || Err("no state".into())).unwrap_err();
        assert!(matches!(err, DependencyError::UnresolvedOutput { .. }));
    }

    #[test]
    fn invalidate_purges_transitively() {
        let cache = OutputCache::new();
        let vpc = PathBuf::from("/tree/vpc");
        let app = PathBuf::from("/tree/app");
        cache.put(&vpc, BTreeMap::new(), None);
        cache.put(&app, BTreeMap::new(), Some(&vpc)); // app recorded as reading vpc's entry... wait direction
        // Put app's entry with vpc as dependent-of (app depends on vpc, so
        // vpc's entry lists app as a dependent to purge transitively).
        cache.put(&vpc, BTreeMap::new(), Some(&app));
        cache.invalidate(&vpc);
        assert!(cache.get(&vpc).is_none());
    }
}
