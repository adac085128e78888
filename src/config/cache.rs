//! Process-wide memoisation for expensive, repeatable probes: `sops_decrypt_file`
//! and the `get_repo_root`-style git probe. "Caching: sops_decrypt_file and
//! get_repo_root-style shell probes cache results per process so repeated
//! evaluation across units is O(1)."

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;

static SOPS_CACHE: Lazy<Mutex<HashMap<PathBuf, String>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static REPO_ROOT_CACHE: Lazy<Mutex<HashMap<PathBuf, PathBuf>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn sops_cache_get_or_compute<F, E>(path: &std::path::Path, compute: F) -> Result<String, E>
where
    F: FnOnce() -> Result<String, E>,
{
    {
        let cache = SOPS_CACHE.lock().unwrap();
        if let Some(v) = cache.get(path) {
            return Ok(v.clone());
        }
    }
    let value = compute()?;
    SOPS_CACHE.lock().unwrap().insert(path.to_path_buf(), value.clone());
    Ok(value)
}

pub fn repo_root_cache_get_or_compute<F, E>(start_dir: &std::path::Path, compute: F) -> Result<PathBuf, E>
where
    F: FnOnce() -> Result<PathBuf, E>,
{
    {
        let cache = REPO_ROOT_CACHE.lock().unwrap();
        if let Some(v) = cache.get(start_dir) {
            return Ok(v.clone());
        }
    }
    let value = compute()?;
    REPO_ROOT_CACHE.lock().unwrap().insert(start_dir.to_path_buf(), value.clone());
    Ok(value)
}

#[cfg(test)]
pub fn clear_all() {
    SOPS_CACHE.lock().unwrap().clear();
    REPO_ROOT_CACHE.lock().unwrap().clear();
}
