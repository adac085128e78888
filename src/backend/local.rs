//! Local-file and passthrough backends. Neither needs bootstrap or cloud
//! credentials; `Local` writes a `local { path = ... }` stanza keyed by the
//! unit's relative path, `Passthrough` emits nothing (no `remote_state`
//! block at all — the engine manages its own default local state).

use std::path::Path;

use crate::backend::{derive_state_key, parse_state_outputs, Backend, BackendError};
use crate::config::{RemoteState, Value};
use crate::output_cache::OutputMap;

pub struct LocalBackend;

impl LocalBackend {
    /// The directory local state files are rooted at; `local { path = ... }`
    /// stanzas are relative to wherever the engine binary runs, not this
    /// process, so `read_outputs` needs its own notion of the root,
    /// configurable via `remote_state.config.path`.
    fn root(cfg: &RemoteState) -> String {
        cfg.config.get("path").and_then(Value::as_str).unwrap_or(".").to_string()
    }
}

impl Backend for LocalBackend {
    fn needs_bootstrap(&self, _cfg: &RemoteState) -> Result<bool, BackendError> {
        Ok(false)
    }

    fn bootstrap(&self, _cfg: &RemoteState) -> Result<(), BackendError> {
        Ok(())
    }

    fn generate_backend_file(&self, _cfg: &RemoteState, unit_relpath: &Path) -> Result<String, BackendError> {
        let key = derive_state_key(unit_relpath);
        Ok(format!(
            "{comment}\nterraform {{\n  backend \"local\" {{\n    path = \"{key}\"\n  }}\n}}\n",
            comment = crate::constants::GENERATED_FILE_COMMENT_PREFIX,
        ))
    }

    fn migrate(&self, _cfg: &RemoteState, _src_key: &str, _dst_key: &str, _force: bool) -> Result<(), BackendError> {
        Ok(())
    }

    fn delete(&self, _cfg: &RemoteState, _keys: &[String], _force: bool) -> Result<(), BackendError> {
        Ok(())
    }

    fn read_outputs(&self, cfg: &RemoteState, unit_relpath: &Path) -> Result<OutputMap, BackendError> {
        let path = Path::new(&Self::root(cfg)).join(derive_state_key(unit_relpath));
        let bytes = std::fs::read(&path)
            .map_err(|e| BackendError::Io { backend: "local".to_string(), detail: format!("reading {}: {e}", path.display()) })?;
        parse_state_outputs("local", &bytes)
    }
}

pub struct PassthroughBackend;

impl Backend for PassthroughBackend {
    fn needs_bootstrap(&self, _cfg: &RemoteState) -> Result<bool, BackendError> {
        Ok(false)
    }

    fn bootstrap(&self, _cfg: &RemoteState) -> Result<(), BackendError> {
        Ok(())
    }

    fn generate_backend_file(&self, _cfg: &RemoteState, _unit_relpath: &Path) -> Result<String, BackendError> {
        Ok(String::new())
    }

    fn migrate(&self, _cfg: &RemoteState, _src_key: &str, _dst_key: &str, _force: bool) -> Result<(), BackendError> {
        Ok(())
    }

    fn delete(&self, _cfg: &RemoteState, _keys: &[String], _force: bool) -> Result<(), BackendError> {
        Ok(())
    }

    fn read_outputs(&self, _cfg: &RemoteState, _unit_relpath: &Path) -> Result<OutputMap, BackendError> {
        // No centralised state object to read: passthrough units keep state
        // wherever the engine binary's own default backend puts it, local to
        // the staged working directory, which doesn't exist until staged.
        Err(BackendError::Unsupported("passthrough".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn local_backend_never_needs_bootstrap() {
        let cfg = RemoteState { backend: "local".to_string(), config: BTreeMap::new(), generate: None, disable_init: false };
        assert!(!LocalBackend.needs_bootstrap(&cfg).unwrap());
    }

    #[test]
    fn local_backend_generates_path_stanza() {
        let cfg = RemoteState { backend: "local".to_string(), config: BTreeMap::new(), generate: None, disable_init: false };
        let out = LocalBackend.generate_backend_file(&cfg, Path::new("envs/dev/vpc")).unwrap();
        assert!(out.contains("envs/dev/vpc/tofu.tfstate"));
    }

    #[test]
    fn passthrough_generates_nothing() {
        let cfg = RemoteState::default();
        assert_eq!(PassthroughBackend.generate_backend_file(&cfg, Path::new("x")).unwrap(), "");
    }

    #[test]
    fn passthrough_read_outputs_is_unsupported() {
        let cfg = RemoteState::default();
        let err = PassthroughBackend.read_outputs(&cfg, Path::new("x")).unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }

    #[test]
    fn local_backend_reads_outputs_from_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BTreeMap::new();
        config.insert("path".to_string(), crate::config::Value::String(dir.path().to_string_lossy().into_owned()));
        let cfg = RemoteState { backend: "local".to_string(), config, generate: None, disable_init: false };

        let state_path = dir.path().join("envs/dev/vpc/tofu.tfstate");
        std::fs::create_dir_all(state_path.parent().unwrap()).unwrap();
        std::fs::write(&state_path, r#"{"outputs":{"vpc_id":{"value":"vpc-1","type":"string"}}}"#).unwrap();

        let outputs = LocalBackend.read_outputs(&cfg, Path::new("envs/dev/vpc")).unwrap();
        assert_eq!(outputs.get("vpc_id"), Some(&crate::config::Value::String("vpc-1".to_string())));
    }

    #[test]
    fn local_backend_read_outputs_errors_when_state_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BTreeMap::new();
        config.insert("path".to_string(), crate::config::Value::String(dir.path().to_string_lossy().into_owned()));
        let cfg = RemoteState { backend: "local".to_string(), config, generate: None, disable_init: false };
        let err = LocalBackend.read_outputs(&cfg, Path::new("envs/dev/vpc")).unwrap_err();
        assert!(matches!(err, BackendError::Io { .. }));
    }
}
