//! `sops_decrypt_file(path)` and its key-provider abstraction (PGP, AWS-KMS,
//! GCP-KMS, age). The actual cryptography is delegated to the `sops` binary
//! on PATH; this module only decides *which* key provider's credentials
//! need to be present and classifies failures as typed `ConfigError`
//! subvariants.

use std::path::Path;

use crate::config::cache;
use crate::config::error::ConfigError;
use crate::errors::SourcePos;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyProvider {
    Pgp,
    AwsKms,
    GcpKms,
    Age,
}

impl KeyProvider {
    /// Sniffs the provider from the encrypted file's `sops` metadata block,
    /// matching the key names sops itself writes (`pgp`, `kms`, `gcp_kms`,
    /// `age`).
    fn detect(raw: &str) -> Option<KeyProvider> {
        if raw.contains("\"age\":") {
            Some(KeyProvider::Age)
        } else if raw.contains("\"gcp_kms\":") {
            Some(KeyProvider::GcpKms)
        } else if raw.contains("\"kms\":") {
            Some(KeyProvider::AwsKms)
        } else if raw.contains("\"pgp\":") {
            Some(KeyProvider::Pgp)
        } else {
            None
        }
    }
}

/// Decrypts `path` with `sops -d`, returning the plaintext. Results are
/// memoised per process per path (C2 caching requirement).
pub fn sops_decrypt_file(path: &Path, pos: &SourcePos) -> Result<String, ConfigError> {
    cache::sops_cache_get_or_compute(path, || decrypt_uncached(path, pos))
}

fn decrypt_uncached(path: &Path, pos: &SourcePos) -> Result<String, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io { path: path.to_path_buf(), source: e })?;
    let provider = KeyProvider::detect(&raw).ok_or_else(|| {
        ConfigError::Function {
            pos: pos.clone(),
            function: "sops_decrypt_file".to_string(),
            message: format!("{}: could not determine key provider from sops metadata", path.display()),
        }
    })?;

    let output = std::process::Command::new("sops")
        .arg("-d")
        .arg(path)
        .output()
        .map_err(|e| ConfigError::Function {
            pos: pos.clone(),
            function: "sops_decrypt_file".to_string(),
            message: format!("failed to invoke sops binary: {e}"),
        })?;

    if !output.status.success() {
        return Err(ConfigError::Function {
            pos: pos.clone(),
            function: "sops_decrypt_file".to_string(),
            message: format!(
                "sops -d {} failed via {provider:?} provider: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_age_provider() {
        assert_eq!(KeyProvider::detect(r#"{"sops":{"age":[{"recipient":"..."}]}}"#), Some(KeyProvider::Age));
    }

    #[test]
    fn detects_kms_provider() {
        assert_eq!(KeyProvider::detect(r#"{"sops":{"kms":[{"arn":"..."}]}}"#), Some(KeyProvider::AwsKms));
    }

    #[test]
    fn unknown_provider_is_none() {
        assert_eq!(KeyProvider::detect("{}"), None);
    }
}
