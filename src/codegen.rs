//! C7 — Code Generation. Writes each `generate` block's contents relative to
//! the unit's staged working directory, honouring the configured
//! overwrite policy.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::GenerateFile;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("generate '{label}': file already exists and if_exists = error_if_exists: {path}")]
    AlreadyExists { label: String, path: String },

    #[error("generate '{label}': existing file at {path} was not written by terragrunt-rs, refusing to overwrite")]
    NotOwned { label: String, path: String },

    #[error("generate '{label}': unknown if_exists mode '{mode}'")]
    UnknownMode { label: String, mode: String },

    #[error("generate '{label}': io error writing {path}: {source}")]
    Io { label: String, path: String, #[source] source: std::io::Error },
}

/// `true` if `contents` starts with the sentinel comment marking a file as
/// owned by a generate block (so `overwrite_terragrunt` can detect it was
/// not hand-written).
fn is_owned(contents: &str, comment_prefix: &str) -> bool {
    contents.trim_start().starts_with(comment_prefix)
}

/// Writes one `generate` block's file under `unit_dir`, per its `if_exists`
/// policy. Returns `Ok(true)` if a file was written, `Ok(false)` if skipped.
pub fn write_generated_file(unit_dir: &Path, file: &GenerateFile) -> Result<bool, CodegenError> {
    let target = unit_dir.join(&file.path);
    let exists = target.exists();

    match file.if_exists.as_str() {
        "overwrite" => {}
        "skip" => {
            if exists {
                return Ok(false);
            }
        }
        "error_if_exists" => {
            if exists {
                return Err(CodegenError::AlreadyExists { label: file.label.clone(), path: target.display().to_string() });
            }
        }
        "overwrite_terragrunt" => {
            if exists {
                let existing = fs::read_to_string(&target)
                    .map_err(|source| CodegenError::Io { label: file.label.clone(), path: target.display().to_string(), source })?;
                if !file.disable_signature && !is_owned(&existing, &file.comment_prefix) {
                    return Err(CodegenError::NotOwned { label: file.label.clone(), path: target.display().to_string() });
                }
            }
        }
        other => return Err(CodegenError::UnknownMode { label: file.label.clone(), mode: other.to_string() }),
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| CodegenError::Io { label: file.label.clone(), path: target.display().to_string(), source })?;
    }

    let body = if file.disable_signature {
        file.contents.clone()
    } else {
        format!("{}\n{}", file.comment_prefix, file.contents)
    };
    fs::write(&target, body).map_err(|source| CodegenError::Io { label: file.label.clone(), path: target.display().to_string(), source })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gen(path: &str, if_exists: &str, contents: &str) -> GenerateFile {
        GenerateFile {
            label: "backend".to_string(),
            path: path.to_string(),
            if_exists: if_exists.to_string(),
            contents: contents.to_string(),
            comment_prefix: crate::constants::GENERATED_FILE_COMMENT_PREFIX.to_string(),
            disable_signature: false,
        }
    }

    #[test]
    fn writes_new_file() {
        let dir = tempdir().unwrap();
        let file = gen("backend.tf", "overwrite", "contents");
        assert!(write_generated_file(dir.path(), &file).unwrap());
        let written = fs::read_to_string(dir.path().join("backend.tf")).unwrap();
        assert!(written.contains("contents"));
        assert!(written.starts_with(crate::constants::GENERATED_FILE_COMMENT_PREFIX));
    }

    #[test]
    fn skip_mode_leaves_existing_file_untouched() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("backend.tf"), "hand-written").unwrap();
        let file = gen("backend.tf", "skip", "new contents");
        assert!(!write_generated_file(dir.path(), &file).unwrap());
        assert_eq!(fs::read_to_string(dir.path().join("backend.tf")).unwrap(), "hand-written");
    }

    #[test]
    fn error_if_exists_mode_errors_on_existing_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("backend.tf"), "hand-written").unwrap();
        let file = gen("backend.tf", "error_if_exists", "new contents");
        assert!(matches!(write_generated_file(dir.path(), &file), Err(CodegenError::AlreadyExists { .. })));
    }

    #[test]
    fn overwrite_terragrunt_refuses_hand_written_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("backend.tf"), "hand-written").unwrap();
        let file = gen("backend.tf", "overwrite_terragrunt", "new contents");
        assert!(matches!(write_generated_file(dir.path(), &file), Err(CodegenError::NotOwned { .. })));
    }

    #[test]
    fn overwrite_terragrunt_allows_owned_file() {
        let dir = tempdir().unwrap();
        let prefix = crate::constants::GENERATED_FILE_COMMENT_PREFIX;
        fs::write(dir.path().join("backend.tf"), format!("{prefix}\nold contents")).unwrap();
        let file = gen("backend.tf", "overwrite_terragrunt", "new contents");
        assert!(write_generated_file(dir.path(), &file).unwrap());
        assert!(fs::read_to_string(dir.path().join("backend.tf")).unwrap().contains("new contents"));
    }
}
