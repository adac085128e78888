use std::path::PathBuf;
use thiserror::Error;

use crate::errors::SourcePos;

/// C2's error taxonomy: "Classified into ParseError (syntax), EvalError
/// (undefined reference, wrong type), IncludeError, FeatureError,
/// FunctionError. The evaluator records the file path and HCL-style
/// position."
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse error in {pos}: {message}")]
    Parse { pos: SourcePos, message: String },

    #[error("eval error in {pos}: {message}")]
    Eval { pos: SourcePos, message: String },

    #[error("include error in {pos}: {message}")]
    Include { pos: SourcePos, message: String },

    #[error("feature flag(s) missing default and no override: {}", .flags.join(", "))]
    Feature { flags: Vec<String> },

    #[error("function error in {pos}: {function} failed: {message}")]
    Function { pos: SourcePos, function: String, message: String },

    #[error("io error reading {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

impl ConfigError {
    pub fn parse(file: &std::path::Path, line: usize, column: usize, message: impl Into<String>) -> Self {
        ConfigError::Parse { pos: SourcePos { file: file.to_path_buf(), line, column }, message: message.into() }
    }

    pub fn eval(file: &std::path::Path, message: impl Into<String>) -> Self {
        ConfigError::Eval { pos: SourcePos { file: file.to_path_buf(), line: 0, column: 0 }, message: message.into() }
    }
}
