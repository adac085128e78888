//! Thin layer over `hcl-rs`: turns raw unit-configuration text into the
//! *unevaluated* block structures C2 operates on. Syntax errors surface here
//! as `ConfigError::Parse`; everything past this point is semantics we own
//! (Non-goal: "the HCL-family parser library" is an external collaborator,
//! specified only at its interface — we call `hcl::parse` and walk the
//! resulting `hcl::Body`, we do not reimplement HCL grammar).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hcl::Expression;

use crate::config::error::ConfigError;
use crate::errors::SourcePos;

#[derive(Debug, Clone, Default)]
pub struct RawHook {
    pub label: String,
    pub commands: Vec<String>,
    pub execute: Vec<String>,
    pub run_on_error: bool,
    pub working_dir: Option<String>,
    pub if_expr: Option<Expression>,
    pub on_errors: Vec<String>,
    pub suppress_output: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RawExtraArguments {
    pub label: String,
    pub commands: Vec<String>,
    pub arguments: Vec<String>,
    pub required_var_files: Vec<String>,
    pub optional_var_files: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawTerraformBlock {
    pub source: Option<Expression>,
    pub extra_arguments: Vec<RawExtraArguments>,
    pub before_hooks: Vec<RawHook>,
    pub after_hooks: Vec<RawHook>,
    pub error_hooks: Vec<RawHook>,
    pub copy_terraform_lock_file: Option<Expression>,
    pub include_in_copy: Option<Vec<String>>,
    pub exclude_from_copy: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct RawDependencyBlock {
    pub name: String,
    pub config_path: Expression,
    pub mock_outputs: Option<Expression>,
    pub mock_outputs_allowed_commands: Vec<String>,
    pub mock_outputs_merge_strategy: Option<String>,
    pub enabled: Option<Expression>,
    pub skip: Option<Expression>,
    pub inputs: Option<Expression>,
}

#[derive(Debug, Clone, Default)]
pub struct RawDependenciesBlock {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RawGenerateBlock {
    pub label: String,
    pub path: Expression,
    pub if_exists: String,
    pub contents: Expression,
    pub comment_prefix: Option<String>,
    pub disable_signature: bool,
}

#[derive(Debug, Clone)]
pub struct RawIncludeBlock {
    pub label: String,
    pub path: Expression,
    pub merge_strategy: Option<String>,
    pub expose: bool,
}

#[derive(Debug, Clone)]
pub struct RawFeatureBlock {
    pub label: String,
    pub default: Option<Expression>,
}

#[derive(Debug, Clone, Default)]
pub struct RawUnitFile {
    pub path: PathBuf,
    pub terraform: Option<RawTerraformBlock>,
    pub remote_state: Option<Expression>,
    pub dependencies: Vec<RawDependencyBlock>,
    pub dependencies_block: Option<RawDependenciesBlock>,
    pub generate: Vec<RawGenerateBlock>,
    pub includes: Vec<RawIncludeBlock>,
    /// Ordered so a topological-by-declaration-order pass can fall back to
    /// declaration order when there's no cross-reference between locals.
    pub locals: Vec<(String, Expression)>,
    pub inputs: Option<Expression>,
    pub features: Vec<RawFeatureBlock>,
    pub download_dir: Option<Expression>,
    pub iam_role: Option<Expression>,
    pub iam_assume_role_duration: Option<Expression>,
    pub iam_assume_role_session_name: Option<Expression>,
    pub terraform_binary: Option<Expression>,
    pub terraform_version_constraint: Option<Expression>,
    pub prevent_destroy: Option<Expression>,
    pub skip: Option<Expression>,
    pub disabled: Option<Expression>,
}

fn pos(path: &Path) -> SourcePos {
    SourcePos { file: path.to_path_buf(), line: 0, column: 0 }
}

fn str_attr(body: &hcl::Body, key: &str) -> Option<String> {
    body.attributes().find(|a| a.key.as_str() == key).and_then(|a| a.expr.as_str().map(str::to_string))
}

fn string_list_attr(body: &hcl::Body, key: &str) -> Option<Vec<String>> {
    body.attributes().find(|a| a.key.as_str() == key).and_then(|a| a.expr.as_array()).map(|arr| {
        arr.iter().filter_map(|e| e.as_str().map(str::to_string)).collect()
    })
}

fn bool_attr_expr(body: &hcl::Body, key: &str) -> Option<Expression> {
    body.attributes().find(|a| a.key.as_str() == key).map(|a| a.expr.clone())
}

fn parse_hook(block: &hcl::Block) -> RawHook {
    let label = block.labels.first().map(|l| l.as_str().to_string()).unwrap_or_default();
    let body = &block.body;
    RawHook {
        label,
        commands: string_list_attr(body, "commands").unwrap_or_default(),
        execute: string_list_attr(body, "execute").unwrap_or_default(),
        run_on_error: str_attr(body, "run_on_error").map(|s| s == "true").unwrap_or(false)
            || body
                .attributes()
                .find(|a| a.key.as_str() == "run_on_error")
                .and_then(|a| a.expr.as_bool())
                .unwrap_or(false),
        working_dir: str_attr(body, "working_dir"),
        if_expr: bool_attr_expr(body, "if"),
        on_errors: string_list_attr(body, "on_errors").unwrap_or_default(),
        suppress_output: body
            .attributes()
            .find(|a| a.key.as_str() == "suppress_output")
            .and_then(|a| a.expr.as_bool())
            .unwrap_or(false),
    }
}

fn parse_terraform_block(block: &hcl::Block) -> RawTerraformBlock {
    let body = &block.body;
    let mut tf = RawTerraformBlock {
        source: body.attributes().find(|a| a.key.as_str() == "source").map(|a| a.expr.clone()),
        copy_terraform_lock_file: bool_attr_expr(body, "copy_terraform_lock_file"),
        include_in_copy: string_list_attr(body, "include_in_copy"),
        exclude_from_copy: string_list_attr(body, "exclude_from_copy"),
        ..Default::default()
    };
    for b in body.blocks() {
        match b.identifier.as_str() {
            "before_hook" => tf.before_hooks.push(parse_hook(b)),
            "after_hook" => tf.after_hooks.push(parse_hook(b)),
            "error_hook" => tf.error_hooks.push(parse_hook(b)),
            "extra_arguments" => {
                let eb = &b.body;
                tf.extra_arguments.push(RawExtraArguments {
                    label: b.labels.first().map(|l| l.as_str().to_string()).unwrap_or_default(),
                    commands: string_list_attr(eb, "commands").unwrap_or_default(),
                    arguments: string_list_attr(eb, "arguments").unwrap_or_default(),
                    required_var_files: string_list_attr(eb, "required_var_files").unwrap_or_default(),
                    optional_var_files: string_list_attr(eb, "optional_var_files").unwrap_or_default(),
                });
            }
            _ => {}
        }
    }
    tf
}

/// Parses raw HCL text into an unevaluated `RawUnitFile`. `file_path` is
/// used only for error reporting.
pub fn parse_unit_file(file_path: &Path, raw: &str) -> Result<RawUnitFile, ConfigError> {
    let body: hcl::Body = hcl::parse(raw).map_err(|e| ConfigError::parse(file_path, 0, 0, e.to_string()))?;

    let mut unit = RawUnitFile { path: file_path.to_path_buf(), ..Default::default() };

    unit.download_dir = body.attributes().find(|a| a.key.as_str() == "download_dir").map(|a| a.expr.clone());
    unit.iam_role = body.attributes().find(|a| a.key.as_str() == "iam_role").map(|a| a.expr.clone());
    unit.iam_assume_role_duration =
        body.attributes().find(|a| a.key.as_str() == "iam_assume_role_duration").map(|a| a.expr.clone());
    unit.iam_assume_role_session_name =
        body.attributes().find(|a| a.key.as_str() == "iam_assume_role_session_name").map(|a| a.expr.clone());
    unit.terraform_binary = body.attributes().find(|a| a.key.as_str() == "terraform_binary").map(|a| a.expr.clone());
    unit.terraform_version_constraint =
        body.attributes().find(|a| a.key.as_str() == "terraform_version_constraint").map(|a| a.expr.clone());
    unit.prevent_destroy = body.attributes().find(|a| a.key.as_str() == "prevent_destroy").map(|a| a.expr.clone());
    unit.skip = body.attributes().find(|a| a.key.as_str() == "skip").map(|a| a.expr.clone());
    unit.disabled = body.attributes().find(|a| a.key.as_str() == "disabled").map(|a| a.expr.clone());

    for block in body.blocks() {
        match block.identifier.as_str() {
            "terraform" => unit.terraform = Some(parse_terraform_block(block)),
            "remote_state" => {
                unit.remote_state = Some(Expression::Object(
                    block
                        .body
                        .attributes()
                        .map(|a| (hcl::ObjectKey::Identifier(a.key.as_str().into()), a.expr.clone()))
                        .collect(),
                ))
            }
            "dependency" => {
                let b = &block.body;
                unit.dependencies.push(RawDependencyBlock {
                    name: block.labels.first().map(|l| l.as_str().to_string()).unwrap_or_default(),
                    config_path: b
                        .attributes()
                        .find(|a| a.key.as_str() == "config_path")
                        .map(|a| a.expr.clone())
                        .ok_or_else(|| ConfigError::parse(file_path, 0, 0, "dependency block missing config_path"))?,
                    mock_outputs: b.attributes().find(|a| a.key.as_str() == "mock_outputs").map(|a| a.expr.clone()),
                    mock_outputs_allowed_commands: string_list_attr(b, "mock_outputs_allowed_commands")
                        .or_else(|| string_list_attr(b, "mock_outputs_allowed_terraform_commands"))
                        .unwrap_or_default(),
                    mock_outputs_merge_strategy: str_attr(b, "mock_outputs_merge_strategy_with_state"),
                    enabled: b.attributes().find(|a| a.key.as_str() == "enabled").map(|a| a.expr.clone()),
                    skip: b.attributes().find(|a| a.key.as_str() == "skip").map(|a| a.expr.clone()),
                    inputs: b.attributes().find(|a| a.key.as_str() == "inputs").map(|a| a.expr.clone()),
                });
            }
            "dependencies" => {
                unit.dependencies_block =
                    Some(RawDependenciesBlock { paths: string_list_attr(&block.body, "paths").unwrap_or_default() });
            }
            "generate" => {
                let b = &block.body;
                unit.generate.push(RawGenerateBlock {
                    label: block.labels.first().map(|l| l.as_str().to_string()).unwrap_or_default(),
                    path: b
                        .attributes()
                        .find(|a| a.key.as_str() == "path")
                        .map(|a| a.expr.clone())
                        .ok_or_else(|| ConfigError::parse(file_path, 0, 0, "generate block missing path"))?,
                    if_exists: str_attr(b, "if_exists").unwrap_or_else(|| "error_if_exists".to_string()),
                    contents: b
                        .attributes()
                        .find(|a| a.key.as_str() == "contents")
                        .map(|a| a.expr.clone())
                        .ok_or_else(|| ConfigError::parse(file_path, 0, 0, "generate block missing contents"))?,
                    comment_prefix: str_attr(b, "comment_prefix"),
                    disable_signature: b
                        .attributes()
                        .find(|a| a.key.as_str() == "disable_signature")
                        .and_then(|a| a.expr.as_bool())
                        .unwrap_or(false),
                });
            }
            "include" => {
                let b = &block.body;
                unit.includes.push(RawIncludeBlock {
                    label: block.labels.first().map(|l| l.as_str().to_string()).unwrap_or_else(|| "".to_string()),
                    path: b
                        .attributes()
                        .find(|a| a.key.as_str() == "path")
                        .map(|a| a.expr.clone())
                        .ok_or_else(|| ConfigError::parse(file_path, 0, 0, "include block missing path"))?,
                    merge_strategy: str_attr(b, "merge_strategy"),
                    expose: b.attributes().find(|a| a.key.as_str() == "expose").and_then(|a| a.expr.as_bool()).unwrap_or(false),
                });
            }
            "locals" => {
                for a in block.body.attributes() {
                    unit.locals.push((a.key.as_str().to_string(), a.expr.clone()));
                }
            }
            "inputs" => {
                unit.inputs = Some(Expression::Object(
                    block.body.attributes().map(|a| (hcl::ObjectKey::Identifier(a.key.as_str().into()), a.expr.clone())).collect(),
                ));
            }
            "feature" => {
                let b = &block.body;
                unit.features.push(RawFeatureBlock {
                    label: block.labels.first().map(|l| l.as_str().to_string()).unwrap_or_default(),
                    default: b.attributes().find(|a| a.key.as_str() == "default").map(|a| a.expr.clone()),
                });
            }
            other => {
                return Err(ConfigError::parse(file_path, 0, 0, format!("unknown top-level block '{other}'")));
            }
        }
    }

    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_unit() {
        let raw = r#"
            terraform {
              source = "git::example.com/module.git"
            }

            dependency "vpc" {
              config_path = "../vpc"
              mock_outputs = {
                vpc_id = "vpc-mock"
              }
              mock_outputs_allowed_commands = ["plan"]
            }

            inputs = {
              name = "hello"
            }
        "#;
        let unit = parse_unit_file(Path::new("unit/terragrunt.hcl"), raw).unwrap();
        assert!(unit.terraform.is_some());
        assert_eq!(unit.dependencies.len(), 1);
        assert_eq!(unit.dependencies[0].name, "vpc");
        assert!(unit.inputs.is_some());
    }

    #[test]
    fn rejects_unknown_top_level_block() {
        let raw = "bogus_block {}\n";
        let err = parse_unit_file(Path::new("x/terragrunt.hcl"), raw).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
