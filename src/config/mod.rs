//! C2 — Config Parser & Evaluator.

pub mod cache;
pub mod context;
pub mod error;
pub mod eval;
pub mod functions;
pub mod parser;
pub mod sops;
pub mod value;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use context::{EvalContext, IncludeFrame};
pub use error::ConfigError;
pub use value::Value;

use crate::config::parser::{RawDependenciesBlock, RawDependencyBlock, RawGenerateBlock};

#[derive(Debug, Clone)]
pub struct Hook {
    pub label: String,
    pub commands: Vec<String>,
    pub execute: Vec<String>,
    pub run_on_error: bool,
    pub working_dir: Option<String>,
    pub enabled: bool,
    pub on_errors: Vec<String>,
    pub suppress_output: bool,
}

#[derive(Debug, Clone)]
pub struct ExtraArguments {
    pub label: String,
    pub commands: Vec<String>,
    pub arguments: Vec<String>,
    pub required_var_files: Vec<String>,
    pub optional_var_files: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TerraformBlock {
    pub source: Option<String>,
    pub extra_arguments: Vec<ExtraArguments>,
    pub before_hooks: Vec<Hook>,
    pub after_hooks: Vec<Hook>,
    pub error_hooks: Vec<Hook>,
    pub copy_terraform_lock_file: bool,
    pub include_in_copy: Option<Vec<String>>,
    pub exclude_from_copy: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub config_path: PathBuf,
    pub mock_outputs: Value,
    pub mock_outputs_allowed_commands: Vec<String>,
    pub enabled: bool,
    pub skip: bool,
    pub extra_inputs: Value,
}

#[derive(Debug, Clone)]
pub struct GenerateFile {
    pub label: String,
    pub path: String,
    pub if_exists: String,
    pub contents: String,
    pub comment_prefix: String,
    pub disable_signature: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteState {
    pub backend: String,
    pub config: BTreeMap<String, Value>,
    pub generate: Option<(String, String)>,
    pub disable_init: bool,
}

/// The fully evaluated, per-unit configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub unit_path: PathBuf,
    pub terraform: TerraformBlock,
    pub remote_state: Option<RemoteState>,
    pub dependencies: Vec<Dependency>,
    pub dependencies_paths: Vec<PathBuf>,
    pub generate: Vec<GenerateFile>,
    pub inputs: Value,
    pub locals: BTreeMap<String, Value>,
    pub download_dir: String,
    pub iam_role: Option<String>,
    pub terraform_binary: String,
    pub terraform_version_constraint: Option<String>,
    pub prevent_destroy: bool,
    pub skip: bool,
    pub disabled: bool,
    /// This unit's own file plus every file its evaluation transitively read;
    /// see `eval::EvaluatedUnit::reads`.
    pub reads: Vec<PathBuf>,
}

/// Parses and fully evaluates a unit configuration file, producing a
/// `Config`. This is the entry point the rest of the engine (C3/C5/C9) calls.
pub fn parse(path: &Path, ctx: EvalContext) -> Result<Config, ConfigError> {
    // Each top-level unit gets its own reads accumulator; `ctx` may otherwise
    // carry a shared one inherited from a caller's `base_context`.
    let ctx = EvalContext { reads: Default::default(), ..ctx };
    let evaluated = eval::evaluate_file(path, ctx.clone())?;
    let unit_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let file_ctx = EvalContext { terragrunt_dir: unit_dir.clone(), ..ctx };
    let raw = &evaluated.raw;
    let scope = &evaluated.scope;

    // Already merged with every parent this unit `include`s (extra_arguments
    // by label, hooks concatenated parent-then-child); see `eval::evaluate_file`.
    let terraform = evaluated.terraform.clone();

    let remote_state = match &raw.remote_state {
        Some(expr) => {
            let value = eval::eval_expr(expr, &file_ctx, scope, path)?;
            let map = value.as_map().cloned().unwrap_or_default();
            let backend = map.get("backend").and_then(Value::as_str).unwrap_or_default().to_string();
            let config = map.get("config").and_then(Value::as_map).cloned().unwrap_or_default();
            let disable_init = map.get("disable_init").map(Value::is_truthy).unwrap_or(false);
            let generate = map.get("generate").and_then(Value::as_map).and_then(|g| {
                let path = g.get("path").and_then(Value::as_str)?.to_string();
                let if_exists = g.get("if_exists").and_then(Value::as_str)?.to_string();
                Some((path, if_exists))
            });
            Some(RemoteState { backend, config, generate, disable_init })
        }
        None => None,
    };

    let mut dependencies = Vec::new();
    for dep in &raw.dependencies {
        dependencies.push(dependency_from_raw(dep, &file_ctx, scope, path)?);
    }

    let dependencies_paths = raw
        .dependencies_block
        .as_ref()
        .map(|d: &RawDependenciesBlock| d.paths.iter().map(|p| unit_dir.join(p)).collect())
        .unwrap_or_default();

    let mut generate = Vec::new();
    for g in &raw.generate {
        generate.push(generate_from_raw(g, &file_ctx, scope, path)?);
    }

    Ok(Config {
        unit_path: unit_dir,
        terraform,
        remote_state,
        dependencies,
        dependencies_paths,
        generate,
        inputs: evaluated.inputs,
        locals: scope.locals.clone(),
        download_dir: evaluated.download_dir.unwrap_or_else(|| crate::constants::DEFAULT_DOWNLOAD_DIR.to_string()),
        iam_role: match &raw.iam_role {
            Some(e) => eval::eval_expr(e, &file_ctx, scope, path)?.as_str().map(str::to_string),
            None => None,
        },
        terraform_binary: evaluated.terraform_binary.unwrap_or_else(|| crate::constants::DEFAULT_ENGINE_BINARY.to_string()),
        terraform_version_constraint: match &raw.terraform_version_constraint {
            Some(e) => eval::eval_expr(e, &file_ctx, scope, path)?.as_str().map(str::to_string),
            None => None,
        },
        prevent_destroy: evaluated.prevent_destroy,
        skip: evaluated.skip,
        disabled: evaluated.disabled,
        reads: evaluated.reads,
    })
}

fn dependency_from_raw(
    dep: &RawDependencyBlock,
    ctx: &EvalContext,
    scope: &eval::Scope,
    file: &Path,
) -> Result<Dependency, ConfigError> {
    let config_path_val = eval::eval_expr(&dep.config_path, ctx, scope, file)?;
    let config_path_str = config_path_val.as_str().ok_or_else(|| ConfigError::eval(file, "dependency.config_path must be a string"))?;
    let config_path = {
        let p = PathBuf::from(config_path_str);
        if p.is_absolute() { p } else { ctx.terragrunt_dir.join(p) }
    };
    Ok(Dependency {
        name: dep.name.clone(),
        config_path,
        mock_outputs: match &dep.mock_outputs {
            Some(e) => eval::eval_expr(e, ctx, scope, file)?,
            None => Value::Map(BTreeMap::new()),
        },
        mock_outputs_allowed_commands: dep.mock_outputs_allowed_commands.clone(),
        enabled: match &dep.enabled {
            Some(e) => eval::eval_expr(e, ctx, scope, file)?.is_truthy(),
            None => true,
        },
        skip: match &dep.skip {
            Some(e) => eval::eval_expr(e, ctx, scope, file)?.is_truthy(),
            None => false,
        },
        extra_inputs: match &dep.inputs {
            Some(e) => eval::eval_expr(e, ctx, scope, file)?,
            None => Value::Map(BTreeMap::new()),
        },
    })
}

fn generate_from_raw(
    g: &RawGenerateBlock,
    ctx: &EvalContext,
    scope: &eval::Scope,
    file: &Path,
) -> Result<GenerateFile, ConfigError> {
    let path = eval::eval_expr(&g.path, ctx, scope, file)?.as_str().unwrap_or_default().to_string();
    let contents = eval::eval_expr(&g.contents, ctx, scope, file)?.as_str().unwrap_or_default().to_string();
    Ok(GenerateFile {
        label: g.label.clone(),
        path,
        if_exists: g.if_exists.clone(),
        contents,
        comment_prefix: g.comment_prefix.clone().unwrap_or_else(|| crate::constants::GENERATED_FILE_COMMENT_PREFIX.to_string()),
        disable_signature: g.disable_signature,
    })
}
