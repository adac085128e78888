//! Expression evaluation and the fixed evaluation order from C2:
//!
//! 1. Evaluate `locals` (topologically, using only built-ins and other locals).
//! 2. Resolve `include` paths; recursively evaluate parents; deep-merge.
//! 3. Evaluate `feature` defaults and apply CLI/env overrides.
//! 4. Evaluate `dependency` blocks (config_path, enabled/skip, mock_outputs);
//!    outputs themselves are resolved later, by C12.
//! 5. Evaluate `inputs`, `terraform`, `remote_state`, `generate`, scalars.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hcl::{Expression, ObjectKey, Traversal, TraversalOperator};

use crate::config::context::{EvalContext, IncludeFrame};
use crate::config::error::ConfigError;
use crate::config::functions;
use crate::config::parser::{self, RawDependencyBlock, RawFeatureBlock, RawHook, RawTerraformBlock, RawUnitFile};
use crate::config::sops;
use crate::config::value::Value;
use crate::config::{ExtraArguments, Hook, TerraformBlock};
use crate::errors::SourcePos;

/// Values already resolved for the current unit file, threaded through
/// expression evaluation: `locals.X`, `dependency.NAME.outputs.*` (mocked or
/// real), `include.LABEL.*` (only when `expose = true`), and `feature.NAME`.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub locals: BTreeMap<String, Value>,
    pub dependency_outputs: BTreeMap<String, Value>,
    pub exposed_includes: BTreeMap<String, Value>,
    pub features: BTreeMap<String, Value>,
}

fn pos(file: &Path) -> SourcePos {
    SourcePos { file: file.to_path_buf(), line: 0, column: 0 }
}

/// Evaluates a single `hcl::Expression` to a `Value` given the current scope.
pub fn eval_expr(expr: &Expression, ctx: &EvalContext, scope: &Scope, file: &Path) -> Result<Value, ConfigError> {
    match expr {
        Expression::Null => Ok(Value::Null),
        Expression::Bool(b) => Ok(Value::Bool(*b)),
        Expression::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or_default())),
        Expression::String(s) => Ok(Value::String(s.clone())),
        Expression::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, ctx, scope, file)?);
            }
            Ok(Value::List(out))
        }
        Expression::Object(entries) => {
            let mut out = BTreeMap::new();
            for (k, v) in entries {
                let key = object_key_to_string(k, ctx, scope, file)?;
                out.insert(key, eval_expr(v, ctx, scope, file)?);
            }
            Ok(Value::Map(out))
        }
        Expression::Parenthesis(inner) => eval_expr(inner, ctx, scope, file),
        Expression::Traversal(traversal) => eval_traversal(traversal, ctx, scope, file),
        Expression::FuncCall(call) => eval_func_call(&call.name, &call.args, ctx, scope, file),
        Expression::Variable(var) => resolve_bare_variable(var.as_str(), ctx, scope, file),
        other => Err(ConfigError::eval(file, format!("unsupported expression form: {other:?}"))),
    }
}

fn object_key_to_string(key: &ObjectKey, ctx: &EvalContext, scope: &Scope, file: &Path) -> Result<String, ConfigError> {
    match key {
        ObjectKey::Identifier(id) => Ok(id.as_str().to_string()),
        ObjectKey::Expression(expr) => Ok(eval_expr(expr, ctx, scope, file)?.to_string()),
    }
}

fn resolve_bare_variable(name: &str, ctx: &EvalContext, scope: &Scope, file: &Path) -> Result<Value, ConfigError> {
    match name {
        "local" | "locals" => Ok(Value::Map(scope.locals.clone())),
        "dependency" => Ok(Value::Map(scope.dependency_outputs.clone())),
        "include" => Ok(Value::Map(scope.exposed_includes.clone())),
        "feature" => Ok(Value::Map(scope.features.clone())),
        other => Err(ConfigError::eval(file, format!("undefined reference: {other}"))),
    }
}

fn eval_traversal(t: &Traversal, ctx: &EvalContext, scope: &Scope, file: &Path) -> Result<Value, ConfigError> {
    let mut current = eval_expr(&t.expr, ctx, scope, file)?;
    for op in &t.operators {
        current = match op {
            TraversalOperator::GetAttr(name) => match current {
                Value::Map(mut m) => m.remove(name.as_str()).ok_or_else(|| {
                    ConfigError::eval(file, format!("undefined reference: .{}", name.as_str()))
                })?,
                other => return Err(ConfigError::eval(file, format!("cannot access .{} on a {}", name.as_str(), other.type_name()))),
            },
            TraversalOperator::Index(idx_expr) => {
                let idx = eval_expr(idx_expr, ctx, scope, file)?;
                match (current, idx) {
                    (Value::List(list), Value::Number(n)) => {
                        let i = n as usize;
                        list.into_iter().nth(i).ok_or_else(|| ConfigError::eval(file, format!("index {i} out of range")))?
                    }
                    (Value::Map(mut m), Value::String(k)) => {
                        m.remove(&k).ok_or_else(|| ConfigError::eval(file, format!("undefined key: {k}")))?
                    }
                    (other, _) => return Err(ConfigError::eval(file, format!("cannot index a {}", other.type_name()))),
                }
            }
            TraversalOperator::LegacyIndex(i) => match current {
                Value::List(list) => list
                    .into_iter()
                    .nth(*i as usize)
                    .ok_or_else(|| ConfigError::eval(file, format!("index {i} out of range")))?,
                other => return Err(ConfigError::eval(file, format!("cannot index a {}", other.type_name()))),
            },
            _ => return Err(ConfigError::eval(file, "unsupported traversal operator (splat)")),
        };
    }
    Ok(current)
}

fn eval_func_call(name: &str, args: &[Expression], ctx: &EvalContext, scope: &Scope, file: &Path) -> Result<Value, ConfigError> {
    let p = pos(file);
    let mut evaluated = Vec::with_capacity(args.len());
    for a in args {
        evaluated.push(eval_expr(a, ctx, scope, file)?);
    }
    let as_str = |i: usize, fname: &str| -> Result<String, ConfigError> {
        evaluated
            .get(i)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::Function { pos: p.clone(), function: fname.to_string(), message: format!("argument {i} must be a string") })
    };

    match name {
        "find_in_parent_folders" => functions::find_in_parent_folders(ctx, evaluated.first().and_then(Value::as_str), &p),
        "path_relative_to_include" => functions::path_relative_to_include(ctx, &p),
        "path_relative_from_include" => functions::path_relative_from_include(ctx, &p),
        "get_terragrunt_dir" => Ok(functions::get_terragrunt_dir(ctx)),
        "get_parent_terragrunt_dir" => functions::get_parent_terragrunt_dir(ctx, &p),
        "get_working_dir" => Ok(functions::get_working_dir(ctx)),
        "get_repo_root" => Ok(functions::get_repo_root(ctx)),
        "get_path_from_repo_root" => Ok(functions::get_path_from_repo_root(ctx)),
        "get_path_to_repo_root" => Ok(functions::get_path_to_repo_root(ctx)),
        "get_terraform_commands_that_need_vars" => Ok(functions::get_terraform_commands_that_need_vars()),
        "get_terragrunt_source_cli_flag" => Ok(functions::get_terragrunt_source_cli_flag(ctx)),
        "get_platform" => Ok(functions::get_platform()),
        "get_env" => {
            let key = as_str(0, "get_env")?;
            let default = evaluated.get(1).and_then(Value::as_str);
            Ok(functions::get_env(ctx, &key, default))
        }
        "run_cmd" => {
            let args: Vec<String> = evaluated.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
            functions::run_cmd(&args, &p)
        }
        "read_terragrunt_config" => {
            let raw_path = as_str(0, "read_terragrunt_config")?;
            let target = functions::resolve_read_terragrunt_config_path(ctx, &raw_path);
            let merged = evaluate_file(&target, ctx.clone())?;
            Ok(Value::from(serde_json::to_value(&merged.inputs).unwrap_or(serde_json::Value::Null)))
        }
        "sops_decrypt_file" => {
            let raw_path = as_str(0, "sops_decrypt_file")?;
            let path = PathBuf::from(&raw_path);
            let resolved = if path.is_absolute() { path } else { ctx.terragrunt_dir.join(path) };
            ctx.reads.borrow_mut().push(resolved.clone());
            Ok(Value::String(sops::sops_decrypt_file(&resolved, &p)?))
        }
        "startswith" => Ok(functions::startswith(&as_str(0, name)?, &as_str(1, name)?)),
        "endswith" => Ok(functions::endswith(&as_str(0, name)?, &as_str(1, name)?)),
        "strcontains" => Ok(functions::strcontains(&as_str(0, name)?, &as_str(1, name)?)),
        "timecmp" => functions::timecmp(&as_str(0, name)?, &as_str(1, name)?, &p),
        other => Err(ConfigError::Function { pos: p, function: other.to_string(), message: "unknown built-in function".to_string() }),
    }
}

/// Topologically evaluates a unit's `locals` block: each local may reference
/// only built-ins and other locals declared anywhere in the same block,
/// never a later-declared local that itself depends on this one (a cycle is
/// an eval error, not a silent default).
pub fn eval_locals(raw: &[(String, Expression)], ctx: &EvalContext, file: &Path) -> Result<BTreeMap<String, Value>, ConfigError> {
    let mut resolved: BTreeMap<String, Value> = BTreeMap::new();
    let mut pending: BTreeMap<String, Expression> = raw.iter().cloned().collect();
    let mut in_progress: Vec<String> = Vec::new();

    fn resolve_one(
        name: &str,
        pending: &mut BTreeMap<String, Expression>,
        resolved: &mut BTreeMap<String, Value>,
        in_progress: &mut Vec<String>,
        ctx: &EvalContext,
        file: &Path,
    ) -> Result<(), ConfigError> {
        if resolved.contains_key(name) {
            return Ok(());
        }
        if in_progress.contains(&name.to_string()) {
            return Err(ConfigError::eval(file, format!("cyclic local reference involving '{name}'")));
        }
        let expr = match pending.remove(name) {
            Some(e) => e,
            None => return Err(ConfigError::eval(file, format!("undefined local: {name}"))),
        };
        in_progress.push(name.to_string());

        // Resolve dependent locals first by pre-scanning variable traversals
        // rooted at `local`/`locals`.
        let deps = collect_local_deps(&expr);
        for dep in deps {
            if pending.contains_key(&dep) {
                resolve_one(&dep, pending, resolved, in_progress, ctx, file)?;
            }
        }

        let scope = Scope { locals: resolved.clone(), ..Default::default() };
        let value = eval_expr(&expr, ctx, &scope, file)?;
        resolved.insert(name.to_string(), value);
        in_progress.retain(|n| n != name);
        Ok(())
    }

    let names: Vec<String> = raw.iter().map(|(k, _)| k.clone()).collect();
    for name in &names {
        if pending.contains_key(name) {
            resolve_one(name, &mut pending, &mut resolved, &mut in_progress, ctx, file)?;
        }
    }
    Ok(resolved)
}

fn collect_local_deps(expr: &Expression) -> Vec<String> {
    let mut deps = Vec::new();
    walk_collect_traversals(expr, &mut deps);
    deps
}

fn walk_collect_traversals(expr: &Expression, out: &mut Vec<String>) {
    match expr {
        Expression::Traversal(t) => {
            if let Expression::Variable(v) = t.expr.as_ref() {
                if v.as_str() == "local" || v.as_str() == "locals" {
                    if let Some(TraversalOperator::GetAttr(name)) = t.operators.first() {
                        out.push(name.as_str().to_string());
                    }
                }
            }
            walk_collect_traversals(&t.expr, out);
        }
        Expression::Array(items) => items.iter().for_each(|i| walk_collect_traversals(i, out)),
        Expression::Object(entries) => entries.iter().for_each(|(_, v)| walk_collect_traversals(v, out)),
        Expression::Parenthesis(inner) => walk_collect_traversals(inner, out),
        Expression::FuncCall(call) => call.args.iter().for_each(|a| walk_collect_traversals(a, out)),
        _ => {}
    }
}

/// The fully evaluated configuration for one unit, see `config::Config`.
pub struct EvaluatedUnit {
    pub raw: RawUnitFile,
    pub scope: Scope,
    pub inputs: Value,
    /// This file's `terraform` block merged with every parent it `include`s:
    /// `extra_arguments` merged by label (child wins), hooks concatenated
    /// parent-then-child. See `merge_terraform`.
    pub terraform: TerraformBlock,
    pub prevent_destroy: bool,
    pub skip: bool,
    pub disabled: bool,
    pub download_dir: Option<String>,
    pub terraform_binary: Option<String>,
    /// This unit's own file plus every file its evaluation transitively read
    /// (includes, `read_terragrunt_config`, `sops_decrypt_file`), in read
    /// order. Feeds `--queue-include-units-reading` / the `reading=` filter.
    pub reads: Vec<PathBuf>,
}

fn hook_from_raw(raw: &RawHook, ctx: &EvalContext, scope: &Scope, file: &Path) -> Result<Hook, ConfigError> {
    let enabled = match &raw.if_expr {
        Some(expr) => eval_expr(expr, ctx, scope, file)?.is_truthy(),
        None => true,
    };
    Ok(Hook {
        label: raw.label.clone(),
        commands: raw.commands.clone(),
        execute: raw.execute.clone(),
        run_on_error: raw.run_on_error,
        working_dir: raw.working_dir.clone(),
        enabled,
        on_errors: raw.on_errors.clone(),
        suppress_output: raw.suppress_output,
    })
}

/// Evaluates this file's own `terraform` block (not merged with any parent).
fn eval_terraform_block(raw: Option<&RawTerraformBlock>, ctx: &EvalContext, scope: &Scope, path: &Path) -> Result<TerraformBlock, ConfigError> {
    let Some(t) = raw else { return Ok(TerraformBlock::default()) };

    let mut before_hooks = Vec::new();
    for h in &t.before_hooks {
        before_hooks.push(hook_from_raw(h, ctx, scope, path)?);
    }
    let mut after_hooks = Vec::new();
    for h in &t.after_hooks {
        after_hooks.push(hook_from_raw(h, ctx, scope, path)?);
    }
    let mut error_hooks = Vec::new();
    for h in &t.error_hooks {
        error_hooks.push(hook_from_raw(h, ctx, scope, path)?);
    }

    Ok(TerraformBlock {
        source: match &t.source {
            Some(e) => eval_expr(e, ctx, scope, path)?.as_str().map(str::to_string),
            None => None,
        },
        extra_arguments: t
            .extra_arguments
            .iter()
            .map(|e| ExtraArguments {
                label: e.label.clone(),
                commands: e.commands.clone(),
                arguments: e.arguments.clone(),
                required_var_files: e.required_var_files.clone(),
                optional_var_files: e.optional_var_files.clone(),
            })
            .collect(),
        before_hooks,
        after_hooks,
        error_hooks,
        copy_terraform_lock_file: match &t.copy_terraform_lock_file {
            Some(e) => eval_expr(e, ctx, scope, path)?.is_truthy(),
            None => true,
        },
        include_in_copy: t.include_in_copy.clone(),
        exclude_from_copy: t.exclude_from_copy.clone(),
    })
}

/// Merges a parent's already-evaluated `terraform` block with an overlay
/// (a child `include`, or this file's own block): `extra_arguments` merge
/// by label with the overlay winning on conflicts, hooks concatenate
/// parent then overlay preserving declaration order, and every other field
/// is taken from the overlay when set, else inherited from the parent.
fn merge_terraform(parent: TerraformBlock, overlay: TerraformBlock) -> TerraformBlock {
    let mut extra_arguments = parent.extra_arguments;
    for arg in overlay.extra_arguments {
        match extra_arguments.iter().position(|e| e.label == arg.label) {
            Some(pos) => extra_arguments[pos] = arg,
            None => extra_arguments.push(arg),
        }
    }

    let mut before_hooks = parent.before_hooks;
    before_hooks.extend(overlay.before_hooks);
    let mut after_hooks = parent.after_hooks;
    after_hooks.extend(overlay.after_hooks);
    let mut error_hooks = parent.error_hooks;
    error_hooks.extend(overlay.error_hooks);

    TerraformBlock {
        source: overlay.source.or(parent.source),
        extra_arguments,
        before_hooks,
        after_hooks,
        error_hooks,
        copy_terraform_lock_file: overlay.copy_terraform_lock_file,
        include_in_copy: overlay.include_in_copy.or(parent.include_in_copy),
        exclude_from_copy: overlay.exclude_from_copy.or(parent.exclude_from_copy),
    }
}

/// Recursively parses, includes, and evaluates a unit configuration file.
/// This is the entry point C2 exposes to C3 (discovery probes read-files)
/// and C9 (full evaluation before a run).
pub fn evaluate_file(path: &Path, mut ctx: EvalContext) -> Result<EvaluatedUnit, ConfigError> {
    let raw_text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io { path: path.to_path_buf(), source: e })?;
    let raw = parser::parse_unit_file(path, &raw_text)?;
    ctx.terragrunt_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    ctx.reads.borrow_mut().push(path.to_path_buf());

    // 1. locals
    let locals = eval_locals(&raw.locals, &ctx, path)?;
    let mut scope = Scope { locals, ..Default::default() };

    // 2. includes: resolve each include path, recursively evaluate, deep
    // merge child over parent (parent first, child overrides). An earlier
    // include wins conflicts over a later one, same as a later-declared
    // include losing to an earlier one for `inputs`.
    let mut merged_inputs = Value::Map(BTreeMap::new());
    let mut merged_terraform: Option<TerraformBlock> = None;
    for include in &raw.includes {
        let include_path_val = eval_expr(&include.path, &ctx, &scope, path)?;
        let include_path = include_path_val
            .as_str()
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::Include { pos: pos(path), message: "include.path did not evaluate to a string".into() })?;
        let include_path = if include_path.is_absolute() { include_path } else { ctx.terragrunt_dir.join(include_path) };

        let frame = IncludeFrame { label: include.label.clone(), config_path: include_path.clone() };
        let child_ctx = ctx.child_for_include(frame);
        let parent = evaluate_file(&include_path, child_ctx)
            .map_err(|e| ConfigError::Include { pos: pos(path), message: format!("evaluating include '{}': {e}", include.label) })?;

        merged_inputs = parent.inputs.deep_merge(merged_inputs);
        merged_terraform = Some(match merged_terraform {
            None => parent.terraform,
            Some(acc) => merge_terraform(parent.terraform, acc),
        });
        if include.expose {
            scope.exposed_includes.insert(include.label.clone(), Value::Map(parent.scope.locals.clone()));
        }
    }

    // 3. feature defaults + overrides
    let mut feature_errors = Vec::new();
    for feature in &raw.features {
        let default = match &feature.default {
            Some(expr) => Some(eval_expr(expr, &ctx, &scope, path)?),
            None => None,
        };
        let value = match ctx.feature_overrides.get(&feature.label).cloned().or(default) {
            Some(v) => v,
            None => {
                feature_errors.push(feature.label.clone());
                Value::Null
            }
        };
        scope.features.insert(feature.label.clone(), value);
    }
    if !feature_errors.is_empty() {
        return Err(ConfigError::Feature { flags: feature_errors });
    }

    // 4. dependency blocks: config_path / enabled / skip / mock_outputs only;
    // outputs are resolved later by the dependency resolver + output cache.
    for dep in &raw.dependencies {
        let mock = match &dep.mock_outputs {
            Some(expr) => eval_expr(expr, &ctx, &scope, path)?,
            None => Value::Map(BTreeMap::new()),
        };
        scope.dependency_outputs.insert(dep.name.clone(), mock);
    }

    // 5. inputs / terraform / remote_state / generate / scalars
    let own_inputs = match &raw.inputs {
        Some(expr) => eval_expr(expr, &ctx, &scope, path)?,
        None => Value::Map(BTreeMap::new()),
    };
    let inputs = merged_inputs.deep_merge(own_inputs);

    // A unit with no `terraform` block of its own inherits the merged
    // parent's block unchanged (hooks and extra_arguments included); one
    // that does declare a block merges its own on top.
    let terraform = match (merged_terraform, &raw.terraform) {
        (None, None) => TerraformBlock::default(),
        (None, Some(_)) => eval_terraform_block(raw.terraform.as_ref(), &ctx, &scope, path)?,
        (Some(parent), None) => parent,
        (Some(parent), Some(_)) => merge_terraform(parent, eval_terraform_block(raw.terraform.as_ref(), &ctx, &scope, path)?),
    };

    let prevent_destroy = match &raw.prevent_destroy {
        Some(expr) => eval_expr(expr, &ctx, &scope, path)?.is_truthy(),
        None => false,
    };
    let skip = match &raw.skip {
        Some(expr) => eval_expr(expr, &ctx, &scope, path)?.is_truthy(),
        None => false,
    };
    let disabled = match &raw.disabled {
        Some(expr) => eval_expr(expr, &ctx, &scope, path)?.is_truthy(),
        None => false,
    };
    let download_dir = match &raw.download_dir {
        Some(expr) => eval_expr(expr, &ctx, &scope, path)?.as_str().map(str::to_string),
        None => None,
    };
    let terraform_binary = match &raw.terraform_binary {
        Some(expr) => eval_expr(expr, &ctx, &scope, path)?.as_str().map(str::to_string),
        None => None,
    };

    let reads = ctx.reads.borrow().clone();
    Ok(EvaluatedUnit { raw, scope, inputs, terraform, prevent_destroy, skip, disabled, download_dir, terraform_binary, reads })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_ctx(dir: &Path) -> EvalContext {
        EvalContext {
            terragrunt_dir: dir.to_path_buf(),
            working_dir: dir.to_path_buf(),
            repo_root: dir.to_path_buf(),
            include_stack: vec![],
            feature_overrides: BTreeMap::new(),
            env: BTreeMap::new(),
            terraform_binary: "tofu".to_string(),
            current_command: "plan".to_string(),
            source_cli_flag: None,
            reads: Default::default(),
        }
    }

    #[test]
    fn locals_evaluate_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let raw = vec![
            ("b".to_string(), Expression::Traversal(Box::new(Traversal {
                expr: Expression::Variable("local".into()),
                operators: vec![TraversalOperator::GetAttr("a".into())].into(),
            }))),
            ("a".to_string(), Expression::Number(1.into())),
        ];
        let ctx = test_ctx(dir.path());
        let locals = eval_locals(&raw, &ctx, dir.path()).unwrap();
        assert_eq!(locals.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(locals.get("b"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn missing_feature_default_and_override_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("terragrunt.hcl");
        let mut f = std::fs::File::create(&file).unwrap();
        writeln!(f, "feature \"x\" {{}}").unwrap();
        let ctx = test_ctx(dir.path());
        let err = evaluate_file(&file, ctx).unwrap_err();
        assert!(matches!(err, ConfigError::Feature { .. }));
    }

    #[test]
    fn inputs_merge_child_wins() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("parent.hcl");
        std::fs::write(&parent, r#"inputs = { a = "parent", nested = { x = "parent" } }"#).unwrap();
        let child = dir.path().join("terragrunt.hcl");
        std::fs::write(
            &child,
            format!(
                r#"
                include "root" {{
                  path = "{}"
                }}
                inputs = {{ nested = {{ y = "child" }} }}
                "#,
                parent.display()
            ),
        )
        .unwrap();
        let ctx = test_ctx(dir.path());
        let evaluated = evaluate_file(&child, ctx).unwrap();
        let map = evaluated.inputs.as_map().unwrap();
        assert_eq!(map.get("a"), Some(&Value::String("parent".into())));
        let nested = map.get("nested").unwrap().as_map().unwrap();
        assert_eq!(nested.get("x"), Some(&Value::String("parent".into())));
        assert_eq!(nested.get("y"), Some(&Value::String("child".into())));
    }

    #[test]
    fn terraform_hooks_and_extra_arguments_merge_across_include() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("parent.hcl");
        std::fs::write(
            &parent,
            r#"
            terraform {
              before_hook "parent_init" {
                commands = ["apply"]
                execute = ["echo", "parent"]
              }
              extra_arguments "vars" {
                commands = ["plan", "apply"]
                arguments = ["-var-file=parent.tfvars"]
              }
            }
            "#,
        )
        .unwrap();
        let child = dir.path().join("terragrunt.hcl");
        std::fs::write(
            &child,
            format!(
                r#"
                include "root" {{
                  path = "{}"
                }}
                terraform {{
                  before_hook "child_init" {{
                    commands = ["apply"]
                    execute = ["echo", "child"]
                  }}
                  extra_arguments "vars" {{
                    commands = ["plan", "apply"]
                    arguments = ["-var-file=child.tfvars"]
                  }}
                }}
                "#,
                parent.display()
            ),
        )
        .unwrap();
        let ctx = test_ctx(dir.path());
        let evaluated = evaluate_file(&child, ctx).unwrap();

        let hook_labels: Vec<&str> = evaluated.terraform.before_hooks.iter().map(|h| h.label.as_str()).collect();
        assert_eq!(hook_labels, vec!["parent_init", "child_init"], "hooks concatenate parent then child");

        assert_eq!(evaluated.terraform.extra_arguments.len(), 1, "same label overrides rather than duplicating");
        assert_eq!(evaluated.terraform.extra_arguments[0].arguments, vec!["-var-file=child.tfvars".to_string()]);
    }

    #[test]
    fn terraform_block_inherited_wholesale_when_child_declares_none() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("parent.hcl");
        std::fs::write(
            &parent,
            r#"
            terraform {
              before_hook "parent_init" {
                commands = ["apply"]
                execute = ["echo", "parent"]
              }
            }
            "#,
        )
        .unwrap();
        let child = dir.path().join("terragrunt.hcl");
        std::fs::write(&child, format!(r#"include "root" {{ path = "{}" }}"#, parent.display())).unwrap();
        let ctx = test_ctx(dir.path());
        let evaluated = evaluate_file(&child, ctx).unwrap();

        assert_eq!(evaluated.terraform.before_hooks.len(), 1);
        assert_eq!(evaluated.terraform.before_hooks[0].label, "parent_init");
    }

    #[test]
    fn reads_cover_own_file_and_includes() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("parent.hcl");
        std::fs::write(&parent, r#"inputs = { a = "parent" }"#).unwrap();
        let child = dir.path().join("terragrunt.hcl");
        std::fs::write(
            &child,
            format!(r#"include "root" {{ path = "{}" }}"#, parent.display()),
        )
        .unwrap();
        let ctx = test_ctx(dir.path());
        let evaluated = evaluate_file(&child, ctx).unwrap();
        assert!(evaluated.reads.contains(&child));
        assert!(evaluated.reads.contains(&parent));
    }

    #[test]
    fn reads_cover_read_terragrunt_config_target() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("shared.hcl");
        std::fs::write(&other, r#"inputs = { shared = "value" }"#).unwrap();
        let child = dir.path().join("terragrunt.hcl");
        std::fs::write(
            &child,
            format!(r#"locals {{ shared = read_terragrunt_config("{}") }}"#, other.display()),
        )
        .unwrap();
        let ctx = test_ctx(dir.path());
        let evaluated = evaluate_file(&child, ctx).unwrap();
        assert!(evaluated.reads.contains(&other));
    }
}
