//! Built-in functions. "names are contracts; an implementer must reproduce
//! them" — each function below is named, typed and behaves exactly as listed
//! in C2's language surface.

use std::path::{Path, PathBuf};

use crate::config::cache;
use crate::config::context::EvalContext;
use crate::config::error::ConfigError;
use crate::config::value::Value;
use crate::errors::SourcePos;

fn func_err(pos: &SourcePos, name: &str, msg: impl Into<String>) -> ConfigError {
    ConfigError::Function { pos: pos.clone(), function: name.to_string(), message: msg.into() }
}

/// `find_in_parent_folders(name?)` — walks up from `terragrunt_dir` looking
/// for a file named `name` (default: the canonical unit config filename).
pub fn find_in_parent_folders(ctx: &EvalContext, name: Option<&str>, pos: &SourcePos) -> Result<Value, ConfigError> {
    let filename = name.unwrap_or(crate::constants::UNIT_CONFIG_FILENAME);
    let mut dir = ctx.terragrunt_dir.parent().map(Path::to_path_buf);
    while let Some(d) = dir {
        let candidate = d.join(filename);
        if candidate.is_file() {
            return Ok(Value::String(candidate.to_string_lossy().into_owned()));
        }
        if d == ctx.repo_root {
            break;
        }
        dir = d.parent().map(Path::to_path_buf);
    }
    Err(func_err(pos, "find_in_parent_folders", format!("could not find {filename} in any parent folder")))
}

/// `path_relative_to_include()` — the unit's directory, relative to the
/// directory of the nearest `include` block currently being evaluated.
pub fn path_relative_to_include(ctx: &EvalContext, pos: &SourcePos) -> Result<Value, ConfigError> {
    let include = ctx.nearest_include().ok_or_else(|| func_err(pos, "path_relative_to_include", "not inside an include"))?;
    let include_dir = include.config_path.parent().unwrap_or(&include.config_path);
    let rel = pathdiff(&ctx.terragrunt_dir, include_dir);
    Ok(Value::String(rel.to_string_lossy().into_owned()))
}

/// `path_relative_from_include()` — the inverse: nearest include's directory
/// relative to the unit's directory.
pub fn path_relative_from_include(ctx: &EvalContext, pos: &SourcePos) -> Result<Value, ConfigError> {
    let include = ctx.nearest_include().ok_or_else(|| func_err(pos, "path_relative_from_include", "not inside an include"))?;
    let include_dir = include.config_path.parent().unwrap_or(&include.config_path);
    let rel = pathdiff(include_dir, &ctx.terragrunt_dir);
    Ok(Value::String(rel.to_string_lossy().into_owned()))
}

pub fn get_terragrunt_dir(ctx: &EvalContext) -> Value {
    Value::String(ctx.terragrunt_dir.to_string_lossy().into_owned())
}

pub fn get_parent_terragrunt_dir(ctx: &EvalContext, pos: &SourcePos) -> Result<Value, ConfigError> {
    let include = ctx.root_include().ok_or_else(|| func_err(pos, "get_parent_terragrunt_dir", "no include in scope"))?;
    let dir = include.config_path.parent().unwrap_or(&include.config_path);
    Ok(Value::String(dir.to_string_lossy().into_owned()))
}

pub fn get_working_dir(ctx: &EvalContext) -> Value {
    Value::String(ctx.working_dir.to_string_lossy().into_owned())
}

pub fn get_repo_root(ctx: &EvalContext) -> Value {
    Value::String(ctx.repo_root.to_string_lossy().into_owned())
}

pub fn get_path_from_repo_root(ctx: &EvalContext) -> Value {
    let rel = pathdiff(&ctx.terragrunt_dir, &ctx.repo_root);
    Value::String(rel.to_string_lossy().into_owned())
}

pub fn get_path_to_repo_root(ctx: &EvalContext) -> Value {
    let rel = pathdiff(&ctx.repo_root, &ctx.terragrunt_dir);
    Value::String(rel.to_string_lossy().into_owned())
}

/// `terraform plan`/`apply`/`destroy`/`import`/`push`/`refresh` accept `-var`
/// / `-var-file`; `init`, `output`, `validate`, `state` do not.
pub fn get_terraform_commands_that_need_vars() -> Value {
    Value::List(
        ["plan", "apply", "destroy", "import", "push", "refresh"].iter().map(|s| Value::String(s.to_string())).collect(),
    )
}

pub fn get_terragrunt_source_cli_flag(ctx: &EvalContext) -> Value {
    match &ctx.source_cli_flag {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

pub fn get_platform() -> Value {
    Value::String(std::env::consts::OS.to_string())
}

pub fn get_env(ctx: &EvalContext, name: &str, default: Option<&str>) -> Value {
    match ctx.env.get(name).cloned().or_else(|| std::env::var(name).ok()) {
        Some(v) => Value::String(v),
        None => match default {
            Some(d) => Value::String(d.to_string()),
            None => Value::Null,
        },
    }
}

/// `run_cmd(cmd, args...)` — runs a short-lived helper command and returns
/// its trimmed stdout. Not cached: callers that want memoisation (e.g. a
/// `run_cmd` wrapping `git rev-parse`) should prefer `get_repo_root`.
pub fn run_cmd(args: &[String], pos: &SourcePos) -> Result<Value, ConfigError> {
    let (cmd, rest) = args.split_first().ok_or_else(|| func_err(pos, "run_cmd", "requires at least a command name"))?;
    let output = std::process::Command::new(cmd)
        .args(rest)
        .output()
        .map_err(|e| func_err(pos, "run_cmd", format!("failed to execute {cmd}: {e}")))?;
    if !output.status.success() {
        return Err(func_err(pos, "run_cmd", format!("{cmd} exited with {}", output.status)));
    }
    Ok(Value::String(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

/// `read_terragrunt_config(path)` — parses and evaluates another unit
/// configuration file and exposes its merged values. The actual recursive
/// evaluation is performed by `config::eval::evaluate_file`; this function
/// only resolves the path (so `config::eval` can avoid an import cycle by
/// calling back into itself).
pub fn resolve_read_terragrunt_config_path(ctx: &EvalContext, raw_path: &str) -> PathBuf {
    let p = PathBuf::from(raw_path);
    if p.is_absolute() { p } else { ctx.terragrunt_dir.join(p) }
}

pub fn startswith(s: &str, prefix: &str) -> Value {
    Value::Bool(s.starts_with(prefix))
}

pub fn endswith(s: &str, suffix: &str) -> Value {
    Value::Bool(s.ends_with(suffix))
}

pub fn strcontains(s: &str, substr: &str) -> Value {
    Value::Bool(s.contains(substr))
}

/// `timecmp(a, b)` — RFC 3339 timestamp comparison: -1, 0, or 1.
pub fn timecmp(a: &str, b: &str, pos: &SourcePos) -> Result<Value, ConfigError> {
    let ta = chrono::DateTime::parse_from_rfc3339(a).map_err(|e| func_err(pos, "timecmp", format!("invalid time {a}: {e}")))?;
    let tb = chrono::DateTime::parse_from_rfc3339(b).map_err(|e| func_err(pos, "timecmp", format!("invalid time {b}: {e}")))?;
    let ordering = match ta.cmp(&tb) {
        std::cmp::Ordering::Less => -1.0,
        std::cmp::Ordering::Equal => 0.0,
        std::cmp::Ordering::Greater => 1.0,
    };
    Ok(Value::Number(ordering))
}

/// Resolves the repository root by walking up looking for a `.git` entry,
/// memoised per process via `config::cache`.
pub fn resolve_repo_root(start_dir: &Path) -> Result<PathBuf, ConfigError> {
    cache::repo_root_cache_get_or_compute(start_dir, || {
        let repo = git2::Repository::discover(start_dir)
            .map_err(|e| ConfigError::eval(start_dir, format!("get_repo_root: {e}")))?;
        let root = repo.workdir().unwrap_or_else(|| repo.path()).to_path_buf();
        Ok(root)
    })
}

/// Relative path from `from` to `to`, both assumed absolute. A small
/// component-wise diff; avoids a crate dependency for what's a handful of
/// lines.
fn pathdiff(to: &Path, from: &Path) -> PathBuf {
    let to_components: Vec<_> = to.components().collect();
    let from_components: Vec<_> = from.components().collect();
    let common = to_components.iter().zip(from_components.iter()).take_while(|(a, b)| a == b).count();

    let mut result = PathBuf::new();
    for _ in common..from_components.len() {
        result.push("..");
    }
    for comp in &to_components[common..] {
        result.push(comp.as_os_str());
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pathdiff_handles_siblings() {
        let a = Path::new("/repo/units/a");
        let b = Path::new("/repo/units/b");
        assert_eq!(pathdiff(a, b), PathBuf::from("../a"));
    }

    #[test]
    fn startswith_endswith_strcontains() {
        assert_eq!(startswith("hello", "he"), Value::Bool(true));
        assert_eq!(endswith("hello", "lo"), Value::Bool(true));
        assert_eq!(strcontains("hello", "ell"), Value::Bool(true));
    }

    #[test]
    fn timecmp_orders_timestamps() {
        let pos = SourcePos { file: PathBuf::from("x"), line: 0, column: 0 };
        let r = timecmp("2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z", &pos).unwrap();
        assert_eq!(r, Value::Number(-1.0));
    }
}
