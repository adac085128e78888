//! C9 — Unit Runner. Stages a unit's working directory, generates backend
//! and `generate`-block files, materialises resolved dependency outputs,
//! runs hook phases around the engine subprocess, and classifies failures.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use regex::Regex;
use walkdir::WalkDir;

use crate::backend;
use crate::codegen;
use crate::config::{Config, Hook};
use crate::constants::DEFAULT_ENGINE_BINARY;
use crate::errors::EngineError;
use crate::hooks::{self, HookPhase};
use crate::output_cache::OutputMap;
use crate::process::{self, CommandKiller, ProcessRunner};

/// Where to fetch `terraform.source` from, sniffed the way `go-getter`
/// (and the engine after it) does: a bare local path, a `git::`/`.git`
/// remote, or an HTTP(S) archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Local,
    Git,
    Http,
}

fn classify_source(source: &str) -> SourceKind {
    if source.starts_with("http://") || source.starts_with("https://") {
        SourceKind::Http
    } else if source.contains(".git") || source.starts_with("git::") || source.starts_with("git@") {
        SourceKind::Git
    } else {
        SourceKind::Local
    }
}

fn copy_dir_filtered(src: &Path, dst: &Path, include: Option<&[String]>, exclude: Option<&[String]>) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).into_iter().filter_map(Result::ok) {
        let rel = entry.path().strip_prefix(src).unwrap();
        if rel.as_os_str().is_empty() {
            continue;
        }
        let rel_str = rel.to_string_lossy();
        if rel_str.starts_with('.') {
            continue;
        }
        if let Some(exclude) = exclude {
            if exclude.iter().any(|p| rel_str == p.as_str()) {
                continue;
            }
        }
        if let Some(include) = include {
            if !include.iter().any(|p| rel_str == p.as_str()) {
                continue;
            }
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn fetch_source(source: &str, unit_dir: &Path, staged_dir: &Path) -> std::io::Result<()> {
    match classify_source(source) {
        SourceKind::Local => {
            let resolved = if Path::new(source).is_absolute() { PathBuf::from(source) } else { unit_dir.join(source) };
            copy_dir_filtered(&resolved, staged_dir, None, None)
        }
        SourceKind::Git => {
            let url = source.trim_start_matches("git::");
            git2::Repository::clone(url, staged_dir)
                .map(|_| ())
                .map_err(|e| std::io::Error::other(format!("git clone of {url} failed: {e}")))
        }
        SourceKind::Http => {
            let bytes = reqwest::blocking::get(source)
                .and_then(|r| r.bytes())
                .map_err(|e| std::io::Error::other(format!("download of {source} failed: {e}")))?;
            let decoder = flate2::read::GzDecoder::new(&bytes[..]);
            let mut archive = tar::Archive::new(decoder);
            archive.unpack(staged_dir)
        }
    }
}

/// Stages the unit: creates the cache dir, fetches/copies source, copies the
/// lock file, writes `generate` files and the backend stanza. Returns the
/// staged working directory the engine will run in.
pub fn stage_unit(cfg: &Config) -> Result<PathBuf, std::io::Error> {
    let cache_root = cfg.unit_path.join(&cfg.download_dir);
    let staged = process::make_scratch_dir(&cache_root, "unit-")?;

    match &cfg.terraform.source {
        Some(source) => fetch_source(source, &cfg.unit_path, &staged)?,
        None => {
            copy_dir_filtered(
                &cfg.unit_path,
                &staged,
                cfg.terraform.include_in_copy.as_deref(),
                cfg.terraform.exclude_from_copy.as_deref(),
            )?;
        }
    }

    if cfg.terraform.copy_terraform_lock_file {
        let lock = cfg.unit_path.join(".terraform.lock.hcl");
        if lock.exists() {
            fs::copy(&lock, staged.join(".terraform.lock.hcl"))?;
        }
    }

    for file in &cfg.generate {
        codegen::write_generated_file(&staged, file)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
    }

    if let Some(remote_state) = &cfg.remote_state {
        let relpath = cfg.unit_path.file_name().map(PathBuf::from).unwrap_or_default();
        let backend = backend::from_config(remote_state).map_err(|e| std::io::Error::other(e.to_string()))?;
        use crate::backend::Backend;
        let stanza = backend.generate_backend_file(remote_state, &relpath).map_err(|e| std::io::Error::other(e.to_string()))?;
        if !stanza.is_empty() {
            let (path, _if_exists) = remote_state.generate.clone().unwrap_or_else(|| ("backend.tf".to_string(), "overwrite".to_string()));
            fs::write(staged.join(path), stanza)?;
        }
    }

    Ok(staged)
}

/// Writes resolved dependency outputs as an auto-loaded tfvars file so the
/// engine picks them up without explicit `-var-file` plumbing.
pub fn write_dependency_outputs(staged_dir: &Path, outputs_by_dependency: &BTreeMap<String, OutputMap>) -> std::io::Result<()> {
    if outputs_by_dependency.is_empty() {
        return Ok(());
    }
    let mut top = serde_json::Map::new();
    for (name, outputs) in outputs_by_dependency {
        let mut obj = serde_json::Map::new();
        for (k, v) in outputs {
            obj.insert(k.clone(), v.clone().into());
        }
        top.insert(name.clone(), serde_json::Value::Object(obj));
    }
    let body = serde_json::to_string_pretty(&serde_json::json!({ "dependency": serde_json::Value::Object(top) }))?;
    fs::write(staged_dir.join("terragrunt-dependencies.auto.tfvars.json"), body)
}

/// Builds the engine argv: subcommand, `extra_arguments` filtered to those
/// whose `commands` include `command`, then `-var`/`-var-file` derived from
/// `inputs` for commands that take vars.
pub fn build_engine_args(cfg: &Config, command: &str, passthrough_args: &[String]) -> Vec<String> {
    let mut args = vec![command.to_string()];
    args.extend(passthrough_args.iter().cloned());

    for extra in &cfg.terraform.extra_arguments {
        if extra.commands.iter().any(|c| c == command) {
            args.extend(extra.arguments.iter().cloned());
            for f in &extra.required_var_files {
                args.push(format!("-var-file={f}"));
            }
            for f in &extra.optional_var_files {
                if Path::new(f).exists() {
                    args.push(format!("-var-file={f}"));
                }
            }
        }
    }

    let needs_vars = ["plan", "apply", "destroy", "import", "push", "refresh"];
    if needs_vars.contains(&command) {
        if let Some(map) = cfg.inputs.as_map() {
            for (k, v) in map {
                args.push(format!("-var={k}={v}"));
            }
        }
    }

    args
}

const PATTERN_MODULE_PROTECTED: &str = r"(?i)prevent_destroy";
const PATTERN_BACKEND_MISSING: &str = r"(?i)Backend configuration (changed|not found)|No valid credential sources found";
const PATTERN_MODULE_NOT_FOUND: &str = r"(?i)Module not found|Could not download module";
const PATTERN_AUTH_FAILURE: &str = r"(?i)No valid credential sources|AccessDenied|authentication failed|InvalidClientTokenId";

/// Scans the engine's stderr for known failure signatures and maps it to a
/// typed `EngineError`.
pub fn classify_error(unit: &Path, command: &str, stderr: &str) -> EngineError {
    let matches = |pattern: &str| Regex::new(pattern).map(|re| re.is_match(stderr)).unwrap_or(false);

    if matches(PATTERN_MODULE_PROTECTED) {
        return EngineError::ModuleIsProtected { unit: unit.to_path_buf() };
    }
    if matches(PATTERN_AUTH_FAILURE) {
        return EngineError::AuthenticationFailure { unit: unit.to_path_buf(), raw_message: stderr.to_string() };
    }
    if matches(PATTERN_BACKEND_MISSING) {
        return EngineError::BackendNotDefined { unit: unit.to_path_buf() };
    }
    if matches(PATTERN_MODULE_NOT_FOUND) {
        return EngineError::ModuleNotFound { unit: unit.to_path_buf() };
    }

    let source = process::ProcessError::ExitStatusError(std::process::ExitStatus::from_raw(1));
    match command {
        "init" => EngineError::Init { unit: unit.to_path_buf(), source },
        "plan" => EngineError::Plan { unit: unit.to_path_buf(), source },
        "apply" => EngineError::Apply { unit: unit.to_path_buf(), source },
        _ => EngineError::Other { unit: unit.to_path_buf(), source },
    }
}

pub struct RunResult {
    pub unit: PathBuf,
    pub command: String,
    pub succeeded: bool,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub classified_error: Option<EngineError>,
    pub duration: Duration,
}

fn run_hook_phase(hooks_list: &[Hook], command: &str, phase: HookPhase, working_dir: &Path, combined_output: &str, killer: &CommandKiller) -> Result<(), EngineError> {
    for hook in hooks_list {
        match hooks::selects(hook, command, phase, combined_output) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => continue,
        }
        if let Err(_err) = hooks::run(hook, working_dir, killer) {
            if phase == HookPhase::After || (phase == HookPhase::Before && !hook.run_on_error) {
                let source = process::ProcessError::ExitStatusError(std::process::ExitStatus::from_raw(1));
                return Err(EngineError::Other { unit: working_dir.to_path_buf(), source });
            }
        }
    }
    Ok(())
}

/// Runs `command` for a unit already staged at `staged_dir`. Executes the
/// before-hook → engine → after/error-hook sequence strictly in order: within
/// a unit, hook and engine phases never run concurrently.
pub fn run_unit(
    cfg: &Config,
    staged_dir: &Path,
    command: &str,
    passthrough_args: &[String],
    killer: &CommandKiller,
) -> RunResult {
    let started = Instant::now();

    if command == "destroy" && cfg.prevent_destroy {
        return RunResult {
            unit: cfg.unit_path.clone(),
            command: command.to_string(),
            succeeded: false,
            stdout: vec![],
            stderr: vec![],
            classified_error: Some(EngineError::ModuleIsProtected { unit: cfg.unit_path.clone() }),
            duration: started.elapsed(),
        };
    }

    if let Err(err) = run_hook_phase(&cfg.terraform.before_hooks, command, HookPhase::Before, staged_dir, "", killer) {
        return RunResult {
            unit: cfg.unit_path.clone(),
            command: command.to_string(),
            succeeded: false,
            stdout: vec![],
            stderr: vec![],
            classified_error: Some(err),
            duration: started.elapsed(),
        };
    }

    let args = build_engine_args(cfg, command, passthrough_args);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let binary = if cfg.terraform_binary.is_empty() { DEFAULT_ENGINE_BINARY } else { &cfg.terraform_binary };
    let mut runner = ProcessRunner::new(binary, &arg_refs, &[]);
    runner.set_current_dir(staged_dir);

    let unit_relpath = cfg.unit_path.display().to_string();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let heartbeat_label = unit_relpath.clone();
    let exec_result = process::log_heartbeat_while(
        Duration::from_secs(60),
        move |elapsed| {
            crate::logger::log_unit_line(
                &heartbeat_label,
                crate::logger::LogLevel::Info,
                &format!("still running ({}s elapsed)", elapsed.as_secs()),
            );
        },
        || {
            runner.exec_with_abort(
                &mut |line| {
                    crate::logger::log_unit_line(&unit_relpath, crate::logger::LogLevel::Info, &line);
                    stdout.push(line);
                },
                &mut |line| {
                    crate::logger::log_unit_line(&unit_relpath, crate::logger::LogLevel::Warn, &line);
                    stderr.push(line);
                },
                killer,
            )
        },
    );

    let combined = stderr.join("\n");
    let (succeeded, classified_error) = match exec_result {
        Ok(()) => (true, None),
        Err(_) => (false, Some(classify_error(&cfg.unit_path, command, &combined))),
    };

    let phase = if succeeded { HookPhase::After } else { HookPhase::Error };
    let hook_list: &[Hook] = if succeeded { &cfg.terraform.after_hooks } else { &cfg.terraform.error_hooks };
    let hook_err = run_hook_phase(hook_list, command, phase, staged_dir, &combined, killer).err();

    RunResult {
        unit: cfg.unit_path.clone(),
        command: command.to_string(),
        succeeded: succeeded && hook_err.is_none(),
        stdout,
        stderr,
        classified_error: classified_error.or(hook_err),
        duration: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_source_kinds() {
        assert_eq!(classify_source("../modules/vpc"), SourceKind::Local);
        assert_eq!(classify_source("git::https://example.com/repo.git"), SourceKind::Git);
        assert_eq!(classify_source("https://example.com/module.tar.gz"), SourceKind::Http);
    }

    #[test]
    fn classifies_protected_module_error() {
        let err = classify_error(Path::new("/tree/unit"), "destroy", "Error: prevent_destroy is set");
        assert!(matches!(err, EngineError::ModuleIsProtected { .. }));
    }

    #[test]
    fn classifies_auth_failure() {
        let err = classify_error(Path::new("/tree/unit"), "apply", "Error: AccessDenied: not authorized");
        assert!(matches!(err, EngineError::AuthenticationFailure { .. }));
    }

    #[test]
    fn falls_back_to_generic_command_error() {
        let err = classify_error(Path::new("/tree/unit"), "plan", "Error: something unrelated happened");
        assert!(matches!(err, EngineError::Plan { .. }));
    }

    #[test]
    fn builds_var_args_for_commands_needing_vars() {
        let mut cfg = test_config();
        cfg.inputs = crate::config::Value::Map(
            [("name".to_string(), crate::config::Value::String("vpc".into()))].into_iter().collect(),
        );
        let args = build_engine_args(&cfg, "plan", &[]);
        assert!(args.contains(&"-var=name=vpc".to_string()));
    }

    #[test]
    fn does_not_add_vars_for_output_command() {
        let mut cfg = test_config();
        cfg.inputs = crate::config::Value::Map(
            [("name".to_string(), crate::config::Value::String("vpc".into()))].into_iter().collect(),
        );
        let args = build_engine_args(&cfg, "output", &[]);
        assert!(!args.iter().any(|a| a.starts_with("-var=")));
    }

    fn test_config() -> Config {
        Config {
            unit_path: PathBuf::from("/tree/unit"),
            terraform: crate::config::TerraformBlock::default(),
            remote_state: None,
            dependencies: vec![],
            dependencies_paths: vec![],
            generate: vec![],
            inputs: crate::config::Value::Null,
            locals: BTreeMap::new(),
            download_dir: ".terragrunt-cache".to_string(),
            iam_role: None,
            terraform_binary: "tofu".to_string(),
            terraform_version_constraint: None,
            prevent_destroy: false,
            skip: false,
            disabled: false,
            reads: vec![],
        }
    }
}
