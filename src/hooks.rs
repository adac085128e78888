//! C8 — Hook Runner.
//!
//! Selection rules: a hook fires only when the current engine
//! command is listed in `commands`; an error hook additionally requires the
//! engine to have failed and at least one `on_errors` regex to match
//! stderr/stdout. `execute` needs >=1 non-empty argument. `if = false`
//! silently skips. An after-hook's non-zero exit is a fatal run error.

use std::path::Path;

use regex::Regex;
use thiserror::Error;

use crate::config::Hook;
use crate::process::{CommandError, CommandKiller, ProcessRunner};

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook '{label}' has an empty execute list")]
    EmptyExecute { label: String },

    #[error("hook '{label}' failed: {source}")]
    Failed { label: String, #[source] source: CommandError },

    #[error("invalid on_errors pattern '{pattern}' in hook '{label}': {source}")]
    InvalidPattern { label: String, pattern: String, #[source] source: regex::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Before,
    After,
    Error,
}

/// Returns `true` if `hook` should run for `command`, given its own `if`
/// evaluation (already folded into `Hook::enabled` by C2) and, for error
/// hooks, whether any `on_errors` pattern matches the engine's combined
/// output.
pub fn selects(hook: &Hook, command: &str, phase: HookPhase, combined_output: &str) -> Result<bool, HookError> {
    if !hook.enabled {
        return Ok(false);
    }
    if !hook.commands.iter().any(|c| c == command) {
        return Ok(false);
    }
    if phase == HookPhase::Error {
        for pattern in &hook.on_errors {
            let re = Regex::new(pattern)
                .map_err(|source| HookError::InvalidPattern { label: hook.label.clone(), pattern: pattern.clone(), source })?;
            if re.is_match(combined_output) {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    Ok(true)
}

pub struct HookOutcome {
    pub label: String,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Runs one hook's `execute` argv inside `working_dir`, streaming output
/// unless `suppress_output` is set. `phase == After` propagates a non-zero
/// exit as a fatal error; `Before`/`Error` hooks whose `run_on_error` is
/// false likewise propagate (the caller decides whether to keep going for
/// `run_on_error = true`).
pub fn run(hook: &Hook, working_dir: &Path, killer: &CommandKiller) -> Result<HookOutcome, HookError> {
    if hook.execute.is_empty() || hook.execute.iter().all(|a| a.trim().is_empty()) {
        return Err(HookError::EmptyExecute { label: hook.label.clone() });
    }

    let binary = &hook.execute[0];
    let args: Vec<&str> = hook.execute[1..].iter().map(String::as_str).collect();
    let mut runner = ProcessRunner::new(binary, &args, &[]);
    let dir = hook.working_dir.as_deref().map(Path::new).unwrap_or(working_dir);
    runner.set_current_dir(dir);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    runner
        .exec_with_abort(
            &mut |line| {
                if !hook.suppress_output {
                    info!(hook = %hook.label, "{line}");
                }
                stdout.push(line);
            },
            &mut |line| {
                if !hook.suppress_output {
                    warn!(hook = %hook.label, "{line}");
                }
                stderr.push(line);
            },
            killer,
        )
        .map_err(|source| HookError::Failed { label: hook.label.clone(), source })?;

    Ok(HookOutcome { label: hook.label.clone(), stdout, stderr })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(label: &str, commands: &[&str], on_errors: &[&str], enabled: bool) -> Hook {
        Hook {
            label: label.to_string(),
            commands: commands.iter().map(|s| s.to_string()).collect(),
            execute: vec!["true".to_string()],
            run_on_error: false,
            working_dir: None,
            enabled,
            on_errors: on_errors.iter().map(|s| s.to_string()).collect(),
            suppress_output: false,
        }
    }

    #[test]
    fn disabled_hook_never_selects() {
        let h = hook("h", &["apply"], &[], false);
        assert!(!selects(&h, "apply", HookPhase::Before, "").unwrap());
    }

    #[test]
    fn before_hook_selects_on_command_match_only() {
        let h = hook("h", &["apply"], &[], true);
        assert!(selects(&h, "apply", HookPhase::Before, "").unwrap());
        assert!(!selects(&h, "plan", HookPhase::Before, "").unwrap());
    }

    #[test]
    fn error_hook_requires_pattern_match() {
        let h = hook("h", &["apply"], &["AccessDenied"], true);
        assert!(selects(&h, "apply", HookPhase::Error, "Error: AccessDenied on bucket").unwrap());
        assert!(!selects(&h, "apply", HookPhase::Error, "Error: something else").unwrap());
    }

    #[test]
    fn empty_execute_is_a_fatal_config_error() {
        let mut h = hook("h", &["apply"], &[], true);
        h.execute = vec![];
        let err = run(&h, Path::new("."), &CommandKiller::never()).unwrap_err();
        assert!(matches!(err, HookError::EmptyExecute { .. }));
    }
}
