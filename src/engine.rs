//! Top-level orchestration: discovery (C3) -> config evaluation (C2) ->
//! filtering (C4) -> graph build (C5) -> scheduling (C10), with staging,
//! dependency resolution, backend bootstrap, codegen and hooks (C9, C12,
//! C6, C7, C8) wired into the scheduler's executor callback, and every
//! outcome recorded into the run report (C11). A sequenced, logged run of
//! steps over a shared config, the same shape as a transactional deployment
//! pipeline, adapted from step-list mutation to a DAG scheduled over threads.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use chrono::Utc;

use crate::backend::{self, Backend};
use crate::config::{self, Config, EvalContext, Value};
use crate::constants::{UNIT_CONFIG_FILENAME, UNIT_CONFIG_FILENAME_JSON};
use crate::discovery::{self, DiscoveredEntry, DiscoveryOptions, EntryType};
use crate::errors::RunError;
use crate::filter::eval::FilterCandidate;
use crate::filter::git_range::GitRangeDiff;
use crate::filter::{self, FilterExpr};
use crate::graph::{self, BuildOptions, Graph};
use crate::output_cache::{self, FetchStrategy, OutputCache, OutputMap};
use crate::process::{CommandKiller, ProcessRunner};
use crate::report::{Record, Report, RunResultKind};
use crate::runner;
use crate::scheduler::{self, AtomicCancelReason, CancelReason, NodeOutcome, NodeState, SchedulerOptions};

pub struct EngineOptions {
    pub root: PathBuf,
    pub discovery: DiscoveryOptions,
    pub filters: Vec<FilterExpr>,
    pub command: String,
    pub passthrough_args: Vec<String>,
    pub scheduler: SchedulerOptions,
    pub include_external_dependencies: bool,
    /// `--non-interactive`: declines any external dependency not covered by
    /// `include_external_dependencies` instead of prompting the operator.
    pub non_interactive: bool,
    /// `--dependency-fetch-output-from-state`: try reading a dependency's
    /// outputs directly from its persisted remote state (C6) before falling
    /// back to shelling out to the engine binary in its staged directory.
    pub dependency_fetch_output_from_state: bool,
    /// `--backend-bootstrap`: when false, a backend that `needs_bootstrap`
    /// fails the unit with `MissingBackendError` instead of creating the
    /// bucket/state object itself.
    pub backend_bootstrap: bool,
    /// `--queue-strict-include`, or any `--filter` at all: lets a dependent
    /// proceed past a predecessor that isn't part of this run, provided that
    /// predecessor already has persisted state, instead of requiring
    /// `--include-external-dependencies` or operator confirmation.
    pub queue_strict_include: bool,
}

pub struct EngineRun {
    pub report: Report,
    pub states: Vec<NodeState>,
    pub graph: Graph,
    /// Highest number of units the scheduler ran at once during this run.
    pub max_concurrent: usize,
}

impl EngineRun {
    pub fn succeeded(&self) -> bool {
        self.states.iter().all(|s| !matches!(s, NodeState::Failed | NodeState::EarlyExited))
    }
}

pub fn unit_config_file(dir: &Path) -> Option<PathBuf> {
    let hcl = dir.join(UNIT_CONFIG_FILENAME);
    if hcl.is_file() {
        return Some(hcl);
    }
    let json = dir.join(UNIT_CONFIG_FILENAME_JSON);
    if json.is_file() {
        return Some(json);
    }
    None
}

pub fn base_context(repo_root: &Path, command: &str) -> EvalContext {
    EvalContext {
        terragrunt_dir: repo_root.to_path_buf(),
        working_dir: repo_root.to_path_buf(),
        repo_root: repo_root.to_path_buf(),
        include_stack: vec![],
        feature_overrides: BTreeMap::new(),
        env: std::env::vars().collect(),
        terraform_binary: crate::constants::DEFAULT_ENGINE_BINARY.to_string(),
        current_command: command.to_string(),
        source_cli_flag: None,
        reads: Default::default(),
    }
}

/// Parses every discovered unit's configuration, tolerating no per-unit
/// failures: a config error anywhere is a fatal run error that aborts the
/// whole run before any engine subprocess starts.
fn parse_all(entries: &[DiscoveredEntry], ctx: &EvalContext) -> Result<HashMap<PathBuf, Config>, RunError> {
    let mut configs = HashMap::new();
    for entry in entries {
        if entry.entry_type != EntryType::Unit {
            continue;
        }
        let Some(file) = unit_config_file(&entry.path) else { continue };
        let cfg = config::parse(&file, ctx.clone())?;
        configs.insert(entry.path.clone(), cfg);
    }
    Ok(configs)
}

/// `range` is the combined diff for every `GitRange` term across `filters`
/// plus whether any of them passed `--filter-allow-destroy`; `None` when the
/// filter list has no `GitRange` term at all, which is the common case and
/// skips per-unit path comparisons entirely.
fn matches_filters(
    root: &Path,
    entry: &DiscoveredEntry,
    cfg: Option<&Config>,
    filters: &[FilterExpr],
    range: Option<&(GitRangeDiff, bool)>,
) -> bool {
    let reads: HashSet<PathBuf> = cfg.map(|c| c.reads.iter().cloned().collect()).unwrap_or_default();
    let changed_in_range = match range {
        Some((diff, allow_destroy)) => entry
            .path
            .strip_prefix(root)
            .map(|relpath| filter::git_range::matches(relpath, diff, *allow_destroy))
            .unwrap_or(false),
        None => false,
    };
    let candidate = FilterCandidate {
        entry,
        source: cfg.and_then(|c| c.terraform.source.as_deref()),
        reads: &reads,
        changed_in_range,
    };
    filters.is_empty() || filters.iter().any(|f| filter::eval::eval(f, &candidate))
}

/// `--queue-include-units-reading PATH` restricts the queue to units whose
/// evaluated config transitively read one of `paths`; an empty list imposes
/// no restriction.
fn matches_reading(cfg: &Config, paths: &[PathBuf]) -> bool {
    paths.is_empty() || paths.iter().any(|p| cfg.reads.contains(p))
}

/// Reads a dependency's outputs straight from its persisted remote state,
/// without staging or running the engine binary. Requires the dependency to
/// declare a `remote_state` block; a passthrough-backed dependency has no
/// centralised state to read and always falls through to the shell-out.
fn fetch_state_outputs(cfg: &Config) -> Result<OutputMap, String> {
    let remote_state = cfg.remote_state.as_ref().ok_or("dependency has no remote_state block")?;
    let backend = backend::from_config(remote_state).map_err(|e| e.to_string())?;
    backend.read_outputs(remote_state, &cfg.unit_path).map_err(|e| e.to_string())
}

/// Fetches an already-staged dependency's outputs by shelling out to the
/// engine binary (`{binary} output -json`) in its staged working directory.
fn fetch_engine_outputs(binary: &str, staged_dir: &Path) -> Result<OutputMap, String> {
    let mut runner = ProcessRunner::new(binary, &["output", "-json"], &[]);
    runner.set_current_dir(staged_dir);
    let mut stdout = Vec::new();
    runner
        .exec_with_output(&mut |line| stdout.push(line), &mut |_| {})
        .map_err(|e| e.to_string())?;
    let body = stdout.join("\n");
    let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|e| e.to_string())?;
    let obj = parsed.as_object().ok_or("engine output -json did not return an object")?;
    Ok(obj.iter().map(|(k, v)| (k.clone(), Value::from(v.clone()))).collect())
}

/// Runs the full pipeline described in the module docs and returns the
/// per-unit report plus final scheduler states.
pub fn run(options: &EngineOptions) -> Result<EngineRun, RunError> {
    let ctx = base_context(&options.root, &options.command);

    let mut entries = discovery::discover(&options.root, &options.discovery)?;
    entries = discovery::reclassify_stacks(&options.root, entries);

    let configs = parse_all(&entries, &ctx)?;

    let git_ranges = filter::collect_all_git_ranges(&options.filters);
    let range = if git_ranges.is_empty() { None } else { Some(filter::git_range::diff_all(&options.root, &git_ranges)?) };

    let unit_entries: Vec<&DiscoveredEntry> = entries.iter().filter(|e| e.entry_type == EntryType::Unit).collect();

    let mut scheduled: Vec<(PathBuf, Config)> = Vec::new();
    let mut discovered_but_filtered: Vec<(PathBuf, Config)> = Vec::new();
    for entry in unit_entries {
        let Some(cfg) = configs.get(&entry.path) else { continue };
        if matches_filters(&options.root, entry, Some(cfg), &options.filters, range.as_ref())
            && matches_reading(cfg, &options.discovery.include_units_reading)
        {
            scheduled.push((entry.path.clone(), cfg.clone()));
        } else {
            discovered_but_filtered.push((entry.path.clone(), cfg.clone()));
        }
    }

    let graph = graph::build_graph(
        &scheduled,
        &discovered_but_filtered,
        &BuildOptions {
            include_external_dependencies: options.include_external_dependencies,
            non_interactive: options.non_interactive,
            strict_include: options.queue_strict_include,
        },
    )?;
    // Destroy tears down dependents before their dependencies, the reverse of
    // apply's order; the scheduler just walks whatever graph it's handed.
    let scheduling_graph = if options.command == "destroy" { graph.reversed() } else { graph.clone() };

    let mut by_path: HashMap<PathBuf, Config> = HashMap::new();
    for (path, cfg) in scheduled.into_iter().chain(discovered_but_filtered.into_iter()) {
        by_path.insert(path, cfg);
    }

    let report = Report::new();
    let output_cache = OutputCache::new();
    let staged_dirs: Mutex<HashMap<PathBuf, PathBuf>> = Mutex::new(HashMap::new());
    let cancelled = AtomicCancelReason::new(CancelReason::None);

    let executor = |idx: usize| -> NodeOutcome {
        let path = &graph.unit_paths[idx];
        let Some(cfg) = by_path.get(path) else { return NodeOutcome::Excluded };
        let name = path.display().to_string();
        let started = Utc::now();

        if cfg.disabled || cfg.skip {
            report.push(Record {
                name,
                started,
                ended: Utc::now(),
                result: RunResultKind::Excluded,
                reason: Some("skip or disabled".to_string()),
                cause: None,
            });
            return NodeOutcome::Excluded;
        }

        let is_cancelled = || cancelled.load(Ordering::Acquire) != CancelReason::None;
        let killer = CommandKiller::from_cancelable(&is_cancelled);
        let binary = if cfg.terraform_binary.is_empty() { crate::constants::DEFAULT_ENGINE_BINARY } else { &cfg.terraform_binary };

        let mut outputs_by_dependency: BTreeMap<String, OutputMap> = BTreeMap::new();
        for dep in &cfg.dependencies {
            if !dep.enabled || dep.skip {
                continue;
            }
            let mock_outputs = dep.mock_outputs.as_map().map(|m| m.clone());
            let staged = staged_dirs.lock().unwrap().get(&dep.config_path).cloned();
            let dep_cfg = by_path.get(&dep.config_path);
            let resolved = output_cache::resolve_outputs(
                &output_cache,
                &dep.config_path,
                path,
                &options.command,
                mock_outputs.as_ref(),
                &dep.mock_outputs_allowed_commands,
                || {
                    let strategies: &[FetchStrategy] = if options.dependency_fetch_output_from_state {
                        &[FetchStrategy::FromState, FetchStrategy::FromEngineOutput]
                    } else {
                        &[FetchStrategy::FromEngineOutput]
                    };
                    for strategy in strategies {
                        let attempt = match strategy {
                            FetchStrategy::FromState => dep_cfg.and_then(|c| fetch_state_outputs(c).ok()),
                            FetchStrategy::FromEngineOutput => staged.as_deref().and_then(|dir| fetch_engine_outputs(binary, dir).ok()),
                        };
                        if let Some(outputs) = attempt {
                            return Ok(outputs);
                        }
                    }
                    Err("dependency has not run in this session".to_string())
                },
            );
            match resolved {
                Ok(outputs) => {
                    outputs_by_dependency.insert(dep.name.clone(), outputs);
                }
                Err(err) => {
                    report.push(Record {
                        name,
                        started,
                        ended: Utc::now(),
                        result: RunResultKind::Failed,
                        reason: Some("unresolved dependency output".to_string()),
                        cause: Some(err.to_string()),
                    });
                    return NodeOutcome::Failed;
                }
            }
        }

        if let Some(remote_state) = &cfg.remote_state {
            if let Err(err) = bootstrap_backend(remote_state, options.backend_bootstrap) {
                report.push(Record {
                    name,
                    started,
                    ended: Utc::now(),
                    result: RunResultKind::Failed,
                    reason: Some("backend bootstrap failed".to_string()),
                    cause: Some(err.to_string()),
                });
                return NodeOutcome::Failed;
            }
        }

        let staged = match runner::stage_unit(cfg) {
            Ok(dir) => dir,
            Err(err) => {
                report.push(Record {
                    name,
                    started,
                    ended: Utc::now(),
                    result: RunResultKind::Failed,
                    reason: Some("staging failed".to_string()),
                    cause: Some(err.to_string()),
                });
                return NodeOutcome::Failed;
            }
        };

        if let Err(err) = runner::write_dependency_outputs(&staged, &outputs_by_dependency) {
            report.push(Record {
                name,
                started,
                ended: Utc::now(),
                result: RunResultKind::Failed,
                reason: Some("writing dependency outputs failed".to_string()),
                cause: Some(err.to_string()),
            });
            return NodeOutcome::Failed;
        }

        staged_dirs.lock().unwrap().insert(path.clone(), staged.clone());

        let result = runner::run_unit(cfg, &staged, &options.command, &options.passthrough_args, &killer);

        if matches!(options.command.as_str(), "apply" | "destroy") {
            output_cache.invalidate(path);
        }

        let ended = Utc::now();
        if result.succeeded {
            report.push(Record { name, started, ended, result: RunResultKind::Succeeded, reason: None, cause: None });
            NodeOutcome::Succeeded
        } else {
            let cause = result.classified_error.as_ref().map(|e| e.to_string());
            report.push(Record { name, started, ended, result: RunResultKind::Failed, reason: Some("engine run failed".to_string()), cause });
            NodeOutcome::Failed
        }
    };

    for dep_path in &graph.strict_satisfied {
        let now = Utc::now();
        report.push(Record {
            name: dep_path.display().to_string(),
            started: now,
            ended: now,
            result: RunResultKind::Excluded,
            reason: Some("has persisted state, not re-run (strict include)".to_string()),
            cause: None,
        });
    }

    let run_report = scheduler::run(&scheduling_graph, &options.scheduler, &cancelled, executor);

    for (idx, state) in run_report.states.iter().enumerate() {
        if *state == NodeState::EarlyExited {
            let path = &graph.unit_paths[idx];
            report.push(Record {
                name: path.display().to_string(),
                started: Utc::now(),
                ended: Utc::now(),
                result: RunResultKind::EarlyExit,
                reason: Some("upstream dependency failed".to_string()),
                cause: None,
            });
        }
    }

    Ok(EngineRun { report, states: run_report.states, graph, max_concurrent: run_report.max_concurrent })
}

fn bootstrap_backend(remote_state: &config::RemoteState, backend_bootstrap: bool) -> Result<(), crate::backend::BackendError> {
    let backend = backend::from_config(remote_state)?;
    if remote_state.disable_init {
        return Ok(());
    }
    if backend.needs_bootstrap(remote_state)? {
        if !backend_bootstrap {
            return Err(crate::backend::BackendError::MissingBackendError {
                backend: remote_state.backend.clone(),
                detail: "backend is not bootstrapped and --backend-bootstrap was not passed".to_string(),
            });
        }
        backend.bootstrap(remote_state)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn unit_config_file_prefers_hcl_over_json() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(UNIT_CONFIG_FILENAME), "").unwrap();
        fs::write(tmp.path().join(UNIT_CONFIG_FILENAME_JSON), "").unwrap();
        let found = unit_config_file(tmp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), UNIT_CONFIG_FILENAME);
    }

    #[test]
    fn unit_config_file_none_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(unit_config_file(tmp.path()).is_none());
    }

    #[test]
    fn empty_filter_list_matches_everything() {
        let entry = DiscoveredEntry { entry_type: EntryType::Unit, path: PathBuf::from("/tree/a") };
        assert!(matches_filters(Path::new("/tree"), &entry, None, &[], None));
    }

    #[test]
    fn type_filter_excludes_non_matching_entry() {
        let entry = DiscoveredEntry { entry_type: EntryType::Stack, path: PathBuf::from("/tree/a") };
        let filters = vec![filter::parse("type=unit", false).unwrap()];
        assert!(!matches_filters(Path::new("/tree"), &entry, None, &filters, None));
    }

    #[test]
    fn reading_filter_empty_list_matches_everything() {
        let cfg = test_cfg(vec![]);
        assert!(matches_reading(&cfg, &[]));
    }

    #[test]
    fn reading_filter_requires_read_path_match() {
        let shared = PathBuf::from("/tree/shared.hcl");
        let cfg = test_cfg(vec![shared.clone()]);
        assert!(matches_reading(&cfg, &[shared.clone()]));
        assert!(!matches_reading(&cfg, &[PathBuf::from("/tree/other.hcl")]));
    }

    /// Of five units, only the two that transitively read `shared.hcl` are
    /// left in the queue when the flag names it.
    #[test]
    fn reading_flag_scopes_discovery_to_reading_units() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let shared = root.join("shared.hcl");
        fs::write(&shared, r#"locals { tag = "shared" }"#).unwrap();

        for name in ["u1", "u2"] {
            let dir = root.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(UNIT_CONFIG_FILENAME), format!(r#"include "shared" {{ path = "{}" }}"#, shared.display())).unwrap();
        }
        for name in ["u3", "u4", "u5"] {
            let dir = root.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(UNIT_CONFIG_FILENAME), "").unwrap();
        }

        let ctx = base_context(root, "plan");
        let entries = discovery::reclassify_stacks(root, discovery::discover(root, &DiscoveryOptions::default()).unwrap());
        let unit_entries: Vec<&DiscoveredEntry> = entries.iter().filter(|e| e.entry_type == EntryType::Unit).collect();
        assert_eq!(unit_entries.len(), 5);

        let reading_paths = vec![shared.clone()];
        let mut matched: Vec<String> = Vec::new();
        for entry in unit_entries {
            let file = unit_config_file(&entry.path).unwrap();
            let cfg = config::parse(&file, ctx.clone()).unwrap();
            if matches_reading(&cfg, &reading_paths) {
                matched.push(entry.path.file_name().unwrap().to_string_lossy().to_string());
            }
        }
        matched.sort();
        assert_eq!(matched, vec!["u1".to_string(), "u2".to_string()]);
    }

    fn test_cfg(reads: Vec<PathBuf>) -> Config {
        Config {
            unit_path: PathBuf::from("/tree/unit"),
            terraform: config::TerraformBlock::default(),
            remote_state: None,
            dependencies: vec![],
            dependencies_paths: vec![],
            generate: vec![],
            inputs: Value::Null,
            locals: BTreeMap::new(),
            download_dir: ".terragrunt-cache".to_string(),
            iam_role: None,
            terraform_binary: "tofu".to_string(),
            terraform_version_constraint: None,
            prevent_destroy: false,
            skip: false,
            disabled: false,
            reads,
        }
    }

    #[test]
    fn fetch_state_outputs_reads_local_backend_state() {
        let tmp = tempfile::tempdir().unwrap();
        let state_path = tmp.path().join("vpc/tofu.tfstate");
        fs::create_dir_all(state_path.parent().unwrap()).unwrap();
        fs::write(&state_path, r#"{"outputs":{"vpc_id":{"value":"vpc-1","type":"string"}}}"#).unwrap();

        let mut config = BTreeMap::new();
        config.insert("path".to_string(), Value::String(tmp.path().to_string_lossy().into_owned()));
        let mut cfg = test_cfg(vec![]);
        cfg.unit_path = PathBuf::from("vpc");
        cfg.remote_state = Some(config::RemoteState { backend: "local".to_string(), config, generate: None, disable_init: false });

        let outputs = fetch_state_outputs(&cfg).unwrap();
        assert_eq!(outputs.get("vpc_id"), Some(&Value::String("vpc-1".to_string())));
    }

    #[test]
    fn fetch_state_outputs_errors_without_remote_state() {
        let cfg = test_cfg(vec![]);
        assert!(fetch_state_outputs(&cfg).is_err());
    }
}
