//! Process entry point: env mirroring, CLI parsing, logging, then dispatch
//! into the engine (run commands) or the lighter read-only inspection
//! commands: parse args, init logging, dispatch, map the error into a
//! process exit code.

use std::path::{Path, PathBuf};

use clap::Parser;
use terragrunt_rs::backend;
use terragrunt_rs::cli::{self, BackendAction, Cli, CommonArgs, InfoAction, TopCommand};
use terragrunt_rs::config;
use terragrunt_rs::discovery::{self, DiscoveryOptions, EntryType};
use terragrunt_rs::engine::{self, EngineOptions};
use terragrunt_rs::errors::RunError;
use terragrunt_rs::filter::{self, FilterExpr};
use terragrunt_rs::graph::{self, BuildOptions};
use terragrunt_rs::logger;
use terragrunt_rs::scheduler::SchedulerOptions;

fn main() {
    cli::mirror_legacy_env();
    let cli = Cli::parse_from(cli::mirror_legacy_args(std::env::args()));

    logger::init_logging(cli.common.log_level, false, cli.common.no_color);

    let exit_code = match dispatch(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code() as i32
        }
    };
    std::process::exit(exit_code);
}

fn discovery_options(common: &CommonArgs) -> DiscoveryOptions {
    let root = &common.working_dir;
    DiscoveryOptions {
        include_dirs: common.queue_include_dir.clone(),
        exclude_dirs: common.queue_exclude_dir.clone(),
        include_units_reading: common
            .queue_include_units_reading
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { root.join(p) })
            .collect(),
    }
}

fn parsed_filters(common: &CommonArgs) -> Result<Vec<FilterExpr>, RunError> {
    let mut filters = Vec::new();
    for raw in &common.filter {
        filters.push(filter::parse(raw, common.filter_allow_destroy)?);
    }
    Ok(filters)
}

fn scheduler_options(common: &CommonArgs) -> SchedulerOptions {
    let mut opts = SchedulerOptions::default();
    if let Some(p) = common.parallelism {
        opts.parallelism = p.max(1);
    }
    opts
}

fn dispatch(cli: &Cli) -> Result<i32, RunError> {
    match &cli.command {
        TopCommand::Run(args) => run_command(&cli.common, args.all, &args.subcommand, &args.passthrough),
        TopCommand::RunAll(args) => run_command(&cli.common, true, &args.subcommand, &args.passthrough),
        TopCommand::External(argv) => {
            let (subcommand, passthrough) = split_external_subcommand(argv);
            run_command(&cli.common, false, &subcommand, &passthrough)
        }
        TopCommand::Backend(args) => backend_command(&cli.common, &args.action),
        TopCommand::Find => inspect_command(&cli.common, InspectKind::Find),
        TopCommand::List => inspect_command(&cli.common, InspectKind::List),
        TopCommand::Graph => inspect_command(&cli.common, InspectKind::Graph),
        TopCommand::Render(args) => inspect_command(&cli.common, InspectKind::Render { json: args.json, with_metadata: args.with_metadata }),
        TopCommand::Info(args) => match args.action {
            InfoAction::Print => inspect_command(&cli.common, InspectKind::InfoPrint),
        },
        TopCommand::Hclfmt => hclfmt_command(&cli.common, false),
        TopCommand::Hclvalidate => hclfmt_command(&cli.common, true),
    }
}

/// Strips a trailing `-all` from a legacy `<subcommand>-all` form (e.g.
/// `plan-all` -> `plan`, treated as `run --all plan`); a bare `<subcommand>`
/// with no suffix is just `run <subcommand>`.
fn split_external_subcommand(argv: &[String]) -> (String, Vec<String>) {
    let (head, rest) = argv.split_first().map(|(h, r)| (h.clone(), r.to_vec())).unwrap_or_default();
    match head.strip_suffix("-all") {
        Some(stripped) => (stripped.to_string(), rest),
        None => (head, rest),
    }
}

fn run_command(common: &CommonArgs, all: bool, subcommand: &str, passthrough: &[String]) -> Result<i32, RunError> {
    let _ = all; // `--all` only disambiguates from a single-unit run in `--working-dir`; both paths share a scheduler here.
    let root = common.working_dir.clone();
    let options = EngineOptions {
        root,
        discovery: discovery_options(common),
        filters: parsed_filters(common)?,
        command: subcommand.to_string(),
        passthrough_args: passthrough.to_vec(),
        scheduler: scheduler_options(common),
        include_external_dependencies: common.include_external_dependencies,
        non_interactive: common.non_interactive,
        dependency_fetch_output_from_state: common.dependency_fetch_output_from_state && !common.no_dependency_fetch_output_from_state,
        backend_bootstrap: common.backend_bootstrap,
        queue_strict_include: common.queue_strict_include || !common.filter.is_empty(),
    };

    let run = engine::run(&options)?;

    println!("{}", run.report.summary_table());
    for record in run.report.non_success() {
        println!("  {} {}: {}", record.result, record.name, record.reason.as_deref().unwrap_or(""));
    }

    if let Some(path) = &common.report_file {
        write_report(&run.report, path)?;
    }

    if run.succeeded() {
        Ok(0)
    } else {
        Ok(terragrunt_rs::errors::ExitCode::RunFailure as i32)
    }
}

fn write_report(report: &terragrunt_rs::report::Report, path: &PathBuf) -> Result<(), RunError> {
    let is_csv = path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("csv")).unwrap_or(false);
    if is_csv {
        report.write_csv(path)?;
    } else {
        report.write_json(path)?;
    }
    Ok(())
}

fn backend_command(common: &CommonArgs, action: &BackendAction) -> Result<i32, RunError> {
    let ctx = engine::base_context(&common.working_dir, "backend");
    let entries = discovery::reclassify_stacks(&common.working_dir, discovery::discover(&common.working_dir, &discovery_options(common))?);
    let filters = parsed_filters(common)?;
    let range = git_range_for_filters(&common.working_dir, &filters)?;

    for entry in entries.iter().filter(|e| e.entry_type == EntryType::Unit) {
        let Some(file) = engine::unit_config_file(&entry.path) else { continue };
        let cfg = config::parse(&file, ctx.clone())?;
        if !matches_simple(&common.working_dir, entry, &filters, range.as_ref()) {
            continue;
        }
        let Some(remote_state) = &cfg.remote_state else { continue };
        let impl_backend = backend::from_config(remote_state)?;
        match action {
            BackendAction::Bootstrap => {
                if impl_backend.needs_bootstrap(remote_state)? {
                    impl_backend.bootstrap(remote_state)?;
                    println!("bootstrapped backend for {}", entry.path.display());
                }
            }
            BackendAction::Migrate { src_key, dst_key } => {
                impl_backend.migrate(remote_state, src_key, dst_key, common.force)?;
                println!("migrated {} -> {} for {}", src_key, dst_key, entry.path.display());
            }
            BackendAction::Delete { keys } => {
                impl_backend.delete(remote_state, keys, common.force)?;
                println!("deleted {} key(s) for {}", keys.len(), entry.path.display());
            }
        }
    }
    Ok(0)
}

/// Computes the combined git-range diff for every `GitRange` term across
/// `filters`, once per invocation, so `matches_simple` can stay a pure
/// per-entry check. `None` when `filters` has no `GitRange` term.
fn git_range_for_filters(root: &Path, filters: &[FilterExpr]) -> Result<Option<(terragrunt_rs::filter::git_range::GitRangeDiff, bool)>, RunError> {
    let ranges = filter::collect_all_git_ranges(filters);
    if ranges.is_empty() {
        return Ok(None);
    }
    Ok(Some(terragrunt_rs::filter::git_range::diff_all(root, &ranges)?))
}

/// Cheap filter check for `find`/`list`/`graph`, which never parse every
/// unit's config up front (unlike `run`/`render`). `source=`/`reading=`
/// attributes can't match here since neither is known without a full parse;
/// they only take effect on commands that build the graph for real (`run`).
fn matches_simple(
    root: &Path,
    entry: &discovery::DiscoveredEntry,
    filters: &[FilterExpr],
    range: Option<&(terragrunt_rs::filter::git_range::GitRangeDiff, bool)>,
) -> bool {
    use terragrunt_rs::filter::eval::{eval, FilterCandidate};
    use terragrunt_rs::filter::git_range;

    if filters.is_empty() {
        return true;
    }
    let changed_in_range = match range {
        Some((diff, allow_destroy)) => entry.path.strip_prefix(root).map(|p| git_range::matches(p, diff, *allow_destroy)).unwrap_or(false),
        None => false,
    };
    let reads = std::collections::HashSet::new();
    let candidate = FilterCandidate { entry, source: None, reads: &reads, changed_in_range };
    filters.iter().any(|f| eval(f, &candidate))
}

enum InspectKind {
    Find,
    List,
    Graph,
    Render { json: bool, with_metadata: bool },
    InfoPrint,
}

fn inspect_command(common: &CommonArgs, kind: InspectKind) -> Result<i32, RunError> {
    let root = &common.working_dir;
    let entries = discovery::reclassify_stacks(root, discovery::discover(root, &discovery_options(common))?);
    let filters = parsed_filters(common)?;
    let range = git_range_for_filters(root, &filters)?;
    let units: Vec<_> = entries.iter().filter(|e| e.entry_type == EntryType::Unit && matches_simple(root, e, &filters, range.as_ref())).collect();

    match kind {
        InspectKind::Find => {
            for e in &units {
                println!("{}", e.path.display());
            }
        }
        InspectKind::List => {
            for e in &entries {
                println!("{}\t{}", e.entry_type.as_str(), e.path.display());
            }
        }
        InspectKind::Graph => {
            let ctx = engine::base_context(root, "graph");
            let mut configs = Vec::new();
            for e in &units {
                let Some(file) = engine::unit_config_file(&e.path) else { continue };
                configs.push((e.path.clone(), config::parse(&file, ctx.clone())?));
            }
            let graph = graph::build_graph(
                &configs,
                &[],
                &BuildOptions {
                    include_external_dependencies: common.include_external_dependencies,
                    non_interactive: common.non_interactive,
                    strict_include: common.queue_strict_include || !common.filter.is_empty(),
                },
            )?;
            for idx in 0..graph.node_count() {
                for &dep in graph.dependencies_of(idx) {
                    println!("{} -> {}", graph.unit_paths[idx].display(), graph.unit_paths[dep].display());
                }
            }
        }
        InspectKind::Render { json, with_metadata } => {
            let ctx = engine::base_context(root, "render");
            for e in &units {
                let Some(file) = engine::unit_config_file(&e.path) else { continue };
                let cfg = config::parse(&file, ctx.clone())?;
                render_config(&e.path, &cfg, json, with_metadata);
            }
        }
        InspectKind::InfoPrint => {
            println!("tgr {}", env!("CARGO_PKG_VERSION"));
            println!("working_dir: {}", root.display());
            println!("units discovered: {}", units.len());
        }
    }
    Ok(0)
}

fn render_config(unit_path: &std::path::Path, cfg: &config::Config, json: bool, with_metadata: bool) {
    let inputs_json: serde_json::Value = cfg.inputs.clone().into();
    if json {
        let mut body = serde_json::json!({ "inputs": inputs_json });
        if with_metadata {
            body["unit_path"] = serde_json::Value::String(unit_path.display().to_string());
            body["terraform_binary"] = serde_json::Value::String(cfg.terraform_binary.clone());
        }
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        println!("# {}", unit_path.display());
        println!("inputs = {}", cfg.inputs);
        if with_metadata {
            println!("terraform_binary = {}", cfg.terraform_binary);
        }
    }
}

fn hclfmt_command(common: &CommonArgs, validate_only: bool) -> Result<i32, RunError> {
    let root = &common.working_dir;
    let entries = discovery::reclassify_stacks(root, discovery::discover(root, &discovery_options(common))?);
    let mut had_errors = false;

    for entry in entries.iter().filter(|e| e.entry_type == EntryType::Unit) {
        let file = entry.path.join(terragrunt_rs::constants::UNIT_CONFIG_FILENAME);
        if !file.is_file() {
            continue;
        }
        let raw = match std::fs::read_to_string(&file) {
            Ok(raw) => raw,
            Err(err) => {
                eprintln!("{}: {err}", file.display());
                had_errors = true;
                continue;
            }
        };
        match hcl::parse(&raw) {
            Ok(body) => {
                if !validate_only {
                    let formatted = hcl::to_string(&body).unwrap_or(raw);
                    if let Err(err) = std::fs::write(&file, formatted) {
                        eprintln!("{}: {err}", file.display());
                        had_errors = true;
                    }
                }
            }
            Err(err) => {
                eprintln!("{}: {err}", file.display());
                had_errors = true;
            }
        }
    }

    Ok(if had_errors { terragrunt_rs::errors::ExitCode::RunFailure as i32 } else { 0 })
}
