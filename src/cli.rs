//! C6 — External interfaces: the `tgr` CLI surface, built on `clap`'s
//! derive macros. The CLI lives alongside the library it drives since the
//! whole crate is the run engine.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::constants::{ENV_PREFIX, ENV_PREFIX_LEGACY};
use crate::logger::LogLevel;

#[derive(Parser)]
#[command(name = "tgr", version, about = "Run engine for HCL-family infrastructure units")]
pub struct Cli {
    #[command(subcommand)]
    pub command: TopCommand,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, env = "TG_WORKING_DIR", default_value = ".")]
    pub working_dir: PathBuf,

    #[arg(long, env = "TG_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TG_DOWNLOAD_DIR")]
    pub download_dir: Option<String>,

    #[arg(long, env = "TG_SOURCE")]
    pub source: Option<String>,

    #[arg(long = "source-map", env = "TG_SOURCE_MAP")]
    pub source_map: Vec<String>,

    #[arg(long, env = "TG_SOURCE_UPDATE")]
    pub source_update: bool,

    #[arg(long, env = "TG_PARALLELISM")]
    pub parallelism: Option<usize>,

    #[arg(long, env = "TG_NON_INTERACTIVE")]
    pub non_interactive: bool,

    #[arg(long, env = "TG_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    #[arg(long, env = "TG_NO_COLOR")]
    pub no_color: bool,

    #[arg(long, env = "TG_TF_FORWARD_STDOUT")]
    pub tf_forward_stdout: bool,

    #[arg(long = "feature", env = "TG_FEATURE")]
    pub feature: Vec<String>,

    #[arg(long = "queue-include-dir", env = "TG_QUEUE_INCLUDE_DIR")]
    pub queue_include_dir: Vec<String>,

    #[arg(long = "queue-exclude-dir", env = "TG_QUEUE_EXCLUDE_DIR")]
    pub queue_exclude_dir: Vec<String>,

    #[arg(long = "queue-include-units-reading", env = "TG_QUEUE_INCLUDE_UNITS_READING")]
    pub queue_include_units_reading: Vec<PathBuf>,

    #[arg(long = "queue-strict-include", env = "TG_QUEUE_STRICT_INCLUDE")]
    pub queue_strict_include: bool,

    #[arg(long = "filter", env = "TG_FILTER")]
    pub filter: Vec<String>,

    #[arg(long = "filter-allow-destroy", env = "TG_FILTER_ALLOW_DESTROY")]
    pub filter_allow_destroy: bool,

    #[arg(long = "dependency-fetch-output-from-state", env = "TG_DEPENDENCY_FETCH_OUTPUT_FROM_STATE")]
    pub dependency_fetch_output_from_state: bool,

    #[arg(long = "no-dependency-fetch-output-from-state")]
    pub no_dependency_fetch_output_from_state: bool,

    #[arg(long = "include-external-dependencies", env = "TG_INCLUDE_EXTERNAL_DEPENDENCIES")]
    pub include_external_dependencies: bool,

    #[arg(long = "backend-bootstrap", env = "TG_BACKEND_BOOTSTRAP")]
    pub backend_bootstrap: bool,

    #[arg(long, env = "TG_FORCE")]
    pub force: bool,

    #[arg(long = "report-file", env = "TG_REPORT_FILE")]
    pub report_file: Option<PathBuf>,

    #[arg(long = "out-dir", env = "TG_OUT_DIR")]
    pub out_dir: Option<PathBuf>,

    #[arg(long = "json-out", env = "TG_JSON_OUT")]
    pub json_out: Option<PathBuf>,

    #[arg(long = "auth-provider-cmd", env = "TG_AUTH_PROVIDER_CMD")]
    pub auth_provider_cmd: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum TopCommand {
    /// `run [--all] [--] <engine-subcommand> [engine-args...]`
    Run(RunArgs),
    /// Legacy alias for `run --all <subcommand>`.
    RunAll(RunAllArgs),
    Backend(BackendArgs),
    Find,
    List,
    Graph,
    Render(RenderArgs),
    Info(InfoArgs),
    Hclfmt,
    Hclvalidate,
    /// Catches bare `<subcommand>` and legacy `<subcommand>-all` forms,
    /// neither of which is a fixed set (they mirror whatever the engine
    /// binary itself understands).
    #[command(external_subcommand)]
    External(Vec<String>),
}

#[derive(Args)]
pub struct RunArgs {
    #[arg(long)]
    pub all: bool,
    pub subcommand: String,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub passthrough: Vec<String>,
}

#[derive(Args)]
pub struct RunAllArgs {
    pub subcommand: String,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub passthrough: Vec<String>,
}

#[derive(Args)]
pub struct BackendArgs {
    #[command(subcommand)]
    pub action: BackendAction,
}

#[derive(Subcommand)]
pub enum BackendAction {
    Bootstrap,
    Migrate {
        #[arg(long = "src-key")]
        src_key: String,
        #[arg(long = "dst-key")]
        dst_key: String,
    },
    Delete {
        #[arg(long = "key")]
        keys: Vec<String>,
    },
}

#[derive(Args)]
pub struct RenderArgs {
    #[arg(long)]
    pub json: bool,
    #[arg(long = "with-metadata")]
    pub with_metadata: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    #[command(subcommand)]
    pub action: InfoAction,
}

#[derive(Subcommand)]
pub enum InfoAction {
    Print,
}

/// One (modern, legacy) environment-variable name pair per common flag, used
/// to mirror `TERRAGRUNT_*` onto `TG_*` before clap reads the environment;
/// the legacy form is still accepted but emits a deprecation warning.
const ENV_ALIASES: &[&str] = &[
    "WORKING_DIR",
    "CONFIG",
    "DOWNLOAD_DIR",
    "SOURCE",
    "SOURCE_MAP",
    "SOURCE_UPDATE",
    "PARALLELISM",
    "NON_INTERACTIVE",
    "LOG_LEVEL",
    "NO_COLOR",
    "TF_FORWARD_STDOUT",
    "FEATURE",
    "QUEUE_INCLUDE_DIR",
    "QUEUE_EXCLUDE_DIR",
    "QUEUE_INCLUDE_UNITS_READING",
    "QUEUE_STRICT_INCLUDE",
    "FILTER",
    "FILTER_ALLOW_DESTROY",
    "DEPENDENCY_FETCH_OUTPUT_FROM_STATE",
    "INCLUDE_EXTERNAL_DEPENDENCIES",
    "BACKEND_BOOTSTRAP",
    "FORCE",
    "REPORT_FILE",
    "OUT_DIR",
    "JSON_OUT",
    "AUTH_PROVIDER_CMD",
];

/// Rewrites any `--terragrunt-<flag>[=value]` argument to the modern
/// `--<flag>[=value]` spelling and warns, so the legacy Terragrunt CLI
/// spelling keeps working alongside `TG_*`'s env-var mirroring above. Flag
/// names are derived from `ENV_ALIASES` so the two stay in lockstep. Must run
/// before `Cli::parse_from()`.
pub fn mirror_legacy_args(args: impl Iterator<Item = String>) -> Vec<String> {
    args.map(|arg| {
        for suffix in ENV_ALIASES {
            let flag = suffix.to_ascii_lowercase().replace('_', "-");
            let modern = format!("--{flag}");
            let legacy = format!("--terragrunt-{flag}");
            if arg == legacy {
                eprintln!("warning: {legacy} is deprecated, use {modern} instead");
                return modern;
            }
            if let Some(value) = arg.strip_prefix(&format!("{legacy}=")) {
                eprintln!("warning: {legacy} is deprecated, use {modern} instead");
                return format!("{modern}={value}");
            }
        }
        arg
    })
    .collect()
}

/// For every flag whose modern `TG_*` variable is unset but whose legacy
/// `TERRAGRUNT_*` variable is present, copies the legacy value across and
/// warns. Must run before `Cli::parse()` so clap's `env = "TG_..."`
/// attributes see it.
pub fn mirror_legacy_env() {
    for suffix in ENV_ALIASES {
        let modern = format!("{ENV_PREFIX}{suffix}");
        let legacy = format!("{ENV_PREFIX_LEGACY}{suffix}");
        if std::env::var_os(&modern).is_some() {
            continue;
        }
        if let Some(value) = std::env::var_os(&legacy) {
            eprintln!("warning: {legacy} is deprecated, use {modern} instead");
            // SAFETY: single-threaded at this point in process startup, before
            // Cli::parse() or any worker thread has been spawned.
            unsafe { std::env::set_var(&modern, value) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_env_var_is_mirrored_onto_modern_name() {
        unsafe {
            std::env::remove_var("TG_PARALLELISM");
            std::env::set_var("TERRAGRUNT_PARALLELISM", "4");
        }
        mirror_legacy_env();
        assert_eq!(std::env::var("TG_PARALLELISM").unwrap(), "4");
        unsafe {
            std::env::remove_var("TG_PARALLELISM");
            std::env::remove_var("TERRAGRUNT_PARALLELISM");
        }
    }

    #[test]
    fn legacy_flag_spelling_rewritten_to_modern() {
        let args = vec!["tgr".to_string(), "run".to_string(), "--terragrunt-non-interactive".to_string(), "plan".to_string()];
        let rewritten = mirror_legacy_args(args.into_iter());
        assert_eq!(rewritten, vec!["tgr", "run", "--non-interactive", "plan"]);
    }

    #[test]
    fn legacy_flag_spelling_with_value_rewritten_to_modern() {
        let args = vec!["tgr".to_string(), "run".to_string(), "--terragrunt-parallelism=4".to_string()];
        let rewritten = mirror_legacy_args(args.into_iter());
        assert_eq!(rewritten, vec!["tgr", "run", "--parallelism=4"]);
    }

    #[test]
    fn modern_flag_spelling_passes_through_unchanged() {
        let args = vec!["tgr".to_string(), "run".to_string(), "--non-interactive".to_string()];
        let rewritten = mirror_legacy_args(args.into_iter());
        assert_eq!(rewritten, vec!["tgr", "run", "--non-interactive"]);
    }

    #[test]
    fn modern_env_var_takes_precedence() {
        unsafe {
            std::env::set_var("TG_FORCE", "modern");
            std::env::set_var("TERRAGRUNT_FORCE", "legacy");
        }
        mirror_legacy_env();
        assert_eq!(std::env::var("TG_FORCE").unwrap(), "modern");
        unsafe {
            std::env::remove_var("TG_FORCE");
            std::env::remove_var("TERRAGRUNT_FORCE");
        }
    }
}
