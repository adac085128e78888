use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use derivative::Derivative;

use crate::config::value::Value;

/// One frame of the `include` chain currently being evaluated, oldest
/// (closest to the repo root) first. Used by `path_relative_to_include()` /
/// `path_relative_from_include()` / `get_parent_terragrunt_dir()`.
#[derive(Debug, Clone)]
pub struct IncludeFrame {
    pub label: String,
    pub config_path: PathBuf,
}

/// Everything a built-in function or an expression evaluation needs that
/// isn't part of the expression itself: where we are on disk, what includes
/// are in scope, and what overrides were supplied on the command line / via
/// environment variables. Passed explicitly down the call graph rather than
/// held as module-level mutable state; the only shared state is the
/// process-wide caches in `config::cache`, which are keyed by path and
/// therefore safe to share.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct EvalContext {
    /// Directory containing the unit configuration file being evaluated.
    pub terragrunt_dir: PathBuf,
    /// Directory the engine will actually run in (the staged working dir);
    /// during dry config evaluation (e.g. `info print`) this equals
    /// `terragrunt_dir`.
    pub working_dir: PathBuf,
    /// Root of the repository containing `terragrunt_dir`, resolved once via
    /// the git probe (see `config::functions::get_repo_root`).
    pub repo_root: PathBuf,
    pub include_stack: Vec<IncludeFrame>,
    pub feature_overrides: BTreeMap<String, Value>,
    /// The process environment, which may carry cloud credentials
    /// (`AWS_SECRET_ACCESS_KEY` and the like); excluded from `Debug` so this
    /// context can't leak secrets into a log line.
    #[derivative(Debug = "ignore")]
    pub env: BTreeMap<String, String>,
    pub terraform_binary: String,
    /// Command currently being run (`plan`, `apply`, ...), used by
    /// `get_terraform_commands_that_need_vars()`.
    pub current_command: String,
    pub source_cli_flag: Option<String>,
    /// Every file this unit's evaluation has read so far: its own path, every
    /// `include`d path, and any path opened by `read_terragrunt_config` or
    /// `sops_decrypt_file`. Shared (not cloned) across `child_for_include` and
    /// recursive `evaluate_file` calls so the whole transitive closure lands
    /// in one place; `config::parse` gives each top-level unit a fresh one.
    pub reads: Rc<RefCell<Vec<PathBuf>>>,
}

impl EvalContext {
    pub fn child_for_include(&self, include: IncludeFrame) -> EvalContext {
        let mut ctx = self.clone();
        ctx.include_stack.push(include);
        ctx
    }

    pub fn nearest_include(&self) -> Option<&IncludeFrame> {
        self.include_stack.last()
    }

    pub fn root_include(&self) -> Option<&IncludeFrame> {
        self.include_stack.first()
    }
}
