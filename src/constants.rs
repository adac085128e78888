//! Well-known names and defaults shared across components.

/// Canonical unit configuration filename recognised by discovery (C3).
pub const UNIT_CONFIG_FILENAME: &str = "terragrunt.hcl";

/// Legacy accepted filename, still recognised but not emitted by `hclfmt`.
pub const UNIT_CONFIG_FILENAME_JSON: &str = "terragrunt.hcl.json";

/// Default staged-working-directory root, created beside the unit.
pub const DEFAULT_DOWNLOAD_DIR: &str = ".terragrunt-cache";

/// Default engine binary invoked when `terraform_binary` is unset.
pub const DEFAULT_ENGINE_BINARY: &str = "tofu";

/// Comment prefix marking files written by generate blocks / backend codegen.
pub const GENERATED_FILE_COMMENT_PREFIX: &str = "# Generated by terragrunt-rs, do not edit manually";

/// Default grace period the scheduler waits for a unit's subprocess to exit
/// after an interrupt before sending SIGKILL.
pub const DEFAULT_KILL_GRACE_PERIOD_SECS: u64 = 10;

/// Default bounded total duration for backend bootstrap retries.
pub const DEFAULT_BOOTSTRAP_RETRY_BUDGET_SECS: u64 = 60;

/// Environment variable prefix for the modern flag spelling.
pub const ENV_PREFIX: &str = "TG_";

/// Environment variable prefix for the deprecated flag spelling.
pub const ENV_PREFIX_LEGACY: &str = "TERRAGRUNT_";
