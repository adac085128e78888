//! C11 — Report. Accumulates one `Record` per scheduled unit under
//! concurrency and renders a human summary plus optional JSON/CSV.

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResultKind {
    Succeeded,
    Failed,
    Excluded,
    EarlyExit,
}

impl std::fmt::Display for RunResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunResultKind::Succeeded => "succeeded",
            RunResultKind::Failed => "failed",
            RunResultKind::Excluded => "excluded",
            RunResultKind::EarlyExit => "early-exit",
        };
        write!(f, "{s}")
    }
}

/// One run record.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Started")]
    pub started: DateTime<Utc>,
    #[serde(rename = "Ended")]
    pub ended: DateTime<Utc>,
    #[serde(rename = "Result")]
    pub result: RunResultKind,
    #[serde(rename = "Reason", skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "Cause", skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

pub struct Report {
    /// Identifies one invocation of the engine in logs and the summary line;
    /// not part of the Report JSON schema itself, which stays just the
    /// record array.
    run_id: Uuid,
    records: Mutex<Vec<Record>>,
}

impl Default for Report {
    fn default() -> Self {
        Report { run_id: Uuid::new_v4(), records: Mutex::new(Vec::new()) }
    }
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn push(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    /// A human-readable summary table: counts per result, total duration.
    pub fn summary_table(&self) -> String {
        let records = self.records.lock().unwrap();
        let mut succeeded = 0;
        let mut failed = 0;
        let mut excluded = 0;
        let mut early_exit = 0;
        let mut total = Duration::ZERO;
        for r in records.iter() {
            match r.result {
                RunResultKind::Succeeded => succeeded += 1,
                RunResultKind::Failed => failed += 1,
                RunResultKind::Excluded => excluded += 1,
                RunResultKind::EarlyExit => early_exit += 1,
            }
            if let Ok(d) = (r.ended - r.started).to_std() {
                total += d;
            }
        }
        format!(
            "run {}: units: {} succeeded, {} failed, {} excluded, {} early-exit (total duration {:.1}s)",
            self.run_id,
            succeeded,
            failed,
            excluded,
            early_exit,
            total.as_secs_f64()
        )
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let records = self.records.lock().unwrap();
        let body = serde_json::to_string_pretty(&*records)?;
        fs::write(path, body)
    }

    pub fn write_csv(&self, path: &Path) -> std::io::Result<()> {
        let records = self.records.lock().unwrap();
        let mut out = String::from("Name,Started,Ended,Result,Reason,Cause\n");
        for r in records.iter() {
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                r.name,
                r.started.to_rfc3339(),
                r.ended.to_rfc3339(),
                r.result,
                r.reason.as_deref().unwrap_or(""),
                r.cause.as_deref().unwrap_or(""),
            ));
        }
        fs::write(path, out)
    }

    /// Any non-success record, for the final error summary listing every
    /// non-success with its classification.
    pub fn non_success(&self) -> Vec<Record> {
        self.records.lock().unwrap().iter().filter(|r| r.result != RunResultKind::Succeeded).cloned().collect()
    }
}
