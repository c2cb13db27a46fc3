//! Run report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Disposition;
use crate::target::Target;

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 1 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Outcome of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Succeeded,
    Failed,
}

/// Category of a target-scoped failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Session could not be established (auth, network, missing resource)
    Connection,

    /// Session established but a catalog query failed
    Query,

    /// Extraction exceeded the per-target timeout
    Timeout,

    /// Source misconfigured or unavailable in this build
    Config,

    /// Extraction task panicked or was cancelled (since 1.1)
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Timeout => "timeout",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Error recorded for a failed target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-target outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Target this result belongs to
    pub target: Target,

    /// Final status
    pub status: TargetStatus,

    /// Rows extracted (0 on failure)
    pub row_count: usize,

    /// Failure detail, present only when status is failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,

    /// Wall-clock time spent on the target
    pub duration_ms: u64,
}

impl RunResult {
    pub fn succeeded(target: Target, row_count: usize, duration_ms: u64) -> Self {
        Self {
            target,
            status: TargetStatus::Succeeded,
            row_count,
            error: None,
            duration_ms,
        }
    }

    pub fn failed(target: Target, error: ErrorDetail, duration_ms: u64) -> Self {
        Self {
            target,
            status: TargetStatus::Failed,
            row_count: 0,
            error: Some(error),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TargetStatus::Succeeded
    }
}

/// Rows committed by a sink, total and per destination table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsWritten {
    pub total: usize,
    pub tables: BTreeMap<String, usize>,
}

impl RowsWritten {
    pub fn add(&mut self, table: impl Into<String>, rows: usize) {
        *self.tables.entry(table.into()).or_insert(0) += rows;
        self.total += rows;
    }
}

/// What happened at the consolidation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SinkOutcome {
    /// Sink has not run yet
    Pending,

    /// All rows committed
    Written { rows: RowsWritten },

    /// Sink failed; nothing from this run was committed
    Failed { error: String },

    /// Sink was not called
    Skipped { reason: String },
}

/// Summary statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Number of targets in the registry
    pub targets_total: usize,

    /// Targets extracted successfully
    pub succeeded: usize,

    /// Targets that failed extraction
    pub failed: usize,

    /// Rows extracted across all targets
    pub rows_extracted: usize,

    /// Rows committed to the destination
    pub rows_written: usize,
}

/// Harvest run report (run-report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub version: ReportVersion,

    /// Run identifier
    pub run_id: String,

    /// Run start; also the `extracted_at` value of every row
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Write disposition used for the sink
    pub disposition: Disposition,

    /// Query set version and digest
    pub query_set_version: u32,
    pub query_set_digest: String,

    /// Summary statistics
    pub summary: ReportSummary,

    /// Per-target results in registry order
    pub results: Vec<RunResult>,

    /// Consolidation outcome
    pub sink: SinkOutcome,
}

impl RunReport {
    /// Create an empty report for a run starting at `started_at`
    pub fn new(
        started_at: DateTime<Utc>,
        disposition: Disposition,
        query_set_version: u32,
        query_set_digest: impl Into<String>,
    ) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            run_id: Self::run_id_for(started_at),
            started_at,
            finished_at: None,
            disposition,
            query_set_version,
            query_set_digest: query_set_digest.into(),
            summary: ReportSummary::default(),
            results: Vec::new(),
            sink: SinkOutcome::Pending,
        }
    }

    /// Run identifier derived from the start time
    pub fn run_id_for(started_at: DateTime<Utc>) -> String {
        started_at.format("run_%Y%m%dT%H%M%S%3fZ").to_string()
    }

    /// Add a target result
    pub fn add_result(&mut self, result: RunResult) {
        self.summary.targets_total += 1;
        match result.status {
            TargetStatus::Succeeded => {
                self.summary.succeeded += 1;
                self.summary.rows_extracted += result.row_count;
            }
            TargetStatus::Failed => self.summary.failed += 1,
        }
        self.results.push(result);
    }

    /// Record the sink outcome and close the report
    pub fn finish(&mut self, sink: SinkOutcome, finished_at: DateTime<Utc>) {
        self.summary.rows_written = match &sink {
            SinkOutcome::Written { rows } => rows.total,
            _ => 0,
        };
        self.sink = sink;
        self.finished_at = Some(finished_at);
    }

    /// Check if any target failed
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// Check if the consolidation step failed
    pub fn sink_failed(&self) -> bool {
        matches!(self.sink, SinkOutcome::Failed { .. })
    }

    /// Failed results only
    pub fn failures(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00.250Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn empty_report() {
        let report = RunReport::new(started(), Disposition::Replace, 1, "abc");
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert_eq!(report.run_id, "run_20240501T120000250Z");
        assert_eq!(report.summary.targets_total, 0);
        assert_eq!(report.sink, SinkOutcome::Pending);
        assert!(!report.has_failures());
    }

    #[test]
    fn report_counts_results() {
        let mut report = RunReport::new(started(), Disposition::Append, 1, "abc");
        report.add_result(RunResult::succeeded(Target::new("project-a", "i1", "d1"), 12, 30));
        report.add_result(RunResult::failed(
            Target::new("project-b", "i2", "d2"),
            ErrorDetail { kind: ErrorKind::Connection, message: "unreachable".into() },
            5,
        ));

        assert_eq!(report.summary.targets_total, 2);
        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.rows_extracted, 12);
        assert!(report.has_failures());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn finish_records_rows_written() {
        let mut report = RunReport::new(started(), Disposition::Replace, 1, "abc");
        let mut rows = RowsWritten::default();
        rows.add("spanner_is_columns", 10);
        rows.add("spanner_is_tables", 2);
        rows.add("spanner_is_columns", 1);

        report.finish(SinkOutcome::Written { rows }, started());
        assert_eq!(report.summary.rows_written, 13);
        assert!(report.finished_at.is_some());
        assert!(!report.sink_failed());
    }

    #[test]
    fn failed_sink_reports_zero_rows() {
        let mut report = RunReport::new(started(), Disposition::Replace, 1, "abc");
        report.finish(SinkOutcome::Failed { error: "quota".into() }, started());
        assert_eq!(report.summary.rows_written, 0);
        assert!(report.sink_failed());
    }

    #[test]
    fn internal_kind_serializes_lowercase() {
        let detail = ErrorDetail { kind: ErrorKind::Internal, message: "panicked".into() };
        let json = serde_json::to_string(&detail).unwrap();
        assert!(json.contains("\"kind\":\"internal\""));
        assert_eq!(ErrorKind::Internal.to_string(), "internal");
    }

    #[test]
    fn report_serialization() {
        let mut report = RunReport::new(started(), Disposition::Replace, 1, "abc");
        report.finish(SinkOutcome::Skipped { reason: "no rows".into() }, started());
        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"disposition\": \"replace\""));
        assert!(json.contains("\"status\": \"skipped\""));

        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
