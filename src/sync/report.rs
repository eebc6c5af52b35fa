//! Structured per-run audit record

use super::reconciler::RunPhase;
use super::types::{DeletionPolicy, RunStatus, RunSummary, Snapshot};
use crate::clock::Timestamp;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Size of one bucket at the start of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub objects: usize,
    pub files: usize,
    pub directories: usize,
}

impl From<&Snapshot> for SnapshotStats {
    fn from(snapshot: &Snapshot) -> Self {
        let directories = snapshot.directory_count();
        SnapshotStats {
            objects: snapshot.len(),
            files: snapshot.len() - directories,
            directories,
        }
    }
}

/// One reconciliation run, emitted once when the run ends
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source_bucket: String,
    pub target_bucket: String,
    pub policy: DeletionPolicy,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub duration_ms: u64,
    /// Pre-run sizes; absent when that listing failed
    pub source: Option<SnapshotStats>,
    pub target: Option<SnapshotStats>,
    pub summary: RunSummary,
    /// Why the run failed before applying anything
    pub error: Option<String>,
    pub final_phase: RunPhase,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        self.summary.status
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"serialize_error\":\"{}\"}}", e))
    }

    /// Log the report; failed runs at `warn`, others at `info`
    pub fn emit(&self) {
        let report = self.to_json();
        let s = &self.summary;
        if s.status == RunStatus::Failed {
            warn!(
                run_id = %self.run_id,
                source = %self.source_bucket,
                target = %self.target_bucket,
                status = %s.status,
                error = self.error.as_deref().unwrap_or(""),
                report = %report,
                "Sync run failed"
            );
        } else {
            info!(
                run_id = %self.run_id,
                source = %self.source_bucket,
                target = %self.target_bucket,
                status = %s.status,
                copied = s.copied,
                updated = s.updated,
                deleted = s.deleted,
                failed = s.failed.len(),
                duration_ms = self.duration_ms,
                report = %report,
                "Sync run finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectMeta;

    #[test]
    fn test_snapshot_stats() {
        let snapshot = Snapshot::from_objects(
            "b",
            ["a", "dir/", "dir/b"].iter().map(|k| ObjectMeta {
                key: k.to_string(),
                etag: None,
                size: 0,
                last_modified_ms: 0,
            }),
        );
        let stats = SnapshotStats::from(&snapshot);
        assert_eq!(
            stats,
            SnapshotStats {
                objects: 3,
                files: 2,
                directories: 1
            }
        );
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = RunReport {
            run_id: Uuid::nil(),
            source_bucket: "src".to_string(),
            target_bucket: "dst".to_string(),
            policy: DeletionPolicy::KeepAll,
            started_at: Timestamp(1_000),
            finished_at: Timestamp(1_250),
            duration_ms: 250,
            source: Some(SnapshotStats::default()),
            target: None,
            summary: RunSummary {
                copied: 2,
                ..Default::default()
            },
            error: None,
            final_phase: RunPhase::Completed,
        };

        let value: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(value["policy"], "KEEP_ALL");
        assert_eq!(value["summary"]["copied"], 2);
        assert_eq!(value["summary"]["status"], "succeeded");
        assert_eq!(value["final_phase"], "Completed");
        assert_eq!(value["started_at"], 1_000);
        assert!(value["target"].is_null());
    }
}
