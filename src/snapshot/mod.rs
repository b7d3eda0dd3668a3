pub mod manager;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{FlagError, Result};
use crate::experiments::ExperimentAssignment;
use crate::rules::{FeatureEvaluationResult, RuleSource};

pub use manager::{verify_snapshot, SnapshotManager, SnapshotStatus};

// MODELS

/// A resolved feature as frozen into a snapshot. Evaluation time is supplied at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSnapshotEntry {
    pub feature_id: String,
    pub enabled: bool,
    pub source: RuleSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub reason: String,
}

impl From<FeatureEvaluationResult> for FeatureSnapshotEntry {
    fn from(result: FeatureEvaluationResult) -> Self {
        Self {
            feature_id: result.feature_id,
            enabled: result.enabled,
            source: result.source,
            rule_id: result.rule_id,
            reason: result.reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSnapshotEntry {
    pub experiment_id: String,
    pub variant_id: String,
    pub variant_name: String,
    pub bucket: i32,
}

impl From<ExperimentAssignment> for ExperimentSnapshotEntry {
    fn from(assignment: ExperimentAssignment) -> Self {
        Self {
            experiment_id: assignment.experiment_id,
            variant_id: assignment.variant_id,
            variant_name: assignment.variant_name,
            bucket: assignment.bucket,
        }
    }
}

/// Frozen, checksummed resolution state for one tenant and subject.
///
/// Snapshots are never updated in place; a changed rule set means generating a
/// new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSnapshot {
    pub id: String,
    pub tenant_id: String,
    pub tenant_hash: String,
    pub subject_id: String,
    pub features: BTreeMap<String, FeatureSnapshotEntry>,
    pub experiments: BTreeMap<String, ExperimentSnapshotEntry>,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotOptions {
    /// Overrides the configured lifetime for this snapshot.
    pub expires_in_ms: Option<i64>,
}

impl SnapshotOptions {
    pub fn expires_in_ms(ms: i64) -> Self {
        Self {
            expires_in_ms: Some(ms),
        }
    }
}

/// The part of a snapshot covered by its checksum.
///
/// Field names and the instant format are shared with every other producer of
/// snapshots; keys are deep-sorted before hashing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SnapshotBody<'a> {
    pub tenant_id: &'a str,
    pub subject_id: &'a str,
    pub features: &'a BTreeMap<String, FeatureSnapshotEntry>,
    pub experiments: &'a BTreeMap<String, ExperimentSnapshotEntry>,
    pub generated_at: String,
    pub expires_at: String,
}

/// ISO-8601 UTC with millisecond precision, e.g. `2025-01-01T12:00:00.000Z`.
pub fn iso_millis(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// HELPER FUNCTIONS

/// Structural checks for a snapshot received from storage or another process
pub fn validate_snapshot_shape(snapshot: &FeatureSnapshot) -> Result<()> {
    let required = [
        ("id", &snapshot.id),
        ("tenantId", &snapshot.tenant_id),
        ("tenantHash", &snapshot.tenant_hash),
        ("subjectId", &snapshot.subject_id),
        ("checksum", &snapshot.checksum),
    ];
    for (field, value) in required {
        if value.is_empty() {
            return Err(FlagError::InvalidDefinition(format!(
                "Snapshot {} cannot be empty",
                field
            )));
        }
    }

    if snapshot.generated_at >= snapshot.expires_at {
        return Err(FlagError::InvalidDefinition(
            "generatedAt must be before expiresAt".to_string(),
        ));
    }

    Ok(())
}
