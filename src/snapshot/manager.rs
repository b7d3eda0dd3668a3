use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    iso_millis, ExperimentSnapshotEntry, FeatureSnapshot, FeatureSnapshotEntry, SnapshotBody,
    SnapshotOptions,
};
use crate::config::SnapshotConfig;
use crate::context::{Clock, EvaluationContext, FixedClock, SystemClock};
use crate::error::{FlagError, Result};
use crate::experiments::{assign_with_clock, ExperimentDefinition};
use crate::hash::{canonical_checksum, tenant_fingerprint};
use crate::rules::{resolve_with_clock, FeatureEvaluationResult, FeatureRule, RuleSource};

pub const NOT_IN_SNAPSHOT_REASON: &str = "Feature not found in snapshot, defaulting to disabled";
pub const FROM_SNAPSHOT_SUFFIX: &str = " (from verified snapshot)";

/// Where a snapshot stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    Verified,
    Expired,
    Tampered,
}

/// Freezes resolutions into snapshots and evaluates from them offline.
#[derive(Debug, Clone)]
pub struct SnapshotManager<C: Clock = SystemClock> {
    config: SnapshotConfig,
    clock: C,
}

impl Default for SnapshotManager<SystemClock> {
    fn default() -> Self {
        Self::new(SnapshotConfig::default())
    }
}

impl SnapshotManager<SystemClock> {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            config,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> SnapshotManager<C> {
    pub fn with_clock(config: SnapshotConfig, clock: C) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Resolve every feature and experiment of the context's tenant and freeze the result.
    ///
    /// Rules and experiments of other tenants are dropped rather than rejected.
    #[instrument(
        skip_all,
        fields(tenant_id = %context.tenant_id, subject_id = %context.subject_id)
    )]
    pub fn generate(
        &self,
        context: &EvaluationContext,
        rules: &[FeatureRule],
        experiments: &[ExperimentDefinition],
        options: SnapshotOptions,
    ) -> Result<FeatureSnapshot> {
        let expires_in_ms = options.expires_in_ms.unwrap_or(self.config.default_ttl_ms);
        if expires_in_ms <= 0 {
            return Err(FlagError::InvalidDefinition(format!(
                "Snapshot lifetime must be positive, got {}ms",
                expires_in_ms
            )));
        }

        // Millisecond precision so the stored instants and their ISO form agree
        let now = context.now_or(&self.clock).trunc_subsecs(3);
        let expires_at = Duration::try_milliseconds(expires_in_ms)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                FlagError::InvalidDefinition(format!(
                    "Snapshot lifetime of {}ms is out of range",
                    expires_in_ms
                ))
            })?;
        let pinned = EvaluationContext {
            now: Some(now),
            ..context.clone()
        };
        let clock = FixedClock(now);

        // Step 1: Drop everything belonging to other tenants
        let tenant_rules: Vec<FeatureRule> = rules
            .iter()
            .filter(|r| r.tenant_id == context.tenant_id)
            .cloned()
            .collect();
        let dropped_rules = rules.len() - tenant_rules.len();
        let tenant_experiments = experiments
            .iter()
            .filter(|e| e.tenant_id == context.tenant_id);

        // Step 2: Resolve each distinct feature once
        let mut features = BTreeMap::new();
        for rule in &tenant_rules {
            if features.contains_key(&rule.feature_id) {
                continue;
            }
            let result = resolve_with_clock(&rule.feature_id, &pinned, &tenant_rules, &clock)?;
            features.insert(rule.feature_id.clone(), FeatureSnapshotEntry::from(result));
        }

        // Step 3: Assign every experiment
        let mut experiment_entries = BTreeMap::new();
        for experiment in tenant_experiments {
            let assignment = assign_with_clock(experiment, &pinned, &clock)?;
            experiment_entries.insert(
                experiment.id.clone(),
                ExperimentSnapshotEntry::from(assignment),
            );
        }

        // Step 4: Seal
        let checksum = canonical_checksum(&SnapshotBody {
            tenant_id: &context.tenant_id,
            subject_id: &context.subject_id,
            features: &features,
            experiments: &experiment_entries,
            generated_at: iso_millis(&now),
            expires_at: iso_millis(&expires_at),
        })?;

        let snapshot = FeatureSnapshot {
            id: Uuid::new_v4().to_string(),
            tenant_id: context.tenant_id.clone(),
            tenant_hash: tenant_fingerprint(&context.tenant_id),
            subject_id: context.subject_id.clone(),
            features,
            experiments: experiment_entries,
            generated_at: now,
            expires_at,
            checksum,
        };

        debug!(
            snapshot_id = %snapshot.id,
            features = snapshot.features.len(),
            experiments = snapshot.experiments.len(),
            dropped_rules,
            expires_at = %snapshot.expires_at,
            "snapshot generated"
        );
        Ok(snapshot)
    }

    pub fn verify(&self, snapshot: &FeatureSnapshot) -> Result<()> {
        verify_snapshot(snapshot)
    }

    /// Evaluate a feature from a snapshot without the rule set that produced it.
    ///
    /// Order of checks: caller tenant, integrity, expiry. `now` defaults to the
    /// manager's clock.
    #[instrument(skip(self, snapshot), fields(snapshot_id = %snapshot.id))]
    pub fn evaluate_from_snapshot(
        &self,
        feature_id: &str,
        snapshot: &FeatureSnapshot,
        now: Option<DateTime<Utc>>,
        context_tenant_id: Option<&str>,
    ) -> Result<FeatureEvaluationResult> {
        let now = self.check_readable(snapshot, now, context_tenant_id)?;

        let Some(entry) = snapshot.features.get(feature_id) else {
            debug!(feature_id, "feature not in snapshot, defaulting to disabled");
            return Ok(FeatureEvaluationResult {
                feature_id: feature_id.to_string(),
                enabled: false,
                source: RuleSource::System,
                rule_id: None,
                reason: NOT_IN_SNAPSHOT_REASON.to_string(),
                evaluated_at: now,
            });
        };

        Ok(FeatureEvaluationResult {
            feature_id: entry.feature_id.clone(),
            enabled: entry.enabled,
            source: entry.source,
            rule_id: entry.rule_id.clone(),
            reason: format!("{}{}", entry.reason, FROM_SNAPSHOT_SUFFIX),
            evaluated_at: now,
        })
    }

    /// Read a frozen experiment assignment, under the same checks as
    /// [`evaluate_from_snapshot`](Self::evaluate_from_snapshot).
    pub fn experiment_from_snapshot(
        &self,
        experiment_id: &str,
        snapshot: &FeatureSnapshot,
        now: Option<DateTime<Utc>>,
        context_tenant_id: Option<&str>,
    ) -> Result<Option<ExperimentSnapshotEntry>> {
        self.check_readable(snapshot, now, context_tenant_id)?;
        Ok(snapshot.experiments.get(experiment_id).cloned())
    }

    /// Classify a snapshot without failing.
    pub fn status(&self, snapshot: &FeatureSnapshot, now: Option<DateTime<Utc>>) -> SnapshotStatus {
        if verify_snapshot(snapshot).is_err() {
            return SnapshotStatus::Tampered;
        }
        let now = now.unwrap_or_else(|| self.clock.now());
        if now > snapshot.expires_at {
            SnapshotStatus::Expired
        } else {
            SnapshotStatus::Verified
        }
    }

    fn check_readable(
        &self,
        snapshot: &FeatureSnapshot,
        now: Option<DateTime<Utc>>,
        context_tenant_id: Option<&str>,
    ) -> Result<DateTime<Utc>> {
        if let Some(tenant_id) = context_tenant_id.filter(|t| !t.is_empty()) {
            if tenant_id != snapshot.tenant_id {
                warn!(
                    snapshot_tenant = %snapshot.tenant_id,
                    context_tenant = %tenant_id,
                    "snapshot requested for a different tenant"
                );
                return Err(FlagError::tenant_mismatch(
                    format!("Snapshot {}", snapshot.id),
                    tenant_id,
                    &snapshot.tenant_id,
                ));
            }
        }

        verify_snapshot(snapshot)?;

        let now = now.unwrap_or_else(|| self.clock.now());
        if now > snapshot.expires_at {
            warn!(expires_at = %snapshot.expires_at, now = %now, "snapshot expired");
            return Err(FlagError::SnapshotExpired {
                expires_at: snapshot.expires_at,
                now,
            });
        }
        Ok(now)
    }
}

/// Recompute the checksum and tenant fingerprint from the snapshot's own fields.
pub fn verify_snapshot(snapshot: &FeatureSnapshot) -> Result<()> {
    // The checksum only covers whole milliseconds, so finer precision is unsealed
    if has_sub_millis(&snapshot.generated_at) || has_sub_millis(&snapshot.expires_at) {
        warn!(snapshot_id = %snapshot.id, "snapshot instants carry sub-millisecond precision");
        return Err(FlagError::SnapshotIntegrity(
            "instants finer than a millisecond are not covered by the checksum".to_string(),
        ));
    }

    let expected_checksum = canonical_checksum(&SnapshotBody {
        tenant_id: &snapshot.tenant_id,
        subject_id: &snapshot.subject_id,
        features: &snapshot.features,
        experiments: &snapshot.experiments,
        generated_at: iso_millis(&snapshot.generated_at),
        expires_at: iso_millis(&snapshot.expires_at),
    })?;

    if snapshot.checksum != expected_checksum {
        warn!(snapshot_id = %snapshot.id, "snapshot checksum mismatch");
        return Err(FlagError::SnapshotIntegrity(
            "checksum mismatch, data may have been tampered with".to_string(),
        ));
    }

    if snapshot.tenant_hash != tenant_fingerprint(&snapshot.tenant_id) {
        warn!(snapshot_id = %snapshot.id, "snapshot tenant hash mismatch");
        return Err(FlagError::SnapshotIntegrity(
            "tenant hash mismatch, tenant isolation violated".to_string(),
        ));
    }

    Ok(())
}

fn has_sub_millis(instant: &DateTime<Utc>) -> bool {
    instant.timestamp_subsec_nanos() % 1_000_000 != 0
}
