use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{ExperimentAssignment, ExperimentDefinition, ExperimentVariant, INACTIVE_BUCKET};
use crate::context::{is_within, Clock, EvaluationContext, SystemClock};
use crate::error::{FlagError, Result};
use crate::hash::bucket_of;

pub const INACTIVE_REASON: &str = "Experiment not active, assigned to default variant";

/// Assign a variant, using the wall clock when the context has no `now`.
pub fn assign(
    experiment: &ExperimentDefinition,
    context: &EvaluationContext,
) -> Result<ExperimentAssignment> {
    assign_with_clock(experiment, context, &SystemClock)
}

/// Deterministically map the subject to a bucket and variant.
///
/// Time only gates whether the experiment is active; the bucket itself depends
/// on the experiment id, subject, tenant and salt alone.
pub fn assign_with_clock(
    experiment: &ExperimentDefinition,
    context: &EvaluationContext,
    clock: &impl Clock,
) -> Result<ExperimentAssignment> {
    let now = context.now_or(clock);

    if experiment.tenant_id != context.tenant_id {
        warn!(
            experiment_id = %experiment.id,
            experiment_tenant = %experiment.tenant_id,
            context_tenant = %context.tenant_id,
            "experiment tenant does not match context tenant"
        );
        return Err(FlagError::tenant_mismatch(
            format!("Experiment {}", experiment.id),
            &context.tenant_id,
            &experiment.tenant_id,
        ));
    }

    if !is_active(experiment, now) {
        // variants is non-empty for any validated definition
        let default_variant = experiment.variants.first().ok_or_else(|| {
            FlagError::InvalidDefinition(format!("Experiment {} has no variants", experiment.id))
        })?;
        debug!(
            experiment_id = %experiment.id,
            subject_id = %context.subject_id,
            variant_id = %default_variant.id,
            "experiment inactive, default variant assigned"
        );
        return Ok(assignment(
            experiment,
            context,
            default_variant,
            INACTIVE_BUCKET,
            now,
            INACTIVE_REASON.to_string(),
        ));
    }

    let bucket = bucket_of(
        &experiment.id,
        &context.subject_id,
        &context.tenant_id,
        &experiment.salt,
    );
    let variant = variant_for_bucket(bucket, &experiment.variants).ok_or_else(|| {
        FlagError::InvalidDefinition(format!("Experiment {} has no variants", experiment.id))
    })?;

    debug!(
        experiment_id = %experiment.id,
        subject_id = %context.subject_id,
        bucket,
        variant_id = %variant.id,
        "experiment variant assigned"
    );
    Ok(assignment(
        experiment,
        context,
        variant,
        bucket,
        now,
        format!("Assigned via deterministic bucketing (bucket {})", bucket),
    ))
}

/// Enabled, and `now` inside the window if there is one.
pub fn is_active(experiment: &ExperimentDefinition, now: DateTime<Utc>) -> bool {
    experiment.enabled && is_within(experiment.time_window.as_ref(), now)
}

/// Variant boundaries are `[0, a1)`, `[a1, a1 + a2)`, ... in definition order.
/// Falls back to the last variant if the allocations leave the bucket uncovered.
pub fn variant_for_bucket(bucket: i32, variants: &[ExperimentVariant]) -> Option<&ExperimentVariant> {
    let mut cumulative: i64 = 0;
    for variant in variants {
        cumulative += i64::from(variant.traffic_allocation);
        if i64::from(bucket) < cumulative {
            return Some(variant);
        }
    }
    variants.last()
}

fn assignment(
    experiment: &ExperimentDefinition,
    context: &EvaluationContext,
    variant: &ExperimentVariant,
    bucket: i32,
    now: DateTime<Utc>,
    reason: String,
) -> ExperimentAssignment {
    ExperimentAssignment {
        experiment_id: experiment.id.clone(),
        variant_id: variant.id.clone(),
        variant_name: variant.name.clone(),
        bucket,
        tenant_id: context.tenant_id.clone(),
        subject_id: context.subject_id.clone(),
        assigned_at: now,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FixedClock, TimeWindow};
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn fifty_fifty() -> ExperimentDefinition {
        ExperimentDefinition {
            id: "exp-checkout-flow".to_string(),
            tenant_id: "t1".to_string(),
            salt: "s".to_string(),
            variants: vec![
                ExperimentVariant::new("control", "Original Flow", 50),
                ExperimentVariant::new("streamlined", "Streamlined Flow", 50),
            ],
            enabled: true,
            time_window: None,
        }
    }

    fn ctx(subject: &str) -> EvaluationContext {
        EvaluationContext::new("t1", subject).at(now())
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let experiment = fifty_fifty();
        let first = assign(&experiment, &ctx("user-456")).unwrap();
        assert!((0..100).contains(&first.bucket));
        assert_eq!(
            first.bucket,
            bucket_of("exp-checkout-flow", "user-456", "t1", "s")
        );

        for _ in 0..1000 {
            let again = assign(&experiment, &ctx("user-456")).unwrap();
            assert_eq!(again.bucket, first.bucket);
            assert_eq!(again.variant_id, first.variant_id);
        }
    }

    #[test]
    fn test_bucket_independent_of_time() {
        let experiment = fifty_fifty();
        let a = assign(&experiment, &ctx("user-456")).unwrap();
        let later = EvaluationContext::new("t1", "user-456").at(now() + Duration::days(90));
        let b = assign(&experiment, &later).unwrap();
        assert_eq!(a.bucket, b.bucket);
        assert_ne!(a.assigned_at, b.assigned_at);
    }

    #[test]
    fn test_subjects_spread_across_buckets() {
        let experiment = fifty_fifty();
        let buckets: HashSet<i32> = (0..100)
            .map(|i| assign(&experiment, &ctx(&format!("user-{}", i))).unwrap().bucket)
            .collect();
        assert!(buckets.len() > 1);

        let variants: HashSet<String> = (0..100)
            .map(|i| assign(&experiment, &ctx(&format!("user-{}", i))).unwrap().variant_id)
            .collect();
        assert_eq!(variants.len(), 2);
    }

    #[test]
    fn test_variant_matches_bucket_range() {
        let experiment = fifty_fifty();
        for i in 0..200 {
            let result = assign(&experiment, &ctx(&format!("subject-{}", i))).unwrap();
            let expected = if result.bucket < 50 { "control" } else { "streamlined" };
            assert_eq!(result.variant_id, expected);
            assert!(result.reason.contains("bucket"));
            assert!(result.reason.contains(&result.bucket.to_string()));
        }
    }

    #[test]
    fn test_variant_for_bucket_boundaries() {
        let variants = vec![
            ExperimentVariant::new("a", "A", 10),
            ExperimentVariant::new("b", "B", 0),
            ExperimentVariant::new("c", "C", 90),
        ];
        assert_eq!(variant_for_bucket(0, &variants).unwrap().id, "a");
        assert_eq!(variant_for_bucket(9, &variants).unwrap().id, "a");
        assert_eq!(variant_for_bucket(10, &variants).unwrap().id, "c");
        assert_eq!(variant_for_bucket(99, &variants).unwrap().id, "c");

        let short = vec![ExperimentVariant::new("a", "A", 30), ExperimentVariant::new("b", "B", 30)];
        assert_eq!(variant_for_bucket(80, &short).unwrap().id, "b");
        assert!(variant_for_bucket(5, &[]).is_none());
    }

    #[test]
    fn test_disabled_experiment_gets_default_variant() {
        let mut experiment = fifty_fifty();
        experiment.enabled = false;
        let result = assign(&experiment, &ctx("user-456")).unwrap();
        assert_eq!(result.bucket, INACTIVE_BUCKET);
        assert_eq!(result.variant_id, "control");
        assert_eq!(result.variant_name, "Original Flow");
        assert_eq!(result.reason, INACTIVE_REASON);
    }

    #[test]
    fn test_time_window_gates_activity() {
        let mut experiment = fifty_fifty();
        experiment.time_window = Some(TimeWindow {
            starts_at: Some(now()),
            ends_at: Some(now() + Duration::days(7)),
        });

        let before = EvaluationContext::new("t1", "user-456").at(now() - Duration::milliseconds(1));
        assert_eq!(assign(&experiment, &before).unwrap().bucket, INACTIVE_BUCKET);

        assert!(assign(&experiment, &ctx("user-456")).unwrap().bucket >= 0);

        let end = EvaluationContext::new("t1", "user-456");
        let at_end = assign_with_clock(&experiment, &end, &FixedClock(now() + Duration::days(7))).unwrap();
        assert!(at_end.bucket >= 0);

        let after = assign_with_clock(
            &experiment,
            &end,
            &FixedClock(now() + Duration::days(7) + Duration::milliseconds(1)),
        )
        .unwrap();
        assert_eq!(after.bucket, INACTIVE_BUCKET);
    }

    #[test]
    fn test_tenant_mismatch() {
        let experiment = fifty_fifty();
        let other = EvaluationContext::new("t2", "user-456").at(now());
        assert!(matches!(
            assign(&experiment, &other),
            Err(FlagError::TenantMismatch { .. })
        ));
    }

    #[test]
    fn test_assignment_carries_subject_and_tenant() {
        let result = assign(&fifty_fifty(), &ctx("user-9")).unwrap();
        assert_eq!(result.tenant_id, "t1");
        assert_eq!(result.subject_id, "user-9");
        assert_eq!(result.experiment_id, "exp-checkout-flow");
        assert_eq!(result.assigned_at, now());
    }
}
