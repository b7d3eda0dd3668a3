use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{FeatureEvaluationResult, FeatureRule, RuleSource, PRECEDENCE_ORDER};
use crate::context::{is_within, Clock, EvaluationContext, SystemClock};
use crate::error::{FlagError, Result};

pub const NO_MATCH_REASON: &str = "No matching rules found, defaulting to disabled";

/// Resolve a feature for the context, using the wall clock when the context has no `now`.
pub fn resolve(
    feature_id: &str,
    context: &EvaluationContext,
    rules: &[FeatureRule],
) -> Result<FeatureEvaluationResult> {
    resolve_with_clock(feature_id, context, rules, &SystemClock)
}

/// Walk the precedence tiers and return the first tier's best matching rule.
///
/// Only rules for `feature_id` are tenant-checked; a foreign-tenant rule for some
/// other feature is ignored. Returns a disabled `system` result when nothing matches.
pub fn resolve_with_clock(
    feature_id: &str,
    context: &EvaluationContext,
    rules: &[FeatureRule],
    clock: &impl Clock,
) -> Result<FeatureEvaluationResult> {
    let now = context.now_or(clock);

    // Step 1: Keep this feature's rules, failing fast on a foreign tenant
    let mut relevant = Vec::new();
    for rule in rules.iter().filter(|r| r.feature_id == feature_id) {
        if rule.tenant_id != context.tenant_id {
            warn!(
                rule_id = %rule.id,
                rule_tenant = %rule.tenant_id,
                context_tenant = %context.tenant_id,
                "rule tenant does not match context tenant"
            );
            return Err(FlagError::tenant_mismatch(
                format!("Rule {}", rule.id),
                &context.tenant_id,
                &rule.tenant_id,
            ));
        }
        relevant.push(rule);
    }

    // Step 2: First tier with an active, matching rule wins
    for source in PRECEDENCE_ORDER {
        let best = relevant
            .iter()
            .copied()
            .filter(|r| r.source == source)
            .filter(|r| is_within(r.time_window.as_ref(), now))
            .filter(|r| matches_context(r, context))
            .fold(None::<&FeatureRule>, |best, rule| match best {
                // strictly greater keeps the earliest rule on equal priority
                Some(current) if rule.priority <= current.priority => Some(current),
                _ => Some(rule),
            });

        if let Some(rule) = best {
            debug!(
                feature_id,
                tenant_id = %context.tenant_id,
                subject_id = %context.subject_id,
                rule_id = %rule.id,
                source = %rule.source,
                enabled = rule.enabled,
                "feature resolved"
            );
            return Ok(matched(feature_id, rule, now));
        }
    }

    // Step 3: Nothing matched
    debug!(
        feature_id,
        tenant_id = %context.tenant_id,
        subject_id = %context.subject_id,
        "no rule matched, defaulting to disabled"
    );
    Ok(FeatureEvaluationResult {
        feature_id: feature_id.to_string(),
        enabled: false,
        source: RuleSource::System,
        rule_id: None,
        reason: NO_MATCH_REASON.to_string(),
        evaluated_at: now,
    })
}

fn matches_context(rule: &FeatureRule, context: &EvaluationContext) -> bool {
    match rule.source {
        RuleSource::Individual => rule.subject_id.as_deref() == Some(context.subject_id.as_str()),
        RuleSource::Group => rule
            .group_id
            .as_ref()
            .map_or(false, |group| context.group_ids.contains(group)),
        RuleSource::Tenant | RuleSource::System => true,
        RuleSource::Partner => rule.partner_id == context.partner_id,
        RuleSource::Plan => rule.plan_id == context.plan_id,
    }
}

fn matched(feature_id: &str, rule: &FeatureRule, now: DateTime<Utc>) -> FeatureEvaluationResult {
    FeatureEvaluationResult {
        feature_id: feature_id.to_string(),
        enabled: rule.enabled,
        source: rule.source,
        rule_id: Some(rule.id.clone()),
        reason: reason_for(rule),
        evaluated_at: now,
    }
}

fn reason_for(rule: &FeatureRule) -> String {
    match rule.source {
        RuleSource::Individual => with_selector("Individual override", "subject", &rule.subject_id),
        RuleSource::Group => with_selector("Group override", "group", &rule.group_id),
        RuleSource::Tenant => format!("Tenant-level rule for tenant {}", rule.tenant_id),
        RuleSource::Partner => with_selector("Partner-level rule", "partner", &rule.partner_id),
        RuleSource::Plan => with_selector("Plan-level rule", "plan", &rule.plan_id),
        RuleSource::System => "System default rule".to_string(),
    }
}

// A rule without a selector can still match a context that has none either
fn with_selector(prefix: &str, kind: &str, value: &Option<String>) -> String {
    match value {
        Some(value) => format!("{} for {} {}", prefix, kind, value),
        None => format!("{} (no {} set)", prefix, kind),
    }
}
