pub mod resolver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::{validate_time_window, TimeWindow};
use crate::error::{FlagError, Result};

pub use resolver::{resolve, resolve_with_clock};

// MODELS

/// The six precedence tiers a rule can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Individual,
    Group,
    Tenant,
    Partner,
    Plan,
    System,
}

/// Highest precedence first.
pub const PRECEDENCE_ORDER: [RuleSource; 6] = [
    RuleSource::Individual,
    RuleSource::Group,
    RuleSource::Tenant,
    RuleSource::Partner,
    RuleSource::Plan,
    RuleSource::System,
];

impl RuleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSource::Individual => "individual",
            RuleSource::Group => "group",
            RuleSource::Tenant => "tenant",
            RuleSource::Partner => "partner",
            RuleSource::Plan => "plan",
            RuleSource::System => "system",
        }
    }
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One precedence-layer override for a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRule {
    pub id: String,
    pub feature_id: String,
    pub tenant_id: String,
    pub source: RuleSource,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub priority: u32,
}

impl FeatureRule {
    pub fn new(
        id: impl Into<String>,
        feature_id: impl Into<String>,
        tenant_id: impl Into<String>,
        source: RuleSource,
        enabled: bool,
    ) -> Self {
        Self {
            id: id.into(),
            feature_id: feature_id.into(),
            tenant_id: tenant_id.into(),
            source,
            enabled,
            subject_id: None,
            group_id: None,
            partner_id: None,
            plan_id: None,
            time_window: None,
            priority: 0,
        }
    }

    pub fn for_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn for_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn for_partner(mut self, partner_id: impl Into<String>) -> Self {
        self.partner_id = Some(partner_id.into());
        self
    }

    pub fn for_plan(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }
}

/// Outcome of resolving one feature for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvaluationResult {
    pub feature_id: String,
    pub enabled: bool,
    pub source: RuleSource,
    /// Absent when no rule matched and the disabled default applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub reason: String,
    pub evaluated_at: DateTime<Utc>,
}

// HELPER FUNCTIONS

/// Validate a rule before it is handed to the resolver
pub fn validate_rule(rule: &FeatureRule) -> Result<()> {
    if rule.id.trim().is_empty() {
        return Err(FlagError::InvalidDefinition("Rule id cannot be empty".to_string()));
    }
    if rule.feature_id.trim().is_empty() {
        return Err(FlagError::InvalidDefinition(format!(
            "Rule {} has an empty featureId",
            rule.id
        )));
    }
    if rule.tenant_id.trim().is_empty() {
        return Err(FlagError::InvalidDefinition(format!(
            "Rule {} has an empty tenantId",
            rule.id
        )));
    }

    // Selector-bearing tiers must carry their selector
    let selector = match rule.source {
        RuleSource::Individual => Some(("subjectId", &rule.subject_id)),
        RuleSource::Group => Some(("groupId", &rule.group_id)),
        RuleSource::Partner => Some(("partnerId", &rule.partner_id)),
        RuleSource::Plan => Some(("planId", &rule.plan_id)),
        RuleSource::Tenant | RuleSource::System => None,
    };
    if let Some((field, value)) = selector {
        if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
            return Err(FlagError::InvalidDefinition(format!(
                "Rule {} with source '{}' requires {}",
                rule.id, rule.source, field
            )));
        }
    }

    if let Some(window) = &rule.time_window {
        validate_time_window(window)?;
    }

    Ok(())
}
