use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::{FlagError, Result};

// MODELS

/// The subject being evaluated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub tenant_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub group_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// Opaque to evaluation.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// Instant used for every time-window check. Falls back to the clock when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now: Option<DateTime<Utc>>,
}

impl EvaluationContext {
    pub fn new(tenant_id: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            subject_id: subject_id.into(),
            ..Default::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_ids = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_partner(mut self, partner_id: impl Into<String>) -> Self {
        self.partner_id = Some(partner_id.into());
        self
    }

    pub fn with_plan(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// The evaluation instant: the context's own `now`, else the clock's.
    pub fn now_or(&self, clock: &impl Clock) -> DateTime<Utc> {
        self.now.unwrap_or_else(|| clock.now())
    }
}

/// Optional validity bounds, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if let Some(starts_at) = self.starts_at {
            if now < starts_at {
                return false;
            }
        }
        if let Some(ends_at) = self.ends_at {
            if now > ends_at {
                return false;
            }
        }
        true
    }
}

/// True when there is no window or `now` falls inside it.
pub fn is_within(window: Option<&TimeWindow>, now: DateTime<Utc>) -> bool {
    window.map_or(true, |w| w.contains(now))
}

// TIME SOURCE

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant. Used to make evaluation reproducible.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// HELPER FUNCTIONS

pub fn validate_time_window(window: &TimeWindow) -> Result<()> {
    if let (Some(starts_at), Some(ends_at)) = (window.starts_at, window.ends_at) {
        if starts_at >= ends_at {
            return Err(FlagError::InvalidDefinition(
                "startsAt must be before endsAt".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn validate_context(context: &EvaluationContext) -> Result<()> {
    if context.tenant_id.trim().is_empty() {
        return Err(FlagError::InvalidDefinition(
            "Context tenantId cannot be empty".to_string(),
        ));
    }
    if context.subject_id.trim().is_empty() {
        return Err(FlagError::InvalidDefinition(
            "Context subjectId cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let window = TimeWindow {
            starts_at: Some(noon()),
            ends_at: Some(noon() + Duration::hours(1)),
        };
        assert!(window.contains(noon()));
        assert!(window.contains(noon() + Duration::hours(1)));
        assert!(!window.contains(noon() - Duration::milliseconds(1)));
        assert!(!window.contains(noon() + Duration::hours(1) + Duration::milliseconds(1)));
    }

    #[test]
    fn test_open_ended_windows() {
        let from_noon = TimeWindow {
            starts_at: Some(noon()),
            ends_at: None,
        };
        assert!(from_noon.contains(noon() + Duration::days(3650)));
        assert!(!from_noon.contains(noon() - Duration::seconds(1)));

        let until_noon = TimeWindow {
            starts_at: None,
            ends_at: Some(noon()),
        };
        assert!(until_noon.contains(noon() - Duration::days(3650)));
        assert!(!until_noon.contains(noon() + Duration::seconds(1)));

        assert!(is_within(None, noon()));
    }

    #[test]
    fn test_context_now_takes_precedence_over_clock() {
        let clock = FixedClock(noon() + Duration::days(1));
        let ctx = EvaluationContext::new("t1", "u1");
        assert_eq!(ctx.now_or(&clock), noon() + Duration::days(1));
        assert_eq!(ctx.at(noon()).now_or(&clock), noon());
    }

    #[test]
    fn test_validate_time_window() {
        let inverted = TimeWindow {
            starts_at: Some(noon()),
            ends_at: Some(noon()),
        };
        assert!(matches!(
            validate_time_window(&inverted),
            Err(FlagError::InvalidDefinition(_))
        ));
        assert!(validate_time_window(&TimeWindow::default()).is_ok());
    }

    #[test]
    fn test_validate_context() {
        assert!(validate_context(&EvaluationContext::new("t1", "u1")).is_ok());
        assert!(validate_context(&EvaluationContext::new("", "u1")).is_err());
        assert!(validate_context(&EvaluationContext::new("t1", " ")).is_err());
    }

    #[test]
    fn test_context_deserializes_from_camel_case() {
        let ctx: EvaluationContext = serde_json::from_str(
            r#"{"tenantId":"t1","subjectId":"u1","groupIds":["beta","beta"],"planId":"pro"}"#,
        )
        .unwrap();
        assert_eq!(ctx.tenant_id, "t1");
        assert_eq!(ctx.group_ids.len(), 1);
        assert_eq!(ctx.plan_id.as_deref(), Some("pro"));
        assert!(ctx.now.is_none());
    }
}
