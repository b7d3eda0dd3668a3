pub mod bucketer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{validate_time_window, TimeWindow};
use crate::error::{FlagError, Result};

pub use bucketer::{assign, assign_with_clock};

/// Bucket reported when an experiment is not actively assigning.
pub const INACTIVE_BUCKET: i32 = -1;

// MODELS

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentVariant {
    pub id: String,
    pub name: String,
    /// Percentage of buckets, 0..=100.
    pub traffic_allocation: u32,
}

impl ExperimentVariant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, traffic_allocation: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            traffic_allocation,
        }
    }
}

/// An experiment whose variants' allocations sum to exactly 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentDefinition {
    pub id: String,
    pub tenant_id: String,
    pub salt: String,
    pub variants: Vec<ExperimentVariant>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentAssignment {
    pub experiment_id: String,
    pub variant_id: String,
    pub variant_name: String,
    /// 0..=99 when assigned by hashing, -1 when the experiment is inactive.
    pub bucket: i32,
    pub tenant_id: String,
    pub subject_id: String,
    pub assigned_at: DateTime<Utc>,
    pub reason: String,
}

// HELPER FUNCTIONS

pub fn validate_variant(variant: &ExperimentVariant) -> Result<()> {
    if variant.id.trim().is_empty() {
        return Err(FlagError::InvalidDefinition("Variant id cannot be empty".to_string()));
    }
    if variant.name.trim().is_empty() {
        return Err(FlagError::InvalidDefinition(format!(
            "Variant {} has an empty name",
            variant.id
        )));
    }
    if variant.traffic_allocation > 100 {
        return Err(FlagError::InvalidDefinition(format!(
            "Variant {} allocation must be between 0 and 100",
            variant.id
        )));
    }
    Ok(())
}

/// Validate an experiment before it is handed to the bucketer
pub fn validate_experiment(experiment: &ExperimentDefinition) -> Result<()> {
    if experiment.id.trim().is_empty() {
        return Err(FlagError::InvalidDefinition(
            "Experiment id cannot be empty".to_string(),
        ));
    }
    if experiment.tenant_id.trim().is_empty() {
        return Err(FlagError::InvalidDefinition(format!(
            "Experiment {} has an empty tenantId",
            experiment.id
        )));
    }
    if experiment.salt.is_empty() {
        return Err(FlagError::InvalidDefinition(format!(
            "Experiment {} has an empty salt",
            experiment.id
        )));
    }
    if experiment.variants.is_empty() {
        return Err(FlagError::InvalidDefinition(format!(
            "Experiment {} needs at least one variant",
            experiment.id
        )));
    }

    for variant in &experiment.variants {
        validate_variant(variant)?;
    }

    let total: u32 = experiment.variants.iter().map(|v| v.traffic_allocation).sum();
    if total != 100 {
        return Err(FlagError::InvalidDefinition(format!(
            "Variant traffic allocations must sum to 100 (got {})",
            total
        )));
    }

    if let Some(window) = &experiment.time_window {
        validate_time_window(window)?;
    }

    Ok(())
}
