//! Tenant-scoped feature flag resolution, deterministic experiment bucketing,
//! and tamper-evident snapshots for replaying a resolution offline.
//!
//! Every operation is a synchronous, pure function of its inputs plus an
//! injectable [`Clock`](context::Clock) for the "current time" default.

pub mod config;
pub mod context;
pub mod error;
pub mod experiments;
pub mod hash;
pub mod rules;
pub mod snapshot;

pub use config::SnapshotConfig;
pub use context::{Clock, EvaluationContext, FixedClock, SystemClock, TimeWindow};
pub use error::{FlagError, Result};
pub use experiments::{
    assign, assign_with_clock, ExperimentAssignment, ExperimentDefinition, ExperimentVariant,
};
pub use rules::{
    resolve, resolve_with_clock, FeatureEvaluationResult, FeatureRule, RuleSource,
    PRECEDENCE_ORDER,
};
pub use snapshot::{
    verify_snapshot, ExperimentSnapshotEntry, FeatureSnapshot, FeatureSnapshotEntry,
    SnapshotManager, SnapshotOptions, SnapshotStatus,
};
