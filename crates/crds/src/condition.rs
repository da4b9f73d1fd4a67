//! Status conditions for ClusterMonitor resources
//!
//! Mirrors the shape of `metav1.Condition` with chrono timestamps so it
//! derives `JsonSchema` alongside the rest of the CRD types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single observation about an aspect of the resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. "SpecValid", "Collecting"
    #[serde(rename = "type")]
    pub type_: String,

    /// Whether the condition holds
    pub status: ConditionStatus,

    /// Machine-readable reason in PascalCase
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// When the condition last changed status
    pub last_transition_time: DateTime<Utc>,

    /// Generation the condition was computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Condition truth value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,

    /// Condition does not hold
    False,

    /// Condition could not be determined
    Unknown,
}

impl Condition {
    /// Build a condition with `last_transition_time` set to now.
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Attach the observed generation.
    #[must_use]
    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Upsert a condition by type.
///
/// Replaces the existing condition of the same type, keeping the previous
/// `last_transition_time` when the status did not change so repeated
/// reconciles do not churn the timestamp.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}
