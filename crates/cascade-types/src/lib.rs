//! Shared types, errors, metrics, and fallback records for the Cascade pipeline runner.
//!
//! This crate provides the foundational types used across the Cascade crates:
//! - `CascadeError`: unified error taxonomy
//! - `Metrics`: metric name to score mapping, with threshold helpers
//! - `StepResult`: the accepted outcome of one pipeline step
//! - `FallbackEvent`: durable record of an attempted fallback transform
//! - `TrailEntry`: one row of the reasoning trail

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unified error type for all Cascade subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    // === Configuration Errors ===
    #[error("Unknown execution mode '{mode}'")]
    UnknownMode { mode: String },

    #[error("Pattern '{pattern}' is not registered")]
    PatternNotFound { pattern: String },

    #[error("Invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Collaborator Errors ===
    #[error("Transform '{pattern}' failed for agent '{agent}': {message}")]
    TransformFailed {
        pattern: String,
        agent: String,
        message: String,
    },

    #[error("Metric evaluation failed for pattern '{pattern}': {message}")]
    EvaluationFailed { pattern: String, message: String },

    // === Run Control ===
    #[error("Run cancelled after {completed_steps} completed steps")]
    Cancelled { completed_steps: usize },

    // === Persistence Errors ===
    #[error("Failed to lock {path}: {message}")]
    LockFailed { path: String, message: String },

    #[error("Background task failed: {0}")]
    Join(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl CascadeError {
    /// Returns `true` for errors caused by a bad definition, mode table, or registry.
    /// These abort a run before any further step executes.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CascadeError::UnknownMode { .. }
                | CascadeError::PatternNotFound { .. }
                | CascadeError::InvalidDefinition(_)
                | CascadeError::InvalidConfig(_)
        )
    }

    /// Returns `true` for errors raised while reading or writing durable state.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            CascadeError::LockFailed { .. }
                | CascadeError::Join(_)
                | CascadeError::Io(_)
                | CascadeError::Json(_)
        )
    }
}

/// A convenience alias for `Result<T, CascadeError>`.
pub type Result<T> = std::result::Result<T, CascadeError>;

// ---------------------------------------------------------------------------
// Metrics: metric name to score
// ---------------------------------------------------------------------------

/// Metric name to score. Scores are usually numbers, but evaluators may
/// report non-numeric values; those are recorded and never compared.
///
/// A `BTreeMap` keeps iteration (and therefore rendering) order stable.
pub type Metrics = BTreeMap<String, serde_json::Value>;

/// Numeric view of a metric value. Booleans, strings and nulls are not scores.
pub fn numeric_score(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Names of the numeric metrics that fall below `threshold`, in key order.
pub fn failing_metrics(metrics: &Metrics, threshold: f64) -> Vec<String> {
    metrics
        .iter()
        .filter(|(_, v)| numeric_score(v).is_some_and(|score| score < threshold))
        .map(|(k, _)| k.clone())
        .collect()
}

/// `true` when every numeric metric meets or exceeds `threshold`.
///
/// Vacuously `true` when there are no numeric metrics.
pub fn meets_threshold(metrics: &Metrics, threshold: f64) -> bool {
    metrics
        .values()
        .filter_map(numeric_score)
        .all(|score| score >= threshold)
}

// ---------------------------------------------------------------------------
// StepResult: accepted outcome of one step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub output: serde_json::Value,
    /// Metrics of whichever transform was accepted.
    pub metrics: Metrics,
    pub pattern_used: String,
    /// Metrics that fell below threshold on the primary attempt.
    pub failed_metrics: Vec<String>,
}

impl StepResult {
    /// `true` when the accepted pattern differs from the declared one.
    pub fn used_fallback(&self, declared_pattern: &str) -> bool {
        self.pattern_used != declared_pattern
    }
}

// ---------------------------------------------------------------------------
// FallbackEvent: durable ledger record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub original_pattern: String,
    pub fallback_pattern: String,
    /// Metrics of the primary attempt that triggered the fallback.
    pub metrics: Metrics,
    /// Names of the failed primary metrics.
    pub reason: Vec<String>,
    pub mode: String,
    pub threshold: f64,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    #[serde(default)]
    pub step_index: Option<usize>,
    #[serde(default)]
    pub fallback_metrics: Option<Metrics>,
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// TrailEntry: one step in the reasoning trail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailEntry {
    pub step_index: usize,
    pub agent: String,
    pub declared_pattern: String,
    pub pattern_used: String,
    pub metrics: Metrics,
    pub output_preview: String,
    /// `None` when the primary attempt passed.
    pub failed_metrics: Option<Vec<String>>,
    pub fallback_attempted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics(pairs: &[(&str, serde_json::Value)]) -> Metrics {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn error_display_unknown_mode() {
        let err = CascadeError::UnknownMode {
            mode: "warp".into(),
        };
        assert_eq!(err.to_string(), "Unknown execution mode 'warp'");
    }

    #[test]
    fn error_display_pattern_not_found() {
        let err = CascadeError::PatternNotFound {
            pattern: "premortem".into(),
        };
        assert_eq!(err.to_string(), "Pattern 'premortem' is not registered");
    }

    #[test]
    fn error_display_transform_failed() {
        let err = CascadeError::TransformFailed {
            pattern: "summarize".into(),
            agent: "writer".into(),
            message: "empty input".into(),
        };
        assert_eq!(
            err.to_string(),
            "Transform 'summarize' failed for agent 'writer': empty input"
        );
    }

    #[test]
    fn error_display_cancelled() {
        let err = CascadeError::Cancelled { completed_steps: 2 };
        assert_eq!(err.to_string(), "Run cancelled after 2 completed steps");
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(CascadeError::UnknownMode { mode: "x".into() }.is_configuration());
        assert!(CascadeError::PatternNotFound {
            pattern: "x".into()
        }
        .is_configuration());
        assert!(CascadeError::InvalidDefinition("empty chain".into()).is_configuration());
        assert!(!CascadeError::Other("x".into()).is_configuration());
    }

    #[test]
    fn persistence_errors_are_classified() {
        let io = CascadeError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        ));
        assert!(io.is_persistence());
        assert!(CascadeError::Join("panicked".into()).is_persistence());
        assert!(!CascadeError::Cancelled { completed_steps: 0 }.is_persistence());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: CascadeError = json_err.into();
        assert!(matches!(err, CascadeError::Json(_)));
    }

    // --- metric helpers ---

    #[test]
    fn numeric_score_ignores_non_numbers() {
        assert_eq!(numeric_score(&json!(0.5)), Some(0.5));
        assert_eq!(numeric_score(&json!(3)), Some(3.0));
        assert_eq!(numeric_score(&json!("0.9")), None);
        assert_eq!(numeric_score(&json!(true)), None);
        assert_eq!(numeric_score(&json!(null)), None);
    }

    #[test]
    fn failing_metrics_lists_only_numeric_shortfalls() {
        let m = metrics(&[
            ("clarity", json!(0.6)),
            ("accuracy", json!(0.9)),
            ("tone", json!("warm")),
            ("depth", json!(0.79)),
        ]);
        assert_eq!(failing_metrics(&m, 0.8), vec!["clarity", "depth"]);
    }

    #[test]
    fn score_equal_to_threshold_passes() {
        let m = metrics(&[("clarity", json!(0.8))]);
        assert!(failing_metrics(&m, 0.8).is_empty());
        assert!(meets_threshold(&m, 0.8));
    }

    #[test]
    fn meets_threshold_is_all_or_nothing() {
        let m = metrics(&[("clarity", json!(0.95)), ("accuracy", json!(0.4))]);
        assert!(!meets_threshold(&m, 0.8));
    }

    #[test]
    fn meets_threshold_is_vacuous_without_numeric_metrics() {
        let m = metrics(&[("tone", json!("neutral"))]);
        assert!(meets_threshold(&m, 0.8));
        assert!(meets_threshold(&Metrics::new(), 0.8));
    }

    #[test]
    fn scores_outside_unit_range_compare_normally() {
        let m = metrics(&[("tokens_saved", json!(42)), ("penalty", json!(-1.0))]);
        assert_eq!(failing_metrics(&m, 0.5), vec!["penalty"]);
    }

    // --- records ---

    #[test]
    fn fallback_event_loads_without_optional_fields() {
        let raw = json!({
            "timestamp": "2026-03-01T10:00:00Z",
            "agent": "critic",
            "original_pattern": "red_team",
            "fallback_pattern": "steelman",
            "metrics": { "rigor": 0.4 },
            "reason": ["rigor"],
            "mode": "critique",
            "threshold": 0.7
        });
        let event: FallbackEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.agent, "critic");
        assert_eq!(event.reason, vec!["rigor"]);
        assert!(event.run_id.is_none());
        assert!(event.fallback_metrics.is_none());
        assert!(!event.accepted);
    }

    #[test]
    fn step_result_reports_fallback_use() {
        let result = StepResult {
            output: json!("text"),
            metrics: Metrics::new(),
            pattern_used: "plain_language".into(),
            failed_metrics: vec!["clarity".into()],
        };
        assert!(result.used_fallback("technical_brief"));
        assert!(!result.used_fallback("plain_language"));
    }
}
