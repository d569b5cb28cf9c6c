//! Metric evaluation for step outputs.

use std::collections::HashMap;

use async_trait::async_trait;

use cascade_types::{Metrics, Result};

/// Scores a transform's output. Higher is better; the runner compares each
/// numeric score against a single threshold and records the rest as-is.
#[async_trait]
pub trait MetricEvaluator: Send + Sync {
    async fn evaluate(&self, output: &serde_json::Value, pattern: &str) -> Result<Metrics>;
}

type EvaluateFn = dyn Fn(&serde_json::Value, &str) -> Result<Metrics> + Send + Sync;

/// Wraps a synchronous closure as a [`MetricEvaluator`].
pub struct FnEvaluator {
    f: Box<EvaluateFn>,
}

impl FnEvaluator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Value, &str) -> Result<Metrics> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl MetricEvaluator for FnEvaluator {
    async fn evaluate(&self, output: &serde_json::Value, pattern: &str) -> Result<Metrics> {
        (self.f)(output, pattern)
    }
}

/// Fixed scores per pattern, independent of output. Patterns without an
/// entry score an empty metric set, which always passes.
///
/// Useful for baseline runs and dry runs where real scoring is not wired up.
#[derive(Debug, Clone, Default)]
pub struct ScoreTable {
    scores: HashMap<String, Metrics>,
}

impl ScoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scores<I, K>(mut self, pattern: impl Into<String>, scores: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        let metrics = scores.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.scores.insert(pattern.into(), metrics);
        self
    }
}

#[async_trait]
impl MetricEvaluator for ScoreTable {
    async fn evaluate(&self, _output: &serde_json::Value, pattern: &str) -> Result<Metrics> {
        Ok(self.scores.get(pattern).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::CascadeError;
    use serde_json::json;

    #[tokio::test]
    async fn score_table_returns_configured_scores() {
        let table = ScoreTable::new().with_scores("draft", [("clarity", json!(0.6))]);
        let m = table.evaluate(&json!("anything"), "draft").await.unwrap();
        assert_eq!(m.get("clarity"), Some(&json!(0.6)));
        assert!(table.evaluate(&json!(null), "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fn_evaluator_scores_output() {
        let eval = FnEvaluator::new(|output, _| {
            let len = output.as_str().map(str::len).unwrap_or(0);
            let mut m = Metrics::new();
            m.insert("brevity".into(), json!(if len < 10 { 1.0 } else { 0.2 }));
            Ok(m)
        });
        let short = eval.evaluate(&json!("short"), "p").await.unwrap();
        let long = eval.evaluate(&json!("a much longer output"), "p").await.unwrap();
        assert_eq!(short["brevity"], json!(1.0));
        assert_eq!(long["brevity"], json!(0.2));
    }

    #[tokio::test]
    async fn fn_evaluator_propagates_errors() {
        let eval = FnEvaluator::new(|_, pattern| {
            Err(CascadeError::EvaluationFailed {
                pattern: pattern.into(),
                message: "scorer offline".into(),
            })
        });
        assert!(eval.evaluate(&json!(1), "p").await.is_err());
    }
}
