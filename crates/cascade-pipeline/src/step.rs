//! Step execution and the quality-gated fallback policy.
//!
//! A step runs its primary transform and scores the output. If any numeric
//! metric falls below the mode threshold and adaptive retry is on, the
//! step's designated fallback runs once. The fallback replaces the primary
//! only when *every* numeric fallback metric clears the threshold. Each
//! attempted fallback is written to the ledger whether or not it wins.

use chrono::Utc;
use uuid::Uuid;

use cascade_types::{
    failing_metrics, meets_threshold, CascadeError, FallbackEvent, Metrics, Result, StepResult,
};

use crate::definition::{StepConfig, StepSpec};
use crate::evaluator::MetricEvaluator;
use crate::ledger::FallbackLedger;
use crate::mode::ModeProfile;
use crate::registry::PatternRegistry;

/// What one step produced, plus its side-channel records.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub result: StepResult,
    /// Set whenever a fallback was attempted, accepted or not.
    pub fallback: Option<FallbackEvent>,
    /// Ledger write failure for this step. The result stands regardless.
    pub persistence_error: Option<String>,
}

impl StepOutcome {
    fn accepted(result: StepResult) -> Self {
        Self {
            result,
            fallback: None,
            persistence_error: None,
        }
    }
}

/// Executes single steps for one run.
pub struct StepExecutor<'a> {
    registry: &'a PatternRegistry,
    evaluator: &'a dyn MetricEvaluator,
    ledger: &'a dyn FallbackLedger,
    mode: &'a str,
    profile: &'a ModeProfile,
    run_id: Uuid,
}

struct Attempt {
    output: serde_json::Value,
    metrics: Metrics,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        registry: &'a PatternRegistry,
        evaluator: &'a dyn MetricEvaluator,
        ledger: &'a dyn FallbackLedger,
        mode: &'a str,
        profile: &'a ModeProfile,
        run_id: Uuid,
    ) -> Self {
        Self {
            registry,
            evaluator,
            ledger,
            mode,
            profile,
            run_id,
        }
    }

    pub async fn execute(
        &self,
        step_index: usize,
        step: &StepSpec,
        input: &serde_json::Value,
        adaptive: bool,
    ) -> Result<StepOutcome> {
        let threshold = self.profile.threshold;
        let config = self.profile.merge(&step.config);
        tracing::debug!(
            step = step_index,
            agent = %step.agent,
            pattern = %step.pattern,
            config_keys = config.len(),
            "Effective step config"
        );

        let primary = self.attempt(&step.pattern, &step.agent, input, &config).await?;
        let failed = failing_metrics(&primary.metrics, threshold);

        if failed.is_empty() {
            tracing::info!(step = step_index, pattern = %step.pattern, "Step passed");
            return Ok(StepOutcome::accepted(StepResult {
                output: primary.output,
                metrics: primary.metrics,
                pattern_used: step.pattern.clone(),
                failed_metrics: Vec::new(),
            }));
        }

        tracing::warn!(
            step = step_index,
            pattern = %step.pattern,
            failed = ?failed,
            threshold,
            "Step below threshold"
        );

        let keep_primary = |primary: Attempt, failed: Vec<String>| StepResult {
            output: primary.output,
            metrics: primary.metrics,
            pattern_used: step.pattern.clone(),
            failed_metrics: failed,
        };

        if !adaptive {
            return Ok(StepOutcome::accepted(keep_primary(primary, failed)));
        }

        let Some(fallback_pattern) = self.registry.fallback_for(&step.pattern) else {
            tracing::info!(
                step = step_index,
                pattern = %step.pattern,
                "No fallback registered; keeping primary"
            );
            return Ok(StepOutcome::accepted(keep_primary(primary, failed)));
        };
        let fallback_pattern = fallback_pattern.to_string();

        // An unresolvable fallback is a registry misconfiguration and aborts
        // the run like any other missing pattern.
        self.registry.get(&fallback_pattern)?;

        let fallback = self
            .attempt(&fallback_pattern, &step.agent, input, &config)
            .await;

        let (accepted, fallback_metrics, error) = match &fallback {
            Ok(attempt) => (
                meets_threshold(&attempt.metrics, threshold),
                Some(attempt.metrics.clone()),
                None,
            ),
            Err(e) => {
                tracing::warn!(
                    step = step_index,
                    fallback = %fallback_pattern,
                    error = %e,
                    "Fallback attempt failed; keeping primary"
                );
                (false, None, Some(e.to_string()))
            }
        };

        let event = FallbackEvent {
            timestamp: Utc::now(),
            agent: step.agent.clone(),
            original_pattern: step.pattern.clone(),
            fallback_pattern: fallback_pattern.clone(),
            metrics: primary.metrics.clone(),
            reason: failed.clone(),
            mode: self.mode.to_string(),
            threshold,
            run_id: Some(self.run_id),
            step_index: Some(step_index),
            fallback_metrics,
            accepted,
            error,
        };

        let persistence_error = match self.ledger.append(&event).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(step = step_index, error = %e, "Failed to record fallback event");
                Some(e.to_string())
            }
        };

        let result = match fallback {
            Ok(attempt) if accepted => {
                tracing::info!(
                    step = step_index,
                    original = %step.pattern,
                    fallback = %fallback_pattern,
                    "Fallback accepted"
                );
                StepResult {
                    output: attempt.output,
                    metrics: attempt.metrics,
                    pattern_used: fallback_pattern,
                    failed_metrics: failed,
                }
            }
            Ok(attempt) => {
                tracing::warn!(
                    step = step_index,
                    fallback = %fallback_pattern,
                    still_failing = ?failing_metrics(&attempt.metrics, threshold),
                    "Fallback rejected; keeping primary"
                );
                keep_primary(primary, failed)
            }
            Err(_) => keep_primary(primary, failed),
        };

        Ok(StepOutcome {
            result,
            fallback: Some(event),
            persistence_error,
        })
    }

    /// Apply and score one transform.
    async fn attempt(
        &self,
        pattern: &str,
        agent: &str,
        input: &serde_json::Value,
        config: &StepConfig,
    ) -> Result<Attempt> {
        let transform = self.registry.get(pattern)?;
        let output = transform
            .apply(input, config)
            .await
            .map_err(|e| transform_error(pattern, agent, e))?;
        let metrics = self
            .evaluator
            .evaluate(&output, pattern)
            .await
            .map_err(|e| evaluation_error(pattern, e))?;
        Ok(Attempt { output, metrics })
    }
}

fn transform_error(pattern: &str, agent: &str, err: CascadeError) -> CascadeError {
    match err {
        e @ CascadeError::TransformFailed { .. } => e,
        e if e.is_configuration() => e,
        other => CascadeError::TransformFailed {
            pattern: pattern.to_string(),
            agent: agent.to_string(),
            message: other.to_string(),
        },
    }
}

fn evaluation_error(pattern: &str, err: CascadeError) -> CascadeError {
    match err {
        e @ CascadeError::EvaluationFailed { .. } => e,
        other => CascadeError::EvaluationFailed {
            pattern: pattern.to_string(),
            message: other.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
