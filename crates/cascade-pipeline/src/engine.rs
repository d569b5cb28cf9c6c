//! Pipeline runner: the ordered, single-pass traversal of a chain.
//!
//! A run moves INIT → RUNNING(step 0..N-1) → DONE. There is no failed
//! terminal state: steps that under-perform are visible through their
//! `failed_metrics` and the fallback ledger, and the run still completes.
//! Only configuration errors, primary transform/evaluator errors, and
//! cancellation end a run early.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use cascade_types::{CascadeError, FallbackEvent, Metrics, Result};

use crate::adapter::{HandoffEnvelope, OutputAdapter};
use crate::config::RunnerConfig;
use crate::definition::PipelineDefinition;
use crate::evaluator::MetricEvaluator;
use crate::events::{EventEmitter, PipelineEvent};
use crate::ledger::{FallbackLedger, JsonFileLedger};
use crate::mode::{ModeResolver, ModeTable};
use crate::registry::PatternRegistry;
use crate::step::StepExecutor;
use crate::trail::ReasoningTrail;

// Clock slack when reading this run's events back from the ledger.
const RECENT_SLACK: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Drives one pipeline definition through its steps.
pub struct PipelineRunner {
    definition: PipelineDefinition,
    registry: Arc<PatternRegistry>,
    evaluator: Arc<dyn MetricEvaluator>,
    modes: Arc<dyn ModeResolver>,
    adapter: Arc<dyn OutputAdapter>,
    ledger: Option<Arc<dyn FallbackLedger>>,
    config: RunnerConfig,
    events: EventEmitter,
}

/// The result of a completed run.
#[derive(Debug)]
pub struct RunResult {
    pub run_id: Uuid,
    /// Raw output of the last step.
    pub output: serde_json::Value,
    /// Run-wide metrics; a later step's metric overwrites an earlier one of
    /// the same name. Per-step values live in the trail.
    pub metrics: Metrics,
    pub reasoning_trail: ReasoningTrail,
    /// Rendered trail.
    pub report: String,
    /// Fallback events written by this run.
    pub fallbacks: Vec<FallbackEvent>,
    pub trail_path: Option<PathBuf>,
    /// Durable-logging failures. They never discard the computed output.
    pub persistence_errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// PipelineRunner
// ---------------------------------------------------------------------------

impl PipelineRunner {
    /// A runner with the built-in mode table, the handoff envelope adapter,
    /// default config, and a JSON-file ledger at the configured path.
    pub fn new(
        definition: PipelineDefinition,
        registry: Arc<PatternRegistry>,
        evaluator: Arc<dyn MetricEvaluator>,
    ) -> Self {
        Self {
            definition,
            registry,
            evaluator,
            modes: Arc::new(ModeTable::builtin()),
            adapter: Arc::new(HandoffEnvelope),
            ledger: None,
            config: RunnerConfig::default(),
            events: EventEmitter::default(),
        }
    }

    pub fn with_modes(mut self, modes: Arc<dyn ModeResolver>) -> Self {
        self.modes = modes;
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn OutputAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Inject a ledger. Otherwise a [`JsonFileLedger`] at
    /// `config.ledger_path` is used.
    pub fn with_ledger(mut self, ledger: Arc<dyn FallbackLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Run the chain once over `input`. With `adaptive = false` the fallback
    /// policy is skipped and every primary result is accepted.
    pub async fn execute(&self, input: serde_json::Value, adaptive: bool) -> Result<RunResult> {
        self.execute_with_cancel(input, adaptive, None).await
    }

    /// Like [`execute`](Self::execute), but stops at the next step boundary
    /// once `cancel` is set. A transform already in flight is never
    /// interrupted.
    pub async fn execute_with_cancel(
        &self,
        input: serde_json::Value,
        adaptive: bool,
        cancel: Option<&AtomicBool>,
    ) -> Result<RunResult> {
        // INIT
        self.definition.validate()?;
        self.config.validate()?;
        let definition = &self.definition;
        let mode = definition.execution_mode.as_str();
        let profile = self.modes.resolve(mode)?;
        profile.validate(mode)?;
        for step in &definition.steps {
            self.registry.get(&step.pattern)?;
            if let Some(fallback) = self.registry.fallback_for(&step.pattern) {
                self.registry.get(fallback)?;
            }
        }

        let ledger: Arc<dyn FallbackLedger> = match &self.ledger {
            Some(ledger) => ledger.clone(),
            None => Arc::new(JsonFileLedger::new(&self.config.ledger_path)),
        };

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let step_count = definition.steps.len();

        tracing::info!(
            %run_id,
            pipeline = %definition.display_name(),
            mode,
            threshold = profile.threshold,
            steps = step_count,
            adaptive,
            max_iterations = definition.max_iterations,
            "Pipeline run started"
        );
        self.events.emit(PipelineEvent::RunStarted {
            run_id,
            pipeline_name: definition.display_name().to_string(),
            mode: mode.to_string(),
            threshold: profile.threshold,
            step_count,
            adaptive,
        });

        let executor = StepExecutor::new(
            &self.registry,
            self.evaluator.as_ref(),
            ledger.as_ref(),
            mode,
            &profile,
            run_id,
        );
        let mut trail = ReasoningTrail::new(
            run_id,
            definition.display_name(),
            mode,
            profile.threshold,
            self.config.preview_chars,
        );
        let mut aggregate = Metrics::new();
        let mut run_fallbacks: Vec<FallbackEvent> = Vec::new();
        let mut persistence_errors: Vec<String> = Vec::new();
        let mut current_input = input;
        let mut output = serde_json::Value::Null;

        // RUNNING
        for (index, step) in definition.steps.iter().enumerate() {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                tracing::warn!(%run_id, completed_steps = index, "Pipeline run cancelled");
                self.events.emit(PipelineEvent::RunCancelled {
                    run_id,
                    completed_steps: index,
                });
                return Err(CascadeError::Cancelled {
                    completed_steps: index,
                });
            }

            self.events.emit(PipelineEvent::StepStarted {
                step_index: index,
                agent: step.agent.clone(),
                pattern: step.pattern.clone(),
            });
            let step_started = Instant::now();

            let outcome = executor
                .execute(index, step, &current_input, adaptive)
                .await?;

            if let Some(ref event) = outcome.fallback {
                self.events.emit(PipelineEvent::FallbackAttempted {
                    step_index: index,
                    original_pattern: event.original_pattern.clone(),
                    fallback_pattern: event.fallback_pattern.clone(),
                    accepted: event.accepted,
                });
            }
            if let Some(ref error) = outcome.persistence_error {
                self.events.emit(PipelineEvent::PersistenceFailed {
                    error: error.clone(),
                });
                persistence_errors.push(error.clone());
            }

            let result = outcome.result;
            trail.record(index, step, &result, outcome.fallback.is_some());
            aggregate.extend(result.metrics.clone());
            run_fallbacks.extend(outcome.fallback);

            self.events.emit(PipelineEvent::StepCompleted {
                step_index: index,
                pattern_used: result.pattern_used.clone(),
                failed_metrics: result.failed_metrics.clone(),
                duration_ms: step_started.elapsed().as_millis() as u64,
            });

            if index + 1 < step_count {
                current_input = self.adapter.adapt(&result.output, &step.agent, mode);
            }
            output = result.output;
        }

        // DONE
        let report = trail.render();

        let trail_path = match self.config.trail_dir {
            Some(ref dir) => match trail.save(dir).await {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(%run_id, error = %e, "Failed to save reasoning trail");
                    self.events.emit(PipelineEvent::PersistenceFailed {
                        error: e.to_string(),
                    });
                    persistence_errors.push(e.to_string());
                    None
                }
            },
            None => None,
        };

        let fallbacks = self
            .collect_fallbacks(
                ledger.as_ref(),
                run_id,
                started.elapsed(),
                run_fallbacks,
                &mut persistence_errors,
            )
            .await;

        tracing::info!(
            %run_id,
            steps = trail.len(),
            fallbacks = fallbacks.len(),
            persistence_errors = persistence_errors.len(),
            "Pipeline run completed"
        );
        self.events.emit(PipelineEvent::RunCompleted {
            run_id,
            step_count: trail.len(),
            fallback_count: fallbacks.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        });

        Ok(RunResult {
            run_id,
            output,
            metrics: aggregate,
            reasoning_trail: trail,
            report,
            fallbacks,
            trail_path,
            persistence_errors,
        })
    }

    /// This run's fallback events as read back from the ledger. If any
    /// ledger write or the read-back failed, the events held in memory for
    /// this run are returned instead.
    async fn collect_fallbacks(
        &self,
        ledger: &dyn FallbackLedger,
        run_id: Uuid,
        elapsed: Duration,
        run_fallbacks: Vec<FallbackEvent>,
        persistence_errors: &mut Vec<String>,
    ) -> Vec<FallbackEvent> {
        if run_fallbacks.is_empty() {
            return run_fallbacks;
        }
        if !persistence_errors.is_empty() {
            return run_fallbacks;
        }
        match ledger.recent(elapsed + RECENT_SLACK).await {
            Ok(events) => events
                .into_iter()
                .filter(|e| e.run_id == Some(run_id))
                .collect(),
            Err(e) => {
                tracing::warn!(%run_id, error = %e, "Failed to read back fallback ledger");
                self.events.emit(PipelineEvent::PersistenceFailed {
                    error: e.to_string(),
                });
                persistence_errors.push(e.to_string());
                run_fallbacks
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
