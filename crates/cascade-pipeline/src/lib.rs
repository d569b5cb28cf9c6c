//! Sequential pipeline runner with quality-gated fallback.
//!
//! This crate implements the Cascade runner: ordered step execution, metric
//! thresholds per execution mode, a single fallback retry per failing step,
//! the append-only fallback ledger, and the reasoning trail report.

pub mod adapter;
pub mod config;
pub mod definition;
pub mod engine;
pub mod evaluator;
pub mod events;
pub mod ledger;
pub mod mode;
pub mod registry;
pub mod step;
pub mod trail;

pub use adapter::{HandoffEnvelope, OutputAdapter, PassThrough};
pub use config::RunnerConfig;
pub use definition::{PipelineDefinition, StepConfig, StepSpec};
pub use engine::{PipelineRunner, RunResult};
pub use evaluator::{FnEvaluator, MetricEvaluator, ScoreTable};
pub use events::{EventEmitter, PipelineEvent};
pub use ledger::{FallbackLedger, JsonFileLedger, MemoryLedger};
pub use mode::{ModeProfile, ModeResolver, ModeTable};
pub use registry::{FnTransform, PatternRegistry, Transform};
pub use step::{StepExecutor, StepOutcome};
pub use trail::{format_metrics, preview, ReasoningTrail};
