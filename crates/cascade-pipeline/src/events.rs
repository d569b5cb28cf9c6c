//! Run lifecycle events: start, each step and fallback, persistence
//! failures, cancellation, and completion.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// One observable transition in a run. Step indices are zero-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        mode: String,
        threshold: f64,
        step_count: usize,
        adaptive: bool,
    },
    StepStarted {
        step_index: usize,
        agent: String,
        pattern: String,
    },
    FallbackAttempted {
        step_index: usize,
        original_pattern: String,
        fallback_pattern: String,
        accepted: bool,
    },
    StepCompleted {
        step_index: usize,
        pattern_used: String,
        failed_metrics: Vec<String>,
        duration_ms: u64,
    },
    PersistenceFailed {
        error: String,
    },
    RunCancelled {
        run_id: Uuid,
        completed_steps: usize,
    },
    RunCompleted {
        run_id: Uuid,
        step_count: usize,
        fallback_count: usize,
        duration_ms: u64,
    },
}

// Backlog per subscriber before it starts lagging.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of run events to any number of observers. Cloning shares the
/// same channel, so a clone handed to a runner reaches every subscriber.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    /// Publish to current subscribers. Nobody listening is not an error.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Receives every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(PipelineEvent::StepStarted {
            step_index: 0,
            agent: "writer".into(),
            pattern: "draft".into(),
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::StepStarted {
                step_index,
                agent,
                pattern,
            } => {
                assert_eq!(step_index, 0);
                assert_eq!(agent, "writer");
                assert_eq!(pattern, "draft");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn clones_share_one_channel() {
        let emitter = EventEmitter::default();
        let mut rx = emitter.subscribe();
        emitter.clone().emit(PipelineEvent::PersistenceFailed {
            error: "disk full".into(),
        });
        assert!(matches!(
            rx.try_recv(),
            Ok(PipelineEvent::PersistenceFailed { .. })
        ));
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(PipelineEvent::PersistenceFailed {
            error: "disk full".into(),
        });
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = PipelineEvent::FallbackAttempted {
            step_index: 1,
            original_pattern: "dense_brief".into(),
            fallback_pattern: "plain_language".into(),
            accepted: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        match serde_json::from_str::<PipelineEvent>(&json).unwrap() {
            PipelineEvent::FallbackAttempted {
                step_index,
                fallback_pattern,
                accepted,
                ..
            } => {
                assert_eq!(step_index, 1);
                assert_eq!(fallback_pattern, "plain_language");
                assert!(accepted);
            }
            other => panic!("unexpected variant after round-trip: {:?}", other),
        }
    }
}
