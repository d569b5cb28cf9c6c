//! Output adapters: turn one step's output into the next step's input.

/// Builds the next step's input from a step's raw output.
///
/// Implementations must be pure: identical arguments always give identical
/// results, with no side effects.
pub trait OutputAdapter: Send + Sync {
    fn adapt(&self, raw_output: &serde_json::Value, agent: &str, mode: &str) -> serde_json::Value;
}

/// Hands the output through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl OutputAdapter for PassThrough {
    fn adapt(&self, raw_output: &serde_json::Value, _agent: &str, _mode: &str) -> serde_json::Value {
        raw_output.clone()
    }
}

/// Wraps the output with where it came from:
/// `{ "content": <output>, "from_agent": <agent>, "mode": <mode> }`.
///
/// An output that is already an envelope is unwrapped first, so envelopes
/// never nest across steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandoffEnvelope;

impl HandoffEnvelope {
    fn is_envelope(value: &serde_json::Value) -> bool {
        value.as_object().is_some_and(|obj| {
            obj.len() == 3
                && obj.contains_key("content")
                && obj.get("from_agent").is_some_and(|v| v.is_string())
                && obj.get("mode").is_some_and(|v| v.is_string())
        })
    }

    /// The payload of an envelope, or the value itself when it is not one.
    pub fn content(value: &serde_json::Value) -> &serde_json::Value {
        if Self::is_envelope(value) {
            &value["content"]
        } else {
            value
        }
    }
}

impl OutputAdapter for HandoffEnvelope {
    fn adapt(&self, raw_output: &serde_json::Value, agent: &str, mode: &str) -> serde_json::Value {
        serde_json::json!({
            "content": Self::content(raw_output).clone(),
            "from_agent": agent,
            "mode": mode,
        })
    }
}
