//! Pipeline definition: the ordered chain of steps a runner executes.
//!
//! Definitions are JSON documents of the form
//! `{ "execution_mode": "...", "chain": [{ "agent", "pattern", "config" }, ...] }`
//! and are validated once on load. After that they are read-only.

use std::path::Path;

use cascade_types::{CascadeError, Result};
use serde::{Deserialize, Serialize};

/// Per-step configuration overlay (option name to value).
pub type StepConfig = serde_json::Map<String, serde_json::Value>;

fn default_max_iterations() -> u32 {
    3
}

/// One element of the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Logical actor performing the step. Used for logging and ledger
    /// grouping, never for dispatch.
    pub agent: String,
    /// Name of the primary transform.
    pub pattern: String,
    #[serde(default)]
    pub config: StepConfig,
}

impl StepSpec {
    pub fn new(agent: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            pattern: pattern.into(),
            config: StepConfig::new(),
        }
    }

    /// Set one local config option, overriding the mode default of the same name.
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub execution_mode: String,
    /// Order is significant: step *i*'s output feeds step *i+1*.
    #[serde(rename = "chain")]
    pub steps: Vec<StepSpec>,
    /// Advisory only; the runner never enforces it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<serde_json::Map<String, serde_json::Value>>,
    /// Reserved for whole-pipeline retries. The single-pass runner records
    /// it but does not loop on it.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl PipelineDefinition {
    pub fn new(execution_mode: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            name: None,
            execution_mode: execution_mode.into(),
            steps,
            success_criteria: None,
            max_iterations: default_max_iterations(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parse and validate a definition from JSON text.
    pub fn from_json(source: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(source)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Read, parse, and validate a definition file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let definition = Self::from_json(&source)?;
        tracing::debug!(
            path = %path.display(),
            steps = definition.steps.len(),
            mode = %definition.execution_mode,
            "Pipeline definition loaded"
        );
        Ok(definition)
    }

    /// Structural checks. Whether the mode and patterns actually resolve is
    /// decided by the mode resolver and pattern registry at run time.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.execution_mode.trim().is_empty() {
            problems.push("execution_mode is empty".to_string());
        }
        if self.steps.is_empty() {
            problems.push("chain has no steps".to_string());
        }
        for (index, step) in self.steps.iter().enumerate() {
            if step.agent.trim().is_empty() {
                problems.push(format!("step {index} has an empty agent"));
            }
            if step.pattern.trim().is_empty() {
                problems.push(format!("step {index} has an empty pattern"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CascadeError::InvalidDefinition(problems.join("; ")))
        }
    }

    /// Name used in logs, events, and the trail header.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("pipeline")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_chain_in_order() {
        let def = PipelineDefinition::from_json(
            r#"{
                "execution_mode": "ship",
                "chain": [
                    {"agent": "strategist", "pattern": "first_principles", "config": {"depth": 2}},
                    {"agent": "editor", "pattern": "plain_language"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(def.execution_mode, "ship");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].agent, "strategist");
        assert_eq!(def.steps[0].config.get("depth"), Some(&json!(2)));
        assert_eq!(def.steps[1].pattern, "plain_language");
        assert!(def.steps[1].config.is_empty());
    }

    #[test]
    fn optional_fields_default() {
        let def = PipelineDefinition::from_json(
            r#"{"execution_mode": "simulate", "chain": [{"agent": "a", "pattern": "p"}]}"#,
        )
        .unwrap();
        assert_eq!(def.max_iterations, 3);
        assert!(def.success_criteria.is_none());
        assert!(def.name.is_none());
        assert_eq!(def.display_name(), "pipeline");
    }

    #[test]
    fn keeps_success_criteria_and_max_iterations() {
        let def = PipelineDefinition::from_json(
            r#"{
                "name": "launch-review",
                "execution_mode": "critique",
                "chain": [{"agent": "a", "pattern": "p"}],
                "success_criteria": {"min_clarity": 0.7},
                "max_iterations": 5
            }"#,
        )
        .unwrap();
        assert_eq!(def.max_iterations, 5);
        assert_eq!(def.display_name(), "launch-review");
        assert_eq!(
            def.success_criteria.unwrap().get("min_clarity"),
            Some(&json!(0.7))
        );
    }

    #[test]
    fn empty_chain_is_rejected() {
        let err = PipelineDefinition::from_json(r#"{"execution_mode": "ship", "chain": []}"#)
            .unwrap_err();
        match err {
            CascadeError::InvalidDefinition(msg) => assert!(msg.contains("no steps")),
            other => panic!("expected InvalidDefinition, got: {other:?}"),
        }
    }

    #[test]
    fn blank_fields_are_all_reported() {
        let def = PipelineDefinition::new(
            " ",
            vec![StepSpec::new("", "p"), StepSpec::new("a", "")],
        );
        let err = def.validate().unwrap_err().to_string();
        assert!(err.contains("execution_mode is empty"));
        assert!(err.contains("step 0 has an empty agent"));
        assert!(err.contains("step 1 has an empty pattern"));
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let err = PipelineDefinition::from_json("{ not json").unwrap_err();
        assert!(matches!(err, CascadeError::Json(_)));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let def = PipelineDefinition::new("ship", vec![StepSpec::new("writer", "draft")])
            .with_name("disk");
        std::fs::write(&path, serde_json::to_string_pretty(&def).unwrap()).unwrap();

        let loaded = PipelineDefinition::load(&path).unwrap();
        assert_eq!(loaded, def);
    }

    #[test]
    fn serializes_steps_as_chain() {
        let def = PipelineDefinition::new(
            "ship",
            vec![StepSpec::new("writer", "draft").with_option("tone", json!("direct"))],
        );
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["chain"][0]["config"]["tone"], json!("direct"));
        assert!(value.get("steps").is_none());
    }
}
