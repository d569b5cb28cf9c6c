//! Reasoning trail: the ordered, human-readable record of one run.
//!
//! Entries accumulate in execution order. [`ReasoningTrail::render`] is a pure
//! projection of the recorded entries: the generation timestamp is fixed when
//! the trail is created, so rendering the same trail twice yields identical
//! bytes.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use cascade_types::{numeric_score, Metrics, Result, StepResult, TrailEntry};

use crate::definition::StepSpec;

/// Bounded, char-safe excerpt of a step output. Strings are shown raw,
/// anything else as compact JSON.
pub fn preview(output: &serde_json::Value, max_chars: usize) -> String {
    let text = match output {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}... [{} more chars]", total - max_chars)
}

/// `clarity=0.85, tone="warm"` in key order. Numbers get two decimals.
pub fn format_metrics(metrics: &Metrics) -> String {
    if metrics.is_empty() {
        return "(none)".to_string();
    }
    metrics
        .iter()
        .map(|(name, value)| match numeric_score(value) {
            Some(score) => format!("{name}={score:.2}"),
            None => format!("{name}={value}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A backtick fence longer than any backtick run in `text`, minimum three.
fn code_fence(text: &str) -> String {
    let longest = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningTrail {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub mode: String,
    pub threshold: f64,
    pub generated_at: DateTime<Utc>,
    entries: Vec<TrailEntry>,
    #[serde(skip)]
    preview_chars: usize,
}

impl ReasoningTrail {
    pub fn new(
        run_id: Uuid,
        pipeline_name: impl Into<String>,
        mode: impl Into<String>,
        threshold: f64,
        preview_chars: usize,
    ) -> Self {
        Self {
            run_id,
            pipeline_name: pipeline_name.into(),
            mode: mode.into(),
            threshold,
            generated_at: Utc::now(),
            entries: Vec::new(),
            preview_chars,
        }
    }

    /// Append the entry for one executed step.
    pub fn record(
        &mut self,
        step_index: usize,
        step: &StepSpec,
        result: &StepResult,
        fallback_attempted: bool,
    ) {
        let failed_metrics = if result.failed_metrics.is_empty() {
            None
        } else {
            Some(result.failed_metrics.clone())
        };
        self.entries.push(TrailEntry {
            step_index,
            agent: step.agent.clone(),
            declared_pattern: step.pattern.clone(),
            pattern_used: result.pattern_used.clone(),
            metrics: result.metrics.clone(),
            output_preview: preview(&result.output, self.preview_chars),
            failed_metrics,
            fallback_attempted,
        });
    }

    pub fn entries(&self) -> &[TrailEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Markdown report: a header, then one section per step.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Reasoning Trail: {}", self.pipeline_name);
        let _ = writeln!(out);
        let _ = writeln!(out, "- Mode: {}", self.mode);
        let _ = writeln!(out, "- Threshold: {:.2}", self.threshold);
        let _ = writeln!(out, "- Run: {}", self.run_id);
        let _ = writeln!(
            out,
            "- Generated: {}",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(out, "- Steps: {}", self.entries.len());

        for entry in &self.entries {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Step {}: {}", entry.step_index + 1, entry.agent);
            let _ = writeln!(out);
            if entry.pattern_used == entry.declared_pattern {
                let _ = writeln!(out, "- Pattern: `{}`", entry.pattern_used);
            } else {
                let _ = writeln!(
                    out,
                    "- Pattern: `{}` (fallback for `{}`)",
                    entry.pattern_used, entry.declared_pattern
                );
            }
            let _ = writeln!(out, "- Metrics: {}", format_metrics(&entry.metrics));
            if let Some(ref failed) = entry.failed_metrics {
                let _ = writeln!(out, "- Failed metrics: {}", failed.join(", "));
                if entry.fallback_attempted && entry.pattern_used == entry.declared_pattern {
                    let _ = writeln!(out, "- Fallback rejected; primary output kept");
                }
            }
            let fence = code_fence(&entry.output_preview);
            let _ = writeln!(out);
            let _ = writeln!(out, "{fence}text");
            let _ = writeln!(out, "{}", entry.output_preview);
            let _ = writeln!(out, "{fence}");
        }
        out
    }

    /// `reasoning_trail_<mode>_<YYYYmmdd_HHMMSS>_<run8>.md`
    pub fn file_name(&self) -> String {
        let run = self.run_id.simple().to_string();
        format!(
            "reasoning_trail_{}_{}_{}.md",
            self.mode,
            self.generated_at.format("%Y%m%d_%H%M%S"),
            &run[..8]
        )
    }

    /// Write the rendered report into `dir`, creating it if needed.
    pub async fn save(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(self.file_name());
        tokio::fs::write(&path, self.render()).await?;
        tracing::debug!(path = %path.display(), "Reasoning trail saved");
        Ok(path)
    }
}
