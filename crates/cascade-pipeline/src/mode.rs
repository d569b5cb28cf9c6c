//! Mode profiles: the quality threshold and default step config for each
//! execution mode.

use std::collections::HashMap;
use std::path::Path;

use cascade_types::{CascadeError, Result};
use serde::{Deserialize, Serialize};

use crate::definition::StepConfig;

/// Threshold and default config overlay for one execution mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeProfile {
    /// Every numeric metric must meet or exceed this to pass.
    pub threshold: f64,
    #[serde(default)]
    pub defaults: StepConfig,
}

impl ModeProfile {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            defaults: StepConfig::new(),
        }
    }

    pub fn with_default(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    /// Overlay `local` onto this mode's defaults. Local keys win.
    pub fn merge(&self, local: &StepConfig) -> StepConfig {
        let mut merged = self.defaults.clone();
        for (key, value) in local {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Rejects thresholds outside `[0, 1]`, including NaN.
    pub fn validate(&self, mode: &str) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(CascadeError::InvalidConfig(format!(
                "mode '{mode}' threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Resolves an execution mode to its profile.
///
/// An unknown mode is an error, never a silent default: a wrong threshold
/// would change pass/fail for every step in the run.
pub trait ModeResolver: Send + Sync {
    fn resolve(&self, mode: &str) -> Result<ModeProfile>;
}

/// Table-backed [`ModeResolver`].
#[derive(Debug, Clone, Default)]
pub struct ModeTable {
    profiles: HashMap<String, ModeProfile>,
}

impl ModeTable {
    /// An empty table. Every lookup fails until profiles are inserted.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in modes.
    pub fn builtin() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "simulate".into(),
            ModeProfile::new(0.6).with_default("style", "exploratory".into()),
        );
        profiles.insert(
            "critique".into(),
            ModeProfile::new(0.7).with_default("style", "adversarial".into()),
        );
        profiles.insert(
            "advisory_board".into(),
            ModeProfile::new(0.75).with_default("style", "deliberative".into()),
        );
        profiles.insert(
            "ship".into(),
            ModeProfile::new(0.8).with_default("style", "decisive".into()),
        );
        Self { profiles }
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, mode: impl Into<String>, profile: ModeProfile) -> Result<()> {
        let mode = mode.into();
        profile.validate(&mode)?;
        self.profiles.insert(mode, profile);
        Ok(())
    }

    /// Parse `{ "<mode>": { "threshold": .., "defaults": {..} }, .. }`.
    pub fn from_json(source: &str) -> Result<Self> {
        let raw: HashMap<String, ModeProfile> = serde_json::from_str(source)?;
        let mut table = Self::new();
        for (mode, profile) in raw {
            table.insert(mode, profile)?;
        }
        Ok(table)
    }

    /// Built-in modes overridden and extended by the profiles in `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let overrides = Self::from_json(&source)?;
        let mut table = Self::builtin();
        table.profiles.extend(overrides.profiles);
        tracing::debug!(path = %path.display(), modes = table.profiles.len(), "Mode table loaded");
        Ok(table)
    }

    /// Known mode names, sorted.
    pub fn modes(&self) -> Vec<&str> {
        let mut modes: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        modes.sort_unstable();
        modes
    }
}

impl ModeResolver for ModeTable {
    fn resolve(&self, mode: &str) -> Result<ModeProfile> {
        self.profiles
            .get(mode)
            .cloned()
            .ok_or_else(|| CascadeError::UnknownMode {
                mode: mode.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_thresholds() {
        let table = ModeTable::builtin();
        assert_eq!(table.resolve("ship").unwrap().threshold, 0.8);
        assert_eq!(table.resolve("simulate").unwrap().threshold, 0.6);
        assert_eq!(table.resolve("critique").unwrap().threshold, 0.7);
        assert_eq!(table.resolve("advisory_board").unwrap().threshold, 0.75);
        assert_eq!(
            table.modes(),
            vec!["advisory_board", "critique", "ship", "simulate"]
        );
    }

    #[test]
    fn unknown_mode_is_an_error() {
        let err = ModeTable::builtin().resolve("yolo").unwrap_err();
        match err {
            CascadeError::UnknownMode { mode } => assert_eq!(mode, "yolo"),
            other => panic!("expected UnknownMode, got: {other:?}"),
        }
    }

    #[test]
    fn empty_table_resolves_nothing() {
        assert!(ModeTable::new().resolve("ship").is_err());
    }

    #[test]
    fn merge_prefers_local_config() {
        let profile = ModeProfile::new(0.8)
            .with_default("style", json!("decisive"))
            .with_default("length", json!("short"));
        let mut local = StepConfig::new();
        local.insert("style".into(), json!("playful"));
        local.insert("audience".into(), json!("execs"));

        let merged = profile.merge(&local);
        assert_eq!(merged.get("style"), Some(&json!("playful")));
        assert_eq!(merged.get("length"), Some(&json!("short")));
        assert_eq!(merged.get("audience"), Some(&json!("execs")));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn insert_rejects_out_of_range_threshold() {
        let mut table = ModeTable::new();
        assert!(matches!(
            table.insert("odd", ModeProfile::new(1.5)),
            Err(CascadeError::InvalidConfig(_))
        ));
        assert!(table.insert("nan", ModeProfile::new(f64::NAN)).is_err());
        assert!(table.insert("edge", ModeProfile::new(1.0)).is_ok());
    }

    #[test]
    fn from_json_parses_profiles() {
        let table = ModeTable::from_json(
            r#"{"review": {"threshold": 0.65, "defaults": {"rounds": 2}}, "bare": {"threshold": 0.5}}"#,
        )
        .unwrap();
        let review = table.resolve("review").unwrap();
        assert_eq!(review.threshold, 0.65);
        assert_eq!(review.defaults.get("rounds"), Some(&json!(2)));
        assert!(table.resolve("bare").unwrap().defaults.is_empty());
    }

    #[test]
    fn load_overrides_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modes.json");
        std::fs::write(&path, r#"{"ship": {"threshold": 0.9}, "draft": {"threshold": 0.3}}"#)
            .unwrap();

        let table = ModeTable::load(&path).unwrap();
        assert_eq!(table.resolve("ship").unwrap().threshold, 0.9);
        assert_eq!(table.resolve("draft").unwrap().threshold, 0.3);
        assert_eq!(table.resolve("critique").unwrap().threshold, 0.7);
    }
}
