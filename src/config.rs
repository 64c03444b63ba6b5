// ⚙️ Configuration - cutoffs, mode, alias rules, output labels
// Everything tunable lives here; the engine itself has no magic numbers.

use crate::aliases::{AliasRule, AliasTable};
use crate::engine::Outcome;
use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

// ============================================================================
// MATCH THRESHOLDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    /// Same-department pool, raw names compared as written (default: 0.80)
    pub municipality_direct: f64,

    /// Same-department pool, slugs compared when the raw comparison fails (default: 0.70)
    pub municipality_slug: f64,

    /// Department slug vs. known department slugs (default: 0.80)
    pub department: f64,

    /// Municipality slug vs. the global municipality index (default: 0.85)
    pub global_municipality: f64,

    /// Minimum combined score to accept the weighted fallback (default: 0.62)
    pub fallback_accept: f64,

    /// Municipality weight in the fallback score; department gets the rest (default: 0.65)
    pub fallback_municipality_weight: f64,
}

impl MatchThresholds {
    pub fn new() -> Self {
        MatchThresholds {
            municipality_direct: 0.80,
            municipality_slug: 0.70,
            department: 0.80,
            global_municipality: 0.85,
            fallback_accept: 0.62,
            fallback_municipality_weight: 0.65,
        }
    }

    pub fn fallback_department_weight(&self) -> f64 {
        1.0 - self.fallback_municipality_weight
    }

    /// Every cutoff and weight must sit in [0, 1]
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("municipality_direct", self.municipality_direct),
            ("municipality_slug", self.municipality_slug),
            ("department", self.department),
            ("global_municipality", self.global_municipality),
            ("fallback_accept", self.fallback_accept),
            ("fallback_municipality_weight", self.fallback_municipality_weight),
        ];

        for (name, value) in checks {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReconcileError::InvalidThreshold { name, value });
            }
        }

        Ok(())
    }
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MATCH MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Aliases + exact key only (comparison report)
    ExactOnly,

    /// Every tier down to the weighted fallback
    #[default]
    Full,
}

// ============================================================================
// OUTPUT LABELS
// ============================================================================

/// Column names and outcome strings written into output tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLabels {
    pub country_column: String,
    pub outcome_column: String,
    pub unchanged: String,
    pub changed: String,
    pub unmatched: String,
}

impl OutputLabels {
    pub fn english() -> Self {
        OutputLabels {
            country_column: "country".to_string(),
            outcome_column: "outcome".to_string(),
            unchanged: Outcome::Unchanged.as_str().to_string(),
            changed: Outcome::Changed.as_str().to_string(),
            unmatched: Outcome::Unmatched.as_str().to_string(),
        }
    }

    /// Labels the risk team's spreadsheets already use
    pub fn spanish() -> Self {
        OutputLabels {
            country_column: "País".to_string(),
            outcome_column: "comparacion".to_string(),
            unchanged: "sin cambio".to_string(),
            changed: "cambio".to_string(),
            unmatched: "no coincidencia".to_string(),
        }
    }

    pub fn label(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Unchanged => &self.unchanged,
            Outcome::Changed => &self.changed,
            Outcome::Unmatched => &self.unmatched,
        }
    }

    /// Reverse of `label`, falling back to the built-in spellings
    pub fn parse(&self, text: &str) -> Option<Outcome> {
        let text = text.trim();
        [Outcome::Unchanged, Outcome::Changed, Outcome::Unmatched]
            .into_iter()
            .find(|o| self.label(*o).eq_ignore_ascii_case(text))
            .or_else(|| Outcome::from_label(text))
    }
}

impl Default for OutputLabels {
    fn default() -> Self {
        Self::english()
    }
}

// ============================================================================
// RECONCILE CONFIG (JSON file)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub thresholds: MatchThresholds,

    pub mode: MatchMode,

    /// Alias rules; `None` means the bundled table
    pub aliases: Option<Vec<AliasRule>>,

    pub labels: OutputLabels,
}

impl ReconcileConfig {
    /// Load config from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&content)?;
        info!(path = %path.as_ref().display(), "loaded reconcile config");
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: ReconcileConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()
    }

    /// Alias table for this run: configured rules, or the bundled ones
    pub fn alias_table(&self) -> Result<AliasTable> {
        match &self.aliases {
            Some(rules) => Ok(AliasTable::from_rules(rules.clone())),
            None => AliasTable::builtin(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let t = MatchThresholds::default();
        assert_eq!(t.municipality_direct, 0.80);
        assert_eq!(t.global_municipality, 0.85);
        assert_eq!(t.fallback_accept, 0.62);
        assert!((t.fallback_department_weight() - 0.35).abs() < 1e-9);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let t = MatchThresholds {
            department: 1.5,
            ..MatchThresholds::default()
        };
        match t.validate() {
            Err(ReconcileError::InvalidThreshold { name, value }) => {
                assert_eq!(name, "department");
                assert_eq!(value, 1.5);
            }
            other => panic!("expected InvalidThreshold, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ReconcileConfig::from_json(
            r#"{ "thresholds": { "fallback_accept": 0.7 }, "mode": "exact_only" }"#,
        )
        .unwrap();
        assert_eq!(config.thresholds.fallback_accept, 0.7);
        assert_eq!(config.thresholds.department, 0.80);
        assert_eq!(config.mode, MatchMode::ExactOnly);
        assert!(config.aliases.is_none());
        assert_eq!(config.labels, OutputLabels::english());
    }

    #[test]
    fn test_invalid_json_threshold_fails_validation() {
        let err = ReconcileConfig::from_json(r#"{ "thresholds": { "department": -0.1 } }"#);
        assert!(matches!(err, Err(ReconcileError::InvalidThreshold { .. })));
    }

    #[test]
    fn test_configured_aliases_replace_builtin() {
        let config = ReconcileConfig::from_json(
            r#"{ "aliases": [ { "id": "cesar", "department": ["Cesar"], "target_department": "César" } ] }"#,
        )
        .unwrap();
        let table = config.alias_table().unwrap();
        assert_eq!(table.rule_count(), 1);
    }

    #[test]
    fn test_labels_round_trip() {
        let es = OutputLabels::spanish();
        assert_eq!(es.label(Outcome::Unmatched), "no coincidencia");
        assert_eq!(es.parse("No Coincidencia"), Some(Outcome::Unmatched));
        assert_eq!(es.parse("Changed"), Some(Outcome::Changed));
        assert_eq!(es.parse("???"), None);
    }
}
