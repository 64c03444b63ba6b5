// 🏷️ Alias Table - Hand-curated overrides, rules as data
// Known typos and renames fixed before any matching runs.
//
// Rules are loaded from JSON (same shape as data/aliases.json) so the list
// can grow without touching the matching code.

use crate::error::Result;
use crate::slug::{compact, slug};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const BUILTIN_ALIASES: &str = include_str!("../data/aliases.json");

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasRule {
    /// Rule ID for audit trails
    pub id: String,

    /// Department spellings this rule fires on (empty = any department)
    #[serde(default)]
    pub department: Vec<String>,

    /// Municipality spellings this rule fires on (empty = any municipality)
    #[serde(default)]
    pub municipality: Vec<String>,

    /// Replacement department (None = leave as is)
    #[serde(default)]
    pub target_department: Option<String>,

    /// Replacement municipality (None = leave as is)
    #[serde(default)]
    pub target_municipality: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

impl AliasRule {
    pub fn new(id: &str, department: &[&str], municipality: &[&str]) -> Self {
        AliasRule {
            id: id.to_string(),
            department: department.iter().map(|s| s.to_string()).collect(),
            municipality: municipality.iter().map(|s| s.to_string()).collect(),
            target_department: None,
            target_municipality: None,
            description: None,
        }
    }

    /// Builder pattern: replacement department
    pub fn with_target_department(mut self, department: &str) -> Self {
        self.target_department = Some(department.to_string());
        self
    }

    /// Builder pattern: replacement municipality
    pub fn with_target_municipality(mut self, municipality: &str) -> Self {
        self.target_municipality = Some(municipality.to_string());
        self
    }
}

/// A source spelling, pre-slugged
#[derive(Debug, Clone)]
struct Pattern {
    slug: String,
    compact: String,
}

impl Pattern {
    fn new(text: &str) -> Self {
        Pattern {
            slug: slug(text),
            compact: compact(text),
        }
    }
}

/// Empty pattern list matches anything
fn side_matches(patterns: &[Pattern], text: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }
    let text_slug = slug(text);
    let text_compact = compact(text);
    patterns
        .iter()
        .any(|p| p.slug == text_slug || (!p.compact.is_empty() && p.compact == text_compact))
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: AliasRule,
    departments: Vec<Pattern>,
    municipalities: Vec<Pattern>,
}

impl CompiledRule {
    fn new(rule: AliasRule) -> Self {
        CompiledRule {
            departments: rule.department.iter().map(|d| Pattern::new(d)).collect(),
            municipalities: rule.municipality.iter().map(|m| Pattern::new(m)).collect(),
            rule,
        }
    }

    fn matches(&self, department: &str, municipality: &str) -> bool {
        side_matches(&self.departments, department) && side_matches(&self.municipalities, municipality)
    }
}

// ============================================================================
// ALIAS APPLICATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AliasApplication {
    pub department: String,
    pub municipality: String,
    /// IDs of rules that changed something, in order
    pub applied: Vec<String>,
}

// ============================================================================
// ALIAS TABLE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    rules: Vec<CompiledRule>,
}

impl AliasTable {
    /// Empty table: every pair passes through
    pub fn new() -> Self {
        AliasTable { rules: Vec::new() }
    }

    /// The table shipped in data/aliases.json
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_ALIASES)
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let table = Self::from_json(&content)?;
        info!(path = %path.as_ref().display(), rules = table.rule_count(), "loaded alias table");
        Ok(table)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let rules: Vec<AliasRule> = serde_json::from_str(text)?;
        Ok(Self::from_rules(rules))
    }

    /// Rules keep their order; a rule with no source pattern at all is dropped
    pub fn from_rules(rules: Vec<AliasRule>) -> Self {
        let mut table = AliasTable::new();
        for rule in rules {
            table.add_rule(rule);
        }
        table
    }

    pub fn add_rule(&mut self, rule: AliasRule) {
        if rule.department.is_empty() && rule.municipality.is_empty() {
            warn!(rule = %rule.id, "alias rule has no source pattern, ignoring");
            return;
        }
        self.rules.push(CompiledRule::new(rule));
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> impl Iterator<Item = &AliasRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    /// Run every rule in order; each sees the output of the previous one
    pub fn apply(&self, department: &str, municipality: &str) -> AliasApplication {
        let mut department = department.to_string();
        let mut municipality = municipality.to_string();
        let mut applied = Vec::new();

        for compiled in &self.rules {
            if !compiled.matches(&department, &municipality) {
                continue;
            }

            let mut changed = false;
            if let Some(target) = &compiled.rule.target_department {
                if *target != department {
                    department = target.clone();
                    changed = true;
                }
            }
            if let Some(target) = &compiled.rule.target_municipality {
                if *target != municipality {
                    municipality = target.clone();
                    changed = true;
                }
            }

            if changed {
                applied.push(compiled.rule.id.clone());
            }
        }

        AliasApplication {
            department,
            municipality,
            applied,
        }
    }

    /// SHA-256 over the rule list (order matters)
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for compiled in &self.rules {
            let rule = &compiled.rule;
            hasher.update(format!(
                "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\n",
                rule.id,
                rule.department.join("\u{1e}"),
                rule.municipality.join("\u{1e}"),
                rule.target_department.as_deref().unwrap_or(""),
                rule.target_municipality.as_deref().unwrap_or(""),
            ));
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// TESTS
// ============================================================================
