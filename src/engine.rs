// 🧭 Reconciliation Engine - Resolve free-text places against the gazetteer
//
// Pipeline, first success wins:
//   1. Alias normalization
//   2. Exact canonical key
//   3. Fuzzy municipality inside the same department
//   4. Fuzzy department, then fuzzy municipality inside it
//   5. Fuzzy municipality across all departments, only if globally unique
//   6. Weighted best match over every entry, accepted above a threshold
//
// Unmatched is a normal result, not an error. The engine never does I/O and
// holds no mutable state, so one Reconciler can be shared across threads.

use crate::aliases::AliasTable;
use crate::config::{MatchMode, MatchThresholds, ReconcileConfig};
use crate::gazetteer::{CanonicalKey, Gazetteer, GazetteerEntry};
use crate::similarity::{closest_match, similarity};
use crate::slug::slug;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Input already canonical
    ///
    /// Judged on the input with surrounding whitespace trimmed, so a padded
    /// cell such as `" Medellín "` that resolves to `Medellín` is unchanged.
    Unchanged,

    /// Resolved to a canonical pair that differs from the input
    Changed,

    /// Nothing close enough; left for manual review
    Unmatched,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Unchanged => "Unchanged",
            Outcome::Changed => "Changed",
            Outcome::Unmatched => "Unmatched",
        }
    }

    /// Accepts the English names and the Spanish report labels
    pub fn from_label(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "unchanged" | "sin cambio" => Some(Outcome::Unchanged),
            "changed" | "cambio" => Some(Outcome::Changed),
            "unmatched" | "no coincidencia" => Some(Outcome::Unmatched),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MATCH TIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Canonical key hit (possibly after aliases)
    Exact,

    /// Fuzzy municipality within the input's department
    SameDepartment,

    /// Fuzzy department, then fuzzy municipality within it
    CrossDepartment,

    /// Municipality name unique across the whole gazetteer
    GlobalUnique,

    /// Weighted municipality + department score over every entry
    WeightedFallback,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Exact => "exact",
            MatchTier::SameDepartment => "same-department",
            MatchTier::CrossDepartment => "cross-department",
            MatchTier::GlobalUnique => "global-unique",
            MatchTier::WeightedFallback => "weighted-fallback",
        }
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub resolved_department: String,
    pub resolved_municipality: String,

    /// Empty when unmatched
    pub resolved_country: String,

    pub outcome: Outcome,

    /// Stage that produced the match (None when unmatched)
    pub tier: Option<MatchTier>,

    /// 1.0 for exact; similarity for fuzzy tiers; best rejected fallback score when unmatched
    pub score: f64,

    /// Alias rule IDs that fired
    pub aliases_applied: Vec<String>,
}

impl ReconciliationResult {
    fn unmatched(department: &str, municipality: &str, score: f64, aliases_applied: Vec<String>) -> Self {
        ReconciliationResult {
            resolved_department: department.to_string(),
            resolved_municipality: municipality.to_string(),
            resolved_country: String::new(),
            outcome: Outcome::Unmatched,
            tier: None,
            score,
            aliases_applied,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome != Outcome::Unmatched
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

#[derive(Debug, Clone)]
pub struct Reconciler<'a> {
    gazetteer: &'a Gazetteer,
    aliases: &'a AliasTable,

    /// Per-tier cutoffs (defaults: 0.80 / 0.70 / 0.80 / 0.85 / 0.62)
    pub thresholds: MatchThresholds,

    /// Full pipeline or exact-only comparison (default: Full)
    pub mode: MatchMode,
}

impl<'a> Reconciler<'a> {
    /// Create engine with default thresholds
    pub fn new(gazetteer: &'a Gazetteer, aliases: &'a AliasTable) -> Self {
        Reconciler {
            gazetteer,
            aliases,
            thresholds: MatchThresholds::default(),
            mode: MatchMode::Full,
        }
    }

    pub fn from_config(gazetteer: &'a Gazetteer, aliases: &'a AliasTable, config: &ReconcileConfig) -> Self {
        Reconciler::new(gazetteer, aliases)
            .with_thresholds(config.thresholds)
            .with_mode(config.mode)
    }

    pub fn with_thresholds(mut self, thresholds: MatchThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn gazetteer(&self) -> &'a Gazetteer {
        self.gazetteer
    }

    pub fn aliases(&self) -> &'a AliasTable {
        self.aliases
    }

    /// Resolve one (department, municipality) pair
    ///
    /// Example:
    /// ```
    /// use risk_gazetteer::{AliasTable, Gazetteer, GazetteerEntry, Outcome, Reconciler};
    ///
    /// let gazetteer = Gazetteer::load(vec![
    ///     GazetteerEntry::new("Bolívar", "Cartagena de Indias", "Colombia"),
    /// ]);
    /// let aliases = AliasTable::builtin().unwrap();
    /// let reconciler = Reconciler::new(&gazetteer, &aliases);
    ///
    /// let result = reconciler.reconcile("Bolivar", "Cartagena");
    /// assert_eq!(result.outcome, Outcome::Changed);
    /// assert_eq!(result.resolved_municipality, "Cartagena de Indias");
    /// assert_eq!(result.resolved_country, "Colombia");
    /// ```
    pub fn reconcile(&self, department: &str, municipality: &str) -> ReconciliationResult {
        let raw_department = department.trim();
        let raw_municipality = municipality.trim();

        if raw_department.is_empty() || raw_municipality.is_empty() {
            debug!(department = raw_department, municipality = raw_municipality, "empty field, unmatched");
            return ReconciliationResult::unmatched(raw_department, raw_municipality, 0.0, Vec::new());
        }

        // 1. Aliases
        let aliased = self.aliases.apply(raw_department, raw_municipality);
        let department = aliased.department.as_str();
        let municipality = aliased.municipality.as_str();
        let department_slug = slug(department);
        let municipality_slug = slug(municipality);

        let resolve = |entry: &GazetteerEntry, tier: MatchTier, score: f64| {
            let outcome = if entry.department == raw_department && entry.municipality == raw_municipality {
                Outcome::Unchanged
            } else {
                Outcome::Changed
            };
            debug!(
                from = %format!("{} | {}", raw_department, raw_municipality),
                to = %format!("{} | {}", entry.department, entry.municipality),
                tier = tier.as_str(),
                score,
                "resolved"
            );
            ReconciliationResult {
                resolved_department: entry.department.clone(),
                resolved_municipality: entry.municipality.clone(),
                resolved_country: entry.country.clone(),
                outcome,
                tier: Some(tier),
                score,
                aliases_applied: aliased.applied.clone(),
            }
        };

        // 2. Exact
        let key = CanonicalKey::from_slugs(&department_slug, &municipality_slug);
        if let Some(entry) = self.gazetteer.get(&key) {
            return resolve(entry, MatchTier::Exact, 1.0);
        }

        if self.mode == MatchMode::ExactOnly {
            return ReconciliationResult::unmatched(department, municipality, 0.0, aliased.applied.clone());
        }

        // 3. Same department
        if let Some((entry, score)) = self.match_in_department(&department_slug, municipality, &municipality_slug) {
            return resolve(entry, MatchTier::SameDepartment, score);
        }

        // 4. Cross department
        if let Some((entry, score)) = self.match_across_departments(&department_slug, municipality, &municipality_slug) {
            return resolve(entry, MatchTier::CrossDepartment, score);
        }

        // 5. Globally unique municipality
        if let Some((entry, score)) = self.match_unique_municipality(&municipality_slug) {
            return resolve(entry, MatchTier::GlobalUnique, score);
        }

        // 6. Weighted fallback
        match self.best_weighted_match(&department_slug, &municipality_slug) {
            Some((entry, score)) if score >= self.thresholds.fallback_accept => {
                resolve(entry, MatchTier::WeightedFallback, score)
            }
            best => {
                let score = best.map(|(_, s)| s).unwrap_or(0.0);
                debug!(department, municipality, best_score = score, "no match");
                ReconciliationResult::unmatched(department, municipality, score, aliased.applied.clone())
            }
        }
    }

    /// Tier 3: municipality vs. the department's pool
    ///
    /// Raw names first (high cutoff), slugs as a fallback (lower cutoff).
    fn match_in_department(
        &self,
        department_slug: &str,
        municipality: &str,
        municipality_slug: &str,
    ) -> Option<(&'a GazetteerEntry, f64)> {
        let gazetteer: &'a Gazetteer = self.gazetteer;
        let pool = gazetteer.municipalities_in(department_slug);
        if pool.is_empty() {
            return None;
        }

        let direct = closest_match(
            municipality,
            pool.iter().map(String::as_str),
            self.thresholds.municipality_direct,
        )
        .map(|(name, score)| (slug(name), score));

        let matched = direct.or_else(|| {
            let slugs: Vec<String> = pool.iter().map(|name| slug(name)).collect();
            closest_match(
                municipality_slug,
                slugs.iter().map(String::as_str),
                self.thresholds.municipality_slug,
            )
            .map(|(s, score)| (s.to_string(), score))
        })?;

        let (matched_slug, score) = matched;
        gazetteer
            .get(&CanonicalKey::from_slugs(department_slug, &matched_slug))
            .map(|entry| (entry, score))
    }

    /// Tier 4: fuzzy department, then tier 3 inside it
    fn match_across_departments(
        &self,
        department_slug: &str,
        municipality: &str,
        municipality_slug: &str,
    ) -> Option<(&'a GazetteerEntry, f64)> {
        let gazetteer: &'a Gazetteer = self.gazetteer;
        let (matched, _) = closest_match(department_slug, gazetteer.department_slugs(), self.thresholds.department)?;

        // Same department already failed in tier 3
        if matched == department_slug {
            return None;
        }

        self.match_in_department(matched, municipality, municipality_slug)
    }

    /// Tier 5: ambiguous names (same municipality in several departments) are rejected
    fn match_unique_municipality(&self, municipality_slug: &str) -> Option<(&'a GazetteerEntry, f64)> {
        let gazetteer: &'a Gazetteer = self.gazetteer;
        let (matched, score) = closest_match(
            municipality_slug,
            gazetteer.municipality_slugs(),
            self.thresholds.global_municipality,
        )?;

        match gazetteer.entries_with_municipality(matched).as_slice() {
            [only] => Some((*only, score)),
            holders => {
                debug!(municipality = matched, holders = holders.len(), "ambiguous municipality, not guessing");
                None
            }
        }
    }

    /// Tier 6: arg-max of the weighted score; ties keep the earliest-loaded entry
    fn best_weighted_match(&self, department_slug: &str, municipality_slug: &str) -> Option<(&'a GazetteerEntry, f64)> {
        let gazetteer: &'a Gazetteer = self.gazetteer;
        let municipality_weight = self.thresholds.fallback_municipality_weight;
        let department_weight = self.thresholds.fallback_department_weight();

        let mut best: Option<(&'a GazetteerEntry, f64)> = None;
        for (key, entry) in gazetteer.iter() {
            let score = municipality_weight * similarity(municipality_slug, &key.municipality)
                + department_weight * similarity(department_slug, &key.department);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((entry, score)),
            }
        }

        best
    }
}

/// One-shot reconcile with default thresholds
pub fn reconcile(
    department: &str,
    municipality: &str,
    gazetteer: &Gazetteer,
    aliases: &AliasTable,
) -> ReconciliationResult {
    Reconciler::new(gazetteer, aliases).reconcile(department, municipality)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliases::AliasRule;

    fn sample_gazetteer() -> Gazetteer {
        let rows = [
            ("Antioquia", "Medellín"),
            ("Antioquia", "Envigado"),
            ("Antioquia", "Itagüí"),
            ("Antioquia", "Rionegro"),
            ("Bolívar", "Cartagena de Indias"),
            ("Bolívar", "Santa Rosa"),
            ("Bolívar", "Magangué"),
            ("Cauca", "Santa Rosa"),
            ("Cauca", "Popayán"),
            ("Cundinamarca", "Bogotá"),
            ("Cundinamarca", "Soacha"),
            ("Cundinamarca", "Zipaquirá"),
            ("Valle del Cauca", "Cali"),
            ("Valle del Cauca", "Palmira"),
            ("Valle del Cauca", "Buenaventura"),
            ("César", "Valledupar"),
            ("Boyacá", "Toguí"),
            ("Boyacá", "Tunja"),
            ("Risaralda", "Santa Rosa de Cabal"),
        ];
        Gazetteer::load(rows.iter().map(|(d, m)| GazetteerEntry::new(d, m, "Colombia")))
    }

    fn builtin() -> AliasTable {
        AliasTable::builtin().unwrap()
    }

    #[test]
    fn test_every_entry_reconciles_unchanged() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let reconciler = Reconciler::new(&g, &aliases);

        for entry in g.entries() {
            let result = reconciler.reconcile(&entry.department, &entry.municipality);
            assert_eq!(result.outcome, Outcome::Unchanged, "entry {:?}", entry);
            assert_eq!(result.resolved_department, entry.department);
            assert_eq!(result.resolved_municipality, entry.municipality);
            assert_eq!(result.resolved_country, entry.country);
            assert_eq!(result.tier, Some(MatchTier::Exact));
        }
    }

    #[test]
    fn test_case_and_accent_variant_is_changed() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let result = reconcile("ANTIOQUIA", "medellin", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Changed);
        assert_eq!(result.tier, Some(MatchTier::Exact));
        assert_eq!(result.resolved_department, "Antioquia");
        assert_eq!(result.resolved_municipality, "Medellín");
        assert_eq!(result.resolved_country, "Colombia");
    }

    #[test]
    fn test_surrounding_whitespace_is_unchanged() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let result = reconcile("  Antioquia ", "Envigado  ", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Unchanged);
    }

    #[test]
    fn test_transposed_letter_same_department() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let result = reconcile("Antioquia", "Envigdao", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Changed);
        assert_eq!(result.tier, Some(MatchTier::SameDepartment));
        assert_eq!(result.resolved_municipality, "Envigado");
        assert!(result.score >= 0.8);
    }

    #[test]
    fn test_slug_fallback_in_department() {
        let g = sample_gazetteer();
        let aliases = builtin();
        // Raw comparison fails on case/accents; slug comparison succeeds
        let result = reconcile("Cundinamarca", "ZIPAQIRA", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Changed);
        assert_eq!(result.tier, Some(MatchTier::SameDepartment));
        assert_eq!(result.resolved_municipality, "Zipaquirá");
    }

    #[test]
    fn test_misspelled_department_cross_match() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let result = reconcile("Antioqia", "Envigado", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Changed);
        assert_eq!(result.tier, Some(MatchTier::CrossDepartment));
        assert_eq!(result.resolved_department, "Antioquia");
        assert_eq!(result.resolved_municipality, "Envigado");
    }

    #[test]
    fn test_globally_unique_municipality() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let result = reconcile("Departamento Desconocido", "Zipaquira", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Changed);
        assert_eq!(result.tier, Some(MatchTier::GlobalUnique));
        assert_eq!(result.resolved_department, "Cundinamarca");
        assert_eq!(result.resolved_municipality, "Zipaquirá");
    }

    #[test]
    fn test_ambiguous_municipality_not_guessed() {
        let g = sample_gazetteer();
        let aliases = builtin();
        // "Santa Rosa" lives in Bolívar and Cauca; with a strict fallback nothing is accepted
        let strict = MatchThresholds {
            fallback_accept: 0.95,
            ..MatchThresholds::default()
        };
        let reconciler = Reconciler::new(&g, &aliases).with_thresholds(strict);
        let result = reconciler.reconcile("Xyz", "Santa Rosa");
        assert_eq!(result.outcome, Outcome::Unmatched);
        assert_ne!(result.tier, Some(MatchTier::GlobalUnique));
    }

    #[test]
    fn test_weighted_fallback() {
        let g = sample_gazetteer();
        let aliases = AliasTable::new();
        // Department too far for tier 4, municipality too far for tier 5 (< 0.85)
        let result = reconcile("Valle", "Buenavntra", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Changed);
        assert_eq!(result.tier, Some(MatchTier::WeightedFallback));
        assert_eq!(result.resolved_department, "Valle del Cauca");
        assert_eq!(result.resolved_municipality, "Buenaventura");
        assert!(result.score >= 0.62);
    }

    #[test]
    fn test_padded_canonical_input_is_unchanged() {
        let g = sample_gazetteer();
        let aliases = AliasTable::new();
        let result = reconcile("  Antioquia ", " Medellín  ", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Unchanged);
        assert_eq!(result.resolved_department, "Antioquia");
        assert_eq!(result.resolved_municipality, "Medellín");
    }

    #[test]
    fn test_weighted_fallback_accept_is_inclusive() {
        let g = sample_gazetteer();
        let aliases = AliasTable::new();
        let with_accept = |accept: f64| {
            let thresholds = MatchThresholds {
                fallback_accept: accept,
                ..MatchThresholds::default()
            };
            Reconciler::new(&g, &aliases)
                .with_thresholds(thresholds)
                .reconcile("Valle", "Buenavntra")
        };

        let score = with_accept(0.0).score;

        let at_cutoff = with_accept(score);
        assert_eq!(at_cutoff.tier, Some(MatchTier::WeightedFallback));
        assert_eq!(at_cutoff.outcome, Outcome::Changed);
        assert_eq!(at_cutoff.resolved_municipality, "Buenaventura");

        let above_cutoff = with_accept(score + 1e-9);
        assert_eq!(above_cutoff.outcome, Outcome::Unmatched);
        assert_eq!(above_cutoff.tier, None);
        assert_eq!(above_cutoff.score, score);
    }

    #[test]
    fn test_no_plausible_candidate_is_unmatched() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let result = reconcile("Nunca", "Tierra Lejana", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Unmatched);
        assert_eq!(result.tier, None);
        assert_eq!(result.resolved_country, "");
        assert_eq!(result.resolved_department, "Nunca");
        assert_eq!(result.resolved_municipality, "Tierra Lejana");
        assert!(result.score < 0.62);
    }

    #[test]
    fn test_unmatched_keeps_alias_normalized_values() {
        let g = sample_gazetteer();
        let aliases = AliasTable::from_rules(vec![
            AliasRule::new("cesar", &["Cesar"], &[]).with_target_department("César"),
        ]);
        let result = reconcile("Cesar", "Pueblo Inexistente Lejano", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Unmatched);
        assert_eq!(result.resolved_department, "César");
        assert_eq!(result.resolved_municipality, "Pueblo Inexistente Lejano");
        assert_eq!(result.aliases_applied, vec!["cesar".to_string()]);
    }

    #[test]
    fn test_empty_fields_short_circuit() {
        let g = sample_gazetteer();
        let aliases = builtin();
        for (d, m) in [("", "Medellín"), ("Antioquia", ""), ("  ", "  ")] {
            let result = reconcile(d, m, &g, &aliases);
            assert_eq!(result.outcome, Outcome::Unmatched);
            assert_eq!(result.score, 0.0);
        }
    }

    #[test]
    fn test_alias_example_cartagena() {
        let g = Gazetteer::load(vec![GazetteerEntry::new("Bolívar", "Cartagena de Indias", "Colombia")]);
        let aliases = AliasTable::from_rules(vec![
            AliasRule::new("cartagena", &["Bolívar"], &["Cartagena"]).with_target_municipality("Cartagena de Indias"),
        ]);
        let result = reconcile("Bolivar", "Cartagena", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Changed);
        assert_eq!(result.resolved_department, "Bolívar");
        assert_eq!(result.resolved_municipality, "Cartagena de Indias");
        assert_eq!(result.resolved_country, "Colombia");
        assert_eq!(result.aliases_applied, vec!["cartagena".to_string()]);
    }

    #[test]
    fn test_alias_moves_department() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let result = reconcile("Distrito Capital", "Bogotá D.C.", &g, &aliases);
        assert_eq!(result.outcome, Outcome::Changed);
        assert_eq!(result.tier, Some(MatchTier::Exact));
        assert_eq!(result.resolved_department, "Cundinamarca");
        assert_eq!(result.resolved_municipality, "Bogotá");
    }

    #[test]
    fn test_exact_only_mode_skips_fuzzy_tiers() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let reconciler = Reconciler::new(&g, &aliases).with_mode(MatchMode::ExactOnly);
        assert_eq!(reconciler.reconcile("antioquia", "MEDELLIN").outcome, Outcome::Changed);
        assert_eq!(reconciler.reconcile("Antioquia", "Envigdao").outcome, Outcome::Unmatched);
    }

    #[test]
    fn test_resolved_pairs_are_fixed_points() {
        let g = sample_gazetteer();
        let aliases = builtin();
        let reconciler = Reconciler::new(&g, &aliases);
        let inputs = [
            ("ANTIOQUIA", "medellin"),
            ("Antioquia", "Envigdao"),
            ("Antioqia", "Envigado"),
            ("Departamento Desconocido", "Zipaquira"),
            ("Bolivar", "Cartagena"),
            ("Distrito Capital", "Bogotá D.C."),
            ("Valle del Cauva", "Santiago de Cali"),
        ];

        for (d, m) in inputs {
            let first = reconciler.reconcile(d, m);
            assert!(first.is_resolved(), "{} | {} should resolve", d, m);
            let second = reconciler.reconcile(&first.resolved_department, &first.resolved_municipality);
            assert_eq!(second.outcome, Outcome::Unchanged, "{} | {} not idempotent", d, m);
        }
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::from_label("sin cambio"), Some(Outcome::Unchanged));
        assert_eq!(Outcome::from_label(" CAMBIO "), Some(Outcome::Changed));
        assert_eq!(Outcome::from_label("unmatched"), Some(Outcome::Unmatched));
        assert_eq!(Outcome::from_label("maybe"), None);
        assert_eq!(Outcome::Changed.to_string(), "Changed");
    }
}
