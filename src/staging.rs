// 🗂️ Staged Application - Review plans applied one window at a time
//
// A plan is the list of proposed before/after changes for a table. Reviewers
// page through it and apply [offset, offset+batch) to the baseline table; the
// rest stay as proposals. Plans carry a fingerprint of the reference data so
// a plan built against an older gazetteer is refused.

use crate::batch::{BatchReport, CandidateRecord};
use crate::engine::{MatchTier, Outcome, Reconciler, ReconciliationResult};
use crate::error::{ReconcileError, Result};
use crate::table::{TableReader, TableWriter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// PROPOSED CHANGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    /// Source line number, for display
    pub row_id: usize,

    /// Position among data rows; the key used when applying
    pub row_index: usize,

    pub before_department: String,
    pub before_municipality: String,
    pub after_department: String,
    pub after_municipality: String,
    pub country: String,
    pub tier: Option<MatchTier>,
    pub score: f64,
}

impl ProposedChange {
    /// Only Changed results become proposals
    pub fn from_result(row_index: usize, candidate: &CandidateRecord, result: &ReconciliationResult) -> Option<Self> {
        if result.outcome != Outcome::Changed {
            return None;
        }

        Some(ProposedChange {
            row_id: candidate.row_id,
            row_index,
            before_department: candidate.department.clone(),
            before_municipality: candidate.municipality.clone(),
            after_department: result.resolved_department.clone(),
            after_municipality: result.resolved_municipality.clone(),
            country: result.resolved_country.clone(),
            tier: result.tier,
            score: result.score,
        })
    }

    pub fn describe(&self) -> String {
        let tier = self.tier.map(|t| t.as_str()).unwrap_or("-");
        format!(
            "ln {}: {} | {} -> {} | {} ({}, {:.2})",
            self.row_id,
            self.before_department,
            self.before_municipality,
            self.after_department,
            self.after_municipality,
            tier,
            self.score
        )
    }
}

// ============================================================================
// REFERENCE FINGERPRINT
// ============================================================================

/// SHA-256 over gazetteer, alias rules, cutoffs and mode
pub fn fingerprint(reconciler: &Reconciler<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(reconciler.gazetteer().fingerprint());
    hasher.update(b"\n");
    hasher.update(reconciler.aliases().fingerprint());
    hasher.update(b"\n");
    hasher.update(format!("{:?}\n{:?}", reconciler.thresholds, reconciler.mode));
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// REVIEW PLAN
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPlan {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,

    /// Table the plan was built from
    pub source: String,

    pub fingerprint: String,
    pub changes: Vec<ProposedChange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub applied: usize,

    /// Row already holds the proposed values
    pub already_applied: usize,

    /// Row holds neither the before nor the after values; skipped
    pub stale: usize,

    /// Window changes whose row is not in the table at all
    pub missing: usize,

    /// Start of the next window (None once the plan is exhausted)
    pub next_offset: Option<usize>,
}

impl ApplySummary {
    pub fn summary(&self) -> String {
        let next = match self.next_offset {
            Some(offset) => format!("next offset {}", offset),
            None => "plan complete".to_string(),
        };
        format!(
            "{} applied, {} already applied, {} stale, {} missing | {}",
            self.applied, self.already_applied, self.stale, self.missing, next
        )
    }
}

impl ReviewPlan {
    pub fn new(source: &str, fingerprint: String, changes: Vec<ProposedChange>) -> Self {
        ReviewPlan {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            source: source.to_string(),
            fingerprint,
            changes,
        }
    }

    /// Stream a table through the engine and keep only the proposed changes
    pub fn build<R: Read>(reconciler: &Reconciler<'_>, reader: &mut TableReader<R>) -> Result<Self> {
        let layout = reader.layout().clone();
        let mut changes = Vec::new();

        while let Some(row) = reader.read_row()? {
            let candidate = row.candidate(&layout);
            let result = reconciler.reconcile(&candidate.department, &candidate.municipality);
            changes.extend(ProposedChange::from_result(row.index, &candidate, &result));
        }

        let plan = ReviewPlan::new(reader.name(), fingerprint(reconciler), changes);
        info!(plan = %plan.id, source = %plan.source, changes = plan.len(), "review plan built");
        Ok(plan)
    }

    pub fn from_report(source: &str, reconciler: &Reconciler<'_>, report: &BatchReport) -> Self {
        ReviewPlan::new(source, fingerprint(reconciler), report.proposed_changes())
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Exclusive end of the window, clamped to the plan
    pub fn window_end(&self, offset: usize, batch: usize) -> usize {
        offset.saturating_add(batch).min(self.len())
    }

    pub fn page(&self, offset: usize, batch: usize) -> &[ProposedChange] {
        let start = offset.min(self.len());
        &self.changes[start..self.window_end(offset, batch)]
    }

    /// Refuse a plan built against different reference data
    pub fn verify(&self, reconciler: &Reconciler<'_>) -> Result<()> {
        let actual = fingerprint(reconciler);
        if actual != self.fingerprint {
            return Err(ReconcileError::StalePlan {
                expected: self.fingerprint.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Copy the table to `writer`, applying only the changes in [offset, offset+batch)
    ///
    /// Rows are matched by data-row position, so blank lines dropped by an
    /// earlier rewrite do not shift later windows. A change applies only while
    /// its row still holds the `before` values.
    pub fn apply_window<R: Read, W: Write>(
        &self,
        offset: usize,
        batch: usize,
        reader: &mut TableReader<R>,
        writer: &mut TableWriter<W>,
    ) -> Result<ApplySummary> {
        let mut window: HashMap<usize, &ProposedChange> =
            self.page(offset, batch).iter().map(|c| (c.row_index, c)).collect();
        let layout = reader.layout().clone();
        let country_column = writer.layout().country;
        let mut summary = ApplySummary::default();

        while let Some(mut row) = reader.read_row()? {
            if let Some(change) = window.remove(&row.index) {
                let department = row.get(layout.department).trim().to_string();
                let municipality = row.get(layout.municipality).trim().to_string();

                if department == change.before_department && municipality == change.before_municipality {
                    row.set(layout.department, &change.after_department);
                    row.set(layout.municipality, &change.after_municipality);
                    if let Some(idx) = country_column {
                        row.set(idx, &change.country);
                    }
                    summary.applied += 1;
                } else if department == change.after_department && municipality == change.after_municipality {
                    summary.already_applied += 1;
                } else {
                    warn!(
                        line = row.line,
                        expected = %format!("{} | {}", change.before_department, change.before_municipality),
                        found = %format!("{} | {}", department, municipality),
                        "row no longer matches proposed change, skipping"
                    );
                    summary.stale += 1;
                }
            }
            writer.write_row(&row)?;
        }
        writer.flush()?;

        let mut unseen: Vec<&ProposedChange> = window.into_values().collect();
        unseen.sort_by_key(|c| c.row_index);
        for change in unseen {
            warn!(
                line = change.row_id,
                row = change.row_index,
                change = %change.describe(),
                "row of proposed change not found in table"
            );
            summary.missing += 1;
        }

        let end = self.window_end(offset, batch);
        summary.next_offset = if end < self.len() { Some(end) } else { None };

        info!(
            plan = %self.id,
            offset,
            applied = summary.applied,
            already_applied = summary.already_applied,
            stale = summary.stale,
            missing = summary.missing,
            "plan window applied"
        );
        Ok(summary)
    }
}

// ============================================================================
// TESTS
// ============================================================================
