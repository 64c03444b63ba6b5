// ✍️ Manual Corrections - Hand-fixed rows folded back into the table
//
// Reviewers fix unmatched rows in a separate sheet. Rows are identified by a
// tuple of passthrough columns (asset name, label, ...), never by line
// number, since the sheet is usually re-sorted. After the fixes land, the
// whole table is compared again in exact-only mode.

use crate::batch::ReconciliationCounts;
use crate::config::MatchMode;
use crate::engine::Reconciler;
use crate::error::{ReconcileError, Result};
use crate::table::{ColumnLayout, TableReader, TableRow, TableWriter};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Passthrough columns of the asset register, in key order
pub const DEFAULT_KEY_COLUMNS: &[&str] = &[
    "name",
    "label",
    "filial",
    "regional_distrito",
    "tipo_activo",
    "condicion_activo",
    "propiedad",
    "activos_proyectos_sigeb",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    /// Line in the corrections table
    pub line: usize,
    pub department: String,
    pub municipality: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrectionSummary {
    /// Table rows overwritten with a correction
    pub corrections_applied: usize,
    pub counts: ReconciliationCounts,
}

impl CorrectionSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} corrections applied | {}",
            self.corrections_applied,
            self.counts.summary()
        )
    }
}

fn key_indices(table: &str, layout: &ColumnLayout, key_columns: &[String]) -> Result<Vec<usize>> {
    key_columns
        .iter()
        .map(|name| {
            layout.column(name).ok_or_else(|| ReconcileError::MissingKeyColumn {
                table: table.to_string(),
                column: name.clone(),
            })
        })
        .collect()
}

fn row_key(row: &TableRow, indices: &[usize]) -> Vec<String> {
    indices.iter().map(|&idx| row.get(idx).trim().to_string()).collect()
}

#[derive(Debug, Clone, Default)]
pub struct ManualCorrections {
    key_columns: Vec<String>,
    corrections: HashMap<Vec<String>, Correction>,
}

impl ManualCorrections {
    /// Load a corrections table; a repeated key keeps the last row
    pub fn from_reader<R: Read>(mut reader: TableReader<R>, key_columns: &[&str]) -> Result<Self> {
        let key_columns: Vec<String> = key_columns.iter().map(|c| c.to_string()).collect();
        let layout = reader.layout().clone();
        let indices = key_indices(reader.name(), &layout, &key_columns)?;

        let mut corrections = HashMap::new();
        while let Some(row) = reader.read_row()? {
            let correction = Correction {
                line: row.line,
                department: row.get(layout.department).trim().to_string(),
                municipality: row.get(layout.municipality).trim().to_string(),
            };
            corrections.insert(row_key(&row, &indices), correction);
        }

        info!(table = reader.name(), corrections = corrections.len(), "manual corrections loaded");
        Ok(ManualCorrections {
            key_columns,
            corrections,
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P, key_columns: &[&str]) -> Result<Self> {
        Self::from_reader(TableReader::open(path)?, key_columns)
    }

    pub fn len(&self) -> usize {
        self.corrections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn lookup(&self, key: &[String]) -> Option<&Correction> {
        self.corrections.get(key)
    }

    /// Overwrite corrected rows, then re-run an exact-only comparison over every row
    ///
    /// `writer` should be annotated so country and outcome get written.
    pub fn apply_and_recompare<R: Read, W: Write>(
        &self,
        reconciler: &Reconciler<'_>,
        reader: &mut TableReader<R>,
        writer: &mut TableWriter<W>,
    ) -> Result<CorrectionSummary> {
        let exact = reconciler.clone().with_mode(MatchMode::ExactOnly);
        let layout = reader.layout().clone();
        let indices = key_indices(reader.name(), &layout, &self.key_columns)?;
        let mut summary = CorrectionSummary::default();

        while let Some(mut row) = reader.read_row()? {
            if let Some(correction) = self.lookup(&row_key(&row, &indices)) {
                debug!(
                    line = row.line,
                    correction_line = correction.line,
                    department = %correction.department,
                    municipality = %correction.municipality,
                    "manual correction"
                );
                row.set(layout.department, &correction.department);
                row.set(layout.municipality, &correction.municipality);
                summary.corrections_applied += 1;
            }

            let candidate = row.candidate(&layout);
            let result = exact.reconcile(&candidate.department, &candidate.municipality);
            writer.write_reconciled(&row, &result)?;
            summary.counts.record(result.outcome);
        }
        writer.flush()?;

        info!(
            table = reader.name(),
            corrections = summary.corrections_applied,
            total = summary.counts.total,
            unmatched = summary.counts.unmatched,
            "manual corrections applied"
        );
        Ok(summary)
    }
}

// ============================================================================
// TESTS
// ============================================================================
