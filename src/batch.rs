// 📦 Batch Driver - Run the engine over a whole table
// One engine call per candidate, input order preserved, counts always add up.

use crate::engine::{Outcome, Reconciler, ReconciliationResult};
use crate::error::Result;
use crate::staging::ProposedChange;
use crate::table::{TableReader, TableWriter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};
use tracing::info;

// ============================================================================
// CANDIDATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Source line number, for reporting only
    pub row_id: usize,
    pub department: String,
    pub municipality: String,
}

impl CandidateRecord {
    pub fn new(row_id: usize, department: &str, municipality: &str) -> Self {
        CandidateRecord {
            row_id,
            department: department.to_string(),
            municipality: municipality.to_string(),
        }
    }
}

// ============================================================================
// COUNTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationCounts {
    pub total: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub unmatched: usize,
}

impl ReconciliationCounts {
    pub fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Changed => self.changed += 1,
            Outcome::Unmatched => self.unmatched += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.unchanged + self.changed + self.unmatched
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows: {} unchanged, {} changed, {} unmatched",
            self.total, self.unchanged, self.changed, self.unmatched
        )
    }
}

// ============================================================================
// BATCH REPORT (in-memory)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledRow {
    pub candidate: CandidateRecord,
    pub result: ReconciliationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub rows: Vec<ReconciledRow>,
    pub counts: ReconciliationCounts,
    pub reconciled_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn results(&self) -> impl Iterator<Item = &ReconciliationResult> {
        self.rows.iter().map(|r| &r.result)
    }

    /// Unmatched candidates with their raw values
    pub fn unmatched(&self) -> Vec<&CandidateRecord> {
        self.rows
            .iter()
            .filter(|r| r.result.outcome == Outcome::Unmatched)
            .map(|r| &r.candidate)
            .collect()
    }

    /// Before/after records for every Changed row, in input order
    pub fn proposed_changes(&self) -> Vec<ProposedChange> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(idx, r)| ProposedChange::from_result(idx, &r.candidate, &r.result))
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "Batch reconciled at {}: {}",
            self.reconciled_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.counts.summary()
        )
    }
}

/// Reconcile candidates in input order
pub fn reconcile_batch<I>(reconciler: &Reconciler<'_>, candidates: I) -> BatchReport
where
    I: IntoIterator<Item = CandidateRecord>,
{
    let mut counts = ReconciliationCounts::default();
    let mut rows = Vec::new();

    for candidate in candidates {
        let result = reconciler.reconcile(&candidate.department, &candidate.municipality);
        counts.record(result.outcome);
        rows.push(ReconciledRow { candidate, result });
    }

    info!(
        total = counts.total,
        unchanged = counts.unchanged,
        changed = counts.changed,
        unmatched = counts.unmatched,
        "batch reconciled"
    );

    BatchReport {
        rows,
        counts,
        reconciled_at: Utc::now(),
    }
}

// ============================================================================
// STREAMING TABLE RUN
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TableRunSummary {
    pub counts: ReconciliationCounts,
    pub unmatched: Vec<CandidateRecord>,
    pub changes: Vec<ProposedChange>,
}

impl TableRunSummary {
    pub fn summary(&self) -> String {
        self.counts.summary()
    }
}

/// Reconcile every row of `reader` and write it to `writer` as soon as it is resolved
///
/// Only the unmatched rows and the proposed changes are kept in memory.
pub fn reconcile_table<R: Read, W: Write>(
    reconciler: &Reconciler<'_>,
    reader: &mut TableReader<R>,
    writer: &mut TableWriter<W>,
) -> Result<TableRunSummary> {
    let mut run = TableRunSummary::default();
    let layout = reader.layout().clone();

    while let Some(row) = reader.read_row()? {
        let candidate = row.candidate(&layout);
        let result = reconciler.reconcile(&candidate.department, &candidate.municipality);
        writer.write_reconciled(&row, &result)?;
        run.counts.record(result.outcome);

        match result.outcome {
            Outcome::Unmatched => run.unmatched.push(candidate),
            Outcome::Changed => run
                .changes
                .extend(ProposedChange::from_result(row.index, &candidate, &result)),
            Outcome::Unchanged => {}
        }
    }
    writer.flush()?;

    info!(
        table = reader.name(),
        total = run.counts.total,
        changed = run.counts.changed,
        unmatched = run.counts.unmatched,
        "table reconciled"
    );

    Ok(run)
}

// ============================================================================
// UNMATCHED REPORT
// ============================================================================

/// Text listing of unmatched rows, skipping the line numbers in `ignore_lines`
pub fn missing_report(unmatched: &[CandidateRecord], ignore_lines: &[usize]) -> String {
    let ignored: HashSet<usize> = ignore_lines.iter().copied().collect();
    let listed: Vec<&CandidateRecord> = unmatched.iter().filter(|c| !ignored.contains(&c.row_id)).collect();

    let mut out = format!("Unmatched: {}\n", listed.len());
    for c in listed {
        out.push_str(&format!("  ln {}: {} | {}\n", c.row_id, c.department, c.municipality));
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliases::AliasTable;
    use crate::config::OutputLabels;
    use crate::gazetteer::{Gazetteer, GazetteerEntry};
    use crate::table::Peeked;

    fn gazetteer() -> Gazetteer {
        Gazetteer::load(vec![
            GazetteerEntry::new("Antioquia", "Medellín", "Colombia"),
            GazetteerEntry::new("Antioquia", "Envigado", "Colombia"),
            GazetteerEntry::new("Bolívar", "Cartagena de Indias", "Colombia"),
            GazetteerEntry::new("Guatemala", "Mixco", "Guatemala"),
        ])
    }

    fn candidates() -> Vec<CandidateRecord> {
        vec![
            CandidateRecord::new(2, "Antioquia", "Medellín"),
            CandidateRecord::new(3, "antioquia", "ENVIGADO"),
            CandidateRecord::new(4, "Bolivar", "Cartagena"),
            CandidateRecord::new(5, "Nunca", "Tierra Lejana"),
            CandidateRecord::new(6, "", "Mixco"),
        ]
    }

    #[test]
    fn test_batch_counts_add_up() {
        let g = gazetteer();
        let aliases = AliasTable::builtin().unwrap();
        let reconciler = Reconciler::new(&g, &aliases);

        let report = reconcile_batch(&reconciler, candidates());
        assert_eq!(report.counts.total, 5);
        assert_eq!(report.counts.unchanged, 1);
        assert_eq!(report.counts.changed, 2);
        assert_eq!(report.counts.unmatched, 2);
        assert!(report.counts.is_consistent());
        assert_eq!(report.results().count(), 5);
    }

    #[test]
    fn test_batch_preserves_input_order() {
        let g = gazetteer();
        let aliases = AliasTable::builtin().unwrap();
        let report = reconcile_batch(&Reconciler::new(&g, &aliases), candidates());
        let ids: Vec<usize> = report.rows.iter().map(|r| r.candidate.row_id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_unmatched_and_proposed_changes() {
        let g = gazetteer();
        let aliases = AliasTable::builtin().unwrap();
        let report = reconcile_batch(&Reconciler::new(&g, &aliases), candidates());

        let unmatched: Vec<usize> = report.unmatched().iter().map(|c| c.row_id).collect();
        assert_eq!(unmatched, vec![5, 6]);

        let changes = report.proposed_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].row_id, 4);
        assert_eq!(changes[1].row_index, 2);
        assert_eq!(changes[1].before_municipality, "Cartagena");
        assert_eq!(changes[1].after_municipality, "Cartagena de Indias");
        assert!(report.summary().contains("5 rows"));
    }

    #[test]
    fn test_empty_batch() {
        let g = gazetteer();
        let aliases = AliasTable::new();
        let report = reconcile_batch(&Reconciler::new(&g, &aliases), Vec::new());
        assert_eq!(report.counts, ReconciliationCounts::default());
        assert!(report.counts.is_consistent());
    }

    #[test]
    fn test_table_run_writes_every_row() {
        let g = gazetteer();
        let aliases = AliasTable::builtin().unwrap();
        let reconciler = Reconciler::new(&g, &aliases);

        let input = "id;departamento;municipio\n1;Antioquia;Medellín\n2;Bolivar;Cartagena\n3;Nunca;Tierra Lejana\n";
        let mut reader: TableReader<Peeked<&[u8]>> = TableReader::from_reader("in.csv", input.as_bytes()).unwrap();
        let mut writer =
            TableWriter::annotated(Vec::new(), reader.delimiter(), reader.layout(), &OutputLabels::spanish()).unwrap();

        let run = reconcile_table(&reconciler, &mut reader, &mut writer).unwrap();
        assert_eq!(run.counts.total, 3);
        assert_eq!(run.unmatched.len(), 1);
        assert_eq!(run.unmatched[0].row_id, 4);
        assert_eq!(run.changes.len(), 1);

        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "id;departamento;municipio;País;comparacion");
        assert_eq!(lines[1], "1;Antioquia;Medellín;Colombia;sin cambio");
        assert_eq!(lines[2], "2;Bolívar;Cartagena de Indias;Colombia;cambio");
        assert_eq!(lines[3], "3;Nunca;Tierra Lejana;;no coincidencia");
    }

    #[test]
    fn test_missing_report_skips_ignored_lines() {
        let unmatched = vec![
            CandidateRecord::new(5, "Nunca", "Tierra Lejana"),
            CandidateRecord::new(9, "Xyz", "Abc"),
        ];
        let text = missing_report(&unmatched, &[9]);
        assert_eq!(text, "Unmatched: 1\n  ln 5: Nunca | Tierra Lejana\n");
        assert_eq!(missing_report(&[], &[]), "Unmatched: 0\n");
    }
}
