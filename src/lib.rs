// Risk Gazetteer - Core Library
// Resolves free-text department/municipality pairs against a canonical gazetteer.
// Exposes all modules for use in the CLI and tests.

pub mod error;
pub mod slug;
pub mod similarity;
pub mod config;
pub mod table;       // CSV boundary: delimiter detection, header synonyms, annotated output
pub mod gazetteer;   // Canonical reference table + lookup indices
pub mod aliases;     // Hand-curated overrides, loaded from JSON
pub mod engine;      // Tiered reconciliation pipeline
pub mod batch;       // Batch driver, counts, unmatched report
pub mod staging;     // Review plans applied one window at a time
pub mod corrections; // Manual corrections + exact re-comparison

// Re-export commonly used types
pub use error::{ReconcileError, Result};
pub use slug::{compact, slug};
pub use similarity::{closest_match, similarity};
pub use config::{MatchMode, MatchThresholds, OutputLabels, ReconcileConfig};
pub use table::{ColumnLayout, TableReader, TableRow, TableWriter};
pub use gazetteer::{CanonicalKey, Gazetteer, GazetteerEntry};
pub use aliases::{AliasApplication, AliasRule, AliasTable};
pub use engine::{reconcile, MatchTier, Outcome, Reconciler, ReconciliationResult};
pub use batch::{
    missing_report, reconcile_batch, reconcile_table,
    BatchReport, CandidateRecord, ReconciledRow, ReconciliationCounts, TableRunSummary,
};
pub use staging::{fingerprint, ApplySummary, ProposedChange, ReviewPlan};
pub use corrections::{Correction, CorrectionSummary, ManualCorrections, DEFAULT_KEY_COLUMNS};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
