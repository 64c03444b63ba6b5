// ⚠️ Error Types - Structural failures only
// Per-row problems never land here: a bad candidate row is classified Unmatched.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Table header lacks the department/municipality columns (fatal, before any matching)
    #[error("{table}: missing required column(s) {missing} (found: {found})")]
    MissingColumns {
        table: String,
        missing: String,
        found: String,
    },

    /// Corrections table lacks one of the key columns used to identify rows
    #[error("{table}: key column '{column}' not found")]
    MissingKeyColumn { table: String, column: String },

    /// A cutoff or weight outside [0, 1]
    #[error("threshold '{name}' must be within [0, 1], got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    /// Review plan was built against a different gazetteer or alias table
    #[error("review plan is stale: built for fingerprint {expected}, current is {actual}")]
    StalePlan { expected: String, actual: String },

    /// Table has no header line at all
    #[error("{0}: empty table, no header found")]
    EmptyTable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
