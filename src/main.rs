//! Risk Gazetteer CLI
//!
//! Normalizes the department/municipality columns of a risk table against the
//! canonical gazetteer, with a reviewable plan for staged application.
//!
//! Usage:
//!   risk-gazetteer compare activos.csv -o activos_comparado.csv
//!   risk-gazetteer plan activos_comparado.csv --batch 50
//!   risk-gazetteer apply activos_comparado.plan.json --offset 0 --batch 50
//!   risk-gazetteer missing activos_comparado.csv --ignore-lines 12,40
//!   risk-gazetteer manual activos_comparado.csv --corrections activos_no_coincidencia.csv

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use risk_gazetteer::{
    missing_report, reconcile_table, AliasTable, CandidateRecord, Gazetteer, ManualCorrections, MatchMode,
    Outcome, OutputLabels, ReconcileConfig, Reconciler, ReviewPlan, TableReader, TableWriter,
    DEFAULT_KEY_COLUMNS,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "risk-gazetteer",
    version,
    about = "Reconcile department/municipality names against the canonical gazetteer"
)]
struct Cli {
    #[command(flatten)]
    reference: ReferenceArgs,

    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ReferenceArgs {
    /// Canonical gazetteer table (department, municipality, country)
    #[arg(short, long, global = true, default_value = "data/riesgos.csv")]
    gazetteer: PathBuf,

    /// Secondary gazetteer tagged with a country, as PATH=COUNTRY (repeatable)
    #[arg(long = "extra-gazetteer", global = true, value_name = "PATH=COUNTRY")]
    extra_gazetteers: Vec<String>,

    /// JSON config: thresholds, mode, alias rules, labels
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output labels (defaults to the config's labels)
    #[arg(long, global = true, value_enum)]
    labels: Option<LabelSet>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LabelSet {
    En,
    Es,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exact-only comparison: annotate every row with country and outcome
    Compare {
        input: PathBuf,

        /// Output table (defaults to rewriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Full fuzzy pipeline: annotate and normalize every row
    Normalize {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the unmatched rows after the run
        #[arg(long)]
        list_unmatched: bool,
    },

    /// Build a review plan of proposed changes and print one page
    Plan {
        input: PathBuf,

        /// Plan file (defaults to <input>.plan.json)
        #[arg(short, long)]
        plan: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 50)]
        batch: usize,
    },

    /// Apply [offset, offset+batch) of a saved plan to the baseline table
    Apply {
        plan: PathBuf,

        /// Table to modify (defaults to the plan's source)
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Output table (defaults to rewriting the baseline)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 50)]
        batch: usize,
    },

    /// List unmatched rows
    Missing {
        input: PathBuf,

        /// Line numbers to leave out of the report
        #[arg(long, value_delimiter = ',')]
        ignore_lines: Vec<usize>,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply a manual corrections table, then re-run the exact comparison
    Manual {
        input: PathBuf,

        /// Corrections table with the key columns plus department/municipality
        #[arg(long)]
        corrections: PathBuf,

        /// Columns identifying a row in both tables
        #[arg(long, value_delimiter = ',')]
        key_columns: Vec<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ============================================================================
// REFERENCE DATA
// ============================================================================

struct Reference {
    gazetteer: Gazetteer,
    aliases: AliasTable,
    config: ReconcileConfig,
    labels: OutputLabels,
}

impl Reference {
    fn load(args: &ReferenceArgs) -> Result<Self> {
        let config = match &args.config {
            Some(path) => ReconcileConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ReconcileConfig::default(),
        };
        let aliases = config.alias_table().context("Failed to load alias table")?;

        let mut gazetteer = Gazetteer::from_path(&args.gazetteer)
            .with_context(|| format!("Failed to load gazetteer {}", args.gazetteer.display()))?;
        for arg in &args.extra_gazetteers {
            let (path, country) = arg
                .rsplit_once('=')
                .ok_or_else(|| anyhow!("--extra-gazetteer expects PATH=COUNTRY, got '{}'", arg))?;
            let extra = Gazetteer::from_path_with_default_country(path, country)
                .with_context(|| format!("Failed to load gazetteer {}", path))?;
            gazetteer = gazetteer.merge(extra);
        }

        let labels = match args.labels {
            Some(LabelSet::En) => OutputLabels::english(),
            Some(LabelSet::Es) => OutputLabels::spanish(),
            None => config.labels.clone(),
        };

        Ok(Reference {
            gazetteer,
            aliases,
            config,
            labels,
        })
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::from_config(&self.gazetteer, &self.aliases, &self.config)
    }
}

// ============================================================================
// FILE HELPERS
// ============================================================================

/// Sibling path written first, then renamed over the target
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.csv".to_string());
    target.with_file_name(format!("{}.tmp", name))
}

/// Write through `write` into the staging file, then move it over `target`
///
/// On any failure the staging file is removed and `target` is left untouched.
fn write_staged<T>(target: &Path, write: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    let staged = staging_path(target);
    let outcome = write(&staged).and_then(|value| {
        fs::rename(&staged, target)
            .with_context(|| format!("Failed to move {} to {}", staged.display(), target.display()))?;
        Ok(value)
    });

    if outcome.is_err() && staged.exists() {
        if let Err(err) = fs::remove_file(&staged) {
            warn!(path = %staged.display(), error = %err, "could not remove staging file");
        }
    }
    outcome
}

fn open_table(path: &Path) -> Result<TableReader<risk_gazetteer::table::Peeked<std::io::BufReader<fs::File>>>> {
    TableReader::open(path).with_context(|| format!("Failed to read table {}", path.display()))
}

fn default_plan_path(input: &Path) -> PathBuf {
    input.with_extension("plan.json")
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_reconcile(reference: &Reference, input: &Path, output: Option<&Path>, mode: MatchMode, list_unmatched: bool) -> Result<()> {
    let target = output.unwrap_or(input);
    let reconciler = reference.reconciler().with_mode(mode);

    let mut reader = open_table(input)?;
    let run = write_staged(target, |staged| {
        let mut writer = TableWriter::create_annotated(staged, reader.delimiter(), reader.layout(), &reference.labels)
            .with_context(|| format!("Failed to create {}", staged.display()))?;
        reconcile_table(&reconciler, &mut reader, &mut writer)
            .with_context(|| format!("Failed to reconcile {}", input.display()))
    })?;

    println!("📊 {}", run.summary());
    println!("   {} -> {}", input.display(), target.display());
    if list_unmatched && !run.unmatched.is_empty() {
        print!("{}", missing_report(&run.unmatched, &[]));
    }
    Ok(())
}

fn run_plan(reference: &Reference, input: &Path, plan_path: Option<&Path>, offset: usize, batch: usize) -> Result<()> {
    let reconciler = reference.reconciler();
    let mut reader = open_table(input)?;
    let plan = ReviewPlan::build(&reconciler, &mut reader)
        .with_context(|| format!("Failed to build plan for {}", input.display()))?;

    let plan_path = plan_path.map(Path::to_path_buf).unwrap_or_else(|| default_plan_path(input));
    plan.save(&plan_path)
        .with_context(|| format!("Failed to save plan {}", plan_path.display()))?;

    println!("📝 Plan {} with {} proposed changes -> {}", plan.id, plan.len(), plan_path.display());
    let end = plan.window_end(offset, batch);
    println!("   Showing [{}, {})", offset.min(plan.len()), end);
    for change in plan.page(offset, batch) {
        println!("   {}", change.describe());
    }
    if end < plan.len() {
        println!("   Next: --offset {}", end);
    }
    Ok(())
}

fn run_apply(
    reference: &Reference,
    plan_path: &Path,
    baseline: Option<&Path>,
    output: Option<&Path>,
    offset: usize,
    batch: usize,
) -> Result<()> {
    let plan = ReviewPlan::load(plan_path)
        .with_context(|| format!("Failed to load plan {}", plan_path.display()))?;
    plan.verify(&reference.reconciler())
        .context("Gazetteer, aliases or thresholds changed since the plan was built; rebuild it")?;

    let baseline = baseline.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(&plan.source));
    let target = output.map(Path::to_path_buf).unwrap_or_else(|| baseline.clone());

    let mut reader = open_table(&baseline)?;
    let summary = write_staged(&target, |staged| {
        let mut writer = TableWriter::create_passthrough(staged, reader.delimiter(), reader.layout())
            .with_context(|| format!("Failed to create {}", staged.display()))?;
        plan.apply_window(offset, batch, &mut reader, &mut writer)
            .with_context(|| format!("Failed to apply plan to {}", baseline.display()))
    })?;

    println!("✅ {}", summary.summary());
    if summary.missing > 0 {
        println!(
            "⚠️  {} change(s) in this window had no matching row in {}; see the log for details",
            summary.missing,
            baseline.display()
        );
    }
    if let Some(next) = summary.next_offset {
        println!("   Next: risk-gazetteer apply {} --offset {} --batch {}", plan_path.display(), next, batch);
    }
    Ok(())
}

fn run_missing(reference: &Reference, input: &Path, ignore_lines: &[usize], output: Option<&Path>) -> Result<()> {
    let mut reader = open_table(input)?;
    let layout = reader.layout().clone();
    let reconciler = reference.reconciler();
    let mut unmatched: Vec<CandidateRecord> = Vec::new();

    // An annotated table already says which rows are unmatched
    while let Some(row) = reader.read_row()? {
        let candidate = row.candidate(&layout);
        let outcome = match layout.outcome.and_then(|idx| reference.labels.parse(row.get(idx))) {
            Some(outcome) => outcome,
            None => reconciler.reconcile(&candidate.department, &candidate.municipality).outcome,
        };
        if outcome == Outcome::Unmatched {
            unmatched.push(candidate);
        }
    }

    let report = missing_report(&unmatched, ignore_lines);
    match output {
        Some(path) => {
            fs::write(path, &report).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "missing report written");
            println!("📄 {}", report.lines().next().unwrap_or_default());
        }
        None => print!("{}", report),
    }
    Ok(())
}

fn run_manual(
    reference: &Reference,
    input: &Path,
    corrections_path: &Path,
    key_columns: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let keys: Vec<&str> = if key_columns.is_empty() {
        DEFAULT_KEY_COLUMNS.to_vec()
    } else {
        key_columns.iter().map(String::as_str).collect()
    };
    let corrections = ManualCorrections::from_path(corrections_path, &keys)
        .with_context(|| format!("Failed to load corrections {}", corrections_path.display()))?;

    let target = output.unwrap_or(input);
    let mut reader = open_table(input)?;
    let summary = write_staged(target, |staged| {
        let mut writer = TableWriter::create_annotated(staged, reader.delimiter(), reader.layout(), &reference.labels)
            .with_context(|| format!("Failed to create {}", staged.display()))?;
        corrections
            .apply_and_recompare(&reference.reconciler(), &mut reader, &mut writer)
            .with_context(|| format!("Failed to apply corrections to {}", input.display()))
    })?;

    println!("✍️  {}", summary.summary());
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("risk_gazetteer=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("risk_gazetteer=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let reference = Reference::load(&cli.reference)?;

    match &cli.command {
        Command::Compare { input, output } => {
            run_reconcile(&reference, input, output.as_deref(), MatchMode::ExactOnly, false)
        }
        Command::Normalize { input, output, list_unmatched } => {
            run_reconcile(&reference, input, output.as_deref(), reference.config.mode, *list_unmatched)
        }
        Command::Plan { input, plan, offset, batch } => run_plan(&reference, input, plan.as_deref(), *offset, *batch),
        Command::Apply { plan, baseline, output, offset, batch } => {
            run_apply(&reference, plan, baseline.as_deref(), output.as_deref(), *offset, *batch)
        }
        Command::Missing { input, ignore_lines, output } => {
            run_missing(&reference, input, ignore_lines, output.as_deref())
        }
        Command::Manual { input, corrections, key_columns, output } => {
            run_manual(&reference, input, corrections, key_columns, output.as_deref())
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
    fn test_staging_path_is_sibling() {
        let staged = staging_path(Path::new("data/activos.csv"));
        assert_eq!(staged, PathBuf::from("data/activos.csv.tmp"));
    }

    #[test]
    fn test_write_staged_moves_file_over_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        fs::write(&target, "old\n").unwrap();

        let value = write_staged(&target, |staged| {
            fs::write(staged, "new\n")?;
            Ok(7)
        })
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(fs::read_to_string(&target).unwrap(), "new\n");
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn test_write_staged_removes_file_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        fs::write(&target, "old\n").unwrap();

        let result: Result<()> = write_staged(&target, |staged| {
            fs::write(staged, "half written")?;
            Err(anyhow!("reconcile failed"))
        });

        assert!(result.is_err());
        assert!(!staging_path(&target).exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "old\n");
    }
}
