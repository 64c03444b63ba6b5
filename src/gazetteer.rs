// 🗺️ Canonical Gazetteer - the reference table every candidate is resolved against
//
// Built once per run, read-only afterwards. Four lookup structures:
// - exact index:         (dept slug, muni slug) → entry
// - department pools:    dept slug → municipality names (load order, duplicates kept)
// - department names:    dept slug → first-seen display name
// - global muni index:   muni slug → distinct entries carrying that slug
//
// Slug-keyed maps that get fuzzy-searched are BTreeMaps so the search order
// (and therefore tie-breaking) is lexicographic and reproducible.

use crate::error::Result;
use crate::slug::slug;
use crate::table::TableReader;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// ENTRY + KEY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GazetteerEntry {
    pub department: String,
    pub municipality: String,
    /// May be empty
    pub country: String,
}

impl GazetteerEntry {
    pub fn new(department: &str, municipality: &str, country: &str) -> Self {
        GazetteerEntry {
            department: department.trim().to_string(),
            municipality: municipality.trim().to_string(),
            country: country.trim().to_string(),
        }
    }

    pub fn key(&self) -> CanonicalKey {
        CanonicalKey::new(&self.department, &self.municipality)
    }
}

/// `(slug(department), slug(municipality))`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalKey {
    pub department: String,
    pub municipality: String,
}

impl CanonicalKey {
    pub fn new(department: &str, municipality: &str) -> Self {
        CanonicalKey {
            department: slug(department),
            municipality: slug(municipality),
        }
    }

    /// Build from values that are already slugs
    pub fn from_slugs(department_slug: &str, municipality_slug: &str) -> Self {
        CanonicalKey {
            department: department_slug.to_string(),
            municipality: municipality_slug.to_string(),
        }
    }
}

// ============================================================================
// GAZETTEER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    /// Deduplicated entries in first-seen order
    entries: Vec<GazetteerEntry>,

    /// Parallel to `entries`
    keys: Vec<CanonicalKey>,

    exact_index: HashMap<CanonicalKey, usize>,

    municipalities_by_department: HashMap<String, Vec<String>>,

    department_names: BTreeMap<String, String>,

    global_municipality_index: BTreeMap<String, Vec<usize>>,
}

impl Gazetteer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows; rows with an empty department or municipality are skipped
    pub fn load<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = GazetteerEntry>,
    {
        let mut gazetteer = Gazetteer::new();
        for entry in rows {
            gazetteer.insert(entry);
        }
        gazetteer
    }

    /// Load a CSV reference table (riesgos.csv and friends)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_table(TableReader::open(path)?, None)
    }

    /// Load a secondary table whose rows lack a country column
    ///
    /// Rows with an empty country cell get `country`.
    pub fn from_path_with_default_country<P: AsRef<Path>>(path: P, country: &str) -> Result<Self> {
        Self::from_table(TableReader::open(path)?, Some(country))
    }

    pub fn from_table<R: Read>(mut reader: TableReader<R>, default_country: Option<&str>) -> Result<Self> {
        let layout = reader.layout().clone();
        let mut gazetteer = Gazetteer::new();
        let mut skipped = 0;

        while let Some(row) = reader.read_row()? {
            let country = layout
                .country
                .map(|idx| row.get(idx).trim())
                .filter(|c| !c.is_empty())
                .or(default_country)
                .unwrap_or("");

            let entry = GazetteerEntry::new(row.get(layout.department), row.get(layout.municipality), country);
            if !gazetteer.insert(entry) {
                skipped += 1;
            }
        }

        info!(
            table = reader.name(),
            entries = gazetteer.len(),
            departments = gazetteer.department_count(),
            skipped,
            "gazetteer loaded"
        );
        Ok(gazetteer)
    }

    /// Add one entry; returns false when it was skipped for an empty field
    ///
    /// A repeated canonical key replaces the earlier entry (last write wins)
    /// but keeps its position.
    pub fn insert(&mut self, entry: GazetteerEntry) -> bool {
        if entry.department.is_empty() || entry.municipality.is_empty() {
            return false;
        }

        let key = entry.key();
        if key.department.is_empty() || key.municipality.is_empty() {
            debug!(department = %entry.department, municipality = %entry.municipality, "skipping entry with empty slug");
            return false;
        }

        self.municipalities_by_department
            .entry(key.department.clone())
            .or_default()
            .push(entry.municipality.clone());
        self.department_names
            .entry(key.department.clone())
            .or_insert_with(|| entry.department.clone());

        let idx = match self.exact_index.get(&key) {
            Some(&idx) => {
                self.entries[idx] = entry;
                idx
            }
            None => {
                let idx = self.entries.len();
                self.entries.push(entry);
                self.keys.push(key.clone());
                self.exact_index.insert(key.clone(), idx);
                idx
            }
        };

        let holders = self
            .global_municipality_index
            .entry(key.municipality)
            .or_default();
        if !holders.contains(&idx) {
            holders.push(idx);
        }

        true
    }

    /// Fold a secondary gazetteer in (e.g. another country's table)
    pub fn merge(mut self, other: Gazetteer) -> Self {
        for entry in other.entries {
            self.insert(entry);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn department_count(&self) -> usize {
        self.department_names.len()
    }

    pub fn entries(&self) -> &[GazetteerEntry] {
        &self.entries
    }

    /// Entries with their keys, in load order
    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalKey, &GazetteerEntry)> {
        self.keys.iter().zip(self.entries.iter())
    }

    pub fn get(&self, key: &CanonicalKey) -> Option<&GazetteerEntry> {
        self.exact_index.get(key).map(|&idx| &self.entries[idx])
    }

    /// Exact lookup from display strings
    pub fn lookup(&self, department: &str, municipality: &str) -> Option<&GazetteerEntry> {
        self.get(&CanonicalKey::new(department, municipality))
    }

    /// Municipality names loaded under a department slug (empty if unknown)
    pub fn municipalities_in(&self, department_slug: &str) -> &[String] {
        self.municipalities_by_department
            .get(department_slug)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First-seen display name for a department slug
    pub fn department_name(&self, department_slug: &str) -> Option<&str> {
        self.department_names.get(department_slug).map(String::as_str)
    }

    /// Known department slugs, lexicographic
    pub fn department_slugs(&self) -> impl Iterator<Item = &str> {
        self.department_names.keys().map(String::as_str)
    }

    /// Known municipality slugs across all departments, lexicographic
    pub fn municipality_slugs(&self) -> impl Iterator<Item = &str> {
        self.global_municipality_index.keys().map(String::as_str)
    }

    /// Distinct entries whose municipality slug is `municipality_slug`
    pub fn entries_with_municipality(&self, municipality_slug: &str) -> Vec<&GazetteerEntry> {
        self.global_municipality_index
            .get(municipality_slug)
            .map(|idxs| idxs.iter().map(|&idx| &self.entries[idx]).collect())
            .unwrap_or_default()
    }

    /// SHA-256 over the entries, independent of load order
    pub fn fingerprint(&self) -> String {
        let mut rows: Vec<&GazetteerEntry> = self.entries.iter().collect();
        rows.sort_by(|a, b| {
            (&a.department, &a.municipality, &a.country).cmp(&(&b.department, &b.municipality, &b.country))
        });

        let mut hasher = Sha256::new();
        for entry in rows {
            hasher.update(format!(
                "{}\u{1f}{}\u{1f}{}\n",
                entry.department, entry.municipality, entry.country
            ));
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// TESTS
// ============================================================================
