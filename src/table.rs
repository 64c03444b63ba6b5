// 📄 Table I/O - CSV in, CSV out, passthrough columns untouched
// The only place that touches files; the engine never does I/O.
//
// Tables come from spreadsheets exported by hand, so the reader is tolerant:
// - `,` or `;` delimiter (whichever the header line uses more)
// - blank lines before the header are skipped
// - invalid UTF-8 is replaced instead of failing the run
// - header names are matched case-insensitively, Spanish or English

use crate::batch::CandidateRecord;
use crate::config::OutputLabels;
use crate::engine::{Outcome, ReconciliationResult};
use crate::error::{ReconcileError, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::path::Path;

pub const DEPARTMENT_HEADERS: &[&str] = &["department", "departamento"];
pub const MUNICIPALITY_HEADERS: &[&str] = &["municipality", "municipio", "city", "ciudad"];
pub const COUNTRY_HEADERS: &[&str] = &["country", "país", "pais"];
pub const OUTCOME_HEADERS: &[&str] = &["outcome", "comparacion", "comparación"];

/// Header line re-attached in front of the rest of the stream
pub type Peeked<R> = io::Chain<Cursor<Vec<u8>>, R>;

/// `;` wins only when it outnumbers `,`
pub fn detect_delimiter(header_line: &str) -> u8 {
    if header_line.matches(';').count() > header_line.matches(',').count() {
        b';'
    } else {
        b','
    }
}

fn header_key(header: &str) -> String {
    header.trim().trim_start_matches('\u{feff}').to_lowercase()
}

/// First header matching any of `names`, in priority order of `names`
pub fn find_column(headers: &[String], names: &[&str]) -> Option<usize> {
    let keys: Vec<String> = headers.iter().map(|h| header_key(h)).collect();
    names
        .iter()
        .find_map(|name| keys.iter().position(|k| k == name))
}

// ============================================================================
// COLUMN LAYOUT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    pub headers: Vec<String>,
    pub department: usize,
    pub municipality: usize,
    pub country: Option<usize>,
    pub outcome: Option<usize>,
}

impl ColumnLayout {
    /// Resolve the place columns; missing department/municipality is fatal
    pub fn detect(table: &str, headers: Vec<String>) -> Result<Self> {
        let department = find_column(&headers, DEPARTMENT_HEADERS);
        let municipality = find_column(&headers, MUNICIPALITY_HEADERS);

        match (department, municipality) {
            (Some(department), Some(municipality)) => Ok(ColumnLayout {
                country: find_column(&headers, COUNTRY_HEADERS),
                outcome: find_column(&headers, OUTCOME_HEADERS),
                headers,
                department,
                municipality,
            }),
            _ => {
                let mut missing = Vec::new();
                if department.is_none() {
                    missing.push("department");
                }
                if municipality.is_none() {
                    missing.push("municipality");
                }
                Err(ReconcileError::MissingColumns {
                    table: table.to_string(),
                    missing: missing.join(", "),
                    found: headers.join(", "),
                })
            }
        }
    }

    /// Case-insensitive lookup of any column by name
    pub fn column(&self, name: &str) -> Option<usize> {
        find_column(&self.headers, &[header_key(name).as_str()])
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Layout of an annotated output table: country/outcome appended when absent
    pub fn annotated(&self, labels: &OutputLabels) -> ColumnLayout {
        let mut headers = self.headers.clone();
        let country = match self.country {
            Some(idx) => idx,
            None => {
                headers.push(labels.country_column.clone());
                headers.len() - 1
            }
        };
        let outcome = match self.outcome {
            Some(idx) => idx,
            None => {
                headers.push(labels.outcome_column.clone());
                headers.len() - 1
            }
        };

        ColumnLayout {
            headers,
            department: self.department,
            municipality: self.municipality,
            country: Some(country),
            outcome: Some(outcome),
        }
    }
}

// ============================================================================
// TABLE ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// 1-based line number in the source file
    pub line: usize,
    /// 0-based position among data rows; survives a rewrite that drops blank lines
    pub index: usize,
    pub fields: Vec<String>,
}

impl TableRow {
    pub fn get(&self, idx: usize) -> &str {
        self.fields.get(idx).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, idx: usize, value: &str) {
        if self.fields.len() <= idx {
            self.fields.resize(idx + 1, String::new());
        }
        self.fields[idx] = value.to_string();
    }

    pub fn candidate(&self, layout: &ColumnLayout) -> CandidateRecord {
        CandidateRecord::new(
            self.line,
            self.get(layout.department).trim(),
            self.get(layout.municipality).trim(),
        )
    }
}

// ============================================================================
// TABLE READER
// ============================================================================

pub struct TableReader<R: Read> {
    name: String,
    inner: csv::Reader<R>,
    layout: ColumnLayout,
    delimiter: u8,
    /// Blank lines skipped before the header
    line_offset: usize,
    rows_read: usize,
}

impl TableReader<Peeked<BufReader<File>>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        TableReader::from_reader(&path.display().to_string(), BufReader::new(file))
    }
}

impl<R: BufRead> TableReader<Peeked<R>> {
    pub fn from_reader(name: &str, mut reader: R) -> Result<Self> {
        let mut skipped = 0;
        let header = loop {
            let mut raw = Vec::new();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                return Err(ReconcileError::EmptyTable(name.to_string()));
            }
            let line = String::from_utf8_lossy(&raw).into_owned();
            if !line.trim().is_empty() {
                break line;
            }
            skipped += 1;
        };

        let delimiter = detect_delimiter(&header);
        let stream = Cursor::new(header.into_bytes()).chain(reader);

        let mut inner = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(stream);

        let headers: Vec<String> = inner
            .byte_headers()?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim().to_string())
            .collect();
        let layout = ColumnLayout::detect(name, headers)?;

        Ok(TableReader {
            name: name.to_string(),
            inner,
            layout,
            delimiter,
            line_offset: skipped,
            rows_read: 0,
        })
    }
}

impl<R: Read> TableReader<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Next data row, padded to the header width
    pub fn read_row(&mut self) -> Result<Option<TableRow>> {
        let mut record = csv::ByteRecord::new();
        if !self.inner.read_byte_record(&mut record)? {
            return Ok(None);
        }

        let line = record.position().map(|p| p.line() as usize).unwrap_or(0) + self.line_offset;
        let mut fields: Vec<String> = record
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();
        if fields.len() < self.layout.width() {
            fields.resize(self.layout.width(), String::new());
        }

        let index = self.rows_read;
        self.rows_read += 1;

        Ok(Some(TableRow { line, index, fields }))
    }

    /// Drain the remaining rows
    pub fn read_all(&mut self) -> Result<Vec<TableRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.read_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl<R: Read> Iterator for TableReader<R> {
    type Item = Result<TableRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_row().transpose()
    }
}

// ============================================================================
// TABLE WRITER
// ============================================================================

pub struct TableWriter<W: Write> {
    inner: csv::Writer<W>,
    layout: ColumnLayout,
    labels: OutputLabels,
}

impl TableWriter<File> {
    /// Create an output file with the input's columns plus country/outcome
    pub fn create_annotated<P: AsRef<Path>>(
        path: P,
        delimiter: u8,
        input: &ColumnLayout,
        labels: &OutputLabels,
    ) -> Result<Self> {
        TableWriter::annotated(File::create(path)?, delimiter, input, labels)
    }

    /// Create an output file with exactly the input's columns
    pub fn create_passthrough<P: AsRef<Path>>(
        path: P,
        delimiter: u8,
        input: &ColumnLayout,
    ) -> Result<Self> {
        TableWriter::passthrough(File::create(path)?, delimiter, input)
    }
}

impl<W: Write> TableWriter<W> {
    pub fn annotated(
        writer: W,
        delimiter: u8,
        input: &ColumnLayout,
        labels: &OutputLabels,
    ) -> Result<Self> {
        Self::with_layout(writer, delimiter, input.annotated(labels), labels.clone())
    }

    pub fn passthrough(writer: W, delimiter: u8, input: &ColumnLayout) -> Result<Self> {
        Self::with_layout(writer, delimiter, input.clone(), OutputLabels::default())
    }

    fn with_layout(
        writer: W,
        delimiter: u8,
        layout: ColumnLayout,
        labels: OutputLabels,
    ) -> Result<Self> {
        let mut inner = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_writer(writer);
        inner.write_record(&layout.headers)?;

        Ok(TableWriter {
            inner,
            layout,
            labels,
        })
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    /// Write a row as-is (padded to the output width)
    pub fn write_row(&mut self, row: &TableRow) -> Result<()> {
        let mut fields = row.fields.clone();
        if fields.len() < self.layout.width() {
            fields.resize(self.layout.width(), String::new());
        }
        self.inner.write_record(&fields)?;
        Ok(())
    }

    /// Write a row with the reconciliation applied
    ///
    /// Changed rows get the canonical pair. Unmatched rows keep whatever
    /// country they already had.
    pub fn write_reconciled(&mut self, row: &TableRow, result: &ReconciliationResult) -> Result<()> {
        let mut row = row.clone();

        if result.outcome == Outcome::Changed {
            row.set(self.layout.department, &result.resolved_department);
            row.set(self.layout.municipality, &result.resolved_municipality);
        }
        if let Some(country) = self.layout.country {
            if result.outcome != Outcome::Unmatched {
                row.set(country, &result.resolved_country);
            }
        }
        if let Some(outcome) = self.layout.outcome {
            let label = self.labels.label(result.outcome).to_string();
            row.set(outcome, &label);
        }

        self.write_row(&row)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| ReconcileError::Io(e.into_error()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
