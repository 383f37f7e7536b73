//! Importer for test results exported to CSV.
//!
//! The files carry a preamble of query metadata before the actual header row,
//! ragged data rows and sometimes a legacy `|` quote character, so the
//! parsing here is deliberately forgiving.

use std::path::Path;

use regex::Regex;
use serde_json::Value;

use crate::domain::model::{get_str, ImportedData, Record};
use crate::utils::error::{DumpError, Result};

const TESTRUN_MARKER: &str = r#"TEST_RECORDS:\("[^/]+/([^"]+)""#;
const SNIFF_WINDOW: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect {
            delimiter: b';',
            quote: b'"',
        }
    }
}

/// Guesses delimiter and quote character from the first 2KB of the file.
fn sniff_dialect(content: &str) -> Dialect {
    let mut end = content.len().min(SNIFF_WINDOW);
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    let sample = &content[..end];

    let delimiter = [b';', b',', b'\t']
        .into_iter()
        .max_by_key(|&d| sample.bytes().filter(|&b| b == d).count())
        .unwrap_or(b';');

    // legacy exports quote fields with '|' instead of '"'
    let delim_char = delimiter as char;
    let legacy_quoted = sample.contains(&format!("|{delim_char}|"))
        || sample.lines().any(|line| line.starts_with('|') && line.ends_with('|'));
    let quote = if legacy_quoted { b'|' } else { b'"' };

    Dialect { delimiter, quote }
}

fn normalize_field(raw: &str) -> String {
    raw.trim()
        .replace(['"', ' ', '(', ')'], "")
        .to_lowercase()
}

/// Finds the header row (the one containing an `id` field) and returns its
/// index together with the normalized field names.
fn find_fieldnames(rows: &[Vec<String>]) -> Option<(usize, Vec<String>)> {
    for (index, row) in rows.iter().enumerate() {
        let mut fieldnames: Vec<String> = row.iter().map(|col| normalize_field(col)).collect();
        if !fieldnames.iter().any(|f| f == "id") {
            continue;
        }

        // trim unannotated fields off the end
        while matches!(fieldnames.last(), Some(f) if f.is_empty()) {
            fieldnames.pop();
        }
        if fieldnames.is_empty() {
            continue;
        }

        // name the unannotated fields in the middle
        let mut suffix = 1;
        for field in fieldnames.iter_mut() {
            if field.is_empty() {
                *field = format!("field{suffix}");
                suffix += 1;
            }
        }
        return Some((index, fieldnames));
    }
    None
}

/// Scans the preamble rows for the embedded testrun-id marker.
fn find_testrun(rows: &[Vec<String>], header_index: usize) -> Option<String> {
    let marker = Regex::new(TESTRUN_MARKER).expect("valid testrun marker regex");
    for row in &rows[..header_index] {
        for col in row {
            if col.is_empty() {
                continue;
            }
            if let Some(capture) = marker.captures(col) {
                return Some(capture[1].to_string());
            }
        }
    }
    None
}

/// Maps data rows onto the field names positionally.
fn collect_results(rows: &[Vec<String>], fieldnames: &[String]) -> Vec<Record> {
    let mut results = Vec::new();
    for row in rows {
        if row.iter().all(|col| col.is_empty()) {
            continue;
        }
        let mut record = Record::new();
        for (index, field) in fieldnames.iter().enumerate() {
            let value = match row.get(index) {
                Some(col) => Value::String(col.clone()),
                // rows shorter than the header get null trailing fields
                None => Value::Null,
            };
            record.insert(field.clone(), value);
        }
        // rows already submitted in a previous run
        if get_str(&record, "exported") == Some("yes") {
            continue;
        }
        results.push(record);
    }
    results
}

fn read_rows(content: &str, dialect: Dialect) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(dialect.delimiter)
        .quote(dialect.quote)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row?;
        rows.push(row.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn check_required_columns(location: &str, results: &[Record]) -> Result<()> {
    let required = [("verdict", "Verdict")];
    let missing: Vec<String> = required
        .iter()
        .filter(|(key, _)| !results[0].contains_key(*key))
        .map(|(_, human)| human.to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(DumpError::MissingColumns {
        location: location.to_string(),
        columns: missing,
    })
}

/// Reads the exported CSV file and returns imported data.
pub fn get_imported_data(csv_file: &Path) -> Result<ImportedData> {
    let location = csv_file.display().to_string();
    let content = std::fs::read_to_string(csv_file).map_err(|err| DumpError::SourceUnreadable {
        location: location.clone(),
        details: err.to_string(),
    })?;

    let rows = read_rows(&content, sniff_dialect(&content))?;

    let (header_index, fieldnames) = find_fieldnames(&rows)
        .ok_or_else(|| DumpError::FieldNamesNotFound {
            location: location.clone(),
        })?;

    let results = collect_results(&rows[header_index + 1..], &fieldnames);
    if results.is_empty() {
        return Err(DumpError::NoResults { location });
    }

    let testrun = find_testrun(&rows, header_index);
    Ok(ImportedData { results, testrun })
}

/// Imports data and checks that all required columns are there.
pub fn import_csv(csv_file: &Path) -> Result<ImportedData> {
    let data = get_imported_data(csv_file)?;
    check_required_columns(&csv_file.display().to_string(), &data.results)?;
    Ok(data)
}
