//! Importer for the JSON file produced by pytest-polarion-collect.

use std::path::Path;

use serde_json::Value;

use crate::domain::model::{ImportedData, Record};
use crate::utils::error::{DumpError, Result};

/// Reads the top-level `results` array as the record sequence.
pub fn import_json(json_file: &Path) -> Result<ImportedData> {
    let location = json_file.display().to_string();
    let unreadable = |details: String| DumpError::SourceUnreadable {
        location: location.clone(),
        details,
    };

    let content = std::fs::read_to_string(json_file).map_err(|err| unreadable(err.to_string()))?;
    let document: Value =
        serde_json::from_str(&content).map_err(|err| unreadable(err.to_string()))?;

    let results: Vec<Record> = document
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| unreadable("missing 'results' key".to_string()))?
        .iter()
        .filter_map(|item| item.as_object().cloned())
        .collect();

    if results.is_empty() {
        return Err(DumpError::NoResults { location });
    }
    Ok(ImportedData {
        results,
        testrun: None,
    })
}
