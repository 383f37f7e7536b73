//! Format importers producing the uniform [`ImportedData`] structure.

pub mod csvtools;
pub mod dbtools;
pub mod jsontools;
pub mod junittools;
pub mod ostriztools;

use std::path::Path;

use chrono::NaiveDateTime;

use crate::domain::model::ImportedData;
use crate::utils::error::{DumpError, Result};

/// Imports the input using the importer matching its type.
///
/// Selection follows the input name: an "ostriz" location (file or URL) uses
/// the telemetry importer, otherwise the file extension decides.
pub fn do_import(input: &str, older_than: Option<NaiveDateTime>) -> Result<ImportedData> {
    if input.contains("ostriz") {
        return ostriztools::import_ostriz(input);
    }

    let path = Path::new(input);
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        // expect junit-report from pytest
        "xml" => junittools::import_junit(path),
        "csv" => csvtools::import_csv(path),
        "json" => jsontools::import_json(path),
        ext if dbtools::SQLITE_EXT.contains(&ext) => dbtools::import_sqlite(path, older_than),
        _ => Err(DumpError::ConfigError {
            message: format!("Cannot recognize type of input data '{input}', add file extension"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = do_import("results.dat", None).unwrap_err();
        assert!(matches!(err, DumpError::ConfigError { .. }));
    }

    #[test]
    fn test_extension_dispatch_reaches_csv_importer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.CSV");
        std::fs::write(&path, "ID;Verdict\n1;passed\n").unwrap();
        let data = do_import(path.to_str().unwrap(), None).unwrap();
        assert_eq!(data.results.len(), 1);
    }
}
