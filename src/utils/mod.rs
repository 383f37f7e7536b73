pub mod error;
pub mod logger;
pub mod xml;

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::utils::error::{DumpError, Result};

/// Resolves the final output path.
///
/// When `output_loc` points to an existing directory, the generated
/// `filename` is placed inside it. A non-directory `output_loc` is used as-is
/// and the generated name is ignored.
pub fn get_filename(output_loc: Option<&Path>, filename: &str) -> PathBuf {
    match output_loc {
        Some(loc) if loc.is_dir() => loc.join(filename),
        Some(loc) => loc.to_path_buf(),
        None => PathBuf::from(filename),
    }
}

/// Writes the XML content into a file and returns the path written to.
pub fn write_xml(xml: &str, output_loc: Option<&Path>, filename: &str) -> Result<PathBuf> {
    if xml.is_empty() {
        return Err(DumpError::NothingToDo("No data to write".to_string()));
    }
    let path = get_filename(output_loc, filename);
    std::fs::write(&path, xml::valid_xml_str(xml))?;
    tracing::info!("Data written to '{}'", path.display());
    Ok(path)
}

/// UTC timestamp to the second, used in generated file names.
pub fn utc_timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_filename_places_generated_name_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = get_filename(Some(dir.path()), "testrun_demo-20260101000000.xml");
        assert_eq!(path, dir.path().join("testrun_demo-20260101000000.xml"));
    }

    #[test]
    fn test_get_filename_explicit_file_wins() {
        let path = get_filename(Some(Path::new("/tmp/out.xml")), "generated.xml");
        assert_eq!(path, PathBuf::from("/tmp/out.xml"));
    }

    #[test]
    fn test_write_xml_rejects_empty_content() {
        assert!(write_xml("", None, "out.xml").is_err());
    }
}
