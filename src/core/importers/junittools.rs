//! Importer for pytest junit-report XML.

use std::path::Path;

use serde_json::Value;

use crate::domain::model::{sorted_record, ImportedData, Record};
use crate::utils::error::{DumpError, Result};
use crate::utils::xml::Element;

const PARAMETER_PREFIX: &str = "polarion-parameter-";

/// Verdict, comment and flat properties of one `<testcase>` element.
///
/// Precedence is a scan over children in document order: `<error>` sets a
/// provisional "failed" and keeps scanning, `<skipped>` and `<failure>` are
/// final (a later element never overrides them).
fn parse_testcase_record(testcase: &Element) -> (String, String, Vec<(String, String)>) {
    let mut verdict = None;
    let mut verdict_found = false;
    let mut comment = String::new();
    let mut properties = Vec::new();

    for element in testcase.elements() {
        if !verdict_found {
            match element.tag.as_str() {
                "error" => {
                    verdict = Some("failed");
                    comment = element.attr("message").unwrap_or_default().to_string();
                    // keep scanning, a later element may be more telling
                }
                "failure" => {
                    verdict = Some("failed");
                    comment = element.attr("message").unwrap_or_default().to_string();
                    verdict_found = true;
                }
                "skipped" => {
                    verdict = Some("skipped");
                    comment = element.attr("message").unwrap_or_default().to_string();
                    verdict_found = true;
                }
                _ => {}
            }
        }
        if element.tag == "properties" {
            for prop in element.elements() {
                if let Some(name) = prop.attr("name") {
                    properties.push((
                        name.to_string(),
                        prop.attr("value").unwrap_or_default().to_string(),
                    ));
                }
            }
        }
    }

    (
        verdict.unwrap_or("passed").to_string(),
        comment,
        properties,
    )
}

/// Splits `polarion-parameter-*` properties off into a parameters map.
fn extract_parameters(
    properties: Vec<(String, String)>,
) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let mut plain = Vec::new();
    let mut parameters = Vec::new();
    for (key, value) in properties {
        match key.strip_prefix(PARAMETER_PREFIX) {
            Some(param) => parameters.push((param.to_string(), value)),
            None => plain.push((key, value)),
        }
    }
    (plain, parameters)
}

fn attr_value(testcase: &Element, name: &str) -> Value {
    match testcase.attr(name) {
        Some(value) => Value::String(value.to_string()),
        None => Value::Null,
    }
}

/// Reads the content of the junit-results file produced by pytest.
pub fn import_junit(junit_file: &Path) -> Result<ImportedData> {
    let location = junit_file.display().to_string();
    let content = std::fs::read_to_string(junit_file).map_err(|err| DumpError::SourceUnreadable {
        location: location.clone(),
        details: err.to_string(),
    })?;
    let root = Element::parse(&content).map_err(|err| DumpError::SourceUnreadable {
        location: location.clone(),
        details: format!("failed to parse XML: {err}"),
    })?;

    let mut testcases: Vec<&Element> = root.find_all("testcase");
    if root.tag == "testcase" {
        testcases.insert(0, &root);
    }

    let mut results = Vec::new();
    for testcase in testcases {
        let (verdict, comment, properties) = parse_testcase_record(testcase);
        let (properties, parameters) = extract_parameters(properties);

        let testcase_id = properties
            .iter()
            .find(|(name, _)| name == "polarion-testcase-id")
            .map(|(_, value)| Value::String(value.clone()))
            .unwrap_or(Value::Null);

        let mut record = Record::new();
        record.insert("id".to_string(), testcase_id);
        record.insert("title".to_string(), attr_value(testcase, "name"));
        record.insert("classname".to_string(), attr_value(testcase, "classname"));
        record.insert("verdict".to_string(), Value::String(verdict));
        record.insert("comment".to_string(), Value::String(comment));
        record.insert(
            "time".to_string(),
            testcase
                .attr("time")
                .map(|t| Value::String(t.to_string()))
                .unwrap_or(Value::from(0)),
        );
        record.insert("file".to_string(), attr_value(testcase, "file"));

        for (key, value) in properties {
            record.insert(key, Value::String(value));
        }
        if !parameters.is_empty() {
            let mut params = Record::new();
            for (key, value) in parameters {
                params.insert(key, Value::String(value));
            }
            record.insert("params".to_string(), Value::Object(sorted_record(&params)));
        }

        results.push(sorted_record(&record));
    }

    if results.is_empty() {
        return Err(DumpError::NoResults { location });
    }
    Ok(ImportedData {
        results,
        testrun: None,
    })
}
