//! Builds the XUnit XML consumed by the results importer.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::core::transform::{get_xunit_transform, ResultTransform};
use crate::domain::model::{
    non_empty, value_to_string, ImportedData, LookupMethod, Record, Verdict,
};
use crate::utils;
use crate::utils::error::{DumpError, Result};
use crate::utils::xml::Element;

/// Per-export aggregate counters rolled up onto the `testsuite` element.
#[derive(Debug, Default)]
struct Accounting {
    passed: u32,
    failures: u32,
    skipped: u32,
    waiting: u32,
    time: f64,
}

impl Accounting {
    fn tests(&self) -> u32 {
        self.passed + self.failures + self.skipped + self.waiting
    }
}

/// Export of test results into the XUnit XML representation.
pub struct XunitExport<'a> {
    testrun_id: String,
    tests_records: &'a ImportedData,
    config: &'a Config,
    lookup: Option<LookupMethod>,
    transform: Box<dyn ResultTransform>,
}

impl<'a> XunitExport<'a> {
    pub fn new(testrun_id: &str, tests_records: &'a ImportedData, config: &'a Config) -> Self {
        Self::with_transform(testrun_id, tests_records, config, get_xunit_transform(config))
    }

    /// Uses the given transform instead of the one selected by project id.
    pub fn with_transform(
        testrun_id: &str,
        tests_records: &'a ImportedData,
        config: &'a Config,
        transform: Box<dyn ResultTransform>,
    ) -> Self {
        XunitExport {
            testrun_id: testrun_id.to_string(),
            tests_records,
            config,
            lookup: None,
            transform,
        }
    }

    fn top_element(&self) -> Element {
        let mut top = Element::new("testsuites");
        top.append_comment(format!("Generated for testrun {}", self.testrun_id));
        top
    }

    /// Emits the testsuites-level properties block. A configured lookup
    /// method is captured instead of emitted; it goes in last, after it is
    /// known, see `fill_lookup_prop`.
    fn properties_element(&mut self, parent: &mut Element) -> Result<()> {
        let properties = parent.add_child("properties");

        let mut prop = |name: &str, value: &str| {
            let property = properties.add_child("property");
            property.set_attr("name", name);
            property.set_attr("value", value);
        };
        prop("polarion-testrun-id", &self.testrun_id);
        prop("polarion-project-id", self.config.project_id());

        for (name, value) in &self.config.xunit_import_properties {
            match name.as_str() {
                "polarion-lookup-method" => {
                    let raw = value_to_string(value).to_lowercase();
                    self.lookup = Some(LookupMethod::parse(&raw).ok_or_else(|| {
                        DumpError::InvalidProperty {
                            key: name.clone(),
                            value: value_to_string(value),
                        }
                    })?);
                }
                // already set above
                "polarion-testrun-id" | "polarion-project-id" => {}
                _ => {
                    let property = properties.add_child("property");
                    property.set_attr("name", name);
                    property.set_attr("value", value_to_string(value));
                }
            }
        }

        Ok(())
    }

    fn fill_lookup_prop(&self, parent: &mut Element) -> Result<()> {
        let Some(lookup) = self.lookup else {
            return Err(DumpError::ConfigError {
                message: "failed to set the 'polarion-lookup-method' property".to_string(),
            });
        };
        let Some(properties) = parent.find_mut("properties") else {
            return Err(DumpError::UnexpectedFormat(
                " - missing <properties>".to_string(),
            ));
        };
        let property = properties.add_child("property");
        property.set_attr("name", "polarion-lookup-method");
        property.set_attr("value", lookup.as_str());
        Ok(())
    }

    fn testsuite_element(&self) -> Element {
        let mut testsuite = Element::new("testsuite");
        testsuite.set_attr(
            "name",
            format!(
                "Import for {} - {} testrun",
                self.config.project_id(),
                self.testrun_id
            ),
        );
        testsuite
    }

    /// Infers the lookup method from the first record that supplies an
    /// identifying field; a configured method always wins.
    fn set_lookup_prop(&mut self, result: &Record) {
        if self.lookup.is_some() {
            return;
        }
        let inferred = if non_empty(result, "id").is_some() {
            LookupMethod::Id
        } else if non_empty(result, "title").is_some() {
            LookupMethod::Name
        } else {
            return;
        };
        tracing::debug!("Setting lookup method for xunit to `{}`", inferred.as_str());
        self.lookup = Some(inferred);
    }

    /// Whether the established lookup method's identifying field is present.
    fn check_lookup_prop(&self, result: &Record) -> bool {
        let Some(lookup) = self.lookup else {
            return false;
        };
        match lookup {
            LookupMethod::Name => non_empty(result, "title").is_some(),
            _ => non_empty(result, "id").is_some(),
        }
    }

    fn fill_verdict(
        verdict: Verdict,
        result: &Record,
        testcase: &mut Element,
        records: &mut Accounting,
    ) {
        // testsuite accounting: errors counts Polarion blocked, skipped
        // counts Polarion waiting
        let child_tag = match verdict {
            Verdict::Passed => {
                records.passed += 1;
                return;
            }
            Verdict::Failed => {
                records.failures += 1;
                "failure"
            }
            Verdict::Skipped => {
                records.skipped += 1;
                "error"
            }
            Verdict::Waiting => {
                records.waiting += 1;
                "skipped"
            }
        };
        let type_value = match verdict {
            Verdict::Failed => "failure",
            Verdict::Skipped => "error",
            _ => "skipped",
        };

        let child = testcase.add_child(child_tag);
        if let Some(comment) = non_empty(result, "comment") {
            child.set_attr("message", comment);
        }
        child.set_attr("type", type_value);
    }

    fn fill_out_err(result: &Record, testcase: &mut Element) {
        if let Some(stdout) = non_empty(result, "stdout") {
            testcase.add_child("system-out").set_text(stdout);
        }
        if let Some(stderr) = non_empty(result, "stderr") {
            testcase.add_child("system-err").set_text(stderr);
        }
    }

    fn fill_properties(
        verdict: Verdict,
        result: &Record,
        testcase: &mut Element,
        id_value: &str,
    ) {
        let properties = testcase.add_child("properties");

        let property = properties.add_child("property");
        property.set_attr("name", "polarion-testcase-id");
        property.set_attr("value", id_value);

        if verdict == Verdict::Passed {
            if let Some(comment) = non_empty(result, "comment") {
                let property = properties.add_child("property");
                property.set_attr("name", "polarion-testcase-comment");
                property.set_attr("value", comment);
            }
        }

        if let Some(params) = result.get("params").and_then(|v| v.as_object()) {
            for (param, value) in params {
                let property = properties.add_child("property");
                property.set_attr("name", format!("polarion-parameter-{param}"));
                property.set_attr("value", value_to_string(value));
            }
        }
    }

    fn testcase_time(result: &Record) -> f64 {
        ["time", "duration"]
            .iter()
            .find_map(|key| non_empty(result, key))
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0.0)
    }

    fn gen_testcase(&mut self, parent: &mut Element, result: Record, records: &mut Accounting) {
        let Some(result) = self.transform.transform(result) else {
            return;
        };

        let Some(verdict) = Verdict::of_record(&result) else {
            tracing::warn!("Skipping testcase, verdict is missing or invalid");
            return;
        };

        let testcase_id = non_empty(&result, "id");
        let testcase_title = non_empty(&result, "title");

        self.set_lookup_prop(&result);
        if !self.check_lookup_prop(&result) {
            tracing::warn!(
                "Skipping testcase `{}`, data missing for selected lookup method",
                testcase_id.as_deref().or(testcase_title.as_deref()).unwrap_or("")
            );
            return;
        }

        // both are known non-empty at this point thanks to the lookup check
        let name = testcase_title.as_deref().or(testcase_id.as_deref());
        let id_value = testcase_id.as_deref().or(testcase_title.as_deref());
        let (Some(name), Some(id_value)) = (name, id_value) else {
            return;
        };

        let time = Self::testcase_time(&result);
        records.time += time;

        let testcase = parent.add_child("testcase");
        if let Some(classname) = non_empty(&result, "classname") {
            testcase.set_attr("classname", classname);
        }
        testcase.set_attr("name", name);
        testcase.set_attr("time", format!("{time:?}"));

        Self::fill_verdict(verdict, &result, testcase, records);
        Self::fill_out_err(&result, testcase);
        Self::fill_properties(verdict, &result, testcase, id_value);
    }

    fn fill_tests_results(&mut self, testsuite: &mut Element) -> Result<()> {
        if self.tests_records.results.is_empty() {
            return Err(DumpError::nothing_to_export());
        }

        let mut records = Accounting::default();
        let tests_records = self.tests_records;
        for result in &tests_records.results {
            self.gen_testcase(testsuite, result.clone(), &mut records);
        }

        if records.tests() == 0 {
            return Err(DumpError::nothing_to_export());
        }

        testsuite.set_attr("errors", records.skipped.to_string());
        testsuite.set_attr("failures", records.failures.to_string());
        testsuite.set_attr("skipped", records.waiting.to_string());
        testsuite.set_attr("time", format!("{:.4}", records.time));
        testsuite.set_attr("tests", records.tests().to_string());
        Ok(())
    }

    /// Returns the complete XUnit XML document.
    pub fn export(&mut self) -> Result<String> {
        let mut top = self.top_element();
        self.properties_element(&mut top)?;

        let mut testsuite = self.testsuite_element();
        self.fill_tests_results(&mut testsuite)?;
        top.append(testsuite);

        self.fill_lookup_prop(&mut top)?;
        Ok(top.to_pretty_string())
    }

    /// Writes the XML out, generating a testrun-derived filename when the
    /// output location is a directory or unset.
    pub fn write_xml(&self, xml: &str, output_loc: Option<&Path>) -> Result<PathBuf> {
        let gen_filename = format!(
            "testrun_{}-{}.xml",
            self.testrun_id,
            utils::utc_timestamp()
        );
        utils::write_xml(xml, output_loc, &gen_filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Config {
        let mut config = Config {
            polarion_project_id: "RHCF3".to_string(),
            ..Config::default()
        };
        config
            .xunit_import_properties
            .insert("polarion-dry-run".to_string(), json!(false));
        config
    }

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn imported(results: Vec<Record>) -> ImportedData {
        ImportedData {
            results,
            testrun: None,
        }
    }

    #[test]
    fn test_export_complete_document() {
        let data = imported(vec![
            record(&[
                ("title", json!("test_one")),
                ("verdict", json!("passed")),
                ("time", json!("0.5")),
            ]),
            record(&[
                ("title", json!("test_two")),
                ("verdict", json!("failed")),
                ("comment", json!("FAILME: broke")),
                ("time", json!("1.25")),
            ]),
            record(&[
                ("title", json!("test_three")),
                ("verdict", json!("skipped")),
                ("comment", json!("BZ 123")),
            ]),
        ]);
        let config = config();
        let mut export = XunitExport::new("5_8_0_17", &data, &config);
        let xml = export.export().unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("<!--Generated for testrun 5_8_0_17-->"));
        assert!(xml.contains(
            "<property name=\"polarion-testrun-id\" value=\"5_8_0_17\"/>"
        ));
        assert!(xml.contains("<property name=\"polarion-project-id\" value=\"RHCF3\"/>"));
        assert!(xml.contains("<property name=\"polarion-dry-run\" value=\"false\"/>"));
        // inferred from the first record carrying only a title
        assert!(xml.contains("<property name=\"polarion-lookup-method\" value=\"name\"/>"));

        assert!(xml.contains(
            "<testsuite name=\"Import for RHCF3 - 5_8_0_17 testrun\" errors=\"1\" \
             failures=\"1\" skipped=\"0\" time=\"1.7500\" tests=\"3\">"
        ));
        assert!(xml.contains("<failure message=\"broke\" type=\"failure\"/>"));
        assert!(xml.contains("<error message=\"BZ 123\" type=\"error\"/>"));
    }

    #[test]
    fn test_waiting_maps_to_skipped_element() {
        let data = imported(vec![record(&[
            ("title", json!("test_wait")),
            ("verdict", json!("waiting")),
        ])]);
        let config = config();
        let mut export = XunitExport::new("tr1", &data, &config);
        let xml = export.export().unwrap();
        assert!(xml.contains("<skipped type=\"skipped\"/>"));
        assert!(xml.contains("skipped=\"1\""));
        assert!(xml.contains("errors=\"0\""));
    }

    #[test]
    fn test_pass_comment_becomes_property() {
        let data = imported(vec![record(&[
            ("id", json!("RHCF3-1234")),
            ("title", json!("test_ok")),
            ("verdict", json!("passed")),
            ("comment", json!("all good")),
            ("params", json!({"pkg": "vim"})),
        ])]);
        let mut config = config();
        // parametrization keeps the params mapping around for export
        config.cfme_parametrize = true;
        let mut export = XunitExport::new("tr1", &data, &config);
        let xml = export.export().unwrap();
        assert!(xml.contains(
            "<property name=\"polarion-testcase-id\" value=\"RHCF3-1234\"/>"
        ));
        assert!(xml.contains(
            "<property name=\"polarion-testcase-comment\" value=\"all good\"/>"
        ));
        assert!(xml.contains(
            "<property name=\"polarion-parameter-pkg\" value=\"vim\"/>"
        ));
        assert!(xml.contains("<property name=\"polarion-lookup-method\" value=\"id\"/>"));
    }

    #[test]
    fn test_records_missing_lookup_field_are_dropped() {
        // lookup inferred as "id" from the first record; the second has no
        // id and gets dropped, not exported by title
        let data = imported(vec![
            record(&[
                ("id", json!("ID-1")),
                ("title", json!("test_one")),
                ("verdict", json!("passed")),
            ]),
            record(&[("title", json!("test_two")), ("verdict", json!("passed"))]),
        ]);
        let config = config();
        let mut export = XunitExport::new("tr1", &data, &config);
        let xml = export.export().unwrap();
        assert!(xml.contains("tests=\"1\""));
        assert!(!xml.contains("test_two"));
    }

    #[test]
    fn test_empty_results_is_nothing_to_export() {
        let data = imported(vec![]);
        let config = config();
        let mut export = XunitExport::new("tr1", &data, &config);
        assert!(matches!(
            export.export(),
            Err(DumpError::NothingToDo(_))
        ));
    }

    #[test]
    fn test_all_dropped_is_nothing_to_export() {
        // CFME transform drops a skip without a blocker comment
        let data = imported(vec![record(&[
            ("title", json!("test_one")),
            ("verdict", json!("skipped")),
            ("comment", json!("no reason")),
        ])]);
        let config = config();
        let mut export = XunitExport::new("tr1", &data, &config);
        assert!(matches!(
            export.export(),
            Err(DumpError::NothingToDo(_))
        ));
    }

    #[test]
    fn test_invalid_lookup_method_is_rejected() {
        let mut config = config();
        config
            .xunit_import_properties
            .insert("polarion-lookup-method".to_string(), json!("fuzzy"));
        let data = imported(vec![record(&[
            ("title", json!("test_one")),
            ("verdict", json!("passed")),
        ])]);
        let mut export = XunitExport::new("tr1", &data, &config);
        assert!(matches!(
            export.export(),
            Err(DumpError::InvalidProperty { .. })
        ));
    }
}
