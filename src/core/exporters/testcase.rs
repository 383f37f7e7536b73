//! Builds the testcase XML consumed by the work-item importer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;

use crate::config::Config;
use crate::core::transform::{get_testcases_transform, TestcaseTransform};
use crate::domain::model::{is_empty_value, non_empty, value_to_string, LookupMethod, Record};
use crate::utils;
use crate::utils::error::{DumpError, Result};
use crate::utils::xml::Element;

/// Fields emitted as attributes of the `testcase` element. Everything else
/// either matches the custom-field allow-list or is dropped.
const TESTCASE_ATTRS: &[&str] = &[
    "approver-ids",
    "assignee-id",
    "due-date",
    "id",
    "initial-estimate",
    "status-id",
];

/// Importer field to source field mapping; the source value is used when the
/// importer field itself is unset.
const FIELD_MAPPING: &[(&str, &str)] = &[
    ("assignee-id", "assignee"),
    ("due-date", "dueDate"),
    ("initial-estimate", "initialEstimate"),
    ("status-id", "status"),
    ("linked-work-items", "linkedWorkItems"),
];

/// Built-in custom fields; a `Some` value is filled in when the field is
/// missing or empty.
const CUSTOM_FIELDS: &[(&str, Option<&str>)] = &[
    ("arch", None),
    ("automation_script", None),
    ("caseautomation", Some("automated")),
    ("casecomponent", None),
    ("caseimportance", Some("high")),
    ("caselevel", Some("component")),
    ("caseposneg", Some("positive")),
    ("customerscenario", None),
    ("endsin", None),
    ("legacytest", None),
    ("multiproduct", None),
    ("reqverify", None),
    ("setup", None),
    ("startsin", None),
    ("subcomponent", None),
    ("subtype1", Some("-")),
    ("subtype2", Some("-")),
    ("tags", None),
    ("teardown", None),
    ("testtier", None),
    ("testtype", Some("functional")),
    ("upstream", None),
];

/// Normalization pipeline run on each testcase before serialization:
/// project defaults, importer-field aliasing, the per-project transform,
/// then built-in defaults.
struct TestcasePipeline {
    default_fields: BTreeMap<String, String>,
    transform: Box<dyn TestcaseTransform>,
}

impl TestcasePipeline {
    fn new(config: &Config, transform: Box<dyn TestcaseTransform>) -> Self {
        let default_fields = config
            .default_fields
            .iter()
            .filter(|(_, value)| !is_empty_value(value))
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect();
        TestcasePipeline {
            default_fields,
            transform,
        }
    }

    fn fill_project_defaults(&self, testcase: Record) -> Record {
        let mut filled: Record = self
            .default_fields
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        for (key, value) in testcase {
            filled.insert(key, value);
        }
        filled
    }

    fn fill_polarion_fields(testcase: &mut Record) {
        for (importer_field, polarion_field) in FIELD_MAPPING {
            let polarion_value = testcase.get(*polarion_field).cloned();
            let Some(polarion_value) = polarion_value.filter(|v| !is_empty_value(v)) else {
                continue;
            };
            let unset = testcase
                .get(*importer_field)
                .map(is_empty_value)
                .unwrap_or(true);
            if unset {
                testcase.insert(importer_field.to_string(), polarion_value);
            }
        }
    }

    fn fill_defaults(testcase: &mut Record) {
        for (key, default) in CUSTOM_FIELDS {
            let Some(default) = default else { continue };
            let unset = testcase.get(*key).map(is_empty_value).unwrap_or(true);
            if unset {
                testcase.insert(key.to_string(), Value::String(default.to_string()));
            }
        }
    }

    fn run(&mut self, testcase: Record) -> Option<Record> {
        let mut testcase = self.fill_project_defaults(testcase);
        Self::fill_polarion_fields(&mut testcase);
        let mut testcase = self.transform.transform(testcase)?;
        Self::fill_defaults(&mut testcase);
        Some(testcase)
    }
}

/// Export of testcase definitions into the XML representation.
pub struct TestcaseExport<'a> {
    testcases_data: &'a [Record],
    config: &'a Config,
    lookup: Option<LookupMethod>,
    pipeline: TestcasePipeline,
    known_custom_fields: BTreeSet<String>,
    whitelist: Option<Regex>,
    blacklist: Option<Regex>,
}

impl<'a> TestcaseExport<'a> {
    pub fn new(testcases_data: &'a [Record], config: &'a Config) -> Result<Self> {
        Self::with_transform(testcases_data, config, get_testcases_transform(config))
    }

    /// Uses the given transform instead of the one selected by project id.
    pub fn with_transform(
        testcases_data: &'a [Record],
        config: &'a Config,
        transform: Box<dyn TestcaseTransform>,
    ) -> Result<Self> {
        let mut known_custom_fields: BTreeSet<String> = CUSTOM_FIELDS
            .iter()
            .map(|(key, _)| key.to_string())
            .collect();
        known_custom_fields.extend(config.custom_fields.iter().cloned());

        Ok(TestcaseExport {
            testcases_data,
            config,
            lookup: None,
            pipeline: TestcasePipeline::new(config, transform),
            known_custom_fields,
            whitelist: compile_patterns(&config.whitelisted_tests)?,
            blacklist: compile_patterns(&config.blacklisted_tests)?,
        })
    }

    fn top_element(&self) -> Element {
        let mut top = Element::new("testcases");
        top.set_attr("project-id", self.config.project_id());
        top
    }

    fn properties_element(&mut self, parent: &mut Element) -> Result<()> {
        let properties = parent.add_child("properties");

        for (name, value) in &self.config.testcase_import_properties {
            if name == "lookup-method" {
                let raw = value_to_string(value).to_lowercase();
                self.lookup = Some(LookupMethod::parse(&raw).ok_or_else(|| {
                    DumpError::InvalidProperty {
                        key: name.clone(),
                        value: value_to_string(value),
                    }
                })?);
            } else {
                let property = properties.add_child("property");
                property.set_attr("name", name);
                property.set_attr("value", value_to_string(value));
            }
        }
        Ok(())
    }

    fn fill_lookup_prop(&self, parent: &mut Element) -> Result<()> {
        let Some(lookup) = self.lookup else {
            return Err(DumpError::ConfigError {
                message: "failed to set the 'lookup-method' property".to_string(),
            });
        };
        let Some(properties) = parent.find_mut("properties") else {
            return Err(DumpError::UnexpectedFormat(
                " - missing <properties>".to_string(),
            ));
        };
        let property = properties.add_child("property");
        property.set_attr("name", "lookup-method");
        property.set_attr("value", lookup.as_str());
        Ok(())
    }

    fn set_lookup_prop(&mut self, testcase: &Record) {
        if self.lookup.is_some() {
            return;
        }
        let inferred = if non_empty(testcase, "id").is_some() {
            LookupMethod::Id
        } else if non_empty(testcase, "title").is_some() {
            LookupMethod::Name
        } else {
            return;
        };
        tracing::debug!(
            "Setting lookup method for testcases to `{}`",
            inferred.as_str()
        );
        self.lookup = Some(inferred);
    }

    fn check_lookup_prop(&self, testcase: &Record) -> bool {
        let Some(lookup) = self.lookup else {
            return false;
        };
        match lookup {
            LookupMethod::Name => non_empty(testcase, "title").is_some(),
            _ => non_empty(testcase, "id").is_some(),
        }
    }

    /// Splits non-empty fields into element attributes and custom fields,
    /// dropping everything not on either allow-list.
    fn classify_data(&self, testcase: &Record) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        let mut attrs = BTreeMap::new();
        let mut custom_fields = BTreeMap::new();

        for (key, value) in testcase {
            if is_empty_value(value) {
                continue;
            }
            if TESTCASE_ATTRS.contains(&key.as_str()) {
                attrs.insert(key.clone(), value_to_string(value));
            } else if self.known_custom_fields.contains(key) {
                custom_fields.insert(key.clone(), value_to_string(value));
            }
        }

        (attrs, custom_fields)
    }

    /// Manual testcases get their steps and expected results spelled out;
    /// automated ones get one step carrying the parameter declarations.
    fn add_test_steps(parent: &mut Element, testcase: &Record) {
        let steps = testcase.get("testSteps").and_then(Value::as_array);
        let results = testcase
            .get("expectedResults")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let automated = non_empty(testcase, "caseautomation").as_deref() == Some("automated");

        let test_steps = parent.add_child("test-steps");

        match steps {
            Some(steps) if !automated => {
                for (index, step) in steps.iter().enumerate() {
                    let test_step = test_steps.add_child("test-step");

                    let step_col = test_step.add_child("test-step-column");
                    step_col.set_attr("id", "step");
                    step_col.set_text(value_to_string(step));

                    let result_col = test_step.add_child("test-step-column");
                    result_col.set_attr("id", "expectedResult");
                    result_col
                        .set_text(results.get(index).map(value_to_string).unwrap_or_default());
                }
            }
            _ => {
                let test_step = test_steps.add_child("test-step");
                let step_col = test_step.add_child("test-step-column");
                step_col.set_attr("id", "step");

                if let Some(params) = testcase.get("params").and_then(Value::as_array) {
                    for param in params {
                        let param_el = step_col.add_child("parameter");
                        param_el.set_attr("name", value_to_string(param));
                        param_el.set_attr("scope", "local");
                    }
                }
            }
        }
    }

    /// Emits `linked-work-items`; items come either as plain ids or as
    /// mappings with an explicit role.
    fn add_linked_items(parent: &mut Element, testcase: &Record) {
        let linked = testcase
            .get("linked-items")
            .or_else(|| testcase.get("linked-work-items"))
            .filter(|v| !is_empty_value(v));
        let Some(linked) = linked else { return };

        let items: Vec<Value> = match linked {
            // several unprocessed ids in one string, skip them
            Value::String(s) if s.contains(',') || s.contains(' ') => return,
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };

        let lookup_method = non_empty(testcase, "linked-items-lookup-method")
            .filter(|m| m == "name" || m == "id");

        let linked_work_items = parent.add_child("linked-work-items");
        for item in items {
            let (work_item_id, role) = match &item {
                Value::String(id) => (Some(id.clone()), "verifies".to_string()),
                Value::Object(map) => (
                    map.get("id").and_then(Value::as_str).map(str::to_string),
                    map.get("role")
                        .and_then(Value::as_str)
                        .filter(|r| !r.is_empty())
                        .unwrap_or("verifies")
                        .to_string(),
                ),
                _ => (None, String::new()),
            };
            let Some(work_item_id) = work_item_id else {
                continue;
            };

            let work_item_el = linked_work_items.add_child("linked-work-item");
            work_item_el.set_attr("workitem-id", work_item_id);
            work_item_el.set_attr("role-id", role);
            if let Some(ref method) = lookup_method {
                work_item_el.set_attr("lookup-method", method.clone());
            }
        }
    }

    fn fill_custom_fields(parent: &mut Element, custom_fields: &BTreeMap<String, String>) {
        if custom_fields.is_empty() {
            return;
        }
        let custom_fields_el = parent.add_child("custom-fields");
        for (field, content) in custom_fields {
            let field_el = custom_fields_el.add_child("custom-field");
            // sorted attribute order: content before id
            field_el.set_attr("content", content.clone());
            field_el.set_attr("id", field.clone());
        }
    }

    fn is_whitelisted(&self, nodeid: &str) -> bool {
        if nodeid.is_empty() {
            return true;
        }
        if let Some(ref whitelist) = self.whitelist {
            if whitelist.is_match(nodeid) {
                return true;
            }
        }
        if let Some(ref blacklist) = self.blacklist {
            if blacklist.is_match(nodeid) {
                return false;
            }
        }
        true
    }

    fn testcase_element(&mut self, parent: &mut Element, testcase: Record) {
        let nodeid = non_empty(&testcase, "nodeid").unwrap_or_default();
        if !self.is_whitelisted(&nodeid) {
            tracing::debug!("Skipping blacklisted node: {nodeid}");
            return;
        }

        let Some(mut testcase) = self.pipeline.run(testcase) else {
            return;
        };

        let title = non_empty(&testcase, "title");

        self.set_lookup_prop(&testcase);
        if !self.check_lookup_prop(&testcase) {
            tracing::warn!(
                "Skipping testcase `{}`, data missing for selected lookup method",
                non_empty(&testcase, "id").or(title.clone()).unwrap_or_default()
            );
            return;
        }

        // make sure the id is set even for the "name" lookup method
        if non_empty(&testcase, "id").is_none() && self.lookup == Some(LookupMethod::Name) {
            if let Some(ref title) = title {
                testcase.insert("id".to_string(), Value::String(title.clone()));
            }
        }

        let (attrs, custom_fields) = self.classify_data(&testcase);

        let testcase_el = parent.add_child("testcase");
        for (name, value) in &attrs {
            testcase_el.set_attr(name.clone(), value.clone());
        }

        testcase_el
            .add_child("title")
            .set_text(title.unwrap_or_default());

        if let Some(description) = non_empty(&testcase, "description") {
            testcase_el.add_child("description").set_text(description);
        }

        Self::add_test_steps(testcase_el, &testcase);
        Self::fill_custom_fields(testcase_el, &custom_fields);
        Self::add_linked_items(testcase_el, &testcase);
    }

    fn fill_testcases(&mut self, parent: &mut Element) -> Result<()> {
        if self.testcases_data.is_empty() {
            return Err(DumpError::nothing_to_export());
        }
        let testcases_data = self.testcases_data;
        for testcase in testcases_data {
            self.testcase_element(parent, testcase.clone());
        }
        Ok(())
    }

    /// Returns the complete testcases XML document.
    pub fn export(&mut self) -> Result<String> {
        let mut top = self.top_element();
        self.properties_element(&mut top)?;
        self.fill_testcases(&mut top)?;
        self.fill_lookup_prop(&mut top)?;
        Ok(top.to_pretty_string())
    }

    /// Writes the XML out, generating a timestamped filename when the output
    /// location is a directory or unset.
    pub fn write_xml(xml: &str, output_loc: Option<&Path>) -> Result<PathBuf> {
        let gen_filename = format!("testcases-{}.xml", utils::utc_timestamp());
        utils::write_xml(xml, output_loc, &gen_filename)
    }
}

/// Joins regex fragments into one alternation, the way the exporter gates on
/// the `nodeid` field.
pub(crate) fn compile_patterns(patterns: &[String]) -> Result<Option<Regex>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let joined = format!("({})", patterns.join(")|("));
    let regex = Regex::new(&joined).map_err(|err| DumpError::ConfigError {
        message: format!("invalid test filter pattern: {err}"),
    })?;
    Ok(Some(regex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Config {
        let mut config = Config {
            polarion_project_id: "RHCF3".to_string(),
            use_run_id: Some(false),
            ..Config::default()
        };
        config
            .testcase_import_properties
            .insert("lookup-method".to_string(), json!("name"));
        config
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_export_minimal_testcase() {
        let data = vec![record(&[("title", json!("test_minimal"))])];
        let config = config();
        let mut export = TestcaseExport::new(&data, &config).unwrap();
        let xml = export.export().unwrap();

        assert!(xml.contains("<testcases project-id=\"RHCF3\">"));
        assert!(xml.contains("<property name=\"lookup-method\" value=\"name\"/>"));
        assert!(xml.contains("<title>test_minimal</title>"));
        // id mirrors the title under the name lookup method
        assert!(xml.contains("<testcase id=\"test_minimal\">"));
        // built-in custom field defaults
        assert!(xml.contains("<custom-field content=\"automated\" id=\"caseautomation\"/>"));
        assert!(xml.contains("<custom-field content=\"high\" id=\"caseimportance\"/>"));
        assert!(xml.contains("<custom-field content=\"functional\" id=\"testtype\"/>"));
    }

    #[test]
    fn test_manual_steps_are_spelled_out() {
        let data = vec![record(&[
            ("title", json!("test_manual")),
            ("caseautomation", json!("manualonly")),
            ("testSteps", json!(["step one", "step two"])),
            ("expectedResults", json!(["result one"])),
        ])];
        let config = config();
        let mut export = TestcaseExport::new(&data, &config).unwrap();
        let xml = export.export().unwrap();

        assert!(xml.contains("<test-step-column id=\"step\">step one</test-step-column>"));
        assert!(xml.contains(
            "<test-step-column id=\"expectedResult\">result one</test-step-column>"
        ));
        // missing expected result renders empty
        assert!(xml.contains("<test-step-column id=\"expectedResult\"/>"));
    }

    #[test]
    fn test_automated_testcase_lists_parameters() {
        let data = vec![record(&[
            ("title", json!("test_params")),
            ("params", json!(["param1", "param2"])),
        ])];
        let config = config();
        let mut export = TestcaseExport::new(&data, &config).unwrap();
        let xml = export.export().unwrap();

        assert!(xml.contains("<parameter name=\"param1\" scope=\"local\"/>"));
        assert!(xml.contains("<parameter name=\"param2\" scope=\"local\"/>"));
    }

    #[test]
    fn test_polarion_field_aliases() {
        let data = vec![record(&[
            ("title", json!("test_fields")),
            ("assignee", json!("someuser")),
            ("dueDate", json!("2018-09-30")),
            ("status", json!("proposed")),
        ])];
        let config = config();
        let mut export = TestcaseExport::new(&data, &config).unwrap();
        let xml = export.export().unwrap();

        assert!(xml.contains("assignee-id=\"someuser\""));
        assert!(xml.contains("due-date=\"2018-09-30\""));
        assert!(xml.contains("status-id=\"proposed\""));
    }

    #[test]
    fn test_linked_work_items() {
        let data = vec![record(&[
            ("title", json!("test_linked")),
            (
                "linkedWorkItems",
                json!([{"id": "ITEM01", "role": "derived_from"}, "ITEM02"]),
            ),
        ])];
        let config = config();
        let mut export = TestcaseExport::new(&data, &config).unwrap();
        let xml = export.export().unwrap();

        assert!(xml.contains(
            "<linked-work-item workitem-id=\"ITEM01\" role-id=\"derived_from\"/>"
        ));
        assert!(xml.contains("<linked-work-item workitem-id=\"ITEM02\" role-id=\"verifies\"/>"));
    }

    #[test]
    fn test_blacklisted_nodes_are_skipped() {
        let mut config = config();
        config.blacklisted_tests = vec!["test_drop".to_string()];
        let data = vec![
            record(&[("title", json!("test_keep")), ("nodeid", json!("a/test_keep"))]),
            record(&[("title", json!("test_drop")), ("nodeid", json!("a/test_drop"))]),
        ];
        let mut export = TestcaseExport::new(&data, &config).unwrap();
        let xml = export.export().unwrap();

        assert!(xml.contains("test_keep"));
        assert!(!xml.contains("<title>test_drop</title>"));
    }

    #[test]
    fn test_whitelist_wins_over_blacklist() {
        let mut config = config();
        config.whitelisted_tests = vec!["test_both".to_string()];
        config.blacklisted_tests = vec!["test_both".to_string()];
        let data = vec![record(&[
            ("title", json!("test_both")),
            ("nodeid", json!("a/test_both")),
        ])];
        let mut export = TestcaseExport::new(&data, &config).unwrap();
        let xml = export.export().unwrap();
        assert!(xml.contains("<title>test_both</title>"));
    }

    #[test]
    fn test_empty_data_is_nothing_to_export() {
        let data = vec![];
        let config = config();
        let mut export = TestcaseExport::new(&data, &config).unwrap();
        assert!(matches!(export.export(), Err(DumpError::NothingToDo(_))));
    }

    #[test]
    fn test_project_default_fields_apply() {
        let mut config = config();
        config
            .default_fields
            .insert("casecomponent".to_string(), json!("appl"));
        let data = vec![record(&[("title", json!("test_defaults"))])];
        let mut export = TestcaseExport::new(&data, &config).unwrap();
        let xml = export.export().unwrap();
        assert!(xml.contains("<custom-field content=\"appl\" id=\"casecomponent\"/>"));
    }
}
