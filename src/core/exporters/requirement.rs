//! Builds the requirement XML consumed by the work-item importer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::Config;
use crate::core::transform::{get_requirements_transform, RequirementTransform};
use crate::domain::model::{is_empty_value, non_empty, value_to_string, LookupMethod, Record};
use crate::utils;
use crate::utils::error::{DumpError, Result};
use crate::utils::xml::Element;

/// Fields emitted as attributes of the `requirement` element, with the
/// defaults filled in when a field is missing or empty.
const REQ_ATTRS: &[(&str, Option<&str>)] = &[
    ("approver-ids", None),
    ("assignee-id", None),
    ("category-ids", None),
    ("due-date", None),
    ("initial-estimate", None),
    ("planned-in-ids", None),
    ("priority-id", Some("high")),
    ("severity-id", Some("should_have")),
    ("status-id", None),
];

const FIELD_MAPPING: &[(&str, &str)] = &[
    ("assignee-id", "assignee"),
    ("due-date", "dueDate"),
    ("initial-estimate", "initialEstimate"),
    ("planned-in-ids", "plannedIn"),
    ("priority-id", "priority"),
    ("severity-id", "severity"),
    ("status-id", "status"),
];

const CUSTOM_FIELDS: &[(&str, Option<&str>)] = &[("reqtype", Some("functional"))];

/// Normalization pipeline run on each requirement before serialization.
struct RequirementPipeline {
    default_fields: BTreeMap<String, String>,
    transform: Box<dyn RequirementTransform>,
}

impl RequirementPipeline {
    fn new(config: &Config, transform: Box<dyn RequirementTransform>) -> Self {
        let default_fields = config
            .requirements_default_fields
            .iter()
            .filter(|(_, value)| !is_empty_value(value))
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect();
        RequirementPipeline {
            default_fields,
            transform,
        }
    }

    fn fill_project_defaults(&self, requirement: Record) -> Record {
        let mut filled: Record = self
            .default_fields
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        for (key, value) in requirement {
            filled.insert(key, value);
        }
        filled
    }

    fn fill_polarion_fields(requirement: &mut Record) {
        for (importer_field, polarion_field) in FIELD_MAPPING {
            let polarion_value = requirement.get(*polarion_field).cloned();
            let Some(polarion_value) = polarion_value.filter(|v| !is_empty_value(v)) else {
                continue;
            };
            let unset = requirement
                .get(*importer_field)
                .map(is_empty_value)
                .unwrap_or(true);
            if unset {
                requirement.insert(importer_field.to_string(), polarion_value);
            }
        }
    }

    fn fill_defaults(requirement: &mut Record) {
        for defaults in [REQ_ATTRS, CUSTOM_FIELDS] {
            for (key, default) in defaults {
                let Some(default) = default else { continue };
                let unset = requirement.get(*key).map(is_empty_value).unwrap_or(true);
                if unset {
                    requirement.insert(key.to_string(), Value::String(default.to_string()));
                }
            }
        }
    }

    fn run(&mut self, requirement: Record) -> Option<Record> {
        let mut requirement = self.fill_project_defaults(requirement);
        Self::fill_polarion_fields(&mut requirement);
        let mut requirement = self.transform.transform(requirement)?;

        if non_empty(&requirement, "title").is_none() {
            tracing::warn!("Skipping requirement, title is missing");
            return None;
        }

        Self::fill_defaults(&mut requirement);
        Some(requirement)
    }
}

/// Export of requirements into the XML representation.
pub struct RequirementExport<'a> {
    requirements_data: &'a [Record],
    config: &'a Config,
    lookup: Option<LookupMethod>,
    pipeline: RequirementPipeline,
    known_custom_fields: BTreeSet<String>,
}

impl<'a> RequirementExport<'a> {
    pub fn new(requirements_data: &'a [Record], config: &'a Config) -> Self {
        Self::with_transform(requirements_data, config, get_requirements_transform(config))
    }

    /// Uses the given transform instead of the one selected by project id.
    pub fn with_transform(
        requirements_data: &'a [Record],
        config: &'a Config,
        transform: Box<dyn RequirementTransform>,
    ) -> Self {
        let mut known_custom_fields: BTreeSet<String> = CUSTOM_FIELDS
            .iter()
            .map(|(key, _)| key.to_string())
            .collect();
        known_custom_fields.extend(config.requirements_custom_fields.iter().cloned());

        RequirementExport {
            requirements_data,
            config,
            lookup: None,
            pipeline: RequirementPipeline::new(config, transform),
            known_custom_fields,
        }
    }

    fn top_element(&self) -> Element {
        let mut top = Element::new("requirements");
        // sorted attribute order
        if let Some(ref path) = self.config.requirements_document_relative_path {
            top.set_attr("document-relative-path", path.clone());
        }
        top.set_attr("project-id", self.config.project_id());
        top
    }

    fn properties_element(&mut self, parent: &mut Element) -> Result<()> {
        let properties = parent.add_child("properties");

        for (name, value) in &self.config.requirements_import_properties {
            if name == "lookup-method" {
                let raw = value_to_string(value).to_lowercase();
                let lookup = LookupMethod::parse(&raw).filter(|m| *m != LookupMethod::Custom);
                self.lookup = Some(lookup.ok_or_else(|| DumpError::InvalidProperty {
                    key: name.clone(),
                    value: value_to_string(value),
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

    /// Establishes the lookup method from the first requirement when not
    /// configured; a missing id only disqualifies a requirement under the
    /// `id` method.
    fn check_lookup_prop(&mut self, req_id: Option<&str>) -> bool {
        match self.lookup {
            Some(LookupMethod::Id) => req_id.is_some(),
            Some(_) => true,
            None => {
                self.lookup = Some(if req_id.is_some() {
                    LookupMethod::Id
                } else {
                    LookupMethod::Name
                });
                true
            }
        }
    }

    /// Splits non-empty fields into element attributes and custom fields.
    /// Underscored keys are also tried in their dashed spelling.
    fn classify_data(&self, requirement: &Record) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        let mut attrs = BTreeMap::new();
        let mut custom_fields = BTreeMap::new();
        let attr_keys: Vec<&str> = REQ_ATTRS.iter().map(|(key, _)| *key).collect();

        for (key, value) in requirement {
            if is_empty_value(value) {
                continue;
            }
            let dashed = key.replace('_', "-");
            for key_variant in [dashed.as_str(), key.as_str()] {
                if attr_keys.contains(&key_variant) {
                    attrs.insert(key_variant.to_string(), value_to_string(value));
                } else if self.known_custom_fields.contains(key_variant) {
                    custom_fields.insert(key_variant.to_string(), value_to_string(value));
                }
                if dashed == *key {
                    break;
                }
            }
        }

        (attrs, custom_fields)
    }

    fn fill_custom_fields(parent: &mut Element, custom_fields: &BTreeMap<String, String>) {
        if custom_fields.is_empty() {
            return;
        }
        let custom_fields_el = parent.add_child("custom-fields");
        for (field, content) in custom_fields {
            let field_el = custom_fields_el.add_child("custom-field");
            field_el.set_attr("content", content.clone());
            field_el.set_attr("id", field.clone());
        }
    }

    fn requirement_element(&mut self, parent: &mut Element, requirement: Record) {
        let Some(requirement) = self.pipeline.run(requirement) else {
            return;
        };

        let title = non_empty(&requirement, "title");
        let req_id = non_empty(&requirement, "id");

        if !self.check_lookup_prop(req_id.as_deref()) {
            tracing::warn!(
                "Skipping requirement `{}`, data missing for selected lookup method",
                title.as_deref().unwrap_or("")
            );
            return;
        }

        let (attrs, custom_fields) = self.classify_data(&requirement);

        let requirement_el = parent.add_child("requirement");
        for (name, value) in &attrs {
            requirement_el.set_attr(name.clone(), value.clone());
        }

        requirement_el
            .add_child("title")
            .set_text(title.unwrap_or_default());

        if let Some(description) = non_empty(&requirement, "description") {
            requirement_el.add_child("description").set_text(description);
        }

        Self::fill_custom_fields(requirement_el, &custom_fields);
    }

    fn fill_requirements(&mut self, parent: &mut Element) -> Result<()> {
        if self.requirements_data.is_empty() {
            return Err(DumpError::nothing_to_export());
        }
        let requirements_data = self.requirements_data;
        for requirement in requirements_data {
            self.requirement_element(parent, requirement.clone());
        }
        Ok(())
    }

    /// Returns the complete requirements XML document.
    pub fn export(&mut self) -> Result<String> {
        let mut top = self.top_element();
        self.properties_element(&mut top)?;
        self.fill_requirements(&mut top)?;
        self.fill_lookup_prop(&mut top)?;
        Ok(top.to_pretty_string())
    }

    /// Writes the XML out, generating a timestamped filename when the output
    /// location is a directory or unset.
    pub fn write_xml(xml: &str, output_loc: Option<&Path>) -> Result<PathBuf> {
        let gen_filename = format!("requirements-{}.xml", utils::utc_timestamp());
        utils::write_xml(xml, output_loc, &gen_filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Config {
        Config {
            polarion_project_id: "RHCF3".to_string(),
            ..Config::default()
        }
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_export_minimal_requirement() {
        let data = vec![record(&[("title", json!("requirement_minimal"))])];
        let config = config();
        let mut export = RequirementExport::new(&data, &config);
        let xml = export.export().unwrap();

        assert!(xml.contains("<requirements project-id=\"RHCF3\">"));
        assert!(xml.contains("<title>requirement_minimal</title>"));
        // attribute defaults, sorted
        assert!(xml.contains(
            "<requirement priority-id=\"high\" severity-id=\"should_have\">"
        ));
        assert!(xml.contains("<custom-field content=\"functional\" id=\"reqtype\"/>"));
        // no id anywhere, so lookup falls back to name
        assert!(xml.contains("<property name=\"lookup-method\" value=\"name\"/>"));
    }

    #[test]
    fn test_polarion_field_aliases() {
        let data = vec![record(&[
            ("title", json!("requirement_full")),
            ("assignee", json!("someuser")),
            ("priority", json!("low")),
            ("severity", json!("nice_to_have")),
            ("plannedIn", json!("planned_id1")),
        ])];
        let config = config();
        let mut export = RequirementExport::new(&data, &config);
        let xml = export.export().unwrap();

        assert!(xml.contains("assignee-id=\"someuser\""));
        assert!(xml.contains("planned-in-ids=\"planned_id1\""));
        assert!(xml.contains("priority-id=\"low\""));
        assert!(xml.contains("severity-id=\"nice_to_have\""));
    }

    #[test]
    fn test_underscored_keys_get_dashed() {
        let data = vec![record(&[
            ("title", json!("requirement_keys")),
            ("category_ids", json!("cat1")),
        ])];
        let config = config();
        let mut export = RequirementExport::new(&data, &config);
        let xml = export.export().unwrap();
        assert!(xml.contains("category-ids=\"cat1\""));
    }

    #[test]
    fn test_missing_title_is_skipped() {
        let data = vec![
            record(&[("description", json!("no title here"))]),
            record(&[("title", json!("requirement_ok"))]),
        ];
        let config = config();
        let mut export = RequirementExport::new(&data, &config);
        let xml = export.export().unwrap();
        assert!(!xml.contains("no title here"));
        assert!(xml.contains("requirement_ok"));
    }

    #[test]
    fn test_cloudtp_requirement_defaults() {
        let config = Config {
            polarion_project_id: "CLOUDTP".to_string(),
            ..Config::default()
        };
        let data = vec![record(&[
            ("id", json!("REQ-1")),
            ("title", json!("requirement_cloudtp")),
        ])];
        let mut export = RequirementExport::new(&data, &config);
        let xml = export.export().unwrap();

        // the project transform drops the id and fills workflow defaults
        assert!(xml.contains("assignee-id=\"mkourim\""));
        assert!(xml.contains("approver-ids=\"mkourim:approved\""));
        assert!(!xml.contains("REQ-1"));
        assert!(xml.contains("<property name=\"lookup-method\" value=\"name\"/>"));
    }

    #[test]
    fn test_document_relative_path_attribute() {
        let config = Config {
            polarion_project_id: "RHCF3".to_string(),
            requirements_document_relative_path: Some("testing/requirements".to_string()),
            ..Config::default()
        };
        let data = vec![record(&[("title", json!("requirement_doc"))])];
        let mut export = RequirementExport::new(&data, &config);
        let xml = export.export().unwrap();
        assert!(xml.contains(
            "<requirements document-relative-path=\"testing/requirements\" project-id=\"RHCF3\">"
        ));
    }

    #[test]
    fn test_empty_data_is_nothing_to_export() {
        let data = vec![];
        let config = config();
        let mut export = RequirementExport::new(&data, &config);
        assert!(matches!(export.export(), Err(DumpError::NothingToDo(_))));
    }

    #[test]
    fn test_custom_lookup_method_is_rejected() {
        let mut config = config();
        config
            .requirements_import_properties
            .insert("lookup-method".to_string(), json!("custom"));
        let data = vec![record(&[("title", json!("requirement_x"))])];
        let mut export = RequirementExport::new(&data, &config);
        assert!(matches!(
            export.export(),
            Err(DumpError::InvalidProperty { .. })
        ));
    }
}
