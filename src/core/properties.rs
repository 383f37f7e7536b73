//! Manipulation of properties inside already-built importer XML documents.

use rand::seq::SliceRandom;

use crate::utils::error::{DumpError, Result};
use crate::utils::xml::Element;

fn unexpected_format() -> DumpError {
    DumpError::UnexpectedFormat(String::new())
}

/// Sets a property to the given value, appending it when missing.
fn set_property(properties: &mut Element, name: &str, value: &str) {
    for prop in properties.elements_mut() {
        if prop.attr("name") == Some(name) {
            prop.set_attr("value", value);
            return;
        }
    }
    let property = properties.add_child("property");
    property.set_attr("name", name);
    property.set_attr("value", value);
}

/// Finds the testrun-level properties block; testcases and requirements
/// documents have none.
fn get_testrun_properties(xml_root: &mut Element) -> Result<Option<&mut Element>> {
    match xml_root.tag.as_str() {
        "testcases" | "requirements" => Ok(None),
        "testsuites" => match xml_root.find_mut("properties") {
            Some(properties) => Ok(Some(properties)),
            None => Err(DumpError::UnexpectedFormat(
                " - missing <properties>".to_string(),
            )),
        },
        _ => Err(DumpError::UnexpectedFormat(
            " - missing <testsuites>".to_string(),
        )),
    }
}

/// Adds the polarion-testrun-id property when it is missing.
pub fn xunit_fill_testrun_id(xml_root: &mut Element, testrun_id: &str) -> Result<()> {
    let Some(properties) = get_testrun_properties(xml_root)? else {
        return Ok(());
    };
    let already_set = properties
        .elements()
        .any(|prop| prop.attr("name") == Some("polarion-testrun-id"));
    if already_set {
        return Ok(());
    }
    if testrun_id.is_empty() {
        return Err(DumpError::ConfigError {
            message: "missing testrun id".to_string(),
        });
    }
    let property = properties.add_child("property");
    property.set_attr("name", "polarion-testrun-id");
    property.set_attr("value", testrun_id);
    Ok(())
}

/// Sets the polarion-testrun-title property.
pub fn xunit_fill_testrun_title(xml_root: &mut Element, testrun_title: &str) -> Result<()> {
    let Some(properties) = get_testrun_properties(xml_root)? else {
        return Ok(());
    };
    set_property(properties, "polarion-testrun-title", testrun_title);
    Ok(())
}

/// Generates a response property, filling in defaults for missing parts.
/// The generated value is 12 distinct lowercase letters.
pub fn generate_response_property(
    name: Option<&str>,
    value: Option<&str>,
) -> (String, String) {
    let name = name.filter(|n| !n.is_empty()).unwrap_or("polarion-dump");
    let value = match value.filter(|v| !v.is_empty()) {
        Some(value) => value.to_string(),
        None => {
            let mut letters: Vec<char> = ('a'..='z').collect();
            letters.shuffle(&mut rand::thread_rng());
            letters.into_iter().take(12).collect()
        }
    };
    (name.to_string(), value)
}

fn fill_testsuites_response_property(
    xml_root: &mut Element,
    name: &str,
    value: &str,
) -> Result<(String, String)> {
    let Some(properties) = xml_root.find_mut("properties") else {
        return Err(unexpected_format());
    };

    for prop in properties.elements() {
        let prop_name = prop.attr("name").unwrap_or_default();
        if let Some(response_name) = prop_name.strip_prefix("polarion-response-") {
            return Ok((
                response_name.to_string(),
                prop.attr("value").unwrap_or_default().to_string(),
            ));
        }
    }

    let property = properties.add_child("property");
    property.set_attr("name", format!("polarion-response-{name}"));
    property.set_attr("value", value);
    Ok((name.to_string(), value.to_string()))
}

fn fill_non_testsuites_response_property(
    xml_root: &mut Element,
    name: &str,
    value: &str,
) -> (String, String) {
    if xml_root.find("response-properties").is_none() {
        // response properties need to be on top
        xml_root.insert_first(Element::new("response-properties"));
    }
    let Some(properties) = xml_root.find_mut("response-properties") else {
        return (name.to_string(), value.to_string());
    };

    if let Some(prop) = properties
        .elements()
        .find(|prop| prop.tag == "response-property")
    {
        let prop_name = prop.attr("name").unwrap_or_default();
        let prop_value = prop.attr("value").unwrap_or_default();
        if !prop_name.is_empty() && !prop_value.is_empty() {
            return (prop_name.to_string(), prop_value.to_string());
        }
        return (name.to_string(), value.to_string());
    }

    let property = properties.add_child("response-property");
    property.set_attr("name", name);
    property.set_attr("value", value);
    (name.to_string(), value.to_string())
}

/// Returns the response property of the document, filling one in when
/// missing.
pub fn fill_response_property(
    xml_root: &mut Element,
    name: Option<&str>,
    value: Option<&str>,
) -> Result<(String, String)> {
    let (name, value) = generate_response_property(name, value);
    match xml_root.tag.as_str() {
        "testsuites" => fill_testsuites_response_property(xml_root, &name, &value),
        "testcases" | "requirements" => {
            Ok(fill_non_testsuites_response_property(xml_root, &name, &value))
        }
        _ => Err(unexpected_format()),
    }
}

/// Removes response properties if present.
pub fn remove_response_property(xml_root: &mut Element) -> Result<()> {
    match xml_root.tag.as_str() {
        "testsuites" => {
            if let Some(properties) = xml_root.find_mut("properties") {
                properties.retain_elements(|prop| {
                    !prop
                        .attr("name")
                        .unwrap_or_default()
                        .contains("polarion-response-")
                });
            }
            Ok(())
        }
        "testcases" | "requirements" => {
            xml_root.retain_elements(|child| child.tag != "response-properties");
            Ok(())
        }
        _ => Err(unexpected_format()),
    }
}

/// Removes every property whose name contains the given fragment.
pub fn remove_property(xml_root: &mut Element, partial_name: &str) -> Result<()> {
    if !matches!(
        xml_root.tag.as_str(),
        "testsuites" | "testcases" | "requirements"
    ) {
        return Err(unexpected_format());
    }
    if let Some(properties) = xml_root.find_mut("properties") {
        properties
            .retain_elements(|prop| !prop.attr("name").unwrap_or_default().contains(partial_name));
    }
    Ok(())
}

/// Changes the lookup method of an already-built document.
pub fn set_lookup_method(xml_root: &mut Element, value: &str) -> Result<()> {
    let prop_name = match xml_root.tag.as_str() {
        "testsuites" => "polarion-lookup-method",
        "testcases" | "requirements" => "lookup-method",
        _ => return Err(unexpected_format()),
    };
    let Some(properties) = xml_root.find_mut("properties") else {
        return Err(unexpected_format());
    };
    set_property(properties, prop_name, value);
    Ok(())
}

/// Sets dry-run so records are not updated, only a log file is produced.
pub fn set_dry_run(xml_root: &mut Element, value: bool) -> Result<()> {
    let prop_name = match xml_root.tag.as_str() {
        "testsuites" => "polarion-dry-run",
        "testcases" | "requirements" => "dry-run",
        _ => return Err(unexpected_format()),
    };
    let Some(properties) = xml_root.find_mut("properties") else {
        return Err(unexpected_format());
    };
    set_property(properties, prop_name, if value { "true" } else { "false" });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn testsuites_root() -> Element {
        Element::parse(
            r#"<testsuites>
                 <properties>
                   <property name="polarion-project-id" value="RHCF3"/>
                 </properties>
                 <testsuite/>
               </testsuites>"#,
        )
        .unwrap()
    }

    fn testcases_root() -> Element {
        Element::parse(
            r#"<testcases project-id="RHCF3">
                 <properties>
                   <property name="lookup-method" value="name"/>
                 </properties>
               </testcases>"#,
        )
        .unwrap()
    }

    #[test]
    fn test_fill_testrun_id_when_missing() {
        let mut root = testsuites_root();
        xunit_fill_testrun_id(&mut root, "5_8_0_17").unwrap();
        let xml = root.to_pretty_string();
        assert!(xml.contains("<property name=\"polarion-testrun-id\" value=\"5_8_0_17\"/>"));

        // a present id is never overwritten
        xunit_fill_testrun_id(&mut root, "other").unwrap();
        assert!(!root.to_pretty_string().contains("other"));
    }

    #[test]
    fn test_fill_testrun_id_requires_value() {
        let mut root = testsuites_root();
        assert!(matches!(
            xunit_fill_testrun_id(&mut root, ""),
            Err(DumpError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_fill_testrun_id_ignores_testcases_doc() {
        let mut root = testcases_root();
        xunit_fill_testrun_id(&mut root, "5_8_0_17").unwrap();
        assert!(!root.to_pretty_string().contains("polarion-testrun-id"));
    }

    #[test]
    fn test_set_testrun_title_overwrites() {
        let mut root = testsuites_root();
        xunit_fill_testrun_title(&mut root, "first").unwrap();
        xunit_fill_testrun_title(&mut root, "second").unwrap();
        let xml = root.to_pretty_string();
        assert!(xml.contains("<property name=\"polarion-testrun-title\" value=\"second\"/>"));
        assert!(!xml.contains("first"));
    }

    #[test]
    fn test_generate_response_property() {
        let (name, value) = generate_response_property(None, None);
        assert_eq!(name, "polarion-dump");
        assert_eq!(value.len(), 12);
        assert!(value.chars().all(|c| c.is_ascii_lowercase()));

        let (name, value) = generate_response_property(Some("rp"), Some("fixed"));
        assert_eq!((name.as_str(), value.as_str()), ("rp", "fixed"));
    }

    #[test]
    fn test_fill_response_property_testsuites() {
        let mut root = testsuites_root();
        let (name, value) =
            fill_response_property(&mut root, Some("rp"), Some("abc")).unwrap();
        assert_eq!((name.as_str(), value.as_str()), ("rp", "abc"));
        assert!(root
            .to_pretty_string()
            .contains("<property name=\"polarion-response-rp\" value=\"abc\"/>"));

        // an existing response property wins over the requested one
        let (name, value) =
            fill_response_property(&mut root, Some("other"), Some("xyz")).unwrap();
        assert_eq!((name.as_str(), value.as_str()), ("rp", "abc"));
    }

    #[test]
    fn test_fill_response_property_testcases() {
        let mut root = testcases_root();
        fill_response_property(&mut root, Some("rp"), Some("abc")).unwrap();
        let xml = root.to_pretty_string();
        assert!(xml.contains("<response-property name=\"rp\" value=\"abc\"/>"));
        // the response-properties element goes first
        let response_pos = xml.find("<response-properties>").unwrap();
        let properties_pos = xml.find("<properties>").unwrap();
        assert!(response_pos < properties_pos);
    }

    #[test]
    fn test_remove_response_property() {
        let mut root = testsuites_root();
        fill_response_property(&mut root, Some("rp"), Some("abc")).unwrap();
        remove_response_property(&mut root).unwrap();
        assert!(!root.to_pretty_string().contains("polarion-response"));

        let mut root = testcases_root();
        fill_response_property(&mut root, Some("rp"), Some("abc")).unwrap();
        remove_response_property(&mut root).unwrap();
        assert!(!root.to_pretty_string().contains("response-propert"));
    }

    #[test]
    fn test_set_lookup_method_per_document_kind() {
        let mut root = testsuites_root();
        set_lookup_method(&mut root, "id").unwrap();
        assert!(root
            .to_pretty_string()
            .contains("<property name=\"polarion-lookup-method\" value=\"id\"/>"));

        let mut root = testcases_root();
        set_lookup_method(&mut root, "id").unwrap();
        assert!(root
            .to_pretty_string()
            .contains("<property name=\"lookup-method\" value=\"id\"/>"));
    }

    #[test]
    fn test_set_dry_run() {
        let mut root = testsuites_root();
        set_dry_run(&mut root, true).unwrap();
        assert!(root
            .to_pretty_string()
            .contains("<property name=\"polarion-dry-run\" value=\"true\"/>"));
    }

    #[test]
    fn test_unexpected_root_is_rejected() {
        let mut root = Element::new("report");
        assert!(set_dry_run(&mut root, true).is_err());
        assert!(fill_response_property(&mut root, None, None).is_err());
        assert!(remove_response_property(&mut root).is_err());
    }
}
