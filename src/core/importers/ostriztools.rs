//! Importer for the Ostriz telemetry JSON feed (local file or URL).

use std::path::Path;

use serde_json::{Map, Value};

use crate::domain::model::{ImportedData, Record};
use crate::utils::error::{DumpError, Result};

/// Browser noise that must not end up as testcase parameters.
const IGNORED_PARAMS: &[&str] = &["browserVersion", "browserPlatform", "browserName"];

fn get_json(location: &str) -> Result<Map<String, Value>> {
    let unreadable = |details: String| DumpError::SourceUnreadable {
        location: location.to_string(),
        details,
    };

    let text = if Path::new(location).is_file() {
        std::fs::read_to_string(location).map_err(|err| unreadable(err.to_string()))?
    } else if location.starts_with("http") {
        let response = reqwest::blocking::get(location).map_err(|err| unreadable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(unreadable(format!("failed to download: {}", response.status())));
        }
        response.text().map_err(|err| unreadable(err.to_string()))?
    } else {
        return Err(unreadable("invalid location".to_string()));
    };

    let document: Value =
        serde_json::from_str(&text).map_err(|err| unreadable(err.to_string()))?;
    Ok(document
        .get("tests")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default())
}

/// Derives the testrun id from a build version string.
///
/// Trailing date/hash suffixes separated by `-` or `_` are stripped; at
/// least 4 numeric dot-components are required, and the 4th is zero-padded
/// to two digits (`5.8.0.7-20170525183055_6317a22` -> `5_8_0_07`).
fn get_testrun_id(build: &str) -> Result<String> {
    let base = build
        .split('-')
        .next()
        .unwrap_or_default()
        .split('_')
        .next()
        .unwrap_or_default();

    let components: Vec<u64> = base
        .split('.')
        .map(|part| part.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| DumpError::MissingTestrunId(build.to_string()))?;
    if components.len() < 4 {
        return Err(DumpError::MissingTestrunId(build.to_string()));
    }

    let formatted: Vec<String> = components
        .iter()
        .enumerate()
        .map(|(index, &component)| {
            if index == 3 && component < 10 {
                format!("{component:02}")
            } else {
                component.to_string()
            }
        })
        .collect();
    Ok(formatted.join("_"))
}

/// Duration in seconds, sub-second precision preserved.
fn calculate_duration(test_data: &Map<String, Value>) -> f64 {
    let start = test_data.get("start_time").and_then(Value::as_f64);
    let finish = test_data.get("finish_time").and_then(Value::as_f64);
    match (start, finish) {
        (Some(start), Some(finish)) if start > 0.0 && finish > 0.0 => finish - start,
        _ => 0.0,
    }
}

/// Test name out of the full test path.
fn get_testname(test_path: &str) -> Option<String> {
    test_path
        .find(".py/")
        .map(|pos| test_path[pos + 4..].to_string())
}

fn filter_parameters(parameters: &Value) -> Option<Value> {
    let parameters = parameters.as_object()?;
    if parameters.is_empty() {
        return None;
    }
    let filtered: Map<String, Value> = parameters
        .iter()
        .filter(|(param, _)| !IGNORED_PARAMS.contains(&param.as_str()))
        .map(|(param, value)| (param.clone(), value.clone()))
        .collect();
    Some(Value::Object(filtered))
}

/// Comment for a testcase that was skipped because of a tracked blocker.
fn blocker_comment(test_data: &Map<String, Value>) -> String {
    let skipped = test_data
        .get("skipped")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if skipped.get("type").and_then(Value::as_str) != Some("blocker") {
        return String::new();
    }

    let reason = skipped
        .get("reason")
        .filter(|r| !r.is_null())
        .or_else(|| test_data.get("issues").filter(|r| !r.is_null()));
    match reason {
        Some(Value::String(reason)) if !reason.is_empty() => format!("blocker: {reason}"),
        Some(Value::Array(items)) if !items.is_empty() => {
            let joined: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            format!("blocker: {}", joined.join(", "))
        }
        _ => "Couldn't find reason for blocker skip".to_string(),
    }
}

fn append_record(test_path: &str, test_data: &Map<String, Value>, results: &mut Vec<Record>) {
    let statuses = test_data
        .get("statuses")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let jenkins = test_data
        .get("jenkins")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let title = test_data
        .get("test_name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| get_testname(test_path));

    let mut record = Record::new();
    record.insert("title".to_string(), title.map(Value::String).unwrap_or(Value::Null));
    record.insert(
        "verdict".to_string(),
        statuses.get("overall").cloned().unwrap_or(Value::Null),
    );
    record.insert(
        "source".to_string(),
        test_data.get("source").cloned().unwrap_or(Value::Null),
    );
    record.insert(
        "job_name".to_string(),
        jenkins.get("job_name").cloned().unwrap_or(Value::Null),
    );
    record.insert(
        "run".to_string(),
        jenkins.get("build_number").cloned().unwrap_or(Value::Null),
    );
    record.insert(
        "comment".to_string(),
        Value::String(blocker_comment(test_data)),
    );
    if let Some(params) = test_data.get("params").and_then(|p| filter_parameters(p)) {
        record.insert("params".to_string(), params);
    }
    record.insert(
        "time".to_string(),
        Value::from(calculate_duration(test_data)),
    );

    // polarion test id may come as a single-element list
    if let Some(test_id) = test_data.get("polarion") {
        let test_id = match test_id {
            Value::Array(items) => items.first().cloned(),
            Value::Null => None,
            other => Some(other.clone()),
        };
        if let Some(test_id) = test_id {
            record.insert("test_id".to_string(), test_id);
        }
    }

    results.push(record);
}

fn parse_ostriz(location: &str, ostriz_data: Map<String, Value>) -> Result<ImportedData> {
    if ostriz_data.is_empty() {
        return Err(DumpError::NothingToDo("No data to import".to_string()));
    }

    let mut results = Vec::new();
    let mut found_build: Option<String> = None;
    let mut last_finish_time = 0.0_f64;

    for (test_path, test_data) in &ostriz_data {
        let Some(test_data) = test_data.as_object() else {
            continue;
        };
        let Some(curr_build) = test_data.get("build").and_then(Value::as_str) else {
            continue;
        };

        // the first build seen fixes the active build; mixed uploads from
        // other deploy cycles are skipped
        let build = found_build.get_or_insert_with(|| curr_build.to_string());
        if build.as_str() != curr_build {
            continue;
        }

        if test_data.get("statuses").map_or(true, Value::is_null) {
            continue;
        }

        append_record(test_path, test_data, &mut results);
        let finish = test_data.get("finish_time").and_then(Value::as_f64).unwrap_or(0.0);
        if finish > last_finish_time {
            last_finish_time = finish;
        }
    }

    if last_finish_time > 0.0 {
        tracing::info!("Last result finished at {}", last_finish_time);
    }

    let build = found_build.ok_or_else(|| DumpError::MissingTestrunId(location.to_string()))?;
    if results.is_empty() {
        return Err(DumpError::NoResults {
            location: location.to_string(),
        });
    }

    Ok(ImportedData {
        testrun: Some(get_testrun_id(&build)?),
        results,
    })
}

/// Reads Ostriz data from a file path or URL and returns imported data.
pub fn import_ostriz(location: &str) -> Result<ImportedData> {
    let ostriz_data = get_json(location)?;
    parse_ostriz(location, ostriz_data)
}
