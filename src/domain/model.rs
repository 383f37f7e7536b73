//! Core data model shared by importers, transforms and exporters.

use serde_json::Value;

/// A single test result or work item: an ordered mapping from normalized
/// field name to a loosely-typed value. Column order of the source format is
/// preserved (serde_json is built with `preserve_order`).
pub type Record = serde_json::Map<String, Value>;

/// Uniform output of every format importer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedData {
    pub results: Vec<Record>,
    pub testrun: Option<String>,
}

/// Canonical outcome classes. Raw verdict strings outside the synonym table
/// classify to `None` and the record is excluded from result export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
    Skipped,
    Waiting,
}

impl Verdict {
    pub const PASS: &'static [&'static str] = &["passed", "pass"];
    pub const FAIL: &'static [&'static str] = &["failed", "fail"];
    pub const SKIP: &'static [&'static str] = &["skipped", "skip", "blocked"];
    pub const WAIT: &'static [&'static str] = &["null", "wait", "waiting"];

    /// Case-insensitive, whitespace-trimmed classification.
    pub fn classify(raw: &str) -> Option<Verdict> {
        let verdict = raw.trim().to_lowercase();
        if Self::PASS.contains(&verdict.as_str()) {
            Some(Verdict::Passed)
        } else if Self::FAIL.contains(&verdict.as_str()) {
            Some(Verdict::Failed)
        } else if Self::SKIP.contains(&verdict.as_str()) {
            Some(Verdict::Skipped)
        } else if Self::WAIT.contains(&verdict.as_str()) {
            Some(Verdict::Waiting)
        } else {
            None
        }
    }

    /// Classifies the `verdict` field of a record.
    pub fn of_record(record: &Record) -> Option<Verdict> {
        Verdict::classify(get_str(record, "verdict")?)
    }
}

/// Which identifying field every exported record must supply. Fixed for the
/// lifetime of one export once configured or inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMethod {
    Id,
    Name,
    Custom,
}

impl LookupMethod {
    pub fn parse(value: &str) -> Option<LookupMethod> {
        match value.to_lowercase().as_str() {
            "id" => Some(LookupMethod::Id),
            "name" => Some(LookupMethod::Name),
            "custom" => Some(LookupMethod::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LookupMethod::Id => "id",
            LookupMethod::Name => "name",
            LookupMethod::Custom => "custom",
        }
    }
}

/// String view of a record field; non-string scalars are not converted.
pub fn get_str<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Record field rendered as text the way it should appear in XML.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Emptiness the way the source data means it: null, blank string, empty
/// collection, zero and false all count as "no value".
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Non-empty field value rendered as text.
pub fn non_empty(record: &Record, key: &str) -> Option<String> {
    let value = record.get(key)?;
    if is_empty_value(value) {
        return None;
    }
    Some(value_to_string(value))
}

/// Returns a copy of the record with keys in sorted order.
pub fn sorted_record(record: &Record) -> Record {
    let mut keys: Vec<&String> = record.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| (k.clone(), record[k].clone()))
        .collect()
}
