//! Shared record-transformation helpers and the per-project dispatch.
//!
//! Transform implementations take an owned copy of the record, so the caller
//! keeps its pristine original; returning `None` drops the record from the
//! export.

pub mod projects;

use regex::Regex;
use serde_json::Value;
use sha1::{Digest, Sha1};
use url::Url;

use crate::domain::model::{get_str, non_empty, Record};

pub use projects::{get_requirements_transform, get_testcases_transform, get_xunit_transform};

/// Transform of one raw test result before XUnit export.
pub trait ResultTransform {
    fn transform(&mut self, result: Record) -> Option<Record>;
}

/// Transform of one testcase definition before testcase export.
pub trait TestcaseTransform {
    fn transform(&mut self, testcase: Record) -> Option<Record>;
}

/// Transform of one requirement before requirement export.
pub trait RequirementTransform {
    fn transform(&mut self, requirement: Record) -> Option<Record>;
}

pub(crate) fn test_param_re() -> Regex {
    Regex::new(r"\[.*\]").expect("valid parameter regex")
}

/// Modifies the record's data according to the parametrization settings.
///
/// With parametrization off, the `params` mapping is dropped entirely and the
/// bracketed parameter text stays in the title. With it on, the bracket
/// suffix is stripped from the title (and from an id identical to the title)
/// while `params` is kept.
pub fn setup_parametrization(record: &mut Record, parametrize: bool, param_re: &Regex) {
    if !parametrize {
        record.remove("params");
        return;
    }

    let title = get_str(record, "title").map(str::to_string);
    if let Some(ref title) = title {
        let stripped = param_re.replace_all(title, "").into_owned();
        if get_str(record, "id") == Some(title.as_str()) {
            record.insert("id".to_string(), Value::String(stripped.clone()));
        }
        record.insert("title".to_string(), Value::String(stripped));
    }
}

/// Makes sure the test class is included in the title.
///
/// Applies only to titles derived from test function names, e.g.
/// `test_power_parent_service` -> `TestServiceRESTAPI.test_power_parent_service`.
/// The `classname` field is consumed either way.
pub fn include_class_in_title(record: &mut Record) {
    let Some(classname) = get_str(record, "classname").map(str::to_string) else {
        record.remove("classname");
        return;
    };
    if classname.is_empty() {
        record.remove("classname");
        return;
    }

    let filepath = get_str(record, "file").unwrap_or_default().to_string();
    let title = get_str(record, "title").map(str::to_string);

    if let Some(title) = title {
        if title.starts_with("test_") && filepath.contains('/') && classname.contains('.') {
            let fname = filepath
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .replace(".py", "");
            let last_classname = classname.rsplit('.').next().unwrap_or_default();
            // last part of classname is not the file name
            if fname != last_classname && !title.contains(last_classname) {
                let new_title = format!("{last_classname}.{title}");
                if get_str(record, "id") == Some(title.as_str()) {
                    record.insert("id".to_string(), Value::String(new_title.clone()));
                }
                record.insert("title".to_string(), Value::String(new_title));
            } else if get_str(record, "id") == Some(title.as_str()) {
                record.insert("id".to_string(), Value::String(title));
            }
        }
    }

    record.remove("classname");
}

/// Adds info about the source of the test result when no comment exists.
pub fn insert_source_info(record: &mut Record) {
    if non_empty(record, "comment").is_some() {
        return;
    }

    let source = non_empty(record, "source");
    let job_name = non_empty(record, "job_name");
    let run = non_empty(record, "run");
    let (Some(source), Some(job_name), Some(run)) = (source, job_name, run) else {
        return;
    };

    record.insert(
        "comment".to_string(),
        Value::String(format!("Source: {source}/{job_name}/{run}")),
    );
}

/// Generates a stable unique id out of a string: SHA-1, truncated to 32 hex
/// characters.
pub fn gen_unique_id(input: &str) -> String {
    let digest = Sha1::digest(input.as_bytes());
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex[..32].to_string()
}

/// Returns the testcase id, deriving one from the salted title when the
/// given id is missing or a generic `test...` placeholder.
pub fn get_testcase_id(record: &Record, salt: &str) -> Option<String> {
    let title = get_str(record, "title").unwrap_or_default();
    let testcase_id = non_empty(record, "id");
    match testcase_id {
        Some(id) if !id.to_lowercase().starts_with("test") => Some(id),
        _ if title.is_empty() => None,
        _ => Some(gen_unique_id(&format!("{salt}{title}"))),
    }
}

/// Makes sure the repo address is a complete browseable path.
///
/// `https://gitlab.com/somerepo` -> `https://gitlab.com/somerepo/blob/master/`;
/// an address already carrying `/blob/<branch>` is preserved.
pub fn get_full_repo_address(repo_address: Option<&str>) -> Option<String> {
    let repo_address = repo_address?;
    if repo_address.is_empty() {
        return None;
    }

    let mut address = repo_address.to_string();
    if !address.contains("/blob/") {
        address = format!("{address}/blob/master");
    }
    Some(format!("{}/", address.trim_end_matches(['/', ' '])))
}

/// Rewrites a relative `automation_script` path to an absolute URL.
pub fn fill_automation_repo(repo_address: Option<&str>, record: &mut Record) {
    let Some(script) = non_empty(record, "automation_script") else {
        return;
    };

    let Some(repo_address) = repo_address else {
        record.remove("automation_script");
        return;
    };

    if script.starts_with("http") {
        return;
    }

    if let Ok(base) = Url::parse(repo_address) {
        if let Ok(absolute) = base.join(&script) {
            record.insert(
                "automation_script".to_string(),
                Value::String(absolute.to_string()),
            );
        }
    }
}

/// Appends a link to the automation script to the description.
pub fn add_automation_link(record: &mut Record) {
    let Some(script) = non_empty(record, "automation_script") else {
        return;
    };
    let description = non_empty(record, "description").unwrap_or_default();
    record.insert(
        "description".to_string(),
        Value::String(format!(
            "{description}<br/><a href=\"{script}\">Test Source</a>"
        )),
    );
}

/// Creates a preformatted HTML version of the description, removing the
/// docstring indent pytest leaves in place.
pub fn preformat_plain_description(record: &mut Record) {
    let Some(description) = non_empty(record, "description") else {
        return;
    };

    let nodeid = get_str(record, "nodeid").unwrap_or_default();
    let indent = if nodeid.contains("::Test") {
        Some(" ".repeat(8))
    } else if nodeid.contains("::test_") {
        Some(" ".repeat(4))
    } else {
        None
    };

    let description = match indent {
        Some(indent) => description
            .split('\n')
            .map(|line| line.strip_prefix(indent.as_str()).unwrap_or(line))
            .collect::<Vec<_>>()
            .join("\n"),
        None => description,
    };

    record.insert(
        "description".to_string(),
        Value::String(format!("<pre>\n{description}\n</pre>")),
    );
}

/// Adds a run id to the description, forcing the remote system to update
/// every testcase on every import.
pub fn add_unique_runid(record: &mut Record, run_id: Option<&str>) {
    let visible = non_empty(record, "description")
        .unwrap_or_else(|| "empty-description-placeholder".to_string());
    let invisible = match run_id {
        Some(run_id) => run_id.to_string(),
        None => std::process::id().to_string(),
    };
    record.insert(
        "description".to_string(),
        Value::String(format!("{visible}<br id=\"{invisible}\"/>")),
    );
}
