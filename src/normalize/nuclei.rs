//! nuclei findings
//!
//! Accepts raw `nuclei -jsonl` lines (hyphenated keys, nested `info`) as well
//! as records that were already flattened by an earlier run.

use super::{first_str, first_value, list_strings, normalize_hostname, NormalizeOptions, Record};
use serde_json::{Map, Value};

/// Severity weights used for `risk_score`
pub fn severity_weight(severity: &str) -> i64 {
    match severity {
        "critical" => 10,
        "high" => 7,
        "medium" => 5,
        "low" => 3,
        "info" => 1,
        _ => 0,
    }
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> Value {
    Value::String(first_str(obj, keys).unwrap_or_default().to_string())
}

fn list(obj: &Map<String, Value>, keys: &[&str]) -> Value {
    match first_value(obj, keys) {
        Some(Value::Array(items)) => Value::Array(items.clone()),
        Some(Value::String(s)) if s.contains(',') => Value::Array(
            s.split(',')
                .map(|t| Value::String(t.trim().to_string()))
                .collect(),
        ),
        Some(Value::String(s)) if !s.is_empty() => Value::Array(vec![Value::String(s.clone())]),
        _ => Value::Array(Vec::new()),
    }
}

fn tag_with_prefix(tags: &Value, prefix: &str) -> Value {
    tags.as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|t| t.to_lowercase().starts_with(prefix))
        .map(|t| Value::String(t.to_uppercase()))
        .unwrap_or(Value::Null)
}

pub(super) fn normalize(obj: Map<String, Value>, options: &NormalizeOptions) -> (String, Map<String, Value>) {
    // `info` holds name/severity/tags in raw output; flattened records keep them at top level
    let info = obj
        .get("info")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(|| obj.clone());

    let host = first_str(&obj, &["host"]).unwrap_or_default().to_string();
    let hostname = [
        host.as_str(),
        first_str(&obj, &["url"]).unwrap_or_default(),
        first_str(&obj, &["matched-at", "matched_at"]).unwrap_or_default(),
    ]
    .iter()
    .map(|candidate| normalize_hostname(candidate))
    .find(|h| !h.is_empty())
    .unwrap_or_default();

    let severity = first_str(&info, &["severity"])
        .unwrap_or("unknown")
        .to_lowercase();
    let tags = list(&info, &["tags"]);

    let mut fields = Map::new();
    fields.insert("template_id".into(), text(&obj, &["template-id", "template_id"]));
    fields.insert("template_path".into(), text(&obj, &["template-path", "template_path"]));
    fields.insert("template_url".into(), text(&obj, &["template-url", "template_url"]));

    fields.insert("name".into(), text(&info, &["name"]));
    fields.insert("description".into(), text(&info, &["description"]));
    fields.insert(
        "author".into(),
        first_value(&info, &["author"]).cloned().unwrap_or(Value::Null),
    );
    fields.insert("reference".into(), list(&info, &["reference"]));

    fields.insert("type".into(), text(&obj, &["type"]));
    fields.insert("matcher_name".into(), text(&obj, &["matcher-name", "matcher_name"]));
    fields.insert("extractor_name".into(), text(&obj, &["extractor-name", "extractor_name"]));

    fields.insert("host".into(), Value::String(host));
    fields.insert(
        "port".into(),
        first_value(&obj, &["port"]).cloned().unwrap_or(Value::Null),
    );
    fields.insert("scheme".into(), text(&obj, &["scheme"]));
    fields.insert("url".into(), text(&obj, &["url"]));
    fields.insert("path".into(), text(&obj, &["path"]));
    fields.insert("ip".into(), text(&obj, &["ip"]));

    fields.insert("matched_at".into(), text(&obj, &["matched-at", "matched_at"]));
    fields.insert(
        "extracted_results".into(),
        list(&obj, &["extracted-results", "extracted_results"]),
    );
    fields.insert("matched_line".into(), list(&obj, &["matched-line", "matched_line"]));

    fields.insert("risk_score".into(), Value::from(severity_weight(&severity)));
    fields.insert("cve_id".into(), tag_with_prefix(&tags, "cve-"));
    fields.insert("cwe_id".into(), tag_with_prefix(&tags, "cwe-"));
    fields.insert("severity".into(), Value::String(severity));
    fields.insert("tags".into(), tags);
    fields.insert(
        "metadata".into(),
        first_value(&obj, &["meta", "metadata"])
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );

    if !options.omit_raw {
        fields.insert("request".into(), text(&obj, &["request"]));
        fields.insert("response".into(), text(&obj, &["response"]));
        fields.insert("curl_command".into(), text(&obj, &["curl-command", "curl_command"]));
    }

    (hostname, fields)
}

fn field<'a>(record: &'a Record, key: &str) -> &'a str {
    record
        .fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

pub(super) fn embedding_text(record: &Record) -> String {
    let mut parts = Vec::new();

    if !field(record, "name").is_empty() {
        parts.push(format!("Vulnerability: {}", field(record, "name")));
    }
    if !field(record, "template_id").is_empty() {
        parts.push(format!("Template: {}", field(record, "template_id")));
    }
    if !field(record, "description").is_empty() {
        parts.push(format!("Description: {}", field(record, "description")));
    }

    parts.push(format!("Severity: {}", field(record, "severity")));
    let vuln_type = field(record, "type");
    parts.push(format!(
        "Type: {}",
        if vuln_type.is_empty() { "unknown" } else { vuln_type }
    ));

    if !field(record, "host").is_empty() {
        parts.push(format!("Host: {}", field(record, "host")));
    }
    if !field(record, "url").is_empty() {
        parts.push(format!("URL: {}", field(record, "url")));
    }

    let matched = field(record, "matched_at");
    if !matched.is_empty() {
        parts.push(format!("Matched: {}", matched.chars().take(200).collect::<String>()));
    }

    let extracted = list_strings(record.fields.get("extracted_results"));
    if !extracted.is_empty() {
        parts.push(format!(
            "Extracted: {}",
            extracted.iter().take(5).cloned().collect::<Vec<_>>().join(", ")
        ));
    }

    let tags = list_strings(record.fields.get("tags"));
    for (prefix, label) in [("cve", "CVE"), ("cwe", "CWE")] {
        let matching: Vec<String> = tags
            .iter()
            .filter(|t| t.to_lowercase().starts_with(prefix))
            .take(3)
            .cloned()
            .collect();
        if !matching.is_empty() {
            parts.push(format!("{}: {}", label, matching.join(", ")));
        }
    }

    parts.join(" ")
}

pub(super) fn backref_summary(record: &Record) -> Map<String, Value> {
    let mut summary = Map::new();
    summary.insert(
        "latest_nuclei_severity".to_string(),
        Value::String(field(record, "severity").to_string()),
    );
    summary.insert(
        "latest_nuclei_template".to_string(),
        Value::String(field(record, "template_id").to_string()),
    );
    summary
}
