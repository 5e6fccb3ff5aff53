//! Subdomain enumeration output (subfinder, sublist3r, amass, plain lists)

use super::{as_list, first_str, list_strings, normalize_hostname, NormalizeOptions, Record};
use serde_json::{Map, Value};

pub(super) fn normalize(obj: Map<String, Value>, _options: &NormalizeOptions) -> (String, Map<String, Value>) {
    let hostname = normalize_hostname(
        first_str(&obj, &["hostname", "host", "subdomain", "domain", "name"]).unwrap_or_default(),
    );

    let mut fields = Map::new();

    // subfinder reports the queried apex as `input`
    let domain = first_str(&obj, &["input", "root_domain", "apex"])
        .map(normalize_hostname)
        .unwrap_or_default();
    fields.insert("domain".to_string(), Value::String(domain));

    let mut sources: Vec<Value> = as_list(obj.get("sources"));
    for source in as_list(obj.get("source")) {
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    fields.insert("sources".to_string(), Value::Array(sources));

    for key in ["ip", "raw_line", "line_number"] {
        if let Some(value) = obj.get(key) {
            fields.insert(key.to_string(), value.clone());
        }
    }

    (hostname, fields)
}

pub(super) fn embedding_text(record: &Record) -> String {
    let mut parts = vec![format!("Subdomain: {}", record.hostname)];

    if let Some(domain) = record.fields.get("domain").and_then(Value::as_str) {
        if !domain.is_empty() {
            parts.push(format!("Domain: {}", domain));
        }
    }

    let sources = list_strings(record.fields.get("sources"));
    if !sources.is_empty() {
        parts.push(format!("Sources: {}", sources.join(",")));
    }

    parts.join(" ")
}
