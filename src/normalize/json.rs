//! Arbitrary JSON records
//!
//! Fields are kept as-is; only the hostname is derived.

use super::{first_str, normalize_hostname, NormalizeOptions, Record};
use serde_json::{Map, Value};

const HOST_KEYS: [&str; 6] = ["hostname", "host", "domain", "target", "url", "subdomain"];

pub(super) fn normalize(mut obj: Map<String, Value>, _options: &NormalizeOptions) -> (String, Map<String, Value>) {
    let hostname = normalize_hostname(first_str(&obj, &HOST_KEYS).unwrap_or_default());

    // these are rewritten from the Record itself
    for key in ["id", "hostname", "source_tool", "timestamp"] {
        obj.remove(key);
    }

    (hostname, obj)
}

pub(super) fn embedding_text(record: &Record) -> String {
    let mut parts = vec![record.hostname.clone()];

    let mut keys: Vec<&String> = record.fields.keys().collect();
    keys.sort();

    for key in keys {
        let value = &record.fields[key.as_str()];
        let rendered = match value {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) if !items.is_empty() => Value::Array(items.clone()).to_string(),
            _ => continue,
        };
        parts.push(format!("{}: {}", key, rendered));
    }

    let text = parts.join(" ");
    text.chars().take(2000).collect()
}
