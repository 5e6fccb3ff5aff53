//! dnsx DNS answers

use super::{as_list, first_str, first_value, list_strings, normalize_hostname, NormalizeOptions, Record};
use serde_json::{Map, Value};

/// Record types that are always stored as lists
pub const DNS_TYPES: [&str; 10] = [
    "a", "aaaa", "cname", "mx", "ns", "txt", "soa", "srv", "ptr", "caa",
];

pub(super) fn normalize(obj: Map<String, Value>, options: &NormalizeOptions) -> (String, Map<String, Value>) {
    let host = first_str(&obj, &["host", "hostname"]).unwrap_or_default().to_string();
    let hostname = normalize_hostname(&host);

    let mut fields = Map::new();
    fields.insert("host".to_string(), Value::String(host));
    fields.insert(
        "resolver".to_string(),
        Value::Array(as_list(obj.get("resolver"))),
    );
    fields.insert(
        "status_code".to_string(),
        first_value(&obj, &["status_code"])
            .cloned()
            .unwrap_or_else(|| Value::String("UNKNOWN".to_string())),
    );

    for dns_type in DNS_TYPES {
        fields.insert(dns_type.to_string(), Value::Array(as_list(obj.get(dns_type))));
    }

    if !options.omit_raw {
        // converted files already carry the tool's original line
        let raw = obj
            .get("raw_response")
            .cloned()
            .unwrap_or_else(|| Value::Object(obj.clone()));
        fields.insert("raw_response".to_string(), raw);
    }

    (hostname, fields)
}

pub(super) fn embedding_text(record: &Record) -> String {
    let mut parts = vec![record.hostname.clone()];

    for (field, label) in [
        ("a", "A"),
        ("aaaa", "AAAA"),
        ("cname", "CNAME"),
        ("mx", "MX"),
        ("ns", "NS"),
    ] {
        let values = list_strings(record.fields.get(field));
        if !values.is_empty() {
            parts.push(format!("{}:{}", label, values.join(",")));
        }
    }

    let txt = list_strings(record.fields.get("txt"));
    if !txt.is_empty() {
        parts.push(format!("TXT:{}", txt.iter().take(2).cloned().collect::<Vec<_>>().join(",")));
    }

    parts.join(" ")
}

pub(super) fn backref_summary(record: &Record) -> Map<String, Value> {
    let mut summary = Map::new();
    for (field, target) in [("a", "resolved_ips"), ("aaaa", "resolved_ipv6")] {
        let values = as_list(record.fields.get(field));
        if !values.is_empty() {
            summary.insert(target.to_string(), Value::Array(values));
        }
    }
    summary
}
