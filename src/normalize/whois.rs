//! WHOIS lookups

use super::{first_str, first_value, list_strings, normalize_hostname, NormalizeOptions, Record};
use serde_json::{Map, Value};

fn whois_field<'a>(whois: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    first_value(whois, keys)
}

/// Dates and registrars are sometimes lists in parsed WHOIS output; keep the first
fn first_scalar(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Array(items)) => items.first().cloned().unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

pub(super) fn normalize(obj: Map<String, Value>, options: &NormalizeOptions) -> (String, Map<String, Value>) {
    let whois = obj
        .get("whois_data")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let domain = first_str(&obj, &["domain", "hostname", "host"])
        .or_else(|| first_str(&whois, &["domain_name", "domain"]))
        .unwrap_or_default()
        .to_string();
    let hostname = normalize_hostname(&domain);

    let mut fields = Map::new();
    fields.insert("domain".to_string(), Value::String(domain));
    fields.insert(
        "registrar".to_string(),
        first_scalar(whois_field(&whois, &["registrar"])),
    );
    fields.insert(
        "creation_date".to_string(),
        first_scalar(whois_field(&whois, &["creation_date", "created"])),
    );
    fields.insert(
        "expiration_date".to_string(),
        first_scalar(whois_field(&whois, &["expiration_date", "expires", "registry_expiry_date"])),
    );
    fields.insert(
        "name_servers".to_string(),
        Value::Array(
            list_strings(whois_field(&whois, &["name_servers", "nameservers"]))
                .into_iter()
                .map(|ns| Value::String(ns.to_lowercase()))
                .collect(),
        ),
    );
    fields.insert("whois_data".to_string(), Value::Object(whois));

    if !options.omit_raw {
        if let Some(raw) = obj.get("raw_whois") {
            fields.insert("raw_whois".to_string(), raw.clone());
        }
    }

    (hostname, fields)
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

pub(super) fn embedding_text(record: &Record) -> String {
    let mut parts = vec![format!("WHOIS {}", record.hostname)];

    if let Some(registrar) = scalar_text(record.fields.get("registrar")) {
        parts.push(format!("Registrar: {}", registrar));
    }
    if let Some(created) = scalar_text(record.fields.get("creation_date")) {
        parts.push(format!("Created: {}", created));
    }
    if let Some(expires) = scalar_text(record.fields.get("expiration_date")) {
        parts.push(format!("Expires: {}", expires));
    }

    let name_servers = list_strings(record.fields.get("name_servers"));
    if !name_servers.is_empty() {
        parts.push(format!("NS: {}", name_servers.join(",")));
    }

    parts.join(" ")
}

pub(super) fn backref_summary(record: &Record) -> Map<String, Value> {
    let mut summary = Map::new();
    for (field, target) in [
        ("registrar", "whois_registrar"),
        ("expiration_date", "whois_expiration_date"),
    ] {
        if let Some(value) = record.fields.get(field).filter(|v| !v.is_null()) {
            summary.insert(target.to_string(), value.clone());
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::super::{normalize_record, Tool};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whois_summary_fields() {
        let options = NormalizeOptions {
            timestamp: "2024-05-01T00:00:00Z".to_string(),
            omit_raw: false,
        };
        let raw = json!({
            "id": 1,
            "domain": "Example.com",
            "timestamp": "2024-04-01T00:00:00Z",
            "whois_data": {
                "registrar": "RESERVED-Internet Assigned Numbers Authority",
                "creation_date": ["1995-08-14T04:00:00", "1995-08-14T04:00:00"],
                "expiration_date": "2025-08-13T04:00:00",
                "name_servers": ["A.IANA-SERVERS.NET", "B.IANA-SERVERS.NET"]
            },
            "raw_whois": "Domain Name: EXAMPLE.COM"
        });

        let record = normalize_record(Tool::Whois, raw, 1, &options).unwrap();
        assert_eq!(record.hostname, "example.com");
        assert_eq!(record.fields["creation_date"], "1995-08-14T04:00:00");
        assert_eq!(
            record.fields["name_servers"],
            json!(["a.iana-servers.net", "b.iana-servers.net"])
        );
        assert_eq!(record.fields["raw_whois"], "Domain Name: EXAMPLE.COM");
        assert!(record
            .embedding_text()
            .contains("Registrar: RESERVED-Internet Assigned Numbers Authority"));

        let summary = record.backref_summary();
        assert_eq!(summary["whois_expiration_date"], "2025-08-13T04:00:00");
    }
}
