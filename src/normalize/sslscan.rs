//! sslscan TLS results

use super::{first_str, first_value, list_strings, normalize_hostname, NormalizeOptions, Record};
use serde_json::{Map, Value};

const WEAK_PROTOCOLS: [&str; 4] = ["SSLv2", "SSLv3", "TLSv1.0", "TLSv1.1"];

fn is_enabled(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("enabled"),
        _ => false,
    }
}

pub(super) fn normalize(obj: Map<String, Value>, _options: &NormalizeOptions) -> (String, Map<String, Value>) {
    let target = first_str(&obj, &["target", "host"]).unwrap_or_default().to_string();
    let sni = first_str(&obj, &["sni"]).unwrap_or_default().to_string();
    let hostname = normalize_hostname(if sni.is_empty() { &target } else { &sni });

    let port = first_value(&obj, &["port"])
        .and_then(|p| match p {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .unwrap_or(443);

    let protocols = obj
        .get("protocols")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let weak: Vec<Value> = protocols
        .iter()
        .filter(|(name, state)| WEAK_PROTOCOLS.contains(&name.as_str()) && is_enabled(state))
        .map(|(name, _)| Value::String(name.clone()))
        .collect();

    let ciphers_count = obj
        .get("ciphers")
        .and_then(Value::as_array)
        .map(|c| c.len())
        .unwrap_or(0);

    let certificate = obj
        .get("certificate")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let altnames = list_strings(certificate.get("altnames"));

    let mut fields = Map::new();
    fields.insert("target".to_string(), Value::String(target));
    fields.insert(
        "ip".to_string(),
        first_value(&obj, &["ip"]).cloned().unwrap_or(Value::Null),
    );
    fields.insert("port".to_string(), Value::from(port));
    fields.insert("sni".to_string(), Value::String(sni));
    fields.insert("ciphers_count".to_string(), Value::from(ciphers_count));
    fields.insert("weak_protocols".to_string(), Value::Array(weak));
    fields.insert(
        "certificate_subject".to_string(),
        certificate.get("subject").cloned().unwrap_or(Value::Null),
    );
    fields.insert(
        "certificate_issuer".to_string(),
        certificate.get("issuer").cloned().unwrap_or(Value::Null),
    );
    fields.insert(
        "certificate_altnames_count".to_string(),
        Value::from(altnames.len()),
    );
    fields.insert("protocols".to_string(), Value::Object(protocols));
    fields.insert("certificate".to_string(), Value::Object(certificate));

    (hostname, fields)
}

pub(super) fn embedding_text(record: &Record) -> String {
    let text = |key: &str| {
        record
            .fields
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("N/A")
            .to_string()
    };

    let protocols: Vec<String> = record
        .fields
        .get("protocols")
        .and_then(Value::as_object)
        .map(|p| p.keys().cloned().collect())
        .unwrap_or_default();

    format!(
        "{} {} TLS protocols: {} Ciphers: {} Subject: {}",
        text("target"),
        text("ip"),
        protocols.join(","),
        record.fields.get("ciphers_count").and_then(Value::as_u64).unwrap_or(0),
        text("certificate_subject"),
    )
}

pub(super) fn backref_summary(record: &Record) -> Map<String, Value> {
    let mut summary = Map::new();
    if let Some(weak) = record.fields.get("weak_protocols") {
        summary.insert("tls_weak_protocols".to_string(), weak.clone());
    }
    if let Some(issuer) = record.fields.get("certificate_issuer").filter(|v| !v.is_null()) {
        summary.insert("tls_certificate_issuer".to_string(), issuer.clone());
    }
    summary
}
