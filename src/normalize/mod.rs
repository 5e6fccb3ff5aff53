//! Record normalization
//!
//! Every tool's native record is mapped onto one [`Record`] shape: a
//! normalized hostname, a source tag, a timestamp, and tool-specific fields.
//! The per-tool modules own field mapping, embedding text and the summary
//! written back onto correlated records.

mod dnsx;
mod json;
mod nuclei;
mod sslscan;
mod subdomains;
mod whois;

use crate::correlate::{NUCLEI_CORRELATION_COLLECTIONS, SUBDOMAIN_CORRELATION_COLLECTIONS};
use crate::error::{Error, Result};
use crate::store::{FieldMatch, FilterValue, PointFilter, PointKey};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;
use url::Url;

/// Recon tools this crate knows how to ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Dnsx,
    Nuclei,
    Subdomains,
    Whois,
    Sslscan,
    Json,
}

impl Tool {
    /// Value of the `source_tool` payload field
    pub fn tag(&self) -> &'static str {
        match self {
            Tool::Dnsx => "dnsx",
            Tool::Nuclei => "nuclei",
            Tool::Subdomains => "subdomains",
            Tool::Whois => "whois",
            Tool::Sslscan => "sslscan",
            Tool::Json => "json",
        }
    }

    pub fn default_collection(&self) -> &'static str {
        match self {
            Tool::Dnsx => "dnsx_records",
            Tool::Nuclei => "nuclei_results",
            Tool::Subdomains => "subdomains_collection",
            Tool::Whois => "whois_records",
            Tool::Sslscan => "sslscan_results",
            Tool::Json => "json_records",
        }
    }

    /// Payload fields that get a keyword index on collection creation
    pub fn indexed_fields(&self) -> &'static [&'static str] {
        match self {
            Tool::Dnsx => &[
                "hostname",
                "host",
                "a",
                "mx",
                "cname",
                "linked_record_id",
                "timestamp",
                "correlation_status",
            ],
            Tool::Nuclei => &[
                "hostname",
                "template_id",
                "host",
                "url",
                "severity",
                "type",
                "matched_at",
                "timestamp",
                "cve_id",
                "cwe_id",
                "correlation_status",
                "ip",
            ],
            Tool::Subdomains => &["hostname", "domain", "sources", "timestamp"],
            Tool::Whois => &["hostname", "registrar", "timestamp", "correlation_status"],
            Tool::Sslscan => &[
                "hostname",
                "target",
                "ip",
                "sni",
                "timestamp",
                "correlation_status",
            ],
            Tool::Json => &["hostname", "timestamp", "correlation_status"],
        }
    }

    /// Fields that identify "the same" record across runs; `hostname` is always first
    pub fn upsert_key(&self) -> &'static [&'static str] {
        match self {
            Tool::Nuclei => &["hostname", "template_id"],
            Tool::Sslscan => &["hostname", "port"],
            _ => &["hostname"],
        }
    }

    /// Collections probed for hostname correlation when none are configured
    pub fn default_correlation_collections(&self) -> Vec<String> {
        let names: &[&str] = match self {
            Tool::Nuclei => &NUCLEI_CORRELATION_COLLECTIONS,
            _ => &SUBDOMAIN_CORRELATION_COLLECTIONS,
        };
        names.iter().map(|name| name.to_string()).collect()
    }

    /// Prefix for back-reference fields written onto correlated records
    pub fn backref_tag(&self) -> &'static str {
        match self {
            Tool::Dnsx => "dns",
            Tool::Nuclei => "nuclei",
            Tool::Subdomains => "subdomain",
            Tool::Whois => "whois",
            Tool::Sslscan => "tls",
            Tool::Json => "json",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Run-wide normalization settings
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Timestamp for records that carry none
    pub timestamp: String,
    /// Drop raw blobs (dnsx raw_response, nuclei request/response, raw whois)
    pub omit_raw: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            timestamp: now_timestamp(),
            omit_raw: false,
        }
    }
}

/// Current UTC time in RFC 3339 form
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A record in the common schema
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Sequential id from normalization, or the id the input carried
    pub id: u64,
    /// Normalized hostname; may be empty
    pub hostname: String,
    pub tool: Tool,
    pub timestamp: String,
    /// Tool-specific payload fields
    pub fields: Map<String, Value>,
}

impl Record {
    /// Payload written to the store under the given storage id
    pub fn to_payload(&self, id: &PointKey) -> Map<String, Value> {
        let mut payload = self.fields.clone();
        payload.insert("id".to_string(), id.to_json());
        payload.insert("source_record_id".to_string(), Value::from(self.id));
        payload.insert("hostname".to_string(), Value::String(self.hostname.clone()));
        payload.insert(
            "source_tool".to_string(),
            Value::String(self.tool.tag().to_string()),
        );
        payload.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.clone()),
        );
        payload
    }

    /// Text fed to the embedder
    pub fn embedding_text(&self) -> String {
        match self.tool {
            Tool::Dnsx => dnsx::embedding_text(self),
            Tool::Nuclei => nuclei::embedding_text(self),
            Tool::Subdomains => subdomains::embedding_text(self),
            Tool::Whois => whois::embedding_text(self),
            Tool::Sslscan => sslscan::embedding_text(self),
            Tool::Json => json::embedding_text(self),
        }
    }

    /// Tool-specific summary fields for the correlated record
    pub fn backref_summary(&self) -> Map<String, Value> {
        match self.tool {
            Tool::Dnsx => dnsx::backref_summary(self),
            Tool::Nuclei => nuclei::backref_summary(self),
            Tool::Sslscan => sslscan::backref_summary(self),
            Tool::Whois => whois::backref_summary(self),
            Tool::Subdomains | Tool::Json => Map::new(),
        }
    }

    /// Upsert key values; `None` when the record cannot be keyed (empty hostname)
    pub fn upsert_key(&self) -> Option<Vec<FieldMatch>> {
        if self.hostname.is_empty() {
            return None;
        }

        let mut matches = Vec::new();
        for field in self.tool.upsert_key() {
            if *field == "hostname" {
                matches.push(FieldMatch::keyword("hostname", self.hostname.clone()));
                continue;
            }
            let value = self.fields.get(*field).and_then(FilterValue::from_json)?;
            matches.push(FieldMatch::new(*field, value));
        }
        Some(matches)
    }

    /// Filter locating this record's existing point
    pub fn upsert_filter(&self) -> Option<PointFilter> {
        self.upsert_key().map(PointFilter::must)
    }

    /// Stable string form of the upsert key, for in-run deduplication
    pub fn upsert_key_string(&self) -> Option<String> {
        self.upsert_key().map(|matches| {
            matches
                .iter()
                .map(|m| match &m.value {
                    FilterValue::Keyword(s) => format!("{}={}", m.field, s),
                    FilterValue::Integer(i) => format!("{}={}", m.field, i),
                })
                .collect::<Vec<_>>()
                .join("|")
        })
    }
}

/// Output of normalizing a whole input file
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<Record>,
    /// One message per input record that could not be normalized
    pub errors: Vec<String>,
}

/// Normalize raw input records for one tool
pub fn normalize_all(tool: Tool, raw: Vec<Value>, options: &NormalizeOptions) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();

    for (index, value) in raw.into_iter().enumerate() {
        let sequence = index as u64 + 1;
        match normalize_record(tool, value, sequence, options) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                warn!("Skipping record {}: {}", sequence, e);
                batch.errors.push(format!("record {}: {}", sequence, e));
            }
        }
    }

    batch
}

/// Normalize one raw record; `sequence` is its 1-based position in the input
pub fn normalize_record(
    tool: Tool,
    value: Value,
    sequence: u64,
    options: &NormalizeOptions,
) -> Result<Record> {
    let obj = match value {
        Value::Object(obj) => obj,
        Value::String(s) if tool == Tool::Subdomains => {
            let mut obj = Map::new();
            obj.insert("hostname".to_string(), Value::String(s));
            obj
        }
        other => {
            return Err(Error::Input(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            )))
        }
    };

    let id = obj
        .get("id")
        .and_then(Value::as_u64)
        .filter(|id| *id > 0)
        .unwrap_or(sequence);
    let timestamp = first_str(&obj, &["timestamp"])
        .map(str::to_string)
        .unwrap_or_else(|| options.timestamp.clone());

    let (hostname, fields) = match tool {
        Tool::Dnsx => dnsx::normalize(obj, options),
        Tool::Nuclei => nuclei::normalize(obj, options),
        Tool::Subdomains => subdomains::normalize(obj, options),
        Tool::Whois => whois::normalize(obj, options),
        Tool::Sslscan => sslscan::normalize(obj, options),
        Tool::Json => json::normalize(obj, options),
    };

    Ok(Record {
        id,
        hostname,
        tool,
        timestamp,
        fields,
    })
}

/// Normalize a hostname: trim, drop scheme/port/path, strip trailing dots, lowercase
pub fn normalize_hostname(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let host = if trimmed.contains("://") {
        Url::parse(trimmed)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default()
    } else {
        let without_path = trimmed.split('/').next().unwrap_or_default();
        strip_port(without_path).to_string()
    };

    host.trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_lowercase()
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // bracketed IPv6, optionally with a port
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        // a single colon separates host and port; more means bare IPv6
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// First non-empty string value among the given keys
pub(crate) fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}

/// First present, non-null value among the given keys
pub(crate) fn first_value<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Coerce a value to a list: null becomes empty, scalars are wrapped
pub(crate) fn as_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

/// String items of a list value, e.g. for embedding text
pub(crate) fn list_strings(value: Option<&Value>) -> Vec<String> {
    as_list(value)
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
