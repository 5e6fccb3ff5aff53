//! Input file loading
//!
//! Accepts a JSON array, a single JSON object, an object wrapping a
//! `results` array, or JSON lines. Malformed JSONL lines are skipped and
//! reported; a missing or unreadable file is an error.

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

/// Shape the input file turned out to have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    JsonArray,
    JsonObject,
    JsonLines,
    Empty,
}

/// Raw records plus the lines that could not be parsed
#[derive(Debug)]
pub struct LoadedInput {
    pub format: InputFormat,
    pub records: Vec<Value>,
    pub errors: Vec<String>,
}

/// Read and parse an input file
pub fn load_records(path: &Path) -> Result<LoadedInput> {
    if !path.exists() {
        return Err(Error::Input(format!(
            "Input file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let loaded = parse_records(&content);

    debug!(
        "Loaded {} records from {} ({:?}, {} bad lines)",
        loaded.records.len(),
        path.display(),
        loaded.format,
        loaded.errors.len()
    );

    Ok(loaded)
}

/// Parse file content into raw records
pub fn parse_records(content: &str) -> LoadedInput {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return LoadedInput {
            format: InputFormat::Empty,
            records: Vec::new(),
            errors: Vec::new(),
        };
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => LoadedInput {
            format: InputFormat::JsonArray,
            records: items,
            errors: Vec::new(),
        },
        Ok(Value::Object(mut obj)) => {
            let records = match obj.remove("results") {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    obj.insert("results".to_string(), other);
                    vec![Value::Object(obj)]
                }
                None => vec![Value::Object(obj)],
            };
            LoadedInput {
                format: InputFormat::JsonObject,
                records,
                errors: Vec::new(),
            }
        }
        // a lone scalar or several documents: read it line by line
        _ => parse_json_lines(trimmed),
    }
}

fn parse_json_lines(content: &str) -> LoadedInput {
    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(value) => records.push(value),
            Err(e) => {
                let line_number = index + 1;
                warn!("Skipping malformed JSON on line {}: {}", line_number, e);
                errors.push(format!("line {}: {}", line_number, e));
            }
        }
    }

    LoadedInput {
        format: InputFormat::JsonLines,
        records,
        errors,
    }
}
