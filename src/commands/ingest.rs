//! Ingest command: one input file into one collection

use crate::bootstrap::ensure_collection;
use crate::correlate::{CorrelationEngine, CorrelationStats};
use crate::embed::EmbeddingStrategy;
use crate::error::Result;
use crate::input::load_records;
use crate::normalize::{normalize_all, NormalizeOptions, Tool};
use crate::progress::{advance_progress, finish_progress, start_progress_bar};
use crate::store::VectorStore;
use crate::upsert::UpsertCoordinator;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Options for one ingest run
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub tool: Tool,
    pub input: PathBuf,
    pub collection: String,
    /// Points per upsert call
    pub batch_size: usize,
    /// Texts per embedding call
    pub embedding_batch_size: usize,
    /// Candidate collections in priority order; `None` skips correlation
    pub correlation_collections: Option<Vec<String>>,
    pub normalize: NormalizeOptions,
    pub show_progress: bool,
}

impl IngestOptions {
    /// Options with defaults for everything but the tool and input file
    pub fn new(tool: Tool, input: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            input: input.into(),
            collection: tool.default_collection().to_string(),
            batch_size: crate::config::default_ingest_batch_size(),
            embedding_batch_size: crate::config::default_embedding_batch_size(),
            correlation_collections: Some(tool.default_correlation_collections()),
            normalize: NormalizeOptions::default(),
            show_progress: false,
        }
    }
}

/// Statistics from an ingest run
#[derive(Debug, Default, Serialize)]
pub struct IngestStats {
    pub tool: String,
    pub collection: String,
    pub embedding: String,
    pub collection_created: bool,
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub correlated: usize,
    pub errors: usize,
    pub correlation: CorrelationStats,
    /// Findings per severity (nuclei only)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub severity_counts: BTreeMap<String, usize>,
    pub error_messages: Vec<String>,
}

/// Load, normalize, embed, correlate and upsert one input file.
///
/// Errors are returned only for fatal conditions: unreadable input, an
/// unreachable store, or an incompatible destination collection. Everything
/// else is counted in the returned stats.
pub async fn cmd_ingest(
    store: &dyn VectorStore,
    embedder: &EmbeddingStrategy,
    options: &IngestOptions,
) -> Result<IngestStats> {
    let tool = options.tool;
    info!(
        "Ingesting {} records from {} into '{}'",
        tool,
        options.input.display(),
        options.collection
    );

    let mut stats = IngestStats {
        tool: tool.tag().to_string(),
        collection: options.collection.clone(),
        embedding: embedder.describe().to_string(),
        ..Default::default()
    };

    let loaded = load_records(&options.input)?;
    stats.total = loaded.records.len() + loaded.errors.len();
    stats.error_messages.extend(loaded.errors);

    let batch = normalize_all(tool, loaded.records, &options.normalize);
    stats.error_messages.extend(batch.errors);

    if batch.records.is_empty() {
        warn!("No records to ingest from {}", options.input.display());
        stats.errors = stats.error_messages.len();
        return Ok(stats);
    }

    let report = ensure_collection(
        store,
        &options.collection,
        embedder.dimension() as u64,
        tool.indexed_fields(),
    )
    .await?;
    stats.collection_created = report.created;

    let correlation = match &options.correlation_collections {
        Some(collections) => {
            CorrelationEngine::new(store, collections.clone(), &options.collection)
        }
        None => {
            info!("Correlation skipped");
            CorrelationEngine::disabled(store)
        }
    };
    debug!("Correlation candidates: {:?}", correlation.candidates());

    let mut upsert = UpsertCoordinator::new(
        store,
        options.collection.clone(),
        options.batch_size,
        correlation,
    );

    let progress = start_progress_bar(
        batch.records.len(),
        &format!("Ingesting {}", tool),
        !options.show_progress,
    );

    let mut records = batch.records.into_iter().peekable();
    while records.peek().is_some() {
        let chunk: Vec<_> = records
            .by_ref()
            .take(options.embedding_batch_size.max(1))
            .collect();
        let texts: Vec<String> = chunk.iter().map(|r| r.embedding_text()).collect();
        let vectors = embedder.embed_all(texts).await;

        for (record, vector) in chunk.into_iter().zip(vectors) {
            if tool == Tool::Nuclei {
                let severity = record
                    .fields
                    .get("severity")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                *stats.severity_counts.entry(severity).or_insert(0) += 1;
            }

            let label = format!("record {} ({})", record.id, record.hostname);
            if let Err(e) = upsert.stage(record, vector).await {
                warn!("Failed to stage {}: {}", label, e);
                stats.error_messages.push(format!("{}: {}", label, e));
            }
            advance_progress(&progress);
        }
    }

    upsert.finish().await;
    finish_progress(progress, "Records processed");

    let upsert_stats = upsert.stats().clone();
    stats.inserted = upsert_stats.inserted;
    stats.updated = upsert_stats.updated;
    stats.correlation = upsert.correlation_stats().clone();
    stats.correlated = stats.correlation.matched;
    stats.errors = stats.error_messages.len() + upsert_stats.errors;
    if upsert_stats.errors > 0 {
        stats.error_messages.push(format!(
            "{} records lost in {} failed batches",
            upsert_stats.errors, upsert_stats.failed_batches
        ));
    }

    info!(
        "Ingest complete: {} inserted, {} updated, {} correlated, {} errors",
        stats.inserted, stats.updated, stats.correlated, stats.errors
    );

    Ok(stats)
}

/// Print ingest statistics
pub fn print_ingest_stats(stats: &IngestStats) {
    println!("\n📥 Ingest Complete\n");
    println!("Tool: {}", stats.tool);
    println!("Collection: {}", stats.collection);
    if stats.collection_created {
        println!("  (collection created)");
    }
    println!("Embedding: {}", stats.embedding);
    println!();
    println!("Total records: {}", stats.total);
    println!("Inserted: {}", stats.inserted);
    println!("Updated: {}", stats.updated);
    println!("Correlated: {}", stats.correlated);
    println!("Errors: {}", stats.errors);

    println!("\nCorrelation:");
    println!("  Matched: {}", stats.correlation.matched);
    println!("  Unmatched: {}", stats.correlation.unmatched);
    println!("  Back-references updated: {}", stats.correlation.backrefs_updated);
    if stats.correlation.errors > 0 {
        println!("  Lookup errors: {}", stats.correlation.errors);
    }

    if !stats.severity_counts.is_empty() {
        println!("\nSeverity:");
        for severity in ["critical", "high", "medium", "low", "info"] {
            if let Some(count) = stats.severity_counts.get(severity) {
                println!("  {}: {}", severity, count);
            }
        }
        for (severity, count) in &stats.severity_counts {
            if !["critical", "high", "medium", "low", "info"].contains(&severity.as_str()) {
                println!("  {}: {}", severity, count);
            }
        }
    }

    if !stats.error_messages.is_empty() {
        println!("\nErrors:");
        for error in &stats.error_messages {
            println!("- {}", error);
        }
    }
}
