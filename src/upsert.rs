//! Insert-or-update of normalized records
//!
//! Each staged record is correlated, matched against the destination
//! collection by its upsert key, and buffered. Buffers are written with one
//! store call per batch; back-references are written only after the batch
//! holding the referring record has been stored.

use crate::correlate::{CorrelationEngine, CorrelationLink, CorrelationStats};
use crate::error::Result;
use crate::normalize::Record;
use crate::store::{PointKey, RecordPoint, VectorStore};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const LINK_FIELDS: [&str; 3] = ["correlation_status", "linked_record_id", "linked_collection"];

/// Whether a staged record creates a new point or replaces an existing one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(PointKey),
    Updated(PointKey),
}

impl UpsertOutcome {
    pub fn id(&self) -> &PointKey {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => id,
        }
    }
}

/// Write counters; records are counted once their batch is stored
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
    pub errors: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

struct PendingPoint {
    point: RecordPoint,
    /// Upsert key, released again if the batch is lost
    key: Option<String>,
    record: Record,
    link: CorrelationLink,
    outcome: UpsertOutcome,
    /// Earlier records of this batch with the same key that this one replaced
    absorbed: usize,
}

/// Batching upsert writer for one destination collection
pub struct UpsertCoordinator<'a> {
    store: &'a dyn VectorStore,
    collection: String,
    batch_size: usize,
    correlation: CorrelationEngine<'a>,
    next_id: Option<u64>,
    /// Upsert key -> id assigned earlier in this run
    seen: HashMap<String, PointKey>,
    pending: Vec<PendingPoint>,
    stats: UpsertStats,
}

impl<'a> UpsertCoordinator<'a> {
    pub fn new(
        store: &'a dyn VectorStore,
        collection: impl Into<String>,
        batch_size: usize,
        correlation: CorrelationEngine<'a>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            batch_size: batch_size.max(1),
            correlation,
            next_id: None,
            seen: HashMap::new(),
            pending: Vec::new(),
            stats: UpsertStats::default(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn stats(&self) -> &UpsertStats {
        &self.stats
    }

    pub fn correlation_stats(&self) -> &CorrelationStats {
        self.correlation.stats()
    }

    /// Number of records waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Correlate and buffer one record, flushing when the batch is full
    pub async fn stage(&mut self, record: Record, vector: Vec<f32>) -> Result<UpsertOutcome> {
        let link = self.correlation.correlate(&record.hostname).await;
        let key = record.upsert_key_string();

        let (outcome, existing) = match &key {
            Some(key) => self.resolve_existing(&record, key).await?,
            None => (UpsertOutcome::Inserted(self.allocate_id().await?), None),
        };

        let id = outcome.id().clone();
        if let Some(key) = &key {
            self.seen.entry(key.clone()).or_insert_with(|| id.clone());
        }

        // a duplicate still waiting in this batch is replaced, not written twice
        let mut absorbed = 0;
        let mut existing = existing;
        let mut outcome = outcome;
        let mut link = link;
        if let Some(pos) = self.pending.iter().position(|p| p.point.id == id) {
            let replaced = self.pending.remove(pos);
            absorbed = replaced.absorbed + 1;
            existing = Some(replaced.point.payload);
            outcome = replaced.outcome;
            if !link.is_matched() && replaced.link.is_matched() {
                link = replaced.link;
            }
        }

        let payload = merge_payload(existing, &record, &id, &link);
        debug!(
            "Staged {} as {:?} ({})",
            record.hostname,
            outcome,
            link.status.as_str()
        );

        self.pending.push(PendingPoint {
            point: RecordPoint {
                id,
                vector,
                payload,
            },
            key,
            record,
            link,
            outcome: outcome.clone(),
            absorbed,
        });

        if self.pending.len() >= self.batch_size {
            self.flush().await;
        }

        Ok(outcome)
    }

    /// Find the point this record replaces, if any
    async fn resolve_existing(
        &mut self,
        record: &Record,
        key: &str,
    ) -> Result<(UpsertOutcome, Option<Map<String, Value>>)> {
        let existing = match record.upsert_filter() {
            Some(filter) => self.store.find_first(&self.collection, &filter).await?,
            None => None,
        };

        if let Some(id) = self.seen.get(key).cloned() {
            let payload = existing.filter(|p| p.id == id).map(|p| p.payload);
            return Ok((UpsertOutcome::Updated(id), payload));
        }

        match existing {
            Some(point) => Ok((UpsertOutcome::Updated(point.id), Some(point.payload))),
            None => Ok((UpsertOutcome::Inserted(self.allocate_id().await?), None)),
        }
    }

    async fn allocate_id(&mut self) -> Result<PointKey> {
        let next = match self.next_id {
            Some(next) => next,
            None => {
                let max = self.store.max_numeric_id(&self.collection).await?;
                debug!(
                    "Highest existing id in '{}': {:?}",
                    self.collection, max
                );
                max.unwrap_or(0) + 1
            }
        };
        self.next_id = Some(next + 1);
        Ok(PointKey::Num(next))
    }

    /// Write the buffered batch, then the back-references of its matched records
    pub async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.pending);
        let size = batch.len();
        let points: Vec<RecordPoint> = batch.iter().map(|p| p.point.clone()).collect();

        self.stats.batches += 1;
        match self.store.upsert_points(&self.collection, points).await {
            Ok(()) => {
                debug!(
                    "Stored batch {} ({} points) in '{}'",
                    self.stats.batches, size, self.collection
                );
                for pending in &batch {
                    match pending.outcome {
                        UpsertOutcome::Inserted(_) => self.stats.inserted += 1,
                        UpsertOutcome::Updated(_) => self.stats.updated += 1,
                    }
                    self.stats.updated += pending.absorbed;
                }

                for pending in batch.iter().filter(|p| p.link.is_matched()) {
                    self.correlation
                        .write_backref(&pending.record, &pending.point.id, &pending.link)
                        .await;
                }
            }
            Err(e) => {
                let lost: usize = batch.iter().map(|p| 1 + p.absorbed).sum();
                warn!(
                    "Failed to store batch {} ({} records) in '{}': {}",
                    self.stats.batches, lost, self.collection, e
                );
                self.stats.failed_batches += 1;
                self.stats.errors += lost;

                // ids handed out for this batch were never stored
                for pending in &batch {
                    if let Some(key) = &pending.key {
                        if self.seen.get(key) == Some(&pending.point.id) {
                            self.seen.remove(key);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left
    pub async fn finish(&mut self) {
        self.flush().await;
        info!(
            "Upsert into '{}' done: {} inserted, {} updated, {} failed",
            self.collection, self.stats.inserted, self.stats.updated, self.stats.errors
        );
    }
}

/// Payload for a record stored under `id`, layered over the point it replaces
fn merge_payload(
    existing: Option<Map<String, Value>>,
    record: &Record,
    id: &PointKey,
    link: &CorrelationLink,
) -> Map<String, Value> {
    let mut merged = existing.unwrap_or_default();

    let keep_existing_link = !link.is_matched()
        && merged.get("correlation_status").and_then(Value::as_str) == Some("matched");

    let mut incoming = record.to_payload(id);
    if keep_existing_link {
        for field in LINK_FIELDS {
            incoming.remove(field);
        }
    } else {
        incoming.extend(link.to_payload());
    }

    merged.extend(incoming);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize_record, NormalizeOptions, Tool};
    use crate::store::MemoryStore;
    use serde_json::json;

    const DEST: &str = "dnsx_records";

    fn record(raw: Value, sequence: u64) -> Record {
        let options = NormalizeOptions {
            timestamp: "2024-05-01T00:00:00Z".to_string(),
            omit_raw: true,
        };
        normalize_record(Tool::Dnsx, raw, sequence, &options).unwrap()
    }

    async fn store_with_dest() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_collection(DEST, 4).await.unwrap();
        store
    }

    fn vector() -> Vec<f32> {
        vec![0.5; 4]
    }

    #[tokio::test]
    async fn test_new_records_get_sequential_ids_after_max() {
        let store = store_with_dest().await;
        store.insert_point(
            DEST,
            RecordPoint {
                id: PointKey::Num(41),
                vector: vector(),
                payload: json!({"hostname": "old.example.com"}).as_object().unwrap().clone(),
            },
        );

        let mut upsert = UpsertCoordinator::new(&store, DEST, 100, CorrelationEngine::disabled(&store));
        let a = upsert.stage(record(json!({"host": "a.example.com"}), 1), vector()).await.unwrap();
        let b = upsert.stage(record(json!({"host": "b.example.com"}), 2), vector()).await.unwrap();
        upsert.finish().await;

        assert_eq!(a, UpsertOutcome::Inserted(PointKey::Num(42)));
        assert_eq!(b, UpsertOutcome::Inserted(PointKey::Num(43)));
        assert_eq!(upsert.stats().inserted, 2);
        assert_eq!(store.point_count(DEST), 3);
    }

    #[tokio::test]
    async fn test_batch_size_one_writes_each_record() {
        let store = store_with_dest().await;
        let mut upsert = UpsertCoordinator::new(&store, DEST, 1, CorrelationEngine::disabled(&store));

        for (i, host) in ["a.example.com", "b.example.com", "c.example.com"].iter().enumerate() {
            upsert
                .stage(record(json!({"host": host}), i as u64 + 1), vector())
                .await
                .unwrap();
        }
        upsert.finish().await;

        assert_eq!(store.upsert_calls(), 3);
        assert_eq!(upsert.stats().batches, 3);
    }

    #[tokio::test]
    async fn test_duplicates_in_one_run_converge() {
        let store = store_with_dest().await;
        let mut upsert = UpsertCoordinator::new(&store, DEST, 2, CorrelationEngine::disabled(&store));

        let first = upsert
            .stage(record(json!({"host": "www.example.com", "a": ["1.1.1.1"]}), 1), vector())
            .await
            .unwrap();
        let second = upsert
            .stage(record(json!({"host": "WWW.example.com.", "a": ["2.2.2.2"]}), 2), vector())
            .await
            .unwrap();
        // still pending: the first was replaced in the buffer
        assert_eq!(upsert.pending_len(), 1);

        upsert.flush().await;
        let third = upsert
            .stage(record(json!({"host": "www.example.com", "a": ["3.3.3.3"]}), 3), vector())
            .await
            .unwrap();
        upsert.finish().await;

        assert_eq!(first, UpsertOutcome::Inserted(PointKey::Num(1)));
        assert_eq!(second, UpsertOutcome::Inserted(PointKey::Num(1)));
        assert_eq!(third, UpsertOutcome::Updated(PointKey::Num(1)));
        assert_eq!(store.point_count(DEST), 1);

        let payload = store.get_payload(DEST, &PointKey::Num(1)).unwrap();
        assert_eq!(payload["a"], json!(["3.3.3.3"]));
        assert_eq!(upsert.stats().inserted, 1);
        assert_eq!(upsert.stats().updated, 2);
    }

    #[tokio::test]
    async fn test_existing_link_survives_unmatched_update() {
        let store = store_with_dest().await;
        store.insert_point(
            DEST,
            RecordPoint {
                id: PointKey::Num(7),
                vector: vector(),
                payload: json!({
                    "hostname": "www.example.com",
                    "correlation_status": "matched",
                    "linked_record_id": 3,
                    "linked_collection": "subfinder",
                    "latest_tls_record_id": 99
                })
                .as_object()
                .unwrap()
                .clone(),
            },
        );

        let mut upsert = UpsertCoordinator::new(&store, DEST, 100, CorrelationEngine::disabled(&store));
        let outcome = upsert
            .stage(record(json!({"host": "www.example.com"}), 1), vector())
            .await
            .unwrap();
        upsert.finish().await;

        assert_eq!(outcome, UpsertOutcome::Updated(PointKey::Num(7)));
        let payload = store.get_payload(DEST, &PointKey::Num(7)).unwrap();
        assert_eq!(payload["correlation_status"], "matched");
        assert_eq!(payload["linked_record_id"], 3);
        assert_eq!(payload["linked_collection"], "subfinder");
        assert_eq!(payload["latest_tls_record_id"], 99);
        assert_eq!(payload["id"], 7);
    }

    #[tokio::test]
    async fn test_failed_batch_writes_no_backrefs() {
        let store = store_with_dest().await;
        store.insert_point(
            "subfinder",
            RecordPoint {
                id: PointKey::Num(5),
                vector: vector(),
                payload: json!({"host": "www.example.com"}).as_object().unwrap().clone(),
            },
        );
        store.fail_next_upserts(1);

        let engine = CorrelationEngine::new(&store, vec!["subfinder".to_string()], DEST);
        let mut upsert = UpsertCoordinator::new(&store, DEST, 1, engine);

        upsert
            .stage(record(json!({"host": "www.example.com"}), 1), vector())
            .await
            .unwrap();
        upsert
            .stage(record(json!({"host": "api.example.com"}), 2), vector())
            .await
            .unwrap();
        upsert.finish().await;

        assert_eq!(upsert.stats().errors, 1);
        assert_eq!(upsert.stats().failed_batches, 1);
        assert_eq!(upsert.stats().inserted, 1);
        assert_eq!(store.set_payload_calls(), 0);
        assert_eq!(upsert.correlation_stats().matched, 1);
        assert_eq!(upsert.correlation_stats().backrefs_updated, 0);
    }

    #[tokio::test]
    async fn test_key_from_lost_batch_is_inserted_again() {
        let store = store_with_dest().await;
        store.fail_next_upserts(1);

        let mut upsert = UpsertCoordinator::new(&store, DEST, 1, CorrelationEngine::disabled(&store));
        upsert
            .stage(record(json!({"host": "www.example.com"}), 1), vector())
            .await
            .unwrap();
        let retry = upsert
            .stage(record(json!({"host": "www.example.com"}), 2), vector())
            .await
            .unwrap();
        upsert.finish().await;

        assert!(matches!(retry, UpsertOutcome::Inserted(PointKey::Num(_))));
        assert_eq!(upsert.stats().inserted, 1);
        assert_eq!(upsert.stats().updated, 0);
        assert_eq!(upsert.stats().errors, 1);
        assert_eq!(store.point_count(DEST), 1);
    }

    #[tokio::test]
    async fn test_replaced_duplicate_keeps_earlier_match() {
        let store = store_with_dest().await;
        store.insert_point(
            "subfinder",
            RecordPoint {
                id: PointKey::Num(5),
                vector: vector(),
                payload: json!({"host": "www.example.com"}).as_object().unwrap().clone(),
            },
        );

        let engine = CorrelationEngine::new(&store, vec!["subfinder".to_string()], DEST);
        let mut upsert = UpsertCoordinator::new(&store, DEST, 100, engine);
        upsert
            .stage(record(json!({"host": "www.example.com", "a": ["1.1.1.1"]}), 1), vector())
            .await
            .unwrap();

        // the second lookup fails, so the later duplicate is unmatched
        store.fail_reads_from("subfinder");
        upsert
            .stage(record(json!({"host": "www.example.com", "a": ["2.2.2.2"]}), 2), vector())
            .await
            .unwrap();
        upsert.finish().await;

        assert_eq!(upsert.correlation_stats().unmatched, 1);
        assert_eq!(upsert.correlation_stats().backrefs_updated, 1);

        let stored = store.get_payload(DEST, &PointKey::Num(1)).unwrap();
        assert_eq!(stored["correlation_status"], "matched");
        assert_eq!(stored["linked_collection"], "subfinder");
        assert_eq!(stored["a"], json!(["2.2.2.2"]));

        let linked = store.get_payload("subfinder", &PointKey::Num(5)).unwrap();
        assert_eq!(linked["latest_dns_record_id"], 1);
        assert_eq!(linked["resolved_ips"], json!(["2.2.2.2"]));
    }

    #[tokio::test]
    async fn test_matched_record_links_both_ways() {
        let store = store_with_dest().await;
        store.insert_point(
            "subfinder",
            RecordPoint {
                id: PointKey::Num(5),
                vector: vector(),
                payload: json!({"host": "www.example.com"}).as_object().unwrap().clone(),
            },
        );

        let engine = CorrelationEngine::new(&store, vec!["subfinder".to_string()], DEST);
        let mut upsert = UpsertCoordinator::new(&store, DEST, 100, engine);
        upsert
            .stage(record(json!({"host": "www.example.com", "a": ["93.184.216.34"]}), 1), vector())
            .await
            .unwrap();
        assert_eq!(store.set_payload_calls(), 0);
        upsert.finish().await;

        let stored = store.get_payload(DEST, &PointKey::Num(1)).unwrap();
        assert_eq!(stored["correlation_status"], "matched");
        assert_eq!(stored["linked_record_id"], 5);
        assert_eq!(stored["linked_collection"], "subfinder");

        let linked = store.get_payload("subfinder", &PointKey::Num(5)).unwrap();
        assert_eq!(linked["latest_dns_record_id"], 1);
        assert_eq!(linked["resolved_ips"], json!(["93.184.216.34"]));
    }
}
