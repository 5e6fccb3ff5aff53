//! Hostname correlation against host inventory collections
//!
//! Candidates are probed in list order and the first collection holding a
//! point whose `hostname` or `host` equals the record's hostname wins.
//! Missing or failing collections count as "no match" and never abort a run.

use crate::normalize::Record;
use crate::store::{FieldMatch, PointFilter, PointKey, VectorStore};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Subdomain enumeration collections, the default for host-level records
pub const SUBDOMAIN_CORRELATION_COLLECTIONS: [&str; 4] =
    ["subdomains_collection", "subfinder", "sublist3r", "amass"];

/// Host inventory collections a nuclei finding is attached to
pub const NUCLEI_CORRELATION_COLLECTIONS: [&str; 4] = [
    "dnsx_records",
    "nmap_results",
    "whois_records",
    "subdomains_collection",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationStatus {
    Matched,
    Unmatched,
}

impl CorrelationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationStatus::Matched => "matched",
            CorrelationStatus::Unmatched => "unmatched",
        }
    }
}

/// Outcome of correlating one hostname
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationLink {
    pub status: CorrelationStatus,
    pub record_id: Option<PointKey>,
    pub collection: Option<String>,
}

impl CorrelationLink {
    pub fn unmatched() -> Self {
        Self {
            status: CorrelationStatus::Unmatched,
            record_id: None,
            collection: None,
        }
    }

    pub fn matched(record_id: PointKey, collection: impl Into<String>) -> Self {
        Self {
            status: CorrelationStatus::Matched,
            record_id: Some(record_id),
            collection: Some(collection.into()),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.status == CorrelationStatus::Matched
    }

    /// Payload fields describing this link
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert(
            "correlation_status".to_string(),
            Value::String(self.status.as_str().to_string()),
        );
        payload.insert(
            "linked_record_id".to_string(),
            self.record_id
                .as_ref()
                .map(PointKey::to_json)
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "linked_collection".to_string(),
            self.collection.clone().map(Value::String).unwrap_or(Value::Null),
        );
        payload
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrelationStats {
    pub matched: usize,
    pub unmatched: usize,
    pub backrefs_updated: usize,
    pub errors: usize,
}

/// Ordered hostname lookup over candidate collections
pub struct CorrelationEngine<'a> {
    store: &'a dyn VectorStore,
    candidates: Vec<String>,
    enabled: bool,
    /// Per-run cache of which candidates exist
    available: HashMap<String, bool>,
    stats: CorrelationStats,
}

impl<'a> CorrelationEngine<'a> {
    /// Build an engine; `destination` is dropped from the candidates
    pub fn new(store: &'a dyn VectorStore, candidates: Vec<String>, destination: &str) -> Self {
        let mut ordered: Vec<String> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate == destination {
                debug!(
                    "Not correlating against destination collection '{}'",
                    destination
                );
                continue;
            }
            if !ordered.contains(&candidate) {
                ordered.push(candidate);
            }
        }

        Self {
            store,
            candidates: ordered,
            enabled: true,
            available: HashMap::new(),
            stats: CorrelationStats::default(),
        }
    }

    /// An engine that reports every hostname as unmatched without probing
    pub fn disabled(store: &'a dyn VectorStore) -> Self {
        Self {
            store,
            candidates: Vec::new(),
            enabled: false,
            available: HashMap::new(),
            stats: CorrelationStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }

    /// Find the first candidate collection holding `hostname`
    pub async fn correlate(&mut self, hostname: &str) -> CorrelationLink {
        if !self.enabled || hostname.is_empty() {
            self.stats.unmatched += 1;
            return CorrelationLink::unmatched();
        }

        let filter = PointFilter::any_of(vec![
            FieldMatch::keyword("hostname", hostname),
            FieldMatch::keyword("host", hostname),
        ]);

        for index in 0..self.candidates.len() {
            let collection = self.candidates[index].clone();
            if !self.is_available(&collection).await {
                continue;
            }

            match self.store.find_first(&collection, &filter).await {
                Ok(Some(point)) => {
                    debug!(
                        "Correlated {} with point {} in '{}'",
                        hostname, point.id, collection
                    );
                    self.stats.matched += 1;
                    return CorrelationLink::matched(point.id, collection);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Correlation lookup in '{}' failed: {}", collection, e);
                    self.stats.errors += 1;
                }
            }
        }

        self.stats.unmatched += 1;
        CorrelationLink::unmatched()
    }

    async fn is_available(&mut self, collection: &str) -> bool {
        if let Some(available) = self.available.get(collection) {
            return *available;
        }

        let available = match self.store.collection_exists(collection).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    "Correlation collection '{}' does not exist, skipping it",
                    collection
                );
                false
            }
            Err(e) => {
                warn!(
                    "Could not check correlation collection '{}': {}",
                    collection, e
                );
                self.stats.errors += 1;
                false
            }
        };

        self.available.insert(collection.to_string(), available);
        available
    }

    /// Record on the linked point that `record` (stored as `point_id`) refers to it
    pub async fn write_backref(
        &mut self,
        record: &Record,
        point_id: &PointKey,
        link: &CorrelationLink,
    ) -> bool {
        let (Some(target_id), Some(collection)) = (&link.record_id, &link.collection) else {
            return false;
        };

        let payload = backref_payload(record, point_id);
        match self.store.set_payload(collection, target_id, payload).await {
            Ok(()) => {
                self.stats.backrefs_updated += 1;
                true
            }
            Err(e) => {
                warn!(
                    "Failed to update back-reference on {} in '{}': {}",
                    target_id, collection, e
                );
                self.stats.errors += 1;
                false
            }
        }
    }
}

/// Fields written onto a correlated point
pub fn backref_payload(record: &Record, point_id: &PointKey) -> Map<String, Value> {
    let tag = record.tool.backref_tag();

    let mut payload = Map::new();
    payload.insert(format!("latest_{}_record_id", tag), point_id.to_json());
    payload.insert(
        format!("latest_{}_timestamp", tag),
        Value::String(record.timestamp.clone()),
    );
    payload.insert(
        format!("{}_correlation_status", tag),
        Value::String("active".to_string()),
    );
    payload.extend(record.backref_summary());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize_record, NormalizeOptions, Tool};
    use crate::store::{MemoryStore, RecordPoint};
    use serde_json::json;

    fn seed(store: &MemoryStore, collection: &str, id: u64, payload: Value) {
        store.insert_point(
            collection,
            RecordPoint {
                id: PointKey::Num(id),
                vector: vec![0.0; 4],
                payload: payload.as_object().unwrap().clone(),
            },
        );
    }

    fn defaults() -> Vec<String> {
        SUBDOMAIN_CORRELATION_COLLECTIONS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_first_candidate_in_list_order_wins() {
        let store = MemoryStore::new();
        seed(&store, "subfinder", 3, json!({"host": "www.example.com"}));
        seed(&store, "amass", 9, json!({"hostname": "www.example.com"}));

        let mut engine = CorrelationEngine::new(&store, defaults(), "dnsx_records");
        let link = engine.correlate("www.example.com").await;

        assert_eq!(link, CorrelationLink::matched(PointKey::Num(3), "subfinder"));
        // amass is never reached
        assert_eq!(store.probed_collections(), vec!["subfinder"]);
        assert_eq!(engine.stats().matched, 1);
    }

    #[tokio::test]
    async fn test_empty_hostname_and_disabled_do_not_probe() {
        let store = MemoryStore::new();
        seed(&store, "subfinder", 1, json!({"host": "www.example.com"}));

        let mut engine = CorrelationEngine::new(&store, defaults(), "dnsx_records");
        assert_eq!(engine.correlate("").await, CorrelationLink::unmatched());

        let mut disabled = CorrelationEngine::disabled(&store);
        assert!(!disabled.correlate("www.example.com").await.is_matched());

        assert!(store.probed_collections().is_empty());
    }

    #[tokio::test]
    async fn test_failing_collection_is_treated_as_no_match() {
        let store = MemoryStore::new();
        seed(&store, "subdomains_collection", 1, json!({"hostname": "other.example.com"}));
        seed(&store, "subfinder", 2, json!({"hostname": "www.example.com"}));
        store.fail_reads_from("subdomains_collection");

        let mut engine = CorrelationEngine::new(&store, defaults(), "dnsx_records");
        let link = engine.correlate("www.example.com").await;

        assert_eq!(link.collection.as_deref(), Some("subfinder"));
        assert_eq!(engine.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_destination_and_missing_collections_are_skipped() {
        let store = MemoryStore::new();
        seed(&store, "subdomains_collection", 1, json!({"hostname": "www.example.com"}));

        let mut engine = CorrelationEngine::new(&store, defaults(), "subdomains_collection");
        assert_eq!(engine.candidates(), &["subfinder", "sublist3r", "amass"]);

        assert!(!engine.correlate("www.example.com").await.is_matched());
        assert!(!engine.correlate("api.example.com").await.is_matched());
        assert!(store.probed_collections().is_empty());
        assert_eq!(engine.stats().unmatched, 2);
    }

    #[tokio::test]
    async fn test_backref_payload_for_dns_record() {
        let store = MemoryStore::new();
        seed(&store, "subfinder", 4, json!({"host": "www.example.com"}));

        let options = NormalizeOptions {
            timestamp: "2024-05-01T00:00:00Z".to_string(),
            omit_raw: true,
        };
        let record = normalize_record(
            Tool::Dnsx,
            json!({"host": "www.example.com", "a": ["93.184.216.34"]}),
            1,
            &options,
        )
        .unwrap();

        let mut engine = CorrelationEngine::new(&store, defaults(), "dnsx_records");
        let link = engine.correlate(&record.hostname).await;
        assert!(engine.write_backref(&record, &PointKey::Num(12), &link).await);

        let payload = store.get_payload("subfinder", &PointKey::Num(4)).unwrap();
        assert_eq!(payload["host"], "www.example.com");
        assert_eq!(payload["latest_dns_record_id"], 12);
        assert_eq!(payload["latest_dns_timestamp"], "2024-05-01T00:00:00Z");
        assert_eq!(payload["dns_correlation_status"], "active");
        assert_eq!(payload["resolved_ips"], json!(["93.184.216.34"]));
        assert_eq!(engine.stats().backrefs_updated, 1);
    }
}
