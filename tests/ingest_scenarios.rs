//! End-to-end ingest runs against the in-memory store

use recon_ingest::commands::{cmd_ingest, IngestOptions};
use recon_ingest::embed::EmbeddingStrategy;
use recon_ingest::error::Error;
use recon_ingest::normalize::{NormalizeOptions, Tool};
use recon_ingest::store::{MemoryStore, PointKey, RecordPoint, VectorStore};
use serde_json::{json, Value};
use std::io::Write;
use tempfile::NamedTempFile;

const DIM: usize = 8;

fn input_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn options(tool: Tool, file: &NamedTempFile) -> IngestOptions {
    let mut options = IngestOptions::new(tool, file.path());
    options.normalize = NormalizeOptions {
        timestamp: "2024-05-01T00:00:00Z".to_string(),
        omit_raw: false,
    };
    options
}

fn seed(store: &MemoryStore, collection: &str, id: u64, payload: Value) {
    store.insert_point(
        collection,
        RecordPoint {
            id: PointKey::Num(id),
            vector: vec![0.0; DIM],
            payload: payload.as_object().unwrap().clone(),
        },
    );
}

#[tokio::test]
async fn fresh_record_is_inserted_unmatched() {
    let store = MemoryStore::new();
    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(r#"[{"host": "www.example.com", "a": ["93.184.216.34"]}]"#);

    let stats = cmd_ingest(&store, &embedder, &options(Tool::Dnsx, &file))
        .await
        .unwrap();

    assert_eq!(stats.total, 1);
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.updated, 0);
    assert_eq!(stats.errors, 0);
    assert!(stats.collection_created);

    let payload = store.get_payload("dnsx_records", &PointKey::Num(1)).unwrap();
    assert_eq!(payload["hostname"], "www.example.com");
    assert_eq!(payload["source_tool"], "dnsx");
    assert_eq!(payload["correlation_status"], "unmatched");
    assert_eq!(payload["linked_record_id"], Value::Null);
    assert_eq!(
        store.get_vector("dnsx_records", &PointKey::Num(1)).unwrap().len(),
        DIM
    );
}

#[tokio::test]
async fn rerun_updates_in_place_and_keeps_id() {
    let store = MemoryStore::new();
    let embedder = EmbeddingStrategy::hashed(DIM);

    let first = input_file(r#"[{"host": "www.example.com", "a": ["93.184.216.34"]}]"#);
    cmd_ingest(&store, &embedder, &options(Tool::Dnsx, &first))
        .await
        .unwrap();

    let second = input_file(r#"[{"host": "WWW.Example.com", "a": ["93.184.216.35"]}]"#);
    let stats = cmd_ingest(&store, &embedder, &options(Tool::Dnsx, &second))
        .await
        .unwrap();

    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.updated, 1);
    assert_eq!(store.point_count("dnsx_records"), 1);

    let payload = store.get_payload("dnsx_records", &PointKey::Num(1)).unwrap();
    assert_eq!(payload["a"], json!(["93.184.216.35"]));
    assert_eq!(payload["id"], 1);
}

#[tokio::test]
async fn batch_size_one_issues_one_write_per_record() {
    let store = MemoryStore::new();
    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(
        r#"[{"host": "a.example.com"}, {"host": "b.example.com"}, {"host": "c.example.com"}]"#,
    );

    let mut opts = options(Tool::Dnsx, &file);
    opts.batch_size = 1;
    let stats = cmd_ingest(&store, &embedder, &opts).await.unwrap();

    assert_eq!(stats.inserted, 3);
    assert_eq!(store.upsert_calls(), 3);
}

#[tokio::test]
async fn correlation_follows_priority_and_writes_backrefs() {
    let store = MemoryStore::new();
    seed(&store, "subfinder", 3, json!({"host": "www.example.com"}));
    seed(&store, "amass", 9, json!({"hostname": "www.example.com"}));

    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(r#"[{"host": "www.example.com", "a": ["93.184.216.34"]}]"#);
    let stats = cmd_ingest(&store, &embedder, &options(Tool::Dnsx, &file))
        .await
        .unwrap();

    assert_eq!(stats.correlated, 1);
    assert_eq!(stats.correlation.backrefs_updated, 1);

    let record = store.get_payload("dnsx_records", &PointKey::Num(1)).unwrap();
    assert_eq!(record["correlation_status"], "matched");
    assert_eq!(record["linked_record_id"], 3);
    assert_eq!(record["linked_collection"], "subfinder");

    let linked = store.get_payload("subfinder", &PointKey::Num(3)).unwrap();
    assert_eq!(linked["latest_dns_record_id"], 1);
    assert_eq!(linked["dns_correlation_status"], "active");

    let untouched = store.get_payload("amass", &PointKey::Num(9)).unwrap();
    assert!(!untouched.contains_key("latest_dns_record_id"));
}

#[tokio::test]
async fn empty_hostname_is_stored_without_probing() {
    let store = MemoryStore::new();
    seed(&store, "subfinder", 3, json!({"host": "www.example.com"}));

    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(r#"[{"resolver": ["1.1.1.1:53"]}]"#);
    let stats = cmd_ingest(&store, &embedder, &options(Tool::Dnsx, &file))
        .await
        .unwrap();

    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.correlation.unmatched, 1);
    assert!(store.probed_collections().is_empty());
}

#[tokio::test]
async fn malformed_jsonl_line_is_counted_and_skipped() {
    let store = MemoryStore::new();
    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(
        "{\"host\": \"a.example.com\"}\n{\"host\": \"b.example.com\"\n{\"host\": \"c.example.com\"}\n",
    );

    let stats = cmd_ingest(&store, &embedder, &options(Tool::Dnsx, &file))
        .await
        .unwrap();

    assert_eq!(stats.total, 3);
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.errors, 1);
}

#[tokio::test]
async fn unreachable_store_aborts_before_any_write() {
    let store = MemoryStore::new();
    store.set_offline(true);

    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(r#"[{"host": "www.example.com"}]"#);
    let err = cmd_ingest(&store, &embedder, &options(Tool::Dnsx, &file))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Connection { .. }));
    assert_eq!(store.upsert_calls(), 0);
}

#[tokio::test]
async fn incompatible_collection_is_rejected() {
    let store = MemoryStore::new();
    store.create_collection("dnsx_records", 16).await.unwrap();

    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(r#"[{"host": "www.example.com"}]"#);
    let err = cmd_ingest(&store, &embedder, &options(Tool::Dnsx, &file))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn nuclei_findings_are_keyed_by_template_and_host() {
    let store = MemoryStore::new();
    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(concat!(
        "{\"template-id\": \"tls-version\", \"host\": \"https://www.example.com\", \"info\": {\"name\": \"TLS Version\", \"severity\": \"info\"}}\n",
        "{\"template-id\": \"CVE-2021-44228\", \"host\": \"https://www.example.com\", \"info\": {\"name\": \"Log4j\", \"severity\": \"critical\", \"tags\": [\"cve\", \"cve2021\"]}}\n",
        "{\"template-id\": \"tls-version\", \"host\": \"https://www.example.com\", \"info\": {\"name\": \"TLS Version\", \"severity\": \"info\"}}\n",
    ));

    let stats = cmd_ingest(&store, &embedder, &options(Tool::Nuclei, &file))
        .await
        .unwrap();

    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.updated, 1);
    assert_eq!(store.point_count("nuclei_results"), 2);
    assert_eq!(stats.severity_counts["info"], 2);
    assert_eq!(stats.severity_counts["critical"], 1);
}

#[tokio::test]
async fn nuclei_findings_attach_to_dns_records_by_default() {
    let store = MemoryStore::new();
    seed(&store, "dnsx_records", 5, json!({"hostname": "www.example.com"}));

    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(
        "{\"template-id\": \"CVE-2021-44228\", \"host\": \"https://www.example.com\", \"info\": {\"name\": \"Log4j\", \"severity\": \"critical\"}}\n",
    );

    let stats = cmd_ingest(&store, &embedder, &options(Tool::Nuclei, &file))
        .await
        .unwrap();

    assert_eq!(stats.correlated, 1);
    assert_eq!(stats.correlation.backrefs_updated, 1);

    let finding = store.get_payload("nuclei_results", &PointKey::Num(1)).unwrap();
    assert_eq!(finding["correlation_status"], "matched");
    assert_eq!(finding["linked_record_id"], 5);
    assert_eq!(finding["linked_collection"], "dnsx_records");

    let host = store.get_payload("dnsx_records", &PointKey::Num(5)).unwrap();
    assert_eq!(host["latest_nuclei_record_id"], 1);
    assert_eq!(host["latest_nuclei_severity"], "critical");
    assert_eq!(host["latest_nuclei_template"], "CVE-2021-44228");
    assert_eq!(host["nuclei_correlation_status"], "active");
}

#[tokio::test]
async fn skipped_correlation_never_probes() {
    let store = MemoryStore::new();
    seed(&store, "subfinder", 3, json!({"host": "www.example.com"}));

    let embedder = EmbeddingStrategy::hashed(DIM);
    let file = input_file(r#"[{"domain": "www.example.com", "whois_data": {"registrar": "Example Registrar"}}]"#);
    let mut opts = options(Tool::Whois, &file);
    opts.correlation_collections = None;

    let stats = cmd_ingest(&store, &embedder, &opts).await.unwrap();
    assert_eq!(stats.correlated, 0);
    // only the destination lookup by upsert key
    assert_eq!(store.probed_collections(), vec!["whois_records"]);
}
