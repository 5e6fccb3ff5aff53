//! In-memory [`VectorStore`] implementation for tests and dry runs.
//!
//! Collections live in a `BTreeMap` behind `std::sync::RwLock`, so
//! `find_first` returns the lowest matching id. Every write call is counted
//! and failures can be injected per collection.

use super::{
    CollectionDescriptor, PointFilter, PointKey, RecordPoint, StoredPoint, VectorStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

struct MemCollection {
    vector_size: u64,
    indexed_fields: BTreeSet<String>,
    points: BTreeMap<PointKey, (Vec<f32>, Map<String, Value>)>,
}

/// In-memory store
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemCollection>>,
    offline: AtomicBool,
    failing_reads: Mutex<HashSet<String>>,
    failing_upserts: AtomicUsize,
    upsert_calls: AtomicUsize,
    set_payload_calls: AtomicUsize,
    probes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            failing_reads: Mutex::new(HashSet::new()),
            failing_upserts: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
            set_payload_calls: AtomicUsize::new(0),
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Make every call fail as if the server were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make lookups against one collection fail
    pub fn fail_reads_from(&self, collection: &str) {
        lock(&self.failing_reads).insert(collection.to_string());
    }

    /// Make the next `count` upsert calls fail
    pub fn fail_next_upserts(&self, count: usize) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }

    /// Number of `upsert_points` calls received, including failed ones
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Number of `set_payload` calls received
    pub fn set_payload_calls(&self) -> usize {
        self.set_payload_calls.load(Ordering::SeqCst)
    }

    /// Collections searched with `find_first`, in call order
    pub fn probed_collections(&self) -> Vec<String> {
        lock(&self.probes).clone()
    }

    /// Payload of one point, if present
    pub fn get_payload(&self, collection: &str, id: &PointKey) -> Option<Map<String, Value>> {
        let collections = self.collections.read().ok()?;
        collections
            .get(collection)?
            .points
            .get(id)
            .map(|(_, payload)| payload.clone())
    }

    /// Vector of one point, if present
    pub fn get_vector(&self, collection: &str, id: &PointKey) -> Option<Vec<f32>> {
        let collections = self.collections.read().ok()?;
        collections
            .get(collection)?
            .points
            .get(id)
            .map(|(vector, _)| vector.clone())
    }

    /// Number of points in a collection (0 if absent)
    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .ok()
            .and_then(|c| c.get(collection).map(|c| c.points.len()))
            .unwrap_or(0)
    }

    /// Seed a point directly, creating the collection if needed
    pub fn insert_point(&self, collection: &str, point: RecordPoint) {
        if let Ok(mut collections) = self.collections.write() {
            let entry = collections
                .entry(collection.to_string())
                .or_insert_with(|| MemCollection {
                    vector_size: point.vector.len() as u64,
                    indexed_fields: BTreeSet::new(),
                    points: BTreeMap::new(),
                });
            entry.points.insert(point.id, (point.vector, point.payload));
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Connection {
                url: "memory://".to_string(),
                reason: "store is offline".to_string(),
            });
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, MemCollection>>> {
        self.collections
            .read()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, MemCollection>>> {
        self.collections
            .write()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn missing(collection: &str) -> Error {
    Error::Qdrant(format!("Collection '{}' not found", collection))
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        self.check_online()
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self.read()?.contains_key(collection))
    }

    async fn describe_collection(&self, collection: &str) -> Result<Option<CollectionDescriptor>> {
        self.check_online()?;
        Ok(self.read()?.get(collection).map(|c| CollectionDescriptor {
            vector_sizes: vec![("default".to_string(), c.vector_size)],
            indexed_fields: c.indexed_fields.iter().cloned().collect(),
            points_count: c.points.len() as u64,
        }))
    }

    async fn create_collection(&self, collection: &str, vector_size: u64) -> Result<()> {
        self.check_online()?;
        let mut collections = self.write()?;
        if collections.contains_key(collection) {
            return Err(Error::Qdrant(format!(
                "Collection '{}' already exists",
                collection
            )));
        }
        collections.insert(
            collection.to_string(),
            MemCollection {
                vector_size,
                indexed_fields: BTreeSet::new(),
                points: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn create_keyword_index(&self, collection: &str, field: &str) -> Result<()> {
        self.check_online()?;
        let mut collections = self.write()?;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        entry.indexed_fields.insert(field.to_string());
        Ok(())
    }

    async fn find_first(
        &self,
        collection: &str,
        filter: &PointFilter,
    ) -> Result<Option<StoredPoint>> {
        self.check_online()?;
        lock(&self.probes).push(collection.to_string());

        if lock(&self.failing_reads).contains(collection) {
            return Err(Error::Qdrant(format!(
                "Injected read failure for '{}'",
                collection
            )));
        }

        let collections = self.read()?;
        let entry = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(entry
            .points
            .iter()
            .find(|(_, (_, payload))| filter.matches(payload))
            .map(|(id, (_, payload))| StoredPoint {
                id: id.clone(),
                payload: payload.clone(),
            }))
    }

    async fn max_numeric_id(&self, collection: &str) -> Result<Option<u64>> {
        self.check_online()?;
        let collections = self.read()?;
        let entry = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(entry.points.keys().filter_map(PointKey::as_num).max())
    }

    async fn upsert_points(&self, collection: &str, points: Vec<RecordPoint>) -> Result<()> {
        self.check_online()?;
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failing_upserts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_upserts.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Qdrant("Injected upsert failure".to_string()));
        }

        let mut collections = self.write()?;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;

        if let Some(bad) = points
            .iter()
            .find(|p| p.vector.len() as u64 != entry.vector_size)
        {
            return Err(Error::Qdrant(format!(
                "Vector dimension mismatch for collection '{}': expected {}, got {}",
                collection,
                entry.vector_size,
                bad.vector.len()
            )));
        }

        for point in points {
            entry.points.insert(point.id, (point.vector, point.payload));
        }
        Ok(())
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: &PointKey,
        payload: Map<String, Value>,
    ) -> Result<()> {
        self.check_online()?;
        self.set_payload_calls.fetch_add(1, Ordering::SeqCst);

        let mut collections = self.write()?;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        let (_, existing) = entry
            .points
            .get_mut(id)
            .ok_or_else(|| Error::Qdrant(format!("Point {} not found in '{}'", id, collection)))?;
        existing.extend(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldMatch;
    use serde_json::json;

    fn point(id: u64, host: &str) -> RecordPoint {
        RecordPoint {
            id: PointKey::Num(id),
            vector: vec![0.0; 4],
            payload: json!({"hostname": host}).as_object().unwrap().clone(),
        }
    }

    #[tokio::test]
    async fn test_find_first_returns_lowest_id() {
        let store = MemoryStore::new();
        store.create_collection("subfinder", 4).await.unwrap();
        store
            .upsert_points("subfinder", vec![point(9, "a.example.com"), point(3, "a.example.com")])
            .await
            .unwrap();

        let filter = PointFilter::must(vec![FieldMatch::keyword("hostname", "a.example.com")]);
        let hit = store.find_first("subfinder", &filter).await.unwrap().unwrap();
        assert_eq!(hit.id, PointKey::Num(3));
        assert_eq!(store.max_numeric_id("subfinder").await.unwrap(), Some(9));
        assert_eq!(store.probed_collections(), vec!["subfinder"]);
    }

    #[tokio::test]
    async fn test_missing_collection_errors() {
        let store = MemoryStore::new();
        let filter = PointFilter::must(vec![FieldMatch::keyword("hostname", "x")]);
        assert!(store.find_first("nope", &filter).await.is_err());
        assert!(!store.collection_exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_payload_merges_fields() {
        let store = MemoryStore::new();
        store.create_collection("subfinder", 4).await.unwrap();
        store
            .upsert_points("subfinder", vec![point(1, "a.example.com")])
            .await
            .unwrap();

        let update = json!({"latest_dns_record_id": 5}).as_object().unwrap().clone();
        store
            .set_payload("subfinder", &PointKey::Num(1), update)
            .await
            .unwrap();

        let payload = store.get_payload("subfinder", &PointKey::Num(1)).unwrap();
        assert_eq!(payload["hostname"], "a.example.com");
        assert_eq!(payload["latest_dns_record_id"], 5);
        assert_eq!(store.set_payload_calls(), 1);
    }

    #[tokio::test]
    async fn test_offline_store_fails_health_check() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.health_check().await,
            Err(Error::Connection { .. })
        ));
    }
}
