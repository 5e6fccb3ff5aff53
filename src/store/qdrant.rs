//! Qdrant-backed [`VectorStore`]

use super::{
    json_from_qdrant_payload, json_to_qdrant_payload, point_id_to_key, CollectionDescriptor,
    PointFilter, PointKey, RecordPoint, StoredPoint, VectorStore,
};
use crate::config::QdrantConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    vectors_config, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance,
    FieldType, GetCollectionInfoResponse, PointId, PointStruct, PointsIdsList,
    ScrollPointsBuilder, SetPayloadPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::{Map, Value};
use tracing::debug;

/// Qdrant store handle
pub struct QdrantStore {
    client: Qdrant,
    url: String,
}

impl QdrantStore {
    /// Connect to Qdrant using config
    pub fn connect(config: &QdrantConfig) -> Result<Self> {
        Self::new(&config.resolved_url(), config.api_key())
    }

    /// Create a new store connection directly with a URL
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Connection {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn health_check(&self) -> Result<()> {
        let reply = self
            .client
            .health_check()
            .await
            .map_err(|e| Error::Connection {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        debug!("Qdrant {} is healthy", reply.version);
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let exists = self.client.collection_exists(collection).await?;
        Ok(exists)
    }

    async fn describe_collection(&self, collection: &str) -> Result<Option<CollectionDescriptor>> {
        if !self.client.collection_exists(collection).await? {
            return Ok(None);
        }

        let info = self.client.collection_info(collection).await?;
        Ok(Some(describe(&info)))
    }

    async fn create_collection(&self, collection: &str, vector_size: u64) -> Result<()> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
            )
            .await?;
        Ok(())
    }

    async fn create_keyword_index(&self, collection: &str, field: &str) -> Result<()> {
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(collection, field, FieldType::Keyword)
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn find_first(
        &self,
        collection: &str,
        filter: &PointFilter,
    ) -> Result<Option<StoredPoint>> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .filter(filter.to_qdrant_filter())
                    .limit(1)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await?;

        let point = response.result.into_iter().find_map(|p| {
            let id = p.id.as_ref().and_then(point_id_to_key)?;
            Some(StoredPoint {
                id,
                payload: json_from_qdrant_payload(p.payload),
            })
        });

        Ok(point)
    }

    async fn max_numeric_id(&self, collection: &str) -> Result<Option<u64>> {
        let mut max_id: Option<u64> = None;
        let mut offset: Option<PointId> = None;
        let batch_size = 1000u32;

        loop {
            let mut scroll_builder = ScrollPointsBuilder::new(collection)
                .limit(batch_size)
                .with_payload(false)
                .with_vectors(false);

            if let Some(ref o) = offset {
                scroll_builder = scroll_builder.offset(o.clone());
            }

            let response = self.client.scroll(scroll_builder).await?;
            if response.result.is_empty() {
                break;
            }

            for point in &response.result {
                if let Some(n) = point
                    .id
                    .as_ref()
                    .and_then(point_id_to_key)
                    .and_then(|key| key.as_num())
                {
                    max_id = Some(max_id.map_or(n, |m| m.max(n)));
                }
            }

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(max_id)
    }

    async fn upsert_points(&self, collection: &str, points: Vec<RecordPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        debug!("Upserting {} points to collection {}", points.len(), collection);

        let point_structs: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                PointStruct::new(
                    PointId::from(&p.id),
                    p.vector,
                    json_to_qdrant_payload(p.payload),
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, point_structs).wait(true))
            .await?;

        Ok(())
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: &PointKey,
        payload: Map<String, Value>,
    ) -> Result<()> {
        let payload = Payload::from(json_to_qdrant_payload(payload));

        self.client
            .set_payload(
                SetPayloadPointsBuilder::new(collection, payload)
                    .points_selector(PointsIdsList {
                        ids: vec![PointId::from(id)],
                    })
                    .wait(true),
            )
            .await?;

        Ok(())
    }
}

fn describe(info: &GetCollectionInfoResponse) -> CollectionDescriptor {
    let Some(result) = info.result.as_ref() else {
        return CollectionDescriptor::default();
    };

    let vector_sizes = result
        .config
        .as_ref()
        .and_then(|config| config.params.as_ref())
        .and_then(|params| params.vectors_config.as_ref())
        .and_then(|vectors| vectors.config.as_ref())
        .map(|config| match config {
            vectors_config::Config::Params(params) => {
                vec![("default".to_string(), params.size)]
            }
            vectors_config::Config::ParamsMap(map) => map
                .map
                .iter()
                .map(|(name, params)| (name.clone(), params.size))
                .collect(),
        })
        .unwrap_or_default();

    let mut indexed_fields: Vec<String> = result.payload_schema.keys().cloned().collect();
    indexed_fields.sort();

    CollectionDescriptor {
        vector_sizes,
        indexed_fields,
        points_count: result.points_count.unwrap_or(0),
    }
}
