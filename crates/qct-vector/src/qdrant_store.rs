//! Qdrant implementation for content storage
//!
//! Stores each content point as a Qdrant point whose payload is
//! `{"content": <text>, "metadata": {...}}`. Metadata filters match
//! on `metadata.<key>`.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use qct_core::{
    ContentPoint, Metadata, MetadataFilter, MetadataValue, QctError, Result, ScoredPoint,
    StoreConfig,
};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CollectionInfo, Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    GetPointsBuilder, PointId, PointStruct, PointsIdsList, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::{check_dimension, VectorStore};

/// Qdrant vector store implementation
pub struct QdrantStore {
    client: Qdrant,
    /// Vector sizes of collections seen so far
    dimensions: RwLock<HashMap<String, usize>>,
}

impl QdrantStore {
    /// Create a new Qdrant connection
    pub fn new(config: &StoreConfig, timeout: Duration) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.qdrant_url).timeout(timeout);
        if let Some(api_key) = &config.qdrant_api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| QctError::Config(format!("Qdrant connection failed: {e}")))?;

        Ok(Self::from_client(client))
    }

    /// Wrap an existing client
    pub fn from_client(client: Qdrant) -> Self {
        Self {
            client,
            dimensions: RwLock::new(HashMap::new()),
        }
    }

    fn cached_dimension(&self, collection: &str) -> Option<usize> {
        self.dimensions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(collection)
            .copied()
    }

    fn remember_dimension(&self, collection: &str, dimension: usize) {
        self.dimensions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(collection.to_string(), dimension);
    }

    /// Configured vector size of an existing collection.
    ///
    /// `None` for collections with named vectors, which are not checked.
    async fn collection_dimension(&self, collection: &str) -> Result<Option<usize>> {
        if let Some(dimension) = self.cached_dimension(collection) {
            return Ok(Some(dimension));
        }

        let response = self
            .client
            .collection_info(collection)
            .await
            .map_err(Self::map_err)?;

        let dimension = response.result.as_ref().and_then(vector_size);
        if let Some(dimension) = dimension {
            self.remember_dimension(collection, dimension);
        }
        Ok(dimension)
    }

    fn map_err(e: QdrantError) -> QctError {
        QctError::VectorStore {
            backend: "qdrant".to_string(),
            message: e.to_string(),
        }
    }
}

/// Convert a point identifier into a Qdrant point id.
///
/// Qdrant accepts unsigned integers and UUIDs only.
fn to_point_id(point_id: &str) -> Result<PointId> {
    if let Ok(num) = point_id.parse::<u64>() {
        return Ok(PointId::from(num));
    }

    Uuid::parse_str(point_id)
        .map(|uuid| PointId::from(uuid.to_string()))
        .map_err(|_| {
            QctError::Validation(format!(
                "point_id '{point_id}' must be a UUID or an unsigned integer"
            ))
        })
}

fn from_point_id(point_id: Option<&PointId>) -> String {
    point_id
        .and_then(|pid| match &pid.point_id_options {
            Some(PointIdOptions::Uuid(s)) => Some(s.clone()),
            Some(PointIdOptions::Num(n)) => Some(n.to_string()),
            None => None,
        })
        .unwrap_or_default()
}

fn extract_string(value: &QdrantValue) -> Option<String> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn to_metadata_value(value: &QdrantValue) -> Option<MetadataValue> {
    match value.kind.as_ref()? {
        Kind::StringValue(s) => Some(MetadataValue::String(s.clone())),
        Kind::IntegerValue(i) => Some(MetadataValue::Integer(*i)),
        Kind::DoubleValue(d) => Some(MetadataValue::Float(*d)),
        Kind::BoolValue(b) => Some(MetadataValue::Bool(*b)),
        Kind::ListValue(list) => Some(MetadataValue::List(
            list.values.iter().filter_map(extract_string).collect(),
        )),
        Kind::NullValue(_) | Kind::StructValue(_) => None,
    }
}

/// Rebuild a content point from its stored payload. Vectors are not loaded.
fn point_from_payload(id: String, payload: &HashMap<String, QdrantValue>) -> ContentPoint {
    let content = payload
        .get("content")
        .and_then(extract_string)
        .unwrap_or_default();

    let metadata: Metadata = payload
        .get("metadata")
        .and_then(|v| match &v.kind {
            Some(Kind::StructValue(s)) => Some(
                s.fields
                    .iter()
                    .filter_map(|(k, v)| to_metadata_value(v).map(|m| (k.clone(), m)))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default();

    ContentPoint {
        id,
        vector: Vec::new(),
        content,
        metadata,
    }
}

/// Size of the unnamed vector of a collection
fn vector_size(info: &CollectionInfo) -> Option<usize> {
    let vectors = info.config.as_ref()?.params.as_ref()?.vectors_config.as_ref()?;
    match vectors.config.as_ref()? {
        VectorsConfigKind::Params(params) => usize::try_from(params.size).ok(),
        VectorsConfigKind::ParamsMap(_) => None,
    }
}

/// Scroll page size; Qdrant takes a u32
fn scroll_limit(limit: usize) -> Result<u32> {
    u32::try_from(limit)
        .map_err(|_| QctError::Validation(format!("limit {limit} exceeds {}", u32::MAX)))
}

fn to_filter(filter: &MetadataFilter) -> Filter {
    Filter::must([Condition::matches(
        filter.field_path(),
        filter.value.clone(),
    )])
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &str {
        "qdrant"
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let collections = self.client.list_collections().await.map_err(Self::map_err)?;

        Ok(collections
            .collections
            .iter()
            .any(|c| c.name == collection))
    }

    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        if !self.collection_exists(collection).await? {
            let created = self
                .client
                .create_collection(
                    CreateCollectionBuilder::new(collection).vectors_config(
                        VectorParamsBuilder::new(dimension as u64, Distance::Cosine),
                    ),
                )
                .await;

            match created {
                Ok(_) => {
                    debug!(collection, dimension, "created qdrant collection");
                    self.remember_dimension(collection, dimension);
                    return Ok(());
                }
                // Lost a creation race: the collection exists now, check it below
                Err(e) if self.collection_exists(collection).await? => {
                    debug!(collection, error = %e, "collection created concurrently");
                }
                Err(e) => return Err(Self::map_err(e)),
            }
        }

        match self.collection_dimension(collection).await? {
            Some(existing) => check_dimension(collection, existing, dimension),
            None => Ok(()),
        }
    }

    async fn upsert_point(&self, collection: &str, point: &ContentPoint) -> Result<()> {
        let point_id = to_point_id(&point.id)?;
        if !self.collection_exists(collection).await? {
            return Err(QctError::CollectionNotFound(collection.to_string()));
        }
        if let Some(dimension) = self.collection_dimension(collection).await? {
            check_dimension(collection, dimension, point.vector.len())?;
        }

        let payload = Payload::try_from(point.payload())
            .map_err(|e| QctError::Validation(format!("Invalid payload: {e}")))?;

        let point_struct = PointStruct::new(point_id, point.vector.clone(), payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, vec![point_struct]).wait(true))
            .await
            .map_err(Self::map_err)?;

        debug!(collection, point_id = %point.id, "upserted point to qdrant");
        Ok(())
    }

    async fn get_point(&self, collection: &str, point_id: &str) -> Result<Option<ContentPoint>> {
        let id = to_point_id(point_id)?;

        let response = self
            .client
            .get_points(GetPointsBuilder::new(collection, vec![id]).with_payload(true))
            .await
            .map_err(Self::map_err)?;

        Ok(response
            .result
            .into_iter()
            .next()
            .map(|p| point_from_payload(from_point_id(p.id.as_ref()), &p.payload)))
    }

    async fn fetch_points(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<ContentPoint>> {
        let mut request = ScrollPointsBuilder::new(collection)
            .limit(scroll_limit(limit)?)
            .with_payload(true)
            .with_vectors(false);
        if let Some(filter) = filter {
            request = request.filter(to_filter(filter));
        }

        let response = self.client.scroll(request).await.map_err(Self::map_err)?;

        Ok(response
            .result
            .into_iter()
            .map(|p| point_from_payload(from_point_id(p.id.as_ref()), &p.payload))
            .collect())
    }

    async fn delete_point(&self, collection: &str, point_id: &str) -> Result<()> {
        let id = to_point_id(point_id)?;

        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: vec![id] })
                    .wait(true),
            )
            .await
            .map_err(Self::map_err)?;

        debug!(collection, point_id, "deleted point from qdrant");
        Ok(())
    }

    async fn query_nearest(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let mut request = SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64)
            .with_payload(true);
        if let Some(filter) = filter {
            request = request.filter(to_filter(filter));
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(Self::map_err)?;

        Ok(response
            .result
            .into_iter()
            .map(|scored| ScoredPoint {
                point: point_from_payload(from_point_id(scored.id.as_ref()), &scored.payload),
                score: scored.score,
            })
            .collect())
    }
}
