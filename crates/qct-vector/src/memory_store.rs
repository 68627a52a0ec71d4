//! In-memory vector store using cosine similarity.
//!
//! Backed by a map of collections protected by a `tokio::sync::RwLock`.
//! Suitable for tests, local development, and small data sets.

use async_trait::async_trait;
use qct_core::{
    sort_by_relevance, ContentPoint, MetadataFilter, QctError, Result, ScoredPoint,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{check_dimension, VectorStore};

#[derive(Debug)]
struct MemoryCollection {
    dimension: usize,
    points: BTreeMap<String, ContentPoint>,
}

/// In-memory [`VectorStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in a collection, if it exists
    pub async fn point_count(&self, collection: &str) -> Option<usize> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|c| c.points.len())
    }
}

/// Cosine similarity, 0.0 when either vector has zero magnitude
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn passes(filter: Option<&MetadataFilter>, point: &ContentPoint) -> bool {
    filter.map_or(true, |f| f.matches(&point.metadata))
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(collection) {
            return check_dimension(collection, existing.dimension, dimension);
        }

        collections.insert(
            collection.to_string(),
            MemoryCollection {
                dimension,
                points: BTreeMap::new(),
            },
        );
        debug!(collection, dimension, "created memory collection");
        Ok(())
    }

    async fn upsert_point(&self, collection: &str, point: &ContentPoint) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections
            .get_mut(collection)
            .ok_or_else(|| QctError::CollectionNotFound(collection.to_string()))?;

        check_dimension(collection, store.dimension, point.vector.len())?;

        store.points.insert(point.id.clone(), point.clone());
        Ok(())
    }

    async fn get_point(&self, collection: &str, point_id: &str) -> Result<Option<ContentPoint>> {
        let collections = self.collections.read().await;
        let store = collections
            .get(collection)
            .ok_or_else(|| QctError::CollectionNotFound(collection.to_string()))?;
        Ok(store.points.get(point_id).cloned())
    }

    async fn fetch_points(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<ContentPoint>> {
        let collections = self.collections.read().await;
        let store = collections
            .get(collection)
            .ok_or_else(|| QctError::CollectionNotFound(collection.to_string()))?;

        Ok(store
            .points
            .values()
            .filter(|p| passes(filter, p))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_point(&self, collection: &str, point_id: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections
            .get_mut(collection)
            .ok_or_else(|| QctError::CollectionNotFound(collection.to_string()))?;

        store
            .points
            .remove(point_id)
            .map(|_| ())
            .ok_or_else(|| QctError::point_not_found(collection, point_id))
    }

    async fn query_nearest(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let store = collections
            .get(collection)
            .ok_or_else(|| QctError::CollectionNotFound(collection.to_string()))?;

        let mut scored: Vec<ScoredPoint> = store
            .points
            .values()
            .filter(|p| passes(filter, p))
            .map(|p| ScoredPoint {
                score: cosine_similarity(&p.vector, vector),
                point: p.clone(),
            })
            .collect();

        sort_by_relevance(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qct_core::Metadata;

    fn point(id: &str, vector: Vec<f32>, tag: &str) -> ContentPoint {
        let mut metadata = Metadata::new();
        metadata.insert("tag".into(), tag.into());
        ContentPoint::new(id, vector, format!("content {id}")).with_metadata(metadata)
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_collection("docs", 2).await.unwrap();
        store
            .upsert_point("docs", &point("b", vec![1.0, 0.0], "x"))
            .await
            .unwrap();
        store
            .upsert_point("docs", &point("a", vec![1.0, 0.0], "y"))
            .await
            .unwrap();
        store
            .upsert_point("docs", &point("c", vec![0.0, 1.0], "x"))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = MemoryStore::new();
        assert!(!store.collection_exists("nope").await.unwrap());
        let err = store.fetch_points("nope", None, 10).await.unwrap_err();
        assert_eq!(err, QctError::CollectionNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_dimension_enforced() {
        let store = MemoryStore::new();
        store.ensure_collection("docs", 3).await.unwrap();
        let err = store
            .upsert_point("docs", &ContentPoint::new("p", vec![1.0], "x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), qct_core::ErrorKind::Validation);
        assert!(store.ensure_collection("docs", 4).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_points_ordered_and_filtered() {
        let store = seeded().await;

        let all = store.fetch_points("docs", None, 10).await.unwrap();
        let ids: Vec<_> = all.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let limited = store.fetch_points("docs", None, 2).await.unwrap();
        assert_eq!(limited.len(), 2);

        let filter = MetadataFilter::new("tag", "x");
        let tagged = store.fetch_points("docs", Some(&filter), 10).await.unwrap();
        let ids: Vec<_> = tagged.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_query_nearest_tie_break() {
        let store = seeded().await;

        let results = store
            .query_nearest("docs", &[1.0, 0.0], None, 3)
            .await
            .unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.point.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results[0].score >= results[2].score);

        let filter = MetadataFilter::new("tag", "x");
        let results = store
            .query_nearest("docs", &[1.0, 0.0], Some(&filter), 1)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].point.id, "b");
    }

    #[test]
    fn test_point_count() {
        let store = tokio_test::block_on(seeded());
        assert_eq!(tokio_test::block_on(store.point_count("docs")), Some(3));
        assert_eq!(tokio_test::block_on(store.point_count("other")), None);
    }

    #[tokio::test]
    async fn test_delete_point() {
        let store = seeded().await;
        store.delete_point("docs", "a").await.unwrap();
        assert_eq!(store.point_count("docs").await, Some(2));
        assert!(store.get_point("docs", "a").await.unwrap().is_none());

        let err = store.delete_point("docs", "a").await.unwrap_err();
        assert_eq!(err.kind(), qct_core::ErrorKind::NotFound);
    }
}
