//! QCT Vector - Embedding and vector database abstraction
//!
//! Provides the two external adapters the content tool consumes:
//! - [`EmbeddingClient`]: text in, fixed-length vector out
//! - [`VectorStore`]: point-level operations on named collections
//!
//! Qdrant is the production store; [`MemoryStore`] is an in-process
//! implementation of the same contract for tests and local runs.

use async_trait::async_trait;
use qct_core::{ContentPoint, MetadataFilter, QctError, Result, ScoredPoint};

pub mod embedding;
pub mod memory_store;
pub mod qdrant_store;

pub use embedding::{
    create_embedding_client, EmbeddingClient, FnEmbedding, OllamaEmbedding, OpenAiEmbedding,
};
pub use memory_store::MemoryStore;
pub use qdrant_store::QdrantStore;

/// Reject a vector length that differs from the collection's dimension
pub(crate) fn check_dimension(collection: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(QctError::Validation(format!(
            "vector has {actual} dimensions, collection '{collection}' expects {expected}"
        )));
    }
    Ok(())
}

/// Trait for vector database operations
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logging and error reporting
    fn backend(&self) -> &str;

    /// Check whether a collection exists
    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Create a collection if it does not exist yet
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()>;

    /// Insert or replace a point
    async fn upsert_point(&self, collection: &str, point: &ContentPoint) -> Result<()>;

    /// Fetch a single point by identifier
    async fn get_point(&self, collection: &str, point_id: &str) -> Result<Option<ContentPoint>>;

    /// Fetch up to `limit` points, ordered by identifier
    async fn fetch_points(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<ContentPoint>>;

    /// Delete a point by identifier
    async fn delete_point(&self, collection: &str, point_id: &str) -> Result<()>;

    /// Search for the `limit` points nearest to `vector`
    async fn query_nearest(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;
}
