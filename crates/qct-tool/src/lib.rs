//! QCT Tool - Qdrant content management exposed as an agent tool
//!
//! [`ContentTool`] accepts an action name plus named parameters, validates
//! them, and translates the request into embedding and vector store calls:
//! - add / update: embed the content (through the embedding cache) and
//!   upsert the point
//! - list: page through stored points, optionally filtered by metadata
//! - delete: remove a point
//! - search: embed the query and return the nearest points, served from
//!   the search cache when possible
//!
//! Writes invalidate the cached searches of the collection they touch.
//!
//! Author: hephaex@gmail.com

use qct_core::{sort_by_relevance, AppConfig, ContentPoint, QctError, Result, ScoredPoint};
use qct_vector::{
    create_embedding_client, EmbeddingClient, FnEmbedding, QdrantStore, VectorStore,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub mod cache;
pub mod request;
pub mod response;

pub use cache::{CacheStats, CacheStatsReport, EmbeddingCache, SearchCache, SearchKey, ToolCache};
pub use request::{
    ActionKind, ActionRequest, AddRequest, DeleteRequest, ListRequest, SearchRequest, ToolArgs,
    UpdateRequest,
};
pub use response::{ActionOutput, ToolFailure, ToolResponse};

/// Name under which the tool registers with a host framework
pub const TOOL_NAME: &str = "qdrant_content_tool";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Content Tool
// ============================================================================

/// Cached dispatcher over a vector store and an embedding client
pub struct ContentTool {
    /// Vector store backend
    store: Arc<dyn VectorStore>,

    /// Embedding provider
    embedder: Arc<dyn EmbeddingClient>,

    /// Embedding and search caches
    cache: ToolCache,

    /// Upper bound on every external call
    timeout: Duration,

    /// Create missing collections on add
    auto_create_collections: bool,
}

impl ContentTool {
    /// Create a tool over injected adapters
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        cache: ToolCache,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            timeout: DEFAULT_TIMEOUT,
            auto_create_collections: true,
        }
    }

    /// Build the Qdrant store, configured embedder and caches from config
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let embedder = create_embedding_client(&config.embedding)?;
        Self::from_config_with_embedder(config, embedder)
    }

    /// Like [`ContentTool::from_config`], with a caller-supplied embedder
    pub fn from_config_with_embedder(
        config: &AppConfig,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        config.validate()?;
        let timeout = Duration::from_secs(config.tool.request_timeout_secs);
        let store = QdrantStore::new(&config.store, timeout)?;

        tracing::info!(
            qdrant_url = %config.store.qdrant_url,
            embedder = %embedder.identity(),
            "Content tool configured"
        );

        let cache = ToolCache::with_config(&config.cache);
        Ok(Self::new(Arc::new(store), embedder, cache)
            .with_timeout(timeout)
            .with_auto_create(config.tool.auto_create_collections))
    }

    /// Replace the embedding client
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingClient>) -> Self {
        self.embedder = embedder;
        self
    }

    /// Replace the embedding client with a plain function.
    ///
    /// `name` keys the embedding cache, so distinct functions need distinct names.
    pub fn with_embedding_fn<F>(self, name: impl Into<String>, dimension: usize, func: F) -> Self
    where
        F: Fn(&str) -> Vec<f32> + Send + Sync + 'static,
    {
        self.with_embedder(Arc::new(FnEmbedding::new(name, dimension, func)))
    }

    /// Set the timeout applied to each external call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable collection creation on add
    pub fn with_auto_create(mut self, enabled: bool) -> Self {
        self.auto_create_collections = enabled;
        self
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingClient> {
        &self.embedder
    }

    // ------------------------------------------------------------------------
    // Tool descriptor
    // ------------------------------------------------------------------------

    pub fn name() -> &'static str {
        TOOL_NAME
    }

    pub fn description() -> &'static str {
        "Manage and search text content in a Qdrant vector database. \
         Actions: 'add' stores content with optional metadata, 'update' replaces \
         the content of a point, 'list' shows stored points, 'delete' removes a \
         point, 'search' finds content similar to a query. Search and list can \
         be filtered by a metadata key and value."
    }

    /// Name, description and parameter schema, as hosts register tools.
    ///
    /// Needs no configured tool, so it works without credentials.
    pub fn descriptor() -> serde_json::Value {
        json!({
            "name": Self::name(),
            "description": Self::description(),
            "parameters": Self::parameters_schema(),
        })
    }

    /// JSON schema of the tool arguments
    pub fn parameters_schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "update", "list", "delete", "search"],
                    "description": "Action to perform"
                },
                "collection_name": {
                    "type": "string",
                    "description": "Name of the Qdrant collection"
                },
                "content": {
                    "type": "string",
                    "description": "Content to add or update"
                },
                "metadata": {
                    "type": "object",
                    "description": "Metadata stored with the content"
                },
                "point_id": {
                    "type": "string",
                    "description": "Identifier of the point to update or delete"
                },
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "filter_by": {
                    "type": "string",
                    "description": "Metadata key to filter list or search results on"
                },
                "filter_value": {
                    "type": "string",
                    "description": "Value the filtered metadata key must match"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "default": qct_core::DEFAULT_LIMIT,
                    "description": "Maximum number of results"
                }
            },
            "required": ["action", "collection_name"],
            "additionalProperties": false
        })
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// Run a host invocation. Never fails: errors become failure responses.
    pub async fn invoke(&self, args: serde_json::Value) -> ToolResponse {
        let hint = RequestHint::from_args(&args);

        let request = match ActionRequest::try_from(args) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(action = ?hint.action, error = %e, "Rejected tool request");
                return ToolResponse::Failure {
                    error: ToolFailure::new(&e, hint.action, hint.collection),
                };
            }
        };

        let action = request.kind();
        let collection = request.collection().to_string();

        match self.execute(request).await {
            Ok(data) => ToolResponse::Success { data },
            Err(e) => {
                tracing::warn!(%action, %collection, error = %e, "Tool action failed");
                ToolResponse::Failure {
                    error: ToolFailure::new(&e, Some(action.to_string()), Some(collection)),
                }
            }
        }
    }

    /// Execute a validated request
    pub async fn execute(&self, request: ActionRequest) -> Result<ActionOutput> {
        tracing::info!(
            action = %request.kind(),
            collection = request.collection(),
            "Executing action"
        );

        match request {
            ActionRequest::Add(req) => self.add(req).await,
            ActionRequest::Update(req) => self.update(req).await,
            ActionRequest::List(req) => self.list(req).await,
            ActionRequest::Delete(req) => self.delete(req).await,
            ActionRequest::Search(req) => self.search(req).await,
        }
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    async fn add(&self, req: AddRequest) -> Result<ActionOutput> {
        let exists = self.collection_exists(&req.collection).await?;
        if !exists && !self.auto_create_collections {
            return Err(QctError::CollectionNotFound(req.collection));
        }

        let vector = self.embed(&req.content).await?;

        if !exists {
            self.timed(
                "ensure_collection",
                self.store.ensure_collection(&req.collection, vector.len()),
            )
            .await?;
            tracing::info!(
                collection = %req.collection,
                dimension = vector.len(),
                "Created collection"
            );
        }

        let point_id = Uuid::new_v4().to_string();
        let point =
            ContentPoint::new(point_id.clone(), vector, req.content).with_metadata(req.metadata);

        self.timed("upsert_point", self.store.upsert_point(&req.collection, &point))
            .await?;
        self.cache.invalidate(&req.collection, &point_id);

        tracing::info!(collection = %req.collection, %point_id, "Content added");
        Ok(ActionOutput::Add {
            collection: req.collection,
            point_id,
        })
    }

    async fn update(&self, req: UpdateRequest) -> Result<ActionOutput> {
        self.require_collection(&req.collection).await?;
        self.require_point(&req.collection, &req.point_id).await?;

        let vector = self.embed(&req.content).await?;
        let point = ContentPoint::new(req.point_id.clone(), vector, req.content)
            .with_metadata(req.metadata);

        self.timed("upsert_point", self.store.upsert_point(&req.collection, &point))
            .await?;
        self.cache.invalidate(&req.collection, &req.point_id);

        tracing::info!(collection = %req.collection, point_id = %req.point_id, "Content updated");
        Ok(ActionOutput::Update {
            collection: req.collection,
            point_id: req.point_id,
        })
    }

    async fn list(&self, req: ListRequest) -> Result<ActionOutput> {
        self.require_collection(&req.collection).await?;

        let mut points = self
            .timed(
                "fetch_points",
                self.store
                    .fetch_points(&req.collection, req.filter.as_ref(), req.limit),
            )
            .await?;
        points.sort_by(|a, b| a.id.cmp(&b.id));
        points.truncate(req.limit);

        tracing::debug!(collection = %req.collection, count = points.len(), "Listed points");
        Ok(ActionOutput::List {
            collection: req.collection,
            points,
        })
    }

    async fn delete(&self, req: DeleteRequest) -> Result<ActionOutput> {
        self.require_collection(&req.collection).await?;
        self.require_point(&req.collection, &req.point_id).await?;

        self.timed(
            "delete_point",
            self.store.delete_point(&req.collection, &req.point_id),
        )
        .await?;
        self.cache.invalidate(&req.collection, &req.point_id);

        tracing::info!(collection = %req.collection, point_id = %req.point_id, "Content deleted");
        Ok(ActionOutput::Delete {
            collection: req.collection,
            point_id: req.point_id,
        })
    }

    async fn search(&self, req: SearchRequest) -> Result<ActionOutput> {
        let key = SearchKey::new(
            req.collection.clone(),
            self.embedder.identity(),
            &req.query,
            req.filter.as_ref(),
            req.limit,
        );

        let results = self
            .cache
            .get_or_compute_search(key, self.run_search(&req))
            .await?;

        tracing::debug!(collection = %req.collection, count = results.len(), "Search completed");
        Ok(ActionOutput::Search {
            collection: req.collection,
            results,
        })
    }

    async fn run_search(&self, req: &SearchRequest) -> Result<Vec<ScoredPoint>> {
        self.require_collection(&req.collection).await?;

        let vector = self.embed(&req.query).await?;

        // The store cuts at `fetch` before our id tie-break runs, so widen the
        // window until the cut no longer falls inside a run of equal scores.
        let mut fetch = req.limit.saturating_add(1);
        loop {
            let mut results = self
                .timed(
                    "query_nearest",
                    self.store
                        .query_nearest(&req.collection, &vector, req.filter.as_ref(), fetch),
                )
                .await?;
            sort_by_relevance(&mut results);

            if !cut_inside_tie(&results, fetch, req.limit) || fetch == usize::MAX {
                results.truncate(req.limit);
                return Ok(results);
            }

            tracing::debug!(collection = %req.collection, fetch, "Widening search past tied scores");
            fetch = fetch.saturating_mul(2);
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Embedding of `text`, served from cache when possible
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let identity = self.embedder.identity();
        let compute = self.timed("embed", self.embedder.embed(text));
        self.cache
            .get_or_compute_embedding(text, &identity, compute)
            .await
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        self.timed("collection_exists", self.store.collection_exists(collection))
            .await
    }

    async fn require_collection(&self, collection: &str) -> Result<()> {
        if self.collection_exists(collection).await? {
            Ok(())
        } else {
            Err(QctError::CollectionNotFound(collection.to_string()))
        }
    }

    async fn require_point(&self, collection: &str, point_id: &str) -> Result<()> {
        self.timed("get_point", self.store.get_point(collection, point_id))
            .await?
            .map(|_| ())
            .ok_or_else(|| QctError::point_not_found(collection, point_id))
    }

    /// Bound an external call by the configured timeout
    async fn timed<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let millis = self.timeout.as_millis() as u64;
                tracing::warn!(operation, millis, "External call timed out");
                Err(QctError::Timeout {
                    operation: operation.to_string(),
                    millis,
                })
            }
        }
    }
}

/// True when a full page of `fetch` results ends on the same score as the
/// `limit`-th result, so points outside the page could still outrank it on id.
fn cut_inside_tie(results: &[ScoredPoint], fetch: usize, limit: usize) -> bool {
    if limit == 0 || results.len() < fetch || results.len() <= limit {
        return false;
    }
    results[results.len() - 1].score == results[limit - 1].score
}

/// Action and collection pulled from raw arguments, for error reports on
/// requests that fail validation
#[derive(Default)]
struct RequestHint {
    action: Option<String>,
    collection: Option<String>,
}

impl RequestHint {
    fn from_args(args: &serde_json::Value) -> Self {
        let args = args.get("input").unwrap_or(args);
        let field = |name: &str| {
            args.get(name)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        Self {
            action: field("action"),
            collection: field("collection_name"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qct_vector::MemoryStore;

    fn tool() -> ContentTool {
        let embedder = Arc::new(FnEmbedding::new("unit", 2, |text: &str| {
            vec![text.len() as f32, 1.0]
        }));
        ContentTool::new(Arc::new(MemoryStore::new()), embedder, ToolCache::new())
    }

    fn scored(id: &str, score: f32) -> ScoredPoint {
        ScoredPoint {
            point: ContentPoint::new(id, vec![], id),
            score,
        }
    }

    #[test]
    fn test_descriptor() {
        let descriptor = ContentTool::descriptor();
        assert_eq!(descriptor["name"], TOOL_NAME);
        assert!(descriptor["description"]
            .as_str()
            .is_some_and(|d| d.contains("search")));

        let schema = &descriptor["parameters"];
        assert_eq!(schema, &ContentTool::parameters_schema());
        assert_eq!(schema["required"], json!(["action", "collection_name"]));
        assert_eq!(schema["properties"]["limit"]["default"], json!(10));
        assert_eq!(
            schema["properties"]["action"]["enum"].as_array().map(Vec::len),
            Some(5)
        );
    }

    #[test]
    fn test_cut_inside_tie() {
        let page = vec![scored("a", 0.9), scored("b", 0.5), scored("c", 0.5)];

        // Full page whose tail ties the last kept result
        assert!(cut_inside_tie(&page, 3, 2));
        // Store had fewer points than requested
        assert!(!cut_inside_tie(&page, 4, 2));
        // Tail is strictly below the last kept result
        assert!(!cut_inside_tie(&page, 3, 1));
        assert!(!cut_inside_tie(&page[..1], 1, 1));
    }

    #[test]
    fn test_request_hint() {
        let hint = RequestHint::from_args(&json!({
            "input": {"action": "search", "collection_name": "docs"}
        }));
        assert_eq!(hint.action.as_deref(), Some("search"));
        assert_eq!(hint.collection.as_deref(), Some("docs"));

        let hint = RequestHint::from_args(&json!("not an object"));
        assert!(hint.action.is_none());
    }

    #[tokio::test]
    async fn test_timed_maps_expiry() {
        let tool = tool().with_timeout(Duration::from_millis(5));
        let err = tool
            .timed("sleep", async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            QctError::Timeout {
                operation: "sleep".into(),
                millis: 5
            }
        );
    }

    #[tokio::test]
    async fn test_with_embedding_fn_changes_identity() {
        let tool = tool().with_embedding_fn("custom", 3, |_| vec![0.0, 0.0, 1.0]);
        assert_eq!(tool.embedder().identity(), "fn:custom");
        assert_eq!(tool.embedder().dimension(), 3);
    }

    #[tokio::test]
    async fn test_add_without_auto_create() {
        let tool = tool().with_auto_create(false);
        let err = tool
            .execute(ActionRequest::Add(AddRequest {
                collection: "docs".into(),
                content: "hello".into(),
                metadata: Default::default(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err, QctError::CollectionNotFound("docs".into()));
        assert_eq!(tool.cache().embedding.entry_count(), 0);
    }
}
