//! Caching layer for the content tool
//!
//! Provides concurrent caching for:
//! - Embeddings (to avoid re-calling the embedding provider for the same text)
//! - Search results (to serve repeated queries without any external call)
//!
//! Uses the moka crate for thread-safe, async-compatible caching with
//! least-recently-used eviction and TTL support. Concurrent misses on the
//! same key run the computation once; failed computations are not cached.
//!
//! Text keys are hashed exactly as given: no case folding or whitespace
//! trimming is applied.
//!
//! Author: hephaex@gmail.com

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use qct_core::{CacheConfig, MetadataFilter, QctError, Result, ScoredPoint};
use qct_vector::EmbeddingClient;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

// ============================================================================
// Embedding Cache
// ============================================================================

/// Key for embedding cache entries
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct EmbeddingKey {
    /// Identity of the embedding provider/function
    embedder: String,
    /// Hash of the text
    text_hash: u64,
}

impl EmbeddingKey {
    fn new(text: &str, embedder: &str) -> Self {
        Self {
            embedder: embedder.to_string(),
            text_hash: hash_text(text),
        }
    }
}

/// Cache for embedding vectors
///
/// Keyed by (embedder identity, text) so that two providers never share
/// vectors. Thread-safe and suitable for async contexts.
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<EmbeddingKey, Vec<f32>>,
    stats: Arc<CacheStats>,
}

impl EmbeddingCache {
    /// Create a new embedding cache with default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create a new embedding cache with custom configuration
    pub fn with_config(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.embedding_max_capacity)
            .time_to_live(Duration::from_secs(config.embedding_ttl_seconds))
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            cache,
            stats: Arc::new(CacheStats::new("embedding")),
        }
    }

    /// Get an embedding from cache
    pub async fn get(&self, text: &str, embedder: &str) -> Option<Vec<f32>> {
        let result = self.cache.get(&EmbeddingKey::new(text, embedder)).await;

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store an embedding in cache
    pub async fn put(&self, text: &str, embedder: &str, embedding: Vec<f32>) {
        self.cache
            .insert(EmbeddingKey::new(text, embedder), embedding)
            .await;
        self.stats.record_write();
    }

    /// Return the cached embedding, or run `compute` and cache its result.
    ///
    /// Errors from `compute` are returned to every waiting caller and
    /// nothing is stored.
    pub async fn get_or_compute<F>(&self, text: &str, embedder: &str, compute: F) -> Result<Vec<f32>>
    where
        F: Future<Output = Result<Vec<f32>>>,
    {
        let entry = self
            .cache
            .entry(EmbeddingKey::new(text, embedder))
            .or_try_insert_with(compute)
            .await
            .map_err(|e: Arc<QctError>| (*e).clone())?;

        if entry.is_fresh() {
            self.stats.record_miss();
            self.stats.record_write();
        } else {
            self.stats.record_hit();
        }

        Ok(entry.into_value())
    }

    /// Check if an embedding exists in cache
    pub fn contains(&self, text: &str, embedder: &str) -> bool {
        self.cache.contains_key(&EmbeddingKey::new(text, embedder))
    }

    /// Invalidate a specific embedding
    pub async fn invalidate(&self, text: &str, embedder: &str) {
        self.cache.invalidate(&EmbeddingKey::new(text, embedder)).await;
        self.stats.record_invalidation();
    }

    /// Clear all cached embeddings
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.stats.reset();
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Get current cache size
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and expirations
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Search Cache
// ============================================================================

/// Identifies one search request
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct SearchKey {
    /// Collection searched
    pub collection: String,
    /// Identity of the embedder that vectorized the query
    embedder: String,
    /// Hash of the query text
    query_hash: u64,
    /// Metadata filter, if any
    filter: Option<MetadataFilter>,
    /// Result limit
    limit: usize,
}

impl SearchKey {
    pub fn new(
        collection: impl Into<String>,
        embedder: impl Into<String>,
        query: &str,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            embedder: embedder.into(),
            query_hash: hash_text(query),
            filter: filter.cloned(),
            limit,
        }
    }
}

/// Search key stamped with the collection generation it was computed under
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct VersionedKey {
    key: SearchKey,
    generation: u64,
}

/// Cache for search results
///
/// Every write to a collection bumps that collection's generation, so a
/// search that was already in flight when the write happened stores its
/// result under a key no later lookup will use.
#[derive(Clone)]
pub struct SearchCache {
    cache: Cache<VersionedKey, Vec<ScoredPoint>>,
    generations: Arc<RwLock<HashMap<String, Arc<AtomicU64>>>>,
    stats: Arc<CacheStats>,
}

impl SearchCache {
    /// Create a new search cache with default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create a new search cache with custom configuration
    pub fn with_config(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.search_max_capacity)
            .time_to_live(Duration::from_secs(config.search_ttl_seconds))
            .eviction_policy(EvictionPolicy::lru())
            .support_invalidation_closures()
            .build();

        Self {
            cache,
            generations: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(CacheStats::new("search")),
        }
    }

    /// Current generation of `collection`. Takes the shared lock only.
    fn generation(&self, collection: &str) -> u64 {
        let generations = self
            .generations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        generations
            .get(collection)
            .map_or(0, |generation| generation.load(Ordering::Acquire))
    }

    fn bump_generation(&self, collection: &str) {
        {
            let generations = self
                .generations
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(generation) = generations.get(collection) {
                generation.fetch_add(1, Ordering::AcqRel);
                return;
            }
        }

        // First write to this collection
        let mut generations = self
            .generations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        generations
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(1, Ordering::AcqRel);
    }

    #[cfg(test)]
    fn tracked_collections(&self) -> usize {
        self.generations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn versioned(&self, key: SearchKey) -> VersionedKey {
        let generation = self.generation(&key.collection);
        VersionedKey { key, generation }
    }

    /// Get search results from cache
    pub async fn get(&self, key: &SearchKey) -> Option<Vec<ScoredPoint>> {
        let result = self.cache.get(&self.versioned(key.clone())).await;

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store search results in cache
    pub async fn put(&self, key: SearchKey, results: Vec<ScoredPoint>) {
        self.cache.insert(self.versioned(key), results).await;
        self.stats.record_write();
    }

    /// Return cached results, or run `compute` and cache its result
    pub async fn get_or_compute<F>(&self, key: SearchKey, compute: F) -> Result<Vec<ScoredPoint>>
    where
        F: Future<Output = Result<Vec<ScoredPoint>>>,
    {
        let entry = self
            .cache
            .entry(self.versioned(key))
            .or_try_insert_with(compute)
            .await
            .map_err(|e: Arc<QctError>| (*e).clone())?;

        if entry.is_fresh() {
            self.stats.record_miss();
            self.stats.record_write();
        } else {
            self.stats.record_hit();
        }

        Ok(entry.into_value())
    }

    /// Check if results for a search exist in cache
    pub fn contains(&self, key: &SearchKey) -> bool {
        self.cache.contains_key(&self.versioned(key.clone()))
    }

    /// Drop every cached result for `collection`
    pub fn invalidate_collection(&self, collection: &str) {
        self.bump_generation(collection);

        let target = collection.to_string();
        if let Err(e) = self
            .cache
            .invalidate_entries_if(move |k, _| k.key.collection == target)
        {
            // Stale generations are unreachable anyway, TTL reclaims them
            tracing::warn!(collection, error = %e, "Failed to register search cache invalidation");
        }
        self.stats.record_invalidation();
    }

    /// Clear all cached search results
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.stats.reset();
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Get current cache size
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and invalidations
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug)]
pub struct CacheStats {
    /// Cache name for identification
    name: String,
    /// Total number of cache hits
    hits: AtomicU64,
    /// Total number of cache misses
    misses: AtomicU64,
    /// Total number of cache writes
    writes: AtomicU64,
    /// Total number of invalidations
    invalidations: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }

    /// Get cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get total writes
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Get total invalidations
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Get total requests (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Calculate hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Get a summary report
    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            invalidations: self.invalidations(),
            total_requests: self.total_requests(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub total_requests: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

// ============================================================================
// Tool Cache
// ============================================================================

/// Combined embedding and search cache owned by a content tool
#[derive(Clone, Default)]
pub struct ToolCache {
    /// Embedding cache
    pub embedding: EmbeddingCache,
    /// Search results cache
    pub search: SearchCache,
}

impl ToolCache {
    /// Create a new cache with default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create a new cache with custom configuration
    pub fn with_config(config: &CacheConfig) -> Self {
        Self {
            embedding: EmbeddingCache::with_config(config),
            search: SearchCache::with_config(config),
        }
    }

    /// Cached embedding of `text` under `embedder_identity`
    pub async fn get_or_compute_embedding<F>(
        &self,
        text: &str,
        embedder_identity: &str,
        compute: F,
    ) -> Result<Vec<f32>>
    where
        F: Future<Output = Result<Vec<f32>>>,
    {
        self.embedding
            .get_or_compute(text, embedder_identity, compute)
            .await
    }

    /// Cached search results for `key`
    pub async fn get_or_compute_search<F>(
        &self,
        key: SearchKey,
        compute: F,
    ) -> Result<Vec<ScoredPoint>>
    where
        F: Future<Output = Result<Vec<ScoredPoint>>>,
    {
        self.search.get_or_compute(key, compute).await
    }

    /// Forget search results for a collection after a point changed.
    ///
    /// Invalidation is collection-wide: one edit can move any result.
    pub fn invalidate(&self, collection: &str, point_id: &str) {
        tracing::debug!(collection, point_id, "Invalidating cached searches");
        self.search.invalidate_collection(collection);
    }

    /// Clear all caches
    pub async fn clear_all(&self) {
        self.embedding.clear().await;
        self.search.clear().await;
    }

    /// Get combined statistics for all caches
    pub fn all_stats(&self) -> Vec<CacheStatsReport> {
        vec![self.embedding.stats().report(), self.search.stats().report()]
    }

    /// Pre-compute embeddings for common texts
    pub async fn warm_embedding_cache(
        &self,
        texts: Vec<String>,
        embedder: &dyn EmbeddingClient,
    ) -> Result<()> {
        tracing::info!("Warming embedding cache with {} texts", texts.len());

        let identity = embedder.identity();
        for text in texts {
            if self.embedding.contains(&text, &identity) {
                continue;
            }

            match embedder.embed(&text).await {
                Ok(embedding) => {
                    self.embedding.put(&text, &identity, embedding).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to compute embedding during warm-up: {}", e);
                }
            }
        }

        self.embedding.sync().await;
        tracing::info!(
            "Embedding cache warmed up. Total entries: {}",
            self.embedding.entry_count()
        );
        Ok(())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Hash text to a 64-bit value for cache keys
fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Tests
// ============================================================================
