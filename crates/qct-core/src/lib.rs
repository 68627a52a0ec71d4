//! QCT Core - Domain models, errors, and shared configuration
//!
//! This crate defines the core abstractions used throughout the
//! Qdrant content tool:
//! - Content points and their metadata
//! - Metadata filters and scored search results
//! - Common error types and their classification
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, CacheConfig, ConfigError, EmbeddingConfig, EmbeddingProvider, LoggingConfig,
    StoreConfig, ToolConfig,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Default number of results for list and search actions
pub const DEFAULT_LIMIT: usize = 10;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for content tool operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QctError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("'{field}' is required for the {action} action")]
    MissingField { action: String, field: String },

    #[error("Unsupported action '{0}'. Valid actions are: add, update, list, delete, search")]
    UnsupportedAction(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Point {point_id} not found in collection {collection}")]
    PointNotFound { collection: String, point_id: String },

    #[error("Embedding error ({provider}): {message}")]
    Embedding { provider: String, message: String },

    #[error("Vector store error ({backend}): {message}")]
    VectorStore { backend: String, message: String },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, QctError>;

/// Coarse error classification reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing request fields
    Validation,
    /// Referenced collection or point does not exist
    NotFound,
    /// Embedding provider or vector store failed
    ExternalService,
    /// Required credential or endpoint missing
    Configuration,
}

impl ErrorKind {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ExternalService)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::ExternalService => write!(f, "external_service"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

impl QctError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::MissingField { .. } | Self::UnsupportedAction(_) => {
                ErrorKind::Validation
            }
            Self::CollectionNotFound(_) | Self::PointNotFound { .. } => ErrorKind::NotFound,
            Self::Embedding { .. } | Self::VectorStore { .. } | Self::Timeout { .. } => {
                ErrorKind::ExternalService
            }
            Self::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Shorthand for a missing required field
    pub fn missing_field(action: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            action: action.into(),
            field: field.into(),
        }
    }

    /// Shorthand for a missing point
    pub fn point_not_found(collection: impl Into<String>, point_id: impl Into<String>) -> Self {
        Self::PointNotFound {
            collection: collection.into(),
            point_id: point_id.into(),
        }
    }
}

impl From<ConfigError> for QctError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// A single metadata value: a scalar or a list of strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

impl MetadataValue {
    /// Keyword match against a filter value.
    ///
    /// Strings match on equality, lists match when any element is equal.
    /// Numbers and booleans never match a keyword filter.
    pub fn matches_keyword(&self, value: &str) -> bool {
        match self {
            Self::String(s) => s == value,
            Self::List(items) => items.iter().any(|item| item == value),
            Self::Bool(_) | Self::Integer(_) | Self::Float(_) => false,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Metadata attached to a content point, ordered by key
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Equality filter on a single metadata field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Metadata key to filter on
    pub key: String,

    /// Value the key must match
    pub value: String,
}

impl MetadataFilter {
    /// Create a new metadata filter
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Payload path of the filtered field in the vector store
    pub fn field_path(&self) -> String {
        format!("metadata.{}", self.key)
    }

    /// Check whether the given metadata satisfies this filter
    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata
            .get(&self.key)
            .map(|v| v.matches_keyword(&self.value))
            .unwrap_or(false)
    }
}

// ============================================================================
// Content Points
// ============================================================================

/// A unit of stored content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPoint {
    /// Identifier, unique within a collection
    pub id: String,

    /// Embedding vector (empty when not loaded from the store)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,

    /// Original text
    pub content: String,

    /// Associated metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl ContentPoint {
    /// Create a new content point
    pub fn new(id: impl Into<String>, vector: Vec<f32>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Payload stored alongside the vector: `{"content": .., "metadata": {..}}`
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "content": self.content,
            "metadata": self.metadata,
        })
    }
}

/// A content point with its similarity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub point: ContentPoint,

    /// Similarity score (higher is closer)
    pub score: f32,
}

/// Order results by descending score, breaking ties by identifier ascending
pub fn sort_by_relevance(results: &mut [ScoredPoint]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.point.id.cmp(&b.point.id))
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, score: f32) -> ScoredPoint {
        ScoredPoint {
            point: ContentPoint::new(id, vec![], "text"),
            score,
        }
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            QctError::missing_field("add", "content").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            QctError::UnsupportedAction("drop".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            QctError::point_not_found("docs", "p1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            QctError::Timeout {
                operation: "embed".into(),
                millis: 10
            }
            .kind(),
            ErrorKind::ExternalService
        );
        assert_eq!(QctError::Config("x".into()).kind(), ErrorKind::Configuration);
        assert!(ErrorKind::ExternalService.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
    }

    #[test]
    fn test_missing_field_message_names_field() {
        let err = QctError::missing_field("add", "content");
        assert_eq!(err.to_string(), "'content' is required for the add action");
    }

    #[test]
    fn test_metadata_value_deserialize() {
        let metadata: Metadata = serde_json::from_value(serde_json::json!({
            "tag": "greeting",
            "count": 3,
            "ratio": 0.5,
            "draft": false,
            "labels": ["a", "b"]
        }))
        .unwrap();

        assert_eq!(metadata["tag"], MetadataValue::String("greeting".into()));
        assert_eq!(metadata["count"], MetadataValue::Integer(3));
        assert_eq!(metadata["ratio"], MetadataValue::Float(0.5));
        assert_eq!(metadata["draft"], MetadataValue::Bool(false));
        assert_eq!(
            metadata["labels"],
            MetadataValue::List(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_metadata_filter_matches() {
        let mut metadata = Metadata::new();
        metadata.insert("tag".into(), "greeting".into());
        metadata.insert("labels".into(), vec!["x".to_string(), "y".to_string()].into());
        metadata.insert("count".into(), 3i64.into());

        assert!(MetadataFilter::new("tag", "greeting").matches(&metadata));
        assert!(!MetadataFilter::new("tag", "farewell").matches(&metadata));
        assert!(MetadataFilter::new("labels", "y").matches(&metadata));
        assert!(!MetadataFilter::new("count", "3").matches(&metadata));
        assert!(!MetadataFilter::new("missing", "greeting").matches(&metadata));
        assert_eq!(MetadataFilter::new("tag", "x").field_path(), "metadata.tag");
    }

    #[test]
    fn test_sort_by_relevance_tie_break() {
        let mut results = vec![
            scored("c", 0.5),
            scored("b", 0.9),
            scored("a", 0.5),
            scored("d", 0.7),
        ];
        sort_by_relevance(&mut results);

        let ids: Vec<_> = results.iter().map(|r| r.point.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_payload_layout() {
        let mut metadata = Metadata::new();
        metadata.insert("tag".into(), "greeting".into());
        let point = ContentPoint::new("p1", vec![1.0], "hello world").with_metadata(metadata);

        assert_eq!(
            point.payload(),
            serde_json::json!({"content": "hello world", "metadata": {"tag": "greeting"}})
        );
    }
}
