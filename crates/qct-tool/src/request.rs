//! Action requests and their validation
//!
//! Hosts send an action name plus loosely-typed named parameters
//! ([`ToolArgs`]). Conversion into [`ActionRequest`] checks every
//! required field up front, so a request that reaches the dispatcher
//! never triggers an external call only to fail on missing input.

use qct_core::{Metadata, MetadataFilter, QctError, Result, DEFAULT_LIMIT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Add,
    Update,
    List,
    Delete,
    Search,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::List => "list",
            Self::Delete => "delete",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = QctError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "update" => Ok(Self::Update),
            "list" => Ok(Self::List),
            "delete" => Ok(Self::Delete),
            "search" => Ok(Self::Search),
            _ => Err(QctError::UnsupportedAction(s.to_string())),
        }
    }
}

/// Raw tool arguments as sent by the host framework
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolArgs {
    /// Action to perform: add, update, list, delete, search
    pub action: Option<String>,
    /// Collection to operate on
    pub collection_name: Option<String>,
    /// Content to add or update
    pub content: Option<String>,
    /// Metadata for add/update
    pub metadata: Option<Metadata>,
    /// Point to update or delete
    pub point_id: Option<String>,
    /// Search query
    pub query: Option<String>,
    /// Metadata key to filter on
    pub filter_by: Option<String>,
    /// Value the filtered key must match
    pub filter_value: Option<String>,
    /// Maximum number of results for list/search
    pub limit: Option<usize>,
}

impl ToolArgs {
    /// Parse host arguments, accepting either the flat form or
    /// `{"input": {...}}`.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let value = match value {
            serde_json::Value::Object(mut map) if map.len() == 1 && map.contains_key("input") => {
                map.remove("input").unwrap_or_default()
            }
            other => other,
        };

        serde_json::from_value(value)
            .map_err(|e| QctError::Validation(format!("Invalid tool arguments: {e}")))
    }
}

/// Add new content to a collection
#[derive(Debug, Clone, PartialEq)]
pub struct AddRequest {
    pub collection: String,
    pub content: String,
    pub metadata: Metadata,
}

/// Replace the content of an existing point
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub collection: String,
    pub point_id: String,
    pub content: String,
    pub metadata: Metadata,
}

/// List stored points
#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    pub collection: String,
    pub filter: Option<MetadataFilter>,
    pub limit: usize,
}

/// Delete a point
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub collection: String,
    pub point_id: String,
}

/// Similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub collection: String,
    pub query: String,
    pub filter: Option<MetadataFilter>,
    pub limit: usize,
}

/// A validated request
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Add(AddRequest),
    Update(UpdateRequest),
    List(ListRequest),
    Delete(DeleteRequest),
    Search(SearchRequest),
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Add(_) => ActionKind::Add,
            Self::Update(_) => ActionKind::Update,
            Self::List(_) => ActionKind::List,
            Self::Delete(_) => ActionKind::Delete,
            Self::Search(_) => ActionKind::Search,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Self::Add(r) => &r.collection,
            Self::Update(r) => &r.collection,
            Self::List(r) => &r.collection,
            Self::Delete(r) => &r.collection,
            Self::Search(r) => &r.collection,
        }
    }
}

/// Blank strings count as missing
fn required(action: ActionKind, field: &str, value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| QctError::missing_field(action.as_str(), field))
}

fn limit(value: Option<usize>) -> Result<usize> {
    match value {
        None => Ok(DEFAULT_LIMIT),
        Some(0) => Err(QctError::Validation("'limit' must be at least 1".to_string())),
        Some(n) => Ok(n),
    }
}

fn filter(
    action: ActionKind,
    key: Option<String>,
    value: Option<String>,
) -> Result<Option<MetadataFilter>> {
    let key = key.filter(|k| !k.trim().is_empty());
    let value = value.filter(|v| !v.is_empty());
    match (key, value) {
        (None, None) => Ok(None),
        (Some(key), Some(value)) => Ok(Some(MetadataFilter::new(key, value))),
        (Some(_), None) => Err(QctError::missing_field(action.as_str(), "filter_value")),
        (None, Some(_)) => Err(QctError::missing_field(action.as_str(), "filter_by")),
    }
}

impl TryFrom<ToolArgs> for ActionRequest {
    type Error = QctError;

    fn try_from(args: ToolArgs) -> Result<Self> {
        let action: ActionKind = args
            .action
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| QctError::Validation("'action' is required".to_string()))?
            .parse()?;

        let collection = required(action, "collection_name", args.collection_name)?;

        let request = match action {
            ActionKind::Add => Self::Add(AddRequest {
                collection,
                content: required(action, "content", args.content)?,
                metadata: args.metadata.unwrap_or_default(),
            }),
            ActionKind::Update => Self::Update(UpdateRequest {
                collection,
                point_id: required(action, "point_id", args.point_id)?,
                content: required(action, "content", args.content)?,
                metadata: args.metadata.unwrap_or_default(),
            }),
            ActionKind::List => Self::List(ListRequest {
                collection,
                filter: filter(action, args.filter_by, args.filter_value)?,
                limit: limit(args.limit)?,
            }),
            ActionKind::Delete => Self::Delete(DeleteRequest {
                collection,
                point_id: required(action, "point_id", args.point_id)?,
            }),
            ActionKind::Search => Self::Search(SearchRequest {
                collection,
                query: required(action, "query", args.query)?,
                filter: filter(action, args.filter_by, args.filter_value)?,
                limit: limit(args.limit)?,
            }),
        };

        Ok(request)
    }
}

impl TryFrom<serde_json::Value> for ActionRequest {
    type Error = QctError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        ToolArgs::from_value(value)?.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qct_core::MetadataValue;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<ActionRequest> {
        ActionRequest::try_from(value)
    }

    #[test]
    fn test_parse_add_with_defaults() {
        let request = parse(json!({
            "action": "add",
            "collection_name": "docs",
            "content": "hello world",
            "metadata": {"tag": "greeting"}
        }))
        .unwrap();

        match request {
            ActionRequest::Add(add) => {
                assert_eq!(add.collection, "docs");
                assert_eq!(add.content, "hello world");
                assert_eq!(
                    add.metadata["tag"],
                    MetadataValue::String("greeting".into())
                );
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_wrapped_input_accepted() {
        let request = parse(json!({
            "input": {"action": "list", "collection_name": "docs"}
        }))
        .unwrap();

        assert_eq!(
            request,
            ActionRequest::List(ListRequest {
                collection: "docs".into(),
                filter: None,
                limit: DEFAULT_LIMIT,
            })
        );
    }

    #[test]
    fn test_unknown_action_named() {
        let err = parse(json!({"action": "drop", "collection_name": "docs"})).unwrap_err();
        assert_eq!(err, QctError::UnsupportedAction("drop".into()));
        assert!(err.to_string().contains("'drop'"));
    }

    #[test]
    fn test_missing_action() {
        let err = parse(json!({"collection_name": "docs"})).unwrap_err();
        assert!(err.to_string().contains("'action'"));
    }

    #[test]
    fn test_missing_required_fields_named() {
        let cases = [
            (json!({"action": "add", "content": "x"}), "add", "collection_name"),
            (json!({"action": "add", "collection_name": "d"}), "add", "content"),
            (
                json!({"action": "update", "collection_name": "d", "content": "x"}),
                "update",
                "point_id",
            ),
            (
                json!({"action": "update", "collection_name": "d", "point_id": "1"}),
                "update",
                "content",
            ),
            (json!({"action": "delete", "collection_name": "d"}), "delete", "point_id"),
            (json!({"action": "search", "collection_name": "d"}), "search", "query"),
            (
                json!({"action": "search", "collection_name": "d", "query": "   "}),
                "search",
                "query",
            ),
        ];

        for (args, action, field) in cases {
            assert_eq!(
                parse(args).unwrap_err(),
                QctError::missing_field(action, field)
            );
        }
    }

    #[test]
    fn test_filter_requires_both_halves() {
        let err = parse(json!({
            "action": "search",
            "collection_name": "docs",
            "query": "q",
            "filter_by": "tag"
        }))
        .unwrap_err();
        assert_eq!(err, QctError::missing_field("search", "filter_value"));

        let err = parse(json!({
            "action": "list",
            "collection_name": "docs",
            "filter_value": "x"
        }))
        .unwrap_err();
        assert_eq!(err, QctError::missing_field("list", "filter_by"));
    }

    #[test]
    fn test_search_with_filter_and_limit() {
        let request = parse(json!({
            "action": "Search",
            "collection_name": "docs",
            "query": "hello",
            "filter_by": "tag",
            "filter_value": "greeting",
            "limit": 3
        }))
        .unwrap();

        assert_eq!(
            request,
            ActionRequest::Search(SearchRequest {
                collection: "docs".into(),
                query: "hello".into(),
                filter: Some(MetadataFilter::new("tag", "greeting")),
                limit: 3,
            })
        );
        assert_eq!(request.kind(), ActionKind::Search);
        assert_eq!(request.collection(), "docs");
    }

    #[test]
    fn test_invalid_limit() {
        let err = parse(json!({"action": "list", "collection_name": "d", "limit": 0})).unwrap_err();
        assert_eq!(err.kind(), qct_core::ErrorKind::Validation);

        let err =
            parse(json!({"action": "list", "collection_name": "d", "limit": -1})).unwrap_err();
        assert_eq!(err.kind(), qct_core::ErrorKind::Validation);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse(json!({
            "action": "list",
            "collection_name": "d",
            "colection": "typo"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("colection"));
    }
}
