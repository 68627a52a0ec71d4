//! Structured tool results
//!
//! Every invocation ends in a [`ToolResponse`]: either the action's
//! output or a failure carrying the error kind, message, and the
//! action/collection it happened in. Both serialize to JSON and render
//! to plain text for hosts that feed tool output straight to a model.

use qct_core::{ContentPoint, ErrorKind, Metadata, QctError, ScoredPoint};
use serde::Serialize;
use std::fmt::Write;

use crate::request::ActionKind;

/// Output of a successful action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ActionOutput {
    Add {
        collection: String,
        point_id: String,
    },
    Update {
        collection: String,
        point_id: String,
    },
    List {
        collection: String,
        points: Vec<ContentPoint>,
    },
    Delete {
        collection: String,
        point_id: String,
    },
    Search {
        collection: String,
        results: Vec<ScoredPoint>,
    },
}

impl ActionOutput {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Add { .. } => ActionKind::Add,
            Self::Update { .. } => ActionKind::Update,
            Self::List { .. } => ActionKind::List,
            Self::Delete { .. } => ActionKind::Delete,
            Self::Search { .. } => ActionKind::Search,
        }
    }

    /// Identifier of the point written or removed, if any
    pub fn point_id(&self) -> Option<&str> {
        match self {
            Self::Add { point_id, .. }
            | Self::Update { point_id, .. }
            | Self::Delete { point_id, .. } => Some(point_id),
            Self::List { .. } | Self::Search { .. } => None,
        }
    }

    /// Human-readable rendering
    pub fn to_text(&self) -> String {
        match self {
            Self::Add { point_id, .. } => format!("Content added with ID: {point_id}"),
            Self::Update { point_id, .. } => format!("Content updated for ID: {point_id}"),
            Self::Delete { point_id, .. } => format!("Content deleted for ID: {point_id}"),
            Self::List { collection, points } => {
                if points.is_empty() {
                    return format!("No content found in collection '{collection}'.");
                }
                let mut out = String::new();
                for point in points {
                    write_point(&mut out, point);
                    out.push_str("---\n");
                }
                out
            }
            Self::Search { results, .. } => {
                if results.is_empty() {
                    return "No matching content found.".to_string();
                }
                let mut out = String::new();
                for result in results {
                    write_point(&mut out, &result.point);
                    let _ = writeln!(out, "Score: {:.4}", result.score);
                    out.push_str("---\n");
                }
                out
            }
        }
    }
}

fn write_point(out: &mut String, point: &ContentPoint) {
    let _ = writeln!(out, "ID: {}", point.id);
    let _ = writeln!(out, "Content: {}", point.content);
    let _ = writeln!(out, "Metadata: {}", render_metadata(&point.metadata));
}

fn render_metadata(metadata: &Metadata) -> String {
    let fields: Vec<String> = metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", fields.join(", "))
}

/// Failure details reported to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFailure {
    /// Error classification
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Action being executed, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Collection involved, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Whether the same request may succeed on retry
    pub retryable: bool,
}

impl ToolFailure {
    pub fn new(error: &QctError, action: Option<String>, collection: Option<String>) -> Self {
        let kind = error.kind();
        Self {
            kind,
            message: error.to_string(),
            action,
            collection,
            retryable: kind.is_retryable(),
        }
    }
}

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResponse {
    Success { data: ActionOutput },
    Failure { error: ToolFailure },
}

impl ToolResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Output of a successful invocation
    pub fn data(&self) -> Option<&ActionOutput> {
        match self {
            Self::Success { data } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    /// Failure details of a failed invocation
    pub fn error(&self) -> Option<&ToolFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }

    /// Human-readable rendering
    pub fn to_text(&self) -> String {
        match self {
            Self::Success { data } => data.to_text(),
            Self::Failure { error } => format!("Error ({}): {}", error.kind, error.message),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "failure",
                "error": {"kind": "validation", "message": e.to_string(), "retryable": false}
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qct_core::MetadataValue;
    use serde_json::json;

    fn sample_point() -> ContentPoint {
        let mut metadata = Metadata::new();
        metadata.insert("tag".into(), MetadataValue::String("greeting".into()));
        ContentPoint::new("p1", vec![], "hello world").with_metadata(metadata)
    }

    #[test]
    fn test_success_json_shape() {
        let response = ToolResponse::Success {
            data: ActionOutput::Add {
                collection: "docs".into(),
                point_id: "p1".into(),
            },
        };

        assert_eq!(
            response.to_json(),
            json!({
                "status": "success",
                "data": {"action": "add", "collection": "docs", "point_id": "p1"}
            })
        );
        assert_eq!(response.to_text(), "Content added with ID: p1");
    }

    #[test]
    fn test_failure_json_shape() {
        let error = QctError::missing_field("add", "content");
        let response = ToolResponse::Failure {
            error: ToolFailure::new(&error, Some("add".into()), Some("docs".into())),
        };

        let value = response.to_json();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["error"]["kind"], "validation");
        assert_eq!(value["error"]["collection"], "docs");
        assert_eq!(value["error"]["retryable"], false);
        assert!(response.to_text().starts_with("Error (validation):"));
    }

    #[test]
    fn test_list_text_rendering() {
        let output = ActionOutput::List {
            collection: "docs".into(),
            points: vec![sample_point()],
        };
        assert_eq!(
            output.to_text(),
            "ID: p1\nContent: hello world\nMetadata: {tag=greeting}\n---\n"
        );

        let empty = ActionOutput::List {
            collection: "docs".into(),
            points: vec![],
        };
        assert_eq!(empty.to_text(), "No content found in collection 'docs'.");
    }

    #[test]
    fn test_search_text_rendering() {
        let output = ActionOutput::Search {
            collection: "docs".into(),
            results: vec![ScoredPoint {
                point: sample_point(),
                score: 0.5,
            }],
        };
        assert!(output.to_text().contains("Score: 0.5000\n"));
        assert_eq!(output.point_id(), None);
    }
}
