//! Wire protocol types shared by both transport bindings.
//!
//! Requests carry `id` + `method` + params; responses carry the same
//! `id` plus exactly one of `result` or `error`. The same envelope is
//! exchanged as newline-delimited JSON over a child process's standard
//! streams or as an HTTP request/response body.

use serde::{Deserialize, Serialize};

/// Envelope version sent with every message.
pub const PROTOCOL_VERSION: &str = "2.0";

/// A request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Envelope version.
    pub version: String,
    /// Request id, unique per in-flight request.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    /// Create a new request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Create an `initialize` handshake request.
    pub fn initialize(id: u64) -> Self {
        Self::new(
            id,
            "initialize",
            Some(serde_json::json!({
                "protocol_version": PROTOCOL_VERSION,
                "client_info": {
                    "name": "steward",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            })),
        )
    }

    /// Create a `tools/list` request.
    pub fn list_tools(id: u64) -> Self {
        Self::new(id, "tools/list", None)
    }

    /// Create a `tools/call` request.
    pub fn call_tool(id: u64, name: &str, arguments: serde_json::Value) -> Self {
        Self::new(
            id,
            "tools/call",
            Some(serde_json::json!({
                "name": name,
                "arguments": arguments
            })),
        )
    }
}

/// A response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Envelope version.
    pub version: String,
    /// Id of the request this answers.
    pub id: u64,
    /// Result (on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error (on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Split into exactly one of result or error.
    ///
    /// A response carrying both or neither is malformed; callers turn
    /// that into a transport error.
    pub fn into_outcome(self) -> Result<Result<serde_json::Value, RpcError>, MalformedResponse> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(Ok(result)),
            (None, Some(error)) => Ok(Err(error)),
            (Some(_), Some(_)) => Err(MalformedResponse::BothResultAndError { id: self.id }),
            (None, None) => Err(MalformedResponse::NeitherResultNorError { id: self.id }),
        }
    }
}

/// Violations of the exactly-one-of-result-or-error rule.
#[derive(Debug, thiserror::Error)]
pub enum MalformedResponse {
    #[error("response {id} carries both result and error")]
    BothResultAndError { id: u64 },

    #[error("response {id} carries neither result nor error")]
    NeitherResultNorError { id: u64 },
}

/// Error payload inside a response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Result of a `tools/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<crate::tools::schema::ToolSchema>,
}

/// Result of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Join all text blocks into one string.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content block in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "resource")]
    Resource {
        uri: String,
        mime_type: Option<String>,
        text: Option<String>,
    },
}

impl ContentBlock {
    /// Get text content if this block carries any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Resource { text, .. } => text.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_list_tools() {
        let req = Request::list_tools(1);
        assert_eq!(req.method, "tools/list");
        assert_eq!(req.id, 1);
        assert_eq!(req.version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_request_call_tool() {
        let req = Request::call_tool(2, "read_file", serde_json::json!({"path": "a.txt"}));
        assert_eq!(req.method, "tools/call");
        assert_eq!(req.params.unwrap()["name"], "read_file");
    }

    #[test]
    fn test_response_outcome_exactly_one() {
        let ok = Response {
            version: PROTOCOL_VERSION.to_string(),
            id: 1,
            result: Some(serde_json::json!({"tools": []})),
            error: None,
        };
        assert!(ok.into_outcome().unwrap().is_ok());

        let neither = Response {
            version: PROTOCOL_VERSION.to_string(),
            id: 2,
            result: None,
            error: None,
        };
        assert!(matches!(
            neither.into_outcome(),
            Err(MalformedResponse::NeitherResultNorError { id: 2 })
        ));

        let both = Response {
            version: PROTOCOL_VERSION.to_string(),
            id: 3,
            result: Some(serde_json::Value::Null),
            error: Some(RpcError {
                code: -1,
                message: "boom".to_string(),
                data: None,
            }),
        };
        assert!(both.into_outcome().is_err());
    }

    #[test]
    fn test_call_result_text_joins_blocks() {
        let result = CallToolResult {
            content: vec![
                ContentBlock::Text {
                    text: "line 1".to_string(),
                },
                ContentBlock::Text {
                    text: "line 2".to_string(),
                },
            ],
            is_error: false,
        };
        assert_eq!(result.text(), "line 1\nline 2");
    }
}
