//! Backend stream-json wire types
//!
//! One JSON object per line in both directions. Inbound lines carry the
//! backend's fine-grained streaming events (content-block start/delta/stop
//! plus full-message and result lines); outbound lines carry user
//! messages and control requests.

use serde::Deserialize;
use serde_json::json;

/// One inbound line from the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)] // fields populated by serde
pub enum BackendLine {
    /// Lifecycle notices (init, model info); ignored by the session
    System {
        #[serde(default)]
        subtype: Option<String>,
    },

    /// A content block opened
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },

    /// Incremental content inside an open block
    ContentBlockDelta { index: usize, delta: Delta },

    /// A content block closed
    ContentBlockStop { index: usize },

    /// Complete assistant message; the fallback path when no deltas
    /// streamed during the turn
    Assistant { message: AssistantMessage },

    /// Turn terminator
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
    },

    /// Acknowledgement of a control request; ignored
    ControlResponse {
        #[serde(default)]
        response: Option<serde_json::Value>,
    },
}

/// Content block kinds the session distinguishes
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)] // fields populated by serde
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
    },
}

/// Delta kinds inside an open content block
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
}

/// Complete assistant message for the no-delta fallback path
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// Serialize an outbound user-message line.
pub fn user_message_line(text: &str) -> String {
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{"type": "text", "text": text}],
        },
    })
    .to_string()
}

/// Serialize an outbound interrupt control line.
pub fn interrupt_line(request_id: u64) -> String {
    json!({
        "type": "control_request",
        "request_id": format!("req_{}", request_id),
        "request": {"subtype": "interrupt"},
    })
    .to_string()
}
