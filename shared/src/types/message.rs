//! Jupyter message types
//!
//! A message is a header, the header of the message it answers (if any),
//! free-form metadata and a content mapping whose shape depends on the
//! message type. Routing identities and binary buffers ride alongside.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::utils::time::now_rfc3339;

/// Messaging protocol version sent in every header
pub const PROTOCOL_VERSION: &str = "5.3";

pub const KERNEL_INFO_REQUEST: &str = "kernel_info_request";
pub const KERNEL_INFO_REPLY: &str = "kernel_info_reply";

/// Message header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,

    #[serde(default)]
    pub session: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub date: String,

    pub msg_type: String,

    #[serde(default)]
    pub version: String,
}

/// A decoded (or to-be-encoded) message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Routing frames that precede the delimiter
    pub identities: Vec<Bytes>,
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Map<String, Value>,
    pub content: Value,
    pub buffers: Vec<Bytes>,
}

impl Message {
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header.as_ref().map(|h| h.msg_id.as_str())
    }

    /// Whether this message answers the request with id `msg_id`
    pub fn is_reply_to(&self, msg_id: &str) -> bool {
        self.parent_msg_id() == Some(msg_id)
    }

    /// JSON view of the message for diagnostics
    pub fn to_json(&self) -> Value {
        json!({
            "msg_id": self.header.msg_id,
            "msg_type": self.header.msg_type,
            "header": self.header,
            "parent_header": self.parent_header.as_ref().map_or_else(|| json!({}), |h| json!(h)),
            "metadata": self.metadata,
            "content": self.content,
            "buffers": self.buffers.len(),
        })
    }
}

/// Client session: stamps every outgoing header with the same session id
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    username: String,
}

impl Default for Session {
    fn default() -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "kernel-ping".to_string());
        Self::new(username)
    }
}

impl Session {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn header(&self, msg_type: &str) -> Header {
        Header {
            msg_id: uuid::Uuid::new_v4().to_string(),
            session: self.id.clone(),
            username: self.username.clone(),
            date: now_rfc3339(),
            msg_type: msg_type.to_string(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// New top-level message with a fresh id
    pub fn message(&self, msg_type: &str, content: Value) -> Message {
        Message {
            identities: Vec::new(),
            header: self.header(msg_type),
            parent_header: None,
            metadata: Map::new(),
            content,
            buffers: Vec::new(),
        }
    }

    /// Reply to `parent`, routed back to the same identities
    pub fn reply(&self, parent: &Message, msg_type: &str, content: Value) -> Message {
        Message {
            identities: parent.identities.clone(),
            header: self.header(msg_type),
            parent_header: Some(parent.header.clone()),
            metadata: Map::new(),
            content,
            buffers: Vec::new(),
        }
    }

    pub fn kernel_info_request(&self) -> Message {
        self.message(KERNEL_INFO_REQUEST, json!({}))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub file_extension: Option<String>,
}

/// Content of a `kernel_info_reply`
///
/// Every field is optional: kernels in the wild omit what they do not know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfo {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub protocol_version: Option<String>,

    #[serde(default)]
    pub implementation: Option<String>,

    #[serde(default)]
    pub implementation_version: Option<String>,

    #[serde(default)]
    pub language_info: LanguageInfo,

    #[serde(default)]
    pub banner: Option<String>,
}

impl KernelInfo {
    pub fn from_content(content: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(content.clone())
    }

    pub fn implementation_or_unknown(&self) -> &str {
        self.implementation.as_deref().unwrap_or("unknown")
    }

    pub fn version_or_unknown(&self) -> &str {
        self.implementation_version.as_deref().unwrap_or("unknown")
    }
}
