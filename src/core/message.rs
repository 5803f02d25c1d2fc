use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::MessageId;

pub const STOPPED_NOTICE: &str = "Generation was stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
    Audio,
}

/// Typed binary blob attached to a message. Bytes serialize as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(kind: AttachmentKind, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind,
            mime_type: mime_type.into(),
            file_name: None,
            data,
        }
    }

    pub fn image(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(AttachmentKind::Image, mime_type, data)
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn base64_data(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data())
    }

    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
            || matches!(
                self.mime_type.as_str(),
                "application/json" | "application/xml" | "application/x-yaml"
            )
    }

    /// Renders a text attachment as a labelled block; `None` for binary data.
    pub fn as_inline_text(&self) -> Option<String> {
        if !self.is_text() {
            return None;
        }
        let body = String::from_utf8_lossy(&self.data);
        let label = self.file_name.as_deref().unwrap_or("attachment");
        Some(format!("[{label}]\n{body}"))
    }

    /// Text stand-in for an attachment a vendor cannot accept.
    pub fn placeholder_text(&self) -> String {
        let label = self
            .file_name
            .as_deref()
            .unwrap_or(self.mime_type.as_str());
        format!("[{label}: unsupported attachment]")
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument text as produced by the model.
    pub arguments: String,
}

/// The processed result of a tool call, sent back on a `tool` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
}

/// How a generated message stopped receiving content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFinish {
    Completed,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<ToolResponse>,
    #[serde(default)]
    pub is_replying: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<MessageFinish>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            tool_response: None,
            is_replying: false,
            finish: None,
            provider: None,
            model: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Empty in-flight assistant turn that streamed deltas are appended to.
    pub fn assistant_placeholder(provider: &str, model: &str) -> Self {
        let mut message = Self::new(Role::Assistant, String::new());
        message.is_replying = true;
        message.provider = Some(provider.to_string());
        message.model = Some(model.to_string());
        message
    }

    pub fn tool_result(response: ToolResponse) -> Self {
        let mut message = Self::new(Role::Tool, response.content.clone());
        message.tool_response = Some(response);
        message
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn append_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    pub fn finalize(&mut self, finish: MessageFinish) {
        self.is_replying = false;
        self.finish = Some(finish);
    }

    /// User-visible marker shown beside a message that did not complete.
    pub fn notice(&self) -> Option<&'static str> {
        match self.finish {
            Some(MessageFinish::Stopped) => Some(STOPPED_NOTICE),
            _ => None,
        }
    }

    /// Whether the message carries anything worth sending back to a model.
    pub fn has_payload(&self) -> bool {
        !self.content.is_empty()
            || !self.attachments.is_empty()
            || !self.tool_calls.is_empty()
            || self.tool_response.is_some()
    }
}
