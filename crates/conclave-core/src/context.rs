use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// Name → value mapping handed to a tool.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// Multi-modal payload attached to a user message, tool result, or delegation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    /// Base64-encoded inline payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: None,
            url: None,
            name: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::new(mime_type)
        }
    }

    pub fn from_url(mime_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(mime_type)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

/// A structured function-call intent parsed from a model turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,
    /// Set when the raw arguments were not clean JSON.
    #[serde(skip)]
    pub diagnostic: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<ToolCallId>, name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            diagnostic: None,
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    /// Arguments that could not be recovered at all.
    pub fn is_unparsable(&self) -> bool {
        self.arguments.is_empty() && self.diagnostic.is_some()
    }

    /// Build a call from a JSON value. Anything but an object becomes an empty mapping.
    pub fn from_value(
        id: impl Into<ToolCallId>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            _ => Arguments::new(),
        };
        Self::new(id, name, arguments)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One entry of an agent's transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ContextMessage {
    fn bare(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            attachments: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::bare(Role::User, Some(content.into()))
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Private, ordered transcript for one agent invocation.
///
/// History only grows through the `add_*` methods. [`Context::messages`] hands
/// out an owned snapshot, so callers can never rewrite history through it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Context {
    system_prompt: String,
    messages: Vec<ContextMessage>,
}

impl Context {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Snapshot of the transcript.
    pub fn messages(&self) -> Vec<ContextMessage> {
        self.messages.clone()
    }

    /// Borrowing iterator for adapters that only read.
    pub fn iter(&self) -> impl Iterator<Item = &ContextMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ContextMessage> {
        self.messages.last()
    }

    pub fn add_user(&mut self, content: impl Into<String>, attachments: Vec<Attachment>) {
        let mut msg = ContextMessage::bare(Role::User, Some(content.into()));
        msg.attachments = attachments;
        self.messages.push(msg);
    }

    pub fn add_assistant_text(&mut self, content: impl Into<String>) {
        self.messages
            .push(ContextMessage::bare(Role::Assistant, Some(content.into())));
    }

    /// An assistant turn may carry text alongside its tool calls.
    pub fn add_assistant_tool_calls(&mut self, tool_calls: Vec<ToolCall>, content: Option<String>) {
        let mut msg = ContextMessage::bare(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        self.messages.push(msg);
    }

    pub fn add_tool_result(
        &mut self,
        tool_call_id: ToolCallId,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) {
        let mut msg = ContextMessage::bare(Role::Tool, Some(content.into()));
        msg.tool_call_id = Some(tool_call_id);
        msg.tool_name = Some(tool_name.into());
        msg.attachments = attachments;
        self.messages.push(msg);
    }

    /// Text of the most recent assistant turn, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.content.as_deref())
    }
}
