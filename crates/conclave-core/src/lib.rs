pub mod agent;
pub mod context;
pub mod errors;
pub mod events;
pub mod ids;
pub mod message;
pub mod provider;
pub mod schema;
pub mod stream;
pub mod tools;

pub use agent::{Access, Agent, ReasoningEffort};
pub use context::{Arguments, Attachment, Context, ContextMessage, Role, ToolCall};
pub use errors::{ProtocolError, ProviderError, ProviderErrorKind};
pub use events::{AgentEvent, AgentEventKind};
pub use ids::{CallId, RunId, SpanId, ToolCallId};
pub use message::{CallLedger, Message, MessageKind};
pub use provider::{ChunkStream, LlmResponse, ProviderBackend, ProviderChunk, ProviderConfig};
pub use schema::{build_parameters_schema, Param, ParamKind};
pub use stream::{ErrorInfo, StreamEvent};
pub use tools::{FunctionTool, Tool, ToolError, ToolResult, ToolSchema};
