use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{Arguments, Attachment};
use crate::schema::{build_parameters_schema, required_names, Param};

/// Result returned by a tool execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

impl From<String> for ToolResult {
    fn from(content: String) -> Self {
        Self::text(content)
    }
}

impl From<&str> for ToolResult {
    fn from(content: &str) -> Self {
        Self::text(content)
    }
}

/// Tool definition sent to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;

    async fn execute(&self, arguments: Arguments) -> Result<ToolResult, ToolError>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("missing arguments for '{tool}': {}", .missing.join(", "))]
    MissingArguments { tool: String, missing: Vec<String> },
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::MissingArguments { .. } => "missing_arguments",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Fail with [`ToolError::MissingArguments`] when a name listed as required
/// in `schema` is absent from `arguments`.
pub fn check_required(schema: &ToolSchema, arguments: &Arguments) -> Result<(), ToolError> {
    let missing: Vec<String> = required_names(&schema.parameters)
        .into_iter()
        .filter(|name| !arguments.contains_key(*name))
        .map(str::to_owned)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::MissingArguments {
            tool: schema.name.clone(),
            missing,
        })
    }
}

type Handler =
    Arc<dyn Fn(Arguments) -> BoxFuture<'static, Result<ToolResult, ToolError>> + Send + Sync>;

/// Tool backed by a closure. The parameter schema is built once here.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        params: &[Param],
        f: F,
    ) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: build_parameters_schema(params),
            handler: Arc::new(move |args| -> BoxFuture<'static, _> { Box::pin(f(args)) }),
        }
    }

    /// Wrap a synchronous function.
    pub fn sync<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        params: &[Param],
        f: F,
    ) -> Self
    where
        F: Fn(Arguments) -> Result<ToolResult, ToolError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(name, description, params, move |args| {
            let f = Arc::clone(&f);
            async move { f(args) }
        })
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Arguments) -> Result<ToolResult, ToolError> {
        check_required(&self.schema(), &arguments)?;
        (self.handler)(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParamKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn args(v: Value) -> Arguments {
        v.as_object().cloned().unwrap()
    }

    fn lookup() -> FunctionTool {
        FunctionTool::sync(
            "lookup",
            "Look up a key",
            &[Param::required("key", ParamKind::String)],
            |a| {
                let key = a.get("key").and_then(Value::as_str).unwrap_or_default();
                Ok(format!("result-{key}").into())
            },
        )
    }

    #[tokio::test]
    async fn sync_tool_executes() {
        let result = lookup().execute(args(json!({"key": "x"}))).await.unwrap();
        assert_eq!(result.content, "result-x");
        assert!(result.attachments.is_empty());
    }

    #[tokio::test]
    async fn async_tool_executes() {
        let tool = FunctionTool::new("echo", "Echo", &[], |a| async move {
            Ok(ToolResult::text(Value::Object(a).to_string()))
        });
        let result = tool.execute(args(json!({"a": 1}))).await.unwrap();
        assert_eq!(result.content, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn missing_required_fails_before_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let tool = FunctionTool::sync(
            "weather",
            "Weather",
            &[
                Param::required("city", ParamKind::String),
                Param::optional("unit", ParamKind::String, json!("celsius")),
            ],
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok("sunny".into())
            },
        );

        let err = tool.execute(Arguments::new()).await.unwrap_err();
        match err {
            ToolError::MissingArguments { tool, missing } => {
                assert_eq!(tool, "weather");
                assert_eq!(missing, vec!["city"]);
            }
            other => panic!("expected MissingArguments, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn schema_is_stable() {
        let tool = lookup();
        let s1 = tool.schema();
        let s2 = tool.schema();
        assert_eq!(s1, s2);
        assert_eq!(s1.name, "lookup");
        assert_eq!(s1.parameters["required"], json!(["key"]));
    }

    #[test]
    fn tool_result_with_attachments() {
        let r = ToolResult::text("img").with_attachments(vec![Attachment::inline("image/png", "AA==")]);
        assert_eq!(r.attachments.len(), 1);
        let json = serde_json::to_value(ToolResult::from("plain")).unwrap();
        assert!(json.get("attachments").is_none());
    }

    #[test]
    fn tool_error_display() {
        let err = ToolError::MissingArguments {
            tool: "t".into(),
            missing: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "missing arguments for 't': a, b");
        assert_eq!(err.kind(), "missing_arguments");

        let err = ToolError::Timeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));
    }
}
