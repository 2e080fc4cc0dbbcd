//! Tool catalog and dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, ErrorPayload};
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput};

/// Catalog entry as served to tool-calling clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Either a tool result or a structured failure reason.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Ok { ok: bool, result: serde_json::Value },
    Err { ok: bool, error: ErrorPayload },
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replaced previously registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Every registered tool, sorted by name.
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect()
    }

    /// Run a tool under its execution timeout.
    pub async fn call(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        let timeout = tool.execution_timeout();
        tracing::debug!(tool = name, metadata = %ctx.metadata, "Dispatching tool call");

        match tokio::time::timeout(timeout, tool.execute(params, ctx)).await {
            Ok(Ok(output)) => {
                tracing::debug!(tool = name, elapsed_ms = output.duration.as_millis() as u64, "Tool call finished");
                Ok(output)
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = name, error = %e, "Tool call failed");
                Err(e)
            }
            Err(_) => Err(ToolError::Timeout {
                name: name.to_string(),
                timeout,
            }),
        }
    }

    /// [`call`](Self::call) with failures mapped to an [`ErrorPayload`].
    pub async fn call_structured(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResponse {
        match self.call(name, params, ctx).await {
            Ok(output) => ToolResponse::Ok {
                ok: true,
                result: output.result,
            },
            Err(e) => ToolResponse::Err {
                ok: false,
                error: Error::from(e).to_error_payload(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorDomain, ExplorerError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Returns its parameters."
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(
            &self,
            params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::success(params, Duration::ZERO))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never finishes in time."
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::success(serde_json::Value::Null, Duration::ZERO))
        }

        fn execution_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    struct UpstreamFailureTool;

    #[async_trait]
    impl Tool for UpstreamFailureTool {
        fn name(&self) -> &str {
            "upstream"
        }

        fn description(&self) -> &str {
            "Fails in the explorer layer."
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Err(ExplorerError::RateLimited {
                action: "txlist".to_string(),
            }
            .into())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(UpstreamFailureTool));
        registry
    }

    #[test]
    fn catalog_is_sorted_and_uses_input_schema_key() {
        let catalog = registry().catalog();
        let names: Vec<&str> = catalog.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "slow", "upstream"]);

        let json = serde_json::to_value(&catalog[0]).unwrap();
        assert_eq!(json["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let output = registry()
            .call("echo", serde_json::json!({"x": 1}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(output.result["x"], 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_structured() {
        let response = registry()
            .call_structured("missing", serde_json::Value::Null, &ToolContext::default())
            .await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "tool.not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tools_time_out() {
        let err = registry()
            .call("slow", serde_json::Value::Null, &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn backend_failures_keep_their_domain() {
        let response = registry()
            .call_structured("upstream", serde_json::Value::Null, &ToolContext::default())
            .await;
        match response {
            ToolResponse::Err { error, .. } => {
                assert_eq!(error.domain, ErrorDomain::Explorer);
                assert_eq!(error.code, "explorer.rate_limited");
                assert!(error.retryable);
            }
            ToolResponse::Ok { .. } => panic!("expected failure"),
        }
    }
}
