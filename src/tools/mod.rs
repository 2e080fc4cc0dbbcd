//! Tool surface for tool-calling clients.
//!
//! Every tool takes a JSON object and returns a JSON result. Failures are
//! mapped to a structured [`ErrorPayload`](crate::error::ErrorPayload) by
//! [`ToolRegistry::call_structured`].

pub mod deployments;
pub mod explorer;
pub mod registry;
pub mod tool;

use std::sync::Arc;

pub use deployments::deployment_tools;
pub use explorer::explorer_tools;
pub use registry::{ToolDescriptor, ToolRegistry, ToolResponse};
pub use tool::{Tool, ToolContext, ToolError, ToolOutput};

use crate::explorer::EtherscanClient;
use crate::studio::Studio;

/// Registry holding every explorer and deployment tool.
pub fn default_registry(studio: Arc<Studio>, client: Arc<EtherscanClient>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in explorer_tools(client)
        .into_iter()
        .chain(deployment_tools(studio))
    {
        registry.register(tool);
    }
    tracing::debug!(tools = registry.len(), "Tool registry ready");
    registry
}
