//! Tools exposed to the agent model.

pub mod data_access;
pub mod maintenance;
pub mod web_search;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::{
    errors::Error,
    model::{ToolCall, ToolDefinition},
    Result,
};

pub use data_access::DataAccess;
pub use maintenance::{MaintenanceSheet, SheetStore};
pub use web_search::{SearchHit, SearchProvider, WebSearch};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    /// Runs the tool with the raw JSON arguments sent by the model.
    async fn execute(&self, arguments: &str) -> Result<String>;
}

/// Parse tool arguments; an empty string counts as `{}`.
pub fn parse_args<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|e| Error::InvalidInput(format!("argumentos inválidos: {e}")))
}

/// Name-indexed set of tools, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Executes a model tool call. Failures come back as `Erro: ...` text for the model.
    pub async fn dispatch(&self, call: &ToolCall) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            warn!(tool = %call.name, "unknown tool requested");
            return format!("Erro: ferramenta desconhecida '{}'.", call.name);
        };

        info!(tool = %call.name, call_id = %call.id, "executing tool");
        match tool.execute(&call.arguments).await {
            Ok(out) => out,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool failed");
                format!("Erro: {}", user_message(&e))
            }
        }
    }
}

fn user_message(e: &Error) -> String {
    match e {
        Error::InvalidInput(msg) | Error::NotFound(msg) => msg.clone(),
        other => other.to_string(),
    }
}
