//! Tool registry — name-keyed catalog of callable tools.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;

use crate::store::VaultStore;
use crate::tools::{
    BacklinksTool, DeleteNoteTool, ListNotesTool, ReadNoteTool, SearchNotesTool, WriteNoteTool,
};
use crate::{Tool, ToolDyn};

/// Wire-level description of one tool, as returned by `tools/list`.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

/// Catalog of registered tools. Built once at startup and shared read-only
/// across all sessions.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolDyn>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with the built-in vault tools registered.
    pub fn builtin(store: Arc<VaultStore>) -> Self {
        let mut registry = Self::new();
        registry.register(ReadNoteTool::new(store.clone()));
        registry.register(WriteNoteTool::new(store.clone()));
        registry.register(DeleteNoteTool::new(store.clone()));
        registry.register(ListNotesTool::new(store.clone()));
        registry.register(SearchNotesTool::new(store.clone()));
        registry.register(BacklinksTool::new(store));
        registry
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        info!("Registering tool: {}", tool.name());
        self.tools.push(Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolDyn>> {
        self.tools.iter().find(|t| t.name_dyn() == name).cloned()
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name_dyn().to_string(),
                description: t.description_dyn().to_string(),
                input_schema: t.input_schema_dyn(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
