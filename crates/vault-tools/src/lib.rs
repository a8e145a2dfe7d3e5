//! Vault tool catalog
//!
//! The session core treats a tool invocation as an opaque unit of work:
//! a name, JSON arguments, and a result or error. This crate supplies the
//! concrete catalog — tools backed by a [`store::VaultStore`] rooted at a
//! directory of Markdown notes.

pub mod registry;
pub mod store;
pub mod tools;

use std::pin::Pin;

use vault_protocol::HandlerResult;

pub use registry::{ToolDescriptor, ToolRegistry};
pub use store::{VaultError, VaultStore};

/// Trait implemented by all callable tools.
pub trait Tool: Send + Sync {
    /// Wire name of the tool (e.g. "read_note").
    fn name(&self) -> &str;

    /// One-line human description shown in `tools/list`.
    fn description(&self) -> &str;

    /// JSON schema of the tool's `arguments` object.
    fn input_schema(&self) -> serde_json::Value;

    /// Whole-vault scans return true and are routed through the worker pool;
    /// point reads/writes run directly on the request task.
    fn worker_eligible(&self) -> bool {
        false
    }

    /// Execute the tool with the given `arguments` value.
    fn call(
        &self,
        params: Option<serde_json::Value>,
    ) -> impl std::future::Future<Output = HandlerResult> + Send;
}

/// Object-safe wrapper for the Tool trait.
pub trait ToolDyn: Send + Sync {
    fn name_dyn(&self) -> &str;
    fn description_dyn(&self) -> &str;
    fn input_schema_dyn(&self) -> serde_json::Value;
    fn worker_eligible_dyn(&self) -> bool;
    fn call_dyn<'a>(
        &'a self,
        params: Option<serde_json::Value>,
    ) -> Pin<Box<dyn std::future::Future<Output = HandlerResult> + Send + 'a>>;
}

impl<T: Tool> ToolDyn for T {
    fn name_dyn(&self) -> &str {
        self.name()
    }
    fn description_dyn(&self) -> &str {
        self.description()
    }
    fn input_schema_dyn(&self) -> serde_json::Value {
        self.input_schema()
    }
    fn worker_eligible_dyn(&self) -> bool {
        self.worker_eligible()
    }
    fn call_dyn<'a>(
        &'a self,
        params: Option<serde_json::Value>,
    ) -> Pin<Box<dyn std::future::Future<Output = HandlerResult> + Send + 'a>> {
        Box::pin(self.call(params))
    }
}
