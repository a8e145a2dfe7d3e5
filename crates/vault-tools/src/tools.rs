//! Built-in vault tools.
//!
//! Point operations (read/write/delete) run directly on the request task;
//! whole-vault scans (search/backlinks) are flagged worker-eligible so the
//! router can push them through the worker pool.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use vault_protocol::{HandlerResult, McpError};

use crate::Tool;
use crate::store::{VaultError, VaultStore};

/// Read one note by logical path.
pub struct ReadNoteTool {
    store: Arc<VaultStore>,
}

impl ReadNoteTool {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self { store }
    }
}

impl Tool for ReadNoteTool {
    fn name(&self) -> &str {
        "read_note"
    }

    fn description(&self) -> &str {
        "Read the content of a note at a vault-relative path"
    }

    fn input_schema(&self) -> Value {
        path_schema("Vault-relative path of the note, e.g. \"daily/today.md\"")
    }

    async fn call(&self, params: Option<Value>) -> HandlerResult {
        let p: PathParams = parse_params(params)?;
        let content = self.store.read_note(&p.path).await.map_err(vault_error)?;
        Ok(json!({ "path": p.path, "content": content }))
    }
}

/// Create or overwrite a note.
pub struct WriteNoteTool {
    store: Arc<VaultStore>,
}

impl WriteNoteTool {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self { store }
    }
}

impl Tool for WriteNoteTool {
    fn name(&self) -> &str {
        "write_note"
    }

    fn description(&self) -> &str {
        "Create or overwrite a note at a vault-relative path"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Vault-relative path of the note" },
                "content": { "type": "string", "description": "Full Markdown content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn call(&self, params: Option<Value>) -> HandlerResult {
        let p: WriteParams = parse_params(params)?;
        self.store.write_note(&p.path, &p.content).await.map_err(vault_error)?;
        Ok(json!({ "path": p.path, "written": true }))
    }
}

/// Delete a note.
pub struct DeleteNoteTool {
    store: Arc<VaultStore>,
}

impl DeleteNoteTool {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self { store }
    }
}

impl Tool for DeleteNoteTool {
    fn name(&self) -> &str {
        "delete_note"
    }

    fn description(&self) -> &str {
        "Delete a note at a vault-relative path"
    }

    fn input_schema(&self) -> Value {
        path_schema("Vault-relative path of the note to delete")
    }

    async fn call(&self, params: Option<Value>) -> HandlerResult {
        let p: PathParams = parse_params(params)?;
        self.store.delete_note(&p.path).await.map_err(vault_error)?;
        Ok(json!({ "path": p.path, "deleted": true }))
    }
}

/// List every note in the vault.
pub struct ListNotesTool {
    store: Arc<VaultStore>,
}

impl ListNotesTool {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self { store }
    }
}

impl Tool for ListNotesTool {
    fn name(&self) -> &str {
        "list_notes"
    }

    fn description(&self) -> &str {
        "List the vault-relative paths of all notes"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _params: Option<Value>) -> HandlerResult {
        let notes = self.store.list_notes().await.map_err(vault_error)?;
        Ok(json!({ "count": notes.len(), "notes": notes }))
    }
}

/// Case-insensitive content search across the vault.
pub struct SearchNotesTool {
    store: Arc<VaultStore>,
}

impl SearchNotesTool {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self { store }
    }
}

impl Tool for SearchNotesTool {
    fn name(&self) -> &str {
        "search_notes"
    }

    fn description(&self) -> &str {
        "Search all notes for a substring (case-insensitive)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Text to search for" }
            },
            "required": ["query"]
        })
    }

    fn worker_eligible(&self) -> bool {
        true
    }

    async fn call(&self, params: Option<Value>) -> HandlerResult {
        let p: QueryParams = parse_params(params)?;
        let hits = self.store.search_notes(&p.query).await.map_err(vault_error)?;
        Ok(json!({ "query": p.query, "count": hits.len(), "hits": hits }))
    }
}

/// Notes linking to a target note via `[[wiki-links]]`.
pub struct BacklinksTool {
    store: Arc<VaultStore>,
}

impl BacklinksTool {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self { store }
    }
}

impl Tool for BacklinksTool {
    fn name(&self) -> &str {
        "backlinks"
    }

    fn description(&self) -> &str {
        "List the notes that link to a target note"
    }

    fn input_schema(&self) -> Value {
        path_schema("Vault-relative path of the target note")
    }

    fn worker_eligible(&self) -> bool {
        true
    }

    async fn call(&self, params: Option<Value>) -> HandlerResult {
        let p: PathParams = parse_params(params)?;
        let sources = self.store.backlinks(&p.path).await.map_err(vault_error)?;
        Ok(json!({ "target": p.path, "count": sources.len(), "backlinks": sources }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter types & helpers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct QueryParams {
    query: String,
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, McpError> {
    match params {
        Some(v) => serde_json::from_value(v)
            .map_err(|e| McpError::invalid_params(format!("Invalid arguments: {e}"))),
        None => Err(McpError::invalid_params("Arguments required")),
    }
}

/// Vault errors cross the tool boundary as opaque server errors; the
/// message carries the store's own wording.
fn vault_error(e: VaultError) -> McpError {
    match e {
        VaultError::InvalidPath(_) | VaultError::PathOutsideVault(_) => {
            McpError::invalid_params(e.to_string())
        }
        other => McpError::server_error(other.to_string()),
    }
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": description }
        },
        "required": ["path"]
    })
}
