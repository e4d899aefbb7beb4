//! Tool and host-adapter traits.
//!
//! The engine is exposed to hosts (the HTTP server, an agent framework)
//! through two seams:
//!
//! - [`Tool`]: one named operation with a JSON parameter schema, collected
//!   in a [`ToolRegistry`]. The built-ins cover search, snippet reads,
//!   captured-fact management and the orphan report.
//! - [`MemoryHooks`]: the lifecycle and event hooks a host calls around
//!   each agent turn. [`MemoryPlugin`] implements it on top of a
//!   [`MemoryEngine`].
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               MemoryHooks                │
//! │  start ── on_before_turn ── on_message   │
//! │  stop       (recall)        (capture)    │
//! │  ┌────────────────────────────────────┐  │
//! │  │           ToolRegistry             │  │
//! │  │ memory_search  memory_get  ...     │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────┬───────────────────────┘
//!                    ▼
//!               MemoryEngine
//! ```
//!
//! Tool results are always a JSON object: `{"result": ...}` on success or
//! `{"error": "..."}` on failure. A failing tool never propagates an error
//! to the host.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use vault_recall_core::models::CaptureCategory;

use crate::engine::{CaptureOutcome, MemoryEngine};

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A named operation agents can discover and call.
///
/// Tools are listed via `GET /tools/list` and invoked via
/// `POST /tools/{name}`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, e.g. `"memory_search"`.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema of the parameters object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. The returned value is wrapped in `{"result": ...}`.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Engine handle passed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    engine: Arc<MemoryEngine>,
}

impl ToolContext {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &MemoryEngine {
        &self.engine
    }
}

fn usize_param(params: &Value, key: &str) -> Option<usize> {
    params.get(key).and_then(Value::as_u64).map(|n| n as usize)
}

fn category_param(params: &Value) -> Result<Option<CaptureCategory>> {
    match params.get("category").and_then(Value::as_str) {
        Some(c) if !c.trim().is_empty() => Ok(Some(c.parse()?)),
        _ => Ok(None),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tool Implementations
// ═══════════════════════════════════════════════════════════════════════

/// Hybrid search over notes, workspace memory and captured facts.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term memory (notes, workspace memory, captured facts)"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "maxResults": { "type": "integer", "description": "Max results" },
                "minScore": { "type": "number", "description": "Minimum vector similarity" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            anyhow::bail!("query must not be empty");
        }
        let cfg = &ctx.engine.config().search;
        let max_results = usize_param(&params, "maxResults").unwrap_or(cfg.max_results);
        let min_score = params["minScore"].as_f64().unwrap_or(cfg.min_score);

        let results = ctx.engine.search(query, max_results, min_score).await;
        Ok(json!({ "results": results }))
    }
}

/// Line-range read of a memory file.
pub struct GetTool;

#[async_trait]
impl Tool for GetTool {
    fn name(&self) -> &str {
        "memory_get"
    }

    fn description(&self) -> &str {
        "Read lines from a memory file by logical path (vault/, memory/, MEMORY.md, extra/, captured/)"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Logical path, e.g. vault/Projects/alpha.md" },
                "from": { "type": "integer", "description": "First line, 1-based", "default": 1 },
                "lines": { "type": "integer", "description": "Number of lines to read" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = params["path"].as_str().unwrap_or("");
        if path.trim().is_empty() {
            anyhow::bail!("path must not be empty");
        }
        let snippet = ctx
            .engine
            .get_snippet(path, usize_param(&params, "from"), usize_param(&params, "lines"))
            .await?;
        Ok(serde_json::to_value(&snippet)?)
    }
}

/// One page of captured facts.
pub struct CapturedListTool;

#[async_trait]
impl Tool for CapturedListTool {
    fn name(&self) -> &str {
        "memory_captured_list"
    }

    fn description(&self) -> &str {
        "List facts captured from conversation, one page at a time"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": { "type": "string", "enum": ["preference", "project", "personal", "other"] },
                "limit": { "type": "integer", "default": 20 },
                "offset": { "type": "integer", "description": "Cursor returned as nextOffset by the previous page" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let category = category_param(&params)?;
        let limit = usize_param(&params, "limit").unwrap_or(20);
        let offset = params.get("offset").and_then(Value::as_u64);
        let page = ctx.engine.list_captured(category, limit, offset).await?;
        Ok(serde_json::to_value(&page)?)
    }
}

/// Delete one captured fact.
pub struct CapturedDeleteTool;

#[async_trait]
impl Tool for CapturedDeleteTool {
    fn name(&self) -> &str {
        "memory_captured_delete"
    }

    fn description(&self) -> &str {
        "Delete a captured fact by id"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "description": "Captured fact id" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = params
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow::anyhow!("id must be a non-negative integer"))?;
        ctx.engine.delete_captured(id).await?;
        Ok(json!({ "deleted": id }))
    }
}

/// Every captured fact as one array.
pub struct CapturedExportTool;

#[async_trait]
impl Tool for CapturedExportTool {
    fn name(&self) -> &str {
        "memory_captured_export"
    }

    fn description(&self) -> &str {
        "Export all captured facts as JSON"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": { "type": "string", "enum": ["preference", "project", "personal", "other"] }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let category = category_param(&params)?;
        let items = ctx.engine.export_captured(category).await?;
        Ok(json!({ "count": items.len(), "items": items }))
    }
}

/// Notes nothing links to.
pub struct OrphansTool;

#[async_trait]
impl Tool for OrphansTool {
    fn name(&self) -> &str {
        "memory_orphans"
    }

    fn description(&self) -> &str {
        "List notes with no incoming wikilinks"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let orphans = ctx.engine.orphans().await;
        Ok(json!({ "count": orphans.len(), "orphans": orphans }))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry for tools.
///
/// Use [`ToolRegistry::with_builtins`] for the memory tools, then
/// optionally [`register`](ToolRegistry::register) more.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(GetTool));
        registry.register(Box::new(CapturedListTool));
        registry.register(Box::new(CapturedDeleteTool));
        registry.register(Box::new(CapturedExportTool));
        registry.register(Box::new(OrphansTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Tool descriptors for `GET /tools/list`.
    pub fn describe(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "builtin": t.is_builtin(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect()
    }

    /// Run `name` and wrap the outcome in the result envelope.
    /// `None` when no tool has that name.
    pub async fn dispatch(&self, name: &str, params: Value, ctx: &ToolContext) -> Option<Value> {
        let tool = self.find(name)?;
        let params = if params.is_null() { json!({}) } else { params };
        Some(match tool.execute(params, ctx).await {
            Ok(result) => json!({ "result": result }),
            Err(e) => {
                tracing::debug!(tool = name, error = %e, "tool failed");
                json!({ "error": format!("{:#}", e) })
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Host Adapter
// ═══════════════════════════════════════════════════════════════════════

/// What a host calls around each agent turn.
#[async_trait]
pub trait MemoryHooks: Send + Sync {
    /// Tools the host should expose to the agent.
    fn tools(&self) -> &ToolRegistry;

    fn tool_context(&self) -> &ToolContext;

    /// Context to prepend to an outbound prompt.
    async fn on_before_turn(&self, prompt: &str) -> Option<String>;

    /// Offer an inbound message for capture.
    async fn on_message(&self, text: &str, session_key: Option<&str>) -> CaptureOutcome;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Invoke a registered tool by name.
    async fn call_tool(&self, name: &str, params: Value) -> Option<Value> {
        self.tools().dispatch(name, params, self.tool_context()).await
    }
}

/// [`MemoryHooks`] backed by a [`MemoryEngine`].
pub struct MemoryPlugin {
    engine: Arc<MemoryEngine>,
    tools: ToolRegistry,
    ctx: ToolContext,
}

impl MemoryPlugin {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self::with_tools(engine, ToolRegistry::with_builtins())
    }

    pub fn with_tools(engine: Arc<MemoryEngine>, tools: ToolRegistry) -> Self {
        let ctx = ToolContext::new(engine.clone());
        Self { engine, tools, ctx }
    }

    pub fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }
}

#[async_trait]
impl MemoryHooks for MemoryPlugin {
    fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn tool_context(&self) -> &ToolContext {
        &self.ctx
    }

    async fn on_before_turn(&self, prompt: &str) -> Option<String> {
        self.engine.recall(prompt).await
    }

    async fn on_message(&self, text: &str, session_key: Option<&str>) -> CaptureOutcome {
        self.engine.capture(text, session_key).await
    }

    async fn start(&self) -> Result<()> {
        self.engine.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.engine.shutdown().await
    }
}
