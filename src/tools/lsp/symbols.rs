//! 🗂️ document_symbols / workspace_symbols

use crate::error::{GatewayError, GatewayResult};
use crate::register_tool;
use crate::tools::lsp::base::{ensure_document_open, virtual_uri};
use crate::tools::registry::{Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Default)]
pub struct DocumentSymbolsTool;

#[async_trait]
impl Tool for DocumentSymbolsTool {
    fn name(&self) -> &'static str {
        "document_symbols"
    }

    fn description(&self) -> &'static str {
        "🗂️ Symbol outline of one document"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path of the file on the client" }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, _params: Value) -> GatewayResult<Value> {
        ensure_document_open(ctx).await?;

        let raw = ctx
            .lsp()?
            .issue(
                "textDocument/documentSymbol",
                Some(json!({
                    "textDocument": { "uri": virtual_uri(ctx.virtual_path()?) }
                })),
                self.replayable(),
            )
            .await?;
        Ok(json!({ "symbols": if raw.is_null() { json!([]) } else { raw } }))
    }
}

register_tool!(DocumentSymbolsTool);

#[derive(Default)]
pub struct WorkspaceSymbolsTool;

#[async_trait]
impl Tool for WorkspaceSymbolsTool {
    fn name(&self) -> &'static str {
        "workspace_symbols"
    }

    fn description(&self) -> &'static str {
        "🗂️ Search symbols across the workspace"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Any file of the target language; routes the query to its server" },
                "query": { "type": "string", "description": "Symbol query string" }
            },
            "required": ["file_path", "query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> GatewayResult<Value> {
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_params(self.name(), "missing query"))?;
        ensure_document_open(ctx).await?;

        let raw = ctx
            .lsp()?
            .issue(
                "workspace/symbol",
                Some(json!({ "query": query })),
                self.replayable(),
            )
            .await?;
        Ok(json!({ "symbols": if raw.is_null() { json!([]) } else { raw } }))
    }
}

register_tool!(WorkspaceSymbolsTool);
