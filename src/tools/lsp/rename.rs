//! ✏️ rename_symbol - textDocument/rename
//!
//! Mutating: a crash while the rename is in flight must NOT be replayed
//! against the respawned child, so this tool is registered non-replayable
//! and fails with `retries_exhausted` instead.

use crate::error::{GatewayError, GatewayResult};
use crate::register_tool;
use crate::tools::lsp::base::{ensure_document_open, position_params, require_position};
use crate::tools::registry::{Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Default)]
pub struct RenameSymbolTool;

#[async_trait]
impl Tool for RenameSymbolTool {
    fn name(&self) -> &'static str {
        "rename_symbol"
    }

    fn description(&self) -> &'static str {
        "✏️ Workspace-wide rename of the symbol at a position"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path of the file on the client" },
                "line": { "type": "integer", "description": "Zero-based line" },
                "character": { "type": "integer", "description": "Zero-based column" },
                "new_name": { "type": "string", "description": "Replacement symbol name" }
            },
            "required": ["file_path", "line", "character", "new_name"],
            "additionalProperties": false
        })
    }

    fn replayable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> GatewayResult<Value> {
        let (line, character) = require_position(self.name(), &params)?;
        let new_name = params
            .get("new_name")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_params(self.name(), "missing new_name"))?;
        ensure_document_open(ctx).await?;

        let mut lsp_params = position_params(ctx.virtual_path()?, line, character);
        lsp_params["newName"] = json!(new_name);

        let raw = ctx
            .lsp()?
            .issue("textDocument/rename", Some(lsp_params), self.replayable())
            .await?;
        Ok(json!({ "edit": raw }))
    }
}

register_tool!(RenameSymbolTool);
