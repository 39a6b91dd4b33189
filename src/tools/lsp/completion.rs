//! ✨ completion - textDocument/completion

use crate::error::GatewayResult;
use crate::register_tool;
use crate::tools::lsp::base::{ensure_document_open, position_params, require_position};
use crate::tools::registry::{Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Default)]
pub struct CompletionTool;

#[async_trait]
impl Tool for CompletionTool {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn description(&self) -> &'static str {
        "✨ Completion candidates at a position"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path of the file on the client" },
                "line": { "type": "integer", "description": "Zero-based line" },
                "character": { "type": "integer", "description": "Zero-based column" }
            },
            "required": ["file_path", "line", "character"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> GatewayResult<Value> {
        let (line, character) = require_position(self.name(), &params)?;
        ensure_document_open(ctx).await?;

        let mut lsp_params = position_params(ctx.virtual_path()?, line, character);
        lsp_params["context"] = json!({ "triggerKind": 1 });

        let raw = ctx
            .lsp()?
            .issue("textDocument/completion", Some(lsp_params), self.replayable())
            .await?;

        // Result is either CompletionList { items } or a bare array
        let items = raw
            .get("items")
            .cloned()
            .unwrap_or_else(|| if raw.is_array() { raw.clone() } else { json!([]) });
        Ok(json!({ "items": items }))
    }
}

register_tool!(CompletionTool);
