//! 💬 hover - textDocument/hover

use crate::error::GatewayResult;
use crate::register_tool;
use crate::tools::lsp::base::{ensure_document_open, position_params, require_position};
use crate::tools::registry::{Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Default)]
pub struct HoverTool;

#[async_trait]
impl Tool for HoverTool {
    fn name(&self) -> &'static str {
        "hover"
    }

    fn description(&self) -> &'static str {
        "💬 Type and documentation for the symbol at a position"
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

        let raw = ctx
            .lsp()?
            .issue(
                "textDocument/hover",
                Some(position_params(ctx.virtual_path()?, line, character)),
                self.replayable(),
            )
            .await?;
        Ok(json!({ "hover": raw }))
    }
}

register_tool!(HoverTool);
