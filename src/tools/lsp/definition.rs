//! 🎯 find_definition - textDocument/definition

use crate::error::GatewayResult;
use crate::register_tool;
use crate::tools::lsp::base::{ensure_document_open, locations_result, position_params, require_position};
use crate::tools::registry::{Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Default)]
pub struct FindDefinitionTool;

#[async_trait]
impl Tool for FindDefinitionTool {
    fn name(&self) -> &'static str {
        "find_definition"
    }

    fn description(&self) -> &'static str {
        "🎯 Resolve the definition site of the symbol at a position"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path of the file on the client" },
                "symbol_name": { "type": "string", "description": "Symbol under the cursor (informational)" },
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
                "textDocument/definition",
                Some(position_params(ctx.virtual_path()?, line, character)),
                self.replayable(),
            )
            .await?;
        Ok(locations_result(raw))
    }
}

register_tool!(FindDefinitionTool);
