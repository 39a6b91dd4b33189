//! 🔎 find_references - textDocument/references

use crate::error::GatewayResult;
use crate::register_tool;
use crate::tools::lsp::base::{ensure_document_open, locations_result, position_params, require_position};
use crate::tools::registry::{Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Default)]
pub struct FindReferencesTool;

#[async_trait]
impl Tool for FindReferencesTool {
    fn name(&self) -> &'static str {
        "find_references"
    }

    fn description(&self) -> &'static str {
        "🔎 List every reference to the symbol at a position"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path of the file on the client" },
                "symbol_name": { "type": "string", "description": "Symbol under the cursor (informational)" },
                "line": { "type": "integer", "description": "Zero-based line" },
                "character": { "type": "integer", "description": "Zero-based column" },
                "include_declaration": { "type": "boolean", "description": "Include the declaration itself" }
            },
            "required": ["file_path", "line", "character"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> GatewayResult<Value> {
        let (line, character) = require_position(self.name(), &params)?;
        let include_declaration = params
            .get("include_declaration")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        ensure_document_open(ctx).await?;

        let mut lsp_params = position_params(ctx.virtual_path()?, line, character);
        lsp_params["context"] = json!({ "includeDeclaration": include_declaration });

        let raw = ctx
            .lsp()?
            .issue("textDocument/references", Some(lsp_params), self.replayable())
            .await?;
        Ok(locations_result(raw))
    }
}

register_tool!(FindReferencesTool);
