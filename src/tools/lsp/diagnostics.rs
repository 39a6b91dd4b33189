//! 🩺 get_diagnostics - textDocument/diagnostic

use crate::error::GatewayResult;
use crate::register_tool;
use crate::tools::lsp::base::{ensure_document_open, virtual_uri};
use crate::tools::registry::{Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Default)]
pub struct GetDiagnosticsTool;

#[async_trait]
impl Tool for GetDiagnosticsTool {
    fn name(&self) -> &'static str {
        "get_diagnostics"
    }

    fn description(&self) -> &'static str {
        "🩺 Pull diagnostics for one document"
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
                "textDocument/diagnostic",
                Some(json!({
                    "textDocument": { "uri": virtual_uri(ctx.virtual_path()?) }
                })),
                self.replayable(),
            )
            .await?;

        // Full document diagnostic reports nest items under `items`
        let diagnostics = raw
            .get("items")
            .cloned()
            .unwrap_or_else(|| raw.clone());
        Ok(json!({ "diagnostics": diagnostics }))
    }
}

register_tool!(GetDiagnosticsTool);
