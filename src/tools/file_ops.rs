//! 📁 read_file / write_file - FS bridge tools
//!
//! These exercise the `File` service set: the bridge and the raw session,
//! no pool entry.

use crate::error::{GatewayError, GatewayResult};
use crate::register_tool;
use crate::tools::registry::{ServiceSet, Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Default)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "📖 Read a file through the session's streaming bridge"
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

    fn services(&self) -> ServiceSet {
        ServiceSet::File
    }

    async fn execute(&self, ctx: &ToolContext, _params: Value) -> GatewayResult<Value> {
        let virtual_path = ctx.virtual_path()?;
        let content = ctx.bridge.read(&ctx.session, virtual_path).await?;
        Ok(json!({ "path": virtual_path, "content": content }))
    }
}

register_tool!(ReadFileTool);

#[derive(Default)]
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "📝 Write a file through the session's streaming bridge"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path of the file on the client" },
                "content": { "type": "string", "description": "Full replacement content" }
            },
            "required": ["file_path", "content"],
            "additionalProperties": false
        })
    }

    fn services(&self) -> ServiceSet {
        ServiceSet::File
    }

    /// Writing is mutating; never replay it
    fn replayable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> GatewayResult<Value> {
        let content = params
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_params(self.name(), "missing content"))?;
        let virtual_path = ctx.virtual_path()?;
        ctx.bridge.write(&ctx.session, virtual_path, content).await?;
        Ok(json!({ "path": virtual_path, "bytes_written": content.len() }))
    }
}

register_tool!(WriteFileTool);
