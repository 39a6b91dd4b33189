//! 📦 batch - run several tool calls in one envelope
//!
//! Exercises the `Batch` service set: the handler receives the dispatcher
//! itself and re-enters it per sub-call. Sub-calls run sequentially so their
//! effects are ordered for the caller.

use crate::error::{GatewayError, GatewayResult};
use crate::register_tool;
use crate::tools::registry::{ServiceSet, Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Upper bound on sub-calls per batch; a rogue request must not pin the
/// dispatcher indefinitely
const MAX_BATCH_CALLS: usize = 32;

#[derive(Default)]
pub struct BatchTool;

#[async_trait]
impl Tool for BatchTool {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn description(&self) -> &'static str {
        "📦 Execute a sequence of tool calls, collecting per-call results"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "calls": {
                    "type": "array",
                    "description": "Tool calls to run in order",
                    "items": {
                        "type": "object",
                        "properties": {
                            "method": { "type": "string" },
                            "params": { "type": "object" }
                        },
                        "required": ["method"]
                    }
                }
            },
            "required": ["calls"],
            "additionalProperties": false
        })
    }

    fn services(&self) -> ServiceSet {
        ServiceSet::Batch
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> GatewayResult<Value> {
        let dispatcher = ctx
            .dispatcher
            .clone()
            .ok_or_else(|| GatewayError::generic("batch invoked without dispatcher service"))?;

        let calls = params
            .get("calls")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::invalid_params(self.name(), "missing calls array"))?;
        if calls.len() > MAX_BATCH_CALLS {
            return Err(GatewayError::invalid_params(
                self.name(),
                format!("at most {MAX_BATCH_CALLS} calls per batch"),
            ));
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let method = call
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::invalid_params(self.name(), "call missing method"))?;
            if method == self.name() {
                return Err(GatewayError::invalid_params(self.name(), "batches do not nest"));
            }
            let call_params = call.get("params").cloned().unwrap_or_else(|| json!({}));

            match dispatcher
                .invoke_tool(&ctx.session, method, call_params)
                .await
            {
                Ok(result) => results.push(json!({ "method": method, "result": result })),
                Err(e) => results.push(json!({
                    "method": method,
                    "error": { "code": e.json_rpc_code(), "message": e.to_string(), "kind": e.kind() }
                })),
            }
        }

        Ok(json!({ "results": results }))
    }
}

register_tool!(BatchTool);
