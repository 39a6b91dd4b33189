//! 🎯 MCP Dispatcher - method name → tool descriptor → service bundle
//!
//! On an inbound `{id, method, params}` from a bound session: look the tool
//! up, acquire what its descriptor demands (pool entry for the file's
//! language, FS bridge, raw session, or the dispatcher itself for batch),
//! rewrite `file_path` to its canonical virtual form, invoke, and release
//! the pool entry exactly once regardless of outcome. Concurrent calls on a
//! session run independently; there is no session-wide lock.

use crate::error::{GatewayError, GatewayResult};
use crate::fsbridge::FsBridge;
use crate::log_debug;
use crate::log_error;
use crate::log_info;
use crate::lsp::pool::LspPool;
use crate::mcp::protocol::{ToolInfo, ToolsListResult};
use crate::rpc::message::{JsonRpcRequest, JsonRpcResponse, RpcError};
use crate::session::Session;
use crate::tools::{get_all_tools, ServiceSet, Tool, ToolContext};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 🎯 The dispatcher
pub struct Dispatcher {
    tools: HashMap<String, Box<dyn Tool>>,
    pool: Arc<LspPool>,
    bridge: Arc<FsBridge>,
    /// Hard ceiling per tool call; individual LSP/client RPCs carry their
    /// own tighter timeouts underneath
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(pool: Arc<LspPool>, bridge: Arc<FsBridge>, call_timeout: Duration) -> Arc<Self> {
        let tools = get_all_tools();
        log_info!("dispatch", "🔧 Registered {} tools", tools.len());
        Arc::new(Self {
            tools,
            pool,
            bridge,
            call_timeout,
        })
    }

    /// Route one request frame to a response frame
    pub async fn dispatch(
        self: &Arc<Self>,
        session: &Arc<Session>,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        let params = params.unwrap_or(Value::Null);

        if method == "tools/list" {
            return JsonRpcResponse::success(
                id,
                serde_json::to_value(self.tools_list()).unwrap_or(Value::Null),
            );
        }

        log_debug!("dispatch", "⚙️ {} on session {}", method, session.id());
        let outcome = tokio::time::timeout(
            self.call_timeout,
            self.invoke_tool(session, &method, params),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GatewayError::TransportTimeout {
                method: method.clone(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            })
        });

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                log_error!("dispatch", "❌ {} failed: {e}", method);
                JsonRpcResponse::failure(
                    id,
                    RpcError::new(e.json_rpc_code(), e.to_string()).with_kind(e.kind()),
                )
            }
        }
    }

    /// 🚀 Invoke a tool with the services its descriptor requires.
    /// Also the re-entry point for batch sub-calls.
    pub async fn invoke_tool(
        self: &Arc<Self>,
        session: &Arc<Session>,
        method: &str,
        mut params: Value,
    ) -> GatewayResult<Value> {
        if !session.is_initialized() {
            return Err(GatewayError::SessionNotInitialized);
        }

        let tool = self
            .tools
            .get(method)
            .ok_or_else(|| GatewayError::MethodNotFound {
                method: method.to_string(),
            })?;

        let services = tool.services();

        // Canonicalize file_path into its virtual form for every service
        // set that touches files
        let virtual_path = match services {
            ServiceSet::None | ServiceSet::Batch => None,
            ServiceSet::File | ServiceSet::Symbol => {
                let absolute = params
                    .get("file_path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::invalid_params(method, "missing file_path")
                    })?;
                let virtual_path = FsBridge::translate(session, absolute);
                params["file_path"] = Value::String(virtual_path.clone());
                Some(virtual_path)
            }
        };

        // Acquire the pool entry for symbol tools
        let guard = match (services, &virtual_path) {
            (ServiceSet::Symbol, Some(path)) => {
                let language = self
                    .pool
                    .registry()
                    .language_for_path(path)
                    .ok_or_else(|| GatewayError::NoLanguageForExtension {
                        extension: path.rsplit('.').next().unwrap_or(path).to_string(),
                    })?
                    .to_string();
                Some(
                    self.pool
                        .acquire(session.project(), &language, None)
                        .await?,
                )
            }
            _ => None,
        };

        let ctx = ToolContext {
            session: session.clone(),
            bridge: self.bridge.clone(),
            lsp: guard,
            dispatcher: matches!(services, ServiceSet::Batch).then(|| self.clone()),
            virtual_path,
        };

        // The guard lives in ctx: dropping ctx on any exit path (success,
        // error, timeout cancellation) releases the entry exactly once.
        tool.execute(&ctx, params).await
    }

    fn tools_list(&self) -> ToolsListResult {
        let mut tools: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.schema(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        ToolsListResult { tools }
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}
