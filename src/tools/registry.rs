//! 📦 Tool trait, service bundle, and inventory-backed registration

use crate::error::GatewayResult;
use crate::fsbridge::FsBridge;
use crate::lsp::pool::PoolGuard;
use crate::session::Session;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Which services the dispatcher must acquire before invoking a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSet {
    /// Raw session only
    None,
    /// Pool entry for the file's language + FS bridge
    Symbol,
    /// FS bridge without a pool entry
    File,
    /// Everything plus the dispatcher itself (sub-dispatch)
    Batch,
}

/// 🎁 Service bundle handed to a tool handler
///
/// Holding the `PoolGuard` here is what makes release-exactly-once true:
/// the dispatcher drops the context after the handler returns (or times
/// out), and the guard's Drop gives the refcount back.
pub struct ToolContext {
    pub session: Arc<Session>,
    pub bridge: Arc<FsBridge>,
    pub lsp: Option<PoolGuard>,
    pub dispatcher: Option<Arc<crate::mcp::dispatcher::Dispatcher>>,
    /// Canonical virtual path computed from `params.file_path`
    pub virtual_path: Option<String>,
}

impl ToolContext {
    /// The acquired pool guard; invalid-params if the descriptor lied about
    /// its services
    pub fn lsp(&self) -> GatewayResult<&PoolGuard> {
        self.lsp.as_ref().ok_or_else(|| {
            crate::error::GatewayError::generic("tool requested LSP services it did not declare")
        })
    }

    pub fn virtual_path(&self) -> GatewayResult<&str> {
        self.virtual_path.as_deref().ok_or_else(|| {
            crate::error::GatewayError::generic("tool requires a file_path parameter")
        })
    }
}

/// 🛠️ Core trait for all gateway tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool identifier for the MCP method namespace
    fn name(&self) -> &'static str;

    /// Tool description for schema listings
    fn description(&self) -> &'static str;

    /// JSON schema for tool parameters
    fn schema(&self) -> Value;

    /// Services the dispatcher acquires before invoking
    fn services(&self) -> ServiceSet {
        ServiceSet::Symbol
    }

    /// Whether a crashed-in-flight call may be replayed on the respawned
    /// child. Mutating operations must say no.
    fn replayable(&self) -> bool {
        true
    }

    /// Execute with the assembled service bundle
    async fn execute(&self, ctx: &ToolContext, params: Value) -> GatewayResult<Value>;
}

/// 📦 One registered tool constructor, collected through inventory.
/// The method name under which it dispatches comes from the constructed
/// tool itself, so a tool's `name()` is its single source of truth.
pub struct ToolRegistration(pub fn() -> Box<dyn Tool>);

inventory::collect!(ToolRegistration);

/// Monomorphized constructor whose fn pointer is what actually gets
/// registered
pub fn construct<T>() -> Box<dyn Tool>
where
    T: Tool + Default + 'static,
{
    Box::<T>::default()
}

/// 🏭 Instantiate every registered tool, keyed by its own name
pub fn get_all_tools() -> HashMap<String, Box<dyn Tool>> {
    inventory::iter::<ToolRegistration>
        .into_iter()
        .map(|registration| {
            let tool = (registration.0)();
            (tool.name().to_string(), tool)
        })
        .collect()
}

/// 🔧 Put a tool type into the registry
#[macro_export]
macro_rules! register_tool {
    ($tool:ty) => {
        inventory::submit! {
            $crate::tools::registry::ToolRegistration($crate::tools::registry::construct::<$tool>)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_collects_tools() {
        let tools = get_all_tools();
        for name in [
            "find_definition",
            "find_references",
            "hover",
            "get_diagnostics",
            "document_symbols",
            "workspace_symbols",
            "completion",
            "rename_symbol",
            "read_file",
            "write_file",
            "batch",
        ] {
            assert!(tools.contains_key(name), "missing tool: {name}");
        }
    }

    #[test]
    fn test_rename_is_not_replayable() {
        let tools = get_all_tools();
        assert!(!tools["rename_symbol"].replayable());
        assert!(tools["find_definition"].replayable());
    }

    #[test]
    fn test_service_sets() {
        let tools = get_all_tools();
        assert_eq!(tools["read_file"].services(), ServiceSet::File);
        assert_eq!(tools["batch"].services(), ServiceSet::Batch);
        assert_eq!(tools["hover"].services(), ServiceSet::Symbol);
    }
}
