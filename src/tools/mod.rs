//! 🛠️ Tool catalog
//!
//! Every tool is one MCP method: a descriptor (name, schema, required
//! services, replayability) plus an async handler that works against the
//! service bundle the dispatcher assembled for it.

pub mod batch;
pub mod file_ops;
pub mod lsp;
pub mod registry;

pub use registry::{get_all_tools, ServiceSet, Tool, ToolContext, ToolRegistration};
