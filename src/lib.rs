//! 🔀 Switchboard - a multi-tenant gateway that multiplexes remote MCP
//! clients onto pools of LSP child processes over WebSocket.

pub mod auth;
pub mod config;
pub mod error;
pub mod fsbridge;
pub mod logging;
pub mod lsp;
pub mod mcp;
pub mod rpc;
pub mod server;
pub mod session;
pub mod tools;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use server::Gateway;
