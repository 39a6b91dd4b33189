//! 📡 MCP surface - the tool-call protocol spoken over the WebSocket
//!
//! `protocol` holds the envelope types; `dispatcher` binds method names to
//! tool descriptors and assembles the services each handler needs.

pub mod dispatcher;
pub mod protocol;

pub use dispatcher::Dispatcher;
