//! 🧠 LSP layer - child process clients and the multiplexing pool
//!
//! `client` speaks Content-Length JSON-RPC to one child over stdio;
//! `pool` owns the children, keyed by (project, language, workspace),
//! with crash recovery, request replay, and idle reaping;
//! `languages` maps file extensions to server commands;
//! `reaper` is the defense-in-depth zombie collector.

pub mod client;
pub mod languages;
pub mod pool;
pub mod reaper;
pub mod types;

pub use client::LspClient;
pub use languages::LanguageRegistry;
pub use pool::{LspPool, PoolGuard, PoolKey};
pub use types::{LspError, LspResult};
