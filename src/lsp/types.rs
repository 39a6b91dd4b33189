//! 🔧 LSP Types - Error wrappers and pool-facing LSP types

use serde_json::Value;

/// 🎯 LSP operation result type
pub type LspResult<T> = Result<T, LspError>;

/// 🚨 LSP-specific error types
#[derive(Debug, thiserror::Error)]
pub enum LspError {
    #[error("LSP server not found in PATH: {server_name}")]
    ServerNotFound { server_name: String },

    #[error("Failed to spawn LSP server: {message}")]
    SpawnError { message: String },

    /// JSON-RPC error object returned by the child. Surfaces as a typed
    /// failure to the caller, never as an empty success.
    #[error("LSP server error {code}: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("LSP request timeout after {timeout_ms}ms for {method}")]
    Timeout { timeout_ms: u64, method: String },

    #[error("LSP transport closed: {context}")]
    TransportClosed { context: String },

    #[error("LSP server initialization failed: {message}")]
    InitializationError { message: String },

    #[error("Invalid LSP response: {message}")]
    InvalidResponse { message: String },

    #[error("IO error in LSP communication: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },
}

impl LspError {
    /// Transport-level failures that indicate the child is gone and the
    /// request is a candidate for replay after restart.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            LspError::TransportClosed { .. } | LspError::IoError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_detection() {
        assert!(LspError::TransportClosed {
            context: "stdout EOF".into()
        }
        .is_transport_failure());

        assert!(!LspError::ServerError {
            code: -32601,
            message: "method not found".into(),
            data: None,
        }
        .is_transport_failure());

        assert!(!LspError::Timeout {
            timeout_ms: 5000,
            method: "textDocument/hover".into()
        }
        .is_transport_failure());
    }
}
