//! 🚨 Unified Error Handling - Consolidated error types for the gateway
//!
//! Every failure that can cross the wire maps to a stable error kind string
//! and a JSON-RPC error code, so clients see `session_gone` or
//! `lsp_unrecoverable` rather than whatever internal error produced it.

use std::path::PathBuf;
use thiserror::Error;

/// 🎯 Primary result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// 🚨 Unified error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    // === 🔐 Auth Errors ===
    #[error("Authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Token project '{token_project}' does not match declared project '{declared}'")]
    AuthProjectMismatch {
        token_project: String,
        declared: String,
    },

    #[error("Principal is missing required permission: {permission}")]
    AuthMissingPermission { permission: String },

    // === 📡 Protocol Errors ===
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    // === 👥 Session Errors ===
    #[error("Session gone: {session_id}")]
    SessionGone { session_id: String },

    #[error("Session not initialized")]
    SessionNotInitialized,

    #[error("Connection capacity reached ({max_clients} clients)")]
    CapacityReached { max_clients: usize },

    #[error("Origin not allowed: {origin}")]
    OriginRejected { origin: String },

    // === 🧠 LSP Pool Errors ===
    #[error("LSP server unrecoverable for {language} in project {project}")]
    LspUnrecoverable { project: String, language: String },

    #[error("Request retries exhausted for {method}")]
    RetriesExhausted { method: String },

    #[error("No language server configured for extension: {extension}")]
    NoLanguageForExtension { extension: String },

    // === 🚚 Transport Errors ===
    #[error("Transport timeout after {timeout_ms}ms for {method}")]
    TransportTimeout { method: String, timeout_ms: u64 },

    #[error("Transport closed: {context}")]
    TransportClosed { context: String },

    // === 📂 FS Bridge Errors ===
    #[error("Client file read failed for {path}: {cause}")]
    FsReadFailed { path: String, cause: String },

    #[error("Client file write failed for {path}: {cause}")]
    FsWriteFailed { path: String, cause: String },

    // === ⚙️ Configuration Errors ===
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidConfigValue { field: String, value: String },

    #[error("Failed to read configuration file {path}: {reason}")]
    ConfigFileUnreadable { path: PathBuf, reason: String },

    #[error("Listener bind failed on port {port}: {reason}")]
    BindFailed { port: u16, reason: String },

    // === 🔗 External Dependencies ===
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON processing error: {source}")]
    JsonProcessing {
        #[from]
        source: serde_json::Error,
    },

    #[error("Task join error: {message}")]
    TaskJoin { message: String },

    // === 🔄 Generic & Compatibility ===
    #[error("Operation failed: {message}")]
    Generic { message: String },

    /// Bridge for anyhow errors
    #[error("Internal error: {source}")]
    Anyhow {
        #[from]
        source: anyhow::Error,
    },
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(err: tokio::task::JoinError) -> Self {
        GatewayError::TaskJoin {
            message: err.to_string(),
        }
    }
}

impl From<crate::lsp::types::LspError> for GatewayError {
    fn from(err: crate::lsp::types::LspError) -> Self {
        use crate::lsp::types::LspError;
        match err {
            LspError::Timeout { timeout_ms, method } => GatewayError::TransportTimeout {
                method,
                timeout_ms,
            },
            LspError::TransportClosed { context } => GatewayError::TransportClosed { context },
            LspError::ServerError { code, message, .. } => GatewayError::Generic {
                message: format!("LSP error {code}: {message}"),
            },
            LspError::ServerNotFound { server_name } => GatewayError::Generic {
                message: format!("LSP server not found in PATH: {server_name}"),
            },
            LspError::SpawnError { message } => GatewayError::Generic {
                message: format!("Failed to spawn LSP server: {message}"),
            },
            LspError::InitializationError { message } => GatewayError::Generic {
                message: format!("LSP initialization failed: {message}"),
            },
            LspError::InvalidResponse { message } => GatewayError::Generic {
                message: format!("Invalid LSP response: {message}"),
            },
            LspError::IoError { source } => GatewayError::Io { source },
            LspError::SerializationError { source } => GatewayError::JsonProcessing { source },
        }
    }
}

// === 🛠️ Error Helper Functions ===

impl GatewayError {
    /// Create a generic error from any displayable type
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Create a configuration validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Create an invalid-params error
    pub fn invalid_params(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Stable error-kind string surfaced to clients in the error payload
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::AuthFailed { .. } => "auth_failed",
            GatewayError::AuthProjectMismatch { .. } => "auth_project_mismatch",
            GatewayError::AuthMissingPermission { .. } => "auth_missing_permission",
            GatewayError::MethodNotFound { .. } => "method_not_found",
            GatewayError::InvalidParams { .. } | GatewayError::NoLanguageForExtension { .. } => {
                "invalid_params"
            }
            GatewayError::ProtocolViolation { .. } => "protocol_violation",
            GatewayError::SessionGone { .. } => "session_gone",
            GatewayError::SessionNotInitialized => "session_not_initialized",
            GatewayError::CapacityReached { .. } => "capacity_reached",
            GatewayError::OriginRejected { .. } => "origin_rejected",
            GatewayError::LspUnrecoverable { .. } => "lsp_unrecoverable",
            GatewayError::RetriesExhausted { .. } => "retries_exhausted",
            GatewayError::TransportTimeout { .. } => "transport_timeout",
            GatewayError::TransportClosed { .. } => "transport_closed",
            GatewayError::FsReadFailed { .. } => "fs_read_failed",
            GatewayError::FsWriteFailed { .. } => "fs_write_failed",
            GatewayError::ConfigValidation { .. }
            | GatewayError::InvalidConfigValue { .. }
            | GatewayError::ConfigFileUnreadable { .. } => "config_error",
            GatewayError::BindFailed { .. } => "bind_failed",
            GatewayError::Io { .. }
            | GatewayError::JsonProcessing { .. }
            | GatewayError::TaskJoin { .. }
            | GatewayError::Generic { .. }
            | GatewayError::Anyhow { .. } => "internal_error",
        }
    }

    /// JSON-RPC error code for the outbound error envelope
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            GatewayError::MethodNotFound { .. } => -32601,
            GatewayError::InvalidParams { .. } | GatewayError::NoLanguageForExtension { .. } => {
                -32602
            }
            GatewayError::ProtocolViolation { .. } => -32600,
            GatewayError::AuthFailed { .. }
            | GatewayError::AuthProjectMismatch { .. }
            | GatewayError::AuthMissingPermission { .. } => -32001,
            GatewayError::SessionGone { .. } | GatewayError::SessionNotInitialized => -32002,
            GatewayError::LspUnrecoverable { .. } | GatewayError::RetriesExhausted { .. } => -32003,
            GatewayError::TransportTimeout { .. } | GatewayError::TransportClosed { .. } => -32004,
            GatewayError::FsReadFailed { .. } | GatewayError::FsWriteFailed { .. } => -32005,
            _ => -32000,
        }
    }

    /// Whether this error should tear down the socket rather than just the call
    pub fn is_fatal_for_socket(&self) -> bool {
        matches!(
            self,
            GatewayError::ProtocolViolation { .. }
                | GatewayError::AuthFailed { .. }
                | GatewayError::AuthProjectMismatch { .. }
                | GatewayError::CapacityReached { .. }
                | GatewayError::OriginRejected { .. }
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::AuthFailed { .. }
            | GatewayError::AuthProjectMismatch { .. }
            | GatewayError::AuthMissingPermission { .. } => "auth",

            GatewayError::MethodNotFound { .. }
            | GatewayError::InvalidParams { .. }
            | GatewayError::ProtocolViolation { .. } => "protocol",

            GatewayError::SessionGone { .. }
            | GatewayError::SessionNotInitialized
            | GatewayError::CapacityReached { .. }
            | GatewayError::OriginRejected { .. } => "session",

            GatewayError::LspUnrecoverable { .. }
            | GatewayError::RetriesExhausted { .. }
            | GatewayError::NoLanguageForExtension { .. } => "lsp",

            GatewayError::TransportTimeout { .. } | GatewayError::TransportClosed { .. } => {
                "transport"
            }

            GatewayError::FsReadFailed { .. } | GatewayError::FsWriteFailed { .. } => "fsbridge",

            GatewayError::ConfigValidation { .. }
            | GatewayError::InvalidConfigValue { .. }
            | GatewayError::ConfigFileUnreadable { .. }
            | GatewayError::BindFailed { .. } => "configuration",

            GatewayError::Io { .. }
            | GatewayError::JsonProcessing { .. }
            | GatewayError::TaskJoin { .. }
            | GatewayError::Generic { .. }
            | GatewayError::Anyhow { .. } => "general",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            GatewayError::SessionGone {
                session_id: "s1".into()
            }
            .kind(),
            "session_gone"
        );
        assert_eq!(
            GatewayError::LspUnrecoverable {
                project: "p".into(),
                language: "rust".into()
            }
            .kind(),
            "lsp_unrecoverable"
        );
        assert_eq!(
            GatewayError::MethodNotFound {
                method: "nope".into()
            }
            .json_rpc_code(),
            -32601
        );
    }

    #[test]
    fn test_error_categorization() {
        assert_eq!(
            GatewayError::AuthFailed {
                reason: "bad token".into()
            }
            .category(),
            "auth"
        );
        assert_eq!(
            GatewayError::TransportTimeout {
                method: "textDocument/hover".into(),
                timeout_ms: 5000
            }
            .category(),
            "transport"
        );
    }

    #[test]
    fn test_socket_fatality() {
        assert!(GatewayError::protocol("garbage frame").is_fatal_for_socket());
        assert!(!GatewayError::MethodNotFound {
            method: "x".into()
        }
        .is_fatal_for_socket());
    }
}
