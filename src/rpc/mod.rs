//! 📡 RPC Framing - shared JSON-RPC plumbing
//!
//! Both transports in this gateway speak JSON-RPC 2.0: the client-facing
//! WebSocket (one JSON object per text message) and LSP child stdio
//! (`Content-Length`-framed). This module owns the message shapes, the
//! correlation of request ids to pending futures, and the stdio codec.

pub mod correlator;
pub mod framing;
pub mod message;

pub use correlator::{Correlator, IdSpace};
pub use message::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, RpcError};
