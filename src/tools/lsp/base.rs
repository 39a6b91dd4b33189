//! 🧠 Shared plumbing for LSP tools
//!
//! Every LSP tool needs the same preamble: make sure the virtual document is
//! open on the pool entry (content served by the FS bridge), then build
//! text-document position params against the virtual URI.

use crate::error::{GatewayError, GatewayResult};
use crate::tools::registry::ToolContext;
use serde_json::{json, Value};

/// Virtual-path URI as seen by pool entries. Stable across sessions with
/// different absolute roots.
pub fn virtual_uri(virtual_path: &str) -> String {
    format!("file://{virtual_path}")
}

/// 📄 Ensure the document is open on the acquired pool entry
///
/// Reads content through the FS bridge (cache first, client RPC on miss) and
/// sends `textDocument/didOpen` once per (entry, path). A respawned child
/// has an empty open-file set, so the next call after a crash re-opens.
pub async fn ensure_document_open(ctx: &ToolContext) -> GatewayResult<String> {
    let virtual_path = ctx.virtual_path()?.to_string();
    let guard = ctx.lsp()?;

    let content = ctx.bridge.read(&ctx.session, &virtual_path).await?;

    if guard.entry().mark_open(&virtual_path) {
        let language_id = guard.key().language.clone();
        let params = json!({
            "textDocument": {
                "uri": virtual_uri(&virtual_path),
                "languageId": language_id,
                "version": 1,
                "text": content,
            }
        });
        guard.notify("textDocument/didOpen", Some(params)).await?;
    }

    Ok(content)
}

/// Pull `line`/`character` out of tool params
pub fn require_position(method: &str, params: &Value) -> GatewayResult<(u64, u64)> {
    let line = params
        .get("line")
        .and_then(Value::as_u64)
        .ok_or_else(|| GatewayError::invalid_params(method, "missing line"))?;
    let character = params
        .get("character")
        .and_then(Value::as_u64)
        .ok_or_else(|| GatewayError::invalid_params(method, "missing character"))?;
    Ok((line, character))
}

/// Standard TextDocumentPositionParams payload
pub fn position_params(virtual_path: &str, line: u64, character: u64) -> Value {
    json!({
        "textDocument": { "uri": virtual_uri(virtual_path) },
        "position": { "line": line, "character": character },
    })
}

/// Normalize a definition/references result into a `locations` array
pub fn locations_result(raw: Value) -> Value {
    let locations = match raw {
        Value::Array(items) => Value::Array(items),
        Value::Null => Value::Array(vec![]),
        single => Value::Array(vec![single]),
    };
    json!({ "locations": locations })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_uri() {
        assert_eq!(virtual_uri("/src/x.ts"), "file:///src/x.ts");
    }

    #[test]
    fn test_require_position() {
        let params = json!({ "line": 3, "character": 5 });
        assert_eq!(require_position("t", &params).unwrap(), (3, 5));
        assert!(require_position("t", &json!({ "line": 3 })).is_err());
    }

    #[test]
    fn test_locations_result_shapes() {
        assert_eq!(locations_result(json!(null))["locations"], json!([]));
        assert_eq!(
            locations_result(json!([{"uri": "file:///a"}]))["locations"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            locations_result(json!({"uri": "file:///a"}))["locations"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
    }
}
