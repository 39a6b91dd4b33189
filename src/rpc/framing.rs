//! 📦 Content-Length framing for LSP child stdio
//!
//! The LSP stdio transport frames each JSON body as:
//!
//! ```text
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JSON>
//! ```
//!
//! Other headers (Content-Type) are tolerated and ignored. A malformed or
//! truncated frame closes the transport; no partial frames survive a close.

use crate::lsp::types::{LspError, LspResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Write one framed message to the child's stdin
pub async fn write_frame<W>(writer: &mut W, body: &str) -> LspResult<()>
where
    W: AsyncWrite + Unpin,
{
    let content = body.as_bytes();
    let header = format!("Content-Length: {}\r\n\r\n", content.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(content).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message from the child's stdout
///
/// Returns `Ok(None)` on clean EOF.
pub async fn read_frame<R>(reader: &mut BufReader<R>) -> LspResult<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut header_line = String::new();
    let mut content_length: Option<usize> = None;

    loop {
        header_line.clear();
        let bytes_read =
            reader
                .read_line(&mut header_line)
                .await
                .map_err(|e| LspError::InvalidResponse {
                    message: format!("Failed to read header: {e}"),
                })?;

        if bytes_read == 0 {
            return Ok(None); // EOF
        }

        let header = header_line.trim();

        // Empty line signals end of headers
        if header.is_empty() {
            break;
        }

        if let Some(len_str) = header.strip_prefix("Content-Length:") {
            content_length = len_str.trim().parse().ok();
        }
        // Ignore other headers (Content-Type, etc.)
    }

    let content_length = content_length.ok_or_else(|| LspError::InvalidResponse {
        message: "Missing Content-Length header".to_string(),
    })?;

    let mut content = vec![0u8; content_length];
    reader
        .read_exact(&mut content)
        .await
        .map_err(|e| LspError::InvalidResponse {
            message: format!("Failed to read message content: {e}"),
        })?;

    String::from_utf8(content)
        .map(Some)
        .map_err(|e| LspError::InvalidResponse {
            message: format!("Invalid UTF-8 in message: {e}"),
        })
}
