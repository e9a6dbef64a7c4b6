//! Minimal HTTP/1.1 responses for connections that cannot be handed to the
//! HTTP/2 engine (unsupported protocol, bad preface).

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::Result;

/// Serialize a complete `connection: close` response.
pub fn write_error_response(status: u16, reason: &str, body: &str) -> Bytes {
    let mut dst = BytesMut::with_capacity(128 + body.len());
    dst.put_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());
    dst.put_slice(b"content-type: text/plain; charset=utf-8\r\n");
    dst.put_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
    dst.put_slice(b"connection: close\r\n\r\n");
    dst.put_slice(body.as_bytes());
    dst.freeze()
}

/// Write an error response to the transport and flush it.
pub async fn send_error_response<W>(io: &mut W, status: u16, reason: &str, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug!(status, reason, "sending HTTP/1.1 error response");
    io.write_all(&write_error_response(status, reason, body))
        .await?;
    io.flush().await?;
    Ok(())
}
