//! Content-Length framed JSON-RPC over byte streams

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Content-Length header prefix
const CONTENT_LENGTH: &str = "Content-Length: ";

/// Reads one framed message. Returns `None` when the stream ends between
/// messages.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    // Read headers until the blank line, skipping non-LSP output
    // some servers print to stdout before the first header
    let mut content_length: Option<usize> = None;
    loop {
        let mut header = String::new();
        let bytes_read = reader.read_line(&mut header).await?;
        if bytes_read == 0 {
            return match content_length {
                None => Ok(None),
                Some(_) => Err(TransportError::Io(std::io::ErrorKind::UnexpectedEof.into())),
            };
        }

        let header = header.trim();

        if header.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }

        if let Some(len_str) = header.strip_prefix(CONTENT_LENGTH) {
            let length = len_str
                .parse()
                .map_err(|_| TransportError::InvalidContentLength(len_str.to_string()))?;
            content_length = Some(length);
        }
        // Other headers (Content-Type) and stray log lines are ignored
    }

    let length = content_length.ok_or(TransportError::MissingContentLength)?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Writes one framed message and flushes.
pub async fn write_message<W>(writer: &mut W, message: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("{}{}\r\n\r\n", CONTENT_LENGTH, message.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(message.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
