//! Native messaging framing: a 32-bit length in native byte order followed
//! by that many bytes of UTF-8 JSON.

use crate::error::MessengerError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted in either direction
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Read one frame. `None` on a clean end of stream or a zero-length frame.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut length_bytes = [0u8; 4];
    match reader.read_exact(&mut length_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let length = u32::from_ne_bytes(length_bytes) as usize;
    if length == 0 {
        return Ok(None);
    }
    if length > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", length),
        ));
    }

    let mut message = vec![0u8; length];
    reader.read_exact(&mut message).await?;
    Ok(Some(message))
}

/// Write one frame and flush
pub async fn write_message<W>(writer: &mut W, message: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message too large: {} bytes", message.len()),
        ));
    }

    writer.write_all(&(message.len() as u32).to_ne_bytes()).await?;
    writer.write_all(message).await?;
    writer.flush().await
}

pub async fn read_json<R, T>(reader: &mut R) -> Result<Option<T>, MessengerError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_message(reader).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<(), MessengerError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)?;
    write_message(writer, &bytes).await?;
    Ok(())
}
