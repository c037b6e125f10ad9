//! Length-prefixed frame codec.
//!
//! Every message is a 4-byte big-endian length followed by a bincode
//! body. Frames above [`MAX_FRAME_LEN`] are rejected before any
//! allocation happens.

use cellar_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write one framed message.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(msg).map_err(|e| Error::Serialization(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::wire(format!("frame too large: {} bytes", body.len())));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// Returns `Ok(None)` when the peer closed the stream at a frame
/// boundary; EOF mid-frame is a protocol error.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::wire(format!("frame too large: {len} bytes")));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::wire(format!("truncated frame: {e}")))?;
    let msg = bincode::deserialize(&body).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(Some(msg))
}
