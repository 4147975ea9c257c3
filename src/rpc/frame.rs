//! Length-prefixed bincode frames.
//!
//! Every frame is a big-endian `u32` length followed by that many bytes of
//! bincode. Frames above [`MAX_FRAME_SIZE`] are rejected before allocation.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_FRAME_SIZE;
use crate::error::{Error, Result};

/// Serialize `message` into a frame body.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let data = bincode::serialize(message)?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            data.len(),
            MAX_FRAME_SIZE
        )));
    }
    Ok(data)
}

/// Write an already encoded frame body with its length prefix.
pub async fn write_raw<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> Result<()> {
    let len = data.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(
    stream: &mut W,
    message: &T,
) -> Result<()> {
    let data = encode(message)?;
    write_raw(stream, &data).await
}

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly
/// between frames.
pub async fn read_frame<R: AsyncRead + Unpin, T: DeserializeOwned>(
    stream: &mut R,
) -> Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "frame length {} exceeds limit of {}",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &("hello".to_string(), 42u64)).await.unwrap();
        let got: Option<(String, u64)> = read_frame(&mut b).await.unwrap();
        assert_eq!(got, Some(("hello".to_string(), 42)));
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let got: Option<u64> = read_frame(&mut b).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(u32::MAX).to_be_bytes()).await.unwrap();
        let result: Result<Option<u64>> = read_frame(&mut b).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
