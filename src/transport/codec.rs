//! Length-prefixed multi-part framing.
//!
//! Every frame on the wire is:
//!
//! ```text
//! u16 part_count
//! for each part: u32 length (LE) followed by that many bytes
//! ```
//!
//! A "frame" models a ZeroMQ multi-part message: the control plane
//! sends `(identity, empty-delimiter, payload)` and broadcast frames
//! send `(topic, payload)`. Single-part frames (e.g. the bare `START`
//! signal) are just a frame with one part.

use super::{Result, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub type Frame = Vec<Vec<u8>>;

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    if frame.is_empty() || frame.len() > u16::MAX as usize {
        return Err(TransportError::Protocol(format!(
            "invalid part count: {}",
            frame.len()
        )));
    }
    writer.write_u16_le(frame.len() as u16).await?;
    for part in frame {
        writer.write_u32_le(part.len() as u32).await?;
        writer.write_all(part).await?;
    }
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let part_count = match reader.read_u16_le().await {
        Ok(n) => n,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    };
    if part_count == 0 {
        return Err(TransportError::Protocol("zero-part frame".into()));
    }

    let mut parts = Vec::with_capacity(part_count as usize);
    for _ in 0..part_count {
        let len = reader.read_u32_le().await? as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        parts.push(buf);
    }
    Ok(parts)
}

/// Single-part convenience wrapper.
pub async fn write_single<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    write_frame(writer, &vec![payload.to_vec()]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_multipart_frame() {
        let frame: Frame = vec![b"CONFIG".to_vec(), b"{\"a\":1}".to_vec()];
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn round_trips_single_part_frame() {
        let mut buf = Vec::new();
        write_single(&mut buf, b"START").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded, vec![b"START".to_vec()]);
    }

    #[tokio::test]
    async fn empty_stream_is_connection_closed() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
