//! Length-prefixed framing
//!
//! Every frame on a stream transport is a big-endian `u32` length followed by
//! that many payload bytes. The writer reuses one buffer across frames; the
//! reader hands each frame out in its own allocation since callers keep it.

use crate::{Result, TransportError};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Reads frames from one half of a stream
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
    frames_read: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
            frames_read: 0,
        }
    }

    /// Read the next frame; `None` when the peer closed the stream cleanly
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        // Read message length prefix
        let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
        match self.inner.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(TransportError::connection(
                    format!("Failed to read length prefix: {}", e),
                    None,
                ))
            }
        }

        let message_len = u32::from_be_bytes(len_bytes) as usize;

        if message_len > self.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Message size {} exceeds maximum {}",
                message_len, self.max_frame_size
            )));
        }

        let mut frame = BytesMut::zeroed(message_len);
        self.inner
            .read_exact(&mut frame)
            .await
            .map_err(|e| TransportError::connection(format!("Failed to read frame: {}", e), None))?;

        self.frames_read += 1;
        Ok(Some(frame.freeze()))
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

/// Writes frames to one half of a stream
pub struct FrameWriter<W> {
    inner: W,
    buffer: BytesMut,
    frames_written: u64,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(64 * 1024),
            frames_written: 0,
        }
    }

    /// Write one frame with its length prefix in a single write
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let len = u32::try_from(frame.len()).map_err(|_| {
            TransportError::protocol(format!("Frame of {} bytes cannot be framed", frame.len()))
        })?;

        self.buffer.clear();
        self.buffer.extend_from_slice(&len.to_be_bytes());
        self.buffer.extend_from_slice(frame);

        self.inner
            .write_all(&self.buffer)
            .await
            .map_err(|e| TransportError::connection(format!("Failed to write frame: {}", e), None))?;
        self.inner
            .flush()
            .await
            .map_err(|e| TransportError::connection(format!("Failed to flush: {}", e), None))?;

        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_survive_stream_chunking() {
        // A tiny duplex buffer forces every frame through several partial reads
        let (client, server) = tokio::io::duplex(7);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024);

        let writes = tokio::spawn(async move {
            for frame in [&b"foo"[..], b"", b"a somewhat longer frame body"] {
                writer.write_frame(frame).await.unwrap();
            }
            assert_eq!(writer.frames_written(), 3);
        });

        assert_eq!(reader.read_frame().await.unwrap().unwrap(), &b"foo"[..]);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), &b""[..]);
        assert_eq!(
            reader.read_frame().await.unwrap().unwrap(),
            &b"a somewhat longer frame body"[..]
        );
        writes.await.unwrap();

        // Writer dropped: clean end of stream
        assert!(reader.read_frame().await.unwrap().is_none());
        assert_eq!(reader.frames_read(), 3);
    }

    #[tokio::test]
    async fn test_large_frames_are_independent() {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024 * 1024);

        let writes = tokio::spawn(async move {
            for fill in [0xa1u8, 0xb2, 0xc3] {
                writer.write_frame(&vec![fill; 100 * 1024]).await.unwrap();
            }
        });

        let mut frames = Vec::new();
        while let Some(frame) = reader.read_frame().await.unwrap() {
            frames.push(frame);
        }
        writes.await.unwrap();

        // Earlier frames stay intact while later ones are read
        assert_eq!(frames.len(), 3);
        for (frame, fill) in frames.iter().zip([0xa1u8, 0xb2, 0xc3]) {
            assert_eq!(frame.len(), 100 * 1024);
            assert!(frame.iter().all(|b| *b == fill));
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 8);

        writer.write_frame(b"nine bytes").await.unwrap();
        match reader.read_frame().await {
            Err(TransportError::Protocol { message, .. }) => assert!(message.contains("exceeds")),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }
}
