//! Multiplexed log stream decoding
//!
//! Containers without a TTY send stdout and stderr over one connection. Each
//! chunk is prefixed with an 8-byte header:
//!
//! ```text
//! [stream type][0][0][0][size: u32 big-endian]
//! ```
//!
//! followed by `size` payload bytes. Stream type 1 is stdout, 2 is stderr.

use crate::error::{Result, WardenError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame header length
pub const HEADER_LEN: usize = 8;

/// Which output a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

impl StreamType {
    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(StreamType::Stdout),
            2 => Ok(StreamType::Stderr),
            other => Err(WardenError::InvalidStream(other)),
        }
    }

    fn tag(self) -> u8 {
        match self {
            StreamType::Stdout => 1,
            StreamType::Stderr => 2,
        }
    }
}

/// One decoded chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: StreamType,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame
    pub fn new(stream: StreamType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }

    /// Wire representation of this frame
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.push(self.stream.tag());
        bytes.extend_from_slice(&[0, 0, 0]);
        bytes.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// Read the next frame.
///
/// Returns `Ok(None)` when the input ends before a full header is read. A
/// payload shorter than its declared size is `Truncated`.
pub async fn next_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return Ok(None);
        }
        filled += n;
    }

    let stream = StreamType::from_tag(header[0])?;
    let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let mut payload = Vec::new();
    (&mut *reader)
        .take(expected as u64)
        .read_to_end(&mut payload)
        .await?;
    if payload.len() < expected {
        return Err(WardenError::Truncated {
            expected,
            actual: payload.len(),
        });
    }

    Ok(Some(Frame { stream, payload }))
}

/// Decode frames until the stream closes, writing each payload to the
/// writer for its stream type. Returns the number of frames copied.
pub async fn copy_frames<R, O, E>(reader: &mut R, stdout: &mut O, stderr: &mut E) -> Result<usize>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut frames = 0;
    while let Some(frame) = next_frame(reader).await? {
        match frame.stream {
            StreamType::Stdout => {
                stdout.write_all(&frame.payload).await?;
                stdout.flush().await?;
            }
            StreamType::Stderr => {
                stderr.write_all(&frame.payload).await?;
                stderr.flush().await?;
            }
        }
        frames += 1;
    }
    Ok(frames)
}
