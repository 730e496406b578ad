//! Frame Protocol
//!
//! Wire format shared by the gateway adapter and the daemon's intake socket:
//! length-prefixed JSON with a CRC32 checksum.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32          | GatewayCommand / IntakeRequest / ...     |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! The length covers the JSON payload only. Frames above [`MAX_FRAME_SIZE`]
//! are rejected before any buffer is allocated for them.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::TransportError;

/// Maximum frame size (10 MB)
///
/// A 5 MiB photo grows by a third when base64-encoded for the gateway, so this
/// leaves headroom for one image per frame.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Frame header size: 4 bytes length + 4 bytes checksum
const HEADER_SIZE: usize = 8;

const MIN_BUFFER_CAPACITY: usize = 4096;

/// Encode a message to a length-prefixed frame with CRC32 checksum
///
/// # Errors
///
/// Returns `TransportError::SerializationError` if serialization fails and
/// `TransportError::FrameTooLarge` if the payload exceeds [`MAX_FRAME_SIZE`].
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, TransportError> {
    let json =
        serde_json::to_vec(msg).map_err(|e| TransportError::SerializationError(e.to_string()))?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: json.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    let len = json.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&crc32fast::hash(&json).to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Write one framed message to an async writer
///
/// # Errors
///
/// Returns encoding errors from [`encode`] or the writer's IO error.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one framed message from an async reader
///
/// Returns `Ok(None)` on a clean EOF before the first header byte.
///
/// # Errors
///
/// Returns `TransportError::ConnectionClosed` on EOF mid-frame, size or
/// checksum violations, and JSON decode errors.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(TransportError::ConnectionClosed)
            };
        }
        filled += n;
    }

    let (len, expected) = parse_header(&header)?;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| TransportError::ConnectionClosed)?;

    verify_and_decode(&payload, expected).map(Some)
}

fn parse_header(header: &[u8]) -> Result<(usize, u32), TransportError> {
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let checksum = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    Ok((len, checksum))
}

fn verify_and_decode<T: DeserializeOwned>(payload: &[u8], expected: u32) -> Result<T, TransportError> {
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(TransportError::ChecksumMismatch { expected, actual });
    }
    serde_json::from_slice(payload).map_err(|e| TransportError::SerializationError(e.to_string()))
}

/// Incremental decoder for byte streams that arrive in arbitrary chunks
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Size, checksum, and JSON errors. A checksum or JSON error skips the bad
    /// frame so the stream can continue; `FrameTooLarge` leaves the stream
    /// unusable.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let available = self.buffer.len() - self.read_pos;
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let (len, expected) = parse_header(&self.buffer[self.read_pos..self.read_pos + HEADER_SIZE])?;
        if available < HEADER_SIZE + len {
            return Ok(None);
        }

        let start = self.read_pos + HEADER_SIZE;
        let end = start + len;
        self.read_pos = end;
        verify_and_decode(&self.buffer[start..end], expected).map(Some)
    }
}
