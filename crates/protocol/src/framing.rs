//! Frame codec for encrypted, length-prefixed frames.
//!
//! # Frame Format
//!
//! All integers are big-endian.
//!
//! ```text
//! [ total_frame_length : u32 ]                     counts every byte below
//! [ sender_id_length   : u16 ][ sender_id : UTF-8 ]
//! [ iv                 : 16 bytes ]
//! [ ciphertext_length  : u32 ]
//! [ ciphertext         : ciphertext_length bytes ]
//! ```
//!
//! A receiver reads the 4-byte prefix, then exactly `total_frame_length`
//! more bytes, so frame boundaries survive arbitrary chunking by the stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::cipher::BLOCK_SIZE;
use crate::error::{ProtocolError, Result};
use crate::iv::Iv;

/// Size of the `total_frame_length` prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the `sender_id_length` field.
pub const SENDER_LENGTH_SIZE: usize = 2;

/// Size of the `ciphertext_length` field.
pub const CIPHERTEXT_LENGTH_SIZE: usize = 4;

/// Fixed part of a frame body: sender length + IV + ciphertext length.
pub const FRAME_FIXED_BODY_SIZE: usize = SENDER_LENGTH_SIZE + BLOCK_SIZE + CIPHERTEXT_LENGTH_SIZE;

/// Longest sender id the 16-bit length field can carry.
pub const MAX_SENDER_ID_LEN: usize = u16::MAX as usize;

/// Default maximum frame body size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One encrypted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Claimed sender; selects the decryption key on receive.
    pub sender_id: String,
    /// Initialization vector used for this frame only.
    pub iv: Iv,
    /// Padded, encrypted payload.
    pub ciphertext: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(sender_id: impl Into<String>, iv: Iv, ciphertext: Vec<u8>) -> Self {
        Self {
            sender_id: sender_id.into(),
            iv,
            ciphertext,
        }
    }

    /// Value of the `total_frame_length` field for this frame.
    pub fn body_len(&self) -> usize {
        body_len_for(self.sender_id.len(), self.ciphertext.len())
    }

    /// Total bytes on the wire, including the length prefix.
    pub fn encoded_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.body_len()
    }
}

/// Body length of a frame with the given sender id and ciphertext sizes.
#[inline]
pub fn body_len_for(sender_len: usize, ciphertext_len: usize) -> usize {
    FRAME_FIXED_BODY_SIZE + sender_len + ciphertext_len
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Upper bound for `total_frame_length`.
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom maximum frame size.
    ///
    /// The limit is capped at `u32::MAX`, the largest encodable length.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }

    /// The configured maximum frame body size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Check that a frame with these field sizes may be sent.
    ///
    /// Used by the channel before encrypting so oversized payloads are
    /// rejected without doing any work.
    pub fn check_size(&self, sender_len: usize, ciphertext_len: usize) -> Result<()> {
        if sender_len > MAX_SENDER_ID_LEN {
            return Err(ProtocolError::SenderTooLong {
                len: sender_len,
                max: MAX_SENDER_ID_LEN,
            });
        }
        let size = body_len_for(sender_len, ciphertext_len);
        if size > self.max_frame_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Encode a frame into bytes, length prefix included.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let sender = frame.sender_id.as_bytes();
        self.check_size(sender.len(), frame.ciphertext.len())?;
        check_ciphertext_len(frame.ciphertext.len())?;

        let body_len = frame.body_len();
        let mut output = Vec::with_capacity(LENGTH_PREFIX_SIZE + body_len);

        output.extend_from_slice(&(body_len as u32).to_be_bytes());
        output.extend_from_slice(&(sender.len() as u16).to_be_bytes());
        output.extend_from_slice(sender);
        output.extend_from_slice(&frame.iv);
        output.extend_from_slice(&(frame.ciphertext.len() as u32).to_be_bytes());
        output.extend_from_slice(&frame.ciphertext);

        Ok(output)
    }

    /// Decode a frame from bytes starting at the length prefix.
    ///
    /// Returns the decoded frame and the number of bytes consumed.
    pub fn decode(&self, data: &[u8]) -> Result<(Frame, usize)> {
        if data.len() < LENGTH_PREFIX_SIZE {
            return Err(ProtocolError::FrameFormat(format!(
                "insufficient data for length prefix: need {} bytes, have {}",
                LENGTH_PREFIX_SIZE,
                data.len()
            )));
        }

        let body_len = self.parse_prefix(&data[..LENGTH_PREFIX_SIZE])?;
        let total = LENGTH_PREFIX_SIZE + body_len;
        if data.len() < total {
            return Err(ProtocolError::FrameFormat(format!(
                "insufficient data for frame: need {} bytes, have {}",
                total,
                data.len()
            )));
        }

        let frame = self.decode_body(&data[LENGTH_PREFIX_SIZE..total])?;
        Ok((frame, total))
    }

    /// Try to decode a frame, returning `None` if more data is needed.
    ///
    /// This is useful for streaming scenarios where you may receive partial frames.
    pub fn try_decode(&self, data: &[u8]) -> Result<Option<(Frame, usize)>> {
        if data.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let body_len = self.parse_prefix(&data[..LENGTH_PREFIX_SIZE])?;
        if data.len() < LENGTH_PREFIX_SIZE + body_len {
            return Ok(None);
        }

        self.decode(data).map(Some)
    }

    /// Decode the bytes that follow the length prefix.
    ///
    /// `body` must be exactly `total_frame_length` bytes long.
    pub fn decode_body(&self, body: &[u8]) -> Result<Frame> {
        let mut cursor = Cursor::new(body);

        let sender_len = u16::from_be_bytes(cursor.take_array("sender_id_length")?) as usize;
        let sender_bytes = cursor.take(sender_len, "sender_id")?;
        let sender_id = std::str::from_utf8(sender_bytes)
            .map_err(|e| ProtocolError::FrameFormat(format!("sender_id is not valid UTF-8: {}", e)))?
            .to_string();

        let iv: Iv = cursor.take_array("iv")?;

        let ciphertext_len = u32::from_be_bytes(cursor.take_array("ciphertext_length")?) as usize;
        let ciphertext = cursor.take(ciphertext_len, "ciphertext")?.to_vec();

        if cursor.remaining() != 0 {
            return Err(ProtocolError::FrameFormat(format!(
                "{} trailing bytes after ciphertext",
                cursor.remaining()
            )));
        }
        check_ciphertext_len(ciphertext_len)?;

        Ok(Frame {
            sender_id,
            iv,
            ciphertext,
        })
    }

    /// Read the length prefix of the next frame from a stream.
    ///
    /// Fails with [`ProtocolError::EndOfStream`] if the stream ends before
    /// the first byte and [`ProtocolError::IncompleteFrame`] if it ends
    /// partway through the prefix.
    pub async fn read_prefix<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<usize> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let received = read_full(reader, &mut prefix).await?;
        if received == 0 {
            return Err(ProtocolError::EndOfStream);
        }
        if received < LENGTH_PREFIX_SIZE {
            return Err(ProtocolError::IncompleteFrame {
                expected: LENGTH_PREFIX_SIZE,
                received,
            });
        }
        self.parse_prefix(&prefix)
    }

    /// Read and decode a frame body of `body_len` bytes from a stream.
    pub async fn read_body<R: AsyncRead + Unpin>(&self, reader: &mut R, body_len: usize) -> Result<Frame> {
        let mut body = vec![0u8; body_len];
        let received = read_full(reader, &mut body).await?;
        if received < body_len {
            return Err(ProtocolError::IncompleteFrame {
                expected: LENGTH_PREFIX_SIZE + body_len,
                received: LENGTH_PREFIX_SIZE + received,
            });
        }
        self.decode_body(&body)
    }

    /// Read one complete frame from a stream.
    pub async fn read_frame<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<Frame> {
        let body_len = self.read_prefix(reader).await?;
        self.read_body(reader, body_len).await
    }

    /// Encode a frame and write it to a stream in one piece.
    ///
    /// Nothing is written if encoding fails.
    pub async fn write_frame<W: AsyncWrite + Unpin>(&self, writer: &mut W, frame: &Frame) -> Result<()> {
        let bytes = self.encode(frame)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Validate a length prefix against the frame size limits.
    fn parse_prefix(&self, prefix: &[u8]) -> Result<usize> {
        let mut raw = [0u8; LENGTH_PREFIX_SIZE];
        raw.copy_from_slice(prefix);
        let body_len = u32::from_be_bytes(raw) as usize;

        if body_len > self.max_frame_size {
            return Err(ProtocolError::FrameFormat(format!(
                "declared frame length {} exceeds maximum of {}",
                body_len, self.max_frame_size
            )));
        }
        if body_len < FRAME_FIXED_BODY_SIZE + BLOCK_SIZE {
            return Err(ProtocolError::FrameFormat(format!(
                "declared frame length {} is below minimum of {}",
                body_len,
                FRAME_FIXED_BODY_SIZE + BLOCK_SIZE
            )));
        }
        Ok(body_len)
    }
}

/// Ciphertext must be a non-empty whole number of blocks.
fn check_ciphertext_len(len: usize) -> Result<()> {
    if len == 0 || len % BLOCK_SIZE != 0 {
        return Err(ProtocolError::FrameFormat(format!(
            "ciphertext length {} is not a positive multiple of {}",
            len, BLOCK_SIZE
        )));
    }
    Ok(())
}

/// Fill `buf` from the stream, stopping early only at end of stream.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Bounds-checked reader over a frame body.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(ProtocolError::FrameFormat(format!(
                "{} needs {} bytes but only {} remain",
                field,
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, field: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }
}
