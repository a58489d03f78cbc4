// src/core/protocol/frame.rs

//! Implements the length-prefixed wire frame and the corresponding `Encoder`
//! and `Decoder` for network communication.
//!
//! Every frame is an ASCII decimal length terminated by `\n`, followed by exactly
//! that many payload bytes. Two payloads are reserved as control signals: the
//! 4-byte `ping` keepalive and the 5-byte `close` disconnect request.

use crate::core::TitanError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The byte terminating the length header.
const HEADER_TERMINATOR: u8 = b'\n';

/// The longest header accepted, excluding the terminator. `usize::MAX` has 20 digits.
const MAX_HEADER_LEN: usize = 20;

/// Default upper bound on a single frame's payload.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub const PING_PAYLOAD: &[u8] = b"ping";
pub const CLOSE_PAYLOAD: &[u8] = b"close";

/// A single decoded unit of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// An application payload to be handed to the message handler.
    Message(Bytes),
    /// A liveness signal. Resets the idle deadline and nothing else.
    Ping,
    /// The peer asks for a graceful disconnect.
    Close,
}

impl Frame {
    /// Returns the payload this frame occupies on the wire.
    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Message(b) => b,
            Frame::Ping => PING_PAYLOAD,
            Frame::Close => CLOSE_PAYLOAD,
        }
    }

    /// Classifies a fully read payload.
    fn from_payload(payload: Bytes) -> Self {
        match payload.as_ref() {
            PING_PAYLOAD => Frame::Ping,
            CLOSE_PAYLOAD => Frame::Close,
            _ => Frame::Message(payload),
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `Frame`s.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Parses the header at the start of `src`.
    ///
    /// Returns the header length (terminator included) and the declared payload
    /// length, or `None` if the terminator has not arrived yet.
    fn parse_header(&self, src: &[u8]) -> Result<Option<(usize, usize)>, TitanError> {
        let search_len = src.len().min(MAX_HEADER_LEN + 1);
        let terminator = src[..search_len]
            .iter()
            .position(|b| *b == HEADER_TERMINATOR);

        // Reject a bad header at its first non-digit, terminated or not.
        let digits = &src[..terminator.unwrap_or(search_len)];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(TitanError::InvalidLengthHeader(format!(
                "'{}' is not a decimal length",
                String::from_utf8_lossy(digits).escape_debug()
            )));
        }

        let Some(pos) = terminator else {
            if src.len() > MAX_HEADER_LEN {
                return Err(TitanError::InvalidLengthHeader(format!(
                    "no terminator within {MAX_HEADER_LEN} bytes"
                )));
            }
            return Ok(None);
        };
        if digits.is_empty() {
            return Err(TitanError::InvalidLengthHeader("missing length".to_string()));
        }

        // All bytes are ASCII digits, so the only possible failure is overflow.
        let declared = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| TitanError::InvalidLengthHeader("length overflows".to_string()))?;

        if declared == 0 {
            return Err(TitanError::InvalidLengthHeader("zero length".to_string()));
        }
        if declared > self.max_frame_size {
            return Err(TitanError::FrameTooLarge {
                declared,
                max: self.max_frame_size,
            });
        }
        Ok(Some((pos + 1, declared)))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TitanError;

    /// Decodes one `Frame` from the buffer. Nothing is consumed until the whole
    /// payload is available, so a partial frame is never surfaced.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let Some((header_len, declared)) = self.parse_header(src)? else {
            return Ok(None);
        };

        let total = header_len + declared;
        if src.len() < total {
            // Make room for the rest of the payload up front.
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let payload = src.split_to(declared).freeze();
        Ok(Some(Frame::from_payload(payload)))
    }

    /// Called once the peer has closed its write half. Leftover bytes mean the
    /// stream ended in the middle of a frame.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }

        match self.parse_header(src)? {
            Some((header_len, declared)) => Err(TitanError::IncompleteFrame {
                expected: declared,
                received: src.len() - header_len,
            }),
            None => Err(TitanError::InvalidLengthHeader(
                "stream ended inside the length header".to_string(),
            )),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = TitanError;

    /// Encodes a `Frame` as `<length>\n<payload>`.
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.payload();
        if payload.is_empty() {
            return Err(TitanError::EmptyFrame);
        }
        if payload.len() > self.max_frame_size {
            return Err(TitanError::FrameTooLarge {
                declared: payload.len(),
                max: self.max_frame_size,
            });
        }

        let mut len_buf = itoa::Buffer::new();
        let header = len_buf.format(payload.len());
        dst.reserve(header.len() + 1 + payload.len());
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(&[HEADER_TERMINATOR]);
        dst.extend_from_slice(payload);
        Ok(())
    }
}
