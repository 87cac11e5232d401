// src/core/protocol/resp_frame.rs

//! The RESP (REdis Serialization Protocol) reply representation and its
//! wire encoding, plus a `tokio_util::codec` pair for streams that carry
//! whole frames.

use crate::core::StrataError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits, so malformed or hostile frames cannot make the
// decoder allocate without bound.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;

/// A single frame of the RESP protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Appends this frame's wire encoding to `dst`. Encoding a frame never
    /// fails, which keeps reply emission on the hot path infallible.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
            RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
            RespFrame::Array(items) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(items.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for item in items {
                    item.write_to(dst);
                }
            }
        }
    }

    /// Convenience encoding into a fresh `Bytes`.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }
}

/// `tokio_util::codec` implementation for `RespFrame` streams.
#[derive(Debug, Default)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = StrataError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = StrataError;

    /// Returns `Ok(None)` while the buffer holds only a partial frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_frame(src) {
            Ok((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(StrataError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Parses one frame from the front of `src`, returning it together with the
/// number of bytes it occupied.
pub fn parse_frame(src: &[u8]) -> Result<(RespFrame, usize), StrataError> {
    let Some(&prefix) = src.first() else {
        return Err(StrataError::IncompleteData);
    };
    match prefix {
        b'+' => {
            let (line, consumed) = take_line(&src[1..])?;
            let s = String::from_utf8_lossy(line).into_owned();
            Ok((RespFrame::SimpleString(s), consumed + 1))
        }
        b'-' => {
            let (line, consumed) = take_line(&src[1..])?;
            let s = String::from_utf8_lossy(line).into_owned();
            Ok((RespFrame::Error(s), consumed + 1))
        }
        b':' => {
            let (line, consumed) = take_line(&src[1..])?;
            let i = parse_int(line)?;
            Ok((RespFrame::Integer(i), consumed + 1))
        }
        b'$' => parse_bulk_string(src),
        b'*' => parse_array(src),
        _ => Err(StrataError::Protocol(format!(
            "unexpected type marker '{}'",
            prefix as char
        ))),
    }
}

/// Slices off everything before the next CRLF; `IncompleteData` when the
/// terminator has not arrived yet.
fn take_line(src: &[u8]) -> Result<(&[u8], usize), StrataError> {
    src.windows(CRLF_LEN)
        .position(|w| w == CRLF)
        .map(|pos| (&src[..pos], pos + CRLF_LEN))
        .ok_or(StrataError::IncompleteData)
}

fn parse_int(line: &[u8]) -> Result<i64, StrataError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| StrataError::Protocol("invalid integer".to_string()))
}

fn parse_bulk_string(src: &[u8]) -> Result<(RespFrame, usize), StrataError> {
    let (line, header_len) = take_line(&src[1..])?;
    let declared = parse_int(line)?;
    if declared == -1 {
        return Ok((RespFrame::Null, header_len + 1));
    }
    if declared < 0 || declared as usize > MAX_BULK_STRING_SIZE {
        return Err(StrataError::Protocol("invalid bulk length".to_string()));
    }

    let len = declared as usize;
    let data_start = header_len + 1;
    if src.len() < data_start + len + CRLF_LEN {
        return Err(StrataError::IncompleteData);
    }
    if &src[data_start + len..data_start + len + CRLF_LEN] != CRLF {
        return Err(StrataError::Protocol(
            "bulk string missing terminator".to_string(),
        ));
    }
    let data = Bytes::copy_from_slice(&src[data_start..data_start + len]);
    Ok((RespFrame::BulkString(data), data_start + len + CRLF_LEN))
}

fn parse_array(src: &[u8]) -> Result<(RespFrame, usize), StrataError> {
    let (line, header_len) = take_line(&src[1..])?;
    let declared = parse_int(line)?;
    if declared == -1 {
        return Ok((RespFrame::NullArray, header_len + 1));
    }
    if declared < 0 || declared as usize > MAX_FRAME_ELEMENTS {
        return Err(StrataError::Protocol("invalid multibulk length".to_string()));
    }

    let mut items = Vec::with_capacity(declared as usize);
    let mut cursor = header_len + 1;
    for _ in 0..declared {
        let (item, consumed) = parse_frame(&src[cursor..])?;
        items.push(item);
        cursor += consumed;
    }
    Ok((RespFrame::Array(items), cursor))
}
