// src/core/protocol/request.rs

//! Framing for the inbound command stream.
//!
//! Clients speak either RESP multi-bulk (`*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n`)
//! or the inline form (`PING\r\n`, tokens split on whitespace). Both produce
//! a flat token vector for the dispatcher. The parser is incremental: it
//! consumes complete requests from the front of the buffer and reports
//! `Ok(None)` until one has fully arrived.

use crate::core::StrataError;
use bytes::{Buf, Bytes, BytesMut};

/// Inline requests longer than this are judged hostile and the stream
/// unrecoverable.
pub const MAX_INLINE_LEN: usize = 64 * 1024;
/// Ceiling on `*N` element counts.
pub const MAX_MULTIBULK_ELEMENTS: usize = 1_024 * 1_024;
/// Ceiling on a single `$N` bulk argument.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Extracts the next complete request from `buf`, advancing past it.
///
/// Returns `Ok(Some(tokens))` for a complete request (possibly empty, e.g.
/// `*0\r\n` or a blank inline line — callers skip those), `Ok(None)` when
/// more bytes are needed, and `Err` for protocol violations. Any error is
/// unrecoverable: the caller should report it and close after the reply
/// drains.
pub fn parse_request(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, StrataError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let result = if buf[0] == b'*' {
        parse_multibulk(&buf[..])
    } else {
        parse_inline(&buf[..])
    };
    match result {
        Ok(Some((tokens, consumed))) => {
            buf.advance(consumed);
            Ok(Some(tokens))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(e),
    }
}

type Parsed = Option<(Vec<Bytes>, usize)>;

fn parse_multibulk(src: &[u8]) -> Result<Parsed, StrataError> {
    let Some((line, mut cursor)) = crlf_line(src, 1) else {
        return Ok(None);
    };
    let declared = ascii_int(line)
        .ok_or_else(|| StrataError::Protocol("invalid multibulk length".to_string()))?;
    if declared <= 0 {
        // `*0` and `*-1` are empty requests; skip them.
        return Ok(Some((Vec::new(), cursor)));
    }
    if declared as usize > MAX_MULTIBULK_ELEMENTS {
        return Err(StrataError::Protocol("invalid multibulk length".to_string()));
    }

    let mut tokens = Vec::with_capacity(declared as usize);
    for _ in 0..declared {
        if cursor >= src.len() {
            return Ok(None);
        }
        if src[cursor] != b'$' {
            return Err(StrataError::Protocol(format!(
                "expected '$', got '{}'",
                src[cursor] as char
            )));
        }
        let Some((line, after_header)) = crlf_line(src, cursor + 1) else {
            return Ok(None);
        };
        let len = ascii_int(line)
            .filter(|&n| n >= 0 && n as usize <= MAX_BULK_LEN)
            .ok_or_else(|| StrataError::Protocol("invalid bulk length".to_string()))?
            as usize;
        if src.len() < after_header + len + 2 {
            return Ok(None);
        }
        if &src[after_header + len..after_header + len + 2] != b"\r\n" {
            return Err(StrataError::Protocol(
                "bulk string missing terminator".to_string(),
            ));
        }
        tokens.push(Bytes::copy_from_slice(&src[after_header..after_header + len]));
        cursor = after_header + len + 2;
    }
    Ok(Some((tokens, cursor)))
}

fn parse_inline(src: &[u8]) -> Result<Parsed, StrataError> {
    let Some(newline) = src.iter().position(|&b| b == b'\n') else {
        if src.len() > MAX_INLINE_LEN {
            return Err(StrataError::Protocol("too big inline request".to_string()));
        }
        return Ok(None);
    };
    if newline > MAX_INLINE_LEN {
        return Err(StrataError::Protocol("too big inline request".to_string()));
    }
    let mut line = &src[..newline];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    let tokens = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(Bytes::copy_from_slice)
        .collect();
    Ok(Some((tokens, newline + 1)))
}

/// The slice between `start` and the next CRLF, plus the offset just past
/// the terminator. `None` while the terminator is still in flight.
fn crlf_line(src: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = src.get(start..)?;
    let pos = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..pos], start + pos + 2))
}

fn ascii_int(line: &[u8]) -> Option<i64> {
    std::str::from_utf8(line).ok()?.parse::<i64>().ok()
}
