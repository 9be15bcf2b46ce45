//! Low-level field helpers shared by the record codecs.
//!
//! Every RoRnet record is a packed little-endian struct.  String fields have
//! a fixed width: NUL-padded on the right when encoded, right-stripped of
//! NUL bytes when decoded.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::enums::MessageType;

/// Errors produced while encoding or decoding wire records.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown message type code {0}")]
    UnknownMessageType(u32),
    #[error("unknown stream type {0}")]
    UnknownStreamType(i32),
    #[error("stream type {0:?} has no payload layout")]
    UndecodableStreamType(crate::enums::StreamType),
    #[error("unknown character command {0}")]
    UnknownCharacterCommand(i32),
    #[error("unknown character animation {0:?}")]
    UnknownAnimation(String),
    #[error("field `{field}` is {len} bytes, wider than its {width}-byte slot")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        width: usize,
    },
    #[error("field `{field}` is not valid UTF-8")]
    NonUtf8Field { field: &'static str },
    #[error("payload is {got} bytes, expected {expected}")]
    ShortPayload { expected: usize, got: usize },
    #[error("{kind:?} packet has a zero-size payload")]
    EmptyPayload { kind: MessageType },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Write `value` into a fixed `width`-byte slot, NUL-padded on the right.
pub(crate) fn put_str(
    buf: &mut impl BufMut,
    field: &'static str,
    value: &str,
    width: usize,
) -> Result<(), WireError> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(WireError::FieldTooLong {
            field,
            len: bytes.len(),
            width,
        });
    }
    buf.put_slice(bytes);
    buf.put_bytes(0, width - bytes.len());
    Ok(())
}

/// Read a fixed `width`-byte slot and strip trailing NUL bytes.
pub(crate) fn get_str(
    buf: &mut impl Buf,
    field: &'static str,
    width: usize,
) -> Result<String, WireError> {
    let mut raw = vec![0u8; width];
    buf.copy_to_slice(&mut raw);
    let end = raw
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    raw.truncate(end);
    String::from_utf8(raw).map_err(|_| WireError::NonUtf8Field { field })
}

/// Check that a payload slice has exactly the size a fixed record needs.
pub(crate) fn expect_len(data: &[u8], expected: usize) -> Result<(), WireError> {
    if data.len() != expected {
        return Err(WireError::ShortPayload {
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

/// Check that a payload slice is at least as long as a record's fixed head.
pub(crate) fn expect_at_least(data: &[u8], expected: usize) -> Result<(), WireError> {
    if data.len() < expected {
        return Err(WireError::ShortPayload {
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn strings_are_nul_padded_and_stripped() {
        let mut buf = BytesMut::new();
        put_str(&mut buf, "name", "chat", 8).unwrap();
        assert_eq!(&buf[..], b"chat\x00\x00\x00\x00");

        let mut slice = &buf[..];
        assert_eq!(get_str(&mut slice, "name", 8).unwrap(), "chat");
    }

    #[test]
    fn interior_nuls_survive_decoding() {
        let mut slice: &[u8] = b"a\x00b\x00\x00";
        assert_eq!(get_str(&mut slice, "x", 5).unwrap(), "a\x00b");
    }

    #[test]
    fn overlong_field_is_rejected() {
        let mut buf = BytesMut::new();
        let err = put_str(&mut buf, "name", "too long for slot", 4).unwrap_err();
        assert!(matches!(err, WireError::FieldTooLong { field: "name", .. }));
    }
}
