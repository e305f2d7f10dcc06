// AMQP 0-9-1 wire primitives - separates field encoding from the method models
//
// This module provides the primitive grammar shared by every frame: short and
// long strings, field tables, field arrays and the tagged field values they
// carry. Method classes implement Encodable/Decodable on top of these
// primitives rather than hand-rolling byte juggling in each struct.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// A packed name/value table (AMQP 0-9-1 Section 4.2.5.5).
///
/// Keys are short strings; values carry a one-octet type tag on the wire.
/// `BTreeMap` keeps the encoded form deterministic.
pub type FieldTable = BTreeMap<String, FieldValue>;

/// A sequence of tagged field values (AMQP 0-9-1 Section 4.2.5.5).
pub type FieldArray = Vec<FieldValue>;

/// A single tagged value inside a field table or field array.
///
/// The tag set follows the RabbitMQ dialect of the 0-9-1 grammar, which
/// differs from the published grammar in a few places (notably `l` is a
/// signed 64-bit integer and short strings do not appear as values).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Fixed-point decimal: `value / 10^scale`.
    Decimal { scale: u8, value: i32 },
    LongStr(String),
    Array(FieldArray),
    /// Seconds since the UNIX epoch.
    Timestamp(u64),
    Table(FieldTable),
    Bytes(Bytes),
    Void,
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::I32(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::I64(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::LongStr(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::LongStr(value)
    }
}

/// Codec errors with enough context to debug a malformed peer.
///
/// The enum is deliberately `Clone`: decode failures are latched by the
/// state machinery and may be surfaced to more than one waiter.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("incomplete frame: need more data")]
    Incomplete,

    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    #[error("unknown method: class {class}, method {method}")]
    UnknownMethod { class: u16, method: u16 },

    #[error("frame-end octet missing: got {0:#04x}")]
    BadFrameEnd(u8),

    #[error("unknown field value tag {0:?}")]
    UnknownFieldTag(char),

    #[error("{field} exceeds {max} bytes")]
    StringTooLong { field: &'static str, max: usize },

    #[error("{field} is not valid UTF-8")]
    Utf8 { field: &'static str },

    #[error("content header for unexpected class {0}")]
    UnexpectedHeaderClass(u16),
}

/// Trait for wire values that encode themselves into a buffer.
pub trait Encodable {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError>;
}

/// Trait for wire values decoded from a buffer positioned past any header.
pub trait Decodable: Sized {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError>;
}

pub fn decode_u8(buf: &mut Cursor<&[u8]>) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u8())
}

pub fn decode_u16(buf: &mut Cursor<&[u8]>) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u16())
}

pub fn decode_u32(buf: &mut Cursor<&[u8]>) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u32())
}

pub fn decode_u64(buf: &mut Cursor<&[u8]>) -> Result<u64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u64())
}

pub fn decode_bytes(buf: &mut Cursor<&[u8]>, len: usize) -> Result<Bytes, CodecError> {
    if buf.remaining() < len {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.copy_to_bytes(len))
}

/// Encode a short string: one length octet followed by at most 255 bytes.
pub fn encode_short_str(buf: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    if value.len() > u8::MAX as usize {
        return Err(CodecError::StringTooLong {
            field: "short string",
            max: u8::MAX as usize,
        });
    }
    buf.put_u8(value.len() as u8);
    buf.put_slice(value.as_bytes());
    Ok(())
}

pub fn decode_short_str(buf: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    let len = decode_u8(buf)? as usize;
    let raw = decode_bytes(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::Utf8 {
        field: "short string",
    })
}

/// Encode a long string: four length octets followed by the payload.
pub fn encode_long_str(buf: &mut BytesMut, value: &[u8]) -> Result<(), CodecError> {
    if value.len() > u32::MAX as usize {
        return Err(CodecError::StringTooLong {
            field: "long string",
            max: u32::MAX as usize,
        });
    }
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
    Ok(())
}

pub fn decode_long_str(buf: &mut Cursor<&[u8]>) -> Result<Bytes, CodecError> {
    let len = decode_u32(buf)? as usize;
    decode_bytes(buf, len)
}

pub fn encode_field_table(buf: &mut BytesMut, table: &FieldTable) -> Result<(), CodecError> {
    // The table length prefix is only known after encoding the entries, so
    // encode into a scratch buffer first.
    let mut scratch = BytesMut::new();
    for (key, value) in table {
        encode_short_str(&mut scratch, key)?;
        encode_field_value(&mut scratch, value)?;
    }
    encode_long_str(buf, &scratch)
}

pub fn decode_field_table(buf: &mut Cursor<&[u8]>) -> Result<FieldTable, CodecError> {
    let raw = decode_long_str(buf)?;
    let mut table = FieldTable::new();
    let mut inner = Cursor::new(&raw[..]);
    while inner.has_remaining() {
        let key = decode_short_str(&mut inner)?;
        let value = decode_field_value(&mut inner)?;
        table.insert(key, value);
    }
    Ok(table)
}

fn encode_field_array(buf: &mut BytesMut, array: &FieldArray) -> Result<(), CodecError> {
    let mut scratch = BytesMut::new();
    for value in array {
        encode_field_value(&mut scratch, value)?;
    }
    encode_long_str(buf, &scratch)
}

fn decode_field_array(buf: &mut Cursor<&[u8]>) -> Result<FieldArray, CodecError> {
    let raw = decode_long_str(buf)?;
    let mut array = FieldArray::new();
    let mut inner = Cursor::new(&raw[..]);
    while inner.has_remaining() {
        array.push(decode_field_value(&mut inner)?);
    }
    Ok(array)
}

fn encode_field_value(buf: &mut BytesMut, value: &FieldValue) -> Result<(), CodecError> {
    match value {
        FieldValue::Bool(v) => {
            buf.put_u8(b't');
            buf.put_u8(u8::from(*v));
        }
        FieldValue::I8(v) => {
            buf.put_u8(b'b');
            buf.put_i8(*v);
        }
        FieldValue::U8(v) => {
            buf.put_u8(b'B');
            buf.put_u8(*v);
        }
        FieldValue::I16(v) => {
            buf.put_u8(b's');
            buf.put_i16(*v);
        }
        FieldValue::U16(v) => {
            buf.put_u8(b'u');
            buf.put_u16(*v);
        }
        FieldValue::I32(v) => {
            buf.put_u8(b'I');
            buf.put_i32(*v);
        }
        FieldValue::U32(v) => {
            buf.put_u8(b'i');
            buf.put_u32(*v);
        }
        FieldValue::I64(v) => {
            buf.put_u8(b'l');
            buf.put_i64(*v);
        }
        FieldValue::F32(v) => {
            buf.put_u8(b'f');
            buf.put_f32(*v);
        }
        FieldValue::F64(v) => {
            buf.put_u8(b'd');
            buf.put_f64(*v);
        }
        FieldValue::Decimal { scale, value } => {
            buf.put_u8(b'D');
            buf.put_u8(*scale);
            buf.put_i32(*value);
        }
        FieldValue::LongStr(v) => {
            buf.put_u8(b'S');
            encode_long_str(buf, v.as_bytes())?;
        }
        FieldValue::Array(v) => {
            buf.put_u8(b'A');
            encode_field_array(buf, v)?;
        }
        FieldValue::Timestamp(v) => {
            buf.put_u8(b'T');
            buf.put_u64(*v);
        }
        FieldValue::Table(v) => {
            buf.put_u8(b'F');
            encode_field_table(buf, v)?;
        }
        FieldValue::Bytes(v) => {
            buf.put_u8(b'x');
            encode_long_str(buf, v)?;
        }
        FieldValue::Void => buf.put_u8(b'V'),
    }
    Ok(())
}

fn decode_field_value(buf: &mut Cursor<&[u8]>) -> Result<FieldValue, CodecError> {
    let tag = decode_u8(buf)?;
    Ok(match tag {
        b't' => FieldValue::Bool(decode_u8(buf)? != 0),
        b'b' => FieldValue::I8(decode_u8(buf)? as i8),
        b'B' => FieldValue::U8(decode_u8(buf)?),
        b's' => FieldValue::I16(decode_u16(buf)? as i16),
        b'u' => FieldValue::U16(decode_u16(buf)?),
        b'I' => FieldValue::I32(decode_u32(buf)? as i32),
        b'i' => FieldValue::U32(decode_u32(buf)?),
        b'l' => FieldValue::I64(decode_u64(buf)? as i64),
        b'f' => FieldValue::F32(f32::from_bits(decode_u32(buf)?)),
        b'd' => FieldValue::F64(f64::from_bits(decode_u64(buf)?)),
        b'D' => FieldValue::Decimal {
            scale: decode_u8(buf)?,
            value: decode_u32(buf)? as i32,
        },
        b'S' => {
            let raw = decode_long_str(buf)?;
            FieldValue::LongStr(String::from_utf8(raw.to_vec()).map_err(|_| CodecError::Utf8 {
                field: "long string value",
            })?)
        }
        b'A' => FieldValue::Array(decode_field_array(buf)?),
        b'T' => FieldValue::Timestamp(decode_u64(buf)?),
        b'F' => FieldValue::Table(decode_field_table(buf)?),
        b'x' => FieldValue::Bytes(decode_long_str(buf)?),
        b'V' => FieldValue::Void,
        other => return Err(CodecError::UnknownFieldTag(other as char)),
    })
}

/// Convert a wall-clock time to the wire representation (epoch seconds).
pub fn timestamp_from_system_time(value: SystemTime) -> u64 {
    value
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Convert the wire representation back to a wall-clock time.
pub fn system_time_from_timestamp(value: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: FieldValue) -> FieldValue {
        let mut table = FieldTable::new();
        table.insert("k".to_owned(), value);
        let mut buf = BytesMut::new();
        encode_field_table(&mut buf, &table).unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        let decoded = decode_field_table(&mut cursor).unwrap();
        decoded.into_iter().next().unwrap().1
    }

    #[test]
    fn field_values_round_trip() {
        assert_eq!(round_trip(FieldValue::Bool(true)), FieldValue::Bool(true));
        assert_eq!(round_trip(FieldValue::I64(-42)), FieldValue::I64(-42));
        assert_eq!(
            round_trip(FieldValue::LongStr("rabbit".into())),
            FieldValue::LongStr("rabbit".into())
        );
        assert_eq!(
            round_trip(FieldValue::Timestamp(1_600_000_000)),
            FieldValue::Timestamp(1_600_000_000)
        );
        assert_eq!(round_trip(FieldValue::Void), FieldValue::Void);
    }

    #[test]
    fn nested_tables_round_trip() {
        let mut capabilities = FieldTable::new();
        capabilities.insert("basic.nack".into(), FieldValue::Bool(true));
        capabilities.insert("publisher_confirms".into(), FieldValue::Bool(true));
        let value = round_trip(FieldValue::Table(capabilities.clone()));
        assert_eq!(value, FieldValue::Table(capabilities));
    }

    #[test]
    fn short_string_length_is_enforced() {
        let mut buf = BytesMut::new();
        let too_long = "x".repeat(256);
        let result = encode_short_str(&mut buf, &too_long);
        assert!(matches!(result, Err(CodecError::StringTooLong { .. })));
    }

    #[test]
    fn truncated_table_is_incomplete() {
        let mut table = FieldTable::new();
        table.insert("key".into(), FieldValue::I32(7));
        let mut buf = BytesMut::new();
        encode_field_table(&mut buf, &table).unwrap();
        let truncated = &buf[..buf.len() - 2];
        let mut cursor = Cursor::new(truncated);
        assert_eq!(decode_field_table(&mut cursor), Err(CodecError::Incomplete));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        // table payload: key "k", tag 'Z'
        let mut buf = BytesMut::new();
        let mut inner = BytesMut::new();
        encode_short_str(&mut inner, "k").unwrap();
        inner.put_u8(b'Z');
        encode_long_str(&mut buf, &inner).unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(
            decode_field_table(&mut cursor),
            Err(CodecError::UnknownFieldTag('Z'))
        );
    }
}
