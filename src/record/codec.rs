//! Binary encoding for cache records
//!
//! A record is the timestamp followed by one encoded value:
//!
//! ```text
//! record  = u64-le cached_at, value
//! value   = tag byte, body
//! null    = 0x00
//! bool    = 0x01, one byte (0x00 or 0x01)
//! int     = 0x02, i64-le
//! float   = 0x03, f64 bits as u64-le
//! bytes   = 0x04, u32-le length, raw bytes
//! text    = 0x05, u32-le length, UTF-8 bytes
//! list    = 0x06, u32-le count, that many values
//! map     = 0x07, u32-le count, that many (u32-le key length, key, value)
//! ```
//!
//! All integers are little-endian and all lengths count bytes, except list
//! and map counts which count entries. Decoding consumes the whole buffer;
//! any leftover input is treated as corruption rather than ignored.

use thiserror::Error;

use super::{CacheRecord, Value};

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;
const TAG_TEXT: u8 = 0x05;
const TAG_LIST: u8 = 0x06;
const TAG_MAP: u8 = 0x07;

/// Maximum levels of container nesting accepted on encode and decode
pub const MAX_DEPTH: usize = 64;

/// Errors from decoding bytes that do not form a valid record
#[derive(Error, Debug)]
pub enum CorruptRecordError {
    #[error("Record data ends early at offset {offset} (needed {needed} more bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("Unknown value tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("Invalid boolean byte 0x{byte:02x}")]
    InvalidBool { byte: u8 },

    #[error("Invalid UTF-8 in text value: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Value nesting exceeds {limit} levels")]
    TooDeep { limit: usize },

    #[error("Record has {extra} trailing bytes after the payload")]
    TrailingBytes { extra: usize },
}

/// Errors from encoding a record that the wire format cannot carry
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Value length {len} does not fit in a 32-bit prefix")]
    Oversized { len: usize },

    #[error("Value nesting exceeds {limit} levels")]
    TooDeep { limit: usize },
}

/// Encodes a record into its binary form
pub fn encode_record(record: &CacheRecord) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&record.cached_at.to_le_bytes());
    encode_value(&record.payload, 0, &mut out)?;
    Ok(out)
}

/// Decodes a record from its binary form, consuming the entire buffer
pub fn decode_record(bytes: &[u8]) -> Result<CacheRecord, CorruptRecordError> {
    let mut reader = Reader::new(bytes);
    let mut stamp = [0u8; 8];
    stamp.copy_from_slice(reader.read_slice(8)?);
    let cached_at = u64::from_le_bytes(stamp);
    let payload = decode_value(&mut reader, 0)?;
    reader.finish()?;
    Ok(CacheRecord::new(cached_at, payload))
}

fn encode_value(value: &Value, depth: usize, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if depth > MAX_DEPTH {
        return Err(EncodeError::TooDeep { limit: MAX_DEPTH });
    }

    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(*b as u8);
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_bits().to_le_bytes());
        }
        Value::Bytes(bytes) => {
            out.push(TAG_BYTES);
            write_len(bytes.len(), out)?;
            out.extend_from_slice(bytes);
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            write_len(s.len(), out)?;
            out.extend_from_slice(s.as_bytes());
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            write_len(items.len(), out)?;
            for item in items {
                encode_value(item, depth + 1, out)?;
            }
        }
        Value::Map(entries) => {
            out.push(TAG_MAP);
            write_len(entries.len(), out)?;
            for (key, value) in entries {
                write_len(key.len(), out)?;
                out.extend_from_slice(key.as_bytes());
                encode_value(value, depth + 1, out)?;
            }
        }
    }

    Ok(())
}

fn write_len(len: usize, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    let prefix = u32::try_from(len).map_err(|_| EncodeError::Oversized { len })?;
    out.extend_from_slice(&prefix.to_le_bytes());
    Ok(())
}

fn decode_value(reader: &mut Reader, depth: usize) -> Result<Value, CorruptRecordError> {
    if depth > MAX_DEPTH {
        return Err(CorruptRecordError::TooDeep { limit: MAX_DEPTH });
    }

    let tag_offset = reader.pos();
    let tag = reader.read_u8()?;

    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => match reader.read_u8()? {
            0x00 => Ok(Value::Bool(false)),
            0x01 => Ok(Value::Bool(true)),
            byte => Err(CorruptRecordError::InvalidBool { byte }),
        },
        TAG_INT => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(reader.read_slice(8)?);
            Ok(Value::Int(i64::from_le_bytes(buf)))
        }
        TAG_FLOAT => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(reader.read_slice(8)?);
            Ok(Value::Float(f64::from_bits(u64::from_le_bytes(buf))))
        }
        TAG_BYTES => {
            let len = reader.read_len()?;
            Ok(Value::Bytes(reader.read_slice(len)?.to_vec()))
        }
        TAG_TEXT => {
            let len = reader.read_len()?;
            let bytes = reader.read_slice(len)?.to_vec();
            Ok(Value::Text(String::from_utf8(bytes)?))
        }
        TAG_LIST => {
            let count = reader.read_len()?;
            // Counts are untrusted input, so capacity grows as items decode
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(decode_value(reader, depth + 1)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => {
            let count = reader.read_len()?;
            let mut entries = Vec::new();
            for _ in 0..count {
                let key_len = reader.read_len()?;
                let key = String::from_utf8(reader.read_slice(key_len)?.to_vec())?;
                let value = decode_value(reader, depth + 1)?;
                entries.push((key, value));
            }
            Ok(Value::Map(entries))
        }
        tag => Err(CorruptRecordError::UnknownTag {
            tag,
            offset: tag_offset,
        }),
    }
}

/// Cursor over the input buffer with bounds-checked reads
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], CorruptRecordError> {
        if self.remaining() < len {
            return Err(CorruptRecordError::Truncated {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CorruptRecordError> {
        Ok(self.read_slice(1)?[0])
    }

    fn read_len(&mut self) -> Result<usize, CorruptRecordError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_slice(4)?);
        Ok(u32::from_le_bytes(buf) as usize)
    }

    fn finish(&self) -> Result<(), CorruptRecordError> {
        if self.remaining() > 0 {
            return Err(CorruptRecordError::TrailingBytes {
                extra: self.remaining(),
            });
        }
        Ok(())
    }
}
