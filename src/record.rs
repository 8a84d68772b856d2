//! Typed value encode/decode (§3 Value, §4.3).
//!
//! A record is `varint(count) || encodedValue*`. Each encoded value is
//! `tag || varint(len) || payload`. Overflow/compression live here too: this module
//! owns value normalization (inline / overflow / compressed) and the singly-linked
//! overflow-chain reader/writer, since both are defined purely in terms of `Value` and
//! the page-level `Pager`. "What a stored value looks like" stays one concern end to end.

use std::io::{Read, Write};

use crate::config::{max_inline_value_bytes, COMPRESS_MIN_SAVINGS, COMPRESS_THRESHOLD, OVERFLOW_HEADER_BYTES, PAGE_SIZE};
use crate::pager::Pager;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("truncated record: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    #[error("fixed-width value had wrong length: expected {expected}, found {found}")]
    WrongFixedLen { expected: usize, found: usize },
    #[error("varint error: {0}")]
    Varint(#[from] crate::varint::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
    Blob(Vec<u8>),
    TextOverflow { page: u32, len: u32 },
    BlobOverflow { page: u32, len: u32 },
    TextCompressed(Vec<u8>),
    BlobCompressed(Vec<u8>),
    TextCompressedOverflow { page: u32, len: u32 },
    BlobCompressedOverflow { page: u32, len: u32 },
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT64: u8 = 2;
const TAG_FLOAT64: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_BLOB: u8 = 5;
const TAG_TEXT_OVERFLOW: u8 = 6;
const TAG_BLOB_OVERFLOW: u8 = 7;
const TAG_TEXT_COMPRESSED: u8 = 8;
const TAG_BLOB_COMPRESSED: u8 = 9;
const TAG_TEXT_COMPRESSED_OVERFLOW: u8 = 10;
const TAG_BLOB_COMPRESSED_OVERFLOW: u8 = 11;

fn encode_overflow_ref(page: u32, len: u32) -> Vec<u8> {
    let mut v = Vec::with_capacity(8);
    v.extend_from_slice(&page.to_le_bytes());
    v.extend_from_slice(&len.to_le_bytes());
    v
}

fn decode_overflow_ref(b: &[u8]) -> Result<(u32, u32), Error> {
    if b.len() != 8 {
        return Err(Error::WrongFixedLen { expected: 8, found: b.len() });
    }
    let page = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    let len = u32::from_le_bytes([b[4], b[5], b[6], b[7]]);
    Ok((page, len))
}

/// Encode a single value as `tag || varint(len) || payload`.
pub fn encode_value(v: &Value, out: &mut Vec<u8>) {
    let (tag, payload): (u8, Vec<u8>) = match v {
        Value::Null => (TAG_NULL, Vec::new()),
        Value::Bool(b) => (TAG_BOOL, vec![*b as u8]),
        Value::Int64(i) => {
            let mut p = Vec::new();
            crate::varint::write_ivarint(*i, &mut p);
            (TAG_INT64, p)
        }
        Value::Float64(f) => (TAG_FLOAT64, f.to_le_bytes().to_vec()),
        Value::Text(s) => (TAG_TEXT, s.as_bytes().to_vec()),
        Value::Blob(b) => (TAG_BLOB, b.clone()),
        Value::TextOverflow { page, len } => (TAG_TEXT_OVERFLOW, encode_overflow_ref(*page, *len)),
        Value::BlobOverflow { page, len } => (TAG_BLOB_OVERFLOW, encode_overflow_ref(*page, *len)),
        Value::TextCompressed(b) => (TAG_TEXT_COMPRESSED, b.clone()),
        Value::BlobCompressed(b) => (TAG_BLOB_COMPRESSED, b.clone()),
        Value::TextCompressedOverflow { page, len } => {
            (TAG_TEXT_COMPRESSED_OVERFLOW, encode_overflow_ref(*page, *len))
        }
        Value::BlobCompressedOverflow { page, len } => {
            (TAG_BLOB_COMPRESSED_OVERFLOW, encode_overflow_ref(*page, *len))
        }
    };
    out.push(tag);
    crate::varint::write_uvarint(payload.len() as u64, out);
    out.extend_from_slice(&payload);
}

/// Decode a single value starting at the front of `data`. Returns `(value, bytes_consumed)`.
pub fn decode_value(data: &[u8]) -> Result<(Value, usize), Error> {
    if data.is_empty() {
        return Err(Error::Truncated { expected: 1, found: 0 });
    }
    let tag = data[0];
    let (len, len_bytes) = crate::varint::read_uvarint(&data[1..])?;
    let len = len as usize;
    let start = 1 + len_bytes;
    let end = start + len;
    if data.len() < end {
        return Err(Error::Truncated { expected: end, found: data.len() });
    }
    let payload = &data[start..end];
    let value = match tag {
        TAG_NULL => Value::Null,
        TAG_BOOL => {
            if payload.len() != 1 {
                return Err(Error::WrongFixedLen { expected: 1, found: payload.len() });
            }
            Value::Bool(payload[0] != 0)
        }
        TAG_INT64 => {
            let (i, _) = crate::varint::read_ivarint(payload)?;
            Value::Int64(i)
        }
        TAG_FLOAT64 => {
            if payload.len() != 8 {
                return Err(Error::WrongFixedLen { expected: 8, found: payload.len() });
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(payload);
            Value::Float64(f64::from_le_bytes(b))
        }
        TAG_TEXT => Value::Text(String::from_utf8_lossy(payload).into_owned()),
        TAG_BLOB => Value::Blob(payload.to_vec()),
        TAG_TEXT_OVERFLOW => {
            let (page, len) = decode_overflow_ref(payload)?;
            Value::TextOverflow { page, len }
        }
        TAG_BLOB_OVERFLOW => {
            let (page, len) = decode_overflow_ref(payload)?;
            Value::BlobOverflow { page, len }
        }
        TAG_TEXT_COMPRESSED => Value::TextCompressed(payload.to_vec()),
        TAG_BLOB_COMPRESSED => Value::BlobCompressed(payload.to_vec()),
        TAG_TEXT_COMPRESSED_OVERFLOW => {
            let (page, len) = decode_overflow_ref(payload)?;
            Value::TextCompressedOverflow { page, len }
        }
        TAG_BLOB_COMPRESSED_OVERFLOW => {
            let (page, len) = decode_overflow_ref(payload)?;
            Value::BlobCompressedOverflow { page, len }
        }
        _ => return Err(Error::UnknownTag(tag)),
    };
    Ok((value, end))
}

/// Encode a full record: `varint(count) || encodedValue*`.
pub fn encode_record(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    crate::varint::write_uvarint(values.len() as u64, &mut out);
    for v in values {
        encode_value(v, &mut out);
    }
    out
}

/// Decode a full record back into its values.
pub fn decode_record(data: &[u8]) -> Result<Vec<Value>, Error> {
    let (count, mut offset) = crate::varint::read_uvarint(data)?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (v, n) = decode_value(&data[offset..])?;
        offset += n;
        values.push(v);
    }
    Ok(values)
}

fn zlib_compress(data: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).expect("compressing into a Vec cannot fail");
    enc.finish().expect("compressing into a Vec cannot fail")
}

fn zlib_decompress(data: &[u8]) -> Vec<u8> {
    use flate2::read::ZlibDecoder;
    let mut dec = ZlibDecoder::new(data);
    let mut out = Vec::new();
    dec.read_to_end(&mut out).expect("decompressing a value we wrote ourselves cannot fail");
    out
}

/// Write `data` across a chain of overflow pages (`next:u32 || payload`), returning the
/// first page id of the chain.
pub fn write_overflow_chain(pager: &mut Pager, data: &[u8]) -> crate::btree::Result<u32> {
    let chunk_len = PAGE_SIZE - OVERFLOW_HEADER_BYTES;
    let mut page_ids: Vec<u32> = Vec::new();
    let chunks: Vec<&[u8]> = if data.is_empty() { vec![&data[0..0]] } else { data.chunks(chunk_len).collect() };
    for _ in &chunks {
        page_ids.push(pager.allocate_page()?);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let next = if i + 1 < page_ids.len() { page_ids[i + 1] } else { 0 };
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[0..4].copy_from_slice(&next.to_le_bytes());
        buf[4..4 + chunk.len()].copy_from_slice(chunk);
        pager.write_page(page_ids[i], &buf)?;
    }
    Ok(page_ids[0])
}

/// Read back the bytes written by `write_overflow_chain`, given the total length and the
/// chain's first page id.
pub fn read_overflow_chain(pager: &mut Pager, first_page: u32, total_len: u32) -> crate::btree::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(total_len as usize);
    let mut page_id = first_page;
    while out.len() < total_len as usize && page_id != 0 {
        let page = pager.read_page_ro(page_id)?;
        let next = u32::from_le_bytes([page[0], page[1], page[2], page[3]]);
        let remaining = total_len as usize - out.len();
        let take = remaining.min(PAGE_SIZE - OVERFLOW_HEADER_BYTES);
        out.extend_from_slice(&page[4..4 + take]);
        page_id = next;
    }
    Ok(out)
}

/// Free every page in an overflow chain.
pub fn free_overflow_chain(pager: &mut Pager, first_page: u32, total_len: u32) -> crate::btree::Result<()> {
    let mut page_id = first_page;
    let mut seen = 0usize;
    let chunk_len = PAGE_SIZE - OVERFLOW_HEADER_BYTES;
    while page_id != 0 && seen < total_len as usize + chunk_len {
        let page = pager.read_page_ro(page_id)?;
        let next = u32::from_le_bytes([page[0], page[1], page[2], page[3]]);
        pager.free_page(page_id)?;
        seen += chunk_len;
        page_id = next;
    }
    Ok(())
}

/// Normalize a raw value before writing a row (§4.3): compress large text/blob if it
/// saves space, then overflow anything still too large to stay inline.
pub fn normalize_value(pager: &mut Pager, v: Value) -> crate::btree::Result<Value> {
    match v {
        Value::Text(s) => normalize_bytes(pager, s.into_bytes(), true),
        Value::Blob(b) => normalize_bytes(pager, b, false),
        other => Ok(other),
    }
}

fn normalize_bytes(pager: &mut Pager, raw: Vec<u8>, is_text: bool) -> crate::btree::Result<Value> {
    let max_inline = max_inline_value_bytes();
    if raw.len() <= COMPRESS_THRESHOLD && raw.len() <= max_inline {
        return Ok(if is_text {
            Value::Text(String::from_utf8_lossy(&raw).into_owned())
        } else {
            Value::Blob(raw)
        });
    }

    let compressed = if raw.len() > COMPRESS_THRESHOLD { Some(zlib_compress(&raw)) } else { None };
    let saves_enough = compressed.as_ref().map_or(false, |c| {
        (raw.len() as f64 - c.len() as f64) / raw.len() as f64 >= COMPRESS_MIN_SAVINGS
    });

    if let Some(c) = &compressed {
        if saves_enough && c.len() <= max_inline {
            return Ok(if is_text { Value::TextCompressed(c.clone()) } else { Value::BlobCompressed(c.clone()) });
        }
    }

    if raw.len() <= max_inline {
        return Ok(if is_text {
            Value::Text(String::from_utf8_lossy(&raw).into_owned())
        } else {
            Value::Blob(raw)
        });
    }

    // Still too large inline: prefer overflowing the compressed form if it helps, else raw.
    if let Some(c) = compressed {
        if saves_enough {
            let len = c.len() as u32;
            let page = write_overflow_chain(pager, &c)?;
            return Ok(if is_text {
                Value::TextCompressedOverflow { page, len }
            } else {
                Value::BlobCompressedOverflow { page, len }
            });
        }
    }
    let len = raw.len() as u32;
    let page = write_overflow_chain(pager, &raw)?;
    Ok(if is_text { Value::TextOverflow { page, len } } else { Value::BlobOverflow { page, len } })
}

/// Fully resolve a value (walking overflow chains and reversing compression) back to a
/// plain `Text`/`Blob`/scalar that SQL execution and callers can work with directly.
pub fn resolve_value(pager: &mut Pager, v: Value) -> crate::btree::Result<Value> {
    match v {
        Value::TextOverflow { page, len } => {
            let raw = read_overflow_chain(pager, page, len)?;
            Ok(Value::Text(String::from_utf8_lossy(&raw).into_owned()))
        }
        Value::BlobOverflow { page, len } => Ok(Value::Blob(read_overflow_chain(pager, page, len)?)),
        Value::TextCompressed(c) => Ok(Value::Text(String::from_utf8_lossy(&zlib_decompress(&c)).into_owned())),
        Value::BlobCompressed(c) => Ok(Value::Blob(zlib_decompress(&c))),
        Value::TextCompressedOverflow { page, len } => {
            let c = read_overflow_chain(pager, page, len)?;
            Ok(Value::Text(String::from_utf8_lossy(&zlib_decompress(&c)).into_owned()))
        }
        Value::BlobCompressedOverflow { page, len } => {
            let c = read_overflow_chain(pager, page, len)?;
            Ok(Value::Blob(zlib_decompress(&c)))
        }
        other => Ok(other),
    }
}

/// Free whatever overflow storage a (possibly normalized) value owns. Called when a row
/// is deleted or overwritten.
pub fn free_value_storage(pager: &mut Pager, v: &Value) -> crate::btree::Result<()> {
    match v {
        Value::TextOverflow { page, len } | Value::BlobOverflow { page, len } => {
            free_overflow_chain(pager, *page, *len)
        }
        Value::TextCompressedOverflow { page, len } | Value::BlobCompressedOverflow { page, len } => {
            free_overflow_chain(pager, *page, *len)
        }
        _ => Ok(()),
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float64(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "{}", hex::encode(b)),
            other => write!(f, "<unresolved:{:?}>", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_roundtrip_scalars() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int64(0),
            Value::Int64(-1),
            Value::Int64(i64::MAX),
            Value::Int64(i64::MIN),
            Value::Float64(3.1415),
            Value::Text("hello".to_string()),
            Value::Blob(vec![1, 2, 3, 4]),
        ];
        let encoded = encode_record(&values);
        let decoded = decode_record(&encoded).unwrap();
        assert_eq!(values, decoded);
    }

    #[test]
    fn record_roundtrip_empty() {
        let encoded = encode_record(&[]);
        let decoded = decode_record(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn truncated_record_errors() {
        let values = vec![Value::Text("hello world".to_string())];
        let mut encoded = encode_record(&values);
        encoded.truncate(encoded.len() - 2);
        assert!(decode_record(&encoded).is_err());
    }
}
