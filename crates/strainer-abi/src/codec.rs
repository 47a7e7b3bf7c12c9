//! Marshalling codec: [`InputRecord`] to and from its linear-memory layout.
//!
//! Encoding is two-phase. [`encoded_len`] computes the exact size so the host
//! can lease that many bytes of arena space, then [`encode_record_into`]
//! fills the leased window in place. Nothing is written field by field into
//! the sandbox.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::record::{Headers, InputRecord};

/// Byte order of every fixed-width integer in the layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    /// Little-endian, the native order of wasm32
    #[default]
    Little,
    /// Big-endian (network order)
    Big,
}

/// Width of the length prefixes in front of text fields and the header count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixWidth {
    /// Unsigned 16-bit prefixes
    U16,
    /// Unsigned 32-bit prefixes
    #[default]
    U32,
}

impl PrefixWidth {
    /// Size of one prefix in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            PrefixWidth::U16 => 2,
            PrefixWidth::U32 => 4,
        }
    }

    /// Largest length a prefix can express.
    pub const fn max_len(self) -> usize {
        match self {
            PrefixWidth::U16 => u16::MAX as usize,
            PrefixWidth::U32 => u32::MAX as usize,
        }
    }
}

/// ABI parameters both sides must agree on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AbiConfig {
    /// Integer byte order
    pub byte_order: Endianness,
    /// Length prefix width
    pub length_prefix: PrefixWidth,
}

impl AbiConfig {
    /// Builder: set byte order
    pub fn byte_order(mut self, order: Endianness) -> Self {
        self.byte_order = order;
        self
    }

    /// Builder: set prefix width
    pub fn length_prefix(mut self, width: PrefixWidth) -> Self {
        self.length_prefix = width;
        self
    }
}

const TIMESTAMP_BYTES: usize = 8;
const PARTITION_BYTES: usize = 4;
const OFFSET_BYTES: usize = 8;

/// Exact number of bytes [`encode_record_into`] writes for `record`.
pub fn encoded_len(record: &InputRecord, abi: &AbiConfig) -> usize {
    let prefix = abi.length_prefix.bytes();
    let text = |s: &str| prefix + s.len();

    let headers: usize = record
        .headers
        .iter()
        .map(|(k, v)| text(k) + text(v))
        .sum();

    text(&record.value)
        + text(&record.key)
        + text(&record.topic)
        + TIMESTAMP_BYTES
        + PARTITION_BYTES
        + OFFSET_BYTES
        + prefix
        + headers
}

/// Encode `record` into a freshly allocated buffer.
pub fn encode_record(record: &InputRecord, abi: &AbiConfig) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; encoded_len(record, abi)];
    encode_record_into(record, abi, &mut buf)?;
    Ok(buf)
}

/// Encode `record` into `dest`, which must be exactly [`encoded_len`] bytes
/// or longer. Returns the number of bytes written.
pub fn encode_record_into(record: &InputRecord, abi: &AbiConfig, dest: &mut [u8]) -> Result<usize> {
    let needed = encoded_len(record, abi);
    if dest.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: dest.len(),
        });
    }

    let mut w = Writer { buf: dest, pos: 0, abi };
    w.put_text("value", &record.value)?;
    w.put_text("key", &record.key)?;
    w.put_text("topic", &record.topic)?;
    w.put_i64(record.timestamp_millis);
    w.put_i32(record.partition);
    w.put_i64(record.offset);
    w.put_len("headers", record.headers.len())?;
    for (k, v) in &record.headers {
        w.put_text("header key", k)?;
        w.put_text("header value", v)?;
    }

    debug_assert_eq!(w.pos, needed);
    Ok(w.pos)
}

/// Decode a record previously produced by [`encode_record`] with the same
/// [`AbiConfig`]. The whole input must be consumed.
pub fn decode_record(bytes: &[u8], abi: &AbiConfig) -> Result<InputRecord> {
    let mut r = Reader { buf: bytes, pos: 0, abi };

    let value = r.get_text("value")?;
    let key = r.get_text("key")?;
    let topic = r.get_text("topic")?;
    let timestamp_millis = r.get_i64("timestamp")?;
    let partition = r.get_i32("partition")?;
    let offset = r.get_i64("offset")?;

    let count = r.get_len("headers")?;
    // Every header needs at least two prefixes; cap the reservation so a
    // hostile count cannot force a large allocation.
    let smallest_header = 2 * abi.length_prefix.bytes();
    let mut headers = Headers::with_capacity(count.min(r.remaining() / smallest_header));
    for _ in 0..count {
        let k = r.get_text("header key")?;
        let v = r.get_text("header value")?;
        if headers.contains_key(&k) {
            return Err(CodecError::DuplicateHeader(k));
        }
        headers.insert(k, v);
    }

    if r.remaining() > 0 {
        return Err(CodecError::TrailingBytes(r.remaining()));
    }

    Ok(InputRecord {
        value,
        key,
        topic,
        timestamp_millis,
        partition,
        offset,
        headers,
    })
}

// ============================================================================
// Cursor helpers
// ============================================================================

struct Writer<'a, 'b> {
    buf: &'a mut [u8],
    pos: usize,
    abi: &'b AbiConfig,
}

impl Writer<'_, '_> {
    fn slot(&mut self, n: usize) -> &mut [u8] {
        let start = self.pos;
        self.pos += n;
        &mut self.buf[start..self.pos]
    }

    fn put_i32(&mut self, v: i32) {
        let order = self.abi.byte_order;
        let slot = self.slot(4);
        match order {
            Endianness::Little => LittleEndian::write_i32(slot, v),
            Endianness::Big => BigEndian::write_i32(slot, v),
        }
    }

    fn put_i64(&mut self, v: i64) {
        let order = self.abi.byte_order;
        let slot = self.slot(8);
        match order {
            Endianness::Little => LittleEndian::write_i64(slot, v),
            Endianness::Big => BigEndian::write_i64(slot, v),
        }
    }

    fn put_len(&mut self, field: &'static str, len: usize) -> Result<()> {
        let width = self.abi.length_prefix;
        if len > width.max_len() {
            return Err(CodecError::TooLong {
                field,
                len,
                max: width.max_len(),
            });
        }
        let order = self.abi.byte_order;
        let slot = self.slot(width.bytes());
        match (width, order) {
            (PrefixWidth::U16, Endianness::Little) => LittleEndian::write_u16(slot, len as u16),
            (PrefixWidth::U16, Endianness::Big) => BigEndian::write_u16(slot, len as u16),
            (PrefixWidth::U32, Endianness::Little) => LittleEndian::write_u32(slot, len as u32),
            (PrefixWidth::U32, Endianness::Big) => BigEndian::write_u32(slot, len as u32),
        }
        Ok(())
    }

    fn put_text(&mut self, field: &'static str, s: &str) -> Result<()> {
        self.put_len(field, s.len())?;
        self.slot(s.len()).copy_from_slice(s.as_bytes());
        Ok(())
    }
}

struct Reader<'a, 'b> {
    buf: &'a [u8],
    pos: usize,
    abi: &'b AbiConfig,
}

impl<'a> Reader<'a, '_> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                field,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }

    fn get_i32(&mut self, field: &'static str) -> Result<i32> {
        let order = self.abi.byte_order;
        let b = self.take(field, 4)?;
        Ok(match order {
            Endianness::Little => LittleEndian::read_i32(b),
            Endianness::Big => BigEndian::read_i32(b),
        })
    }

    fn get_i64(&mut self, field: &'static str) -> Result<i64> {
        let order = self.abi.byte_order;
        let b = self.take(field, 8)?;
        Ok(match order {
            Endianness::Little => LittleEndian::read_i64(b),
            Endianness::Big => BigEndian::read_i64(b),
        })
    }

    fn get_len(&mut self, field: &'static str) -> Result<usize> {
        let width = self.abi.length_prefix;
        let order = self.abi.byte_order;
        let b = self.take(field, width.bytes())?;
        Ok(match (width, order) {
            (PrefixWidth::U16, Endianness::Little) => LittleEndian::read_u16(b) as usize,
            (PrefixWidth::U16, Endianness::Big) => BigEndian::read_u16(b) as usize,
            (PrefixWidth::U32, Endianness::Little) => LittleEndian::read_u32(b) as usize,
            (PrefixWidth::U32, Endianness::Big) => BigEndian::read_u32(b) as usize,
        })
    }

    fn get_text(&mut self, field: &'static str) -> Result<String> {
        let len = self.get_len(field)?;
        let bytes = self.take(field, len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InputRecord {
        InputRecord::new("orders")
            .key("k-1")
            .value("hello")
            .timestamp_millis(1_717_842_091_489)
            .at(3, 42)
            .header("a", "1")
    }

    #[test]
    fn test_encoded_len_matches_written_bytes() {
        let abi = AbiConfig::default();
        let record = sample();
        let bytes = encode_record(&record, &abi).unwrap();
        assert_eq!(bytes.len(), encoded_len(&record, &abi));
        // 3 text fields + 1 header pair, each with a 4-byte prefix
        assert_eq!(bytes.len(), (4 + 5) + (4 + 3) + (4 + 6) + 8 + 4 + 8 + 4 + (4 + 1) + (4 + 1));
    }

    #[test]
    fn test_little_endian_layout() {
        let record = InputRecord::new("t").at(-2, 7);
        let bytes = encode_record(&record, &AbiConfig::default()).unwrap();
        // value and key are empty: two zero prefixes
        assert_eq!(&bytes[0..8], &[0; 8]);
        // topic "t"
        assert_eq!(&bytes[8..13], &[1, 0, 0, 0, b't']);
        // timestamp 0
        assert_eq!(&bytes[13..21], &[0; 8]);
        // partition -2
        assert_eq!(&bytes[21..25], &[0xfe, 0xff, 0xff, 0xff]);
        // offset 7
        assert_eq!(&bytes[25..33], &[7, 0, 0, 0, 0, 0, 0, 0]);
        // header count 0
        assert_eq!(&bytes[33..37], &[0; 4]);
    }

    #[test]
    fn test_big_endian_u16_layout() {
        let abi = AbiConfig::default()
            .byte_order(Endianness::Big)
            .length_prefix(PrefixWidth::U16);
        let record = InputRecord::new("t").at(1, 0);
        let bytes = encode_record(&record, &abi).unwrap();
        assert_eq!(&bytes[4..7], &[0, 1, b't']);
        assert_eq!(&bytes[15..19], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_buffer_too_small() {
        let abi = AbiConfig::default();
        let mut buf = [0u8; 4];
        let err = encode_record_into(&sample(), &abi, &mut buf).unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { available: 4, .. }));
    }

    #[test]
    fn test_u16_prefix_rejects_long_text() {
        let abi = AbiConfig::default().length_prefix(PrefixWidth::U16);
        let record = InputRecord::new("t").value("x".repeat(70_000));
        let err = encode_record(&record, &abi).unwrap_err();
        assert_eq!(
            err,
            CodecError::TooLong {
                field: "value",
                len: 70_000,
                max: 65_535
            }
        );
    }
}
