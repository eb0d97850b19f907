//! KLV (Key-Length-Value) triplet handling.
//!
//! All data in MXF files is encoded as KLV triplets:
//! - Key: 16-byte Universal Label identifying the data
//! - Length: BER-encoded length of the value
//! - Value: The actual data
//!
//! MXF writers emit lengths at a fixed BER width so that a placeholder of
//! zero can be back-patched in place; readers that expect a specific width
//! reject any other encoding.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::ul::{UniversalLabel, SMPTE_UL_LENGTH, UL};

/// Standard BER width for packs, sets and triplet fields: one marker byte
/// plus three length octets.
pub const MXF_BER_LENGTH: usize = 4;

/// BER width reserved for the clip-wrapped essence KLV: one marker byte
/// plus seven length octets, enough for any clip.
pub const CLIP_BER_LENGTH: usize = 8;

/// Encode `length` as a BER length of exactly `width` total bytes
/// (`0x80 | (width-1)` marker followed by `width-1` big-endian octets).
///
/// Fails with [`Error::Fail`] when the value does not fit the width. A
/// length of zero is a legal placeholder at any width.
pub fn encode_ber(length: u64, width: usize) -> Result<Vec<u8>> {
    if width < 2 || width > 9 {
        return Err(Error::Fail(format!("unsupported BER width: {}", width)));
    }

    let octets = width - 1;
    if octets < 8 && length >= 1u64 << (8 * octets) {
        return Err(Error::Fail(format!(
            "length {} does not fit in a {}-byte BER",
            length, width
        )));
    }

    let mut out = Vec::with_capacity(width);
    out.push(0x80 | octets as u8);
    for i in (0..octets).rev() {
        out.push((length >> (8 * i)) as u8);
    }
    Ok(out)
}

/// Decode a BER length from the start of a slice.
///
/// Returns `(length, encoded_width)`. Accepts the short form (a single
/// byte below 0x80) as well as long forms up to eight octets.
pub fn decode_ber(data: &[u8]) -> Result<(u64, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| Error::format("truncated BER length"))?;

    if first < 0x80 {
        return Ok((first as u64, 1));
    }

    let octets = (first & 0x7F) as usize;
    if octets == 0 || octets > 8 {
        return Err(Error::format(format!(
            "unsupported BER length form: 0x{:02x}",
            first
        )));
    }
    if data.len() < 1 + octets {
        return Err(Error::format("truncated BER length"));
    }

    let mut length = 0u64;
    for &b in &data[1..=octets] {
        length = (length << 8) | b as u64;
    }
    Ok((length, 1 + octets))
}

/// Read one key and BER length from a byte source.
///
/// Returns the key, the value length, and the number of key+length bytes
/// consumed, which lets the caller compute the value span and the position
/// of the next packet.
pub fn read_key_and_length<R: Read>(reader: &mut R) -> Result<(UniversalLabel, u64, usize)> {
    let mut key = [0u8; SMPTE_UL_LENGTH];
    reader.read_exact(&mut key)?;

    let mut first = [0u8; 1];
    reader.read_exact(&mut first)?;

    if first[0] < 0x80 {
        return Ok((UniversalLabel(key), first[0] as u64, SMPTE_UL_LENGTH + 1));
    }

    let octets = (first[0] & 0x7F) as usize;
    if octets == 0 || octets > 8 {
        return Err(Error::format(format!(
            "unsupported BER length form: 0x{:02x}",
            first[0]
        )));
    }

    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf[..octets])?;

    let mut length = 0u64;
    for &b in &buf[..octets] {
        length = (length << 8) | b as u64;
    }

    Ok((UniversalLabel(key), length, SMPTE_UL_LENGTH + 1 + octets))
}

/// Write a key and a BER length of exactly `ber_width` bytes.
///
/// A length of zero is the placeholder form used by the clip writer before
/// back-patching.
pub fn write_kl<W: Write>(writer: &mut W, key: &UL, length: u64, ber_width: usize) -> Result<()> {
    writer.write_all(key)?;
    let ber = encode_ber(length, ber_width)?;
    writer.write_all(&ber)?;
    Ok(())
}

/// Write a complete KLV packet with the standard 4-byte BER length.
pub fn write_klv<W: Write>(writer: &mut W, key: &UL, value: &[u8]) -> Result<()> {
    write_kl(writer, key, value.len() as u64, MXF_BER_LENGTH)?;
    writer.write_all(value)?;
    Ok(())
}

/// Write a local set item (2-byte tag, 2-byte length, value).
pub fn write_local_item<W: Write>(writer: &mut W, tag: u16, value: &[u8]) -> Result<usize> {
    if value.len() > u16::MAX as usize {
        return Err(Error::Fail(format!(
            "local set item too large: {} bytes",
            value.len()
        )));
    }
    writer.write_all(&tag.to_be_bytes())?;
    writer.write_all(&(value.len() as u16).to_be_bytes())?;
    writer.write_all(value)?;
    Ok(4 + value.len())
}

/// Read a local set item at `offset`. Returns `(tag, value, bytes_consumed)`.
pub fn read_local_item(data: &[u8], offset: usize) -> Result<(u16, &[u8], usize)> {
    if offset + 4 > data.len() {
        return Err(Error::format("truncated local set item header"));
    }

    let tag = u16::from_be_bytes([data[offset], data[offset + 1]]);
    let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;

    if offset + 4 + length > data.len() {
        return Err(Error::format(format!(
            "local set item 0x{:04x} overruns the set",
            tag
        )));
    }

    Ok((tag, &data[offset + 4..offset + 4 + length], 4 + length))
}

/// Cursor over an in-memory value span, used to parse the fields of an
/// encrypted triplet with exact-width enforcement.
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteCursor { data, pos: 0 }
    }

    /// Bytes left in the span.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Read a BER length and require both the decoded value and the
    /// standard 4-byte encoding; a one-octet difference in either is a
    /// format error.
    pub fn expect_ber(&mut self, expected: u64) -> Result<()> {
        let (length, width) = decode_ber(&self.data[self.pos..])?;
        if width != MXF_BER_LENGTH {
            return Err(Error::format(format!(
                "BER width {} where {} was expected",
                width, MXF_BER_LENGTH
            )));
        }
        if length != expected {
            return Err(Error::format(format!(
                "BER length {} where {} was expected",
                length, expected
            )));
        }
        self.pos += width;
        Ok(())
    }

    /// Borrow the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::format("truncated value span"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a big-endian u64.
    pub fn take_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().expect("span is 8 bytes")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_ber_fixed_width() {
        let encoded = encode_ber(1000, 4).unwrap();
        assert_eq!(encoded, vec![0x83, 0x00, 0x03, 0xE8]);

        let (decoded, width) = decode_ber(&encoded).unwrap();
        assert_eq!(decoded, 1000);
        assert_eq!(width, 4);
    }

    #[test]
    fn test_ber_placeholder() {
        // the clip writer's reserved 8-byte zero length
        let encoded = encode_ber(0, 8).unwrap();
        assert_eq!(encoded, vec![0x87, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_ber_overflow() {
        assert!(encode_ber(0x0100_0000, 4).is_err());
        assert!(encode_ber(0x00FF_FFFF, 4).is_ok());
    }

    #[test]
    fn test_read_key_and_length() {
        let key = [0x06u8, 0x0E, 0x2B, 0x34, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let mut data = Vec::new();
        data.extend_from_slice(&key);
        data.extend_from_slice(&encode_ber(3, 4).unwrap());
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let mut cursor = Cursor::new(data);
        let (ul, length, kl_bytes) = read_key_and_length(&mut cursor).unwrap();
        assert_eq!(ul.as_bytes(), &key);
        assert_eq!(length, 3);
        assert_eq!(kl_bytes, 20);
    }

    #[test]
    fn test_read_kl_short_form() {
        let mut data = vec![0u8; 16];
        data.push(5);
        let mut cursor = Cursor::new(data);
        let (_, length, kl_bytes) = read_key_and_length(&mut cursor).unwrap();
        assert_eq!(length, 5);
        assert_eq!(kl_bytes, 17);
    }

    #[test]
    fn test_read_kl_truncated() {
        let data = vec![0u8; 10];
        let mut cursor = Cursor::new(data);
        assert!(matches!(
            read_key_and_length(&mut cursor),
            Err(Error::ReadFail(_))
        ));
    }

    #[test]
    fn test_cursor_expect_ber() {
        let mut data = encode_ber(16, 4).unwrap();
        data.extend_from_slice(&[0u8; 16]);

        let mut cursor = ByteCursor::new(&data);
        cursor.expect_ber(16).unwrap();
        assert_eq!(cursor.take(16).unwrap().len(), 16);

        // wrong value
        let data = encode_ber(17, 4).unwrap();
        let mut cursor = ByteCursor::new(&data);
        assert!(cursor.expect_ber(16).is_err());

        // right value, wrong width
        let data = encode_ber(16, 5).unwrap();
        let mut cursor = ByteCursor::new(&data);
        assert!(cursor.expect_ber(16).is_err());
    }

    #[test]
    fn test_write_klv_roundtrip() {
        let key = crate::ul::labels::PREFACE;
        let mut buf = Vec::new();
        write_klv(&mut buf, &key, &[1, 2, 3, 4]).unwrap();

        let mut cursor = Cursor::new(buf);
        let (ul, length, kl_bytes) = read_key_and_length(&mut cursor).unwrap();
        assert!(ul.matches_exact(&key));
        assert_eq!(length, 4);
        assert_eq!(kl_bytes, 20);
    }
}
