//! Little-endian integer helpers, LEB128 varints, zigzag coding, and the
//! CRC-32C checksum used by the DB header. Everything above the Pager goes
//! through these primitives rather than rolling its own byte fiddling,
//! mirroring how `squeak`'s `physical::varint` and `physical::buf` modules
//! centralize cursor/varint handling for the rest of that crate.

use crate::error::{DbError, Result};

/// Reads an unsigned LEB128 varint from the front of `bytes`.
///
/// Returns the decoded value and the number of bytes consumed. Keys and
/// lengths in page cells use this encoding (always non-negative); signed
/// `Int64` record values are zigzag-encoded first, see [`zigzag_encode`].
pub fn read_uvarint(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return Err(DbError::corruption("varint too long"));
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
    }

    Err(DbError::corruption("truncated varint"))
}

/// Encodes `value` as an unsigned LEB128 varint, appending to `out`.
pub fn write_uvarint(value: u64, out: &mut Vec<u8>) {
    let mut value = value;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Number of bytes [`write_uvarint`] would emit for `value`.
pub fn uvarint_len(value: u64) -> usize {
    let mut value = value;
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// CRC-32C (Castagnoli) over `data`, as mandated for the DB header checksum.
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Compresses `data` with zlib (used for `TextCompressed`/`BlobCompressed`
/// record values per the §4.5 compression policy).
pub fn zlib_compress(data: &[u8]) -> Vec<u8> {
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing to an in-memory Vec-backed encoder cannot fail.
    encoder.write_all(data).expect("in-memory zlib write");
    encoder.finish().expect("in-memory zlib finish")
}

pub fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| DbError::corruption(format!("zlib decompress failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uvarint_round_trip() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_uvarint(value, &mut buf);
            assert_eq!(buf.len(), uvarint_len(value));
            let (decoded, len) = read_uvarint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(len, buf.len());
        }
    }

    #[test]
    fn uvarint_truncated_is_corruption() {
        let mut buf = Vec::new();
        write_uvarint(u64::MAX, &mut buf);
        buf.truncate(buf.len() - 1);
        assert!(read_uvarint(&buf).is_err());
    }

    #[test]
    fn zigzag_round_trip() {
        for value in [0i64, 1, -1, 2, -2, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode(zigzag_encode(value)), value);
        }
    }

    #[test]
    fn zlib_round_trip() {
        let data = vec![b'A'; 10_240];
        let compressed = zlib_compress(&data);
        assert!(compressed.len() < data.len());
        assert_eq!(zlib_decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn crc32c_known_value() {
        // "123456789" is the standard CRC-32C check string.
        assert_eq!(crc32c(b"123456789"), 0xE3069283);
    }
}
