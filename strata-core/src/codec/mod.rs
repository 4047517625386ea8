//! Fixed-width binary encodings for log rows and segment files
//!
//! Every integer on disk is little-endian: 4 bytes for counts and lengths,
//! 8 bytes for timestamps. Decoders never return partial values; a short
//! buffer is reported as [`StrataError::TruncatedInput`].

mod header;
mod record;

pub use header::{SegmentHeader, HEADER_SIZE};
pub use record::ROW_PREFIX_SIZE;

use crate::{Result, StrataError};
use std::io::{ErrorKind, Read};

/// Width of an encoded count or length
pub const INT_LENGTH: usize = 4;

/// Width of an encoded timestamp
pub const INT64_LENGTH: usize = 8;

/// Check that a length or count fits its 4-byte field
pub fn encode_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        StrataError::FormatMismatch(format!("length {} does not fit in {} bytes", len, INT_LENGTH))
    })
}

/// Decode a little-endian `u32` from the start of `buf`
pub fn decode_u32(buf: &[u8]) -> Result<u32> {
    let bytes: [u8; INT_LENGTH] = buf
        .get(..INT_LENGTH)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StrataError::truncated(INT_LENGTH, buf.len()))?;
    Ok(u32::from_le_bytes(bytes))
}

/// Decode a little-endian `i64` from the start of `buf`
pub fn decode_i64(buf: &[u8]) -> Result<i64> {
    let bytes: [u8; INT64_LENGTH] = buf
        .get(..INT64_LENGTH)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StrataError::truncated(INT64_LENGTH, buf.len()))?;
    Ok(i64::from_le_bytes(bytes))
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns how many bytes were read. Unlike `read_exact`, a short stream is
/// not an error here so callers can tell a clean EOF (0 bytes) from a torn
/// value.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Fill `buf` completely or fail with `TruncatedInput`
pub fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let n = read_full(reader, buf)?;
    if n < buf.len() {
        return Err(StrataError::truncated(buf.len(), n));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_len_bounds() {
        assert_eq!(encode_len(5).unwrap(), 5);
        assert_eq!(encode_len(u32::MAX as usize).unwrap(), u32::MAX);
        assert!(matches!(
            encode_len(u32::MAX as usize + 1),
            Err(StrataError::FormatMismatch(_))
        ));
    }

    #[test]
    fn test_integers_are_little_endian() {
        assert_eq!(decode_u32(&[1, 0, 0, 0]).unwrap(), 1);
        assert_eq!(decode_u32(&[0, 1, 0, 0, 0xff]).unwrap(), 256);
        assert_eq!(decode_i64(&(-2i64).to_le_bytes()).unwrap(), -2);
    }

    #[test]
    fn test_short_buffer_is_truncated() {
        let err = decode_u32(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            StrataError::TruncatedInput { needed: 4, available: 3 }
        ));

        let err = decode_i64(&[0u8; 7]).unwrap_err();
        assert!(matches!(
            err,
            StrataError::TruncatedInput { needed: 8, available: 7 }
        ));
    }

    #[test]
    fn test_read_exact_reports_short_stream() {
        let mut src: &[u8] = &[1, 2, 3];
        let mut buf = [0u8; 5];
        let err = read_exact(&mut src, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            StrataError::TruncatedInput { needed: 5, available: 3 }
        ));

        let mut empty: &[u8] = &[];
        assert_eq!(read_full(&mut empty, &mut buf).unwrap(), 0);
    }
}
