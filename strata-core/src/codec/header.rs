//! Segment header encoding

use super::{decode_i64, decode_u32, read_exact, INT64_LENGTH, INT_LENGTH};
use crate::{Result, StrataError, Timestamp};
use bytes::BufMut;
use std::io::{Read, Write};

/// Encoded header size: start, end, record count, key count
pub const HEADER_SIZE: usize = 2 * INT64_LENGTH + 2 * INT_LENGTH;

/// Header at the start of every segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Earliest timestamp in the segment
    pub start: Timestamp,
    /// Latest timestamp in the segment
    pub end: Timestamp,
    /// Number of records across all keys
    pub total_records: u32,
    /// Number of distinct keys
    pub key_count: u32,
}

impl SegmentHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_i64_le(self.start);
        buf.put_i64_le(self.end);
        buf.put_u32_le(self.total_records);
        buf.put_u32_le(self.key_count);
        out
    }

    /// Decode and sanity-check a header
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StrataError::truncated(HEADER_SIZE, data.len()));
        }

        let header = Self {
            start: decode_i64(&data[0..8])?,
            end: decode_i64(&data[8..16])?,
            total_records: decode_u32(&data[16..20])?,
            key_count: decode_u32(&data[20..24])?,
        };
        header.validate()?;
        Ok(header)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.encode())?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        read_exact(r, &mut buf)?;
        Self::decode(&buf)
    }

    fn validate(&self) -> Result<()> {
        if self.key_count == 0 || self.total_records == 0 {
            return Err(StrataError::FormatMismatch(format!(
                "empty segment header: {} keys, {} records",
                self.key_count, self.total_records
            )));
        }
        if self.key_count > self.total_records {
            return Err(StrataError::FormatMismatch(format!(
                "{} keys cannot hold only {} records",
                self.key_count, self.total_records
            )));
        }
        if self.start > self.end {
            return Err(StrataError::FormatMismatch(format!(
                "start {} after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SegmentHeader {
        SegmentHeader {
            start: 100,
            end: 250,
            total_records: 12,
            key_count: 3,
        }
    }

    #[test]
    fn test_header_is_24_bytes() {
        let encoded = header().encode();
        assert_eq!(encoded.len(), 24);
        assert_eq!(&encoded[..8], &100i64.to_le_bytes());
        assert_eq!(&encoded[8..16], &250i64.to_le_bytes());
        assert_eq!(&encoded[16..20], &12u32.to_le_bytes());
        assert_eq!(&encoded[20..], &3u32.to_le_bytes());
        assert_eq!(SegmentHeader::decode(&encoded).unwrap(), header());
    }

    #[test]
    fn test_header_rejects_bad_values() {
        let mut h = header();
        h.start = 300;
        assert!(matches!(
            SegmentHeader::decode(&h.encode()),
            Err(StrataError::FormatMismatch(_))
        ));

        let mut h = header();
        h.key_count = 13;
        assert!(matches!(
            SegmentHeader::decode(&h.encode()),
            Err(StrataError::FormatMismatch(_))
        ));

        assert!(matches!(
            SegmentHeader::decode(&header().encode()[..20]),
            Err(StrataError::TruncatedInput { needed: 24, available: 20 })
        ));
    }
}
