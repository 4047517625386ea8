//! Log row encoding

use super::{decode_i64, decode_u32, encode_len, read_full, INT64_LENGTH, INT_LENGTH};
use crate::{MetricKey, Record, Result, StrataError, KEY_LENGTH};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Read, Write};

/// Fixed part of a row: timestamp, key and value length
pub const ROW_PREFIX_SIZE: usize = INT64_LENGTH + KEY_LENGTH + INT_LENGTH;

impl Record {
    /// Size of the encoded row in bytes
    pub fn encoded_len(&self) -> usize {
        ROW_PREFIX_SIZE + self.value.len()
    }

    /// Encode as a log row.
    ///
    /// Format:
    /// - 8 bytes: timestamp
    /// - 16 bytes: metric key hash
    /// - 4 bytes: value length
    /// - N bytes: value
    ///
    /// Values of 4 GiB or more cannot be described by the length field.
    pub fn encode(&self) -> Result<Bytes> {
        let value_len = encode_len(self.value.len())?;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_i64_le(self.timestamp);
        buf.put_slice(self.key.as_bytes());
        buf.put_u32_le(value_len);
        buf.put_slice(&self.value);
        Ok(buf.freeze())
    }

    /// Write the encoded row to `w`
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.encode()?)?;
        Ok(())
    }

    /// Decode one row from the start of `data`, returning it and the bytes consumed
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < ROW_PREFIX_SIZE {
            return Err(StrataError::truncated(ROW_PREFIX_SIZE, data.len()));
        }

        let timestamp = decode_i64(data)?;
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&data[INT64_LENGTH..INT64_LENGTH + KEY_LENGTH]);
        let value_len = decode_u32(&data[INT64_LENGTH + KEY_LENGTH..])? as usize;

        let total = ROW_PREFIX_SIZE + value_len;
        if data.len() < total {
            return Err(StrataError::truncated(total, data.len()));
        }

        let record = Record {
            timestamp,
            key: MetricKey::from_bytes(key),
            value: data[ROW_PREFIX_SIZE..total].to_vec(),
        };
        Ok((record, total))
    }

    /// Read one row from a stream.
    ///
    /// Returns `Ok(None)` on a clean end of stream and `TruncatedInput` when
    /// the stream ends inside a row.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>> {
        let mut prefix = [0u8; ROW_PREFIX_SIZE];
        match read_full(r, &mut prefix)? {
            0 => return Ok(None),
            n if n < ROW_PREFIX_SIZE => {
                return Err(StrataError::truncated(ROW_PREFIX_SIZE, n));
            }
            _ => {}
        }

        let value_len = decode_u32(&prefix[INT64_LENGTH + KEY_LENGTH..])? as usize;
        let mut value = vec![0u8; value_len];
        let n = read_full(r, &mut value)?;
        if n < value_len {
            return Err(StrataError::truncated(ROW_PREFIX_SIZE + value_len, ROW_PREFIX_SIZE + n));
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&prefix[INT64_LENGTH..INT64_LENGTH + KEY_LENGTH]);
        Ok(Some(Record {
            timestamp: decode_i64(&prefix)?,
            key: MetricKey::from_bytes(key),
            value,
        }))
    }
}
