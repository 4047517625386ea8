//! Segment reader: header, key directory and section offsets

use super::SegmentLayout;
use crate::codec::{decode_i64, decode_u32, read_exact, SegmentHeader, INT64_LENGTH, INT_LENGTH};
use crate::{MetricKey, Record, Result, StrataError, KEY_LENGTH};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Read-only view of a segment over its own handle.
///
/// Opening reads the header and the key directory (keys and per-key counts)
/// and precomputes where each key's slice starts inside the record-wide
/// sections. Column data is only touched through the copy methods.
pub struct SegmentReader<R = BufReader<File>> {
    inner: R,
    header: SegmentHeader,
    layout: SegmentLayout,
    keys: Vec<MetricKey>,
    counts: Vec<u32>,
    /// Records preceding each key, i.e. the prefix sums of `counts`
    record_offsets: Vec<u64>,
}

impl SegmentReader<BufReader<File>> {
    /// Open a segment file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> SegmentReader<R> {
    /// Read the header and key directory from any seekable source
    pub fn from_reader(mut inner: R) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let header = SegmentHeader::read_from(&mut inner)?;
        let layout = SegmentLayout::new(&header);

        // the fixed-width columns must fit before anything is sized from the header
        let file_len = inner.seek(SeekFrom::End(0))?;
        if layout.values() > file_len {
            return Err(StrataError::FormatMismatch(format!(
                "header describes {} bytes of columns, file has {}",
                layout.values(),
                file_len
            )));
        }
        inner.seek(SeekFrom::Start(layout.keys()))?;
        let key_count = header.key_count as usize;

        let mut directory = vec![0u8; key_count * (KEY_LENGTH + INT_LENGTH)];
        read_exact(&mut inner, &mut directory)?;
        let (key_bytes, count_bytes) = directory.split_at(key_count * KEY_LENGTH);

        let keys: Vec<MetricKey> = key_bytes
            .chunks_exact(KEY_LENGTH)
            .map(|chunk| {
                let mut key = [0u8; KEY_LENGTH];
                key.copy_from_slice(chunk);
                MetricKey::from_bytes(key)
            })
            .collect();
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(StrataError::FormatMismatch(
                "segment keys are not strictly ascending".into(),
            ));
        }

        let counts = count_bytes
            .chunks_exact(INT_LENGTH)
            .map(decode_u32)
            .collect::<Result<Vec<_>>>()?;

        let mut record_offsets = Vec::with_capacity(key_count);
        let mut total = 0u64;
        for (i, &count) in counts.iter().enumerate() {
            if count == 0 {
                return Err(StrataError::FormatMismatch(format!(
                    "key {} has no records",
                    keys[i]
                )));
            }
            record_offsets.push(total);
            total += count as u64;
        }
        if total != header.total_records as u64 {
            return Err(StrataError::FormatMismatch(format!(
                "per-key counts sum to {}, header says {}",
                total, header.total_records
            )));
        }

        Ok(Self {
            inner,
            header,
            layout,
            keys,
            counts,
            record_offsets,
        })
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    pub fn keys(&self) -> &[MetricKey] {
        &self.keys
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Position of `key` in the key directory
    pub fn key_index(&self, key: &MetricKey) -> Option<usize> {
        self.keys.binary_search(key).ok()
    }

    /// Byte offset of the timestamps of the key at `index`
    pub fn timestamps_offset(&self, index: usize) -> u64 {
        self.layout.timestamps() + self.record_offsets[index] * INT64_LENGTH as u64
    }

    /// Byte offset of the value lengths of the key at `index`
    pub fn lengths_offset(&self, index: usize) -> u64 {
        self.layout.lengths() + self.record_offsets[index] * INT_LENGTH as u64
    }

    /// Copy exactly `len` bytes starting at `offset` into `out`
    pub fn copy_range<W: Write>(
        &mut self,
        offset: u64,
        len: u64,
        out: &mut W,
        buf: &mut [u8],
    ) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            let n = crate::codec::read_full(&mut self.inner, &mut buf[..chunk])?;
            if n < chunk {
                return Err(StrataError::truncated(
                    len as usize,
                    (len - remaining) as usize + n,
                ));
            }
            out.write_all(&buf[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }

    /// Copy the value-length slice of the key at `index` into `out`,
    /// returning the number of value bytes those lengths describe
    pub fn copy_lengths<W: Write>(
        &mut self,
        index: usize,
        out: &mut W,
        buf: &mut [u8],
    ) -> Result<u64> {
        // whole lengths per chunk so no length straddles two reads
        let usable = buf.len() - buf.len() % INT_LENGTH;
        if usable == 0 {
            return Err(StrataError::Config("copy buffer smaller than a length".into()));
        }

        self.inner.seek(SeekFrom::Start(self.lengths_offset(index)))?;
        let len = self.counts[index] as u64 * INT_LENGTH as u64;
        let mut remaining = len;
        let mut sum = 0u64;
        while remaining > 0 {
            let chunk = remaining.min(usable as u64) as usize;
            let n = crate::codec::read_full(&mut self.inner, &mut buf[..chunk])?;
            if n < chunk {
                return Err(StrataError::truncated(
                    len as usize,
                    (len - remaining) as usize + n,
                ));
            }
            for raw in buf[..chunk].chunks_exact(INT_LENGTH) {
                sum += decode_u32(raw)? as u64;
            }
            out.write_all(&buf[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(sum)
    }

    /// Decode every record, in key order then time order.
    ///
    /// Loads the whole segment; meant for validation and tooling.
    pub fn read_all(&mut self) -> Result<Vec<Record>> {
        let total = self.header.total_records as usize;

        self.inner.seek(SeekFrom::Start(self.layout.timestamps()))?;
        let mut ts_bytes = vec![0u8; total * INT64_LENGTH];
        read_exact(&mut self.inner, &mut ts_bytes)?;
        let mut len_bytes = vec![0u8; total * INT_LENGTH];
        read_exact(&mut self.inner, &mut len_bytes)?;

        let mut records = Vec::with_capacity(total);
        let mut row = 0;
        for (key, &count) in self.keys.iter().zip(&self.counts) {
            for _ in 0..count {
                let timestamp = decode_i64(&ts_bytes[row * INT64_LENGTH..])?;
                let len = decode_u32(&len_bytes[row * INT_LENGTH..])? as usize;
                let mut value = vec![0u8; len];
                read_exact(&mut self.inner, &mut value)?;
                records.push(Record::with_key(timestamp, *key, value));
                row += 1;
            }
        }
        Ok(records)
    }
}
