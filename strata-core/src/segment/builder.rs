//! Segment builder: log records in, sorted columns out

use super::{write_segment, SegmentMeta};
use crate::codec::{encode_len, SegmentHeader};
use crate::{MetricKey, Record, Result, StrataError, Timestamp};
use bytes::{BufMut, BytesMut};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Collects records and writes them as one level-0 segment.
///
/// Records are grouped by key hash; groups come out in byte-wise key order
/// and each group is sorted by timestamp. The sort is stable, so equal
/// timestamps keep arrival order and the same batch always produces the
/// same bytes.
#[derive(Debug, Default)]
pub struct SegmentBuilder {
    groups: BTreeMap<MetricKey, Vec<(Timestamp, Vec<u8>)>>,
    record_count: usize,
    min_timestamp: Option<Timestamp>,
    max_timestamp: Option<Timestamp>,
}

impl SegmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records in arrival order
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut builder = Self::new();
        for record in records {
            builder.add(record);
        }
        builder
    }

    /// Add a record
    pub fn add(&mut self, record: Record) {
        self.min_timestamp = Some(
            self.min_timestamp
                .map_or(record.timestamp, |t| t.min(record.timestamp)),
        );
        self.max_timestamp = Some(
            self.max_timestamp
                .map_or(record.timestamp, |t| t.max(record.timestamp)),
        );
        self.record_count += 1;
        self.groups
            .entry(record.key)
            .or_default()
            .push((record.timestamp, record.value));
    }

    pub fn len(&self) -> usize {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Header the segment will be written with
    pub fn header(&self) -> Result<SegmentHeader> {
        let (Some(start), Some(end)) = (self.min_timestamp, self.max_timestamp) else {
            return Err(StrataError::EmptyFlush);
        };
        let total_records = u32::try_from(self.record_count).map_err(|_| {
            StrataError::FormatMismatch(format!("{} records overflow a segment", self.record_count))
        })?;

        Ok(SegmentHeader {
            start,
            end,
            total_records,
            key_count: self.groups.len() as u32,
        })
    }

    /// Write the segment image to `w`
    pub fn write_to<W: Write>(mut self, w: &mut W) -> Result<SegmentHeader> {
        let header = self.header()?;

        for records in self.groups.values_mut() {
            records.sort_by_key(|(ts, _)| *ts);
        }

        header.write_to(w)?;

        let mut buf = BytesMut::new();
        for key in self.groups.keys() {
            buf.put_slice(key.as_bytes());
        }
        for records in self.groups.values() {
            buf.put_u32_le(encode_len(records.len())?);
        }
        w.write_all(&buf)?;

        buf.clear();
        for records in self.groups.values() {
            for (ts, _) in records {
                buf.put_i64_le(*ts);
            }
        }
        w.write_all(&buf)?;

        buf.clear();
        for records in self.groups.values() {
            for (_, value) in records {
                buf.put_u32_le(encode_len(value.len())?);
            }
        }
        w.write_all(&buf)?;

        for records in self.groups.values() {
            for (_, value) in records {
                w.write_all(value)?;
            }
        }

        Ok(header)
    }

    /// Write the segment into `dir` under `id` at `level`.
    ///
    /// The file is written to a temp path and renamed into place once it is
    /// synced; nothing refers to it until the manifest does.
    pub fn finish(
        self,
        dir: &Path,
        id: u64,
        level: usize,
        buffer_size: usize,
    ) -> Result<SegmentMeta> {
        if self.is_empty() {
            return Err(StrataError::EmptyFlush);
        }

        let mut header = None;
        let path = write_segment(dir, id, buffer_size, |w| {
            header = Some(self.write_to(w)?);
            Ok(())
        })?;
        let header = header.ok_or(StrataError::EmptyFlush)?;

        let file_size = std::fs::metadata(&path)?.len();
        Ok(SegmentMeta {
            id,
            level,
            path,
            header,
            file_size,
        })
    }
}
