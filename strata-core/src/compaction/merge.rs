//! Streaming merge of two segments

use crate::codec::{SegmentHeader, INT64_LENGTH};
use crate::segment::SegmentReader;
use crate::{MetricKey, Result, StrataError};
use bytes::{BufMut, BytesMut};
use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};

/// Where a key sits in one input: directory index and record count
#[derive(Debug, Clone, Copy)]
struct Slot {
    index: usize,
    count: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct MergeKey {
    old: Option<Slot>,
    new: Option<Slot>,
}

impl MergeKey {
    fn count(&self) -> u32 {
        self.old.map_or(0, |s| s.count) + self.new.map_or(0, |s| s.count)
    }
}

/// Merge two segments into `out`, returning the header written.
///
/// The side whose header ends earlier is `old`; on equal end timestamps
/// `first` is `old`. Per key, old's records are copied ahead of new's without
/// re-sorting, so old is expected to hold the earlier data for every shared
/// key. Columns are streamed straight from each input at their computed
/// offsets through a buffer of `copy_buffer_size` bytes; nothing is written
/// to either input.
pub fn merge_segments<R, W>(
    first: &mut SegmentReader<R>,
    second: &mut SegmentReader<R>,
    out: &mut W,
    copy_buffer_size: usize,
) -> Result<SegmentHeader>
where
    R: Read + Seek,
    W: Write,
{
    let (old, new) = if second.header().end < first.header().end {
        (second, first)
    } else {
        (first, second)
    };

    // BTreeMap keeps the combined keys in byte-wise order
    let mut keys: BTreeMap<MetricKey, MergeKey> = BTreeMap::new();
    for (index, (key, &count)) in old.keys().iter().zip(old.counts()).enumerate() {
        keys.entry(*key).or_default().old = Some(Slot { index, count });
    }
    for (index, (key, &count)) in new.keys().iter().zip(new.counts()).enumerate() {
        keys.entry(*key).or_default().new = Some(Slot { index, count });
    }

    let total_records = old
        .header()
        .total_records
        .checked_add(new.header().total_records)
        .ok_or_else(|| StrataError::Compaction("merged record count overflows".into()))?;
    let header = SegmentHeader {
        start: old.header().start.min(new.header().start),
        end: new.header().end.max(old.header().end),
        total_records,
        key_count: keys.len() as u32,
    };
    header.write_to(out)?;

    let mut buf = BytesMut::with_capacity(keys.len() * 20);
    for key in keys.keys() {
        buf.put_slice(key.as_bytes());
    }
    for entry in keys.values() {
        buf.put_u32_le(entry.count());
    }
    out.write_all(&buf)?;

    let mut copy_buffer = vec![0u8; copy_buffer_size];

    // timestamps, old then new
    for entry in keys.values() {
        if let Some(slot) = entry.old {
            let offset = old.timestamps_offset(slot.index);
            let len = slot.count as u64 * INT64_LENGTH as u64;
            old.copy_range(offset, len, out, &mut copy_buffer)?;
        }
        if let Some(slot) = entry.new {
            let offset = new.timestamps_offset(slot.index);
            let len = slot.count as u64 * INT64_LENGTH as u64;
            new.copy_range(offset, len, out, &mut copy_buffer)?;
        }
    }

    // value lengths, summing each key's value bytes per side
    let mut old_sums = vec![0u64; old.keys().len()];
    let mut new_sums = vec![0u64; new.keys().len()];
    for entry in keys.values() {
        if let Some(slot) = entry.old {
            old_sums[slot.index] = old.copy_lengths(slot.index, out, &mut copy_buffer)?;
        }
        if let Some(slot) = entry.new {
            new_sums[slot.index] = new.copy_lengths(slot.index, out, &mut copy_buffer)?;
        }
    }

    // value bytes, bounded by the sums above
    let old_offsets = value_offsets(old.layout().values(), &old_sums);
    let new_offsets = value_offsets(new.layout().values(), &new_sums);
    for entry in keys.values() {
        if let Some(slot) = entry.old {
            old.copy_range(old_offsets[slot.index], old_sums[slot.index], out, &mut copy_buffer)?;
        }
        if let Some(slot) = entry.new {
            new.copy_range(new_offsets[slot.index], new_sums[slot.index], out, &mut copy_buffer)?;
        }
    }

    out.flush()?;
    Ok(header)
}

/// Start of each key's value bytes, given the per-key byte sums
fn value_offsets(base: u64, sums: &[u64]) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(sums.len());
    let mut offset = base;
    for sum in sums {
        offsets.push(offset);
        offset += sum;
    }
    offsets
}
