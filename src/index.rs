//! Index table segments and frame-number lookup.
//!
//! For clip-wrapped essence all index entries share one container and
//! differ only in stream offset, and the lookup is dense: entry `i`
//! describes frame `i`. Constant-rate segments carry no entry array at
//! all; lookups against them synthesize the entry from
//! `edit_unit_byte_count`.

use byteorder::{BigEndian, WriteBytesExt};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::klv::{self, read_local_item, write_local_item};
use crate::types::Rational;
use crate::ul::labels;

// Index table segment item tags (SMPTE ST 377-1; tags below 0x8000 are
// statically registered and need no primer resolution)
const TAG_INSTANCE_UID: u16 = 0x3C0A;
const TAG_INDEX_EDIT_RATE: u16 = 0x3F0B;
const TAG_INDEX_START_POSITION: u16 = 0x3F0C;
const TAG_INDEX_DURATION: u16 = 0x3F0D;
const TAG_EDIT_UNIT_BYTE_COUNT: u16 = 0x3F05;
const TAG_INDEX_SID: u16 = 0x3F06;
const TAG_BODY_SID: u16 = 0x3F07;
const TAG_SLICE_COUNT: u16 = 0x3F08;
const TAG_INDEX_ENTRY_ARRAY: u16 = 0x3F0A;

/// Encoded size of one index entry (temporal offset, key-frame offset,
/// flags, stream offset).
const INDEX_ENTRY_SIZE: usize = 11;

/// One edit unit's position within the essence stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Temporal reordering offset
    pub temporal_offset: i8,
    /// Offset to the anchor frame
    pub key_frame_offset: i8,
    /// Edit unit flags
    pub flags: u8,
    /// Byte offset within the essence stream
    pub stream_offset: u64,
}

impl IndexEntry {
    /// Random access flag
    pub const FLAG_RANDOM_ACCESS: u8 = 0x80;

    /// Entry for a random-access frame at the given stream offset.
    pub fn at(stream_offset: u64) -> Self {
        IndexEntry {
            temporal_offset: 0,
            key_frame_offset: 0,
            flags: Self::FLAG_RANDOM_ACCESS,
            stream_offset,
        }
    }
}

/// Index table segment local set.
#[derive(Debug, Clone)]
pub struct IndexTableSegment {
    /// Instance UID
    pub instance_uid: [u8; 16],
    /// Index edit rate
    pub index_edit_rate: Rational,
    /// Index start position
    pub index_start_position: i64,
    /// Index duration
    pub index_duration: i64,
    /// Edit unit byte count (0 for variable-rate essence)
    pub edit_unit_byte_count: u32,
    /// Index SID
    pub index_sid: u32,
    /// Body SID
    pub body_sid: u32,
    /// Slice count (0 for single-stream essence)
    pub slice_count: u8,
    /// Index entries (empty for constant-rate segments)
    pub index_entries: Vec<IndexEntry>,
}

impl Default for IndexTableSegment {
    fn default() -> Self {
        IndexTableSegment {
            instance_uid: *Uuid::new_v4().as_bytes(),
            index_edit_rate: Rational::fps_24(),
            index_start_position: 0,
            index_duration: 0,
            edit_unit_byte_count: 0,
            index_sid: 129,
            body_sid: 1,
            slice_count: 0,
            index_entries: Vec::new(),
        }
    }
}

impl IndexTableSegment {
    /// Parse a segment from its local set value.
    ///
    /// Unknown tags are skipped; dynamic tags do not occur in index
    /// segments so no primer resolution is needed here.
    pub fn parse_value(value: &[u8]) -> Result<Self> {
        let mut segment = IndexTableSegment {
            instance_uid: [0; 16],
            ..Default::default()
        };

        let mut offset = 0;
        while offset < value.len() {
            let (tag, item, consumed) = read_local_item(value, offset)?;
            offset += consumed;

            match tag {
                TAG_INSTANCE_UID if item.len() == 16 => {
                    segment.instance_uid.copy_from_slice(item);
                }
                TAG_INDEX_EDIT_RATE if item.len() == 8 => {
                    segment.index_edit_rate = Rational::new(
                        i32::from_be_bytes(item[0..4].try_into().expect("span is 4 bytes")),
                        i32::from_be_bytes(item[4..8].try_into().expect("span is 4 bytes")),
                    );
                }
                TAG_INDEX_START_POSITION if item.len() == 8 => {
                    segment.index_start_position =
                        i64::from_be_bytes(item.try_into().expect("span is 8 bytes"));
                }
                TAG_INDEX_DURATION if item.len() == 8 => {
                    segment.index_duration =
                        i64::from_be_bytes(item.try_into().expect("span is 8 bytes"));
                }
                TAG_EDIT_UNIT_BYTE_COUNT if item.len() == 4 => {
                    segment.edit_unit_byte_count =
                        u32::from_be_bytes(item.try_into().expect("span is 4 bytes"));
                }
                TAG_INDEX_SID if item.len() == 4 => {
                    segment.index_sid =
                        u32::from_be_bytes(item.try_into().expect("span is 4 bytes"));
                }
                TAG_BODY_SID if item.len() == 4 => {
                    segment.body_sid = u32::from_be_bytes(item.try_into().expect("span is 4 bytes"));
                }
                TAG_SLICE_COUNT if item.len() == 1 => {
                    segment.slice_count = item[0];
                }
                TAG_INDEX_ENTRY_ARRAY => {
                    segment.index_entries = parse_entry_array(item)?;
                }
                _ => {
                    log::debug!("skipping index segment item 0x{:04x}", tag);
                }
            }
        }

        Ok(segment)
    }

    /// Write the segment as a complete KLV packet.
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> Result<usize> {
        let mut value = Vec::new();

        write_local_item(&mut value, TAG_INSTANCE_UID, &self.instance_uid)?;

        let mut rate = Vec::with_capacity(8);
        rate.write_i32::<BigEndian>(self.index_edit_rate.numerator)?;
        rate.write_i32::<BigEndian>(self.index_edit_rate.denominator)?;
        write_local_item(&mut value, TAG_INDEX_EDIT_RATE, &rate)?;

        write_local_item(
            &mut value,
            TAG_INDEX_START_POSITION,
            &self.index_start_position.to_be_bytes(),
        )?;
        write_local_item(
            &mut value,
            TAG_INDEX_DURATION,
            &self.index_duration.to_be_bytes(),
        )?;
        write_local_item(
            &mut value,
            TAG_EDIT_UNIT_BYTE_COUNT,
            &self.edit_unit_byte_count.to_be_bytes(),
        )?;
        write_local_item(&mut value, TAG_INDEX_SID, &self.index_sid.to_be_bytes())?;
        write_local_item(&mut value, TAG_BODY_SID, &self.body_sid.to_be_bytes())?;
        write_local_item(&mut value, TAG_SLICE_COUNT, &[self.slice_count])?;

        if !self.index_entries.is_empty() {
            let mut array = Vec::with_capacity(8 + self.index_entries.len() * INDEX_ENTRY_SIZE);
            array.write_u32::<BigEndian>(self.index_entries.len() as u32)?;
            array.write_u32::<BigEndian>(INDEX_ENTRY_SIZE as u32)?;
            for entry in &self.index_entries {
                array.write_i8(entry.temporal_offset)?;
                array.write_i8(entry.key_frame_offset)?;
                array.write_u8(entry.flags)?;
                array.write_u64::<BigEndian>(entry.stream_offset)?;
            }
            write_local_item(&mut value, TAG_INDEX_ENTRY_ARRAY, &array)?;
        }

        klv::write_klv(writer, &labels::INDEX_TABLE_SEGMENT, &value)?;
        Ok(20 + value.len())
    }
}

fn parse_entry_array(item: &[u8]) -> Result<Vec<IndexEntry>> {
    if item.len() < 8 {
        return Err(Error::format("truncated index entry array"));
    }

    let count = u32::from_be_bytes(item[0..4].try_into().expect("span is 4 bytes")) as usize;
    let item_size = u32::from_be_bytes(item[4..8].try_into().expect("span is 4 bytes")) as usize;

    if item_size < INDEX_ENTRY_SIZE || item.len() < 8 + count * item_size {
        return Err(Error::format("malformed index entry array"));
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let base = 8 + i * item_size;
        let entry = &item[base..base + item_size];
        entries.push(IndexEntry {
            temporal_offset: entry[0] as i8,
            key_frame_offset: entry[1] as i8,
            flags: entry[2],
            stream_offset: u64::from_be_bytes(
                entry[3..11].try_into().expect("span is 8 bytes"),
            ),
        });
    }
    Ok(entries)
}

/// In-memory index: all segments of a file merged into one dense table.
#[derive(Debug, Clone, Default)]
pub struct IndexTable {
    segments: Vec<IndexTableSegment>,
    entries: Vec<IndexEntry>,
}

impl IndexTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parsed segment, folding its entries into the dense table.
    pub fn add_segment(&mut self, segment: IndexTableSegment) {
        self.entries.extend_from_slice(&segment.index_entries);
        self.segments.push(segment);
    }

    /// Number of indexed edit units.
    pub fn duration(&self) -> u32 {
        if !self.entries.is_empty() {
            return self.entries.len() as u32;
        }
        self.segments
            .iter()
            .map(|s| s.index_duration.max(0) as u32)
            .sum()
    }

    /// Look up the entry for a frame number.
    ///
    /// Constant-rate segments synthesize `frame * edit_unit_byte_count`.
    pub fn lookup(&self, frame_number: u32) -> Result<IndexEntry> {
        if let Some(entry) = self.entries.get(frame_number as usize) {
            return Ok(*entry);
        }

        if self.entries.is_empty() {
            for segment in &self.segments {
                if segment.edit_unit_byte_count > 0
                    && (frame_number as i64) < segment.index_duration
                {
                    return Ok(IndexEntry::at(
                        frame_number as u64 * segment.edit_unit_byte_count as u64,
                    ));
                }
            }
        }

        Err(Error::Range(frame_number))
    }

    /// True if no segment has been loaded.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klv::read_key_and_length;
    use std::io::{Cursor, Read};

    #[test]
    fn test_segment_roundtrip() {
        let mut segment = IndexTableSegment {
            index_edit_rate: Rational::fps_24(),
            index_duration: 3,
            body_sid: 1,
            index_sid: 129,
            ..Default::default()
        };
        segment.index_entries = vec![
            IndexEntry::at(24),
            IndexEntry::at(157),
            IndexEntry::at(4021),
        ];

        let mut buf = Vec::new();
        segment.write(&mut buf).unwrap();

        let mut cursor = Cursor::new(&buf);
        let (key, length, _) = read_key_and_length(&mut cursor).unwrap();
        assert!(key.matches_exact(&labels::INDEX_TABLE_SEGMENT));

        let mut value = vec![0u8; length as usize];
        cursor.read_exact(&mut value).unwrap();
        let parsed = IndexTableSegment::parse_value(&value).unwrap();

        assert_eq!(parsed.index_duration, 3);
        assert_eq!(parsed.index_entries, segment.index_entries);
        assert_eq!(parsed.index_edit_rate, Rational::fps_24());
    }

    #[test]
    fn test_dense_lookup() {
        let mut table = IndexTable::new();
        let mut segment = IndexTableSegment::default();
        segment.index_entries = vec![IndexEntry::at(0), IndexEntry::at(100)];
        table.add_segment(segment);

        assert_eq!(table.lookup(0).unwrap().stream_offset, 0);
        assert_eq!(table.lookup(1).unwrap().stream_offset, 100);
        assert!(matches!(table.lookup(2), Err(Error::Range(2))));
        assert_eq!(table.duration(), 2);
    }

    #[test]
    fn test_cbr_synthesis() {
        let mut table = IndexTable::new();
        table.add_segment(IndexTableSegment {
            edit_unit_byte_count: 4096,
            index_duration: 10,
            ..Default::default()
        });

        assert_eq!(table.lookup(0).unwrap().stream_offset, 0);
        assert_eq!(table.lookup(7).unwrap().stream_offset, 7 * 4096);
        assert!(matches!(table.lookup(10), Err(Error::Range(10))));
        assert_eq!(table.duration(), 10);
    }

    #[test]
    fn test_monotonic_offsets() {
        // writers push strictly increasing offsets; the dense table
        // preserves that ordering
        let mut table = IndexTable::new();
        let mut segment = IndexTableSegment::default();
        segment.index_entries = (0..16u64).map(|i| IndexEntry::at(i * 11 + 24)).collect();
        table.add_segment(segment);

        let mut last = None;
        for n in 0..16 {
            let offset = table.lookup(n).unwrap().stream_offset;
            if let Some(prev) = last {
                assert!(offset > prev);
            }
            last = Some(offset);
        }
    }
}
