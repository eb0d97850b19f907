//! MXF partition handling.
//!
//! AS-DCP/AS-02 files are divided into partitions:
//! - Header partition (required)
//! - Body partitions (optional; one per essence container)
//! - Generic stream partitions (optional; one per metadata stream)
//! - Footer partition (required for closed/complete files)
//!
//! The trailing Random Index Pack records one `(BodySID, offset)` pair per
//! partition so readers can reach any of them without a linear scan.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};
use crate::klv::{self, MXF_BER_LENGTH};
use crate::ul::{labels, UniversalLabel, SMPTE_UL_LENGTH, UL};

/// Partition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// Header partition
    Header,
    /// Body partition
    Body,
    /// Generic stream partition (SMPTE ST 410)
    GenericStream,
    /// Footer partition
    Footer,
}

/// MXF partition pack
#[derive(Debug, Clone)]
pub struct Partition {
    /// Partition kind
    pub kind: PartitionKind,
    /// Major version (should be 1)
    pub major_version: u16,
    /// Minor version (should be 2 or 3)
    pub minor_version: u16,
    /// KAG size (key alignment grid)
    pub kag_size: u32,
    /// This partition offset in file
    pub this_partition: u64,
    /// Previous partition offset
    pub previous_partition: u64,
    /// Footer partition offset
    pub footer_partition: u64,
    /// Header byte count (metadata bytes after partition pack)
    pub header_byte_count: u64,
    /// Index byte count
    pub index_byte_count: u64,
    /// Index SID (stream ID for index)
    pub index_sid: u32,
    /// Body offset (for body partitions)
    pub body_offset: u64,
    /// Body SID (stream ID for essence)
    pub body_sid: u32,
    /// Operational pattern
    pub operational_pattern: UL,
    /// Essence containers
    pub essence_containers: Vec<UL>,
}

impl Default for Partition {
    fn default() -> Self {
        Partition {
            kind: PartitionKind::Header,
            major_version: 1,
            minor_version: 3,
            kag_size: 1,
            this_partition: 0,
            previous_partition: 0,
            footer_partition: 0,
            header_byte_count: 0,
            index_byte_count: 0,
            index_sid: 0,
            body_offset: 0,
            body_sid: 0,
            operational_pattern: labels::OP1A,
            essence_containers: Vec::new(),
        }
    }
}

impl Partition {
    /// Create header partition
    pub fn header() -> Self {
        Partition {
            kind: PartitionKind::Header,
            ..Default::default()
        }
    }

    /// Create generic stream partition
    pub fn generic_stream() -> Self {
        Partition {
            kind: PartitionKind::GenericStream,
            ..Default::default()
        }
    }

    /// Create footer partition
    pub fn footer() -> Self {
        Partition {
            kind: PartitionKind::Footer,
            ..Default::default()
        }
    }

    /// Get the partition pack UL for this kind (closed complete forms)
    pub fn pack_ul(&self) -> UL {
        match self.kind {
            PartitionKind::Header => labels::HEADER_PARTITION_CLOSED_COMPLETE,
            PartitionKind::Body => labels::BODY_PARTITION_CLOSED_COMPLETE,
            PartitionKind::GenericStream => labels::GENERIC_STREAM_PARTITION,
            PartitionKind::Footer => labels::FOOTER_PARTITION,
        }
    }

    /// Determine the partition kind from a pack key.
    pub fn kind_of(key: &UniversalLabel) -> Result<PartitionKind> {
        if !key.is_partition_pack() {
            return Err(Error::format(format!("not a partition pack: {}", key)));
        }
        Ok(match (key.as_bytes()[13], key.as_bytes()[14]) {
            (0x02, _) => PartitionKind::Header,
            (0x03, 0x11) => PartitionKind::GenericStream,
            (0x03, _) => PartitionKind::Body,
            (0x04, _) => PartitionKind::Footer,
            _ => return Err(Error::format(format!("unknown partition type: {}", key))),
        })
    }

    /// Parse a partition pack value (the bytes after the key and length).
    pub fn parse_value(kind: PartitionKind, value: &[u8]) -> Result<Self> {
        if value.len() < 88 {
            return Err(Error::format(format!(
                "partition pack too short: {} bytes",
                value.len()
            )));
        }

        let mut cursor = Cursor::new(value);
        let major_version = cursor.read_u16::<BigEndian>()?;
        let minor_version = cursor.read_u16::<BigEndian>()?;
        let kag_size = cursor.read_u32::<BigEndian>()?;
        let this_partition = cursor.read_u64::<BigEndian>()?;
        let previous_partition = cursor.read_u64::<BigEndian>()?;
        let footer_partition = cursor.read_u64::<BigEndian>()?;
        let header_byte_count = cursor.read_u64::<BigEndian>()?;
        let index_byte_count = cursor.read_u64::<BigEndian>()?;
        let index_sid = cursor.read_u32::<BigEndian>()?;
        let body_offset = cursor.read_u64::<BigEndian>()?;
        let body_sid = cursor.read_u32::<BigEndian>()?;

        let mut operational_pattern = [0u8; SMPTE_UL_LENGTH];
        cursor.read_exact(&mut operational_pattern)?;

        let batch_count = cursor.read_u32::<BigEndian>()?;
        let batch_item_size = cursor.read_u32::<BigEndian>()?;

        let mut essence_containers = Vec::new();
        for _ in 0..batch_count {
            if batch_item_size as usize == SMPTE_UL_LENGTH {
                let mut ul = [0u8; SMPTE_UL_LENGTH];
                cursor.read_exact(&mut ul)?;
                essence_containers.push(ul);
            } else {
                cursor.seek(SeekFrom::Current(batch_item_size as i64))?;
            }
        }

        Ok(Partition {
            kind,
            major_version,
            minor_version,
            kag_size,
            this_partition,
            previous_partition,
            footer_partition,
            header_byte_count,
            index_byte_count,
            index_sid,
            body_offset,
            body_sid,
            operational_pattern,
            essence_containers,
        })
    }

    /// Read one partition pack at the current position of a byte source.
    ///
    /// Leaves the cursor just past the pack value.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let (key, length, _) = klv::read_key_and_length(reader)?;
        let kind = Self::kind_of(&key)?;

        let mut value = vec![0u8; length as usize];
        reader.read_exact(&mut value)?;
        Self::parse_value(kind, &value)
    }

    /// Write the partition pack
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let essence_size = self.essence_containers.len() * SMPTE_UL_LENGTH;
        let value_size = 88 + essence_size;

        writer.write_all(&self.pack_ul())?;
        let ber = klv::encode_ber(value_size as u64, MXF_BER_LENGTH)?;
        writer.write_all(&ber)?;

        writer.write_u16::<BigEndian>(self.major_version)?;
        writer.write_u16::<BigEndian>(self.minor_version)?;
        writer.write_u32::<BigEndian>(self.kag_size)?;
        writer.write_u64::<BigEndian>(self.this_partition)?;
        writer.write_u64::<BigEndian>(self.previous_partition)?;
        writer.write_u64::<BigEndian>(self.footer_partition)?;
        writer.write_u64::<BigEndian>(self.header_byte_count)?;
        writer.write_u64::<BigEndian>(self.index_byte_count)?;
        writer.write_u32::<BigEndian>(self.index_sid)?;
        writer.write_u64::<BigEndian>(self.body_offset)?;
        writer.write_u32::<BigEndian>(self.body_sid)?;
        writer.write_all(&self.operational_pattern)?;

        writer.write_u32::<BigEndian>(self.essence_containers.len() as u32)?;
        writer.write_u32::<BigEndian>(SMPTE_UL_LENGTH as u32)?;
        for ec in &self.essence_containers {
            writer.write_all(ec)?;
        }

        Ok(SMPTE_UL_LENGTH + MXF_BER_LENGTH + value_size)
    }

    /// Total encoded size in bytes
    pub fn size(&self) -> usize {
        SMPTE_UL_LENGTH + MXF_BER_LENGTH + 88 + self.essence_containers.len() * SMPTE_UL_LENGTH
    }

    /// Add essence container
    pub fn add_essence_container(&mut self, ul: UL) {
        if !self.essence_containers.contains(&ul) {
            self.essence_containers.push(ul);
        }
    }
}

/// Random Index Pack entry
#[derive(Debug, Clone, Copy)]
pub struct RipEntry {
    /// Body SID (0 for header/footer)
    pub body_sid: u32,
    /// Byte offset of partition
    pub byte_offset: u64,
}

/// Random Index Pack
#[derive(Debug, Clone, Default)]
pub struct RandomIndexPack {
    pub entries: Vec<RipEntry>,
}

impl RandomIndexPack {
    /// Create new RIP
    pub fn new() -> Self {
        Self::default()
    }

    /// Add entry
    pub fn add_entry(&mut self, body_sid: u32, byte_offset: u64) {
        self.entries.push(RipEntry {
            body_sid,
            byte_offset,
        });
    }

    /// Find the entry for a body SID.
    pub fn find(&self, body_sid: u32) -> Option<&RipEntry> {
        self.entries.iter().find(|e| e.body_sid == body_sid)
    }

    /// Read the RIP from the end of the file. Leaves the cursor
    /// unspecified; callers reposition afterwards.
    ///
    /// The RIP ends with a 4-byte overall length, which locates the pack
    /// key without scanning.
    pub fn read_from_end<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        if file_len < 20 {
            return Err(Error::format("file too short for a RIP"));
        }

        reader.seek(SeekFrom::End(-4))?;
        let overall_length = reader.read_u32::<BigEndian>()? as u64;
        if overall_length < 20 || overall_length > file_len {
            return Err(Error::format(format!(
                "implausible RIP length: {}",
                overall_length
            )));
        }

        let rip_start = file_len - overall_length;
        reader.seek(SeekFrom::Start(rip_start))?;

        let (key, value_len, kl_len) = klv::read_key_and_length(reader)?;
        if !key.matches_exact(&labels::RANDOM_INDEX_PACK) {
            return Err(Error::format(format!("expected RIP key, found {}", key)));
        }
        if kl_len as u64 + value_len != overall_length {
            return Err(Error::format("RIP length fields disagree"));
        }

        // value = 12-byte pairs + trailing overall length
        if value_len < 4 || (value_len - 4) % 12 != 0 {
            return Err(Error::format("malformed RIP pair array"));
        }

        let mut entries = Vec::new();
        for _ in 0..(value_len - 4) / 12 {
            let body_sid = reader.read_u32::<BigEndian>()?;
            let byte_offset = reader.read_u64::<BigEndian>()?;
            entries.push(RipEntry {
                body_sid,
                byte_offset,
            });
        }

        Ok(RandomIndexPack { entries })
    }

    /// Write the RIP
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let value_size = self.entries.len() * 12 + 4; // pairs + overall length

        writer.write_all(&labels::RANDOM_INDEX_PACK)?;
        let ber = klv::encode_ber(value_size as u64, MXF_BER_LENGTH)?;
        writer.write_all(&ber)?;

        for entry in &self.entries {
            writer.write_u32::<BigEndian>(entry.body_sid)?;
            writer.write_u64::<BigEndian>(entry.byte_offset)?;
        }

        let overall_length = (SMPTE_UL_LENGTH + MXF_BER_LENGTH + value_size) as u32;
        writer.write_u32::<BigEndian>(overall_length)?;

        Ok(overall_length as usize)
    }
}
