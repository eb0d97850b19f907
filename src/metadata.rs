//! Header metadata: primer pack, local sets, and the interchange-object
//! store.
//!
//! The store is deliberately schema-light: every set is a bag of
//! `(local tag, bytes)` items keyed by its set UL, with typed accessors
//! for the fields the essence paths consume. Static tags (below 0x8000)
//! are used as registered; extension properties travel under dynamic tags
//! that the writer allocates and registers in the primer, and that the
//! reader normalizes back through the primer on load.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, WriteBytesExt};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::klv::{self, read_local_item, write_local_item};
use crate::types::Umid;
use crate::ul::{labels, UniversalLabel, SMPTE_UL_LENGTH, UL};

// Static local tags (SMPTE ST 377-1)
pub mod tags {
    /// Instance UID (every set)
    pub const INSTANCE_UID: u16 = 0x3C0A;

    // Preface
    pub const LAST_MODIFIED_DATE: u16 = 0x3B02;
    pub const CONTENT_STORAGE: u16 = 0x3B03;
    pub const VERSION: u16 = 0x3B05;
    pub const IDENTIFICATIONS: u16 = 0x3B06;
    pub const OPERATIONAL_PATTERN: u16 = 0x3B09;
    pub const ESSENCE_CONTAINERS: u16 = 0x3B0A;
    pub const DM_SCHEMES: u16 = 0x3B0B;

    // Identification
    pub const COMPANY_NAME: u16 = 0x3C01;
    pub const PRODUCT_NAME: u16 = 0x3C02;
    pub const VERSION_STRING: u16 = 0x3C04;
    pub const PRODUCT_UID: u16 = 0x3C05;
    pub const MODIFICATION_DATE: u16 = 0x3C06;
    pub const THIS_GENERATION_UID: u16 = 0x3C09;

    // Content storage
    pub const PACKAGES: u16 = 0x1901;
    pub const ESSENCE_CONTAINER_DATA: u16 = 0x1902;

    // Essence container data
    pub const LINKED_PACKAGE_UID: u16 = 0x2701;
    pub const INDEX_SID: u16 = 0x3F06;
    pub const BODY_SID: u16 = 0x3F07;

    // Generic package
    pub const PACKAGE_UID: u16 = 0x4401;
    pub const PACKAGE_NAME: u16 = 0x4402;
    pub const PACKAGE_TRACKS: u16 = 0x4403;
    pub const PACKAGE_MODIFIED_DATE: u16 = 0x4404;
    pub const PACKAGE_CREATION_DATE: u16 = 0x4405;
    pub const PACKAGE_DESCRIPTOR: u16 = 0x4701;

    // Track
    pub const TRACK_ID: u16 = 0x4801;
    pub const TRACK_NAME: u16 = 0x4802;
    pub const TRACK_SEQUENCE: u16 = 0x4803;
    pub const TRACK_NUMBER: u16 = 0x4804;
    pub const EDIT_RATE: u16 = 0x4B01;
    pub const ORIGIN: u16 = 0x4B02;

    // Structural component
    pub const DATA_DEFINITION: u16 = 0x0201;
    pub const DURATION: u16 = 0x0202;
    pub const STRUCTURAL_COMPONENTS: u16 = 0x1001;
    pub const START_POSITION: u16 = 0x1201;
    pub const SOURCE_PACKAGE_ID: u16 = 0x1101;
    pub const SOURCE_TRACK_ID: u16 = 0x1102;

    // Event / DM segment
    pub const EVENT_COMMENT: u16 = 0x0602;
    pub const DM_FRAMEWORK: u16 = 0x6101;

    // File descriptor
    pub const SAMPLE_RATE: u16 = 0x3001;
    pub const CONTAINER_DURATION: u16 = 0x3002;
    pub const ESSENCE_CONTAINER: u16 = 0x3004;
    pub const LINKED_TRACK_ID: u16 = 0x3006;

    // Sound essence descriptor
    pub const AUDIO_SAMPLING_RATE: u16 = 0x3D03;
    pub const CHANNEL_COUNT: u16 = 0x3D07;
    pub const QUANTIZATION_BITS: u16 = 0x3D01;
    pub const SOUND_ESSENCE_CODING: u16 = 0x3D06;
}

// Dynamic local tags, allocated by this writer and registered in the
// primer. Readers normalize foreign allocations back to these values
// through the primer's UL mappings.
pub mod dyn_tags {
    pub const SUB_DESCRIPTORS: u16 = 0x8001;
    pub const CONTEXT_SR: u16 = 0x8002;
    pub const CONTEXT_ID: u16 = 0x8003;
    pub const SOURCE_ESSENCE_CONTAINER: u16 = 0x8004;
    pub const CIPHER_ALGORITHM: u16 = 0x8005;
    pub const MIC_ALGORITHM: u16 = 0x8006;
    pub const CRYPTOGRAPHIC_KEY_ID: u16 = 0x8007;
    pub const MCA_LABEL_DICTIONARY_ID: u16 = 0x8008;
    pub const MCA_LINK_ID: u16 = 0x8009;
    pub const MCA_TAG_SYMBOL: u16 = 0x800A;
    pub const MCA_TAG_NAME: u16 = 0x800B;
    pub const OBJECT_REF: u16 = 0x800C;
    pub const PAYLOAD_SCHEME_ID: u16 = 0x800D;
    pub const TEXT_MIME_MEDIA_TYPE: u16 = 0x800E;
    pub const TEXT_LANGUAGE_CODE: u16 = 0x800F;
    pub const TEXT_DATA_DESCRIPTION: u16 = 0x8010;
    pub const GENERIC_STREAM_SID: u16 = 0x8011;
    pub const CONFORMS_TO: u16 = 0x8012;
}

/// Item definition ULs for the dynamic tags, in primer registration
/// order.
const DYNAMIC_ITEMS: &[(u16, UL)] = &[
    (
        dyn_tags::SUB_DESCRIPTORS,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x09, 0x06, 0x01, 0x01, 0x04, 0x06, 0x10,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::CONTEXT_SR,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x07, 0x06, 0x01, 0x01, 0x04, 0x02, 0x0D,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::CONTEXT_ID,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x07, 0x01, 0x01, 0x15, 0x11, 0x00, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::SOURCE_ESSENCE_CONTAINER,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x07, 0x06, 0x01, 0x01, 0x02, 0x02, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::CIPHER_ALGORITHM,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x07, 0x02, 0x09, 0x03, 0x01, 0x01, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::MIC_ALGORITHM,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x07, 0x02, 0x09, 0x03, 0x02, 0x01, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::CRYPTOGRAPHIC_KEY_ID,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x07, 0x02, 0x09, 0x03, 0x03, 0x01, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::MCA_LABEL_DICTIONARY_ID,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0E, 0x01, 0x03, 0x07, 0x01, 0x01, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::MCA_LINK_ID,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0E, 0x01, 0x03, 0x07, 0x01, 0x05, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::MCA_TAG_SYMBOL,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0E, 0x01, 0x03, 0x07, 0x01, 0x02, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::MCA_TAG_NAME,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0E, 0x01, 0x03, 0x07, 0x01, 0x03, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::OBJECT_REF,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x06, 0x01, 0x01, 0x04, 0x02, 0x0C,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::PAYLOAD_SCHEME_ID,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x04, 0x06, 0x09, 0x01, 0x00, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::TEXT_MIME_MEDIA_TYPE,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x04, 0x09, 0x02, 0x01, 0x00, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::TEXT_LANGUAGE_CODE,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x03, 0x01, 0x01, 0x02, 0x02, 0x12,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::TEXT_DATA_DESCRIPTION,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x03, 0x01, 0x02, 0x20, 0x01, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::GENERIC_STREAM_SID,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x01, 0x03, 0x04, 0x06, 0x00, 0x00,
            0x00, 0x00,
        ],
    ),
    (
        dyn_tags::CONFORMS_TO,
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0D, 0x05, 0x20, 0x07, 0x01, 0x0C, 0x00,
            0x00, 0x00,
        ],
    ),
];

/// Encode a string as UTF-16BE, the MXF string form.
pub fn encode_utf16_be(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}

/// Decode a UTF-16BE string item, dropping any trailing NUL.
pub fn decode_utf16_be(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

/// Primer pack: the local-tag to item-UL map of a header partition.
#[derive(Debug, Clone)]
pub struct PrimerPack {
    pub mappings: Vec<(u16, UL)>,
}

impl Default for PrimerPack {
    fn default() -> Self {
        PrimerPack::new()
    }
}

impl PrimerPack {
    /// Primer carrying this writer's dynamic tag allocations.
    pub fn new() -> Self {
        PrimerPack {
            mappings: DYNAMIC_ITEMS.to_vec(),
        }
    }

    /// Add a mapping, first-wins on duplicate tags.
    pub fn add(&mut self, tag: u16, ul: UL) {
        if !self.mappings.iter().any(|(t, _)| *t == tag) {
            self.mappings.push((tag, ul));
        }
    }

    /// Lookup item UL by local tag.
    pub fn lookup(&self, tag: u16) -> Option<&UL> {
        self.mappings.iter().find(|(t, _)| *t == tag).map(|(_, ul)| ul)
    }

    /// Map a foreign dynamic tag back to this crate's canonical tag via
    /// its item UL. Static tags pass through unchanged.
    pub fn normalize_tag(&self, tag: u16) -> u16 {
        if tag < 0x8000 {
            return tag;
        }
        let Some(ul) = self.lookup(tag) else {
            return tag;
        };
        DYNAMIC_ITEMS
            .iter()
            .find(|(_, item_ul)| item_ul == ul)
            .map(|(canonical, _)| *canonical)
            .unwrap_or(tag)
    }

    /// Parse from the primer pack value.
    pub fn parse_value(value: &[u8]) -> Result<Self> {
        if value.len() < 8 {
            return Err(Error::format("truncated primer pack"));
        }
        let count = u32::from_be_bytes(value[0..4].try_into().expect("span is 4 bytes")) as usize;
        let item_size =
            u32::from_be_bytes(value[4..8].try_into().expect("span is 4 bytes")) as usize;

        if item_size != 18 || value.len() < 8 + count * 18 {
            return Err(Error::format("malformed primer batch"));
        }

        let mut mappings = Vec::with_capacity(count);
        for i in 0..count {
            let base = 8 + i * 18;
            let tag = u16::from_be_bytes([value[base], value[base + 1]]);
            let ul: UL = value[base + 2..base + 18]
                .try_into()
                .expect("span is 16 bytes");
            mappings.push((tag, ul));
        }
        Ok(PrimerPack { mappings })
    }

    /// Write as a complete KLV packet.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut value = Vec::with_capacity(8 + self.mappings.len() * 18);
        value.write_u32::<BigEndian>(self.mappings.len() as u32)?;
        value.write_u32::<BigEndian>(18)?;
        for (tag, ul) in &self.mappings {
            value.write_u16::<BigEndian>(*tag)?;
            value.extend_from_slice(ul);
        }
        klv::write_klv(writer, &labels::PRIMER_PACK, &value)?;
        Ok(SMPTE_UL_LENGTH + klv::MXF_BER_LENGTH + value.len())
    }
}

/// One interchange object: a set UL plus its local items.
#[derive(Debug, Clone)]
pub struct MetadataSet {
    /// Set key
    pub key: UniversalLabel,
    items: Vec<(u16, Vec<u8>)>,
}

impl MetadataSet {
    /// New set with a fresh instance UID.
    pub fn new(key: UL) -> Self {
        let mut set = MetadataSet {
            key: UniversalLabel(key),
            items: Vec::new(),
        };
        set.set_uuid(tags::INSTANCE_UID, *Uuid::new_v4().as_bytes());
        set
    }

    /// Instance UID of this set (zero if absent).
    pub fn instance_uid(&self) -> [u8; 16] {
        self.uuid(tags::INSTANCE_UID).unwrap_or([0; 16])
    }

    /// Raw item bytes.
    pub fn get(&self, tag: u16) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_slice())
    }

    /// Insert or replace an item.
    pub fn set(&mut self, tag: u16, value: impl Into<Vec<u8>>) {
        let value = value.into();
        if let Some(slot) = self.items.iter_mut().find(|(t, _)| *t == tag) {
            slot.1 = value;
        } else {
            self.items.push((tag, value));
        }
    }

    /// 16-byte item (UUIDs and ULs share the width).
    pub fn uuid(&self, tag: u16) -> Option<[u8; 16]> {
        self.get(tag)?.try_into().ok()
    }

    pub fn set_uuid(&mut self, tag: u16, value: [u8; 16]) {
        self.set(tag, value.to_vec());
    }

    /// u32 item.
    pub fn u32(&self, tag: u16) -> Option<u32> {
        Some(u32::from_be_bytes(self.get(tag)?.try_into().ok()?))
    }

    pub fn set_u32(&mut self, tag: u16, value: u32) {
        self.set(tag, value.to_be_bytes().to_vec());
    }

    /// i64 item (positions and durations).
    pub fn i64(&self, tag: u16) -> Option<i64> {
        Some(i64::from_be_bytes(self.get(tag)?.try_into().ok()?))
    }

    pub fn set_i64(&mut self, tag: u16, value: i64) {
        self.set(tag, value.to_be_bytes().to_vec());
    }

    /// UTF-16BE string item.
    pub fn string(&self, tag: u16) -> Option<String> {
        Some(decode_utf16_be(self.get(tag)?))
    }

    pub fn set_string(&mut self, tag: u16, value: &str) {
        self.set(tag, encode_utf16_be(value));
    }

    /// 32-byte UMID item.
    pub fn umid(&self, tag: u16) -> Option<Umid> {
        Some(Umid::new(self.get(tag)?.try_into().ok()?))
    }

    pub fn set_umid(&mut self, tag: u16, value: &Umid) {
        self.set(tag, value.0.to_vec());
    }

    /// Batch of 16-byte references or labels.
    pub fn ref_batch(&self, tag: u16) -> Vec<[u8; 16]> {
        let Some(item) = self.get(tag) else {
            return Vec::new();
        };
        if item.len() < 8 {
            return Vec::new();
        }
        let count = u32::from_be_bytes(item[0..4].try_into().expect("span is 4 bytes")) as usize;
        let size = u32::from_be_bytes(item[4..8].try_into().expect("span is 4 bytes")) as usize;
        if size != 16 || item.len() < 8 + count * 16 {
            return Vec::new();
        }
        (0..count)
            .map(|i| {
                item[8 + i * 16..8 + (i + 1) * 16]
                    .try_into()
                    .expect("span is 16 bytes")
            })
            .collect()
    }

    pub fn set_ref_batch(&mut self, tag: u16, refs: &[[u8; 16]]) {
        let mut value = Vec::with_capacity(8 + refs.len() * 16);
        value.extend_from_slice(&(refs.len() as u32).to_be_bytes());
        value.extend_from_slice(&16u32.to_be_bytes());
        for r in refs {
            value.extend_from_slice(r);
        }
        self.set(tag, value);
    }

    /// Append one reference to a batch item.
    pub fn push_ref(&mut self, tag: u16, reference: [u8; 16]) {
        let mut refs = self.ref_batch(tag);
        refs.push(reference);
        self.set_ref_batch(tag, &refs);
    }

    /// Parse a set from its local set value, normalizing dynamic tags
    /// through the primer.
    pub fn parse_value(key: UniversalLabel, value: &[u8], primer: &PrimerPack) -> Result<Self> {
        let mut items = Vec::new();
        let mut offset = 0;
        while offset < value.len() {
            let (tag, item, consumed) = read_local_item(value, offset)?;
            offset += consumed;
            items.push((primer.normalize_tag(tag), item.to_vec()));
        }
        Ok(MetadataSet { key, items })
    }

    /// Write as a complete KLV packet.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut value = Vec::new();
        for (tag, item) in &self.items {
            write_local_item(&mut value, *tag, item)?;
        }
        klv::write_klv(writer, self.key.as_bytes(), &value)?;
        Ok(SMPTE_UL_LENGTH + klv::MXF_BER_LENGTH + value.len())
    }
}

/// The header's interchange-object graph, keyed by set UL.
#[derive(Debug, Clone, Default)]
pub struct HeaderMetadata {
    sets: Vec<MetadataSet>,
}

impl HeaderMetadata {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a constructed object.
    pub fn add_child(&mut self, set: MetadataSet) {
        self.sets.push(set);
    }

    /// First object with the given set UL.
    pub fn get_by_type(&self, key: &UL) -> Option<&MetadataSet> {
        self.sets.iter().find(|s| s.key.matches_exact(key))
    }

    /// Mutable access for duration back-patching at finalize.
    pub fn get_by_type_mut(&mut self, key: &UL) -> Option<&mut MetadataSet> {
        self.sets.iter_mut().find(|s| s.key.matches_exact(key))
    }

    /// All objects with the given set UL.
    pub fn get_all_by_type<'a>(&'a self, key: &'a UL) -> impl Iterator<Item = &'a MetadataSet> {
        self.sets.iter().filter(move |s| s.key.matches_exact(key))
    }

    /// Object with the given instance UID.
    pub fn get_by_instance_mut(&mut self, uid: &[u8; 16]) -> Option<&mut MetadataSet> {
        self.sets.iter_mut().find(|s| s.instance_uid() == *uid)
    }

    /// All objects.
    pub fn sets(&self) -> &[MetadataSet] {
        &self.sets
    }

    /// Read the primer and all sets of a header partition.
    ///
    /// The cursor stands just past the partition pack; `byte_budget` is
    /// the partition's `header_byte_count`, which covers the primer, the
    /// sets, and any fill.
    pub fn read_from<R: Read + Seek>(
        reader: &mut R,
        byte_budget: u64,
    ) -> Result<(PrimerPack, HeaderMetadata)> {
        let mut primer = None;
        let mut metadata = HeaderMetadata::new();
        let mut consumed = 0u64;

        while consumed < byte_budget {
            let (key, length, kl_bytes) = klv::read_key_and_length(reader)?;
            consumed += kl_bytes as u64 + length;

            if key.is_primer_pack() {
                let mut value = vec![0u8; length as usize];
                reader.read_exact(&mut value)?;
                primer = Some(PrimerPack::parse_value(&value)?);
            } else if key.is_fill_item() {
                reader.seek(SeekFrom::Current(length as i64))?;
            } else if key.is_metadata() {
                let mut value = vec![0u8; length as usize];
                reader.read_exact(&mut value)?;
                let primer_ref = primer
                    .as_ref()
                    .ok_or_else(|| Error::format("metadata set before primer pack"))?;
                metadata.add_child(MetadataSet::parse_value(key, &value, primer_ref)?);
            } else {
                log::debug!("skipping header packet {}", key);
                reader.seek(SeekFrom::Current(length as i64))?;
            }
        }

        let primer = primer.ok_or_else(|| Error::format("header has no primer pack"))?;
        Ok((primer, metadata))
    }

    /// Write the primer and all sets. Returns the bytes written.
    pub fn write<W: Write>(&self, writer: &mut W, primer: &PrimerPack) -> Result<usize> {
        let mut written = primer.write(writer)?;
        for set in &self.sets {
            written += set.write(writer)?;
        }
        Ok(written)
    }
}

/// Write a fill item padding the current position out to `total` bytes of
/// a `span` that began `used` bytes ago. The fill KL itself consumes 20
/// bytes, so `total - used` must be at least 20.
pub fn write_fill<W: Write>(writer: &mut W, used: usize, total: usize) -> Result<usize> {
    let kl = SMPTE_UL_LENGTH + klv::MXF_BER_LENGTH;
    if used + kl > total {
        return Err(Error::Fail(format!(
            "no room for fill: {} used of {}",
            used, total
        )));
    }
    let pad = total - used - kl;
    klv::write_kl(writer, &labels::FILL_ITEM, pad as u64, klv::MXF_BER_LENGTH)?;
    writer.write_all(&vec![0u8; pad])?;
    Ok(kl + pad)
}
