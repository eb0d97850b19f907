//! Universal Label (UL) types.
//!
//! Universal Labels are 16-byte identifiers defined by SMPTE for
//! identifying all elements in MXF files.
//!
//! Essence element keys carry a mutable stream-number byte at index 15, so
//! every essence-key comparison uses [`UniversalLabel::matches_ignore_stream`].
//! Full 16-byte equality is reserved for non-essence labels.

use std::fmt;

/// A 16-byte Universal Label
pub type UL = [u8; 16];

/// Byte length of a Universal Label.
pub const SMPTE_UL_LENGTH: usize = 16;

/// Universal Label wrapper with helper methods
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniversalLabel(pub UL);

impl UniversalLabel {
    /// Create from raw bytes
    pub fn new(bytes: UL) -> Self {
        UniversalLabel(bytes)
    }

    /// Read from the start of a slice. Returns `None` if it is too short.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: UL = bytes.get(..SMPTE_UL_LENGTH)?.try_into().ok()?;
        Some(UniversalLabel(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &UL {
        &self.0
    }

    /// Check if this is a SMPTE-registered label (starts with 06 0E 2B 34)
    pub fn is_smpte(&self) -> bool {
        self.0[0] == 0x06 && self.0[1] == 0x0E && self.0[2] == 0x2B && self.0[3] == 0x34
    }

    /// Compare ignoring the stream-number byte (index 15).
    ///
    /// Essence element keys are customized per track by rewriting the
    /// final byte, so matching an essence key against its registered form
    /// must mask it out.
    pub fn matches_ignore_stream(&self, other: &UL) -> bool {
        self.0[..SMPTE_UL_LENGTH - 1] == other[..SMPTE_UL_LENGTH - 1]
    }

    /// Exact 16-byte equality.
    pub fn matches_exact(&self, other: &UL) -> bool {
        self.0 == *other
    }

    /// Check if this is a partition pack
    pub fn is_partition_pack(&self) -> bool {
        // Byte 13 is 0x02 (header), 0x03 (body, incl. generic stream), or
        // 0x04 (footer). Primer pack has byte 13 = 0x05, so exclude it.
        self.0[0..13] == labels::PARTITION_PACK_BASE[0..13]
            && (self.0[13] >= 0x02 && self.0[13] <= 0x04)
    }

    /// Check if this is a primer pack
    pub fn is_primer_pack(&self) -> bool {
        self.0 == labels::PRIMER_PACK
    }

    /// Check if this is a fill item
    pub fn is_fill_item(&self) -> bool {
        self.0[0..13] == labels::FILL_ITEM[0..13]
    }

    /// Check if this is essence data
    pub fn is_essence(&self) -> bool {
        // Essence elements have category 01
        self.is_smpte() && self.0[4] == 0x01
    }

    /// Check if this is a metadata set (local set)
    pub fn is_metadata(&self) -> bool {
        // Local sets have category 02, registry 53
        self.is_smpte() && self.0[4] == 0x02 && self.0[5] == 0x53
    }

    /// Check if this is an encrypted essence triplet key, in either the
    /// SMPTE or the MXF-Interop registration.
    pub fn is_crypt_essence(&self) -> bool {
        self.matches_ignore_stream(&labels::CRYPT_ESSENCE_SMPTE)
            || self.matches_ignore_stream(&labels::CRYPT_ESSENCE_INTEROP)
    }
}

impl fmt::Debug for UniversalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UL(")?;
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for UniversalLabel {
    /// Renders the registered name when the label is known, and the
    /// dotted hex form otherwise, so log lines read well either way.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match labels::lookup_name(&self.0) {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{:?}", self),
        }
    }
}

impl From<UL> for UniversalLabel {
    fn from(bytes: UL) -> Self {
        UniversalLabel(bytes)
    }
}

impl From<&[u8; 16]> for UniversalLabel {
    fn from(bytes: &[u8; 16]) -> Self {
        UniversalLabel(*bytes)
    }
}

/// Well-known Universal Labels
pub mod labels {
    use super::UL;

    /// SMPTE Label prefix
    pub const SMPTE_PREFIX: [u8; 4] = [0x06, 0x0E, 0x2B, 0x34];

    // Structural packs

    /// Partition pack base (bytes 13..16 vary)
    pub const PARTITION_PACK_BASE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x00, 0x00,
        0x00,
    ];

    /// Header partition - closed complete
    pub const HEADER_PARTITION_CLOSED_COMPLETE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x02, 0x04,
        0x00,
    ];

    /// Header partition - open incomplete
    pub const HEADER_PARTITION_OPEN_INCOMPLETE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x02, 0x01,
        0x00,
    ];

    /// Body partition - closed complete
    pub const BODY_PARTITION_CLOSED_COMPLETE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x03, 0x04,
        0x00,
    ];

    /// Generic stream partition (SMPTE ST 410)
    pub const GENERIC_STREAM_PARTITION: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x03, 0x11,
        0x00,
    ];

    /// Footer partition
    pub const FOOTER_PARTITION: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x04, 0x04,
        0x00,
    ];

    /// Primer pack
    pub const PRIMER_PACK: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x05, 0x01,
        0x00,
    ];

    /// Fill item
    pub const FILL_ITEM: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x02, 0x03, 0x01, 0x02, 0x10, 0x01, 0x00, 0x00,
        0x00,
    ];

    /// Index table segment
    pub const INDEX_TABLE_SEGMENT: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x10, 0x01,
        0x00,
    ];

    /// Random index pack
    pub const RANDOM_INDEX_PACK: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x11, 0x01,
        0x00,
    ];

    // Operational patterns

    /// OP1a (single item, single package)
    pub const OP1A: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x01, 0x01,
        0x00,
    ];

    /// OP-Atom, SMPTE registration
    pub const OP_ATOM_SMPTE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x02, 0x0D, 0x01, 0x02, 0x01, 0x10, 0x00, 0x00,
        0x00,
    ];

    /// OP-Atom, pre-standard MXF Interop registration
    pub const OP_ATOM_INTEROP: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x10, 0x00, 0x00,
        0x00,
    ];

    // Metadata sets

    /// Preface (root of metadata tree)
    pub const PREFACE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x2F,
        0x00,
    ];

    /// Identification
    pub const IDENTIFICATION: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x30,
        0x00,
    ];

    /// Content storage
    pub const CONTENT_STORAGE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x18,
        0x00,
    ];

    /// Essence container data
    pub const ESSENCE_CONTAINER_DATA: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x23,
        0x00,
    ];

    /// Material package
    pub const MATERIAL_PACKAGE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x36,
        0x00,
    ];

    /// Source package
    pub const SOURCE_PACKAGE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x37,
        0x00,
    ];

    /// Timeline track
    pub const TIMELINE_TRACK: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x3B,
        0x00,
    ];

    /// Static track (descriptive metadata)
    pub const STATIC_TRACK: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x3A,
        0x00,
    ];

    /// Sequence
    pub const SEQUENCE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x0F,
        0x00,
    ];

    /// Source clip
    pub const SOURCE_CLIP: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x11,
        0x00,
    ];

    /// DM segment
    pub const DM_SEGMENT: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x41,
        0x00,
    ];

    /// IAB essence descriptor (SMPTE ST 2067-201)
    pub const IAB_ESSENCE_DESCRIPTOR: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x7B,
        0x00,
    ];

    /// IAB soundfield label sub-descriptor
    pub const IAB_SOUNDFIELD_LABEL_SUBDESCRIPTOR: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x7C,
        0x00,
    ];

    /// Cryptographic framework (SMPTE ST 429.6)
    pub const CRYPTOGRAPHIC_FRAMEWORK: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x04, 0x01, 0x02, 0x01, 0x00,
        0x00,
    ];

    /// Cryptographic context (SMPTE ST 429.6)
    pub const CRYPTOGRAPHIC_CONTEXT: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x04, 0x01, 0x02, 0x02, 0x00,
        0x00,
    ];

    /// Text-based DM framework (SMPTE RP 2057)
    pub const TEXT_BASED_DM_FRAMEWORK: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x04, 0x01, 0x04, 0x02, 0x01,
        0x00,
    ];

    /// Generic stream text-based set (SMPTE RP 2057)
    pub const GENERIC_STREAM_TEXT_BASED_SET: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x04, 0x01, 0x04, 0x03, 0x01,
        0x00,
    ];

    // Essence element keys

    /// Encrypted essence triplet, SMPTE ST 429.6 registration
    pub const CRYPT_ESSENCE_SMPTE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x04, 0x01, 0x07, 0x0D, 0x01, 0x03, 0x01, 0x02, 0x7E, 0x01,
        0x00,
    ];

    /// Encrypted essence triplet, MXF Interop registration
    pub const CRYPT_ESSENCE_INTEROP: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x04, 0x01, 0x01, 0x0D, 0x01, 0x03, 0x01, 0x02, 0x7E, 0x01,
        0x00,
    ];

    /// IAB clip-wrapped essence element (SMPTE ST 2067-201).
    ///
    /// Byte 13 carries the element number and byte 15 the stream number;
    /// both are customized to 1 by the clip writer.
    pub const IMF_IAB_CLIP_WRAPPED_ELEMENT: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0D, 0x01, 0x03, 0x01, 0x16, 0x00, 0x0D,
        0x00,
    ];

    /// Generic stream data element (SMPTE ST 410)
    pub const GENERIC_STREAM_DATA_ELEMENT: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0D, 0x01, 0x05, 0x09, 0x01, 0x00, 0x00,
        0x00,
    ];

    // Container, coding and definition labels

    /// IMF IAB clip-wrapped essence container (SMPTE ST 2067-201)
    pub const IMF_IAB_CLIP_WRAPPED_CONTAINER: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x0D, 0x0D, 0x01, 0x03, 0x01, 0x02, 0x1D, 0x01,
        0x01,
    ];

    /// Immersive audio coding (SMPTE ST 2098-2)
    pub const IMMERSIVE_AUDIO_CODING: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x0D, 0x04, 0x02, 0x02, 0x02, 0x05, 0x00, 0x00,
        0x00,
    ];

    /// IAB soundfield MCA label dictionary entry
    pub const IAB_SOUNDFIELD: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x0D, 0x03, 0x02, 0x02, 0x21, 0x00, 0x00, 0x00,
        0x00,
    ];

    /// Sound data definition
    pub const SOUND_DATA_DEF: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x02, 0x02, 0x00, 0x00,
        0x00,
    ];

    /// Descriptive metadata data definition
    pub const DESCRIPTIVE_METADATA_DEF: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x01, 0x10, 0x00, 0x00,
        0x00,
    ];

    /// Text-based framework DM scheme label (SMPTE RP 2057)
    pub const MXF_TEXT_BASED_FRAMEWORK: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x0D, 0x0D, 0x01, 0x04, 0x01, 0x04, 0x01, 0x01,
        0x00,
    ];

    /// AES-128-CBC cipher algorithm label (SMPTE ST 429.6)
    pub const CIPHER_ALGORITHM_AES_CBC: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x07, 0x02, 0x09, 0x02, 0x01, 0x01, 0x00, 0x00,
        0x00,
    ];

    /// HMAC-SHA1 MIC algorithm label (SMPTE ST 429.6)
    pub const MIC_ALGORITHM_HMAC_SHA1: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x07, 0x02, 0x09, 0x02, 0x02, 0x01, 0x00, 0x00,
        0x00,
    ];

    /// Lookup human-readable name for a UL. Essence element keys are
    /// matched with the stream-number byte masked out.
    pub fn lookup_name(ul: &UL) -> Option<&'static str> {
        // Primer pack shares bytes 0..13 with the partition packs
        if *ul == PRIMER_PACK {
            return Some("Primer Pack");
        }

        if ul[0..13] == PARTITION_PACK_BASE[0..13] && (ul[13] >= 0x02 && ul[13] <= 0x04) {
            return Some(match (ul[13], ul[14]) {
                (0x02, _) => "Header Partition",
                (0x03, 0x11) => "Generic Stream Partition",
                (0x03, _) => "Body Partition",
                (0x04, _) => "Footer Partition",
                _ => "Partition Pack",
            });
        }

        if ul[0..13] == FILL_ITEM[0..13] {
            return Some("Fill Item");
        }

        let masked = |a: &UL, b: &UL| a[..15] == b[..15];

        if masked(ul, &CRYPT_ESSENCE_SMPTE) || masked(ul, &CRYPT_ESSENCE_INTEROP) {
            return Some("Encrypted Essence Triplet");
        }
        if masked(ul, &IMF_IAB_CLIP_WRAPPED_ELEMENT) {
            return Some("IAB Clip-Wrapped Element");
        }
        if masked(ul, &GENERIC_STREAM_DATA_ELEMENT) {
            return Some("Generic Stream Data Element");
        }

        let exact: &[(&UL, &'static str)] = &[
            (&INDEX_TABLE_SEGMENT, "Index Table Segment"),
            (&RANDOM_INDEX_PACK, "Random Index Pack"),
            (&PREFACE, "Preface"),
            (&IDENTIFICATION, "Identification"),
            (&CONTENT_STORAGE, "Content Storage"),
            (&ESSENCE_CONTAINER_DATA, "Essence Container Data"),
            (&MATERIAL_PACKAGE, "Material Package"),
            (&SOURCE_PACKAGE, "Source Package"),
            (&TIMELINE_TRACK, "Timeline Track"),
            (&STATIC_TRACK, "Static Track"),
            (&SEQUENCE, "Sequence"),
            (&SOURCE_CLIP, "Source Clip"),
            (&DM_SEGMENT, "DM Segment"),
            (&IAB_ESSENCE_DESCRIPTOR, "IAB Essence Descriptor"),
            (
                &IAB_SOUNDFIELD_LABEL_SUBDESCRIPTOR,
                "IAB Soundfield Label SubDescriptor",
            ),
            (&CRYPTOGRAPHIC_FRAMEWORK, "Cryptographic Framework"),
            (&CRYPTOGRAPHIC_CONTEXT, "Cryptographic Context"),
            (&TEXT_BASED_DM_FRAMEWORK, "Text-Based DM Framework"),
            (
                &GENERIC_STREAM_TEXT_BASED_SET,
                "Generic Stream Text-Based Set",
            ),
            (&IMF_IAB_CLIP_WRAPPED_CONTAINER, "IMF IAB Clip-Wrapped Container"),
            (&OP1A, "OP1a"),
            (&OP_ATOM_SMPTE, "OP-Atom"),
            (&OP_ATOM_INTEROP, "OP-Atom (Interop)"),
        ];

        for &(candidate, name) in exact {
            if ul == candidate {
                return Some(name);
            }
        }

        if ul[0..4] == SMPTE_PREFIX && ul[4] == 0x01 {
            return Some("Essence Element");
        }
        if ul[0..4] == SMPTE_PREFIX && ul[4] == 0x02 && ul[5] == 0x53 {
            return Some("Metadata Set");
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universal_label() {
        let ul = UniversalLabel::new(labels::PRIMER_PACK);
        assert!(ul.is_smpte());
        assert!(ul.is_primer_pack());
        assert!(!ul.is_partition_pack());
    }

    #[test]
    fn test_partition_detection() {
        let ul = UniversalLabel::new(labels::HEADER_PARTITION_CLOSED_COMPLETE);
        assert!(ul.is_partition_pack());
        assert!(!ul.is_primer_pack());

        let gsp = UniversalLabel::new(labels::GENERIC_STREAM_PARTITION);
        assert!(gsp.is_partition_pack());
    }

    #[test]
    fn test_masked_equality() {
        let mut element = labels::IMF_IAB_CLIP_WRAPPED_ELEMENT;
        element[13] = 1;
        element[15] = 1;
        let key = UniversalLabel::new(element);

        // a different stream number must still match
        let mut other = element;
        other[15] = 7;
        assert!(key.matches_ignore_stream(&other));
        assert!(!key.matches_exact(&other));

        // a different element-number byte must not
        let mut wrong = element;
        wrong[13] = 2;
        assert!(!key.matches_ignore_stream(&wrong));
    }

    #[test]
    fn test_crypt_essence_detection() {
        let mut smpte = labels::CRYPT_ESSENCE_SMPTE;
        smpte[15] = 3;
        assert!(UniversalLabel::new(smpte).is_crypt_essence());

        let interop = UniversalLabel::new(labels::CRYPT_ESSENCE_INTEROP);
        assert!(interop.is_crypt_essence());

        let plain = UniversalLabel::new(labels::IMF_IAB_CLIP_WRAPPED_ELEMENT);
        assert!(!plain.is_crypt_essence());
    }

    #[test]
    fn test_label_name_lookup() {
        assert_eq!(labels::lookup_name(&labels::PRIMER_PACK), Some("Primer Pack"));
        assert_eq!(labels::lookup_name(&labels::PREFACE), Some("Preface"));

        let mut crypt = labels::CRYPT_ESSENCE_SMPTE;
        crypt[15] = 9;
        assert_eq!(
            labels::lookup_name(&crypt),
            Some("Encrypted Essence Triplet")
        );

        assert_eq!(labels::lookup_name(&[0u8; 16]), None);
    }
}
