//! Common type definitions for AS-DCP/AS-02 files.

use std::fmt;

use uuid::Uuid;

/// Length of a UUID in bytes.
pub const UUID_LENGTH: usize = 16;

/// Rational number for edit rates and sample rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub numerator: i32,
    pub denominator: i32,
}

impl Rational {
    /// Create new rational
    pub fn new(numerator: i32, denominator: i32) -> Self {
        Rational {
            numerator,
            denominator,
        }
    }

    /// Convert to f64
    pub fn to_f64(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f64 / self.denominator as f64
        }
    }

    /// Common D-Cinema edit rate (24 fps)
    pub fn fps_24() -> Self {
        Rational::new(24, 1)
    }

    pub fn fps_25() -> Self {
        Rational::new(25, 1)
    }

    pub fn fps_23_976() -> Self {
        Rational::new(24000, 1001)
    }

    /// 48 kHz audio sample rate
    pub fn hz_48k() -> Self {
        Rational::new(48000, 1)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Rational::new(1, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Edit rate (frame cadence of the essence track)
pub type EditRate = Rational;

/// Metadata label set dialect of a file.
///
/// Legacy MXF-Interop files and SMPTE-conformant files differ in a handful
/// of registered labels and in the MIC key derivation (see [`crate::hmac`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelSet {
    /// Dialect could not be determined from the operational pattern
    #[default]
    Unknown,
    /// Pre-standard MXF Interop labels
    MxfInterop,
    /// SMPTE-registered labels
    MxfSmpte,
}

/// Per-file writer policy and identity.
///
/// Aggregates everything the essence path needs to know about a file:
/// which label dialect it uses, the asset it belongs to, and whether the
/// essence is encrypted and MIC-protected.
#[derive(Debug, Clone)]
pub struct WriterInfo {
    /// Label dialect
    pub label_set: LabelSet,
    /// Asset UUID (material number of the file package UMID)
    pub asset_uuid: [u8; UUID_LENGTH],
    /// Cryptographic context ID, present when the essence is encrypted
    pub context_id: Option<[u8; UUID_LENGTH]>,
    /// Essence KLVs are SMPTE 429.6 encrypted triplets
    pub encrypted_essence: bool,
    /// Encrypted triplets carry a MIC. Requires `encrypted_essence`.
    pub uses_hmac: bool,
    /// Company name written to the Identification set
    pub company_name: String,
    /// Product name written to the Identification set
    pub product_name: String,
    /// Product version written to the Identification set
    pub product_version: String,
}

impl Default for WriterInfo {
    fn default() -> Self {
        WriterInfo {
            label_set: LabelSet::MxfSmpte,
            asset_uuid: *Uuid::new_v4().as_bytes(),
            context_id: None,
            encrypted_essence: false,
            uses_hmac: false,
            company_name: "Transcode Contributors".into(),
            product_name: "asdcp-rs".into(),
            product_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl WriterInfo {
    /// Check the internal policy invariant: a MIC requires encryption, and
    /// encryption requires a context ID.
    pub fn is_valid(&self) -> bool {
        !(self.uses_hmac && !self.encrypted_essence)
            && !(self.encrypted_essence && self.context_id.is_none())
    }
}

/// Frame buffer with explicit capacity semantics.
///
/// The essence read path refuses to grow a caller-supplied buffer; a frame
/// larger than the buffer's capacity yields [`crate::Error::SmallBuf`].
/// The decrypt path additionally records the plaintext geometry of the
/// source triplet.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
    size: usize,
    frame_number: u32,
    source_length: usize,
    plaintext_offset: usize,
}

impl FrameBuffer {
    /// Create an empty buffer with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        FrameBuffer {
            data: vec![0; capacity],
            ..Default::default()
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid payload length in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        debug_assert!(size <= self.data.len());
        self.size = size;
    }

    /// Frame number of the most recent read.
    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    pub(crate) fn set_frame_number(&mut self, n: u32) {
        self.frame_number = n;
    }

    /// Original plaintext length of the source triplet (encrypted reads).
    pub fn source_length(&self) -> usize {
        self.source_length
    }

    pub(crate) fn set_source_length(&mut self, n: usize) {
        self.source_length = n;
    }

    /// Leading span of the frame that was never encrypted.
    pub fn plaintext_offset(&self) -> usize {
        self.plaintext_offset
    }

    pub(crate) fn set_plaintext_offset(&mut self, n: usize) {
        self.plaintext_offset = n;
    }

    /// Valid payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Whole backing store, independent of the valid length.
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// UMID (Unique Material Identifier), SMPTE ST 330 - 32 bytes
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Umid(pub [u8; 32]);

impl Umid {
    /// Create new UMID
    pub fn new(bytes: [u8; 32]) -> Self {
        Umid(bytes)
    }

    /// Create zero UMID
    pub fn zero() -> Self {
        Umid([0; 32])
    }

    /// Build a UMID whose material number is the given asset UUID.
    ///
    /// Readers recover the asset UUID from bytes 16..32 of the file
    /// package UMID, so the writer must place it there.
    pub fn from_asset_uuid(asset_uuid: &[u8; UUID_LENGTH]) -> Self {
        let mut bytes = [0u8; 32];

        // SMPTE ST 330 basic UMID label
        bytes[0..12].copy_from_slice(&[
            0x06, 0x0A, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x05, 0x01, 0x01, 0x0D, 0x20,
        ]);
        bytes[12] = 0x13; // length of remaining bytes
        bytes[13] = 0x00; // instance type

        bytes[16..32].copy_from_slice(asset_uuid);
        Umid(bytes)
    }

    /// Generate a UMID with a random material number.
    pub fn generate() -> Self {
        Umid::from_asset_uuid(Uuid::new_v4().as_bytes())
    }

    /// Check if this is a zero UMID
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Get the material number (bytes 16-31)
    pub fn material_number(&self) -> &[u8] {
        &self.0[16..32]
    }
}

impl fmt::Debug for Umid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UMID(")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

impl Default for Umid {
    fn default() -> Self {
        Umid::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational() {
        let r = Rational::fps_23_976();
        let f = r.to_f64();
        assert!((f - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_writer_info_invariant() {
        let mut info = WriterInfo::default();
        assert!(info.is_valid());

        info.uses_hmac = true;
        assert!(!info.is_valid(), "MIC without encryption must be invalid");

        info.encrypted_essence = true;
        info.context_id = Some([0u8; 16]);
        assert!(info.is_valid());
    }

    #[test]
    fn test_frame_buffer() {
        let mut buf = FrameBuffer::with_capacity(64);
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.size(), 0);

        buf.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        buf.set_size(4);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_umid_asset_uuid() {
        let uuid = [0xABu8; 16];
        let umid = Umid::from_asset_uuid(&uuid);
        assert!(!umid.is_zero());
        assert_eq!(umid.material_number(), &uuid);
    }
}
