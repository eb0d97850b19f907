//! AS-02 clip-wrapped IAB essence (SMPTE ST 2067-201).
//!
//! The writer drives a three-state lifecycle around a single clip-wrapped
//! essence KLV: `open_write` reserves a 24-byte key/length at the start of
//! the clip, `write_frame` streams the payload and indexes each frame,
//! and `finalize_clip` back-patches the reserved 8-byte BER with the true
//! value length. Any failure mid-flight resets the writer to `Begin` and
//! releases the file.
//!
//! Inside the clip, every frame is a preamble TLV followed by a frame
//! TLV: a one-byte tag and a 32-bit big-endian length each. The reader
//! hands back the exact concatenation and caches the most recent frame.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use uuid::Uuid;

use crate::aes::AesEncContext;
use crate::eklv;
use crate::error::{Error, Result};
use crate::hmac::HmacContext;
use crate::klv::{self, CLIP_BER_LENGTH};
use crate::metadata::{dyn_tags, tags, MetadataSet};
use crate::reader::MxfReader;
use crate::types::{FrameBuffer, Rational, WriterInfo};
use crate::ul::{labels, SMPTE_UL_LENGTH, UL};
use crate::writer::{WriterCore, WriterState};

/// Combined size of the clip's reserved key and length.
const RESERVED_KL_SIZE: u64 = (SMPTE_UL_LENGTH + CLIP_BER_LENGTH) as u64;

/// Byte length of a preamble or frame tag/length pair.
const TL_SIZE: usize = 5;

/// The IAB clip-wrapped element key with its customization bytes set:
/// element number (index 13) and stream number (index 15) are both 1.
pub fn iab_element_key() -> UL {
    let mut key = labels::IMF_IAB_CLIP_WRAPPED_ELEMENT;
    key[13] = 1;
    key[15] = 1;
    key
}

/// Caller-supplied fields of the IAB soundfield label sub-descriptor.
///
/// The writer owns the MCA tag fields: name and symbol are fixed to
/// "IAB" and the link ID is generated per file.
#[derive(Debug, Clone, Default)]
pub struct IabSoundfieldLabel {
    /// RFC 5646 spoken language tag, when known
    pub spoken_language: Option<String>,
}

impl IabSoundfieldLabel {
    fn into_set(self) -> MetadataSet {
        let mut set = MetadataSet::new(labels::IAB_SOUNDFIELD_LABEL_SUBDESCRIPTOR);
        set.set_string(dyn_tags::MCA_TAG_NAME, "IAB");
        set.set_string(dyn_tags::MCA_TAG_SYMBOL, "IAB");
        set.set_uuid(dyn_tags::MCA_LABEL_DICTIONARY_ID, labels::IAB_SOUNDFIELD);
        set.set_uuid(dyn_tags::MCA_LINK_ID, *Uuid::new_v4().as_bytes());
        if let Some(lang) = self.spoken_language {
            set.set_string(dyn_tags::TEXT_LANGUAGE_CODE, &lang);
        }
        set
    }
}

/// Clip-wrapped IAB essence writer.
pub struct IabWriter<W: Write + Seek> {
    state: WriterState,
    core: Option<WriterCore<W>>,
    clip_start: u64,
    generic_stream_id: u32,
    next_track_id: u32,
}

impl IabWriter<File> {
    /// Create a file at `path` and open it for clip writing.
    pub fn open_write_path(
        path: impl AsRef<Path>,
        info: &WriterInfo,
        sub_descriptor: IabSoundfieldLabel,
        conforms_to: &[UL],
        edit_rate: Rational,
        sample_rate: Rational,
    ) -> Result<Self> {
        let mut writer = Self::new();
        writer.open_write(
            File::create(path)?,
            info,
            sub_descriptor,
            conforms_to,
            edit_rate,
            sample_rate,
        )?;
        Ok(writer)
    }
}

impl<W: Write + Seek> Default for IabWriter<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Seek> IabWriter<W> {
    /// New writer in the `Begin` state.
    pub fn new() -> Self {
        IabWriter {
            state: WriterState::Begin,
            core: None,
            clip_start: 0,
            generic_stream_id: 2,
            next_track_id: 3,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Write the header and reserve the clip KL. `Begin` → `Ready`.
    pub fn open_write(
        &mut self,
        sink: W,
        info: &WriterInfo,
        sub_descriptor: IabSoundfieldLabel,
        conforms_to: &[UL],
        edit_rate: Rational,
        sample_rate: Rational,
    ) -> Result<()> {
        if self.state != WriterState::Begin {
            return Err(Error::State);
        }

        match self.try_open(sink, info, sub_descriptor, conforms_to, edit_rate, sample_rate) {
            Ok(()) => {
                self.state = WriterState::Ready;
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn try_open(
        &mut self,
        sink: W,
        info: &WriterInfo,
        sub_descriptor: IabSoundfieldLabel,
        conforms_to: &[UL],
        edit_rate: Rational,
        sample_rate: Rational,
    ) -> Result<()> {
        let mut descriptor = MetadataSet::new(labels::IAB_ESSENCE_DESCRIPTOR);
        let mut rate = Vec::with_capacity(8);
        rate.extend_from_slice(&edit_rate.numerator.to_be_bytes());
        rate.extend_from_slice(&edit_rate.denominator.to_be_bytes());
        descriptor.set(tags::SAMPLE_RATE, rate);
        let mut audio_rate = Vec::with_capacity(8);
        audio_rate.extend_from_slice(&sample_rate.numerator.to_be_bytes());
        audio_rate.extend_from_slice(&sample_rate.denominator.to_be_bytes());
        descriptor.set(tags::AUDIO_SAMPLING_RATE, audio_rate);
        descriptor.set_u32(tags::CHANNEL_COUNT, 0);
        descriptor.set_u32(tags::QUANTIZATION_BITS, 24);
        descriptor.set_uuid(tags::SOUND_ESSENCE_CODING, labels::IMMERSIVE_AUDIO_CODING);

        let mut core = WriterCore::open(
            sink,
            info.clone(),
            iab_element_key(),
            labels::IMF_IAB_CLIP_WRAPPED_CONTAINER,
            descriptor,
            vec![sub_descriptor.into_set()],
            labels::SOUND_DATA_DEF,
            edit_rate,
        )?;

        if !conforms_to.is_empty() {
            if let Some(preface) = core.metadata.get_by_type_mut(&labels::PREFACE) {
                preface.set_ref_batch(dyn_tags::CONFORMS_TO, conforms_to);
            }
        }

        core.write_body_partition()?;

        // reserve the clip KL; the length is back-patched on finalize
        self.clip_start = core.file.stream_position()?;
        klv::write_kl(&mut core.file, &core.essence_element_key, 0, CLIP_BER_LENGTH)?;
        core.stream_offset = RESERVED_KL_SIZE;

        self.core = Some(core);
        Ok(())
    }

    /// Append one IAB frame to the clip and index it. `Ready`/`Running`
    /// → `Running`.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if self.state == WriterState::Begin {
            return Err(Error::Init);
        }
        let core = self.core.as_mut().ok_or(Error::Init)?;

        core.index_entries
            .push(crate::index::IndexEntry::at(core.stream_offset));

        if let Err(e) = core.file.write_all(frame) {
            self.reset();
            return Err(e.into());
        }

        core.frames_written += 1;
        core.stream_offset += frame.len() as u64;
        self.state = WriterState::Running;
        Ok(())
    }

    /// Back-patch the clip's BER length with the streamed value size.
    pub fn finalize_clip(&mut self) -> Result<()> {
        if self.state == WriterState::Begin {
            return Err(Error::Init);
        }

        let result = (|| -> Result<()> {
            let core = self.core.as_mut().ok_or(Error::Init)?;
            let here = core.file.stream_position()?;

            core.file
                .seek(SeekFrom::Start(self.clip_start + SMPTE_UL_LENGTH as u64))?;
            let ber = klv::encode_ber(core.stream_offset - RESERVED_KL_SIZE, CLIP_BER_LENGTH)?;
            core.file.write_all(&ber)?;

            core.file.seek(SeekFrom::Start(here))?;
            Ok(())
        })();

        if result.is_err() {
            self.reset();
        }
        result
    }

    /// Write the footer index, the footer partition and the RIP, then
    /// return to `Begin`.
    pub fn finalize_mxf(&mut self) -> Result<()> {
        if self.state == WriterState::Begin {
            return Err(Error::Init);
        }
        let result = self
            .core
            .as_mut()
            .ok_or(Error::Init)
            .and_then(|core| core.write_footer());
        self.reset();
        result
    }

    /// Append a generic stream partition carrying `payload` and register
    /// the RP 2057 object chain that lets readers find it by
    /// `data_description`.
    ///
    /// When the file policy is encrypted and a cipher context is
    /// supplied, the payload is wrapped in an encrypted triplet;
    /// otherwise it goes out as a plain KLV.
    pub fn write_metadata(
        &mut self,
        track_label: &str,
        mime_type: &str,
        data_description: &str,
        payload: &[u8],
        enc: Option<&mut AesEncContext>,
        hmac: Option<&mut HmacContext>,
    ) -> Result<()> {
        if self.state == WriterState::Begin {
            return Err(Error::Init);
        }

        let sid = self.generic_stream_id;
        let track_id = self.next_track_id;

        let result = (|| -> Result<()> {
            let core = self.core.as_mut().ok_or(Error::Init)?;

            core.add_text_metadata_chain(track_label, mime_type, data_description, track_id, sid)?;
            core.write_generic_stream_partition(sid)?;

            // without a cipher context the stream falls back to plaintext
            let plain_info;
            let info = if enc.is_some() {
                &core.info
            } else {
                plain_info = WriterInfo {
                    encrypted_essence: false,
                    uses_hmac: false,
                    ..core.info.clone()
                };
                &plain_info
            };

            let frame_number = core.frames_written;
            eklv::write_eklv_packet(
                &mut core.file,
                info,
                payload,
                frame_number,
                &labels::GENERIC_STREAM_DATA_ELEMENT,
                0,
                enc,
                hmac,
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.generic_stream_id += 1;
                self.next_track_id += 1;
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u32 {
        self.core.as_ref().map_or(0, |c| c.frames_written)
    }

    /// Drop any in-flight file and collapse to `Begin`.
    pub fn reset(&mut self) {
        self.core = None;
        self.clip_start = 0;
        self.generic_stream_id = 2;
        self.next_track_id = 3;
        self.state = WriterState::Begin;
    }
}

/// Check that a buffer is exactly a preamble TLV followed by a frame
/// TLV: a one-byte tag and a 32-bit big-endian length each.
fn tlv_pair_tiles(buffer: &[u8]) -> bool {
    let mut offset = 0usize;
    for _ in 0..2 {
        if buffer.len() - offset < TL_SIZE {
            return false;
        }
        let len = u32::from_be_bytes(
            buffer[offset + 1..offset + TL_SIZE]
                .try_into()
                .expect("span is 4 bytes"),
        ) as usize;
        offset = match offset.checked_add(TL_SIZE + len) {
            Some(n) if n <= buffer.len() => n,
            _ => return false,
        };
    }
    offset == buffer.len()
}

/// Reader lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ReaderState {
    #[default]
    Begin,
    Ready,
    Running,
}

/// Clip-wrapped IAB essence reader.
pub struct IabReader<R: Read + Seek> {
    state: ReaderState,
    reader: Option<MxfReader<R>>,
    clip_value_length: u64,
    current_frame_index: Option<u32>,
    current_frame: Vec<u8>,
}

impl IabReader<File> {
    /// Open a file by path.
    pub fn open_read_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = Self::new();
        reader.open_read(File::open(path)?)?;
        Ok(reader)
    }
}

impl<R: Read + Seek> Default for IabReader<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Read + Seek> IabReader<R> {
    /// New reader in the closed state.
    pub fn new() -> Self {
        IabReader {
            state: ReaderState::Begin,
            reader: None,
            clip_value_length: 0,
            current_frame_index: None,
            current_frame: Vec::new(),
        }
    }

    /// Load the file structure and verify it is an IAB track file.
    pub fn open_read(&mut self, source: R) -> Result<()> {
        if self.state != ReaderState::Begin {
            return Err(Error::State);
        }

        match self.try_open(source) {
            Ok(()) => {
                self.current_frame_index = None;
                self.state = ReaderState::Ready;
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn try_open(&mut self, source: R) -> Result<()> {
        let mut reader = MxfReader::open_read(source)?;
        reader.load_index()?;

        let metadata = reader.header_metadata();
        let descriptors = metadata
            .get_all_by_type(&labels::IAB_ESSENCE_DESCRIPTOR)
            .count();
        if descriptors != 1 {
            return Err(Error::format(format!(
                "expected one IAB essence descriptor, found {}",
                descriptors
            )));
        }
        if metadata
            .get_all_by_type(&labels::IAB_SOUNDFIELD_LABEL_SUBDESCRIPTOR)
            .next()
            .is_none()
        {
            return Err(Error::format("missing IAB soundfield label sub-descriptor"));
        }
        if metadata.get_all_by_type(&labels::TIMELINE_TRACK).next().is_none() {
            return Err(Error::format("file carries no tracks"));
        }

        // the clip KL sits at the essence start; its value length bounds
        // the last frame's extent
        let essence_start = reader.essence_start();
        let file = reader.file_mut();
        file.seek(SeekFrom::Start(essence_start))?;
        let (key, value_length, _) = klv::read_key_and_length(file)?;
        if !key.matches_ignore_stream(&iab_element_key()) && !key.is_crypt_essence() {
            log::warn!("unexpected essence UL found: {}", key);
            return Err(Error::format(format!("unexpected essence UL: {}", key)));
        }

        self.clip_value_length = value_length;
        self.reader = Some(reader);
        Ok(())
    }

    /// Close the file. Fails with [`Error::Init`] when nothing is open.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ReaderState::Begin {
            return Err(Error::Init);
        }
        self.reset();
        Ok(())
    }

    /// Number of indexed frames.
    pub fn frame_count(&self) -> Result<u32> {
        let reader = self.reader.as_ref().ok_or(Error::Init)?;
        Ok(reader.frame_count())
    }

    /// The file's writer policy.
    pub fn fill_writer_info(&self) -> Result<WriterInfo> {
        let reader = self.reader.as_ref().ok_or(Error::Init)?;
        Ok(reader.info().clone())
    }

    /// The header's interchange-object store.
    pub fn header_metadata(&self) -> Result<&crate::metadata::HeaderMetadata> {
        let reader = self.reader.as_ref().ok_or(Error::Init)?;
        Ok(reader.header_metadata())
    }

    /// Read one IAB frame: the concatenated preamble TLV and frame TLV.
    ///
    /// The most recent frame is cached; re-reading the same frame number
    /// returns the cache without touching the file. Any short read is
    /// fatal and resets the reader.
    pub fn read_frame(&mut self, frame_number: u32) -> Result<&[u8]> {
        if self.state == ReaderState::Begin {
            return Err(Error::Init);
        }

        if self.current_frame_index != Some(frame_number) {
            if let Err(e) = self.fetch_frame(frame_number) {
                if !matches!(e, Error::Range(_)) {
                    self.reset();
                }
                return Err(e);
            }
            self.current_frame_index = Some(frame_number);
        }

        self.state = ReaderState::Running;
        Ok(&self.current_frame)
    }

    /// Read the frame's full indexed extent: up to the next index entry,
    /// or to the end of the clip value for the last frame. For
    /// well-formed IAB essence this is exactly the preamble TLV followed
    /// by the frame TLV, and it preserves arbitrary payloads byte-exact.
    fn fetch_frame(&mut self, frame_number: u32) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(Error::Init)?;

        let entry = reader.index().lookup(frame_number).map_err(|e| {
            log::error!("frame value out of range: {}", frame_number);
            e
        })?;

        let extent_end = match reader.index().lookup(frame_number + 1) {
            Ok(next) => next.stream_offset,
            Err(_) => RESERVED_KL_SIZE + self.clip_value_length,
        };
        if extent_end <= entry.stream_offset {
            return Err(Error::format("index entries are not monotonic"));
        }
        let extent = (extent_end - entry.stream_offset) as usize;

        // stream offsets are relative to the clip KL, which begins at the
        // essence start
        let position = reader.essence_start() + entry.stream_offset;
        let file = reader.file_mut();
        file.seek(SeekFrom::Start(position))?;

        let mut buffer = std::mem::take(&mut self.current_frame);
        buffer.resize(extent, 0);
        file.read_exact(&mut buffer)?;

        // a well-formed frame tiles its extent as preamble TLV + frame TLV
        if !tlv_pair_tiles(&buffer) {
            log::debug!(
                "frame {} is not a preamble/frame TLV pair ({} bytes)",
                frame_number,
                extent
            );
        }

        self.current_frame = buffer;
        Ok(())
    }

    /// Locate a generic stream by its text data description and copy its
    /// payload into `out_buf`. Returns the stream's MIME type.
    pub fn read_metadata(&mut self, description: &str, out_buf: &mut FrameBuffer) -> Result<String> {
        let reader = self.reader.as_mut().ok_or(Error::Init)?;

        let mut target: Option<(u32, String)> = None;
        for set in reader
            .header_metadata()
            .get_all_by_type(&labels::GENERIC_STREAM_TEXT_BASED_SET)
        {
            if set.string(dyn_tags::TEXT_DATA_DESCRIPTION).as_deref() == Some(description) {
                let sid = set
                    .u32(dyn_tags::GENERIC_STREAM_SID)
                    .ok_or_else(|| Error::format("text-based set has no stream SID"))?;
                let mime = set.string(dyn_tags::TEXT_MIME_MEDIA_TYPE).unwrap_or_default();
                target = Some((sid, mime));
                break;
            }
        }

        let (sid, mime) = target.ok_or_else(|| {
            Error::format(format!("no generic stream described as \"{}\"", description))
        })?;

        let offset = reader
            .rip()
            .find(sid)
            .ok_or_else(|| Error::format(format!("no RIP entry for stream SID {}", sid)))?
            .byte_offset;

        let file = reader.file_mut();
        file.seek(SeekFrom::Start(offset))?;
        crate::partition::Partition::read_from(file)?;

        let (key, length, _) = klv::read_key_and_length(file)?;
        if !key.is_essence() && !key.is_crypt_essence() {
            return Err(Error::format(format!(
                "generic stream partition holds {}",
                key
            )));
        }

        if (out_buf.capacity() as u64) < length {
            return Err(Error::SmallBuf {
                needed: length as usize,
                available: out_buf.capacity(),
            });
        }
        file.read_exact(&mut out_buf.data_mut()[..length as usize])?;
        out_buf.set_size(length as usize);

        Ok(mime)
    }

    /// Drop the file and all cached state.
    pub fn reset(&mut self) {
        self.reader = None;
        self.current_frame_index = None;
        self.current_frame.clear();
        self.state = ReaderState::Begin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ul::UniversalLabel;

    #[test]
    fn test_element_key_customization() {
        let key = iab_element_key();
        assert_eq!(key[13], 1);
        assert_eq!(key[15], 1);
        assert_eq!(&key[..13], &labels::IMF_IAB_CLIP_WRAPPED_ELEMENT[..13]);

        // a different stream number still matches the customized key
        let mut other_stream = key;
        other_stream[15] = 4;
        assert!(UniversalLabel::new(other_stream).matches_ignore_stream(&key));
    }

    #[test]
    fn test_tlv_pair_tiling() {
        // preamble TLV (2-byte payload) + frame TLV (3-byte payload)
        let well_formed = [
            0x01, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB, 0x02, 0x00, 0x00, 0x00, 0x03, 0xCC, 0xDD,
            0xEE,
        ];
        assert!(tlv_pair_tiles(&well_formed));

        // arbitrary payloads do not tile, and must not panic
        assert!(!tlv_pair_tiles(&[0x00, 0x01, 0x02, 0x03]));
        assert!(!tlv_pair_tiles(&[]));
        assert!(!tlv_pair_tiles(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]));
    }

    #[test]
    fn test_soundfield_label_set() {
        let set = IabSoundfieldLabel {
            spoken_language: Some("en".into()),
        }
        .into_set();
        assert_eq!(set.string(dyn_tags::MCA_TAG_NAME).as_deref(), Some("IAB"));
        assert_eq!(set.string(dyn_tags::MCA_TAG_SYMBOL).as_deref(), Some("IAB"));
        assert_eq!(
            set.uuid(dyn_tags::MCA_LABEL_DICTIONARY_ID),
            Some(labels::IAB_SOUNDFIELD)
        );
        assert_ne!(set.uuid(dyn_tags::MCA_LINK_ID), Some([0u8; 16]));
    }

    #[test]
    fn test_reader_lifecycle_errors() {
        let mut reader: IabReader<std::io::Cursor<Vec<u8>>> = IabReader::new();
        assert!(matches!(reader.read_frame(0), Err(Error::Init)));
        assert!(matches!(reader.frame_count(), Err(Error::Init)));
        assert!(matches!(reader.close(), Err(Error::Init)));
    }

    #[test]
    fn test_writer_lifecycle_errors() {
        let mut writer: IabWriter<std::io::Cursor<Vec<u8>>> = IabWriter::new();
        assert!(matches!(writer.write_frame(&[0u8; 4]), Err(Error::Init)));
        assert!(matches!(writer.finalize_clip(), Err(Error::Init)));
        assert!(matches!(writer.finalize_mxf(), Err(Error::Init)));
    }

    #[test]
    fn test_writer_state_machine() {
        use std::io::Cursor;

        let mut writer: IabWriter<Cursor<Vec<u8>>> = IabWriter::new();
        writer
            .open_write(
                Cursor::new(Vec::new()),
                &WriterInfo::default(),
                IabSoundfieldLabel::default(),
                &[],
                Rational::fps_24(),
                Rational::hz_48k(),
            )
            .unwrap();
        assert_eq!(writer.state(), WriterState::Ready);

        // double open is a state error, and leaves the writer open
        assert!(matches!(
            writer.open_write(
                Cursor::new(Vec::new()),
                &WriterInfo::default(),
                IabSoundfieldLabel::default(),
                &[],
                Rational::fps_24(),
                Rational::hz_48k(),
            ),
            Err(Error::State)
        ));
        assert_eq!(writer.state(), WriterState::Ready);

        writer.write_frame(&[1, 2, 3]).unwrap();
        assert_eq!(writer.state(), WriterState::Running);
        assert_eq!(writer.frames_written(), 1);

        writer.finalize_clip().unwrap();
        writer.finalize_mxf().unwrap();
        assert_eq!(writer.state(), WriterState::Begin);
    }
}
