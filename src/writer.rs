//! MXF file writer base: header/footer assembly and the frame-wrapped
//! essence writer.
//!
//! The header partition reserves a fixed metadata span padded with a fill
//! item. Finalization rewrites that span in place with the final
//! durations, the footer offset, and any object chains added while
//! writing, so nothing downstream of the header ever moves.

use std::io::{Seek, SeekFrom, Write};

use uuid::Uuid;

use crate::aes::AesEncContext;
use crate::eklv;
use crate::error::{Error, Result};
use crate::hmac::HmacContext;
use crate::index::{IndexEntry, IndexTableSegment};
use crate::metadata::{
    dyn_tags, tags, write_fill, HeaderMetadata, MetadataSet, PrimerPack,
};
use crate::partition::{Partition, PartitionKind, RandomIndexPack};
use crate::types::{Rational, Umid, WriterInfo};
use crate::ul::{labels, UL};

/// Metadata span reserved behind the header partition pack, fill-padded.
pub(crate) const HEADER_RESERVE: usize = 16 * 1024;

/// Index SID used for the footer index table.
pub(crate) const INDEX_SID: u32 = 129;

/// Body SID of the essence container.
pub(crate) const ESSENCE_SID: u32 = 1;

/// Writer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterState {
    /// No file
    #[default]
    Begin,
    /// Header and any reserved KLV written, zero frames
    Ready,
    /// At least one frame written
    Running,
}

/// Shared innards of the essence writers: the sink, the header object
/// graph, the pending index, and the partition directory.
pub(crate) struct WriterCore<W: Write + Seek> {
    pub file: W,
    pub info: WriterInfo,
    pub primer: PrimerPack,
    pub metadata: HeaderMetadata,
    pub rip: RandomIndexPack,
    pub edit_rate: Rational,
    pub index_entries: Vec<IndexEntry>,
    pub frames_written: u32,
    pub stream_offset: u64,
    pub essence_element_key: UL,
    /// Instance UIDs whose Duration item is set at finalize
    duration_updates: Vec<[u8; 16]>,
    /// Instance UID of the file (source) package
    file_package_uid: [u8; 16],
    /// Offset of the most recently written partition
    last_partition_offset: u64,
    header_pack_size: usize,
}

impl<W: Write + Seek> WriterCore<W> {
    /// Assemble the header object graph and write the header partition:
    /// pack, primer, sets, and fill out to the reserved span.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        file: W,
        info: WriterInfo,
        essence_element_key: UL,
        essence_container: UL,
        descriptor: MetadataSet,
        sub_descriptors: Vec<MetadataSet>,
        data_definition: UL,
        edit_rate: Rational,
    ) -> Result<Self> {
        if !info.is_valid() {
            return Err(Error::Fail(
                "writer info violates the encryption policy invariant".into(),
            ));
        }

        let mut core = WriterCore {
            file,
            info,
            primer: PrimerPack::new(),
            metadata: HeaderMetadata::new(),
            rip: RandomIndexPack::new(),
            edit_rate,
            index_entries: Vec::new(),
            frames_written: 0,
            stream_offset: 0,
            essence_element_key,
            duration_updates: Vec::new(),
            file_package_uid: [0; 16],
            last_partition_offset: 0,
            header_pack_size: 0,
        };

        core.build_metadata(essence_container, descriptor, sub_descriptors, data_definition)?;

        let mut header = Partition::header();
        header.operational_pattern = labels::OP1A;
        header.header_byte_count = HEADER_RESERVE as u64;
        header.add_essence_container(essence_container);
        core.header_pack_size = header.size();
        header.write(&mut core.file)?;

        let used = core.metadata.write(&mut core.file, &core.primer)?;
        write_fill(&mut core.file, used, HEADER_RESERVE)?;

        core.rip.add_entry(0, 0);
        log::debug!(
            "header written, {} of {} metadata bytes used",
            used,
            HEADER_RESERVE
        );
        Ok(core)
    }

    /// Write a body partition for the essence container and record it in
    /// the RIP. Essence KLVs follow immediately.
    pub fn write_body_partition(&mut self) -> Result<()> {
        let here = self.file.stream_position()?;

        let mut body = Partition {
            kind: PartitionKind::Body,
            ..Partition::default()
        };
        body.operational_pattern = labels::OP1A;
        body.this_partition = here;
        body.previous_partition = self.last_partition_offset;
        body.body_sid = ESSENCE_SID;
        body.write(&mut self.file)?;

        self.rip.add_entry(ESSENCE_SID, here);
        self.last_partition_offset = here;
        Ok(())
    }

    /// Append a generic stream partition with the given SID and record it
    /// in the RIP. The stream's single KLV follows immediately.
    pub fn write_generic_stream_partition(&mut self, body_sid: u32) -> Result<()> {
        let here = self.file.stream_position()?;

        let mut part = Partition::generic_stream();
        part.operational_pattern = labels::OP1A;
        part.this_partition = here;
        part.previous_partition = self.last_partition_offset;
        part.body_sid = body_sid;
        part.add_essence_container(self.essence_container());
        part.write(&mut self.file)?;

        self.rip.add_entry(body_sid, here);
        self.last_partition_offset = here;
        Ok(())
    }

    /// Write the footer partition with the index table, the RIP, and
    /// rewrite the header in place with final durations and offsets.
    pub fn write_footer(&mut self) -> Result<()> {
        // settle durations before the header rewrite
        let frames = self.frames_written as i64;
        for uid in self.duration_updates.clone() {
            if let Some(set) = self.metadata.get_by_instance_mut(&uid) {
                set.set_i64(tags::DURATION, frames);
            }
        }

        let mut segment = IndexTableSegment {
            index_edit_rate: self.edit_rate,
            index_duration: self.frames_written as i64,
            index_sid: INDEX_SID,
            body_sid: ESSENCE_SID,
            ..Default::default()
        };
        segment.index_entries = self.index_entries.clone();

        let mut index_bytes = Vec::new();
        segment.write(&mut index_bytes)?;

        let container = self.essence_container();

        let footer_offset = self.file.stream_position()?;
        let mut footer = Partition::footer();
        footer.operational_pattern = labels::OP1A;
        footer.this_partition = footer_offset;
        footer.previous_partition = self.last_partition_offset;
        footer.footer_partition = footer_offset;
        footer.index_sid = INDEX_SID;
        footer.index_byte_count = index_bytes.len() as u64;
        footer.add_essence_container(container);
        footer.write(&mut self.file)?;
        self.file.write_all(&index_bytes)?;

        self.rip.add_entry(0, footer_offset);
        self.rip.write(&mut self.file)?;

        // rewrite the header span in place with the final object graph;
        // the pack geometry is unchanged so nothing downstream moves
        self.file.seek(SeekFrom::Start(0))?;
        let mut header = Partition::header();
        header.operational_pattern = labels::OP1A;
        header.header_byte_count = HEADER_RESERVE as u64;
        header.footer_partition = footer_offset;
        header.add_essence_container(container);
        debug_assert_eq!(header.size(), self.header_pack_size);
        header.write(&mut self.file)?;

        let used = self.metadata.write(&mut self.file, &self.primer)?;
        write_fill(&mut self.file, used, HEADER_RESERVE)?;

        self.file.seek(SeekFrom::End(0))?;
        self.file.flush()?;

        log::debug!(
            "finalized: {} frames indexed, footer at {}",
            self.frames_written,
            footer_offset
        );
        Ok(())
    }

    /// The essence container label recorded in the preface.
    fn essence_container(&self) -> UL {
        self.metadata
            .get_by_type(&labels::PREFACE)
            .map(|p| p.ref_batch(tags::ESSENCE_CONTAINERS))
            .and_then(|batch| batch.first().copied())
            .unwrap_or([0u8; 16])
    }

    /// Register a descriptive-metadata chain for one generic text stream:
    /// Static Track → Sequence → DM Segment → Text-Based DM Framework →
    /// Generic Stream Text-Based Set.
    pub fn add_text_metadata_chain(
        &mut self,
        track_label: &str,
        mime_type: &str,
        data_description: &str,
        track_id: u32,
        stream_sid: u32,
    ) -> Result<()> {
        if let Some(preface) = self.metadata.get_by_type_mut(&labels::PREFACE) {
            preface.push_ref(tags::DM_SCHEMES, labels::MXF_TEXT_BASED_FRAMEWORK);
        }

        let mut track = MetadataSet::new(labels::STATIC_TRACK);
        track.set_string(tags::TRACK_NAME, track_label);
        track.set_u32(tags::TRACK_ID, track_id);
        track.set_u32(tags::TRACK_NUMBER, 0);
        let track_uid = track.instance_uid();

        let mut sequence = MetadataSet::new(labels::SEQUENCE);
        sequence.set_uuid(tags::DATA_DEFINITION, labels::DESCRIPTIVE_METADATA_DEF);
        let sequence_uid = sequence.instance_uid();
        self.duration_updates.push(sequence_uid);
        track.set_uuid(tags::TRACK_SEQUENCE, sequence_uid);

        let mut segment = MetadataSet::new(labels::DM_SEGMENT);
        segment.set_uuid(tags::DATA_DEFINITION, labels::DESCRIPTIVE_METADATA_DEF);
        segment.set_string(
            tags::EVENT_COMMENT,
            "SMPTE RP 2057 Generic Stream Text-Based Set",
        );
        let segment_uid = segment.instance_uid();
        self.duration_updates.push(segment_uid);
        sequence.set_ref_batch(tags::STRUCTURAL_COMPONENTS, &[segment_uid]);

        let mut framework = MetadataSet::new(labels::TEXT_BASED_DM_FRAMEWORK);
        let framework_uid = framework.instance_uid();
        segment.set_uuid(tags::DM_FRAMEWORK, framework_uid);

        let mut set = MetadataSet::new(labels::GENERIC_STREAM_TEXT_BASED_SET);
        set.set_string(dyn_tags::TEXT_DATA_DESCRIPTION, data_description);
        set.set_uuid(dyn_tags::PAYLOAD_SCHEME_ID, labels::MXF_TEXT_BASED_FRAMEWORK);
        set.set_string(dyn_tags::TEXT_MIME_MEDIA_TYPE, mime_type);
        set.set_string(dyn_tags::TEXT_LANGUAGE_CODE, "en");
        set.set_u32(dyn_tags::GENERIC_STREAM_SID, stream_sid);
        framework.set_uuid(dyn_tags::OBJECT_REF, set.instance_uid());

        let fp_uid = self.file_package_uid;
        if let Some(package) = self.metadata.get_by_instance_mut(&fp_uid) {
            package.push_ref(tags::PACKAGE_TRACKS, track_uid);
        }

        self.metadata.add_child(track);
        self.metadata.add_child(sequence);
        self.metadata.add_child(segment);
        self.metadata.add_child(framework);
        self.metadata.add_child(set);
        Ok(())
    }

    /// Build the header object graph for a single-track file.
    fn build_metadata(
        &mut self,
        essence_container: UL,
        mut descriptor: MetadataSet,
        sub_descriptors: Vec<MetadataSet>,
        data_definition: UL,
    ) -> Result<()> {
        let mut preface = MetadataSet::new(labels::PREFACE);
        preface.set(tags::VERSION, 0x0103u16.to_be_bytes().to_vec());
        preface.set_uuid(tags::OPERATIONAL_PATTERN, labels::OP1A);
        preface.set_ref_batch(tags::ESSENCE_CONTAINERS, &[essence_container]);
        preface.set(
            tags::LAST_MODIFIED_DATE,
            vec![0x07, 0xE8, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00],
        );

        let mut identification = MetadataSet::new(labels::IDENTIFICATION);
        identification.set_string(tags::COMPANY_NAME, &self.info.company_name);
        identification.set_string(tags::PRODUCT_NAME, &self.info.product_name);
        identification.set_string(tags::VERSION_STRING, &self.info.product_version);
        identification.set_uuid(tags::THIS_GENERATION_UID, *Uuid::new_v4().as_bytes());
        identification.set_uuid(tags::PRODUCT_UID, *Uuid::new_v4().as_bytes());
        preface.set_ref_batch(tags::IDENTIFICATIONS, &[identification.instance_uid()]);

        let mut content_storage = MetadataSet::new(labels::CONTENT_STORAGE);
        preface.set_uuid(tags::CONTENT_STORAGE, content_storage.instance_uid());

        // material package: one timeline track pointing at the file package
        let file_package_umid = Umid::from_asset_uuid(&self.info.asset_uuid);

        let mut material_package = MetadataSet::new(labels::MATERIAL_PACKAGE);
        material_package.set_umid(tags::PACKAGE_UID, &Umid::generate());
        material_package.set_string(tags::PACKAGE_NAME, "Material Package");
        let (mp_track, mp_sequence, mp_clip) = self.build_track(
            1,
            0,
            data_definition,
            Some((&file_package_umid, 2)),
        );
        material_package.set_ref_batch(tags::PACKAGE_TRACKS, &[mp_track.instance_uid()]);

        // file (source) package: the essence track and the descriptor
        let mut file_package = MetadataSet::new(labels::SOURCE_PACKAGE);
        file_package.set_umid(tags::PACKAGE_UID, &file_package_umid);
        file_package.set_string(tags::PACKAGE_NAME, "File Package");
        let (fp_track, fp_sequence, fp_clip) =
            self.build_track(2, 0x01000001, data_definition, None);
        file_package.set_ref_batch(tags::PACKAGE_TRACKS, &[fp_track.instance_uid()]);
        self.file_package_uid = file_package.instance_uid();

        // descriptor chain
        descriptor.set_u32(tags::LINKED_TRACK_ID, 2);
        descriptor.set_uuid(tags::ESSENCE_CONTAINER, essence_container);
        if !sub_descriptors.is_empty() {
            let refs: Vec<[u8; 16]> = sub_descriptors.iter().map(|s| s.instance_uid()).collect();
            descriptor.set_ref_batch(dyn_tags::SUB_DESCRIPTORS, &refs);
        }
        file_package.set_uuid(tags::PACKAGE_DESCRIPTOR, descriptor.instance_uid());

        let mut ecd = MetadataSet::new(labels::ESSENCE_CONTAINER_DATA);
        ecd.set_umid(tags::LINKED_PACKAGE_UID, &file_package_umid);
        ecd.set_u32(tags::INDEX_SID, INDEX_SID);
        ecd.set_u32(tags::BODY_SID, ESSENCE_SID);

        content_storage.set_ref_batch(
            tags::PACKAGES,
            &[material_package.instance_uid(), file_package.instance_uid()],
        );
        content_storage.set_ref_batch(tags::ESSENCE_CONTAINER_DATA, &[ecd.instance_uid()]);

        self.metadata.add_child(preface);
        self.metadata.add_child(identification);
        self.metadata.add_child(content_storage);
        self.metadata.add_child(material_package);
        self.metadata.add_child(mp_track);
        self.metadata.add_child(mp_sequence);
        self.metadata.add_child(mp_clip);
        self.metadata.add_child(file_package);
        self.metadata.add_child(fp_track);
        self.metadata.add_child(fp_sequence);
        self.metadata.add_child(fp_clip);
        self.metadata.add_child(descriptor);
        for sub in sub_descriptors {
            self.metadata.add_child(sub);
        }

        if self.info.encrypted_essence {
            self.add_cryptographic_context(essence_container)?;
        }

        Ok(())
    }

    /// Build one timeline track with its sequence and source clip.
    fn build_track(
        &mut self,
        track_id: u32,
        track_number: u32,
        data_definition: UL,
        source: Option<(&Umid, u32)>,
    ) -> (MetadataSet, MetadataSet, MetadataSet) {
        let mut track = MetadataSet::new(labels::TIMELINE_TRACK);
        track.set_u32(tags::TRACK_ID, track_id);
        track.set_u32(tags::TRACK_NUMBER, track_number);
        let mut rate = Vec::with_capacity(8);
        rate.extend_from_slice(&self.edit_rate.numerator.to_be_bytes());
        rate.extend_from_slice(&self.edit_rate.denominator.to_be_bytes());
        track.set(tags::EDIT_RATE, rate);
        track.set_i64(tags::ORIGIN, 0);

        let mut sequence = MetadataSet::new(labels::SEQUENCE);
        sequence.set_uuid(tags::DATA_DEFINITION, data_definition);
        track.set_uuid(tags::TRACK_SEQUENCE, sequence.instance_uid());
        self.duration_updates.push(sequence.instance_uid());

        let mut clip = MetadataSet::new(labels::SOURCE_CLIP);
        clip.set_uuid(tags::DATA_DEFINITION, data_definition);
        clip.set_i64(tags::START_POSITION, 0);
        match source {
            Some((package_umid, source_track)) => {
                clip.set_umid(tags::SOURCE_PACKAGE_ID, package_umid);
                clip.set_u32(tags::SOURCE_TRACK_ID, source_track);
            }
            None => {
                clip.set_umid(tags::SOURCE_PACKAGE_ID, &Umid::zero());
                clip.set_u32(tags::SOURCE_TRACK_ID, 0);
            }
        }
        self.duration_updates.push(clip.instance_uid());
        sequence.set_ref_batch(tags::STRUCTURAL_COMPONENTS, &[clip.instance_uid()]);

        (track, sequence, clip)
    }

    /// Register the ST 429.6 cryptographic framework and context sets.
    fn add_cryptographic_context(&mut self, essence_container: UL) -> Result<()> {
        let context_id = self.info.context_id.ok_or(Error::Init)?;

        let mut context = MetadataSet::new(labels::CRYPTOGRAPHIC_CONTEXT);
        context.set_uuid(dyn_tags::CONTEXT_ID, context_id);
        context.set_uuid(dyn_tags::SOURCE_ESSENCE_CONTAINER, essence_container);
        context.set_uuid(dyn_tags::CIPHER_ALGORITHM, labels::CIPHER_ALGORITHM_AES_CBC);
        let mic = if self.info.uses_hmac {
            labels::MIC_ALGORITHM_HMAC_SHA1
        } else {
            [0u8; 16]
        };
        context.set_uuid(dyn_tags::MIC_ALGORITHM, mic);
        context.set_uuid(dyn_tags::CRYPTOGRAPHIC_KEY_ID, [0u8; 16]);

        let mut framework = MetadataSet::new(labels::CRYPTOGRAPHIC_FRAMEWORK);
        framework.set_uuid(dyn_tags::CONTEXT_SR, context.instance_uid());

        if let Some(preface) = self.metadata.get_by_type_mut(&labels::PREFACE) {
            preface.push_ref(tags::DM_SCHEMES, labels::CRYPTOGRAPHIC_FRAMEWORK);
        }

        self.metadata.add_child(framework);
        self.metadata.add_child(context);
        Ok(())
    }
}

/// Frame-wrapped essence writer: one (E)KLV packet and one index entry
/// per frame.
pub struct FrameWriter<W: Write + Seek> {
    state: WriterState,
    core: Option<WriterCore<W>>,
}

impl<W: Write + Seek> Default for FrameWriter<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Seek> FrameWriter<W> {
    /// New writer in the `Begin` state.
    pub fn new() -> Self {
        FrameWriter {
            state: WriterState::Begin,
            core: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Write the header and body partitions and become `Ready`.
    #[allow(clippy::too_many_arguments)]
    pub fn open_write(
        &mut self,
        sink: W,
        info: &WriterInfo,
        essence_element_key: UL,
        essence_container: UL,
        descriptor: MetadataSet,
        edit_rate: Rational,
    ) -> Result<()> {
        if self.state != WriterState::Begin {
            return Err(Error::State);
        }

        let open = || -> Result<WriterCore<W>> {
            let mut core = WriterCore::open(
                sink,
                info.clone(),
                essence_element_key,
                essence_container,
                descriptor,
                Vec::new(),
                labels::SOUND_DATA_DEF,
                edit_rate,
            )?;
            core.write_body_partition()?;
            Ok(core)
        };

        match open() {
            Ok(core) => {
                self.core = Some(core);
                self.state = WriterState::Ready;
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Write one frame as a plaintext KLV or an encrypted triplet, and
    /// push its index entry.
    pub fn write_frame(
        &mut self,
        frame: &[u8],
        enc: Option<&mut AesEncContext>,
        hmac: Option<&mut HmacContext>,
    ) -> Result<()> {
        if self.state == WriterState::Begin {
            return Err(Error::Init);
        }
        let core = self.core.as_mut().ok_or(Error::Init)?;

        core.index_entries.push(IndexEntry::at(core.stream_offset));

        let frame_number = core.frames_written;
        let key = core.essence_element_key;
        let written = match eklv::write_eklv_packet(
            &mut core.file,
            &core.info,
            frame,
            frame_number,
            &key,
            0,
            enc,
            hmac,
        ) {
            Ok(n) => n,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        let core = self.core.as_mut().expect("core outlives the write");
        core.stream_offset += written;
        core.frames_written += 1;
        self.state = WriterState::Running;
        Ok(())
    }

    /// Write the footer, the index, and the RIP, then return to `Begin`.
    pub fn finalize(&mut self) -> Result<()> {
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

    /// Frames written so far.
    pub fn frames_written(&self) -> u32 {
        self.core.as_ref().map_or(0, |c| c.frames_written)
    }

    /// Drop any in-flight file and collapse to `Begin`.
    pub fn reset(&mut self) {
        self.core = None;
        self.state = WriterState::Begin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sound_descriptor() -> MetadataSet {
        let mut desc = MetadataSet::new(labels::IAB_ESSENCE_DESCRIPTOR);
        desc.set_u32(tags::CHANNEL_COUNT, 0);
        desc.set_u32(tags::QUANTIZATION_BITS, 24);
        desc
    }

    fn element_key() -> UL {
        let mut key = labels::IMF_IAB_CLIP_WRAPPED_ELEMENT;
        key[13] = 1;
        key[15] = 1;
        key
    }

    #[test]
    fn test_state_machine() {
        let mut writer: FrameWriter<Cursor<Vec<u8>>> = FrameWriter::new();
        assert_eq!(writer.state(), WriterState::Begin);

        // write before open is a lifecycle error
        assert!(matches!(
            writer.write_frame(&[0u8; 4], None, None),
            Err(Error::Init)
        ));
        assert!(matches!(writer.finalize(), Err(Error::Init)));

        writer
            .open_write(
                Cursor::new(Vec::new()),
                &WriterInfo::default(),
                element_key(),
                labels::IMF_IAB_CLIP_WRAPPED_CONTAINER,
                sound_descriptor(),
                Rational::fps_24(),
            )
            .unwrap();
        assert_eq!(writer.state(), WriterState::Ready);

        // double open is a state error
        assert!(matches!(
            writer.open_write(
                Cursor::new(Vec::new()),
                &WriterInfo::default(),
                element_key(),
                labels::IMF_IAB_CLIP_WRAPPED_CONTAINER,
                sound_descriptor(),
                Rational::fps_24(),
            ),
            Err(Error::State)
        ));

        writer.write_frame(&[0, 1, 2, 3], None, None).unwrap();
        assert_eq!(writer.state(), WriterState::Running);
        assert_eq!(writer.frames_written(), 1);

        writer.finalize().unwrap();
        assert_eq!(writer.state(), WriterState::Begin);
    }

    #[test]
    fn test_invalid_info_rejected() {
        let info = WriterInfo {
            uses_hmac: true,
            encrypted_essence: false,
            ..Default::default()
        };
        let mut writer = FrameWriter::new();
        assert!(writer
            .open_write(
                Cursor::new(Vec::new()),
                &info,
                element_key(),
                labels::IMF_IAB_CLIP_WRAPPED_CONTAINER,
                sound_descriptor(),
                Rational::fps_24(),
            )
            .is_err());
        assert_eq!(writer.state(), WriterState::Begin);
    }
}
