//! MXF file reader base: partition/index loading and per-frame reads.
//!
//! [`MxfReader`] brings a file's header partition, optional body
//! partition, footer index table and random index pack into memory, then
//! serves plaintext or encrypted frames by frame number. Random access
//! goes through the index; linear playback skips the seek when the next
//! frame's computed position equals the byte-exact end of the previous
//! read.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::aes::AesDecContext;
use crate::error::{Error, Result};
use crate::hmac::HmacContext;
use crate::index::{IndexTable, IndexTableSegment};
use crate::klv;
use crate::metadata::{dyn_tags, tags, HeaderMetadata, PrimerPack};
use crate::partition::{Partition, PartitionKind, RandomIndexPack};
use crate::types::{FrameBuffer, LabelSet, WriterInfo};
use crate::ul::{labels, UL};
use crate::eklv::EncryptedTriplet;

/// Random-access reader over an AS-DCP/AS-02 file.
pub struct MxfReader<R: Read + Seek> {
    file: R,
    header: Partition,
    primer: PrimerPack,
    metadata: HeaderMetadata,
    rip: RandomIndexPack,
    index: IndexTable,
    info: WriterInfo,
    essence_start: u64,
    last_position: u64,
    ct_buf: Vec<u8>,
}

impl MxfReader<File> {
    /// Open a file by path.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_read(File::open(path)?)
    }
}

impl<R: Read + Seek> MxfReader<R> {
    /// Open a byte source: load the RIP, the header partition with its
    /// metadata, and the optional body partition, and record where the
    /// essence begins.
    pub fn open_read(mut file: R) -> Result<Self> {
        let rip = RandomIndexPack::read_from_end(&mut file)?;

        file.seek(SeekFrom::Start(0))?;
        let header = Partition::read_from(&mut file)?;
        if header.kind != PartitionKind::Header {
            return Err(Error::format("file does not start with a header partition"));
        }

        let (primer, metadata) = HeaderMetadata::read_from(&mut file, header.header_byte_count)?;

        // the essence sits behind the first body partition: the second
        // RIP entry in a plain three-partition file, and still the
        // lowest-offset nonzero-SID entry when generic stream partitions
        // follow the essence
        let body_offset = rip
            .entries
            .iter()
            .filter(|e| e.body_sid != 0)
            .map(|e| e.byte_offset)
            .min();
        if let Some(offset) = body_offset {
            file.seek(SeekFrom::Start(offset))?;
            Partition::read_from(&mut file)?;
        }

        let essence_start = file.stream_position()?;
        let info = writer_info_from_metadata(&header, &metadata);
        log::debug!(
            "opened {:?} file, essence starts at {}",
            info.label_set,
            essence_start
        );

        Ok(MxfReader {
            file,
            header,
            primer,
            metadata,
            rip,
            index: IndexTable::new(),
            info,
            essence_start,
            last_position: 0,
            ct_buf: Vec::new(),
        })
    }

    /// Populate the in-memory index from the footer partition, then
    /// restore the cursor to the start of the essence.
    ///
    /// A failed load leaves the previously loaded index untouched.
    pub fn load_index(&mut self) -> Result<()> {
        if self.header.footer_partition == 0 {
            return Err(Error::format("header does not record a footer partition"));
        }

        self.file
            .seek(SeekFrom::Start(self.header.footer_partition))?;
        let footer = Partition::read_from(&mut self.file)?;
        if footer.kind != PartitionKind::Footer {
            return Err(Error::format("footer offset does not hold a footer partition"));
        }

        // index segments use statically registered tags, so the header's
        // primer is not consulted while parsing them
        let mut table = IndexTable::new();
        let mut consumed = 0u64;
        while consumed < footer.index_byte_count {
            let (key, length, kl_bytes) = klv::read_key_and_length(&mut self.file)?;
            consumed += kl_bytes as u64 + length;

            if key.matches_exact(&labels::INDEX_TABLE_SEGMENT) {
                let mut value = vec![0u8; length as usize];
                self.file.read_exact(&mut value)?;
                table.add_segment(IndexTableSegment::parse_value(&value)?);
            } else if key.is_fill_item() {
                self.file.seek(SeekFrom::Current(length as i64))?;
            } else {
                return Err(Error::format(format!(
                    "unexpected packet in footer index: {}",
                    key
                )));
            }
        }

        if table.is_empty() {
            return Err(Error::format("footer carries no index table segment"));
        }

        self.file.seek(SeekFrom::Start(self.essence_start))?;
        self.last_position = self.essence_start;
        self.index = table;
        Ok(())
    }

    /// The file's writer policy, recovered from the header metadata.
    pub fn info(&self) -> &WriterInfo {
        &self.info
    }

    /// The header's interchange-object store.
    pub fn header_metadata(&self) -> &HeaderMetadata {
        &self.metadata
    }

    /// The header's local-tag to item-UL map.
    pub fn primer(&self) -> &PrimerPack {
        &self.primer
    }

    /// The header partition pack.
    pub fn header_partition(&self) -> &Partition {
        &self.header
    }

    /// The trailing random index pack.
    pub fn rip(&self) -> &RandomIndexPack {
        &self.rip
    }

    /// The loaded index table.
    pub fn index(&self) -> &IndexTable {
        &self.index
    }

    /// Number of indexed frames.
    pub fn frame_count(&self) -> u32 {
        self.index.duration()
    }

    /// Byte position where essence KLVs begin.
    pub fn essence_start(&self) -> u64 {
        self.essence_start
    }

    pub(crate) fn file_mut(&mut self) -> &mut R {
        &mut self.file
    }

    /// Read one frame, decrypting and verifying as the file's policy and
    /// the supplied contexts allow.
    ///
    /// Without a cipher context, an encrypted frame's triplet body (ESV
    /// plus MIC) is returned verbatim with the plaintext geometry in the
    /// buffer's metadata.
    pub fn read_eklv_frame(
        &mut self,
        frame_number: u32,
        frame_buf: &mut FrameBuffer,
        essence_ul: &UL,
        ctx: Option<&mut AesDecContext>,
        hmac: Option<&mut HmacContext>,
    ) -> Result<()> {
        let entry = self.index.lookup(frame_number).map_err(|e| {
            log::error!("frame value out of range: {}", frame_number);
            e
        })?;

        let file_pos = self.essence_start + entry.stream_offset;
        if file_pos != self.last_position {
            self.file.seek(SeekFrom::Start(file_pos))?;
        }

        let (key, packet_length, kl_bytes) = klv::read_key_and_length(&mut self.file)?;
        self.last_position = file_pos + kl_bytes as u64 + packet_length;

        if key.is_crypt_essence() {
            self.read_encrypted(frame_number, frame_buf, essence_ul, packet_length, ctx, hmac)
        } else if key.matches_ignore_stream(essence_ul) {
            // plaintext frame straight into the caller's buffer
            if (frame_buf.capacity() as u64) < packet_length {
                log::error!(
                    "frame buffer capacity {} below frame length {}",
                    frame_buf.capacity(),
                    packet_length
                );
                return Err(Error::SmallBuf {
                    needed: packet_length as usize,
                    available: frame_buf.capacity(),
                });
            }
            self.file
                .read_exact(&mut frame_buf.data_mut()[..packet_length as usize])?;
            frame_buf.set_size(packet_length as usize);
            frame_buf.set_frame_number(frame_number);
            Ok(())
        } else {
            log::warn!("unexpected essence UL found: {}", key);
            Err(Error::format(format!("unexpected essence UL: {}", key)))
        }
    }

    fn read_encrypted(
        &mut self,
        frame_number: u32,
        frame_buf: &mut FrameBuffer,
        essence_ul: &UL,
        packet_length: u64,
        ctx: Option<&mut AesDecContext>,
        hmac: Option<&mut HmacContext>,
    ) -> Result<()> {
        if !self.info.encrypted_essence {
            log::error!("EKLV packet found, no cryptographic context in header");
            return Err(Error::format("EKLV packet in a plaintext file"));
        }

        self.ct_buf.resize(packet_length as usize, 0);
        self.file.read_exact(&mut self.ct_buf)?;

        let triplet = EncryptedTriplet::parse(&self.ct_buf, self.info.uses_hmac)?;

        let context_id = self.info.context_id.unwrap_or_default();
        if triplet.context_id != context_id {
            log::error!("packet's cryptographic context ID does not match the header");
            return Err(Error::format("cryptographic context mismatch"));
        }

        if !triplet.source_essence_ul.matches_ignore_stream(essence_ul) {
            log::warn!("unexpected essence UL found: {}", triplet.source_essence_ul);
            return Err(Error::format(format!(
                "unexpected essence UL: {}",
                triplet.source_essence_ul
            )));
        }

        match ctx {
            Some(ctx) => {
                triplet.decrypt(frame_buf, ctx)?;
                frame_buf.set_frame_number(frame_number);

                if self.info.uses_hmac {
                    if let Some(hmac) = hmac {
                        triplet.test_integrity(&self.info.asset_uuid, frame_number, hmac)?;
                    }
                }
                Ok(())
            }
            None => {
                // hand the ciphertext back: ESV plus MIC when present
                let body = triplet.raw_body(&self.ct_buf);
                if frame_buf.capacity() < body.len() {
                    return Err(Error::SmallBuf {
                        needed: body.len(),
                        available: frame_buf.capacity(),
                    });
                }
                let source_length = triplet.source_length as usize;
                let plaintext_offset = triplet.plaintext_offset as usize;
                frame_buf.data_mut()[..body.len()].copy_from_slice(body);
                frame_buf.set_size(body.len());
                frame_buf.set_frame_number(frame_number);
                frame_buf.set_source_length(source_length);
                frame_buf.set_plaintext_offset(plaintext_offset);
                Ok(())
            }
        }
    }
}

/// Recover the writer policy from the operational pattern and the header
/// object graph.
fn writer_info_from_metadata(header: &Partition, metadata: &HeaderMetadata) -> WriterInfo {
    let mut info = WriterInfo {
        label_set: LabelSet::Unknown,
        asset_uuid: [0; 16],
        context_id: None,
        encrypted_essence: false,
        uses_hmac: false,
        company_name: String::new(),
        product_name: String::new(),
        product_version: String::new(),
    };

    let op = &header.operational_pattern;
    if *op == labels::OP_ATOM_INTEROP {
        info.label_set = LabelSet::MxfInterop;
    } else if *op == labels::OP_ATOM_SMPTE || *op == labels::OP1A {
        info.label_set = LabelSet::MxfSmpte;
    }

    if let Some(ident) = metadata.get_by_type(&labels::IDENTIFICATION) {
        info.company_name = ident.string(tags::COMPANY_NAME).unwrap_or_default();
        info.product_name = ident.string(tags::PRODUCT_NAME).unwrap_or_default();
        info.product_version = ident.string(tags::VERSION_STRING).unwrap_or_default();
    }

    if let Some(package) = metadata.get_by_type(&labels::SOURCE_PACKAGE) {
        if let Some(umid) = package.umid(tags::PACKAGE_UID) {
            info.asset_uuid
                .copy_from_slice(umid.material_number());
        }
    }

    if let Some(context) = metadata.get_by_type(&labels::CRYPTOGRAPHIC_CONTEXT) {
        info.encrypted_essence = true;
        info.context_id = context.uuid(dyn_tags::CONTEXT_ID);
        info.uses_hmac = context
            .uuid(dyn_tags::MIC_ALGORITHM)
            .is_some_and(|ul| ul != [0u8; 16]);
    }

    info
}
