//! AS-DCP / AS-02 MXF Container Support
//!
//! This crate provides support for the SMPTE MXF profiles used by Digital
//! Cinema Packages (AS-DCP) and IMF track files (AS-02), centered on
//! clip-wrapped Immersive Audio Bitstream essence (SMPTE ST 2067-201).
//!
//! # Features
//!
//! - MXF partition, primer, and header metadata parsing and writing
//! - KLV (Key-Length-Value) triplet handling with fixed-width BER lengths
//! - Frame-accurate random access through footer index tables
//! - SMPTE ST 429.6 encrypted KLV triplets: AES-128-CBC essence
//!   encryption with HMAC-SHA1 integrity packs
//! - Clip-wrapped IAB write path with back-patched clip length
//! - RP 2057 generic stream partitions for sidecar text metadata
//!
//! # Example
//!
//! ```no_run
//! use asdcp::{IabReader, IabSoundfieldLabel, IabWriter, Rational, WriterInfo};
//!
//! // Write a clip-wrapped IAB track file
//! let info = WriterInfo::default();
//! let mut writer = IabWriter::open_write_path(
//!     "audio.mxf",
//!     &info,
//!     IabSoundfieldLabel::default(),
//!     &[],
//!     Rational::fps_24(),
//!     Rational::hz_48k(),
//! ).unwrap();
//!
//! writer.write_frame(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00]).unwrap();
//! writer.finalize_clip().unwrap();
//! writer.finalize_mxf().unwrap();
//!
//! // Read it back
//! let mut reader = IabReader::open_read_path("audio.mxf").unwrap();
//! println!("frames: {}", reader.frame_count().unwrap());
//! let frame = reader.read_frame(0).unwrap();
//! println!("frame 0 holds {} bytes", frame.len());
//! ```

mod aes;
mod eklv;
mod error;
mod hmac;
mod iab;
mod index;
mod key;
mod klv;
mod metadata;
mod partition;
mod reader;
mod types;
mod ul;
mod writer;

pub use aes::{AesDecContext, AesEncContext, CBC_BLOCK_SIZE};
pub use eklv::{esv_length, write_eklv_packet, EncryptedTriplet};
pub use error::{Error, Result};
pub use hmac::{HmacContext, HMAC_SIZE};
pub use iab::{iab_element_key, IabReader, IabSoundfieldLabel, IabWriter};
pub use index::{IndexEntry, IndexTable, IndexTableSegment};
pub use key::{ContentKey, Iv, AES_128_KEY_SIZE, IV_SIZE};
pub use klv::{
    decode_ber, encode_ber, read_key_and_length, write_kl, write_klv, CLIP_BER_LENGTH,
    MXF_BER_LENGTH,
};
pub use metadata::{
    decode_utf16_be, dyn_tags, encode_utf16_be, tags, HeaderMetadata, MetadataSet, PrimerPack,
};
pub use partition::{Partition, PartitionKind, RandomIndexPack, RipEntry};
pub use reader::MxfReader;
pub use types::{
    EditRate, FrameBuffer, LabelSet, Rational, Umid, WriterInfo, UUID_LENGTH,
};
pub use ul::{labels, UniversalLabel, SMPTE_UL_LENGTH, UL};
pub use writer::{FrameWriter, WriterState};
