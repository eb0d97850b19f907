//! End-to-end round trips over real files: clip-wrapped IAB, frame-wrapped
//! encrypted essence, generic stream metadata, and tamper detection.

use std::fs;
use std::path::PathBuf;

use asdcp::{
    iab_element_key, labels, tags, AesDecContext, AesEncContext, ContentKey, Error, FrameBuffer,
    FrameWriter, HmacContext, IabReader, IabSoundfieldLabel, IabWriter, Iv, LabelSet, MetadataSet,
    MxfReader, Rational, WriterInfo,
};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("asdcp-{}-{}.mxf", name, std::process::id()))
}

fn test_key() -> ContentKey {
    ContentKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
}

fn test_iv() -> Iv {
    Iv::new([
        0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e,
        0x1f,
    ])
}

fn crypto_info() -> WriterInfo {
    WriterInfo {
        encrypted_essence: true,
        uses_hmac: true,
        context_id: Some([0x42; 16]),
        asset_uuid: [0x17; 16],
        ..Default::default()
    }
}

fn sound_descriptor() -> MetadataSet {
    let mut desc = MetadataSet::new(labels::IAB_ESSENCE_DESCRIPTOR);
    desc.set_u32(tags::CHANNEL_COUNT, 0);
    desc.set_u32(tags::QUANTIZATION_BITS, 24);
    desc
}

fn write_clip(path: &PathBuf, info: &WriterInfo, frames: &[&[u8]]) {
    let mut writer = IabWriter::open_write_path(
        path,
        info,
        IabSoundfieldLabel::default(),
        &[],
        Rational::fps_24(),
        Rational::hz_48k(),
    )
    .unwrap();

    for frame in frames {
        writer.write_frame(frame).unwrap();
    }
    writer.finalize_clip().unwrap();
    writer.finalize_mxf().unwrap();
}

#[test]
fn plaintext_clip_roundtrip() {
    let path = temp_path("plaintext-clip");
    let payload: &[u8] = &[0x00, 0x01, 0x02, 0x03];
    write_clip(&path, &WriterInfo::default(), &[payload; 10]);

    let mut reader = IabReader::open_read_path(&path).unwrap();
    assert_eq!(reader.frame_count().unwrap(), 10);
    assert_eq!(reader.read_frame(5).unwrap(), payload);

    // every frame comes back byte-exact, in any order
    assert_eq!(reader.read_frame(9).unwrap(), payload);
    assert_eq!(reader.read_frame(0).unwrap(), payload);

    // out of range
    assert!(matches!(reader.read_frame(10), Err(Error::Range(10))));

    fs::remove_file(&path).ok();
}

#[test]
fn iab_preamble_framing() {
    let path = temp_path("preamble");
    // preamble TLV: tag 01, length 2, payload AA BB
    // frame TLV:    tag 02, length 3, payload CC DD EE
    let frame: &[u8] = &[
        0x01, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB, 0x02, 0x00, 0x00, 0x00, 0x03, 0xCC, 0xDD, 0xEE,
    ];
    write_clip(&path, &WriterInfo::default(), &[frame]);

    let mut reader = IabReader::open_read_path(&path).unwrap();
    assert_eq!(reader.frame_count().unwrap(), 1);
    assert_eq!(reader.read_frame(0).unwrap(), frame);

    fs::remove_file(&path).ok();
}

#[test]
fn clip_writer_info_recovery() {
    let path = temp_path("writer-info");
    let mut info = WriterInfo::default();
    info.asset_uuid = [0x55; 16];
    info.company_name = "Example Corp".into();
    info.product_name = "example-writer".into();
    write_clip(&path, &info, &[&[1u8, 2, 3, 4][..]]);

    let reader = IabReader::open_read_path(&path).unwrap();
    let recovered = reader.fill_writer_info().unwrap();
    assert_eq!(recovered.asset_uuid, [0x55; 16]);
    assert_eq!(recovered.company_name, "Example Corp");
    assert_eq!(recovered.product_name, "example-writer");
    assert_eq!(recovered.label_set, LabelSet::MxfSmpte);
    assert!(!recovered.encrypted_essence);

    fs::remove_file(&path).ok();
}

#[test]
fn rip_covers_every_partition() {
    let path = temp_path("rip-closure");
    write_clip(&path, &WriterInfo::default(), &[&[9u8; 16][..]]);

    let reader = MxfReader::open_path(&path).unwrap();
    let entries = &reader.rip().entries;

    // header, essence body, footer: one entry each, offsets increasing
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].body_sid, 0);
    assert_eq!(entries[1].body_sid, 1);
    assert_eq!(entries[2].body_sid, 0);
    assert!(entries[0].byte_offset < entries[1].byte_offset);
    assert!(entries[1].byte_offset < entries[2].byte_offset);

    fs::remove_file(&path).ok();
}

fn write_encrypted_frames(path: &PathBuf, info: &WriterInfo, frames: &[&[u8]]) {
    let mut enc = AesEncContext::new();
    enc.init_key(&test_key()).unwrap();
    enc.set_iv(&test_iv()).unwrap();
    let mut hmac = HmacContext::new();
    hmac.init_key(&test_key(), info.label_set).unwrap();

    let mut writer = FrameWriter::new();
    writer
        .open_write(
            fs::File::create(path).unwrap(),
            info,
            iab_element_key(),
            labels::IMF_IAB_CLIP_WRAPPED_CONTAINER,
            sound_descriptor(),
            Rational::fps_24(),
        )
        .unwrap();
    for frame in frames {
        writer
            .write_frame(frame, Some(&mut enc), Some(&mut hmac))
            .unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn encrypted_frame_roundtrip() {
    let path = temp_path("encrypted");
    let frame = [0xA5u8; 32];
    write_encrypted_frames(&path, &crypto_info(), &[&frame]);

    let mut reader = MxfReader::open_path(&path).unwrap();
    reader.load_index().unwrap();

    let info = reader.info().clone();
    assert!(info.encrypted_essence);
    assert!(info.uses_hmac);
    assert_eq!(info.context_id, Some([0x42; 16]));
    assert_eq!(info.asset_uuid, [0x17; 16]);

    let mut dec = AesDecContext::new();
    dec.init_key(&test_key()).unwrap();
    let mut hmac = HmacContext::new();
    hmac.init_key(&test_key(), info.label_set).unwrap();

    let mut buf = FrameBuffer::with_capacity(4096);
    reader
        .read_eklv_frame(0, &mut buf, &iab_element_key(), Some(&mut dec), Some(&mut hmac))
        .unwrap();

    assert_eq!(buf.as_slice(), &frame);
    assert_eq!(buf.source_length(), 32);
    assert_eq!(buf.plaintext_offset(), 0);
    assert_eq!(buf.frame_number(), 0);

    fs::remove_file(&path).ok();
}

#[test]
fn encrypted_ciphertext_passthrough() {
    let path = temp_path("passthrough");
    write_encrypted_frames(&path, &crypto_info(), &[&[0xA5u8; 32]]);

    let mut reader = MxfReader::open_path(&path).unwrap();
    reader.load_index().unwrap();

    // without a cipher context the reader hands back ESV + MIC verbatim
    let mut buf = FrameBuffer::with_capacity(4096);
    reader
        .read_eklv_frame(0, &mut buf, &iab_element_key(), None, None)
        .unwrap();

    // one IV block + two ciphertext blocks + 20-byte MIC
    assert_eq!(buf.size(), 48 + 20);
    assert_eq!(buf.source_length(), 32);
    assert_eq!(buf.plaintext_offset(), 0);

    fs::remove_file(&path).ok();
}

#[test]
fn tampered_esv_fails_integrity() {
    let path = temp_path("tamper");
    write_encrypted_frames(&path, &crypto_info(), &[&[0xA5u8; 32]]);

    // flip one bit inside the stored ESV
    let mut bytes = fs::read(&path).unwrap();
    let key_prefix = &labels::CRYPT_ESSENCE_SMPTE[..15];
    let key_pos = bytes
        .windows(15)
        .position(|w| w == key_prefix)
        .expect("EKLV packet present");
    // KL(20) + four tagged headers (4+16, 4+8, 4+16, 4+8) + ESV BER(4),
    // then a few bytes into the ciphertext
    let esv_pos = key_pos + 20 + 64 + 4;
    bytes[esv_pos + 21] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let mut reader = MxfReader::open_path(&path).unwrap();
    reader.load_index().unwrap();
    let label_set = reader.info().label_set;

    let mut dec = AesDecContext::new();
    dec.init_key(&test_key()).unwrap();
    let mut hmac = HmacContext::new();
    hmac.init_key(&test_key(), label_set).unwrap();

    let mut buf = FrameBuffer::with_capacity(4096);
    let result = reader.read_eklv_frame(0, &mut buf, &iab_element_key(), Some(&mut dec), Some(&mut hmac));
    assert!(matches!(result, Err(Error::HmacFail)));

    fs::remove_file(&path).ok();
}

#[test]
fn wrong_essence_ul_is_format_error() {
    let path = temp_path("wrong-ul");
    let mut writer = FrameWriter::new();
    writer
        .open_write(
            fs::File::create(&path).unwrap(),
            &WriterInfo::default(),
            iab_element_key(),
            labels::IMF_IAB_CLIP_WRAPPED_CONTAINER,
            sound_descriptor(),
            Rational::fps_24(),
        )
        .unwrap();
    writer.write_frame(&[1, 2, 3, 4], None, None).unwrap();
    writer.finalize().unwrap();

    let mut reader = MxfReader::open_path(&path).unwrap();
    reader.load_index().unwrap();

    let mut buf = FrameBuffer::with_capacity(64);
    let result = reader.read_eklv_frame(
        0,
        &mut buf,
        &labels::GENERIC_STREAM_DATA_ELEMENT,
        None,
        None,
    );
    assert!(matches!(result, Err(Error::Format(_))));

    fs::remove_file(&path).ok();
}

#[test]
fn sequential_and_random_access() {
    let path = temp_path("sequential");
    let frames: Vec<Vec<u8>> = (0u8..8).map(|i| vec![i; 16 + i as usize]).collect();
    let refs: Vec<&[u8]> = frames.iter().map(|f| f.as_slice()).collect();

    let mut writer = FrameWriter::new();
    writer
        .open_write(
            fs::File::create(&path).unwrap(),
            &WriterInfo::default(),
            iab_element_key(),
            labels::IMF_IAB_CLIP_WRAPPED_CONTAINER,
            sound_descriptor(),
            Rational::fps_24(),
        )
        .unwrap();
    for frame in &refs {
        writer.write_frame(frame, None, None).unwrap();
    }
    writer.finalize().unwrap();

    let mut reader = MxfReader::open_path(&path).unwrap();
    reader.load_index().unwrap();
    assert_eq!(reader.frame_count(), 8);

    let mut buf = FrameBuffer::with_capacity(4096);

    // linear playback exercises the skip-seek fast path
    for (i, frame) in refs.iter().enumerate() {
        reader
            .read_eklv_frame(i as u32, &mut buf, &iab_element_key(), None, None)
            .unwrap();
        assert_eq!(buf.as_slice(), *frame);
    }

    // then jump backwards
    reader
        .read_eklv_frame(2, &mut buf, &iab_element_key(), None, None)
        .unwrap();
    assert_eq!(buf.as_slice(), refs[2]);

    fs::remove_file(&path).ok();
}

#[test]
fn generic_stream_metadata_roundtrip() {
    let path = temp_path("metadata");
    let payload = b"<dolby>sidecar</dolby>".to_vec();

    let mut writer = IabWriter::open_write_path(
        &path,
        &WriterInfo::default(),
        IabSoundfieldLabel::default(),
        &[],
        Rational::fps_24(),
        Rational::hz_48k(),
    )
    .unwrap();
    writer.write_frame(&[7u8; 24]).unwrap();
    writer.finalize_clip().unwrap();
    writer
        .write_metadata("Sidecar", "application/xml", "IAB.settings", &payload, None, None)
        .unwrap();
    writer.finalize_mxf().unwrap();

    let mut reader = IabReader::open_read_path(&path).unwrap();

    // the essence is still reachable with the extra partition in the RIP
    assert_eq!(reader.frame_count().unwrap(), 1);
    assert_eq!(reader.read_frame(0).unwrap(), &[7u8; 24]);

    let mut buf = FrameBuffer::with_capacity(4096);
    let mime = reader.read_metadata("IAB.settings", &mut buf).unwrap();
    assert_eq!(mime, "application/xml");
    assert_eq!(buf.as_slice(), payload.as_slice());

    // an unknown description is a format error
    assert!(matches!(
        reader.read_metadata("missing", &mut buf),
        Err(Error::Format(_))
    ));

    fs::remove_file(&path).ok();
}

#[test]
fn small_buffer_is_reported() {
    let path = temp_path("smallbuf");
    let mut writer = FrameWriter::new();
    writer
        .open_write(
            fs::File::create(&path).unwrap(),
            &WriterInfo::default(),
            iab_element_key(),
            labels::IMF_IAB_CLIP_WRAPPED_CONTAINER,
            sound_descriptor(),
            Rational::fps_24(),
        )
        .unwrap();
    writer.write_frame(&[3u8; 100], None, None).unwrap();
    writer.finalize().unwrap();

    let mut reader = MxfReader::open_path(&path).unwrap();
    reader.load_index().unwrap();

    // the frame holds 100 bytes; an 8-byte buffer cannot take it
    let mut buf = FrameBuffer::with_capacity(8);
    let result = reader.read_eklv_frame(0, &mut buf, &iab_element_key(), None, None);
    assert!(matches!(result, Err(Error::SmallBuf { .. })));

    fs::remove_file(&path).ok();
}
