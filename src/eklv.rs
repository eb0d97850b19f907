//! SMPTE 429.6 encrypted KLV triplets.
//!
//! The Value of an EKLV packet is a sequence of tagged fields in fixed
//! order: ContextID, PlaintextOffset, SourceEssenceUL, SourceLength, the
//! Encrypted Source Value, and (when the file uses a MIC) a trailing
//! 20-byte HMAC. Every field is preceded by a 4-byte BER carrying the
//! field's exact length; a reader must reject any other width or value.
//!
//! The ESV is `plaintext_prefix ‖ IV ‖ ciphertext`, where the ciphertext
//! covers the frame bytes past the plaintext offset, zero-padded to a
//! whole number of CBC blocks. `SourceLength` recovers the true frame
//! length on decrypt, which keeps the envelope bit-exact reproducible.

use std::io::Write;

use crate::aes::{AesDecContext, AesEncContext, CBC_BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::hmac::{HmacContext, HMAC_SIZE};
use crate::key::{Iv, IV_SIZE};
use crate::klv::{self, ByteCursor, MXF_BER_LENGTH};
use crate::types::{FrameBuffer, WriterInfo, LabelSet, UUID_LENGTH};
use crate::ul::{labels, UniversalLabel, SMPTE_UL_LENGTH, UL};

/// Total length of the ESV field for a frame: the plaintext prefix, one
/// IV block, and the encrypted span rounded up to a block multiple.
pub fn esv_length(source_length: u64, plaintext_offset: u64) -> u64 {
    let ct_span = source_length - plaintext_offset.min(source_length);
    let padded = ct_span.div_ceil(CBC_BLOCK_SIZE as u64) * CBC_BLOCK_SIZE as u64;
    plaintext_offset.min(source_length) + IV_SIZE as u64 + padded
}

/// Parsed view over an EKLV packet value.
#[derive(Debug)]
pub struct EncryptedTriplet<'a> {
    /// Cryptographic context this triplet belongs to
    pub context_id: [u8; UUID_LENGTH],
    /// Leading span of the source that was not encrypted
    pub plaintext_offset: u64,
    /// Element key of the plaintext essence
    pub source_essence_ul: UniversalLabel,
    /// True length of the plaintext frame
    pub source_length: u64,
    /// Encrypted source value: prefix ‖ IV ‖ ciphertext
    pub esv: &'a [u8],
    /// Trailing MIC, present when the file uses a MIC
    pub mic: Option<&'a [u8]>,
}

impl<'a> EncryptedTriplet<'a> {
    /// Parse a packet value, enforcing exact field lengths and widths.
    pub fn parse(value: &'a [u8], uses_hmac: bool) -> Result<Self> {
        let mut cursor = ByteCursor::new(value);

        cursor.expect_ber(UUID_LENGTH as u64)?;
        let context_id: [u8; UUID_LENGTH] = cursor
            .take(UUID_LENGTH)?
            .try_into()
            .expect("span is 16 bytes");

        cursor.expect_ber(8)?;
        let plaintext_offset = cursor.take_u64()?;

        cursor.expect_ber(SMPTE_UL_LENGTH as u64)?;
        let source_essence_ul = UniversalLabel::from_slice(cursor.take(SMPTE_UL_LENGTH)?)
            .expect("span is 16 bytes");

        cursor.expect_ber(8)?;
        let source_length = cursor.take_u64()?;
        if source_length == 0 {
            return Err(Error::format("triplet has zero source length"));
        }
        if plaintext_offset > source_length {
            return Err(Error::format("plaintext offset exceeds source length"));
        }

        let esv_len = esv_length(source_length, plaintext_offset);
        cursor.expect_ber(esv_len)?;

        // the whole frame body must fit inside the packet
        let tmp_len = esv_len + if uses_hmac { HMAC_SIZE as u64 } else { 0 };
        if (cursor.remaining() as u64) < tmp_len {
            return Err(Error::format(
                "frame length is larger than the EKLV packet length",
            ));
        }

        let esv = cursor.take(esv_len as usize)?;
        let mic = if uses_hmac {
            Some(cursor.take(HMAC_SIZE)?)
        } else {
            None
        };

        Ok(EncryptedTriplet {
            context_id,
            plaintext_offset,
            source_essence_ul,
            source_length,
            esv,
            mic,
        })
    }

    /// The span a ciphertext-returning reader hands to the caller: the
    /// ESV plus the MIC when present.
    pub fn raw_body(&self, value: &'a [u8]) -> &'a [u8] {
        let start = value.len() - self.esv.len() - self.mic.map_or(0, <[u8]>::len);
        &value[start..]
    }

    /// Decrypt into `frame_buf`: the prefix is copied verbatim, the
    /// remainder CBC-decrypted with the in-band IV.
    pub fn decrypt(&self, frame_buf: &mut FrameBuffer, ctx: &mut AesDecContext) -> Result<()> {
        let source_length = self.source_length as usize;
        let prefix_len = self.plaintext_offset as usize;

        if frame_buf.capacity() < source_length {
            return Err(Error::SmallBuf {
                needed: source_length,
                available: frame_buf.capacity(),
            });
        }

        let (prefix, rest) = self.esv.split_at(prefix_len);
        let (iv, ciphertext) = rest.split_at(IV_SIZE);

        ctx.set_iv(&Iv::from_slice(iv)?)?;

        let mut plaintext = vec![0u8; ciphertext.len()];
        if !ciphertext.is_empty() {
            ctx.decrypt_blocks(ciphertext, &mut plaintext)?;
        }

        let out = frame_buf.data_mut();
        out[..prefix_len].copy_from_slice(prefix);
        out[prefix_len..source_length]
            .copy_from_slice(&plaintext[..source_length - prefix_len]);

        frame_buf.set_size(source_length);
        frame_buf.set_source_length(source_length);
        frame_buf.set_plaintext_offset(prefix_len);
        Ok(())
    }

    /// Recompute the MIC over this triplet and compare against the stored
    /// value in constant time.
    pub fn test_integrity(
        &self,
        asset_uuid: &[u8; UUID_LENGTH],
        frame_number: u32,
        hmac: &mut HmacContext,
    ) -> Result<()> {
        let mic = self
            .mic
            .ok_or_else(|| Error::format("triplet carries no MIC"))?;
        hmac.reset();
        update_integrity_pack(hmac, self.esv, frame_number, asset_uuid)?;
        hmac.finalize()?;
        hmac.test(mic)
    }
}

/// Feed the integrity-pack input to a MAC: the ESV bytes, then
/// `frame_number + 1` as a 16-byte big-endian value, then the asset UUID.
fn update_integrity_pack(
    hmac: &mut HmacContext,
    esv: &[u8],
    frame_number: u32,
    asset_uuid: &[u8; UUID_LENGTH],
) -> Result<()> {
    hmac.update(esv)?;
    hmac.update(&(frame_number as u128 + 1).to_be_bytes())?;
    hmac.update(asset_uuid)?;
    Ok(())
}

/// The EKLV key for a label dialect.
pub fn crypt_essence_key(label_set: LabelSet) -> UL {
    match label_set {
        LabelSet::MxfInterop => labels::CRYPT_ESSENCE_INTEROP,
        _ => labels::CRYPT_ESSENCE_SMPTE,
    }
}

/// Write one essence packet, encrypted or plain.
///
/// When the file policy is plaintext, or no cipher context is supplied
/// for a plaintext-policy metadata stream, the frame goes out as an
/// ordinary KLV under `essence_key`. Otherwise the frame is wrapped in a
/// SMPTE 429.6 triplet under the dialect's EKLV key, using the context's
/// running IV. Returns the total bytes written.
pub fn write_eklv_packet<W: Write>(
    writer: &mut W,
    info: &WriterInfo,
    frame: &[u8],
    frame_number: u32,
    essence_key: &UL,
    plaintext_offset: u64,
    enc: Option<&mut AesEncContext>,
    hmac: Option<&mut HmacContext>,
) -> Result<u64> {
    if frame.is_empty() {
        return Err(Error::format("cannot wrap an empty frame"));
    }

    let Some(enc) = enc else {
        if info.encrypted_essence {
            return Err(Error::Init);
        }
        klv::write_klv(writer, essence_key, frame)?;
        return Ok((SMPTE_UL_LENGTH + MXF_BER_LENGTH + frame.len()) as u64);
    };

    if !info.encrypted_essence {
        return Err(Error::format(
            "cipher context supplied but the file policy is plaintext",
        ));
    }
    let context_id = info.context_id.ok_or(Error::Init)?;

    let source_length = frame.len() as u64;
    let plaintext_offset = plaintext_offset.min(source_length);
    let prefix_len = plaintext_offset as usize;

    // assemble the ESV: prefix, IV, zero-padded ciphertext
    let iv = enc.get_iv()?;
    let ct_span = frame.len() - prefix_len;
    let padded = ct_span.div_ceil(CBC_BLOCK_SIZE) * CBC_BLOCK_SIZE;

    let mut plaintext = vec![0u8; padded];
    plaintext[..ct_span].copy_from_slice(&frame[prefix_len..]);
    let mut ciphertext = vec![0u8; padded];
    if padded > 0 {
        enc.encrypt_blocks(&plaintext, &mut ciphertext)?;
    }

    let mut esv = Vec::with_capacity(prefix_len + IV_SIZE + padded);
    esv.extend_from_slice(&frame[..prefix_len]);
    esv.extend_from_slice(iv.as_bytes());
    esv.extend_from_slice(&ciphertext);
    debug_assert_eq!(esv.len() as u64, esv_length(source_length, plaintext_offset));

    let mic = match (info.uses_hmac, hmac) {
        (false, _) => None,
        (true, None) => return Err(Error::Init),
        (true, Some(hmac)) => {
            hmac.reset();
            update_integrity_pack(hmac, &esv, frame_number, &info.asset_uuid)?;
            hmac.finalize()?;
            Some(*hmac.value()?)
        }
    };

    let mut value = Vec::with_capacity(esv.len() + 96);
    let field = |value: &mut Vec<u8>, bytes: &[u8]| -> Result<()> {
        value.extend_from_slice(&klv::encode_ber(bytes.len() as u64, MXF_BER_LENGTH)?);
        value.extend_from_slice(bytes);
        Ok(())
    };

    field(&mut value, &context_id)?;
    field(&mut value, &plaintext_offset.to_be_bytes())?;
    field(&mut value, essence_key)?;
    field(&mut value, &source_length.to_be_bytes())?;
    field(&mut value, &esv)?;
    if let Some(mic) = mic {
        value.extend_from_slice(&mic);
    }

    let key = crypt_essence_key(info.label_set);
    klv::write_klv(writer, &key, &value)?;
    Ok((SMPTE_UL_LENGTH + MXF_BER_LENGTH + value.len()) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ContentKey;

    fn crypto_info() -> WriterInfo {
        WriterInfo {
            context_id: Some([0x42; 16]),
            encrypted_essence: true,
            uses_hmac: true,
            asset_uuid: [0x17; 16],
            ..Default::default()
        }
    }

    fn test_key() -> ContentKey {
        ContentKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
    }

    fn test_iv() -> Iv {
        Iv::new([
            0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d,
            0x1e, 0x1f,
        ])
    }

    fn element_key() -> UL {
        let mut key = labels::IMF_IAB_CLIP_WRAPPED_ELEMENT;
        key[13] = 1;
        key[15] = 1;
        key
    }

    fn wrap(frame: &[u8], info: &WriterInfo, plaintext_offset: u64) -> Vec<u8> {
        let mut enc = AesEncContext::new();
        enc.init_key(&test_key()).unwrap();
        enc.set_iv(&test_iv()).unwrap();
        let mut hmac = HmacContext::new();
        hmac.init_key(&test_key(), info.label_set).unwrap();

        let mut packet = Vec::new();
        write_eklv_packet(
            &mut packet,
            info,
            frame,
            0,
            &element_key(),
            plaintext_offset,
            Some(&mut enc),
            Some(&mut hmac),
        )
        .unwrap();
        packet
    }

    #[test]
    fn test_esv_length() {
        // aligned span: no pad block, one IV block
        assert_eq!(esv_length(32, 0), 48);
        // partial final block rounds up
        assert_eq!(esv_length(33, 0), 64);
        // prefix is carried inside the ESV
        assert_eq!(esv_length(32, 10), 10 + 16 + 32);
        // fully plaintext frame still gets an IV block
        assert_eq!(esv_length(16, 16), 32);
    }

    #[test]
    fn test_triplet_roundtrip() {
        let info = crypto_info();
        let frame = [0xA5u8; 32];
        let packet = wrap(&frame, &info, 0);

        // strip KL
        let value = &packet[20..];
        let triplet = EncryptedTriplet::parse(value, true).unwrap();

        assert_eq!(triplet.context_id, [0x42; 16]);
        assert_eq!(triplet.source_length, 32);
        assert_eq!(triplet.plaintext_offset, 0);
        assert!(triplet.source_essence_ul.matches_ignore_stream(&element_key()));
        assert_eq!(triplet.esv.len(), 48);

        let mut dec = AesDecContext::new();
        dec.init_key(&test_key()).unwrap();
        let mut out = FrameBuffer::with_capacity(64);
        triplet.decrypt(&mut out, &mut dec).unwrap();
        assert_eq!(out.as_slice(), &frame);
        assert_eq!(out.source_length(), 32);

        let mut hmac = HmacContext::new();
        hmac.init_key(&test_key(), info.label_set).unwrap();
        triplet.test_integrity(&info.asset_uuid, 0, &mut hmac).unwrap();
    }

    #[test]
    fn test_plaintext_prefix() {
        let info = crypto_info();
        let frame: Vec<u8> = (0u8..48).collect();
        let packet = wrap(&frame, &info, 10);

        let value = &packet[20..];
        let triplet = EncryptedTriplet::parse(value, true).unwrap();
        assert_eq!(triplet.plaintext_offset, 10);
        // the prefix rides in the clear
        assert_eq!(&triplet.esv[..10], &frame[..10]);

        let mut dec = AesDecContext::new();
        dec.init_key(&test_key()).unwrap();
        let mut out = FrameBuffer::with_capacity(64);
        triplet.decrypt(&mut out, &mut dec).unwrap();
        assert_eq!(out.as_slice(), &frame[..]);
        assert_eq!(out.plaintext_offset(), 10);
    }

    #[test]
    fn test_tampered_mic_fails() {
        let info = crypto_info();
        let mut packet = wrap(&[0xA5u8; 32], &info, 0);

        // flip one bit inside the ESV
        let esv_start = packet.len() - HMAC_SIZE - 48;
        packet[esv_start + 20] ^= 0x01;

        let value = &packet[20..];
        let triplet = EncryptedTriplet::parse(value, true).unwrap();

        let mut hmac = HmacContext::new();
        hmac.init_key(&test_key(), info.label_set).unwrap();
        assert!(matches!(
            triplet.test_integrity(&info.asset_uuid, 0, &mut hmac),
            Err(Error::HmacFail)
        ));
    }

    #[test]
    fn test_wrong_frame_number_fails() {
        let info = crypto_info();
        let packet = wrap(&[0xA5u8; 32], &info, 0);
        let value = &packet[20..];
        let triplet = EncryptedTriplet::parse(value, true).unwrap();

        let mut hmac = HmacContext::new();
        hmac.init_key(&test_key(), info.label_set).unwrap();
        assert!(matches!(
            triplet.test_integrity(&info.asset_uuid, 1, &mut hmac),
            Err(Error::HmacFail)
        ));
    }

    #[test]
    fn test_ber_width_enforced() {
        let info = crypto_info();
        let packet = wrap(&[0xA5u8; 32], &info, 0);
        let mut value = packet[20..].to_vec();

        // rewrite the ContextID BER as a 5-byte encoding of the same value
        let wide = klv::encode_ber(16, 5).unwrap();
        value.splice(0..4, wide);
        assert!(EncryptedTriplet::parse(&value, true).is_err());
    }

    #[test]
    fn test_oversized_plaintext_offset_rejected() {
        let info = crypto_info();
        let packet = wrap(&[0xA5u8; 32], &info, 0);
        let mut value = packet[20..].to_vec();

        // the PlaintextOffset field rides at bytes 24..32, after the
        // tagged ContextID; a wire value past SourceLength must be
        // rejected at parse rather than panicking in decrypt
        value[24..32].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(
            EncryptedTriplet::parse(&value, true),
            Err(Error::Format(_))
        ));

        value[24..32].copy_from_slice(&33u64.to_be_bytes());
        assert!(matches!(
            EncryptedTriplet::parse(&value, true),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let info = crypto_info();
        let packet = wrap(&[0xA5u8; 32], &info, 0);
        // drop the final MIC byte
        let value = &packet[20..packet.len() - 1];
        assert!(EncryptedTriplet::parse(value, true).is_err());
    }

    #[test]
    fn test_plain_path_without_context() {
        let info = WriterInfo::default();
        let mut packet = Vec::new();
        let written = write_eklv_packet(
            &mut packet,
            &info,
            &[1, 2, 3, 4],
            0,
            &element_key(),
            0,
            None,
            None,
        )
        .unwrap();
        assert_eq!(written, 24);
        assert_eq!(&packet[..16], &element_key());
        assert_eq!(&packet[20..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_encrypted_policy_requires_context() {
        let info = crypto_info();
        let mut packet = Vec::new();
        assert!(matches!(
            write_eklv_packet(
                &mut packet,
                &info,
                &[1, 2, 3, 4],
                0,
                &element_key(),
                0,
                None,
                None,
            ),
            Err(Error::Init)
        ));
    }
}
