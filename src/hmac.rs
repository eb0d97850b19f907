//! Message Integrity Code engine for SMPTE 429.6 triplets.
//!
//! This is HMAC-SHA1 with two deliberate departures from RFC 2104 that
//! must be preserved bit-exactly for interoperability:
//!
//! - the MAC key is not the content key but a 16-byte key derived from
//!   it, with one derivation per label dialect (see [`crate::types::LabelSet`]);
//! - the ipad/opad construction runs over a 16-byte key block, not the
//!   64-byte SHA-1 input block.
//!
//! The SMPTE derivation is two rounds of FIPS 186-2 appendix 3.1 with
//! XSEED = 0 and the SHA-1 initial hash constant as the fixed prefix.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::key::{ContentKey, AES_128_KEY_SIZE};
use crate::types::LabelSet;

/// Length of the MIC in bytes (SHA-1 digest size).
pub const HMAC_SIZE: usize = 20;

const KEY_LEN: usize = AES_128_KEY_SIZE;

const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5c;

/// MXF Interop key nonce (ST 429.6 pre-standard profile, section 7.10).
const KEY_NONCE: [u8; KEY_LEN] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
    0xff,
];

/// SHA-1 initial hash value as 20 raw bytes, the `t` constant of
/// FIPS 186-2 appendix 3.1.
const FIPS_T: [u8; HMAC_SIZE] = [
    0x67, 0x45, 0x23, 0x01, 0xef, 0xcd, 0xab, 0x89, 0x98, 0xba, 0xdc, 0xfe, 0x10, 0x32, 0x54,
    0x76, 0xc3, 0xd2, 0xe1, 0xf0,
];

/// MXF Interop MIC key derivation: `trunc16(SHA1(key ‖ key_nonce))`.
fn derive_interop_key(key: &ContentKey) -> [u8; KEY_LEN] {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(KEY_NONCE);
    let digest = sha.finalize();

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&digest[..KEY_LEN]);
    out
}

/// Add two 160-bit big-endian integers modulo 2^160.
fn add_mod_2pow160(a: &[u8; HMAC_SIZE], b: &[u8; HMAC_SIZE]) -> [u8; HMAC_SIZE] {
    let mut out = [0u8; HMAC_SIZE];
    let mut carry = 0u16;
    for i in (0..HMAC_SIZE).rev() {
        let sum = a[i] as u16 + b[i] as u16 + carry;
        out[i] = sum as u8;
        carry = sum >> 8;
    }
    // any remaining carry falls off: that is the mod 2^160 reduction
    out
}

/// SMPTE 429.6 MIC key derivation, per FIPS 186-2 sec. 3.1 as modified by
/// Change 1 ("General Purpose Random Number Generation"), with XSEED = 0.
fn derive_smpte_key(key: &ContentKey) -> [u8; KEY_LEN] {
    // Round 1: x0 = G(t, xkey) where xkey is the 128-bit content key
    let mut sha = Sha1::new();
    sha.update(FIPS_T);
    sha.update(key.as_bytes());
    let x0: [u8; HMAC_SIZE] = sha.finalize().into();

    // xkey = (xkey + 1 + x0) mod 2^160
    let mut xkey = [0u8; HMAC_SIZE];
    xkey[HMAC_SIZE - KEY_LEN..].copy_from_slice(key.as_bytes());
    let mut one = [0u8; HMAC_SIZE];
    one[HMAC_SIZE - 1] = 1;
    let xkey = add_mod_2pow160(&add_mod_2pow160(&xkey, &one), &x0);

    // Round 2: x1 = G(t, xkey), with xkey in minimal big-endian form
    let first_nonzero = xkey.iter().position(|&b| b != 0).unwrap_or(HMAC_SIZE);
    let mut sha = Sha1::new();
    sha.update(FIPS_T);
    sha.update(&xkey[first_nonzero..]);
    let x1: [u8; HMAC_SIZE] = sha.finalize().into();

    debug_assert_ne!(x0, x1);

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&x1[..KEY_LEN]);
    out
}

struct HmacState {
    key: [u8; KEY_LEN],
    sha: Sha1,
    value: [u8; HMAC_SIZE],
    finalized: bool,
}

/// HMAC-SHA1 context keyed with a profile-derived 16-byte MIC key.
///
/// Lifecycle: `init_key` → (`reset` →) `update`* → `finalize` →
/// `value`/`test`. `update` after `finalize` fails with [`Error::Init`];
/// `reset` rearms the context for the next frame.
#[derive(Default)]
pub struct HmacContext {
    state: Option<HmacState>,
}

impl HmacContext {
    /// Create an uninitialized context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the MIC key for the given label dialect and arm the
    /// context. [`LabelSet::Unknown`] is rejected with [`Error::Init`].
    pub fn init_key(&mut self, key: &ContentKey, label_set: LabelSet) -> Result<()> {
        let derived = match label_set {
            LabelSet::MxfInterop => derive_interop_key(key),
            LabelSet::MxfSmpte => derive_smpte_key(key),
            LabelSet::Unknown => return Err(Error::Init),
        };

        self.state = Some(HmacState {
            key: derived,
            sha: Sha1::new(),
            value: [0; HMAC_SIZE],
            finalized: false,
        });
        self.reset();
        Ok(())
    }

    /// Restart the MAC for a new message, keeping the derived key.
    pub fn reset(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.value = [0; HMAC_SIZE];
            state.finalized = false;

            // H(K xor opad, H(K xor ipad, text)) -- inner pass, over the
            // 16-byte key block
            let mut xor_buf = [0u8; KEY_LEN];
            for (i, b) in xor_buf.iter_mut().enumerate() {
                *b = state.key[i] ^ IPAD;
            }
            state.sha = Sha1::new();
            state.sha.update(xor_buf);
        }
    }

    /// Absorb message bytes.
    pub fn update(&mut self, buf: &[u8]) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::Init)?;
        if state.finalized {
            return Err(Error::Init);
        }
        state.sha.update(buf);
        Ok(())
    }

    /// Close the MAC. Further `update` calls fail until `reset`.
    pub fn finalize(&mut self) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::Init)?;
        if state.finalized {
            return Err(Error::Init);
        }

        let inner: [u8; HMAC_SIZE] = state.sha.finalize_reset().into();

        let mut xor_buf = [0u8; KEY_LEN];
        for (i, b) in xor_buf.iter_mut().enumerate() {
            *b = state.key[i] ^ OPAD;
        }

        let mut outer = Sha1::new();
        outer.update(xor_buf);
        outer.update(inner);
        state.value = outer.finalize().into();
        state.finalized = true;
        Ok(())
    }

    /// The finalized MIC value.
    pub fn value(&self) -> Result<&[u8; HMAC_SIZE]> {
        let state = self.state.as_ref().ok_or(Error::Init)?;
        if !state.finalized {
            return Err(Error::Init);
        }
        Ok(&state.value)
    }

    /// Compare a stored MIC against the finalized value in constant time.
    pub fn test(&self, expected: &[u8]) -> Result<()> {
        let value = self.value()?;
        if value.as_slice().ct_eq(expected).into() {
            Ok(())
        } else {
            Err(Error::HmacFail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> ContentKey {
        ContentKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
    }

    #[test]
    fn test_derivations_differ() {
        let interop = derive_interop_key(&test_key());
        let smpte = derive_smpte_key(&test_key());
        assert_ne!(interop, smpte);

        // both are deterministic
        assert_eq!(interop, derive_interop_key(&test_key()));
        assert_eq!(smpte, derive_smpte_key(&test_key()));
    }

    #[test]
    fn test_add_mod_2pow160_carry() {
        let mut a = [0xFFu8; HMAC_SIZE];
        let mut b = [0u8; HMAC_SIZE];
        b[HMAC_SIZE - 1] = 1;
        // all-ones + 1 wraps to zero
        assert_eq!(add_mod_2pow160(&a, &b), [0u8; HMAC_SIZE]);

        a = [0u8; HMAC_SIZE];
        a[HMAC_SIZE - 1] = 0xFF;
        let sum = add_mod_2pow160(&a, &b);
        assert_eq!(sum[HMAC_SIZE - 1], 0x00);
        assert_eq!(sum[HMAC_SIZE - 2], 0x01);
    }

    #[test]
    fn test_lifecycle() {
        let mut hmac = HmacContext::new();
        assert!(matches!(hmac.update(b"x"), Err(Error::Init)));
        assert!(matches!(hmac.finalize(), Err(Error::Init)));

        hmac.init_key(&test_key(), LabelSet::MxfSmpte).unwrap();
        hmac.update(b"payload").unwrap();
        hmac.finalize().unwrap();

        // update after finalize is a lifecycle error
        assert!(matches!(hmac.update(b"more"), Err(Error::Init)));
        // double finalize too
        assert!(matches!(hmac.finalize(), Err(Error::Init)));

        let value = *hmac.value().unwrap();
        hmac.test(&value).unwrap();
        assert!(matches!(hmac.test(&[0u8; HMAC_SIZE]), Err(Error::HmacFail)));
    }

    #[test]
    fn test_unknown_label_set_rejected() {
        let mut hmac = HmacContext::new();
        assert!(matches!(
            hmac.init_key(&test_key(), LabelSet::Unknown),
            Err(Error::Init)
        ));
    }

    #[test]
    fn test_reset_reproduces_value() {
        let mut hmac = HmacContext::new();
        hmac.init_key(&test_key(), LabelSet::MxfInterop).unwrap();
        hmac.update(b"frame bytes").unwrap();
        hmac.finalize().unwrap();
        let first = *hmac.value().unwrap();

        hmac.reset();
        hmac.update(b"frame bytes").unwrap();
        hmac.finalize().unwrap();
        assert_eq!(&first, hmac.value().unwrap());

        hmac.reset();
        hmac.update(b"other bytes").unwrap();
        hmac.finalize().unwrap();
        assert_ne!(&first, hmac.value().unwrap());
    }

    #[test]
    fn test_dialects_produce_distinct_macs() {
        let mut a = HmacContext::new();
        a.init_key(&test_key(), LabelSet::MxfSmpte).unwrap();
        a.update(b"same input").unwrap();
        a.finalize().unwrap();

        let mut b = HmacContext::new();
        b.init_key(&test_key(), LabelSet::MxfInterop).unwrap();
        b.update(b"same input").unwrap();
        b.finalize().unwrap();

        assert_ne!(a.value().unwrap(), b.value().unwrap());
    }
}
