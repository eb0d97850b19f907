//! AES-128-CBC block cipher contexts for essence encryption.
//!
//! The SMPTE 429.6 essence path chains every frame through one rolling
//! CBC state: the IV is written once per triplet and then advances to the
//! last ciphertext block on every call. The contexts here expose that
//! state machine directly (`set_iv`/`get_iv` between frames) rather than
//! a one-shot encrypt, because the triplet writer needs to capture and
//! re-seed the running IV.
//!
//! Contexts are not reentrant; callers own one context per stream or
//! reset the IV between frames.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::error::{Error, Result};
use crate::key::{ContentKey, Iv};

/// AES block size in bytes.
pub const CBC_BLOCK_SIZE: usize = 16;

struct CbcState {
    cipher: Aes128,
    iv: [u8; CBC_BLOCK_SIZE],
}

impl CbcState {
    fn new(key: &ContentKey) -> Self {
        CbcState {
            cipher: Aes128::new(key.as_bytes().into()),
            iv: [0; CBC_BLOCK_SIZE],
        }
    }
}

/// CBC encryption context with a rolling IV.
#[derive(Default)]
pub struct AesEncContext {
    state: Option<CbcState>,
}

impl AesEncContext {
    /// Create an uninitialized context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the key schedule. Fails with [`Error::Init`] if the
    /// context was already initialized.
    pub fn init_key(&mut self, key: &ContentKey) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::Init);
        }
        self.state = Some(CbcState::new(key));
        Ok(())
    }

    /// Set the running IV. Permitted any number of times after init.
    pub fn set_iv(&mut self, iv: &Iv) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::Init)?;
        state.iv = *iv.as_bytes();
        Ok(())
    }

    /// Report the running IV.
    pub fn get_iv(&self) -> Result<Iv> {
        let state = self.state.as_ref().ok_or(Error::Init)?;
        Ok(Iv::new(state.iv))
    }

    /// Encrypt a whole number of 16-byte blocks from `pt` into `ct`,
    /// advancing the running IV to the last ciphertext block.
    ///
    /// A length that is not a block multiple is a programmer error.
    pub fn encrypt_blocks(&mut self, pt: &[u8], ct: &mut [u8]) -> Result<()> {
        assert!(!pt.is_empty() && pt.len() % CBC_BLOCK_SIZE == 0);
        assert_eq!(pt.len(), ct.len());

        let state = self.state.as_mut().ok_or(Error::Init)?;

        for (pt_block, ct_block) in pt
            .chunks_exact(CBC_BLOCK_SIZE)
            .zip(ct.chunks_exact_mut(CBC_BLOCK_SIZE))
        {
            // xor with the previous ciphertext block, then encrypt
            let mut tmp = [0u8; CBC_BLOCK_SIZE];
            for (i, b) in tmp.iter_mut().enumerate() {
                *b = pt_block[i] ^ state.iv[i];
            }
            state.cipher.encrypt_block((&mut tmp).into());

            state.iv = tmp;
            ct_block.copy_from_slice(&tmp);
        }

        Ok(())
    }
}

/// CBC decryption context with a rolling IV.
#[derive(Default)]
pub struct AesDecContext {
    state: Option<CbcState>,
}

impl AesDecContext {
    /// Create an uninitialized context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the key schedule. Fails with [`Error::Init`] if the
    /// context was already initialized.
    pub fn init_key(&mut self, key: &ContentKey) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::Init);
        }
        self.state = Some(CbcState::new(key));
        Ok(())
    }

    /// Set the running IV. Permitted any number of times after init.
    pub fn set_iv(&mut self, iv: &Iv) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::Init)?;
        state.iv = *iv.as_bytes();
        Ok(())
    }

    /// Report the running IV.
    pub fn get_iv(&self) -> Result<Iv> {
        let state = self.state.as_ref().ok_or(Error::Init)?;
        Ok(Iv::new(state.iv))
    }

    /// Decrypt a whole number of 16-byte blocks from `ct` into `pt`,
    /// advancing the running IV to the last ciphertext block seen.
    pub fn decrypt_blocks(&mut self, ct: &[u8], pt: &mut [u8]) -> Result<()> {
        assert!(!ct.is_empty() && ct.len() % CBC_BLOCK_SIZE == 0);
        assert_eq!(ct.len(), pt.len());

        let state = self.state.as_mut().ok_or(Error::Init)?;

        for (ct_block, pt_block) in ct
            .chunks_exact(CBC_BLOCK_SIZE)
            .zip(pt.chunks_exact_mut(CBC_BLOCK_SIZE))
        {
            let mut tmp: [u8; CBC_BLOCK_SIZE] =
                ct_block.try_into().expect("chunk is a full block");
            state.cipher.decrypt_block((&mut tmp).into());

            for (i, b) in tmp.iter_mut().enumerate() {
                *b ^= state.iv[i];
            }

            state.iv.copy_from_slice(ct_block);
            pt_block.copy_from_slice(&tmp);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> ContentKey {
        ContentKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
    }

    fn test_iv() -> Iv {
        Iv::new([
            0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d,
            0x1e, 0x1f,
        ])
    }

    #[test]
    fn test_uninitialized() {
        let mut enc = AesEncContext::new();
        assert!(matches!(enc.set_iv(&test_iv()), Err(Error::Init)));
        assert!(matches!(enc.get_iv(), Err(Error::Init)));

        let mut ct = [0u8; 16];
        assert!(matches!(
            enc.encrypt_blocks(&[0u8; 16], &mut ct),
            Err(Error::Init)
        ));
    }

    #[test]
    fn test_double_init() {
        let mut enc = AesEncContext::new();
        enc.init_key(&test_key()).unwrap();
        assert!(matches!(enc.init_key(&test_key()), Err(Error::Init)));

        let mut dec = AesDecContext::new();
        dec.init_key(&test_key()).unwrap();
        assert!(matches!(dec.init_key(&test_key()), Err(Error::Init)));
    }

    #[test]
    fn test_cbc_roundtrip() {
        let mut enc = AesEncContext::new();
        enc.init_key(&test_key()).unwrap();
        enc.set_iv(&test_iv()).unwrap();

        let pt: Vec<u8> = (0u8..64).collect();
        let mut ct = vec![0u8; 64];
        enc.encrypt_blocks(&pt, &mut ct).unwrap();
        assert_ne!(pt, ct);

        let mut dec = AesDecContext::new();
        dec.init_key(&test_key()).unwrap();
        dec.set_iv(&test_iv()).unwrap();

        let mut out = vec![0u8; 64];
        dec.decrypt_blocks(&ct, &mut out).unwrap();
        assert_eq!(pt, out);
    }

    #[test]
    fn test_rolling_iv() {
        // two calls must produce the same stream as one call over the
        // concatenation, because the IV rolls forward
        let pt: Vec<u8> = (0u8..96).collect();

        let mut one = AesEncContext::new();
        one.init_key(&test_key()).unwrap();
        one.set_iv(&test_iv()).unwrap();
        let mut ct_whole = vec![0u8; 96];
        one.encrypt_blocks(&pt, &mut ct_whole).unwrap();

        let mut split = AesEncContext::new();
        split.init_key(&test_key()).unwrap();
        split.set_iv(&test_iv()).unwrap();
        let mut ct_split = vec![0u8; 96];
        split.encrypt_blocks(&pt[..32], &mut ct_split[..32]).unwrap();
        split.encrypt_blocks(&pt[32..], &mut ct_split[32..]).unwrap();

        assert_eq!(ct_whole, ct_split);

        // running IV equals the last ciphertext block
        assert_eq!(split.get_iv().unwrap().as_bytes(), &ct_whole[80..96]);
    }

    #[test]
    fn test_decrypt_iv_follows_ciphertext() {
        let mut enc = AesEncContext::new();
        enc.init_key(&test_key()).unwrap();
        enc.set_iv(&test_iv()).unwrap();

        let pt = [0xA5u8; 32];
        let mut ct = [0u8; 32];
        enc.encrypt_blocks(&pt, &mut ct).unwrap();

        let mut dec = AesDecContext::new();
        dec.init_key(&test_key()).unwrap();
        dec.set_iv(&test_iv()).unwrap();

        let mut out = [0u8; 32];
        dec.decrypt_blocks(&ct, &mut out).unwrap();
        assert_eq!(dec.get_iv().unwrap().as_bytes(), &ct[16..32]);
    }
}
