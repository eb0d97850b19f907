//! Key and IV handling for the essence encryption path.
//!
//! # Security
//!
//! Key material is zeroized on drop to prevent sensitive data from
//! remaining in memory after use.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of an AES-128 key in bytes.
pub const AES_128_KEY_SIZE: usize = 16;

/// Size of a CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// Content encryption key (AES-128).
///
/// # Security
///
/// The key material is automatically zeroized when the struct is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    key: [u8; AES_128_KEY_SIZE],
}

impl ContentKey {
    /// Create a new content key from raw bytes.
    pub fn new(key: [u8; AES_128_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Create a content key from a byte slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let key: [u8; AES_128_KEY_SIZE] = slice
            .try_into()
            .map_err(|_| Error::CryptInit)?;
        Ok(Self { key })
    }

    /// Create a content key from a hex-encoded string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.replace(['-', ' '], "");
        if hex.len() != AES_128_KEY_SIZE * 2 {
            return Err(Error::CryptInit);
        }

        let mut key = [0u8; AES_128_KEY_SIZE];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk).map_err(|_| Error::CryptInit)?;
            key[i] = u8::from_str_radix(hex_str, 16).map_err(|_| Error::CryptInit)?;
        }
        Ok(Self { key })
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; AES_128_KEY_SIZE] {
        &self.key
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Redact key value for security
        write!(f, "ContentKey([REDACTED])")
    }
}

/// CBC initialization vector.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Iv {
    iv: [u8; IV_SIZE],
}

impl Iv {
    /// Create a new IV from raw bytes.
    pub fn new(iv: [u8; IV_SIZE]) -> Self {
        Self { iv }
    }

    /// Create an IV from a byte slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let iv: [u8; IV_SIZE] = slice.try_into().map_err(|_| Error::CryptInit)?;
        Ok(Self { iv })
    }

    /// All-zero IV.
    pub fn zero() -> Self {
        Self { iv: [0; IV_SIZE] }
    }

    /// Get the raw IV bytes.
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv(")?;
        for b in &self.iv {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_hex() {
        let key = ContentKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(key.as_bytes()[0], 0x00);
        assert_eq!(key.as_bytes()[15], 0x0F);

        assert!(ContentKey::from_hex("0001").is_err());
        assert!(ContentKey::from_hex("zz0102030405060708090a0b0c0d0e0f").is_err());
    }

    #[test]
    fn test_key_debug_redacted() {
        let key = ContentKey::new([0xAA; 16]);
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("aa"));
    }

    #[test]
    fn test_iv_from_slice() {
        let iv = Iv::from_slice(&[0x10; 16]).unwrap();
        assert_eq!(iv.as_bytes(), &[0x10; 16]);

        assert!(Iv::from_slice(&[0; 8]).is_err());
    }
}
