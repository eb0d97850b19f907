//! Error types for AS-DCP/AS-02 operations.
//!
//! No panics cross the public boundary; every fault is surfaced as a
//! structured result value. Operations that partially modify a writer run
//! its reset path before returning, so a failed call always leaves the
//! object in its ground state.

use thiserror::Error;

/// Result type alias for AS-DCP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing AS-DCP/AS-02 files.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation called in the wrong lifecycle state, or on an
    /// uninitialized cipher/HMAC engine.
    #[error("operation called in the wrong state or on an uninitialized engine")]
    Init,

    /// Open called on an object that is already open.
    #[error("already open")]
    State,

    /// Frame number outside the index's domain.
    #[error("frame number out of range: {0}")]
    Range(u32),

    /// A parsed field does not match its expected UL, length width, or
    /// cryptographic context.
    #[error("format error: {0}")]
    Format(String),

    /// Short read or underlying I/O failure.
    #[error("I/O failure: {0}")]
    ReadFail(#[from] std::io::Error),

    /// Caller-provided buffer cannot hold the output.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    SmallBuf {
        /// Required capacity in bytes.
        needed: usize,
        /// Capacity the caller supplied.
        available: usize,
    },

    /// Integrity pack does not match the recomputed MIC.
    #[error("frame integrity check failed")]
    HmacFail,

    /// Cipher key schedule setup failed.
    #[error("cipher key schedule setup failed")]
    CryptInit,

    /// Generic unexpected condition, e.g. a BER width overflow.
    #[error("{0}")]
    Fail(String),
}

impl Error {
    /// Shorthand for a [`Error::Format`] with a formatted message.
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}
