//! Sequential binary encode/decode primitives for the celeris engine.
//!
//! [`BinaryWriter`] appends fixed-width little-endian integers, varints,
//! length-prefixed strings and byte runs to any [`std::io::Write`];
//! [`BinaryReader`] consumes the same layout from any [`std::io::Read`].
//! Neither type knows anything about object graphs; framing decisions live
//! in the engine crate.
//!
//! # Binary Conventions
//!
//! - Fixed-width integers and floats are little-endian.
//! - Varints are LEB128-style: 7 data bits per byte, high bit set while more
//!   bytes follow.
//! - Signed integers are zigzag-transformed before varint encoding so small
//!   negative values stay short.
//! - Strings and byte runs are varint-length-prefixed; strings are UTF-8.

pub mod reader;
pub mod writer;

pub use reader::BinaryReader;
pub use writer::BinaryWriter;

/// The default cap a [`BinaryReader`] places on any single declared length
/// (string, byte run, or collection count) before giving up on the input.
pub const DEFAULT_MAX_LEN: u64 = 1 << 26;

/// An error raised while encoding to or decoding from a binary buffer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input ended in the middle of a value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A varint kept its continuation bit set past the width of the target
    /// integer.
    #[error("varint is longer than the target integer width")]
    VarintTooLong,

    /// A length prefix declared more data than the reader is willing to
    /// allocate.
    #[error("declared length {declared} exceeds the configured limit {limit}")]
    LengthLimitExceeded {
        /// The length the input claimed.
        declared: u64,
        /// The reader's configured cap.
        limit: u64,
    },

    /// A string's bytes were not valid UTF-8.
    #[error("string data is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A boolean byte was neither `0` nor `1`.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    /// The underlying reader or writer failed.
    #[error(transparent)]
    Io(std::io::Error),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(error)
        }
    }
}

/// Zigzag-encodes a signed integer so small magnitudes become small varints.
#[must_use]
pub const fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[must_use]
pub const fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
