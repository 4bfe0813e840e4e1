//! Error types for keyka operations

use thiserror::Error;

/// Result type alias for keyka operations
pub type Result<T> = std::result::Result<T, KeykaError>;

/// Errors that can occur while packing or reading keyka files
#[derive(Error, Debug)]
pub enum KeykaError {
    /// File does not begin with the keyka magic
    #[error("invalid magic: not a keyka v0 file")]
    BadMagic,

    /// Structurally invalid tree data
    #[error("corrupt tree: {0}")]
    Corrupt(String),

    /// Packer input key not strictly greater than its predecessor
    #[error("unsorted input: key at index {index} is not greater than its predecessor")]
    Unsorted { index: u64 },

    /// Packer input contains the same key twice
    #[error("duplicate key at input index {index}")]
    DuplicateKey { index: u64 },

    /// Key length does not fit the u16 length field
    #[error("key too long: {0} bytes (maximum 65535)")]
    KeyTooLong(usize),

    /// A record would start past the signed 32-bit offset range
    #[error("tree too large: record at tree offset {0} exceeds the 2 GiB limit")]
    TreeTooLarge(u64),

    /// I/O error from the sink or source
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
