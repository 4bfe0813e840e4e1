//! keyka — a static, read-optimized key-value store in a single file
//!
//! A keyka file is built once, offline, from a pre-sorted set of
//! `(key, value)` pairs and is immutable afterwards. The packer lays out
//! an implicit balanced binary search tree over the input in a single
//! forward pass; the reader navigates that tree over a memory-mapped
//! image with zero-copy byte comparisons.
//!
//! # Features
//!
//! - **Pack** a sorted stream of byte keys and u64 values into one file
//! - **Exact lookup** by key over a memory map, no deserialization step
//! - **Range scans** between arbitrary byte-string bounds, lazily
//! - **Cross-platform** - the format is little-endian and unaligned
//!   everywhere
//!
//! # Example
//!
//! ```no_run
//! use keyka::{pack_to_file, KeykaFile, Result};
//!
//! fn main() -> Result<()> {
//!     pack_to_file(
//!         "animals.keyka",
//!         [(&b"cat"[..], 1u64), (&b"dog"[..], 2), (&b"zebra"[..], 3)],
//!     )?;
//!
//!     let file = KeykaFile::open("animals.keyka")?;
//!     assert_eq!(file.find_exact(b"dog")?, Some(2));
//!
//!     for pair in file.find_range(b"cat", Some(b"dog".as_slice()), true, true)? {
//!         let (key, value) = pair?;
//!         println!("{} = {}", String::from_utf8_lossy(&key), value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

pub use error::{KeykaError, Result};
pub use format::{compare_keys, node_level, MAGIC};
pub use reader::{KeykaReader, RangeScan};
pub use writer::{pack, pack_to_file, KeykaWriter, MAX_KEY_LEN};

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

/// Memory-mapped keyka file
///
/// Owns the mapping for its whole lifetime; readers and range scans
/// borrow from it, so the borrow checker prevents the file from being
/// unmapped while any of them is alive.
pub struct KeykaFile {
    map: Mmap,
    empty: bool,
}

impl KeykaFile {
    /// Open a keyka file, map it read-only and validate it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only and the format contract makes
        // packed files immutable; nothing remaps or truncates them.
        let map = unsafe { Mmap::map(&file)? };
        let empty = KeykaReader::new(&map)?.is_empty();
        Ok(KeykaFile { map, empty })
    }

    /// Borrow a zero-copy reader over the mapping.
    pub fn reader(&self) -> Result<KeykaReader<'_>> {
        KeykaReader::new(&self.map)
    }

    /// `true` when the file holds no records
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Look up a key, returning its value when present.
    pub fn find_exact(&self, key: &[u8]) -> Result<Option<u64>> {
        self.reader()?.find_exact(key)
    }

    /// Lazily scan pairs in ascending key order; see
    /// [`KeykaReader::find_range`].
    pub fn find_range(
        &self,
        low: &[u8],
        high: Option<&[u8]>,
        inclusive_low: bool,
        inclusive_high: bool,
    ) -> Result<RangeScan<'_>> {
        self.reader()?
            .find_range(low, high, inclusive_low, inclusive_high)
    }

    /// Scan every pair in ascending key order.
    pub fn iter(&self) -> Result<RangeScan<'_>> {
        self.reader()?.iter()
    }
}
